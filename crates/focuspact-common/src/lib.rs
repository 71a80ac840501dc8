pub mod clock;
pub mod error;
pub mod integrity;
pub mod partner;
pub mod progress;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use integrity::*;
pub use partner::*;
pub use progress::*;
pub use types::*;
