// Clock abstraction
//
// Day-rollover and quiet-hour decisions depend on the device's local
// calendar, so the clock is injected rather than read ambiently. Tests
// drive a ManualClock across midnight without waiting for real time.

use std::sync::Mutex;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc, Weekday};

pub trait Clock: Send + Sync {
    /// Wall-clock instant used for event timestamps and duration math.
    fn now(&self) -> DateTime<Utc>;

    /// Calendar date in the device timezone, used for day-rollover logic.
    fn today(&self) -> NaiveDate;

    /// The device-calendar date a given instant falls on. Day tallies must
    /// go through this rather than the instant's UTC date, or evening
    /// events land on the wrong day for any non-UTC device.
    fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate;

    /// Hour of day (0-23) in the device timezone.
    fn hour(&self) -> u32;

    fn weekday(&self) -> Weekday {
        self.today().weekday()
    }

    fn is_weekend(&self) -> bool {
        matches!(self.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

/// Production clock backed by the system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&Local).date_naive()
    }

    fn hour(&self) -> u32 {
        Local::now().hour()
    }
}

/// Settable clock for tests. Holds a naive local datetime and reports it
/// both as the instant and as the calendar position.
pub struct ManualClock {
    current: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(datetime: NaiveDateTime) -> Self {
        Self { current: Mutex::new(datetime) }
    }

    pub fn at(date: NaiveDate, hour: u32, minute: u32) -> Self {
        let dt = date.and_hms_opt(hour, minute, 0).expect("valid time of day");
        Self::new(dt)
    }

    pub fn set(&self, datetime: NaiveDateTime) {
        *self.current.lock().expect("clock lock poisoned") = datetime;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut current = self.current.lock().expect("clock lock poisoned");
        *current += duration;
    }

    fn snapshot(&self) -> NaiveDateTime {
        *self.current.lock().expect("clock lock poisoned")
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.snapshot())
    }

    fn today(&self) -> NaiveDate {
        self.snapshot().date()
    }

    fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        // The manual clock's naive datetime stands for both the instant
        // and the calendar position, so the two views coincide.
        instant.naive_utc().date()
    }

    fn hour(&self) -> u32 {
        self.snapshot().hour()
    }
}
