use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The rolled-up outcome of one calendar day, produced at day close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub within_all_limits: bool,
    pub total_screen_minutes: u32,
    pub limit_exceeded_count: u32,
    pub grace_used_count: u32,
    pub emergency_access_count: u32,
    pub done_chosen_count: u32,
    pub extension_requested_count: u32,
}

impl DailyRecord {
    /// Heuristic quality scalar for the day, clamped to [0, 1]. Not an
    /// invariant, just a display/summary value.
    pub fn success_score(&self) -> f64 {
        let score = 1.0 - 0.2 * self.limit_exceeded_count as f64
            - 0.3 * self.emergency_access_count as f64
            + 0.05 * self.done_chosen_count as f64;
        score.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementCategory {
    /// Consecutive compliant days.
    Streak,
    /// Cumulative compliant days, consecutive or not.
    Milestone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AchievementDefinition {
    pub id: &'static str,
    pub title: &'static str,
    pub category: AchievementCategory,
    pub required_value: u32,
}

/// The fixed catalog. Streak tiers are driven by `current_streak`,
/// milestone tiers by `total_days_within_limits`.
pub const ACHIEVEMENT_CATALOG: [AchievementDefinition; 11] = [
    AchievementDefinition { id: "first-day", title: "First Day", category: AchievementCategory::Streak, required_value: 1 },
    AchievementDefinition { id: "three-day-streak", title: "Three in a Row", category: AchievementCategory::Streak, required_value: 3 },
    AchievementDefinition { id: "one-week-streak", title: "One Week Strong", category: AchievementCategory::Streak, required_value: 7 },
    AchievementDefinition { id: "two-week-streak", title: "Fortnight Focus", category: AchievementCategory::Streak, required_value: 14 },
    AchievementDefinition { id: "one-month-streak", title: "Month of Discipline", category: AchievementCategory::Streak, required_value: 30 },
    AchievementDefinition { id: "two-month-streak", title: "Sixty Days Straight", category: AchievementCategory::Streak, required_value: 60 },
    AchievementDefinition { id: "hundred-day-streak", title: "Century Streak", category: AchievementCategory::Streak, required_value: 100 },
    AchievementDefinition { id: "ten-good-days", title: "Ten Good Days", category: AchievementCategory::Milestone, required_value: 10 },
    AchievementDefinition { id: "twenty-five-good-days", title: "Quarter Hundred", category: AchievementCategory::Milestone, required_value: 25 },
    AchievementDefinition { id: "fifty-good-days", title: "Fifty Good Days", category: AchievementCategory::Milestone, required_value: 50 },
    AchievementDefinition { id: "hundred-good-days", title: "Hundred Good Days", category: AchievementCategory::Milestone, required_value: 100 },
];

/// Progress against one catalog entry. Unlocking is one-way: progress keeps
/// being reported afterward, but `is_unlocked` never reverts and
/// `unlocked_at` is stamped exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub definition_id: String,
    pub current_progress: u32,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl Achievement {
    pub fn new(definition: &AchievementDefinition) -> Self {
        Self {
            definition_id: definition.id.to_string(),
            current_progress: 0,
            is_unlocked: false,
            unlocked_at: None,
        }
    }

    pub fn definition(&self) -> Option<&'static AchievementDefinition> {
        ACHIEVEMENT_CATALOG.iter().find(|d| d.id == self.definition_id)
    }

    /// Report new progress. Returns true when this call crossed the unlock
    /// threshold for the first time.
    pub fn report_progress(&mut self, progress: u32, required: u32, now: DateTime<Utc>) -> bool {
        self.current_progress = progress;
        if self.is_unlocked || progress < required {
            return false;
        }
        self.is_unlocked = true;
        self.unlocked_at = Some(now);
        true
    }
}

pub const WEEKLY_HISTORY_CAP: usize = 7;

/// Streak and achievement state, persisted as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_days_within_limits: u32,
    pub total_days_tracked: u32,
    pub weekly_history: Vec<DailyRecord>,
    pub achievements: Vec<Achievement>,
}

impl Default for UserProgress {
    fn default() -> Self {
        Self {
            current_streak: 0,
            longest_streak: 0,
            total_days_within_limits: 0,
            total_days_tracked: 0,
            weekly_history: Vec::new(),
            achievements: ACHIEVEMENT_CATALOG.iter().map(Achievement::new).collect(),
        }
    }
}

impl UserProgress {
    pub fn success_rate(&self) -> f64 {
        if self.total_days_tracked == 0 {
            return 0.0;
        }
        self.total_days_within_limits as f64 / self.total_days_tracked as f64
    }

    /// Fold one closed day into the streak state and advance achievement
    /// progress. Returns the definitions unlocked by this call.
    ///
    /// A single non-compliant day resets the streak to zero; there is no
    /// partial credit.
    pub fn record_day(
        &mut self,
        record: DailyRecord,
        now: DateTime<Utc>,
    ) -> Vec<&'static AchievementDefinition> {
        self.weekly_history.push(record.clone());
        while self.weekly_history.len() > WEEKLY_HISTORY_CAP {
            self.weekly_history.remove(0);
        }

        self.total_days_tracked += 1;
        if record.within_all_limits {
            self.total_days_within_limits += 1;
            self.current_streak += 1;
            if self.current_streak > self.longest_streak {
                self.longest_streak = self.current_streak;
            }
        } else {
            self.current_streak = 0;
        }

        self.advance_achievements(now)
    }

    fn advance_achievements(&mut self, now: DateTime<Utc>) -> Vec<&'static AchievementDefinition> {
        let mut unlocked = Vec::new();
        for achievement in &mut self.achievements {
            let Some(definition) = ACHIEVEMENT_CATALOG
                .iter()
                .find(|d| d.id == achievement.definition_id)
            else {
                continue;
            };
            let progress = match definition.category {
                AchievementCategory::Streak => self.current_streak,
                AchievementCategory::Milestone => self.total_days_within_limits,
            };
            if achievement.report_progress(progress, definition.required_value, now) {
                unlocked.push(definition);
            }
        }
        unlocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(date: NaiveDate, within: bool) -> DailyRecord {
        DailyRecord {
            date,
            within_all_limits: within,
            total_screen_minutes: 90,
            limit_exceeded_count: if within { 0 } else { 1 },
            grace_used_count: 0,
            emergency_access_count: 0,
            done_chosen_count: 0,
            extension_requested_count: 0,
        }
    }

    fn dates() -> impl Iterator<Item = NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        start.iter_days()
    }

    #[test]
    fn test_streak_sequence() {
        let mut progress = UserProgress::default();
        let outcomes = [true, true, true, false, true];
        let now = Utc::now();

        for (date, within) in dates().zip(outcomes) {
            progress.record_day(day(date, within), now);
        }

        assert_eq!(progress.current_streak, 1);
        assert_eq!(progress.longest_streak, 3);
        assert_eq!(progress.total_days_within_limits, 4);
        assert_eq!(progress.total_days_tracked, 5);
        assert!(progress.longest_streak >= progress.current_streak);
    }

    #[test]
    fn test_weekly_history_fifo_cap() {
        let mut progress = UserProgress::default();
        let now = Utc::now();
        let days: Vec<NaiveDate> = dates().take(10).collect();

        for date in &days {
            progress.record_day(day(*date, true), now);
        }

        assert_eq!(progress.weekly_history.len(), WEEKLY_HISTORY_CAP);
        assert_eq!(progress.weekly_history[0].date, days[3]);
        assert_eq!(progress.weekly_history[6].date, days[9]);
    }

    #[test]
    fn test_success_rate() {
        let mut progress = UserProgress::default();
        assert_eq!(progress.success_rate(), 0.0);

        let now = Utc::now();
        for (date, within) in dates().zip([true, false, true, true]) {
            progress.record_day(day(date, within), now);
        }
        assert!((progress.success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_achievement_unlocks_once_at_threshold() {
        let mut progress = UserProgress::default();
        let now = Utc::now();
        let mut unlock_day = None;

        for (i, date) in dates().take(9).enumerate() {
            let unlocked = progress.record_day(day(date, true), now);
            if unlocked.iter().any(|d| d.id == "one-week-streak") {
                assert!(unlock_day.is_none(), "unlocked twice");
                unlock_day = Some(i);
            }
        }

        // requiredValue=7 unlocks exactly when the streak first reaches 7.
        assert_eq!(unlock_day, Some(6));

        let achievement = progress
            .achievements
            .iter()
            .find(|a| a.definition_id == "one-week-streak")
            .unwrap();
        assert!(achievement.is_unlocked);
        assert_eq!(achievement.current_progress, 9);

        let stamped = achievement.unlocked_at.unwrap();
        let later = now + chrono::Duration::hours(1);
        let mut progress2 = progress.clone();
        progress2.record_day(day(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(), true), later);
        let again = progress2
            .achievements
            .iter()
            .find(|a| a.definition_id == "one-week-streak")
            .unwrap();
        assert_eq!(again.unlocked_at, Some(stamped));
    }

    #[test]
    fn test_milestone_survives_broken_streak() {
        let mut progress = UserProgress::default();
        let now = Utc::now();
        let outcomes = (0..12).map(|i| i != 6);

        for (date, within) in dates().zip(outcomes) {
            progress.record_day(day(date, within), now);
        }

        assert_eq!(progress.current_streak, 5);
        let milestone = progress
            .achievements
            .iter()
            .find(|a| a.definition_id == "ten-good-days")
            .unwrap();
        assert!(milestone.is_unlocked);
    }

    #[test]
    fn test_success_score_weights() {
        let mut record = day(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), true);
        assert!((record.success_score() - 1.0).abs() < f64::EPSILON);

        record.limit_exceeded_count = 2;
        record.emergency_access_count = 1;
        record.done_chosen_count = 2;
        // 1.0 - 0.4 - 0.3 + 0.1
        assert!((record.success_score() - 0.4).abs() < 1e-9);

        record.limit_exceeded_count = 10;
        assert_eq!(record.success_score(), 0.0);
    }

    #[test]
    fn test_catalog_has_eleven_definitions() {
        assert_eq!(ACHIEVEMENT_CATALOG.len(), 11);
        let progress = UserProgress::default();
        assert_eq!(progress.achievements.len(), 11);
    }
}
