use std::time::Duration;

use thiserror::Error;

/// Errors from constructing a retry schedule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryScheduleError {
    /// The schedule must contain at least one interval.
    #[error("retry schedule needs at least one interval")]
    EmptySchedule,
    /// The inner retry budget must allow at least one attempt.
    #[error("retry attempt bound must be at least 1")]
    ZeroBound,
}

/// Escalating backoff schedule with a bounded inner retry budget.
///
/// Immutable for the life of a channel. Attempts beyond the schedule length
/// reuse the last (largest) interval; exceeding the attempt bound triggers
/// the outer cooldown restart instead of terminating the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    intervals: Vec<Duration>,
    max_attempts: u32,
}

impl RetrySchedule {
    /// Build a schedule from ordered intervals and an inner attempt bound.
    pub fn new(intervals: Vec<Duration>, max_attempts: u32) -> Result<Self, RetryScheduleError> {
        if intervals.is_empty() {
            return Err(RetryScheduleError::EmptySchedule);
        }
        if max_attempts == 0 {
            return Err(RetryScheduleError::ZeroBound);
        }

        Ok(Self {
            intervals,
            max_attempts,
        })
    }

    /// Delay before retry attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = (attempt.saturating_sub(1) as usize).min(self.intervals.len() - 1);
        self.intervals[index]
    }

    /// Inner retry budget; attempts beyond it restart the whole cycle.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempt` (1-based) still fits the inner retry budget.
    pub fn within_budget(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Cooldown before a fresh retry burst (the shortest interval).
    pub fn cooldown(&self) -> Duration {
        self.intervals[0]
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            intervals: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(30),
                Duration::from_secs(60),
            ],
            max_attempts: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_delay_by_one_based_attempt() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(schedule.delay_for_attempt(2), Duration::from_secs(5));
        assert_eq!(schedule.delay_for_attempt(3), Duration::from_secs(30));
        assert_eq!(schedule.delay_for_attempt(4), Duration::from_secs(60));
    }

    #[test]
    fn reuses_last_interval_beyond_schedule_length() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.delay_for_attempt(5), Duration::from_secs(60));
        assert_eq!(schedule.delay_for_attempt(100), Duration::from_secs(60));
    }

    #[test]
    fn cooldown_is_the_shortest_interval() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.cooldown(), Duration::from_secs(1));
    }

    #[test]
    fn tracks_inner_budget() {
        let schedule =
            RetrySchedule::new(vec![Duration::from_millis(100)], 2).expect("schedule is valid");
        assert!(schedule.within_budget(1));
        assert!(schedule.within_budget(2));
        assert!(!schedule.within_budget(3));
    }

    #[test]
    fn rejects_empty_schedule() {
        assert_eq!(
            RetrySchedule::new(Vec::new(), 4),
            Err(RetryScheduleError::EmptySchedule)
        );
    }

    #[test]
    fn rejects_zero_attempt_bound() {
        assert_eq!(
            RetrySchedule::new(vec![Duration::from_secs(1)], 0),
            Err(RetryScheduleError::ZeroBound)
        );
    }
}
