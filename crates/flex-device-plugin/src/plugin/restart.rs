use std::time::Duration;
use std::time::Instant;

/// Restarts tolerated within [`CRASH_WINDOW`] before giving up.
pub const MAX_RESTARTS: u32 = 5;
/// A crash this long after the previous one starts a new episode.
pub const CRASH_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Re-enter the serving loop
    Restart { count: u32 },
    /// The server keeps crashing, the process should exit
    GiveUp { count: u32 },
}

/// Crash bookkeeping for one serving loop.
///
/// Owned by the loop and recreated on every start. Bounds restarts within a
/// rolling window only: crashes spaced more than [`CRASH_WINDOW`] apart never
/// exhaust the budget.
#[derive(Debug)]
pub struct RestartPolicy {
    last_crash: Instant,
    restart_count: u32,
}

impl RestartPolicy {
    /// `started_at` stands in for the previous crash until the first one happens.
    pub fn new(started_at: Instant) -> Self {
        Self {
            last_crash: started_at,
            restart_count: 0,
        }
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn record_crash(&mut self, now: Instant) -> RestartDecision {
        let since_last_crash = now.saturating_duration_since(self.last_crash);
        self.last_crash = now;

        if since_last_crash > CRASH_WINDOW {
            self.restart_count = 1;
        } else {
            self.restart_count += 1;
        }

        if self.restart_count > MAX_RESTARTS {
            RestartDecision::GiveUp {
                count: self.restart_count,
            }
        } else {
            RestartDecision::Restart {
                count: self.restart_count,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn crashes_within_window_accumulate() {
        let start = Instant::now();
        let mut policy = RestartPolicy::new(start);

        for (i, expected) in (1..=3).enumerate() {
            let decision = policy.record_crash(start + MINUTE * (i as u32 + 1));
            assert_eq!(decision, RestartDecision::Restart { count: expected });
        }
        assert_eq!(policy.restart_count(), 3);

        assert_eq!(
            policy.record_crash(start + MINUTE * 4),
            RestartDecision::Restart { count: 4 }
        );
        assert_eq!(
            policy.record_crash(start + MINUTE * 5),
            RestartDecision::Restart { count: 5 }
        );
        assert_eq!(
            policy.record_crash(start + MINUTE * 6),
            RestartDecision::GiveUp { count: 6 }
        );
    }

    #[test]
    fn crash_after_window_resets_count() {
        let start = Instant::now();
        let mut policy = RestartPolicy::new(start);

        let mut now = start;
        for _ in 0..MAX_RESTARTS {
            now += MINUTE;
            policy.record_crash(now);
        }
        assert_eq!(policy.restart_count(), MAX_RESTARTS);

        now += CRASH_WINDOW + Duration::from_secs(1);
        assert_eq!(
            policy.record_crash(now),
            RestartDecision::Restart { count: 1 }
        );
    }

    #[test]
    fn window_is_measured_from_previous_crash() {
        let start = Instant::now();
        let mut policy = RestartPolicy::new(start);

        // Each crash is 50 minutes after the previous one: more than an hour
        // in total, but never an hour apart.
        let mut now = start;
        let mut last = None;
        for _ in 0..=MAX_RESTARTS {
            now += MINUTE * 50;
            last = Some(policy.record_crash(now));
        }
        assert_eq!(
            last,
            Some(RestartDecision::GiveUp {
                count: MAX_RESTARTS + 1
            })
        );
    }

    #[test]
    fn exactly_one_window_does_not_reset() {
        let start = Instant::now();
        let mut policy = RestartPolicy::new(start);

        policy.record_crash(start + MINUTE);
        assert_eq!(
            policy.record_crash(start + MINUTE + CRASH_WINDOW),
            RestartDecision::Restart { count: 2 }
        );
    }
}
