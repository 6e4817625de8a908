use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

/// Abstraction over "current time" so signatures, nonces and snapshot
/// timestamps are deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch, as most exchange APIs expect.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Calendar date of "now" in the given timezone.
    fn today_in(&self, tz: Tz) -> NaiveDate {
        self.now().with_timezone(&tz).date_naive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn today_follows_timezone() {
        // 20:00 UTC is already the next day in Singapore.
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0).unwrap());
        assert_eq!(
            clock.today_in(chrono_tz::Asia::Singapore),
            NaiveDate::from_ymd_opt(2025, 3, 2).unwrap()
        );
        assert_eq!(
            clock.today_in(chrono_tz::UTC),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
    }
}
