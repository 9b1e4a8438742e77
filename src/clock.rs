use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};

/// All batch timekeeping happens in a single fixed UTC+9 offset. No DST.
pub const UTC_OFFSET_HOURS: i32 = 9;

#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Local hour before which a visit still belongs to yesterday's batch.
    pub day_rollover_hour: u32,
    /// First hour (inclusive) of the operating window.
    pub open_hour: u32,
    /// Last hour (inclusive) of the operating window.
    pub close_hour: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            day_rollover_hour: 7,
            open_hour: 7,
            close_hour: 22,
        }
    }
}

/// Maps wall-clock time to a batch key (calendar day) and to the
/// operating-window flag.
///
/// The "trading day" starts at 07:00 local time, so an early-morning visit
/// still sees the prior day's batch.
#[derive(Debug, Clone)]
pub struct BatchClock {
    offset: FixedOffset,
    config: ClockConfig,
}

impl BatchClock {
    pub fn new(config: ClockConfig) -> Self {
        let offset =
            FixedOffset::east_opt(UTC_OFFSET_HOURS * 3600).expect("valid fixed UTC offset");
        Self { offset, config }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current wall-clock time in the fixed local offset.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Batch key for an arbitrary instant: yesterday's date while the local
    /// hour is still before the rollover hour, today's date otherwise.
    pub fn batch_key_at(&self, now: DateTime<FixedOffset>) -> String {
        let day = if now.hour() < self.config.day_rollover_hour {
            now - Duration::days(1)
        } else {
            now
        };
        day.format("%Y-%m-%d").to_string()
    }

    pub fn batch_key(&self) -> String {
        self.batch_key_at(self.now())
    }

    /// Closed-interval check by local hour, [open_hour, close_hour].
    pub fn is_operating_window_at(&self, now: DateTime<FixedOffset>) -> bool {
        let hour = now.hour();
        hour >= self.config.open_hour && hour <= self.config.close_hour
    }

    pub fn is_operating_window(&self) -> bool {
        self.is_operating_window_at(self.now())
    }
}

impl Default for BatchClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(UTC_OFFSET_HOURS * 3600)
            .unwrap()
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
    }

    #[test]
    fn batch_key_before_rollover_is_yesterday() {
        let clock = BatchClock::default();
        assert_eq!(clock.batch_key_at(local(2024, 5, 10, 6, 59)), "2024-05-09");
        assert_eq!(clock.batch_key_at(local(2024, 5, 10, 0, 0)), "2024-05-09");
    }

    #[test]
    fn batch_key_at_and_after_rollover_is_today() {
        let clock = BatchClock::default();
        assert_eq!(clock.batch_key_at(local(2024, 5, 10, 7, 0)), "2024-05-10");
        assert_eq!(clock.batch_key_at(local(2024, 5, 10, 23, 59)), "2024-05-10");
    }

    #[test]
    fn batch_key_crosses_month_boundary() {
        let clock = BatchClock::default();
        assert_eq!(clock.batch_key_at(local(2024, 3, 1, 2, 0)), "2024-02-29");
    }

    #[test]
    fn operating_window_is_closed_interval() {
        let clock = BatchClock::default();
        assert!(!clock.is_operating_window_at(local(2024, 5, 10, 6, 59)));
        assert!(clock.is_operating_window_at(local(2024, 5, 10, 7, 0)));
        assert!(clock.is_operating_window_at(local(2024, 5, 10, 22, 59)));
        assert!(!clock.is_operating_window_at(local(2024, 5, 10, 23, 0)));
    }
}
