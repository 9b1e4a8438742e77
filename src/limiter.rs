use crate::clock::BatchClock;
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default number of pipeline runs allowed per batch key per session.
pub const DAILY_REFRESH_LIMIT: u32 = 20;

/// Tracks how many recomputation runs have been permitted per batch key in
/// the current serving session, and gates new runs by both the remaining
/// count and the operating window.
///
/// Counters live only in process memory: they reset with the session and
/// are not shared across concurrent sessions observing the same key.
pub struct RefreshLimiter {
    clock: BatchClock,
    daily_limit: u32,
    counts: RwLock<HashMap<String, u32>>,
}

impl RefreshLimiter {
    pub fn new(clock: BatchClock, daily_limit: u32) -> Self {
        Self {
            clock,
            daily_limit,
            counts: RwLock::new(HashMap::new()),
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Runs still available for the key in this session.
    pub async fn remaining(&self, batch_date: &str) -> u32 {
        let counts = self.counts.read().await;
        let used = counts.get(batch_date).copied().unwrap_or(0);
        self.daily_limit.saturating_sub(used)
    }

    /// Consume one run at an arbitrary instant. Succeeds only when budget
    /// remains and the operating window is open; fails without side effect
    /// otherwise.
    pub async fn try_consume_at(&self, batch_date: &str, now: DateTime<FixedOffset>) -> bool {
        if !self.clock.is_operating_window_at(now) {
            debug!(batch_date, "Refresh refused: outside operating window");
            return false;
        }

        let mut counts = self.counts.write().await;
        let used = counts.entry(batch_date.to_string()).or_insert(0);
        if *used >= self.daily_limit {
            debug!(batch_date, used = *used, "Refresh refused: budget exhausted");
            return false;
        }

        *used += 1;
        info!(
            batch_date,
            used = *used,
            limit = self.daily_limit,
            "Refresh authorized"
        );
        true
    }

    pub async fn try_consume(&self, batch_date: &str) -> bool {
        self.try_consume_at(batch_date, self.clock.now()).await
    }
}
