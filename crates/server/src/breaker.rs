use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const HOUR_MS: i64 = 3_600_000;

/// Persisted form of the breaker state. Round-trips through the store
/// adapter's flag facility so a durable backend survives restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BreakerSnapshot {
    pub slot: i64,
    pub count: i64,
    pub locked: bool,
}

/// Verdict for the write that just incremented the hourly counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerVerdict {
    Counted,
    /// The threshold was exceeded: the gateway is now locked and the caller
    /// must reject the triggering message with `auto_locked_all`.
    Tripped,
}

/// System-wide hourly volume counter. The hour slot is
/// `floor(now_ms / 3_600_000)`; the counter resets whenever the slot
/// changes. Only an administrative action clears the lock.
pub struct VolumeBreaker {
    threshold: i64,
    state: Mutex<BreakerSnapshot>,
}

impl VolumeBreaker {
    pub fn new(threshold: i64) -> Self {
        Self {
            threshold,
            state: Mutex::new(BreakerSnapshot::default()),
        }
    }

    /// Adopt a snapshot loaded from the durable store at startup.
    pub async fn hydrate(&self, snapshot: BreakerSnapshot) {
        *self.state.lock().await = snapshot;
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        *self.state.lock().await
    }

    pub async fn is_locked(&self) -> bool {
        self.state.lock().await.locked
    }

    /// Count one accepted write.
    pub async fn record(&self, now_ms: i64) -> (BreakerVerdict, BreakerSnapshot) {
        let mut state = self.state.lock().await;
        let slot = now_ms.div_euclid(HOUR_MS);
        if state.slot != slot {
            state.slot = slot;
            state.count = 0;
        }
        state.count += 1;
        if state.count > self.threshold {
            state.locked = true;
            (BreakerVerdict::Tripped, *state)
        } else {
            (BreakerVerdict::Counted, *state)
        }
    }

    pub async fn lock(&self) -> BreakerSnapshot {
        let mut state = self.state.lock().await;
        state.locked = true;
        *state
    }

    /// Clear the lock and reset the current slot so the next write does not
    /// immediately re-trip inside the same hot hour.
    pub async fn unlock(&self, now_ms: i64) -> BreakerSnapshot {
        let mut state = self.state.lock().await;
        state.locked = false;
        state.slot = now_ms.div_euclid(HOUR_MS);
        state.count = 0;
        *state
    }
}
