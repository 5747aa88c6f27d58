use std::collections::HashMap;

use tokio::sync::Mutex;

/// Per-author token-bucket admission control.
///
/// One map behind one mutex is the single synchronization point: concurrent
/// checks for the same author serialize here and cannot double-spend a
/// bucket. Buckets are created lazily, full, on an author's first message
/// and live for the process lifetime.
pub struct RateLimiter {
    refill_per_sec: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill_ms: i64,
}

impl RateLimiter {
    pub fn new(refill_per_sec: f64, burst: f64) -> Self {
        Self {
            refill_per_sec,
            burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject one post from `author_bucket` at `now_ms`. The caller
    /// supplies the clock so the admission pipeline and its tests share one
    /// notion of time.
    pub async fn try_acquire(&self, author_bucket: &str, now_ms: i64) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(author_bucket.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill_ms: now_ms,
        });

        let elapsed_secs = (now_ms - bucket.last_refill_ms).max(0) as f64 / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed_secs * self.refill_per_sec).min(self.burst);
        bucket.last_refill_ms = now_ms;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
