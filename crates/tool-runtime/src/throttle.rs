use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum gap between consecutive external tool calls.
///
/// Shared by every adapter of a run. The timestamp is recorded when a call
/// finishes, whether it succeeded or not.
pub struct CallThrottle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl CallThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Sleep for whatever remains of the minimum interval.
    pub async fn wait(&self) {
        let remaining = {
            let last = self.last_call.lock().await;
            match *last {
                Some(at) => self.min_interval.saturating_sub(at.elapsed()),
                None => Duration::ZERO,
            }
        };
        if !remaining.is_zero() {
            debug!(
                delay_ms = remaining.as_millis() as u64,
                min_ms = self.min_interval.as_millis() as u64,
                "Delaying tool call"
            );
            tokio::time::sleep(remaining).await;
        }
    }

    pub async fn record(&self) {
        *self.last_call.lock().await = Some(Instant::now());
    }
}
