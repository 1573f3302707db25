//! Periodic optimizer task
//!
//! Runs [`CacheEngine::optimize`] every `optimizeInterval` on the ambient
//! tokio runtime. The task only holds a `Weak` engine reference, so it never
//! keeps the engine alive; it ends when cancelled or when the engine is gone.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::engine::CacheEngine;

/// Handle to a running optimizer loop; cancelled on drop
#[derive(Debug)]
pub struct OptimizerTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl OptimizerTask {
    /// Start the loop, or `None` outside a tokio runtime
    pub fn start(engine: Weak<CacheEngine>, period: Duration) -> Option<Self> {
        let runtime = Handle::try_current().ok()?;
        let token = CancellationToken::new();
        let handle = runtime.spawn(run(engine, period, token.clone()));
        info!(period_ms = period.as_millis() as u64, "Optimizer started");
        Some(Self { token, handle })
    }

    /// Stop the loop; an in-progress sweep finishes first
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for OptimizerTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[instrument(skip_all, fields(period_ms = period.as_millis() as u64))]
async fn run(engine: Weak<CacheEngine>, period: Duration, token: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Optimizer cancelled");
                break;
            }
            _ = ticker.tick() => {
                let Some(engine) = engine.upgrade() else {
                    debug!("Engine dropped, optimizer exiting");
                    break;
                };
                let report = engine.optimize().await;
                debug!(
                    expired = report.expired_removed,
                    least_used = report.least_used_removed,
                    "Scheduled optimize finished"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::config::CacheConfig;
    use crate::cache::entry::SetOptions;
    use crate::cache::tier::TierSet;
    use std::sync::Arc;

    fn engine(clock: Arc<ManualClock>) -> Arc<CacheEngine> {
        let config = CacheConfig {
            enable_metrics: false,
            ..Default::default()
        };
        CacheEngine::with_parts(config, TierSet::in_memory(), clock)
    }

    #[test]
    fn test_start_requires_runtime() {
        assert!(OptimizerTask::start(Weak::new(), Duration::from_secs(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_after_one_period() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = engine(clock.clone());
        assert!(engine.set("short", &1, SetOptions::ttl(10)).await);
        clock.advance(20);

        let task = OptimizerTask::start(Arc::downgrade(&engine), Duration::from_secs(60)).unwrap();

        // Nothing happens before the first full period
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(engine.tier(crate::cache::TierKind::Memory).get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(engine.tier(crate::cache::TierKind::Memory).get("short").await.unwrap().is_none());
        assert!(task.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_the_loop() {
        let engine = engine(Arc::new(ManualClock::new(0)));
        let task = OptimizerTask::start(Arc::downgrade(&engine), Duration::from_secs(1)).unwrap();
        task.stop();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!task.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_engine_dropped() {
        let engine = engine(Arc::new(ManualClock::new(0)));
        let task = OptimizerTask::start(Arc::downgrade(&engine), Duration::from_secs(1)).unwrap();
        drop(engine);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!task.is_running());
    }
}
