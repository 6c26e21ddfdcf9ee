//! Lock discovery and one polling task per lock.

use crate::api::error::ApiError;
use crate::api::types::SmartlockSummary;
use crate::api::LockApi;
use crate::config::Config;
use crate::core::poller::{LockPoller, PollError};
use crate::registry::SharedRegistry;
use crate::sink::EventSink;
use crate::stats::SharedBridgeStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// List the account's locks, keeping only the configured ones.
pub async fn discover_locks<A: LockApi>(
    api: &A,
    config: &Config,
) -> Result<Vec<SmartlockSummary>, ApiError> {
    let locks: Vec<SmartlockSummary> = api
        .list_locks()
        .await?
        .into_iter()
        .filter(|lock| config.polls_lock(lock.smartlock_id))
        .collect();

    if locks.is_empty() {
        return Err(ApiError::NoLocksFound);
    }

    for lock in &locks {
        tracing::info!("Found smart lock {} ({})", lock.name, lock.smartlock_id);
    }
    Ok(locks)
}

/// Everything the poller tasks share.
pub struct PollerContext<A, S: ?Sized> {
    pub api: Arc<A>,
    pub sink: Arc<S>,
    pub registry: SharedRegistry,
    pub stats: SharedBridgeStats,
    /// Flips to `true` on shutdown
    pub shutdown: watch::Receiver<bool>,
}

impl<A, S: ?Sized> Clone for PollerContext<A, S> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            sink: Arc::clone(&self.sink),
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Spawn one polling task per lock.
///
/// Ticks of one lock never overlap, each tick is bounded by the request
/// timeout and a task only stops between ticks.
pub fn spawn_pollers<A, S>(
    locks: &[SmartlockSummary],
    config: &Config,
    context: PollerContext<A, S>,
) -> Vec<JoinHandle<()>>
where
    A: LockApi + 'static,
    S: EventSink + ?Sized + 'static,
{
    locks
        .iter()
        .map(|lock| {
            let poller = LockPoller::new(lock.smartlock_id, lock.name.clone(), config);
            tokio::spawn(run_poller(
                poller,
                config.scan_interval,
                config.request_timeout,
                context.clone(),
            ))
        })
        .collect()
}

async fn run_poller<A, S>(
    mut poller: LockPoller,
    scan_interval: Duration,
    tick_timeout: Duration,
    mut context: PollerContext<A, S>,
) where
    A: LockApi + 'static,
    S: EventSink + ?Sized + 'static,
{
    let lock_id = poller.lock_id();
    context.registry.update_state(poller.state().clone()).await;
    tracing::info!(
        "Polling lock {} every {}s",
        lock_id,
        scan_interval.as_secs_f64()
    );

    let mut ticker = tokio::time::interval(scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = context.shutdown.changed() => {
                if changed.is_err() || *context.shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if *context.shutdown.borrow() {
            break;
        }

        let outcome =
            tokio::time::timeout(tick_timeout, poller.tick(&*context.api, &*context.sink)).await;

        match outcome {
            Ok(Ok(report)) => {
                context.stats.record_tick(&report);
                context.registry.update_state(report.state).await;
                context.registry.record_events(&report.events).await;
            }
            Ok(Err(PollError::Api(e))) => {
                context.stats.record_failure();
                match e {
                    ApiError::Authentication(_) | ApiError::MalformedResponse(_) => {
                        tracing::error!("Lock {}: poll failed: {}", lock_id, e)
                    }
                    _ => tracing::warn!("Lock {}: poll failed: {}", lock_id, e),
                }
                context.registry.update_state(poller.state().clone()).await;
            }
            Ok(Err(PollError::Sink(e))) => {
                context.stats.record_failure();
                tracing::error!("Lock {}: stopping, {}", lock_id, e);
                break;
            }
            Err(_) => {
                context.stats.record_failure();
                tracing::warn!(
                    "Lock {}: poll timed out after {}s",
                    lock_id,
                    tick_timeout.as_secs_f64()
                );
                poller.mark_unavailable();
                context.registry.update_state(poller.state().clone()).await;
            }
        }
    }

    tracing::info!("Stopped polling lock {}", lock_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::ActivityLogEntry;
    use crate::api::MemoryLockApi;
    use crate::registry::LockRegistry;
    use crate::sink::ChannelSink;
    use crate::stats::BridgeStats;
    use chrono::Utc;

    fn config() -> Config {
        Config {
            scan_interval: Duration::from_millis(20),
            request_timeout: Duration::from_secs(1),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_discover_filters_configured_locks() {
        let api = MemoryLockApi::new()
            .with_lock(1, "Front Door")
            .with_lock(2, "Back Door");

        let all = discover_locks(&api, &config()).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_back = Config {
            lock_ids: vec![2],
            ..config()
        };
        let locks = discover_locks(&api, &only_back).await.unwrap();
        assert_eq!(locks[0].smartlock_id, 2);

        let none = Config {
            lock_ids: vec![9],
            ..config()
        };
        assert_eq!(
            discover_locks(&api, &none).await,
            Err(ApiError::NoLocksFound)
        );
    }

    #[tokio::test]
    async fn test_pollers_emit_and_stop_on_shutdown() {
        let api = Arc::new(MemoryLockApi::new().with_lock(1, "Front Door"));
        let (sink, receiver) = ChannelSink::unbounded();
        let registry = LockRegistry::shared(10);
        let stats = Arc::new(BridgeStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let locks = discover_locks(&*api, &config()).await.unwrap();
        let handles = spawn_pollers(
            &locks,
            &config(),
            PollerContext {
                api: Arc::clone(&api),
                sink: Arc::new(sink),
                registry: Arc::clone(&registry),
                stats: Arc::clone(&stats),
                shutdown: shutdown_rx,
            },
        );

        // Wait for the priming tick before adding an entry.
        for _ in 0..100 {
            if stats.snapshot().successful_ticks > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        api.push_log_entry(ActivityLogEntry {
            id: "new".to_string(),
            smartlock_id: 1,
            action: 2,
            trigger: 0,
            name: "Alice".to_string(),
            date: Utc::now(),
            source: 0,
            auth_id: String::new(),
            state: 0,
        });

        let event = tokio::task::spawn_blocking(move || {
            receiver.recv_timeout(Duration::from_secs(2))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(event.log_entry_id, "new");

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .unwrap()
                .unwrap();
        }

        assert!(registry.state(1).await.unwrap().available);
        assert_eq!(stats.snapshot().emitted_events, 1);
    }

    #[tokio::test]
    async fn test_timed_out_tick_is_retried() {
        let api = Arc::new(MemoryLockApi::new().with_lock(1, "Front Door"));
        let (sink, receiver) = ChannelSink::unbounded();
        let registry = LockRegistry::shared(10);
        let stats = Arc::new(BridgeStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = Config {
            scan_interval: Duration::from_millis(300),
            request_timeout: Duration::from_millis(100),
            ..config()
        };

        let locks = discover_locks(&*api, &config).await.unwrap();
        let handles = spawn_pollers(
            &locks,
            &config,
            PollerContext {
                api: Arc::clone(&api),
                sink: Arc::new(sink),
                registry: Arc::clone(&registry),
                stats: Arc::clone(&stats),
                shutdown: shutdown_rx,
            },
        );

        for _ in 0..200 {
            if registry.state(1).await.is_some_and(|s| s.available) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The next fetch outlives the tick timeout, the one after succeeds.
        api.delay_next_log(Duration::from_secs(1));
        api.push_log_entry(ActivityLogEntry {
            id: "late".to_string(),
            smartlock_id: 1,
            action: 1,
            trigger: 255,
            name: "Alice".to_string(),
            date: Utc::now(),
            source: 1,
            auth_id: String::new(),
            state: 0,
        });

        let mut saw_unavailable = false;
        for _ in 0..200 {
            if registry.state(1).await.is_some_and(|s| !s.available) {
                saw_unavailable = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(saw_unavailable);
        assert_eq!(stats.snapshot().failed_ticks, 1);

        let event = tokio::task::spawn_blocking(move || {
            receiver.recv_timeout(Duration::from_secs(2))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(event.log_entry_id, "late");

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(stats.snapshot().emitted_events, 1);
        assert!(registry.state(1).await.unwrap().available);
    }
}
