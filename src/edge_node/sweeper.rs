//! Background expiry sweeps shared by every TTL store
//!
//! Stores are built in two phases: construct the store, then hand an `Arc` of it to
//! [`SweepTask::start`]. The task owns its tokio `JoinHandle` and is aborted on
//! [`SweepTask::stop`] or drop, so no timer outlives its owner.

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::clock::now_millis;

/// A store whose expired entries can be pruned
pub trait Sweepable: Send + Sync + 'static {
    /// Name used in log lines
    fn store_name(&self) -> &'static str;

    /// Remove every entry expired at `now_ms`, returning how many were removed
    fn sweep_expired_at(&self, now_ms: u64) -> usize;

    /// Remove every entry expired now
    fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(now_millis())
    }
}

/// Periodic sweep task bound to a single store
pub struct SweepTask {
    store_name: &'static str,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl SweepTask {
    /// Spawn the sweep loop. Must be called from within a tokio runtime.
    ///
    /// The first sweep runs one full `interval` after start.
    pub fn start<S: Sweepable>(store: Arc<S>, interval: Duration) -> Self {
        let store_name = store.store_name();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.sweep_expired();
                if removed > 0 {
                    debug!("Sweep of {} removed {} expired entries", store.store_name(), removed);
                }
            }
        });

        info!(
            "Started expiry sweep for {} every {}s",
            store_name,
            interval.as_secs()
        );

        Self {
            store_name,
            interval,
            handle: Some(handle),
        }
    }

    pub fn store_name(&self) -> &'static str {
        self.store_name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the sweep loop
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Stopped expiry sweep for {}", self.store_name);
        }
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// The sweep tasks of one process, started together and cancelled as a unit
#[derive(Default)]
pub struct SweepGroup {
    tasks: Vec<SweepTask>,
}

impl SweepGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<S: Sweepable>(&mut self, store: Arc<S>, interval: Duration) {
        self.tasks.push(SweepTask::start(store, interval));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_running()).count()
    }

    pub fn stop_all(&mut self) {
        for task in &mut self.tasks {
            task.stop();
        }
        self.tasks.clear();
    }
}
