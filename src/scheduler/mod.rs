//! Scheduled job runner
//!
//! Runs named jobs on a fixed period aligned to the wall clock, so a 30 second
//! job fires at :00 and :30 of every minute regardless of when it was added.

mod jobs;

pub use jobs::*;

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Delay from `now` until the next multiple of `period` since the Unix epoch
///
/// Returns zero when `now` falls exactly on a tick.
pub fn delay_until_next_tick(now: SystemTime, period: Duration) -> Duration {
    let period_nanos = period.as_nanos();
    if period_nanos == 0 {
        return Duration::ZERO;
    }

    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    let remainder = since_epoch.as_nanos() % period_nanos;
    if remainder == 0 {
        return Duration::ZERO;
    }

    Duration::from_nanos(u64::try_from(period_nanos - remainder).unwrap_or(u64::MAX))
}

/// Owns the tasks of all scheduled jobs
pub struct Scheduler {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler with no jobs
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule `job` to run every `period`
    ///
    /// A job already registered under `id` is stopped and replaced.
    pub async fn add_job<F, Fut>(&self, id: impl Into<String>, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = id.into();
        let handle = tokio::spawn(run_job(id.clone(), period, job));

        let previous = self.jobs.lock().await.insert(id.clone(), handle);
        if let Some(previous) = previous {
            previous.abort();
            info!("Replaced scheduled job {}", id);
        } else {
            info!("Scheduled job {} every {:?}", id, period);
        }
    }

    /// Ids of the scheduled jobs, sorted
    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every job without waiting for a running one to finish
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (id, handle) in jobs.drain() {
            handle.abort();
            debug!("Stopped scheduled job {}", id);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_job<F, Fut>(id: String, period: Duration, job: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if period.is_zero() {
        warn!("Job {} has a zero period, not running it", id);
        return;
    }

    let start = Instant::now() + delay_until_next_tick(SystemTime::now(), period);
    let mut ticker = time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        debug!("Running job {}", id);
        job().await;
    }
}
