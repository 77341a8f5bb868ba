//! Interval job runner.
//!
//! Each job identity owns one ticker task. On every tick the ticker spawns
//! the job body as its own task and immediately goes back to waiting, so a
//! slow or failing body never delays the next firing of that job or of any
//! other. Overlapping executions of the same job are possible when a body
//! overruns its interval.
//!
//! The first firing happens one full interval after the job is added.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Default)]
pub struct JobRunner {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl JobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `job` every `every`, replacing any job with the same id.
    ///
    /// Replacing cancels the old job's future firings; a body of the old job
    /// that is already running is left to finish. Must be called from within
    /// a Tokio runtime.
    pub fn add_interval_job<F, Fut>(&self, id: &str, every: Duration, job: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if every.is_zero() {
            bail!("job '{}': interval must be > 0", id);
        }

        // Held until the ticker is registered so `shutdown` cannot drain in between.
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if self.stopped.load(Ordering::SeqCst) {
            bail!("job runner is shut down; cannot add job '{}'", id);
        }

        let job_id = id.to_string();
        let ticker = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + every, every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                debug!(job = %job_id, "firing");
                let body = job();
                let job_id = job_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = body.await {
                        error!(job = %job_id, error = %format!("{:#}", e), "job failed");
                    }
                });
            }
        });

        if let Some(previous) = jobs.insert(id.to_string(), ticker) {
            previous.abort();
            info!(job = id, "replaced existing job");
        } else {
            info!(job = id, every_secs = every.as_secs_f64(), "scheduled job");
        }
        Ok(())
    }

    /// Cancel future firings of one job. Returns whether it existed.
    pub fn remove_job(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Ids of scheduled jobs, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop all future firings. In-flight job bodies are not awaited.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
        info!("scheduler stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        let jobs = self.jobs.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
    }
}
