//! Scheduler
//!
//! Named, interval-triggered recurring measurement jobs. The scheduler is
//! an explicit service: constructed once at process start and passed by
//! handle; jobs live only for the process lifetime.
//!
//! Starting a job under an existing name replaces the prior job, with the
//! old timer cancelled before the new one is armed, so a name never has
//! two concurrent timers. Cancellation is cooperative: a stopped job's
//! in-flight probes run to their own timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::orchestrator::{ProbeOrchestrator, RunMode, Target};

pub const MIN_INTERVAL_SECS: u64 = 10;
pub const MAX_INTERVAL_SECS: u64 = 86_400;

struct JobHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Signal the job loop to stop. The task itself is left to drain its
    /// in-flight work rather than being aborted.
    fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

pub struct JobScheduler {
    orchestrator: Arc<ProbeOrchestrator>,
    jobs: Mutex<HashMap<String, JobHandle>>,
}

impl JobScheduler {
    pub fn new(orchestrator: Arc<ProbeOrchestrator>) -> Self {
        Self {
            orchestrator,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Install a recurring job running one cycle over `targets` every
    /// `interval_secs`. Replaces any existing job of the same name.
    pub fn start_job(&self, name: &str, targets: Vec<Target>, interval_secs: u64) -> Result<()> {
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval_secs) {
            bail!(
                "Interval {}s outside allowed range [{}, {}]",
                interval_secs,
                MIN_INTERVAL_SECS,
                MAX_INTERVAL_SECS
            );
        }
        if targets.is_empty() {
            bail!("Job '{}' has no targets", name);
        }

        let interval = Duration::from_secs(interval_secs);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let orchestrator = self.orchestrator.clone();
        let job_name = name.to_string();

        let mut jobs = self.jobs.lock();
        // Replace-on-same-name: the old timer is cancelled before the new
        // task is spawned, under the registry lock.
        if let Some(old) = jobs.remove(name) {
            old.cancel();
            info!("Replacing scheduled job '{}'", name);
        }

        let task = tokio::spawn(async move {
            info!(
                "Job '{}' started: {} targets every {}s",
                job_name,
                targets.len(),
                interval.as_secs()
            );
            if let Err(e) = orchestrator
                .run(&targets, RunMode::Continuous, interval, cancel_rx)
                .await
            {
                warn!("Job '{}' terminated with error: {:#}", job_name, e);
            }
            info!("Job '{}' exited", job_name);
        });

        jobs.insert(name.to_string(), JobHandle { cancel_tx, task });
        Ok(())
    }

    /// Remove and cancel a job. Unknown names are a non-fatal error.
    pub fn stop_job(&self, name: &str) -> Result<()> {
        match self.jobs.lock().remove(name) {
            Some(job) => {
                job.cancel();
                info!("Stopped job '{}'", name);
                Ok(())
            }
            None => bail!("No scheduled job named '{}'", name),
        }
    }

    /// Names of currently registered jobs.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel every job and wait for the loops to wind down. Part of
    /// explicit service shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, JobHandle)> = self.jobs.lock().drain().collect();
        for (name, job) in drained {
            job.cancel();
            if let Err(e) = job.task.await {
                warn!("Job '{}' did not shut down cleanly: {}", name, e);
            }
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        // Last-resort signal for schedulers dropped without shutdown().
        for job in self.jobs.lock().values() {
            job.cancel();
        }
    }
}
