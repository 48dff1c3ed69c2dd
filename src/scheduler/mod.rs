//! Interval scheduler for periodic maintenance jobs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::sandbox::Manager;
use crate::spec::SpecProvider;

/// Runs jobs at fixed intervals until stopped.
#[derive(Debug)]
pub struct Scheduler {
    stop: CancellationToken,
    jobs: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            jobs: Vec::new(),
        }
    }

    /// Schedules `job` every `interval`. The first run happens one interval
    /// after scheduling. A zero interval leaves the job disabled.
    ///
    /// Returns false if the job was not scheduled.
    pub fn every<F, Fut>(&mut self, name: &'static str, interval: Duration, job: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            debug!(job = name, "job disabled");
            return false;
        }

        let stop = self.stop.clone();
        self.jobs.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!(job = name, "running scheduled job");
                        job().await;
                    }
                }
            }
        }));

        info!(job = name, interval_secs = interval.as_secs_f64(), "job scheduled");
        true
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Stops all jobs and waits for a running job to finish.
    pub async fn stop(self) {
        self.stop.cancel();
        for job in self.jobs {
            let _ = job.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Schedules image refresh and spec reload according to the configuration.
pub fn schedule_maintenance(
    scheduler: &mut Scheduler,
    config: &SchedulerConfig,
    manager: Manager,
    specs: Arc<dyn SpecProvider>,
) {
    scheduler.every(
        "update-images",
        Duration::from_secs(config.update_images_secs),
        move || {
            let manager = manager.clone();
            async move {
                let errors = manager.prepare_environments(true).await;
                if !errors.is_empty() {
                    error!(failed = errors.len(), "image update finished with errors");
                }
            }
        },
    );

    scheduler.every(
        "update-specs",
        Duration::from_secs(config.update_specs_secs),
        move || {
            let specs = specs.clone();
            async move {
                match specs.load().await {
                    Ok(()) => info!(specs = specs.registry().len(), "specs reloaded"),
                    Err(e) => error!(error = %e, "failed reloading specs"),
                }
            }
        },
    );
}
