use crate::clock::Clock;
use crate::runner::PipelineRunner;
use crate::schedule;
use crate::store::Store;
use crate::types::{PipelineError, PipelineRunResult, Result, ScheduleKind};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Timer-driven loop over the stored pipelines: every tick, list the active
/// candidates, ask the due evaluator about each, and run the due ones. Idle
/// between ticks; a pass that outlives the tick interval makes the next tick
/// skip instead of stacking.
pub struct Scheduler {
    store: Arc<dyn Store>,
    runner: Arc<PipelineRunner>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    lead_time: ChronoDuration,
    is_running: Arc<RwLock<bool>>,
    pass_lock: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<PipelineRunner>,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
        lead_time: ChronoDuration,
    ) -> Self {
        Self {
            store,
            runner,
            clock,
            tick_interval,
            lead_time,
            is_running: Arc::new(RwLock::new(false)),
            pass_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Spawn the background tick loop. Errors on a zero tick interval or if
    /// the loop is already running.
    pub async fn start(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(PipelineError::Config(
                "scheduler tick interval must be greater than zero".to_string(),
            ));
        }

        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Err(PipelineError::Config(
                "scheduler is already running".to_string(),
            ));
        }
        *is_running = true;
        drop(is_running);

        info!(
            "Starting scheduler with a tick interval of {:?}",
            self.tick_interval
        );

        let store = self.store.clone();
        let runner = self.runner.clone();
        let clock = self.clock.clone();
        let is_running = self.is_running.clone();
        let pass_lock = self.pass_lock.clone();
        let tick_interval = self.tick_interval;
        let lead_time = self.lead_time;

        tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; consume it so passes
            // start one full interval after startup.
            ticker.tick().await;

            while *is_running.read().await {
                ticker.tick().await;
                if !*is_running.read().await {
                    break;
                }

                let guard = match pass_lock.try_lock() {
                    Ok(guard) => guard,
                    Err(_) => {
                        warn!("Previous evaluation pass still running, skipping this tick");
                        continue;
                    }
                };

                match Self::evaluate_pass(&store, &runner, &clock, lead_time).await {
                    Ok(results) => {
                        if !results.is_empty() {
                            info!("Evaluation pass ran {} pipeline(s)", results.len());
                        }
                    }
                    Err(e) => error!("Evaluation pass failed: {}", e),
                }
                drop(guard);
            }

            info!("Scheduler loop stopped");
        });

        Ok(())
    }

    /// Signal the loop to stop. Takes effect at the next tick boundary.
    pub async fn stop(&self) {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            info!("Stopping scheduler");
        }
        *is_running = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// One on-demand evaluation pass, the same work a tick does.
    pub async fn run_due_pipelines(&self) -> Result<Vec<PipelineRunResult>> {
        Self::evaluate_pass(&self.store, &self.runner, &self.clock, self.lead_time).await
    }

    /// List candidates, evaluate each at the current instant, run the due
    /// ones. One pipeline failing is recorded in its result entry and never
    /// stops the rest of the pass.
    async fn evaluate_pass(
        store: &Arc<dyn Store>,
        runner: &Arc<PipelineRunner>,
        clock: &Arc<dyn Clock>,
        lead_time: ChronoDuration,
    ) -> Result<Vec<PipelineRunResult>> {
        let candidates = store.list_due_candidates().await?;
        debug!("Evaluating {} candidate pipeline(s)", candidates.len());

        let mut results = Vec::new();
        for config in candidates {
            if config.schedule == ScheduleKind::Unknown {
                warn!(
                    "Pipeline {} has an unrecognized schedule kind, skipping",
                    config.pipeline_id
                );
                continue;
            }

            let now = clock.now();
            if !schedule::pipeline_is_due(&config, now, lead_time) {
                continue;
            }

            info!("Pipeline {} is due, running it", config.pipeline_id);
            match runner.execute(&config).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Could not run pipeline {}: {}", config.pipeline_id, e);
                    results.push(PipelineRunResult::failed(&config.pipeline_id, &e));
                }
            }
        }

        Ok(results)
    }
}
