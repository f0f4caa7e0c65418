//! Scheduler for concurrent shadow-run execution.
//!
//! The scheduler is the single scheduling authority: it owns the DAG, all
//! status transitions, and all hydration application. Workers only execute
//! shadow-runs against isolated workspaces and report back over a channel,
//! so host mutations are serialized by construction. A fired kill switch
//! stops dispatch immediately and forbids hydration for the rest of the
//! run; a run always terminates with enough state to build a report.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_PROVISION_RETRIES;
use crate::core::{TaskDAG, TaskId, TaskOutcome, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::correction::{CorrectionLoop, CorrectionOutcome};
use crate::orchestration::pool::{WorkerId, WorkerPool};
use crate::report::{Incident, LogNotifier, Notifier};
use crate::sandbox::{HydrationRecord, SandboxRunner, StagedRun, Verdict};
use crate::{shlog, shlog_debug};

/// Events emitted by the scheduler for task lifecycle changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task was claimed by a worker and its shadow-run started.
    TaskStarted {
        /// The task that started.
        task_id: TaskId,
        /// The worker executing it.
        worker_id: WorkerId,
    },
    /// A task's shadow-run verified and its changes were hydrated.
    TaskSucceeded {
        /// The task that succeeded.
        task_id: TaskId,
    },
    /// A rejected task was re-queued for another attempt.
    TaskRequeued {
        /// The task that was re-queued.
        task_id: TaskId,
        /// Attempt number just completed.
        attempt: u32,
    },
    /// A task was abandoned.
    TaskAbandoned {
        /// The task that was abandoned.
        task_id: TaskId,
        /// Why it was abandoned.
        reason: String,
    },
    /// The run reached a terminal state for every task.
    RunComplete,
}

/// What a worker sends back after its shadow-run finishes.
struct WorkerReport {
    worker_id: WorkerId,
    task_id: TaskId,
    outcome: Result<StagedRun>,
}

/// Drives a DAG of tasks through shadow-runs to a fully terminal state.
pub struct Scheduler {
    /// The task dependency graph; owned exclusively by the scheduler.
    dag: TaskDAG,
    /// Pool of workers for shadow-run execution.
    pool: WorkerPool,
    /// Sandbox runner cloned into each worker.
    runner: SandboxRunner,
    /// Bounded retry driver for rejections.
    correction: CorrectionLoop,
    /// Kill switch; once cancelled, no dispatch and no hydration.
    kill_switch: CancellationToken,
    /// Sink for incidents.
    notifier: Arc<dyn Notifier>,
    /// Channel for emitting scheduler events.
    event_tx: mpsc::Sender<SchedulerEvent>,
    /// Retry bound for provisioning failures.
    provision_retries: u32,
    /// Per-task provisioning failure counts.
    provision_attempts: HashMap<TaskId, u32>,
    /// Next hydration application sequence number.
    hydration_seq: u64,
    /// Hydrations applied so far, in application order.
    hydrations: Vec<HydrationRecord>,
    /// Incidents raised so far.
    incidents: Vec<Incident>,
}

impl Scheduler {
    /// Create a new scheduler over a decomposed DAG.
    pub fn new(
        dag: TaskDAG,
        pool: WorkerPool,
        runner: SandboxRunner,
        correction: CorrectionLoop,
        event_tx: mpsc::Sender<SchedulerEvent>,
    ) -> Self {
        Self {
            dag,
            pool,
            runner,
            correction,
            kill_switch: CancellationToken::new(),
            notifier: Arc::new(LogNotifier),
            event_tx,
            provision_retries: DEFAULT_PROVISION_RETRIES,
            provision_attempts: HashMap::new(),
            hydration_seq: 0,
            hydrations: Vec::new(),
            incidents: Vec::new(),
        }
    }

    /// Use an externally-held kill switch token.
    pub fn with_kill_switch(mut self, token: CancellationToken) -> Self {
        self.kill_switch = token;
        self
    }

    /// Replace the incident sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Override the provisioning retry bound.
    pub fn with_provision_retries(mut self, retries: u32) -> Self {
        self.provision_retries = retries;
        self
    }

    /// The DAG in its current state.
    pub fn dag(&self) -> &TaskDAG {
        &self.dag
    }

    /// Consume the scheduler, yielding the DAG, hydrations, and incidents.
    pub fn into_parts(self) -> (TaskDAG, Vec<HydrationRecord>, Vec<Incident>) {
        (self.dag, self.hydrations, self.incidents)
    }

    /// Run the scheduling loop until every task is terminal.
    ///
    /// The loop dispatches eligible tasks up to free capacity in
    /// declaration order, then waits for the next worker report. Verified
    /// runs hydrate serially here, in completion order; rejected runs go
    /// through the correction loop. The loop always terminates: abandonment
    /// cascades, the stall guard, and the kill switch each close off the
    /// remaining non-terminal tasks.
    pub async fn run(&mut self) -> Result<()> {
        let (report_tx, mut report_rx) = mpsc::channel::<WorkerReport>(64);

        loop {
            if self.kill_switch.is_cancelled() {
                self.halt(&mut report_rx).await?;
                break;
            }
            if self.dag.is_complete() {
                break;
            }

            let dispatched = self.dispatch(&report_tx).await?;

            if self.pool.active_count() == 0 && dispatched == 0 {
                if self.dag.is_complete() {
                    break;
                }
                // Stall guard: nothing running and nothing eligible
                shlog!("Scheduler stalled; abandoning blocked remainder");
                self.abandon_remaining("blocked: dependencies cannot be satisfied")
                    .await?;
                break;
            }

            let kill_switch = self.kill_switch.clone();
            let report = tokio::select! {
                _ = kill_switch.cancelled() => continue,
                report = report_rx.recv() => report,
            };
            if let Some(report) = report {
                self.handle_report(report).await?;
            }
        }

        let _ = self.event_tx.send(SchedulerEvent::RunComplete).await;
        Ok(())
    }

    /// Dispatch eligible tasks up to free capacity, in declaration order.
    async fn dispatch(&mut self, report_tx: &mpsc::Sender<WorkerReport>) -> Result<usize> {
        let mut dispatched = 0;

        for task_id in self.dag.ready_set() {
            if !self.pool.has_capacity() {
                break;
            }

            // Fresh tasks are Pending; re-queued tasks are already Ready
            if matches!(
                self.dag.get_task(&task_id).map(|t| &t.status),
                Some(TaskStatus::Pending)
            ) {
                self.dag.mark(&task_id, TaskStatus::Ready)?;
            }
            self.dag.mark(&task_id, TaskStatus::Running)?;

            let worker_id = self.pool.claim(&task_id).await?;
            let task = self
                .dag
                .get_task(&task_id)
                .ok_or_else(|| Error::Validation(format!("Task {} not found in DAG", task_id)))?
                .clone();

            shlog_debug!(
                "Dispatching task {} (attempt {}) to worker {}",
                task.name,
                task.attempts,
                worker_id
            );

            let runner = self.runner.clone();
            let tx = report_tx.clone();
            tokio::spawn(async move {
                let outcome = runner.shadow_run(&task).await;
                let _ = tx
                    .send(WorkerReport {
                        worker_id,
                        task_id,
                        outcome,
                    })
                    .await;
            });

            let _ = self
                .event_tx
                .send(SchedulerEvent::TaskStarted { task_id, worker_id })
                .await;
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Apply one worker report to the DAG.
    async fn handle_report(&mut self, report: WorkerReport) -> Result<()> {
        self.pool.release(&report.worker_id).await?;

        // Results arriving after the kill switch are discarded unhydrated
        if self.kill_switch.is_cancelled() {
            if let Ok(mut staged) = report.outcome {
                staged.discard().await?;
            }
            let cascade = self
                .dag
                .abandon_with_dependents(&report.task_id, "kill switch engaged")?;
            self.emit_abandoned(&cascade).await;
            return Ok(());
        }

        match report.outcome {
            Ok(staged) => self.handle_staged(report.task_id, staged).await,
            Err(Error::SandboxProvision(msg)) => {
                self.handle_provision_failure(report.task_id, &msg).await
            }
            Err(e) => {
                // Execution-layer errors consume the retry budget like
                // rejections
                let reason = format!("execution error: {}", e);
                self.apply_correction(report.task_id, &reason, "").await
            }
        }
    }

    /// Handle a completed shadow-run: hydrate or correct.
    async fn handle_staged(&mut self, task_id: TaskId, mut staged: StagedRun) -> Result<()> {
        let changed: Vec<PathBuf> = staged
            .result
            .changes
            .iter()
            .map(|c| c.path.clone())
            .collect();
        if let Some(task) = self.dag.get_task_mut(&task_id) {
            task.record_outcome(TaskOutcome {
                exit_code: staged.result.exit_code,
                output: staged.result.output.clone(),
                changed_files: changed,
            });
        }
        self.provision_attempts.remove(&task_id);

        match staged.result.verdict.clone() {
            Verdict::Verified => {
                let seq = self.hydration_seq;
                match staged.hydrate(seq).await {
                    Ok(record) => {
                        self.hydration_seq += 1;
                        self.hydrations.push(record);
                        self.dag.mark(&task_id, TaskStatus::Succeeded)?;
                        let _ = self
                            .event_tx
                            .send(SchedulerEvent::TaskSucceeded { task_id })
                            .await;
                        Ok(())
                    }
                    Err(e) => {
                        // The host was rolled back; the task cannot be
                        // trusted to re-run cleanly, so it is abandoned
                        let reason = format!("hydration failed: {}", e);
                        self.dag.mark(
                            &task_id,
                            TaskStatus::Failed {
                                error: reason.clone(),
                            },
                        )?;
                        self.raise_incident(&task_id, &reason);
                        let cascade = self.dag.abandon_with_dependents(&task_id, &reason)?;
                        self.emit_abandoned(&cascade).await;
                        Ok(())
                    }
                }
            }
            Verdict::Rejected { reason } => {
                let output = staged.result.output.clone();
                self.apply_correction(task_id, &reason, &output).await
            }
        }
    }

    /// Route a rejection through the correction loop.
    async fn apply_correction(
        &mut self,
        task_id: TaskId,
        reason: &str,
        output: &str,
    ) -> Result<()> {
        match self
            .correction
            .handle_rejection(&mut self.dag, &task_id, reason, output)
            .await?
        {
            CorrectionOutcome::Requeued { attempt, .. } => {
                let _ = self
                    .event_tx
                    .send(SchedulerEvent::TaskRequeued { task_id, attempt })
                    .await;
            }
            CorrectionOutcome::Abandoned { reason, cascade } => {
                self.raise_incident(&task_id, &reason);
                self.emit_abandoned(&cascade).await;
            }
        }
        Ok(())
    }

    /// Handle a provisioning failure with bounded backoff retries.
    async fn handle_provision_failure(&mut self, task_id: TaskId, msg: &str) -> Result<()> {
        let attempts = self.provision_attempts.entry(task_id).or_insert(0);
        *attempts += 1;
        let n = *attempts;

        if n <= self.provision_retries {
            // Provisioning failures do not consume the shadow-run retry
            // budget; the attempt never executed
            if let Some(task) = self.dag.get_task_mut(&task_id) {
                task.attempts = task.attempts.saturating_sub(1);
            }
            self.dag.mark(
                &task_id,
                TaskStatus::Failed {
                    error: format!("provisioning: {}", msg),
                },
            )?;
            self.dag.mark(&task_id, TaskStatus::Ready)?;

            let backoff = Duration::from_millis(100 * 2u64.pow(n - 1));
            shlog!(
                "Provisioning failed for {} ({}); retry {}/{} after {:?}",
                task_id.short(),
                msg,
                n,
                self.provision_retries,
                backoff
            );
            tokio::time::sleep(backoff).await;
            let _ = self
                .event_tx
                .send(SchedulerEvent::TaskRequeued {
                    task_id,
                    attempt: n,
                })
                .await;
            Ok(())
        } else {
            let reason = format!(
                "sandbox provisioning failed after {} attempt(s): {}",
                n, msg
            );
            self.dag.mark(
                &task_id,
                TaskStatus::Failed {
                    error: reason.clone(),
                },
            )?;
            self.raise_incident(&task_id, &reason);
            let cascade = self.dag.abandon_with_dependents(&task_id, &reason)?;
            self.emit_abandoned(&cascade).await;
            Ok(())
        }
    }

    /// Drain in-flight workers after the kill switch fired, discarding
    /// every staged result, then abandon the remainder.
    async fn halt(&mut self, report_rx: &mut mpsc::Receiver<WorkerReport>) -> Result<()> {
        shlog!("Kill switch engaged; draining {} worker(s)", self.pool.active_count());
        while self.pool.active_count() > 0 {
            match report_rx.recv().await {
                Some(mut report) => {
                    if let Ok(staged) = &mut report.outcome {
                        staged.discard().await?;
                    }
                    self.pool.release(&report.worker_id).await?;
                    let cascade = self
                        .dag
                        .abandon_with_dependents(&report.task_id, "kill switch engaged")?;
                    self.emit_abandoned(&cascade).await;
                }
                None => break,
            }
        }
        self.abandon_remaining("kill switch engaged").await
    }

    /// Abandon every non-terminal task with the given reason.
    async fn abandon_remaining(&mut self, reason: &str) -> Result<()> {
        let unfinished: Vec<TaskId> = self
            .dag
            .all_tasks()
            .iter()
            .filter(|t| !t.is_finished())
            .map(|t| t.id)
            .collect();
        for task_id in unfinished {
            // The cascade may already have reached this task
            if self.dag.get_task(&task_id).map(|t| t.is_finished()) == Some(true) {
                continue;
            }
            self.raise_incident(&task_id, reason);
            let cascade = self.dag.abandon_with_dependents(&task_id, reason)?;
            self.emit_abandoned(&cascade).await;
        }
        Ok(())
    }

    /// Record an incident for a task and notify the sink.
    fn raise_incident(&mut self, task_id: &TaskId, reason: &str) {
        let (name, output) = self
            .dag
            .get_task(task_id)
            .map(|t| {
                (
                    t.name.clone(),
                    t.outcome.as_ref().map(|o| o.output.clone()).unwrap_or_default(),
                )
            })
            .unwrap_or_else(|| (task_id.to_string(), String::new()));
        let incident = Incident::new(*task_id, &name, reason, &output);
        self.notifier.notify(&incident);
        self.incidents.push(incident);
    }

    /// Emit TaskAbandoned events for a cascade.
    async fn emit_abandoned(&self, cascade: &[TaskId]) {
        for task_id in cascade {
            let reason = match self.dag.get_task(task_id).map(|t| &t.status) {
                Some(TaskStatus::Abandoned { reason }) => reason.clone(),
                _ => continue,
            };
            let _ = self
                .event_tx
                .send(SchedulerEvent::TaskAbandoned {
                    task_id: *task_id,
                    reason,
                })
                .await;
        }
    }
}
