use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::result::RunStatus;
use super::run::JobRun;
use crate::adapters::{AdapterContext, AdapterRegistry, merge_params};
use crate::error::{AdapterError, TransitionError};
use crate::tx_manager::TxManager;

/// External events that can move a suspended run forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    NewBlock(u64),
    Reconnected,
    Timer(DateTime<Utc>),
}

impl Trigger {
    /// Whether this trigger resumes `run` in its persisted state.
    pub fn resumes(&self, run: &JobRun) -> bool {
        match (self, run.status) {
            (Trigger::Start, RunStatus::Unstarted | RunStatus::InProgress) => true,
            (
                Trigger::NewBlock(_),
                RunStatus::PendingConfirmations | RunStatus::PendingConnection,
            ) => true,
            (Trigger::Reconnected, RunStatus::PendingConnection) => true,
            (Trigger::Timer(now), RunStatus::PendingSleep) => {
                run.resume_at().is_none_or(|at| at <= *now)
            }
            _ => false,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Trigger::Timer(at) => *at,
            _ => Utc::now(),
        }
    }
}

/// Drives a `JobRun` through its task pipeline.
pub struct StateMachine;

impl StateMachine {
    pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
        use RunStatus::*;
        match from {
            Completed | Errored => false,
            Unstarted => matches!(to, InProgress | Errored),
            InProgress => !matches!(to, Unstarted | InProgress),
            PendingConfirmations | PendingConnection | PendingSleep => {
                matches!(to, InProgress | Errored)
            }
        }
    }

    /// Apply a status change to the run, rejecting anything that leaves a
    /// terminal status or skips `InProgress`.
    pub fn transition(run: &mut JobRun, to: RunStatus) -> Result<(), TransitionError> {
        if !Self::can_transition(run.status, to) {
            return Err(TransitionError {
                from: run.status,
                to,
            });
        }
        let now = Utc::now();
        run.status_history.push(run.status);
        run.status = to;
        run.result.status = to;
        run.updated_at = now;
        if to.is_terminal() {
            run.completed_at = Some(now);
        }
        Ok(())
    }

    /// Execute tasks from the current one until the pipeline completes, a
    /// task errors, or a task suspends.
    ///
    /// - A suspended task is re-invoked on the next call, never restarted from
    ///   the pipeline head.
    /// - Each adapter reads and augments the same accumulated data.
    /// - A terminal run is left untouched.
    pub async fn advance(
        run: &mut JobRun,
        adapters: &AdapterRegistry,
        tx_manager: &Arc<TxManager>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if run.status.is_terminal() {
            return Ok(());
        }
        if run.status != RunStatus::InProgress {
            Self::transition(run, RunStatus::InProgress)?;
        }

        let mut ctx = AdapterContext {
            run_id: run.id.clone(),
            task_index: 0,
            cancelled: run.cancel_requested,
            now,
            tx_manager: Arc::clone(tx_manager),
        };

        loop {
            let Some(index) = run.current_task_index() else {
                return Self::transition(run, RunStatus::Completed);
            };
            ctx.task_index = index;

            let task_status = run.task_runs[index].status;
            if run.cancel_requested && task_status == RunStatus::Unstarted {
                run.result = run.result.clone().with_error(AdapterError::Cancelled);
                return Self::transition(run, RunStatus::Errored);
            }

            let task = run.task_runs[index].task.clone();
            let mut input = run.result.clone();
            input.status = if task_status == RunStatus::Unstarted {
                RunStatus::InProgress
            } else {
                task_status
            };
            input.error_message = None;

            let params = merge_params(&task.params, &input.data);
            let output = match adapters.build(&task.kind, &params) {
                Ok(adapter) => adapter.perform(input, &ctx).await,
                Err(err) => input.with_error(err),
            };

            let task_run = &mut run.task_runs[index];
            match output.status {
                status if status.is_pending() => {
                    task_run.status = status;
                    run.result = output;
                    return Self::transition(run, status);
                }
                RunStatus::Errored => {
                    task_run.status = RunStatus::Errored;
                    task_run.error_message = output.error_message.clone();
                    run.result = output;
                    return Self::transition(run, RunStatus::Errored);
                }
                _ => {
                    task_run.status = RunStatus::Completed;
                    let mut output = output;
                    output.status = RunStatus::InProgress;
                    output.resume_at = None;
                    run.result = output;
                }
            }
        }
    }
}
