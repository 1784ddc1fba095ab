use alloy_primitives::{Address, B256, U256, hex, keccak256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::job::{Initiator, JobSpec, TaskSpec};
use super::result::{RunResult, RunStatus};
use crate::chain::Log;

/// Chain coordinates of the log that triggered a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub log_index: u64,
    pub requester: Option<Address>,
    pub payment: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub task: TaskSpec,
    pub status: RunStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// One execution of a job's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: String,
    pub job_id: String,
    pub initiator: Initiator,
    pub status: RunStatus,
    pub result: RunResult,
    pub task_runs: Vec<TaskRun>,
    pub request: Option<RunRequest>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub status_history: Vec<RunStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRun {
    pub fn new(
        id: String,
        job: &JobSpec,
        initiator: Initiator,
        data: Map<String, Value>,
        request: Option<RunRequest>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_id: job.id.clone(),
            initiator,
            status: RunStatus::Unstarted,
            result: RunResult::new(data),
            task_runs: job
                .tasks
                .iter()
                .map(|task| TaskRun {
                    task: task.clone(),
                    status: RunStatus::Unstarted,
                    error_message: None,
                })
                .collect(),
            request,
            cancel_requested: false,
            status_history: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Index of the first task that has not completed.
    pub fn current_task_index(&self) -> Option<usize> {
        self.task_runs
            .iter()
            .position(|t| t.status != RunStatus::Completed)
    }

    pub fn resume_at(&self) -> Option<DateTime<Utc>> {
        if self.status == RunStatus::PendingSleep {
            self.result.resume_at
        } else {
            None
        }
    }
}

/// Run id of a log-triggered run. A pure function of the job and the log's
/// coordinates, so a redelivered log maps onto the run it already created.
pub fn log_run_id(job_id: &str, log: &Log) -> String {
    let mut preimage = Vec::with_capacity(job_id.len() + 32 + 8);
    preimage.extend_from_slice(job_id.as_bytes());
    preimage.extend_from_slice(log.transaction_hash.as_slice());
    preimage.extend_from_slice(&log.log_index.to_be_bytes());
    hex::encode(&keccak256(&preimage)[..16])
}

pub fn web_run_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Operator-facing summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub job_id: String,
    pub status: RunStatus,
    pub state_transitions: Vec<RunStatus>,
    pub tasks_completed: usize,
    pub tasks_total: usize,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunSummary {
    pub fn from_run(run: &JobRun) -> Self {
        let end = run.completed_at.unwrap_or_else(Utc::now);
        let mut transitions = run.status_history.clone();
        transitions.push(run.status);

        Self {
            run_id: run.id.clone(),
            job_id: run.job_id.clone(),
            status: run.status,
            state_transitions: transitions,
            tasks_completed: run
                .task_runs
                .iter()
                .filter(|t| t.status == RunStatus::Completed)
                .count(),
            tasks_total: run.task_runs.len(),
            error: run.result.error_message.clone(),
            started_at: run.created_at,
            duration_ms: (end - run.created_at).num_milliseconds(),
        }
    }
}
