use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::JobSpecError;

/// What kind of event starts a run of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitiatorType {
    /// Manually triggered runs.
    Web,
    /// Any log emitted by `address`; the log itself becomes the run input.
    EthLog,
    /// Oracle request logs addressed to this job.
    RunLog,
    /// Coordinator request logs addressed to this job.
    ServiceAgreementExecutionLog,
}

impl InitiatorType {
    pub fn name(self) -> &'static str {
        match self {
            InitiatorType::Web => "web",
            InitiatorType::EthLog => "ethlog",
            InitiatorType::RunLog => "runlog",
            InitiatorType::ServiceAgreementExecutionLog => "serviceagreementexecutionlog",
        }
    }

    pub fn is_log(self) -> bool {
        !matches!(self, InitiatorType::Web)
    }
}

impl std::fmt::Display for InitiatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiator {
    #[serde(rename = "type")]
    pub kind: InitiatorType,
    /// Contract whose logs are watched. `None` watches every address.
    #[serde(default)]
    pub address: Option<Address>,
    /// Requester allow-list. Empty means anyone may request.
    #[serde(default)]
    pub requesters: Vec<Address>,
}

impl Initiator {
    pub fn new(kind: InitiatorType, address: Option<Address>) -> Self {
        Self {
            kind,
            address,
            requesters: Vec::new(),
        }
    }
}

/// One pipeline step. `kind` names an adapter in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl TaskSpec {
    pub fn new(kind: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.into(),
            params,
        }
    }
}

/// A job: initiators that trigger runs and the ordered task pipeline each run executes.
/// Read-only to the engine once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default = "new_job_id")]
    pub id: String,
    pub initiators: Vec<Initiator>,
    pub tasks: Vec<TaskSpec>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Job ids are 32 lowercase hex characters, so both on-chain encodings of the id fit one word.
pub fn new_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl JobSpec {
    pub fn new(initiators: Vec<Initiator>, tasks: Vec<TaskSpec>) -> Self {
        Self {
            id: new_job_id(),
            initiators,
            tasks,
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), JobSpecError> {
        if self.initiators.is_empty() {
            return Err(JobSpecError::NoInitiators);
        }
        if self.tasks.is_empty() {
            return Err(JobSpecError::NoTasks);
        }
        if self.id.len() != 32 || !self.id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(JobSpecError::InvalidId(self.id.clone()));
        }
        for initiator in &self.initiators {
            if initiator.kind == InitiatorType::EthLog && initiator.address.is_none() {
                return Err(JobSpecError::MissingAddress(initiator.kind.name()));
            }
        }
        Ok(())
    }

    pub fn initiator_of(&self, kind: InitiatorType) -> Option<&Initiator> {
        self.initiators.iter().find(|i| i.kind == kind)
    }

    pub fn log_initiators(&self) -> impl Iterator<Item = &Initiator> {
        self.initiators.iter().filter(|i| i.kind.is_log())
    }
}
