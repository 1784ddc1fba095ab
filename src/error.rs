use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

use crate::chain::ChainError;
use crate::state_machine::RunStatus;
use crate::store::StoreError;
use crate::tx_manager::TxManagerError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Job {0} has no web initiator")]
    NoWebInitiator(String),

    #[error("Invalid job spec: {0}")]
    JobSpec(#[from] JobSpecError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transaction manager error: {0}")]
    TxManager(#[from] TxManagerError),

    #[error("Run state error: {0}")]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobSpecError {
    #[error("job must declare at least one initiator")]
    NoInitiators,

    #[error("job must declare at least one task")]
    NoTasks,

    #[error("job id {0} is not 32 hex characters")]
    InvalidId(String),

    #[error("{0} initiator requires a contract address")]
    MissingAddress(&'static str),
}

/// A log that cannot be turned into a request. Dropped, never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no topics")]
    NoTopics,

    #[error("no parser registered for topic {0}")]
    UnknownTopic(B256),

    #[error("log is missing topic {0}")]
    MissingTopic(usize),

    #[error("topic {topic} cannot trigger a {initiator} initiator")]
    InitiatorMismatch { topic: B256, initiator: &'static str },

    #[error("log data is {actual} bytes, expected at least {expected}")]
    Truncated { expected: usize, actual: usize },

    #[error("malformed request parameters: {0}")]
    MalformedParams(String),

    #[error("duplicate key {0} in request parameters")]
    DuplicateKey(String),

    #[error("cannot build a log filter for a {0} initiator")]
    NoFilter(&'static str),

    #[error("job id {0} is not hex encoded")]
    InvalidJobId(String),
}

/// A well formed request that this node must not act on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("run log job id does not match job {expected}")]
    JobIdMismatch { expected: String },

    #[error("requester {0} is not authorized for this job")]
    UnauthorizedRequester(Address),

    #[error("payment {actual} is below the minimum contract payment {minimum}")]
    InsufficientPayment { actual: U256, minimum: U256 },
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("invalid {adapter} params: {reason}")]
    InvalidParams { adapter: &'static str, reason: String },

    #[error("cannot encode value: {0}")]
    Encoding(String),

    #[error("run was cancelled before fulfillment")]
    Cancelled,

    #[error("transaction submission failed: {0}")]
    Submission(#[from] TxManagerError),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid run transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_display() {
        let err = TransitionError {
            from: RunStatus::Completed,
            to: RunStatus::InProgress,
        };
        assert_eq!(err.to_string(), "invalid run transition completed -> in_progress");
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError::InsufficientPayment {
            actual: U256::from(1u64),
            minimum: U256::from(10u64),
        };
        assert_eq!(
            err.to_string(),
            "payment 1 is below the minimum contract payment 10"
        );
    }
}
