use alloy_primitives::{B256, Bytes, FixedBytes, keccak256};

use crate::chain::Log;
use crate::error::DecodeError;
use crate::state_machine::InitiatorType;

pub const RUN_REQUEST_V0: &str = "RunRequest(bytes32,address,uint256,uint256,uint256,bytes)";
pub const RUN_REQUEST_V20190123: &str =
    "RunRequest(bytes32,address,uint256,uint256,uint256,address,bytes4,uint256,bytes)";
pub const SERVICE_AGREEMENT_EXECUTION: &str =
    "ServiceAgreementExecution(bytes32,address,uint256,uint256,uint256,bytes)";

pub const FULFILL_V0: &str = "fulfillData(uint256,bytes32)";
pub const FULFILL_V20190123: &str = "fulfillData(uint256,uint256,address,bytes4,uint256,bytes32)";

/// Topic positions of a request log.
pub const TOPIC_SIGNATURE: usize = 0;
pub const TOPIC_JOB_ID: usize = 1;
pub const TOPIC_REQUESTER: usize = 2;
pub const TOPIC_AMOUNT: usize = 3;

const WORD: usize = 32;

pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

pub fn function_selector(signature: &str) -> FixedBytes<4> {
    FixedBytes::from_slice(&keccak256(signature.as_bytes())[..4])
}

/// Layout of a request log's data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLogSchema {
    /// `id, version, dataLocation, dataLength, data`
    V0,
    /// `id, version, callbackAddr, callbackFunc, expiration, dataLocation, dataLength, data`
    V20190123,
}

impl RunLogSchema {
    /// Byte offset where the encoded parameters start.
    pub fn params_offset(self) -> usize {
        match self {
            RunLogSchema::V0 => 4 * WORD,
            RunLogSchema::V20190123 => 7 * WORD,
        }
    }

    pub fn fulfillment_selector(self) -> FixedBytes<4> {
        match self {
            RunLogSchema::V0 => function_selector(FULFILL_V0),
            RunLogSchema::V20190123 => function_selector(FULFILL_V20190123),
        }
    }

    /// Arguments the fulfillment call must repeat ahead of the value.
    pub fn data_prefix(self, log: &Log) -> Result<Bytes, DecodeError> {
        let data = &log.data;
        let needed = match self {
            RunLogSchema::V0 => WORD,
            RunLogSchema::V20190123 => 5 * WORD,
        };
        if data.len() < needed {
            return Err(DecodeError::Truncated {
                expected: needed,
                actual: data.len(),
            });
        }

        let mut prefix = data[..WORD].to_vec();
        if self == RunLogSchema::V20190123 {
            let amount = log
                .topic(TOPIC_AMOUNT)
                .ok_or(DecodeError::MissingTopic(TOPIC_AMOUNT))?;
            prefix.extend_from_slice(amount.as_slice());
            // callbackAddr, callbackFunc, expiration
            prefix.extend_from_slice(&data[2 * WORD..5 * WORD]);
        }
        Ok(prefix.into())
    }
}

/// What a registered topic means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicEntry {
    /// The only initiator type this topic may trigger.
    pub initiator: InitiatorType,
    pub schema: RunLogSchema,
}

/// Request topics the node understands. Built once and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    entries: Vec<(B256, TopicEntry)>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(
            event_topic(RUN_REQUEST_V20190123),
            TopicEntry {
                initiator: InitiatorType::RunLog,
                schema: RunLogSchema::V20190123,
            },
        );
        registry.register(
            event_topic(RUN_REQUEST_V0),
            TopicEntry {
                initiator: InitiatorType::RunLog,
                schema: RunLogSchema::V0,
            },
        );
        registry.register(
            event_topic(SERVICE_AGREEMENT_EXECUTION),
            TopicEntry {
                initiator: InitiatorType::ServiceAgreementExecutionLog,
                schema: RunLogSchema::V0,
            },
        );
        registry
    }

    /// Registering a known topic replaces its entry.
    pub fn register(&mut self, topic: B256, entry: TopicEntry) {
        match self.entries.iter_mut().find(|(t, _)| *t == topic) {
            Some(slot) => slot.1 = entry,
            None => self.entries.push((topic, entry)),
        }
    }

    pub fn lookup(&self, topic: B256) -> Option<TopicEntry> {
        self.entries
            .iter()
            .find(|(t, _)| *t == topic)
            .map(|(_, entry)| *entry)
    }

    /// Topics that trigger `initiator`, in registration order.
    pub fn topics_for(&self, initiator: InitiatorType) -> Vec<B256> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.initiator == initiator)
            .map(|(topic, _)| *topic)
            .collect()
    }
}

/// Both accepted encodings of a job id in topic 1: the id's ASCII bytes and
/// the hex-decoded id, each right-padded to a word.
pub fn job_id_topics(job_id: &str) -> Result<[B256; 2], DecodeError> {
    let invalid = || DecodeError::InvalidJobId(job_id.to_string());
    let ascii = right_padded(job_id.as_bytes()).ok_or_else(invalid)?;
    let decoded = alloy_primitives::hex::decode(job_id).map_err(|_| invalid())?;
    let padded = right_padded(&decoded).ok_or_else(invalid)?;
    Ok([ascii, padded])
}

pub fn job_id_matches(topic: B256, job_id: &str) -> bool {
    job_id_topics(job_id).is_ok_and(|encodings| encodings.contains(&topic))
}

fn right_padded(bytes: &[u8]) -> Option<B256> {
    if bytes.len() > WORD {
        return None;
    }
    let mut word = B256::ZERO;
    word[..bytes.len()].copy_from_slice(bytes);
    Some(word)
}
