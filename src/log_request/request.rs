use alloy_primitives::{Address, U256, hex};
use serde_json::{Map, Value};

use super::cbor;
use super::topics::{
    RunLogSchema, TOPIC_AMOUNT, TOPIC_JOB_ID, TOPIC_REQUESTER, TOPIC_SIGNATURE, TopicRegistry,
    job_id_matches,
};
use crate::chain::Log;
use crate::error::{DecodeError, ValidationError};
use crate::state_machine::{Initiator, InitiatorType, JobSpec, RunRequest};

const WORD: usize = 32;

/// How a delivered log is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// The raw log is the run input.
    EthLog,
    RunLog(RunLogSchema),
    ServiceAgreement(RunLogSchema),
}

/// A log delivered for one initiator of one job, classified by its topic.
#[derive(Debug, Clone)]
pub struct LogRequest {
    log: Log,
    job: JobSpec,
    initiator: Initiator,
    kind: RequestKind,
}

impl LogRequest {
    /// Pick the request variant for `log`.
    ///
    /// Request initiators only accept registered topics of their own kind.
    /// Raw log initiators take any log.
    pub fn classify(
        log: Log,
        job: JobSpec,
        initiator: Initiator,
        registry: &TopicRegistry,
    ) -> Result<Self, DecodeError> {
        let kind = match initiator.kind {
            InitiatorType::EthLog => RequestKind::EthLog,
            InitiatorType::Web => {
                return Err(DecodeError::InitiatorMismatch {
                    topic: log.topic(TOPIC_SIGNATURE).unwrap_or_default(),
                    initiator: InitiatorType::Web.name(),
                });
            }
            InitiatorType::RunLog | InitiatorType::ServiceAgreementExecutionLog => {
                let topic = log.topic(TOPIC_SIGNATURE).ok_or(DecodeError::NoTopics)?;
                let entry = registry
                    .lookup(topic)
                    .ok_or(DecodeError::UnknownTopic(topic))?;
                if entry.initiator != initiator.kind {
                    return Err(DecodeError::InitiatorMismatch {
                        topic,
                        initiator: initiator.kind.name(),
                    });
                }
                match initiator.kind {
                    InitiatorType::RunLog => RequestKind::RunLog(entry.schema),
                    _ => RequestKind::ServiceAgreement(entry.schema),
                }
            }
        };
        Ok(Self {
            log,
            job,
            initiator,
            kind,
        })
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    fn schema(&self) -> Option<RunLogSchema> {
        match self.kind {
            RequestKind::EthLog => None,
            RequestKind::RunLog(schema) | RequestKind::ServiceAgreement(schema) => Some(schema),
        }
    }

    /// Job id check then requester allow-list. Raw logs always pass.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema().is_none() {
            return Ok(());
        }
        let job_id_ok = self
            .log
            .topic(TOPIC_JOB_ID)
            .is_some_and(|topic| job_id_matches(topic, &self.job.id));
        if !job_id_ok {
            return Err(ValidationError::JobIdMismatch {
                expected: self.job.id.clone(),
            });
        }

        let allowed = &self.initiator.requesters;
        if allowed.is_empty() {
            return Ok(());
        }
        let requester = self.requester().unwrap_or(Address::ZERO);
        if allowed.contains(&requester) {
            Ok(())
        } else {
            Err(ValidationError::UnauthorizedRequester(requester))
        }
    }

    /// Address in topic 2 of a request log.
    pub fn requester(&self) -> Option<Address> {
        self.schema()?;
        self.log.topic(TOPIC_REQUESTER).map(Address::from_word)
    }

    /// Amount in topic 3 of a request log.
    pub fn contract_payment(&self) -> Option<U256> {
        self.schema()?;
        self.log
            .topic(TOPIC_AMOUNT)
            .map(|topic| U256::from_be_bytes(topic.0))
    }

    /// The run's initial data.
    ///
    /// Request logs decode their parameter map and gain `address`,
    /// `dataPrefix` and `functionSelector` for the fulfillment call.
    pub fn decode_params(&self) -> Result<Map<String, Value>, DecodeError> {
        let Some(schema) = self.schema() else {
            return match serde_json::to_value(&self.log) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(DecodeError::MalformedParams(format!(
                    "log encoded as {other}"
                ))),
                Err(e) => Err(DecodeError::MalformedParams(e.to_string())),
            };
        };

        let data = &self.log.data;
        let start = schema.params_offset();
        if data.len() < start {
            return Err(DecodeError::Truncated {
                expected: start,
                actual: data.len(),
            });
        }
        let length = U256::from_be_slice(&data[start - WORD..start]);
        let end = usize::try_from(length)
            .ok()
            .and_then(|len| start.checked_add(len))
            .unwrap_or(usize::MAX);
        if data.len() < end {
            return Err(DecodeError::Truncated {
                expected: end,
                actual: data.len(),
            });
        }

        let mut params = cbor::decode_params(&data[start..end])?;
        params.insert(
            "address".into(),
            Value::String(self.log.address.to_checksum(None)),
        );
        params.insert(
            "dataPrefix".into(),
            Value::String(hex::encode_prefixed(schema.data_prefix(&self.log)?)),
        );
        params.insert(
            "functionSelector".into(),
            Value::String(hex::encode_prefixed(schema.fulfillment_selector())),
        );
        Ok(params)
    }

    pub fn run_request(&self) -> RunRequest {
        RunRequest {
            block_number: self.log.block_number,
            block_hash: self.log.block_hash,
            tx_hash: self.log.transaction_hash,
            log_index: self.log.log_index,
            requester: self.requester(),
            payment: self.contract_payment(),
        }
    }
}
