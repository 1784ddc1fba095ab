use tracing::{debug, warn};

use super::topics::{TopicRegistry, job_id_topics};
use crate::chain::{ChainClient, ChainError, FilterQuery, Log};
use crate::error::DecodeError;
use crate::state_machine::{Initiator, InitiatorType, JobSpec};

/// Log filter for one initiator, starting after `head` so the head block
/// already processed is not replayed.
pub fn filter_query_for(
    initiator: &Initiator,
    job_id: &str,
    head: u64,
    registry: &TopicRegistry,
) -> Result<FilterQuery, DecodeError> {
    let topics = match initiator.kind {
        InitiatorType::Web => return Err(DecodeError::NoFilter(initiator.kind.name())),
        InitiatorType::EthLog => Vec::new(),
        InitiatorType::RunLog | InitiatorType::ServiceAgreementExecutionLog => {
            vec![registry.topics_for(initiator.kind), job_id_topics(job_id)?.to_vec()]
        }
    };
    Ok(FilterQuery {
        from_block: head.saturating_add(1),
        to_block: None,
        addresses: initiator.address.into_iter().collect(),
        topics,
    })
}

/// Polls the chain for one initiator's logs, advancing past each head it has seen.
#[derive(Debug, Clone)]
pub struct InitiatorSubscription {
    pub job: JobSpec,
    pub initiator: Initiator,
    filter: FilterQuery,
}

impl InitiatorSubscription {
    pub fn new(
        job: JobSpec,
        initiator: Initiator,
        head: u64,
        registry: &TopicRegistry,
    ) -> Result<Self, DecodeError> {
        let filter = filter_query_for(&initiator, &job.id, head, registry)?;
        Ok(Self {
            job,
            initiator,
            filter,
        })
    }

    /// One subscription per log initiator of `job`. Initiators whose filter
    /// cannot be built are skipped with a warning.
    pub fn for_job(job: &JobSpec, head: u64, registry: &TopicRegistry) -> Vec<Self> {
        job.log_initiators()
            .filter_map(|initiator| {
                match Self::new(job.clone(), initiator.clone(), head, registry) {
                    Ok(sub) => Some(sub),
                    Err(err) => {
                        warn!(job = %job.id, initiator = %initiator.kind, error = %err, "cannot subscribe");
                        None
                    }
                }
            })
            .collect()
    }

    #[cfg(test)]
    pub fn filter(&self) -> &FilterQuery {
        &self.filter
    }

    /// First block the next poll will ask for.
    pub fn next_block(&self) -> u64 {
        self.filter.from_block
    }

    /// Move the window back so logs from `block` on are fetched again.
    pub fn rewind(&mut self, block: u64) {
        self.filter.from_block = self.filter.from_block.min(block);
    }

    /// Logs in `[from, head]` ordered by position. The window only advances
    /// when the query succeeds, so a failed poll is retried in full.
    pub async fn poll(&mut self, client: &dyn ChainClient, head: u64) -> Result<Vec<Log>, ChainError> {
        if self.filter.from_block > head {
            return Ok(Vec::new());
        }
        let query = FilterQuery {
            to_block: Some(head),
            ..self.filter.clone()
        };
        let mut logs = client.logs(&query).await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        debug!(
            job = %self.job.id,
            from = query.from_block,
            to = head,
            count = logs.len(),
            "polled logs"
        );
        self.filter.from_block = head.saturating_add(1);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_request::topics::{RUN_REQUEST_V0, SERVICE_AGREEMENT_EXECUTION, event_topic};
    use crate::state_machine::TaskSpec;
    use crate::test_support::MockChain;
    use alloy_primitives::{Address, B256, Bytes};
    use serde_json::json;

    const JOB_ID: &str = "4c7b7ffb66b344fbaa64995af81e355a";

    fn job_with(kind: InitiatorType) -> JobSpec {
        let mut job = JobSpec::new(
            vec![Initiator::new(kind, Some(Address::repeat_byte(0x11)))],
            vec![TaskSpec::new("noop", json!({}))],
        );
        job.id = JOB_ID.into();
        job
    }

    #[test]
    fn run_log_filter_matches_schemas_and_encodings() {
        let job = job_with(InitiatorType::RunLog);
        let registry = TopicRegistry::standard();
        let filter = filter_query_for(&job.initiators[0], JOB_ID, 99, &registry).unwrap();

        assert_eq!(filter.from_block, 100);
        assert_eq!(filter.addresses, vec![Address::repeat_byte(0x11)]);
        assert_eq!(filter.topics.len(), 2);
        assert_eq!(filter.topics[0], registry.topics_for(InitiatorType::RunLog));
        assert_eq!(filter.topics[1], job_id_topics(JOB_ID).unwrap().to_vec());
        assert!(!filter.topics[0].contains(&event_topic(SERVICE_AGREEMENT_EXECUTION)));
    }

    #[test]
    fn service_agreement_filter_uses_its_own_topic() {
        let job = job_with(InitiatorType::ServiceAgreementExecutionLog);
        let filter =
            filter_query_for(&job.initiators[0], JOB_ID, 41, &TopicRegistry::standard()).unwrap();
        assert_eq!(filter.from_block, 42);
        assert_eq!(filter.topics[0], vec![event_topic(SERVICE_AGREEMENT_EXECUTION)]);
    }

    #[test]
    fn eth_log_filters_on_address_only() {
        let job = job_with(InitiatorType::EthLog);
        let filter =
            filter_query_for(&job.initiators[0], JOB_ID, 5, &TopicRegistry::standard()).unwrap();
        assert!(filter.topics.is_empty());
        assert_eq!(filter.from_block, 6);
    }

    #[test]
    fn web_initiator_has_no_filter() {
        let initiator = Initiator::new(InitiatorType::Web, None);
        assert_eq!(
            filter_query_for(&initiator, JOB_ID, 0, &TopicRegistry::standard()),
            Err(DecodeError::NoFilter("web"))
        );
    }

    fn log_at(block: u64, index: u64) -> Log {
        Log {
            address: Address::repeat_byte(0x11),
            block_number: block,
            block_hash: B256::repeat_byte(block as u8),
            transaction_hash: B256::repeat_byte(0xcc),
            log_index: index,
            topics: vec![
                event_topic(RUN_REQUEST_V0),
                job_id_topics(JOB_ID).unwrap()[0],
            ],
            data: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn poll_advances_window_and_orders_logs() {
        let chain = MockChain::default();
        chain.push_log(log_at(12, 1));
        chain.push_log(log_at(11, 4));
        chain.push_log(log_at(12, 0));

        let job = job_with(InitiatorType::RunLog);
        let mut sub = InitiatorSubscription::new(
            job.clone(),
            job.initiators[0].clone(),
            10,
            &TopicRegistry::standard(),
        )
        .unwrap();

        let logs = sub.poll(&chain, 12).await.unwrap();
        let positions: Vec<_> = logs.iter().map(|l| (l.block_number, l.log_index)).collect();
        assert_eq!(positions, vec![(11, 4), (12, 0), (12, 1)]);
        assert_eq!(sub.filter().from_block, 13);

        assert!(sub.poll(&chain, 12).await.unwrap().is_empty());

        sub.rewind(11);
        assert_eq!(sub.poll(&chain, 12).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_poll_keeps_window() {
        let chain = MockChain::default();
        chain.fail_reads(true);
        let job = job_with(InitiatorType::RunLog);
        let mut sub = InitiatorSubscription::new(
            job.clone(),
            job.initiators[0].clone(),
            10,
            &TopicRegistry::standard(),
        )
        .unwrap();

        assert!(sub.poll(&chain, 20).await.is_err());
        assert_eq!(sub.filter().from_block, 11);
    }

    #[test]
    fn for_job_skips_web_initiators() {
        let mut job = job_with(InitiatorType::RunLog);
        job.initiators.push(Initiator::new(InitiatorType::Web, None));
        let subs = InitiatorSubscription::for_job(&job, 0, &TopicRegistry::standard());
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].initiator.kind, InitiatorType::RunLog);
    }
}
