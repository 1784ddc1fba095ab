//! Durable state: job specs, runs, transactions and the last processed head.

mod error;
mod file;

use std::collections::BTreeMap;

use alloy_primitives::B256;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::state_machine::{JobRun, JobSpec, RunStatus};
use crate::tx_manager::Tx;

pub use error::StoreError;
pub use file::JsonFileStore;

pub trait Store: Send + Sync {
    /// Fails with `Duplicate` if a job with the same id exists.
    fn save_job(&self, job: &JobSpec) -> Result<(), StoreError>;
    fn find_job(&self, id: &str) -> Result<Option<JobSpec>, StoreError>;
    fn jobs(&self) -> Result<Vec<JobSpec>, StoreError>;

    /// Insert `run` unless a run with its id exists. Returns whether it was inserted.
    fn create_run_if_absent(&self, run: &JobRun) -> Result<bool, StoreError>;
    fn save_run(&self, run: &JobRun) -> Result<(), StoreError>;
    fn find_run(&self, id: &str) -> Result<Option<JobRun>, StoreError>;
    fn runs(&self) -> Result<Vec<JobRun>, StoreError>;
    fn runs_with_status(&self, statuses: &[RunStatus]) -> Result<Vec<JobRun>, StoreError> {
        Ok(self
            .runs()?
            .into_iter()
            .filter(|run| statuses.contains(&run.status))
            .collect())
    }

    fn save_tx(&self, tx: &Tx) -> Result<(), StoreError>;
    fn delete_tx(&self, id: &str) -> Result<(), StoreError>;
    fn find_tx(&self, id: &str) -> Result<Option<Tx>, StoreError>;
    fn find_tx_by_attempt(&self, hash: B256) -> Result<Option<Tx>, StoreError>;

    fn last_head(&self) -> Result<Option<u64>, StoreError>;
    fn save_head(&self, block: u64) -> Result<(), StoreError>;
}

/// Everything a store holds. Serialized whole by [`JsonFileStore`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoreState {
    #[serde(default)]
    jobs: BTreeMap<String, JobSpec>,
    #[serde(default)]
    runs: BTreeMap<String, JobRun>,
    #[serde(default)]
    txs: BTreeMap<String, Tx>,
    #[serde(default)]
    last_head: Option<u64>,
}

impl StoreState {
    fn insert_job(&mut self, job: &JobSpec) -> Result<(), StoreError> {
        if self.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate {
                kind: "job",
                id: job.id.clone(),
            });
        }
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn insert_run_if_absent(&mut self, run: &JobRun) -> bool {
        if self.runs.contains_key(&run.id) {
            return false;
        }
        self.runs.insert(run.id.clone(), run.clone());
        true
    }

    fn tx_by_attempt(&self, hash: B256) -> Option<Tx> {
        self.txs.values().find(|tx| tx.has_attempt(hash)).cloned()
    }

    fn advance_head(&mut self, block: u64) {
        self.last_head = Some(self.last_head.map_or(block, |head| head.max(block)));
    }
}

/// In-process store, lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn save_job(&self, job: &JobSpec) -> Result<(), StoreError> {
        self.state.lock().insert_job(job)
    }

    fn find_job(&self, id: &str) -> Result<Option<JobSpec>, StoreError> {
        Ok(self.state.lock().jobs.get(id).cloned())
    }

    fn jobs(&self) -> Result<Vec<JobSpec>, StoreError> {
        Ok(self.state.lock().jobs.values().cloned().collect())
    }

    fn create_run_if_absent(&self, run: &JobRun) -> Result<bool, StoreError> {
        Ok(self.state.lock().insert_run_if_absent(run))
    }

    fn save_run(&self, run: &JobRun) -> Result<(), StoreError> {
        self.state.lock().runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn find_run(&self, id: &str) -> Result<Option<JobRun>, StoreError> {
        Ok(self.state.lock().runs.get(id).cloned())
    }

    fn runs(&self) -> Result<Vec<JobRun>, StoreError> {
        Ok(self.state.lock().runs.values().cloned().collect())
    }

    fn save_tx(&self, tx: &Tx) -> Result<(), StoreError> {
        self.state.lock().txs.insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    fn delete_tx(&self, id: &str) -> Result<(), StoreError> {
        self.state.lock().txs.remove(id);
        Ok(())
    }

    fn find_tx(&self, id: &str) -> Result<Option<Tx>, StoreError> {
        Ok(self.state.lock().txs.get(id).cloned())
    }

    fn find_tx_by_attempt(&self, hash: B256) -> Result<Option<Tx>, StoreError> {
        Ok(self.state.lock().tx_by_attempt(hash))
    }

    fn last_head(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.state.lock().last_head)
    }

    fn save_head(&self, block: u64) -> Result<(), StoreError> {
        self.state.lock().advance_head(block);
        Ok(())
    }
}
