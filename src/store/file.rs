use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;

use alloy_primitives::B256;
use parking_lot::Mutex;
use tracing::debug;

use super::{Store, StoreError, StoreState};
use crate::state_machine::{JobRun, JobSpec};
use crate::tx_manager::Tx;

/// Store backed by a JSON snapshot shared with other processes.
///
/// Every operation reloads the snapshot under an advisory lock on a sibling
/// `.lock` file, so a CLI command and a running node see each other's
/// writes. A write goes to a temp file renamed over the previous one, so a
/// crash leaves either the old or the new state.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    local: Mutex<()>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let store = Self {
            lock_path: path.with_extension("json.lock"),
            path,
            local: Mutex::new(()),
        };
        store.read(|_| ())?;
        debug!(path = %store.path.display(), "opened store");
        Ok(store)
    }

    fn write<T>(&self, apply: impl FnOnce(&mut StoreState) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let _local = self.local.lock();
        let lock = self.lock_file()?;
        lock.lock()?;
        let mut state = self.load()?;
        let out = apply(&mut state)?;
        self.persist(&state)?;
        Ok(out)
    }

    fn read<T>(&self, view: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError> {
        let _local = self.local.lock();
        if !self.path.exists() {
            return Ok(view(&StoreState::default()));
        }
        let lock = self.lock_file()?;
        lock.lock_shared()?;
        Ok(view(&self.load()?))
    }

    /// Released when the returned handle is dropped.
    fn lock_file(&self) -> Result<File, StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?)
    }

    fn load(&self) -> Result<StoreState, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(StoreState::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Store for JsonFileStore {
    fn save_job(&self, job: &JobSpec) -> Result<(), StoreError> {
        self.write(|s| s.insert_job(job))
    }

    fn find_job(&self, id: &str) -> Result<Option<JobSpec>, StoreError> {
        self.read(|s| s.jobs.get(id).cloned())
    }

    fn jobs(&self) -> Result<Vec<JobSpec>, StoreError> {
        self.read(|s| s.jobs.values().cloned().collect())
    }

    fn create_run_if_absent(&self, run: &JobRun) -> Result<bool, StoreError> {
        if self.read(|s| s.runs.contains_key(&run.id))? {
            return Ok(false);
        }
        self.write(|s| Ok(s.insert_run_if_absent(run)))
    }

    fn save_run(&self, run: &JobRun) -> Result<(), StoreError> {
        self.write(|s| {
            s.runs.insert(run.id.clone(), run.clone());
            Ok(())
        })
    }

    fn find_run(&self, id: &str) -> Result<Option<JobRun>, StoreError> {
        self.read(|s| s.runs.get(id).cloned())
    }

    fn runs(&self) -> Result<Vec<JobRun>, StoreError> {
        self.read(|s| s.runs.values().cloned().collect())
    }

    fn save_tx(&self, tx: &Tx) -> Result<(), StoreError> {
        self.write(|s| {
            s.txs.insert(tx.id.clone(), tx.clone());
            Ok(())
        })
    }

    fn delete_tx(&self, id: &str) -> Result<(), StoreError> {
        self.write(|s| {
            s.txs.remove(id);
            Ok(())
        })
    }

    fn find_tx(&self, id: &str) -> Result<Option<Tx>, StoreError> {
        self.read(|s| s.txs.get(id).cloned())
    }

    fn find_tx_by_attempt(&self, hash: B256) -> Result<Option<Tx>, StoreError> {
        self.read(|s| s.tx_by_attempt(hash))
    }

    fn last_head(&self) -> Result<Option<u64>, StoreError> {
        self.read(|s| s.last_head)
    }

    fn save_head(&self, block: u64) -> Result<(), StoreError> {
        self.write(|s| {
            s.advance_head(block);
            Ok(())
        })
    }
}
