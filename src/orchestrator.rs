use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::adapters::AdapterRegistry;
use crate::chain::Log;
use crate::error::{NodeError, ValidationError};
use crate::log_request::{LogRequest, TopicRegistry};
use crate::state_machine::{
    Initiator, InitiatorType, JobRun, JobSpec, RunStatus, StateMachine, Trigger, log_run_id,
    web_run_id,
};
use crate::store::Store;
use crate::tx_manager::TxManager;

/// A request to advance one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub run_id: String,
    pub trigger: Trigger,
}

/// Creates runs from requests and drives them through their pipelines.
///
/// Triggers never execute a run inline: they enqueue a [`WorkItem`] and a
/// dispatcher calls [`JobRunner::execute`]. Execution of one run is
/// serialized by a per-run lock, different runs proceed concurrently.
pub struct JobRunner {
    store: Arc<dyn Store>,
    adapters: AdapterRegistry,
    tx_manager: Arc<TxManager>,
    topics: TopicRegistry,
    minimum_payment: U256,
    work: mpsc::UnboundedSender<WorkItem>,
    run_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn Store>,
        adapters: AdapterRegistry,
        tx_manager: Arc<TxManager>,
        topics: TopicRegistry,
        minimum_payment: U256,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<WorkItem>) {
        let (work, rx) = mpsc::unbounded_channel();
        let runner = Arc::new(Self {
            store,
            adapters,
            tx_manager,
            topics,
            minimum_payment,
            work,
            run_locks: parking_lot::Mutex::new(HashMap::new()),
        });
        (runner, rx)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn tx_manager(&self) -> &Arc<TxManager> {
        &self.tx_manager
    }

    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    pub fn add_job(&self, job: &JobSpec) -> Result<(), NodeError> {
        job.validate()?;
        for task in &job.tasks {
            if !self.adapters.contains(&task.kind) {
                warn!(job = %job.id, task = %task.kind, "job uses an unregistered task type");
            }
        }
        self.store.save_job(job)?;
        info!(job = %job.id, tasks = job.tasks.len(), "job added");
        Ok(())
    }

    /// Turn a delivered log into a run. Returns the new run id, or `None`
    /// when the log is dropped or was already delivered.
    pub fn handle_log(
        &self,
        log: Log,
        job: &JobSpec,
        initiator: &Initiator,
    ) -> Result<Option<String>, NodeError> {
        let run_id = log_run_id(&job.id, &log);
        let (block, tx_hash) = (log.block_number, log.transaction_hash);

        let request = match LogRequest::classify(log, job.clone(), initiator.clone(), &self.topics) {
            Ok(request) => request,
            Err(err) => {
                warn!(job = %job.id, block, tx_hash = %tx_hash, error = %err, "dropping undecodable log");
                return Ok(None);
            }
        };
        if let Err(err) = request.validate() {
            error!(job = %job.id, block, tx_hash = %tx_hash, error = %err, "rejecting log request");
            return Ok(None);
        }
        if let Some(payment) = request.contract_payment()
            && payment < self.minimum_payment
        {
            let err = ValidationError::InsufficientPayment {
                actual: payment,
                minimum: self.minimum_payment,
            };
            error!(job = %job.id, block, tx_hash = %tx_hash, error = %err, "rejecting log request");
            return Ok(None);
        }
        let params = match request.decode_params() {
            Ok(params) => params,
            Err(err) => {
                warn!(job = %job.id, block, tx_hash = %tx_hash, error = %err, "dropping undecodable log");
                return Ok(None);
            }
        };

        let run = JobRun::new(
            run_id,
            job,
            initiator.clone(),
            params,
            Some(request.run_request()),
        );
        if !self.store.create_run_if_absent(&run)? {
            debug!(job = %job.id, run = %run.id, "log already delivered");
            return Ok(None);
        }
        info!(job = %job.id, run = %run.id, block, kind = ?request.kind(), "run created");
        self.enqueue(&run.id, Trigger::Start);
        Ok(Some(run.id))
    }

    pub fn create_web_run(&self, job_id: &str, params: Map<String, Value>) -> Result<String, NodeError> {
        let job = self
            .store
            .find_job(job_id)?
            .ok_or_else(|| NodeError::JobNotFound(job_id.to_string()))?;
        let initiator = job
            .initiator_of(InitiatorType::Web)
            .cloned()
            .ok_or_else(|| NodeError::NoWebInitiator(job_id.to_string()))?;

        let run = JobRun::new(web_run_id(), &job, initiator, params, None);
        self.store.save_run(&run)?;
        info!(job = %job.id, run = %run.id, "web run created");
        self.enqueue(&run.id, Trigger::Start);
        Ok(run.id)
    }

    /// Advance a run if `trigger` resumes it. Returns the status it was left
    /// in, or `None` when the trigger does not apply.
    pub async fn execute(&self, run_id: &str, trigger: Trigger) -> Result<Option<RunStatus>, NodeError> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;

        let mut run = self
            .store
            .find_run(run_id)?
            .ok_or_else(|| NodeError::RunNotFound(run_id.to_string()))?;
        if !trigger.resumes(&run) {
            debug!(run = %run_id, status = %run.status, ?trigger, "trigger does not resume run");
            return Ok(None);
        }

        StateMachine::advance(&mut run, &self.adapters, &self.tx_manager, trigger.now()).await?;
        self.store.save_run(&run)?;

        match run.status {
            RunStatus::Completed => info!(job = %run.job_id, run = %run.id, "run completed"),
            RunStatus::Errored => error!(
                job = %run.job_id,
                run = %run.id,
                error = run.result.error_message.as_deref().unwrap_or("unknown"),
                "run errored"
            ),
            status => debug!(job = %run.job_id, run = %run.id, %status, "run suspended"),
        }
        if let Some(at) = run.resume_at() {
            self.schedule_wakeup(&run.id, at);
        }
        if run.status.is_terminal() {
            self.run_locks.lock().remove(run_id);
        }
        Ok(Some(run.status))
    }

    /// Enqueue runs waiting on confirmations or on the connection.
    pub fn on_new_block(&self, block: u64) -> Result<usize, NodeError> {
        let waiting = self
            .store
            .runs_with_status(&[RunStatus::PendingConfirmations, RunStatus::PendingConnection])?;
        for run in &waiting {
            self.enqueue(&run.id, Trigger::NewBlock(block));
        }
        Ok(waiting.len())
    }

    pub fn on_reconnect(&self) -> Result<usize, NodeError> {
        let waiting = self.store.runs_with_status(&[RunStatus::PendingConnection])?;
        for run in &waiting {
            self.enqueue(&run.id, Trigger::Reconnected);
        }
        Ok(waiting.len())
    }

    /// Flag a run as cancelled. It starts no further task and will not
    /// submit a transaction it has not already broadcast.
    pub async fn cancel_run(&self, run_id: &str) -> Result<JobRun, NodeError> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;

        let mut run = self
            .store
            .find_run(run_id)?
            .ok_or_else(|| NodeError::RunNotFound(run_id.to_string()))?;
        if run.status.is_terminal() || run.cancel_requested {
            return Ok(run);
        }
        run.cancel_requested = true;
        run.updated_at = Utc::now();
        self.store.save_run(&run)?;
        info!(run = %run.id, status = %run.status, "run cancellation requested");
        if run.status == RunStatus::Unstarted {
            self.enqueue(&run.id, Trigger::Start);
        }
        Ok(run)
    }

    /// Restore in-memory scheduling after a restart: sleep timers from the
    /// persisted deadlines and queued runs that never finished starting.
    pub fn rehydrate(&self) -> Result<usize, NodeError> {
        let runs = self.store.runs_with_status(&[
            RunStatus::Unstarted,
            RunStatus::InProgress,
            RunStatus::PendingSleep,
        ])?;
        for run in &runs {
            match run.resume_at() {
                Some(at) => self.schedule_wakeup(&run.id, at),
                None => self.enqueue(&run.id, Trigger::Start),
            }
        }
        if !runs.is_empty() {
            info!(runs = runs.len(), "rehydrated runs");
        }
        Ok(runs.len())
    }

    fn enqueue(&self, run_id: &str, trigger: Trigger) {
        let item = WorkItem {
            run_id: run_id.to_string(),
            trigger,
        };
        if self.work.send(item).is_err() {
            debug!(run = %run_id, ?trigger, "no dispatcher running, work left for rehydration");
        }
    }

    fn schedule_wakeup(&self, run_id: &str, at: DateTime<Utc>) {
        let work = self.work.clone();
        let run_id = run_id.to_string();
        debug!(run = %run_id, %at, "scheduling wake-up");
        tokio::spawn(async move {
            sleep_until(at).await;
            let _ = work.send(WorkItem {
                run_id,
                trigger: Trigger::Timer(at),
            });
        });
    }

    fn run_lock(&self, run_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.run_locks.lock();
        Arc::clone(locks.entry(run_id.to_string()).or_default())
    }
}

async fn sleep_until(at: DateTime<Utc>) {
    let wait = (at - Utc::now()).to_std().unwrap_or_default();
    tokio::time::sleep(wait).await;
}

/// Execute queued work until the queue closes, one task per item.
pub async fn dispatch(runner: Arc<JobRunner>, mut rx: mpsc::UnboundedReceiver<WorkItem>) {
    while let Some(item) = rx.recv().await {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            if let Err(err) = runner.execute(&item.run_id, item.trigger).await {
                error!(run = %item.run_id, error = %err, "run execution failed");
            }
        });
    }
}
