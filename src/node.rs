use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::error::NodeError;
use crate::log_request::InitiatorSubscription;
use crate::orchestrator::{JobRunner, WorkItem, dispatch};

/// Event loop: head tracking, connection state, log polling and work dispatch.
pub struct Node {
    runner: Arc<JobRunner>,
    client: Arc<dyn ChainClient>,
    poll_interval: Duration,
    subscriptions: Vec<InitiatorSubscription>,
    last_head: Option<u64>,
}

impl Node {
    /// Subscribes every stored job's log initiators from the last processed
    /// head. A node without a saved head subscribes on its first tick,
    /// starting after the chain head of that moment.
    pub fn new(
        runner: Arc<JobRunner>,
        client: Arc<dyn ChainClient>,
        poll_interval: Duration,
    ) -> Result<Self, NodeError> {
        let last_head = runner.store().last_head()?;
        let subscriptions = match last_head {
            Some(head) => subscriptions_after(&runner, head)?,
            None => Vec::new(),
        };
        info!(subscriptions = subscriptions.len(), head = ?last_head, "node initialised");
        Ok(Self {
            runner,
            client,
            poll_interval,
            subscriptions,
            last_head,
        })
    }

    /// Run until `shutdown` resolves.
    pub async fn run(
        mut self,
        work: mpsc::UnboundedReceiver<WorkItem>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), NodeError> {
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&self.runner), work));
        self.runner.rehydrate()?;

        let mut ticker = tokio::time::interval(self.poll_interval);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "head processing failed");
                    }
                }
            }
        }
        dispatcher.abort();
        Ok(())
    }

    /// One poll: refresh the connection flag, deliver new logs, then wake
    /// runs waiting on blocks.
    pub async fn tick(&mut self) -> Result<(), NodeError> {
        let tx_manager = Arc::clone(self.runner.tx_manager());
        let head = match self.client.block_number().await {
            Ok(head) => head,
            Err(err) => {
                if tx_manager.connected() {
                    warn!(error = %err, "lost chain connection");
                }
                tx_manager.set_connected(false);
                return Ok(());
            }
        };
        if !tx_manager.connected() {
            tx_manager.set_connected(true);
            self.runner.on_reconnect()?;
        }
        let Some(last) = self.last_head else {
            self.subscriptions = subscriptions_after(&self.runner, head)?;
            self.runner.store().save_head(head)?;
            self.last_head = Some(head);
            info!(block = head, subscriptions = self.subscriptions.len(), "watching logs from the current head");
            return Ok(());
        };
        if head <= last {
            return Ok(());
        }

        // The head is only persisted once every window up to it was handled,
        // so a restart polls a failed window again.
        let mut complete = true;
        for sub in &mut self.subscriptions {
            let from = sub.next_block();
            let logs = match sub.poll(self.client.as_ref(), head).await {
                Ok(logs) => logs,
                Err(err) => {
                    warn!(job = %sub.job.id, error = %err, "log poll failed, will retry");
                    complete = false;
                    continue;
                }
            };
            let mut failed = false;
            for log in logs {
                if let Err(err) = self.runner.handle_log(log, &sub.job, &sub.initiator) {
                    warn!(job = %sub.job.id, error = %err, "log handling failed, will retry");
                    failed = true;
                }
            }
            if failed {
                sub.rewind(from);
                complete = false;
            }
        }

        if complete {
            self.runner.store().save_head(head)?;
            self.last_head = Some(head);
        }
        let woken = self.runner.on_new_block(head)?;
        debug!(block = head, woken, complete, "new head");
        Ok(())
    }
}

fn subscriptions_after(runner: &JobRunner, head: u64) -> Result<Vec<InitiatorSubscription>, NodeError> {
    Ok(runner
        .store()
        .jobs()?
        .iter()
        .flat_map(|job| InitiatorSubscription::for_job(job, head, runner.topics()))
        .collect())
}
