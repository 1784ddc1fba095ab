mod adapters;
mod chain;
mod cli;
mod config;
mod error;
mod log_request;
mod node;
mod orchestrator;
mod state_machine;
mod store;
#[cfg(test)]
mod test_support;
mod tx_manager;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use adapters::AdapterRegistry;
use chain::{ChainClient, HttpChainClient};
use cli::{Cli, Command};
use config::NodeConfig;
use log_request::TopicRegistry;
use node::Node;
use orchestrator::{JobRunner, WorkItem};
use state_machine::{JobSpec, RunSummary};
use store::{JsonFileStore, Store};
use tx_manager::TxManager;
use ui::RunPrinter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => NodeConfig::load_from(path)?,
        None => NodeConfig::load()?,
    };

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (runner, work, client) = build_services(&config)?;
    let printer = RunPrinter::default();

    match cli.command {
        Command::Node => {
            let node = Node::new(
                runner,
                client,
                Duration::from_millis(config.poll_interval_ms),
            )?;
            let shutdown = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "cannot listen for ctrl-c");
                }
            };
            node.run(work, shutdown).await?;
        }
        Command::AddJob { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let job: JobSpec = serde_json::from_str(&contents)
                .with_context(|| format!("parsing job spec {}", file.display()))?;
            runner.add_job(&job)?;
            println!("{}", job.id);
        }
        Command::Trigger { job_id, data } => {
            let params = match data.as_deref().map(serde_json::from_str::<Value>).transpose()? {
                None => serde_json::Map::new(),
                Some(Value::Object(map)) => map,
                Some(other) => bail!("--data must be a JSON object, got {other}"),
            };
            let run_id = runner.create_web_run(&job_id, params)?;
            println!("{run_id}");
        }
        Command::Cancel { run_id } => {
            let run = runner.cancel_run(&run_id).await?;
            printer.print_summary(&RunSummary::from_run(&run));
        }
        Command::Status => {
            let mut runs = runner.store().runs()?;
            runs.sort_by_key(|run| run.created_at);
            let summaries: Vec<_> = runs.iter().map(RunSummary::from_run).collect();
            printer.print_runs(&summaries);
        }
    }

    Ok(())
}

fn build_services(
    config: &NodeConfig,
) -> Result<(Arc<JobRunner>, mpsc::UnboundedReceiver<WorkItem>, Arc<dyn ChainClient>)> {
    let store: Arc<dyn Store> = Arc::new(
        JsonFileStore::open(&config.store_path)
            .with_context(|| format!("opening store {}", config.store_path.display()))?,
    );
    let client: Arc<dyn ChainClient> = Arc::new(HttpChainClient::new(config.eth_url.clone())?);
    let tx_manager = Arc::new(TxManager::new(
        Arc::clone(&client),
        Arc::clone(&store),
        config.tx_manager_config(),
    ));
    let (runner, work) = JobRunner::new(
        store,
        AdapterRegistry::standard(),
        tx_manager,
        TopicRegistry::standard(),
        config.minimum_contract_payment,
    );
    Ok((runner, work, client))
}
