//! Task adapters: one pipeline step each, behind a single `perform` entry point.
//!
//! Adapters are built per invocation from the task's params merged with the
//! run's accumulated data, so a request can override static job params.

mod eth_tx;
mod noop;
mod sleep;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AdapterError;
use crate::state_machine::RunResult;
use crate::tx_manager::TxManager;

pub use eth_tx::EthTx;
#[cfg(test)]
pub use eth_tx::{LATEST_TX_HASH_KEY, RECEIPTS_KEY};
pub use noop::NoOp;
pub use sleep::Sleep;

/// Services and facts an adapter may consult while performing.
pub struct AdapterContext {
    pub run_id: String,
    /// Position of the task being performed within its run.
    pub task_index: usize,
    /// Set when the run was cancelled after it started.
    pub cancelled: bool,
    pub now: DateTime<Utc>,
    pub tx_manager: Arc<TxManager>,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Consume the current result and return the next one. Failures are
    /// reported through an `Errored` result, never by panicking.
    async fn perform(&self, input: RunResult, ctx: &AdapterContext) -> RunResult;
}

pub type AdapterFactory = fn(&Map<String, Value>) -> Result<Box<dyn Adapter>, AdapterError>;

/// Maps task type names to adapter constructors.
pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in adapters.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("noop", NoOp::factory);
        registry.register("sleep", Sleep::factory);
        registry.register("ethtx", EthTx::factory);
        registry
    }

    /// Task type names are case-insensitive.
    pub fn register(&mut self, kind: &str, factory: AdapterFactory) {
        self.factories.insert(kind.to_lowercase(), factory);
    }

    pub fn build(
        &self,
        kind: &str,
        params: &Map<String, Value>,
    ) -> Result<Box<dyn Adapter>, AdapterError> {
        let factory = self
            .factories
            .get(&kind.to_lowercase())
            .ok_or_else(|| AdapterError::UnknownTaskType(kind.to_string()))?;
        factory(params)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_lowercase())
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Shallow merge; keys in `data` win over the task's static params.
pub fn merge_params(params: &Map<String, Value>, data: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = params.clone();
    for (key, value) in data {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn from_params<T: DeserializeOwned>(
    adapter: &'static str,
    params: &Map<String, Value>,
) -> Result<T, AdapterError> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| AdapterError::InvalidParams {
        adapter,
        reason: e.to_string(),
    })
}
