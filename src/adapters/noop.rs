use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Adapter, AdapterContext};
use crate::error::AdapterError;
use crate::state_machine::RunResult;

/// Passes its input through unchanged.
pub struct NoOp;

impl NoOp {
    pub fn factory(_params: &Map<String, Value>) -> Result<Box<dyn Adapter>, AdapterError> {
        Ok(Box::new(NoOp))
    }
}

#[async_trait]
impl Adapter for NoOp {
    async fn perform(&self, input: RunResult, _ctx: &AdapterContext) -> RunResult {
        input
    }
}
