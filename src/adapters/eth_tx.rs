use std::str::FromStr;

use alloy_primitives::{Address, B256, Bytes, FixedBytes, I256, U256, hex, keccak256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{Adapter, AdapterContext, from_params};
use crate::chain::TxReceipt;
use crate::error::AdapterError;
use crate::state_machine::RunResult;
use crate::tx_manager::TxManagerError;

/// Data key holding the hash of the transaction this run has broadcast.
pub const LATEST_TX_HASH_KEY: &str = "latestOutgoingTxHash";
/// Data key accumulating every confirmed receipt of the run.
pub const RECEIPTS_KEY: &str = "ethereumReceipts";

const WORD: usize = 32;

/// How the run's `value` is encoded after the selector and prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// Hex string placed right-aligned in one word.
    Raw,
    /// Dynamic `bytes`: offset word, length word, padded content.
    Bytes,
    Uint256,
    Int256,
    Bool,
}

impl DataFormat {
    fn parse(format: Option<&str>) -> Result<Self, AdapterError> {
        match format.map(str::to_lowercase).as_deref() {
            None | Some("") => Ok(DataFormat::Raw),
            Some("bytes") => Ok(DataFormat::Bytes),
            Some("uint256") => Ok(DataFormat::Uint256),
            Some("int256") => Ok(DataFormat::Int256),
            Some("bool") => Ok(DataFormat::Bool),
            Some(other) => Err(invalid(format!("unsupported format {other:?}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EthTxParams {
    address: Address,
    function_selector: String,
    #[serde(default)]
    data_prefix: Option<Bytes>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    gas_price: Option<Value>,
    #[serde(default)]
    gas_limit: Option<Value>,
}

/// Writes the run's value to a contract and tracks the transaction to a safe depth.
#[derive(Debug, Clone, PartialEq)]
pub struct EthTx {
    pub address: Address,
    pub function_selector: FixedBytes<4>,
    pub data_prefix: Bytes,
    pub format: DataFormat,
    pub gas_price: Option<U256>,
    pub gas_limit: Option<u64>,
}

impl EthTx {
    pub fn factory(params: &Map<String, Value>) -> Result<Box<dyn Adapter>, AdapterError> {
        Ok(Box::new(Self::from_params(params)?))
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self, AdapterError> {
        let raw: EthTxParams = from_params("ethtx", params)?;
        Ok(Self {
            address: raw.address,
            function_selector: parse_selector(&raw.function_selector)?,
            data_prefix: raw.data_prefix.unwrap_or_default(),
            format: DataFormat::parse(raw.format.as_deref())?,
            gas_price: raw.gas_price.as_ref().map(parse_u256).transpose()?,
            gas_limit: raw
                .gas_limit
                .as_ref()
                .map(|v| {
                    parse_u256(v)?
                        .try_into()
                        .map_err(|_| invalid("gasLimit does not fit in 64 bits".into()))
                })
                .transpose()?,
        })
    }

    /// `selector ++ dataPrefix ++ encoded value`.
    pub fn call_data(&self, input: &RunResult) -> Result<Bytes, AdapterError> {
        let payload = self.encode_value(input)?;
        let mut data = Vec::with_capacity(4 + self.data_prefix.len() + payload.len());
        data.extend_from_slice(self.function_selector.as_slice());
        data.extend_from_slice(&self.data_prefix);
        data.extend_from_slice(&payload);
        Ok(data.into())
    }

    fn encode_value(&self, input: &RunResult) -> Result<Vec<u8>, AdapterError> {
        let value = input
            .get("value")
            .ok_or_else(|| AdapterError::Encoding("run has no value to write".into()))?;

        match self.format {
            DataFormat::Raw => {
                let text = scalar_text(value)?;
                Ok(hex_to_word(&text)?.to_vec())
            }
            DataFormat::Bytes => {
                let content = match value {
                    Value::String(s) => s.as_bytes().to_vec(),
                    other => other.to_string().into_bytes(),
                };
                // Offset of the dynamic argument, counted from the first word after the selector.
                let offset = U256::from(WORD + self.data_prefix.len());
                let mut out = Vec::with_capacity(2 * WORD + content.len() + WORD);
                out.extend_from_slice(&offset.to_be_bytes::<32>());
                out.extend_from_slice(&U256::from(content.len()).to_be_bytes::<32>());
                out.extend_from_slice(&content);
                let padding = (WORD - content.len() % WORD) % WORD;
                out.resize(out.len() + padding, 0);
                Ok(out)
            }
            DataFormat::Uint256 => Ok(parse_u256(value)
                .map_err(|e| AdapterError::Encoding(e.to_string()))?
                .to_be_bytes::<32>()
                .to_vec()),
            DataFormat::Int256 => {
                let text = scalar_text(value)?;
                let n = I256::from_dec_str(&text)
                    .map_err(|e| AdapterError::Encoding(format!("int256 {text:?}: {e}")))?;
                Ok(n.to_be_bytes::<32>().to_vec())
            }
            DataFormat::Bool => {
                let flag = match value {
                    Value::Bool(b) => *b,
                    Value::String(s) if s == "true" => true,
                    Value::String(s) if s == "false" => false,
                    other => return Err(AdapterError::Encoding(format!("not a bool: {other}"))),
                };
                Ok(U256::from(u8::from(flag)).to_be_bytes::<32>().to_vec())
            }
        }
    }

    async fn create(&self, input: RunResult, ctx: &AdapterContext) -> RunResult {
        let data = match self.call_data(&input) {
            Ok(data) => data,
            Err(err) => return input.with_error(err),
        };
        let config = ctx.tx_manager.config();
        let gas_price = self.gas_price.unwrap_or(config.gas_price_default);
        let gas_limit = self.gas_limit.unwrap_or(config.gas_limit_default);

        let tx_id = format!("{}-{}", ctx.run_id, ctx.task_index);
        let attempt = match ctx
            .tx_manager
            .create_transaction(&tx_id, self.address, data, gas_price, gas_limit)
            .await
        {
            Ok(attempt) => attempt,
            Err(err) => return input.with_error(AdapterError::Submission(err)),
        };

        let hash = hex::encode_prefixed(attempt.hash);
        info!(run = %ctx.run_id, tx_hash = %hash, nonce = attempt.nonce, "broadcast fulfillment transaction");
        let input = input
            .with_value(hash.clone())
            .add(LATEST_TX_HASH_KEY, hash);
        ensure(input, attempt.hash, ctx).await
    }
}

#[async_trait]
impl Adapter for EthTx {
    async fn perform(&self, input: RunResult, ctx: &AdapterContext) -> RunResult {
        let in_flight = match tracked_hash(&input) {
            Ok(hash) => hash,
            Err(err) => return input.with_error(err),
        };

        // A broadcast transaction can't be recalled, so only an unsent one is abandoned.
        if ctx.cancelled && in_flight.is_none() {
            return input.with_error(AdapterError::Cancelled);
        }
        if !ctx.tx_manager.connected() {
            return input.mark_pending_connection();
        }

        match in_flight {
            None => self.create(input, ctx).await,
            Some(hash) => ensure(input, hash, ctx).await,
        }
    }
}

async fn ensure(input: RunResult, hash: B256, ctx: &AdapterContext) -> RunResult {
    match ctx.tx_manager.bump_gas_until_safe(hash).await {
        Ok(Some(receipt)) => add_receipt(input, receipt).completed(),
        Ok(None) => input.mark_pending_confirmations(),
        Err(err @ TxManagerError::UnknownTransaction(_)) => {
            input.with_error(AdapterError::Submission(err))
        }
        Err(err) => {
            warn!(run = %ctx.run_id, error = %err, "confirmation check failed, will retry");
            input.mark_pending_confirmations()
        }
    }
}

fn add_receipt(mut input: RunResult, receipt: TxReceipt) -> RunResult {
    input.data.remove(LATEST_TX_HASH_KEY);
    let mut receipts = match input.get(RECEIPTS_KEY) {
        Some(Value::Array(existing)) => existing.clone(),
        _ => Vec::new(),
    };
    match serde_json::to_value(&receipt) {
        Ok(encoded) => receipts.push(encoded),
        Err(err) => warn!(error = %err, "could not encode receipt"),
    }
    input
        .add(RECEIPTS_KEY, receipts)
        .with_value(hex::encode_prefixed(receipt.hash))
}

fn tracked_hash(input: &RunResult) -> Result<Option<B256>, AdapterError> {
    match input.get(LATEST_TX_HASH_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => B256::from_str(s)
            .map(Some)
            .map_err(|e| invalid(format!("{LATEST_TX_HASH_KEY} {s:?}: {e}"))),
        Some(other) => Err(invalid(format!("{LATEST_TX_HASH_KEY} is not a string: {other}"))),
    }
}

/// Accepts a 4-byte hex selector or a canonical signature such as `fulfill(uint256,bytes32)`.
pub fn parse_selector(raw: &str) -> Result<FixedBytes<4>, AdapterError> {
    let raw = raw.trim();
    if raw.contains('(') {
        let hash = keccak256(raw.as_bytes());
        return Ok(FixedBytes::from_slice(&hash[..4]));
    }
    let bytes = hex::decode(raw).map_err(|e| invalid(format!("functionSelector {raw:?}: {e}")))?;
    if bytes.len() != 4 {
        return Err(invalid(format!(
            "functionSelector must be 4 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(FixedBytes::from_slice(&bytes))
}

fn parse_u256(value: &Value) -> Result<U256, AdapterError> {
    let text = scalar_text(value)?;
    U256::from_str(text.trim()).map_err(|e| invalid(format!("{text:?} is not a 256-bit integer: {e}")))
}

fn scalar_text(value: &Value) -> Result<String, AdapterError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(AdapterError::Encoding(format!("expected a scalar, got {other}"))),
    }
}

/// Right-aligns a hex string in one word, keeping the low 32 bytes of longer input.
fn hex_to_word(text: &str) -> Result<[u8; 32], AdapterError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    let digits = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    let bytes =
        hex::decode(&digits).map_err(|e| AdapterError::Encoding(format!("{text:?}: {e}")))?;
    let mut word = [0u8; 32];
    let tail = &bytes[bytes.len().saturating_sub(WORD)..];
    word[WORD - tail.len()..].copy_from_slice(tail);
    Ok(word)
}

fn invalid(reason: String) -> AdapterError {
    AdapterError::InvalidParams {
        adapter: "ethtx",
        reason,
    }
}
