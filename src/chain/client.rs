use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, keccak256};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::error::ChainError;
use super::types::{FilterQuery, Log, SignedTx, TxReceipt, TxRequest};

/// The chain capabilities the engine consumes.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Pending transaction count of `account`, i.e. the next free nonce.
    async fn transaction_count(&self, account: Address) -> Result<u64, ChainError>;

    async fn sign_transaction(&self, tx: &TxRequest) -> Result<SignedTx, ChainError>;

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError>;

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, ChainError>;

    async fn logs(&self, filter: &FilterQuery) -> Result<Vec<Log>, ChainError>;
}

pub struct HttpChainClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpChainClient {
    pub fn new(url: String) -> Result<Self, ChainError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ChainError::Rpc {
                code: i64::from(status.as_u16()),
                message,
            });
        }

        let envelope = response.json::<RpcResponse>().await?;
        if let Some(err) = envelope.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        serde_json::from_value(envelope.result.unwrap_or(Value::Null))
            .map_err(|e| ChainError::Malformed(format!("{method}: {e}")))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
    }

    async fn transaction_count(&self, account: Address) -> Result<u64, ChainError> {
        let raw: String = self
            .call("eth_getTransactionCount", json!([account, "pending"]))
            .await?;
        parse_quantity(&raw)
    }

    async fn sign_transaction(&self, tx: &TxRequest) -> Result<SignedTx, ChainError> {
        let params = json!([{
            "from": tx.from,
            "to": tx.to,
            "data": tx.data,
            "nonce": format!("{:#x}", tx.nonce),
            "gasPrice": tx.gas_price,
            "gas": format!("{:#x}", tx.gas_limit),
        }]);
        let signed: RpcSignedTx = self.call("eth_signTransaction", params).await?;
        let hash = keccak256(&signed.raw);
        Ok(SignedTx {
            raw: signed.raw,
            hash,
        })
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError> {
        self.call("eth_sendRawTransaction", json!([raw])).await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?;
        receipt.map(RpcReceipt::into_receipt).transpose()
    }

    async fn logs(&self, filter: &FilterQuery) -> Result<Vec<Log>, ChainError> {
        let mut params = json!({
            "fromBlock": format!("{:#x}", filter.from_block),
            "address": filter.addresses,
            "topics": filter.topics,
        });
        if let Some(to) = filter.to_block {
            params["toBlock"] = json!(format!("{to:#x}"));
        }
        let logs: Vec<RpcLog> = self.call("eth_getLogs", json!([params])).await?;
        logs.into_iter()
            .filter(|l| !l.removed)
            .map(RpcLog::into_log)
            .collect()
    }
}

pub fn parse_quantity(raw: &str) -> Result<u64, ChainError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::Malformed(format!("quantity without 0x prefix: {raw}")))?;
    if digits.is_empty() {
        return Err(ChainError::Malformed("empty quantity".into()));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Malformed(format!("invalid quantity {raw}: {e}")))
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcSignedTx {
    raw: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: String,
    block_hash: B256,
    transaction_hash: B256,
    log_index: String,
    #[serde(default)]
    removed: bool,
}

impl RpcLog {
    fn into_log(self) -> Result<Log, ChainError> {
        Ok(Log {
            address: self.address,
            block_number: parse_quantity(&self.block_number)?,
            block_hash: self.block_hash,
            transaction_hash: self.transaction_hash,
            log_index: parse_quantity(&self.log_index)?,
            topics: self.topics,
            data: self.data,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: Option<String>,
    block_hash: Option<B256>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

impl RpcReceipt {
    fn into_receipt(self) -> Result<TxReceipt, ChainError> {
        Ok(TxReceipt {
            hash: self.transaction_hash,
            block_number: self.block_number.as_deref().map(parse_quantity).transpose()?,
            block_hash: self.block_hash,
            status: self.status.as_deref().map(parse_quantity).transpose()?,
            logs: self
                .logs
                .into_iter()
                .map(RpcLog::into_log)
                .collect::<Result<_, _>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> HttpChainClient {
        HttpChainClient::new(server.uri()).unwrap()
    }

    #[test]
    fn parse_quantity_accepts_hex() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert!(parse_quantity("1b4").is_err());
        assert!(parse_quantity("0x").is_err());
    }

    #[tokio::test]
    async fn block_number_decodes_quantity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.block_number().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn rpc_error_object_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32000, "message": "nonce too low"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .send_raw_transaction(&Bytes::from(vec![0x01]))
            .await
            .unwrap_err();
        match err {
            ChainError::Rpc { code, message } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "nonce too low");
            }
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_receipt_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": null})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let receipt = client.transaction_receipt(B256::ZERO).await.unwrap();
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn mined_receipt_is_decoded() {
        let server = MockServer::start().await;
        let hash = B256::repeat_byte(0xab);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "transactionHash": hash,
                    "blockNumber": "0x2a",
                    "blockHash": B256::repeat_byte(0x01),
                    "status": "0x1",
                    "logs": []
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let receipt = client.transaction_receipt(hash).await.unwrap().unwrap();
        assert_eq!(receipt.hash, hash);
        assert_eq!(receipt.block_number, Some(42));
        assert_eq!(receipt.status, Some(1));
    }

    #[tokio::test]
    async fn removed_logs_are_skipped() {
        let server = MockServer::start().await;
        let entry = |removed: bool| {
            json!({
                "address": Address::repeat_byte(0x22),
                "topics": [B256::repeat_byte(0x01)],
                "data": "0x",
                "blockNumber": "0x5",
                "blockHash": B256::repeat_byte(0x02),
                "transactionHash": B256::repeat_byte(0x03),
                "logIndex": "0x0",
                "removed": removed
            })
        };
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getLogs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": [entry(false), entry(true)]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let filter = FilterQuery {
            from_block: 5,
            to_block: Some(5),
            addresses: vec![Address::repeat_byte(0x22)],
            topics: vec![],
        };
        let logs = client.logs(&filter).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, 5);
    }

    #[tokio::test]
    async fn signed_transaction_hash_is_keccak_of_raw() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_signTransaction"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"raw": "0xf86c0a", "tx": {}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let tx = TxRequest {
            from: Address::ZERO,
            to: Address::repeat_byte(0x01),
            data: Bytes::new(),
            nonce: 10,
            gas_price: alloy_primitives::U256::from(1u64),
            gas_limit: 21_000,
        };
        let signed = client.sign_transaction(&tx).await.unwrap();
        assert_eq!(signed.raw, Bytes::from(vec![0xf8, 0x6c, 0x0a]));
        assert_eq!(signed.hash, keccak256([0xf8u8, 0x6c, 0x0a]));
    }
}
