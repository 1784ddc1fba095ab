pub mod client;
pub mod error;
pub mod types;

pub use client::{ChainClient, HttpChainClient};
pub use error::ChainError;
pub use types::{FilterQuery, Log, SignedTx, TxReceipt, TxRequest};
