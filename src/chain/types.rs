//! Tipos de dados trocados com o nó da blockchain.
//!
//! As structs aqui são a representação interna (já decodificada) dos logs,
//! recibos e transações. A conversão a partir do formato JSON-RPC, que usa
//! quantidades em hexadecimal, fica em [`client`](super::client).

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Um log emitido por um contrato e entregue pela assinatura de logs.
///
/// Imutável: a fonte da verdade é a própria chain. O mesmo log pode ser
/// entregue mais de uma vez.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    /// Endereço do contrato que emitiu o log.
    pub address: Address,
    /// Número do bloco em que o log foi incluído.
    pub block_number: u64,
    /// Hash do bloco em que o log foi incluído.
    pub block_hash: B256,
    /// Hash da transação que emitiu o log.
    pub transaction_hash: B256,
    /// Posição do log dentro do bloco.
    pub log_index: u64,
    /// Tópicos indexados; `topics[0]` é a assinatura do evento.
    pub topics: Vec<B256>,
    /// Payload não indexado, codificado em ABI.
    pub data: Bytes,
}

impl Log {
    /// Retorna o tópico na posição `index`, se existir.
    pub fn topic(&self, index: usize) -> Option<B256> {
        self.topics.get(index).copied()
    }
}

/// Recibo de uma transação minerada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    /// Hash da tentativa que foi minerada.
    pub hash: B256,
    /// Bloco em que a transação foi incluída; `None` enquanto pendente.
    pub block_number: Option<u64>,
    /// Hash do bloco de inclusão.
    pub block_hash: Option<B256>,
    /// Status de execução (1 = sucesso, 0 = revertida).
    pub status: Option<u64>,
    /// Logs emitidos pela transação.
    #[serde(default)]
    pub logs: Vec<Log>,
}

impl TxReceipt {
    /// Um recibo só conta como minerado quando tem número de bloco.
    pub fn is_mined(&self) -> bool {
        self.block_number.is_some()
    }
}

/// Filtro para `eth_getLogs`.
///
/// `topics` segue a semântica do nó: posições são combinadas com AND e as
/// alternativas dentro de cada posição com OR. Uma posição vazia aceita
/// qualquer valor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQuery {
    pub from_block: u64,
    pub to_block: Option<u64>,
    pub addresses: Vec<Address>,
    pub topics: Vec<Vec<B256>>,
}

impl FilterQuery {
    /// Verifica localmente se um log satisfaz este filtro.
    #[cfg(test)]
    pub fn matches(&self, log: &Log) -> bool {
        if log.block_number < self.from_block {
            return false;
        }
        if self.to_block.is_some_and(|to| log.block_number > to) {
            return false;
        }
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, options)| {
            options.is_empty() || log.topic(i).is_some_and(|t| options.contains(&t))
        })
    }
}

/// Parâmetros de uma transação a ser assinada pelo nó.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
}

/// Transação assinada, pronta para broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    /// Payload RLP assinado.
    pub raw: Bytes,
    /// Hash da transação assinada.
    pub hash: B256,
}
