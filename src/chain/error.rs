//! Tipos de erro para o cliente JSON-RPC da blockchain.
//!
//! Define [`ChainError`] com variantes para erros retornados pelo nó,
//! falhas de rede e respostas malformadas. Usa `thiserror` para derivar
//! `Display` e `Error`.

use thiserror::Error;

/// Erros que podem ocorrer ao falar com o nó da blockchain.
///
/// Para o gerenciador de transações todos são transitórios durante o
/// acompanhamento de confirmações; só falhas na criação de uma transação
/// chegam ao run como erro.
#[derive(Debug, Error)]
pub enum ChainError {
    /// O nó respondeu com um objeto `error` do JSON-RPC.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A resposta não tinha o formato esperado.
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_display() {
        let err = ChainError::Rpc {
            code: -32000,
            message: "insufficient funds for gas * price + value".into(),
        };
        assert_eq!(
            err.to_string(),
            "rpc error -32000: insufficient funds for gas * price + value"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChainError>();
    }
}
