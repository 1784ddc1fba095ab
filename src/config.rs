//! Configuração do nó carregada a partir de `oracle-node.toml`.
//!
//! A struct [`NodeConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `ETH_URL`, `ETH_ACCOUNT` e `LOG_LEVEL` têm
//! precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::tx_manager::TxManagerConfig;

/// Caminho padrão do arquivo de configuração.
pub const DEFAULT_CONFIG_PATH: &str = "oracle-node.toml";

const GWEI: u64 = 1_000_000_000;

/// Configuração de nível superior carregada de `oracle-node.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Endpoint JSON-RPC do nó Ethereum.
    pub eth_url: String,

    /// Conta do nó, usada como `from` nas transações.
    pub account_address: Address,

    /// Profundidade de confirmação exigida antes de considerar uma transação segura.
    pub min_outgoing_confirmations: u64,

    /// Blocos que uma tentativa pode ficar sem ser minerada antes do bump de gas.
    pub eth_gas_bump_threshold: u64,

    /// Incremento fixo de gas price, em wei.
    pub eth_gas_bump_wei: U256,

    /// Incremento percentual de gas price; vale o maior dos dois.
    pub eth_gas_bump_percent: u64,

    /// Gas price quando a tarefa não especifica `gasPrice`.
    pub eth_gas_price_default: U256,

    /// Gas limit quando a tarefa não especifica `gasLimit`.
    pub eth_gas_limit_default: u64,

    /// Teto para o gas price após bumps.
    pub eth_max_gas_price_wei: U256,

    /// Pagamento mínimo aceito em requisições de RunLog.
    pub minimum_contract_payment: U256,

    /// Intervalo de consulta do head da chain, em milissegundos.
    pub poll_interval_ms: u64,

    /// Arquivo JSON do store.
    pub store_path: PathBuf,

    /// Filtro de logs do `tracing` (ex.: `info`, `oracle_node=debug`).
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            eth_url: "http://localhost:8545".to_string(),
            account_address: Address::ZERO,
            min_outgoing_confirmations: 12,
            eth_gas_bump_threshold: 12,
            eth_gas_bump_wei: U256::from(5 * GWEI),
            eth_gas_bump_percent: 20,
            eth_gas_price_default: U256::from(20 * GWEI),
            eth_gas_limit_default: 500_000,
            eth_max_gas_price_wei: U256::from(5_000 * GWEI),
            minimum_contract_payment: U256::from(1_000_000_000_000_000_000u64),
            poll_interval_ms: 4_000,
            store_path: PathBuf::from("oracle-node-store.json"),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Carrega a configuração de `oracle-node.toml` no diretório atual.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Carrega a configuração de `path`, usando valores padrão se o arquivo
    /// não existir, e aplica as variáveis de ambiente.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<NodeConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("ETH_URL")
            && !url.is_empty()
        {
            self.eth_url = url;
        }
        if let Some(account) = var("ETH_ACCOUNT")
            && !account.is_empty()
        {
            self.account_address = Address::from_str(&account)
                .with_context(|| format!("ETH_ACCOUNT {account:?} is not an address"))?;
        }
        if let Some(level) = var("LOG_LEVEL")
            && !level.is_empty()
        {
            self.log_level = level;
        }
        Ok(())
    }

    /// Parâmetros do gerenciador de transações derivados desta configuração.
    pub fn tx_manager_config(&self) -> TxManagerConfig {
        TxManagerConfig {
            from: self.account_address,
            min_confirmations: self.min_outgoing_confirmations,
            gas_bump_threshold: self.eth_gas_bump_threshold,
            gas_bump_wei: self.eth_gas_bump_wei,
            gas_bump_percent: self.eth_gas_bump_percent,
            gas_price_default: self.eth_gas_price_default,
            gas_limit_default: self.eth_gas_limit_default,
            max_gas_price: self.eth_max_gas_price_wei,
        }
    }
}
