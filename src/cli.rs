//! Interface de linha de comando do nó baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (node, add-job,
//! trigger, cancel, status) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Nó de oráculo: atende requisições on-chain e entrega os resultados em transações.
#[derive(Debug, Parser)]
#[command(name = "oracle-node", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração TOML.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (nível `debug`).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia o loop de eventos: acompanha a chain e executa os runs.
    Node,

    /// Registra um job a partir de um arquivo JSON.
    AddJob {
        /// Arquivo JSON com a definição do job.
        file: PathBuf,
    },

    /// Cria um run para um job com iniciador `web`.
    Trigger {
        /// Id do job.
        job_id: String,

        /// Dados iniciais do run, como objeto JSON.
        #[arg(long)]
        data: Option<String>,
    },

    /// Pede o cancelamento de um run.
    Cancel {
        /// Id do run.
        run_id: String,
    },

    /// Lista os runs e seus status.
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_trigger_with_data() {
        let cli = Cli::parse_from([
            "oracle-node",
            "trigger",
            "4c7b7ffb66b344fbaa64995af81e355a",
            "--data",
            r#"{"value":"0x01"}"#,
        ]);
        match cli.command {
            Command::Trigger { job_id, data } => {
                assert_eq!(job_id, "4c7b7ffb66b344fbaa64995af81e355a");
                assert_eq!(data.as_deref(), Some(r#"{"value":"0x01"}"#));
            }
            _ => panic!("expected Trigger command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["oracle-node", "--config", "alt.toml", "--verbose", "status"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn cli_parses_add_job() {
        let cli = Cli::parse_from(["oracle-node", "add-job", "job.json"]);
        match cli.command {
            Command::AddJob { file } => assert_eq!(file, PathBuf::from("job.json")),
            _ => panic!("expected AddJob command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
