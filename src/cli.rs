//! Interface de linha de comando do agentdrain baseada em clap.
//!
//! Define a struct [`Cli`] com os subcomandos [`Command`] (remediate, drain)
//! e as flags globais (--config, --verbose, --json).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// agentdrain: auditoria e reconciliação de jobs presos antes de aposentar um agente.
#[derive(Debug, Parser)]
#[command(name = "agentdrain", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração (padrão: ./agentdrain.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita logs de depuração em stderr.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Imprime o resultado em JSON em vez de texto.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reconcilia jobs presos em `executing` com o HTCondor e o ReqMgr.
    Remediate {
        /// Idade mínima, em dias, de um job preso (padrão da configuração).
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        age_days: Option<u32>,

        /// Decide tudo, mas não pergunta nem escreve nada.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Relatório de prontidão para desligar o agente (somente leitura).
    Drain {
        /// Envolve a saída em `<pre>` para colar numa página twiki.
        #[arg(long, short, default_value_t = false)]
        twiki: bool,
    },
}
