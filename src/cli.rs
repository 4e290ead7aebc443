//! Interface de linha de comando do ecoroute baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (summarize, query,
//! documents, stats) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ecoroute::Strategy;

/// ecoroute: sumarização de documentos consciente do carbono.
#[derive(Debug, Parser)]
#[command(name = "ecoroute", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração TOML (padrão: ./ecoroute.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Estratégia aceita pela CLI, mapeada para [`Strategy`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Menor pegada de carbono; nunca usa o tier grande.
    Eco,
    /// Equilíbrio entre custo e qualidade, guiado pela intensidade da rede.
    Balanced,
    /// Sempre usa o tier grande; maior qualidade e maior custo.
    Quality,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Eco => Strategy::Eco,
            StrategyArg::Balanced => Strategy::Balanced,
            StrategyArg::Quality => Strategy::Quality,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sumariza um documento e imprime o relatório de carbono.
    Summarize {
        /// Caminho do documento (.txt ou .md).
        file: PathBuf,

        /// Estratégia de roteamento entre tiers.
        #[arg(long, value_enum, default_value_t = StrategyArg::Balanced)]
        strategy: StrategyArg,

        /// Localização de computação usada para ler a intensidade da rede.
        #[arg(long)]
        location: Option<String>,
    },

    /// Faz uma pergunta sobre um documento já processado.
    Query {
        /// Identificador do documento retornado por `summarize`.
        document_id: String,

        /// Pergunta em linguagem natural.
        question: String,
    },

    /// Lista os documentos processados, do mais recente ao mais antigo.
    Documents,

    /// Mostra estatísticas agregadas de carbono economizado.
    Stats,
}
