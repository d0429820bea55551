//! Interface de linha de comando do streamrelay baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, run)
//! e flags globais (--config, --ffmpeg, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_FILE;

/// streamrelay: retransmite uma lista ordenada de vídeos remotos para um destino ao vivo.
#[derive(Debug, Parser)]
#[command(name = "streamrelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração TOML.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Binário do ffmpeg (sobrescreve `ffmpeg_bin` e `FFMPEG_BIN`).
    #[arg(long, global = true)]
    pub ffmpeg: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sobe o serviço HTTP até receber Ctrl+C ou SIGTERM.
    Serve {
        /// Endereço de escuta (ex.: 0.0.0.0:8080).
        #[arg(long)]
        listen: Option<String>,
    },

    /// Retransmite as fontes em primeiro plano e imprime o snapshot final.
    Run {
        /// URLs http(s) das fontes, na ordem de transmissão.
        #[arg(required = true)]
        sources: Vec<String>,

        /// Título da transmissão.
        #[arg(long)]
        title: Option<String>,

        /// Nome do destino ("rtmp" ou "youtube"); usa o padrão da configuração se omitido.
        #[arg(long)]
        destination: Option<String>,
    },
}
