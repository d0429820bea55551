mod cli;
mod config;
mod error;
mod fallback;
mod logging;
mod orchestrator;
mod probe;
mod provision;
mod registry;
mod relay;
mod server;
mod service;
mod staging;
mod state_machine;
mod ui;
mod youtube;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use config::RelayConfig;
use service::{RelayService, StartRequest};
use ui::RelayProgress;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose).context("failed to initialize logging")?;

    let mut config = RelayConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(ffmpeg) = cli.ffmpeg {
        config.ffmpeg_bin = ffmpeg;
    }

    match cli.command {
        Command::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| config.listen.clone());
            let service = RelayService::from_config(&config)
                .await
                .context("failed to start relay service")?;
            server::serve(Arc::new(service), &listen)
                .await
                .with_context(|| format!("server on {listen} failed"))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            sources,
            title,
            destination,
        } => {
            let request = StartRequest {
                sources,
                title,
                destination,
            };
            let relayed = run_foreground(&config, request).await?;
            Ok(if relayed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Relay one job with a terminal spinner. Ctrl+C cancels the job and waits
/// for its cleanup. Returns whether at least one source was relayed.
async fn run_foreground(config: &RelayConfig, request: StartRequest) -> anyhow::Result<bool> {
    let service = RelayService::from_config(config)
        .await
        .context("failed to start relay service")?;
    let progress = RelayProgress::start(request.title.as_deref().unwrap_or("untitled"));

    let response = match service.start(request).await {
        Ok(response) => response,
        Err(e) => {
            progress.abandon();
            return Err(e).context("job was not started");
        }
    };
    progress.admitted(&response);

    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;

    let snapshot = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c, if !cancelling => {
                cancelling = true;
                progress.note("Cancelling, waiting for cleanup...");
                service.cancel(Some(&response.job_id))?;
            }
        }

        let snapshot = service
            .status(Some(&response.job_id))?
            .pop()
            .context("job vanished from the registry")?;
        progress.update(&snapshot);
        if snapshot.is_terminal() {
            break snapshot;
        }
    };

    progress.finish(&snapshot);
    progress.print_snapshot(&snapshot);
    Ok(snapshot.successes > 0)
}
