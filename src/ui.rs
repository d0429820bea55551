//! Interface de terminal do streamrelay: spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner de progresso e `console` para as cores.
//! O [`RelayProgress`] acompanha um job do comando `run`.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::service::StartResponse;
use crate::state_machine::{JobSnapshot, State, Termination};

/// Indicador visual de progresso para um job em primeiro plano.
pub struct RelayProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RelayProgress {
    /// Inicia o spinner com o título da transmissão.
    pub fn start(title: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("VALIDATING: {title}"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Mostra o destino e as fontes rejeitadas na admissão.
    pub fn admitted(&self, response: &StartResponse) {
        self.pb.println(format!(
            "  Job {} -> {} ({})",
            response.job_id, response.destination.ingest, response.destination.name
        ));
        for rejected in &response.rejected {
            self.pb.println(format!(
                "  {} Skipping {} ({:?})",
                self.yellow.apply_to("!"),
                rejected.uri,
                rejected.reason
            ));
        }
    }

    /// Atualiza a mensagem do spinner a partir do snapshot atual.
    pub fn update(&self, snapshot: &JobSnapshot) {
        let position = format!(
            "source {}/{}",
            (snapshot.current_source_index + 1).min(snapshot.source_count),
            snapshot.source_count
        );
        let message = match (&snapshot.state, &snapshot.progress) {
            (State::Relaying { .. }, Some(timemark)) => {
                format!("{} {position} at {timemark}", snapshot.state)
            }
            _ => format!("{} {position}", snapshot.state),
        };
        self.pb.set_message(message);
    }

    pub fn note(&self, message: &str) {
        self.pb.println(format!("  {} {message}", self.yellow.apply_to("↻")));
    }

    /// Para o spinner sem imprimir resultado (ex.: falha antes da admissão).
    pub fn abandon(&self) {
        self.pb.finish_and_clear();
    }

    /// Finaliza o spinner e exibe o resultado do job.
    pub fn finish(&self, snapshot: &JobSnapshot) {
        self.pb.finish_and_clear();
        let State::Terminated { how } = snapshot.state else {
            return;
        };
        match how {
            Termination::Completed if snapshot.successes > 0 => println!(
                "  {} Relayed {}/{} sources",
                self.green.apply_to("✓"),
                snapshot.successes,
                snapshot.source_count
            ),
            Termination::Completed => println!(
                "  {} No source could be relayed",
                self.red.apply_to("✗")
            ),
            Termination::Cancelled => println!("  {} Cancelled", self.yellow.apply_to("■")),
            Termination::Abandoned => println!(
                "  {} Job abandoned: {}",
                self.red.apply_to("✗"),
                snapshot.last_error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    /// Imprime o snapshot final formatado em JSON.
    pub fn print_snapshot(&self, snapshot: &JobSnapshot) {
        println!(
            "{}",
            serde_json::to_string_pretty(snapshot).unwrap_or_default()
        );
    }
}
