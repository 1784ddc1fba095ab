//! Saída de terminal do nó com cores.
//!
//! Usa a crate `console` para estilizar o status de cada run: verde para
//! concluído, vermelho para erro e amarelo para runs suspensos.

use console::Style;

use crate::state_machine::{RunStatus, RunSummary};

/// Formata resumos de runs para o terminal.
pub struct RunPrinter {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Default for RunPrinter {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl RunPrinter {
    // Estilo correspondente ao status do run.
    fn style_for(&self, status: RunStatus) -> &Style {
        match status {
            RunStatus::Completed => &self.green,
            RunStatus::Errored => &self.red,
            RunStatus::Unstarted | RunStatus::InProgress => &self.dim,
            _ => &self.yellow,
        }
    }

    /// Uma linha por run: id, job, status, tarefas concluídas e erro, se houver.
    pub fn line(&self, summary: &RunSummary) -> String {
        let mut line = format!(
            "{}  {}  {:<22} {}/{}",
            summary.run_id,
            self.dim.apply_to(&summary.job_id),
            self.style_for(summary.status).apply_to(summary.status),
            summary.tasks_completed,
            summary.tasks_total,
        );
        if let Some(err) = &summary.error {
            line.push_str(&format!("  {}", self.red.apply_to(err)));
        }
        line
    }

    /// Imprime todos os runs, ou um aviso se não houver nenhum.
    pub fn print_runs(&self, summaries: &[RunSummary]) {
        if summaries.is_empty() {
            println!("{}", self.dim.apply_to("no runs"));
            return;
        }
        for summary in summaries {
            println!("{}", self.line(summary));
        }
    }

    /// Imprime o resumo de um run em JSON.
    pub fn print_summary(&self, summary: &RunSummary) {
        println!("{}", self.style_for(summary.status).apply_to("─── Run ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
    }
}
