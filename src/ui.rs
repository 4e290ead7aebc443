//! Interface de terminal do ecoroute: spinners e saída colorida.
//!
//! Usa `indicatif` para o spinner de progresso do job e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! a execução de um job no terminal.

use std::time::Duration;

use console::Style;
use ecoroute::rag::RagAnswer;
use ecoroute::services::{DashboardStats, DocumentRecord, JobOutput};
use ecoroute::{JobState, JobStatus};
use indicatif::{ProgressBar, ProgressStyle};

/// Indicador visual de progresso para a execução de um job no terminal.
///
/// Exibe um spinner com o percentual e a etapa atual, e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e cancelamento (amarelo).
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner com o nome do documento.
    pub fn start(document: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("queued: {document}"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner a partir do status publicado.
    pub fn update(&self, status: &JobStatus) {
        self.pb.set_message(format!(
            "[{:>3.0}%] {}",
            status.progress * 100.0,
            status.message
        ));
    }

    /// Finaliza o spinner e exibe o estado terminal do job.
    pub fn complete(&self, status: &JobStatus) {
        self.pb.finish_and_clear();
        match status.state {
            JobState::Complete => {
                println!("  {} Job {} complete", self.green.apply_to("✓"), status.job_id);
            }
            _ if status.failure.as_ref().is_some_and(|f| f.cause == "cancelled") => {
                println!("  {} Job {} cancelled", self.yellow.apply_to("⊘"), status.job_id);
            }
            _ => {
                let cause = status
                    .failure
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| status.message.clone());
                println!("  {} Job {} {cause}", self.red.apply_to("✗"), status.job_id);
            }
        }
    }

    /// Imprime o resumo e o relatório de carbono de um job concluído.
    pub fn print_output(&self, output: &JobOutput) {
        let report = &output.report;
        let header = Style::new().cyan().bold();

        println!();
        println!("{}", header.apply_to("─── Summary ───"));
        println!("{}", output.summary.text);
        println!();
        println!("{}", header.apply_to("─── Carbon Report ───"));
        println!("  document:   {}", output.summary.document_id);
        println!(
            "  grid:       {:.0} gCO2/kWh ({})",
            report.intensity, report.location
        );
        println!(
            "  chunks:     {} ({} escalated)",
            report.total_chunks, report.chunks_escalated
        );
        println!(
            "  tiers:      light {} / medium {} / large {}",
            report.tier_counts.light, report.tier_counts.medium, report.tier_counts.large
        );
        println!("  baseline:   {:.4} g", report.baseline_grams);
        println!("  actual:     {:.4} g", report.actual_grams);
        println!(
            "  {}",
            self.green.apply_to(format!(
                "saved:      {:.4} g ({:.0}%)",
                report.savings_grams,
                report.efficiency_percent()
            ))
        );
    }
}

/// Imprime a resposta de uma consulta com suas citações.
pub fn print_answer(answer: &RagAnswer) {
    let dim = Style::new().dim();
    println!("{}", answer.answer);
    println!();
    println!(
        "{}",
        dim.apply_to(format!(
            "tier {} · confidence {:.2}",
            answer.tier, answer.confidence
        ))
    );
    for (i, citation) in answer.citations.iter().enumerate() {
        println!(
            "  [{}] {} {}",
            i + 1,
            dim.apply_to(&citation.chunk_id),
            citation.excerpt
        );
    }
}

/// Imprime a tabela de documentos processados.
pub fn print_documents(records: &[DocumentRecord]) {
    if records.is_empty() {
        println!("No documents processed yet.");
        return;
    }
    let bold = Style::new().bold();
    println!(
        "{}",
        bold.apply_to(format!(
            "{:<38} {:>6} {:>12} {:>6}  {}",
            "DOCUMENT", "CHUNKS", "SAVED (g)", "EFF", "STORED"
        ))
    );
    for r in records {
        println!(
            "{:<38} {:>6} {:>12.4} {:>5.0}%  {}",
            r.document_id,
            r.total_chunks,
            r.carbon_saved_grams,
            r.efficiency * 100.0,
            r.stored_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

/// Imprime as estatísticas agregadas.
pub fn print_stats(stats: &DashboardStats) {
    let green = Style::new().green().bold();
    println!("documents:        {}", stats.documents);
    println!("chunks:           {}", stats.chunks);
    println!(
        "carbon saved:     {}",
        green.apply_to(format!("{:.4} g CO2e", stats.carbon_saved_grams))
    );
    println!("mean efficiency:  {:.0}%", stats.mean_efficiency * 100.0);
}
