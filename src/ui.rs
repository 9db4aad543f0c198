//! Interface de terminal do agentdrain: spinners, saída colorida e a
//! confirmação do operador.
//!
//! Usa `indicatif` para spinners enquanto sistemas externos são consultados
//! e `console` para cores e para ler a resposta do operador. Relatórios e
//! prompts vão para stdout; spinners vão para stderr. Com `--json` o prompt
//! passa para stderr para não misturar texto no JSON.

use std::time::Duration;

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::error::DrainError;
use crate::reconcile::{Approval, Approver, GroupOutcome, RemediationProposal, RunSummary};

/// Inicia um spinner em stderr com a mensagem dada.
///
/// Fica invisível quando stderr não é um terminal.
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Pede ao operador, no terminal, a confirmação de cada remediação.
///
/// `y` aprova, `n` recusa, `q` interrompe a execução. Qualquer erro de
/// leitura (stdin fechado, por exemplo) também interrompe: na dúvida,
/// nada é escrito.
pub struct TerminalApprover {
    term: Term,
    bold: Style,
    yellow: Style,
}

impl Default for TerminalApprover {
    fn default() -> Self {
        Self::for_output(false)
    }
}

impl TerminalApprover {
    /// Pergunta em stdout, ou em stderr quando stdout carrega JSON.
    pub fn for_output(json: bool) -> Self {
        Self {
            term: if json { Term::stderr() } else { Term::stdout() },
            bold: Style::new().bold(),
            yellow: Style::new().yellow(),
        }
    }

    fn ask(&self, proposal: &RemediationProposal<'_>) -> std::io::Result<Approval> {
        self.term.write_line("")?;
        self.term.write_line(&format!(
            "{} {}",
            self.bold.apply_to("Workflow:"),
            proposal.workflow
        ))?;
        self.term.write_line(&format!(
            "  status {}, {} live scheduler jobs",
            proposal.status, proposal.live_jobs
        ))?;
        self.term.write_line(&format!(
            "  move {} stale executing jobs to {}",
            self.bold.apply_to(proposal.job_count),
            self.yellow.apply_to(proposal.target)
        ))?;

        loop {
            self.term.write_str("Apply? [y]es / [n]o / [q]uit: ")?;
            let answer = self.term.read_line()?;
            match parse_answer(&answer) {
                Some(approval) => return Ok(approval),
                None => self.term.write_line("Please answer y, n or q.")?,
            }
        }
    }
}

impl Approver for TerminalApprover {
    fn confirm(&mut self, proposal: &RemediationProposal<'_>) -> Approval {
        self.ask(proposal).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not read operator answer, aborting");
            Approval::Abort
        })
    }
}

fn parse_answer(answer: &str) -> Option<Approval> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(Approval::Approve),
        "n" | "no" => Some(Approval::Decline),
        "q" | "quit" => Some(Approval::Abort),
        _ => None,
    }
}

/// Imprime o resultado de cada grupo e o resumo da execução.
///
/// Remediações em verde, grupos ignorados em amarelo, erros em vermelho.
pub fn print_run(summary: &RunSummary) {
    let green = Style::new().green().bold();
    let yellow = Style::new().yellow();
    let red = Style::new().red().bold();
    let dim = Style::new().dim();

    println!();
    if summary.dry_run {
        println!("{}", yellow.apply_to("Dry run: nothing was written."));
    }
    if summary.groups.is_empty() {
        println!(
            "  {} No executing jobs older than {}",
            green.apply_to("✓"),
            summary.cutoff.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    for group in &summary.groups {
        let (mark, style) = match group.outcome {
            GroupOutcome::Remediated { .. } | GroupOutcome::Planned { .. } => ("✓", &green),
            GroupOutcome::Failed { .. } => ("✗", &red),
            _ => ("-", &yellow),
        };
        println!(
            "  {} {} ({} stale): {}",
            style.apply_to(mark),
            group.workflow,
            group.stale_jobs,
            style.apply_to(&group.outcome)
        );
    }

    println!();
    println!("{}", dim.apply_to(format!("─── Run {} ───", summary.run_id)));
    println!("  groups examined:     {}", summary.examined);
    if summary.dry_run {
        println!("  planned:             {}", summary.planned);
    } else {
        println!("  remediated:          {}", summary.remediated);
        println!("  jobs transitioned:   {}", summary.jobs_transitioned);
    }
    println!("  skipped:             {}", summary.skipped());
    for (reason, count) in [
        ("live scheduler jobs", summary.skipped_live_jobs),
        ("unknown status", summary.skipped_unknown_status),
        ("already resolved", summary.skipped_already_resolved),
        ("operator declined", summary.declined),
        ("operator aborted", summary.aborted),
    ] {
        if count > 0 {
            println!("    {reason}: {count}");
        }
    }
    let failed = format!("  errored:             {}", summary.failed);
    if summary.failed > 0 {
        println!("{}", red.apply_to(failed));
    } else {
        println!("{failed}");
    }
}

/// Imprime qualquer relatório em JSON formatado.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), DrainError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
