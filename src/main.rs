use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use agentdrain::cli::{Cli, Command};
use agentdrain::config::DrainConfig;
use agentdrain::policy::RemediationPolicy;
use agentdrain::probes;
use agentdrain::reconcile::ReconciliationEngine;
use agentdrain::reqmgr::{ReqMgrClient, StatusCache, WorkflowStatusClient};
use agentdrain::scheduler::CondorQuery;
use agentdrain::tracker::SqliteTracker;
use agentdrain::ui::{self, TerminalApprover};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", fatal_message(&e));
            ExitCode::FAILURE
        }
    }
}

// The whole context chain on one line, printed once.
fn fatal_message(e: &anyhow::Error) -> String {
    format!("{} {e:#}", Style::new().red().bold().apply_to("error:"))
}

// Logs go to stderr; stdout carries the report and the operator prompt.
fn init_tracing(verbose: bool) {
    let default = if verbose { "agentdrain=debug" } else { "agentdrain=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = DrainConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Remediate { age_days, dry_run } => {
            remediate(&config, age_days, dry_run, cli.json).await
        }
        Command::Drain { twiki } => drain(&config, twiki, cli.json).await,
    }
}

fn open_tracker(config: &DrainConfig, read_only: bool) -> Result<SqliteTracker> {
    let opened = if read_only {
        SqliteTracker::open_read_only(&config.tracker_db)
    } else {
        SqliteTracker::open(&config.tracker_db)
    };
    opened.with_context(|| {
        format!(
            "opening tracker database {}",
            config.tracker_db.display()
        )
    })
}

fn status_client(config: &DrainConfig) -> Result<WorkflowStatusClient<ReqMgrClient>> {
    if config.proxy_path.is_none() {
        warn!("no X.509 proxy configured, ReqMgr lookups will likely come back UNKNOWN");
    }
    let client = ReqMgrClient::new(
        config.reqmgr_url.clone(),
        config.proxy_path.as_deref(),
        config.reqmgr_timeout(),
    )?;
    Ok(WorkflowStatusClient::new(client, StatusCache::new()))
}

fn condor(config: &DrainConfig) -> CondorQuery {
    CondorQuery::new(
        config.condor_q.clone(),
        config.agent_name.clone(),
        config.scheduler_timeout(),
    )
}

async fn remediate(
    config: &DrainConfig,
    age_days: Option<u32>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let age_days = age_days.unwrap_or(config.age_threshold_days);
    let mut engine = ReconciliationEngine::new(
        open_tracker(config, dry_run)?,
        condor(config),
        status_client(config)?,
        RemediationPolicy::from_config(&config.policy),
        chrono::Duration::days(i64::from(age_days)),
    )
    .dry_run(dry_run);

    let summary = engine
        .run(&mut TerminalApprover::for_output(json))
        .await
        .context("reconciliation aborted before completion")?;

    if json {
        Ok(ui::print_json(&summary)?)
    } else {
        ui::print_run(&summary);
        Ok(())
    }
}

async fn drain(config: &DrainConfig, twiki: bool, json: bool) -> Result<()> {
    let tracker = open_tracker(config, true)?;
    let scheduler = condor(config);
    let mut statuses = status_client(config)?;

    let pb = ui::spinner("Running drain probes...");
    let report = probes::collect(&tracker, &scheduler, &mut statuses).await;
    pb.finish_and_clear();
    let report = report?;

    if json {
        Ok(ui::print_json(&report)?)
    } else {
        print!("{}", report.render(twiki));
        Ok(())
    }
}
