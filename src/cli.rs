//! CLI interface for call-learner

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{self, Config};
use crate::learning::cycle::{CycleReport, CycleServices, LearningCycle};
use crate::learning::cycle_log::CycleLog;
use crate::scheduler::{Clock, LearningScheduler, StateStore, SystemClock};
use crate::security::approval::{ApprovalQueue, PendingApproval};
use crate::security::keyring::{self, KeyedService};

#[derive(Parser)]
#[command(name = "call-learner")]
#[command(about = "Continuous learning for a voice customer-service agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(short, long, global = true, env = "CALL_LEARNER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one learning cycle now
    Run {
        /// Ignore the schedule's eligibility window
        #[arg(short, long)]
        force: bool,
    },
    /// Run the scheduler loop until interrupted
    Daemon,
    /// Show scheduler state and pending approvals
    Status,
    /// Review proposals waiting for approval
    Approvals {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
    /// Show recent cycle log entries
    Log {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Inspect configuration and store API keys
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ApprovalCommands {
    /// List pending approvals
    List {
        /// Include approved and rejected entries
        #[arg(short, long)]
        all: bool,
    },
    /// Show one approval in full
    Show { id: String },
    /// Approve and apply a proposal
    Approve { id: String },
    /// Reject a proposal
    Reject {
        id: String,
        #[arg(short, long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the active configuration
    Show,
    /// Store an API key (services: call-platform, agent-config, knowledge-store, llm)
    SetKey { service: KeyedService, key: String },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn build_scheduler(config: Config) -> Result<LearningScheduler> {
    let data_dir = config.resolve_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let services = CycleServices::http(&config)?;
    let config = Arc::new(config);
    let cycle = LearningCycle::new(config.clone(), services, &data_dir);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    LearningScheduler::new(cycle, &config, clock, &data_dir)
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { force } => {
            let scheduler = build_scheduler(config)?;
            let report = if force {
                Some(scheduler.trigger_now().await?)
            } else {
                scheduler.run_if_due().await?
            };
            match report {
                Some(report) => print_report(&report),
                None => {
                    let next = scheduler.state().next_eligible_run;
                    println!(
                        "Not eligible yet; next run at {}. Use --force to run anyway.",
                        next.map(|t| t.to_rfc3339()).unwrap_or_else(|| "unknown".into())
                    );
                }
            }
        }
        Commands::Daemon => {
            let scheduler = build_scheduler(config)?;
            scheduler.run_forever().await?;
        }
        Commands::Status => show_status(&config)?,
        Commands::Approvals { command } => match command {
            ApprovalCommands::List { all } => {
                let queue = ApprovalQueue::new(&config.resolve_data_dir()?);
                list_approvals(&queue.list(!all));
            }
            ApprovalCommands::Show { id } => {
                let queue = ApprovalQueue::new(&config.resolve_data_dir()?);
                let approval = queue.get(&id).with_context(|| format!("No approval with id {}", id))?;
                println!("{}", serde_json::to_string_pretty(&approval)?);
            }
            ApprovalCommands::Approve { id } => {
                let scheduler = build_scheduler(config)?;
                let now = chrono::Utc::now();
                let report = scheduler.cycle().apply_approved(&id, now).await?;
                print_report(&report);
            }
            ApprovalCommands::Reject { id, reason } => {
                let queue = ApprovalQueue::new(&config.resolve_data_dir()?);
                let rejected = queue.reject(&id, reason, chrono::Utc::now())?;
                println!("Rejected {}", rejected.id);
            }
        },
        Commands::Log { limit } => {
            let log = CycleLog::new(&config.resolve_data_dir()?);
            let entries = log.recent(limit)?;
            if entries.is_empty() {
                println!("No cycles recorded yet.");
            }
            for entry in entries {
                println!(
                    "{}  {:<22} {}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.status,
                    crate::truncate_safe(&entry.cycle_id, 8),
                    entry.detail
                );
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => config::show_config(&config)?,
            ConfigCommands::SetKey { service, key } => {
                keyring::set_api_key(service, &key)?;
                println!("Stored {} API key.", service.as_str());
            }
        },
    }

    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("Cycle {}", report.cycle_id);
    if let Some(window) = report.window {
        println!("  Window:  {}", window);
    }
    if let Some(summary) = &report.summary {
        println!(
            "  Calls:   {} analyzed, {} filtered, {} pattern matches",
            summary.total, summary.filtered_out, summary.pattern_matches
        );
    }
    println!("  Outcome: {}", report.outcome);
}

fn show_status(config: &Config) -> Result<()> {
    let data_dir = config.resolve_data_dir()?;
    let state = StateStore::new(&data_dir).load();
    let pending = ApprovalQueue::new(&data_dir).pending_count();
    let fmt = |t: Option<chrono::DateTime<chrono::Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into());

    println!("Agent:             {} ({})", config.agent.name, config.agent.id);
    println!("Knowledge base:    {}", config.agent.knowledge_base_name());
    println!("Schedule:          {}", config.schedule.cron);
    println!("Last run:          {}", fmt(state.last_run_at));
    println!("Last attempt:      {}", fmt(state.last_attempt_at));
    println!("Last status:       {}", state.last_status.as_deref().unwrap_or("-"));
    println!("Next eligible run: {}", fmt(state.next_eligible_run));
    println!("Pending approvals: {}", pending);

    for service in KeyedService::ALL {
        let configured = keyring::optional_api_key(service).is_some();
        println!(
            "{:<19}{}",
            format!("{} key:", service.as_str()),
            if configured { "configured" } else { "not set" }
        );
    }
    Ok(())
}

fn list_approvals(approvals: &[PendingApproval]) {
    if approvals.is_empty() {
        println!("No approvals.");
        return;
    }
    for a in approvals {
        println!(
            "{}  {:<8}  submitted {}  {} new sections, {} priority fixes",
            a.id,
            a.status.to_string(),
            a.submitted_at.format("%Y-%m-%d %H:%M"),
            a.proposal.new_sections.len(),
            a.proposal.priority_fixes.len()
        );
        if !a.proposal.expected_improvement.is_empty() {
            println!("    {}", crate::truncate_safe(&a.proposal.expected_improvement, 100));
        }
    }
}
