use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use review_board::{
    BoardConfig, CheckpointId, ReviewBoard, RunReport, SessionStatus, StepOutcome, Verdict,
};

/// Review-Board CLI: drafted exercises reviewed for safety and tone, approved by a human
#[derive(Parser, Debug)]
#[command(name = "review-board")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the checkpoint store directory
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new session and run it until it needs a human decision
    Start {
        #[command(flatten)]
        args: StartArgs,
    },

    /// Approve or reject the draft a session is waiting on
    Resume {
        /// Session id
        session_id: String,

        /// "approve" or "reject"
        #[arg(short, long)]
        decision: Verdict,

        /// Guidance for the next draft (used on reject)
        #[arg(short, long)]
        guidance: Option<String>,

        /// Only resume if this checkpoint sequence is still the pending suspension
        #[arg(long)]
        at: Option<u64>,
    },

    /// Re-enter the step loop of an interrupted session
    Continue { session_id: String },

    /// Print the state stored in a checkpoint (<session-id>@<seq>)
    Show { checkpoint: CheckpointId },

    /// List the checkpoints of a session
    History { session_id: String },

    /// Show the derived status of a session
    Status { session_id: String },

    /// List all sessions
    List,

    /// Poll a session until it suspends or terminates
    Watch {
        session_id: String,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Cancel a session
    Cancel {
        session_id: String,

        #[arg(short, long, default_value = "cancelled by operator")]
        reason: String,
    },
}

#[derive(Parser, Debug)]
struct StartArgs {
    /// Initial prompt
    #[arg(short, long)]
    prompt: Option<String>,

    /// Read the initial prompt from a file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Generation backend profile passed through to the adapters
    #[arg(long, default_value = "openai")]
    profile: String,

    /// Override the safety threshold (0.0-1.0)
    #[arg(long)]
    safety_threshold: Option<f64>,

    /// Override the empathy threshold (0.0-1.0)
    #[arg(long)]
    empathy_threshold: Option<f64>,

    /// Override the revision cycle limit
    #[arg(long)]
    max_iterations: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let Some(command) = cli.command else {
        eprintln!("No command specified. Use --help for usage information.");
        eprintln!("Example: review-board start --prompt \"coping with exam stress\"");
        std::process::exit(1);
    };

    let mut config = BoardConfig::load_or_default(cli.config.as_ref())
        .context("Failed to load configuration")?;
    if let Some(dir) = cli.store_dir {
        config.store.root_dir = dir;
    }

    match command {
        Command::Start { args } => handle_start(config, args).await,
        other => {
            let board = ReviewBoard::open(&config)?;
            handle_session_command(&board, other).await
        }
    }
}

async fn handle_start(mut config: BoardConfig, args: StartArgs) -> Result<()> {
    let prompt = resolve_prompt(&args)?;

    if let Some(threshold) = args.safety_threshold {
        config.routing.safety_threshold = threshold;
    }
    if let Some(threshold) = args.empathy_threshold {
        config.routing.empathy_threshold = threshold;
    }
    if let Some(limit) = args.max_iterations {
        config.routing.max_iterations = limit;
    }

    let board = ReviewBoard::open(&config)?;
    info!("Prompt: {}", prompt);

    let report = board.start_session(&prompt, &args.profile).await?;
    print_report(&report)
}

async fn handle_session_command(board: &ReviewBoard, command: Command) -> Result<()> {
    match command {
        Command::Start { .. } => anyhow::bail!("start does not take an existing session"),
        Command::Resume {
            session_id,
            decision,
            guidance,
            at,
        } => {
            let report = match at {
                Some(seq) => {
                    let checkpoint = CheckpointId::new(&session_id, seq);
                    board.resume_session_at(&checkpoint, decision, guidance).await?
                }
                None => board.resume_session(&session_id, decision, guidance).await?,
            };
            print_report(&report)
        }
        Command::Continue { session_id } => {
            let report = board.continue_session(&session_id).await?;
            print_report(&report)
        }
        Command::Show { checkpoint } => print_json(&board.get_checkpoint(&checkpoint).await?),
        Command::History { session_id } => {
            print_json(&board.list_checkpoints(&session_id).await?)
        }
        Command::Status { session_id } => print_json(&board.session_status(&session_id).await?),
        Command::List => {
            for info in board.list_sessions().await? {
                println!(
                    "{}  {:<14}  v{}  iteration {}  {}",
                    info.session_id,
                    info.status.to_string(),
                    info.draft_version,
                    info.iteration_count,
                    info.created_at.to_rfc3339()
                );
            }
            Ok(())
        }
        Command::Watch {
            session_id,
            interval_ms,
        } => watch(board, &session_id, Duration::from_millis(interval_ms)).await,
        Command::Cancel { session_id, reason } => {
            let outcome = board.cancel_session(&session_id, &reason).await?;
            print_json(&outcome)
        }
    }
}

/// Resolve the prompt from --prompt and --file
fn resolve_prompt(args: &StartArgs) -> Result<String> {
    match (&args.file, &args.prompt) {
        (Some(path), extra) => {
            let content = std::fs::read_to_string(path)
                .context(format!("Failed to read: {:?}", path))?;
            Ok(match extra {
                Some(extra) => format!("{}\n\nAdditional context: {}", content.trim(), extra),
                None => content.trim().to_string(),
            })
        }
        (None, Some(prompt)) => Ok(prompt.clone()),
        (None, None) => anyhow::bail!("Either --prompt or --file is required"),
    }
}

/// Poll the store; other processes commit checkpoints this one cannot observe as events.
async fn watch(board: &ReviewBoard, session_id: &str, interval: Duration) -> Result<()> {
    let mut last_seq = None;
    loop {
        let info = board.session_status(session_id).await?;
        if last_seq != Some(info.latest_seq) {
            println!(
                "[{}] {} stage={} v{} safety={} empathy={}",
                info.latest_seq,
                info.status,
                info.current_stage
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                info.draft_version,
                fmt_score(info.safety_score),
                fmt_score(info.empathy_score)
            );
            last_seq = Some(info.latest_seq);
        }

        if info.terminal || matches!(info.status, SessionStatus::AwaitingHuman { .. }) {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

fn fmt_score(score: Option<f64>) -> String {
    score
        .map(|s| format!("{:.2}", s))
        .unwrap_or_else(|| "-".to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &RunReport) -> Result<()> {
    println!("\n========================================");
    println!("Session: {}", report.session_id);
    println!("========================================");
    println!("Checkpoint: {}@{}", report.session_id, report.latest.seq);
    println!("Draft version: {}", report.latest.draft_version);
    println!("Revision cycles: {}", report.latest.iteration_count);
    println!("Safety score: {}", fmt_score(report.latest.safety_score));
    println!("Empathy score: {}", fmt_score(report.latest.empathy_score));

    if !report.current_draft.is_empty() {
        println!("\n{}", report.current_draft);
    }

    match &report.outcome {
        StepOutcome::Suspended { reason } => {
            println!("\nWaiting for a decision ({}).", reason);
            println!(
                "Run: review-board resume {} --decision approve|reject",
                report.session_id
            );
        }
        StepOutcome::Done => println!("\nDraft approved."),
        StepOutcome::Aborted { reason } => {
            println!("\nSession aborted: {}", reason);
            std::process::exit(1);
        }
        StepOutcome::Continue => {}
    }

    Ok(())
}
