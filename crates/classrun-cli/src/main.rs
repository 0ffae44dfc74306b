//! # classrun
//!
//! Runs student submissions on the execution orchestrator, either as an
//! interactive terminal session or as a one-shot batch job.

mod interactive;
mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use classrun_core::{
    BatchClient, BatchJob, ClassrunConfig, HttpOrchestrator, OrchestratorApi, ReviewContext,
    TranscriptSummarizer,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Installs a panic hook that restores terminal state before printing panic info.
///
/// An interactive session puts the terminal in raw mode. Without this hook a
/// panic would leave the shell unusable and the panic message mangled.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = crossterm::terminal::disable_raw_mode();
        let _ = crossterm::execute!(std::io::stdout(), crossterm::cursor::Show);
        default_hook(panic_info);
    }));
}

/// classrun - run and review student code submissions
#[derive(Parser, Debug)]
#[command(name = "classrun", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "classrun.yml", global = true)]
    config: PathBuf,

    /// Orchestrator base URL (overrides config and CLASSRUN_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print summaries and batch results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive session for a submission in this terminal
    Interactive(InteractiveArgs),

    /// Run source files once and print the result
    Batch(BatchArgs),

    /// Analyze a saved session transcript
    Summarize(SummarizeArgs),

    /// Stop a container left running by an earlier session
    Stop(StopArgs),
}

#[derive(Args, Debug)]
struct InteractiveArgs {
    /// Submission to review
    #[arg(long)]
    submission_id: String,

    /// URL of the submission's source file
    #[arg(long)]
    file_url: String,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Submission the files belong to
    #[arg(long)]
    submission_id: String,

    /// Language to run (inferred from the first file when omitted)
    #[arg(long)]
    language: Option<String>,

    /// Source files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct SummarizeArgs {
    /// Language the session ran
    #[arg(long)]
    language: String,

    /// Plain-text transcript file
    transcript: PathBuf,
}

#[derive(Args, Debug)]
struct StopArgs {
    /// Container to stop
    container_id: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    install_panic_hook();

    let cli = Cli::parse();

    // The interactive session owns the terminal, so its logs go to a file.
    let interactive = matches!(cli.command, Commands::Interactive(_));
    init_logging(cli.verbose, interactive);

    let config = load_config(&cli.config, cli.api_url.as_deref())?;
    debug!(base_url = %config.api.base_url, "Configuration loaded");

    let json = cli.json;
    match cli.command {
        Commands::Interactive(args) => interactive_command(config, json, args).await,
        Commands::Batch(args) => batch_command(config, json, args).await,
        Commands::Summarize(args) => summarize_command(config, json, args).await,
        Commands::Stop(args) => stop_command(config, args).await,
    }
}

fn init_logging(verbose: bool, interactive: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if interactive {
        let log_path = std::env::var_os("CLASSRUN_LOG_FILE")
            .map_or_else(|| Path::new(".classrun").join("classrun.log"), PathBuf::from);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        // If the log file cannot be created the session runs without logs.
        if let Ok(file) = std::fs::File::create(&log_path) {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: &Path, api_url: Option<&str>) -> Result<ClassrunConfig> {
    let mut config = ClassrunConfig::load(Some(path))
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(url) = api_url {
        config.api.base_url = url.to_string();
        config.validate().context("Invalid --api-url")?;
    }
    Ok(config)
}

fn orchestrator(config: &ClassrunConfig) -> Result<Arc<HttpOrchestrator>> {
    let api = HttpOrchestrator::new(config.api.clone())
        .context("Failed to create orchestrator client")?;
    Ok(Arc::new(api))
}

async fn interactive_command(
    config: ClassrunConfig,
    json: bool,
    args: InteractiveArgs,
) -> Result<ExitCode> {
    let api = orchestrator(&config)?;
    let context = ReviewContext {
        submission_id: args.submission_id,
        file_url: args.file_url,
    };

    let outcome = interactive::run(context, api, config).await?;
    output::print_session_outcome(&outcome, json)?;

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn batch_command(config: ClassrunConfig, json: bool, args: BatchArgs) -> Result<ExitCode> {
    let mut job = BatchJob::from_paths(args.submission_id, &args.files)
        .await
        .context("Failed to read source files")?;
    if let Some(language) = args.language {
        job = job.with_language(language);
    }

    let client = BatchClient::new(orchestrator(&config)?, config.api.batch_timeout());
    match client.execute(job).await {
        Ok(result) => {
            info!(exit_code = ?result.exit_code, "Batch execution finished");
            output::print_batch_result(&result, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            output::print_error(&failure.message, json)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn summarize_command(
    config: ClassrunConfig,
    json: bool,
    args: SummarizeArgs,
) -> Result<ExitCode> {
    let transcript = tokio::fs::read_to_string(&args.transcript)
        .await
        .with_context(|| format!("Failed to read transcript {}", args.transcript.display()))?;

    let summarizer = TranscriptSummarizer::new(orchestrator(&config)?, config.api.analyze_timeout());
    let summary = summarizer
        .summarize(&transcript, Some(args.language.as_str()))
        .await;
    output::print_summary(&summary, json)?;

    Ok(if summary.is_failure_report() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn stop_command(config: ClassrunConfig, args: StopArgs) -> Result<ExitCode> {
    let api = orchestrator(&config)?;
    let timeout = config.api.stop_timeout();

    match tokio::time::timeout(timeout, api.stop_session(&args.container_id)).await {
        Ok(Ok(())) => {
            println!("Stopped {}", args.container_id);
            Ok(ExitCode::SUCCESS)
        }
        Ok(Err(e)) => {
            eprintln!("Failed to stop {}: {}", args.container_id, e.user_message());
            Ok(ExitCode::FAILURE)
        }
        Err(_) => {
            eprintln!(
                "Failed to stop {}: no response after {} seconds",
                args.container_id,
                timeout.as_secs()
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
