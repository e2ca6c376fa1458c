use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use prodfetch::app::{self, App};
use prodfetch::config::{ConfigLoader, CrawlConfig, LoadPolicy};
use prodfetch::error::CrawlError;
use prodfetch::events::FileFailureLog;
use prodfetch::output::{self, ConsoleProgress, JsonOutput, OutputMode};
use prodfetch::product::ProductHttpClient;

#[derive(Parser)]
#[command(name = "prodfetch")]
#[command(about = "Resumable bulk fetcher for product-detail APIs")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./prodfetch.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print machine-readable results instead of progress bars
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch every id not yet in the output, then deduplicate")]
    Crawl(CrawlArgs),
    #[command(about = "Collapse duplicate ids in the output file")]
    Dedupe(PathArgs),
    #[command(about = "Summarize the output file and error log")]
    Summary(PathArgs),
    #[command(about = "Extract failed ids from the error log")]
    Recover(RecoverArgs),
}

#[derive(Args, Clone, Default)]
struct PathArgs {
    #[arg(long)]
    output: Option<Utf8PathBuf>,

    #[arg(long)]
    error_log: Option<Utf8PathBuf>,
}

#[derive(Args, Clone, Default)]
struct CrawlArgs {
    #[arg(long)]
    input: Option<Utf8PathBuf>,

    #[command(flatten)]
    paths: PathArgs,

    #[arg(long)]
    api_base_url: Option<String>,

    #[arg(long)]
    retries: Option<u32>,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    backoff_secs: Option<u64>,

    /// Keep repeated ids from the input instead of dropping them at load
    #[arg(long)]
    keep_duplicates: bool,

    /// Fetch ids again whose only rows are failures
    #[arg(long)]
    retry_failures: bool,
}

#[derive(Args, Clone)]
struct RecoverArgs {
    #[command(flatten)]
    paths: PathArgs,

    /// Write recovered ids here as a one-column CSV usable as --input
    #[arg(long = "ids-out")]
    ids_out: Option<Utf8PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CrawlError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CrawlError) -> u8 {
    match error {
        CrawlError::InputNotFound(_)
        | CrawlError::InputRead { .. }
        | CrawlError::InvalidInputRow { .. }
        | CrawlError::InvalidProductId(_)
        | CrawlError::ConfigRead(_)
        | CrawlError::ConfigParse(_)
        | CrawlError::InvalidConfig(_) => 2,
        CrawlError::Store(_) | CrawlError::FailureLog(_) | CrawlError::Filesystem(_) => 3,
        _ => 1,
    }
}

async fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Console
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Crawl(CrawlArgs::default())) {
        Commands::Crawl(args) => run_crawl(apply_crawl_args(config, &args)?, output_mode).await,
        Commands::Dedupe(args) => run_dedupe(apply_paths(config, &args), output_mode),
        Commands::Summary(args) => run_summary(apply_paths(config, &args), output_mode),
        Commands::Recover(args) => run_recover(
            apply_paths(config, &args.paths),
            args.ids_out.as_deref(),
            output_mode,
        ),
    }
}

fn apply_paths(mut config: CrawlConfig, args: &PathArgs) -> CrawlConfig {
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if let Some(error_log) = &args.error_log {
        config.error_log = error_log.clone();
    }
    config
}

fn apply_crawl_args(config: CrawlConfig, args: &CrawlArgs) -> Result<CrawlConfig, CrawlError> {
    let mut config = apply_paths(config, &args.paths);
    if let Some(input) = &args.input {
        config.input = input.clone();
    }
    if let Some(url) = &args.api_base_url {
        config.api_base_url = url.clone();
    }
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(timeout) = args.timeout_secs {
        config.timeout = Duration::from_secs(timeout);
    }
    if let Some(backoff) = args.backoff_secs {
        config.backoff_unit = Duration::from_secs(backoff);
    }
    if args.keep_duplicates {
        config.load_policy = LoadPolicy::KeepAll;
    }
    if args.retry_failures {
        config.retry_failures = true;
    }
    config.validate()?;
    Ok(config)
}

async fn run_crawl(config: CrawlConfig, output_mode: OutputMode) -> miette::Result<()> {
    let client = ProductHttpClient::new(&config)?;
    let failures = Arc::new(FileFailureLog::open(&config.error_log)?);
    let app = App::new(config, client, failures)?;

    match output_mode {
        OutputMode::Json => {
            let result = app.crawl(&JsonOutput).await?;
            JsonOutput::print_crawl(&result).into_diagnostic()?;
        }
        OutputMode::Console => {
            let progress = ConsoleProgress::new();
            let result = app.crawl(&progress).await?;
            output::print_summary(&result.summary);
        }
    }
    Ok(())
}

fn run_dedupe(config: CrawlConfig, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => {
            let report = app::dedupe_output(&config, &JsonOutput)?;
            JsonOutput::print_dedupe(&report).into_diagnostic()?;
        }
        OutputMode::Console => {
            let report = app::dedupe_output(&config, &ConsoleProgress::new())?;
            println!("Removed {} duplicate rows from {}", report.removed(), config.output);
        }
    }
    Ok(())
}

fn run_summary(config: CrawlConfig, output_mode: OutputMode) -> miette::Result<()> {
    let summary = app::summarize(&config)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic()?,
        OutputMode::Console => output::print_summary(&summary),
    }
    Ok(())
}

fn run_recover(
    config: CrawlConfig,
    ids_out: Option<&Utf8Path>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let result = app::recover(&config, ids_out)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_recover(&result).into_diagnostic()?,
        OutputMode::Console => {
            println!("Failed ids in {}: {}", result.log_path, result.ids.len());
            match &result.output_path {
                Some(path) => println!("Wrote {path}"),
                None => {
                    for id in &result.ids {
                        println!("{id}");
                    }
                }
            }
        }
    }
    Ok(())
}
