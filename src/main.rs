use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod aggregator;
mod boolq;
mod config;
mod error;
mod evaluation;
mod judge;
mod lexical;
mod models;
mod normalize;
mod output;
mod rating;
mod retry;
mod runner;

use crate::config::{Config, DatasetConfig};
use crate::evaluation::{Evaluator, Metric};
use crate::judge::Judge;
use crate::output::{ConsoleReporter, FileReporter, OutputFormat, ProgressReporter};
use crate::rating::OpenAiRatingClient;
use crate::runner::{Runner, count_samples, signal_interrupt};

/// Speech benchmark scorer - score generated answers against expected answers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the evaluated model, used to label the run
    #[arg(short = 'M', long)]
    model: String,

    /// Line-delimited JSON file with question, expected_answer and generated_answer
    #[arg(short, long)]
    file: PathBuf,

    /// Metric to use for evaluation: asr, boolq or instruct
    #[arg(short, long, default_value = "asr")]
    metric: String,

    /// Verbose output - show every sample and debug logs
    #[arg(short, long)]
    verbose: bool,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in dataset description to record with the run (e.g. big-bench-audio)
    #[arg(short, long)]
    dataset: Option<String>,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain")]
    output: OutputFormat,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let metric: Metric = args.metric.parse()?;

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let dataset = match &args.dataset {
        Some(name) => Some(
            DatasetConfig::builtin(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown dataset: {}", name))?,
        ),
        None => config.dataset.clone(),
    };

    let evaluator = match metric {
        Metric::Instruct => {
            let client = OpenAiRatingClient::from_env(&config.judge)?;
            Evaluator::with_judge(Judge::new(Box::new(client), &config.judge))
        }
        Metric::Asr | Metric::Boolq => Evaluator::new(),
    };

    let mut runner = Runner::new(evaluator, metric).abort_on_input_error(config.abort_on_input_error);

    // Progress would interleave with per-sample lines and JSON output.
    // Registered first so the bar is finished before the summary prints.
    if !args.verbose && matches!(args.output, OutputFormat::Plain) {
        let total = count_samples(&args.file)?;
        runner = runner.with_reporter(Box::new(ProgressReporter::new(total)));
    }

    runner = runner.with_reporter(Box::new(ConsoleReporter::new(args.output, args.verbose)));
    if let Some(storage_path) = &config.storage_path {
        runner = runner.with_reporter(Box::new(FileReporter::create(storage_path)?));
        info!(path = %storage_path, "writing per-sample report");
    }

    let interrupted = runner.interrupt_flag();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if signal_interrupt(&interrupted) {
                warn!("second interrupt, exiting immediately");
                std::process::exit(130);
            }
            warn!("interrupt received, finishing the current sample (press Ctrl-C again to exit)");
        }
    });

    let run = runner.run_info(&args.model, &args.file.display().to_string(), dataset);
    let summary = runner.run_file(&args.file, &run).await?;

    summary.ensure_all_scored()
}
