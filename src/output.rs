use crate::models::{RunInfo, SampleRecord, Summary};
use anyhow::{Context, Result};
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Stdout, Write};
use std::path::Path;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Receives per-sample records and the final metric of a run.
///
/// Reporting is fire-and-forget: the runner logs reporter errors and keeps
/// scoring.
pub trait Reporter {
    fn record_run(&mut self, run: &RunInfo) -> Result<()>;
    fn record_sample(&mut self, record: &SampleRecord) -> Result<()>;
    fn record_summary(&mut self, summary: &Summary) -> Result<()>;
}

fn format_score(score: Option<f64>) -> String {
    match score {
        Some(score) => format!("{:.2}", score),
        None => "n/a".to_string(),
    }
}

/// Prints results to stdout (or any writer)
pub struct ConsoleReporter<W: Write = Stdout> {
    out: W,
    format: OutputFormat,
    /// Print every sample, not just the summary
    verbose: bool,
}

impl ConsoleReporter<Stdout> {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self::with_writer(std::io::stdout(), format, verbose)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn with_writer(out: W, format: OutputFormat, verbose: bool) -> Self {
        Self {
            out,
            format,
            verbose,
        }
    }

    /// Print the run header in plain text format
    fn print_run_plain(&mut self, run: &RunInfo) -> Result<()> {
        writeln!(
            self.out,
            "Evaluating {} with metric {} ({})",
            run.model, run.metric, run.input
        )?;
        if let Some(rating_model) = &run.rating_model {
            writeln!(self.out, "Rating model: {}", rating_model)?;
        }
        if let Some(score_scale) = run.score_scale {
            writeln!(self.out, "Score scale: 0-{}", score_scale)?;
        }
        if let Some(system_prompt) = &run.system_prompt {
            writeln!(self.out, "System prompt: {}", system_prompt)?;
        }
        if let Some(user_prompt) = &run.user_prompt {
            writeln!(self.out, "User prompt: {}", user_prompt)?;
        }
        if let Some(dataset) = &run.dataset {
            writeln!(
                self.out,
                "Dataset: {} [{}], {} expected samples",
                dataset.name,
                dataset.path,
                dataset.total_samples()
            )?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    /// Print one sample in plain text format
    fn print_sample_plain(&mut self, record: &SampleRecord) -> Result<()> {
        writeln!(
            self.out,
            "{}: score={} average={}",
            record.index,
            format_score(record.score),
            format_score(record.running_average)
        )?;
        if let Some(reason) = &record.reason {
            writeln!(self.out, "  reason={}", reason)?;
        }
        if let Some(error) = &record.error {
            writeln!(self.out, "  error={}", error)?;
        }
        Ok(())
    }

    /// Print the summary table in plain text format
    fn print_summary_plain(&mut self, summary: &Summary) -> Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "📊 SUMMARY")?;
        writeln!(self.out, "----------")?;
        writeln!(
            self.out,
            "{:<10} {:<8} {:<8} {:<8} {:<8} {:<8}",
            "Metric", "Samples", "Scored", "Failed", "Mean", "Median"
        )?;
        writeln!(self.out, "{}", "-".repeat(55))?;
        writeln!(
            self.out,
            "{:<10} {:<8} {:<8} {:<8} {:<8} {:<8}",
            summary.metric.as_str(),
            summary.total,
            summary.scored,
            summary.failed,
            format_score(summary.average_score),
            format_score(summary.median_score)
        )?;
        if summary.interrupted {
            writeln!(self.out, "(interrupted: partial results)")?;
        }
        Ok(())
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn record_run(&mut self, run: &RunInfo) -> Result<()> {
        if !self.verbose {
            return Ok(());
        }
        match self.format {
            OutputFormat::Plain => self.print_run_plain(run),
            OutputFormat::Json => {
                writeln!(self.out, "{}", serde_json::to_string(run)?)?;
                Ok(())
            }
        }
    }

    fn record_sample(&mut self, record: &SampleRecord) -> Result<()> {
        if !self.verbose {
            return Ok(());
        }
        match self.format {
            OutputFormat::Plain => self.print_sample_plain(record),
            OutputFormat::Json => {
                writeln!(self.out, "{}", serde_json::to_string(record)?)?;
                Ok(())
            }
        }
    }

    fn record_summary(&mut self, summary: &Summary) -> Result<()> {
        match self.format {
            OutputFormat::Plain => self.print_summary_plain(summary),
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(summary)
                    .context("Failed to serialize summary to JSON")?;
                writeln!(self.out, "{}", json)?;
                Ok(())
            }
        }
    }
}

/// Progress bar over the samples of a run, showing the running average
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Bar drawn on stderr for a run of `len` samples
    pub fn new(len: u64) -> Self {
        let bar = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        Self::with_bar(bar)
    }

    pub fn with_bar(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Reporter for ProgressReporter {
    fn record_run(&mut self, _run: &RunInfo) -> Result<()> {
        Ok(())
    }

    fn record_sample(&mut self, record: &SampleRecord) -> Result<()> {
        self.bar.inc(1);
        self.bar
            .set_message(format!("avg_score={}", format_score(record.running_average)));
        Ok(())
    }

    fn record_summary(&mut self, summary: &Summary) -> Result<()> {
        if summary.interrupted {
            self.bar.abandon();
        } else {
            self.bar.finish();
        }
        Ok(())
    }
}

/// One line of a report file
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReportLine<'a> {
    Run(&'a RunInfo),
    Sample(&'a SampleRecord),
    Summary(&'a Summary),
}

/// Appends every record of a run to a JSON-lines file
pub struct FileReporter {
    path: String,
    writer: BufWriter<File>,
}

impl FileReporter {
    /// Create (or truncate) the report file, creating parent directories
    pub fn create(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let file = File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path))?;

        Ok(Self {
            path: path.to_string(),
            writer: BufWriter::new(file),
        })
    }

    /// Lines are flushed one by one so an interrupted run keeps what it scored
    fn write_line(&mut self, line: &ReportLine) -> Result<()> {
        serde_json::to_writer(&mut self.writer, line)
            .with_context(|| format!("Failed to serialize report line for: {}", self.path))?;
        self.writer
            .write_all(b"\n")
            .and_then(|_| self.writer.flush())
            .with_context(|| format!("Failed to write results to: {}", self.path))
    }
}

impl Reporter for FileReporter {
    fn record_run(&mut self, run: &RunInfo) -> Result<()> {
        self.write_line(&ReportLine::Run(run))
    }

    fn record_sample(&mut self, record: &SampleRecord) -> Result<()> {
        self.write_line(&ReportLine::Sample(record))
    }

    fn record_summary(&mut self, summary: &Summary) -> Result<()> {
        self.write_line(&ReportLine::Summary(summary))
    }
}
