use crate::aggregator::Aggregator;
use crate::config::DatasetConfig;
use crate::error::EvalError;
use crate::evaluation::{Evaluator, Metric};
use crate::judge::Judge;
use crate::models::{EvalResult, FailedResult, RunInfo, Sample, SampleRecord, Summary};
use crate::output::Reporter;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Reads samples line by line, scores them and feeds reporters
pub struct Runner {
    evaluator: Evaluator,
    metric: Metric,
    reporters: Vec<Box<dyn Reporter>>,
    /// Stop on the first malformed line instead of recording it as a failure
    abort_on_input_error: bool,
    interrupted: Arc<AtomicBool>,
}

impl Runner {
    /// Create a new runner for the given metric
    pub fn new(evaluator: Evaluator, metric: Metric) -> Self {
        Self {
            evaluator,
            metric,
            reporters: Vec::new(),
            abort_on_input_error: false,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn abort_on_input_error(mut self, abort: bool) -> Self {
        self.abort_on_input_error = abort;
        self
    }

    /// Flag that stops the run before the next sample once set
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Header describing this run, for reporters
    pub fn run_info(&self, model: &str, input: &str, dataset: Option<DatasetConfig>) -> RunInfo {
        let judge = self.evaluator.judge();
        RunInfo {
            model: model.to_string(),
            metric: self.metric,
            input: input.to_string(),
            rating_model: judge.map(|judge| judge.model().to_string()),
            system_prompt: judge.map(|judge| judge.system_prompt().to_string()),
            user_prompt: judge.map(|judge| judge.user_prompt().to_string()),
            score_scale: judge.map(Judge::score_scale),
            dataset,
        }
    }

    /// Evaluate every sample of a line-delimited JSON file
    pub async fn run_file(&mut self, path: &Path, run: &RunInfo) -> Result<Summary> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open input file: {}", path.display()))?;
        self.run(BufReader::new(file), run).await
    }

    /// Evaluate every sample read from `input`; blank lines are skipped
    pub async fn run<R: BufRead>(&mut self, input: R, run: &RunInfo) -> Result<Summary> {
        info!(model = %run.model, metric = %self.metric, input = %run.input, "starting evaluation");
        self.notify(|reporter| reporter.record_run(run));

        let mut aggregator = Aggregator::new(self.metric);
        let mut index = 0;

        for (line_number, bytes) in (1..).zip(input.split(b'\n')) {
            if self.interrupted.load(Ordering::SeqCst) {
                warn!(index, "interrupted, stopping before the next sample");
                break;
            }

            let bytes = bytes.with_context(|| format!("Failed to read input line {}", line_number))?;
            let parsed = decode_line(bytes);
            if matches!(&parsed, Ok(line) if line.trim().is_empty()) {
                continue;
            }

            let (sample, result) = self.evaluate_line(line_number, parsed).await?;
            let running_average = aggregator.observe(&result);

            debug!(
                index,
                score = ?result.score(),
                average = ?running_average,
                "sample evaluated"
            );

            let record = SampleRecord::new(index, sample.as_ref(), &result, running_average);
            self.notify(|reporter| reporter.record_sample(&record));
            index += 1;
        }

        let summary = aggregator.summary(self.interrupted.load(Ordering::SeqCst));
        info!(
            total = summary.total,
            failed = summary.failed,
            average = ?summary.average_score,
            "evaluation finished"
        );
        self.notify(|reporter| reporter.record_summary(&summary));

        Ok(summary)
    }

    /// Parse and score one line. A malformed line is a failed result unless
    /// the runner aborts on input errors.
    async fn evaluate_line(
        &self,
        line_number: usize,
        line: Result<String, EvalError>,
    ) -> Result<(Option<Sample>, EvalResult)> {
        match line.and_then(|line| Sample::from_json(&line)) {
            Ok(sample) => {
                let result = self.evaluator.evaluate(&sample, self.metric).await;
                Ok((Some(sample), result))
            }
            Err(err) if self.abort_on_input_error => {
                Err(err).with_context(|| format!("Invalid sample on line {}", line_number))
            }
            Err(err) => {
                warn!(line_number, error = %err, "skipping malformed sample");
                Ok((None, EvalResult::Failed(FailedResult::from(&err))))
            }
        }
    }

    /// Forward to every reporter; failures are logged and otherwise ignored
    fn notify(&mut self, mut send: impl FnMut(&mut dyn Reporter) -> Result<()>) {
        for reporter in &mut self.reporters {
            if let Err(err) = send(reporter.as_mut()) {
                warn!(error = %format!("{:#}", err), "reporter failed");
            }
        }
    }
}

/// Record an interrupt request. Returns true when one was already pending,
/// meaning the user asked twice and the process should exit now.
pub fn signal_interrupt(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::SeqCst)
}

/// Number of non-blank lines in an input file, for sizing progress output
pub fn count_samples(path: &Path) -> Result<u64> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;

    let mut count = 0;
    for line in BufReader::new(file).split(b'\n') {
        let line = line.with_context(|| format!("Failed to read input file: {}", path.display()))?;
        if !line.iter().all(u8::is_ascii_whitespace) {
            count += 1;
        }
    }
    Ok(count)
}

/// Raw input line as text, without the trailing `\r` of CRLF files
fn decode_line(mut bytes: Vec<u8>) -> Result<String, EvalError> {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8(bytes).map_err(|e| EvalError::Input(format!("line is not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JudgeConfig;
    use crate::rating::{RatingClient, RatingError};
    use async_trait::async_trait;
    use std::io::{Cursor, Write};
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct Captured {
        runs: Vec<RunInfo>,
        samples: Vec<SampleRecord>,
        summaries: Vec<Summary>,
    }

    /// Records everything it receives into shared state
    struct CapturingReporter(Arc<Mutex<Captured>>);

    impl Reporter for CapturingReporter {
        fn record_run(&mut self, run: &RunInfo) -> Result<()> {
            self.0.lock().unwrap().runs.push(run.clone());
            Ok(())
        }

        fn record_sample(&mut self, record: &SampleRecord) -> Result<()> {
            self.0.lock().unwrap().samples.push(record.clone());
            Ok(())
        }

        fn record_summary(&mut self, summary: &Summary) -> Result<()> {
            self.0.lock().unwrap().summaries.push(summary.clone());
            Ok(())
        }
    }

    struct FailingReporter;

    impl Reporter for FailingReporter {
        fn record_run(&mut self, _run: &RunInfo) -> Result<()> {
            anyhow::bail!("dashboard offline")
        }

        fn record_sample(&mut self, _record: &SampleRecord) -> Result<()> {
            anyhow::bail!("dashboard offline")
        }

        fn record_summary(&mut self, _summary: &Summary) -> Result<()> {
            anyhow::bail!("dashboard offline")
        }
    }

    /// Judge stub: rates answers containing "Bonjour" 1, others fail transport
    struct FrenchJudge;

    #[async_trait]
    impl RatingClient for FrenchJudge {
        async fn rate(&self, _system: &str, user_prompt: &str) -> Result<String, RatingError> {
            if user_prompt.contains("Model Answer: Bonjour") {
                Ok("Reason: Answered in French.\nScore: 1".to_string())
            } else {
                Err(RatingError::Transport("connection reset".to_string()))
            }
        }

        fn model(&self) -> &str {
            "french-judge"
        }
    }

    fn capturing_runner(evaluator: Evaluator, metric: Metric) -> (Runner, Arc<Mutex<Captured>>) {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let runner = Runner::new(evaluator, metric)
            .with_reporter(Box::new(CapturingReporter(Arc::clone(&captured))));
        (runner, captured)
    }

    fn line(expected: &str, generated: &str) -> String {
        serde_json::json!({
            "question": "Is the sky blue?",
            "expected_answer": expected,
            "generated_answer": generated,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_boolq_run() {
        let input = [line("yes", "Yes, it is."), line("yes", "no"), line("no", "No.")].join("\n");
        let (mut runner, captured) = capturing_runner(Evaluator::new(), Metric::Boolq);
        let run = runner.run_info("smolvox", "inline", None);

        let summary = runner.run(Cursor::new(input), &run).await.unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, 0);
        assert!((summary.average_score.unwrap() - 2.0 / 3.0).abs() < 1e-9);

        let captured = captured.lock().unwrap();
        assert_eq!(captured.runs.len(), 1);
        assert_eq!(captured.runs[0].rating_model, None);
        assert_eq!(captured.runs[0].user_prompt, None);
        assert_eq!(captured.runs[0].score_scale, None);
        let scores: Vec<_> = captured.samples.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![Some(1.0), Some(0.0), Some(1.0)]);
        assert_eq!(captured.samples[1].running_average, Some(0.5));
        assert_eq!(captured.summaries, vec![summary]);
    }

    #[tokio::test]
    async fn test_malformed_line_is_reported_and_counted() {
        let input = format!(
            "{}\nnot json at all\n\n{}\n",
            line("the cat sat", "the cat sat"),
            line("the cat sat", "the cat sit")
        );
        let (mut runner, captured) = capturing_runner(Evaluator::new(), Metric::Asr);
        let run = runner.run_info("smolvox", "inline", None);

        let summary = runner.run(Cursor::new(input), &run).await.unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.scored, 2);

        let captured = captured.lock().unwrap();
        assert_eq!(captured.samples.len(), 3);
        assert_eq!(captured.samples[1].index, 1);
        assert!(captured.samples[1].error.as_deref().unwrap().starts_with("input_error"));
        assert_eq!(captured.samples[2].index, 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_a_failed_sample() {
        let mut input = line("yes", "yes").into_bytes();
        input.extend_from_slice(b"\n\xff\xfe garbage\r\n");
        input.extend_from_slice(line("no", "No.").as_bytes());
        let (mut runner, captured) = capturing_runner(Evaluator::new(), Metric::Boolq);
        let run = runner.run_info("smolvox", "inline", None);

        let summary = runner.run(Cursor::new(input), &run).await.unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.scored, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.average_score, Some(1.0));

        let captured = captured.lock().unwrap();
        assert!(captured.samples[1].error.as_deref().unwrap().contains("UTF-8"));
        assert_eq!(captured.samples[2].score, Some(1.0));
        assert_eq!(captured.summaries.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_aborts_when_configured() {
        let mut input = line("yes", "yes").into_bytes();
        input.extend_from_slice(b"\n\xff\xfe\n");
        let (runner, _captured) = capturing_runner(Evaluator::new(), Metric::Boolq);
        let mut runner = runner.abort_on_input_error(true);
        let run = runner.run_info("smolvox", "inline", None);

        let err = runner.run(Cursor::new(input), &run).await.unwrap_err();

        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_crlf_lines() {
        let input = format!("{}\r\n{}\r\n", line("yes", "yes"), line("no", "yes"));
        let (mut runner, _captured) = capturing_runner(Evaluator::new(), Metric::Boolq);
        let run = runner.run_info("smolvox", "inline", None);

        let summary = runner.run(Cursor::new(input), &run).await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.average_score, Some(0.5));
    }

    #[tokio::test]
    async fn test_abort_on_input_error() {
        let input = format!("{}\n{{\"question\": 1}}\n", line("yes", "yes"));
        let (runner, captured) = capturing_runner(Evaluator::new(), Metric::Boolq);
        let mut runner = runner.abort_on_input_error(true);
        let run = runner.run_info("smolvox", "inline", None);

        let err = runner.run(Cursor::new(input), &run).await.unwrap_err();

        assert!(err.to_string().contains("line 2"));
        assert!(captured.lock().unwrap().summaries.is_empty());
    }

    #[tokio::test]
    async fn test_instruct_run_survives_judge_failures() {
        let config = JudgeConfig {
            max_attempts: 2,
            initial_backoff_ms: 0,
            ..JudgeConfig::default()
        };
        let judge = Judge::new(Box::new(FrenchJudge), &config);
        let (mut runner, captured) = capturing_runner(Evaluator::with_judge(judge), Metric::Instruct);
        let run = runner.run_info("smolvox", "inline", None);
        let input = [line("Bonjour", "Bonjour!"), line("Bonjour", "Hello")].join("\n");

        let summary = runner.run(Cursor::new(input), &run).await.unwrap();

        assert_eq!(summary.average_score, Some(1.0));
        assert_eq!(summary.failed, 1);
        assert_eq!(run.rating_model.as_deref(), Some("french-judge"));
        assert_eq!(run.score_scale, Some(1.0));
        assert_eq!(run.system_prompt.as_deref(), Some(config.system_prompt.as_str()));
        assert!(run.user_prompt.as_deref().unwrap().contains("{generated_answer}"));

        let captured = captured.lock().unwrap();
        assert_eq!(captured.samples[0].reason.as_deref(), Some("Answered in French."));
        assert!(captured.samples[1].error.as_deref().unwrap().starts_with("judge_unavailable"));
        assert_eq!(captured.samples[1].generated_answer, "Hello");
    }

    #[tokio::test]
    async fn test_failing_reporter_does_not_stop_scoring() {
        let (runner, captured) = capturing_runner(Evaluator::new(), Metric::Boolq);
        let mut runner = runner.with_reporter(Box::new(FailingReporter));
        let run = runner.run_info("smolvox", "inline", None);

        let summary = runner
            .run(Cursor::new(line("yes", "yes")), &run)
            .await
            .unwrap();

        assert_eq!(summary.average_score, Some(1.0));
        assert_eq!(captured.lock().unwrap().samples.len(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_stops_before_next_sample() {
        let (mut runner, captured) = capturing_runner(Evaluator::new(), Metric::Boolq);
        runner.interrupt_flag().store(true, Ordering::SeqCst);
        let run = runner.run_info("smolvox", "inline", None);

        let summary = runner
            .run(Cursor::new(line("yes", "yes")), &run)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.total, 0);
        assert_eq!(captured.lock().unwrap().summaries.len(), 1);
    }

    #[test]
    fn test_second_interrupt_requests_exit() {
        let runner = Runner::new(Evaluator::new(), Metric::Asr);
        let flag = runner.interrupt_flag();

        assert!(!signal_interrupt(&flag));
        assert!(runner.interrupted.load(Ordering::SeqCst));
        assert!(signal_interrupt(&flag));
    }

    #[tokio::test]
    async fn test_run_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "{}", line("the cat sat", "the cat sit")).unwrap();

        let (mut runner, _captured) = capturing_runner(Evaluator::new(), Metric::Asr);
        let run = runner.run_info("smolvox", "answers.jsonl", Some(DatasetConfig::big_bench_audio()));
        let summary = runner.run_file(temp_file.path(), &run).await.unwrap();

        assert!((summary.average_score.unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_count_samples_skips_blank_lines() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "{}", line("yes", "yes")).unwrap();
        writeln!(temp_file, "  ").unwrap();
        writeln!(temp_file, "not json").unwrap();
        temp_file.write_all(b"\xff\xfe\n").unwrap();

        assert_eq!(count_samples(temp_file.path()).unwrap(), 3);
        assert!(count_samples(Path::new("/nonexistent/missing.jsonl")).is_err());
    }

    #[tokio::test]
    async fn test_run_file_missing() {
        let (mut runner, _captured) = capturing_runner(Evaluator::new(), Metric::Asr);
        let run = runner.run_info("smolvox", "missing.jsonl", None);

        let err = runner
            .run_file(Path::new("/nonexistent/missing.jsonl"), &run)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Failed to open input file"));
    }
}
