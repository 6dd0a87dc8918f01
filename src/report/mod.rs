//! Run results and the formatter contract.
//!
//! A [`FileResult`] is produced per workflow file, a [`Summary`] per
//! iteration over the file list, and [`AggregatedStats`] folds the
//! summaries of a multi-iteration run. Formatters implement [`ReportSink`];
//! the orchestrator drives one sink for the whole run.

pub mod json;
pub mod text;

use std::io;
use std::time::Duration;

/// Outcome of executing one workflow file.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub filename: String,
    /// Steps whose attempts reached dispatch. Retries never double-count.
    pub request_count: u64,
    pub duration: Duration,
    pub error: Option<String>,
}

impl FileResult {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn duration_ms(&self) -> u128 {
        self.duration.as_millis()
    }
}

/// Aggregate of one pass over the configured file list.
#[derive(Debug, Clone)]
pub struct Summary {
    pub file_results: Vec<FileResult>,
    /// Wall-clock duration of the whole iteration, measured monotonically.
    pub duration: Duration,
}

impl Summary {
    pub fn new(file_results: Vec<FileResult>, duration: Duration) -> Self {
        Self {
            file_results,
            duration,
        }
    }

    pub fn executed_files(&self) -> u64 {
        self.file_results.len() as u64
    }

    pub fn executed_requests(&self) -> u64 {
        self.file_results.iter().map(|r| r.request_count).sum()
    }

    pub fn succeeded_files(&self) -> u64 {
        self.file_results.iter().filter(|r| r.success()).count() as u64
    }

    pub fn failed_files(&self) -> u64 {
        self.executed_files() - self.succeeded_files()
    }

    pub fn success(&self) -> bool {
        self.failed_files() == 0
    }

    pub fn requests_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.executed_requests() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn success_percentage(&self) -> f64 {
        let executed = self.executed_files();
        if executed == 0 {
            return 100.0;
        }
        self.succeeded_files() as f64 / executed as f64 * 100.0
    }

    pub fn failure_percentage(&self) -> f64 {
        100.0 - self.success_percentage()
    }
}

/// Folds the summaries of a finite multi-iteration run.
#[derive(Debug, Clone)]
pub struct AggregatedStats {
    pub iterations: Vec<Summary>,
}

impl AggregatedStats {
    pub fn from_iterations(iterations: Vec<Summary>) -> Self {
        Self { iterations }
    }

    pub fn total_iterations(&self) -> u64 {
        self.iterations.len() as u64
    }

    pub fn successful_iterations(&self) -> u64 {
        self.iterations.iter().filter(|s| s.success()).count() as u64
    }

    pub fn failed_iterations(&self) -> u64 {
        self.total_iterations() - self.successful_iterations()
    }

    pub fn iteration_success_rate(&self) -> f64 {
        let total = self.total_iterations();
        if total == 0 {
            return 100.0;
        }
        self.successful_iterations() as f64 / total as f64 * 100.0
    }

    pub fn total_requests(&self) -> u64 {
        self.iterations.iter().map(Summary::executed_requests).sum()
    }

    pub fn average_requests_per_iteration(&self) -> f64 {
        let total = self.total_iterations();
        if total == 0 {
            return 0.0;
        }
        self.total_requests() as f64 / total as f64
    }

    pub fn total_duration(&self) -> Duration {
        self.iterations.iter().map(|s| s.duration).sum()
    }

    pub fn average_duration(&self) -> Duration {
        let total = self.total_iterations();
        if total == 0 {
            return Duration::ZERO;
        }
        self.total_duration() / total as u32
    }
}

/// Consumes run output: debug dumps as they happen, one line or document
/// per iteration, and a final summary or aggregate.
pub trait ReportSink {
    /// A redacted wire-form dump with a short description.
    fn debug(&mut self, description: &str, data: &[u8]) -> io::Result<()>;

    /// Result of one iteration in a multi-iteration or infinite run.
    fn iteration(&mut self, number: u64, summary: &Summary) -> io::Result<()>;

    /// Final summary of a single-iteration run.
    fn summary(&mut self, summary: &Summary) -> io::Result<()>;

    /// Aggregate over all iterations of a finite multi-iteration run.
    fn aggregate(&mut self, stats: &AggregatedStats) -> io::Result<()>;
}
