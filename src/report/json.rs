//! Machine-readable report output for CI consumers.

use std::io::{self, Write};

use serde::Serialize;

use super::{AggregatedStats, FileResult, ReportSink, Summary};

/// Writes one JSON document per report event: debug records and iteration
/// summaries as single lines, the final summary or aggregate pretty-printed.
pub struct JsonReport<W> {
    out: W,
}

impl<W: Write> JsonReport<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

#[derive(Serialize)]
struct FileResultRecord<'a> {
    filename: &'a str,
    request_count: u64,
    duration_ms: u64,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<'a> From<&'a FileResult> for FileResultRecord<'a> {
    fn from(result: &'a FileResult) -> Self {
        Self {
            filename: &result.filename,
            request_count: result.request_count,
            duration_ms: result.duration.as_millis() as u64,
            success: result.success(),
            error: result.error.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    file_results: Vec<FileResultRecord<'a>>,
    executed_files: u64,
    executed_requests: u64,
    succeeded_files: u64,
    failed_files: u64,
    duration_ms: u64,
    requests_per_second: f64,
    success_percentage: f64,
    failure_percentage: f64,
}

impl<'a> From<&'a Summary> for SummaryRecord<'a> {
    fn from(summary: &'a Summary) -> Self {
        Self {
            file_results: summary.file_results.iter().map(Into::into).collect(),
            executed_files: summary.executed_files(),
            executed_requests: summary.executed_requests(),
            succeeded_files: summary.succeeded_files(),
            failed_files: summary.failed_files(),
            duration_ms: summary.duration.as_millis() as u64,
            requests_per_second: summary.requests_per_second(),
            success_percentage: summary.success_percentage(),
            failure_percentage: summary.failure_percentage(),
        }
    }
}

#[derive(Serialize)]
struct IterationRecord<'a> {
    iteration: u64,
    #[serde(flatten)]
    summary: SummaryRecord<'a>,
}

#[derive(Serialize)]
struct AggregatedRecord<'a> {
    iterations: Vec<SummaryRecord<'a>>,
    aggregated: AggregatedTotals,
}

#[derive(Serialize)]
struct AggregatedTotals {
    total_iterations: u64,
    successful_iterations: u64,
    failed_iterations: u64,
    iteration_success_rate: f64,
    total_requests: u64,
    average_requests_per_iteration: f64,
    average_duration_ms: u64,
    total_duration_ms: u64,
}

impl From<&AggregatedStats> for AggregatedTotals {
    fn from(stats: &AggregatedStats) -> Self {
        Self {
            total_iterations: stats.total_iterations(),
            successful_iterations: stats.successful_iterations(),
            failed_iterations: stats.failed_iterations(),
            iteration_success_rate: stats.iteration_success_rate(),
            total_requests: stats.total_requests(),
            average_requests_per_iteration: stats.average_requests_per_iteration(),
            average_duration_ms: stats.average_duration().as_millis() as u64,
            total_duration_ms: stats.total_duration().as_millis() as u64,
        }
    }
}

#[derive(Serialize)]
struct DebugRecord<'a> {
    description: &'a str,
    data: &'a str,
}

impl<W: Write> ReportSink for JsonReport<W> {
    fn debug(&mut self, description: &str, data: &[u8]) -> io::Result<()> {
        let data = String::from_utf8_lossy(data);
        let record = DebugRecord {
            description,
            data: &data,
        };
        serde_json::to_writer(&mut self.out, &record)?;
        writeln!(self.out)
    }

    fn iteration(&mut self, number: u64, summary: &Summary) -> io::Result<()> {
        let record = IterationRecord {
            iteration: number,
            summary: summary.into(),
        };
        serde_json::to_writer(&mut self.out, &record)?;
        writeln!(self.out)
    }

    fn summary(&mut self, summary: &Summary) -> io::Result<()> {
        let record: SummaryRecord<'_> = summary.into();
        serde_json::to_writer_pretty(&mut self.out, &record)?;
        writeln!(self.out)
    }

    fn aggregate(&mut self, stats: &AggregatedStats) -> io::Result<()> {
        let record = AggregatedRecord {
            iterations: stats.iterations.iter().map(Into::into).collect(),
            aggregated: stats.into(),
        };
        serde_json::to_writer_pretty(&mut self.out, &record)?;
        writeln!(self.out)
    }
}
