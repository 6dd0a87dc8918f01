//! Human-readable report output.

use std::io::{self, Write};

use super::{AggregatedStats, ReportSink, Summary};

const RULE: &str =
    "================================================================================";

/// Writes the text report format to any writer (stdout in production).
/// Debug blocks are framed by `=` rule lines.
pub struct TextReport<W> {
    out: W,
}

impl<W: Write> TextReport<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn write_summary_body(&mut self, summary: &Summary) -> io::Result<()> {
        for result in &summary.file_results {
            match &result.error {
                None => writeln!(
                    self.out,
                    "{}: Success ({} request(s) in {} ms)",
                    result.filename,
                    result.request_count,
                    result.duration_ms()
                )?,
                Some(error) => writeln!(
                    self.out,
                    "{}: Failed: {} ({} request(s) in {} ms)",
                    result.filename,
                    error,
                    result.request_count,
                    result.duration_ms()
                )?,
            }
        }

        writeln!(self.out, "Executed files: {}", summary.executed_files())?;
        writeln!(
            self.out,
            "Executed requests: {} ({:.2}/s)",
            summary.executed_requests(),
            summary.requests_per_second()
        )?;
        writeln!(self.out, "Succeeded files: {}", summary.succeeded_files())?;
        writeln!(self.out, "Failed files: {}", summary.failed_files())?;
        writeln!(self.out, "Duration: {} ms", summary.duration.as_millis())?;
        Ok(())
    }
}

impl<W: Write> ReportSink for TextReport<W> {
    fn debug(&mut self, description: &str, data: &[u8]) -> io::Result<()> {
        writeln!(self.out, "{RULE}")?;
        writeln!(self.out, "{description}")?;
        writeln!(self.out, "{RULE}")?;
        self.out.write_all(data)?;
        if !data.ends_with(b"\n") {
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn iteration(&mut self, number: u64, summary: &Summary) -> io::Result<()> {
        let status = if summary.success() { "Success" } else { "Failed" };
        writeln!(
            self.out,
            "Iteration {}: {} ({} file(s), {} request(s), {} ms)",
            number,
            status,
            summary.executed_files(),
            summary.executed_requests(),
            summary.duration.as_millis()
        )
    }

    fn summary(&mut self, summary: &Summary) -> io::Result<()> {
        self.write_summary_body(summary)
    }

    fn aggregate(&mut self, stats: &AggregatedStats) -> io::Result<()> {
        writeln!(
            self.out,
            "Iterations: {} ({} succeeded, {} failed, {:.1}% success)",
            stats.total_iterations(),
            stats.successful_iterations(),
            stats.failed_iterations(),
            stats.iteration_success_rate()
        )?;
        writeln!(
            self.out,
            "Total requests: {} ({:.1}/iteration)",
            stats.total_requests(),
            stats.average_requests_per_iteration()
        )?;
        writeln!(
            self.out,
            "Average duration: {} ms",
            stats.average_duration().as_millis()
        )?;
        writeln!(
            self.out,
            "Total duration: {} ms",
            stats.total_duration().as_millis()
        )?;
        Ok(())
    }
}
