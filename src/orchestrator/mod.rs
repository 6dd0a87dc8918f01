//! Run orchestration: iterates the file list once, a fixed number of times,
//! or forever, and drives the report sink.
//!
//! Cancellation is checked between files and between iterations; whatever
//! triggered it, the run reports "Interrupted after N iterations" on stderr
//! and exits 1.

use std::io;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{error, info};

use crate::report::{AggregatedStats, ReportSink, Summary};
use crate::runner::file::{run_file, RunContext};

pub struct Orchestrator<'a> {
    /// Workflow files, executed in order within each iteration.
    pub files: &'a [PathBuf],
    /// Additional passes over the file list; negative repeats forever.
    pub repeat: i64,
    pub context: RunContext<'a>,
}

impl Orchestrator<'_> {
    /// Runs to completion and returns the process exit code.
    pub async fn run(&self, sink: &mut dyn ReportSink) -> i32 {
        if self.repeat < 0 {
            self.run_infinite(sink).await
        } else {
            self.run_finite(self.repeat as u64 + 1, sink).await
        }
    }

    async fn run_finite(&self, total: u64, sink: &mut dyn ReportSink) -> i32 {
        let mut iterations: Vec<Summary> = Vec::new();

        for number in 1..=total {
            if self.context.cancel.is_cancelled() {
                return interrupted(number - 1, Some(total));
            }

            let summary = self.run_iteration(sink).await;
            if self.context.cancel.is_cancelled() {
                return interrupted(number - 1, Some(total));
            }

            let emitted = if total == 1 {
                sink.summary(&summary)
            } else {
                sink.iteration(number, &summary)
            };
            if let Err(e) = emitted {
                return report_failure(e);
            }

            let failed = !summary.success();
            iterations.push(summary);
            if failed {
                return 1;
            }
        }

        if total > 1 {
            let stats = AggregatedStats::from_iterations(iterations);
            if let Err(e) = sink.aggregate(&stats) {
                return report_failure(e);
            }
        }
        0
    }

    async fn run_infinite(&self, sink: &mut dyn ReportSink) -> i32 {
        let mut completed = 0u64;
        loop {
            if self.context.cancel.is_cancelled() {
                return interrupted(completed, None);
            }

            let summary = self.run_iteration(sink).await;
            if self.context.cancel.is_cancelled() {
                return interrupted(completed, None);
            }
            completed += 1;

            if let Err(e) = sink.iteration(completed, &summary) {
                return report_failure(e);
            }
            if !summary.success() {
                return 1;
            }
        }
    }

    async fn run_iteration(&self, sink: &mut dyn ReportSink) -> Summary {
        let started = Instant::now();
        let mut results = Vec::new();
        for path in self.files {
            if self.context.cancel.is_cancelled() {
                break;
            }
            info!(file = %path.display(), "executing file");
            results.push(run_file(&self.context, path, sink).await);
        }
        Summary::new(results, started.elapsed())
    }
}

fn interrupted(completed: u64, total: Option<u64>) -> i32 {
    match total {
        Some(total) => eprintln!("Interrupted after {completed} iterations of {total}"),
        None => eprintln!("Interrupted after {completed} iterations"),
    }
    1
}

fn report_failure(e: io::Error) -> i32 {
    error!(error = %e, "failed to write report");
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ClientOptions, HttpClients};
    use crate::limits::RateLimiter;
    use std::collections::HashMap;
    use std::io::Write as _;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingSink {
        iterations: Vec<u64>,
        summaries: usize,
        aggregates: usize,
    }

    impl ReportSink for RecordingSink {
        fn debug(&mut self, _: &str, _: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn iteration(&mut self, number: u64, _: &Summary) -> io::Result<()> {
            self.iterations.push(number);
            Ok(())
        }

        fn summary(&mut self, _: &Summary) -> io::Result<()> {
            self.summaries += 1;
            Ok(())
        }

        fn aggregate(&mut self, _: &AggregatedStats) -> io::Result<()> {
            self.aggregates += 1;
            Ok(())
        }
    }

    struct Fixture {
        clients: HttpClients,
        limiter: RateLimiter,
        cancel: CancellationToken,
        variables: HashMap<String, String>,
        secrets: HashMap<String, String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clients: HttpClients::build(&ClientOptions::default()).unwrap(),
                limiter: RateLimiter::new(0.0),
                cancel: CancellationToken::new(),
                variables: HashMap::new(),
                secrets: HashMap::new(),
            }
        }

        fn context(&self) -> RunContext<'_> {
            RunContext {
                clients: &self.clients,
                limiter: &self.limiter,
                cancel: &self.cancel,
                variables: &self.variables,
                secrets: &self.secrets,
                salt: "s",
                debug: false,
            }
        }
    }

    fn workflow_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    async fn ok_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_single_iteration_emits_summary_and_exits_zero() {
        let server = ok_server().await;
        let file = workflow_file(&format!("- method: GET\n  url: {}/ok\n", server.uri()));
        let files = vec![file.path().to_path_buf()];
        let fixture = Fixture::new();

        let orchestrator = Orchestrator {
            files: &files,
            repeat: 0,
            context: fixture.context(),
        };
        let mut sink = RecordingSink::default();
        let code = orchestrator.run(&mut sink).await;

        assert_eq!(code, 0);
        assert_eq!(sink.summaries, 1);
        assert!(sink.iterations.is_empty());
        assert_eq!(sink.aggregates, 0);
    }

    #[tokio::test]
    async fn test_multiple_iterations_emit_lines_and_aggregate() {
        let server = ok_server().await;
        let file = workflow_file(&format!("- method: GET\n  url: {}/ok\n", server.uri()));
        let files = vec![file.path().to_path_buf()];
        let fixture = Fixture::new();

        let orchestrator = Orchestrator {
            files: &files,
            repeat: 2,
            context: fixture.context(),
        };
        let mut sink = RecordingSink::default();
        let code = orchestrator.run(&mut sink).await;

        assert_eq!(code, 0);
        assert_eq!(sink.iterations, vec![1, 2, 3]);
        assert_eq!(sink.summaries, 0);
        assert_eq!(sink.aggregates, 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_iteration_aborts_without_aggregate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let yaml = format!(
            r#"
- method: GET
  url: {}/ok
  asserts:
    status:
      - operation: equals
        value: 200
"#,
            server.uri()
        );
        let file = workflow_file(&yaml);
        let files = vec![file.path().to_path_buf()];
        let fixture = Fixture::new();

        let orchestrator = Orchestrator {
            files: &files,
            repeat: 4,
            context: fixture.context(),
        };
        let mut sink = RecordingSink::default();
        let code = orchestrator.run(&mut sink).await;

        assert_eq!(code, 1);
        assert_eq!(sink.iterations, vec![1]);
        assert_eq!(sink.aggregates, 0);
    }

    #[tokio::test]
    async fn test_all_files_execute_within_an_iteration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/bad"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let failing = workflow_file(&format!(
            "- method: GET\n  url: {}/bad\n  asserts:\n    status:\n      - operation: equals\n        value: 200\n",
            server.uri()
        ));
        let passing = workflow_file(&format!("- method: GET\n  url: {}/ok\n", server.uri()));
        let files = vec![failing.path().to_path_buf(), passing.path().to_path_buf()];
        let fixture = Fixture::new();

        let orchestrator = Orchestrator {
            files: &files,
            repeat: 0,
            context: fixture.context(),
        };
        let mut sink = RecordingSink::default();
        let code = orchestrator.run(&mut sink).await;

        // The failing file does not stop the second file of the iteration,
        // but the iteration itself fails.
        assert_eq!(code, 1);
        assert_eq!(sink.summaries, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let server = ok_server().await;
        let file = workflow_file(&format!("- method: GET\n  url: {}/ok\n", server.uri()));
        let files = vec![file.path().to_path_buf()];
        let fixture = Fixture::new();
        fixture.cancel.cancel();

        let orchestrator = Orchestrator {
            files: &files,
            repeat: 3,
            context: fixture.context(),
        };
        let mut sink = RecordingSink::default();
        let code = orchestrator.run(&mut sink).await;

        assert_eq!(code, 1);
        assert!(sink.iterations.is_empty());
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_infinite_mode_stops_on_cancellation() {
        let server = ok_server().await;
        let file = workflow_file(&format!("- method: GET\n  url: {}/ok\n", server.uri()));
        let files = vec![file.path().to_path_buf()];
        let fixture = Fixture::new();

        let cancel = fixture.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let orchestrator = Orchestrator {
            files: &files,
            repeat: -1,
            context: fixture.context(),
        };
        let mut sink = RecordingSink::default();
        let code = orchestrator.run(&mut sink).await;

        assert_eq!(code, 1);
        // At least one iteration completed before the signal landed.
        assert!(!sink.iterations.is_empty());
    }
}
