//! File execution: steps of one workflow file run strictly in order against
//! a fresh scope.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::StepRunner;
use crate::context::Scope;
use crate::http::HttpClients;
use crate::limits::RateLimiter;
use crate::loader;
use crate::report::{FileResult, ReportSink};

/// Run-wide collaborators shared by every file.
pub struct RunContext<'a> {
    pub clients: &'a HttpClients,
    pub limiter: &'a RateLimiter,
    pub cancel: &'a CancellationToken,
    pub variables: &'a HashMap<String, String>,
    pub secrets: &'a HashMap<String, String>,
    pub salt: &'a str,
    pub debug: bool,
}

/// Executes one workflow file. Parse and validation failures yield a
/// zero-request failure; otherwise steps run in order and the first step
/// error stops the file. `request_count` counts steps whose attempts
/// reached dispatch.
pub async fn run_file(
    context: &RunContext<'_>,
    path: &Path,
    sink: &mut dyn ReportSink,
) -> FileResult {
    let started = Instant::now();
    let filename = path.display().to_string();

    let steps = match loader::load_steps(path) {
        Ok(steps) => steps,
        Err(e) => {
            return FileResult {
                filename,
                request_count: 0,
                duration: started.elapsed(),
                error: Some(e.to_string()),
            }
        }
    };

    let secret_values: Vec<String> = context.secrets.values().cloned().collect();
    let runner = StepRunner {
        clients: context.clients,
        limiter: context.limiter,
        cancel: context.cancel,
        secret_values: &secret_values,
        salt: context.salt,
        debug: context.debug,
        base_dir: path.parent().map(Path::to_path_buf),
    };

    let mut scope = Scope::seeded(context.variables, context.secrets);
    let mut request_count = 0u64;

    for (position, step) in steps.iter().enumerate() {
        let index = position + 1;
        info!(file = %filename, step = index, "running step");

        let outcome = runner.run_step(index, step, &mut scope, sink).await;
        if outcome.request_made {
            request_count += 1;
        }
        if let Some(error) = outcome.error {
            let error = error.at_step(index, step.name.as_deref());
            return FileResult {
                filename,
                request_count,
                duration: started.elapsed(),
                error: Some(error.to_string()),
            };
        }
    }

    FileResult {
        filename,
        request_count,
        duration: started.elapsed(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ClientOptions;
    use serde_json::json;
    use std::io::Write as _;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Captures sink calls for inspection.
    #[derive(Default)]
    struct RecordingSink {
        debug_records: Vec<(String, Vec<u8>)>,
    }

    impl ReportSink for RecordingSink {
        fn debug(&mut self, description: &str, data: &[u8]) -> std::io::Result<()> {
            self.debug_records.push((description.to_string(), data.to_vec()));
            Ok(())
        }

        fn iteration(&mut self, _: u64, _: &crate::report::Summary) -> std::io::Result<()> {
            Ok(())
        }

        fn summary(&mut self, _: &crate::report::Summary) -> std::io::Result<()> {
            Ok(())
        }

        fn aggregate(&mut self, _: &crate::report::AggregatedStats) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        clients: HttpClients,
        limiter: RateLimiter,
        cancel: CancellationToken,
        variables: HashMap<String, String>,
        secrets: HashMap<String, String>,
        salt: String,
        debug: bool,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clients: HttpClients::build(&ClientOptions::default()).unwrap(),
                limiter: RateLimiter::new(0.0),
                cancel: CancellationToken::new(),
                variables: HashMap::new(),
                secrets: HashMap::new(),
                salt: "s".to_string(),
                debug: false,
            }
        }

        fn context(&self) -> RunContext<'_> {
            RunContext {
                clients: &self.clients,
                limiter: &self.limiter,
                cancel: &self.cancel,
                variables: &self.variables,
                secrets: &self.secrets,
                salt: &self.salt,
                debug: self.debug,
            }
        }
    }

    fn workflow_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_single_get_with_status_assert() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
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
        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;

        assert!(result.success(), "unexpected error: {:?}", result.error);
        assert_eq!(result.request_count, 1);
    }

    #[tokio::test]
    async fn test_chained_capture_feeds_next_step() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/users/1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 123, "name": "Alice"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(url_path("/posts"))
            .and(body_json(json!({"author_id": 123, "author_name": "Alice"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let yaml = format!(
            r#"
- method: GET
  url: {base}/users/1
  captures:
    jsonpath:
      - name: user_id
        path: $.id
      - name: user_name
        path: $.name
- method: POST
  url: {base}/posts
  headers:
    content-type: application/json
  body: '{{"author_id":{{{{ .user_id }}}},"author_name":"{{{{ .user_name }}}}"}}'
  asserts:
    status:
      - operation: equals
        value: 201
"#,
            base = server.uri()
        );
        let file = workflow_file(&yaml);
        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;

        assert!(result.success(), "unexpected error: {:?}", result.error);
        assert_eq!(result.request_count, 2);
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let step = format!("- method: GET\n  url: {}/ok\n", server.uri());
        let yaml = format!("{step}{step}{step}");
        let file = workflow_file(&yaml);

        let mut fixture = Fixture::new();
        fixture.limiter = RateLimiter::new(10.0);

        let started = Instant::now();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;
        let elapsed = started.elapsed();

        assert!(result.success());
        assert_eq!(result.request_count, 3);
        assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let yaml = format!(
            r#"
- method: GET
  url: {}/flaky
  options:
    retries: 3
  asserts:
    status:
      - operation: equals
        value: 200
"#,
            server.uri()
        );
        let file = workflow_file(&yaml);
        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;

        assert!(result.success(), "unexpected error: {:?}", result.error);
        // Three attempts, one request-count increment.
        assert_eq!(result.request_count, 1);
    }

    #[tokio::test]
    async fn test_retries_zero_is_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let yaml = format!(
            r#"
- method: GET
  url: {}/once
  asserts:
    status:
      - operation: equals
        value: 200
"#,
            server.uri()
        );
        let file = workflow_file(&yaml);
        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;

        assert!(!result.success());
        assert_eq!(result.request_count, 1);
        let message = result.error.unwrap();
        assert!(message.contains("step 1"), "message: {message}");
        assert!(
            message.contains("status assertion failed: expected equals 200, got 500"),
            "message: {message}"
        );
    }

    #[tokio::test]
    async fn test_when_gate_skips_request_and_scope_stays_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/skipped"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "x"})))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let yaml = format!(
            r#"
- method: GET
  url: {base}/skipped
  when: "is_ready == true"
  captures:
    jsonpath:
      - name: token
        path: $.token
- method: GET
  url: {base}/ok
"#,
            base = server.uri()
        );
        let file = workflow_file(&yaml);
        let mut fixture = Fixture::new();
        fixture
            .variables
            .insert("is_ready".to_string(), "false".to_string());

        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;
        assert!(result.success(), "unexpected error: {:?}", result.error);
        assert_eq!(result.request_count, 1);
    }

    #[tokio::test]
    async fn test_skipped_step_commits_nothing_to_scope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        // Step 1 is gated off, so its capture never lands; step 2's strict
        // template lookup must fail.
        let yaml = format!(
            r#"
- method: GET
  url: {base}/login
  when: "false"
  captures:
    body:
      - name: token
- method: GET
  url: {base}/use/{{{{ .token }}}}
"#,
            base = server.uri()
        );
        let file = workflow_file(&yaml);
        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;

        assert!(!result.success());
        let message = result.error.unwrap();
        assert!(message.contains("step 2"));
        assert!(message.contains("unknown variable 'token'"), "message: {message}");
        assert_eq!(result.request_count, 0);
    }

    #[tokio::test]
    async fn test_debug_dump_redacts_secrets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer secret123"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let yaml = format!(
            r#"
- method: GET
  url: {}/private
  headers:
    authorization: "Bearer {{{{ .API_KEY }}}}"
"#,
            server.uri()
        );
        let file = workflow_file(&yaml);
        let mut fixture = Fixture::new();
        fixture.debug = true;
        fixture
            .secrets
            .insert("API_KEY".to_string(), "secret123".to_string());

        let mut sink = RecordingSink::default();
        let result = run_file(&fixture.context(), file.path(), &mut sink).await;
        assert!(result.success(), "unexpected error: {:?}", result.error);

        // One request dump, one response dump.
        assert_eq!(sink.debug_records.len(), 2);
        let request_dump = String::from_utf8_lossy(&sink.debug_records[0].1).into_owned();
        assert!(
            request_dump.contains("authorization: Bearer [S256:102a222d]"),
            "dump: {request_dump}"
        );
        assert!(!request_dump.contains("secret123"));
    }

    #[tokio::test]
    async fn test_follow_redirect_false_sees_the_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/moved"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/destination"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/destination"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let yaml = format!(
            r#"
- method: GET
  url: {}/moved
  options:
    follow_redirect: false
  asserts:
    status:
      - operation: equals
        value: 302
    headers:
      - name: location
        operation: equals
        value: /destination
"#,
            server.uri()
        );
        let file = workflow_file(&yaml);
        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;
        assert!(result.success(), "unexpected error: {:?}", result.error);
    }

    #[tokio::test]
    async fn test_query_parameters_appended_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let yaml = format!(
            r#"
- method: GET
  url: "{}/search?raw=1"
  query:
    - key: q
      value: "two words"
    - key: q
      value: again
  captures:
    status:
      - name: code
"#,
            server.uri()
        );
        let file = workflow_file(&yaml);
        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;
        assert!(result.success(), "unexpected error: {:?}", result.error);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let query = requests[0].url.query().unwrap();
        assert_eq!(query, "raw=1&q=two%20words&q=again");
    }

    #[tokio::test]
    async fn test_body_file_resolves_relative_to_workflow_dir() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({"from": "disk"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("payload.json"), r#"{"from": "disk"}"#).unwrap();
        let flow = dir.path().join("flow.yaml");
        std::fs::write(
            &flow,
            format!(
                "- method: POST\n  url: {}/upload\n  body_file: payload.json\n",
                server.uri()
            ),
        )
        .unwrap();

        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), &flow, &mut RecordingSink::default()).await;
        assert!(result.success(), "unexpected error: {:?}", result.error);
    }

    #[tokio::test]
    async fn test_body_file_templated_to_drive_path_is_not_joined() {
        let dir = tempfile::tempdir().unwrap();
        let flow = dir.path().join("flow.yaml");
        std::fs::write(
            &flow,
            "- method: POST\n  url: http://127.0.0.1:9/upload\n  body_file: \"{{ .payload_path }}\"\n",
        )
        .unwrap();

        let mut fixture = Fixture::new();
        fixture.variables.insert(
            "payload_path".to_string(),
            r"C:\data\missing.json".to_string(),
        );

        let result = run_file(&fixture.context(), &flow, &mut RecordingSink::default()).await;
        assert!(!result.success());
        // The expanded path is used verbatim, never joined onto the
        // workflow directory, so no request is prepared.
        assert_eq!(result.request_count, 0);
        let message = result.error.unwrap();
        assert!(
            message.contains(r"failed to read body file C:\data\missing.json"),
            "message: {message}"
        );
        assert!(!message.contains(dir.path().to_str().unwrap()), "message: {message}");
    }

    #[tokio::test]
    async fn test_parse_failure_counts_zero_requests() {
        let file = workflow_file("- method: [broken\n");
        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;
        assert!(!result.success());
        assert_eq!(result.request_count, 0);
    }

    #[tokio::test]
    async fn test_validation_failure_counts_zero_requests() {
        let file = workflow_file("- method: GET\n  url: \"\"\n");
        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;
        assert!(!result.success());
        assert_eq!(result.request_count, 0);
        assert!(result.error.unwrap().contains("url is required"));
    }

    #[tokio::test]
    async fn test_transport_error_is_counted_and_reported() {
        // Nothing listens on this port.
        let file = workflow_file("- method: GET\n  url: http://127.0.0.1:9/down\n");
        let fixture = Fixture::new();
        let result = run_file(&fixture.context(), file.path(), &mut RecordingSink::default()).await;
        assert!(!result.success());
        assert_eq!(result.request_count, 1);
        assert!(result.error.unwrap().contains("request failed"));
    }
}
