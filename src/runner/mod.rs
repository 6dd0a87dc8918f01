//! Step execution.
//!
//! A step moves through an explicit lifecycle: the `when` gate, request
//! preparation from templates and the current scope, the rate-limit wait,
//! dispatch, assertions in group order, captures, and finally the scope
//! commit. Retries repeat the whole prepare-to-capture cycle; preparation
//! failures are fatal and never retried.

pub mod file;

use std::path::{Path, PathBuf};

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, Request, Url};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{render_value, Scope};
use crate::errors::{Error, ErrorKind, Result};
use crate::expr;
use crate::extractors::{self, ResponseData};
use crate::http::{self, HttpClients};
use crate::limits::RateLimiter;
use crate::predicate;
use crate::protocol::{AssertSet, CaptureSet, Operation, Predicate, Step};
use crate::redact::Redactor;
use crate::report::ReportSink;
use crate::template;

/// Lifecycle of a step attempt. `Failed` can follow any state after the
/// gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Gated,
    Prepared,
    Awaited,
    Dispatched,
    Asserted,
    Captured,
    Committed,
    Failed,
}

/// What a step did: whether any attempt reached dispatch (at most one
/// request-count increment regardless of retries) and the error it surfaced,
/// if any.
#[derive(Debug)]
pub struct StepOutcome {
    pub request_made: bool,
    pub error: Option<Error>,
}

impl StepOutcome {
    fn success(request_made: bool) -> Self {
        Self {
            request_made,
            error: None,
        }
    }

    fn failed(request_made: bool, error: Error) -> Self {
        Self {
            request_made,
            error: Some(error),
        }
    }
}

/// Everything a step needs from its surroundings. Shared across all files
/// of a run, except for `base_dir` which follows the workflow file.
pub struct StepRunner<'a> {
    pub clients: &'a HttpClients,
    pub limiter: &'a RateLimiter,
    pub cancel: &'a CancellationToken,
    /// All secret values; always part of the redaction needle set.
    pub secret_values: &'a [String],
    pub salt: &'a str,
    pub debug: bool,
    /// Directory the workflow file lives in; relative `body_file` paths
    /// resolve against it.
    pub base_dir: Option<PathBuf>,
}

impl StepRunner<'_> {
    /// Runs one step to completion, mutating `scope` on success.
    pub async fn run_step(
        &self,
        index: usize,
        step: &Step,
        scope: &mut Scope,
        sink: &mut dyn ReportSink,
    ) -> StepOutcome {
        let mut state = StepState::Gated;

        if let Some(when) = &step.when {
            match expr::evaluate(when, scope) {
                Ok(true) => {}
                Ok(false) => {
                    info!(step = index, "step skipped by when gate");
                    return StepOutcome::success(false);
                }
                Err(e) => return StepOutcome::failed(false, e),
            }
        }

        let attempts = step.options.retries.max(0) as u64 + 1;
        let mut request_made = false;
        let mut last_error: Option<Error> = None;

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return StepOutcome::failed(request_made, Error::Cancelled);
            }

            let mut dispatched = false;
            let result = self
                .run_attempt(index, step, scope, sink, &mut state, &mut dispatched)
                .await;
            request_made |= dispatched;

            match result {
                Ok(()) => {
                    debug!(step = index, attempt, state = ?state, "step committed");
                    return StepOutcome::success(request_made);
                }
                Err(e) => {
                    state = StepState::Failed;
                    // An attempt that failed before dispatch is a
                    // preparation problem; surface it immediately.
                    if !dispatched || e.is_cancelled() {
                        return StepOutcome::failed(request_made, e);
                    }
                    if attempt < attempts {
                        warn!(step = index, attempt, error = %e, "attempt failed, retrying");
                        last_error = Some(e);
                    } else {
                        return StepOutcome::failed(request_made, e);
                    }
                }
            }
        }

        // The loop always returns from its last iteration; this is only
        // reachable with zero attempts, which validation rules out.
        StepOutcome::failed(
            request_made,
            last_error.unwrap_or_else(|| Error::Unsupported("no attempts executed".to_string())),
        )
    }

    async fn run_attempt(
        &self,
        index: usize,
        step: &Step,
        scope: &mut Scope,
        sink: &mut dyn ReportSink,
        state: &mut StepState,
        dispatched: &mut bool,
    ) -> Result<()> {
        let request = self.prepare(step, scope)?;
        *state = StepState::Prepared;

        if self.debug {
            let dump = http::dump_request(&request);
            let description = format!(
                "request: {} {} (step {index})",
                request.method(),
                request.url()
            );
            self.emit_debug(sink, scope, &description, &dump)?;
        }

        self.limiter.wait(self.cancel).await?;
        *state = StepState::Awaited;

        let method = request.method().clone();
        let url = request.url().clone();
        let client = self.clients.for_redirect(step.options.follow_redirect);

        *dispatched = true;
        let response = tokio::select! {
            result = client.execute(request) => {
                result.map_err(|e| Error::Transport(e.to_string()))?
            }
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
        };
        *state = StepState::Dispatched;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let peer_certificate = response
            .extensions()
            .get::<reqwest::tls::TlsInfo>()
            .and_then(|tls| tls.peer_certificate().map(<[u8]>::to_vec));

        let body = tokio::select! {
            result = response.bytes() => {
                result.map_err(|e| Error::ResponseRead(e.to_string()))?
            }
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
        };

        let data = ResponseData {
            status: status.as_u16(),
            headers,
            body: body.to_vec(),
            peer_certificate,
        };

        info!(
            step = index,
            method = %method,
            url = %url,
            status = data.status,
            "request dispatched"
        );

        let mut json_body = JsonCache::default();

        check_assertions(&step.asserts, &data, &mut json_body)?;
        *state = StepState::Asserted;

        let staged = stage_captures(&step.captures, &data, &mut json_body)?;
        *state = StepState::Captured;

        for (name, value, redact) in staged {
            scope.set(name, value, redact);
        }

        if self.debug {
            // Built after the commit so freshly captured redact-flagged
            // values are already masked.
            let dump = http::dump_response(version, status, &data.headers, &data.body);
            let description = format!("response: {} {} (step {index})", data.status, url);
            self.emit_debug(sink, scope, &description, &dump)?;
        }

        *state = StepState::Committed;
        Ok(())
    }

    /// Builds the outbound request from the step templates and the current
    /// scope. Any failure here is fatal for the step.
    fn prepare(&self, step: &Step, scope: &Scope) -> Result<Request> {
        let raw_url = template::expand(&step.url, scope)?;
        let mut url = Url::parse(raw_url.trim())
            .map_err(|e| Error::InvalidInput(format!("invalid url '{}': {e}", raw_url.trim())))?;

        if !step.query.is_empty() {
            let mut query = url.query().unwrap_or("").to_string();
            for (name, value_template) in step.query.iter() {
                let value = template::expand(value_template, scope)?;
                if !query.is_empty() {
                    query.push('&');
                }
                query.push_str(&urlencoding::encode(name));
                query.push('=');
                query.push_str(&urlencoding::encode(&value));
            }
            url.set_query(Some(&query));
        }

        let method = Method::from_bytes(step.method.trim().to_uppercase().as_bytes())
            .map_err(|e| Error::InvalidInput(format!("invalid method '{}': {e}", step.method)))?;

        let client = self.clients.for_redirect(step.options.follow_redirect);
        let mut builder = client.request(method, url);

        for (name, value_template) in step.headers.iter() {
            let value = template::expand(value_template, scope)?;
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidInput(format!("invalid header name '{name}': {e}")))?;
            let header_value = HeaderValue::from_str(&value).map_err(|e| {
                Error::InvalidInput(format!("invalid value for header '{name}': {e}"))
            })?;
            builder = builder.header(header_name, header_value);
        }

        if let Some(body) = self.resolve_body(step, scope)? {
            builder = builder.body(body);
        }

        builder
            .build()
            .map_err(|e| Error::InvalidInput(format!("failed to build request: {e}")))
    }

    fn resolve_body(&self, step: &Step, scope: &Scope) -> Result<Option<Vec<u8>>> {
        if let Some(body) = &step.body {
            return Ok(Some(template::expand(body, scope)?.into_bytes()));
        }

        let Some(path_template) = &step.body_file else {
            return Ok(None);
        };
        let expanded = template::expand(path_template, scope)?;
        let resolved = resolve_body_path(self.base_dir.as_deref(), &expanded);

        let content = std::fs::read(&resolved).map_err(|e| {
            Error::InvalidInput(format!("failed to read body file {}: {e}", resolved.display()))
        })?;
        Ok(Some(content))
    }

    fn emit_debug(
        &self,
        sink: &mut dyn ReportSink,
        scope: &Scope,
        description: &str,
        dump: &[u8],
    ) -> Result<()> {
        let mut needles = scope.redactable_strings();
        needles.extend(self.secret_values.iter().cloned());
        let redactor = Redactor::new(needles, self.salt);
        sink.debug(description, &redactor.apply(dump))
            .map_err(|e| Error::InvalidInput(format!("failed to write debug output: {e}")))
    }
}

/// Resolves an expanded `body_file` path. Host-absolute paths, UNC shares
/// and Windows drive-letter paths are used verbatim whatever the build
/// platform; only bare relative paths resolve against the workflow file's
/// directory.
fn resolve_body_path(base_dir: Option<&Path>, expanded: &str) -> PathBuf {
    let path = Path::new(expanded);
    if is_verbatim_path(expanded) {
        return path.to_path_buf();
    }
    match base_dir {
        Some(base) => base.join(path),
        None => path.to_path_buf(),
    }
}

fn is_verbatim_path(path: &str) -> bool {
    if Path::new(path).is_absolute() {
        return true;
    }
    // UNC share, e.g. \\server\share\payload.json. `Path::is_absolute`
    // only recognizes these on Windows hosts.
    if path.starts_with("\\\\") {
        return true;
    }
    // Drive-letter path, e.g. C:\data\payload.json or C:/data/payload.json.
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Caches the JSON-decoded body so it is parsed at most once per response
/// even when several jsonpath selectors need it.
#[derive(Default)]
struct JsonCache {
    value: Option<Value>,
    parses: usize,
}

impl JsonCache {
    fn get(&mut self, body: &[u8]) -> Result<&Value> {
        if self.value.is_none() {
            self.value = Some(extractors::parse_json(body)?);
            self.parses += 1;
        }
        Ok(self.value.as_ref().expect("populated above"))
    }
}

/// Evaluates every assertion in group order: status, headers, certificate,
/// jsonpath. The first failure stops the step.
fn check_assertions(asserts: &AssertSet, data: &ResponseData, json: &mut JsonCache) -> Result<()> {
    for assert in &asserts.status {
        let actual = Value::from(extractors::status(data));
        check_one("status", None, assert, &actual)?;
    }

    for assert in &asserts.headers {
        // A missing header asserts against the empty string.
        let actual = match extractors::header(data, &assert.name) {
            Ok(value) => Value::String(value),
            Err(e) if e.kind() == ErrorKind::NotFound => Value::String(String::new()),
            Err(e) => return Err(e),
        };
        check_one("header", Some(&assert.name), &assert.predicate, &actual)?;
    }

    for assert in &asserts.certificate {
        let field = assert.field.to_string();
        let actual = Value::String(extractors::certificate_field(data, assert.field)?);
        check_one("certificate", Some(&field), &assert.predicate, &actual)?;
    }

    for assert in &asserts.jsonpath {
        let actual = match extractors::jsonpath_first(json.get(&data.body)?, &assert.path) {
            Ok(value) => value,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // A missing path only satisfies an exists check by failing
                // it; every other operator surfaces the selector error.
                if assert.predicate.operation == Operation::Exists {
                    return Err(assertion_failure(
                        "jsonpath",
                        Some(&assert.path),
                        &assert.predicate,
                        &Value::Null,
                    ));
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        check_one("jsonpath", Some(&assert.path), &assert.predicate, &actual)?;
    }

    Ok(())
}

fn check_one(
    kind: &str,
    identifier: Option<&str>,
    predicate: &Predicate,
    actual: &Value,
) -> Result<()> {
    let passed = predicate::evaluate(predicate.operation, actual, predicate.value.as_ref())?;
    if passed {
        Ok(())
    } else {
        Err(assertion_failure(kind, identifier, predicate, actual))
    }
}

fn assertion_failure(
    kind: &str,
    identifier: Option<&str>,
    predicate: &Predicate,
    actual: &Value,
) -> Error {
    let subject = match identifier {
        Some(id) => format!("{kind} '{id}' assertion failed"),
        None => format!("{kind} assertion failed"),
    };
    let detail = match &predicate.value {
        Some(expected) => format!(
            "expected {} {}, got {}",
            predicate.operation,
            render_value(expected),
            render_value(actual)
        ),
        None => format!("expected {}, got {}", predicate.operation, render_value(actual)),
    };
    Error::AssertionFailure(format!("{subject}: {detail}"))
}

/// Extracts every capture in group order and returns the staged bindings.
/// Nothing is committed if any extraction fails; a not-found selector
/// stores the zero value of its capture kind instead of failing.
fn stage_captures(
    captures: &CaptureSet,
    data: &ResponseData,
    json: &mut JsonCache,
) -> Result<Vec<(String, Value, bool)>> {
    let mut staged = Vec::new();

    for capture in &captures.status {
        staged.push((
            capture.name.clone(),
            Value::from(extractors::status(data)),
            capture.redact,
        ));
    }

    for capture in &captures.headers {
        let value = match extractors::header(data, &capture.header) {
            Ok(value) => Value::String(value),
            Err(e) if e.kind() == ErrorKind::NotFound => Value::String(String::new()),
            Err(e) => return Err(capture_failure("header", &capture.name, e)),
        };
        staged.push((capture.name.clone(), value, capture.redact));
    }

    for capture in &captures.certificate {
        let value = extractors::certificate_field(data, capture.field)
            .map_err(|e| capture_failure("certificate", &capture.name, e))?;
        staged.push((capture.name.clone(), Value::String(value), capture.redact));
    }

    for capture in &captures.jsonpath {
        let value = match extractors::jsonpath_first(json.get(&data.body)?, &capture.path) {
            Ok(value) => value,
            Err(e) if e.kind() == ErrorKind::NotFound => Value::Null,
            Err(e) => return Err(capture_failure("jsonpath", &capture.name, e)),
        };
        staged.push((capture.name.clone(), value, capture.redact));
    }

    if !captures.regex.is_empty() {
        let body = data.body_string();
        for capture in &captures.regex {
            let value = match extractors::regex_group(&body, &capture.pattern, capture.group) {
                Ok(value) => Value::String(value),
                Err(e) if e.kind() == ErrorKind::NotFound => Value::String(String::new()),
                Err(e) => return Err(capture_failure("regex", &capture.name, e)),
            };
            staged.push((capture.name.clone(), value, capture.redact));
        }
    }

    for capture in &captures.body {
        staged.push((
            capture.name.clone(),
            Value::String(data.body_string()),
            capture.redact,
        ));
    }

    Ok(staged)
}

fn capture_failure(kind: &str, name: &str, source: Error) -> Error {
    Error::CaptureFailure(format!("{kind} capture '{name}' failed: {source}"))
}
