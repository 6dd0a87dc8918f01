//! reqflow — declarative HTTP workflow runner.
//!
//! Executes YAML workflow files: ordered HTTP steps with templated URLs,
//! headers and bodies, assertions over the responses, value captures that
//! feed later steps, and conditional execution. Produces pass/fail reports
//! in text or JSON and, with `--debug`, redacted wire-form dumps.

mod config;
mod context;
mod errors;
mod expr;
mod extractors;
mod http;
mod limits;
mod loader;
mod orchestrator;
mod predicate;
mod protocol;
mod redact;
mod report;
mod runner;
mod template;
mod validation;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::http::{ClientOptions, HttpClients};
use crate::limits::RateLimiter;
use crate::orchestrator::Orchestrator;
use crate::report::json::JsonReport;
use crate::report::text::TextReport;
use crate::runner::file::RunContext;

#[derive(Parser)]
#[command(name = "reqflow", version, about = "Executes declarative HTTP workflow files")]
struct Cli {
    /// Workflow files, executed in the given order.
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Dump redacted wire-form requests and responses.
    #[arg(long)]
    debug: bool,

    /// Additional passes over the file list; negative repeats forever.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    repeat: i64,

    /// Skip TLS certificate verification.
    #[arg(long)]
    insecure: bool,

    /// PEM bundle appended to the trust store.
    #[arg(long, value_name = "FILE")]
    cacert: Option<PathBuf>,

    /// Per-request timeout (e.g. 30s, 1m30s).
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Requests per second across the whole run; 0 is unlimited.
    #[arg(long, default_value_t = 0)]
    rate_limit: i64,

    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Secret as NAME=VALUE; repeatable. Secret values are redacted in
    /// debug dumps.
    #[arg(long = "secret", value_name = "NAME=VALUE")]
    secret: Vec<String>,

    /// File of NAME=VALUE secrets, one per line.
    #[arg(long, value_name = "FILE")]
    secret_file: Option<PathBuf>,

    /// Salt mixed into redaction markers; defaults to the local date.
    #[arg(long, value_name = "STRING")]
    secret_salt: Option<String>,

    /// Variable as NAME=VALUE; repeatable.
    #[arg(long = "variable", value_name = "NAME=VALUE")]
    variable: Vec<String>,

    /// File of NAME=VALUE variables, one per line.
    #[arg(long, value_name = "FILE")]
    variable_file: Option<PathBuf>,

    /// Log debug detail to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    silent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.silent {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let variables = collect_entries(cli.variable_file.as_deref(), &cli.variable)?;
    let secrets = collect_entries(cli.secret_file.as_deref(), &cli.secret)?;
    let salt = cli
        .secret_salt
        .clone()
        .unwrap_or_else(config::default_secret_salt);

    let clients = HttpClients::build(&ClientOptions {
        insecure: cli.insecure,
        cacert: cli.cacert.clone(),
        timeout: cli.timeout,
    })?;
    let limiter = RateLimiter::new(cli.rate_limit as f64);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    let orchestrator = Orchestrator {
        files: &cli.files,
        repeat: cli.repeat,
        context: RunContext {
            clients: &clients,
            limiter: &limiter,
            cancel: &cancel,
            variables: &variables,
            secrets: &secrets,
            salt: &salt,
            debug: cli.debug,
        },
    };

    let stdout = std::io::stdout();
    let code = match cli.output {
        OutputFormat::Text => {
            let mut sink = TextReport::new(stdout.lock());
            orchestrator.run(&mut sink).await
        }
        OutputFormat::Json => {
            let mut sink = JsonReport::new(stdout.lock());
            orchestrator.run(&mut sink).await
        }
    };
    Ok(code)
}

/// File entries first, CLI flags override.
fn collect_entries(
    file: Option<&std::path::Path>,
    flags: &[String],
) -> anyhow::Result<HashMap<String, String>> {
    let base = match file {
        Some(path) => config::load_file(path)?,
        None => HashMap::new(),
    };
    let mut cli_entries = Vec::with_capacity(flags.len());
    for flag in flags {
        cli_entries.push(config::parse_assignment(flag)?);
    }
    Ok(config::merge(base, &cli_entries))
}
