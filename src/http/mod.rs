//! HTTP client construction and wire-form dumps.
//!
//! One connection pool is shared by every step of a run. Redirect policy is
//! the only per-step client difference, so two clients are built up front
//! from the same options and the runner picks per step; everything else
//! (TLS trust, timeouts, pool bounds) is identical between them.

use std::fmt::Write as _;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HOST};
use reqwest::redirect::Policy;
use reqwest::{Certificate, Client, ClientBuilder, Request, StatusCode, Version};

use crate::errors::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Transport options collected from the CLI.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// PEM bundle appended to the trust store.
    pub cacert: Option<PathBuf>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            insecure: false,
            cacert: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// The shared client pair: same pool settings, different redirect policy.
#[derive(Debug, Clone)]
pub struct HttpClients {
    follow: Client,
    stay: Client,
}

impl HttpClients {
    pub fn build(options: &ClientOptions) -> Result<Self> {
        let follow = builder_from(options)?
            .redirect(Policy::default())
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;
        let stay = builder_from(options)?
            .redirect(Policy::none())
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { follow, stay })
    }

    /// Client for a step, honoring its `follow_redirect` option. With
    /// redirects off the first 3xx response is returned as the final one.
    pub fn for_redirect(&self, follow: bool) -> &Client {
        if follow {
            &self.follow
        } else {
            &self.stay
        }
    }
}

fn builder_from(options: &ClientOptions) -> Result<ClientBuilder> {
    let mut builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(options.timeout)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .tls_info(true);

    if options.insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(path) = &options.cacert {
        for certificate in read_pem_bundle(path)? {
            builder = builder.add_root_certificate(certificate);
        }
    }

    Ok(builder)
}

fn read_pem_bundle(path: &Path) -> Result<Vec<Certificate>> {
    let file = File::open(path)
        .map_err(|e| Error::InvalidInput(format!("failed to open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);

    let mut certificates = Vec::new();
    for entry in rustls_pemfile::certs(&mut reader) {
        let der = entry
            .map_err(|e| Error::InvalidInput(format!("invalid PEM in {}: {e}", path.display())))?;
        let certificate = Certificate::from_der(&der)
            .map_err(|e| Error::InvalidInput(format!("invalid certificate in {}: {e}", path.display())))?;
        certificates.push(certificate);
    }

    if certificates.is_empty() {
        return Err(Error::InvalidInput(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certificates)
}

// ---------------------------------------------------------------------------
// Wire-form dumps
// ---------------------------------------------------------------------------

/// Renders a request the way it goes over the wire, before redaction.
pub fn dump_request(request: &Request) -> Vec<u8> {
    let url = request.url();
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut head = String::new();
    let _ = write!(head, "{} {} HTTP/1.1\r\n", request.method(), target);
    if !request.headers().contains_key(HOST) {
        if let Some(host) = url.host_str() {
            match url.port() {
                Some(port) => {
                    let _ = write!(head, "host: {host}:{port}\r\n");
                }
                None => {
                    let _ = write!(head, "host: {host}\r\n");
                }
            }
        }
    }
    write_headers(&mut head, request.headers());
    head.push_str("\r\n");

    let mut dump = head.into_bytes();
    if let Some(body) = request.body().and_then(|body| body.as_bytes()) {
        dump.extend_from_slice(body);
    }
    dump
}

/// Renders a buffered response in wire form.
pub fn dump_response(
    version: Version,
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) -> Vec<u8> {
    let mut head = String::new();
    let reason = status.canonical_reason().unwrap_or("");
    let _ = write!(head, "{} {} {}\r\n", version_str(version), status.as_u16(), reason);
    write_headers(&mut head, headers);
    head.push_str("\r\n");

    let mut dump = head.into_bytes();
    dump.extend_from_slice(body);
    dump
}

fn write_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers {
        let _ = write!(out, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
    }
}

fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_09 {
        "HTTP/0.9"
    } else if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else if version == Version::HTTP_2 {
        "HTTP/2.0"
    } else if version == Version::HTTP_3 {
        "HTTP/3.0"
    } else {
        "HTTP/1.1"
    }
}
