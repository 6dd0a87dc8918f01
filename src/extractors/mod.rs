//! Selector evaluation over a fully buffered HTTP response.
//!
//! Assertions and captures both describe *what* to read from a response —
//! status code, a header, a leaf-certificate field, a JSONPath match, a
//! regex capture group or the whole body. This module turns those selectors
//! into values; the predicate engine and the scope take it from there.

use chrono::{DateTime, SecondsFormat};
use reqwest::header::HeaderMap;
use serde_json::Value;
use serde_json_path::JsonPath;
use x509_parser::prelude::*;

use crate::errors::{Error, Result};
use crate::predicate::cached_regex;
use crate::protocol::CertificateField;

/// A response buffered into memory, plus the TLS leaf certificate when the
/// exchange ran over HTTPS.
#[derive(Debug)]
pub struct ResponseData {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// DER bytes of the peer's leaf certificate.
    pub peer_certificate: Option<Vec<u8>>,
}

impl ResponseData {
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Status code as a JSON-compatible integer.
pub fn status(response: &ResponseData) -> i64 {
    i64::from(response.status)
}

/// First value of `name`, matched case-insensitively. Absent headers are a
/// not-found error; callers decide whether that coerces to an empty string.
pub fn header(response: &ResponseData, name: &str) -> Result<String> {
    match response.headers.get(name) {
        Some(value) => Ok(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        None => Err(Error::NotFound(format!("header '{name}' not present"))),
    }
}

/// Reads one field from the leaf certificate of the TLS session.
///
/// `subject` and `issuer` use the RFC 2253-style distinguished-name string,
/// `expire_date` is the certificate's NotAfter as RFC 3339 with a numeric
/// offset, and `serial_number` is the serial as a decimal string.
pub fn certificate_field(response: &ResponseData, field: CertificateField) -> Result<String> {
    let der = response.peer_certificate.as_deref().ok_or(Error::NoTls)?;
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::Extraction(format!("failed to parse peer certificate: {e}")))?;

    match field {
        CertificateField::Subject => Ok(cert.subject().to_string()),
        CertificateField::Issuer => Ok(cert.issuer().to_string()),
        CertificateField::ExpireDate => {
            let ts = cert.validity().not_after.timestamp();
            let when = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
                Error::Extraction(format!("certificate expiry {ts} is out of range"))
            })?;
            Ok(when.to_rfc3339_opts(SecondsFormat::Secs, false))
        }
        CertificateField::SerialNumber => Ok(cert.tbs_certificate.serial.to_string()),
    }
}

/// Decodes a response body as JSON. The body is parsed at most once per
/// response; callers hold on to the returned value for every jsonpath
/// selector of the step. Numbers keep their full decimal form (serde_json
/// runs with `arbitrary_precision`), so integers beyond u64 and
/// high-precision decimals survive capture unchanged.
pub fn parse_json(body: &[u8]) -> Result<Value> {
    if body.is_empty() {
        return Err(Error::InvalidInput("response body is empty".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| Error::Extraction(format!("response body is not valid JSON: {e}")))
}

/// First value matching `path` in already-parsed body data.
pub fn jsonpath_first(data: &Value, path: &str) -> Result<Value> {
    let compiled = JsonPath::parse(path)
        .map_err(|e| Error::InvalidInput(format!("invalid JSONPath '{path}': {e}")))?;
    compiled
        .query(data)
        .first()
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("selector returned no value: '{path}'")))
}

/// The requested capture group of the first match of `pattern` in the raw
/// body. Group 0 is the full match.
pub fn regex_group(body: &str, pattern: &str, group: i64) -> Result<String> {
    if group < 0 {
        return Err(Error::InvalidInput(format!(
            "regex capture group must not be negative, got {group}"
        )));
    }
    let re = cached_regex(pattern)?;
    let captures = re
        .captures(body)
        .ok_or_else(|| Error::NotFound(format!("pattern '{pattern}' matched nothing")))?;
    let index = group as usize;
    match captures.get(index) {
        Some(m) => Ok(m.as_str().to_string()),
        None => Err(Error::InvalidInput(format!(
            "pattern '{pattern}' has no capture group {index}"
        ))),
    }
}
