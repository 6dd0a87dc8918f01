//! Workflow file data model.
//!
//! A workflow file is a YAML sequence of step records. Each step describes a
//! single HTTP interaction: method, templated URL, headers, query
//! parameters, body, an optional `when` gate, retry options, an assertion
//! set and a capture set.
//!
//! ```yaml
//! - name: create user
//!   method: POST
//!   url: "{{ .base_url }}/users"
//!   headers:
//!     content-type: application/json
//!   body: '{"name": "{{ .user_name }}"}'
//!   asserts:
//!     status:
//!       - operation: equals
//!         value: 201
//!   captures:
//!     jsonpath:
//!       - name: user_id
//!         path: $.id
//! ```
//!
//! `headers` and `query` accept two surface shapes that both preserve
//! insertion order: an ordered mapping, or a sequence of `{key, value}`
//! records (the only shape that can express duplicate names).

use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// HTTP methods accepted by the validator.
pub const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// One HTTP interaction in a workflow file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Optional human label, carried through logs and failure messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// HTTP method. Validated against [`ALLOWED_METHODS`].
    #[serde(default)]
    pub method: String,

    /// Request URL template. Required, non-empty after trimming.
    #[serde(default)]
    pub url: String,

    /// Header templates in insertion order. Duplicate names allowed.
    #[serde(default, skip_serializing_if = "KeyValuePairs::is_empty")]
    pub headers: KeyValuePairs,

    /// Query parameter templates, appended to any raw query already present
    /// in the URL, in insertion order.
    #[serde(default, skip_serializing_if = "KeyValuePairs::is_empty")]
    pub query: KeyValuePairs,

    /// Inline body template. Mutually exclusive with `body_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Path template of a file to read the body from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_file: Option<String>,

    /// Boolean gate expression; a false gate skips the step entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    #[serde(default)]
    pub options: StepOptions,

    #[serde(default, skip_serializing_if = "AssertSet::is_empty")]
    pub asserts: AssertSet,

    #[serde(default, skip_serializing_if = "CaptureSet::is_empty")]
    pub captures: CaptureSet,
}

/// Per-step execution options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StepOptions {
    /// Additional attempts after the first; total attempts = retries + 1.
    pub retries: i64,

    /// Follow redirects (default). When false the first redirect response is
    /// treated as the final response.
    pub follow_redirect: bool,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            follow_redirect: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Comparison operators usable in assertions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,
    Exists,
    Length,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    In,
    TypeIs,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Regex => "regex",
            Self::Exists => "exists",
            Self::Length => "length",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThanOrEqual => "less_than_or_equal",
            Self::In => "in",
            Self::TypeIs => "type_is",
        };
        f.write_str(name)
    }
}

/// An operator plus (usually) an expected value.
///
/// `value` distinguishes "no value supplied" (`None`) from an explicit YAML
/// `null` (`Some(Value::Null)`): `exists` forbids a value, every other
/// operator requires one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Predicate {
    pub operation: Operation,

    #[serde(
        default,
        deserialize_with = "deserialize_explicit_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

impl Predicate {
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

/// Keeps an explicit `value: null` as `Some(Value::Null)` instead of
/// collapsing it into the missing-field case.
fn deserialize_explicit_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

// ---------------------------------------------------------------------------
// Assertion set
// ---------------------------------------------------------------------------

/// Assertions grouped by selector kind. Groups evaluate in declaration
/// order: status, headers, certificate, jsonpath.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssertSet {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<Predicate>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderAssert>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub certificate: Vec<CertificateAssert>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jsonpath: Vec<JsonPathAssert>,
}

impl AssertSet {
    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
            && self.headers.is_empty()
            && self.certificate.is_empty()
            && self.jsonpath.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeaderAssert {
    /// Header name, matched case-insensitively.
    pub name: String,
    #[serde(flatten)]
    pub predicate: Predicate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificateAssert {
    pub field: CertificateField,
    #[serde(flatten)]
    pub predicate: Predicate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonPathAssert {
    pub path: String,
    #[serde(flatten)]
    pub predicate: Predicate,
}

/// Leaf-certificate fields available to assertions and captures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CertificateField {
    Subject,
    Issuer,
    ExpireDate,
    SerialNumber,
}

impl fmt::Display for CertificateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Subject => "subject",
            Self::Issuer => "issuer",
            Self::ExpireDate => "expire_date",
            Self::SerialNumber => "serial_number",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Capture set
// ---------------------------------------------------------------------------

/// Captures grouped by selector kind, executed after assertions in the same
/// group order plus regex and body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureSet {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<StatusCapture>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderCapture>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub certificate: Vec<CertificateCapture>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jsonpath: Vec<JsonPathCapture>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regex: Vec<RegexCapture>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<BodyCapture>,
}

impl CaptureSet {
    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
            && self.headers.is_empty()
            && self.certificate.is_empty()
            && self.jsonpath.is_empty()
            && self.regex.is_empty()
            && self.body.is_empty()
    }

    /// True when any jsonpath assertion or capture will need the parsed
    /// response body.
    pub fn wants_json(&self) -> bool {
        !self.jsonpath.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusCapture {
    /// Variable name to bind in the scope.
    pub name: String,
    #[serde(default)]
    pub redact: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeaderCapture {
    pub name: String,
    /// Header to read, case-insensitive.
    pub header: String,
    #[serde(default)]
    pub redact: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificateCapture {
    pub name: String,
    pub field: CertificateField,
    #[serde(default)]
    pub redact: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonPathCapture {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub redact: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegexCapture {
    pub name: String,
    pub pattern: String,
    /// Capture group to extract; 0 is the full match.
    #[serde(default)]
    pub group: i64,
    #[serde(default)]
    pub redact: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BodyCapture {
    pub name: String,
    #[serde(default)]
    pub redact: bool,
}

// ---------------------------------------------------------------------------
// Ordered key/value pairs
// ---------------------------------------------------------------------------

/// Ordered `(name, value-template)` pairs for headers and query parameters.
///
/// Deserializes from either an ordered mapping or a sequence of
/// `{key, value}` records; scalar values (integers, floats, booleans, null)
/// are rendered to their canonical string form. Serializes as the sequence
/// surface, which round-trips duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValuePairs(pub Vec<(String, String)>);

impl KeyValuePairs {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }
}

/// Canonical string form of a YAML scalar used where a string is expected.
/// Large unsigned integers keep their full decimal digits.
fn scalar_to_string<E: serde::de::Error>(value: &Value) -> Result<String, E> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(E::custom(format!(
            "expected a scalar, found {}",
            type_name_of(other)
        ))),
    }
}

fn type_name_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Serialize for KeyValuePairs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Entry<'a> {
            key: &'a str,
            value: &'a str,
        }
        serializer.collect_seq(self.0.iter().map(|(key, value)| Entry { key, value }))
    }
}

impl<'de> Deserialize<'de> for KeyValuePairs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(KeyValueVisitor)
    }
}

struct KeyValueVisitor;

impl<'de> Visitor<'de> for KeyValueVisitor {
    type Value = KeyValuePairs;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping or a sequence of {key, value} records")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut pairs = Vec::new();
        while let Some((key, value)) = map.next_entry::<Value, Value>()? {
            pairs.push((scalar_to_string(&key)?, scalar_to_string(&value)?));
        }
        Ok(KeyValuePairs(pairs))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        #[derive(Deserialize)]
        struct Entry {
            key: Value,
            value: Value,
        }
        let mut pairs = Vec::new();
        while let Some(entry) = seq.next_element::<Entry>()? {
            pairs.push((
                scalar_to_string::<A::Error>(&entry.key)?,
                scalar_to_string::<A::Error>(&entry.value)?,
            ));
        }
        Ok(KeyValuePairs(pairs))
    }
}

/// Parses a workflow file body into its steps.
pub fn parse_steps(content: &str) -> Result<Vec<Step>, serde_yaml::Error> {
    serde_yaml::from_str(content)
}
