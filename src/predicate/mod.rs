//! Predicate engine: the closed operator set applied to `(actual, expected)`
//! pairs by assertions.
//!
//! Numeric operands of any JSON number flavour coerce to 64-bit floats
//! before comparison, so `equals 3` passes against `3.0`. String-only
//! operators reject non-string operands with an invalid-input error rather
//! than coercing.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::errors::{Error, Result};
use crate::protocol::Operation;

/// Process-wide cache of compiled regex patterns, shared by assertions and
/// regex captures.
static REGEX_CACHE: Lazy<RwLock<HashMap<String, Regex>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Compiles `pattern`, reusing a previously compiled instance when present.
pub fn cached_regex(pattern: &str) -> Result<Regex> {
    if let Some(re) = REGEX_CACHE
        .read()
        .expect("regex cache poisoned")
        .get(pattern)
    {
        return Ok(re.clone());
    }

    let compiled = Regex::new(pattern)
        .map_err(|e| Error::InvalidInput(format!("invalid regex '{pattern}': {e}")))?;
    REGEX_CACHE
        .write()
        .expect("regex cache poisoned")
        .insert(pattern.to_string(), compiled.clone());
    Ok(compiled)
}

/// Evaluates `operation` over the actual value and the optional expected
/// value. Returns `Ok(false)` for a predicate that compared and did not
/// match; `Err` for operand type problems.
pub fn evaluate(operation: Operation, actual: &Value, expected: Option<&Value>) -> Result<bool> {
    match operation {
        Operation::Equals => Ok(values_equal(actual, required(operation, expected)?)),
        Operation::NotEquals => Ok(!values_equal(actual, required(operation, expected)?)),
        Operation::Contains => {
            let (a, e) = string_operands(operation, actual, required(operation, expected)?)?;
            Ok(a.contains(e))
        }
        Operation::NotContains => {
            let (a, e) = string_operands(operation, actual, required(operation, expected)?)?;
            Ok(!a.contains(e))
        }
        Operation::StartsWith => {
            let (a, e) = string_operands(operation, actual, required(operation, expected)?)?;
            Ok(a.starts_with(e))
        }
        Operation::EndsWith => {
            let (a, e) = string_operands(operation, actual, required(operation, expected)?)?;
            Ok(a.ends_with(e))
        }
        Operation::Regex => {
            let (a, pattern) = string_operands(operation, actual, required(operation, expected)?)?;
            let re = cached_regex(pattern)?;
            Ok(re.is_match(a))
        }
        Operation::Exists => Ok(exists(actual)),
        Operation::Length => {
            let expected = required(operation, expected)?;
            let want = expected.as_i64().ok_or_else(|| {
                Error::InvalidInput(format!(
                    "length expects an integer value, got {expected}"
                ))
            })?;
            let got = length_of(actual).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "length applies to strings, arrays and objects, got {}",
                    type_tag(actual)
                ))
            })?;
            Ok(got as i64 == want)
        }
        Operation::GreaterThan => numeric_compare(operation, actual, expected, |a, e| a > e),
        Operation::LessThan => numeric_compare(operation, actual, expected, |a, e| a < e),
        Operation::GreaterThanOrEqual => numeric_compare(operation, actual, expected, |a, e| a >= e),
        Operation::LessThanOrEqual => numeric_compare(operation, actual, expected, |a, e| a <= e),
        Operation::In => {
            let expected = required(operation, expected)?;
            let candidates = expected.as_array().ok_or_else(|| {
                Error::InvalidInput(format!("in expects an array value, got {expected}"))
            })?;
            Ok(candidates.iter().any(|c| values_equal(actual, c)))
        }
        Operation::TypeIs => {
            let expected = required(operation, expected)?;
            let want = expected.as_str().ok_or_else(|| {
                Error::InvalidInput(format!("type_is expects a string value, got {expected}"))
            })?;
            if !TYPE_TAGS.contains(&want) {
                return Err(Error::InvalidInput(format!(
                    "type_is value must be one of {TYPE_TAGS:?}, got '{want}'"
                )));
            }
            Ok(type_tag(actual) == want)
        }
    }
}

/// The closed set of type tags accepted by `type_is`.
pub const TYPE_TAGS: &[&str] = &["array", "object", "string", "number", "boolean", "null"];

/// Shape validation for a predicate, applied before any execution: `exists`
/// forbids a value, every other operator requires one, and `type_is` only
/// accepts the closed tag set.
pub fn validate(operation: Operation, value: Option<&Value>) -> Result<()> {
    match operation {
        Operation::Exists => {
            if value.is_some() {
                return Err(Error::Validation(
                    "exists does not take a value".to_string(),
                ));
            }
        }
        Operation::TypeIs => {
            let value = value.ok_or_else(|| {
                Error::Validation(format!("{operation} requires a value"))
            })?;
            let tag = value.as_str().ok_or_else(|| {
                Error::Validation(format!("type_is value must be a string, got {value}"))
            })?;
            if !TYPE_TAGS.contains(&tag) {
                return Err(Error::Validation(format!(
                    "type_is value must be one of {TYPE_TAGS:?}, got '{tag}'"
                )));
            }
        }
        _ => {
            if value.is_none() {
                return Err(Error::Validation(format!("{operation} requires a value")));
            }
        }
    }
    Ok(())
}

fn required<'a>(operation: Operation, expected: Option<&'a Value>) -> Result<&'a Value> {
    expected.ok_or_else(|| Error::InvalidInput(format!("{operation} requires a value")))
}

/// Structural equality with numeric coercion: two numbers of any flavour
/// compare as 64-bit floats, everything else compares deeply.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(e)) = (as_f64(actual), as_f64(expected)) {
        return a == e;
    }
    actual == expected
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn numeric_compare<F>(
    operation: Operation,
    actual: &Value,
    expected: Option<&Value>,
    cmp: F,
) -> Result<bool>
where
    F: Fn(f64, f64) -> bool,
{
    let expected = required(operation, expected)?;
    let a = as_f64(actual).ok_or_else(|| {
        Error::InvalidInput(format!(
            "{operation} requires numeric operands, actual is {}",
            type_tag(actual)
        ))
    })?;
    let e = as_f64(expected).ok_or_else(|| {
        Error::InvalidInput(format!(
            "{operation} requires numeric operands, expected is {}",
            type_tag(expected)
        ))
    })?;
    Ok(cmp(a, e))
}

fn string_operands<'a>(
    operation: Operation,
    actual: &'a Value,
    expected: &'a Value,
) -> Result<(&'a str, &'a str)> {
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(e)) => Ok((a, e)),
        _ => Err(Error::InvalidInput(format!(
            "{operation} requires string operands, got {} and {}",
            type_tag(actual),
            type_tag(expected)
        ))),
    }
}

/// `exists`: non-null, and non-empty for strings, arrays and objects.
fn exists(actual: &Value) -> bool {
    match actual {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

fn length_of(actual: &Value) -> Option<usize> {
    match actual {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        Value::Object(o) => Some(o.len()),
        _ => None,
    }
}

fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_equals_numeric_coercion() {
        assert!(evaluate(Operation::Equals, &json!(3), Some(&json!(3.0))).unwrap());
        assert!(evaluate(Operation::Equals, &json!(3.5), Some(&json!(3.5))).unwrap());
        assert!(!evaluate(Operation::Equals, &json!(3), Some(&json!(4))).unwrap());
    }

    #[test]
    fn test_equals_deep_equality() {
        let actual = json!({"a": [1, 2]});
        assert!(evaluate(Operation::Equals, &actual, Some(&json!({"a": [1, 2]}))).unwrap());
        assert!(!evaluate(Operation::Equals, &actual, Some(&json!({"a": [2, 1]}))).unwrap());
    }

    #[test]
    fn test_not_equals() {
        assert!(evaluate(Operation::NotEquals, &json!("a"), Some(&json!("b"))).unwrap());
        assert!(!evaluate(Operation::NotEquals, &json!(1), Some(&json!(1.0))).unwrap());
    }

    #[test]
    fn test_string_operators_require_strings() {
        let err =
            evaluate(Operation::Contains, &json!(42), Some(&json!("4"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert!(evaluate(Operation::Contains, &json!("hello"), Some(&json!("ell"))).unwrap());
        assert!(evaluate(Operation::NotContains, &json!("hello"), Some(&json!("xyz"))).unwrap());
        assert!(evaluate(Operation::StartsWith, &json!("hello"), Some(&json!("he"))).unwrap());
        assert!(evaluate(Operation::EndsWith, &json!("hello"), Some(&json!("lo"))).unwrap());
    }

    #[test]
    fn test_regex_matching_and_cache() {
        let pattern = json!("^[a-z]+-\\d+$");
        assert!(evaluate(Operation::Regex, &json!("abc-123"), Some(&pattern)).unwrap());
        assert!(!evaluate(Operation::Regex, &json!("ABC-123"), Some(&pattern)).unwrap());
        // Second evaluation hits the cache.
        assert!(evaluate(Operation::Regex, &json!("xyz-9"), Some(&pattern)).unwrap());
    }

    #[test]
    fn test_regex_compile_error_is_invalid_input() {
        let err =
            evaluate(Operation::Regex, &json!("x"), Some(&json!("[unclosed"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_exists_semantics() {
        assert!(!evaluate(Operation::Exists, &json!(null), None).unwrap());
        assert!(!evaluate(Operation::Exists, &json!(""), None).unwrap());
        assert!(!evaluate(Operation::Exists, &json!([]), None).unwrap());
        assert!(!evaluate(Operation::Exists, &json!({}), None).unwrap());
        assert!(evaluate(Operation::Exists, &json!(0), None).unwrap());
        assert!(evaluate(Operation::Exists, &json!(false), None).unwrap());
        assert!(evaluate(Operation::Exists, &json!("x"), None).unwrap());
        assert!(evaluate(Operation::Exists, &json!([1]), None).unwrap());
    }

    #[test]
    fn test_length() {
        assert!(evaluate(Operation::Length, &json!("abcd"), Some(&json!(4))).unwrap());
        assert!(evaluate(Operation::Length, &json!([1, 2, 3]), Some(&json!(3))).unwrap());
        assert!(evaluate(Operation::Length, &json!({"a": 1}), Some(&json!(1))).unwrap());
        assert!(!evaluate(Operation::Length, &json!("abcd"), Some(&json!(5))).unwrap());
    }

    #[test]
    fn test_length_requires_integer_expected() {
        let err = evaluate(Operation::Length, &json!("abcd"), Some(&json!(4.5))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = evaluate(Operation::Length, &json!(12), Some(&json!(2))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_ordering_operators() {
        assert!(evaluate(Operation::GreaterThan, &json!(5), Some(&json!(3))).unwrap());
        assert!(evaluate(Operation::LessThan, &json!(2.5), Some(&json!(3))).unwrap());
        assert!(evaluate(Operation::GreaterThanOrEqual, &json!(3), Some(&json!(3))).unwrap());
        assert!(evaluate(Operation::LessThanOrEqual, &json!(3), Some(&json!(3.0))).unwrap());
        let err =
            evaluate(Operation::GreaterThan, &json!("5"), Some(&json!(3))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_in_operator() {
        let list = json!([1, 2.0, "three"]);
        assert!(evaluate(Operation::In, &json!(2), Some(&list)).unwrap());
        assert!(evaluate(Operation::In, &json!("three"), Some(&list)).unwrap());
        assert!(!evaluate(Operation::In, &json!(4), Some(&list)).unwrap());
        let err = evaluate(Operation::In, &json!(1), Some(&json!("not a list"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_type_is() {
        assert!(evaluate(Operation::TypeIs, &json!([1]), Some(&json!("array"))).unwrap());
        assert!(evaluate(Operation::TypeIs, &json!({"a": 1}), Some(&json!("object"))).unwrap());
        assert!(evaluate(Operation::TypeIs, &json!("x"), Some(&json!("string"))).unwrap());
        assert!(evaluate(Operation::TypeIs, &json!(1.5), Some(&json!("number"))).unwrap());
        assert!(evaluate(Operation::TypeIs, &json!(true), Some(&json!("boolean"))).unwrap());
        assert!(evaluate(Operation::TypeIs, &json!(null), Some(&json!("null"))).unwrap());
        assert!(!evaluate(Operation::TypeIs, &json!(1), Some(&json!("string"))).unwrap());

        let err = evaluate(Operation::TypeIs, &json!(1), Some(&json!("integer"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_validate_shapes() {
        assert!(validate(Operation::Exists, None).is_ok());
        assert!(validate(Operation::Exists, Some(&json!(1))).is_err());
        assert!(validate(Operation::Equals, None).is_err());
        assert!(validate(Operation::Equals, Some(&json!(null))).is_ok());
        assert!(validate(Operation::TypeIs, Some(&json!("number"))).is_ok());
        assert!(validate(Operation::TypeIs, Some(&json!("integer"))).is_err());
        assert!(validate(Operation::TypeIs, Some(&json!(7))).is_err());
    }

    #[test]
    fn test_missing_value_at_evaluation_is_invalid_input() {
        let err = evaluate(Operation::Equals, &json!(1), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
