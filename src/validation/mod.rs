//! Workflow step validation.
//!
//! Every structural problem is caught here, before any request is made:
//! a file that fails validation yields a zero-request failure and the
//! runner never sees a malformed step. Each error names the 1-based step
//! index it belongs to.

use thiserror::Error;

use crate::expr;
use crate::predicate;
use crate::protocol::{Predicate, Step, ALLOWED_METHODS};

/// A structural problem found in a workflow step.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("step {step}: method is required")]
    MissingMethod { step: usize },

    #[error("step {step}: method '{method}' is not allowed")]
    UnknownMethod { step: usize, method: String },

    #[error("step {step}: url is required")]
    MissingUrl { step: usize },

    #[error("step {step}: body and body_file are mutually exclusive")]
    BodyConflict { step: usize },

    #[error("step {step}: retries must not be negative, got {retries}")]
    NegativeRetries { step: usize, retries: i64 },

    #[error("step {step}: when expression is invalid: {message}")]
    InvalidWhen { step: usize, message: String },

    #[error("step {step}: when expression must be boolean at its root")]
    NonBooleanWhen { step: usize },

    #[error("step {step}: {group} assertion {index}: {message}")]
    InvalidAssert {
        step: usize,
        group: &'static str,
        index: usize,
        message: String,
    },

    #[error("step {step}: {group} capture {index}: {message}")]
    InvalidCapture {
        step: usize,
        group: &'static str,
        index: usize,
        message: String,
    },
}

/// Validates all steps of a file, collecting every problem instead of
/// stopping at the first.
pub fn validate_steps(steps: &[Step]) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    for (position, step) in steps.iter().enumerate() {
        validate_step(position + 1, step, &mut errors);
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_step(index: usize, step: &Step, errors: &mut Vec<ValidationError>) {
    let method = step.method.trim();
    if method.is_empty() {
        errors.push(ValidationError::MissingMethod { step: index });
    } else if !ALLOWED_METHODS.contains(&method.to_uppercase().as_str()) {
        errors.push(ValidationError::UnknownMethod {
            step: index,
            method: method.to_string(),
        });
    }

    if step.url.trim().is_empty() {
        errors.push(ValidationError::MissingUrl { step: index });
    }

    if step.body.is_some() && step.body_file.is_some() {
        errors.push(ValidationError::BodyConflict { step: index });
    }

    if step.options.retries < 0 {
        errors.push(ValidationError::NegativeRetries {
            step: index,
            retries: step.options.retries,
        });
    }

    if let Some(when) = &step.when {
        match expr::parse(when) {
            Ok(parsed) => {
                if !parsed.is_boolean_rooted() {
                    errors.push(ValidationError::NonBooleanWhen { step: index });
                }
            }
            Err(e) => errors.push(ValidationError::InvalidWhen {
                step: index,
                message: e.to_string(),
            }),
        }
    }

    validate_asserts(index, step, errors);
    validate_captures(index, step, errors);
}

fn validate_asserts(index: usize, step: &Step, errors: &mut Vec<ValidationError>) {
    for (i, predicate) in step.asserts.status.iter().enumerate() {
        check_predicate(index, "status", i, predicate, errors);
    }

    for (i, assert) in step.asserts.headers.iter().enumerate() {
        if assert.name.trim().is_empty() {
            errors.push(ValidationError::InvalidAssert {
                step: index,
                group: "header",
                index: i + 1,
                message: "header name is required".to_string(),
            });
        }
        check_predicate(index, "header", i, &assert.predicate, errors);
    }

    for (i, assert) in step.asserts.certificate.iter().enumerate() {
        check_predicate(index, "certificate", i, &assert.predicate, errors);
    }

    for (i, assert) in step.asserts.jsonpath.iter().enumerate() {
        if assert.path.trim().is_empty() {
            errors.push(ValidationError::InvalidAssert {
                step: index,
                group: "jsonpath",
                index: i + 1,
                message: "path is required".to_string(),
            });
        }
        check_predicate(index, "jsonpath", i, &assert.predicate, errors);
    }
}

fn check_predicate(
    step: usize,
    group: &'static str,
    i: usize,
    predicate: &Predicate,
    errors: &mut Vec<ValidationError>,
) {
    if let Err(e) = predicate::validate(predicate.operation, predicate.value.as_ref()) {
        errors.push(ValidationError::InvalidAssert {
            step,
            group,
            index: i + 1,
            message: e.to_string(),
        });
    }
}

fn require_name(
    step: usize,
    group: &'static str,
    i: usize,
    name: &str,
    errors: &mut Vec<ValidationError>,
) {
    if name.trim().is_empty() {
        errors.push(ValidationError::InvalidCapture {
            step,
            group,
            index: i + 1,
            message: "capture name is required".to_string(),
        });
    }
}

fn validate_captures(index: usize, step: &Step, errors: &mut Vec<ValidationError>) {
    for (i, capture) in step.captures.status.iter().enumerate() {
        require_name(index, "status", i, &capture.name, errors);
    }
    for (i, capture) in step.captures.body.iter().enumerate() {
        require_name(index, "body", i, &capture.name, errors);
    }
    for (i, capture) in step.captures.certificate.iter().enumerate() {
        require_name(index, "certificate", i, &capture.name, errors);
    }

    for (i, capture) in step.captures.headers.iter().enumerate() {
        require_name(index, "header", i, &capture.name, errors);
        if capture.header.trim().is_empty() {
            errors.push(ValidationError::InvalidCapture {
                step: index,
                group: "header",
                index: i + 1,
                message: "header to read is required".to_string(),
            });
        }
    }

    for (i, capture) in step.captures.jsonpath.iter().enumerate() {
        require_name(index, "jsonpath", i, &capture.name, errors);
        if capture.path.trim().is_empty() {
            errors.push(ValidationError::InvalidCapture {
                step: index,
                group: "jsonpath",
                index: i + 1,
                message: "path is required".to_string(),
            });
        }
    }

    for (i, capture) in step.captures.regex.iter().enumerate() {
        require_name(index, "regex", i, &capture.name, errors);
        if capture.pattern.trim().is_empty() {
            errors.push(ValidationError::InvalidCapture {
                step: index,
                group: "regex",
                index: i + 1,
                message: "pattern is required".to_string(),
            });
        } else if let Err(e) = predicate::cached_regex(&capture.pattern) {
            errors.push(ValidationError::InvalidCapture {
                step: index,
                group: "regex",
                index: i + 1,
                message: e.to_string(),
            });
        }
        if capture.group < 0 {
            errors.push(ValidationError::InvalidCapture {
                step: index,
                group: "regex",
                index: i + 1,
                message: format!("capture group must not be negative, got {}", capture.group),
            });
        }
    }
}
