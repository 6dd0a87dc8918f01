//! Text templating for URLs, headers, bodies and file paths.
//!
//! Templates interleave literal text with `{{ … }}` actions. An action is
//! either a variable reference (`{{ .user_id }}`) or a helper call with
//! space-separated arguments (`{{ randomInt 1 10 }}`, `{{ upper .name }}`).
//! Missing variables fail expansion; there is no silent default.
//!
//! The helper registry is fixed: identifiers, time, string operations,
//! random data and base64. Helpers have no access to the filesystem, the
//! environment, or anything beyond their arguments.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{Local, SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::context::Scope;
use crate::errors::{Error, Result};

/// Expands `template` against `scope`. An empty template yields an empty
/// string without error.
pub fn expand(template: &str, scope: &Scope) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or_else(|| Error::Template(format!("unclosed action in template: {template:?}")))?;
        let action = after_open[..end].trim();
        output.push_str(&evaluate_action(action, scope)?);
        rest = &after_open[end + 2..];
    }

    output.push_str(rest);
    Ok(output)
}

fn evaluate_action(action: &str, scope: &Scope) -> Result<String> {
    if action.is_empty() {
        return Err(Error::Template("empty action".to_string()));
    }

    let tokens = tokenize(action)?;

    // A lone `.name` token is a variable reference; anything else is a
    // helper call with the first token as the helper name.
    if tokens.len() == 1 {
        if let ActionToken::Reference(name) = &tokens[0] {
            return lookup(scope, name);
        }
    }

    let name = match &tokens[0] {
        ActionToken::Word(word) => word.clone(),
        ActionToken::Reference(name) => {
            return Err(Error::Template(format!(
                "variable reference '.{name}' cannot take arguments"
            )))
        }
        ActionToken::Literal(_) => {
            return Err(Error::Template(format!("invalid action: {action:?}")))
        }
    };

    let mut args = Vec::with_capacity(tokens.len() - 1);
    for token in &tokens[1..] {
        let value = match token {
            ActionToken::Reference(var) => lookup(scope, var)?,
            ActionToken::Literal(text) | ActionToken::Word(text) => text.clone(),
        };
        args.push(value);
    }

    call_helper(&name, &args)
}

fn lookup(scope: &Scope, name: &str) -> Result<String> {
    scope
        .render(name)
        .ok_or_else(|| Error::Template(format!("unknown variable '{name}'")))
}

#[derive(Debug)]
enum ActionToken {
    /// `.name` — a scope lookup.
    Reference(String),
    /// A quoted string literal.
    Literal(String),
    /// A bare word: helper name or unquoted argument.
    Word(String),
}

/// Splits an action body into tokens. Whitespace, commas and parentheses
/// all separate tokens, so `randomInt 1 10` and `randomInt(1, 10)` tokenize
/// identically.
fn tokenize(action: &str) -> Result<Vec<ActionToken>> {
    let mut tokens = Vec::new();
    let mut chars = action.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() || c == ',' || c == '(' || c == ')' => {
                chars.next();
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('n') => literal.push('\n'),
                            Some('r') => literal.push('\r'),
                            Some('t') => literal.push('\t'),
                            Some(c @ ('\\' | '\'' | '"')) => literal.push(c),
                            Some(other) => {
                                return Err(Error::Template(format!(
                                    "invalid escape '\\{other}' in template string"
                                )))
                            }
                            None => {
                                return Err(Error::Template(
                                    "unterminated string in template action".to_string(),
                                ))
                            }
                        },
                        Some(c) if c == quote => break,
                        Some(c) => literal.push(c),
                        None => {
                            return Err(Error::Template(
                                "unterminated string in template action".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(ActionToken::Literal(literal));
            }
            '.' => {
                chars.next();
                let name = read_word(&mut chars);
                if name.is_empty() {
                    return Err(Error::Template("empty variable reference".to_string()));
                }
                tokens.push(ActionToken::Reference(name));
            }
            _ => {
                let word = read_word(&mut chars);
                tokens.push(ActionToken::Word(word));
            }
        }
    }

    if tokens.is_empty() {
        return Err(Error::Template("empty action".to_string()));
    }
    Ok(tokens)
}

fn read_word(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || matches!(c, ',' | '(' | ')' | '"' | '\'') {
            break;
        }
        word.push(c);
        chars.next();
    }
    word
}

fn call_helper(name: &str, args: &[String]) -> Result<String> {
    match name {
        "uuidv4" | "uuid" => {
            expect_args(name, args, 0)?;
            Ok(Uuid::new_v4().to_string())
        }
        "now" | "rfc3339" => {
            expect_args(name, args, 0)?;
            Ok(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
        }
        "timestamp" => {
            expect_args(name, args, 0)?;
            Ok(Utc::now().timestamp().to_string())
        }
        "iso8601" => {
            expect_args(name, args, 0)?;
            Ok(Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string())
        }
        "upper" => {
            expect_args(name, args, 1)?;
            Ok(args[0].to_uppercase())
        }
        "lower" => {
            expect_args(name, args, 1)?;
            Ok(args[0].to_lowercase())
        }
        "title" => {
            expect_args(name, args, 1)?;
            Ok(title_case(&args[0]))
        }
        "trim" => {
            expect_args(name, args, 1)?;
            Ok(args[0].trim().to_string())
        }
        "randomInt" => {
            expect_args(name, args, 2)?;
            let mut min = parse_int(name, &args[0])?;
            let mut max = parse_int(name, &args[1])?;
            if min > max {
                std::mem::swap(&mut min, &mut max);
            }
            if min == max {
                return Ok(min.to_string());
            }
            Ok(rand::thread_rng().gen_range(min..=max).to_string())
        }
        "randomString" => {
            expect_args(name, args, 1)?;
            let n = parse_int(name, &args[0])?;
            if n <= 0 {
                return Ok(String::new());
            }
            let s: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(n as usize)
                .map(char::from)
                .collect();
            Ok(s)
        }
        "base64" => {
            expect_args(name, args, 1)?;
            Ok(BASE64_STANDARD.encode(args[0].as_bytes()))
        }
        _ => Err(Error::Template(format!("unknown helper '{name}'"))),
    }
}

fn expect_args(name: &str, args: &[String], want: usize) -> Result<()> {
    if args.len() != want {
        return Err(Error::Template(format!(
            "helper '{name}' expects {want} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn parse_int(helper: &str, arg: &str) -> Result<i64> {
    arg.parse::<i64>()
        .map_err(|_| Error::Template(format!("helper '{helper}': '{arg}' is not an integer")))
}

/// Capitalizes the first character of each whitespace-separated word.
fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_word_start = true;
    for c in input.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.push(c);
        }
    }
    out
}
