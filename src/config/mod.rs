// Module: Config
// Variables and secrets from KEY=VALUE files and CLI flags, merged in
// precedence order.

use std::collections::HashMap;
use std::path::Path;

use chrono::Local;

use crate::errors::{Error, Result};

/// Parses `KEY=VALUE` lines: blank lines and `#` comments are skipped, the
/// value may itself contain `=`, and an empty key is rejected.
pub fn parse_entries(content: &str) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        entries.push(parse_assignment(trimmed).map_err(|e| {
            Error::Parse(format!("line {}: {e}", number + 1))
        })?);
    }
    Ok(entries)
}

/// Splits a single `NAME=VALUE` assignment, as used both in files and for
/// repeated `--variable`/`--secret` flags.
pub fn parse_assignment(input: &str) -> Result<(String, String)> {
    let (name, value) = input
        .split_once('=')
        .ok_or_else(|| Error::Parse(format!("expected NAME=VALUE, got '{input}'")))?;
    if name.is_empty() {
        return Err(Error::Parse(format!("empty name in '{input}'")));
    }
    Ok((name.to_string(), value.to_string()))
}

pub fn load_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Parse(format!("failed to read {}: {e}", path.display())))?;
    let entries = parse_entries(&content)
        .map_err(|e| Error::Parse(format!("{}: {e}", path.display())))?;
    Ok(entries.into_iter().collect())
}

/// File entries overridden by CLI entries.
pub fn merge(
    file: HashMap<String, String>,
    cli: &[(String, String)],
) -> HashMap<String, String> {
    let mut merged = file;
    for (name, value) in cli {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// Default redaction salt: the current local date.
pub fn default_secret_salt() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_entries_skips_comments_and_blanks() {
        let content = "# comment\n\nA=1\n  \nB=two\n";
        let entries = parse_entries(content).unwrap();
        assert_eq!(
            entries,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two".to_string()),
            ]
        );
    }

    #[test]
    fn test_value_may_contain_equals() {
        let entries = parse_entries("TOKEN=abc=def==\n").unwrap();
        assert_eq!(entries[0], ("TOKEN".to_string(), "abc=def==".to_string()));
    }

    #[test]
    fn test_empty_value_is_allowed() {
        let entries = parse_entries("EMPTY=\n").unwrap();
        assert_eq!(entries[0], ("EMPTY".to_string(), String::new()));
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = parse_entries("=value\n").unwrap_err();
        assert!(err.to_string().contains("empty name"));
    }

    #[test]
    fn test_missing_equals_rejected() {
        let err = parse_entries("JUSTAKEY\n").unwrap_err();
        assert!(err.to_string().contains("NAME=VALUE"));
    }

    #[test]
    fn test_error_carries_line_number() {
        let err = parse_entries("A=1\nbroken\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = HashMap::from([
            ("A".to_string(), "file".to_string()),
            ("B".to_string(), "file".to_string()),
        ]);
        let cli = vec![("A".to_string(), "cli".to_string())];
        let merged = merge(file, &cli);
        assert_eq!(merged["A"], "cli");
        assert_eq!(merged["B"], "file");
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"HOST=example.com\n# note\nPORT=8080\n")
            .unwrap();
        let map = load_file(file.path()).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["PORT"], "8080");
    }

    #[test]
    fn test_default_secret_salt_shape() {
        let salt = default_secret_salt();
        assert_eq!(salt.len(), 10);
        assert_eq!(salt.matches('-').count(), 2);
    }
}
