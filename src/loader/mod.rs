// Module: Loader
// Reads a workflow file from disk and turns it into validated steps.

use std::path::Path;

use crate::errors::{Error, Result};
use crate::protocol::{self, Step};
use crate::validation;

pub fn load_steps(path: &Path) -> Result<Vec<Step>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Parse(format!("failed to read {}: {e}", path.display())))?;

    let steps = protocol::parse_steps(&content)
        .map_err(|e| Error::Parse(format!("failed to parse {}: {e}", path.display())))?;

    validation::validate_steps(&steps).map_err(|errors| {
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Error::Validation(joined)
    })?;

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::io::Write;

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_file() {
        let file = write_file("- method: GET\n  url: http://example.com\n");
        let steps = load_steps(file.path()).unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let err = load_steps(Path::new("/does/not/exist.yaml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let file = write_file("- method: [unbalanced\n");
        let err = load_steps(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_invalid_step_is_validation_error() {
        let file = write_file("- method: GET\n  url: \"\"\n");
        let err = load_steps(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("url is required"));
    }
}
