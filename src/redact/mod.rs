//! Secret redaction for debug dumps.
//!
//! Every occurrence of a secret value in a dump is replaced by a stable
//! marker `[S256:xxxxxxxx]` — the first eight hex characters of
//! SHA-256(salt ‖ secret). The marker is deterministic for a given salt, so
//! two dumps of the same run can still be correlated without exposing the
//! secret itself.

use sha2::{Digest, Sha256};

/// Replaces secret substrings in dump buffers.
#[derive(Debug, Clone)]
pub struct Redactor {
    /// Needles sorted longest first, ties broken lexicographically, paired
    /// with their precomputed markers.
    needles: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Redactor {
    /// Builds a redactor for the given secret values. Empty strings are
    /// dropped; duplicates collapse to one needle.
    pub fn new<I, S>(secrets: I, salt: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = secrets
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        unique.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        unique.dedup();

        let needles = unique
            .into_iter()
            .map(|secret| {
                let marker = marker_for(salt, &secret).into_bytes();
                (secret.into_bytes(), marker)
            })
            .collect();

        Self { needles }
    }

    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }

    /// Returns `input` with every needle occurrence replaced by its marker.
    /// An empty needle set passes the buffer through unchanged.
    pub fn apply(&self, input: &[u8]) -> Vec<u8> {
        if self.needles.is_empty() {
            return input.to_vec();
        }

        let mut output = Vec::with_capacity(input.len());
        let mut i = 0;
        'scan: while i < input.len() {
            for (needle, marker) in &self.needles {
                if input[i..].starts_with(needle) {
                    output.extend_from_slice(marker);
                    i += needle.len();
                    continue 'scan;
                }
            }
            output.push(input[i]);
            i += 1;
        }
        output
    }
}

fn marker_for(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();
    format!("[S256:{}]", &hex::encode(digest)[..8])
}
