//! Content-addressed artifact digests.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::errors::InvalidSignalError;

// OCI digest grammar: algorithm ":" encoded.
#[allow(clippy::expect_used)]
static DIGEST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[+._-][a-z0-9]+)*:[a-zA-Z0-9=_-]+$").expect("digest pattern compiles")
});

/// Identifier of an immutable built artifact, e.g. `sha256:3f1c...`.
///
/// Treated as opaque beyond the grammar check: two equal digests denote the
/// same artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Parses and validates a digest.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, InvalidSignalError> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            return Err(InvalidSignalError::new("digest is empty"));
        }
        if !DIGEST_PATTERN.is_match(value) {
            return Err(InvalidSignalError::new(format!(
                "'{value}' is not an algorithm:encoded digest"
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the algorithm prefix (e.g. `sha256`).
    #[must_use]
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map_or("", |(algo, _)| algo)
    }

    /// Returns a shortened form for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        let end = self.0.len().min(19);
        &self.0[..end]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = InvalidSignalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}
