//! The digest currently declared for an environment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Digest, Environment};

/// Where a recorded digest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "environment")]
pub enum Source {
    /// Written directly by a successful build (only valid for `dev`).
    Build,
    /// Promoted from an upstream environment.
    Promoted(Environment),
}

impl Source {
    /// Returns the upstream environment, if the digest was promoted.
    #[must_use]
    pub const fn environment(&self) -> Option<Environment> {
        match self {
            Self::Build => None,
            Self::Promoted(env) => Some(*env),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => f.write_str("build"),
            Self::Promoted(env) => write!(f, "{env}"),
        }
    }
}

/// The digest declared for one environment, with provenance and revision.
///
/// `revision` starts at 1 on the first accepted write and increases by one on
/// every accepted write after that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestRecord {
    /// The environment this record belongs to.
    pub environment: Environment,
    /// The declared digest.
    pub digest: Digest,
    /// Where the digest came from.
    pub source: Source,
    /// Monotonic per-environment write counter.
    pub revision: u64,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl DigestRecord {
    /// Creates a record as it looks after an accepted write.
    #[must_use]
    pub fn new(environment: Environment, digest: Digest, source: Source, revision: u64) -> Self {
        Self {
            environment,
            digest,
            source,
            revision,
            updated_at: Utc::now(),
        }
    }

    /// Builds the record that follows a successful write on top of `previous`.
    #[must_use]
    pub fn next(
        environment: Environment,
        previous: Option<&Self>,
        digest: Digest,
        source: Source,
    ) -> Self {
        let revision = previous.map_or(0, |r| r.revision) + 1;
        Self::new(environment, digest, source, revision)
    }
}

/// Revision a CAS writer expects to find, given what it last read.
#[must_use]
pub fn expected_revision(record: Option<&DigestRecord>) -> u64 {
    record.map_or(0, |r| r.revision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_revision() {
        let digest = Digest::parse("sha256:aaa").unwrap();
        let first = DigestRecord::next(Environment::Dev, None, digest.clone(), Source::Build);
        assert_eq!(first.revision, 1);

        let second = DigestRecord::next(Environment::Dev, Some(&first), digest, Source::Build);
        assert_eq!(second.revision, 2);
        assert_eq!(expected_revision(Some(&second)), 2);
        assert_eq!(expected_revision(None), 0);
    }

    #[test]
    fn test_source_serialize() {
        let json = serde_json::to_value(Source::Promoted(Environment::Stage)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "promoted", "environment": "stage"}));

        let json = serde_json::to_value(Source::Build).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "build"}));
    }

    #[test]
    fn test_source_display() {
        assert_eq!(Source::Build.to_string(), "build");
        assert_eq!(Source::Promoted(Environment::Dev).to_string(), "dev");
    }
}
