//! Upstream signals and their validation.

use serde::{Deserialize, Serialize};

use crate::core::{Digest, Environment};
use crate::errors::InvalidSignalError;
use crate::utils::parse_timestamp;

/// A signal from the build system or the review system.
///
/// On the wire a signal is a JSON object tagged by `"kind"`:
///
/// ```json
/// {"kind": "build_succeeded", "digest": "sha256:aaa", "sequence": 7}
/// {"kind": "request_approved", "toEnvironment": "prod", "digest": "sha256:aaa"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// A build produced an image.
    BuildSucceeded {
        /// Digest of the built image.
        digest: Digest,
        /// Ordering among builds; assigned on arrival when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
        /// When the build finished (RFC 3339).
        #[serde(default, alias = "builtAt", skip_serializing_if = "Option::is_none")]
        built_at: Option<String>,
        /// Environment the build targets; only `dev` is accepted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        environment: Option<Environment>,
    },
    /// A change proposal was merged.
    RequestApproved {
        /// Environment the proposal promotes into.
        #[serde(alias = "toEnvironment")]
        to_environment: Environment,
        /// Digest the proposal carries.
        digest: Digest,
    },
    /// A change proposal was closed without merging.
    RequestRejected {
        /// Environment the proposal promotes into.
        #[serde(alias = "toEnvironment")]
        to_environment: Environment,
        /// Digest the proposal carries.
        digest: Digest,
    },
}

impl Signal {
    /// The wire name of the signal kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BuildSucceeded { .. } => "build_succeeded",
            Self::RequestApproved { .. } => "request_approved",
            Self::RequestRejected { .. } => "request_rejected",
        }
    }

    /// The digest the signal refers to.
    #[must_use]
    pub const fn digest(&self) -> &Digest {
        match self {
            Self::BuildSucceeded { digest, .. }
            | Self::RequestApproved { digest, .. }
            | Self::RequestRejected { digest, .. } => digest,
        }
    }

    /// Checks the rules that the wire format alone cannot express.
    pub fn validate(&self) -> Result<(), InvalidSignalError> {
        let invalid = |reason: String| InvalidSignalError::new(reason).with_kind(self.kind());
        match self {
            Self::BuildSucceeded {
                built_at,
                environment,
                ..
            } => {
                if let Some(env) = environment.filter(|e| *e != Environment::Dev) {
                    return Err(invalid(format!("builds may only target dev, not {env}")));
                }
                if let Some(raw) = built_at {
                    parse_timestamp(raw).map_err(|e| invalid(format!("built_at: {e}")))?;
                }
                Ok(())
            }
            Self::RequestApproved { to_environment, .. }
            | Self::RequestRejected { to_environment, .. } => {
                if to_environment.requires_approval() {
                    Ok(())
                } else {
                    Err(invalid(format!(
                        "{to_environment} is not gated by approval"
                    )))
                }
            }
        }
    }
}

/// Parses and validates a signal from its JSON form.
pub fn parse_signal(value: &serde_json::Value) -> Result<Signal, InvalidSignalError> {
    let Some(object) = value.as_object() else {
        return Err(InvalidSignalError::new("signal must be a JSON object"));
    };
    let kind = match object.get("kind") {
        Some(serde_json::Value::String(kind)) => kind.clone(),
        Some(_) => return Err(InvalidSignalError::new("'kind' must be a string")),
        None => return Err(InvalidSignalError::new("missing 'kind'")),
    };

    let signal: Signal = serde_json::from_value(value.clone())
        .map_err(|e| InvalidSignalError::new(e.to_string()).with_kind(kind.as_str()))?;
    signal.validate()?;
    Ok(signal)
}

/// Parses a signal from raw JSON text.
pub fn parse_signal_str(raw: &str) -> Result<Signal, InvalidSignalError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| InvalidSignalError::new(format!("malformed JSON: {e}")))?;
    parse_signal(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_build_signal() {
        let signal = parse_signal(&json!({
            "kind": "build_succeeded",
            "digest": "sha256:aaa",
            "sequence": 3,
            "builtAt": "2024-01-15T10:30:00Z"
        }))
        .unwrap();

        assert_eq!(signal.kind(), "build_succeeded");
        assert_eq!(signal.digest().as_str(), "sha256:aaa");
        assert!(matches!(signal, Signal::BuildSucceeded { sequence: Some(3), .. }));
    }

    #[test]
    fn test_parse_approval_accepts_camel_case_target() {
        let signal = parse_signal(&json!({
            "kind": "request_approved",
            "toEnvironment": "prod",
            "digest": "sha256:aaa"
        }))
        .unwrap();

        assert_eq!(
            signal,
            Signal::RequestApproved {
                to_environment: Environment::Prod,
                digest: Digest::parse("sha256:aaa").unwrap(),
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = parse_signal(&json!({"kind": "deploy_finished", "digest": "sha256:aaa"})).unwrap_err();
        assert_eq!(err.kind.as_deref(), Some("deploy_finished"));
    }

    #[test]
    fn test_missing_kind_is_rejected() {
        let err = parse_signal(&json!({"digest": "sha256:aaa"})).unwrap_err();
        assert!(err.reason.contains("kind"));
        assert!(parse_signal(&json!(["build_succeeded"])).is_err());
    }

    #[test]
    fn test_invalid_digest_is_rejected() {
        let err = parse_signal(&json!({"kind": "build_succeeded", "digest": "not a digest"})).unwrap_err();
        assert_eq!(err.kind.as_deref(), Some("build_succeeded"));
    }

    #[test]
    fn test_dev_approval_is_rejected() {
        let err = parse_signal(&json!({
            "kind": "request_rejected",
            "to_environment": "dev",
            "digest": "sha256:aaa"
        }))
        .unwrap_err();
        assert!(err.reason.contains("dev"));
    }

    #[test]
    fn test_build_for_other_environment_is_rejected() {
        let err = parse_signal(&json!({
            "kind": "build_succeeded",
            "digest": "sha256:aaa",
            "environment": "prod"
        }))
        .unwrap_err();
        assert!(err.reason.contains("prod"));
    }

    #[test]
    fn test_bad_build_timestamp_is_rejected() {
        let err = parse_signal(&json!({
            "kind": "build_succeeded",
            "digest": "sha256:aaa",
            "built_at": "yesterday"
        }))
        .unwrap_err();
        assert!(err.reason.starts_with("built_at"));
    }

    #[test]
    fn test_parse_signal_str_malformed() {
        let err = parse_signal_str("{not json").unwrap_err();
        assert!(err.reason.starts_with("malformed JSON"));
        assert!(err.kind.is_none());
    }
}
