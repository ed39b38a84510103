//! Deployment environments and the promotion chain between them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A deployment environment.
///
/// Environments are totally ordered by promotion sequence: `dev < stage < prod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Auto-applied from builds.
    Dev,
    /// Promoted from `dev` after approval.
    Stage,
    /// Promoted from `stage` after approval.
    Prod,
}

impl Environment {
    /// All environments in promotion order.
    pub const ALL: [Self; 3] = [Self::Dev, Self::Stage, Self::Prod];

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Stage => "stage",
            Self::Prod => "prod",
        }
    }

    /// The environment this one is promoted from, if any.
    #[must_use]
    pub const fn upstream(&self) -> Option<Self> {
        match self {
            Self::Dev => None,
            Self::Stage => Some(Self::Dev),
            Self::Prod => Some(Self::Stage),
        }
    }

    /// The environment this one promotes into, if any.
    #[must_use]
    pub const fn downstream(&self) -> Option<Self> {
        match self {
            Self::Dev => Some(Self::Stage),
            Self::Stage => Some(Self::Prod),
            Self::Prod => None,
        }
    }

    /// Returns true if writes to this environment need an approved request.
    #[must_use]
    pub const fn requires_approval(&self) -> bool {
        !matches!(self, Self::Dev)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "stage" => Ok(Self::Stage),
            "prod" => Ok(Self::Prod),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// An adjacent `(from, to)` hop in the promotion chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromotionPair {
    /// Upstream environment.
    pub from: Environment,
    /// Downstream environment.
    pub to: Environment,
}

impl PromotionPair {
    /// Returns the pair that promotes into `to`, if `to` has an upstream.
    #[must_use]
    pub fn into_target(to: Environment) -> Option<Self> {
        to.upstream().map(|from| Self { from, to })
    }

    /// Returns the pair that promotes out of `from`, if `from` has a downstream.
    #[must_use]
    pub fn out_of(from: Environment) -> Option<Self> {
        from.downstream().map(|to| Self { from, to })
    }

    /// All adjacent pairs in promotion order.
    #[must_use]
    pub fn all() -> Vec<Self> {
        Environment::ALL.iter().filter_map(|e| Self::out_of(*e)).collect()
    }
}

impl fmt::Display for PromotionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}
