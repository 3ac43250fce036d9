//! Reachability invariants.
//!
//! The match language is deliberately small: `exist >= K` asserts that at
//! least `K` disjoint forwarding paths deliver the packet space to the
//! destination. The path expression is carried through to reports; only the
//! wildcard form is interpreted today.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IrError;

/// The predicate an invariant applies to the resolved path count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchExpr {
    Exist { min_count: u32 },
}

impl MatchExpr {
    /// Whether a multiplicity satisfies the expression.
    pub fn accepts(&self, count: u32) -> bool {
        match self {
            MatchExpr::Exist { min_count } => count >= *min_count,
        }
    }
}

impl fmt::Display for MatchExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchExpr::Exist { min_count } => write!(f, "exist >= {min_count}"),
        }
    }
}

impl FromStr for MatchExpr {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .trim()
            .strip_prefix("exist")
            .ok_or_else(|| IrError::BadMatchExpr(s.to_string()))?;
        let rest = rest
            .trim_start()
            .strip_prefix(">=")
            .ok_or_else(|| IrError::BadMatchExpr(s.to_string()))?;
        let min_count = rest
            .trim()
            .parse::<u32>()
            .map_err(|_| IrError::BadMatchExpr(s.to_string()))?;
        Ok(MatchExpr::Exist { min_count })
    }
}

/// One invariant to verify at a destination device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invariant {
    pub match_expr: MatchExpr,
    /// Path constraint expression; `*` means any path.
    pub path: String,
    /// Name of the packet space the invariant ranges over.
    pub packet_space: String,
}

impl Invariant {
    pub fn exist_at_least(min_count: u32, packet_space: impl Into<String>) -> Self {
        Invariant {
            match_expr: MatchExpr::Exist { min_count },
            path: "*".to_string(),
            packet_space: packet_space.into(),
        }
    }
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, packet space: {})",
            self.match_expr, self.path, self.packet_space
        )
    }
}
