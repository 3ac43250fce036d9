//! Run outputs: per-source verdicts, failed instances, pool statistics.

use std::fmt;

use serde::Serialize;

use plover_ir::Invariant;

/// The outcome of judging one invariant at one source device, for one
/// destination's instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub destination: String,
    pub source: String,
    pub invariant: Invariant,
    pub satisfied: bool,
    /// Rendered packet set that satisfies the invariant (destination-address
    /// prefix notation).
    pub witness: String,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}, invariants: {}, result: {}, witness: {}",
            self.source,
            self.destination,
            self.invariant,
            if self.satisfied { "satisfied" } else { "violated" },
            self.witness
        )
    }
}

/// An instance that errored or panicked. Its verdicts are absent from the
/// report rather than silently treated as violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedInstance {
    pub destination: String,
    pub reason: String,
}

/// Engine pool accounting for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    /// Leases served from the pool.
    pub reused: u64,
    /// Leases that fell back to cloning the seed engine.
    pub constructed: u64,
}

impl PoolMetrics {
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.reused + self.constructed;
        if total == 0 {
            return 0.0;
        }
        self.reused as f64 / total as f64
    }
}

/// Timing for one orchestrator batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub instances: usize,
    pub elapsed_ms: u64,
}

/// Everything a verification run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub verdicts: Vec<Verdict>,
    pub failed: Vec<FailedInstance>,
    pub pool: PoolMetrics,
    pub instance_count: usize,
    pub batches: Vec<BatchStats>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn violations(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| !v.satisfied)
    }

    pub fn all_satisfied(&self) -> bool {
        self.failed.is_empty() && self.verdicts.iter().all(|v| v.satisfied)
    }
}
