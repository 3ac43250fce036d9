//! Reachability verification by symbolic convergecast.
//!
//! One verification instance is built per destination device. The instance
//! floods announcements outward from the destination in reverse breadth-first
//! order; each node merges incoming announcements into its local forwarding
//! partition, splitting tuples where an announcement covers only part of one,
//! and re-announces once every tuple is accounted for. Invariants are judged
//! at source devices over the resolved path multiplicities.
//!
//! Predicate engines are expensive to construct, so runs draw them from a
//! bounded [`pool::EnginePool`] seeded with a pre-warmed engine; the
//! [`orchestrator`] drives instances across worker threads in batches.

pub mod error;
pub mod instance;
pub mod node;
pub mod orchestrator;
pub mod pool;
pub mod report;

pub use error::VerifyError;
pub use instance::{VerifyInstance, UNIVERSAL_SPACE};
pub use orchestrator::{run, RunnerConfig};
pub use pool::{EngineLease, EnginePool};
pub use report::{BatchStats, FailedInstance, PoolMetrics, RunReport, Verdict};
