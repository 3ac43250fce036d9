//! The network model the verifier runs against: device-port topology,
//! per-device forwarding behavior, named packet spaces, and the reachability
//! invariants to check. A [`context::VerifyContext`] bundles all of these and
//! is shared read-only across verification instances.

pub mod context;
pub mod error;
pub mod invariant;
pub mod model;
pub mod topology;

pub use context::VerifyContext;
pub use error::IrError;
pub use invariant::{Invariant, MatchExpr};
pub use model::{Device, ForwardAction, Lec};
pub use topology::{DevicePort, Topology};
