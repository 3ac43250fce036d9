//! Canonical, shared, reference-counted binary decision diagrams over packet
//! header bits, plus the packet-predicate encoding layer built on top of them.
//!
//! The [`bdd::Bdd`] manager owns the node arena, the unique table (hash
//! consing) and the memoized apply cache; all Boolean operations go through
//! it so structurally identical predicates are represented exactly once.
//! [`engine::PredicateEngine`] fixes the variable order to the five canonical
//! header fields (source address, destination address, source port,
//! destination port, protocol; MSB-first) and exposes prefix encoding, batch
//! conjunction, set enumeration, and cloning for engine pooling.

pub mod bdd;
pub mod engine;
pub mod error;

pub use bdd::{Bdd, Predicate};
pub use engine::{AddressFamily, HeaderField, PacketFields, Prefix, PredicateEngine};
pub use error::BddError;
