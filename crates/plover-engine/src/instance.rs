//! One verification instance: the reverse breadth-first convergecast rooted
//! at a single destination device.

use std::collections::VecDeque;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use indexmap::IndexMap;
use tracing::{debug, trace};

use plover_bdd::{Predicate, PredicateEngine, Prefix};
use plover_ir::{DevicePort, Invariant, VerifyContext};

use crate::error::VerifyError;
use crate::node::{Announcement, Node};
use crate::report::Verdict;

/// Packet-space name that stands for the full header space.
pub const UNIVERSAL_SPACE: &str = "*";

/// A pending unit of verification: one destination and the invariants to
/// judge against it. Building one is cheap; all symbolic work happens in
/// [`VerifyInstance::run`].
#[derive(Debug, Clone)]
pub struct VerifyInstance {
    pub destination: String,
    pub invariants: Vec<Invariant>,
}

impl VerifyInstance {
    pub fn new(destination: impl Into<String>, invariants: Vec<Invariant>) -> Self {
        VerifyInstance {
            destination: destination.into(),
            invariants,
        }
    }

    /// Run the convergecast to a fixed point and judge the invariants at
    /// every source device. The engine comes back clean on every exit path:
    /// each predicate retained during the run is released and garbage is
    /// collected before returning, whether the run succeeded, erred, or
    /// unwound.
    pub fn run(
        &self,
        ctx: &VerifyContext,
        engine: &mut PredicateEngine,
    ) -> Result<Vec<Verdict>, VerifyError> {
        if !ctx.devices.contains_key(&self.destination) {
            return Err(VerifyError::MissingDestination(self.destination.clone()));
        }
        let mut nodes: IndexMap<String, Node> = IndexMap::new();
        let mut scratch: Vec<Predicate> = Vec::new();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.execute(ctx, engine, &mut nodes, &mut scratch)
        }));

        let mut cleanup: Result<(), VerifyError> = Ok(());
        for pred in scratch.drain(..) {
            if let Err(err) = engine.release(pred) {
                if cleanup.is_ok() {
                    cleanup = Err(err.into());
                }
            }
        }
        for node in nodes.values_mut() {
            if let Err(err) = node.release_all(engine) {
                if cleanup.is_ok() {
                    cleanup = Err(err.into());
                }
            }
        }
        engine.gc();

        match outcome {
            Ok(Ok(verdicts)) => {
                cleanup?;
                Ok(verdicts)
            }
            Ok(Err(err)) => Err(err),
            Err(payload) => resume_unwind(payload),
        }
    }

    fn execute(
        &self,
        ctx: &VerifyContext,
        engine: &mut PredicateEngine,
        nodes: &mut IndexMap<String, Node>,
        scratch: &mut Vec<Predicate>,
    ) -> Result<Vec<Verdict>, VerifyError> {
        let space = self.instance_space(ctx, engine, scratch)?;
        self.build_nodes(ctx, engine, nodes, space)?;
        let mut queue: VecDeque<(String, String, Announcement)> = VecDeque::new();

        // The destination resolves unconditionally and starts the cast.
        let dst = nodes
            .get_mut(&self.destination)
            .ok_or_else(|| VerifyError::MissingDestination(self.destination.clone()))?;
        dst.mark_resolved();
        let announcements = dst.cib_out(engine)?;
        scratch.extend(announcements.iter().map(|a| a.pred));
        Self::fan_out(ctx, nodes, &self.destination, &announcements, &mut queue);

        while let Some((device, port, ann)) = queue.pop_front() {
            let node = match nodes.get_mut(&device) {
                Some(node) => node,
                None => continue,
            };
            if node.resolved() {
                continue;
            }
            let changed = node.receive(engine, &port, ann)?;
            trace!(device = %device, port = %port, changed, "announcement merged");
            if !node.is_complete() {
                continue;
            }
            node.mark_resolved();
            if node.is_source {
                // Nothing forwards through a traffic source; the cast is
                // pruned here.
                debug!(device = %device, "source resolved");
                continue;
            }
            let announcements = node.cib_out(engine)?;
            scratch.extend(announcements.iter().map(|a| a.pred));
            debug!(device = %device, groups = announcements.len(), "node resolved");
            Self::fan_out(ctx, nodes, &device, &announcements, &mut queue);
        }

        self.judge(ctx, engine, nodes, scratch)
    }

    /// The union of the instance's invariant packet spaces: the space the
    /// cast is seeded with and completeness is judged over. The universal
    /// space short-circuits the union.
    fn instance_space(
        &self,
        ctx: &VerifyContext,
        engine: &mut PredicateEngine,
        scratch: &mut Vec<Predicate>,
    ) -> Result<Predicate, VerifyError> {
        let mut prefixes: Vec<Prefix> = Vec::new();
        for invariant in &self.invariants {
            if invariant.packet_space == UNIVERSAL_SPACE {
                return Ok(Predicate::TRUE);
            }
            prefixes.extend_from_slice(ctx.packet_space(&invariant.packet_space)?);
        }
        let space = engine.encode_dst_prefix_list(&prefixes)?;
        scratch.push(space);
        Ok(space)
    }

    fn build_nodes(
        &self,
        ctx: &VerifyContext,
        engine: &mut PredicateEngine,
        nodes: &mut IndexMap<String, Node>,
        space: Predicate,
    ) -> Result<(), VerifyError> {
        for device in ctx.devices.values() {
            let is_destination = device.name == self.destination;
            let mut node = Node::new(&device.name, device.is_source, is_destination);
            if is_destination {
                node.seed_destination(engine, space);
            } else {
                node.seed_from_lecs(engine, &device.lecs, space)?;
            }
            nodes.insert(device.name.clone(), node);
        }
        Ok(())
    }

    /// Enqueue `announcements` to every unresolved peer of `device`.
    fn fan_out(
        ctx: &VerifyContext,
        nodes: &IndexMap<String, Node>,
        device: &str,
        announcements: &[Announcement],
        queue: &mut VecDeque<(String, String, Announcement)>,
    ) {
        for port in ctx.topology.device_ports(device) {
            let endpoint = DevicePort::new(device, port.clone());
            let Some(peer) = ctx.topology.peer(&endpoint) else {
                continue;
            };
            let skip = nodes
                .get(&peer.device)
                .map(|n| n.resolved())
                .unwrap_or(true);
            if skip {
                continue;
            }
            for &ann in announcements {
                queue.push_back((peer.device.clone(), peer.port.clone(), ann));
            }
        }
    }

    /// Judge every invariant at every source device over the resolved
    /// counts.
    fn judge(
        &self,
        ctx: &VerifyContext,
        engine: &mut PredicateEngine,
        nodes: &IndexMap<String, Node>,
        scratch: &mut Vec<Predicate>,
    ) -> Result<Vec<Verdict>, VerifyError> {
        let mut verdicts = Vec::new();
        for node in nodes.values() {
            if !node.is_source {
                continue;
            }
            for invariant in &self.invariants {
                let space = if invariant.packet_space == UNIVERSAL_SPACE {
                    Predicate::TRUE
                } else {
                    let prefixes = ctx.packet_space(&invariant.packet_space)?.to_vec();
                    let p = engine.encode_dst_prefix_list(&prefixes)?;
                    scratch.push(p);
                    p
                };
                let reachable = node.witness(engine, &invariant.match_expr)?;
                scratch.push(reachable);
                let witness = engine.and(reachable, space);
                verdicts.push(Verdict {
                    destination: self.destination.clone(),
                    source: node.name.clone(),
                    invariant: invariant.clone(),
                    satisfied: !witness.is_false(),
                    witness: engine.render_set(witness),
                });
            }
        }
        Ok(verdicts)
    }
}
