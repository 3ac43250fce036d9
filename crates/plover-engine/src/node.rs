//! Per-device convergecast state.
//!
//! A node's local CIB (`locCib`) partitions the packet space the device
//! forwards: one [`CibTuple`] per local equivalence class, each subscribed to
//! the ports its action forwards out of. Announcements arriving on a port are
//! merged against the subscribed tuples in FIFO order; an announcement
//! covering only part of a tuple splits it, and the split-off part is
//! re-queued behind the current subscription list so the same announcement
//! resolves it. The partition stays a partition across every merge and
//! split.

use indexmap::{IndexMap, IndexSet};

use plover_bdd::{BddError, Predicate, PredicateEngine};
use plover_ir::{Lec, MatchExpr};

/// Path-count assignments for one tuple: a base count from destination
/// seeding plus one count per action port, filled in as the port's upstream
/// announcement arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountVector {
    base: u32,
    per_port: IndexMap<String, u32>,
}

impl CountVector {
    pub fn seeded() -> Self {
        CountVector {
            base: 1,
            per_port: IndexMap::new(),
        }
    }

    pub fn is_assigned(&self, port: &str) -> bool {
        self.per_port.contains_key(port)
    }

    /// First assignment wins; repeats are ignored.
    pub fn assign(&mut self, port: &str, count: u32) -> bool {
        if self.per_port.contains_key(port) {
            return false;
        }
        self.per_port.insert(port.to_string(), count);
        true
    }

    /// Total path multiplicity contributed by this tuple.
    pub fn multiplicity(&self) -> u32 {
        self.base + self.per_port.values().sum::<u32>()
    }
}

/// One class of the node's forwarding partition.
#[derive(Debug, Clone)]
pub struct CibTuple {
    pub pred: Predicate,
    /// Action ports; more than one means the device load-balances.
    pub ports: Vec<String>,
    pub counts: CountVector,
}

impl CibTuple {
    /// Definite once every action port has a count.
    pub fn is_definite(&self) -> bool {
        self.ports.iter().all(|p| self.counts.is_assigned(p))
    }

    pub fn multiplicity(&self) -> u32 {
        self.counts.multiplicity()
    }
}

/// A resolved reachability claim flowing through the convergecast: the
/// packet set and the number of disjoint paths it reaches the destination
/// over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement {
    pub pred: Predicate,
    pub count: u32,
}

/// Convergecast state for one device within one verification instance.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub is_source: bool,
    pub is_destination: bool,
    tuples: Vec<CibTuple>,
    /// Port -> subscribed tuple indexes, in seeding order.
    subs: IndexMap<String, Vec<usize>>,
    /// Tuple indexes that are not yet definite.
    todo: IndexSet<usize>,
    resolved: bool,
}

impl Node {
    pub fn new(name: impl Into<String>, is_source: bool, is_destination: bool) -> Self {
        Node {
            name: name.into(),
            is_source,
            is_destination,
            tuples: Vec::new(),
            subs: IndexMap::new(),
            todo: IndexSet::new(),
            resolved: false,
        }
    }

    /// Seed the destination's single tuple: the instance's packet space, one
    /// path, no ports to wait on. An empty space seeds nothing.
    pub fn seed_destination(&mut self, engine: &mut PredicateEngine, space: Predicate) {
        if space.is_false() {
            return;
        }
        engine.retain(space);
        self.tuples.push(CibTuple {
            pred: space,
            ports: Vec::new(),
            counts: CountVector::seeded(),
        });
    }

    /// Seed tuples from the device's forwarding classes, narrowed to the
    /// instance's packet space. Drop classes and classes with nothing inside
    /// the space contribute no tuples, so completeness is judged over the
    /// space alone.
    pub fn seed_from_lecs(
        &mut self,
        engine: &mut PredicateEngine,
        lecs: &[Lec],
        space: Predicate,
    ) -> Result<(), BddError> {
        for lec in lecs {
            let ports = lec.action.ports();
            if ports.is_empty() {
                continue;
            }
            let full = engine.encode_dst_prefix_list(&lec.prefixes)?;
            let pred = engine.and(full, space);
            if pred.is_false() {
                engine.release(full)?;
                continue;
            }
            engine.retain(pred);
            engine.release(full)?;
            let idx = self.tuples.len();
            self.tuples.push(CibTuple {
                pred,
                ports: ports.to_vec(),
                counts: CountVector::default(),
            });
            for port in ports {
                self.subs.entry(port.clone()).or_default().push(idx);
            }
            self.todo.insert(idx);
        }
        Ok(())
    }

    pub fn resolved(&self) -> bool {
        self.resolved
    }

    pub fn mark_resolved(&mut self) {
        self.resolved = true;
    }

    /// Whether every seeded tuple is definite. A node that seeded nothing is
    /// never complete and never announces.
    pub fn is_complete(&self) -> bool {
        !self.tuples.is_empty() && self.todo.is_empty()
    }

    /// Merge an announcement arriving on `port` into the subscribed tuples.
    /// Returns true if any count was assigned.
    pub fn receive(
        &mut self,
        engine: &mut PredicateEngine,
        port: &str,
        ann: Announcement,
    ) -> Result<bool, BddError> {
        if self.resolved {
            return Ok(false);
        }
        let mut changed = false;
        let mut i = 0;
        // The subscription list grows as tuples split; the loop picks the
        // split-off halves up in the same pass.
        loop {
            let idx = match self.subs.get(port).and_then(|list| list.get(i)) {
                Some(&idx) => idx,
                None => break,
            };
            i += 1;
            if self.tuples[idx].counts.is_assigned(port) {
                continue;
            }
            let covered = engine.and(ann.pred, self.tuples[idx].pred);
            if covered.is_false() {
                continue;
            }
            if covered != self.tuples[idx].pred {
                self.split(engine, idx, covered)?;
                continue;
            }
            self.tuples[idx].counts.assign(port, ann.count);
            changed = true;
            if self.tuples[idx].is_definite() {
                self.todo.shift_remove(&idx);
            }
        }
        Ok(changed)
    }

    /// Carve `covered` (a strict, non-empty subset of tuple `idx`) out into
    /// its own tuple with the same action and the counts assigned so far.
    fn split(
        &mut self,
        engine: &mut PredicateEngine,
        idx: usize,
        covered: Predicate,
    ) -> Result<(), BddError> {
        let not_covered = engine.not(covered);
        let remainder = engine.and(self.tuples[idx].pred, not_covered);
        engine.retain(covered);
        engine.retain(remainder);
        engine.release(self.tuples[idx].pred)?;
        self.tuples[idx].pred = remainder;

        let new_idx = self.tuples.len();
        let carved = CibTuple {
            pred: covered,
            ports: self.tuples[idx].ports.clone(),
            counts: self.tuples[idx].counts.clone(),
        };
        for port in &carved.ports {
            self.subs.entry(port.clone()).or_default().push(new_idx);
        }
        self.tuples.push(carved);
        self.todo.insert(new_idx);
        Ok(())
    }

    /// The node's outgoing announcements: definite tuples grouped by
    /// multiplicity, one announcement per group. Each returned predicate
    /// carries a retain owned by the caller.
    pub fn cib_out(&self, engine: &mut PredicateEngine) -> Result<Vec<Announcement>, BddError> {
        let mut groups: IndexMap<u32, Predicate> = IndexMap::new();
        for tuple in self.tuples.iter().filter(|t| t.is_definite()) {
            let mult = tuple.multiplicity();
            if mult == 0 {
                continue;
            }
            let acc = groups.get(&mult).copied().unwrap_or(Predicate::FALSE);
            let acc = engine.or_into(acc, tuple.pred)?;
            groups.insert(mult, acc);
        }
        Ok(groups
            .into_iter()
            .map(|(count, pred)| Announcement { pred, count })
            .collect())
    }

    /// Union of definite tuples whose multiplicity satisfies `expr`. The
    /// returned predicate carries a retain owned by the caller.
    pub fn witness(
        &self,
        engine: &mut PredicateEngine,
        expr: &MatchExpr,
    ) -> Result<Predicate, BddError> {
        let mut acc = Predicate::FALSE;
        for tuple in self.tuples.iter().filter(|t| t.is_definite()) {
            if expr.accepts(tuple.multiplicity()) {
                acc = engine.or_into(acc, tuple.pred)?;
            }
        }
        Ok(acc)
    }

    /// Current partition, for diagnostics and invariant checks.
    pub fn partition(&self) -> impl Iterator<Item = &CibTuple> {
        self.tuples.iter()
    }

    /// Release every predicate the node retains. Call once, before the
    /// engine goes back to its pool.
    pub fn release_all(&mut self, engine: &mut PredicateEngine) -> Result<(), BddError> {
        for tuple in self.tuples.drain(..) {
            engine.release(tuple.pred)?;
        }
        self.subs.clear();
        self.todo.clear();
        Ok(())
    }
}
