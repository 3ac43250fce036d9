//! The decision-diagram manager: node arena, unique table, apply cache and
//! reference counting.
//!
//! Canonicity is maintained manager-side: every node is hash-consed through
//! the unique table, so two structurally equal predicates always share one
//! id, and equality of [`Predicate`] handles is semantic equality. Boolean
//! operations are memoized in the apply cache.
//!
//! Reference counting is explicit and root-based: callers retain the roots
//! they hold with [`Bdd::retain`] and release them with [`Bdd::release`];
//! [`Bdd::gc`] reclaims every node not reachable from a retained root. The
//! terminals `FALSE` and `TRUE` are never reclaimed.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::BddError;

/// An opaque handle to a node in one manager's diagram, denoting a Boolean
/// function over the declared variables (a set of packets).
///
/// Handles are only meaningful together with the manager (or a clone of it:
/// cloning preserves ids). `Predicate::FALSE` is the empty set and
/// `Predicate::TRUE` the universal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Predicate(pub(crate) u32);

impl Predicate {
    pub const FALSE: Predicate = Predicate(0);
    pub const TRUE: Predicate = Predicate(1);

    pub fn is_false(self) -> bool {
        self.0 == 0
    }

    pub fn is_true(self) -> bool {
        self.0 == 1
    }

    pub fn is_terminal(self) -> bool {
        self.0 < 2
    }

    /// The raw node id, for diagnostics only.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Variable marker for the two terminal nodes: sorts after every real
/// variable so cofactoring never descends into a terminal.
const TERMINAL_VAR: u32 = u32::MAX;
/// Variable marker for reclaimed arena slots.
const FREE_VAR: u32 = u32::MAX - 1;

#[derive(Debug, Clone, Copy)]
struct BddNode {
    var: u32,
    low: u32,
    high: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    And,
    Or,
    Not,
}

/// The decision-diagram manager.
///
/// `Clone` produces a structurally independent diagram with the same
/// variable declarations, node table and reference counts; the clone can be
/// mutated concurrently with the source without cross-talk. This is how the
/// engine pool manufactures engines from a canonical seed.
#[derive(Debug, Clone)]
pub struct Bdd {
    nodes: Vec<BddNode>,
    refs: Vec<u32>,
    free: Vec<u32>,
    unique: HashMap<(u32, u32, u32), u32>,
    cache: HashMap<(Op, u32, u32), u32>,
    var_count: u32,
}

impl Default for Bdd {
    fn default() -> Self {
        Self::new()
    }
}

impl Bdd {
    pub fn new() -> Self {
        Bdd {
            nodes: vec![
                BddNode {
                    var: TERMINAL_VAR,
                    low: 0,
                    high: 0,
                },
                BddNode {
                    var: TERMINAL_VAR,
                    low: 1,
                    high: 1,
                },
            ],
            refs: vec![1, 1],
            free: Vec::new(),
            unique: HashMap::new(),
            cache: HashMap::new(),
            var_count: 0,
        }
    }

    /// Number of declared variables. Variable ids double as levels: the
    /// variable order is declaration order.
    pub fn var_count(&self) -> u32 {
        self.var_count
    }

    /// Declare the next variable in the order and return its positive
    /// literal. The literal is retained by the manager and survives `gc`.
    pub fn mk_var(&mut self) -> Predicate {
        let var = self.var_count;
        self.var_count += 1;
        let id = self.mk_node(var, 0, 1);
        self.refs[id as usize] += 1;
        Predicate(id)
    }

    fn mk_node(&mut self, var: u32, low: u32, high: u32) -> u32 {
        if low == high {
            return low;
        }
        if let Some(&id) = self.unique.get(&(var, low, high)) {
            return id;
        }
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = BddNode { var, low, high };
                self.refs[slot as usize] = 0;
                slot
            }
            None => {
                self.nodes.push(BddNode { var, low, high });
                self.refs.push(0);
                (self.nodes.len() - 1) as u32
            }
        };
        self.unique.insert((var, low, high), id);
        id
    }

    fn var_of(&self, id: u32) -> u32 {
        self.nodes[id as usize].var
    }

    fn cofactors(&self, id: u32, var: u32) -> (u32, u32) {
        let node = self.nodes[id as usize];
        if node.var == var {
            (node.low, node.high)
        } else {
            (id, id)
        }
    }

    /// Conjunction. The result is canonical and not retained.
    pub fn and(&mut self, a: Predicate, b: Predicate) -> Predicate {
        Predicate(self.apply(Op::And, a.0, b.0))
    }

    /// Disjunction. The result is canonical and not retained.
    pub fn or(&mut self, a: Predicate, b: Predicate) -> Predicate {
        Predicate(self.apply(Op::Or, a.0, b.0))
    }

    /// Negation. The result is canonical and not retained.
    pub fn not(&mut self, a: Predicate) -> Predicate {
        Predicate(self.apply_not(a.0))
    }

    fn apply(&mut self, op: Op, a: u32, b: u32) -> u32 {
        match op {
            Op::And => {
                if a == b {
                    return a;
                }
                if a == 0 || b == 0 {
                    return 0;
                }
                if a == 1 {
                    return b;
                }
                if b == 1 {
                    return a;
                }
            }
            Op::Or => {
                if a == b {
                    return a;
                }
                if a == 1 || b == 1 {
                    return 1;
                }
                if a == 0 {
                    return b;
                }
                if b == 0 {
                    return a;
                }
            }
            Op::Not => unreachable!("negation goes through apply_not"),
        }
        // AND and OR are commutative; normalize the cache key.
        let key = (op, a.min(b), a.max(b));
        if let Some(&r) = self.cache.get(&key) {
            return r;
        }
        let var = self.var_of(a).min(self.var_of(b));
        let (a0, a1) = self.cofactors(a, var);
        let (b0, b1) = self.cofactors(b, var);
        let low = self.apply(op, a0, b0);
        let high = self.apply(op, a1, b1);
        let r = self.mk_node(var, low, high);
        self.cache.insert(key, r);
        r
    }

    fn apply_not(&mut self, a: u32) -> u32 {
        if a == 0 {
            return 1;
        }
        if a == 1 {
            return 0;
        }
        let key = (Op::Not, a, a);
        if let Some(&r) = self.cache.get(&key) {
            return r;
        }
        let node = self.nodes[a as usize];
        let low = self.apply_not(node.low);
        let high = self.apply_not(node.high);
        let r = self.mk_node(node.var, low, high);
        self.cache.insert(key, r);
        r
    }

    /// Retain `p` as a root. Terminals are permanently retained; retaining
    /// them again is a no-op. Returns `p` for call chaining.
    pub fn retain(&mut self, p: Predicate) -> Predicate {
        if !p.is_terminal() {
            debug_assert!(self.is_live(p.0), "retain on reclaimed predicate {}", p.0);
            self.refs[p.0 as usize] += 1;
        }
        p
    }

    /// Release one retain on `p`. Releasing a terminal is a no-op; releasing
    /// a predicate whose count is already zero is a caller bug and reported
    /// as [`BddError::RefUnderflow`].
    pub fn release(&mut self, p: Predicate) -> Result<(), BddError> {
        if p.is_terminal() {
            return Ok(());
        }
        if !self.is_live(p.0) {
            return Err(BddError::UnknownPredicate(p.0));
        }
        let count = &mut self.refs[p.0 as usize];
        if *count == 0 {
            return Err(BddError::RefUnderflow(p.0));
        }
        *count -= 1;
        Ok(())
    }

    /// Current retain count of a root (0 for reclaim-eligible nodes).
    pub fn retain_count(&self, p: Predicate) -> u32 {
        self.refs[p.0 as usize]
    }

    /// `acc ∨ p`, retaining the result and releasing `acc`. The usual
    /// accumulator step when folding a disjunction; start from
    /// `Predicate::FALSE`.
    pub fn or_into(&mut self, acc: Predicate, p: Predicate) -> Result<Predicate, BddError> {
        let r = self.or(acc, p);
        self.retain(r);
        self.release(acc)?;
        Ok(r)
    }

    /// `acc ∧ p`, retaining the result and releasing `acc`. Start from
    /// `Predicate::TRUE`.
    pub fn and_into(&mut self, acc: Predicate, p: Predicate) -> Result<Predicate, BddError> {
        let r = self.and(acc, p);
        self.retain(r);
        self.release(acc)?;
        Ok(r)
    }

    fn is_live(&self, id: u32) -> bool {
        (id as usize) < self.nodes.len() && self.nodes[id as usize].var != FREE_VAR
    }

    /// Reclaim every node unreachable from a retained root. Returns the
    /// number of reclaimed nodes. The apply cache is dropped wholesale since
    /// it may reference swept nodes.
    pub fn gc(&mut self) -> usize {
        let mut marked = vec![false; self.nodes.len()];
        marked[0] = true;
        marked[1] = true;
        let mut stack: Vec<u32> = (2..self.nodes.len() as u32)
            .filter(|&id| self.is_live(id) && self.refs[id as usize] > 0)
            .collect();
        while let Some(id) = stack.pop() {
            if marked[id as usize] {
                continue;
            }
            marked[id as usize] = true;
            let node = self.nodes[id as usize];
            stack.push(node.low);
            stack.push(node.high);
        }
        let mut reclaimed = 0;
        for id in 2..self.nodes.len() as u32 {
            if self.is_live(id) && !marked[id as usize] {
                let node = self.nodes[id as usize];
                self.unique.remove(&(node.var, node.low, node.high));
                self.nodes[id as usize] = BddNode {
                    var: FREE_VAR,
                    low: 0,
                    high: 0,
                };
                self.free.push(id);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            self.cache.clear();
        }
        tracing::debug!(reclaimed, live = self.live_count(), "gc swept");
        reclaimed
    }

    /// Distinct nodes (terminals included) in the diagram rooted at `p`.
    pub fn node_count(&self, p: Predicate) -> usize {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![p.0];
        let mut count = 0;
        while let Some(id) = stack.pop() {
            if seen[id as usize] {
                continue;
            }
            seen[id as usize] = true;
            count += 1;
            if id > 1 {
                let node = self.nodes[id as usize];
                stack.push(node.low);
                stack.push(node.high);
            }
        }
        count
    }

    /// Live nodes across the whole manager.
    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Rough resident-size estimate in bytes, for batching heuristics.
    pub fn memory_estimate(&self) -> usize {
        self.nodes.len() * (std::mem::size_of::<BddNode>() + std::mem::size_of::<u32>())
            + self.unique.len() * std::mem::size_of::<((u32, u32, u32), u32)>()
            + self.cache.len() * std::mem::size_of::<((Op, u32, u32), u32)>()
    }

    /// Evaluate `p` under a total assignment indexed by variable id.
    /// Variables beyond `assignment.len()` read as false.
    pub fn eval(&self, p: Predicate, assignment: &[bool]) -> bool {
        let mut id = p.0;
        while id > 1 {
            let node = self.nodes[id as usize];
            let bit = assignment.get(node.var as usize).copied().unwrap_or(false);
            id = if bit { node.high } else { node.low };
        }
        id == 1
    }

    pub(crate) fn node(&self, id: u32) -> (u32, u32, u32) {
        let node = self.nodes[id as usize];
        (node.var, node.low, node.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_vars(bdd: &mut Bdd) -> (Predicate, Predicate, Predicate) {
        (bdd.mk_var(), bdd.mk_var(), bdd.mk_var())
    }

    #[test]
    fn terminals_are_fixed_points() {
        let mut bdd = Bdd::new();
        assert_eq!(bdd.not(Predicate::FALSE), Predicate::TRUE);
        assert_eq!(bdd.not(Predicate::TRUE), Predicate::FALSE);
        let (x, _, _) = three_vars(&mut bdd);
        assert_eq!(bdd.and(x, Predicate::FALSE), Predicate::FALSE);
        assert_eq!(bdd.or(x, Predicate::TRUE), Predicate::TRUE);
        assert_eq!(bdd.and(x, Predicate::TRUE), x);
        assert_eq!(bdd.or(x, Predicate::FALSE), x);
    }

    #[test]
    fn hash_consing_makes_equal_formulas_identical() {
        let mut bdd = Bdd::new();
        let (x, y, _) = three_vars(&mut bdd);
        let a = bdd.and(x, y);
        let b = bdd.and(y, x);
        assert_eq!(a, b);
        let c = bdd.or(a, a);
        assert_eq!(c, a);
    }

    #[test]
    fn complement_laws_hold() {
        let mut bdd = Bdd::new();
        let (x, y, _) = three_vars(&mut bdd);
        let f = bdd.or(x, y);
        let nf = bdd.not(f);
        assert_eq!(bdd.and(f, nf), Predicate::FALSE);
        assert_eq!(bdd.or(f, nf), Predicate::TRUE);
        assert_eq!(bdd.not(nf), f);
    }

    #[test]
    fn release_below_zero_is_reported() {
        let mut bdd = Bdd::new();
        let (x, y, _) = three_vars(&mut bdd);
        let f = bdd.and(x, y);
        bdd.retain(f);
        assert!(bdd.release(f).is_ok());
        assert_eq!(bdd.release(f), Err(BddError::RefUnderflow(f.0)));
        // Terminals may be released freely.
        assert!(bdd.release(Predicate::TRUE).is_ok());
        assert!(bdd.release(Predicate::FALSE).is_ok());
    }

    #[test]
    fn gc_reclaims_unretained_and_keeps_retained() {
        let mut bdd = Bdd::new();
        let (x, y, z) = three_vars(&mut bdd);
        let keep = bdd.and(x, y);
        bdd.retain(keep);
        let tmp = bdd.and(keep, z);
        let before = bdd.live_count();
        let reclaimed = bdd.gc();
        assert!(reclaimed > 0);
        assert_eq!(bdd.live_count(), before - reclaimed);
        // The retained root still evaluates correctly after gc.
        assert!(bdd.eval(keep, &[true, true, false]));
        assert!(!bdd.eval(keep, &[true, false, false]));
        // The reclaimed id must not linger in the unique table: rebuilding
        // the same function yields a live node again.
        let rebuilt = bdd.and(keep, z);
        assert!(bdd.eval(rebuilt, &[true, true, true]));
        let _ = tmp;
    }

    #[test]
    fn variable_literals_survive_gc() {
        let mut bdd = Bdd::new();
        let (x, y, _) = three_vars(&mut bdd);
        bdd.gc();
        let f = bdd.and(x, y);
        assert!(bdd.eval(f, &[true, true, false]));
    }

    #[test]
    fn clone_is_structurally_independent_but_id_compatible() {
        let mut bdd = Bdd::new();
        let (x, y, _) = three_vars(&mut bdd);
        let f = bdd.and(x, y);
        bdd.retain(f);

        let mut copy = bdd.clone();
        // Ids carry over: the same handle denotes the same function.
        assert!(copy.eval(f, &[true, true, false]));
        // Mutating the clone does not disturb the source.
        let z = copy.mk_var();
        let g = copy.and(f, z);
        copy.retain(g);
        assert_eq!(bdd.var_count(), 3);
        assert_eq!(copy.var_count(), 4);
        assert!(bdd.eval(f, &[true, true]));
    }

    #[test]
    fn or_into_folds_with_balanced_refs() {
        let mut bdd = Bdd::new();
        let (x, y, z) = three_vars(&mut bdd);
        let mut acc = Predicate::FALSE;
        for lit in [x, y, z] {
            acc = bdd.or_into(acc, lit).unwrap();
        }
        assert_eq!(bdd.retain_count(acc), 1);
        assert!(bdd.eval(acc, &[false, false, true]));
        assert!(!bdd.eval(acc, &[false, false, false]));
    }

    #[test]
    fn node_count_counts_shared_structure_once() {
        let mut bdd = Bdd::new();
        let (x, y, _) = three_vars(&mut bdd);
        let f = bdd.and(x, y);
        // f has one node per variable plus both terminals.
        assert_eq!(bdd.node_count(f), 4);
        assert_eq!(bdd.node_count(Predicate::TRUE), 1);
    }
}
