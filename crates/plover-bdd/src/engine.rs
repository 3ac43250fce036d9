//! Packet predicate engine: a [`Bdd`] with the canonical header-field
//! variable order and the encoding operations the verifier needs.
//!
//! The variable order is fixed and MSB-first: source address, destination
//! address, source port (16 bits), destination port (16 bits), protocol
//! (8 bits). Address width is picked once at construction through
//! [`AddressFamily`]; there is no per-call family flag.
//!
//! Ownership convention: the raw Boolean operations (`and`/`or`/`not`)
//! return canonical but unretained predicates; every `encode_*` operation
//! returns a predicate carrying one retain owned by the caller.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::bdd::{Bdd, Predicate};
use crate::error::BddError;

const PORT_BITS: usize = 16;
const PROTOCOL_BITS: usize = 8;

/// Address family of the engine, resolved once at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn ip_bits(self) -> usize {
        match self {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }
}

/// An address prefix to encode against the destination-address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Prefix {
    pub addr: u128,
    pub len: u8,
}

impl Prefix {
    pub fn new(addr: u128, len: u8) -> Self {
        Prefix { addr, len }
    }

    pub fn v4(addr: Ipv4Addr, len: u8) -> Self {
        Prefix {
            addr: u32::from(addr) as u128,
            len,
        }
    }

    pub fn v6(addr: Ipv6Addr, len: u8) -> Self {
        Prefix {
            addr: u128::from(addr),
            len,
        }
    }
}

/// A concrete five-field packet, for predicate evaluation in tests and
/// diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketFields {
    pub src_ip: u128,
    pub dst_ip: u128,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

/// One of the five canonical header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    SrcIp,
    DstIp,
    SrcPort,
    DstPort,
    Protocol,
}

/// The packet predicate engine.
///
/// `Clone` yields a structurally independent engine with identical variable
/// declarations and the same predicate ids, usable concurrently with the
/// source. The pool manufactures engines this way instead of re-declaring
/// variables and re-encoding from scratch.
#[derive(Debug, Clone)]
pub struct PredicateEngine {
    bdd: Bdd,
    family: AddressFamily,
    src_ip: Vec<Predicate>,
    dst_ip: Vec<Predicate>,
    src_port: Vec<Predicate>,
    dst_port: Vec<Predicate>,
    protocol: Vec<Predicate>,
    /// Suffix conjunctions over the destination-address literals, the
    /// "any value in this field" masks.
    dst_ip_any: Vec<Predicate>,
    prefix_cache: HashMap<(u128, u8), Predicate>,
}

impl PredicateEngine {
    /// Construct a fresh engine, declaring every header-bit variable in the
    /// fixed field order.
    pub fn new(family: AddressFamily) -> Self {
        let mut bdd = Bdd::new();
        let ip_bits = family.ip_bits();
        let declare = |bdd: &mut Bdd, n: usize| -> Vec<Predicate> {
            (0..n).map(|_| bdd.mk_var()).collect()
        };
        let src_ip = declare(&mut bdd, ip_bits);
        let dst_ip = declare(&mut bdd, ip_bits);
        let src_port = declare(&mut bdd, PORT_BITS);
        let dst_port = declare(&mut bdd, PORT_BITS);
        let protocol = declare(&mut bdd, PROTOCOL_BITS);
        let mut engine = PredicateEngine {
            bdd,
            family,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
            dst_ip_any: Vec::new(),
            prefix_cache: HashMap::new(),
        };
        let dst_vars = engine.dst_ip.clone();
        engine.dst_ip_any = engine
            .and_in_batch(&dst_vars)
            .expect("suffix masks over fresh literals cannot underflow");
        engine
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Total declared header bits.
    pub fn total_bits(&self) -> usize {
        self.bdd.var_count() as usize
    }

    fn field_vars(&self, field: HeaderField) -> &[Predicate] {
        match field {
            HeaderField::SrcIp => &self.src_ip,
            HeaderField::DstIp => &self.dst_ip,
            HeaderField::SrcPort => &self.src_port,
            HeaderField::DstPort => &self.dst_port,
            HeaderField::Protocol => &self.protocol,
        }
    }

    /// Suffix masks over the destination-address literals: entry `k` is the
    /// conjunction of the last `k` literals.
    pub fn dst_ip_any(&self) -> &[Predicate] {
        &self.dst_ip_any
    }

    // ------------------------------------------------------------------
    // Raw Boolean algebra (unretained results).
    // ------------------------------------------------------------------

    pub fn and(&mut self, a: Predicate, b: Predicate) -> Predicate {
        self.bdd.and(a, b)
    }

    pub fn or(&mut self, a: Predicate, b: Predicate) -> Predicate {
        self.bdd.or(a, b)
    }

    pub fn not(&mut self, a: Predicate) -> Predicate {
        self.bdd.not(a)
    }

    pub fn retain(&mut self, p: Predicate) -> Predicate {
        self.bdd.retain(p)
    }

    pub fn release(&mut self, p: Predicate) -> Result<(), BddError> {
        self.bdd.release(p)
    }

    pub fn or_into(&mut self, acc: Predicate, p: Predicate) -> Result<Predicate, BddError> {
        self.bdd.or_into(acc, p)
    }

    pub fn and_into(&mut self, acc: Predicate, p: Predicate) -> Result<Predicate, BddError> {
        self.bdd.and_into(acc, p)
    }

    pub fn gc(&mut self) -> usize {
        self.bdd.gc()
    }

    // ------------------------------------------------------------------
    // Encoding.
    // ------------------------------------------------------------------

    /// Conjunction of literal tests for a fixed-length prefix against a
    /// field's variables, MSB-first. An empty bit list short-circuits to the
    /// universal predicate. Flags other than 0/1 are a programmatic error;
    /// the diagram is left untouched in that case.
    pub fn encode_prefix(&mut self, bits: &[u8], field: HeaderField) -> Result<Predicate, BddError> {
        let width = self.field_vars(field).len();
        if bits.len() > width {
            return Err(BddError::PrefixTooLong {
                len: bits.len() as u8,
                width: width as u16,
            });
        }
        // Validate every flag before touching the diagram.
        if let Some(&bad) = bits.iter().find(|&&b| b > 1) {
            return Err(BddError::InvalidLiteral(bad));
        }
        let mut acc = Predicate::TRUE;
        for (k, &flag) in bits.iter().enumerate() {
            let var = self.field_vars(field)[k];
            let lit = if flag == 1 { var } else { self.bdd.not(var) };
            acc = self.bdd.and_into(acc, lit)?;
        }
        Ok(acc)
    }

    /// Encode a destination-address prefix, memoizing per `(addr, len)`.
    pub fn encode_dst_prefix(&mut self, addr: u128, len: u8) -> Result<Predicate, BddError> {
        let ip_bits = self.family.ip_bits();
        if len as usize > ip_bits {
            return Err(BddError::PrefixTooLong {
                len,
                width: ip_bits as u16,
            });
        }
        if let Some(&cached) = self.prefix_cache.get(&(addr, len)) {
            return Ok(self.bdd.retain(cached));
        }
        let bits: Vec<u8> = (0..len as usize)
            .map(|k| ((addr >> (ip_bits - 1 - k)) & 1) as u8)
            .collect();
        let p = self.encode_prefix(&bits, HeaderField::DstIp)?;
        // The cache holds its own retain so hits can hand out fresh ones.
        self.bdd.retain(p);
        self.prefix_cache.insert((addr, len), p);
        Ok(p)
    }

    /// OR of [`Self::encode_dst_prefix`] over a prefix list. Small lists
    /// fold iteratively; larger ones combine pairwise to keep intermediate
    /// diagrams small. Both shapes produce the same canonical predicate.
    pub fn encode_dst_prefix_list(&mut self, list: &[Prefix]) -> Result<Predicate, BddError> {
        if list.is_empty() {
            return Ok(Predicate::FALSE);
        }
        if list.len() <= 3 {
            let mut acc = Predicate::FALSE;
            for prefix in list {
                let p = self.encode_dst_prefix(prefix.addr, prefix.len)?;
                acc = self.bdd.or_into(acc, p)?;
                self.bdd.release(p)?;
            }
            return Ok(acc);
        }
        self.encode_list_rec(list)
    }

    fn encode_list_rec(&mut self, list: &[Prefix]) -> Result<Predicate, BddError> {
        if list.len() == 1 {
            return self.encode_dst_prefix(list[0].addr, list[0].len);
        }
        let mid = list.len() / 2;
        let left = self.encode_list_rec(&list[..mid])?;
        let right = self.encode_list_rec(&list[mid..])?;
        let out = self.bdd.or_into(left, right)?;
        self.bdd.release(right)?;
        Ok(out)
    }

    /// `p` minus the union of blacklisted predicates.
    pub fn encode_without_blacklist(
        &mut self,
        p: Predicate,
        blacklist: &[Predicate],
    ) -> Result<Predicate, BddError> {
        if blacklist.is_empty() {
            return Ok(self.bdd.retain(p));
        }
        let mut all_black = Predicate::FALSE;
        for &b in blacklist {
            all_black = self.bdd.or_into(all_black, b)?;
        }
        let allowed = self.bdd.not(all_black);
        self.bdd.retain(allowed);
        self.bdd.release(all_black)?;
        let out = self.bdd.and(p, allowed);
        self.bdd.retain(out);
        self.bdd.release(allowed)?;
        Ok(out)
    }

    /// Suffix conjunctions: entry `k` of the result is the AND of the last
    /// `k` inputs (entry 0 is the universal predicate). A false term forces
    /// every longer suffix to false; true terms contribute nothing. Every
    /// returned entry carries one retain.
    pub fn and_in_batch(&mut self, preds: &[Predicate]) -> Result<Vec<Predicate>, BddError> {
        let mut res = Vec::with_capacity(preds.len() + 1);
        res.push(Predicate::TRUE);
        let mut acc = Predicate::TRUE;
        for &p in preds.iter().rev() {
            if acc.is_false() || p.is_false() {
                self.bdd.release(acc)?;
                acc = Predicate::FALSE;
            } else if !p.is_true() {
                acc = self.bdd.and_into(acc, p)?;
            }
            res.push(self.bdd.retain(acc));
        }
        self.bdd.release(acc)?;
        Ok(res)
    }

    // ------------------------------------------------------------------
    // Evaluation, enumeration, observability.
    // ------------------------------------------------------------------

    /// Evaluate a predicate against a concrete packet.
    pub fn eval(&self, p: Predicate, packet: &PacketFields) -> bool {
        let ip_bits = self.family.ip_bits();
        let mut assignment = Vec::with_capacity(self.total_bits());
        push_bits(&mut assignment, packet.src_ip, ip_bits);
        push_bits(&mut assignment, packet.dst_ip, ip_bits);
        push_bits(&mut assignment, packet.src_port as u128, PORT_BITS);
        push_bits(&mut assignment, packet.dst_port as u128, PORT_BITS);
        push_bits(&mut assignment, packet.protocol as u128, PROTOCOL_BITS);
        self.bdd.eval(p, &assignment)
    }

    /// Depth-first, restartable enumeration of the satisfying set of `p`,
    /// rendered as destination-address prefixes (wildcard bits as `-`).
    /// Diagnostics only.
    pub fn enumerate_dst_prefixes(&self, p: Predicate) -> SetEnumerator<'_> {
        let stack = if p.is_false() {
            Vec::new()
        } else {
            vec![Frame {
                id: p.raw(),
                level: 0,
                path: Vec::new(),
            }]
        };
        SetEnumerator {
            engine: self,
            stack,
        }
    }

    /// Whole-set rendering: `none`, `all`, or `;`-joined prefix entries.
    pub fn render_set(&self, p: Predicate) -> String {
        if p.is_false() {
            return "none".to_string();
        }
        if p.is_true() {
            return "all".to_string();
        }
        self.enumerate_dst_prefixes(p)
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Distinct diagram nodes rooted at `p`.
    pub fn node_count(&self, p: Predicate) -> usize {
        self.bdd.node_count(p)
    }

    /// Rough resident-size estimate of the whole engine, in bytes.
    pub fn memory_estimate(&self) -> usize {
        self.bdd.memory_estimate()
    }

    fn format_dst_field(&self, path: &[u8]) -> String {
        let ip_bits = self.family.ip_bits();
        let start = ip_bits; // src address occupies the first field
        let field = &path[start..start + ip_bits];
        let prefix_len = match field.iter().rposition(|&c| c != b'-') {
            Some(last) => last + 1,
            None => return "any".to_string(),
        };
        if field[..prefix_len].contains(&b'-') {
            // Non-contiguous range; fall back to the raw bit pattern.
            return String::from_utf8_lossy(field).into_owned();
        }
        let mut value: u128 = 0;
        for &c in &field[..prefix_len] {
            value = (value << 1) | u128::from(c == b'1');
        }
        value <<= (ip_bits - prefix_len) as u32;
        let rendered = match self.family {
            AddressFamily::V4 => Ipv4Addr::from(value as u32).to_string(),
            AddressFamily::V6 => Ipv6Addr::from(value).to_string(),
        };
        if prefix_len == ip_bits {
            rendered
        } else {
            format!("{rendered}/{prefix_len}")
        }
    }
}

fn push_bits(out: &mut Vec<bool>, value: u128, width: usize) {
    for k in 0..width {
        out.push((value >> (width - 1 - k)) & 1 == 1);
    }
}

struct Frame {
    id: u32,
    level: usize,
    path: Vec<u8>,
}

/// Lazy depth-first enumerator over a predicate's satisfying prefix ranges.
pub struct SetEnumerator<'a> {
    engine: &'a PredicateEngine,
    stack: Vec<Frame>,
}

impl Iterator for SetEnumerator<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.engine.total_bits();
        while let Some(frame) = self.stack.pop() {
            if frame.level == total {
                return Some(self.engine.format_dst_field(&frame.path));
            }
            let (var, low, high) = self.engine.bdd.node(frame.id);
            if frame.id == Predicate::TRUE.raw() || var as usize > frame.level {
                let mut path = frame.path;
                path.push(b'-');
                self.stack.push(Frame {
                    id: frame.id,
                    level: frame.level + 1,
                    path,
                });
                continue;
            }
            // Push high after low so the low branch is explored first.
            if high != 0 {
                let mut path = frame.path.clone();
                path.push(b'1');
                self.stack.push(Frame {
                    id: high,
                    level: frame.level + 1,
                    path,
                });
            }
            if low != 0 {
                let mut path = frame.path;
                path.push(b'0');
                self.stack.push(Frame {
                    id: low,
                    level: frame.level + 1,
                    path,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4_engine() -> PredicateEngine {
        PredicateEngine::new(AddressFamily::V4)
    }

    fn dst(addr: [u8; 4]) -> PacketFields {
        PacketFields {
            dst_ip: u32::from(Ipv4Addr::from(addr)) as u128,
            ..Default::default()
        }
    }

    #[test]
    fn variable_layout_matches_field_order() {
        let engine = v4_engine();
        assert_eq!(engine.total_bits(), 32 + 32 + 16 + 16 + 8);
        let v6 = PredicateEngine::new(AddressFamily::V6);
        assert_eq!(v6.total_bits(), 128 + 128 + 16 + 16 + 8);
    }

    #[test]
    fn dst_prefix_matches_members_and_rejects_outsiders() {
        let mut engine = v4_engine();
        let p = engine
            .encode_dst_prefix(u32::from(Ipv4Addr::new(10, 0, 0, 0)) as u128, 8)
            .unwrap();
        assert!(engine.eval(p, &dst([10, 1, 2, 3])));
        assert!(engine.eval(p, &dst([10, 255, 255, 255])));
        assert!(!engine.eval(p, &dst([11, 0, 0, 0])));
        assert!(!engine.eval(p, &dst([9, 255, 255, 255])));
        // Source address does not constrain the predicate.
        let mut pkt = dst([10, 0, 0, 1]);
        pkt.src_ip = u32::from(Ipv4Addr::new(172, 16, 0, 1)) as u128;
        assert!(engine.eval(p, &pkt));
    }

    #[test]
    fn prefix_cache_returns_identical_ids() {
        let mut engine = v4_engine();
        let addr = u32::from(Ipv4Addr::new(192, 168, 0, 0)) as u128;
        let a = engine.encode_dst_prefix(addr, 16).unwrap();
        let b = engine.encode_dst_prefix(addr, 16).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_prefix_is_universal() {
        let mut engine = v4_engine();
        let p = engine.encode_prefix(&[], HeaderField::DstIp).unwrap();
        assert_eq!(p, Predicate::TRUE);
    }

    #[test]
    fn malformed_literal_flag_is_fatal_and_harmless() {
        let mut engine = v4_engine();
        let before = engine.memory_estimate();
        let err = engine.encode_prefix(&[0, 2, 1], HeaderField::DstIp);
        assert_eq!(err, Err(BddError::InvalidLiteral(2)));
        assert_eq!(engine.memory_estimate(), before);
    }

    #[test]
    fn overlong_prefix_is_rejected() {
        let mut engine = v4_engine();
        let bits = vec![0u8; 33];
        assert!(matches!(
            engine.encode_prefix(&bits, HeaderField::DstIp),
            Err(BddError::PrefixTooLong { len: 33, width: 32 })
        ));
        assert!(matches!(
            engine.encode_dst_prefix(0, 33),
            Err(BddError::PrefixTooLong { len: 33, width: 32 })
        ));
    }

    #[test]
    fn prefix_list_small_and_divide_and_conquer_agree() {
        let mut engine = v4_engine();
        let prefixes: Vec<Prefix> = (0..6)
            .map(|i| Prefix::v4(Ipv4Addr::new(10, i, 0, 0), 16))
            .collect();
        let iterative = {
            let mut acc = Predicate::FALSE;
            for pfx in &prefixes {
                let p = engine.encode_dst_prefix(pfx.addr, pfx.len).unwrap();
                acc = engine.or_into(acc, p).unwrap();
            }
            acc
        };
        let combined = engine.encode_dst_prefix_list(&prefixes).unwrap();
        assert_eq!(combined, iterative);
    }

    #[test]
    fn empty_prefix_list_is_empty_set() {
        let mut engine = v4_engine();
        assert_eq!(engine.encode_dst_prefix_list(&[]).unwrap(), Predicate::FALSE);
    }

    #[test]
    fn and_in_batch_short_circuits() {
        let mut engine = v4_engine();
        let x = engine.dst_ip_any()[1];
        let suffixes = engine
            .and_in_batch(&[x, Predicate::FALSE, x])
            .unwrap();
        assert_eq!(suffixes[0], Predicate::TRUE);
        assert_eq!(suffixes[1], x);
        // A false term poisons every longer suffix.
        assert_eq!(suffixes[2], Predicate::FALSE);
        assert_eq!(suffixes[3], Predicate::FALSE);

        let trues = engine
            .and_in_batch(&[Predicate::TRUE, x, Predicate::TRUE])
            .unwrap();
        assert_eq!(trues[1], Predicate::TRUE);
        assert_eq!(trues[2], x);
        assert_eq!(trues[3], x);
    }

    #[test]
    fn blacklist_subtracts_from_predicate() {
        let mut engine = v4_engine();
        let base = engine
            .encode_dst_prefix(u32::from(Ipv4Addr::new(10, 0, 0, 0)) as u128, 8)
            .unwrap();
        let black = engine
            .encode_dst_prefix(u32::from(Ipv4Addr::new(10, 0, 0, 0)) as u128, 16)
            .unwrap();
        let p = engine.encode_without_blacklist(base, &[black]).unwrap();
        assert!(engine.eval(p, &dst([10, 1, 0, 1])));
        assert!(!engine.eval(p, &dst([10, 0, 7, 7])));
        // Empty blacklist passes the predicate through.
        let same = engine.encode_without_blacklist(base, &[]).unwrap();
        assert_eq!(same, base);
    }

    #[test]
    fn render_set_shows_prefix_notation() {
        let mut engine = v4_engine();
        assert_eq!(engine.render_set(Predicate::FALSE), "none");
        assert_eq!(engine.render_set(Predicate::TRUE), "all");
        let p = engine
            .encode_dst_prefix(u32::from(Ipv4Addr::new(192, 168, 0, 0)) as u128, 16)
            .unwrap();
        assert_eq!(engine.render_set(p), "192.168.0.0/16");
    }

    #[test]
    fn enumerate_splits_disjoint_prefixes() {
        let mut engine = v4_engine();
        let list = vec![
            Prefix::v4(Ipv4Addr::new(10, 0, 0, 0), 8),
            Prefix::v4(Ipv4Addr::new(192, 168, 0, 0), 16),
        ];
        let p = engine.encode_dst_prefix_list(&list).unwrap();
        let mut entries: Vec<String> = engine.enumerate_dst_prefixes(p).collect();
        entries.sort();
        assert_eq!(entries, vec!["10.0.0.0/8", "192.168.0.0/16"]);
    }

    #[test]
    fn clone_shares_ids_without_cross_mutation() {
        let mut engine = v4_engine();
        let p = engine
            .encode_dst_prefix(u32::from(Ipv4Addr::new(10, 0, 0, 0)) as u128, 8)
            .unwrap();
        let mut copy = engine.clone();
        assert!(copy.eval(p, &dst([10, 0, 0, 1])));
        let extra = copy
            .encode_dst_prefix(u32::from(Ipv4Addr::new(172, 16, 0, 0)) as u128, 12)
            .unwrap();
        // The source engine never saw `extra`'s construction, but `p` is
        // untouched in both.
        assert!(copy.eval(extra, &dst([172, 16, 0, 1])));
        assert!(engine.eval(p, &dst([10, 0, 0, 1])));
    }
}
