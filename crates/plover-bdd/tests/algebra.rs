//! Property tests for the Boolean algebra and prefix encoding.
//!
//! Canonicity makes the algebra laws checkable by plain id equality:
//! two formulas denote the same set exactly when the engine hands back
//! the same predicate.

use std::net::Ipv4Addr;

use proptest::prelude::*;

use plover_bdd::{AddressFamily, PacketFields, Predicate, Prefix, PredicateEngine};

fn arb_prefix() -> impl Strategy<Value = Prefix> {
    (any::<u32>(), 0u8..=32).prop_map(|(addr, len)| {
        let masked = if len == 0 {
            0
        } else {
            addr & (u32::MAX << (32 - len))
        };
        Prefix::new(masked as u128, len)
    })
}

fn encode(engine: &mut PredicateEngine, prefix: Prefix) -> Predicate {
    engine
        .encode_dst_prefix(prefix.addr, prefix.len)
        .expect("prefix length is within the field")
}

proptest! {
    #[test]
    fn and_is_commutative_and_associative(a in arb_prefix(), b in arb_prefix(), c in arb_prefix()) {
        let mut engine = PredicateEngine::new(AddressFamily::V4);
        let (pa, pb, pc) = (encode(&mut engine, a), encode(&mut engine, b), encode(&mut engine, c));
        let ab = engine.and(pa, pb);
        let ba = engine.and(pb, pa);
        prop_assert_eq!(ab, ba);
        let ab_c = engine.and(ab, pc);
        let bc = engine.and(pb, pc);
        let a_bc = engine.and(pa, bc);
        prop_assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn or_is_commutative_and_associative(a in arb_prefix(), b in arb_prefix(), c in arb_prefix()) {
        let mut engine = PredicateEngine::new(AddressFamily::V4);
        let (pa, pb, pc) = (encode(&mut engine, a), encode(&mut engine, b), encode(&mut engine, c));
        let ab = engine.or(pa, pb);
        let ba = engine.or(pb, pa);
        prop_assert_eq!(ab, ba);
        let ab_c = engine.or(ab, pc);
        let bc = engine.or(pb, pc);
        let a_bc = engine.or(pa, bc);
        prop_assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn de_morgan_and_double_negation(a in arb_prefix(), b in arb_prefix()) {
        let mut engine = PredicateEngine::new(AddressFamily::V4);
        let (pa, pb) = (encode(&mut engine, a), encode(&mut engine, b));
        let conj = engine.and(pa, pb);
        let not_conj = engine.not(conj);
        let na = engine.not(pa);
        let nb = engine.not(pb);
        let union_of_nots = engine.or(na, nb);
        prop_assert_eq!(not_conj, union_of_nots);
        let back = engine.not(na);
        prop_assert_eq!(back, pa);
    }

    #[test]
    fn complement_and_identity_laws(a in arb_prefix()) {
        let mut engine = PredicateEngine::new(AddressFamily::V4);
        let pa = encode(&mut engine, a);
        let na = engine.not(pa);
        prop_assert_eq!(engine.and(pa, na), Predicate::FALSE);
        prop_assert_eq!(engine.or(pa, na), Predicate::TRUE);
        prop_assert_eq!(engine.and(pa, Predicate::TRUE), pa);
        prop_assert_eq!(engine.or(pa, Predicate::FALSE), pa);
        prop_assert_eq!(engine.and(pa, Predicate::FALSE), Predicate::FALSE);
        prop_assert_eq!(engine.or(pa, Predicate::TRUE), Predicate::TRUE);
    }

    /// Long prefixes survive an encode/enumerate round trip textually.
    #[test]
    fn long_prefix_round_trips_through_enumeration(addr in any::<u32>(), len in 28u8..=32) {
        let mut engine = PredicateEngine::new(AddressFamily::V4);
        let masked = addr & (u32::MAX << (32 - len) as u32);
        let p = engine.encode_dst_prefix(masked as u128, len).unwrap();
        let expected = if len == 32 {
            Ipv4Addr::from(masked).to_string()
        } else {
            format!("{}/{}", Ipv4Addr::from(masked), len)
        };
        prop_assert_eq!(engine.render_set(p), expected);
    }

    #[test]
    fn prefix_membership_matches_eval(addr in any::<u32>(), len in 1u8..=32, sample in any::<u32>()) {
        let mut engine = PredicateEngine::new(AddressFamily::V4);
        let mask = u32::MAX << (32 - len) as u32;
        let masked = addr & mask;
        let p = engine.encode_dst_prefix(masked as u128, len).unwrap();
        let packet = PacketFields { dst_ip: sample as u128, ..Default::default() };
        prop_assert_eq!(engine.eval(p, &packet), sample & mask == masked);
    }

    /// Iterative folding and pairwise combination build the same canonical
    /// predicate for any prefix list.
    #[test]
    fn prefix_list_shape_is_irrelevant(list in proptest::collection::vec(arb_prefix(), 0..10)) {
        let mut engine = PredicateEngine::new(AddressFamily::V4);
        let folded = {
            let mut acc = Predicate::FALSE;
            for pfx in &list {
                let p = encode(&mut engine, *pfx);
                acc = engine.or_into(acc, p).unwrap();
            }
            acc
        };
        let combined = engine.encode_dst_prefix_list(&list).unwrap();
        prop_assert_eq!(combined, folded);
    }
}
