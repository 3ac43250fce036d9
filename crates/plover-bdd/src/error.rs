use thiserror::Error;

/// Errors raised by the decision-diagram manager and the predicate engine.
///
/// `InvalidLiteral` and `PrefixTooLong` are programmatic misuse of the
/// encoding API: construction of the offending predicate is aborted and the
/// shared diagram is left untouched. `RefUnderflow` indicates a
/// retain/release imbalance in the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BddError {
    #[error("literal flag must be 0 or 1, got {0}")]
    InvalidLiteral(u8),

    #[error("prefix length {len} exceeds the {width}-bit field")]
    PrefixTooLong { len: u8, width: u16 },

    #[error("reference count underflow on predicate {0}")]
    RefUnderflow(u32),

    #[error("unknown predicate id {0}")]
    UnknownPredicate(u32),
}
