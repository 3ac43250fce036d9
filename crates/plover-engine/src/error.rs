use thiserror::Error;

use plover_bdd::BddError;
use plover_ir::IrError;

/// Errors surfaced by instance execution and orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Predicate(#[from] BddError),

    #[error(transparent)]
    Model(#[from] IrError),

    #[error("destination device {0} has no node in the topology")]
    MissingDestination(String),
}
