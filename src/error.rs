//! Error taxonomy for the core. Errors from the engine backend propagate
//! up unchanged, wrapped so callers can match on why a call failed.

use thiserror::Error;

use crate::math::N;

/// A specialized `Result` type for core operations.
pub type Result<T> = std::result::Result<T, QUnitError>;

#[derive(Error, Debug)]
pub enum QUnitError {
    /// An operation the core deliberately does not support (e.g.
    /// controlled-with-carry arithmetic).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Resource exhaustion from the engine backend. The core does not
    /// retry; it surfaces the failure.
    #[error("engine backend failed to allocate a {qubits}-qubit joint subsystem")]
    EngineAllocation { qubits: N },

    /// A qubit index outside `0..qubit_count()` was used.
    #[error("qubit index {index} is out of bounds for a {count}-qubit register")]
    QubitIndexOutOfBounds { index: N, count: N },

    /// Two ranges/registers that should line up in length did not.
    #[error("length mismatch for {operation}: expected {expected}, got {found}")]
    LengthMismatch {
        operation: &'static str,
        expected: N,
        found: N,
    },

    /// A qubit index was repeated where the operation requires distinct
    /// indices (e.g. a control and a target referring to the same shard).
    #[error("duplicate qubit index {0} where distinct indices are required")]
    DuplicateQubitIndex(N),

    /// Passthrough for any other engine-reported failure.
    #[error("engine backend error: {0}")]
    Engine(String),
}

impl QUnitError {
    pub fn bounds_check(index: N, count: N) -> Result<()> {
        if index < count {
            Ok(())
        } else {
            Err(QUnitError::QubitIndexOutOfBounds { index, count })
        }
    }
}
