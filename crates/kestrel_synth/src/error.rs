//! Lowering error types.

use kestrel_cache::CacheError;
use kestrel_ir::IrError;

/// Errors that can occur while lowering a module to gates.
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    /// The module uses a construct that has no gate-level form here.
    #[error("module '{module}' is not synthesizable: {reason}")]
    NotSynthesizable {
        /// Module name.
        module: String,
        /// What could not be lowered.
        reason: String,
    },

    /// An expression read a signal before any bus of its width was bound.
    #[error("signal #{signal} is read as {width} bits but its bus has {found}")]
    UnboundSignal {
        /// Raw id of the signal.
        signal: u32,
        /// Width the expression expects.
        width: u32,
        /// Width of the bus found, zero when none was bound.
        found: usize,
    },

    /// The design failed checking.
    #[error(transparent)]
    Load(#[from] IrError),

    /// Storing a lowered netlist failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl LowerError {
    pub(crate) fn not_synthesizable(module: &str, reason: impl Into<String>) -> Self {
        LowerError::NotSynthesizable {
            module: module.to_string(),
            reason: reason.into(),
        }
    }
}
