//! Simulation error types.
//!
//! Loading, building and driving a kernel all report failures as variants of
//! [`SimError`]. Evaluation itself never fails: every operator is total.

use std::io;

use kestrel_cache::CacheError;
use kestrel_config::BackendKind;
use kestrel_ir::IrError;

/// Errors that can occur while building or driving a simulation kernel.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A signal name passed to `poke`/`peek` does not exist.
    #[error("no signal named '{name}'")]
    NoSuchSignal {
        /// The requested name.
        name: String,
    },

    /// A memory name passed to a memory accessor does not exist.
    #[error("no memory named '{name}'")]
    NoSuchMemory {
        /// The requested name.
        name: String,
    },

    /// A memory address beyond the memory's depth.
    #[error("address {addr} is outside memory '{memory}' of depth {depth}")]
    MemoryRange {
        /// Memory name.
        memory: String,
        /// Offending address.
        addr: u64,
        /// Number of words.
        depth: u32,
    },

    /// The backend stores this memory as constants and cannot write it.
    #[error("memory '{name}' is read-only in this backend")]
    ReadOnlyMemory {
        /// Memory name.
        name: String,
    },

    /// `run_cycles` was asked to drive a clock the design does not have.
    #[error("cannot run cycles: no clock signal named '{name}'")]
    NoClock {
        /// The configured clock name.
        name: String,
    },

    /// The design failed checking (includes combinational loops).
    #[error(transparent)]
    Load(#[from] IrError),

    /// The requested backend cannot run here and fallback was not permitted.
    #[error("backend '{backend}' is unavailable: {reason}")]
    BackendUnavailable {
        /// The backend that was requested.
        backend: BackendKind,
        /// Why it could not be built.
        reason: String,
    },

    /// Native code generation failed.
    #[error("JIT compilation failed: {reason}")]
    Jit {
        /// Description of the code generator failure.
        reason: String,
    },

    /// The ahead-of-time compiler rejected generated code or the library failed to load.
    #[error("compiled backend failed: {reason}")]
    Compile {
        /// Compiler diagnostics or loader message.
        reason: String,
    },

    /// A build cache operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An I/O error while writing generated sources or traces.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SimError {
    /// Shorthand for [`SimError::NoSuchSignal`].
    pub fn no_such_signal(name: &str) -> Self {
        SimError::NoSuchSignal {
            name: name.to_string(),
        }
    }

    /// Shorthand for [`SimError::NoSuchMemory`].
    pub fn no_such_memory(name: &str) -> Self {
        SimError::NoSuchMemory {
            name: name.to_string(),
        }
    }
}
