//! Cycle-accurate simulation of checked Kestrel modules.
//!
//! Every backend implements the [`Simulator`] contract: `poke`/`peek` by
//! signal name, `evaluate` to settle combinational logic and sample
//! next-state values, `tick` to commit them on a detected rising edge, and
//! `run_cycles` to repeat the two-phase protocol.
//!
//! # Architecture
//!
//! A single [`Kernel`] holds signal and memory state and implements edge
//! detection, commits and memory conflict rules. Backends plug in as
//! [`Evaluator`]s that only settle and sample:
//!
//! - [`Interpreter`] walks the typed expression trees.
//! - `JitEvaluator` (feature `jit`) generates native code with Cranelift.
//! - [`CompiledEvaluator`] compiles generated Rust with `rustc` and loads it,
//!   caching the library in a [`kestrel_cache::BuildCache`].
//!
//! [`SimBuilder`] picks a backend and reports any fallback explicitly.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use kestrel_ir::{CheckedModule, Expr, ModuleBuilder, Register};
//! use kestrel_sim::{interpreter, RunConfig, Simulator};
//!
//! let mut b = ModuleBuilder::new("counter");
//! let clk = b.input("clk", 1);
//! let q = b.output("q", 8);
//! b.register(Register::new(q, clk, Expr::sig(q).add(Expr::lit(1, 8))));
//! let module = Arc::new(CheckedModule::new(&b.finish()).unwrap());
//!
//! let mut sim = interpreter(module, RunConfig::default());
//! let summary = sim.run_cycles(10).unwrap();
//! assert_eq!(summary.cycles_run, 10);
//! assert_eq!(sim.peek("q").unwrap(), 10);
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod compiled;
pub mod error;
pub mod interpreter;
#[cfg(feature = "jit")]
pub mod jit;
pub mod kernel;
pub mod mirror;
pub mod plan;
pub mod simulator;
pub mod waveform;

pub use backend::{
    compiled, interpreter, jit, BackendProvider, BuiltSimulator, SimBuilder, SimOptions,
};
pub use compiled::{CompileOptions, CompiledEvaluator, GENERATOR_VERSION};
pub use error::SimError;
pub use interpreter::Interpreter;
#[cfg(feature = "jit")]
pub use jit::JitEvaluator;
pub use kernel::{Evaluator, Kernel};
pub use kestrel_config::BackendKind;
pub use mirror::MemoryMirror;
pub use plan::SimPlan;
pub use simulator::{run_two_phase, CycleHook, NoHook, RunConfig, RunSummary, Simulator};
pub use waveform::VcdTracer;
