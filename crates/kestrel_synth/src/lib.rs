//! Structural lowering of Kestrel modules to gates.
//!
//! A checked module lowers to a [`Netlist`] of two-input `and`/`or`/`xor`
//! gates, inverters and D flip-flops. The netlist can be exported as
//! structural Verilog with [`to_verilog`] or simulated in process with
//! [`GateSimulator`], which implements the same [`kestrel_sim::Simulator`]
//! contract as the IR backends.
//!
//! Lowering is deterministic: the same module always produces the same gate
//! ids, so exported Verilog and cached netlists are stable.
//!
//! ```
//! use kestrel_ir::{CheckedModule, Expr, ModuleBuilder};
//! use kestrel_synth::{lower, to_verilog, LowerOptions};
//!
//! let mut b = ModuleBuilder::new("sel");
//! let c = b.input("c", 1);
//! let x = b.input("x", 1);
//! let y = b.input("y", 1);
//! let out = b.output("out", 1);
//! b.assign(out, Expr::mux(Expr::sig(c), Expr::sig(y), Expr::sig(x)));
//! let module = CheckedModule::new(&b.finish()).unwrap();
//!
//! let netlist = lower(&module, &LowerOptions::default()).unwrap();
//! assert_eq!(netlist.stats().gates(), 4);
//! assert!(to_verilog(&netlist).contains("module sel("));
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod lower;
pub mod lower_expr;
pub mod netlist;
pub mod sim;
pub mod verilog;

pub use error::LowerError;
pub use lower::{lower, lower_cached, lower_design, LowerOptions, LOWERING_VERSION};
pub use netlist::{Bus, Dff, Gate, GateKind, MemoryBits, NetId, Netlist, NetlistBuilder, NetlistStats};
pub use sim::{GateLevelProvider, GateSimulator};
pub use verilog::{to_verilog, verilog_ident, Verilog};
