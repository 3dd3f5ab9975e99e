//! Intermediate representation of clocked digital circuits.
//!
//! A [`Design`] is a set of [`Module`]s connected through instances. Each
//! module holds signals, combinational assigns over [`Expr`] trees,
//! [`Register`]s and [`Memory`] blocks. Before anything executes, a design is
//! flattened and checked into a [`CheckedModule`]: every expression is typed,
//! combinational logic is put in dependency order, and loops are rejected.
//!
//! The [`interchange`] module reads and writes the versioned JSON form that
//! front ends use to hand designs over.

#![warn(missing_docs)]

pub mod arena;
pub mod builder;
pub mod check;
pub mod design;
pub mod error;
pub mod expr;
pub mod flatten;
pub mod ids;
pub mod interchange;
pub mod module;
pub mod signal;

mod validate;

pub use arena::{Arena, ArenaId};
pub use builder::{DesignBuilder, ModuleBuilder};
pub use check::{
    check_design, CheckedModule, CheckedRegister, CheckedSyncRead, CheckedWrite, CombStep,
    MemoryInfo, Node, TypedExpr,
};
pub use design::Design;
pub use error::IrError;
pub use expr::{BinaryOp, CaseArm, Expr, UnaryOp};
pub use flatten::flatten;
pub use ids::{MemoryId, ModuleId, SignalId};
pub use interchange::{IrDocument, FORMAT_VERSION};
pub use module::{
    Assign, Binding, Instance, Memory, MemoryPort, Module, ReadDuringWrite, Register, Reset,
    ResetKind,
};
pub use signal::{Signal, SignalKind};
