//! Primitive components built purely from Kestrel IR.
//!
//! Every constructor returns an unchecked [`kestrel_ir::Module`]; check it
//! with [`kestrel_ir::CheckedModule::new`] or instantiate it inside a larger
//! design. Because each primitive is plain IR, it runs on every simulation
//! backend and lowers to gates for cross-validation.
//!
//! | Primitive | Constructor |
//! |---|---|
//! | Bitwise gates | [`gates`] |
//! | N-way multiplexer | [`mux`] |
//! | Adder/subtractor | [`adder_subtractor`] |
//! | Divider with divide-by-zero flag | [`divider`] |
//! | Loadable counter | [`counter`] |
//! | Timer with selectable divider tap | [`timer`] |
//! | Ripple clock divider | [`ripple_divider`] |
//! | Register file | [`register_file`] |
//! | RAM / dual-port RAM / ROM | [`ram`], [`dual_port_ram`], [`rom`] |
//! | FIFO / stack | [`fifo`], [`stack`] |
//!
//! [`FifoModel`] is a hand-written behavioural FIFO implementing
//! [`kestrel_sim::Simulator`] directly. It has no IR and therefore no
//! gate-level form.

#![warn(missing_docs)]

pub mod arith;
pub mod error;
pub mod logic;
pub mod memory;
pub mod model;
pub mod sequential;

pub use arith::{adder_subtractor, divider};
pub use error::PrimitiveError;
pub use logic::{gates, mux};
pub use memory::{dual_port_ram, fifo, ram, register_file, rom, stack, ReadMode};
pub use model::FifoModel;
pub use sequential::{counter, ripple_divider, timer, TIMER_TAPS};

/// Bits needed to hold values `0..=value`; at least one.
pub(crate) fn bits_for(value: u64) -> u32 {
    (u64::BITS - value.leading_zeros()).max(1)
}

/// Address bits for `depth` words; at least one.
pub(crate) fn addr_width(depth: u32) -> u32 {
    bits_for(u64::from(depth.max(1)) - 1)
}

/// Rejects widths outside `1..=max`.
pub(crate) fn check_width(
    primitive: &'static str,
    width: u32,
    max: u32,
) -> Result<(), PrimitiveError> {
    if width == 0 || width > max {
        return Err(error::invalid(
            primitive,
            format!("width {width} is outside 1..={max}"),
        ));
    }
    Ok(())
}
