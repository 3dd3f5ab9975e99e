//! Foundational types shared by every Kestrel crate.
//!
//! [`bits`] is the two-state value model used by all simulation backends and
//! by structural lowering; [`ContentHash`] keys the build cache.

#![warn(missing_docs)]

pub mod bits;
pub mod hash;

pub use bits::{Bits, ValueError, MAX_WIDTH};
pub use hash::ContentHash;
