//! Cross-validation of simulation backends against each other, against the
//! gate-level netlist, and against an external Verilog simulator.
//!
//! A [`Subject`] is either checked IR or a hand-written [`kestrel_sim::Simulator`].
//! The [`Harness`] drives each subject with a seeded [`Stimulus`], records
//! [`TestVector`]s on the interpreter and replays them elsewhere. Every
//! comparison ends in a [`Coverage`] verdict; the first difference is a
//! [`Mismatch`] naming the cycle, signal, both values and the inputs.
//!
//! Backends and tools that are missing are reported as
//! [`Coverage::Unavailable`], never as passes, and nothing falls back to the
//! interpreter behind the caller's back.

#![warn(missing_docs)]

pub mod compare;
pub mod error;
pub mod external;
pub mod harness;
pub mod report;
pub mod stimulus;
pub mod subject;
pub mod testbench;
pub mod vectors;

pub use compare::{compare_cycle, first_mismatch, Mismatch};
pub use error::VerifyError;
pub use external::{parse_output, ExternalRun, ExternalSimulator};
pub use harness::{Harness, HarnessOptions};
pub use report::{BackendCheck, Coverage, ModuleReport, ValidationSummary};
pub use stimulus::{input_ports, InputPort, ResetPulse, Stimulus, StimulusOptions};
pub use subject::{ModelFactory, Subject, SubjectKind};
pub use testbench::RESULT_MARKER;
pub use vectors::{output_names, record, replay, TestVector};
