//! Output comparison.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::VerifyError;
use crate::vectors::TestVector;

/// The first point where a subject disagreed with the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Zero-based cycle index.
    pub cycle: usize,
    /// Signal that differed.
    pub signal: String,
    /// Reference value.
    pub expected: u64,
    /// Value the subject produced.
    pub actual: u64,
    /// Every driven input in that cycle.
    pub inputs: BTreeMap<String, u64>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: '{}' expected {:#x}, got {:#x}",
            self.cycle, self.signal, self.expected, self.actual
        )?;
        if !self.inputs.is_empty() {
            write!(f, " with inputs ")?;
            for (i, (name, value)) in self.inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{name}={value:#x}")?;
            }
        }
        Ok(())
    }
}

/// Compares one cycle's recorded outputs with values from `actual`.
///
/// Signals are checked in name order, so the reported signal is the first
/// mismatching one alphabetically.
pub fn compare_cycle(
    vector: &TestVector,
    mut actual: impl FnMut(&str) -> Result<u64, VerifyError>,
) -> Result<Option<Mismatch>, VerifyError> {
    for (signal, &expected) in &vector.outputs {
        let value = actual(signal)?;
        if value != expected {
            return Ok(Some(Mismatch {
                cycle: vector.cycle,
                signal: signal.clone(),
                expected,
                actual: value,
                inputs: vector.inputs.clone(),
            }));
        }
    }
    Ok(None)
}

/// The first mismatch between recorded vectors and per-cycle observations.
///
/// # Errors
///
/// Returns [`VerifyError::Parse`] if `actual` is missing a cycle or a signal.
pub fn first_mismatch(
    expected: &[TestVector],
    actual: &[BTreeMap<String, u64>],
) -> Result<Option<Mismatch>, VerifyError> {
    if actual.len() < expected.len() {
        return Err(VerifyError::parse(
            0,
            format!("expected {} cycles, got {}", expected.len(), actual.len()),
        ));
    }
    for (vector, observed) in expected.iter().zip(actual) {
        let found = compare_cycle(vector, |signal| {
            observed.get(signal).copied().ok_or_else(|| {
                VerifyError::parse(
                    0,
                    format!("no value for '{signal}' in cycle {}", vector.cycle),
                )
            })
        })?;
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}
