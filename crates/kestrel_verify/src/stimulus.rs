//! Per-cycle input values.
//!
//! A [`Stimulus`] is a table with one column per input port and one row per
//! cycle. Rows are filled by hand with [`Stimulus::push`] or generated from
//! a seed with [`Stimulus::random`]; the same seed always yields the same
//! table.

use std::collections::BTreeMap;

use kestrel_ir::{CheckedModule, SignalKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::VerifyError;

/// An input driven by the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPort {
    /// Signal name.
    pub name: String,
    /// Width in bits.
    pub width: u32,
}

impl InputPort {
    /// An input of `width` bits.
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }

    fn mask(&self, value: u64) -> u64 {
        if self.width >= 64 {
            value
        } else {
            value & ((1u64 << self.width) - 1)
        }
    }
}

/// Inputs of `module` other than `clock`, in declaration order.
pub fn input_ports(module: &CheckedModule, clock: &str) -> Vec<InputPort> {
    module
        .signals_of_kind(SignalKind::Input)
        .into_iter()
        .map(|id| &module.signals[id])
        .filter(|sig| sig.name != clock)
        .map(|sig| InputPort::new(sig.name.clone(), sig.width))
        .collect()
}

/// A reset input asserted at the start of a run and, optionally, at random.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetPulse {
    /// The reset input (active high).
    pub signal: String,
    /// Cycles it is held at the start.
    pub initial_cycles: u32,
    /// Chance of a one-cycle pulse in any later cycle.
    pub probability: f64,
}

impl ResetPulse {
    /// Reset held for `initial_cycles` at the start and never again.
    pub fn at_start(signal: impl Into<String>, initial_cycles: u32) -> Self {
        Self {
            signal: signal.into(),
            initial_cycles,
            probability: 0.0,
        }
    }

    /// Same pulse, also asserted at random with `probability` per cycle.
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability.clamp(0.0, 1.0);
        self
    }
}

/// Options for [`Stimulus::random`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StimulusOptions {
    /// Inputs held at a fixed value instead of randomised.
    pub held: BTreeMap<String, u64>,
    /// Reset behaviour; without one, a reset input is just another random input.
    pub reset: Option<ResetPulse>,
}

/// Input values for a run, one row per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stimulus {
    ports: Vec<InputPort>,
    rows: Vec<Vec<u64>>,
}

impl Stimulus {
    /// An empty stimulus over `ports`.
    pub fn new(ports: Vec<InputPort>) -> Self {
        Self {
            ports,
            rows: Vec::new(),
        }
    }

    /// `cycles` rows of seeded random values.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::UnknownInput`] if `options` holds or resets an
    /// input that is not in `ports`.
    pub fn random(
        ports: Vec<InputPort>,
        cycles: usize,
        seed: u64,
        options: &StimulusOptions,
    ) -> Result<Self, VerifyError> {
        let mut stimulus = Self::new(ports);
        let named = options
            .held
            .keys()
            .chain(options.reset.iter().map(|r| &r.signal));
        for name in named {
            stimulus.index(name)?;
        }

        let mut rng = StdRng::seed_from_u64(seed);
        for cycle in 0..cycles {
            let row = stimulus
                .ports
                .iter()
                .map(|port| {
                    if let Some(value) = options.held.get(&port.name) {
                        return port.mask(*value);
                    }
                    match &options.reset {
                        Some(reset) if reset.signal == port.name => {
                            let asserted = cycle < reset.initial_cycles as usize
                                || rng.gen_bool(reset.probability);
                            u64::from(asserted)
                        }
                        _ => port.mask(rng.gen()),
                    }
                })
                .collect();
            stimulus.rows.push(row);
        }
        Ok(stimulus)
    }

    /// Appends a row; inputs not named keep their value from the previous row.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::UnknownInput`] for a name not in the port list.
    pub fn push(&mut self, values: &[(&str, u64)]) -> Result<(), VerifyError> {
        let mut row = self
            .rows
            .last()
            .cloned()
            .unwrap_or_else(|| vec![0; self.ports.len()]);
        for (name, value) in values {
            let index = self.index(name)?;
            row[index] = self.ports[index].mask(*value);
        }
        self.rows.push(row);
        Ok(())
    }

    fn index(&self, name: &str) -> Result<usize, VerifyError> {
        self.ports
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| VerifyError::UnknownInput {
                name: name.to_string(),
            })
    }

    /// The driven inputs.
    pub fn ports(&self) -> &[InputPort] {
        &self.ports
    }

    /// Number of cycles.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no cycles.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `(name, value)` pairs for one cycle.
    pub fn cycle(&self, cycle: usize) -> impl Iterator<Item = (&str, u64)> + '_ {
        let row = self.rows.get(cycle).map(Vec::as_slice).unwrap_or(&[]);
        self.ports
            .iter()
            .zip(row)
            .map(|(port, value)| (port.name.as_str(), *value))
    }

    /// One cycle's inputs as a map.
    pub fn inputs_at(&self, cycle: usize) -> BTreeMap<String, u64> {
        self.cycle(cycle)
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}
