//! The contract every simulation backend implements.
//!
//! A [`Simulator`] is driven with the two-phase protocol: inputs are poked,
//! `evaluate` settles combinational logic and samples next-state values,
//! and `tick` commits them if a clock rose since it was last seen low.
//! [`run_two_phase`] packages that protocol into cycles.

use std::collections::BTreeMap;

use kestrel_config::{BackendKind, SimulationConfig};

use crate::error::SimError;

/// Options for `run_cycles` and derived-clock handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Clock toggled by `run_cycles`.
    pub clock: String,
    /// Signal that ends a run early when non-zero after a cycle.
    pub halt: Option<String>,
    /// Signals whose rising (0 to non-zero) transitions are counted.
    pub events: Vec<String>,
    /// Upper bound on derived-clock passes within one `tick`.
    pub max_derived_passes: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

impl RunConfig {
    /// Takes the run options from the `[simulation]` table.
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            clock: config.clock.clone(),
            halt: config.halt.clone(),
            events: config.events.clone(),
            max_derived_passes: config.max_derived_passes,
        }
    }

    /// Same options with a different clock.
    pub fn with_clock(mut self, clock: &str) -> Self {
        self.clock = clock.to_string();
        self
    }

    /// Same options with a halt signal.
    pub fn with_halt(mut self, halt: &str) -> Self {
        self.halt = Some(halt.to_string());
        self
    }

    /// Same options counting events on `signal` as well.
    pub fn with_event(mut self, signal: &str) -> Self {
        self.events.push(signal.to_string());
        self
    }
}

/// Outcome of a `run_cycles` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles actually executed.
    pub cycles_run: u64,
    /// Whether the halt signal ended the run.
    pub halted: bool,
    /// Rising transitions per event signal.
    pub events: BTreeMap<String, u64>,
}

/// Host code run inside each cycle while the clock is held low.
///
/// Combinational logic is settled against pre-edge register state when the
/// hook runs, which makes it the place to service memory-mapped I/O.
pub trait CycleHook {
    /// Called once per cycle after the low-phase `evaluate`.
    fn on_clock_low(&mut self, cycle: u64, sim: &mut dyn Simulator) -> Result<(), SimError>;
}

/// A hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHook;

impl CycleHook for NoHook {
    fn on_clock_low(&mut self, _cycle: u64, _sim: &mut dyn Simulator) -> Result<(), SimError> {
        Ok(())
    }
}

impl<F> CycleHook for F
where
    F: FnMut(u64, &mut dyn Simulator) -> Result<(), SimError>,
{
    fn on_clock_low(&mut self, cycle: u64, sim: &mut dyn Simulator) -> Result<(), SimError> {
        self(cycle, sim)
    }
}

/// A cycle-accurate simulation kernel.
pub trait Simulator {
    /// Which backend executes this simulator.
    fn backend(&self) -> BackendKind;

    /// Sets a signal, masking `value` to the signal's width.
    fn poke(&mut self, name: &str, value: u64) -> Result<(), SimError>;

    /// Reads a signal's current value.
    fn peek(&self, name: &str) -> Result<u64, SimError>;

    /// Width of a signal in bits.
    fn signal_width(&self, name: &str) -> Result<u32, SimError>;

    /// Settles combinational logic and samples next-state values.
    ///
    /// Calling it twice with no intervening `poke` or `tick` changes nothing.
    fn evaluate(&mut self);

    /// Commits sampled values for every clock that rose since it was last seen low.
    fn tick(&mut self);

    /// Runs `n` two-phase cycles on the configured clock.
    fn run_cycles(&mut self, n: u64) -> Result<RunSummary, SimError> {
        self.run_cycles_with(n, &mut NoHook)
    }

    /// Runs `n` cycles, calling `hook` in each low phase.
    fn run_cycles_with(
        &mut self,
        n: u64,
        hook: &mut dyn CycleHook,
    ) -> Result<RunSummary, SimError>;

    /// Restores every signal and memory to its initial value.
    fn reset(&mut self);

    /// Names of all signals, in declaration order.
    fn signal_names(&self) -> Vec<String>;

    /// Names of all memories, in declaration order.
    fn memory_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Number of words in a memory.
    fn memory_depth(&self, memory: &str) -> Result<u32, SimError>;

    /// Reads one memory word.
    fn read_memory(&self, memory: &str, addr: u64) -> Result<u64, SimError>;

    /// Writes one memory word, masked to the memory width.
    fn write_memory(&mut self, memory: &str, addr: u64, value: u64) -> Result<(), SimError>;

    /// Reads `len` consecutive words starting at `start`.
    fn read_memory_range(
        &self,
        memory: &str,
        start: u64,
        len: usize,
    ) -> Result<Vec<u64>, SimError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        // The last word is checked first so a window past the end fails before any reads.
        self.read_memory(memory, start.checked_add(len as u64 - 1).unwrap_or(u64::MAX))?;
        (0..len as u64)
            .map(|offset| self.read_memory(memory, start + offset))
            .collect()
    }

    /// Options used by `run_cycles`.
    fn run_config(&self) -> &RunConfig;

    /// Replaces the options used by `run_cycles`.
    fn set_run_config(&mut self, config: RunConfig);
}

/// Runs `n` cycles of the two-phase protocol on `sim`.
///
/// Each cycle drives the clock low and evaluates, calls the hook, drives the
/// clock high, evaluates and ticks. The halt signal is checked after every
/// cycle. Backends implement `run_cycles_with` by calling this.
pub fn run_two_phase<S: Simulator>(
    sim: &mut S,
    n: u64,
    hook: &mut dyn CycleHook,
) -> Result<RunSummary, SimError> {
    let config = sim.run_config().clone();
    let mut summary = RunSummary {
        events: config.events.iter().map(|e| (e.clone(), 0)).collect(),
        ..RunSummary::default()
    };
    if n == 0 {
        return Ok(summary);
    }
    if sim.signal_width(&config.clock).is_err() {
        return Err(SimError::NoClock {
            name: config.clock.clone(),
        });
    }
    if let Some(halt) = &config.halt {
        sim.peek(halt)?;
    }
    let mut previous = config
        .events
        .iter()
        .map(|e| sim.peek(e))
        .collect::<Result<Vec<_>, _>>()?;

    for cycle in 0..n {
        sim.poke(&config.clock, 0)?;
        sim.evaluate();
        hook.on_clock_low(cycle, sim)?;
        sim.poke(&config.clock, 1)?;
        sim.evaluate();
        sim.tick();
        summary.cycles_run += 1;

        for (name, last) in config.events.iter().zip(previous.iter_mut()) {
            let value = sim.peek(name)?;
            if *last == 0 && value != 0 {
                *summary.events.entry(name.clone()).or_insert(0) += 1;
            }
            *last = value;
        }
        if let Some(halt) = &config.halt {
            if sim.peek(halt)? != 0 {
                summary.halted = true;
                tracing::debug!(cycle, signal = %halt, "halt signal asserted");
                break;
            }
        }
    }
    Ok(summary)
}
