//! Recording and replaying test vectors.
//!
//! Every cycle follows the same order: poke the cycle's inputs, drive the
//! clock low and evaluate, record outputs, drive the clock high, evaluate
//! and tick. Outputs therefore show the state before the cycle's edge
//! combined with the cycle's inputs. A subject without the clock input is
//! evaluated once per cycle and never ticked.

use std::collections::BTreeMap;

use kestrel_ir::{CheckedModule, SignalKind};
use kestrel_sim::Simulator;

use crate::compare::{compare_cycle, Mismatch};
use crate::error::VerifyError;
use crate::stimulus::Stimulus;

/// Inputs applied in one cycle and the outputs the reference produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVector {
    /// Zero-based cycle index.
    pub cycle: usize,
    /// Driven inputs.
    pub inputs: BTreeMap<String, u64>,
    /// Recorded outputs.
    pub outputs: BTreeMap<String, u64>,
}

/// Output names of `module`, in declaration order.
pub fn output_names(module: &CheckedModule) -> Vec<String> {
    module
        .signals_of_kind(SignalKind::Output)
        .into_iter()
        .map(|id| module.signals[id].name.clone())
        .collect()
}

/// Runs one cycle, calling `observe` while the clock is low.
fn step<'a, T>(
    sim: &mut dyn Simulator,
    inputs: impl IntoIterator<Item = (&'a str, u64)>,
    clock: Option<&str>,
    observe: impl FnOnce(&dyn Simulator) -> Result<T, VerifyError>,
) -> Result<T, VerifyError> {
    for (name, value) in inputs {
        sim.poke(name, value)?;
    }
    if let Some(clock) = clock {
        sim.poke(clock, 0)?;
    }
    sim.evaluate();
    let seen = observe(sim)?;
    if let Some(clock) = clock {
        sim.poke(clock, 1)?;
        sim.evaluate();
        sim.tick();
    }
    Ok(seen)
}

fn clock_of<'a>(sim: &dyn Simulator, clock: &'a str) -> Option<&'a str> {
    sim.signal_width(clock).ok().map(|_| clock)
}

/// Drives `stimulus` through `sim` and records `observed` each cycle.
pub fn record(
    sim: &mut dyn Simulator,
    stimulus: &Stimulus,
    clock: &str,
    observed: &[String],
) -> Result<Vec<TestVector>, VerifyError> {
    let clock = clock_of(sim, clock);
    let mut vectors = Vec::with_capacity(stimulus.len());
    for cycle in 0..stimulus.len() {
        let outputs = step(sim, stimulus.cycle(cycle), clock, |sim| {
            observed
                .iter()
                .map(|name| -> Result<(String, u64), VerifyError> {
                    Ok((name.clone(), sim.peek(name)?))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
        })?;
        vectors.push(TestVector {
            cycle,
            inputs: stimulus.inputs_at(cycle),
            outputs,
        });
    }
    tracing::debug!(cycles = vectors.len(), signals = observed.len(), "vectors recorded");
    Ok(vectors)
}

/// Replays `vectors` through `sim`, stopping at the first output that differs.
pub fn replay(
    sim: &mut dyn Simulator,
    vectors: &[TestVector],
    clock: &str,
) -> Result<Option<Mismatch>, VerifyError> {
    let clock = clock_of(sim, clock);
    for vector in vectors {
        let inputs = vector.inputs.iter().map(|(n, v)| (n.as_str(), *v));
        let found = step(sim, inputs, clock, |sim| {
            compare_cycle(vector, |name| Ok(sim.peek(name)?))
        })?;
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stimulus::{input_ports, InputPort};
    use kestrel_ir::{Expr, ModuleBuilder, Register};
    use kestrel_sim::{interpreter, RunConfig};
    use std::sync::Arc;

    fn accumulator() -> Arc<CheckedModule> {
        let mut m = ModuleBuilder::new("acc");
        let clk = m.input("clk", 1);
        let d = m.input("d", 8);
        let q = m.output("q", 8);
        m.register(Register::new(q, clk, Expr::sig(q).add(Expr::sig(d))));
        Arc::new(CheckedModule::new(&m.finish()).unwrap())
    }

    #[test]
    fn outputs_are_recorded_before_the_edge() {
        let module = accumulator();
        let mut stimulus = Stimulus::new(input_ports(&module, "clk"));
        for d in [5, 6, 7] {
            stimulus.push(&[("d", d)]).unwrap();
        }
        let mut sim = interpreter(module.clone(), RunConfig::default());
        let vectors = record(&mut sim, &stimulus, "clk", &output_names(&module)).unwrap();
        let qs: Vec<u64> = vectors.iter().map(|v| v.outputs["q"]).collect();
        assert_eq!(qs, vec![0, 5, 11]);
        assert_eq!(sim.peek("q").unwrap(), 18);
        assert_eq!(vectors[2].inputs["d"], 7);
    }

    #[test]
    fn replay_finds_divergence() {
        let module = accumulator();
        let mut stimulus = Stimulus::new(vec![InputPort::new("d", 8)]);
        for d in [1, 2, 3, 4] {
            stimulus.push(&[("d", d)]).unwrap();
        }
        let mut reference = interpreter(module.clone(), RunConfig::default());
        let mut vectors = record(&mut reference, &stimulus, "clk", &["q".to_string()]).unwrap();

        let mut same = interpreter(module.clone(), RunConfig::default());
        assert_eq!(replay(&mut same, &vectors, "clk").unwrap(), None);

        vectors[3].outputs.insert("q".to_string(), 99);
        let mut again = interpreter(module, RunConfig::default());
        let mismatch = replay(&mut again, &vectors, "clk").unwrap().unwrap();
        assert_eq!(mismatch.cycle, 3);
        assert_eq!((mismatch.expected, mismatch.actual), (99, 6));
    }

    #[test]
    fn combinational_subjects_need_no_clock() {
        let mut m = ModuleBuilder::new("inv");
        let a = m.input("a", 4);
        let y = m.output("y", 4);
        m.assign(y, Expr::sig(a).not());
        let module = Arc::new(CheckedModule::new(&m.finish()).unwrap());
        let mut stimulus = Stimulus::new(input_ports(&module, "clk"));
        stimulus.push(&[("a", 3)]).unwrap();
        let mut sim = interpreter(module.clone(), RunConfig::default());
        let vectors = record(&mut sim, &stimulus, "clk", &output_names(&module)).unwrap();
        assert_eq!(vectors[0].outputs["y"], 12);
    }

    #[test]
    fn unknown_observed_signal_is_an_error() {
        let module = accumulator();
        let mut stimulus = Stimulus::new(input_ports(&module, "clk"));
        stimulus.push(&[]).unwrap();
        let mut sim = interpreter(module, RunConfig::default());
        let err = record(&mut sim, &stimulus, "clk", &["nope".to_string()]).unwrap_err();
        assert!(matches!(err, VerifyError::Sim(_)));
    }
}
