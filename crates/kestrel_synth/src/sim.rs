//! Gate-level simulation of a lowered netlist.
//!
//! [`GateSimulator`] follows the same two-phase protocol as the IR kernel:
//! `evaluate` propagates every gate in id order (ids are topological) and
//! samples flip-flop data inputs, `tick` commits the flip-flops of every
//! clock net that rose since it was last seen low. Asynchronous resets are
//! forced during settlement, and clocks driven by flip-flops ripple within
//! one `tick`.
//!
//! Poking a signal writes only the nets it owns. A signal that aliases nets
//! of another signal keeps its forced value in an overlay until the next
//! settle, so the source signal is left untouched.

use std::collections::HashMap;
use std::sync::Arc;

use kestrel_cache::BuildCache;
use kestrel_common::bits;
use kestrel_config::BackendKind;
use kestrel_ir::CheckedModule;
use kestrel_sim::{
    run_two_phase, BackendProvider, CycleHook, RunConfig, RunSummary, SimError, SimOptions,
    Simulator,
};

use crate::error::LowerError;
use crate::lower::{lower, lower_cached, LowerOptions};
use crate::netlist::{Bus, MemoryBits, NetId, Netlist};

/// Upper bound on settle passes spent propagating asynchronous resets.
const MAX_RESET_PASSES: usize = 8;

/// A [`Simulator`] over a gate netlist.
pub struct GateSimulator {
    netlist: Arc<Netlist>,
    values: Vec<bool>,
    /// Sampled `d` per flip-flop.
    samples: Vec<bool>,
    clocks: Vec<NetId>,
    /// Index into `clocks` per flip-flop.
    dff_clock: Vec<usize>,
    low_seen: Vec<bool>,
    /// Forced values of signals that do not own all of their nets.
    forced: Vec<Option<u64>>,
    names: HashMap<String, usize>,
    memory_ids: HashMap<String, usize>,
    run: RunConfig,
}

impl GateSimulator {
    /// Creates a simulator in its initial state with outputs settled.
    pub fn new(netlist: Arc<Netlist>, run: RunConfig) -> Self {
        let clocks = netlist.clocks();
        let dff_clock = netlist
            .dffs
            .iter()
            .map(|dff| clocks.iter().position(|c| *c == dff.clock).unwrap_or(0))
            .collect();
        let names = netlist
            .signals
            .iter()
            .enumerate()
            .map(|(i, bus)| (bus.name.clone(), i))
            .collect();
        let memory_ids = netlist
            .memories
            .iter()
            .enumerate()
            .map(|(i, mem)| (mem.name.clone(), i))
            .collect();
        let mut sim = Self {
            values: Vec::new(),
            samples: vec![false; netlist.dffs.len()],
            low_seen: vec![true; clocks.len()],
            forced: vec![None; netlist.signals.len()],
            clocks,
            dff_clock,
            names,
            memory_ids,
            netlist,
            run,
        };
        sim.reset();
        tracing::debug!(
            module = %sim.netlist.name,
            gates = sim.netlist.gates.len(),
            dffs = sim.netlist.dffs.len(),
            "gate simulator ready"
        );
        sim
    }

    /// Lowers `module` and wraps the netlist.
    pub fn from_module(
        module: &CheckedModule,
        options: &LowerOptions,
        run: RunConfig,
    ) -> Result<Self, LowerError> {
        Ok(Self::new(Arc::new(lower(module, options)?), run))
    }

    /// The netlist being simulated.
    pub fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    /// Current value of one net.
    pub fn net(&self, net: NetId) -> bool {
        self.values[net.index()]
    }

    fn bus(&self, name: &str) -> Result<&Bus, SimError> {
        self.names
            .get(name)
            .map(|&i| &self.netlist.signals[i])
            .ok_or_else(|| SimError::no_such_signal(name))
    }

    fn memory(&self, name: &str) -> Result<&MemoryBits, SimError> {
        self.memory_ids
            .get(name)
            .map(|&i| &self.netlist.memories[i])
            .ok_or_else(|| SimError::no_such_memory(name))
    }

    fn word<'a>(&self, memory: &'a MemoryBits, addr: u64) -> Result<&'a [NetId], SimError> {
        usize::try_from(addr)
            .ok()
            .and_then(|index| memory.words.get(index))
            .map(Vec::as_slice)
            .ok_or_else(|| SimError::MemoryRange {
                memory: memory.name.clone(),
                addr,
                depth: memory.words.len() as u32,
            })
    }

    fn read_nets(&self, nets: &[NetId]) -> u64 {
        nets.iter()
            .enumerate()
            .fold(0, |acc, (i, n)| acc | (u64::from(self.values[n.index()]) << i))
    }

    fn propagate(&mut self) {
        for gate in &self.netlist.gates {
            let a = self.values[gate.inputs[0].index()];
            let b = self.values[gate.inputs[1].index()];
            self.values[gate.output.index()] = gate.kind.apply(a, b);
        }
    }

    fn settle(&mut self) {
        self.forced.iter_mut().for_each(|f| *f = None);
        self.propagate();
        for _ in 0..MAX_RESET_PASSES {
            if !self.apply_async_resets() {
                break;
            }
            self.propagate();
        }
    }

    fn apply_async_resets(&mut self) -> bool {
        let mut changed = false;
        for dff in &self.netlist.dffs {
            if let Some(reset) = dff.reset {
                if self.values[reset.index()] && self.values[dff.q.index()] != dff.init {
                    self.values[dff.q.index()] = dff.init;
                    changed = true;
                }
            }
        }
        changed
    }

    fn sample(&mut self) {
        for (sample, dff) in self.samples.iter_mut().zip(&self.netlist.dffs) {
            *sample = self.values[dff.d.index()];
        }
    }

    fn observe_clocks(&mut self) {
        for (seen, clock) in self.low_seen.iter_mut().zip(&self.clocks) {
            if !self.values[clock.index()] {
                *seen = true;
            }
        }
    }

    fn rising(&self, committed: &[bool]) -> Vec<bool> {
        self.clocks
            .iter()
            .enumerate()
            .map(|(i, clock)| !committed[i] && self.low_seen[i] && self.values[clock.index()])
            .collect()
    }

    fn commit(&mut self, edged: &[bool]) {
        for (i, dff) in self.netlist.dffs.iter().enumerate() {
            if edged[self.dff_clock[i]] {
                self.values[dff.q.index()] = self.samples[i];
            }
        }
    }
}

impl Simulator for GateSimulator {
    fn backend(&self) -> BackendKind {
        BackendKind::GateLevel
    }

    fn poke(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        let index = *self
            .names
            .get(name)
            .ok_or_else(|| SimError::no_such_signal(name))?;
        let bus = &self.netlist.signals[index];
        for (i, net) in bus.nets.iter().enumerate() {
            if bus.owns(i) && !net.is_const() {
                self.values[net.index()] = (value >> i) & 1 == 1;
            }
        }
        self.forced[index] = (!bus.owns_all()).then(|| bits::mask(value, bus.nets.len() as u32));
        for (seen, clock) in self.low_seen.iter_mut().zip(&self.clocks) {
            if !self.values[clock.index()] {
                *seen = true;
            }
        }
        Ok(())
    }

    fn peek(&self, name: &str) -> Result<u64, SimError> {
        let index = *self
            .names
            .get(name)
            .ok_or_else(|| SimError::no_such_signal(name))?;
        Ok(match self.forced[index] {
            Some(value) => value,
            None => self.read_nets(&self.netlist.signals[index].nets),
        })
    }

    fn signal_width(&self, name: &str) -> Result<u32, SimError> {
        Ok(self.bus(name)?.nets.len() as u32)
    }

    fn evaluate(&mut self) {
        self.settle();
        self.sample();
        self.observe_clocks();
    }

    fn tick(&mut self) {
        let mut committed = vec![false; self.clocks.len()];
        let mut edged = self.rising(&committed);
        if !edged.contains(&true) {
            return;
        }
        let mut passes = 0;
        loop {
            self.commit(&edged);
            for (done, hit) in committed.iter_mut().zip(&edged) {
                *done |= *hit;
            }
            self.settle();
            edged = self.rising(&committed);
            if !edged.contains(&true) {
                break;
            }
            if passes == self.run.max_derived_passes {
                tracing::warn!(
                    module = %self.netlist.name,
                    passes,
                    "derived clock pass limit reached; remaining edges dropped"
                );
                break;
            }
            passes += 1;
            self.sample();
        }
        for (seen, clock) in self.low_seen.iter_mut().zip(&self.clocks) {
            *seen = !self.values[clock.index()];
        }
        self.evaluate();
    }

    fn run_cycles_with(
        &mut self,
        n: u64,
        hook: &mut dyn CycleHook,
    ) -> Result<RunSummary, SimError> {
        run_two_phase(self, n, hook)
    }

    fn reset(&mut self) {
        self.values = vec![false; self.netlist.net_count as usize];
        self.values[NetId::ONE.index()] = true;
        for dff in &self.netlist.dffs {
            self.values[dff.q.index()] = dff.init;
        }
        self.samples.iter_mut().for_each(|s| *s = false);
        for (seen, clock) in self.low_seen.iter_mut().zip(&self.clocks) {
            *seen = !self.values[clock.index()];
        }
        self.evaluate();
    }

    fn signal_names(&self) -> Vec<String> {
        self.netlist.signals.iter().map(|b| b.name.clone()).collect()
    }

    fn memory_names(&self) -> Vec<String> {
        self.netlist.memories.iter().map(|m| m.name.clone()).collect()
    }

    fn memory_depth(&self, memory: &str) -> Result<u32, SimError> {
        Ok(self.memory(memory)?.words.len() as u32)
    }

    fn read_memory(&self, memory: &str, addr: u64) -> Result<u64, SimError> {
        let memory = self.memory(memory)?;
        Ok(self.read_nets(self.word(memory, addr)?))
    }

    fn write_memory(&mut self, memory: &str, addr: u64, value: u64) -> Result<(), SimError> {
        let netlist = self.netlist.clone();
        let index = *self
            .memory_ids
            .get(memory)
            .ok_or_else(|| SimError::no_such_memory(memory))?;
        let bits = &netlist.memories[index];
        let word = self.word(bits, addr)?;
        if word.iter().any(|n| n.is_const()) {
            return Err(SimError::ReadOnlyMemory {
                name: bits.name.clone(),
            });
        }
        for (i, net) in word.iter().enumerate() {
            self.values[net.index()] = (value >> i) & 1 == 1;
        }
        Ok(())
    }

    fn run_config(&self) -> &RunConfig {
        &self.run
    }

    fn set_run_config(&mut self, config: RunConfig) {
        self.run = config;
    }
}

/// Registers the gate-level backend with a [`kestrel_sim::SimBuilder`].
///
/// Modules that cannot be lowered are reported as an unavailable backend,
/// so the builder's fallback policy applies to them.
pub struct GateLevelProvider {
    options: LowerOptions,
    cache: Option<Arc<BuildCache>>,
}

impl GateLevelProvider {
    /// A provider lowering with `options` and no cache.
    pub fn new(options: LowerOptions) -> Self {
        Self {
            options,
            cache: None,
        }
    }

    /// Reuses netlists stored in `cache`.
    pub fn with_cache(mut self, cache: Arc<BuildCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

impl BackendProvider for GateLevelProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::GateLevel
    }

    fn build(
        &self,
        module: &Arc<CheckedModule>,
        options: &SimOptions,
    ) -> Result<Box<dyn Simulator>, SimError> {
        let lowered = match &self.cache {
            Some(cache) => lower_cached(module, &self.options, cache),
            None => lower(module, &self.options),
        };
        let netlist = lowered.map_err(|err| match err {
            LowerError::Load(err) => SimError::Load(err),
            LowerError::Cache(err) => SimError::Cache(err),
            other => SimError::BackendUnavailable {
                backend: BackendKind::GateLevel,
                reason: other.to_string(),
            },
        })?;
        Ok(Box::new(GateSimulator::new(
            Arc::new(netlist),
            options.run.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ir::{Expr, ModuleBuilder, ReadDuringWrite, Register};
    use kestrel_sim::SimBuilder;

    fn gate_sim(m: ModuleBuilder) -> GateSimulator {
        let checked = CheckedModule::new(&m.finish()).unwrap();
        GateSimulator::from_module(&checked, &LowerOptions::default(), RunConfig::default())
            .unwrap()
    }

    fn counter() -> ModuleBuilder {
        let mut m = ModuleBuilder::new("counter");
        let clk = m.input("clk", 1);
        let en = m.input("en", 1);
        let q = m.output("q", 4);
        m.register(
            Register::new(q, clk, Expr::sig(q).add(Expr::lit(1, 4))).with_enable(Expr::sig(en)),
        );
        m
    }

    #[test]
    fn counter_counts_and_wraps() {
        let mut sim = gate_sim(counter());
        sim.poke("en", 1).unwrap();
        let summary = sim.run_cycles(18).unwrap();
        assert_eq!(summary.cycles_run, 18);
        assert_eq!(sim.peek("q").unwrap(), 2);
        assert_eq!(sim.backend(), BackendKind::GateLevel);
    }

    #[test]
    fn tick_without_edge_changes_nothing() {
        let mut sim = gate_sim(counter());
        sim.poke("en", 1).unwrap();
        sim.poke("clk", 1).unwrap();
        sim.evaluate();
        sim.tick();
        assert_eq!(sim.peek("q").unwrap(), 1);
        sim.evaluate();
        sim.tick();
        assert_eq!(sim.peek("q").unwrap(), 1);
    }

    #[test]
    fn reset_restores_start_up_state() {
        let mut sim = gate_sim(counter());
        sim.poke("en", 1).unwrap();
        sim.run_cycles(5).unwrap();
        sim.reset();
        assert_eq!(sim.peek("q").unwrap(), 0);
        assert_eq!(sim.peek("en").unwrap(), 0);
    }

    #[test]
    fn async_reset_forces_without_a_clock() {
        let mut m = ModuleBuilder::new("r");
        let clk = m.input("clk", 1);
        let rst = m.input("rst", 1);
        let q = m.output("q", 4);
        m.register(
            Register::new(q, clk, Expr::sig(q).add(Expr::lit(1, 4))).with_async_reset(rst, 9),
        );
        let mut sim = gate_sim(m);
        sim.run_cycles(3).unwrap();
        assert_eq!(sim.peek("q").unwrap(), 12);
        sim.poke("rst", 1).unwrap();
        sim.evaluate();
        assert_eq!(sim.peek("q").unwrap(), 9);
    }

    fn ram(policy: ReadDuringWrite) -> ModuleBuilder {
        let mut m = ModuleBuilder::new("ram");
        let clk = m.input("clk", 1);
        let we = m.input("we", 1);
        let addr = m.input("addr", 3);
        let din = m.input("din", 8);
        let dout = m.output("dout", 8);
        let mem = m.memory("mem", 6, 8);
        m.memory_init(mem, (10..16).collect());
        m.write_port(mem, clk, Expr::sig(addr), Expr::sig(din), Expr::sig(we));
        m.sync_read(mem, clk, Expr::sig(addr), dout, None, policy);
        m
    }

    #[test]
    fn write_first_and_read_first() {
        for (policy, expected) in [
            (ReadDuringWrite::WriteFirst, 0x55),
            (ReadDuringWrite::ReadFirst, 12),
        ] {
            let mut sim = gate_sim(ram(policy));
            sim.poke("we", 1).unwrap();
            sim.poke("addr", 2).unwrap();
            sim.poke("din", 0x55).unwrap();
            sim.run_cycles(1).unwrap();
            assert_eq!(sim.peek("dout").unwrap(), expected);
            assert_eq!(sim.read_memory("mem", 2).unwrap(), 0x55);
        }
    }

    #[test]
    fn out_of_range_write_is_dropped() {
        let mut sim = gate_sim(ram(ReadDuringWrite::WriteFirst));
        sim.poke("we", 1).unwrap();
        sim.poke("addr", 7).unwrap();
        sim.poke("din", 0xEE).unwrap();
        sim.run_cycles(1).unwrap();
        assert_eq!(sim.peek("dout").unwrap(), 0);
        let words = sim.read_memory_range("mem", 0, 6).unwrap();
        assert_eq!(words, vec![10, 11, 12, 13, 14, 15]);
        assert!(matches!(
            sim.read_memory("mem", 6),
            Err(SimError::MemoryRange { depth: 6, .. })
        ));
    }

    #[test]
    fn huge_memory_window_is_out_of_range() {
        let sim = gate_sim(ram(ReadDuringWrite::WriteFirst));
        assert!(matches!(
            sim.read_memory_range("mem", 3, usize::MAX),
            Err(SimError::MemoryRange { addr: u64::MAX, .. })
        ));
        assert!(matches!(
            sim.read_memory_range("mem", u64::MAX, 2),
            Err(SimError::MemoryRange { addr: u64::MAX, .. })
        ));
        assert_eq!(sim.read_memory_range("mem", 6, 0).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn host_writes_reach_ram_but_not_rom() {
        let mut sim = gate_sim(ram(ReadDuringWrite::WriteFirst));
        sim.write_memory("mem", 4, 0x1FF).unwrap();
        assert_eq!(sim.read_memory("mem", 4).unwrap(), 0xFF);

        let mut m = ModuleBuilder::new("rom");
        let addr = m.input("addr", 2);
        let dout = m.output("dout", 8);
        let mem = m.memory("font", 4, 8);
        m.memory_init(mem, vec![1, 2, 3, 4]);
        m.async_read(mem, Expr::sig(addr), dout);
        let mut rom = gate_sim(m);
        rom.poke("addr", 3).unwrap();
        rom.evaluate();
        assert_eq!(rom.peek("dout").unwrap(), 4);
        assert!(matches!(
            rom.write_memory("font", 0, 9),
            Err(SimError::ReadOnlyMemory { .. })
        ));
    }

    #[test]
    fn unknown_names_are_errors() {
        let mut sim = gate_sim(counter());
        assert!(matches!(sim.poke("nope", 1), Err(SimError::NoSuchSignal { .. })));
        assert!(matches!(sim.peek("nope"), Err(SimError::NoSuchSignal { .. })));
        assert!(matches!(sim.read_memory("nope", 0), Err(SimError::NoSuchMemory { .. })));
    }

    #[test]
    fn provider_builds_gate_level_simulators() {
        let checked = Arc::new(CheckedModule::new(&counter().finish()).unwrap());
        let built = SimBuilder::new(SimOptions::new(BackendKind::GateLevel))
            .with_provider(Box::new(GateLevelProvider::new(LowerOptions::default())))
            .build(checked)
            .unwrap();
        assert_eq!(built.used, BackendKind::GateLevel);
        assert_eq!(built.simulator.backend(), BackendKind::GateLevel);
    }

    #[test]
    fn unsynthesizable_module_falls_back_visibly() {
        let checked = Arc::new(CheckedModule::new(&ram(ReadDuringWrite::WriteFirst).finish()).unwrap());
        let provider = GateLevelProvider::new(LowerOptions { max_memory_bits: 8 });
        let built = SimBuilder::new(SimOptions::new(BackendKind::GateLevel))
            .with_provider(Box::new(provider))
            .build(checked)
            .unwrap();
        assert_eq!(built.used, BackendKind::Interpreter);
        assert!(built.fallback.unwrap().contains("not synthesizable"));
    }
}
