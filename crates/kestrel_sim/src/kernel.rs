//! The two-phase kernel shared by every compiled-IR backend.
//!
//! Backends differ only in how they run combinational settlement and
//! next-state sampling; everything stateful lives here. That includes edge
//! detection, commits, memory conflict rules, async resets, and derived
//! clocks.

use std::collections::HashMap;
use std::sync::Arc;

use kestrel_common::bits;
use kestrel_config::BackendKind;
use kestrel_ir::{CheckedModule, MemoryId, SignalId};

use crate::error::SimError;
use crate::interpreter::read_word;
use crate::plan::SimPlan;
use crate::simulator::{run_two_phase, CycleHook, RunConfig, RunSummary, Simulator};

/// Upper bound on settle passes spent propagating asynchronous resets.
const MAX_RESET_PASSES: usize = 8;

/// Combinational evaluation strategy plugged into a [`Kernel`].
pub trait Evaluator {
    /// Backend identity reported by the kernel.
    fn kind(&self) -> BackendKind;

    /// Runs every combinational step in schedule order, writing `signals`.
    fn settle(&mut self, signals: &mut [u64], memories: &[Vec<u64>]);

    /// Evaluates every plan slot into `samples`.
    fn sample(&mut self, signals: &[u64], memories: &[Vec<u64>], samples: &mut [u64]);
}

#[inline]
fn idx(id: SignalId) -> usize {
    id.as_raw() as usize
}

/// State plus an [`Evaluator`]: a complete [`Simulator`].
pub struct Kernel<E> {
    module: Arc<CheckedModule>,
    plan: SimPlan,
    evaluator: E,
    signals: Vec<u64>,
    memories: Vec<Vec<u64>>,
    samples: Vec<u64>,
    /// Per clock in `plan.clocks`: observed low since its last edge.
    low_seen: Vec<bool>,
    names: HashMap<String, SignalId>,
    memory_ids: HashMap<String, MemoryId>,
    run: RunConfig,
}

impl<E: Evaluator> Kernel<E> {
    /// Creates a kernel in its initial state with outputs settled.
    pub fn new(module: Arc<CheckedModule>, plan: SimPlan, evaluator: E, run: RunConfig) -> Self {
        let names = module
            .signals
            .iter()
            .map(|(id, s)| (s.name.clone(), id))
            .collect();
        let memory_ids = module
            .memories
            .iter()
            .map(|(id, m)| (m.name.clone(), id))
            .collect();
        let mut kernel = Self {
            samples: vec![0; plan.slots.len()],
            low_seen: vec![true; plan.clocks.len()],
            module,
            plan,
            evaluator,
            signals: Vec::new(),
            memories: Vec::new(),
            names,
            memory_ids,
            run,
        };
        kernel.reset();
        tracing::debug!(
            module = %kernel.module.name,
            backend = %kernel.evaluator.kind(),
            signals = kernel.signals.len(),
            "kernel ready"
        );
        kernel
    }

    /// The module being simulated.
    pub fn module(&self) -> &CheckedModule {
        &self.module
    }

    /// The sequential plan.
    pub fn plan(&self) -> &SimPlan {
        &self.plan
    }

    /// Current value of every signal, indexed by signal id.
    pub fn signals(&self) -> &[u64] {
        &self.signals
    }

    fn signal_id(&self, name: &str) -> Result<SignalId, SimError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::no_such_signal(name))
    }

    fn memory_id(&self, name: &str) -> Result<MemoryId, SimError> {
        self.memory_ids
            .get(name)
            .copied()
            .ok_or_else(|| SimError::no_such_memory(name))
    }

    fn check_addr(&self, memory: MemoryId, addr: u64) -> Result<usize, SimError> {
        let info = &self.module.memories[memory];
        match usize::try_from(addr) {
            Ok(index) if addr < u64::from(info.depth) => Ok(index),
            _ => Err(SimError::MemoryRange {
                memory: info.name.clone(),
                addr,
                depth: info.depth,
            }),
        }
    }

    fn settle(&mut self) {
        self.evaluator.settle(&mut self.signals, &self.memories);
        for _ in 0..MAX_RESET_PASSES {
            if !self.apply_async_resets() {
                break;
            }
            self.evaluator.settle(&mut self.signals, &self.memories);
        }
    }

    fn apply_async_resets(&mut self) -> bool {
        let mut changed = false;
        for reset in &self.plan.async_resets {
            if self.signals[idx(reset.reset)] != 0 && self.signals[idx(reset.target)] != reset.value
            {
                self.signals[idx(reset.target)] = reset.value;
                changed = true;
            }
        }
        changed
    }

    fn observe_clocks(&mut self) {
        for (seen, clock) in self.low_seen.iter_mut().zip(&self.plan.clocks) {
            if self.signals[idx(*clock)] == 0 {
                *seen = true;
            }
        }
    }

    fn rising(&self, committed: &[bool]) -> Vec<bool> {
        self.plan
            .clocks
            .iter()
            .enumerate()
            .map(|(i, clock)| !committed[i] && self.low_seen[i] && self.signals[idx(*clock)] != 0)
            .collect()
    }

    /// Applies the sampled updates of every domain flagged in `edged`.
    ///
    /// Sync reads resolve against memory contents before this edge's writes.
    fn commit(&mut self, edged: &[bool]) {
        let mut loaded = Vec::new();
        for read in &self.plan.sync_reads {
            if !edged[read.clock] || read.enable.is_some_and(|en| self.samples[en] == 0) {
                continue;
            }
            let memory = &self.memories[read.memory.as_raw() as usize];
            let addr = self.samples[read.addr];
            let mut value = read_word(memory, addr);
            if read.write_first && addr < memory.len() as u64 {
                for write in &self.plan.writes {
                    if edged[write.clock]
                        && write.memory == read.memory
                        && self.samples[write.enable] != 0
                        && self.samples[write.addr] == addr
                    {
                        value = self.samples[write.data];
                    }
                }
            }
            loaded.push((read.data, value));
        }

        for write in &self.plan.writes {
            if !edged[write.clock] || self.samples[write.enable] == 0 {
                continue;
            }
            let memory = &mut self.memories[write.memory.as_raw() as usize];
            let slot = usize::try_from(self.samples[write.addr])
                .ok()
                .and_then(|addr| memory.get_mut(addr));
            if let Some(word) = slot {
                *word = self.samples[write.data];
            }
        }

        for reg in &self.plan.registers {
            if edged[reg.clock] {
                self.signals[idx(reg.target)] = self.samples[reg.slot];
            }
        }
        for (data, value) in loaded {
            self.signals[idx(data)] = value;
        }
    }
}

impl<E: Evaluator> Simulator for Kernel<E> {
    fn backend(&self) -> BackendKind {
        self.evaluator.kind()
    }

    fn poke(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        let id = self.signal_id(name)?;
        let value = bits::mask(value, self.module.signals[id].width);
        self.signals[idx(id)] = value;
        if value == 0 {
            if let Some(i) = self.plan.clocks.iter().position(|c| *c == id) {
                self.low_seen[i] = true;
            }
        }
        Ok(())
    }

    fn peek(&self, name: &str) -> Result<u64, SimError> {
        Ok(self.signals[idx(self.signal_id(name)?)])
    }

    fn signal_width(&self, name: &str) -> Result<u32, SimError> {
        Ok(self.module.signals[self.signal_id(name)?].width)
    }

    fn evaluate(&mut self) {
        self.settle();
        self.evaluator
            .sample(&self.signals, &self.memories, &mut self.samples);
        self.observe_clocks();
    }

    fn tick(&mut self) {
        let mut committed = vec![false; self.plan.clocks.len()];
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
                    module = %self.module.name,
                    passes,
                    "derived clock pass limit reached; remaining edges dropped"
                );
                break;
            }
            passes += 1;
            self.evaluator
                .sample(&self.signals, &self.memories, &mut self.samples);
        }
        for (seen, clock) in self.low_seen.iter_mut().zip(&self.plan.clocks) {
            *seen = self.signals[idx(*clock)] == 0;
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
        self.signals = self.module.initial_signals();
        self.memories = self
            .module
            .memories
            .values()
            .map(|m| m.initial.clone())
            .collect();
        self.samples.iter_mut().for_each(|s| *s = 0);
        for (seen, clock) in self.low_seen.iter_mut().zip(&self.plan.clocks) {
            *seen = self.signals[idx(*clock)] == 0;
        }
        self.evaluate();
    }

    fn signal_names(&self) -> Vec<String> {
        self.module.signals.values().map(|s| s.name.clone()).collect()
    }

    fn memory_names(&self) -> Vec<String> {
        self.module.memories.values().map(|m| m.name.clone()).collect()
    }

    fn memory_depth(&self, memory: &str) -> Result<u32, SimError> {
        Ok(self.module.memories[self.memory_id(memory)?].depth)
    }

    fn read_memory(&self, memory: &str, addr: u64) -> Result<u64, SimError> {
        let id = self.memory_id(memory)?;
        let index = self.check_addr(id, addr)?;
        Ok(self.memories[id.as_raw() as usize][index])
    }

    fn write_memory(&mut self, memory: &str, addr: u64, value: u64) -> Result<(), SimError> {
        let id = self.memory_id(memory)?;
        let index = self.check_addr(id, addr)?;
        let width = self.module.memories[id].width;
        self.memories[id.as_raw() as usize][index] = bits::mask(value, width);
        Ok(())
    }

    fn read_memory_range(
        &self,
        memory: &str,
        start: u64,
        len: usize,
    ) -> Result<Vec<u64>, SimError> {
        let id = self.memory_id(memory)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let first = self.check_addr(id, start)?;
        let last = start.checked_add(len as u64 - 1).unwrap_or(u64::MAX);
        self.check_addr(id, last)?;
        Ok(self.memories[id.as_raw() as usize][first..first + len].to_vec())
    }

    fn run_config(&self) -> &RunConfig {
        &self.run
    }

    fn set_run_config(&mut self, config: RunConfig) {
        self.run = config;
    }
}
