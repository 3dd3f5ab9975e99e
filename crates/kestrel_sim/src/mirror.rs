//! Read-only host copies of simulator memory.
//!
//! The simulator owns memory contents; a [`MemoryMirror`] holds a snapshot
//! of a window of one memory for slow host-side consumers (displays,
//! dumps). It goes stale as soon as the simulator runs and is brought up to
//! date only by [`MemoryMirror::refresh`], one batched read per call.

use crate::error::SimError;
use crate::simulator::Simulator;

/// A snapshot of `len` words of one memory, starting at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMirror {
    memory: String,
    start: u64,
    words: Vec<u64>,
    refreshes: u64,
}

impl MemoryMirror {
    /// Mirrors the whole of `memory`.
    pub fn new(sim: &dyn Simulator, memory: &str) -> Result<Self, SimError> {
        let depth = sim.memory_depth(memory)?;
        Self::window(sim, memory, 0, depth as usize)
    }

    /// Mirrors `len` words of `memory` starting at `start`.
    pub fn window(
        sim: &dyn Simulator,
        memory: &str,
        start: u64,
        len: usize,
    ) -> Result<Self, SimError> {
        Ok(Self {
            memory: memory.to_string(),
            start,
            words: sim.read_memory_range(memory, start, len)?,
            refreshes: 1,
        })
    }

    /// Re-reads the window from the simulator.
    pub fn refresh(&mut self, sim: &dyn Simulator) -> Result<(), SimError> {
        self.words = sim.read_memory_range(&self.memory, self.start, self.words.len())?;
        self.refreshes += 1;
        Ok(())
    }

    /// Name of the mirrored memory.
    pub fn memory(&self) -> &str {
        &self.memory
    }

    /// The snapshot, first word at `start`.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Word at absolute address `addr`, if inside the window.
    pub fn get(&self, addr: u64) -> Option<u64> {
        let offset = usize::try_from(addr.checked_sub(self.start)?).ok()?;
        self.words.get(offset).copied()
    }

    /// How many times the snapshot has been taken.
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }
}
