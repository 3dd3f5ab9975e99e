//! Lowering of checked modules to gate netlists.
//!
//! Lowering makes three passes over a [`CheckedModule`]:
//!
//! 1. **State.** Input ports get free nets. Every register bit, every
//!    synchronous read data bit and every RAM bit becomes a flip-flop whose
//!    start-up value is the reset value or initial memory content. Memories
//!    without write ports become constants.
//! 2. **Combinational steps**, in schedule order. Each step's result bus is
//!    bound to its target signal, so later steps read it directly.
//! 3. **Next state.** Flip-flop data inputs are built from write ports,
//!    register next-state expressions, enables and resets.
//!
//! A step whose result reuses nets of another signal (a plain copy or a
//! slice) aliases them. Each net is owned by the first signal that defines
//! it: state, then inputs, then steps in schedule order. The gate simulator
//! only writes owned nets when a signal is forced.
//!
//! Gate ids follow creation order, and every pass walks the module in
//! declaration order, so lowering the same module always yields the same
//! netlist.

use std::collections::HashSet;

use kestrel_cache::{BuildCache, CacheKey};
use kestrel_config::LoweringConfig;
use kestrel_ir::{
    check_design, CheckedModule, CombStep, Design, MemoryId, ReadDuringWrite, ResetKind,
    SignalId, SignalKind,
};

use crate::error::LowerError;
use crate::lower_expr::{equals_const, lower_expr, mux_bus};
use crate::netlist::{Bus, MemoryBits, NetId, Netlist, NetlistBuilder};

/// Version of the lowering rules; part of every cached netlist key.
pub const LOWERING_VERSION: &str = "kestrel-lower-2";

/// Cache namespace for lowered netlists.
const NETLIST_NAMESPACE: &str = "netlist";

/// Lowering limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowerOptions {
    /// Largest memory, in stored bits, that is lowered.
    pub max_memory_bits: u32,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self::from_config(&LoweringConfig::default())
    }
}

impl LowerOptions {
    /// Takes the limits from the `[lowering]` table.
    pub fn from_config(config: &LoweringConfig) -> Self {
        Self {
            max_memory_bits: config.max_memory_bits,
        }
    }
}

fn idx(id: SignalId) -> usize {
    id.as_raw() as usize
}

/// Flip-flops allocated for one multi-bit value.
struct StateBits {
    dffs: Vec<usize>,
    q: Vec<NetId>,
}

impl StateBits {
    fn new(b: &mut NetlistBuilder, width: u32, init: u64) -> Self {
        let (dffs, q) = (0..width)
            .map(|i| b.dff(i < 64 && (init >> i) & 1 == 1))
            .unzip();
        Self { dffs, q }
    }

    fn connect(&self, b: &mut NetlistBuilder, clock: NetId, d: &[NetId], reset: Option<NetId>) {
        for (&index, &bit) in self.dffs.iter().zip(d) {
            b.connect_dff(index, clock, bit, reset);
        }
    }
}

/// A memory after pass 1.
enum MemoryState {
    /// Constant words.
    Rom(Vec<Vec<NetId>>),
    /// One flip-flop per bit, all on the write clock.
    Ram { clock: SignalId, words: Vec<StateBits> },
}

impl MemoryState {
    fn words(&self) -> Vec<Vec<NetId>> {
        match self {
            MemoryState::Rom(words) => words.clone(),
            MemoryState::Ram { words, .. } => words.iter().map(|w| w.q.clone()).collect(),
        }
    }
}

/// Lowers one flattened, checked module.
pub fn lower(module: &CheckedModule, options: &LowerOptions) -> Result<Netlist, LowerError> {
    let write_clocks = check_synthesizable(module, options)?;
    let mut b = NetlistBuilder::new();
    let mut buses: Vec<Vec<NetId>> = vec![Vec::new(); module.signals.len()];

    // Pass 1: state and sources.
    let registers: Vec<StateBits> = module
        .registers
        .iter()
        .map(|reg| {
            let width = module.signals[reg.target].width;
            let bits = StateBits::new(&mut b, width, reg.reset_value);
            buses[idx(reg.target)] = bits.q.clone();
            bits
        })
        .collect();
    let read_data: Vec<StateBits> = module
        .sync_reads
        .iter()
        .map(|read| {
            let bits = StateBits::new(&mut b, module.signals[read.data].width, 0);
            buses[idx(read.data)] = bits.q.clone();
            bits
        })
        .collect();
    let memories: Vec<MemoryState> = module
        .memories
        .iter()
        .map(|(id, info)| match write_clocks[id.as_raw() as usize] {
            Some(clock) => MemoryState::Ram {
                clock,
                words: info
                    .initial
                    .iter()
                    .map(|&word| StateBits::new(&mut b, info.width, word))
                    .collect(),
            },
            None => MemoryState::Rom(
                info.initial
                    .iter()
                    .map(|&word| b.constant(word, info.width))
                    .collect(),
            ),
        })
        .collect();

    let mut driven: Vec<bool> = buses.iter().map(|bus| !bus.is_empty()).collect();
    for step in &module.comb {
        driven[idx(step.target())] = true;
    }
    for (id, signal) in module.signals.iter() {
        if signal.kind == SignalKind::Input || !driven[idx(id)] {
            buses[idx(id)] = b.free_bus(signal.width);
        }
    }

    // Pass 2: combinational steps.
    for step in &module.comb {
        let value = match step {
            CombStep::Assign { expr, .. } => lower_expr(&mut b, &buses, expr)?,
            CombStep::MemRead { memory, addr, data } => {
                let addr = lower_expr(&mut b, &buses, addr)?;
                let words = memories[memory.as_raw() as usize].words();
                read_word(&mut b, &words, &addr, module.signals[*data].width)
            }
        };
        buses[idx(step.target())] = value;
    }

    // Pass 3: next state. Write ports are lowered once, in port order.
    let ports: Vec<(MemoryId, Vec<NetId>, Vec<NetId>, NetId)> = module
        .writes
        .iter()
        .map(|write| -> Result<_, LowerError> {
            let addr = lower_expr(&mut b, &buses, &write.addr)?;
            let data = lower_expr(&mut b, &buses, &write.data)?;
            let enable = lower_expr(&mut b, &buses, &write.enable)?[0];
            Ok((write.memory, addr, data, enable))
        })
        .collect::<Result<_, _>>()?;

    let mut written: Vec<Option<Vec<Vec<NetId>>>> = Vec::with_capacity(memories.len());
    for (index, memory) in memories.iter().enumerate() {
        let MemoryState::Ram { clock, words } = memory else {
            written.push(None);
            continue;
        };
        let clock = buses[idx(*clock)][0];
        let mut next_words = Vec::with_capacity(words.len());
        for (address, word) in words.iter().enumerate() {
            let mut next = word.q.clone();
            for (_, addr, data, enable) in ports
                .iter()
                .filter(|port| port.0.as_raw() as usize == index)
            {
                let hit = equals_const(&mut b, addr, address as u64);
                let hit = b.and(hit, *enable);
                next = mux_bus(&mut b, hit, data, &next);
            }
            word.connect(&mut b, clock, &next, None);
            next_words.push(next);
        }
        written.push(Some(next_words));
    }

    for (reg, bits) in module.registers.iter().zip(&registers) {
        let width = module.signals[reg.target].width;
        let mut next = lower_expr(&mut b, &buses, &reg.next)?;
        if let Some(enable) = &reg.enable {
            let enable = lower_expr(&mut b, &buses, enable)?[0];
            next = mux_bus(&mut b, enable, &next, &bits.q);
        }
        let mut async_reset = None;
        if let Some(reset) = reg.reset {
            let level = buses[idx(reset.signal)][0];
            let value = b.constant(reg.reset_value, width);
            next = mux_bus(&mut b, level, &value, &next);
            if reset.kind == ResetKind::Async {
                async_reset = Some(level);
            }
        }
        bits.connect(&mut b, buses[idx(reg.clock)][0], &next, async_reset);
    }

    for (read, bits) in module.sync_reads.iter().zip(&read_data) {
        let width = module.signals[read.data].width;
        let index = read.memory.as_raw() as usize;
        let addr = lower_expr(&mut b, &buses, &read.addr)?;
        let same_edge = write_clocks[index] == Some(read.clock);
        let words = match &written[index] {
            Some(next_words)
                if same_edge && read.read_during_write == ReadDuringWrite::WriteFirst =>
            {
                next_words.clone()
            }
            _ => memories[index].words(),
        };
        let mut value = read_word(&mut b, &words, &addr, width);
        if let Some(enable) = &read.enable {
            let enable = lower_expr(&mut b, &buses, enable)?[0];
            value = mux_bus(&mut b, enable, &value, &bits.q);
        }
        bits.connect(&mut b, buses[idx(read.clock)][0], &value, None);
    }

    let definers = module
        .registers
        .iter()
        .map(|reg| reg.target)
        .chain(module.sync_reads.iter().map(|read| read.data))
        .chain(
            module
                .signals
                .iter()
                .filter(|(id, signal)| signal.kind == SignalKind::Input || !driven[idx(*id)])
                .map(|(id, _)| id),
        )
        .chain(module.comb.iter().map(|step| step.target()));
    let mut owned: Vec<Vec<bool>> = vec![Vec::new(); module.signals.len()];
    let mut claimed: HashSet<NetId> = HashSet::new();
    for id in definers {
        owned[idx(id)] = buses[idx(id)]
            .iter()
            .map(|net| !net.is_const() && claimed.insert(*net))
            .collect();
    }

    let signals = module
        .signals
        .iter()
        .map(|(id, signal)| Bus {
            name: signal.name.clone(),
            kind: signal.kind,
            nets: std::mem::take(&mut buses[idx(id)]),
            owned: std::mem::take(&mut owned[idx(id)]),
        })
        .collect();
    let memory_bits = module
        .memories
        .values()
        .zip(&memories)
        .map(|(info, state)| MemoryBits {
            name: info.name.clone(),
            width: info.width,
            words: state.words(),
        })
        .collect();
    let netlist = b.finish(&module.name, signals, memory_bits);

    let stats = netlist.stats();
    tracing::debug!(
        module = %module.name,
        gates = stats.gates(),
        dffs = stats.dffs,
        nets = stats.nets,
        "lowered to gates"
    );
    Ok(netlist)
}

/// Flattens, checks and lowers a design.
pub fn lower_design(design: &Design, options: &LowerOptions) -> Result<Netlist, LowerError> {
    lower(&check_design(design)?, options)
}

/// Lowers `module`, reusing a netlist cached under the module's fingerprint.
pub fn lower_cached(
    module: &CheckedModule,
    options: &LowerOptions,
    cache: &BuildCache,
) -> Result<Netlist, LowerError> {
    let key = CacheKey::new(module.fingerprint, LOWERING_VERSION)
        .with(&format!("max_memory_bits={}", options.max_memory_bits));
    if let Some(netlist) = cache.load::<Netlist>(NETLIST_NAMESPACE, &key) {
        tracing::info!(module = %module.name, %key, "netlist cache hit");
        return Ok(netlist);
    }
    let netlist = lower(module, options)?;
    cache.store(NETLIST_NAMESPACE, &key, &netlist, LOWERING_VERSION)?;
    Ok(netlist)
}

/// Rejects what cannot be lowered; returns each memory's write clock.
fn check_synthesizable(
    module: &CheckedModule,
    options: &LowerOptions,
) -> Result<Vec<Option<SignalId>>, LowerError> {
    let mut clocks: Vec<Option<SignalId>> = vec![None; module.memories.len()];
    for write in &module.writes {
        let slot = &mut clocks[write.memory.as_raw() as usize];
        match *slot {
            Some(clock) if clock != write.clock => {
                return Err(LowerError::not_synthesizable(
                    &module.name,
                    format!(
                        "memory '{}' is written on more than one clock",
                        module.memories[write.memory].name
                    ),
                ));
            }
            _ => *slot = Some(write.clock),
        }
    }
    for info in module.memories.values() {
        let size = u64::from(info.depth) * u64::from(info.width);
        if size > u64::from(options.max_memory_bits) {
            return Err(LowerError::not_synthesizable(
                &module.name,
                format!(
                    "memory '{}' holds {size} bits, more than the limit of {}",
                    info.name, options.max_memory_bits
                ),
            ));
        }
    }
    Ok(clocks)
}

/// `words[addr]` as an address-decoded mux chain; zero when out of range.
fn read_word(b: &mut NetlistBuilder, words: &[Vec<NetId>], addr: &[NetId], width: u32) -> Vec<NetId> {
    let mut value = vec![NetId::ZERO; width as usize];
    for (address, word) in words.iter().enumerate().rev() {
        let hit = equals_const(b, addr, address as u64);
        value = mux_bus(b, hit, word, &value);
    }
    value
}
