//! A behavioural FIFO written directly against the [`Simulator`] contract.
//!
//! [`FifoModel`] has the same ports, the same cycle behaviour and the same
//! `buf` memory as [`crate::fifo`], but no IR behind it. Cross-validation
//! treats it as a subject that cannot be lowered to gates.

use kestrel_common::bits;
use kestrel_config::BackendKind;
use kestrel_sim::{run_two_phase, CycleHook, RunConfig, RunSummary, SimError, Simulator};

use crate::{bits_for, error::invalid, PrimitiveError};

const CLK: usize = 0;
const RST: usize = 1;
const PUSH: usize = 2;
const POP: usize = 3;
const DIN: usize = 4;
const DOUT: usize = 5;
const EMPTY: usize = 6;
const FULL: usize = 7;
const COUNT: usize = 8;

const PORTS: [&str; 9] = [
    "clk", "rst", "push", "pop", "din", "dout", "empty", "full", "count",
];

const MEMORY: &str = "buf";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Pointers {
    wr: u64,
    rd: u64,
    count: u64,
}

/// A FIFO of `depth` words kept as a ring buffer.
#[derive(Debug, Clone)]
pub struct FifoModel {
    depth: u32,
    widths: [u32; 9],
    values: [u64; 9],
    buf: Vec<u64>,
    state: Pointers,
    next: Pointers,
    write: Option<(usize, u64)>,
    low_seen: bool,
    run: RunConfig,
}

impl FifoModel {
    /// A model of `fifo(depth, width)`.
    pub fn new(depth: u32, width: u32, run: RunConfig) -> Result<Self, PrimitiveError> {
        if depth < 2 || !depth.is_power_of_two() || depth > 1 << 16 {
            return Err(invalid(
                "fifo model",
                format!("depth {depth} is not a power of two in 2..=65536"),
            ));
        }
        if width == 0 || width > 64 {
            return Err(invalid(
                "fifo model",
                format!("width {width} is outside 1..=64"),
            ));
        }
        let mut model = Self {
            depth,
            widths: [1, 1, 1, 1, width, width, 1, 1, bits_for(u64::from(depth))],
            values: [0; 9],
            buf: vec![0; depth as usize],
            state: Pointers::default(),
            next: Pointers::default(),
            write: None,
            low_seen: true,
            run,
        };
        model.evaluate();
        Ok(model)
    }

    /// Words currently queued, oldest first.
    pub fn contents(&self) -> Vec<u64> {
        (0..self.state.count)
            .map(|i| self.buf[((self.state.rd + i) % u64::from(self.depth)) as usize])
            .collect()
    }

    fn port(&self, name: &str) -> Result<usize, SimError> {
        PORTS
            .iter()
            .position(|p| *p == name)
            .ok_or_else(|| SimError::no_such_signal(name))
    }

    fn check_memory(&self, memory: &str, addr: u64) -> Result<usize, SimError> {
        if memory != MEMORY {
            return Err(SimError::no_such_memory(memory));
        }
        if addr >= u64::from(self.depth) {
            return Err(SimError::MemoryRange {
                memory: memory.to_string(),
                addr,
                depth: self.depth,
            });
        }
        Ok(addr as usize)
    }

    fn outputs(&mut self) {
        let depth = u64::from(self.depth);
        self.values[DOUT] = self.buf[self.state.rd as usize];
        self.values[EMPTY] = u64::from(self.state.count == 0);
        self.values[FULL] = u64::from(self.state.count == depth);
        self.values[COUNT] = self.state.count;
    }

    fn sample(&mut self) {
        let depth = u64::from(self.depth);
        let push = self.values[PUSH] != 0 && self.values[FULL] == 0;
        let pop = self.values[POP] != 0 && self.values[EMPTY] == 0;
        self.write = push.then(|| (self.state.wr as usize, self.values[DIN]));
        self.next = if self.values[RST] != 0 {
            Pointers::default()
        } else {
            Pointers {
                wr: (self.state.wr + u64::from(push)) % depth,
                rd: (self.state.rd + u64::from(pop)) % depth,
                count: self.state.count + u64::from(push) - u64::from(pop),
            }
        };
    }
}

impl Simulator for FifoModel {
    fn backend(&self) -> BackendKind {
        BackendKind::Interpreter
    }

    fn poke(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        let port = self.port(name)?;
        self.values[port] = bits::mask(value, self.widths[port]);
        if self.values[CLK] == 0 {
            self.low_seen = true;
        }
        Ok(())
    }

    fn peek(&self, name: &str) -> Result<u64, SimError> {
        Ok(self.values[self.port(name)?])
    }

    fn signal_width(&self, name: &str) -> Result<u32, SimError> {
        Ok(self.widths[self.port(name)?])
    }

    fn evaluate(&mut self) {
        self.outputs();
        self.sample();
        if self.values[CLK] == 0 {
            self.low_seen = true;
        }
    }

    fn tick(&mut self) {
        if !self.low_seen || self.values[CLK] == 0 {
            return;
        }
        if let Some((addr, data)) = self.write.take() {
            self.buf[addr] = data;
        }
        self.state = self.next;
        self.low_seen = false;
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
        self.values = [0; 9];
        self.buf.iter_mut().for_each(|w| *w = 0);
        self.state = Pointers::default();
        self.write = None;
        self.low_seen = true;
        self.evaluate();
    }

    fn signal_names(&self) -> Vec<String> {
        PORTS.iter().map(|p| p.to_string()).collect()
    }

    fn memory_names(&self) -> Vec<String> {
        vec![MEMORY.to_string()]
    }

    fn memory_depth(&self, memory: &str) -> Result<u32, SimError> {
        self.check_memory(memory, 0)?;
        Ok(self.depth)
    }

    fn read_memory(&self, memory: &str, addr: u64) -> Result<u64, SimError> {
        Ok(self.buf[self.check_memory(memory, addr)?])
    }

    fn write_memory(&mut self, memory: &str, addr: u64, value: u64) -> Result<(), SimError> {
        let index = self.check_memory(memory, addr)?;
        self.buf[index] = bits::mask(value, self.widths[DIN]);
        Ok(())
    }

    fn run_config(&self) -> &RunConfig {
        &self.run
    }

    fn set_run_config(&mut self, config: RunConfig) {
        self.run = config;
    }
}
