//! Modules: signals plus the logic that drives them.

use serde::{Deserialize, Serialize};

use crate::arena::Arena;
use crate::expr::Expr;
use crate::ids::{MemoryId, ModuleId, SignalId};
use crate::signal::{Signal, SignalKind};

/// A continuous assignment `target = expr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assign {
    /// The driven signal.
    pub target: SignalId,
    /// Its value; must have the target's width.
    pub expr: Expr,
}

/// When a register reset takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetKind {
    /// Sampled like data: applied on the next clock edge.
    #[default]
    Sync,
    /// Applied as soon as the reset is observed high.
    Async,
}

/// An active-high register reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reset {
    /// The 1-bit reset signal.
    pub signal: SignalId,
    /// Synchronous or asynchronous behaviour.
    #[serde(default)]
    pub kind: ResetKind,
}

/// A rising-edge register (D flip-flop bank) driving `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    /// The signal holding the register's state.
    pub target: SignalId,
    /// The 1-bit clock.
    pub clock: SignalId,
    /// Optional reset; it takes priority over `enable` and `next`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<Reset>,
    /// Value loaded on reset and at start-up.
    #[serde(default)]
    pub reset_value: u64,
    /// Optional 1-bit clock enable; the register holds when it is 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<Expr>,
    /// Value committed on an enabled edge.
    pub next: Expr,
}

/// What a synchronous read port returns when a write hits the same address
/// on the same edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadDuringWrite {
    /// The data being written.
    #[default]
    WriteFirst,
    /// The data stored before the edge.
    ReadFirst,
}

/// A memory access port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryPort {
    /// Combinational read: `data = mem[addr]`.
    AsyncRead {
        /// Word address.
        addr: Expr,
        /// Signal receiving the word.
        data: SignalId,
    },
    /// Registered read: `data` loads `mem[addr]` on the clock edge.
    SyncRead {
        /// The 1-bit clock.
        clock: SignalId,
        /// Word address.
        addr: Expr,
        /// Signal receiving the word; behaves like a register.
        data: SignalId,
        /// Optional 1-bit read enable.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enable: Option<Expr>,
        /// Same-edge collision behaviour.
        #[serde(default)]
        read_during_write: ReadDuringWrite,
    },
    /// Clocked write of `data` to `mem[addr]` when `enable` is 1.
    Write {
        /// The 1-bit clock.
        clock: SignalId,
        /// Word address.
        addr: Expr,
        /// Word to store; must have the memory's width.
        data: Expr,
        /// 1-bit write enable.
        enable: Expr,
    },
}

/// A word-addressed memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    /// Name, unique within the module.
    pub name: String,
    /// Number of words.
    pub depth: u32,
    /// Word width in bits.
    pub width: u32,
    /// Contents at start-up, from address 0; missing words are zero.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initial: Vec<u64>,
    /// Access ports, in declaration order.
    pub ports: Vec<MemoryPort>,
}

/// Connects a child port to a whole parent signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Port name in the child module.
    pub port: String,
    /// Signal in the parent module.
    pub signal: SignalId,
}

/// An instance of another module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance name, used as the prefix of flattened child names.
    pub name: String,
    /// The instantiated module.
    pub module: ModuleId,
    /// Port connections.
    pub bindings: Vec<Binding>,
}

/// A hardware module.
///
/// Modules are plain data: they are built with
/// [`ModuleBuilder`](crate::builder::ModuleBuilder) or deserialized from an
/// [`IrDocument`](crate::interchange::IrDocument), and must pass checking
/// before any backend will accept them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Module name.
    pub name: String,
    /// Ports and internal signals.
    pub signals: Arena<SignalId, Signal>,
    /// Continuous assignments.
    #[serde(default)]
    pub assigns: Vec<Assign>,
    /// Registers.
    #[serde(default)]
    pub registers: Vec<Register>,
    /// Memories.
    #[serde(default)]
    pub memories: Arena<MemoryId, Memory>,
    /// Child instances.
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl Module {
    /// Creates an empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Looks up a signal by name.
    pub fn find_signal(&self, name: &str) -> Option<SignalId> {
        self.signals.position(|s| s.name == name)
    }

    /// Looks up a memory by name.
    pub fn find_memory(&self, name: &str) -> Option<MemoryId> {
        self.memories.position(|m| m.name == name)
    }

    /// Iterates over signals of the given kind.
    pub fn signals_of_kind(&self, kind: SignalKind) -> impl Iterator<Item = (SignalId, &Signal)> {
        self.signals.iter().filter(move |(_, s)| s.kind == kind)
    }

    /// Input port ids in declaration order.
    pub fn inputs(&self) -> Vec<SignalId> {
        self.signals_of_kind(SignalKind::Input).map(|(id, _)| id).collect()
    }

    /// Output port ids in declaration order.
    pub fn outputs(&self) -> Vec<SignalId> {
        self.signals_of_kind(SignalKind::Output).map(|(id, _)| id).collect()
    }

    /// Distinct clock signals used by registers and memory ports, in first-use order.
    pub fn clocks(&self) -> Vec<SignalId> {
        let mut clocks = Vec::new();
        let mut push = |id: SignalId| {
            if !clocks.contains(&id) {
                clocks.push(id);
            }
        };
        for reg in &self.registers {
            push(reg.clock);
        }
        for mem in self.memories.values() {
            for port in &mem.ports {
                match port {
                    MemoryPort::SyncRead { clock, .. } | MemoryPort::Write { clock, .. } => {
                        push(*clock)
                    }
                    MemoryPort::AsyncRead { .. } => {}
                }
            }
        }
        clocks
    }
}
