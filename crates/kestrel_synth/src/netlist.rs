//! Gate-level netlists.
//!
//! A [`Netlist`] is a flat graph of single-bit nets. Every net is driven by
//! exactly one of: a constant, a primary input bit, a flip-flop output, or a
//! primitive gate. Gates are stored in creation order, which is also a valid
//! evaluation order: a gate only reads nets that existed before it.
//!
//! [`NetlistBuilder`] folds constants and shares structurally identical gates
//! as they are created, so repeated lowering of the same module always
//! produces the same gate list with the same ids.

use std::collections::HashMap;
use std::fmt;

use kestrel_ir::SignalKind;
use serde::{Deserialize, Serialize};

/// A single-bit net.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetId(u32);

impl NetId {
    /// The net tied to logic 0.
    pub const ZERO: NetId = NetId(0);
    /// The net tied to logic 1.
    pub const ONE: NetId = NetId(1);

    /// Creates an id from a raw index.
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Index for slice addressing.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this is one of the two constant nets.
    pub fn is_const(self) -> bool {
        self.0 < 2
    }

    /// The constant net for `bit`.
    pub fn constant(bit: bool) -> Self {
        if bit {
            Self::ONE
        } else {
            Self::ZERO
        }
    }
}

impl fmt::Debug for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Primitive gate types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// 2-input AND.
    And,
    /// 2-input OR.
    Or,
    /// 2-input XOR.
    Xor,
    /// Inverter.
    Not,
}

impl GateKind {
    /// Verilog primitive name.
    pub fn as_str(self) -> &'static str {
        match self {
            GateKind::And => "and",
            GateKind::Or => "or",
            GateKind::Xor => "xor",
            GateKind::Not => "not",
        }
    }

    /// Applies the gate to input values.
    pub fn apply(self, a: bool, b: bool) -> bool {
        match self {
            GateKind::And => a & b,
            GateKind::Or => a | b,
            GateKind::Xor => a ^ b,
            GateKind::Not => !a,
        }
    }
}

/// One primitive gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    /// Position in [`Netlist::gates`].
    pub id: u32,
    /// Gate type.
    pub kind: GateKind,
    /// Input nets; a `not` gate repeats its single input.
    pub inputs: [NetId; 2],
    /// The net this gate drives.
    pub output: NetId,
}

/// A rising-edge D flip-flop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dff {
    /// Clock net.
    pub clock: NetId,
    /// Data input.
    pub d: NetId,
    /// Output.
    pub q: NetId,
    /// Active-high asynchronous reset.
    pub reset: Option<NetId>,
    /// Value at start-up, and while `reset` is high.
    pub init: bool,
}

/// The nets carrying one IR signal, least significant bit first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bus {
    /// Signal name, verbatim from the IR.
    pub name: String,
    /// Interface role.
    pub kind: SignalKind,
    /// One net per bit.
    pub nets: Vec<NetId>,
    /// Per bit, whether this signal defines the net. A bit that merely
    /// aliases another signal's net, or a constant, is `false`.
    #[serde(default)]
    pub owned: Vec<bool>,
}

impl Bus {
    /// Whether bit `bit` is defined by this signal; buses without ownership
    /// information own every bit.
    pub fn owns(&self, bit: usize) -> bool {
        self.owned.get(bit).copied().unwrap_or(true)
    }

    /// Whether every bit is defined by this signal.
    pub fn owns_all(&self) -> bool {
        (0..self.nets.len()).all(|bit| self.owns(bit))
    }
}

/// A memory after lowering: one bus per word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBits {
    /// Memory name.
    pub name: String,
    /// Word width.
    pub width: u32,
    /// Word nets; flip-flop outputs, or constants for a ROM.
    pub words: Vec<Vec<NetId>>,
}

/// Gate and flip-flop counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetlistStats {
    /// AND gates.
    pub and: usize,
    /// OR gates.
    pub or: usize,
    /// XOR gates.
    pub xor: usize,
    /// Inverters.
    pub not: usize,
    /// Flip-flops.
    pub dffs: usize,
    /// Nets including the two constants.
    pub nets: u32,
}

impl NetlistStats {
    /// Total primitive gates.
    pub fn gates(&self) -> usize {
        self.and + self.or + self.xor + self.not
    }
}

/// A lowered module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Netlist {
    /// Module name, verbatim from the IR.
    pub name: String,
    /// Number of nets; ids are `0..net_count`.
    pub net_count: u32,
    /// Gates in evaluation order.
    pub gates: Vec<Gate>,
    /// Flip-flops.
    pub dffs: Vec<Dff>,
    /// Every IR signal in declaration order.
    pub signals: Vec<Bus>,
    /// Every IR memory in declaration order.
    pub memories: Vec<MemoryBits>,
}

impl Netlist {
    /// Looks up a signal's bus.
    pub fn signal(&self, name: &str) -> Option<&Bus> {
        self.signals.iter().find(|b| b.name == name)
    }

    /// Input ports in declaration order.
    pub fn inputs(&self) -> impl Iterator<Item = &Bus> {
        self.signals.iter().filter(|b| b.kind == SignalKind::Input)
    }

    /// Output ports in declaration order.
    pub fn outputs(&self) -> impl Iterator<Item = &Bus> {
        self.signals.iter().filter(|b| b.kind == SignalKind::Output)
    }

    /// Gate and flip-flop counts.
    pub fn stats(&self) -> NetlistStats {
        let mut stats = NetlistStats {
            dffs: self.dffs.len(),
            nets: self.net_count,
            ..NetlistStats::default()
        };
        for gate in &self.gates {
            match gate.kind {
                GateKind::And => stats.and += 1,
                GateKind::Or => stats.or += 1,
                GateKind::Xor => stats.xor += 1,
                GateKind::Not => stats.not += 1,
            }
        }
        stats
    }

    /// Distinct flip-flop clock nets in first-use order.
    pub fn clocks(&self) -> Vec<NetId> {
        let mut clocks = Vec::new();
        for dff in &self.dffs {
            if !clocks.contains(&dff.clock) {
                clocks.push(dff.clock);
            }
        }
        clocks
    }
}

/// Incremental netlist construction with constant folding and gate sharing.
#[derive(Debug)]
pub struct NetlistBuilder {
    net_count: u32,
    gates: Vec<Gate>,
    dffs: Vec<Dff>,
    shared: HashMap<(GateKind, NetId, NetId), NetId>,
}

impl Default for NetlistBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetlistBuilder {
    /// A builder holding only the two constant nets.
    pub fn new() -> Self {
        Self {
            net_count: 2,
            gates: Vec::new(),
            dffs: Vec::new(),
            shared: HashMap::new(),
        }
    }

    /// A fresh net with no driver yet (primary inputs, undriven signals).
    pub fn free_net(&mut self) -> NetId {
        let net = NetId(self.net_count);
        self.net_count += 1;
        net
    }

    /// `width` fresh nets.
    pub fn free_bus(&mut self, width: u32) -> Vec<NetId> {
        (0..width).map(|_| self.free_net()).collect()
    }

    /// Constant nets for the low `width` bits of `value`.
    pub fn constant(&self, value: u64, width: u32) -> Vec<NetId> {
        (0..width)
            .map(|i| NetId::constant(i < 64 && (value >> i) & 1 == 1))
            .collect()
    }

    /// Adds a flip-flop with an undriven clock and data input; returns its index and output.
    pub fn dff(&mut self, init: bool) -> (usize, NetId) {
        let q = self.free_net();
        self.dffs.push(Dff {
            clock: NetId::ZERO,
            d: NetId::ZERO,
            q,
            reset: None,
            init,
        });
        (self.dffs.len() - 1, q)
    }

    /// Connects a flip-flop created by [`NetlistBuilder::dff`].
    pub fn connect_dff(&mut self, index: usize, clock: NetId, d: NetId, reset: Option<NetId>) {
        let dff = &mut self.dffs[index];
        dff.clock = clock;
        dff.d = d;
        dff.reset = reset;
    }

    fn gate(&mut self, kind: GateKind, a: NetId, b: NetId) -> NetId {
        let key = match kind {
            GateKind::Not => (kind, a, a),
            _ => (kind, a.min(b), a.max(b)),
        };
        if let Some(&net) = self.shared.get(&key) {
            return net;
        }
        let output = self.free_net();
        self.gates.push(Gate {
            id: self.gates.len() as u32,
            kind,
            inputs: [key.1, key.2],
            output,
        });
        self.shared.insert(key, output);
        output
    }

    /// `!a`.
    pub fn not(&mut self, a: NetId) -> NetId {
        match a {
            NetId::ZERO => NetId::ONE,
            NetId::ONE => NetId::ZERO,
            _ => self.gate(GateKind::Not, a, a),
        }
    }

    /// `a & b`.
    pub fn and(&mut self, a: NetId, b: NetId) -> NetId {
        match (a, b) {
            (NetId::ZERO, _) | (_, NetId::ZERO) => NetId::ZERO,
            (NetId::ONE, x) | (x, NetId::ONE) => x,
            _ if a == b => a,
            _ => self.gate(GateKind::And, a, b),
        }
    }

    /// `a | b`.
    pub fn or(&mut self, a: NetId, b: NetId) -> NetId {
        match (a, b) {
            (NetId::ONE, _) | (_, NetId::ONE) => NetId::ONE,
            (NetId::ZERO, x) | (x, NetId::ZERO) => x,
            _ if a == b => a,
            _ => self.gate(GateKind::Or, a, b),
        }
    }

    /// `a ^ b`.
    pub fn xor(&mut self, a: NetId, b: NetId) -> NetId {
        match (a, b) {
            (NetId::ZERO, x) | (x, NetId::ZERO) => x,
            (NetId::ONE, x) | (x, NetId::ONE) => self.not(x),
            _ if a == b => NetId::ZERO,
            _ => self.gate(GateKind::Xor, a, b),
        }
    }

    /// `cond ? when_true : when_false`, as `(f & !c) | (t & c)`.
    pub fn mux(&mut self, cond: NetId, when_true: NetId, when_false: NetId) -> NetId {
        match cond {
            NetId::ONE => return when_true,
            NetId::ZERO => return when_false,
            _ => {}
        }
        if when_true == when_false {
            return when_true;
        }
        let not_cond = self.not(cond);
        let f = self.and(when_false, not_cond);
        let t = self.and(when_true, cond);
        self.or(f, t)
    }

    /// Number of gates so far.
    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    /// Finishes the netlist.
    pub fn finish(self, name: &str, signals: Vec<Bus>, memories: Vec<MemoryBits>) -> Netlist {
        Netlist {
            name: name.to_string(),
            net_count: self.net_count,
            gates: self.gates,
            dffs: self.dffs,
            signals,
            memories,
        }
    }
}
