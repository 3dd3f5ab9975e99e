//! Load-time checking into an immutable, scheduled form.
//!
//! [`CheckedModule`] is what every execution backend and the structural
//! lowering consume. Building one resolves the width and signedness of every
//! expression node, rejects malformed IR, and orders the combinational logic
//! so that a single pass in [`CheckedModule::comb`] order settles it.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use kestrel_common::{bits, ContentHash};

use crate::arena::Arena;
use crate::design::Design;
use crate::error::IrError;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::flatten::flatten;
use crate::ids::{MemoryId, SignalId};
use crate::module::{MemoryPort, Module, ReadDuringWrite, Reset};
use crate::signal::{Signal, SignalKind};
use crate::validate::{check_references, check_structure};

/// An expression node with its resolved width and signedness.
///
/// Every evaluator guarantees that the value of a node is already masked to
/// `width` bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedExpr {
    /// The operation.
    pub node: Node,
    /// Result width in bits.
    pub width: u32,
    /// Whether parents treat the result as two's complement.
    pub signed: bool,
}

/// Operations of a [`TypedExpr`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A constant, already masked.
    Const(u64),
    /// A signal's current value.
    Signal(SignalId),
    /// `width` bits starting at `low`.
    Slice {
        /// Operand.
        expr: Box<TypedExpr>,
        /// First bit taken.
        low: u32,
    },
    /// Parts packed most significant first.
    Concat(Vec<TypedExpr>),
    /// A unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<TypedExpr>,
    },
    /// A binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<TypedExpr>,
        /// Right operand.
        rhs: Box<TypedExpr>,
    },
    /// Two-way select on a 1-bit condition.
    Mux {
        /// Condition.
        cond: Box<TypedExpr>,
        /// Value when the condition is 1.
        when_true: Box<TypedExpr>,
        /// Value when the condition is 0.
        when_false: Box<TypedExpr>,
    },
    /// Priority select: the first arm whose value equals the selector wins.
    Case {
        /// Selector.
        selector: Box<TypedExpr>,
        /// `(value, result)` arms in priority order.
        arms: Vec<(u64, TypedExpr)>,
        /// Fallback.
        default: Box<TypedExpr>,
    },
    /// Truncation or extension of the operand to this node's width.
    Resize(Box<TypedExpr>),
}

impl TypedExpr {
    /// A constant of the given width.
    pub fn constant(value: u64, width: u32) -> Self {
        Self {
            node: Node::Const(bits::mask(value, width)),
            width,
            signed: false,
        }
    }

    /// A signal reference with the signal's width.
    pub fn signal(id: SignalId, sig: &Signal) -> Self {
        Self {
            node: Node::Signal(id),
            width: sig.width,
            signed: sig.signed,
        }
    }

    /// Whether a comparison between `lhs` and `rhs` is two's complement.
    pub fn signed_compare(lhs: &TypedExpr, rhs: &TypedExpr) -> bool {
        lhs.signed && rhs.signed
    }

    /// Calls `f` for every signal read by this expression.
    pub fn for_each_signal(&self, f: &mut impl FnMut(SignalId)) {
        match &self.node {
            Node::Const(_) => {}
            Node::Signal(id) => f(*id),
            Node::Slice { expr, .. } | Node::Resize(expr) => expr.for_each_signal(f),
            Node::Unary { operand, .. } => operand.for_each_signal(f),
            Node::Concat(parts) => parts.iter().for_each(|p| p.for_each_signal(f)),
            Node::Binary { lhs, rhs, .. } => {
                lhs.for_each_signal(f);
                rhs.for_each_signal(f);
            }
            Node::Mux {
                cond,
                when_true,
                when_false,
            } => {
                cond.for_each_signal(f);
                when_true.for_each_signal(f);
                when_false.for_each_signal(f);
            }
            Node::Case {
                selector,
                arms,
                default,
            } => {
                selector.for_each_signal(f);
                arms.iter().for_each(|(_, e)| e.for_each_signal(f));
                default.for_each_signal(f);
            }
        }
    }
}

/// One step of combinational settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombStep {
    /// `target = expr`.
    Assign {
        /// Driven signal.
        target: SignalId,
        /// Its value.
        expr: TypedExpr,
    },
    /// `data = memory[addr]`, zero when `addr` is out of range.
    MemRead {
        /// The memory read.
        memory: MemoryId,
        /// Word address.
        addr: TypedExpr,
        /// Driven signal.
        data: SignalId,
    },
}

impl CombStep {
    /// The signal this step drives.
    pub fn target(&self) -> SignalId {
        match self {
            CombStep::Assign { target, .. } => *target,
            CombStep::MemRead { data, .. } => *data,
        }
    }

    fn for_each_read(&self, f: &mut impl FnMut(SignalId)) {
        match self {
            CombStep::Assign { expr, .. } => expr.for_each_signal(f),
            CombStep::MemRead { addr, .. } => addr.for_each_signal(f),
        }
    }
}

/// A register with typed expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedRegister {
    /// State signal.
    pub target: SignalId,
    /// Clock signal.
    pub clock: SignalId,
    /// Optional reset.
    pub reset: Option<Reset>,
    /// Reset and start-up value, masked to the target width.
    pub reset_value: u64,
    /// Optional clock enable.
    pub enable: Option<TypedExpr>,
    /// Next-state value.
    pub next: TypedExpr,
}

/// A registered memory read port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedSyncRead {
    /// Memory read.
    pub memory: MemoryId,
    /// Clock signal.
    pub clock: SignalId,
    /// Word address.
    pub addr: TypedExpr,
    /// Signal loaded on the edge.
    pub data: SignalId,
    /// Optional read enable.
    pub enable: Option<TypedExpr>,
    /// Same-edge collision behaviour.
    pub read_during_write: ReadDuringWrite,
}

/// A clocked memory write port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedWrite {
    /// Memory written.
    pub memory: MemoryId,
    /// Clock signal.
    pub clock: SignalId,
    /// Word address.
    pub addr: TypedExpr,
    /// Word written.
    pub data: TypedExpr,
    /// Write enable.
    pub enable: TypedExpr,
}

/// Shape and start-up contents of a memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Memory name.
    pub name: String,
    /// Number of words.
    pub depth: u32,
    /// Word width.
    pub width: u32,
    /// Start-up contents, exactly `depth` words.
    pub initial: Vec<u64>,
}

/// A flat module that passed every load-time check.
///
/// Immutable once built; backends keep it behind an `Arc` and never mutate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedModule {
    /// Module name.
    pub name: String,
    /// All signals of the flattened hierarchy.
    pub signals: Arena<SignalId, Signal>,
    /// All memories of the flattened hierarchy.
    pub memories: Arena<MemoryId, MemoryInfo>,
    /// Combinational steps in dependency order.
    pub comb: Vec<CombStep>,
    /// Registers in declaration order.
    pub registers: Vec<CheckedRegister>,
    /// Registered read ports in declaration order.
    pub sync_reads: Vec<CheckedSyncRead>,
    /// Write ports in declaration order; later ports win on collisions.
    pub writes: Vec<CheckedWrite>,
    /// Distinct clocks in first-use order.
    pub clocks: Vec<SignalId>,
    /// Hash of the flattened source module.
    pub fingerprint: ContentHash,
}

/// Flattens and checks a whole design.
pub fn check_design(design: &Design) -> Result<CheckedModule, IrError> {
    CheckedModule::new(&flatten(design)?)
}

impl CheckedModule {
    /// Checks a module that has no instances.
    ///
    /// Modules with instances must go through [`check_design`].
    pub fn new(module: &Module) -> Result<Self, IrError> {
        if !module.instances.is_empty() {
            return Err(IrError::Unflattened {
                module: module.name.clone(),
            });
        }
        check_references(module)?;
        check_structure(module)?;

        let typer = Typer { module };
        let mut steps = Vec::new();
        for assign in &module.assigns {
            let target = &module.signals[assign.target];
            let ctx = format!("assign to '{}'", target.name);
            let expr = typer.expect_width(&assign.expr, target.width, &ctx)?;
            steps.push(CombStep::Assign {
                target: assign.target,
                expr,
            });
        }

        let mut registers = Vec::new();
        for reg in &module.registers {
            let target = &module.signals[reg.target];
            let ctx = format!("register '{}'", target.name);
            typer.expect_bit_signal(reg.clock, &format!("{ctx} clock"))?;
            if let Some(reset) = reg.reset {
                typer.expect_bit_signal(reset.signal, &format!("{ctx} reset"))?;
            }
            if bits::mask(reg.reset_value, target.width) != reg.reset_value {
                return Err(IrError::LiteralOverflow {
                    module: module.name.clone(),
                    context: format!("{ctx} reset value"),
                    value: reg.reset_value,
                    width: target.width,
                });
            }
            let enable = match &reg.enable {
                Some(e) => Some(typer.expect_width(e, 1, &format!("{ctx} enable"))?),
                None => None,
            };
            registers.push(CheckedRegister {
                target: reg.target,
                clock: reg.clock,
                reset: reg.reset,
                reset_value: reg.reset_value,
                enable,
                next: typer.expect_width(&reg.next, target.width, &format!("{ctx} next"))?,
            });
        }

        let mut memories = Arena::new();
        let mut sync_reads = Vec::new();
        let mut writes = Vec::new();
        for (mem_id, mem) in module.memories.iter() {
            let ctx = format!("memory '{}'", mem.name);
            let mut initial = mem.initial.clone();
            initial.resize(mem.depth as usize, 0);
            memories.alloc(MemoryInfo {
                name: mem.name.clone(),
                depth: mem.depth,
                width: mem.width,
                initial,
            });
            for port in &mem.ports {
                match port {
                    MemoryPort::AsyncRead { addr, data } => {
                        typer.expect_signal_width(*data, mem.width, &format!("{ctx} read data"))?;
                        steps.push(CombStep::MemRead {
                            memory: mem_id,
                            addr: typer.infer(addr, &format!("{ctx} read address"))?,
                            data: *data,
                        });
                    }
                    MemoryPort::SyncRead {
                        clock,
                        addr,
                        data,
                        enable,
                        read_during_write,
                    } => {
                        typer.expect_bit_signal(*clock, &format!("{ctx} read clock"))?;
                        typer.expect_signal_width(*data, mem.width, &format!("{ctx} read data"))?;
                        let enable = match enable {
                            Some(e) => {
                                Some(typer.expect_width(e, 1, &format!("{ctx} read enable"))?)
                            }
                            None => None,
                        };
                        sync_reads.push(CheckedSyncRead {
                            memory: mem_id,
                            clock: *clock,
                            addr: typer.infer(addr, &format!("{ctx} read address"))?,
                            data: *data,
                            enable,
                            read_during_write: *read_during_write,
                        });
                    }
                    MemoryPort::Write {
                        clock,
                        addr,
                        data,
                        enable,
                    } => {
                        typer.expect_bit_signal(*clock, &format!("{ctx} write clock"))?;
                        writes.push(CheckedWrite {
                            memory: mem_id,
                            clock: *clock,
                            addr: typer.infer(addr, &format!("{ctx} write address"))?,
                            data: typer.expect_width(
                                data,
                                mem.width,
                                &format!("{ctx} write data"),
                            )?,
                            enable: typer.expect_width(
                                enable,
                                1,
                                &format!("{ctx} write enable"),
                            )?,
                        });
                    }
                }
            }
        }

        let comb = schedule(module, steps)?;
        let fingerprint =
            ContentHash::from_bytes(&serde_json::to_vec(module).unwrap_or_default());
        tracing::debug!(
            module = %module.name,
            comb = comb.len(),
            registers = registers.len(),
            "checked module"
        );

        Ok(Self {
            name: module.name.clone(),
            signals: module.signals.clone(),
            memories,
            comb,
            registers,
            sync_reads,
            writes,
            clocks: module.clocks(),
            fingerprint,
        })
    }

    /// Looks up a signal by name.
    pub fn find_signal(&self, name: &str) -> Option<SignalId> {
        self.signals.position(|s| s.name == name)
    }

    /// Looks up a memory by name.
    pub fn find_memory(&self, name: &str) -> Option<MemoryId> {
        self.memories.position(|m| m.name == name)
    }

    /// Signals of the given kind, in declaration order.
    pub fn signals_of_kind(&self, kind: SignalKind) -> Vec<SignalId> {
        self.signals
            .iter()
            .filter(|(_, s)| s.kind == kind)
            .map(|(id, _)| id)
            .collect()
    }

    /// Initial value of every signal: register reset values, zero elsewhere.
    pub fn initial_signals(&self) -> Vec<u64> {
        let mut values = vec![0; self.signals.len()];
        for reg in &self.registers {
            values[reg.target.as_raw() as usize] = reg.reset_value;
        }
        values
    }
}

struct Typer<'a> {
    module: &'a Module,
}

impl Typer<'_> {
    fn name(&self) -> String {
        self.module.name.clone()
    }

    fn mismatch(&self, ctx: &str, expected: u32, actual: u32) -> IrError {
        IrError::WidthMismatch {
            module: self.name(),
            context: ctx.to_string(),
            expected,
            actual,
        }
    }

    fn expect_width(&self, expr: &Expr, width: u32, ctx: &str) -> Result<TypedExpr, IrError> {
        let typed = self.infer(expr, ctx)?;
        if typed.width != width {
            return Err(self.mismatch(ctx, width, typed.width));
        }
        Ok(typed)
    }

    fn expect_signal_width(&self, id: SignalId, width: u32, ctx: &str) -> Result<(), IrError> {
        let actual = self.module.signals[id].width;
        if actual != width {
            return Err(self.mismatch(ctx, width, actual));
        }
        Ok(())
    }

    fn expect_bit_signal(&self, id: SignalId, ctx: &str) -> Result<(), IrError> {
        self.expect_signal_width(id, 1, ctx)
    }

    fn same_width(&self, a: &TypedExpr, b: &TypedExpr, ctx: &str) -> Result<(), IrError> {
        if a.width != b.width {
            return Err(self.mismatch(ctx, a.width, b.width));
        }
        Ok(())
    }

    fn check_result_width(&self, width: u32, ctx: &str) -> Result<(), IrError> {
        if bits::check_width(width).is_err() {
            return Err(IrError::UnsupportedWidth {
                module: self.name(),
                context: ctx.to_string(),
                width,
            });
        }
        Ok(())
    }

    fn infer(&self, expr: &Expr, ctx: &str) -> Result<TypedExpr, IrError> {
        let typed = match expr {
            Expr::Literal {
                value,
                width,
                signed,
            } => {
                self.check_result_width(*width, ctx)?;
                if bits::mask(*value, *width) != *value {
                    return Err(IrError::LiteralOverflow {
                        module: self.name(),
                        context: ctx.to_string(),
                        value: *value,
                        width: *width,
                    });
                }
                TypedExpr {
                    node: Node::Const(*value),
                    width: *width,
                    signed: *signed,
                }
            }
            Expr::Signal { id } => TypedExpr::signal(*id, &self.module.signals[*id]),
            Expr::Slice { expr, high, low } => {
                let inner = self.infer(expr, ctx)?;
                if low > high || *high >= inner.width {
                    return Err(IrError::SliceOutOfRange {
                        module: self.name(),
                        context: ctx.to_string(),
                        high: *high,
                        low: *low,
                        width: inner.width,
                    });
                }
                TypedExpr {
                    node: Node::Slice {
                        expr: Box::new(inner),
                        low: *low,
                    },
                    width: high - low + 1,
                    signed: false,
                }
            }
            Expr::Concat { parts } => {
                let parts = parts
                    .iter()
                    .map(|p| self.infer(p, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                let width = parts.iter().map(|p| p.width).sum();
                self.check_result_width(width, &format!("concatenation in {ctx}"))?;
                TypedExpr {
                    node: Node::Concat(parts),
                    width,
                    signed: false,
                }
            }
            Expr::Unary { op, operand } => {
                let operand = self.infer(operand, ctx)?;
                let (width, signed) = if op.is_reduction() {
                    (1, false)
                } else {
                    (operand.width, operand.signed)
                };
                TypedExpr {
                    node: Node::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    width,
                    signed,
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.infer(lhs, ctx)?;
                let rhs = self.infer(rhs, ctx)?;
                let (width, signed) = if op.is_shift() {
                    (lhs.width, lhs.signed)
                } else {
                    self.same_width(&lhs, &rhs, &format!("'{}' operands in {ctx}", op.symbol()))?;
                    if op.is_comparison() {
                        (1, false)
                    } else {
                        (lhs.width, lhs.signed && rhs.signed)
                    }
                };
                TypedExpr {
                    node: Node::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    width,
                    signed,
                }
            }
            Expr::Mux {
                cond,
                when_true,
                when_false,
            } => {
                let cond = self.infer(cond, ctx)?;
                if cond.width != 1 {
                    return Err(self.mismatch(&format!("mux condition in {ctx}"), 1, cond.width));
                }
                let t = self.infer(when_true, ctx)?;
                let f = self.infer(when_false, ctx)?;
                self.same_width(&t, &f, &format!("mux arms in {ctx}"))?;
                TypedExpr {
                    width: t.width,
                    signed: t.signed && f.signed,
                    node: Node::Mux {
                        cond: Box::new(cond),
                        when_true: Box::new(t),
                        when_false: Box::new(f),
                    },
                }
            }
            Expr::Case {
                selector,
                arms,
                default,
            } => {
                let selector = self.infer(selector, ctx)?;
                let default = self.infer(default, ctx)?;
                let mut signed = default.signed;
                let mut typed_arms = Vec::with_capacity(arms.len());
                for arm in arms {
                    if bits::mask(arm.value, selector.width) != arm.value {
                        return Err(IrError::LiteralOverflow {
                            module: self.name(),
                            context: format!("case arm in {ctx}"),
                            value: arm.value,
                            width: selector.width,
                        });
                    }
                    let e = self.infer(&arm.expr, ctx)?;
                    self.same_width(&default, &e, &format!("case arms in {ctx}"))?;
                    signed &= e.signed;
                    typed_arms.push((arm.value, e));
                }
                TypedExpr {
                    width: default.width,
                    signed,
                    node: Node::Case {
                        selector: Box::new(selector),
                        arms: typed_arms,
                        default: Box::new(default),
                    },
                }
            }
            Expr::Resize { expr, width } => {
                self.check_result_width(*width, &format!("resize in {ctx}"))?;
                let inner = self.infer(expr, ctx)?;
                let signed = inner.signed;
                TypedExpr {
                    node: Node::Resize(Box::new(inner)),
                    width: *width,
                    signed,
                }
            }
            Expr::Cast { expr, signed } => {
                let mut inner = self.infer(expr, ctx)?;
                inner.signed = *signed;
                inner
            }
        };
        Ok(typed)
    }
}

/// Orders combinational steps so every step runs after the steps driving its inputs.
///
/// Ties are broken by declaration order, so the schedule (and everything
/// generated from it) is stable across runs.
fn schedule(module: &Module, steps: Vec<CombStep>) -> Result<Vec<CombStep>, IrError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(steps.len(), steps.len());
    let nodes: Vec<NodeIndex> = (0..steps.len()).map(|i| graph.add_node(i)).collect();
    let driver: HashMap<SignalId, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.target(), i))
        .collect();
    for (i, step) in steps.iter().enumerate() {
        step.for_each_read(&mut |sig| {
            if let Some(&src) = driver.get(&sig) {
                graph.update_edge(nodes[src], nodes[i], ());
            }
        });
    }

    let mut indegree: Vec<usize> = nodes
        .iter()
        .map(|n| graph.neighbors_directed(*n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for next in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
            let j = graph[next];
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() < steps.len() {
        let mut on_loop = BTreeSet::new();
        for scc in tarjan_scc(&graph) {
            let cyclic = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
            if cyclic {
                for n in scc {
                    let target = steps[graph[n]].target();
                    on_loop.insert(module.signals[target].name.clone());
                }
            }
        }
        return Err(IrError::CombinationalLoop {
            module: module.name.clone(),
            signals: on_loop.into_iter().collect(),
        });
    }

    let mut slots: Vec<Option<CombStep>> = steps.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use crate::module::Register;

    #[test]
    fn schedules_out_of_order_assigns() {
        let mut b = ModuleBuilder::new("chain");
        let a = b.input("a", 4);
        let y = b.output("y", 4);
        let mid = b.wire("mid", 4);
        b.assign(y, Expr::sig(mid).add(Expr::lit(1, 4)));
        b.assign(mid, Expr::sig(a).not());
        let checked = CheckedModule::new(&b.finish()).unwrap();
        let targets: Vec<_> = checked.comb.iter().map(CombStep::target).collect();
        assert_eq!(targets, vec![mid, y]);
    }

    #[test]
    fn combinational_loop_names_signals() {
        let mut b = ModuleBuilder::new("ring");
        let a = b.input("a", 1);
        let x = b.wire("x", 1);
        let y = b.wire("y", 1);
        let z = b.output("z", 1);
        b.assign(x, Expr::sig(y).and(Expr::sig(a)));
        b.assign(y, Expr::sig(x).not());
        b.assign(z, Expr::sig(a));
        let err = CheckedModule::new(&b.finish()).unwrap_err();
        assert_eq!(
            err,
            IrError::CombinationalLoop {
                module: "ring".into(),
                signals: vec!["x".into(), "y".into()],
            }
        );
    }

    #[test]
    fn self_loop_detected() {
        let mut b = ModuleBuilder::new("latch");
        let x = b.wire("x", 1);
        b.assign(x, Expr::sig(x));
        let err = CheckedModule::new(&b.finish()).unwrap_err();
        assert!(matches!(err, IrError::CombinationalLoop { ref signals, .. } if signals == &["x"]));
    }

    #[test]
    fn register_feedback_is_not_a_loop() {
        let mut b = ModuleBuilder::new("counter");
        let clk = b.input("clk", 1);
        let q = b.output("q", 4);
        b.register(Register::new(q, clk, Expr::sig(q).add(Expr::lit(1, 4))));
        let checked = CheckedModule::new(&b.finish()).unwrap();
        assert_eq!(checked.clocks, vec![clk]);
        assert!(checked.comb.is_empty());
    }

    #[test]
    fn width_mismatch_on_assign() {
        let mut b = ModuleBuilder::new("alu");
        let a = b.input("a", 8);
        let sum = b.output("sum", 8);
        b.assign(sum, Expr::concat(vec![Expr::lit(0, 1), Expr::sig(a)]));
        let err = CheckedModule::new(&b.finish()).unwrap_err();
        assert_eq!(
            err,
            IrError::WidthMismatch {
                module: "alu".into(),
                context: "assign to 'sum'".into(),
                expected: 8,
                actual: 9,
            }
        );
    }

    #[test]
    fn operand_widths_must_agree() {
        let mut b = ModuleBuilder::new("alu");
        let a = b.input("a", 8);
        let c = b.input("c", 4);
        let y = b.output("y", 8);
        b.assign(y, Expr::sig(a).add(Expr::sig(c)));
        assert!(matches!(
            CheckedModule::new(&b.finish()),
            Err(IrError::WidthMismatch { expected: 8, actual: 4, .. })
        ));
    }

    #[test]
    fn literal_overflow_rejected() {
        let mut b = ModuleBuilder::new("m");
        let y = b.output("y", 4);
        b.assign(y, Expr::lit(16, 4));
        assert!(matches!(
            CheckedModule::new(&b.finish()),
            Err(IrError::LiteralOverflow { value: 16, .. })
        ));
    }

    #[test]
    fn slice_bounds_checked() {
        let mut b = ModuleBuilder::new("m");
        let a = b.input("a", 4);
        let y = b.output("y", 2);
        b.assign(y, Expr::sig(a).slice(4, 3));
        assert!(matches!(
            CheckedModule::new(&b.finish()),
            Err(IrError::SliceOutOfRange { high: 4, .. })
        ));
    }

    #[test]
    fn comparisons_and_reductions_are_one_bit() {
        let mut b = ModuleBuilder::new("m");
        let a = b.input("a", 8);
        let lt = b.output("lt", 1);
        let any = b.output("any", 1);
        b.assign(lt, Expr::sig(a).lt(Expr::lit(3, 8)));
        b.assign(any, Expr::sig(a).reduce_or());
        assert!(CheckedModule::new(&b.finish()).is_ok());
    }

    #[test]
    fn signedness_propagates() {
        let mut b = ModuleBuilder::new("m");
        let a = b.input("a", 8);
        b.set_signed(a);
        let y = b.output("y", 16);
        b.assign(y, Expr::sig(a).resize(16));
        let checked = CheckedModule::new(&b.finish()).unwrap();
        let CombStep::Assign { expr, .. } = &checked.comb[0] else {
            panic!("expected assign");
        };
        assert!(expr.signed);
        let Node::Resize(inner) = &expr.node else {
            panic!("expected resize");
        };
        assert!(inner.signed);
    }

    #[test]
    fn cast_overrides_signedness() {
        let mut b = ModuleBuilder::new("m");
        let a = b.input("a", 8);
        let c = b.input("c", 8);
        let y = b.output("y", 1);
        b.assign(y, Expr::sig(a).as_signed().lt(Expr::sig(c).as_signed()));
        let checked = CheckedModule::new(&b.finish()).unwrap();
        let CombStep::Assign { expr, .. } = &checked.comb[0] else {
            panic!("expected assign");
        };
        let Node::Binary { lhs, rhs, .. } = &expr.node else {
            panic!("expected binary");
        };
        assert!(TypedExpr::signed_compare(lhs, rhs));
    }

    #[test]
    fn clock_must_be_one_bit() {
        let mut b = ModuleBuilder::new("m");
        let clk = b.input("clk", 2);
        let q = b.output("q", 1);
        b.register(Register::new(q, clk, Expr::lit(0, 1)));
        assert!(matches!(
            CheckedModule::new(&b.finish()),
            Err(IrError::WidthMismatch { expected: 1, actual: 2, .. })
        ));
    }

    #[test]
    fn reset_value_must_fit() {
        let mut b = ModuleBuilder::new("m");
        let clk = b.input("clk", 1);
        let rst = b.input("rst", 1);
        let q = b.output("q", 2);
        b.register(Register::new(q, clk, Expr::sig(q)).with_sync_reset(rst, 4));
        assert!(matches!(
            CheckedModule::new(&b.finish()),
            Err(IrError::LiteralOverflow { value: 4, .. })
        ));
    }

    #[test]
    fn memory_ports_are_typed_and_scheduled() {
        let mut b = ModuleBuilder::new("ram");
        let clk = b.input("clk", 1);
        let addr = b.input("addr", 3);
        let din = b.input("din", 8);
        let we = b.input("we", 1);
        let dout = b.output("dout", 8);
        let doubled = b.output("doubled", 8);
        let mem = b.memory("mem", 8, 8);
        b.memory_init(mem, vec![7]);
        b.write_port(mem, clk, Expr::sig(addr), Expr::sig(din), Expr::sig(we));
        b.assign(doubled, Expr::sig(dout).add(Expr::sig(dout)));
        b.async_read(mem, Expr::sig(addr), dout);
        let checked = CheckedModule::new(&b.finish()).unwrap();
        assert_eq!(checked.writes.len(), 1);
        assert_eq!(checked.memories[mem].initial.len(), 8);
        assert_eq!(checked.memories[mem].initial[0], 7);
        let targets: Vec<_> = checked.comb.iter().map(CombStep::target).collect();
        assert_eq!(targets, vec![dout, doubled]);
    }

    #[test]
    fn initial_signals_use_reset_values() {
        let mut b = ModuleBuilder::new("m");
        let clk = b.input("clk", 1);
        let rst = b.input("rst", 1);
        let q = b.output("q", 4);
        b.register(Register::new(q, clk, Expr::sig(q)).with_sync_reset(rst, 9));
        let checked = CheckedModule::new(&b.finish()).unwrap();
        assert_eq!(checked.initial_signals(), vec![0, 0, 9]);
    }

    #[test]
    fn fingerprint_is_stable() {
        let build = || {
            let mut b = ModuleBuilder::new("m");
            let a = b.input("a", 4);
            let y = b.output("y", 4);
            b.assign(y, Expr::sig(a));
            CheckedModule::new(&b.finish()).unwrap()
        };
        assert_eq!(build().fingerprint, build().fingerprint);
    }
}
