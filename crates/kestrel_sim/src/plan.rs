//! Sequential work derived from a checked module.
//!
//! Every value a clock edge consumes is captured by `sample` into a numbered
//! slot before any state changes. Register next-state expressions get their
//! clock enable and reset folded in, so committing a register is a plain
//! copy from its slot.

use kestrel_ir::{CheckedModule, MemoryId, Node, ReadDuringWrite, ResetKind, SignalId, TypedExpr};

/// A register update: `target = samples[slot]` on an edge of `clock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterCommit {
    /// State signal.
    pub target: SignalId,
    /// Index into [`SimPlan::clocks`].
    pub clock: usize,
    /// Sample slot holding the next value.
    pub slot: usize,
}

/// A synchronous read port update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCommit {
    /// Memory read.
    pub memory: MemoryId,
    /// Index into [`SimPlan::clocks`].
    pub clock: usize,
    /// Signal loaded with the word.
    pub data: SignalId,
    /// Slot holding the address.
    pub addr: usize,
    /// Slot holding the read enable, if any.
    pub enable: Option<usize>,
    /// Whether a same-edge write to the same address is returned.
    pub write_first: bool,
}

/// A write port update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCommit {
    /// Memory written.
    pub memory: MemoryId,
    /// Index into [`SimPlan::clocks`].
    pub clock: usize,
    /// Slot holding the address.
    pub addr: usize,
    /// Slot holding the data word.
    pub data: usize,
    /// Slot holding the write enable.
    pub enable: usize,
}

/// A register forced to `value` while `reset` is high.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncReset {
    /// The 1-bit reset signal.
    pub reset: SignalId,
    /// The register.
    pub target: SignalId,
    /// Forced value.
    pub value: u64,
}

/// Slots and commit actions for one module.
#[derive(Debug, Clone, Default)]
pub struct SimPlan {
    /// Expressions captured by `sample`, in slot order.
    pub slots: Vec<TypedExpr>,
    /// Register updates in declaration order.
    pub registers: Vec<RegisterCommit>,
    /// Sync read updates in declaration order.
    pub sync_reads: Vec<ReadCommit>,
    /// Write updates in declaration order; later entries win collisions.
    pub writes: Vec<WriteCommit>,
    /// Asynchronous resets applied during `evaluate`.
    pub async_resets: Vec<AsyncReset>,
    /// Every clock signal.
    pub clocks: Vec<SignalId>,
}

impl SimPlan {
    /// Builds the plan for `module`.
    pub fn new(module: &CheckedModule) -> Self {
        let mut plan = SimPlan {
            clocks: module.clocks.clone(),
            ..SimPlan::default()
        };

        for reg in &module.registers {
            let signal = &module.signals[reg.target];
            let q = TypedExpr::signal(reg.target, signal);
            let mut next = reg.next.clone();
            if let Some(enable) = &reg.enable {
                next = mux(enable.clone(), next, q);
            }
            if let Some(reset) = reg.reset {
                let level = TypedExpr::signal(reset.signal, &module.signals[reset.signal]);
                let value = TypedExpr::constant(reg.reset_value, signal.width);
                next = mux(level, value, next);
                if reset.kind == ResetKind::Async {
                    plan.async_resets.push(AsyncReset {
                        reset: reset.signal,
                        target: reg.target,
                        value: reg.reset_value,
                    });
                }
            }
            let clock = plan.clock_index(reg.clock);
            let slot = plan.slot(next);
            plan.registers.push(RegisterCommit {
                target: reg.target,
                clock,
                slot,
            });
        }

        for read in &module.sync_reads {
            let clock = plan.clock_index(read.clock);
            let addr = plan.slot(read.addr.clone());
            let enable = read.enable.clone().map(|e| plan.slot(e));
            plan.sync_reads.push(ReadCommit {
                memory: read.memory,
                clock,
                data: read.data,
                addr,
                enable,
                write_first: read.read_during_write == ReadDuringWrite::WriteFirst,
            });
        }

        for write in &module.writes {
            let clock = plan.clock_index(write.clock);
            let addr = plan.slot(write.addr.clone());
            let data = plan.slot(write.data.clone());
            let enable = plan.slot(write.enable.clone());
            plan.writes.push(WriteCommit {
                memory: write.memory,
                clock,
                addr,
                data,
                enable,
            });
        }

        tracing::debug!(
            module = %module.name,
            slots = plan.slots.len(),
            clocks = plan.clocks.len(),
            "built simulation plan"
        );
        plan
    }

    fn slot(&mut self, expr: TypedExpr) -> usize {
        self.slots.push(expr);
        self.slots.len() - 1
    }

    fn clock_index(&mut self, clock: SignalId) -> usize {
        match self.clocks.iter().position(|c| *c == clock) {
            Some(index) => index,
            None => {
                self.clocks.push(clock);
                self.clocks.len() - 1
            }
        }
    }
}

fn mux(cond: TypedExpr, when_true: TypedExpr, when_false: TypedExpr) -> TypedExpr {
    TypedExpr {
        width: when_true.width,
        signed: when_true.signed,
        node: Node::Mux {
            cond: Box::new(cond),
            when_true: Box::new(when_true),
            when_false: Box::new(when_false),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ir::{CheckedModule, Expr, ModuleBuilder, ReadDuringWrite, Register};

    #[test]
    fn enable_and_reset_fold_into_one_slot() {
        let mut b = ModuleBuilder::new("r");
        let clk = b.input("clk", 1);
        let rst = b.input("rst", 1);
        let en = b.input("en", 1);
        let d = b.input("d", 4);
        let q = b.output("q", 4);
        b.register(
            Register::new(q, clk, Expr::sig(d))
                .with_enable(Expr::sig(en))
                .with_sync_reset(rst, 9),
        );
        let checked = CheckedModule::new(&b.finish()).unwrap();
        let plan = SimPlan::new(&checked);
        assert_eq!(plan.slots.len(), 1);
        assert!(plan.async_resets.is_empty());
        assert!(matches!(plan.slots[0].node, Node::Mux { .. }));
        assert_eq!(plan.registers[0].clock, 0);
    }

    #[test]
    fn async_reset_is_recorded() {
        let mut b = ModuleBuilder::new("r");
        let clk = b.input("clk", 1);
        let rst = b.input("rst", 1);
        let q = b.output("q", 2);
        b.register(
            Register::new(q, clk, Expr::sig(q).add(Expr::lit(1, 2))).with_async_reset(rst, 3),
        );
        let checked = CheckedModule::new(&b.finish()).unwrap();
        let plan = SimPlan::new(&checked);
        assert_eq!(
            plan.async_resets,
            vec![AsyncReset {
                reset: rst,
                target: q,
                value: 3
            }]
        );
    }

    #[test]
    fn memory_ports_take_slots_in_order() {
        let mut b = ModuleBuilder::new("m");
        let clk = b.input("clk", 1);
        let we = b.input("we", 1);
        let addr = b.input("addr", 2);
        let din = b.input("din", 8);
        let dout = b.output("dout", 8);
        let mem = b.memory("mem", 4, 8);
        b.sync_read(mem, clk, Expr::sig(addr), dout, None, ReadDuringWrite::ReadFirst);
        b.write_port(mem, clk, Expr::sig(addr), Expr::sig(din), Expr::sig(we));
        let checked = CheckedModule::new(&b.finish()).unwrap();
        let plan = SimPlan::new(&checked);
        assert_eq!(plan.slots.len(), 4);
        assert!(!plan.sync_reads[0].write_first);
        assert_eq!(plan.sync_reads[0].enable, None);
        assert_eq!(plan.writes[0].addr, 1);
        assert_eq!(plan.writes[0].enable, 3);
    }
}
