//! Behavioural rules of the shared two-phase kernel, exercised through the interpreter.

use std::sync::Arc;

use kestrel_ir::{
    CheckedModule, Design, Expr, IrError, Module, ModuleBuilder, ReadDuringWrite, Register,
};
use kestrel_sim::{
    interpreter, BackendKind, Interpreter, Kernel, RunConfig, SimBuilder, SimError, SimOptions,
    Simulator,
};

fn sim(module: Module) -> Kernel<Interpreter> {
    sim_with(module, RunConfig::default())
}

fn sim_with(module: Module, run: RunConfig) -> Kernel<Interpreter> {
    interpreter(Arc::new(CheckedModule::new(&module).unwrap()), run)
}

fn counter(width: u32) -> ModuleBuilder {
    let mut b = ModuleBuilder::new("counter");
    let clk = b.input("clk", 1);
    let q = b.output("q", width);
    b.register(Register::new(q, clk, Expr::sig(q).add(Expr::lit(1, width))));
    b
}

#[test]
fn evaluate_is_idempotent() {
    let mut b = ModuleBuilder::new("alu");
    let a = b.input("a", 8);
    let c = b.input("b", 8);
    let sum = b.node("sum", 8, Expr::sig(a).add(Expr::sig(c)));
    let prod = b.node("prod", 8, Expr::sig(sum).mul(Expr::sig(c)));
    let y = b.output("y", 8);
    b.assign(y, Expr::sig(prod).xor(Expr::sig(a)));
    let mut s = sim(b.finish());

    s.poke("a", 13).unwrap();
    s.poke("b", 200).unwrap();
    s.evaluate();
    let first: Vec<u64> = s.signals().to_vec();
    s.evaluate();
    s.evaluate();
    assert_eq!(s.signals(), first.as_slice());
    assert_eq!(s.peek("y").unwrap(), (((13u64 + 200) * 200) & 0xFF) ^ 13);
}

#[test]
fn registers_only_move_on_rising_edges() {
    let mut s = sim(counter(8).finish());
    for _ in 0..3 {
        s.poke("clk", 0).unwrap();
        s.evaluate();
        s.tick();
    }
    assert_eq!(s.peek("q").unwrap(), 0);

    s.poke("clk", 1).unwrap();
    s.evaluate();
    s.tick();
    s.tick();
    s.evaluate();
    s.tick();
    assert_eq!(s.peek("q").unwrap(), 1);
}

#[test]
fn sync_reset_overrides_enable() {
    let mut b = ModuleBuilder::new("gated");
    let clk = b.input("clk", 1);
    let en = b.input("en", 1);
    let rst = b.input("rst", 1);
    let q = b.output("q", 4);
    b.register(
        Register::new(q, clk, Expr::sig(q).add(Expr::lit(1, 4)))
            .with_enable(Expr::sig(en))
            .with_sync_reset(rst, 9),
    );
    let mut s = sim(b.finish());
    assert_eq!(s.peek("q").unwrap(), 9);

    s.run_cycles(3).unwrap();
    assert_eq!(s.peek("q").unwrap(), 9);

    s.poke("en", 1).unwrap();
    s.run_cycles(3).unwrap();
    assert_eq!(s.peek("q").unwrap(), 12);

    s.poke("en", 0).unwrap();
    s.poke("rst", 1).unwrap();
    assert_eq!(s.peek("q").unwrap(), 12);
    s.run_cycles(1).unwrap();
    assert_eq!(s.peek("q").unwrap(), 9);
}

#[test]
fn async_reset_applies_without_a_clock() {
    let mut b = ModuleBuilder::new("counter");
    let clk = b.input("clk", 1);
    let rst = b.input("rst", 1);
    let q = b.output("q", 4);
    b.register(
        Register::new(q, clk, Expr::sig(q).add(Expr::lit(1, 4))).with_async_reset(rst, 0),
    );
    let mut s = sim(b.finish());

    s.run_cycles(5).unwrap();
    assert_eq!(s.peek("q").unwrap(), 5);

    s.poke("rst", 1).unwrap();
    s.evaluate();
    assert_eq!(s.peek("q").unwrap(), 0);

    s.run_cycles(2).unwrap();
    assert_eq!(s.peek("q").unwrap(), 0);

    s.poke("rst", 0).unwrap();
    s.run_cycles(2).unwrap();
    assert_eq!(s.peek("q").unwrap(), 2);
}

fn ram(policy: ReadDuringWrite) -> Module {
    let mut b = ModuleBuilder::new("ram");
    let clk = b.input("clk", 1);
    let we = b.input("we", 1);
    let addr = b.input("addr", 3);
    let din = b.input("din", 8);
    let dout = b.output("dout", 8);
    let peek = b.output("peek", 8);
    let mem = b.memory("mem", 6, 8);
    b.memory_init(mem, vec![10, 11, 12, 13, 14, 15]);
    b.sync_read(mem, clk, Expr::sig(addr), dout, None, policy);
    b.async_read(mem, Expr::sig(addr), peek);
    b.write_port(mem, clk, Expr::sig(addr), Expr::sig(din), Expr::sig(we));
    b.finish()
}

fn write(s: &mut impl Simulator, addr: u64, data: u64) {
    s.poke("we", 1).unwrap();
    s.poke("addr", addr).unwrap();
    s.poke("din", data).unwrap();
    s.run_cycles(1).unwrap();
    s.poke("we", 0).unwrap();
}

#[test]
fn write_first_read_returns_new_data() {
    let mut s = sim(ram(ReadDuringWrite::WriteFirst));
    write(&mut s, 2, 0x55);
    assert_eq!(s.peek("dout").unwrap(), 0x55);
    assert_eq!(s.read_memory("mem", 2).unwrap(), 0x55);
}

#[test]
fn read_first_read_returns_old_data() {
    let mut s = sim(ram(ReadDuringWrite::ReadFirst));
    write(&mut s, 2, 0x55);
    assert_eq!(s.peek("dout").unwrap(), 12);
    s.run_cycles(1).unwrap();
    assert_eq!(s.peek("dout").unwrap(), 0x55);
}

#[test]
fn async_read_sees_write_after_commit() {
    let mut s = sim(ram(ReadDuringWrite::WriteFirst));
    s.poke("addr", 4).unwrap();
    s.evaluate();
    assert_eq!(s.peek("peek").unwrap(), 14);
    write(&mut s, 4, 0xAA);
    assert_eq!(s.peek("peek").unwrap(), 0xAA);
}

#[test]
fn out_of_range_accesses_are_harmless() {
    let mut s = sim(ram(ReadDuringWrite::WriteFirst));
    write(&mut s, 7, 0x99);
    assert_eq!(s.peek("dout").unwrap(), 0);
    assert_eq!(s.peek("peek").unwrap(), 0);
    let words = s.read_memory_range("mem", 0, 6).unwrap();
    assert_eq!(words, vec![10, 11, 12, 13, 14, 15]);
    assert!(matches!(
        s.read_memory("mem", 6),
        Err(SimError::MemoryRange { depth: 6, .. })
    ));
    assert!(matches!(
        s.write_memory("mem", 100, 1),
        Err(SimError::MemoryRange { .. })
    ));
}

#[test]
fn later_write_port_wins() {
    let mut b = ModuleBuilder::new("dual");
    let clk = b.input("clk", 1);
    let mem = b.memory("mem", 4, 8);
    b.write_port(mem, clk, Expr::lit(1, 2), Expr::lit(0x11, 8), Expr::lit(1, 1));
    b.write_port(mem, clk, Expr::lit(1, 2), Expr::lit(0x22, 8), Expr::lit(1, 1));
    let mut s = sim(b.finish());
    s.run_cycles(1).unwrap();
    assert_eq!(s.read_memory("mem", 1).unwrap(), 0x22);
}

#[test]
fn read_enable_holds_data() {
    let mut b = ModuleBuilder::new("rom");
    let clk = b.input("clk", 1);
    let en = b.input("en", 1);
    let addr = b.input("addr", 2);
    let dout = b.output("dout", 8);
    let mem = b.memory("mem", 4, 8);
    b.memory_init(mem, vec![5, 6, 7, 8]);
    b.sync_read(
        mem,
        clk,
        Expr::sig(addr),
        dout,
        Some(Expr::sig(en)),
        ReadDuringWrite::default(),
    );
    let mut s = sim(b.finish());

    s.poke("en", 1).unwrap();
    s.poke("addr", 3).unwrap();
    s.run_cycles(1).unwrap();
    assert_eq!(s.peek("dout").unwrap(), 8);

    s.poke("en", 0).unwrap();
    s.poke("addr", 0).unwrap();
    s.run_cycles(2).unwrap();
    assert_eq!(s.peek("dout").unwrap(), 8);
}

#[test]
fn derived_clock_ripples_within_one_tick() {
    let mut b = ModuleBuilder::new("ripple");
    let clk = b.input("clk", 1);
    let q0 = b.output("q0", 1);
    let q1 = b.output("q1", 1);
    b.register(Register::new(q0, clk, Expr::sig(q0).not()));
    b.register(Register::new(q1, q0, Expr::sig(q1).not()));
    let mut s = sim(b.finish());

    let mut seen = Vec::new();
    for _ in 0..8 {
        s.run_cycles(1).unwrap();
        seen.push((s.peek("q1").unwrap() << 1) | s.peek("q0").unwrap());
    }
    assert_eq!(seen, vec![3, 2, 1, 0, 3, 2, 1, 0]);
}

#[test]
fn halt_stops_the_run() {
    let mut b = counter(8);
    let q = b.module().find_signal("q").unwrap();
    let done = b.output("done", 1);
    b.assign(done, Expr::sig(q).eq(Expr::lit(5, 8)));
    let mut s = sim_with(b.finish(), RunConfig::default().with_halt("done"));

    let summary = s.run_cycles(100).unwrap();
    assert!(summary.halted);
    assert_eq!(summary.cycles_run, 5);
    assert_eq!(s.peek("q").unwrap(), 5);
}

#[test]
fn events_count_rising_transitions() {
    let mut b = counter(3);
    let q = b.module().find_signal("q").unwrap();
    let wrap = b.output("wrap", 1);
    b.assign(wrap, Expr::sig(q).eq(Expr::lit(7, 3)));
    let mut s = sim_with(b.finish(), RunConfig::default().with_event("wrap"));

    let summary = s.run_cycles(16).unwrap();
    assert!(!summary.halted);
    assert_eq!(summary.cycles_run, 16);
    assert_eq!(summary.events["wrap"], 2);
}

#[test]
fn zero_cycles_is_a_no_op() {
    let mut s = sim(counter(8).finish());
    let summary = s.run_cycles(0).unwrap();
    assert_eq!(summary.cycles_run, 0);
    assert_eq!(s.peek("q").unwrap(), 0);
}

#[test]
fn run_needs_a_clock() {
    let mut b = ModuleBuilder::new("comb");
    let a = b.input("a", 4);
    let y = b.output("y", 4);
    b.assign(y, Expr::sig(a).not());
    let mut s = sim(b.finish());
    assert!(matches!(
        s.run_cycles(1),
        Err(SimError::NoClock { name }) if name == "clk"
    ));
}

#[test]
fn unknown_halt_signal_is_reported_before_running() {
    let mut s = sim_with(counter(8).finish(), RunConfig::default().with_halt("stop"));
    assert!(matches!(
        s.run_cycles(10),
        Err(SimError::NoSuchSignal { name }) if name == "stop"
    ));
    assert_eq!(s.peek("q").unwrap(), 0);
}

#[test]
fn hook_runs_in_the_low_phase() {
    let mut b = counter(8);
    let clk = b.module().find_signal("clk").unwrap();
    let data = b.input("data", 8);
    let acc = b.output("acc", 8);
    b.register(Register::new(acc, clk, Expr::sig(acc).add(Expr::sig(data))));
    let mut s = sim(b.finish());

    let mut feed = |cycle: u64, sim: &mut dyn Simulator| -> Result<(), SimError> {
        assert_eq!(sim.peek("clk")?, 0);
        assert_eq!(sim.peek("q")?, cycle);
        sim.poke("data", cycle + 1)
    };
    s.run_cycles_with(4, &mut feed).unwrap();
    assert_eq!(s.peek("acc").unwrap(), 1 + 2 + 3 + 4);
}

#[test]
fn combinational_loop_is_rejected_at_load() {
    let mut b = ModuleBuilder::new("ring");
    let a = b.wire("a", 1);
    let c = b.wire("c", 1);
    b.assign(a, Expr::sig(c).not());
    b.assign(c, Expr::sig(a));
    let builder = SimBuilder::new(SimOptions::new(BackendKind::Interpreter));
    let result = builder.build_design(&Design::single(b.finish()));
    assert!(matches!(
        result.err(),
        Some(SimError::Load(IrError::CombinationalLoop { .. }))
    ));
}
