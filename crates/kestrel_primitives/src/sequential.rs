//! Clocked primitives: counters, a timer and a ripple divider.

use kestrel_ir::{Expr, Module, ModuleBuilder, Register};

use crate::{check_width, error::invalid, PrimitiveError};

/// A loadable up-counter.
///
/// Inputs `clk`, `rst` (synchronous), `en`, `load` and `d`; outputs `q` and
/// `tc`, the terminal count, high while `en` is set and `q` is all ones.
/// `load` takes priority over counting and works without `en`.
pub fn counter(width: u32) -> Result<Module, PrimitiveError> {
    check_width("counter", width, 64)?;
    let mut m = ModuleBuilder::new("counter");
    let clk = m.input("clk", 1);
    let rst = m.input("rst", 1);
    let en = Expr::sig(m.input("en", 1));
    let load = Expr::sig(m.input("load", 1));
    let d = Expr::sig(m.input("d", width));
    let q = m.output("q", width);
    let tc = m.output("tc", 1);

    let count = Expr::sig(q).add(Expr::lit(1, width));
    m.register(
        Register::new(q, clk, Expr::mux(load.clone(), d, count))
            .with_enable(en.clone().or(load))
            .with_sync_reset(rst, 0),
    );
    let all_ones = Expr::sig(q).reduce_and();
    m.assign(tc, en.and(all_ones));
    Ok(m.finish())
}

/// Bits of the internal counter that [`timer`] taps, indexed by `tac[1:0]`.
///
/// They divide the enable rate by 1024, 16, 64 and 256.
pub const TIMER_TAPS: [u32; 4] = [9, 3, 5, 7];

/// A programmable timer.
///
/// A 16-bit system counter advances once per cycle with `ce` set; `div` is
/// its upper byte. `tac[1:0]` picks a tap from [`TIMER_TAPS`] and `tac[2]`
/// enables the timer. Each falling edge of the enabled tap increments
/// `tima`; when `tima` overflows it reloads from `tma` and `irq` pulses for
/// one cycle. `rst` clears everything synchronously.
pub fn timer() -> Result<Module, PrimitiveError> {
    let mut m = ModuleBuilder::new("timer");
    let clk = m.input("clk", 1);
    let rst = m.input("rst", 1);
    let ce = Expr::sig(m.input("ce", 1));
    let tac = Expr::sig(m.input("tac", 3));
    let tma = Expr::sig(m.input("tma", 8));
    let div = m.output("div", 8);
    let tima = m.output("tima", 8);
    let irq = m.output("irq", 1);
    let sys = m.wire("sys", 16);
    let prev = m.wire("prev", 1);

    m.register(
        Register::new(sys, clk, Expr::sig(sys).add(Expr::lit(1, 16)))
            .with_enable(ce)
            .with_sync_reset(rst, 0),
    );
    m.assign(div, Expr::sig(sys).slice(15, 8));

    let arms = TIMER_TAPS
        .iter()
        .enumerate()
        .map(|(sel, &bit)| (sel as u64, Expr::sig(sys).bit(bit)))
        .collect();
    let tap = m.node("tap", 1, Expr::case(tac.clone().slice(1, 0), arms, Expr::lit(0, 1)));
    let enabled = m.node("enabled_tap", 1, Expr::sig(tap).and(tac.bit(2)));
    m.register(Register::new(prev, clk, Expr::sig(enabled)).with_sync_reset(rst, 0));

    let falling = m.node(
        "falling",
        1,
        Expr::sig(prev).and(Expr::sig(enabled).not()),
    );
    let wrap = m.node(
        "wrap",
        1,
        Expr::sig(falling).and(Expr::sig(tima).eq(Expr::lit(0xFF, 8))),
    );
    m.register(
        Register::new(
            tima,
            clk,
            Expr::mux(
                Expr::sig(wrap),
                tma,
                Expr::sig(tima).add(Expr::lit(1, 8)),
            ),
        )
        .with_enable(Expr::sig(falling))
        .with_sync_reset(rst, 0),
    );
    m.register(Register::new(irq, clk, Expr::sig(wrap)).with_sync_reset(rst, 0));
    Ok(m.finish())
}

/// A ripple counter of toggle stages.
///
/// Stage 0 toggles on `clk`; each later stage toggles on the rising edge of
/// the previous stage's inverted output, so `q` counts up and bit `i`
/// divides the clock by `2^(i+1)`. `rst` clears all stages asynchronously.
pub fn ripple_divider(stages: u32) -> Result<Module, PrimitiveError> {
    if stages == 0 || stages > 16 {
        return Err(invalid(
            "ripple_divider",
            format!("{stages} stages is outside 1..=16"),
        ));
    }
    let mut m = ModuleBuilder::new("ripple_divider");
    let clk = m.input("clk", 1);
    let rst = m.input("rst", 1);
    let q = m.output("q", stages);

    let mut bits = Vec::with_capacity(stages as usize);
    let mut stage_clock = clk;
    for i in 0..stages {
        let bit = m.wire(&format!("s{i}"), 1);
        m.register(
            Register::new(bit, stage_clock, Expr::sig(bit).not()).with_async_reset(rst, 0),
        );
        stage_clock = m.node(&format!("s{i}_n"), 1, Expr::sig(bit).not());
        bits.push(Expr::sig(bit));
    }
    bits.reverse();
    m.assign(q, Expr::concat(bits));
    Ok(m.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ir::CheckedModule;
    use kestrel_sim::{interpreter, RunConfig, Simulator};
    use std::sync::Arc;

    fn checked(module: Module) -> Arc<CheckedModule> {
        Arc::new(CheckedModule::new(&module).unwrap())
    }

    #[test]
    fn counter_loads_counts_and_flags_terminal_count() {
        let mut sim = interpreter(checked(counter(4).unwrap()), RunConfig::default());
        sim.poke("en", 1).unwrap();
        sim.run_cycles(3).unwrap();
        assert_eq!(sim.peek("q").unwrap(), 3);

        sim.poke("load", 1).unwrap();
        sim.poke("d", 14).unwrap();
        sim.run_cycles(1).unwrap();
        sim.poke("load", 0).unwrap();
        sim.run_cycles(1).unwrap();
        assert_eq!(sim.peek("q").unwrap(), 15);
        assert_eq!(sim.peek("tc").unwrap(), 1);

        sim.run_cycles(1).unwrap();
        assert_eq!(sim.peek("q").unwrap(), 0);
        assert_eq!(sim.peek("tc").unwrap(), 0);

        sim.poke("en", 0).unwrap();
        sim.run_cycles(5).unwrap();
        assert_eq!(sim.peek("q").unwrap(), 0);
    }

    #[test]
    fn counter_reset_wins() {
        let mut sim = interpreter(checked(counter(8).unwrap()), RunConfig::default());
        sim.poke("en", 1).unwrap();
        sim.run_cycles(10).unwrap();
        sim.poke("rst", 1).unwrap();
        sim.poke("load", 1).unwrap();
        sim.poke("d", 99).unwrap();
        sim.run_cycles(1).unwrap();
        assert_eq!(sim.peek("q").unwrap(), 0);
    }

    #[test]
    fn fastest_timer_tap_counts_every_sixteen() {
        let mut sim = interpreter(checked(timer().unwrap()), RunConfig::default());
        sim.poke("ce", 1).unwrap();
        sim.poke("tac", 0b101).unwrap();
        sim.run_cycles(16 * 10 + 1).unwrap();
        assert_eq!(sim.peek("tima").unwrap(), 10);
        assert_eq!(sim.peek("div").unwrap(), 0);
    }

    #[test]
    fn timer_overflow_reloads_and_interrupts() {
        let mut sim = interpreter(checked(timer().unwrap()), RunConfig::default());
        sim.poke("ce", 1).unwrap();
        sim.poke("tac", 0b101).unwrap();
        sim.poke("tma", 0xF0).unwrap();
        let mut irqs = 0;
        let mut reloaded = false;
        for _ in 0..(256 * 16 + 1) {
            sim.run_cycles(1).unwrap();
            irqs += sim.peek("irq").unwrap();
            if sim.peek("irq").unwrap() == 1 {
                reloaded = sim.peek("tima").unwrap() == 0xF0;
            }
        }
        assert_eq!(irqs, 1);
        assert!(reloaded);
    }

    #[test]
    fn disabled_timer_holds() {
        let mut sim = interpreter(checked(timer().unwrap()), RunConfig::default());
        sim.poke("ce", 1).unwrap();
        sim.poke("tac", 0b001).unwrap();
        sim.run_cycles(1000).unwrap();
        assert_eq!(sim.peek("tima").unwrap(), 0);
        assert_eq!(sim.peek("div").unwrap(), 1000 / 256);
    }

    #[test]
    fn ripple_divider_counts_up() {
        let mut sim = interpreter(checked(ripple_divider(4).unwrap()), RunConfig::default());
        for n in 1..=20u64 {
            sim.run_cycles(1).unwrap();
            assert_eq!(sim.peek("q").unwrap(), n % 16, "after {n} cycles");
        }
        sim.poke("rst", 1).unwrap();
        sim.evaluate();
        assert_eq!(sim.peek("q").unwrap(), 0);
    }

    #[test]
    fn stage_counts_are_checked() {
        assert!(ripple_divider(0).is_err());
        assert!(ripple_divider(17).is_err());
        assert!(counter(65).is_err());
    }
}
