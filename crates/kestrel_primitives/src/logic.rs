//! Combinational building blocks.

use kestrel_ir::{Expr, Module, ModuleBuilder};

use crate::{addr_width, check_width, error::invalid, PrimitiveError};

/// Every two-input bitwise function of `a` and `b`, plus `not_a`.
///
/// Outputs: `and_y`, `or_y`, `xor_y`, `nand_y`, `nor_y`, `xnor_y`, `not_a`.
pub fn gates(width: u32) -> Result<Module, PrimitiveError> {
    check_width("gates", width, 64)?;
    let mut m = ModuleBuilder::new("gates");
    let a = Expr::sig(m.input("a", width));
    let b = Expr::sig(m.input("b", width));
    let outputs = [
        ("and_y", a.clone().and(b.clone())),
        ("or_y", a.clone().or(b.clone())),
        ("xor_y", a.clone().xor(b.clone())),
        ("nand_y", a.clone().and(b.clone()).not()),
        ("nor_y", a.clone().or(b.clone()).not()),
        ("xnor_y", a.clone().xor(b).not()),
        ("not_a", a.not()),
    ];
    for (name, expr) in outputs {
        let y = m.output(name, width);
        m.assign(y, expr);
    }
    Ok(m.finish())
}

/// A `ways`-input multiplexer: `y = d{sel}`, zero for an unused select value.
pub fn mux(ways: u32, width: u32) -> Result<Module, PrimitiveError> {
    check_width("mux", width, 64)?;
    if ways < 2 {
        return Err(invalid("mux", format!("needs at least 2 inputs, got {ways}")));
    }
    let mut m = ModuleBuilder::new(format!("mux{ways}"));
    let inputs: Vec<Expr> = (0..ways)
        .map(|i| Expr::sig(m.input(&format!("d{i}"), width)))
        .collect();
    let sel = Expr::sig(m.input("sel", addr_width(ways)));
    let y = m.output("y", width);
    let expr = if ways == 2 {
        Expr::mux(sel, inputs[1].clone(), inputs[0].clone())
    } else {
        let arms = inputs
            .into_iter()
            .enumerate()
            .map(|(i, d)| (i as u64, d))
            .collect();
        Expr::case(sel, arms, Expr::lit(0, width))
    };
    m.assign(y, expr);
    Ok(m.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ir::CheckedModule;
    use kestrel_sim::{interpreter, RunConfig, Simulator};
    use std::sync::Arc;

    #[test]
    fn gates_compute_every_function() {
        let module = Arc::new(CheckedModule::new(&gates(4).unwrap()).unwrap());
        let mut sim = interpreter(module, RunConfig::default());
        sim.poke("a", 0b1100).unwrap();
        sim.poke("b", 0b1010).unwrap();
        sim.evaluate();
        assert_eq!(sim.peek("and_y").unwrap(), 0b1000);
        assert_eq!(sim.peek("or_y").unwrap(), 0b1110);
        assert_eq!(sim.peek("xor_y").unwrap(), 0b0110);
        assert_eq!(sim.peek("nand_y").unwrap(), 0b0111);
        assert_eq!(sim.peek("nor_y").unwrap(), 0b0001);
        assert_eq!(sim.peek("xnor_y").unwrap(), 0b1001);
        assert_eq!(sim.peek("not_a").unwrap(), 0b0011);
    }

    #[test]
    fn mux_selects_and_defaults_to_zero() {
        let module = Arc::new(CheckedModule::new(&mux(3, 8).unwrap()).unwrap());
        let mut sim = interpreter(module, RunConfig::default());
        for (i, v) in [11, 22, 33].into_iter().enumerate() {
            sim.poke(&format!("d{i}"), v).unwrap();
        }
        for (sel, expected) in [(0, 11), (1, 22), (2, 33), (3, 0)] {
            sim.poke("sel", sel).unwrap();
            sim.evaluate();
            assert_eq!(sim.peek("y").unwrap(), expected);
        }
    }

    #[test]
    fn two_way_mux_uses_the_select_bit() {
        let module = Arc::new(CheckedModule::new(&mux(2, 1).unwrap()).unwrap());
        let mut sim = interpreter(module, RunConfig::default());
        sim.poke("d1", 1).unwrap();
        sim.evaluate();
        assert_eq!(sim.peek("y").unwrap(), 0);
        sim.poke("sel", 1).unwrap();
        sim.evaluate();
        assert_eq!(sim.peek("y").unwrap(), 1);
    }

    #[test]
    fn degenerate_mux_is_rejected() {
        assert!(mux(1, 8).is_err());
        assert!(gates(0).is_err());
    }
}
