use kestrel_ir::interchange::{from_json, to_json};
use kestrel_ir::{
    check_design, CheckedModule, CombStep, DesignBuilder, Expr, IrError, ModuleBuilder, Register,
    SignalKind,
};

fn half_adder() -> kestrel_ir::Module {
    let mut b = ModuleBuilder::new("half_adder");
    let a = b.input("a", 1);
    let c = b.input("b", 1);
    let s = b.output("s", 1);
    let co = b.output("co", 1);
    b.assign(s, Expr::sig(a).xor(Expr::sig(c)));
    b.assign(co, Expr::sig(a).and(Expr::sig(c)));
    b.finish()
}

fn accumulator_design() -> kestrel_ir::Design {
    let mut d = DesignBuilder::new();
    let ha = d.add(half_adder());
    let mut top = ModuleBuilder::new("acc");
    let clk = top.input("clk", 1);
    let din = top.input("din", 1);
    let q = top.output("q", 1);
    let carry = top.output("carry", 1);
    let sum = top.wire("sum", 1);
    top.instance("ha", ha, &[("a", q), ("b", din), ("s", sum), ("co", carry)]);
    top.register(Register::new(q, clk, Expr::sig(sum)));
    let top_id = d.add(top.finish());
    d.finish(top_id)
}

#[test]
fn checked_hierarchy_keeps_top_ports() {
    let checked = check_design(&accumulator_design()).unwrap();
    assert_eq!(checked.name, "acc");
    let names: Vec<_> = checked
        .signals_of_kind(SignalKind::Input)
        .into_iter()
        .map(|id| checked.signals[id].name.clone())
        .collect();
    assert_eq!(names, vec!["clk", "din"]);
    assert!(checked.find_signal("ha.s").is_some());
    assert_eq!(checked.registers.len(), 1);
}

#[test]
fn binding_assigns_precede_their_readers() {
    let checked = check_design(&accumulator_design()).unwrap();
    let position = |name: &str| {
        let id = checked.find_signal(name).unwrap();
        checked
            .comb
            .iter()
            .position(|step| step.target() == id)
            .unwrap()
    };
    assert!(position("ha.a") < position("ha.s"));
    assert!(position("ha.s") < position("sum"));
    assert!(position("ha.co") < position("carry"));
}

#[test]
fn loop_through_instance_detected() {
    let mut d = DesignBuilder::new();
    let ha = d.add(half_adder());
    let mut top = ModuleBuilder::new("bad");
    let x = top.input("x", 1);
    let fb = top.wire("fb", 1);
    let co = top.output("co", 1);
    top.instance("ha", ha, &[("a", x), ("b", fb), ("s", fb), ("co", co)]);
    let top_id = d.add(top.finish());
    let err = check_design(&d.finish(top_id)).unwrap_err();
    match err {
        IrError::CombinationalLoop { module, signals } => {
            assert_eq!(module, "bad");
            assert_eq!(signals, vec!["fb", "ha.b", "ha.s"]);
        }
        other => panic!("expected a combinational loop, got {other}"),
    }
}

#[test]
fn unflattened_module_is_rejected() {
    let design = accumulator_design();
    let err = CheckedModule::new(design.top_module()).unwrap_err();
    assert_eq!(
        err,
        IrError::Unflattened {
            module: "acc".into()
        }
    );
}

#[test]
fn json_document_checks_identically() {
    let design = accumulator_design();
    let restored = from_json(&to_json(&design).unwrap()).unwrap();
    let a = check_design(&design).unwrap();
    let b = check_design(&restored).unwrap();
    assert_eq!(a.fingerprint, b.fingerprint);
    assert_eq!(a.comb.len(), b.comb.len());
    assert!(b
        .comb
        .iter()
        .all(|step| matches!(step, CombStep::Assign { .. })));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn literals_are_accepted_only_when_they_fit(width in 1u32..=16, value in 0u64..70_000) {
            let mut b = ModuleBuilder::new("lit");
            let y = b.output("y", width);
            b.assign(y, Expr::lit(value, width));
            let fits = value < (1u64 << width);
            let checked = CheckedModule::new(&b.finish());
            prop_assert_eq!(checked.is_ok(), fits);
            if !fits {
                let is_overflow = matches!(checked, Err(IrError::LiteralOverflow { .. }));
                prop_assert!(is_overflow);
            }
        }

        #[test]
        fn every_signal_on_a_loop_is_named(len in 1usize..8) {
            let mut b = ModuleBuilder::new("ring");
            let a = b.input("a", 1);
            let y = b.output("y", 1);
            let wires: Vec<_> = (0..len).map(|i| b.wire(&format!("w{i}"), 1)).collect();
            for i in 0..len {
                let prev = wires[(i + len - 1) % len];
                b.assign(wires[i], Expr::sig(prev));
            }
            b.assign(y, Expr::sig(wires[0]).xor(Expr::sig(a)));
            match CheckedModule::new(&b.finish()) {
                Err(IrError::CombinationalLoop { module, signals }) => {
                    let mut expected: Vec<String> = (0..len).map(|i| format!("w{i}")).collect();
                    expected.sort();
                    prop_assert_eq!(module, "ring");
                    prop_assert_eq!(signals, expected);
                }
                other => prop_assert!(false, "expected a loop, got {:?}", other.err()),
            }
        }
    }
}
