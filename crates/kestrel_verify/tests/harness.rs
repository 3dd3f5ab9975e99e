//! End-to-end validation runs over the primitive library.

use std::sync::Arc;

use kestrel_cache::BuildCache;
use kestrel_ir::{CheckedModule, Expr, Module, ModuleBuilder};
use kestrel_primitives::{
    adder_subtractor, counter, dual_port_ram, fifo, ram, register_file, ripple_divider, stack,
    timer, FifoModel, ReadMode,
};
use kestrel_ir::ReadDuringWrite;
use kestrel_sim::{interpreter, BackendKind, Simulator};
use kestrel_synth::LowerOptions;
use kestrel_verify::{
    Coverage, ExternalSimulator, Harness, HarnessOptions, InputPort, ResetPulse, Subject,
};

fn checked(module: Module) -> Arc<CheckedModule> {
    Arc::new(CheckedModule::new(&module).unwrap())
}

fn gates_only(vectors: usize) -> HarnessOptions {
    HarnessOptions {
        vectors,
        seed: 0x5eed,
        backends: vec![BackendKind::GateLevel],
        ..HarnessOptions::default()
    }
}

fn primitives() -> Vec<Subject> {
    vec![
        Subject::ir(checked(adder_subtractor(8).unwrap())),
        Subject::ir(checked(fifo(16, 8).unwrap()))
            .with_reset(ResetPulse::at_start("rst", 2).with_probability(0.02)),
        Subject::ir(checked(stack(8, 4).unwrap()))
            .with_reset(ResetPulse::at_start("rst", 2).with_probability(0.02)),
        Subject::ir(checked(counter(6).unwrap())).with_reset(ResetPulse::at_start("rst", 1)),
        Subject::ir(checked(timer().unwrap()))
            .with_reset(ResetPulse::at_start("rst", 1))
            .hold("tac", 0b101)
            .with_cycles(600),
        Subject::ir(checked(ripple_divider(4).unwrap())).with_reset(ResetPulse::at_start("rst", 1)),
        Subject::ir(checked(dual_port_ram(16, 8, ReadDuringWrite::WriteFirst).unwrap())),
        Subject::ir(checked(ram(16, 8, ReadMode::Sync(ReadDuringWrite::ReadFirst)).unwrap())),
        Subject::ir(checked(register_file(8, 8, true).unwrap())),
    ]
}

#[test]
fn primitives_match_their_gate_netlists() {
    let summary = Harness::new(gates_only(300)).validate_all(&primitives());
    assert!(summary.all_passed(), "{summary}");
    assert_eq!(summary.reports.len(), 9);
    assert!(summary.lacking_gate_coverage().is_empty(), "{summary}");
    let timer = summary.report("timer").unwrap();
    assert_eq!(timer.cycles, 600);
    assert_eq!(timer.external, Coverage::Skipped("external simulator disabled".to_string()));
}

#[test]
fn runs_are_repeatable_and_share_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(BuildCache::open(dir.path()).unwrap());
    let harness = Harness::new(gates_only(100)).with_cache(cache);
    let subjects = primitives();
    let first = harness.validate_all(&subjects);
    let second = harness.validate_all(&subjects);
    assert!(first.all_passed(), "{first}");
    assert_eq!(first.reports, second.reports);
}

#[test]
fn jit_agrees_with_the_interpreter_or_is_unavailable() {
    let options = HarnessOptions {
        backends: vec![BackendKind::Jit],
        ..gates_only(200)
    };
    let summary = Harness::new(options).validate_all(&primitives());
    assert!(summary.errors.is_empty(), "{summary}");
    for report in &summary.reports {
        assert_eq!(report.backends.len(), 1);
        let check = &report.backends[0];
        assert_eq!(check.backend, BackendKind::Jit);
        assert!(
            matches!(check.coverage, Coverage::Passed | Coverage::Unavailable(_)),
            "{}: {}",
            report.module,
            check.coverage
        );
        assert!(matches!(report.gate_level, Coverage::Skipped(_)));
    }
}

#[test]
fn hand_written_fifo_matches_ir_but_lacks_gate_coverage() {
    let inputs = vec![
        InputPort::new("rst", 1),
        InputPort::new("push", 1),
        InputPort::new("pop", 1),
        InputPort::new("din", 8),
    ];
    let outputs = ["dout", "empty", "full", "count"].map(String::from).to_vec();
    let model = Subject::model("fifo_model", inputs, outputs, |run| {
        Box::new(FifoModel::new(16, 8, run).unwrap()) as Box<dyn Simulator>
    })
    .with_reference(checked(fifo(16, 8).unwrap()))
    .with_reset(ResetPulse::at_start("rst", 2));

    let subjects = vec![Subject::ir(checked(adder_subtractor(8).unwrap())), model];
    let summary = Harness::new(gates_only(400)).validate_all(&subjects);
    assert!(summary.all_passed(), "{summary}");

    let report = summary.report("fifo_model").unwrap();
    assert_eq!(report.backends[0].backend, BackendKind::Interpreter);
    assert!(report.backends[0].coverage.is_passed());
    assert!(matches!(report.gate_level, Coverage::NotSynthesizable(_)));

    let lacking = summary.lacking_gate_coverage();
    assert_eq!(lacking.len(), 1);
    assert_eq!(lacking[0].0, "fifo_model");
    assert!(summary.to_string().contains("without gate-level coverage:"));
}

#[test]
fn oversized_memories_are_not_synthesizable() {
    let options = HarnessOptions {
        lower: LowerOptions { max_memory_bits: 64 },
        ..gates_only(50)
    };
    let subject = Subject::ir(checked(ram(256, 8, ReadMode::Async).unwrap()));
    let report = Harness::new(options).validate(&subject).unwrap();
    assert!(matches!(report.gate_level, Coverage::NotSynthesizable(_)), "{}", report.gate_level);
    assert!(matches!(report.external, Coverage::NotSynthesizable(_)));
    assert!(!report.has_failures());
}

#[test]
fn missing_external_tools_are_unavailable() {
    let work = tempfile::tempdir().unwrap();
    let options = HarnessOptions {
        external: Some(
            ExternalSimulator::new("kestrel-no-such-iverilog", "kestrel-no-such-vvp")
                .with_work_dir(work.path()),
        ),
        ..gates_only(20)
    };
    let subject = Subject::ir(checked(adder_subtractor(8).unwrap()));
    let report = Harness::new(options).validate(&subject).unwrap();
    assert!(report.gate_level.is_passed());
    assert!(matches!(report.external, Coverage::Unavailable(_)), "{}", report.external);
    assert!(!report.external.is_passed());
}

fn buffer(name: &str, invert: bool) -> Module {
    let mut m = ModuleBuilder::new(name);
    let a = m.input("a", 4);
    let y = m.output("y", 4);
    let value = if invert { Expr::sig(a).not() } else { Expr::sig(a) };
    m.assign(y, value);
    m.finish()
}

#[test]
fn a_wrong_model_reports_the_first_mismatch() {
    let wrong = checked(buffer("buf", false));
    let subject = Subject::model(
        "inverter_model",
        vec![InputPort::new("a", 4)],
        vec!["y".to_string()],
        move |run| Box::new(interpreter(wrong.clone(), run)) as Box<dyn Simulator>,
    )
    .with_reference(checked(buffer("inv", true)));

    let summary = Harness::new(gates_only(10)).validate_all(&[subject]);
    assert!(!summary.all_passed());
    assert_eq!(summary.failed(), vec!["inverter_model"]);

    let mismatch = summary.reports[0].first_mismatch().unwrap();
    assert_eq!(mismatch.cycle, 0);
    assert_eq!(mismatch.signal, "y");
    let a = mismatch.inputs["a"];
    assert_eq!(mismatch.expected, a);
    assert_eq!(mismatch.actual, !a & 0xF);
    assert!(summary.to_string().contains("'y' expected"));
}

#[test]
fn unknown_held_inputs_are_errors() {
    let subject = Subject::ir(checked(adder_subtractor(8).unwrap())).hold("carry_in", 1);
    let summary = Harness::new(gates_only(10)).validate_all(&[subject]);
    assert!(summary.reports.is_empty());
    assert_eq!(summary.errors.len(), 1);
    assert!(!summary.all_passed());
}

mod seeds {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn any_seed_passes_for_a_counter(seed in any::<u64>()) {
            let options = HarnessOptions { seed, ..gates_only(64) };
            let subject = Subject::ir(checked(counter(5).unwrap()))
                .with_reset(ResetPulse::at_start("rst", 1).with_probability(0.05));
            let report = Harness::new(options).validate(&subject).unwrap();
            prop_assert!(report.gate_level.is_passed(), "{}", report.gate_level);
        }
    }
}
