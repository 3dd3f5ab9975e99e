//! The cross-validation harness.
//!
//! For an IR subject the harness generates a seeded stimulus, records
//! reference vectors on the interpreter, then replays them through every
//! configured backend, through the in-process gate-level simulator, and
//! through the external simulator on the exported netlist. Each comparison
//! stops at its first mismatch. A subject that cannot be lowered is marked
//! not synthesizable in both gate-level columns.

use std::path::Path;
use std::sync::Arc;

use kestrel_cache::BuildCache;
use kestrel_config::{BackendKind, KestrelConfig};
use kestrel_ir::CheckedModule;
use kestrel_sim::{interpreter, SimBuilder, SimError, SimOptions};
use kestrel_synth::{lower, lower_cached, GateSimulator, LowerError, LowerOptions, Netlist};
use rayon::prelude::*;

use crate::compare::first_mismatch;
use crate::error::VerifyError;
use crate::external::{ExternalRun, ExternalSimulator};
use crate::report::{BackendCheck, Coverage, ModuleReport, ValidationSummary};
use crate::stimulus::{input_ports, InputPort, Stimulus};
use crate::subject::{Subject, SubjectKind};
use crate::vectors::{output_names, record, replay, TestVector};

const MODEL_HAS_NO_IR: &str = "hand-written simulator model has no IR to lower";

/// Settings for a validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessOptions {
    /// Cycles per subject unless the subject overrides it.
    pub vectors: usize,
    /// Stimulus seed.
    pub seed: u64,
    /// Backends compared against the interpreter; `GateLevel` enables the in-process netlist check.
    pub backends: Vec<BackendKind>,
    /// How simulators are built, including the clock name.
    pub sim: SimOptions,
    /// Lowering limits.
    pub lower: LowerOptions,
    /// External simulator, if enabled.
    pub external: Option<ExternalSimulator>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self::from_config(&KestrelConfig::default(), Path::new("."))
    }
}

impl HarnessOptions {
    /// Options from `[verify]`, `[simulation]`, `[compiled]` and `[lowering]`.
    pub fn from_config(config: &KestrelConfig, project_dir: &Path) -> Self {
        let verify = &config.verify;
        Self {
            vectors: verify.vectors as usize,
            seed: verify.seed,
            backends: verify.backends.clone(),
            sim: SimOptions::from_config(config, project_dir).with_fallback(false),
            lower: LowerOptions::from_config(&config.lowering),
            external: verify
                .external
                .enabled
                .then(|| ExternalSimulator::from_config(&verify.external, project_dir)),
        }
    }
}

/// Runs cross-validation.
#[derive(Debug, Default)]
pub struct Harness {
    options: HarnessOptions,
    cache: Option<Arc<BuildCache>>,
}

impl Harness {
    /// A harness with the given options.
    pub fn new(options: HarnessOptions) -> Self {
        Self {
            options,
            cache: None,
        }
    }

    /// Shares a build cache for compiled simulators and lowered netlists.
    pub fn with_cache(mut self, cache: Arc<BuildCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The options in effect.
    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    fn clock(&self) -> &str {
        &self.options.sim.run.clock
    }

    /// Validates every subject, in parallel, each on its own simulators.
    pub fn validate_all(&self, subjects: &[Subject]) -> ValidationSummary {
        let results: Vec<(String, Result<ModuleReport, VerifyError>)> = subjects
            .par_iter()
            .map(|subject| (subject.name.clone(), self.validate(subject)))
            .collect();
        let mut summary = ValidationSummary::default();
        for (name, result) in results {
            match result {
                Ok(report) => summary.reports.push(report),
                Err(err) => {
                    tracing::warn!(module = %name, error = %err, "validation did not finish");
                    summary.errors.push((name, err));
                }
            }
        }
        summary
    }

    /// Validates one subject.
    pub fn validate(&self, subject: &Subject) -> Result<ModuleReport, VerifyError> {
        let report = match &subject.kind {
            SubjectKind::Ir(module) => self.validate_ir(subject, module)?,
            SubjectKind::Model {
                factory,
                inputs,
                outputs,
                reference,
            } => {
                let stimulus = self.stimulus(subject, inputs.clone())?;
                let observed = subject.observed.clone().unwrap_or_else(|| outputs.clone());
                let mut model = factory(self.options.sim.run.clone());
                let vectors = record(model.as_mut(), &stimulus, self.clock(), &observed)?;
                let mut backends = Vec::new();
                if let Some(module) = reference {
                    let mut sim = interpreter(module.clone(), self.options.sim.run.clone());
                    backends.push(BackendCheck {
                        backend: BackendKind::Interpreter,
                        coverage: replay(&mut sim, &vectors, self.clock())?.into(),
                    });
                }
                ModuleReport {
                    module: subject.name.clone(),
                    cycles: vectors.len(),
                    backends,
                    gate_level: Coverage::NotSynthesizable(MODEL_HAS_NO_IR.to_string()),
                    external: Coverage::NotSynthesizable(MODEL_HAS_NO_IR.to_string()),
                }
            }
        };
        tracing::info!(
            module = %report.module,
            cycles = report.cycles,
            gate_level = report.gate_level.label(),
            external = report.external.label(),
            failed = report.has_failures(),
            "subject validated"
        );
        Ok(report)
    }

    fn stimulus(
        &self,
        subject: &Subject,
        inputs: Vec<InputPort>,
    ) -> Result<Stimulus, VerifyError> {
        let cycles = subject.cycles.unwrap_or(self.options.vectors);
        Stimulus::random(inputs, cycles, self.options.seed, &subject.stimulus)
    }

    fn validate_ir(
        &self,
        subject: &Subject,
        module: &Arc<CheckedModule>,
    ) -> Result<ModuleReport, VerifyError> {
        let clock = self.clock();
        let stimulus = self.stimulus(subject, input_ports(module, clock))?;
        let observed = subject
            .observed
            .clone()
            .unwrap_or_else(|| output_names(module));
        let mut reference = interpreter(module.clone(), self.options.sim.run.clone());
        let vectors = record(&mut reference, &stimulus, clock, &observed)?;

        let backends = self.check_backends(module, &vectors)?;

        let (gate_level, external) = match self.lower(module) {
            Ok(netlist) => {
                let netlist = Arc::new(netlist);
                let gate_level = if self.options.backends.contains(&BackendKind::GateLevel) {
                    let mut sim = GateSimulator::new(netlist.clone(), self.options.sim.run.clone());
                    replay(&mut sim, &vectors, clock)?.into()
                } else {
                    Coverage::Skipped("gate-level backend not configured".to_string())
                };
                let external = self.check_external(&netlist, &vectors, &observed)?;
                (gate_level, external)
            }
            Err(LowerError::NotSynthesizable { reason, .. }) => (
                Coverage::NotSynthesizable(reason.clone()),
                Coverage::NotSynthesizable(reason),
            ),
            Err(err) => return Err(err.into()),
        };

        Ok(ModuleReport {
            module: subject.name.clone(),
            cycles: vectors.len(),
            backends,
            gate_level,
            external,
        })
    }

    fn lower(&self, module: &CheckedModule) -> Result<Netlist, LowerError> {
        match &self.cache {
            Some(cache) => lower_cached(module, &self.options.lower, cache),
            None => lower(module, &self.options.lower),
        }
    }

    /// Replays `vectors` through each configured IR backend other than the interpreter.
    ///
    /// A backend that cannot be built here is reported unavailable; nothing
    /// falls back.
    pub fn check_backends(
        &self,
        module: &Arc<CheckedModule>,
        vectors: &[TestVector],
    ) -> Result<Vec<BackendCheck>, VerifyError> {
        let mut builder = SimBuilder::new(self.options.sim.clone().with_fallback(false));
        if let Some(cache) = &self.cache {
            builder = builder.with_cache(cache.clone());
        }
        let mut checks = Vec::new();
        for &backend in &self.options.backends {
            if matches!(backend, BackendKind::Interpreter | BackendKind::GateLevel) {
                continue;
            }
            let coverage = match builder.build_exact(module, backend) {
                Ok(mut sim) => replay(sim.as_mut(), vectors, self.clock())?.into(),
                Err(SimError::BackendUnavailable { reason, .. }) => {
                    tracing::warn!(module = %module.name, %backend, %reason, "backend unavailable for comparison");
                    Coverage::Unavailable(reason)
                }
                Err(err) => return Err(err.into()),
            };
            checks.push(BackendCheck { backend, coverage });
        }
        Ok(checks)
    }

    fn check_external(
        &self,
        netlist: &Netlist,
        vectors: &[TestVector],
        observed: &[String],
    ) -> Result<Coverage, VerifyError> {
        let Some(external) = &self.options.external else {
            return Ok(Coverage::Skipped("external simulator disabled".to_string()));
        };
        // Only ports are visible outside the exported module.
        let ports: Vec<String> = observed
            .iter()
            .filter(|name| netlist.signal(name).is_some_and(|b| b.kind.is_port()))
            .cloned()
            .collect();
        let expected: Vec<TestVector> = vectors
            .iter()
            .map(|v| TestVector {
                outputs: v
                    .outputs
                    .iter()
                    .filter(|(name, _)| ports.contains(name))
                    .map(|(name, value)| (name.clone(), *value))
                    .collect(),
                ..v.clone()
            })
            .collect();
        match external.run(netlist, &expected, self.clock(), &ports)? {
            ExternalRun::Completed(rows) => Ok(first_mismatch(&expected, &rows)?.into()),
            ExternalRun::Unavailable(reason) => Ok(Coverage::Unavailable(reason)),
        }
    }
}
