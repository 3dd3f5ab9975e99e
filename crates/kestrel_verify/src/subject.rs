//! Things the harness can validate.

use std::sync::Arc;

use kestrel_ir::{check_design, CheckedModule, Design};
use kestrel_sim::{RunConfig, Simulator};

use crate::error::VerifyError;
use crate::stimulus::{InputPort, ResetPulse, StimulusOptions};

/// Builds a fresh hand-written simulator.
pub type ModelFactory = Arc<dyn Fn(RunConfig) -> Box<dyn Simulator> + Send + Sync>;

/// What a subject is made of.
#[derive(Clone)]
pub enum SubjectKind {
    /// A checked IR module; every backend and the gate-level path apply.
    Ir(Arc<CheckedModule>),
    /// A simulator written by hand, with no IR and so no gate-level form.
    Model {
        /// Creates the simulator.
        factory: ModelFactory,
        /// Inputs the harness drives.
        inputs: Vec<InputPort>,
        /// Outputs the harness records.
        outputs: Vec<String>,
        /// IR with the same ports, compared against the model on the interpreter.
        reference: Option<Arc<CheckedModule>>,
    },
}

/// A named unit of validation with its stimulus settings.
#[derive(Clone)]
pub struct Subject {
    pub(crate) name: String,
    pub(crate) kind: SubjectKind,
    pub(crate) stimulus: StimulusOptions,
    pub(crate) observed: Option<Vec<String>>,
    pub(crate) cycles: Option<usize>,
}

impl Subject {
    fn with_kind(name: String, kind: SubjectKind) -> Self {
        Self {
            name,
            kind,
            stimulus: StimulusOptions::default(),
            observed: None,
            cycles: None,
        }
    }

    /// A checked module, named after it.
    pub fn ir(module: Arc<CheckedModule>) -> Self {
        Self::with_kind(module.name.clone(), SubjectKind::Ir(module))
    }

    /// Checks and flattens `design` into a subject.
    pub fn design(design: &Design) -> Result<Self, VerifyError> {
        Ok(Self::ir(Arc::new(check_design(design)?)))
    }

    /// A hand-written simulator.
    pub fn model(
        name: impl Into<String>,
        inputs: Vec<InputPort>,
        outputs: Vec<String>,
        factory: impl Fn(RunConfig) -> Box<dyn Simulator> + Send + Sync + 'static,
    ) -> Self {
        Self::with_kind(
            name.into(),
            SubjectKind::Model {
                factory: Arc::new(factory),
                inputs,
                outputs,
                reference: None,
            },
        )
    }

    /// Compares a model against `module` as well; no effect on IR subjects.
    pub fn with_reference(mut self, module: Arc<CheckedModule>) -> Self {
        if let SubjectKind::Model { reference, .. } = &mut self.kind {
            *reference = Some(module);
        }
        self
    }

    /// Holds `signal` at `value` instead of randomising it.
    pub fn hold(mut self, signal: impl Into<String>, value: u64) -> Self {
        self.stimulus.held.insert(signal.into(), value);
        self
    }

    /// Drives `reset` as a reset rather than a random input.
    pub fn with_reset(mut self, reset: ResetPulse) -> Self {
        self.stimulus.reset = Some(reset);
        self
    }

    /// Records these signals instead of the outputs.
    pub fn observe(mut self, signals: Vec<String>) -> Self {
        self.observed = Some(signals);
        self
    }

    /// Runs this many cycles instead of the configured count.
    pub fn with_cycles(mut self, cycles: usize) -> Self {
        self.cycles = Some(cycles);
        self
    }

    /// Subject name used in reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the subject is made of.
    pub fn kind(&self) -> &SubjectKind {
        &self.kind
    }
}

impl std::fmt::Debug for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            SubjectKind::Ir(_) => "ir",
            SubjectKind::Model { .. } => "model",
        };
        f.debug_struct("Subject")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("stimulus", &self.stimulus)
            .finish_non_exhaustive()
    }
}
