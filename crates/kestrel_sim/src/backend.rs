//! Backend selection.
//!
//! A [`SimBuilder`] turns a checked module into a boxed [`Simulator`] for the
//! requested [`BackendKind`]. If that backend cannot be built and the
//! options allow it, the interpreter is used instead and the substitution is
//! reported in [`BuiltSimulator::fallback`]. Fallback never happens
//! silently.
//!
//! Backends implemented outside this crate (the gate-level simulator) plug
//! in through [`BackendProvider`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kestrel_cache::BuildCache;
use kestrel_config::{BackendKind, KestrelConfig};
use kestrel_ir::{check_design, CheckedModule, Design};

use crate::compiled::{CompileOptions, CompiledEvaluator};
use crate::error::SimError;
use crate::interpreter::Interpreter;
use crate::kernel::Kernel;
use crate::plan::SimPlan;
use crate::simulator::{RunConfig, Simulator};

#[cfg(feature = "jit")]
use crate::jit::JitEvaluator;

/// Everything needed to build a simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimOptions {
    /// Requested backend.
    pub backend: BackendKind,
    /// Whether an unbuildable backend may be replaced by the interpreter.
    pub allow_fallback: bool,
    /// `run_cycles` options.
    pub run: RunConfig,
    /// Compiled backend settings.
    pub compile: CompileOptions,
    /// Build cache directory for the compiled backend.
    pub cache_dir: PathBuf,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self::from_config(&KestrelConfig::default(), Path::new("."))
    }
}

impl SimOptions {
    /// Options for `backend` with everything else at defaults.
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Options from a loaded configuration; relative paths resolve against `project_dir`.
    pub fn from_config(config: &KestrelConfig, project_dir: &Path) -> Self {
        Self {
            backend: config.simulation.backend,
            allow_fallback: config.simulation.allow_fallback,
            run: RunConfig::from_config(&config.simulation),
            compile: CompileOptions::from_config(&config.compiled),
            cache_dir: project_dir.join(&config.compiled.cache_dir),
        }
    }

    /// Same options with fallback allowed or forbidden.
    pub fn with_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = allow;
        self
    }

    /// Same options with different run settings.
    pub fn with_run(mut self, run: RunConfig) -> Self {
        self.run = run;
        self
    }
}

/// A backend built outside this crate.
pub trait BackendProvider: Send + Sync {
    /// The backend this provider builds.
    fn kind(&self) -> BackendKind;

    /// Builds a simulator for `module`.
    fn build(
        &self,
        module: &Arc<CheckedModule>,
        options: &SimOptions,
    ) -> Result<Box<dyn Simulator>, SimError>;
}

/// A simulator plus how it came to be.
pub struct BuiltSimulator {
    /// The simulator.
    pub simulator: Box<dyn Simulator>,
    /// Backend that was asked for.
    pub requested: BackendKind,
    /// Backend actually running.
    pub used: BackendKind,
    /// Why the requested backend was replaced, if it was.
    pub fallback: Option<String>,
}

impl BuiltSimulator {
    /// Whether the interpreter stands in for the requested backend.
    pub fn fell_back(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Builds simulators for one set of options.
pub struct SimBuilder {
    options: SimOptions,
    providers: Vec<Box<dyn BackendProvider>>,
    cache: Option<Arc<BuildCache>>,
}

impl SimBuilder {
    /// A builder with no external providers.
    pub fn new(options: SimOptions) -> Self {
        Self {
            options,
            providers: Vec::new(),
            cache: None,
        }
    }

    /// Registers an external backend.
    pub fn with_provider(mut self, provider: Box<dyn BackendProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Shares an open build cache instead of opening `cache_dir` per build.
    pub fn with_cache(mut self, cache: Arc<BuildCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The options in effect.
    pub fn options(&self) -> &SimOptions {
        &self.options
    }

    /// Checks `design` and builds a simulator for it.
    pub fn build_design(&self, design: &Design) -> Result<BuiltSimulator, SimError> {
        self.build(Arc::new(check_design(design)?))
    }

    /// Builds the requested backend, falling back to the interpreter if allowed.
    pub fn build(&self, module: Arc<CheckedModule>) -> Result<BuiltSimulator, SimError> {
        let requested = self.options.backend;
        match self.build_exact(&module, requested) {
            Ok(simulator) => {
                tracing::info!(module = %module.name, backend = %requested, "simulator built");
                Ok(BuiltSimulator {
                    simulator,
                    requested,
                    used: requested,
                    fallback: None,
                })
            }
            Err(err) if self.options.allow_fallback && can_fall_back(requested, &err) => {
                tracing::warn!(
                    module = %module.name,
                    backend = %requested,
                    error = %err,
                    "backend unavailable, falling back to the interpreter"
                );
                let simulator = self.build_exact(&module, BackendKind::Interpreter)?;
                Ok(BuiltSimulator {
                    simulator,
                    requested,
                    used: BackendKind::Interpreter,
                    fallback: Some(err.to_string()),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Builds exactly `kind`, never falling back.
    pub fn build_exact(
        &self,
        module: &Arc<CheckedModule>,
        kind: BackendKind,
    ) -> Result<Box<dyn Simulator>, SimError> {
        if let Some(provider) = self.providers.iter().find(|p| p.kind() == kind) {
            return provider.build(module, &self.options);
        }
        let run = self.options.run.clone();
        match kind {
            BackendKind::Interpreter => Ok(Box::new(interpreter(module.clone(), run))),
            BackendKind::Jit => Ok(Box::new(jit(module.clone(), run)?)),
            BackendKind::Compiled => {
                let cache = match &self.cache {
                    Some(cache) => cache.clone(),
                    None => Arc::new(BuildCache::open(&self.options.cache_dir)?),
                };
                Ok(Box::new(compiled(
                    module.clone(),
                    run,
                    &self.options.compile,
                    &cache,
                )?))
            }
            BackendKind::GateLevel => Err(SimError::BackendUnavailable {
                backend: kind,
                reason: "no gate-level provider registered".to_string(),
            }),
        }
    }
}

fn can_fall_back(requested: BackendKind, err: &SimError) -> bool {
    requested != BackendKind::Interpreter
        && matches!(
            err,
            SimError::BackendUnavailable { .. }
                | SimError::Jit { .. }
                | SimError::Compile { .. }
                | SimError::Cache(_)
                | SimError::Io(_)
        )
}

/// An interpreter kernel for `module`.
pub fn interpreter(module: Arc<CheckedModule>, run: RunConfig) -> Kernel<Interpreter> {
    let plan = SimPlan::new(&module);
    let evaluator = Interpreter::new(module.clone(), &plan);
    Kernel::new(module, plan, evaluator, run)
}

/// A JIT kernel for `module`.
#[cfg(feature = "jit")]
pub fn jit(module: Arc<CheckedModule>, run: RunConfig) -> Result<Kernel<JitEvaluator>, SimError> {
    let plan = SimPlan::new(&module);
    let evaluator = JitEvaluator::new(&module, &plan)?;
    Ok(Kernel::new(module, plan, evaluator, run))
}

/// Without the `jit` feature the JIT backend is always unavailable.
#[cfg(not(feature = "jit"))]
pub fn jit(_module: Arc<CheckedModule>, _run: RunConfig) -> Result<Kernel<Interpreter>, SimError> {
    Err(SimError::BackendUnavailable {
        backend: BackendKind::Jit,
        reason: "built without the `jit` feature".to_string(),
    })
}

/// A compiled kernel for `module`, using `cache` for the shared library.
pub fn compiled(
    module: Arc<CheckedModule>,
    run: RunConfig,
    options: &CompileOptions,
    cache: &BuildCache,
) -> Result<Kernel<CompiledEvaluator>, SimError> {
    let plan = SimPlan::new(&module);
    let evaluator = CompiledEvaluator::build(&module, &plan, options, cache)?;
    Ok(Kernel::new(module, plan, evaluator, run))
}
