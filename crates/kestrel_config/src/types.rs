//! Configuration types deserialized from `kestrel.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// The top-level configuration parsed from `kestrel.toml`.
///
/// Every section is optional; a missing section takes its defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct KestrelConfig {
    /// Kernel settings (backend, clock, halt and event signals).
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Settings for the natively compiled backend.
    #[serde(default)]
    pub compiled: CompiledConfig,
    /// Structural lowering limits.
    #[serde(default)]
    pub lowering: LoweringConfig,
    /// Cross-validation settings.
    #[serde(default)]
    pub verify: VerifyConfig,
    /// Log filter.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// An execution strategy for the kernel contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Tree-walking interpreter over the checked IR.
    #[default]
    Interpreter,
    /// Native code generated in-process.
    Jit,
    /// Generated Rust compiled ahead of time into a shared library.
    Compiled,
    /// The lowered gate netlist simulated in-process.
    GateLevel,
}

impl BackendKind {
    /// Every variant, in declaration order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Interpreter,
        BackendKind::Jit,
        BackendKind::Compiled,
        BackendKind::GateLevel,
    ];

    /// The name used in `kestrel.toml`.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Interpreter => "interpreter",
            BackendKind::Jit => "jit",
            BackendKind::Compiled => "compiled",
            BackendKind::GateLevel => "gate_level",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[simulation]`: how kernels are built and driven.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Requested backend.
    pub backend: BackendKind,
    /// Whether an unavailable backend may fall back to the interpreter.
    pub allow_fallback: bool,
    /// Primary clock driven by `run_cycles`.
    pub clock: String,
    /// Signal that stops `run_cycles` early when non-zero.
    pub halt: Option<String>,
    /// Signals whose 0 to non-zero transitions are counted as events.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub events: Vec<String>,
    /// Upper bound on derived-clock commit passes per tick.
    pub max_derived_passes: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Interpreter,
            allow_fallback: true,
            clock: "clk".to_string(),
            halt: None,
            events: Vec::new(),
            max_derived_passes: 16,
        }
    }
}

/// `[compiled]`: the ahead-of-time backend.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompiledConfig {
    /// Build cache directory, relative to the project directory.
    pub cache_dir: String,
    /// Compiler executable.
    pub rustc: String,
    /// `-C opt-level` passed to the compiler, `0..=3`.
    pub opt_level: u8,
}

impl Default for CompiledConfig {
    fn default() -> Self {
        Self {
            cache_dir: ".kestrel/cache".to_string(),
            rustc: "rustc".to_string(),
            opt_level: 2,
        }
    }
}

/// `[lowering]`: structural lowering limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoweringConfig {
    /// Largest memory, in stored bits, lowered to flip-flops.
    pub max_memory_bits: u32,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            max_memory_bits: 16 * 1024,
        }
    }
}

/// `[verify]`: cross-validation runs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Random vectors generated per subject.
    pub vectors: u32,
    /// Seed for stimulus generation.
    pub seed: u64,
    /// Backends compared against the interpreter.
    pub backends: Vec<BackendKind>,
    /// External reference simulator.
    pub external: ExternalConfig,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            vectors: 256,
            seed: 0x6b65_7374,
            backends: vec![BackendKind::Jit, BackendKind::GateLevel],
            external: ExternalConfig::default(),
        }
    }
}

/// `[verify.external]`: the out-of-process reference simulator.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExternalConfig {
    /// Whether to run it at all.
    pub enabled: bool,
    /// Verilog compiler executable.
    pub iverilog: String,
    /// Runtime executable.
    pub vvp: String,
    /// Directory for generated netlists and testbenches; a temporary one when unset.
    pub work_dir: Option<String>,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            iverilog: "iverilog".to_string(),
            vvp: "vvp".to_string(),
            work_dir: None,
        }
    }
}

/// `[logging]`: log output.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive such as `"info"` or `"kestrel_sim=debug"`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

/// Deserializes a field that can be either a single string or a list of strings.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    #[test]
    fn backend_kind_all_variants() {
        for kind in BackendKind::ALL {
            let toml = format!("[simulation]\nbackend = \"{kind}\"\n");
            let config = load_config_from_str(&toml).unwrap();
            assert_eq!(config.simulation.backend, kind);
        }
    }

    #[test]
    fn events_single_string() {
        let config = load_config_from_str("[simulation]\nevents = \"frame_done\"\n").unwrap();
        assert_eq!(config.simulation.events, vec!["frame_done"]);
    }

    #[test]
    fn events_list() {
        let config =
            load_config_from_str("[simulation]\nevents = [\"frame_done\", \"irq\"]\n").unwrap();
        assert_eq!(config.simulation.events, vec!["frame_done", "irq"]);
    }

    #[test]
    fn verify_backends_list() {
        let toml = r#"
[verify]
backends = ["compiled", "gate_level"]
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(
            config.verify.backends,
            vec![BackendKind::Compiled, BackendKind::GateLevel]
        );
        assert_eq!(config.verify.vectors, 256);
    }

    #[test]
    fn unknown_backend_rejected() {
        assert!(load_config_from_str("[simulation]\nbackend = \"fpga\"\n").is_err());
    }
}
