//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KestrelConfig;
use std::path::Path;

/// File name looked up in a project directory.
pub const CONFIG_FILE: &str = "kestrel.toml";

/// Loads and validates `<project_dir>/kestrel.toml`.
///
/// A project without the file gets the default configuration.
pub fn load_config(project_dir: &Path) -> Result<KestrelConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "no configuration file, using defaults");
        return Ok(KestrelConfig::default());
    }
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kestrel.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<KestrelConfig, ConfigError> {
    let config: KestrelConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &KestrelConfig) -> Result<(), ConfigError> {
    let invalid = |field: &str, reason: String| ConfigError::ValidationError {
        field: field.to_string(),
        reason,
    };
    if config.simulation.clock.is_empty() {
        return Err(ConfigError::MissingField("simulation.clock".to_string()));
    }
    if config.simulation.max_derived_passes == 0 {
        return Err(invalid(
            "simulation.max_derived_passes",
            "must be at least 1".to_string(),
        ));
    }
    if config.compiled.opt_level > 3 {
        return Err(invalid(
            "compiled.opt_level",
            format!("must be 0..=3, got {}", config.compiled.opt_level),
        ));
    }
    if config.compiled.rustc.is_empty() {
        return Err(ConfigError::MissingField("compiled.rustc".to_string()));
    }
    if config.lowering.max_memory_bits == 0 {
        return Err(invalid(
            "lowering.max_memory_bits",
            "must be at least 1".to_string(),
        ));
    }
    if config.verify.external.enabled
        && (config.verify.external.iverilog.is_empty() || config.verify.external.vvp.is_empty())
    {
        return Err(ConfigError::MissingField(
            "verify.external.iverilog / verify.external.vvp".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BackendKind;

    #[test]
    fn empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config, KestrelConfig::default());
        assert_eq!(config.simulation.clock, "clk");
        assert_eq!(config.simulation.max_derived_passes, 16);
        assert!(config.simulation.allow_fallback);
        assert_eq!(config.compiled.opt_level, 2);
        assert_eq!(config.logging.filter, "warn");
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[simulation]
backend = "jit"
allow_fallback = false
clock = "sys_clk"
halt = "halted"
events = ["frame_done"]
max_derived_passes = 4

[compiled]
cache_dir = "target/kestrel"
rustc = "/usr/bin/rustc"
opt_level = 3

[lowering]
max_memory_bits = 2048

[verify]
vectors = 64
seed = 7
backends = ["jit"]

[verify.external]
enabled = true
iverilog = "/opt/iverilog/bin/iverilog"
work_dir = "target/tb"

[logging]
filter = "kestrel_sim=debug"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.simulation.backend, BackendKind::Jit);
        assert!(!config.simulation.allow_fallback);
        assert_eq!(config.simulation.halt.as_deref(), Some("halted"));
        assert_eq!(config.compiled.cache_dir, "target/kestrel");
        assert_eq!(config.lowering.max_memory_bits, 2048);
        assert_eq!(config.verify.seed, 7);
        assert!(config.verify.external.enabled);
        assert_eq!(config.verify.external.vvp, "vvp");
        assert_eq!(config.verify.external.work_dir.as_deref(), Some("target/tb"));
        assert_eq!(config.logging.filter, "kestrel_sim=debug");
    }

    #[test]
    fn empty_clock_errors() {
        let err = load_config_from_str("[simulation]\nclock = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "simulation.clock"));
    }

    #[test]
    fn opt_level_out_of_range() {
        let err = load_config_from_str("[compiled]\nopt_level = 7\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError { ref field, .. } if field == "compiled.opt_level"
        ));
    }

    #[test]
    fn zero_derived_passes_errors() {
        let err = load_config_from_str("[simulation]\nmax_derived_passes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config(dir.path()).unwrap(), KestrelConfig::default());
    }

    #[test]
    fn reads_file_from_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[verify]\nvectors = 12\n").unwrap();
        assert_eq!(load_config(dir.path()).unwrap().verify.vectors, 12);
    }

    #[test]
    fn unreadable_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(CONFIG_FILE)).unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
