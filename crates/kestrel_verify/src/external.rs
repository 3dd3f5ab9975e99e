//! Bridge to an out-of-process Verilog simulator (Icarus Verilog).
//!
//! The netlist and a generated testbench are written to a working
//! directory, compiled with `iverilog` and run with `vvp`. A tool that is
//! not installed makes the run [`ExternalRun::Unavailable`]; it is never
//! treated as a pass.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use kestrel_config::ExternalConfig;
use kestrel_synth::{to_verilog, Netlist};

use crate::error::VerifyError;
use crate::testbench::{self, RESULT_MARKER};
use crate::vectors::TestVector;

/// Outcome of an external simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalRun {
    /// Observed outputs, one map per cycle.
    Completed(Vec<BTreeMap<String, u64>>),
    /// A tool could not be started.
    Unavailable(String),
}

/// Runs netlists in Icarus Verilog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSimulator {
    iverilog: String,
    vvp: String,
    work_dir: Option<PathBuf>,
}

impl Default for ExternalSimulator {
    fn default() -> Self {
        Self::new("iverilog", "vvp")
    }
}

impl ExternalSimulator {
    /// Uses the given executables and a temporary working directory per run.
    pub fn new(iverilog: impl Into<String>, vvp: impl Into<String>) -> Self {
        Self {
            iverilog: iverilog.into(),
            vvp: vvp.into(),
            work_dir: None,
        }
    }

    /// Settings from `[verify.external]`; a relative `work_dir` resolves against `project_dir`.
    pub fn from_config(config: &ExternalConfig, project_dir: &Path) -> Self {
        Self {
            iverilog: config.iverilog.clone(),
            vvp: config.vvp.clone(),
            work_dir: config.work_dir.as_ref().map(|d| project_dir.join(d)),
        }
    }

    /// Keeps generated files under `dir`, one subdirectory per module.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Simulates `netlist` on `vectors` and returns the `observed` outputs per cycle.
    pub fn run(
        &self,
        netlist: &Netlist,
        vectors: &[TestVector],
        clock: &str,
        observed: &[String],
    ) -> Result<ExternalRun, VerifyError> {
        let _temp;
        let dir = match &self.work_dir {
            Some(root) => {
                let dir = root.join(dir_name(&netlist.name));
                fs::create_dir_all(&dir).map_err(VerifyError::io(&dir))?;
                dir
            }
            None => {
                let temp = tempfile::tempdir().map_err(VerifyError::io(std::env::temp_dir()))?;
                let dir = temp.path().to_path_buf();
                _temp = temp;
                dir
            }
        };

        let netlist_path = dir.join("netlist.v");
        fs::write(&netlist_path, to_verilog(netlist)).map_err(VerifyError::io(&netlist_path))?;
        let tb_path = dir.join("tb.v");
        let tb = testbench::generate(netlist, vectors, clock, observed);
        fs::write(&tb_path, tb).map_err(VerifyError::io(&tb_path))?;

        let compile_args = ["-g2005", "-o", "sim.vvp", "netlist.v", "tb.v"];
        let Some(output) = invoke(&self.iverilog, &compile_args, &dir)? else {
            return Ok(self.unavailable(&self.iverilog));
        };
        check(&self.iverilog, &output)?;

        let Some(output) = invoke(&self.vvp, &["-n", "sim.vvp"], &dir)? else {
            return Ok(self.unavailable(&self.vvp));
        };
        check(&self.vvp, &output)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let observed_here: Vec<String> = observed
            .iter()
            .filter(|name| netlist.signal(name).is_some_and(|b| b.kind.is_port()))
            .cloned()
            .collect();
        let rows = parse_output(&stdout, vectors.len(), &observed_here)?;
        tracing::debug!(module = %netlist.name, cycles = rows.len(), dir = %dir.display(), "external simulation finished");
        Ok(ExternalRun::Completed(rows))
    }

    fn unavailable(&self, tool: &str) -> ExternalRun {
        tracing::warn!(tool, "external simulator not found");
        ExternalRun::Unavailable(format!("'{tool}' could not be started"))
    }
}

fn dir_name(module: &str) -> String {
    module
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Runs `program`; `Ok(None)` if it does not exist.
fn invoke(program: &str, args: &[&str], dir: &Path) -> Result<Option<Output>, VerifyError> {
    match Command::new(program).args(args).current_dir(dir).output() {
        Ok(output) => Ok(Some(output)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(VerifyError::io(program)(err)),
    }
}

fn check(tool: &str, output: &Output) -> Result<(), VerifyError> {
    if output.status.success() {
        return Ok(());
    }
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(VerifyError::Tool {
        tool: tool.to_string(),
        status: output.status.to_string(),
        output: text.trim().to_string(),
    })
}

/// Extracts per-cycle values from simulator output.
///
/// Lines not starting with the result marker are ignored. Cycles must
/// appear in order, every `observed` signal must be present in each, and
/// exactly `cycles` result lines are expected.
pub fn parse_output(
    stdout: &str,
    cycles: usize,
    observed: &[String],
) -> Result<Vec<BTreeMap<String, u64>>, VerifyError> {
    let mut rows = Vec::with_capacity(cycles);
    for (index, line) in stdout.lines().enumerate() {
        let lineno = index + 1;
        let mut fields = line.split_whitespace();
        if fields.next() != Some(RESULT_MARKER) {
            continue;
        }
        let cycle: usize = fields
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| VerifyError::parse(lineno, "missing cycle number"))?;
        if cycle != rows.len() {
            return Err(VerifyError::parse(
                lineno,
                format!("expected cycle {}, found {cycle}", rows.len()),
            ));
        }
        let mut row = BTreeMap::new();
        for field in fields {
            let (name, value) = field
                .rsplit_once('=')
                .ok_or_else(|| VerifyError::parse(lineno, format!("'{field}' is not name=value")))?;
            let value: u64 = value.parse().map_err(|_| {
                VerifyError::parse(lineno, format!("value '{value}' of '{name}' is not a number"))
            })?;
            row.insert(name.to_string(), value);
        }
        if let Some(missing) = observed.iter().find(|name| !row.contains_key(*name)) {
            return Err(VerifyError::parse(lineno, format!("no value for '{missing}'")));
        }
        rows.push(row);
    }
    if rows.len() != cycles {
        return Err(VerifyError::parse(
            0,
            format!("expected {cycles} cycles, got {}", rows.len()),
        ));
    }
    Ok(rows)
}
