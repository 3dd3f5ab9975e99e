//! Verdicts per subject and for a whole validation run.

use std::fmt;

use kestrel_sim::BackendKind;

use crate::compare::Mismatch;
use crate::error::VerifyError;

/// Outcome of one comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    /// Every cycle matched.
    Passed,
    /// The first cycle where outputs differed.
    Failed(Mismatch),
    /// The subject has no gate-level form.
    NotSynthesizable(String),
    /// The backend or tool could not run here.
    Unavailable(String),
    /// Not attempted.
    Skipped(String),
}

impl Coverage {
    /// Whether the comparison ran and matched.
    pub fn is_passed(&self) -> bool {
        matches!(self, Coverage::Passed)
    }

    /// Whether the comparison ran and found a difference.
    pub fn is_failed(&self) -> bool {
        matches!(self, Coverage::Failed(_))
    }

    /// Short label for tables.
    pub fn label(&self) -> &'static str {
        match self {
            Coverage::Passed => "passed",
            Coverage::Failed(_) => "FAILED",
            Coverage::NotSynthesizable(_) => "not synthesizable",
            Coverage::Unavailable(_) => "unavailable",
            Coverage::Skipped(_) => "skipped",
        }
    }
}

impl From<Option<Mismatch>> for Coverage {
    fn from(mismatch: Option<Mismatch>) -> Self {
        match mismatch {
            None => Coverage::Passed,
            Some(m) => Coverage::Failed(m),
        }
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coverage::Passed => f.write_str("passed"),
            Coverage::Failed(m) => write!(f, "FAILED: {m}"),
            Coverage::NotSynthesizable(why) => write!(f, "not synthesizable: {why}"),
            Coverage::Unavailable(why) => write!(f, "unavailable: {why}"),
            Coverage::Skipped(why) => write!(f, "skipped: {why}"),
        }
    }
}

/// One backend compared against the reference interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCheck {
    /// Backend that was asked for.
    pub backend: BackendKind,
    /// Result of the comparison.
    pub coverage: Coverage,
}

/// Everything checked for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReport {
    /// Subject name.
    pub module: String,
    /// Cycles replayed.
    pub cycles: usize,
    /// IR backends against the reference.
    pub backends: Vec<BackendCheck>,
    /// In-process gate-level simulation against the reference.
    pub gate_level: Coverage,
    /// External simulator on the exported netlist against the reference.
    pub external: Coverage,
}

impl ModuleReport {
    /// Whether any comparison found a difference.
    pub fn has_failures(&self) -> bool {
        self.gate_level.is_failed()
            || self.external.is_failed()
            || self.backends.iter().any(|b| b.coverage.is_failed())
    }

    /// The first mismatch found, in check order.
    pub fn first_mismatch(&self) -> Option<&Mismatch> {
        self.backends
            .iter()
            .map(|b| &b.coverage)
            .chain([&self.gate_level, &self.external])
            .find_map(|c| match c {
                Coverage::Failed(m) => Some(m),
                _ => None,
            })
    }

    /// Whether the gate-level comparison ran and passed.
    pub fn has_gate_coverage(&self) -> bool {
        self.gate_level.is_passed()
    }
}

/// Results of validating many subjects.
#[derive(Debug, Default)]
pub struct ValidationSummary {
    /// Reports, in subject order.
    pub reports: Vec<ModuleReport>,
    /// Subjects whose validation could not finish.
    pub errors: Vec<(String, VerifyError)>,
}

impl ValidationSummary {
    /// Whether nothing failed and nothing errored.
    pub fn all_passed(&self) -> bool {
        self.errors.is_empty() && !self.reports.iter().any(ModuleReport::has_failures)
    }

    /// Subjects with a mismatch anywhere.
    pub fn failed(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| r.has_failures())
            .map(|r| r.module.as_str())
            .collect()
    }

    /// Subjects whose gate-level comparison did not pass, with the reason.
    pub fn lacking_gate_coverage(&self) -> Vec<(&str, &Coverage)> {
        self.reports
            .iter()
            .filter(|r| !r.has_gate_coverage())
            .map(|r| (r.module.as_str(), &r.gate_level))
            .collect()
    }

    /// Finds the report for `module`.
    pub fn report(&self, module: &str) -> Option<&ModuleReport> {
        self.reports.iter().find(|r| r.module == module)
    }
}

impl fmt::Display for ValidationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.reports {
            write!(f, "{:<24} {:>6} cycles", report.module, report.cycles)?;
            for check in &report.backends {
                write!(f, "  {}: {}", check.backend, check.coverage.label())?;
            }
            writeln!(
                f,
                "  gates: {}  external: {}",
                report.gate_level.label(),
                report.external.label()
            )?;
            if let Some(mismatch) = report.first_mismatch() {
                writeln!(f, "    {mismatch}")?;
            }
        }
        for (module, err) in &self.errors {
            writeln!(f, "{module:<24} error: {err}")?;
        }
        let lacking = self.lacking_gate_coverage();
        if !lacking.is_empty() {
            writeln!(f, "without gate-level coverage:")?;
            for (module, coverage) in lacking {
                writeln!(f, "    {module}: {coverage}")?;
            }
        }
        Ok(())
    }
}
