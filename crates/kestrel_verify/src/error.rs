//! Harness error types.
//!
//! Output mismatches are not errors: they are reported as
//! [`crate::Mismatch`] values inside a [`crate::ModuleReport`]. These
//! variants cover everything that stops a check from producing a verdict.

use std::path::PathBuf;

use kestrel_ir::IrError;
use kestrel_sim::SimError;
use kestrel_synth::LowerError;

/// Errors that can occur while cross-validating a subject.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The subject failed checking.
    #[error(transparent)]
    Load(#[from] IrError),

    /// A simulator rejected a call.
    #[error(transparent)]
    Sim(#[from] SimError),

    /// Lowering failed for a reason other than synthesizability.
    #[error(transparent)]
    Lower(#[from] LowerError),

    /// A stimulus names an input the subject does not have.
    #[error("stimulus drives unknown input '{name}'")]
    UnknownInput {
        /// The offending input name.
        name: String,
    },

    /// Writing generated files or reading tool output failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An external tool ran but reported failure.
    #[error("{tool} failed ({status}): {output}")]
    Tool {
        /// Executable name.
        tool: String,
        /// Exit status as text.
        status: String,
        /// Captured stdout and stderr.
        output: String,
    },

    /// The external simulator's output could not be understood.
    #[error("unreadable simulator output at line {line}: {reason}")]
    Parse {
        /// 1-based line in the captured stdout; 0 when the whole output is at fault.
        line: usize,
        /// What is wrong with it.
        reason: String,
    },
}

impl VerifyError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> VerifyError {
        let path = path.into();
        move |source| VerifyError::Io { path, source }
    }

    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        VerifyError::Parse {
            line,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_input_display() {
        let err = VerifyError::UnknownInput {
            name: "din".to_string(),
        };
        assert_eq!(err.to_string(), "stimulus drives unknown input 'din'");
    }

    #[test]
    fn io_display_names_the_path() {
        let err = VerifyError::io("work/tb.v")(std::io::Error::other("disk full"));
        let msg = err.to_string();
        assert!(msg.contains("work/tb.v"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn tool_display() {
        let err = VerifyError::Tool {
            tool: "iverilog".to_string(),
            status: "exit status: 2".to_string(),
            output: "tb.v:3: syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "iverilog failed (exit status: 2): tb.v:3: syntax error"
        );
    }

    #[test]
    fn parse_display() {
        let err = VerifyError::parse(4, "value 'x' is not a number");
        assert_eq!(
            err.to_string(),
            "unreadable simulator output at line 4: value 'x' is not a number"
        );
    }

    #[test]
    fn wrapped_errors_are_transparent() {
        let sim = SimError::no_such_signal("q");
        let expected = sim.to_string();
        assert_eq!(VerifyError::from(sim).to_string(), expected);

        let lower = LowerError::NotSynthesizable {
            module: "fifo".to_string(),
            reason: "too big".to_string(),
        };
        let expected = lower.to_string();
        assert_eq!(VerifyError::from(lower).to_string(), expected);

        let load = IrError::MissingTop(3);
        let expected = load.to_string();
        assert_eq!(VerifyError::from(load).to_string(), expected);
    }
}
