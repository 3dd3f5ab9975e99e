//! Load-time errors.
//!
//! Every structural problem in a design is reported here before any backend
//! runs, naming the module and the offending signal or construct.

/// Errors found while checking, flattening or loading a design.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    /// The design's top id does not address a module.
    #[error("design top module id {0} does not exist")]
    MissingTop(u32),

    /// A signal id does not exist in the module.
    #[error("module '{module}': {context} references undefined signal id {id}")]
    DanglingSignal {
        /// Module name.
        module: String,
        /// Where the reference appears.
        context: String,
        /// The dangling raw id.
        id: u32,
    },

    /// An instance refers to a module id that does not exist.
    #[error("module '{module}': instance '{instance}' references undefined module id {id}")]
    DanglingModule {
        /// Parent module name.
        module: String,
        /// Instance name.
        instance: String,
        /// The dangling raw id.
        id: u32,
    },

    /// An instance binds a port the child does not declare.
    #[error("module '{module}': instance '{instance}' has no port '{port}'")]
    UnknownPort {
        /// Parent module name.
        module: String,
        /// Instance name.
        instance: String,
        /// The unknown port name.
        port: String,
    },

    /// A signal or memory declares a width outside `1..=64`.
    #[error("module '{module}': '{name}' has invalid width {width}")]
    InvalidWidth {
        /// Module name.
        module: String,
        /// Signal or memory name.
        name: String,
        /// The declared width.
        width: u32,
    },

    /// Two widths that must agree do not.
    #[error("module '{module}': width mismatch in {context}: expected {expected}, found {actual}")]
    WidthMismatch {
        /// Module name.
        module: String,
        /// The construct being checked.
        context: String,
        /// Required width.
        expected: u32,
        /// Width found.
        actual: u32,
    },

    /// A literal has bits set above its declared width.
    #[error("module '{module}': literal {value:#x} in {context} does not fit in {width} bits")]
    LiteralOverflow {
        /// Module name.
        module: String,
        /// The construct containing the literal.
        context: String,
        /// The literal value.
        value: u64,
        /// The declared width.
        width: u32,
    },

    /// A bit slice falls outside its operand.
    #[error("module '{module}': slice [{high}:{low}] in {context} is out of range for width {width}")]
    SliceOutOfRange {
        /// Module name.
        module: String,
        /// The construct containing the slice.
        context: String,
        /// Most significant bit.
        high: u32,
        /// Least significant bit.
        low: u32,
        /// Operand width.
        width: u32,
    },

    /// An expression's result would not fit in 64 bits, or a concatenation is empty.
    #[error("module '{module}': {context} produces an unsupported width {width}")]
    UnsupportedWidth {
        /// Module name.
        module: String,
        /// The offending construct.
        context: String,
        /// The computed width.
        width: u32,
    },

    /// A signal has more than one driver.
    #[error("module '{module}': signal '{signal}' has multiple drivers")]
    MultipleDrivers {
        /// Module name.
        module: String,
        /// Signal name.
        signal: String,
    },

    /// An input port is driven from inside its module.
    #[error("module '{module}': input '{signal}' cannot be driven inside the module")]
    DrivenInput {
        /// Module name.
        module: String,
        /// Signal name.
        signal: String,
    },

    /// Two signals, memories or instances share a name.
    #[error("module '{module}': duplicate name '{name}'")]
    DuplicateName {
        /// Module name.
        module: String,
        /// The repeated name.
        name: String,
    },

    /// A memory declaration is inconsistent.
    #[error("module '{module}': memory '{memory}': {reason}")]
    InvalidMemory {
        /// Module name.
        module: String,
        /// Memory name.
        memory: String,
        /// What is wrong.
        reason: String,
    },

    /// The instance hierarchy contains a cycle.
    #[error("instance hierarchy is cyclic: {}", modules.join(" -> "))]
    InstanceCycle {
        /// Module names along the cycle.
        modules: Vec<String>,
    },

    /// A module with instances was checked without flattening the design.
    #[error("module '{module}' still contains instances; check the whole design instead")]
    Unflattened {
        /// Module name.
        module: String,
    },

    /// Combinational logic feeds back on itself without a register.
    #[error("module '{module}': combinational loop through {}", signals.join(", "))]
    CombinationalLoop {
        /// Module name.
        module: String,
        /// Every signal on the loop, sorted by name.
        signals: Vec<String>,
    },

    /// An interchange document has an unsupported format version.
    #[error("unsupported IR format version {found} (expected {expected})")]
    FormatVersion {
        /// Version found in the document.
        found: u32,
        /// Version this build reads.
        expected: u32,
    },

    /// An interchange document is not valid JSON for the IR schema.
    #[error("malformed IR document: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_signal_names_module_and_context() {
        let err = IrError::DanglingSignal {
            module: "alu".into(),
            context: "assign to 'sum'".into(),
            id: 12,
        };
        assert_eq!(
            err.to_string(),
            "module 'alu': assign to 'sum' references undefined signal id 12"
        );
    }

    #[test]
    fn width_mismatch_display() {
        let err = IrError::WidthMismatch {
            module: "alu".into(),
            context: "assign to 'sum'".into(),
            expected: 8,
            actual: 9,
        };
        assert_eq!(
            err.to_string(),
            "module 'alu': width mismatch in assign to 'sum': expected 8, found 9"
        );
    }

    #[test]
    fn loop_lists_signals() {
        let err = IrError::CombinationalLoop {
            module: "top".into(),
            signals: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "module 'top': combinational loop through a, b");
    }

    #[test]
    fn instance_cycle_display() {
        let err = IrError::InstanceCycle {
            modules: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "instance hierarchy is cyclic: a -> b -> a");
    }

    #[test]
    fn remaining_variants_display() {
        assert!(IrError::MissingTop(3).to_string().contains("id 3"));
        let cases = [
            IrError::DanglingModule {
                module: "top".into(),
                instance: "u0".into(),
                id: 9,
            },
            IrError::UnknownPort {
                module: "top".into(),
                instance: "u0".into(),
                port: "din".into(),
            },
            IrError::InvalidWidth {
                module: "top".into(),
                name: "bus".into(),
                width: 65,
            },
            IrError::LiteralOverflow {
                module: "top".into(),
                context: "x".into(),
                value: 256,
                width: 8,
            },
            IrError::SliceOutOfRange {
                module: "top".into(),
                context: "x".into(),
                high: 9,
                low: 0,
                width: 8,
            },
            IrError::UnsupportedWidth {
                module: "top".into(),
                context: "concat".into(),
                width: 72,
            },
            IrError::MultipleDrivers {
                module: "top".into(),
                signal: "q".into(),
            },
            IrError::DrivenInput {
                module: "top".into(),
                signal: "a".into(),
            },
            IrError::DuplicateName {
                module: "top".into(),
                name: "a".into(),
            },
            IrError::InvalidMemory {
                module: "top".into(),
                memory: "ram".into(),
                reason: "depth is zero".into(),
            },
            IrError::Unflattened {
                module: "top".into(),
            },
            IrError::FormatVersion {
                found: 9,
                expected: 1,
            },
            IrError::Malformed("eof".into()),
        ];
        for err in cases {
            assert!(!err.to_string().is_empty());
        }
    }
}
