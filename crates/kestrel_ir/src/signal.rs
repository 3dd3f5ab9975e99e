//! Signal declarations.

use serde::{Deserialize, Serialize};

/// Role of a signal in its module's interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Driven from outside the module.
    Input,
    /// Driven inside the module and visible to the parent.
    Output,
    /// A wire or register private to the module.
    Internal,
}

impl SignalKind {
    /// Returns `true` for inputs and outputs.
    pub fn is_port(self) -> bool {
        matches!(self, SignalKind::Input | SignalKind::Output)
    }
}

/// A named, width-bound signal.
///
/// Every value written to a signal is masked to `width` bits. When `signed`
/// is set, operations that are sign-sensitive (ordering comparisons, right
/// shift, widening) treat the value as two's complement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Name, unique within the module.
    pub name: String,
    /// Width in bits, `1..=64`.
    pub width: u32,
    /// Interface role.
    pub kind: SignalKind,
    /// Two's-complement interpretation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub signed: bool,
}

impl Signal {
    /// Creates an unsigned signal.
    pub fn new(name: impl Into<String>, width: u32, kind: SignalKind) -> Self {
        Self {
            name: name.into(),
            width,
            kind,
            signed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports() {
        assert!(SignalKind::Input.is_port());
        assert!(SignalKind::Output.is_port());
        assert!(!SignalKind::Internal.is_port());
    }

    #[test]
    fn unsigned_flag_is_omitted_from_json() {
        let s = Signal::new("count", 5, SignalKind::Output);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"{"name":"count","width":5,"kind":"output"}"#);
        let back: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
