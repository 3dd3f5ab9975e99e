//! Versioned JSON interchange for designs.
//!
//! Front ends hand designs to the kernel as an [`IrDocument`]. The document
//! carries a format version so a reader never silently misinterprets an IR
//! written by a newer generator.

use serde::{Deserialize, Serialize};

use crate::design::Design;
use crate::error::IrError;

/// Interchange format version written and accepted by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// A serialized design plus its format version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrDocument {
    /// Version of the schema the document was written with.
    pub format_version: u32,
    /// The design itself.
    pub design: Design,
}

impl IrDocument {
    /// Wraps a design at the current format version.
    pub fn new(design: Design) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            design,
        }
    }
}

/// Serializes a design as a pretty-printed interchange document.
pub fn to_json(design: &Design) -> Result<String, IrError> {
    let doc = IrDocument::new(design.clone());
    serde_json::to_string_pretty(&doc).map_err(|e| IrError::Malformed(e.to_string()))
}

/// Parses an interchange document, rejecting unknown format versions.
pub fn from_json(text: &str) -> Result<Design, IrError> {
    let doc: IrDocument =
        serde_json::from_str(text).map_err(|e| IrError::Malformed(e.to_string()))?;
    if doc.format_version != FORMAT_VERSION {
        return Err(IrError::FormatVersion {
            found: doc.format_version,
            expected: FORMAT_VERSION,
        });
    }
    Ok(doc.design)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use crate::expr::Expr;

    fn xor_design() -> Design {
        let mut b = ModuleBuilder::new("xor2");
        let a = b.input("a", 1);
        let c = b.input("b", 1);
        let y = b.output("y", 1);
        b.assign(y, Expr::sig(a).xor(Expr::sig(c)));
        Design::single(b.finish())
    }

    #[test]
    fn json_round_trip() {
        let design = xor_design();
        let text = to_json(&design).unwrap();
        assert!(text.contains("\"format_version\": 1"));
        assert_eq!(from_json(&text).unwrap(), design);
    }

    #[test]
    fn expressions_are_tagged() {
        let text = to_json(&xor_design()).unwrap();
        assert!(text.contains("\"type\": \"binary\""));
        assert!(text.contains("\"op\": \"xor\""));
    }

    #[test]
    fn newer_version_rejected() {
        let text = to_json(&xor_design())
            .unwrap()
            .replace("\"format_version\": 1", "\"format_version\": 2");
        assert_eq!(
            from_json(&text).unwrap_err(),
            IrError::FormatVersion {
                found: 2,
                expected: 1
            }
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(from_json("{"), Err(IrError::Malformed(_))));
    }
}
