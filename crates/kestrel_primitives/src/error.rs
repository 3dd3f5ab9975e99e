//! Primitive construction errors.

/// A primitive was asked for with parameters it cannot be built with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrimitiveError {
    /// A size or width parameter is out of range.
    #[error("invalid {primitive} parameter: {reason}")]
    InvalidParameter {
        /// The primitive being built.
        primitive: &'static str,
        /// What is wrong with the parameters.
        reason: String,
    },
}

pub(crate) fn invalid(primitive: &'static str, reason: impl Into<String>) -> PrimitiveError {
    PrimitiveError::InvalidParameter {
        primitive,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_parameter_display() {
        assert_eq!(
            invalid("fifo", "depth 12 is not a power of two").to_string(),
            "invalid fifo parameter: depth 12 is not a power of two"
        );
    }
}
