//! Defect payload.
//!
//! A defect is an unexpected failure: a broken invariant, not an error the
//! caller is expected to handle. Defects propagate past ordinary error
//! handlers by design and only surface through the failure tree.
//!
//! The payload carries a rendered message rather than an opaque `Any` value
//! so that causes stay structurally comparable and hashable across fiber
//! boundaries.

use core::fmt;

/// Payload of an unexpected failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Renders an arbitrary debuggable value into a defect.
    ///
    /// Used at the boundary where a typed error channel is collapsed into
    /// the untyped defect channel.
    #[must_use]
    pub fn from_error<E: fmt::Debug>(error: &E) -> Self {
        Self::new(format!("{error:?}"))
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect: {}", self.message)
    }
}

impl std::error::Error for Defect {}

impl From<&str> for Defect {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Defect {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_defect() {
        let d = Defect::new("index out of range");
        assert_eq!(d.to_string(), "defect: index out of range");
    }

    #[test]
    fn from_error_uses_debug() {
        #[derive(Debug)]
        struct Weird(u32);
        let d = Defect::from_error(&Weird(7));
        assert_eq!(d.message(), "Weird(7)");
    }

    #[test]
    fn structural_equality() {
        assert_eq!(Defect::new("boom"), Defect::from("boom"));
        assert_ne!(Defect::new("boom"), Defect::new("bang"));
    }
}
