//! Captured trace frames attached to failure leaves.
//!
//! Traces are deliberately lightweight: a list of rendered frames supplied by
//! whoever raised the failure. The algebra never inspects them; the
//! `Stackless` wrapper in the failure tree records that frames were elided
//! for performance.

use core::fmt;

/// A captured list of trace frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Trace {
    frames: Vec<String>,
}

impl Trace {
    /// An empty trace.
    #[must_use]
    pub const fn none() -> Self {
        Self { frames: Vec::new() }
    }

    /// A trace with the given frames.
    #[must_use]
    pub fn from_frames(frames: Vec<String>) -> Self {
        Self { frames }
    }

    /// Appends one frame.
    pub fn push(&mut self, frame: impl Into<String>) {
        self.frames.push(frame.into());
    }

    /// Returns the captured frames, innermost first.
    #[must_use]
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// Returns true if no frames were captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frames.is_empty() {
            return write!(f, "<no trace>");
        }
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  at {frame}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_trace_displays_placeholder() {
        assert_eq!(Trace::none().to_string(), "<no trace>");
        assert!(Trace::none().is_empty());
    }

    #[test]
    fn frames_render_in_order() {
        let mut t = Trace::none();
        t.push("acquire");
        t.push("use");
        assert_eq!(t.frames().len(), 2);
        assert_eq!(t.to_string(), "  at acquire\n  at use");
    }
}
