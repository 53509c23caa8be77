//! Terminal outcomes.
//!
//! An [`Exit`] is produced exactly once per computation and is immutable
//! thereafter: either the value it succeeded with, or the [`Cause`] tree
//! describing how it failed. Zipping two exits sequentially merges failures
//! with `Then`; zipping in parallel merges with `Both`.
//!
//! Finalizers receive and produce a [`FinalExit`]: the value slot is erased
//! to `()` and the typed error channel is erased to defects, so finalizer
//! outcomes from scopes with different error types can always be merged.

use crate::cause::Cause;
use crate::types::{Defect, FiberId, Trace};
use core::convert::Infallible;
use core::fmt;

/// The terminal outcome of a computation.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Exit<E, A> {
    /// The computation produced a value.
    Success(A),
    /// The computation failed; the cause records every contributing failure.
    Failure(Cause<E>),
}

/// The exit value handed to finalizers: value and error channel erased.
///
/// Interruption and defects survive erasure; typed errors are rendered into
/// defects by [`Exit::erase`].
pub type FinalExit = Exit<Infallible, ()>;

impl<E, A> Exit<E, A> {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// A successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// A failed exit with a typed error.
    #[must_use]
    pub fn fail(error: E) -> Self {
        Self::Failure(Cause::fail(error))
    }

    /// A failed exit with the given cause.
    #[must_use]
    pub const fn fail_cause(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// A failed exit carrying a defect.
    #[must_use]
    pub fn die(defect: impl Into<Defect>) -> Self {
        Self::Failure(Cause::die(defect))
    }

    /// An interrupted exit attributed to `fiber`.
    #[must_use]
    pub fn interrupt(fiber: FiberId) -> Self {
        Self::Failure(Cause::interrupt(fiber))
    }

    /// An interrupted exit with a captured trace.
    #[must_use]
    pub fn interrupt_with_trace(fiber: FiberId, trace: Trace) -> Self {
        Self::Failure(Cause::interrupt_with_trace(fiber, trace))
    }

    // =========================================================================
    // Predicates and accessors
    // =========================================================================

    /// Returns true if this exit is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this exit is a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if this exit records an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Success(_) => false,
            Self::Failure(cause) => cause.is_interrupted(),
        }
    }

    /// The success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// The failure cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause),
        }
    }

    /// Converts to a `Result`, surfacing the full cause on failure.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(cause) => Err(cause),
        }
    }

    // =========================================================================
    // Transforms
    // =========================================================================

    /// Maps the success value; failures pass through untouched.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<E, B> {
        match self {
            Self::Success(value) => Exit::Success(f(value)),
            Self::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Maps every typed error in the cause; successes pass through.
    pub fn map_error<E2>(self, f: impl FnMut(&E) -> E2) -> Exit<E2, A> {
        match self {
            Self::Success(value) => Exit::Success(value),
            Self::Failure(cause) => Exit::Failure(cause.map(f)),
        }
    }

    /// Maps the whole failure cause; successes pass through.
    pub fn map_error_cause<E2>(self, f: impl FnOnce(Cause<E>) -> Cause<E2>) -> Exit<E2, A> {
        match self {
            Self::Success(value) => Exit::Success(value),
            Self::Failure(cause) => Exit::Failure(f(cause)),
        }
    }

    /// Discards the success value.
    pub fn unit(self) -> Exit<E, ()> {
        self.map(|_| ())
    }

    // =========================================================================
    // Zips
    // =========================================================================

    /// Combines two exits: two failures merge their causes with `g`, a
    /// single failure propagates, two successes combine with `f`.
    pub fn zip_with<B, C>(
        self,
        that: Exit<E, B>,
        f: impl FnOnce(A, B) -> C,
        g: impl FnOnce(Cause<E>, Cause<E>) -> Cause<E>,
    ) -> Exit<E, C> {
        match (self, that) {
            (Self::Success(a), Exit::Success(b)) => Exit::Success(f(a, b)),
            (Self::Failure(c1), Exit::Failure(c2)) => Exit::Failure(g(c1, c2)),
            (Self::Failure(cause), Exit::Success(_)) | (Self::Success(_), Exit::Failure(cause)) => {
                Exit::Failure(cause)
            }
        }
    }

    /// Sequential zip: failure causes merge with `Then`.
    pub fn zip_with_seq<B, C>(self, that: Exit<E, B>, f: impl FnOnce(A, B) -> C) -> Exit<E, C> {
        self.zip_with(that, f, Cause::then)
    }

    /// Parallel zip: failure causes merge with `Both`.
    pub fn zip_with_par<B, C>(self, that: Exit<E, B>, f: impl FnOnce(A, B) -> C) -> Exit<E, C> {
        self.zip_with(that, f, Cause::both)
    }

    /// Reduces exits of sequentially composed computations to one exit,
    /// merging failures with `Then` and preserving input order of values.
    ///
    /// Returns `None` for an empty input.
    pub fn collect_all<I>(exits: I) -> Option<Exit<E, Vec<A>>>
    where
        I: IntoIterator<Item = Self>,
    {
        Self::collect_with(exits, Cause::then)
    }

    /// Reduces exits of concurrently composed computations to one exit,
    /// merging failures with `Both` and preserving input order of values.
    ///
    /// Returns `None` for an empty input.
    pub fn collect_all_par<I>(exits: I) -> Option<Exit<E, Vec<A>>>
    where
        I: IntoIterator<Item = Self>,
    {
        Self::collect_with(exits, Cause::both)
    }

    fn collect_with<I>(
        exits: I,
        mut g: impl FnMut(Cause<E>, Cause<E>) -> Cause<E>,
    ) -> Option<Exit<E, Vec<A>>>
    where
        I: IntoIterator<Item = Self>,
    {
        let mut iter = exits.into_iter();
        let mut acc = iter.next()?.map(|a| vec![a]);
        for exit in iter {
            acc = acc.zip_with(
                exit,
                |mut values, a| {
                    values.push(a);
                    values
                },
                &mut g,
            );
        }
        Some(acc)
    }

    // =========================================================================
    // Erasure
    // =========================================================================

    /// Erases this exit for the finalizer boundary: the value becomes `()`
    /// and typed errors become defects, while interruptions and existing
    /// defects survive unchanged.
    #[must_use]
    pub fn erase(&self) -> FinalExit
    where
        E: fmt::Debug,
    {
        match self {
            Self::Success(_) => Exit::Success(()),
            Self::Failure(cause) => Exit::Failure(cause.into_defects()),
        }
    }
}

impl<A> Exit<Infallible, A> {
    /// Re-types an exit whose typed error channel is provably unused.
    #[must_use]
    pub fn widen<E>(self) -> Exit<E, A> {
        match self {
            Self::Success(value) => Exit::Success(value),
            Self::Failure(cause) => Exit::Failure(cause.widen()),
        }
    }
}

impl FinalExit {
    /// The successful finalizer exit.
    #[must_use]
    pub const fn finished() -> Self {
        Self::Success(())
    }
}

impl<E, A> From<Result<A, E>> for Exit<E, A> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::fail(error),
        }
    }
}

impl<E: fmt::Debug, A: fmt::Debug> fmt::Debug for Exit<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(value) => f.debug_tuple("Success").field(value).finish(),
            Self::Failure(cause) => f.debug_tuple("Failure").field(cause).finish(),
        }
    }
}
