//! Finalizer values and the handles that detach them.

use super::release_map::ReleaseMap;
use crate::exit::FinalExit;
use std::sync::Arc;

/// Key identifying one registered finalizer within its scope.
pub type Key = u64;

/// A release action run exactly once when its scope exits.
///
/// Finalizers observe the exit of the scope they were registered in and
/// report their own outcome through the same erased exit type, so outcomes
/// from nested scopes always merge.
pub type Finalizer = Box<dyn FnOnce(&FinalExit) -> FinalExit + Send>;

/// A finalizer that does nothing.
#[must_use]
pub fn noop_finalizer() -> Finalizer {
    Box::new(|_| FinalExit::finished())
}

/// How `release_all` runs the finalizers of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Reverse registration order, one at a time. Failures merge
    /// sequentially.
    Sequential,
    /// All at once, one worker per finalizer. Failures merge in parallel.
    Parallel,
    /// At most `n` finalizers at a time. Failures merge in parallel.
    ParallelN(usize),
}

/// A clonable reference to a registered finalizer.
///
/// Running the handle releases the underlying finalizer early, out of its
/// scope's normal reverse-order drain. The scope's own drain then finds the
/// key already vacated and skips it, so the finalizer still runs exactly
/// once no matter who gets there first.
#[derive(Clone)]
pub enum FinalizerHandle {
    /// No finalizer was registered (the scope had already exited, or the
    /// resource needs no release).
    Noop,
    /// A live entry in a scope's release map.
    Registered {
        /// The owning scope.
        map: Arc<ReleaseMap>,
        /// The entry's key within that scope.
        key: Key,
    },
    /// A sequence of handles that run in order.
    ///
    /// [`FinalizerHandle::chain`] keeps the sequence flat, so handles built
    /// up in a loop stay shallow.
    Chained(Vec<FinalizerHandle>),
}

impl FinalizerHandle {
    /// Runs every finalizer this handle refers to, left to right, and merges
    /// their outcomes sequentially.
    pub fn run(&self, exit: &FinalExit) -> FinalExit {
        let mut stack: Vec<&Self> = vec![self];
        let mut result = FinalExit::finished();
        while let Some(handle) = stack.pop() {
            match handle {
                Self::Noop => {}
                Self::Registered { map, key } => {
                    result = result.zip_with_seq(map.release(*key, exit), |(), ()| ());
                }
                Self::Chained(parts) => stack.extend(parts.iter().rev()),
            }
        }
        result
    }

    /// Converts this handle into a finalizer suitable for registration in
    /// another scope.
    #[must_use]
    pub fn into_finalizer(self) -> Finalizer {
        Box::new(move |exit| self.run(exit))
    }

    /// Chains two handles: `self` runs first, then `that`.
    #[must_use]
    pub fn chain(self, that: Self) -> Self {
        match (self, that) {
            (Self::Noop, that) => that,
            (this, Self::Noop) => this,
            (Self::Chained(mut first), Self::Chained(second)) => {
                first.extend(second);
                Self::Chained(first)
            }
            (Self::Chained(mut first), that) => {
                first.push(that);
                Self::Chained(first)
            }
            (this, Self::Chained(second)) => {
                let mut parts = Vec::with_capacity(second.len() + 1);
                parts.push(this);
                parts.extend(second);
                Self::Chained(parts)
            }
            (this, that) => Self::Chained(vec![this, that]),
        }
    }
}

impl core::fmt::Debug for FinalizerHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Noop => f.write_str("FinalizerHandle::Noop"),
            Self::Registered { key, .. } => f
                .debug_struct("FinalizerHandle::Registered")
                .field("key", key)
                .finish(),
            Self::Chained(parts) => f.debug_list().entries(parts).finish(),
        }
    }
}
