//! Sharing, swapping, and eager acquisition.

use super::{drain_of, Managed};
use crate::exit::{Exit, FinalExit};
use crate::runtime::Cx;
use crate::scope::{noop_finalizer, ExecutionStrategy, FinalizerHandle, Key, ReleaseMap};
use crate::tracing_compat::trace;
use core::fmt;
use core::marker::PhantomData;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

impl<R, E, A> Managed<R, E, A>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// Defers acquisition to first use and shares the result.
    ///
    /// The [`Memoized`] thunk acquires at most once, however many clones
    /// call it concurrently; early callers wait for the one in-flight
    /// acquisition. The finalizer is registered once, in the scope this
    /// `memoize` was acquired in, so the shared resource lives until that
    /// scope exits.
    pub fn memoize(self) -> Managed<R, E, Memoized<R, E, A>>
    where
        E: Clone,
        A: Clone,
    {
        Managed::new(move |_cx, map| {
            let memo = Memoized {
                cell: Arc::new(MemoCell {
                    state: Mutex::new(MemoState::Pending(Some(self))),
                    done: Condvar::new(),
                    scope: Arc::clone(map),
                }),
            };
            Exit::Success((FinalizerHandle::Noop, memo))
        })
    }

    /// Reserves a slot that a sequence of resources can rotate through.
    ///
    /// Each [`Switchable::switch`] releases the slot's current resource and
    /// installs the next one, so at most one resource from the sequence is
    /// ever live; the scope's own drain frees whichever is active at exit.
    pub fn switchable() -> Managed<R, E, Switchable<R, E, A>> {
        Managed::new(move |cx, map| {
            cx.uninterruptible(|_| match map.add_if_open(noop_finalizer()) {
                Ok(key) => {
                    let switchable = Switchable {
                        map: Arc::clone(map),
                        key,
                        swap_lock: Mutex::new(()),
                        _managed: PhantomData,
                    };
                    let handle = FinalizerHandle::Registered {
                        map: Arc::clone(map),
                        key,
                    };
                    Exit::Success((handle, switchable))
                }
                Err(_) => Exit::die("switchable slot reserved in an exited scope"),
            })
        })
    }

    /// Acquires eagerly into a private scope.
    ///
    /// On failure the private scope drains immediately and the cause
    /// propagates. On success the returned [`Preallocated`] hands out the
    /// value without re-acquiring; see its docs for the release contract.
    pub fn preallocate(self, cx: &Cx<R>) -> Exit<E, Preallocated<A>>
    where
        E: Clone + fmt::Debug,
    {
        let scope = ReleaseMap::new();
        match self.run_scoped(cx, &scope) {
            Exit::Success((_, value)) => Exit::Success(Preallocated { value, scope }),
            Exit::Failure(cause) => {
                let failed: Exit<E, ()> = Exit::Failure(cause.clone());
                let drained = scope.release_all(&failed.erase(), ExecutionStrategy::Sequential);
                match drained {
                    Exit::Success(()) => Exit::Failure(cause),
                    Exit::Failure(release_cause) => {
                        Exit::Failure(cause.then(release_cause.widen()))
                    }
                }
            }
        }
    }
}

// =============================================================================
// Memoized
// =============================================================================

enum MemoState<R, E, A> {
    /// Not yet requested; holds the acquisition to run.
    Pending(Option<Managed<R, E, A>>),
    /// One caller is acquiring; everyone else waits.
    Acquiring,
    /// The shared outcome.
    Ready(Exit<E, A>),
}

struct MemoCell<R, E, A> {
    state: Mutex<MemoState<R, E, A>>,
    done: Condvar,
    scope: Arc<ReleaseMap>,
}

/// A shared, lazily acquired resource produced by [`Managed::memoize`].
pub struct Memoized<R, E, A> {
    cell: Arc<MemoCell<R, E, A>>,
}

impl<R, E, A> Clone for Memoized<R, E, A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<R, E, A> Memoized<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    /// Returns the shared resource, acquiring it on first call.
    ///
    /// Concurrent callers during the first acquisition block until it
    /// completes and then share its exit, failure included.
    pub fn get(&self, cx: &Cx<R>) -> Exit<E, A> {
        let managed = {
            let mut state = self.cell.state.lock();
            loop {
                match &mut *state {
                    MemoState::Ready(exit) => return exit.clone(),
                    MemoState::Acquiring => self.cell.done.wait(&mut state),
                    MemoState::Pending(slot) => {
                        let Some(managed) = slot.take() else {
                            // Pending always holds the acquisition until this
                            // take, which transitions to Acquiring below.
                            unreachable!("memo cell pending without an acquisition")
                        };
                        *state = MemoState::Acquiring;
                        break managed;
                    }
                }
            }
        };
        trace!("first memoized use, acquiring");
        let exit = managed
            .run_scoped(cx, &self.cell.scope)
            .map(|(_, value)| value);
        let mut state = self.cell.state.lock();
        *state = MemoState::Ready(exit.clone());
        self.cell.done.notify_all();
        exit
    }
}

// =============================================================================
// Switchable
// =============================================================================

/// A scope slot that rotates through a sequence of resources.
pub struct Switchable<R, E, A> {
    map: Arc<ReleaseMap>,
    key: Key,
    swap_lock: Mutex<()>,
    _managed: PhantomData<fn() -> (R, E, A)>,
}

impl<R, E, A> Switchable<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + fmt::Debug + 'static,
    A: Send + 'static,
{
    /// Releases the currently held resource and acquires `next` into the
    /// same slot.
    ///
    /// Swaps are serialized and run uninterruptibly, so no cancellation can
    /// observe two live resources or none with one pending.
    pub fn switch(&self, cx: &Cx<R>, next: Managed<R, E, A>) -> Exit<E, A> {
        let _serialized = self.swap_lock.lock();
        cx.uninterruptible(|restore| {
            match self.map.replace(self.key, noop_finalizer()) {
                Ok(previous) => {
                    if let Some(previous) = previous {
                        if let Exit::Failure(cause) = previous(&FinalExit::finished()) {
                            return Exit::Failure(cause.widen());
                        }
                    }
                }
                Err(outcome) => return Self::exited_scope(outcome),
            }
            let inner = ReleaseMap::new();
            let acquired = restore.interruptible(|| next.run_scoped(cx, &inner));
            match acquired {
                Exit::Success((_, value)) => match self.map.replace(self.key, drain_of(&inner)) {
                    Ok(_) => Exit::Success(value),
                    // The scope closed mid-swap; the drain already ran.
                    Err(outcome) => Self::exited_scope(outcome),
                },
                Exit::Failure(cause) => {
                    let failed: Exit<E, ()> = Exit::Failure(cause.clone());
                    let drained =
                        inner.release_all(&failed.erase(), ExecutionStrategy::Sequential);
                    match drained {
                        Exit::Success(()) => Exit::Failure(cause),
                        Exit::Failure(release_cause) => {
                            Exit::Failure(cause.then(release_cause.widen()))
                        }
                    }
                }
            }
        })
    }

    fn exited_scope(outcome: FinalExit) -> Exit<E, A> {
        match outcome {
            Exit::Success(()) => Exit::die("switch in an exited scope"),
            Exit::Failure(cause) => Exit::Failure(cause.widen()),
        }
    }
}

// =============================================================================
// Preallocated
// =============================================================================

/// An already-acquired resource that can be handed to a consuming scope.
///
/// The private scope holding the release action is drained by whichever
/// consuming scope exits first; registrations from later uses observe the
/// drained state and are no-ops. Callers that never pass the value to a
/// scope can free it explicitly with [`Preallocated::release`].
pub struct Preallocated<A> {
    value: A,
    scope: Arc<ReleaseMap>,
}

impl<A> Preallocated<A>
where
    A: Clone + Send + 'static,
{
    /// The acquired value.
    #[must_use]
    pub fn value(&self) -> &A {
        &self.value
    }

    /// A resource that re-registers the existing release into the consuming
    /// scope instead of re-acquiring.
    pub fn managed<R, E>(&self) -> Managed<R, E, A>
    where
        R: Send + Sync + 'static,
        E: Send + 'static,
    {
        let value = self.value.clone();
        let scope = Arc::clone(&self.scope);
        Managed::new(move |_cx, outer| {
            let (handle, late) = outer.add(drain_of(&scope));
            match late {
                Exit::Success(()) => Exit::Success((handle, value)),
                Exit::Failure(cause) => Exit::Failure(cause.widen()),
            }
        })
    }

    /// Frees the resource now, observing `exit`.
    pub fn release(&self, exit: &FinalExit) -> FinalExit {
        self.scope.release_all(exit, ExecutionStrategy::Sequential)
    }
}
