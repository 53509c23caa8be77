//! The per-scope finalizer registry.
//!
//! A [`ReleaseMap`] collects the release actions of every resource acquired
//! in one scope and runs them when the scope exits. The map is a two-state
//! machine:
//!
//! - `Running`: finalizers accumulate under monotonically increasing keys.
//! - `Exited`: the scope's exit is recorded and the map is drained. The
//!   state is absorbing; any finalizer offered afterwards runs immediately
//!   against the recorded exit instead of being stored.
//!
//! Keys keep increasing after exit, so a key observed by a caller is never
//! reissued. Finalizers always run outside the map's lock; a finalizer may
//! therefore itself register into or release from any map, including this
//! one.

use super::finalizer::{ExecutionStrategy, Finalizer, FinalizerHandle, Key};
use crate::exit::FinalExit;
use crate::tracing_compat::debug;
use core::mem;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

enum State {
    Running {
        next_key: Key,
        finalizers: BTreeMap<Key, Finalizer>,
    },
    Exited {
        next_key: Key,
        exit: FinalExit,
    },
}

/// Registry of the finalizers owned by one scope.
pub struct ReleaseMap {
    state: Mutex<State>,
}

impl ReleaseMap {
    /// Creates an open map with no finalizers.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Running {
                next_key: 1,
                finalizers: BTreeMap::new(),
            }),
        })
    }

    /// Returns true if the scope has not exited yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(&*self.state.lock(), State::Running { .. })
    }

    /// Registers `finalizer` if the scope is still open.
    ///
    /// If the scope has already exited the finalizer runs immediately
    /// against the recorded exit and its outcome comes back as `Err`. The
    /// key counter advances either way.
    pub fn add_if_open(&self, finalizer: Finalizer) -> Result<Key, FinalExit> {
        let exit = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Running {
                    next_key,
                    finalizers,
                } => {
                    let key = *next_key;
                    *next_key += 1;
                    finalizers.insert(key, finalizer);
                    debug!(key, "finalizer registered");
                    return Ok(key);
                }
                State::Exited { next_key, exit } => {
                    *next_key += 1;
                    exit.clone()
                }
            }
        };
        debug!("finalizer offered to exited scope, running immediately");
        Err(finalizer(&exit))
    }

    /// Registers `finalizer` and returns a handle for releasing it early.
    ///
    /// The second component reports the finalizer's outcome when the scope
    /// had already exited; it is the finished exit otherwise.
    pub fn add(self: &Arc<Self>, finalizer: Finalizer) -> (FinalizerHandle, FinalExit) {
        match self.add_if_open(finalizer) {
            Ok(key) => (
                FinalizerHandle::Registered {
                    map: Arc::clone(self),
                    key,
                },
                FinalExit::finished(),
            ),
            Err(outcome) => (FinalizerHandle::Noop, outcome),
        }
    }

    /// Swaps the finalizer stored under `key`, returning the previous one.
    ///
    /// `Ok(None)` means the key was vacant (released early, or never issued
    /// by this map). If the scope has already exited the replacement runs
    /// immediately and its outcome comes back as `Err`.
    pub fn replace(&self, key: Key, finalizer: Finalizer) -> Result<Option<Finalizer>, FinalExit> {
        let exit = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Running { finalizers, .. } => {
                    return Ok(finalizers.insert(key, finalizer));
                }
                State::Exited { exit, .. } => exit.clone(),
            }
        };
        Err(finalizer(&exit))
    }

    /// Removes and returns the finalizer under `key` without running it.
    ///
    /// The caller takes over responsibility for the release action.
    pub fn remove(&self, key: Key) -> Option<Finalizer> {
        match &mut *self.state.lock() {
            State::Running { finalizers, .. } => finalizers.remove(&key),
            State::Exited { .. } => None,
        }
    }

    /// Runs and discards the finalizer under `key`, observing `exit`.
    ///
    /// Idempotent per key: releasing a vacated key, or any key after the
    /// scope exited, reports the finished exit.
    pub fn release(&self, key: Key, exit: &FinalExit) -> FinalExit {
        let finalizer = match &mut *self.state.lock() {
            State::Running { finalizers, .. } => finalizers.remove(&key),
            State::Exited { .. } => None,
        };
        match finalizer {
            Some(finalizer) => finalizer(exit),
            None => FinalExit::finished(),
        }
    }

    /// Exits the scope: records `exit`, drains every finalizer under
    /// `strategy`, and returns their merged outcome.
    ///
    /// A second call observes the absorbing `Exited` state and reports the
    /// finished exit without running anything.
    pub fn release_all(&self, exit: &FinalExit, strategy: ExecutionStrategy) -> FinalExit {
        let finalizers = {
            let mut state = self.state.lock();
            let next_key = match &*state {
                State::Running { next_key, .. } => *next_key,
                State::Exited { .. } => return FinalExit::finished(),
            };
            let previous = mem::replace(
                &mut *state,
                State::Exited {
                    next_key,
                    exit: exit.clone(),
                },
            );
            match previous {
                State::Running { finalizers, .. } => finalizers,
                // The lock was held across the inspection above.
                State::Exited { .. } => unreachable!("state changed under the lock"),
            }
        };
        debug!(count = finalizers.len(), "scope exiting, draining finalizers");
        match strategy {
            ExecutionStrategy::Sequential => Self::drain_sequential(finalizers, exit),
            ExecutionStrategy::Parallel => {
                let workers = finalizers.len();
                Self::drain_parallel(finalizers, exit, workers)
            }
            ExecutionStrategy::ParallelN(n) => Self::drain_parallel(finalizers, exit, n.max(1)),
        }
    }

    fn drain_sequential(finalizers: BTreeMap<Key, Finalizer>, exit: &FinalExit) -> FinalExit {
        let mut result = FinalExit::finished();
        for (_, finalizer) in finalizers.into_iter().rev() {
            result = result.zip_with_seq(finalizer(exit), |(), ()| ());
        }
        result
    }

    fn drain_parallel(
        finalizers: BTreeMap<Key, Finalizer>,
        exit: &FinalExit,
        workers: usize,
    ) -> FinalExit {
        if finalizers.is_empty() {
            return FinalExit::finished();
        }
        let pending: SegQueue<Finalizer> = SegQueue::new();
        for (_, finalizer) in finalizers {
            pending.push(finalizer);
        }
        let outcomes: SegQueue<FinalExit> = SegQueue::new();
        let workers = workers.min(pending.len()).max(1);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while let Some(finalizer) = pending.pop() {
                        outcomes.push(finalizer(exit));
                    }
                });
            }
        });
        let mut result = FinalExit::finished();
        while let Some(outcome) = outcomes.pop() {
            result = result.zip_with_par(outcome, |(), ()| ());
        }
        result
    }
}
