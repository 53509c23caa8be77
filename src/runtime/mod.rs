//! The scheduler seam.
//!
//! # Overview
//!
//! A [`Cx`] is the capability context a resource computation runs under: an
//! environment handle, the identity of the running fiber, and a cooperative
//! interruption flag with attribution. Forking spawns the child on its own
//! thread and yields a [`TaskHandle`] for joining, interrupting, or
//! abandoning it.
//!
//! Interruption is cooperative. A fiber observes cancellation only at
//! [`Cx::check_interrupt`] polling points, and not at all while inside an
//! [`Cx::uninterruptible`] region unless the region opts back in through
//! [`Restore`].
//!
//! The scheduler proper lives outside this crate; thread-per-fork keeps the
//! resource core testable without an executor.

use crate::cause::Cause;
use crate::exit::Exit;
use crate::types::{FiberId, RuntimeFiberId};
use crate::tracing_compat::trace;
use core::mem;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use core::time::Duration;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Per-fiber interruption state.
///
/// Shared between the fiber's own [`Cx`] and every [`TaskHandle`] that can
/// interrupt it.
pub struct FiberState {
    id: RuntimeFiberId,
    interrupted: AtomicBool,
    interrupter: Mutex<FiberId>,
    mask_depth: AtomicU32,
}

impl FiberState {
    fn fresh() -> Arc<Self> {
        Arc::new(Self {
            id: RuntimeFiberId::next(),
            interrupted: AtomicBool::new(false),
            interrupter: Mutex::new(FiberId::None),
            mask_depth: AtomicU32::new(0),
        })
    }

    /// Flags the fiber as interrupted, attributing the request to `by`.
    ///
    /// Repeated interruptions accumulate their attributions.
    pub fn interrupt(&self, by: FiberId) {
        {
            let mut interrupter = self.interrupter.lock();
            let merged = mem::replace(&mut *interrupter, FiberId::None).combine(by);
            *interrupter = merged;
        }
        self.interrupted.store(true, Ordering::Release);
    }

    fn attribution(&self) -> FiberId {
        let attributed = self.interrupter.lock().clone();
        if attributed.is_none() {
            FiberId::Runtime(self.id)
        } else {
            attributed
        }
    }
}

/// Capability context for one fiber.
///
/// Cloning shares the environment and the fiber state; use
/// [`Cx::fork`] to get a context with a distinct fiber identity.
pub struct Cx<R> {
    env: Arc<R>,
    fiber: Arc<FiberState>,
}

impl<R> Clone for Cx<R> {
    fn clone(&self) -> Self {
        Self {
            env: Arc::clone(&self.env),
            fiber: Arc::clone(&self.fiber),
        }
    }
}

impl<R> Cx<R> {
    /// Root context with a fresh fiber identity.
    pub fn new(env: R) -> Self {
        Self {
            env: Arc::new(env),
            fiber: FiberState::fresh(),
        }
    }

    /// The environment.
    #[must_use]
    pub fn environment(&self) -> &R {
        &self.env
    }

    /// Identity of the running fiber.
    #[must_use]
    pub fn fiber_id(&self) -> RuntimeFiberId {
        self.fiber.id
    }

    /// True if this fiber has been flagged for interruption, masked or not.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.fiber.interrupted.load(Ordering::Acquire)
    }

    /// Cooperative cancellation point.
    ///
    /// Reports the interruption cause when the fiber has been flagged and no
    /// uninterruptible region is active.
    pub fn check_interrupt<E>(&self) -> Result<(), Cause<E>> {
        if self.fiber.mask_depth.load(Ordering::Acquire) == 0
            && self.fiber.interrupted.load(Ordering::Acquire)
        {
            return Err(Cause::interrupt(self.fiber.attribution()));
        }
        Ok(())
    }

    /// Runs `f` with interruption masked.
    ///
    /// The mask nests; `f` receives a [`Restore`] to run sub-regions at the
    /// surrounding interruptibility.
    pub fn uninterruptible<T>(&self, f: impl FnOnce(&Restore<'_>) -> T) -> T {
        let _guard = MaskGuard::enter(&self.fiber);
        f(&Restore { fiber: &self.fiber })
    }

    /// Runs `f` on a new fiber with its own identity and interruption state.
    pub fn fork<E, A>(
        &self,
        f: impl FnOnce(&Cx<R>) -> Exit<E, A> + Send + 'static,
    ) -> TaskHandle<E, A>
    where
        R: Send + Sync + 'static,
        E: Send + 'static,
        A: Send + 'static,
    {
        let child = Self {
            env: Arc::clone(&self.env),
            fiber: FiberState::fresh(),
        };
        let inner = Arc::new(TaskInner {
            state: Mutex::new(TaskState::Running),
            done: Condvar::new(),
        });
        let handle = TaskHandle {
            inner: Arc::clone(&inner),
            fiber: Arc::clone(&child.fiber),
        };
        trace!(child = child.fiber.id.id, "forking fiber");
        std::thread::spawn(move || {
            let exit = f(&child);
            let hook = {
                let mut state = inner.state.lock();
                match mem::replace(&mut *state, TaskState::Done(exit)) {
                    TaskState::Running => {
                        inner.done.notify_all();
                        None
                    }
                    TaskState::Abandoned(hook) => {
                        // Nobody will join; hand the exit to the abandon hook.
                        let TaskState::Done(exit) =
                            mem::replace(&mut *state, TaskState::Taken)
                        else {
                            unreachable!("state was just set to Done")
                        };
                        Some((hook, exit))
                    }
                    TaskState::Done(_) | TaskState::Taken => {
                        unreachable!("fiber completed twice")
                    }
                }
            };
            if let Some((hook, exit)) = hook {
                if let Some(hook) = hook {
                    hook(exit);
                }
            }
        });
        handle
    }
}

struct MaskGuard<'a> {
    fiber: &'a FiberState,
}

impl<'a> MaskGuard<'a> {
    fn enter(fiber: &'a FiberState) -> Self {
        fiber.mask_depth.fetch_add(1, Ordering::AcqRel);
        Self { fiber }
    }
}

impl Drop for MaskGuard<'_> {
    fn drop(&mut self) {
        self.fiber.mask_depth.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Escape hatch handed to [`Cx::uninterruptible`] closures.
pub struct Restore<'a> {
    fiber: &'a FiberState,
}

impl Restore<'_> {
    /// Runs `f` at the interruptibility that surrounded the mask.
    pub fn interruptible<T>(&self, f: impl FnOnce() -> T) -> T {
        // The guard restores the mask depth even if `f` panics.
        struct Remask<'a>(&'a FiberState);
        impl Drop for Remask<'_> {
            fn drop(&mut self) {
                self.0.mask_depth.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.fiber.mask_depth.fetch_sub(1, Ordering::AcqRel);
        let _remask = Remask(self.fiber);
        f()
    }
}

type AbandonHook<E, A> = Box<dyn FnOnce(Exit<E, A>) + Send>;

enum TaskState<E, A> {
    Running,
    Done(Exit<E, A>),
    Taken,
    Abandoned(Option<AbandonHook<E, A>>),
}

struct TaskInner<E, A> {
    state: Mutex<TaskState<E, A>>,
    done: Condvar,
}

/// Handle to a forked fiber.
///
/// Clones share the same fiber; at most one clone may take the exit through
/// [`TaskHandle::join`], the rest may only flag, wait, or abandon.
pub struct TaskHandle<E, A> {
    inner: Arc<TaskInner<E, A>>,
    fiber: Arc<FiberState>,
}

impl<E, A> Clone for TaskHandle<E, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            fiber: Arc::clone(&self.fiber),
        }
    }
}

impl<E, A> TaskHandle<E, A> {
    /// Identity of the forked fiber.
    #[must_use]
    pub fn fiber_id(&self) -> RuntimeFiberId {
        self.fiber.id
    }

    /// Blocks until the fiber completes and returns its exit.
    pub fn join(self) -> Exit<E, A> {
        let mut state = self.inner.state.lock();
        self.inner
            .done
            .wait_while(&mut state, |s| matches!(s, TaskState::Running));
        match mem::replace(&mut *state, TaskState::Taken) {
            TaskState::Done(exit) => exit,
            // join consumes the handle; no other transition can win.
            _ => unreachable!("joined fiber had no exit"),
        }
    }

    /// Waits up to `timeout` for the fiber.
    ///
    /// On timeout the fiber is abandoned: when it eventually completes its
    /// exit goes to `on_abandon` instead of a joiner. The race between
    /// completion and the deadline resolves under one lock, so exactly one
    /// of the two outcomes happens.
    pub fn join_timeout(
        self,
        timeout: Duration,
        on_abandon: impl FnOnce(Exit<E, A>) + Send + 'static,
    ) -> Option<Exit<E, A>> {
        let mut state = self.inner.state.lock();
        let result = self.inner.done.wait_while_for(
            &mut state,
            |s| matches!(s, TaskState::Running),
            timeout,
        );
        if matches!(&*state, TaskState::Running) && result.timed_out() {
            *state = TaskState::Abandoned(Some(Box::new(on_abandon)));
            return None;
        }
        match mem::replace(&mut *state, TaskState::Taken) {
            TaskState::Done(exit) => Some(exit),
            _ => unreachable!("joined fiber had no exit"),
        }
    }

    /// Flags the fiber as interrupted on behalf of `by`, then joins it.
    ///
    /// The fiber observes the flag at its next cancellation point; the
    /// returned exit reflects however it actually finished.
    pub fn interrupt(self, by: FiberId) -> Exit<E, A> {
        self.fiber.interrupt(by);
        self.join()
    }

    /// Flags the fiber as interrupted without waiting for it.
    pub fn signal_interrupt(&self, by: FiberId) {
        self.fiber.interrupt(by);
    }

    /// Blocks until the fiber completes, without taking its exit.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        self.inner
            .done
            .wait_while(&mut state, |s| matches!(s, TaskState::Running));
    }

    /// Detaches from the fiber without waiting.
    ///
    /// Its eventual exit goes to `on_abandon`; if it already completed, the
    /// hook runs on the caller's thread now.
    pub fn abandon(self, on_abandon: impl FnOnce(Exit<E, A>) + Send + 'static) {
        let exit = {
            let mut state = self.inner.state.lock();
            match mem::replace(&mut *state, TaskState::Taken) {
                TaskState::Running => {
                    *state = TaskState::Abandoned(Some(Box::new(on_abandon)));
                    return;
                }
                TaskState::Done(exit) => exit,
                _ => return,
            }
        };
        on_abandon(exit);
    }
}
