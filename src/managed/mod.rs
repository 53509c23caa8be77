//! Scoped resources.
//!
//! # Overview
//!
//! A [`Managed`] describes how to acquire a resource and how to release it.
//! Acquisition runs against a capability context and an ambient
//! [`ReleaseMap`]; the release action is registered in that map as one
//! uninterruptible unit with the acquisition, so a cancellation arriving
//! mid-registration can never orphan a live resource.
//!
//! # Core Guarantees
//!
//! - Exactly one finalizer is registered per value produced, even inside a
//!   branch that later fails.
//! - Acquisition failure registers nothing; any failure after registration
//!   always leads to the finalizer running.
//! - Finalizer failures are captured as exits and merged into the overall
//!   outcome, never swallowed.
//! - Sequential composition releases in reverse acquisition order; parallel
//!   composition preserves per-branch ordering while branches release
//!   concurrently.

mod memo;
mod par;

pub use memo::{Memoized, Preallocated, Switchable};

use crate::cause::Cause;
use crate::exit::{Exit, FinalExit};
use crate::runtime::Cx;
use crate::scope::{ExecutionStrategy, FinalizerHandle, ReleaseMap};
use crate::tracing_compat::trace;
use core::fmt;
use std::sync::Arc;

type RunFn<R, E, A> =
    Box<dyn FnOnce(&Cx<R>, &Arc<ReleaseMap>) -> Exit<E, (FinalizerHandle, A)> + Send>;

/// A finalizer that drains `map` sequentially with the observed exit.
fn drain_of(map: &Arc<ReleaseMap>) -> crate::scope::Finalizer {
    let map = Arc::clone(map);
    Box::new(move |exit| map.release_all(exit, ExecutionStrategy::Sequential))
}

/// A resource description: acquisition plus registered release.
///
/// Running one produces the acquired value and a [`FinalizerHandle`] for
/// releasing it ahead of its scope.
pub struct Managed<R, E, A> {
    run: RunFn<R, E, A>,
}

impl<R, E, A> Managed<R, E, A>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    pub(crate) fn new(
        run: impl FnOnce(&Cx<R>, &Arc<ReleaseMap>) -> Exit<E, (FinalizerHandle, A)> + Send + 'static,
    ) -> Self {
        Self { run: Box::new(run) }
    }

    /// Acquires this resource into `map`.
    ///
    /// Most callers want [`Managed::use_with`] instead; this is the raw entry
    /// point for embedding a resource into an externally managed scope.
    pub fn run_scoped(
        self,
        cx: &Cx<R>,
        map: &Arc<ReleaseMap>,
    ) -> Exit<E, (FinalizerHandle, A)> {
        (self.run)(cx, map)
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// A resource that is just a value; nothing to release.
    pub fn succeed(value: A) -> Self {
        Self::new(move |_, _| Exit::Success((FinalizerHandle::Noop, value)))
    }

    /// A resource whose acquisition fails with a typed error.
    pub fn fail(error: E) -> Self {
        Self::new(move |_, _| Exit::fail(error))
    }

    /// A resource whose acquisition fails with the given cause.
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Self::new(move |_, _| Exit::Failure(cause))
    }

    /// A resource whose acquisition dies with a defect.
    pub fn die(defect: impl Into<crate::types::Defect> + Send + 'static) -> Self {
        Self::new(move |_, _| Exit::die(defect))
    }

    /// Lifts a plain effect; nothing to release.
    pub fn from_effect(f: impl FnOnce(&Cx<R>) -> Result<A, E> + Send + 'static) -> Self {
        Self::from_exit_fn(move |cx| f(cx).into())
    }

    /// Lifts an exit-producing effect; nothing to release.
    pub fn from_exit_fn(f: impl FnOnce(&Cx<R>) -> Exit<E, A> + Send + 'static) -> Self {
        Self::new(move |cx, _| f(cx).map(|a| (FinalizerHandle::Noop, a)))
    }

    /// Acquires with `acquire` and releases with `release`.
    ///
    /// Acquisition and finalizer registration run as one uninterruptible
    /// unit. The release action receives its own clone of the resource, so
    /// resources used with this constructor are cheaply clonable handles.
    pub fn acquire_release_with(
        acquire: impl FnOnce(&Cx<R>) -> Result<A, E> + Send + 'static,
        release: impl FnOnce(A) + Send + 'static,
    ) -> Self
    where
        A: Clone,
    {
        Self::acquire_release_exit_with(acquire, move |resource, _| {
            release(resource);
            FinalExit::finished()
        })
    }

    /// Like [`Managed::acquire_release_with`], but the release action also
    /// observes the exit of the scope that consumed the resource.
    pub fn acquire_release_exit_with(
        acquire: impl FnOnce(&Cx<R>) -> Result<A, E> + Send + 'static,
        release: impl FnOnce(A, &FinalExit) -> FinalExit + Send + 'static,
    ) -> Self
    where
        A: Clone,
    {
        Self::new(move |cx, map| {
            if let Err(cause) = cx.check_interrupt() {
                return Exit::Failure(cause);
            }
            cx.uninterruptible(|_| match acquire(cx) {
                Err(error) => Exit::fail(error),
                Ok(value) => {
                    let resource = value.clone();
                    let (handle, late) =
                        map.add(Box::new(move |exit| release(resource, exit)));
                    match late {
                        Exit::Success(()) => Exit::Success((handle, value)),
                        Exit::Failure(cause) => Exit::Failure(cause.widen()),
                    }
                }
            })
        })
    }

    // =========================================================================
    // Sequential composition
    // =========================================================================

    /// Maps the acquired value.
    pub fn map<B: Send + 'static>(self, f: impl FnOnce(A) -> B + Send + 'static) -> Managed<R, E, B> {
        Managed::new(move |cx, map| (self.run)(cx, map).map(|(handle, a)| (handle, f(a))))
    }

    /// Maps every typed acquisition error.
    pub fn map_error<E2: Send + 'static>(
        self,
        f: impl FnMut(&E) -> E2 + Send + 'static,
    ) -> Managed<R, E2, A> {
        Managed::new(move |cx, map| (self.run)(cx, map).map_error(f))
    }

    /// Acquires `self`, then the resource produced by `f`, in the same
    /// ambient scope.
    ///
    /// The combined handle releases `f`'s resource first, then `self`'s,
    /// each isolated from the other's failure and merged sequentially.
    pub fn and_then<B: Send + 'static>(
        self,
        f: impl FnOnce(A) -> Managed<R, E, B> + Send + 'static,
    ) -> Managed<R, E, B> {
        Managed::new(move |cx, map| match (self.run)(cx, map) {
            Exit::Failure(cause) => Exit::Failure(cause),
            Exit::Success((first, a)) => match f(a).run_scoped(cx, map) {
                // The first resource stays registered; the ambient scope's
                // drain will release it.
                Exit::Failure(cause) => Exit::Failure(cause),
                Exit::Success((second, b)) => Exit::Success((second.chain(first), b)),
            },
        })
    }

    /// Acquires both resources sequentially and combines their values.
    pub fn zip_with<B: Send + 'static, C: Send + 'static>(
        self,
        that: Managed<R, E, B>,
        f: impl FnOnce(A, B) -> C + Send + 'static,
    ) -> Managed<R, E, C> {
        self.and_then(move |a| that.map(move |b| f(a, b)))
    }

    // =========================================================================
    // Exit observation
    // =========================================================================

    /// Installs `cleanup` to run after this resource's own finalizers,
    /// observing the exit of acquisition.
    pub fn on_exit(
        self,
        cleanup: impl FnOnce(&Exit<E, A>) -> FinalExit + Send + 'static,
    ) -> Self
    where
        E: Clone,
        A: Clone,
    {
        self.with_exit_cleanup(cleanup, CleanupOrder::AfterInner)
    }

    /// Installs `cleanup` to run before this resource's own finalizers,
    /// observing the exit of acquisition.
    pub fn on_exit_first(
        self,
        cleanup: impl FnOnce(&Exit<E, A>) -> FinalExit + Send + 'static,
    ) -> Self
    where
        E: Clone,
        A: Clone,
    {
        self.with_exit_cleanup(cleanup, CleanupOrder::BeforeInner)
    }

    fn with_exit_cleanup(
        self,
        cleanup: impl FnOnce(&Exit<E, A>) -> FinalExit + Send + 'static,
        order: CleanupOrder,
    ) -> Self
    where
        E: Clone,
        A: Clone,
    {
        Self::new(move |cx, outer| {
            cx.uninterruptible(|restore| {
                let inner = ReleaseMap::new();
                let acquired = restore.interruptible(|| (self.run)(cx, &inner));
                let observed: Exit<E, A> = acquired.clone().map(|(_, a)| a);
                let inner_for_fin = Arc::clone(&inner);
                let (handle, late) = outer.add(Box::new(move |exit| {
                    let drain =
                        |map: &Arc<ReleaseMap>| map.release_all(exit, ExecutionStrategy::Sequential);
                    let (first, second) = match order {
                        CleanupOrder::AfterInner => (drain(&inner_for_fin), cleanup(&observed)),
                        CleanupOrder::BeforeInner => (cleanup(&observed), drain(&inner_for_fin)),
                    };
                    first.zip_with_seq(second, |(), ()| ())
                }));
                if let Exit::Failure(cause) = late {
                    return Exit::Failure(cause.widen());
                }
                match acquired {
                    Exit::Success((_, a)) => Exit::Success((handle, a)),
                    Exit::Failure(cause) => Exit::Failure(cause),
                }
            })
        })
    }

    // =========================================================================
    // Consumption
    // =========================================================================

    /// Acquires the resource, runs `body`, and releases everything the
    /// acquisition registered, in reverse order.
    ///
    /// Finalizers observe the body's erased exit and always run, whatever
    /// the body did; their failures merge sequentially into the result.
    pub fn use_with<B>(
        self,
        cx: &Cx<R>,
        body: impl FnOnce(&Cx<R>, A) -> Result<B, E>,
    ) -> Exit<E, B>
    where
        E: fmt::Debug,
    {
        self.use_with_exit(cx, |cx, a| body(cx, a).into())
    }

    /// Like [`Managed::use_with`], but the body reports a full exit.
    pub fn use_with_exit<B>(
        self,
        cx: &Cx<R>,
        body: impl FnOnce(&Cx<R>, A) -> Exit<E, B>,
    ) -> Exit<E, B>
    where
        E: fmt::Debug,
    {
        let map = ReleaseMap::new();
        let body_exit = match (self.run)(cx, &map) {
            Exit::Success((_, a)) => body(cx, a),
            Exit::Failure(cause) => Exit::Failure(cause),
        };
        trace!(succeeded = body_exit.is_success(), "scope finished, releasing");
        let released = map.release_all(&body_exit.erase(), ExecutionStrategy::Sequential);
        match released {
            Exit::Success(()) => body_exit,
            Exit::Failure(release_cause) => match body_exit {
                Exit::Success(_) => Exit::Failure(release_cause.widen()),
                Exit::Failure(body_cause) => {
                    Exit::Failure(body_cause.then(release_cause.widen()))
                }
            },
        }
    }
}

impl<R, E> Managed<R, E, ()>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
{
    /// Registers a cleanup action with no acquisition step.
    pub fn finalizer(f: impl FnOnce() + Send + 'static) -> Self {
        Self::finalizer_exit(move |_| {
            f();
            FinalExit::finished()
        })
    }

    /// Registers an exit-observing cleanup action with no acquisition step.
    pub fn finalizer_exit(f: impl FnOnce(&FinalExit) -> FinalExit + Send + 'static) -> Self {
        Self::new(move |cx, map| {
            cx.uninterruptible(|_| {
                let (handle, late) = map.add(Box::new(f));
                match late {
                    Exit::Success(()) => Exit::Success((handle, ())),
                    Exit::Failure(cause) => Exit::Failure(cause.widen()),
                }
            })
        })
    }
}

#[derive(Clone, Copy)]
enum CleanupOrder {
    AfterInner,
    BeforeInner,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn log_entry(log: &Log, entry: impl Into<String>) {
        log.lock().push(entry.into());
    }

    fn numbered(log: &Log, n: u32) -> Managed<(), String, u32> {
        let acquire_log = log.clone();
        let release_log = log.clone();
        Managed::acquire_release_with(
            move |_| {
                log_entry(&acquire_log, format!("acquire {n}"));
                Ok(n)
            },
            move |released| {
                log_entry(&release_log, format!("release {released}"));
            },
        )
    }

    fn root() -> Cx<()> {
        Cx::new(())
    }

    // =========================================================================
    // Acquisition and Release Ordering
    // =========================================================================

    #[test]
    fn nested_resources_release_in_reverse_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let managed = numbered(&log, 1)
            .and_then({
                let log = log.clone();
                move |_| numbered(&log, 2)
            })
            .and_then({
                let log = log.clone();
                move |_| numbered(&log, 3)
            });
        let body_log = log.clone();
        let exit = managed.use_with(&root(), move |_, n| {
            log_entry(&body_log, format!("use {n}"));
            Ok::<_, String>(n)
        });
        assert_eq!(exit, Exit::succeed(3));
        assert_eq!(
            *log.lock(),
            vec![
                "acquire 1",
                "acquire 2",
                "acquire 3",
                "use 3",
                "release 3",
                "release 2",
                "release 1"
            ]
        );
    }

    #[test]
    fn acquisition_failure_registers_nothing() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let release_log = log.clone();
        let managed: Managed<(), String, u32> = Managed::acquire_release_with(
            |_| Err("no resource".to_string()),
            move |_| log_entry(&release_log, "release"),
        );
        let exit = managed.use_with(&root(), |_, n| Ok(n));
        assert_eq!(exit, Exit::fail("no resource".to_string()));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn failed_second_acquisition_still_releases_first() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let managed = numbered(&log, 1).and_then(|_| Managed::fail("second broke".to_string()));
        let exit = managed.use_with(&root(), |_, n: u32| Ok(n));
        assert_eq!(exit, Exit::fail("second broke".to_string()));
        assert_eq!(*log.lock(), vec!["acquire 1", "release 1"]);
    }

    #[test]
    fn body_failure_still_releases() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let exit: Exit<String, u32> =
            numbered(&log, 1).use_with(&root(), |_, _| Err("body broke".to_string()));
        assert_eq!(exit, Exit::fail("body broke".to_string()));
        assert_eq!(*log.lock(), vec!["acquire 1", "release 1"]);
    }

    #[test]
    fn release_observes_the_body_exit() {
        let observed: Arc<Mutex<Option<FinalExit>>> = Arc::new(Mutex::new(None));
        let slot = observed.clone();
        let managed: Managed<(), String, ()> = Managed::acquire_release_exit_with(
            |_| Ok(()),
            move |(), exit| {
                *slot.lock() = Some(exit.clone());
                FinalExit::finished()
            },
        );
        let _: Exit<String, ()> = managed.use_with(&root(), |_, ()| Err("boom".to_string()));
        let seen = observed.lock().clone().expect("release ran");
        assert!(seen.is_failure());
    }

    // =========================================================================
    // Finalizer Failure Merging
    // =========================================================================

    #[test]
    fn dying_finalizers_all_run_and_merge() {
        let managed: Managed<(), String, ()> = Managed::finalizer_exit(|_| Exit::die("fin one"))
            .and_then(|()| Managed::finalizer_exit(|_| Exit::die("fin two")))
            .and_then(|()| Managed::finalizer_exit(|_| Exit::die("fin three")));
        let exit = managed.use_with_exit(&root(), |_, ()| Exit::<String, ()>::die("body died"));
        let cause = exit.cause().expect("failure");
        let messages: Vec<&str> = cause.defects().iter().map(|d| d.message()).collect();
        // Body first, then finalizers in reverse registration order.
        assert_eq!(messages, vec!["body died", "fin three", "fin two", "fin one"]);
    }

    #[test]
    fn finalizer_failure_fails_a_successful_body() {
        let managed: Managed<(), String, ()> =
            Managed::finalizer_exit(|_| Exit::die("cleanup broke"));
        let exit = managed.use_with(&root(), |_, ()| Ok(7));
        let cause = exit.cause().expect("finalizer failure surfaces");
        assert_eq!(cause.die_option().map(|d| d.message()), Some("cleanup broke"));
    }

    // =========================================================================
    // Exit Observation
    // =========================================================================

    #[test]
    fn on_exit_runs_cleanup_after_inner_finalizers() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let cleanup_log = log.clone();
        let managed = numbered(&log, 1).on_exit(move |_| {
            log_entry(&cleanup_log, "cleanup");
            FinalExit::finished()
        });
        let _ = managed.use_with(&root(), |_, n| Ok::<_, String>(n));
        assert_eq!(*log.lock(), vec!["acquire 1", "release 1", "cleanup"]);
    }

    #[test]
    fn on_exit_first_runs_cleanup_before_inner_finalizers() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let cleanup_log = log.clone();
        let managed = numbered(&log, 1).on_exit_first(move |_| {
            log_entry(&cleanup_log, "cleanup");
            FinalExit::finished()
        });
        let _ = managed.use_with(&root(), |_, n| Ok::<_, String>(n));
        assert_eq!(*log.lock(), vec!["acquire 1", "cleanup", "release 1"]);
    }

    #[test]
    fn on_exit_cleanup_sees_acquisition_failure() {
        let seen: Arc<Mutex<Option<Exit<String, u32>>>> = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        let managed: Managed<(), String, u32> =
            Managed::fail("gone".to_string()).on_exit(move |exit| {
                *slot.lock() = Some(exit.clone());
                FinalExit::finished()
            });
        let _ = managed.use_with(&root(), |_, n| Ok(n));
        let observed = seen.lock().clone().expect("cleanup ran");
        assert_eq!(observed, Exit::fail("gone".to_string()));
    }

    // =========================================================================
    // Transforms
    // =========================================================================

    #[test]
    fn map_transforms_the_value() {
        let exit = Managed::<(), String, u32>::succeed(21)
            .map(|n| n * 2)
            .use_with(&root(), |_, n| Ok(n));
        assert_eq!(exit, Exit::succeed(42));
    }

    #[test]
    fn map_error_transforms_the_failure() {
        let exit = Managed::<(), String, u32>::fail("short".to_string())
            .map_error(|e| e.len())
            .use_with(&root(), |_, n| Ok(n));
        assert_eq!(exit, Exit::fail(5));
    }

    #[test]
    fn zip_with_combines_sequentially() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let managed = numbered(&log, 1).zip_with(numbered(&log, 2), |a, b| a + b);
        let exit = managed.use_with(&root(), |_, n| Ok::<_, String>(n));
        assert_eq!(exit, Exit::succeed(3));
        assert_eq!(
            *log.lock(),
            vec!["acquire 1", "acquire 2", "release 2", "release 1"]
        );
    }
}
