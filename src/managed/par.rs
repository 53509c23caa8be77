//! Parallel and fiber-backed resource combinators.

use super::{drain_of, Managed};
use crate::exit::Exit;
use crate::runtime::TaskHandle;
use crate::scope::{ExecutionStrategy, FinalizerHandle, ReleaseMap};
use crate::tracing_compat::trace;
use crate::types::FiberId;
use core::fmt;
use core::time::Duration;
use std::sync::Arc;

impl<R, E, A> Managed<R, E, A>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// Acquires both resources concurrently and combines their values.
    ///
    /// Each branch gets a private inner scope, so releases within a branch
    /// keep their sequential order; the two branches' finalizers run against
    /// each other freely when the shared scope drains. Branch failures merge
    /// in parallel; the surviving branch's resources stay registered and are
    /// released by the ambient scope's drain.
    pub fn zip_with_par<B, C>(
        self,
        that: Managed<R, E, B>,
        f: impl FnOnce(A, B) -> C + Send + 'static,
    ) -> Managed<R, E, C>
    where
        B: Send + 'static,
        C: Send + 'static,
    {
        Managed::new(move |cx, outer| {
            if let Err(cause) = cx.check_interrupt() {
                return Exit::Failure(cause);
            }
            let shared = ReleaseMap::new();
            let (handle, late) = outer.add({
                let shared = Arc::clone(&shared);
                Box::new(move |exit| shared.release_all(exit, ExecutionStrategy::Parallel))
            });
            if let Exit::Failure(cause) = late {
                return Exit::Failure(cause.widen());
            }
            let left_map = ReleaseMap::new();
            let right_map = ReleaseMap::new();
            // The shared map was created above; nothing can have closed it.
            let _ = shared.add_if_open(drain_of(&left_map));
            let _ = shared.add_if_open(drain_of(&right_map));

            trace!("acquiring two branches in parallel");
            let task = cx.fork(move |child| that.run_scoped(child, &right_map));
            let left = self.run_scoped(cx, &left_map);
            let right = task.join();
            match left.zip_with_par(right, |(_, a), (_, b)| f(a, b)) {
                Exit::Success(c) => Exit::Success((handle, c)),
                Exit::Failure(cause) => Exit::Failure(cause),
            }
        })
    }

    /// Acquires the resource on a background fiber.
    ///
    /// The ambient scope owns one combined finalizer: interrupt the fiber,
    /// wait for it, then drain its scope. Forking a resource therefore never
    /// leaks it, even when the fiber is never joined.
    pub fn fork(self) -> Managed<R, E, TaskHandle<E, A>> {
        Managed::new(move |cx, outer| {
            cx.uninterruptible(|_| {
                let inner = ReleaseMap::new();
                let acquire_map = Arc::clone(&inner);
                let task = cx.fork(move |child| {
                    self.run_scoped(child, &acquire_map).map(|(_, a)| a)
                });
                let watcher = task.clone();
                let interrupter = FiberId::Runtime(cx.fiber_id());
                let (handle, late) = outer.add(Box::new(move |exit| {
                    watcher.signal_interrupt(interrupter);
                    watcher.wait();
                    inner.release_all(exit, ExecutionStrategy::Sequential)
                }));
                if let Exit::Failure(cause) = late {
                    return Exit::Failure(cause.widen());
                }
                Exit::Success((handle, task))
            })
        })
    }

    /// Races acquisition against a deadline.
    ///
    /// If the deadline wins the value is `None` and the in-flight fiber is
    /// abandoned; whenever it finishes, it drains its own scope, so a
    /// finalizer registered mid-acquisition still runs. If acquisition wins,
    /// its scope is linked into the ambient scope normally.
    pub fn timeout(self, duration: Duration) -> Managed<R, E, Option<A>>
    where
        E: Clone + fmt::Debug,
    {
        Managed::new(move |cx, outer| {
            if let Err(cause) = cx.check_interrupt() {
                return Exit::Failure(cause);
            }
            let inner = ReleaseMap::new();
            let acquire_map = Arc::clone(&inner);
            let task = cx.fork(move |child| self.run_scoped(child, &acquire_map));
            let abandoned_map = Arc::clone(&inner);
            let joined = task.join_timeout(duration, move |exit| {
                trace!("deadline won, draining abandoned acquisition");
                abandoned_map.release_all(&exit.erase(), ExecutionStrategy::Sequential);
            });
            match joined {
                None => Exit::Success((FinalizerHandle::Noop, None)),
                Some(Exit::Failure(cause)) => {
                    let failed: Exit<E, ()> = Exit::Failure(cause.clone());
                    let drained = inner.release_all(&failed.erase(), ExecutionStrategy::Sequential);
                    match drained {
                        Exit::Success(()) => Exit::Failure(cause),
                        Exit::Failure(release_cause) => {
                            Exit::Failure(cause.then(release_cause.widen()))
                        }
                    }
                }
                Some(Exit::Success((_, a))) => {
                    let (handle, late) = outer.add(drain_of(&inner));
                    match late {
                        Exit::Success(()) => Exit::Success((handle, Some(a))),
                        Exit::Failure(cause) => Exit::Failure(cause.widen()),
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::FinalExit;
    use crate::runtime::Cx;
    use parking_lot::Mutex;
    use std::sync::mpsc;

    type Log = Arc<Mutex<Vec<String>>>;

    fn logged(log: &Log, name: &'static str) -> Managed<(), String, &'static str> {
        let acquire_log = log.clone();
        let release_log = log.clone();
        Managed::acquire_release_with(
            move |_| {
                acquire_log.lock().push(format!("acquire {name}"));
                Ok(name)
            },
            move |released| {
                release_log.lock().push(format!("release {released}"));
            },
        )
    }

    fn root() -> Cx<()> {
        Cx::new(())
    }

    // =========================================================================
    // zip_with_par
    // =========================================================================

    #[test]
    fn zip_par_combines_both_values() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let managed = logged(&log, "left").zip_with_par(logged(&log, "right"), |a, b| (a, b));
        let exit = managed.use_with(&root(), |_, pair| Ok::<_, String>(pair));
        assert_eq!(exit, Exit::succeed(("left", "right")));
        let entries = log.lock();
        assert!(entries.contains(&"release left".to_string()));
        assert!(entries.contains(&"release right".to_string()));
    }

    #[test]
    fn zip_par_failure_still_releases_the_surviving_branch() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let failing: Managed<(), String, &'static str> = Managed::fail("right broke".to_string());
        let managed = logged(&log, "left").zip_with_par(failing, |a, _| a);
        let exit = managed.use_with(&root(), |_, a| Ok(a));
        assert_eq!(exit, Exit::fail("right broke".to_string()));
        let entries = log.lock();
        assert!(entries.contains(&"acquire left".to_string()));
        assert!(entries.contains(&"release left".to_string()));
    }

    #[test]
    fn zip_par_merges_two_failures_in_parallel() {
        let left: Managed<(), String, ()> = Managed::fail("left broke".to_string());
        let right: Managed<(), String, ()> = Managed::fail("right broke".to_string());
        let exit = left.zip_with_par(right, |(), ()| ()).use_with(&root(), |_, ()| Ok(()));
        let cause = exit.cause().expect("both failed");
        let mut failures: Vec<&String> = cause.failures();
        failures.sort();
        assert_eq!(failures, vec!["left broke", "right broke"]);
    }

    // =========================================================================
    // fork
    // =========================================================================

    #[test]
    fn forked_resource_is_released_when_the_scope_exits() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let managed = logged(&log, "bg").fork();
        // Never joined; the scope must still reclaim the resource. The body
        // waits for acquisition so the release is observable afterwards.
        let wait_log = log.clone();
        let exit = managed.use_with(&root(), move |_, _handle| {
            while !wait_log.lock().contains(&"acquire bg".to_string()) {
                std::thread::yield_now();
            }
            Ok::<_, String>(())
        });
        assert!(exit.is_success());
        let entries = log.lock();
        assert_eq!(*entries, vec!["acquire bg", "release bg"]);
    }

    #[test]
    fn forked_resource_can_be_joined_for_its_value() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let managed = logged(&log, "bg").fork();
        let exit = managed.use_with(&root(), |_, handle| match handle.join() {
            Exit::Success(value) => Ok(value),
            Exit::Failure(_) => Err("background acquisition failed".to_string()),
        });
        assert_eq!(exit, Exit::succeed("bg"));
    }

    #[test]
    fn scope_exit_interrupts_a_stuck_forked_acquisition() {
        let managed: Managed<(), String, ()> = Managed::from_exit_fn(|cx| loop {
            if let Err(cause) = cx.check_interrupt() {
                return Exit::Failure(cause);
            }
            std::thread::yield_now();
        });
        let exit = managed.fork().use_with(&root(), |_, _handle| {
            Ok::<_, String>(())
        });
        // The body succeeded; the interrupted fiber's exit is the finalizer's
        // concern and the finalizer itself finished.
        assert!(exit.is_success());
    }

    // =========================================================================
    // timeout
    // =========================================================================

    #[test]
    fn fast_acquisition_beats_the_deadline() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let managed = logged(&log, "quick").timeout(Duration::from_secs(10));
        let exit = managed.use_with(&root(), |_, value| Ok::<_, String>(value));
        assert_eq!(exit, Exit::succeed(Some("quick")));
        assert_eq!(*log.lock(), vec!["acquire quick", "release quick"]);
    }

    #[test]
    fn deadline_win_yields_none_and_releases_independently() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let slow = {
            let log = log.clone();
            logged(&log, "slow").and_then(move |name| {
                Managed::from_effect(move |_| {
                    gate_rx.recv().ok();
                    Ok::<_, String>(name)
                })
            })
        };
        let exit = slow
            .timeout(Duration::from_millis(10))
            .use_with(&root(), |_, value| Ok::<_, String>(value));
        assert_eq!(exit, Exit::succeed(None));
        // Unblock the abandoned fiber; its finalizer must still run.
        gate_tx.send(()).expect("fiber waiting");
        loop {
            if log.lock().contains(&"release slow".to_string()) {
                break;
            }
            std::thread::yield_now();
        }
    }

    #[test]
    fn timed_out_failure_reports_the_cause() {
        let failing: Managed<(), String, ()> = Managed::fail("never acquired".to_string());
        let exit = failing
            .timeout(Duration::from_secs(10))
            .use_with(&root(), |_, value| Ok(value));
        assert_eq!(exit, Exit::fail("never acquired".to_string()));
    }

    #[test]
    fn timeout_failure_merges_partial_release_outcomes() {
        let managed: Managed<(), String, ()> = Managed::finalizer_exit(|_| Exit::die("partial cleanup broke"))
            .and_then(|()| Managed::fail("acquisition broke".to_string()));
        let exit = managed
            .timeout(Duration::from_secs(10))
            .use_with(&root(), |_, value| Ok(value));
        let cause = exit.cause().expect("failure");
        assert_eq!(cause.failure_option(), Some(&"acquisition broke".to_string()));
        assert_eq!(
            cause.die_option().map(|d| d.message()),
            Some("partial cleanup broke")
        );
    }

    #[test]
    fn timeout_propagates_finalizer_exit_sharing() {
        let observed: Arc<Mutex<Option<FinalExit>>> = Arc::new(Mutex::new(None));
        let slot = observed.clone();
        let managed: Managed<(), String, ()> = Managed::acquire_release_exit_with(
            |_| Ok(()),
            move |(), exit| {
                *slot.lock() = Some(exit.clone());
                FinalExit::finished()
            },
        );
        let _ = managed
            .timeout(Duration::from_secs(10))
            .use_with_exit(&root(), |_, _| Exit::<String, ()>::die("body died"));
        let seen = observed.lock().clone().expect("release ran");
        assert!(seen.is_failure());
    }
}
