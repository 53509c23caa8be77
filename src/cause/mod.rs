//! The failure algebra.
//!
//! A [`Cause`] is an immutable tree describing how a computation failed:
//! expected errors, unexpected defects, interruption, or a combination of
//! several of these produced by sequential (`Then`) or parallel (`Both`)
//! composition. Merging never loses information; a caller that only wants a
//! single representative error opts into the documented lossy projection
//! [`Cause::squash_with`].
//!
//! # Algebra
//!
//! `Empty` is the identity for both connectors, and both connectors are
//! associative:
//!
//! ```text
//! empty.then(a) == a.then(empty) == a
//! empty.both(a) == a.both(empty) == a
//! (a.then(b)).then(c) ~ a.then(b.then(c))     (same fold results)
//! ```
//!
//! `Both` is semantically symmetric but the tree records operand order;
//! nothing may rely on referential symmetry.
//!
//! # Stack Safety
//!
//! Supervised fiber trees produce `Then` chains far deeper than any native
//! call stack tolerates. Every operation here, including `Drop`, `Clone`,
//! equality and hashing, is iterative.

mod fold;

pub use fold::CauseFolder;

use crate::types::{Defect, FiberId, Trace};
use core::convert::Infallible;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::mem;
use core::ops::ControlFlow;
use smallvec::SmallVec;
use std::collections::{BTreeSet, HashSet};

/// A tree describing how a computation failed.
pub enum Cause<E> {
    /// No failure occurred. Identity element for `then` and `both`.
    Empty,
    /// An expected, typed failure.
    Fail(E, Trace),
    /// An unexpected failure: a programming defect, semantically fatal.
    Die(Defect, Trace),
    /// Cancellation, attributed to the fiber that requested it.
    Interrupt(FiberId, Trace),
    /// Sequential composition: the left cause happened, then the right one
    /// happened while handling it or after it.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Parallel composition: both causes happened concurrently and neither
    /// causally precedes the other.
    Both(Box<Cause<E>>, Box<Cause<E>>),
    /// Marks that the wrapped cause had its stack trace elided for
    /// performance. Transparent to all algebraic operations.
    Stackless(Box<Cause<E>>, bool),
}

impl<E> Cause<E> {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// The empty cause.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// An expected failure with no captured trace.
    #[must_use]
    pub fn fail(error: E) -> Self {
        Self::Fail(error, Trace::none())
    }

    /// An expected failure with a captured trace.
    #[must_use]
    pub fn fail_with_trace(error: E, trace: Trace) -> Self {
        Self::Fail(error, trace)
    }

    /// A defect with no captured trace.
    #[must_use]
    pub fn die(defect: impl Into<Defect>) -> Self {
        Self::Die(defect.into(), Trace::none())
    }

    /// A defect with a captured trace.
    #[must_use]
    pub fn die_with_trace(defect: impl Into<Defect>, trace: Trace) -> Self {
        Self::Die(defect.into(), trace)
    }

    /// An interruption attributed to `fiber`.
    #[must_use]
    pub fn interrupt(fiber: FiberId) -> Self {
        Self::Interrupt(fiber, Trace::none())
    }

    /// An interruption with a captured trace.
    #[must_use]
    pub fn interrupt_with_trace(fiber: FiberId, trace: Trace) -> Self {
        Self::Interrupt(fiber, trace)
    }

    /// Sequential composition. `Empty` on either side yields the other
    /// operand unchanged.
    #[must_use]
    pub fn then(self, that: Self) -> Self {
        match (self, that) {
            (Self::Empty, that) => that,
            (this, Self::Empty) => this,
            (this, that) => Self::Then(Box::new(this), Box::new(that)),
        }
    }

    /// Parallel composition. `Empty` on either side yields the other
    /// operand unchanged.
    #[must_use]
    pub fn both(self, that: Self) -> Self {
        match (self, that) {
            (Self::Empty, that) => that,
            (this, Self::Empty) => this,
            (this, that) => Self::Both(Box::new(this), Box::new(that)),
        }
    }

    /// Wraps this cause to mark its trace as elided.
    #[must_use]
    pub fn stackless(self, stackless: bool) -> Self {
        Self::Stackless(Box::new(self), stackless)
    }

    // =========================================================================
    // Folds and searches
    // =========================================================================

    /// Structural catamorphism. See [`CauseFolder`].
    pub fn fold<F: CauseFolder<E>>(&self, folder: &mut F) -> F::Out {
        fold::fold_cause(self, folder)
    }

    /// Visits every leaf cause (`Fail`/`Die`/`Interrupt`/`Empty`)
    /// left-to-right, threading an accumulator.
    ///
    /// `ControlFlow::Break` short-circuits with the final accumulator.
    pub fn fold_left<'a, Z>(
        &'a self,
        zero: Z,
        mut f: impl FnMut(Z, &'a Self) -> ControlFlow<Z, Z>,
    ) -> Z {
        let mut acc = zero;
        let mut stack: SmallVec<[&'a Self; 16]> = SmallVec::new();
        stack.push(self);
        while let Some(node) = stack.pop() {
            match node {
                Self::Then(left, right) | Self::Both(left, right) => {
                    stack.push(&**right);
                    stack.push(&**left);
                }
                Self::Stackless(inner, _) => stack.push(&**inner),
                leaf => match f(acc, leaf) {
                    ControlFlow::Continue(next) => acc = next,
                    ControlFlow::Break(last) => return last,
                },
            }
        }
        acc
    }

    /// Returns the first node (pre-order, at any depth) for which `f`
    /// returns `Some`.
    pub fn find<'a, Z>(&'a self, mut f: impl FnMut(&'a Self) -> Option<Z>) -> Option<Z> {
        let mut stack: SmallVec<[&'a Self; 16]> = SmallVec::new();
        stack.push(self);
        while let Some(node) = stack.pop() {
            if let Some(found) = f(node) {
                return Some(found);
            }
            match node {
                Self::Then(left, right) | Self::Both(left, right) => {
                    stack.push(&**right);
                    stack.push(&**left);
                }
                Self::Stackless(inner, _) => stack.push(&**inner),
                _ => {}
            }
        }
        None
    }

    /// Structural subtree membership test.
    #[must_use]
    pub fn contains(&self, that: &Self) -> bool
    where
        E: PartialEq,
    {
        self.find(|node| fold::structural_eq(node, that).then_some(()))
            .is_some()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The first expected failure, if any.
    #[must_use]
    pub fn failure_option(&self) -> Option<&E> {
        self.find(|node| match node {
            Self::Fail(error, _) => Some(error),
            _ => None,
        })
    }

    /// All expected failures, left to right.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        self.fold_left(Vec::new(), |mut acc, leaf| {
            if let Self::Fail(error, _) = leaf {
                acc.push(error);
            }
            ControlFlow::Continue(acc)
        })
    }

    /// The first defect, if any.
    #[must_use]
    pub fn die_option(&self) -> Option<&Defect> {
        self.find(|node| match node {
            Self::Die(defect, _) => Some(defect),
            _ => None,
        })
    }

    /// All defects, left to right.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        self.fold_left(Vec::new(), |mut acc, leaf| {
            if let Self::Die(defect, _) = leaf {
                acc.push(defect);
            }
            ControlFlow::Continue(acc)
        })
    }

    /// The first interrupting fiber, if any.
    #[must_use]
    pub fn interrupt_option(&self) -> Option<&FiberId> {
        self.find(|node| match node {
            Self::Interrupt(fiber, _) => Some(fiber),
            _ => None,
        })
    }

    /// Every fiber an interruption in this cause is attributed to.
    #[must_use]
    pub fn interruptors(&self) -> HashSet<FiberId> {
        self.fold_left(HashSet::new(), |mut acc, leaf| {
            if let Self::Interrupt(fiber, _) = leaf {
                acc.insert(fiber.clone());
            }
            ControlFlow::Continue(acc)
        })
    }

    /// True if no failure of any kind is recorded (the cause is `Empty` or
    /// a composition of `Empty` leaves).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.find(|node| {
            matches!(
                node,
                Self::Fail(..) | Self::Die(..) | Self::Interrupt(..)
            )
            .then_some(())
        })
        .is_none()
    }

    /// True if an expected failure is recorded anywhere.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.failure_option().is_some()
    }

    /// True if a defect is recorded anywhere.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.die_option().is_some()
    }

    /// True if an interruption is recorded anywhere.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt_option().is_some()
    }

    // =========================================================================
    // Transforms
    // =========================================================================

    /// Maps every expected failure, preserving structure and traces.
    #[must_use]
    pub fn map<E2>(&self, mut f: impl FnMut(&E) -> E2) -> Cause<E2> {
        fold::rebuild(self, |leaf| match leaf {
            fold::LeafRef::Empty => Cause::Empty,
            fold::LeafRef::Fail(error, trace) => Cause::Fail(f(error), trace.clone()),
            fold::LeafRef::Die(defect, trace) => Cause::Die(defect.clone(), trace.clone()),
            fold::LeafRef::Interrupt(fiber, trace) => {
                Cause::Interrupt(fiber.clone(), trace.clone())
            }
        })
    }

    /// Rewrites the trace attached to every leaf.
    #[must_use]
    pub fn map_trace(&self, mut f: impl FnMut(&Trace) -> Trace) -> Self
    where
        E: Clone,
    {
        fold::rebuild(self, |leaf| match leaf {
            fold::LeafRef::Empty => Self::Empty,
            fold::LeafRef::Fail(error, trace) => Self::Fail(error.clone(), f(trace)),
            fold::LeafRef::Die(defect, trace) => Self::Die(defect.clone(), f(trace)),
            fold::LeafRef::Interrupt(fiber, trace) => Self::Interrupt(fiber.clone(), f(trace)),
        })
    }

    /// Rewrites `Fail` leaves to `Empty`, leaving defects, interruptions and
    /// the composition structure intact.
    ///
    /// Used when a typed failure channel is handled and only the untyped
    /// remainder should propagate.
    #[must_use]
    pub fn strip_failures(&self) -> Self
    where
        E: Clone,
    {
        fold::rebuild(self, |leaf| match leaf {
            fold::LeafRef::Empty | fold::LeafRef::Fail(..) => Self::Empty,
            fold::LeafRef::Die(defect, trace) => Self::Die(defect.clone(), trace.clone()),
            fold::LeafRef::Interrupt(fiber, trace) => {
                Self::Interrupt(fiber.clone(), trace.clone())
            }
        })
    }

    /// Converts the typed failure channel into the untyped defect channel:
    /// every `Fail` leaf becomes a `Die` leaf carrying the rendered error.
    #[must_use]
    pub fn into_defects(&self) -> Cause<Infallible>
    where
        E: fmt::Debug,
    {
        fold::rebuild(self, |leaf| match leaf {
            fold::LeafRef::Empty => Cause::Empty,
            fold::LeafRef::Fail(error, trace) => {
                Cause::Die(Defect::from_error(error), trace.clone())
            }
            fold::LeafRef::Die(defect, trace) => Cause::Die(defect.clone(), trace.clone()),
            fold::LeafRef::Interrupt(fiber, trace) => {
                Cause::Interrupt(fiber.clone(), trace.clone())
            }
        })
    }

    /// Collapses this cause to one representative defect.
    ///
    /// Precedence is fixed for diagnostic compatibility and must not change:
    /// the first typed failure (mapped through `f`), else a summary of the
    /// interrupting fibers, else the first defect, else a generic
    /// interruption defect.
    #[must_use]
    pub fn squash_with(&self, f: impl FnOnce(&E) -> Defect) -> Defect {
        if let Some(error) = self.failure_option() {
            return f(error);
        }
        if self.is_interrupted() {
            let ids: BTreeSet<u64> = self
                .interruptors()
                .iter()
                .flat_map(FiberId::ids)
                .collect();
            let rendered: Vec<String> = ids.iter().map(|id| format!("F{id}")).collect();
            return Defect::new(format!(
                "Interrupted by fibers: {}",
                rendered.join(", ")
            ));
        }
        if let Some(defect) = self.die_option() {
            return defect.clone();
        }
        Defect::new("Interrupted")
    }

    /// Rewrites this cause into the set of pure sequential chains it
    /// contains, distributing `Then` over `Both`.
    ///
    /// Each element describes what happened on one concurrent branch, with
    /// no `Both` node inside it.
    #[must_use]
    pub fn linearize(&self) -> HashSet<Self>
    where
        E: Clone + Eq + Hash,
    {
        struct Linearizer;
        impl<E: Clone + Eq + Hash> CauseFolder<E> for Linearizer {
            type Out = HashSet<Cause<E>>;
            fn on_empty(&mut self) -> Self::Out {
                HashSet::new()
            }
            fn on_fail(&mut self, error: &E, trace: &Trace) -> Self::Out {
                core::iter::once(Cause::Fail(error.clone(), trace.clone())).collect()
            }
            fn on_die(&mut self, defect: &Defect, trace: &Trace) -> Self::Out {
                core::iter::once(Cause::Die(defect.clone(), trace.clone())).collect()
            }
            fn on_interrupt(&mut self, fiber: &FiberId, trace: &Trace) -> Self::Out {
                core::iter::once(Cause::Interrupt(fiber.clone(), trace.clone())).collect()
            }
            fn on_then(&mut self, left: Self::Out, right: Self::Out) -> Self::Out {
                let mut out = HashSet::new();
                for a in &left {
                    for b in &right {
                        out.insert(a.clone().then(b.clone()));
                    }
                }
                out
            }
            fn on_both(&mut self, left: Self::Out, right: Self::Out) -> Self::Out {
                left.into_iter().chain(right).collect()
            }
        }
        self.fold(&mut Linearizer)
    }
}

impl Cause<Infallible> {
    /// Re-types a cause whose typed failure channel is provably unused.
    #[must_use]
    pub fn widen<E>(&self) -> Cause<E> {
        fold::rebuild(self, |leaf| match leaf {
            fold::LeafRef::Empty => Cause::Empty,
            fold::LeafRef::Fail(never, _) => match *never {},
            fold::LeafRef::Die(defect, trace) => Cause::Die(defect.clone(), trace.clone()),
            fold::LeafRef::Interrupt(fiber, trace) => {
                Cause::Interrupt(fiber.clone(), trace.clone())
            }
        })
    }
}

// Deep trees would overflow the stack under derived drop glue, so children
// are drained onto an explicit worklist first.
impl<E> Drop for Cause<E> {
    fn drop(&mut self) {
        if matches!(
            self,
            Self::Empty | Self::Fail(..) | Self::Die(..) | Self::Interrupt(..)
        ) {
            return;
        }
        let mut stack: Vec<Self> = Vec::new();
        take_children(self, &mut stack);
        while let Some(mut node) = stack.pop() {
            take_children(&mut node, &mut stack);
        }
    }
}

fn take_children<E>(node: &mut Cause<E>, out: &mut Vec<Cause<E>>) {
    match node {
        Cause::Then(left, right) | Cause::Both(left, right) => {
            out.push(mem::replace(&mut **left, Cause::Empty));
            out.push(mem::replace(&mut **right, Cause::Empty));
        }
        Cause::Stackless(inner, _) => out.push(mem::replace(&mut **inner, Cause::Empty)),
        _ => {}
    }
}

impl<E: Clone> Clone for Cause<E> {
    fn clone(&self) -> Self {
        fold::rebuild(self, |leaf| match leaf {
            fold::LeafRef::Empty => Self::Empty,
            fold::LeafRef::Fail(error, trace) => Self::Fail(error.clone(), trace.clone()),
            fold::LeafRef::Die(defect, trace) => Self::Die(defect.clone(), trace.clone()),
            fold::LeafRef::Interrupt(fiber, trace) => {
                Self::Interrupt(fiber.clone(), trace.clone())
            }
        })
    }
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        fold::structural_eq(self, other)
    }
}

impl<E: Eq> Eq for Cause<E> {}

impl<E: Hash> Hash for Cause<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        fold::structural_hash(self, state);
    }
}

impl<E: fmt::Debug> fmt::Debug for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        enum Tok<'a, E> {
            Node(&'a Cause<E>),
            Text(&'static str),
        }
        let mut stack: Vec<Tok<'_, E>> = vec![Tok::Node(self)];
        while let Some(tok) = stack.pop() {
            match tok {
                Tok::Text(text) => f.write_str(text)?,
                Tok::Node(node) => match node {
                    Self::Empty => f.write_str("Empty")?,
                    Self::Fail(error, _) => write!(f, "Fail({error:?})")?,
                    Self::Die(defect, _) => write!(f, "Die({:?})", defect.message())?,
                    Self::Interrupt(fiber, _) => write!(f, "Interrupt({fiber})")?,
                    Self::Then(left, right) => {
                        f.write_str("Then(")?;
                        stack.push(Tok::Text(")"));
                        stack.push(Tok::Node(&**right));
                        stack.push(Tok::Text(", "));
                        stack.push(Tok::Node(&**left));
                    }
                    Self::Both(left, right) => {
                        f.write_str("Both(")?;
                        stack.push(Tok::Text(")"));
                        stack.push(Tok::Node(&**right));
                        stack.push(Tok::Text(", "));
                        stack.push(Tok::Node(&**left));
                    }
                    Self::Stackless(inner, _) => stack.push(Tok::Node(&**inner)),
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuntimeFiberId;

    fn fail(n: i32) -> Cause<i32> {
        Cause::fail(n)
    }

    // =========================================================================
    // Identity and Composition
    // =========================================================================

    #[test]
    fn empty_is_identity_for_then() {
        let a = fail(1);
        assert_eq!(Cause::empty().then(a.clone()), a);
        assert_eq!(a.clone().then(Cause::empty()), a);
    }

    #[test]
    fn empty_is_identity_for_both() {
        let a = fail(1);
        assert_eq!(Cause::empty().both(a.clone()), a);
        assert_eq!(a.clone().both(Cause::empty()), a);
    }

    #[test]
    fn then_records_order() {
        let c = fail(1).then(fail(2));
        assert_eq!(c.failures(), vec![&1, &2]);
        let c = fail(2).then(fail(1));
        assert_eq!(c.failures(), vec![&2, &1]);
    }

    #[test]
    fn stackless_is_transparent_to_equality_and_hash() {
        use std::collections::hash_map::DefaultHasher;
        let plain = fail(1).then(fail(2));
        let wrapped = fail(1).then(fail(2)).stackless(true);
        assert_eq!(plain, wrapped);

        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        plain.hash(&mut h1);
        wrapped.hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    // =========================================================================
    // Stack Safety
    // =========================================================================

    fn deep_then_chain(depth: usize) -> Cause<i32> {
        let mut cause = fail(0);
        for i in 1..depth {
            cause = cause.then(fail(i as i32));
        }
        cause
    }

    #[test]
    fn fold_left_survives_deep_chains() {
        let depth = 100_000;
        let cause = deep_then_chain(depth);
        let count = cause.fold_left(0usize, |acc, _| ControlFlow::Continue(acc + 1));
        assert_eq!(count, depth);
    }

    #[test]
    fn fold_survives_deep_chains() {
        struct LeafCount;
        impl CauseFolder<i32> for LeafCount {
            type Out = usize;
            fn on_empty(&mut self) -> usize {
                0
            }
            fn on_fail(&mut self, _: &i32, _: &Trace) -> usize {
                1
            }
            fn on_die(&mut self, _: &Defect, _: &Trace) -> usize {
                1
            }
            fn on_interrupt(&mut self, _: &FiberId, _: &Trace) -> usize {
                1
            }
            fn on_then(&mut self, l: usize, r: usize) -> usize {
                l + r
            }
            fn on_both(&mut self, l: usize, r: usize) -> usize {
                l + r
            }
        }
        let cause = deep_then_chain(100_000);
        assert_eq!(cause.fold(&mut LeafCount), 100_000);
    }

    #[test]
    fn clone_eq_and_drop_survive_deep_chains() {
        let cause = deep_then_chain(100_000);
        let copy = cause.clone();
        assert_eq!(cause, copy);
        drop(cause);
        drop(copy);
    }

    // =========================================================================
    // Searches
    // =========================================================================

    #[test]
    fn find_is_preorder() {
        let c = fail(1).then(fail(2));
        assert_eq!(c.failure_option(), Some(&1));
    }

    #[test]
    fn fold_left_short_circuits() {
        let c = fail(1).then(fail(2)).then(fail(3));
        let mut visited = 0;
        let first = c.fold_left(None, |_, leaf| {
            visited += 1;
            match leaf {
                Cause::Fail(n, _) => ControlFlow::Break(Some(*n)),
                _ => ControlFlow::Continue(None),
            }
        });
        assert_eq!(first, Some(1));
        assert_eq!(visited, 1);
    }

    #[test]
    fn contains_finds_subtree() {
        let sub = fail(2).both(fail(3));
        let whole = fail(1).then(sub.clone());
        assert!(whole.contains(&sub));
        assert!(whole.contains(&fail(3)));
        assert!(!whole.contains(&fail(9)));
    }

    #[test]
    fn is_empty_sees_through_composition() {
        let empty: Cause<i32> = Cause::empty().then(Cause::empty());
        assert!(empty.is_empty());
        assert!(!fail(1).is_empty());
        assert!(!Cause::<i32>::die("boom").is_empty());
    }

    // =========================================================================
    // Transforms
    // =========================================================================

    #[test]
    fn strip_failures_keeps_defects_and_interrupts() {
        let fiber = FiberId::Runtime(RuntimeFiberId::new(1, 0));
        let c = fail(1)
            .then(Cause::die("boom"))
            .both(Cause::interrupt(fiber.clone()));
        let stripped = c.strip_failures();
        assert!(stripped.failures().is_empty());
        assert_eq!(stripped.die_option().map(Defect::message), Some("boom"));
        assert_eq!(stripped.interrupt_option(), Some(&fiber));
    }

    #[test]
    fn into_defects_renders_failures() {
        let c = fail(42).then(Cause::die("boom"));
        let untyped = c.into_defects();
        let defects: Vec<&str> = untyped.defects().iter().map(|d| d.message()).collect();
        assert_eq!(defects, vec!["42", "boom"]);
        assert!(!untyped.is_failure());
    }

    #[test]
    fn map_trace_rewrites_every_leaf() {
        let c = fail(1).then(Cause::die("boom"));
        let tagged = c.map_trace(|_| Trace::from_frames(vec!["here".to_string()]));
        assert_eq!(tagged.failure_option(), Some(&1));
        assert_eq!(tagged.die_option().map(Defect::message), Some("boom"));
        let mut frames = 0;
        tagged.fold_left((), |(), leaf| {
            match leaf {
                Cause::Fail(_, trace) | Cause::Die(_, trace) => {
                    assert_eq!(trace.frames(), ["here"]);
                    frames += 1;
                }
                _ => {}
            }
            core::ops::ControlFlow::Continue(())
        });
        assert_eq!(frames, 2);
    }

    // =========================================================================
    // Squash Precedence
    // =========================================================================

    #[test]
    fn squash_prefers_typed_failure() {
        let fiber = FiberId::Runtime(RuntimeFiberId::new(1, 0));
        let c = Cause::interrupt(fiber)
            .both(Cause::die("defect"))
            .then(fail(7));
        assert_eq!(c.squash_with(|e| Defect::new(format!("E{e}"))).message(), "E7");
    }

    #[test]
    fn squash_summarizes_interruptors_before_defects() {
        let a = FiberId::Runtime(RuntimeFiberId::new(1, 0));
        let b = FiberId::Runtime(RuntimeFiberId::new(2, 0));
        let c: Cause<i32> = Cause::die("defect")
            .both(Cause::interrupt(a))
            .both(Cause::interrupt(b));
        assert_eq!(
            c.squash_with(|_| Defect::new("unused")).message(),
            "Interrupted by fibers: F1, F2"
        );
    }

    #[test]
    fn squash_falls_back_to_first_defect() {
        let c: Cause<i32> = Cause::die("first").then(Cause::die("second"));
        assert_eq!(c.squash_with(|_| Defect::new("unused")).message(), "first");
    }

    #[test]
    fn squash_generic_interrupt_for_empty() {
        let c: Cause<i32> = Cause::empty();
        assert_eq!(c.squash_with(|_| Defect::new("unused")).message(), "Interrupted");
    }

    // =========================================================================
    // Linearize
    // =========================================================================

    #[test]
    fn linearize_distributes_then_over_both() {
        // (1 then (2 both 3)) linearizes to {1 then 2, 1 then 3}
        let c = fail(1).then(fail(2).both(fail(3)));
        let branches = c.linearize();
        assert_eq!(branches.len(), 2);
        assert!(branches.contains(&fail(1).then(fail(2))));
        assert!(branches.contains(&fail(1).then(fail(3))));
    }

    #[test]
    fn linearize_of_leaf_is_singleton() {
        let branches = fail(1).linearize();
        assert_eq!(branches.len(), 1);
        assert!(branches.contains(&fail(1)));
    }

    #[test]
    fn linearize_has_no_both_nodes() {
        let c = fail(1).both(fail(2)).then(fail(3).both(fail(4)));
        for branch in c.linearize() {
            assert!(branch.find(|n| matches!(n, Cause::Both(..)).then_some(())).is_none());
        }
    }
}
