//! Iterative traversal engines for the failure tree.
//!
//! Supervised fiber trees produce arbitrarily deep `Then`/`Both` chains, so
//! no operation on a [`Cause`] may recurse on the tree. Every traversal in
//! this module runs on an explicit worklist; the engines here back `fold`,
//! the rebuilding transforms (`map`, `strip_failures`, clone), and the
//! structural equality/hash implementations.

use super::Cause;
use crate::types::{Defect, FiberId, Trace};
use core::hash::{Hash, Hasher};
use smallvec::SmallVec;

/// Structural catamorphism over a [`Cause`].
///
/// `fold` visits the tree bottom-up: leaf callbacks produce an `Out`, and
/// `on_then`/`on_both`/`on_stackless` combine the already-folded children.
/// Callbacks take `&mut self` so folders can carry state.
///
/// For the algebraic laws to carry over to folded values, `on_then` and
/// `on_both` should be associative and treat `on_empty()` as an identity.
pub trait CauseFolder<E> {
    /// The folded value.
    type Out;

    /// Called for an `Empty` leaf.
    fn on_empty(&mut self) -> Self::Out;
    /// Called for a `Fail` leaf.
    fn on_fail(&mut self, error: &E, trace: &Trace) -> Self::Out;
    /// Called for a `Die` leaf.
    fn on_die(&mut self, defect: &Defect, trace: &Trace) -> Self::Out;
    /// Called for an `Interrupt` leaf.
    fn on_interrupt(&mut self, fiber: &FiberId, trace: &Trace) -> Self::Out;
    /// Combines the folded operands of a `Then` node.
    fn on_then(&mut self, left: Self::Out, right: Self::Out) -> Self::Out;
    /// Combines the folded operands of a `Both` node.
    fn on_both(&mut self, left: Self::Out, right: Self::Out) -> Self::Out;
    /// Rewraps the folded operand of a `Stackless` node.
    ///
    /// Stack-trace elision is transparent to the algebra, so the default
    /// passes the inner value through unchanged.
    fn on_stackless(&mut self, inner: Self::Out, _stackless: bool) -> Self::Out {
        inner
    }
}

enum Frame<'a, E> {
    Visit(&'a Cause<E>),
    Then,
    Both,
    Stackless(bool),
}

/// Runs a folder over a cause tree without recursing.
pub(crate) fn fold_cause<E, F: CauseFolder<E>>(root: &Cause<E>, folder: &mut F) -> F::Out {
    let mut frames: SmallVec<[Frame<'_, E>; 16]> = SmallVec::new();
    let mut results: SmallVec<[F::Out; 16]> = SmallVec::new();
    frames.push(Frame::Visit(root));
    while let Some(frame) = frames.pop() {
        match frame {
            Frame::Visit(node) => match node {
                Cause::Empty => results.push(folder.on_empty()),
                Cause::Fail(error, trace) => results.push(folder.on_fail(error, trace)),
                Cause::Die(defect, trace) => results.push(folder.on_die(defect, trace)),
                Cause::Interrupt(fiber, trace) => results.push(folder.on_interrupt(fiber, trace)),
                Cause::Then(left, right) => {
                    frames.push(Frame::Then);
                    frames.push(Frame::Visit(&**right));
                    frames.push(Frame::Visit(&**left));
                }
                Cause::Both(left, right) => {
                    frames.push(Frame::Both);
                    frames.push(Frame::Visit(&**right));
                    frames.push(Frame::Visit(&**left));
                }
                Cause::Stackless(inner, stackless) => {
                    frames.push(Frame::Stackless(*stackless));
                    frames.push(Frame::Visit(&**inner));
                }
            },
            Frame::Then => {
                let right = pop(&mut results);
                let left = pop(&mut results);
                results.push(folder.on_then(left, right));
            }
            Frame::Both => {
                let right = pop(&mut results);
                let left = pop(&mut results);
                results.push(folder.on_both(left, right));
            }
            Frame::Stackless(stackless) => {
                let inner = pop(&mut results);
                results.push(folder.on_stackless(inner, stackless));
            }
        }
    }
    pop(&mut results)
}

fn pop<T>(results: &mut SmallVec<[T; 16]>) -> T {
    // Every Visit pushes exactly one result before its combining frame pops.
    match results.pop() {
        Some(value) => value,
        None => unreachable!("fold worklist invariant violated"),
    }
}

/// A borrowed view of one leaf node, handed to [`rebuild`] closures.
pub(crate) enum LeafRef<'a, E> {
    Empty,
    Fail(&'a E, &'a Trace),
    Die(&'a Defect, &'a Trace),
    Interrupt(&'a FiberId, &'a Trace),
}

/// Rebuilds a tree bottom-up, mapping each leaf through `leaf` and
/// preserving the `Then`/`Both`/`Stackless` structure.
///
/// Backs `map`, `strip_failures`, `into_defects`, `widen`, and `Clone`.
pub(crate) fn rebuild<E, E2>(
    root: &Cause<E>,
    mut leaf: impl FnMut(LeafRef<'_, E>) -> Cause<E2>,
) -> Cause<E2> {
    struct Rebuilder<'f, E, E2> {
        leaf: &'f mut dyn FnMut(LeafRef<'_, E>) -> Cause<E2>,
    }
    impl<E, E2> CauseFolder<E> for Rebuilder<'_, E, E2> {
        type Out = Cause<E2>;
        fn on_empty(&mut self) -> Cause<E2> {
            (self.leaf)(LeafRef::Empty)
        }
        fn on_fail(&mut self, error: &E, trace: &Trace) -> Cause<E2> {
            (self.leaf)(LeafRef::Fail(error, trace))
        }
        fn on_die(&mut self, defect: &Defect, trace: &Trace) -> Cause<E2> {
            (self.leaf)(LeafRef::Die(defect, trace))
        }
        fn on_interrupt(&mut self, fiber: &FiberId, trace: &Trace) -> Cause<E2> {
            (self.leaf)(LeafRef::Interrupt(fiber, trace))
        }
        fn on_then(&mut self, left: Cause<E2>, right: Cause<E2>) -> Cause<E2> {
            Cause::Then(Box::new(left), Box::new(right))
        }
        fn on_both(&mut self, left: Cause<E2>, right: Cause<E2>) -> Cause<E2> {
            Cause::Both(Box::new(left), Box::new(right))
        }
        fn on_stackless(&mut self, inner: Cause<E2>, stackless: bool) -> Cause<E2> {
            Cause::Stackless(Box::new(inner), stackless)
        }
    }
    let mut folder = Rebuilder { leaf: &mut leaf };
    fold_cause(root, &mut folder)
}

/// Structural equality, transparent to `Stackless` wrappers.
pub(crate) fn structural_eq<E: PartialEq>(a: &Cause<E>, b: &Cause<E>) -> bool {
    let mut stack: SmallVec<[(&Cause<E>, &Cause<E>); 16]> = SmallVec::new();
    stack.push((a, b));
    while let Some((a, b)) = stack.pop() {
        let (a, b) = (strip_stackless(a), strip_stackless(b));
        match (a, b) {
            (Cause::Empty, Cause::Empty) => {}
            (Cause::Fail(e1, t1), Cause::Fail(e2, t2)) => {
                if e1 != e2 || t1 != t2 {
                    return false;
                }
            }
            (Cause::Die(d1, t1), Cause::Die(d2, t2)) => {
                if d1 != d2 || t1 != t2 {
                    return false;
                }
            }
            (Cause::Interrupt(f1, t1), Cause::Interrupt(f2, t2)) => {
                if f1 != f2 || t1 != t2 {
                    return false;
                }
            }
            (Cause::Then(l1, r1), Cause::Then(l2, r2))
            | (Cause::Both(l1, r1), Cause::Both(l2, r2)) => {
                stack.push((&**r1, &**r2));
                stack.push((&**l1, &**l2));
            }
            _ => return false,
        }
    }
    true
}

/// Structural hash, consistent with [`structural_eq`]: `Stackless` wrappers
/// contribute nothing.
pub(crate) fn structural_hash<E: Hash, H: Hasher>(root: &Cause<E>, state: &mut H) {
    let mut stack: SmallVec<[&Cause<E>; 16]> = SmallVec::new();
    stack.push(root);
    while let Some(node) = stack.pop() {
        match strip_stackless(node) {
            Cause::Empty => state.write_u8(0),
            Cause::Fail(error, trace) => {
                state.write_u8(1);
                error.hash(state);
                trace.hash(state);
            }
            Cause::Die(defect, trace) => {
                state.write_u8(2);
                defect.hash(state);
                trace.hash(state);
            }
            Cause::Interrupt(fiber, trace) => {
                state.write_u8(3);
                fiber.hash(state);
                trace.hash(state);
            }
            Cause::Then(left, right) => {
                state.write_u8(4);
                stack.push(&**right);
                stack.push(&**left);
            }
            Cause::Both(left, right) => {
                state.write_u8(5);
                stack.push(&**right);
                stack.push(&**left);
            }
            Cause::Stackless(..) => unreachable!("strip_stackless returned a wrapper"),
        }
    }
}

fn strip_stackless<E>(mut node: &Cause<E>) -> &Cause<E> {
    while let Cause::Stackless(inner, _) = node {
        node = &**inner;
    }
    node
}
