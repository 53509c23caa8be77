//! Scoped finalization.
//!
//! # Overview
//!
//! A scope owns the release actions of the resources acquired inside it.
//! Registration yields a [`Key`] (or a clonable [`FinalizerHandle`]); exit
//! drains every remaining finalizer under an [`ExecutionStrategy`] and merges
//! their outcomes into one [`FinalExit`].
//!
//! # Core Guarantees
//!
//! - Every registered finalizer runs exactly once, whether through the
//!   scope's drain, an early release, or immediate execution when offered to
//!   an already-exited scope.
//! - The exited state is absorbing and drains happen at most once.
//! - Finalizer outcomes are never discarded; failures merge into the
//!   caller's exit.
//! - No finalizer ever runs while the registry lock is held.
//!
//! [`FinalExit`]: crate::exit::FinalExit

mod finalizer;
mod release_map;

pub use finalizer::{noop_finalizer, ExecutionStrategy, Finalizer, FinalizerHandle, Key};
pub use release_map::ReleaseMap;
