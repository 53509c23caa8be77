//! Causeway: resource-safety and failure-composition core for a
//! structured-concurrency effect runtime.
//!
//! # Overview
//!
//! Causeway is the part of an effect runtime that has to be right before
//! anything else can be: how concurrent and sequential failures are recorded
//! without losing information, and how acquired resources are released
//! exactly once, in a documented order, even when work is cancelled
//! mid-flight.
//!
//! # Core Guarantees
//!
//! - **No lost failures**: failures during use, during release, and on
//!   concurrent siblings merge into one [`Cause`] tree; nothing is silently
//!   overwritten
//! - **Exactly-once release**: every registered finalizer runs once; release
//!   is idempotent per key and a drained scope can never reopen
//! - **Documented ordering**: sequential scopes release in reverse
//!   acquisition order; parallel branches release unordered but completely
//! - **Cancel-correctness**: acquisition and finalizer registration form one
//!   uninterruptible unit, so a resource is never live without a recorded
//!   finalizer
//! - **Stack safety**: every traversal of a [`Cause`] tree is iterative and
//!   survives compositions 100,000 nodes deep
//!
//! # Module Structure
//!
//! - [`types`]: Core leaf types ([`FiberId`], [`Defect`], [`Trace`])
//! - [`cause`]: The failure algebra ([`Cause`], folds, squashing)
//! - [`exit`]: Terminal outcomes ([`Exit`]) and their zips
//! - [`scope`]: The finalizer registry ([`ReleaseMap`], release strategies)
//! - [`managed`]: Resource-scoped computations ([`Managed`])
//! - [`runtime`]: The scheduler seam ([`Cx`], masked regions, forked fibers)
//! - [`tracing_compat`]: Optional tracing integration
//!
//! The fiber scheduler proper, service injection, queues, clocks and logging
//! sinks are external collaborators; [`Cx`] is the only seam this crate
//! exposes to them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod cause;
pub mod exit;
pub mod managed;
pub mod runtime;
pub mod scope;
pub mod tracing_compat;
pub mod types;

// Re-exports for convenient access to core types
pub use cause::{Cause, CauseFolder};
pub use exit::{Exit, FinalExit};
pub use managed::{Managed, Memoized, Preallocated, Switchable};
pub use runtime::{Cx, Restore, TaskHandle};
pub use scope::{ExecutionStrategy, Finalizer, FinalizerHandle, Key, ReleaseMap};
pub use types::{Defect, FiberId, RuntimeFiberId, Trace};
