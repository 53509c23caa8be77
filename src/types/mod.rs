//! Core leaf types consumed by the failure algebra and the scope registry.
//!
//! These types have no dependencies on the rest of the crate:
//!
//! - [`FiberId`]: identity of the logical task that caused or witnessed an
//!   event (interruption attribution)
//! - [`Defect`]: payload of an unexpected failure (a broken invariant)
//! - [`Trace`]: lightweight captured frames attached to failure leaves

pub mod defect;
pub mod fiber_id;
pub mod trace;

pub use defect::Defect;
pub use fiber_id::{FiberId, RuntimeFiberId};
pub use trace::Trace;
