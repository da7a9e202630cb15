//! # handoff-reconcile
//!
//! The reconciler loop and the event funnel that drives it.
//!
//! Call [`Unit::dispatch`] with each lifecycle event. The unit runs the
//! relation protocol for its role, then [`Reconciler::reconcile`], which
//! declares and restarts only what changed.

pub mod diff;
pub mod dispatch;
pub mod error;
pub mod reconciler;

pub use diff::{diff_plan, PlanDiff};
pub use dispatch::{DispatchReport, HandledEvent, Unit, UnitContext};
pub use error::ReconcileError;
pub use reconciler::{ReconcileOutcome, Reconciler};
