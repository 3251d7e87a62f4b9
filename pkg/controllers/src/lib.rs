//! Controllers that converge ClusterRoleTemplateBindings to the cluster
//! roles inherited through GlobalRoleBindings.

pub mod controller;
pub mod error;
pub mod globalrolebinding;
pub mod queue;

pub use controller::GlobalRoleBindingController;
pub use error::{AggregateError, ClusterError, ReconcileError};
pub use globalrolebinding::{GlobalRoleBindingReconciler, ReconcileSummary, ReconcilerConfig};
