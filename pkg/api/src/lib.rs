pub mod handlers;
pub mod server;

use pkg_controllers::queue::WorkQueue;
use pkg_state::authz::AuthzStore;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: AuthzStore,
    /// The running controller's queue.
    pub queue: WorkQueue,
}
