//! State store key layout and controller timing constants.

/// Prefix for GlobalRole objects: `/registry/globalroles/<name>`.
pub const GLOBAL_ROLES_PREFIX: &str = "/registry/globalroles/";

/// Prefix for GlobalRoleBinding objects: `/registry/globalrolebindings/<name>`.
pub const GLOBAL_ROLE_BINDINGS_PREFIX: &str = "/registry/globalrolebindings/";

/// Prefix for Cluster objects: `/registry/clusters/<name>`.
pub const CLUSTERS_PREFIX: &str = "/registry/clusters/";

/// Prefix for ClusterRoleTemplateBinding objects:
/// `/registry/clusterroletemplatebindings/<namespace>/<name>`.
pub const CRTBS_PREFIX: &str = "/registry/clusterroletemplatebindings/";

/// Number of recent watch events kept in memory.
pub const EVENT_LOG_CAPACITY: usize = 1024;

/// Capacity of the watch broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How often every GlobalRoleBinding is re-enqueued, in seconds.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// First requeue delay after a failed reconcile, in milliseconds.
pub const REQUEUE_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound for the per-key requeue delay, in seconds.
pub const REQUEUE_MAX_DELAY_SECS: u64 = 300;
