//! Labels, index names and owner-reference values shared by the
//! global role binding reconciler and the binding store.

/// Label carried by every ClusterRoleTemplateBinding created on behalf of a
/// GlobalRoleBinding. The value is the owning GlobalRoleBinding's name.
pub const GRB_OWNER_LABEL: &str = "authz.management.cattle.io/grb-owner";

/// Name of the binding index keyed by `<cluster>/<owning grb>`.
pub const CRTB_GRB_OWNER_INDEX: &str = "authz.management.cattle.io/crtb-owner";

/// API version stamped on owner references to a GlobalRoleBinding.
pub const OWNER_API_VERSION: &str = "management.cattle.io/v3";

/// Kind stamped on owner references to a GlobalRoleBinding.
pub const OWNER_KIND_GLOBAL_ROLE_BINDING: &str = "GlobalRoleBinding";

/// `generate_name` prefix for bindings created by the reconciler.
pub const CRTB_GRB_GENERATE_NAME: &str = "crtb-grb-";

/// Length of the random suffix appended to a `generate_name`.
pub const GENERATED_NAME_SUFFIX_LEN: usize = 5;

/// Name of the management cluster.
pub const LOCAL_CLUSTER: &str = "local";
