use chrono::{DateTime, Utc};
use pkg_constants::authz::{GRB_OWNER_LABEL, OWNER_API_VERSION, OWNER_KIND_GLOBAL_ROLE_BINDING};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn new_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

// --- Principal ---

/// The subject a binding grants permissions to. A binding targets either a
/// user or a group, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Principal {
    /// A user, by user name.
    User(String),
    /// A group, by group principal name (e.g. `okta_group://admins`).
    Group(String),
}

impl Principal {
    pub fn name(&self) -> &str {
        match self {
            Principal::User(name) | Principal::Group(name) => name,
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::User(name) => write!(f, "user {}", name),
            Principal::Group(name) => write!(f, "group {}", name),
        }
    }
}

// --- Owner reference ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

// --- GlobalRole ---

/// A role granted installation-wide. `inherited_cluster_roles` names the
/// role templates its holders receive in every cluster.
/// Stored at `/registry/globalroles/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRole {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub inherited_cluster_roles: Vec<String>,
}

// --- GlobalRoleBinding ---

/// Grants a GlobalRole to one principal.
/// Stored at `/registry/globalrolebindings/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRoleBinding {
    pub name: String,
    #[serde(default = "new_uid")]
    pub uid: String,
    pub global_role_name: String,
    pub principal: Principal,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl GlobalRoleBinding {
    /// Owner reference stamped on every binding created for this GRB.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: OWNER_API_VERSION.to_string(),
            kind: OWNER_KIND_GLOBAL_ROLE_BINDING.to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
        }
    }
}

// --- ClusterRoleTemplateBinding ---

/// Grants one role template to one principal in one cluster.
/// Stored at `/registry/clusterroletemplatebindings/<namespace>/<name>`;
/// the namespace is the cluster name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleTemplateBinding {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub generate_name: Option<String>,
    pub namespace: String,
    pub cluster_name: String,
    pub role_template_name: String,
    pub principal: Principal,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    /// Set once deletion has been requested; the object may linger until
    /// finalizers complete.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ClusterRoleTemplateBinding {
    /// `<namespace>/<name>`, unique across all bindings.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Name of the GlobalRoleBinding this binding was created for, if any.
    pub fn grb_owner(&self) -> Option<&str> {
        self.labels.get(GRB_OWNER_LABEL).map(String::as_str)
    }
}

// --- Owner index ---

/// Index key under which a GRB's bindings in one cluster are filed.
pub fn grb_owner_index_key(cluster_name: &str, grb_name: &str) -> String {
    format!("{}/{}", cluster_name, grb_name)
}

/// Index function for the GRB owner index: no keys for bindings without the
/// owner label, otherwise exactly `<cluster_name>/<owner label value>`.
pub fn grb_owner_index_keys(crtb: &ClusterRoleTemplateBinding) -> Vec<String> {
    match crtb.grb_owner() {
        Some(owner) => vec![grb_owner_index_key(&crtb.cluster_name, owner)],
        None => Vec::new(),
    }
}
