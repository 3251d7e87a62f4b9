//! Read and write interfaces the global role binding reconciler depends on.
//!
//! [`AuthzStore`](crate::authz::AuthzStore) implements all three against the
//! SlateDB state store; tests substitute small in-memory fakes.

use async_trait::async_trait;
use pkg_types::cluster::Cluster;
use pkg_types::rbac::{ClusterRoleTemplateBinding, GlobalRole};

use crate::error::StoreError;

/// Resolves GlobalRoles by name.
#[async_trait]
pub trait RoleCatalog: Send + Sync {
    /// Fails with [`StoreError::NotFound`] if no role has this name.
    async fn get(&self, name: &str) -> Result<GlobalRole, StoreError>;
}

/// Lists every known cluster.
#[async_trait]
pub trait ClusterDirectory: Send + Sync {
    async fn list(&self) -> Result<Vec<Cluster>, StoreError>;
}

/// Owner-indexed cache and client for ClusterRoleTemplateBindings.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Bindings filed under `<cluster>/<grb name>` in the GRB owner index.
    async fn get_by_owner_index(
        &self,
        owner_key: &str,
    ) -> Result<Vec<ClusterRoleTemplateBinding>, StoreError>;

    /// Create a binding. An empty `name` is generated from `generate_name`.
    async fn create(
        &self,
        crtb: ClusterRoleTemplateBinding,
    ) -> Result<ClusterRoleTemplateBinding, StoreError>;

    async fn delete_namespaced(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}
