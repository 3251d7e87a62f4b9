use async_trait::async_trait;
use chrono::Utc;
use pkg_constants::authz::{CRTB_GRB_OWNER_INDEX, GENERATED_NAME_SUFFIX_LEN};
use pkg_constants::state::{
    CLUSTERS_PREFIX, CRTBS_PREFIX, GLOBAL_ROLE_BINDINGS_PREFIX, GLOBAL_ROLES_PREFIX,
};
use pkg_types::cluster::Cluster;
use pkg_types::rbac::{
    ClusterRoleTemplateBinding, GlobalRole, GlobalRoleBinding, grb_owner_index_keys,
};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::StateStore;
use crate::error::StoreError;
use crate::index::Indexer;
use crate::lister::{BindingStore, ClusterDirectory, RoleCatalog};
use crate::watch::EventLog;

pub fn global_role_key(name: &str) -> String {
    format!("{}{}", GLOBAL_ROLES_PREFIX, name)
}

pub fn global_role_binding_key(name: &str) -> String {
    format!("{}{}", GLOBAL_ROLE_BINDINGS_PREFIX, name)
}

pub fn cluster_key(name: &str) -> String {
    format!("{}{}", CLUSTERS_PREFIX, name)
}

pub fn crtb_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", CRTBS_PREFIX, namespace, name)
}

/// Append a random lowercase hex suffix to a `generate_name` prefix.
fn generate_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &suffix[..GENERATED_NAME_SUFFIX_LEN])
}

/// Typed access to authorization objects in the [`StateStore`].
///
/// ClusterRoleTemplateBindings are additionally held in an in-memory
/// [`Indexer`] keyed by the GRB owner index, rebuilt from storage when the
/// store is opened and updated on every create and delete made through it.
#[derive(Clone)]
pub struct AuthzStore {
    state: StateStore,
    crtbs: Arc<Indexer<ClusterRoleTemplateBinding>>,
}

impl AuthzStore {
    pub async fn new(state: StateStore) -> Result<Self, StoreError> {
        let crtbs: Arc<Indexer<ClusterRoleTemplateBinding>> =
            Arc::new(Indexer::new(CRTB_GRB_OWNER_INDEX, grb_owner_index_keys));
        for crtb in state.list_json::<ClusterRoleTemplateBinding>(CRTBS_PREFIX).await? {
            crtbs.upsert(crtb.key(), crtb);
        }
        info!(
            "Binding cache ready: {} bindings, index {}",
            crtbs.len(),
            crtbs.name()
        );
        Ok(Self { state, crtbs })
    }

    pub fn events(&self) -> EventLog {
        self.state.events()
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.state.close().await
    }

    // --- GlobalRoles ---

    pub async fn put_global_role(&self, gr: &GlobalRole) -> Result<(), StoreError> {
        self.state.put_json(&global_role_key(&gr.name), gr).await
    }

    pub async fn get_global_role(&self, name: &str) -> Result<Option<GlobalRole>, StoreError> {
        self.state.get_json(&global_role_key(name)).await
    }

    pub async fn delete_global_role(&self, name: &str) -> Result<bool, StoreError> {
        self.state.delete(&global_role_key(name)).await
    }

    // --- GlobalRoleBindings ---

    pub async fn put_global_role_binding(&self, grb: &GlobalRoleBinding) -> Result<(), StoreError> {
        self.state
            .put_json(&global_role_binding_key(&grb.name), grb)
            .await
    }

    pub async fn get_global_role_binding(
        &self,
        name: &str,
    ) -> Result<Option<GlobalRoleBinding>, StoreError> {
        self.state.get_json(&global_role_binding_key(name)).await
    }

    /// Store `grb`, keeping the uid and creation time of an existing binding
    /// with the same name so owner references on its bindings stay valid.
    pub async fn apply_global_role_binding(
        &self,
        mut grb: GlobalRoleBinding,
    ) -> Result<GlobalRoleBinding, StoreError> {
        if let Some(existing) = self.get_global_role_binding(&grb.name).await? {
            grb.uid = existing.uid;
            grb.created_at = existing.created_at;
        }
        self.put_global_role_binding(&grb).await?;
        Ok(grb)
    }

    /// GlobalRoleBindings that decode; the rest are logged and skipped.
    pub async fn list_global_role_bindings(&self) -> Result<Vec<GlobalRoleBinding>, StoreError> {
        self.state.list_json_lossy(GLOBAL_ROLE_BINDINGS_PREFIX).await
    }

    pub async fn delete_global_role_binding(&self, name: &str) -> Result<bool, StoreError> {
        self.state.delete(&global_role_binding_key(name)).await
    }

    // --- Clusters ---

    pub async fn put_cluster(&self, cluster: &Cluster) -> Result<(), StoreError> {
        self.state.put_json(&cluster_key(&cluster.name), cluster).await
    }

    pub async fn delete_cluster(&self, name: &str) -> Result<bool, StoreError> {
        self.state.delete(&cluster_key(name)).await
    }

    // --- ClusterRoleTemplateBindings ---

    /// All cached bindings, ordered by `namespace/name`.
    pub fn list_bindings(&self) -> Vec<ClusterRoleTemplateBinding> {
        self.crtbs.list()
    }

    /// Delete every binding in `namespace`, whoever owns it. Returns how
    /// many were removed.
    pub async fn delete_namespace_bindings(&self, namespace: &str) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for crtb in self.crtbs.list() {
            if crtb.namespace != namespace {
                continue;
            }
            match self.delete_namespaced(&crtb.namespace, &crtb.name).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        if deleted > 0 {
            info!("Deleted {} bindings in namespace {}", deleted, namespace);
        }
        Ok(deleted)
    }
}

#[async_trait]
impl RoleCatalog for AuthzStore {
    async fn get(&self, name: &str) -> Result<GlobalRole, StoreError> {
        self.get_global_role(name)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "globalrole",
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl ClusterDirectory for AuthzStore {
    async fn list(&self) -> Result<Vec<Cluster>, StoreError> {
        self.state.list_json(CLUSTERS_PREFIX).await
    }
}

#[async_trait]
impl BindingStore for AuthzStore {
    async fn get_by_owner_index(
        &self,
        owner_key: &str,
    ) -> Result<Vec<ClusterRoleTemplateBinding>, StoreError> {
        Ok(self.crtbs.by_index(owner_key))
    }

    async fn create(
        &self,
        mut crtb: ClusterRoleTemplateBinding,
    ) -> Result<ClusterRoleTemplateBinding, StoreError> {
        if crtb.name.is_empty() {
            crtb.name = match crtb.generate_name.as_deref() {
                Some(prefix) if !prefix.is_empty() => generate_name(prefix),
                _ => {
                    return Err(StoreError::Invalid {
                        kind: "clusterroletemplatebinding",
                        reason: "name or generateName is required".to_string(),
                    });
                }
            };
        }
        if crtb.namespace.is_empty() {
            return Err(StoreError::Invalid {
                kind: "clusterroletemplatebinding",
                reason: format!("{}: namespace is required", crtb.name),
            });
        }
        if self.crtbs.contains(&crtb.key()) {
            return Err(StoreError::AlreadyExists {
                kind: "clusterroletemplatebinding",
                name: crtb.key(),
            });
        }
        crtb.created_at = Utc::now();

        self.state
            .put_json(&crtb_key(&crtb.namespace, &crtb.name), &crtb)
            .await?;
        self.crtbs.upsert(crtb.key(), crtb.clone());
        debug!("Stored clusterroletemplatebinding {}", crtb.key());
        Ok(crtb)
    }

    async fn delete_namespaced(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = format!("{}/{}", namespace, name);
        if !self.crtbs.contains(&key) {
            return Err(StoreError::NotFound {
                kind: "clusterroletemplatebinding",
                name: key,
            });
        }
        self.state.delete(&crtb_key(namespace, name)).await?;
        self.crtbs.remove(&key);
        debug!("Deleted clusterroletemplatebinding {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::temp_dir;
    use pkg_constants::authz::{CRTB_GRB_GENERATE_NAME, GRB_OWNER_LABEL};
    use pkg_types::rbac::Principal;
    use std::collections::BTreeMap;

    fn owned_crtb(cluster: &str, owner: &str, role: &str) -> ClusterRoleTemplateBinding {
        ClusterRoleTemplateBinding {
            name: String::new(),
            generate_name: Some(CRTB_GRB_GENERATE_NAME.to_string()),
            namespace: cluster.to_string(),
            cluster_name: cluster.to_string(),
            role_template_name: role.to_string(),
            principal: Principal::User("test-user".to_string()),
            labels: BTreeMap::from([(GRB_OWNER_LABEL.to_string(), owner.to_string())]),
            owner_references: vec![],
            deletion_timestamp: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_generates_name_and_indexes() {
        let store = AuthzStore::new(StateStore::new(&temp_dir()).await.unwrap())
            .await
            .unwrap();

        let created = store
            .create(owned_crtb("not-local", "test-grb", "cluster-owner"))
            .await
            .unwrap();
        assert!(created.name.starts_with("crtb-grb-"));
        assert_eq!(created.name.len(), "crtb-grb-".len() + GENERATED_NAME_SUFFIX_LEN);
        assert!(
            created.name["crtb-grb-".len()..]
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );

        let owned = store.get_by_owner_index("not-local/test-grb").await.unwrap();
        assert_eq!(owned, vec![created.clone()]);
        assert!(store.get_by_owner_index("local/test-grb").await.unwrap().is_empty());

        store
            .delete_namespaced("not-local", &created.name)
            .await
            .unwrap();
        assert!(store.get_by_owner_index("not-local/test-grb").await.unwrap().is_empty());

        let err = store
            .delete_namespaced("not-local", &created.name)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_rejects_existing_and_unnamed() {
        let store = AuthzStore::new(StateStore::new(&temp_dir()).await.unwrap())
            .await
            .unwrap();

        let mut named = owned_crtb("not-local", "test-grb", "cluster-owner");
        named.name = "crtb-grb-fixed".to_string();
        store.create(named.clone()).await.unwrap();
        assert!(matches!(
            store.create(named).await,
            Err(StoreError::AlreadyExists { .. })
        ));

        let mut unnamed = owned_crtb("not-local", "test-grb", "cluster-owner");
        unnamed.generate_name = None;
        assert!(matches!(
            store.create(unnamed).await,
            Err(StoreError::Invalid { .. })
        ));
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_index_rebuilt_on_open() {
        let dir = temp_dir();
        let state = StateStore::new(&dir).await.unwrap();
        let store = AuthzStore::new(state.clone()).await.unwrap();
        store
            .create(owned_crtb("not-local", "test-grb", "cluster-owner"))
            .await
            .unwrap();
        store
            .create(owned_crtb("not-local", "other-grb", "cluster-member"))
            .await
            .unwrap();

        let reopened = AuthzStore::new(state).await.unwrap();
        assert_eq!(reopened.list_bindings().len(), 2);
        let owned = reopened
            .get_by_owner_index("not-local/test-grb")
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].role_template_name, "cluster-owner");
        reopened.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_role_catalog_and_cluster_directory() {
        let store = AuthzStore::new(StateStore::new(&temp_dir()).await.unwrap())
            .await
            .unwrap();
        store
            .put_global_role(&GlobalRole {
                name: "inherit-test-gr".to_string(),
                display_name: None,
                inherited_cluster_roles: vec!["cluster-owner".to_string()],
            })
            .await
            .unwrap();
        store.put_cluster(&Cluster::new("local")).await.unwrap();
        store.put_cluster(&Cluster::new("not-local")).await.unwrap();

        let gr = RoleCatalog::get(&store, "inherit-test-gr").await.unwrap();
        assert_eq!(gr.inherited_cluster_roles, vec!["cluster-owner".to_string()]);
        assert!(
            RoleCatalog::get(&store, "error")
                .await
                .unwrap_err()
                .is_not_found()
        );

        let names: Vec<String> = ClusterDirectory::list(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["local".to_string(), "not-local".to_string()]);

        assert!(store.delete_cluster("local").await.unwrap());
        assert_eq!(ClusterDirectory::list(&store).await.unwrap().len(), 1);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_cluster_fails_listing() {
        let state = StateStore::new(&temp_dir()).await.unwrap();
        let store = AuthzStore::new(state.clone()).await.unwrap();
        store.put_cluster(&Cluster::new("a")).await.unwrap();
        store.put_cluster(&Cluster::new("b")).await.unwrap();
        state
            .put(&cluster_key("c"), br#"{"name": 5}"#)
            .await
            .unwrap();

        match ClusterDirectory::list(&store).await {
            Err(StoreError::Decode { key, .. }) => assert_eq!(key, cluster_key("c")),
            other => panic!("expected decode error, got {:?}", other),
        }
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_binding_fails_open() {
        let state = StateStore::new(&temp_dir()).await.unwrap();
        state
            .put(&crtb_key("not-local", "crtb-grb-bad"), b"{}")
            .await
            .unwrap();

        assert!(matches!(
            AuthzStore::new(state.clone()).await,
            Err(StoreError::Decode { .. })
        ));
        state.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_namespace_bindings() {
        let store = AuthzStore::new(StateStore::new(&temp_dir()).await.unwrap())
            .await
            .unwrap();
        for (cluster, owner) in [("a", "test-grb"), ("b", "test-grb"), ("b", "other-grb")] {
            store
                .create(owned_crtb(cluster, owner, "cluster-owner"))
                .await
                .unwrap();
        }

        assert_eq!(store.delete_namespace_bindings("b").await.unwrap(), 2);
        assert_eq!(store.delete_namespace_bindings("b").await.unwrap(), 0);
        let left: Vec<String> = store
            .list_bindings()
            .into_iter()
            .map(|b| b.namespace)
            .collect();
        assert_eq!(left, vec!["a".to_string()]);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_global_role_binding_keeps_uid() {
        let store = AuthzStore::new(StateStore::new(&temp_dir()).await.unwrap())
            .await
            .unwrap();
        let grb = GlobalRoleBinding {
            name: "test-grb".to_string(),
            uid: "1234".to_string(),
            global_role_name: "inherit-test-gr".to_string(),
            principal: Principal::User("test-user".to_string()),
            created_at: Utc::now(),
        };
        store.apply_global_role_binding(grb.clone()).await.unwrap();

        let mut reapplied = grb.clone();
        reapplied.uid = "5678".to_string();
        reapplied.global_role_name = "other-gr".to_string();
        let stored = store.apply_global_role_binding(reapplied).await.unwrap();
        assert_eq!(stored.uid, "1234");
        assert_eq!(stored.created_at, grb.created_at);

        let fetched = store.get_global_role_binding("test-grb").await.unwrap().unwrap();
        assert_eq!(fetched.uid, "1234");
        assert_eq!(fetched.global_role_name, "other-gr");
        store.close().await.unwrap();
    }
}
