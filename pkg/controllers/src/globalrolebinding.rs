use chrono::Utc;
use pkg_constants::authz::{CRTB_GRB_GENERATE_NAME, GRB_OWNER_LABEL, LOCAL_CLUSTER};
use pkg_state::StoreError;
use pkg_state::lister::{BindingStore, ClusterDirectory, RoleCatalog};
use pkg_types::rbac::{ClusterRoleTemplateBinding, GlobalRoleBinding, grb_owner_index_key};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AggregateError, ClusterError, ReconcileError};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Clusters that never receive inherited cluster roles. Owned bindings
    /// found there are still pruned.
    pub excluded_clusters: BTreeSet<String>,
}

impl ReconcilerConfig {
    pub fn with_excluded_clusters<I, S>(clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded_clusters: clusters.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_excluded(&self, cluster: &str) -> bool {
        self.excluded_clusters.contains(cluster)
    }
}

impl Default for ReconcilerConfig {
    /// Excludes the management cluster.
    fn default() -> Self {
        Self::with_excluded_clusters([LOCAL_CLUSTER])
    }
}

/// Mutations applied by one successful pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub clusters: usize,
    pub created: usize,
    pub deleted: usize,
}

/// The changes needed to converge one cluster.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ClusterPlan {
    /// Target roles without an accurate binding, in target order.
    pub create: Vec<String>,
    /// Observed bindings that are inaccurate or redundant.
    pub delete: Vec<ClusterRoleTemplateBinding>,
}

impl ClusterPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

/// Diff the bindings observed for `grb` in `cluster` against `target_roles`.
///
/// A binding is kept only if its role is a target, it names this cluster
/// and the GRB's principal, it is not being deleted, and no earlier binding
/// already covers the same role. Everything else is deleted.
pub fn plan_cluster(
    grb: &GlobalRoleBinding,
    cluster: &str,
    target_roles: &[String],
    observed: Vec<ClusterRoleTemplateBinding>,
) -> ClusterPlan {
    let wanted: HashSet<&str> = target_roles.iter().map(String::as_str).collect();
    let mut covered: HashSet<String> = HashSet::new();
    let mut delete = Vec::new();

    for crtb in observed {
        let accurate = wanted.contains(crtb.role_template_name.as_str())
            && crtb.cluster_name == cluster
            && crtb.principal == grb.principal
            && !crtb.is_deleting()
            && !covered.contains(&crtb.role_template_name);
        if accurate {
            covered.insert(crtb.role_template_name.clone());
        } else {
            delete.push(crtb);
        }
    }

    let mut create = Vec::new();
    for role in target_roles {
        if !covered.contains(role) && !create.contains(role) {
            create.push(role.clone());
        }
    }

    ClusterPlan { create, delete }
}

/// Build the binding that grants `role` to the GRB's principal in `cluster`.
pub fn new_binding(grb: &GlobalRoleBinding, cluster: &str, role: &str) -> ClusterRoleTemplateBinding {
    ClusterRoleTemplateBinding {
        name: String::new(),
        generate_name: Some(CRTB_GRB_GENERATE_NAME.to_string()),
        namespace: cluster.to_string(),
        cluster_name: cluster.to_string(),
        role_template_name: role.to_string(),
        principal: grb.principal.clone(),
        labels: BTreeMap::from([(GRB_OWNER_LABEL.to_string(), grb.name.clone())]),
        owner_references: vec![grb.owner_reference()],
        deletion_timestamp: None,
        created_at: Utc::now(),
    }
}

/// Converges the ClusterRoleTemplateBindings owned by a GlobalRoleBinding to
/// the cluster roles its GlobalRole inherits, in every cluster.
///
/// A pass only creates and deletes bindings, never updates them, and keeps
/// no state between passes: a failed pass is retried from scratch.
pub struct GlobalRoleBindingReconciler {
    roles: Arc<dyn RoleCatalog>,
    clusters: Arc<dyn ClusterDirectory>,
    bindings: Arc<dyn BindingStore>,
    config: ReconcilerConfig,
}

impl GlobalRoleBindingReconciler {
    pub fn new(
        roles: Arc<dyn RoleCatalog>,
        clusters: Arc<dyn ClusterDirectory>,
        bindings: Arc<dyn BindingStore>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            roles,
            clusters,
            bindings,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// One pass for `grb` across every listed cluster.
    ///
    /// Failing to resolve the GlobalRole or to list clusters aborts the pass
    /// before anything is changed. Per-cluster failures are collected and
    /// returned together once every cluster has been processed.
    pub async fn reconcile(
        &self,
        grb: &GlobalRoleBinding,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let gr = self
            .roles
            .get(&grb.global_role_name)
            .await
            .map_err(|source| ReconcileError::GlobalRole {
                name: grb.global_role_name.clone(),
                source,
            })?;
        let clusters = self
            .clusters
            .list()
            .await
            .map_err(ReconcileError::ListClusters)?;

        let mut summary = ReconcileSummary {
            clusters: clusters.len(),
            ..Default::default()
        };
        let mut errors = Vec::new();

        for cluster in &clusters {
            let target: &[String] = if self.config.is_excluded(&cluster.name) {
                &[]
            } else {
                &gr.inherited_cluster_roles
            };

            let key = grb_owner_index_key(&cluster.name, &grb.name);
            let observed = match self.bindings.get_by_owner_index(&key).await {
                Ok(observed) => observed,
                Err(source) => {
                    warn!(
                        "GRB {}: unable to read bindings for cluster {}: {}",
                        grb.name,
                        cluster.name,
                        source
                    );
                    errors.push(ClusterError::Index {
                        cluster: cluster.name.clone(),
                        key,
                        source,
                    });
                    continue;
                }
            };

            let plan = plan_cluster(grb, &cluster.name, target, observed);
            if plan.is_empty() {
                continue;
            }
            debug!(
                "GRB {}: cluster {}: {} to create, {} to delete",
                grb.name,
                cluster.name,
                plan.create.len(),
                plan.delete.len()
            );

            for role in &plan.create {
                match self.bindings.create(new_binding(grb, &cluster.name, role)).await {
                    Ok(crtb) => {
                        summary.created += 1;
                        info!(
                            "GRB {}: created binding {} granting {} to {}",
                            grb.name,
                            crtb.key(),
                            role,
                            grb.principal
                        );
                    }
                    Err(source) => {
                        warn!(
                            "GRB {}: unable to create binding for role {} in cluster {}: {}",
                            grb.name,
                            role,
                            cluster.name,
                            source
                        );
                        errors.push(ClusterError::Create {
                            cluster: cluster.name.clone(),
                            role: role.clone(),
                            source,
                        });
                    }
                }
            }

            summary.deleted += self
                .delete_bindings(&grb.name, &cluster.name, plan.delete, &mut errors)
                .await;
        }

        if errors.is_empty() {
            Ok(summary)
        } else {
            Err(AggregateError(errors).into())
        }
    }

    /// Delete every binding owned by the GlobalRoleBinding `grb_name` in every
    /// listed cluster. Run once the GRB itself is gone.
    pub async fn cleanup(&self, grb_name: &str) -> Result<ReconcileSummary, ReconcileError> {
        let clusters = self
            .clusters
            .list()
            .await
            .map_err(ReconcileError::ListClusters)?;

        let mut summary = ReconcileSummary {
            clusters: clusters.len(),
            ..Default::default()
        };
        let mut errors = Vec::new();

        for cluster in &clusters {
            let key = grb_owner_index_key(&cluster.name, grb_name);
            match self.bindings.get_by_owner_index(&key).await {
                Ok(owned) => {
                    summary.deleted += self
                        .delete_bindings(grb_name, &cluster.name, owned, &mut errors)
                        .await;
                }
                Err(source) => {
                    warn!(
                        "GRB {}: unable to read bindings for cluster {}: {}",
                        grb_name,
                        cluster.name,
                        source
                    );
                    errors.push(ClusterError::Index {
                        cluster: cluster.name.clone(),
                        key,
                        source,
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(summary)
        } else {
            Err(AggregateError(errors).into())
        }
    }

    /// Returns the number of bindings removed. A binding that is already gone
    /// counts as removed.
    async fn delete_bindings(
        &self,
        grb_name: &str,
        cluster: &str,
        bindings: Vec<ClusterRoleTemplateBinding>,
        errors: &mut Vec<ClusterError>,
    ) -> usize {
        let mut deleted = 0;
        for crtb in bindings {
            match self
                .bindings
                .delete_namespaced(&crtb.namespace, &crtb.name)
                .await
            {
                Ok(()) => {
                    deleted += 1;
                    info!(
                        "GRB {}: deleted binding {} (role {})",
                        grb_name,
                        crtb.key(),
                        crtb.role_template_name
                    );
                }
                Err(StoreError::NotFound { .. }) => {
                    deleted += 1;
                    debug!("GRB {}: binding {} already gone", grb_name, crtb.key());
                }
                Err(source) => {
                    warn!(
                        "GRB {}: unable to delete binding {}: {}",
                        grb_name,
                        crtb.key(),
                        source
                    );
                    errors.push(ClusterError::Delete {
                        cluster: cluster.to_string(),
                        name: crtb.name,
                        source,
                    });
                }
            }
        }
        deleted
    }
}
