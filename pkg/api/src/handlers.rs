use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_state::StoreError;
use pkg_state::authz::AuthzStore;
use pkg_types::manifest::{Manifest, parse_manifests};
use pkg_types::rbac::ClusterRoleTemplateBinding;
use pkg_types::validate::{validate_global_role, validate_global_role_binding, validate_name};
use serde::Deserialize;
use tracing::{info, warn};

use crate::AppState;

/// Query parameters for listing bindings.
#[derive(Debug, Default, Deserialize)]
pub struct BindingQuery {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
}

/// Parse a manifest stream and validate every object in it.
pub fn parse_and_validate(content: &str) -> anyhow::Result<Vec<Manifest>> {
    let manifests = parse_manifests(content)?;
    for manifest in &manifests {
        match manifest {
            Manifest::GlobalRole(gr) => validate_global_role(gr)?,
            Manifest::GlobalRoleBinding(grb) => validate_global_role_binding(grb)?,
            Manifest::Cluster(cluster) => validate_name(&cluster.name)?,
        }
    }
    Ok(manifests)
}

/// Store `manifests` in order. Returns `kind/name` for each stored object.
pub async fn store_manifests(
    store: &AuthzStore,
    manifests: Vec<Manifest>,
) -> Result<Vec<String>, StoreError> {
    let mut applied = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        let id = format!("{}/{}", manifest.kind().to_lowercase(), manifest.name());
        match manifest {
            Manifest::GlobalRole(gr) => store.put_global_role(&gr).await?,
            Manifest::GlobalRoleBinding(grb) => {
                store.apply_global_role_binding(grb).await?;
            }
            Manifest::Cluster(cluster) => store.put_cluster(&cluster).await?,
        }
        applied.push(id);
    }
    Ok(applied)
}

pub fn filter_bindings(
    bindings: Vec<ClusterRoleTemplateBinding>,
    query: &BindingQuery,
) -> Vec<ClusterRoleTemplateBinding> {
    bindings
        .into_iter()
        .filter(|b| query.owner.is_none() || b.grb_owner() == query.owner.as_deref())
        .filter(|b| query.cluster.as_ref().is_none_or(|c| &b.cluster_name == c))
        .collect()
}

/// POST /api/v1/apply: validate a YAML manifest stream, then store it.
pub async fn apply(State(state): State<AppState>, body: String) -> impl IntoResponse {
    let manifests = match parse_and_validate(&body) {
        Ok(manifests) => manifests,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("{:#}", e)).into_response(),
    };
    match store_manifests(&state.store, manifests).await {
        Ok(applied) => {
            info!("Applied {} objects", applied.len());
            (StatusCode::OK, Json(applied)).into_response()
        }
        Err(e) => {
            warn!("Failed to apply manifests: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// GET /api/v1/clusterroletemplatebindings: list bindings, optionally by
/// owning GlobalRoleBinding and cluster.
pub async fn list_bindings(
    State(state): State<AppState>,
    Query(query): Query<BindingQuery>,
) -> impl IntoResponse {
    let bindings = filter_bindings(state.store.list_bindings(), &query);
    (StatusCode::OK, Json(bindings)).into_response()
}

/// POST /api/v1/globalrolebindings/{name}/reconcile: queue one pass.
pub async fn reconcile(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    state.queue.add(name.clone());
    info!("Queued globalrolebinding {} on request", name);
    (StatusCode::ACCEPTED, format!("globalrolebinding/{} queued", name)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_controllers::{GlobalRoleBindingController, ReconcilerConfig};
    use pkg_state::client::StateStore;
    use pkg_types::rbac::Principal;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const MANIFESTS: &str = r#"
kind: GlobalRole
name: inherit-test-gr
inheritedClusterRoles: [cluster-owner]
---
kind: Cluster
name: not-local
---
kind: GlobalRoleBinding
name: test-grb
globalRoleName: inherit-test-gr
principal:
  user: test-user
"#;

    async fn open_store() -> AuthzStore {
        let dir = std::env::temp_dir()
            .join(format!("authz-api-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string();
        AuthzStore::new(StateStore::new(&dir).await.unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_and_validate_rejects_bad_names() {
        assert_eq!(parse_and_validate(MANIFESTS).unwrap().len(), 3);
        let err = parse_and_validate("kind: Cluster\nname: Not_Valid\n").unwrap_err();
        assert!(err.to_string().contains("Not_Valid"));
    }

    #[tokio::test]
    async fn test_reapply_keeps_binding_uid() {
        let store = open_store().await;
        let applied = store_manifests(&store, parse_and_validate(MANIFESTS).unwrap())
            .await
            .unwrap();
        assert_eq!(
            applied,
            vec![
                "globalrole/inherit-test-gr".to_string(),
                "cluster/not-local".to_string(),
                "globalrolebinding/test-grb".to_string(),
            ]
        );
        let uid = store
            .get_global_role_binding("test-grb")
            .await
            .unwrap()
            .unwrap()
            .uid;

        store_manifests(&store, parse_and_validate(MANIFESTS).unwrap())
            .await
            .unwrap();
        let grb = store.get_global_role_binding("test-grb").await.unwrap().unwrap();
        assert_eq!(grb.uid, uid);
        store.close().await.unwrap();
    }

    #[test]
    fn test_filter_bindings() {
        let binding = |cluster: &str, owner: &str| ClusterRoleTemplateBinding {
            name: format!("crtb-grb-{}", owner),
            generate_name: None,
            namespace: cluster.to_string(),
            cluster_name: cluster.to_string(),
            role_template_name: "cluster-owner".to_string(),
            principal: Principal::User("test-user".to_string()),
            labels: [(
                pkg_constants::authz::GRB_OWNER_LABEL.to_string(),
                owner.to_string(),
            )]
            .into(),
            owner_references: vec![],
            deletion_timestamp: None,
            created_at: chrono::Utc::now(),
        };
        let all = vec![binding("a", "g1"), binding("a", "g2"), binding("b", "g1")];

        let query = BindingQuery {
            owner: Some("g1".to_string()),
            cluster: None,
        };
        assert_eq!(filter_bindings(all.clone(), &query).len(), 2);
        let query = BindingQuery {
            owner: Some("g1".to_string()),
            cluster: Some("b".to_string()),
        };
        assert_eq!(filter_bindings(all.clone(), &query).len(), 1);
        assert_eq!(filter_bindings(all, &BindingQuery::default()).len(), 3);
    }

    #[tokio::test]
    async fn test_apply_reaches_running_controller() {
        let store = open_store().await;
        let controller = GlobalRoleBindingController::new(store.clone(), ReconcilerConfig::default())
            .with_resync_interval(Duration::from_secs(3600));
        let state = AppState {
            store: store.clone(),
            queue: controller.queue(),
        };
        let handle = controller.start();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(crate::server::serve(listener, state.clone()));

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/api/v1/apply", base))
            .body(MANIFESTS)
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let mut bindings: Vec<ClusterRoleTemplateBinding> = Vec::new();
        for _ in 0..400 {
            bindings = client
                .get(format!(
                    "{}/api/v1/clusterroletemplatebindings?owner=test-grb",
                    base
                ))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if !bindings.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].cluster_name, "not-local");

        let resp = client
            .post(format!("{}/api/v1/apply", base))
            .body("kind: Cluster\nname: Not_Valid\n")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        server.abort();
        state.queue.shutdown();
        handle.await.unwrap();
    }
}
