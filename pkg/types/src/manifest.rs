use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::rbac::{GlobalRole, GlobalRoleBinding};

/// One document of a manifest file, discriminated by `kind`.
///
/// ```yaml
/// kind: GlobalRole
/// name: inherit-test-gr
/// inheritedClusterRoles: [cluster-owner]
/// ---
/// kind: GlobalRoleBinding
/// name: test-grb
/// globalRoleName: inherit-test-gr
/// principal:
///   user: test-user
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    GlobalRole(GlobalRole),
    GlobalRoleBinding(GlobalRoleBinding),
    Cluster(Cluster),
}

impl Manifest {
    pub fn kind(&self) -> &'static str {
        match self {
            Manifest::GlobalRole(_) => "GlobalRole",
            Manifest::GlobalRoleBinding(_) => "GlobalRoleBinding",
            Manifest::Cluster(_) => "Cluster",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Manifest::GlobalRole(gr) => &gr.name,
            Manifest::GlobalRoleBinding(grb) => &grb.name,
            Manifest::Cluster(cluster) => &cluster.name,
        }
    }
}

/// Parse a multi-document YAML stream. Empty documents are skipped.
pub fn parse_manifests(content: &str) -> anyhow::Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for (i, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let manifest = Option::<Manifest>::deserialize(document)
            .map_err(|e| anyhow::anyhow!("document {}: {}", i + 1, e))?;
        if let Some(manifest) = manifest {
            manifests.push(manifest);
        }
    }
    Ok(manifests)
}
