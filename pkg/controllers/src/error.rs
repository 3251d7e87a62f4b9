use pkg_state::StoreError;
use thiserror::Error;

/// Failure of one reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The bound GlobalRole could not be resolved. No cluster was touched.
    #[error("unable to get globalrole {name:?}")]
    GlobalRole {
        name: String,
        #[source]
        source: StoreError,
    },

    /// The cluster list could not be read. No cluster was touched.
    #[error("unable to list clusters")]
    ListClusters(#[source] StoreError),

    /// Some per-cluster reads or per-binding mutations failed; the others
    /// were still applied.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl ReconcileError {
    /// Per-cluster failures, empty for errors that aborted the pass.
    pub fn cluster_errors(&self) -> &[ClusterError] {
        match self {
            ReconcileError::Aggregate(agg) => &agg.0,
            _ => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster {cluster}: unable to read owner index {key:?}: {source}")]
    Index {
        cluster: String,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("cluster {cluster}: unable to create binding for role {role:?}: {source}")]
    Create {
        cluster: String,
        role: String,
        #[source]
        source: StoreError,
    },

    #[error("cluster {cluster}: unable to delete binding {name:?}: {source}")]
    Delete {
        cluster: String,
        name: String,
        #[source]
        source: StoreError,
    },
}

impl ClusterError {
    pub fn cluster(&self) -> &str {
        match self {
            ClusterError::Index { cluster, .. }
            | ClusterError::Create { cluster, .. }
            | ClusterError::Delete { cluster, .. } => cluster,
        }
    }
}

/// Every error recorded during one pass.
#[derive(Debug)]
pub struct AggregateError(pub Vec<ClusterError>);

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s) occurred:", self.0.len())?;
        for (i, e) in self.0.iter().enumerate() {
            let sep = if i == 0 { " " } else { "; " };
            write!(f, "{}{}", sep, e)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_display_lists_every_error() {
        let err = ReconcileError::from(AggregateError(vec![
            ClusterError::Index {
                cluster: "error".to_string(),
                key: "error/test-grb".to_string(),
                source: StoreError::Unavailable("indexer error".to_string()),
            },
            ClusterError::Delete {
                cluster: "local".to_string(),
                name: "crtb-grb-delete-local".to_string(),
                source: StoreError::Unavailable("server unavailable".to_string()),
            },
        ]));
        let msg = err.to_string();
        assert!(msg.starts_with("2 error(s) occurred: cluster error:"));
        assert!(msg.contains("; cluster local: unable to delete binding \"crtb-grb-delete-local\""));
        assert_eq!(err.cluster_errors().len(), 2);
        assert_eq!(err.cluster_errors()[1].cluster(), "local");
    }

    #[test]
    fn test_fatal_errors_have_no_cluster_errors() {
        let err = ReconcileError::ListClusters(StoreError::Unavailable("server unavailable".into()));
        assert!(err.cluster_errors().is_empty());
        assert_eq!(err.to_string(), "unable to list clusters");
    }
}
