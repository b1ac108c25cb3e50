//! Backend-agnostic views of clusters, templates, quotas, and credential
//! bundles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// File whose presence marks a credential bundle as complete.
pub const CA_CERT_FILE: &str = "ca.pem";

/// Status reported once a cluster is ready.
pub const STATUS_ACTIVE: &str = "active";
/// Status reported when the backend failed an operation.
pub const STATUS_ERROR: &str = "error";
/// Status reported once a cluster no longer exists.
pub const STATUS_DELETED: &str = "deleted";

/// A cluster as reported by a backend.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Backend identifier.
    pub id: String,
    /// Human readable, usually unique, name.
    pub name: String,
    /// Backend status token.
    pub status: String,
    /// Number of nodes currently in the cluster.
    pub nodes: u32,
    /// Container orchestration engine, when reported.
    pub coe: Option<String>,
    /// Host type (flavour) the cluster runs on, when reported.
    pub host_type: Option<String>,
    /// Template the cluster was created from, when reported.
    pub template_id: Option<String>,
    /// Whether the backend scales the cluster automatically.
    pub autoscale: bool,
    /// Additional backend-specific values.
    pub metadata: BTreeMap<String, String>,
}

impl Cluster {
    /// Synthesizes the record returned when a delete finds nothing to remove.
    #[must_use]
    pub fn deleted(token: &str) -> Self {
        Self {
            id: token.to_owned(),
            name: token.to_owned(),
            status: STATUS_DELETED.to_owned(),
            ..Self::default()
        }
    }

    /// Status normalised to lower case for comparison.
    #[must_use]
    pub fn normalized_status(&self) -> String {
        self.status.trim().to_lowercase()
    }

    /// Case-insensitive status comparison.
    #[must_use]
    pub fn status_is(&self, status: &str) -> bool {
        self.status.trim().eq_ignore_ascii_case(status)
    }

    /// Token used to re-fetch this cluster: the identifier when known,
    /// otherwise the name.
    #[must_use]
    pub fn token(&self) -> &str {
        if self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }
}

/// A template (cluster type) offered for new clusters.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterTemplate {
    /// Backend identifier.
    pub id: String,
    /// Display name matched by template patterns.
    pub name: String,
    /// Container orchestration engine.
    pub coe: Option<String>,
    /// Host type new clusters run on.
    pub host_type: Option<String>,
}

/// Account limits reported by a backend. Unset fields are unknown.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Quotas {
    /// Maximum number of clusters.
    pub max_clusters: Option<u32>,
    /// Maximum number of nodes in a single cluster.
    pub max_nodes_per_cluster: Option<u32>,
}

/// Parameters for a cluster creation call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateClusterRequest {
    /// Name of the new cluster.
    pub name: String,
    /// Template name pattern; required by template-based backends.
    pub template: Option<String>,
    /// Initial node count.
    pub nodes: u32,
}

impl CreateClusterRequest {
    /// Builds a request, trimming the name and template.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::InvalidRequest`] when the name is blank or the
    /// node count is zero.
    pub fn new(
        name: impl Into<String>,
        template: Option<String>,
        nodes: u32,
    ) -> Result<Self, ClusterError> {
        let request = Self {
            name: name.into().trim().to_owned(),
            template: template
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty()),
            nodes,
        };
        if request.name.is_empty() {
            return Err(ClusterError::InvalidRequest(String::from(
                "cluster name must not be empty",
            )));
        }
        if request.nodes == 0 {
            return Err(ClusterError::InvalidRequest(String::from(
                "a cluster needs at least one node",
            )));
        }
        Ok(request)
    }
}

/// Certificates and scripts needed to connect to a cluster, keyed by
/// relative file name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CredentialsBundle {
    /// File contents keyed by relative file name.
    pub files: BTreeMap<String, Vec<u8>>,
}

impl CredentialsBundle {
    /// Returns `true` when the CA certificate marker is part of the bundle.
    #[must_use]
    pub fn has_ca_cert(&self) -> bool {
        self.files.contains_key(CA_CERT_FILE)
    }
}
