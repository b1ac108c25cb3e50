//! make-swarm backend: clusters addressed by name under the account's user.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::account::{Account, AccountState, CloudType, MAKE_SWARM_ENDPOINT};
use crate::cluster::{
    Cluster, ClusterTemplate, CreateClusterRequest, CredentialsBundle, Quotas,
};
use crate::error::{ClusterError, ResourceKind};
use crate::service::{ClusterService, ServiceFuture};
use crate::transport::{Method, Transport};

use super::auth::AuthScheme;
use super::connection::{Call, Connection, Profile};
use super::{EncodedBundle, unsupported};

const PROFILE: Profile = Profile {
    scheme: AuthScheme::ApiKey,
    default_endpoint: Some(MAKE_SWARM_ENDPOINT),
    headers: &[],
};

#[derive(Deserialize)]
struct WireCluster {
    cluster_name: String,
    status: String,
    #[serde(default)]
    node_count: u32,
    #[serde(default)]
    autoscale: bool,
    #[serde(default)]
    flavor: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
}

impl From<WireCluster> for Cluster {
    fn from(wire: WireCluster) -> Self {
        let mut metadata = BTreeMap::new();
        if let Some(image) = wire.image {
            metadata.insert(String::from("image"), image);
        }
        if let Some(task) = wire.task_id {
            metadata.insert(String::from("task_id"), task);
        }
        Self {
            id: wire.cluster_name.clone(),
            name: wire.cluster_name,
            status: wire.status,
            nodes: wire.node_count,
            coe: Some(String::from("swarm")),
            host_type: wire.flavor,
            template_id: None,
            autoscale: wire.autoscale,
            metadata,
        }
    }
}

/// Cluster service for the legacy make-swarm API.
pub struct MakeSwarmService {
    connection: Connection,
}

impl MakeSwarmService {
    /// Builds a service for the account. No request is sent until the first
    /// operation.
    #[must_use]
    pub fn new(account: &Account, transport: Arc<dyn Transport>) -> Self {
        Self {
            connection: Connection::new(PROFILE, transport, account),
        }
    }

    fn user_path(&self) -> String {
        format!("clusters/{}", urlencoding::encode(self.connection.account().username()))
    }

    fn cluster_path(&self, name: &str, suffix: &str) -> String {
        let base = format!("{}/{}", self.user_path(), urlencoding::encode(name));
        if suffix.is_empty() {
            base
        } else {
            format!("{base}/{suffix}")
        }
    }

    async fn cluster_call(&self, call: Call<'_>) -> Result<Cluster, ClusterError> {
        let wire: WireCluster = self.connection.fetch(call).await?;
        Ok(wire.into())
    }
}

impl ClusterService for MakeSwarmService {
    fn cloud(&self) -> CloudType {
        CloudType::MakeSwarm
    }

    fn quotas(&self) -> ServiceFuture<'_, Quotas> {
        Box::pin(async move {
            tracing::debug!("[make-swarm] retrieving quotas");
            let path = format!(
                "quotas/{}",
                urlencoding::encode(self.connection.account().username())
            );
            self.connection
                .fetch::<Quotas>(Call::get("retrieve quotas", path))
                .await
        })
    }

    fn create_cluster<'a>(
        &'a self,
        request: &'a CreateClusterRequest,
    ) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            if request.template.is_some() {
                tracing::debug!("[make-swarm] ignoring template, swarm clusters have a fixed type");
            }
            tracing::debug!(
                "[make-swarm] creating a {}-node cluster named {}",
                request.nodes,
                request.name
            );
            let body = json!({
                "cluster_name": request.name,
                "node_count": request.nodes,
                "autoscale": false,
            });
            self.cluster_call(Call::new("create cluster", Method::Post, self.user_path()).body(body))
                .await
        })
    }

    fn get_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            tracing::debug!("[make-swarm] retrieving cluster ({token})");
            self.cluster_call(
                Call::get(format!("retrieve cluster ({token})"), self.cluster_path(token, ""))
                    .about(ResourceKind::Cluster, token),
            )
            .await
        })
    }

    fn list_clusters(&self) -> ServiceFuture<'_, Vec<Cluster>> {
        Box::pin(async move {
            tracing::debug!("[make-swarm] listing clusters");
            let clusters: Vec<WireCluster> = self
                .connection
                .fetch(Call::get("list clusters", self.user_path()))
                .await?;
            Ok::<_, ClusterError>(clusters.into_iter().map(Cluster::from).collect())
        })
    }

    fn list_cluster_templates(&self) -> ServiceFuture<'_, Vec<ClusterTemplate>> {
        unsupported(CloudType::MakeSwarm, "templates", None)
    }

    fn resize_cluster<'a>(&'a self, _token: &'a str, _nodes: u32) -> ServiceFuture<'a, Cluster> {
        unsupported(CloudType::MakeSwarm, "resize", Some("grow"))
    }

    fn grow_cluster<'a>(&'a self, token: &'a str, nodes: u32) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            tracing::debug!("[make-swarm] growing cluster ({token}) by {nodes} nodes");
            self.cluster_call(
                Call::new(
                    format!("grow cluster ({token})"),
                    Method::Post,
                    self.cluster_path(token, "grow"),
                )
                .body(json!({ "nodes": nodes }))
                .about(ResourceKind::Cluster, token),
            )
            .await
        })
    }

    fn set_autoscale<'a>(&'a self, token: &'a str, enabled: bool) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            tracing::debug!("[make-swarm] setting autoscale on cluster ({token}) to {enabled}");
            self.cluster_call(
                Call::new(
                    format!("set autoscale ({token})"),
                    Method::Put,
                    self.cluster_path(token, &format!("autoscale/{enabled}")),
                )
                .about(ResourceKind::Cluster, token),
            )
            .await
        })
    }

    fn delete_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            tracing::debug!("[make-swarm] deleting cluster ({token})");
            self.cluster_call(
                Call::new(
                    format!("delete cluster ({token})"),
                    Method::Delete,
                    self.cluster_path(token, ""),
                )
                .about(ResourceKind::Cluster, token),
            )
            .await
        })
    }

    fn rebuild_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            tracing::debug!("[make-swarm] rebuilding cluster ({token})");
            self.cluster_call(
                Call::new(
                    format!("rebuild cluster ({token})"),
                    Method::Post,
                    self.cluster_path(token, "rebuild"),
                )
                .about(ResourceKind::Cluster, token),
            )
            .await
        })
    }

    fn cluster_credentials<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, CredentialsBundle> {
        Box::pin(async move {
            tracing::debug!("[make-swarm] retrieving cluster credentials ({token})");
            let call = Call::get(
                format!("retrieve credentials ({token})"),
                self.cluster_path(token, "credentials"),
            )
            .about(ResourceKind::Cluster, token);
            let action = call.action().to_owned();
            let encoded: EncodedBundle = self.connection.fetch(call).await?;
            encoded.decode(&action)
        })
    }

    fn account_state(&self) -> AccountState {
        self.connection.account_state()
    }
}
