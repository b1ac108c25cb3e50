//! make-coe backend: template-based clusters addressed by identifier.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use crate::account::{Account, AccountState, CloudType, MAKE_COE_ENDPOINT};
use crate::cluster::{
    Cluster, ClusterTemplate, CreateClusterRequest, CredentialsBundle, Quotas,
};
use crate::error::{ClusterError, ResourceKind};
use crate::service::{ClusterService, ServiceFuture};
use crate::template::resolve_template;
use crate::transport::{Method, Transport};

use super::auth::AuthScheme;
use super::connection::{Call, Connection, Profile};
use super::{EncodedBundle, resolve_cluster, template_required, unsupported};

const PROFILE: Profile = Profile {
    scheme: AuthScheme::ApiKey,
    default_endpoint: Some(MAKE_COE_ENDPOINT),
    headers: &[("API-Version", "rax:container 1.0")],
};

#[derive(Deserialize)]
struct ClusterList {
    clusters: Vec<WireCluster>,
}

#[derive(Deserialize)]
struct WireCluster {
    id: String,
    name: String,
    status: String,
    #[serde(default)]
    node_count: u32,
    #[serde(default)]
    cluster_type: Option<WireClusterType>,
    #[serde(default)]
    status_reason: Option<String>,
}

#[derive(Deserialize)]
struct ClusterTypeList {
    cluster_types: Vec<WireClusterType>,
}

#[derive(Clone, Deserialize)]
struct WireClusterType {
    id: serde_json::Value,
    name: String,
    #[serde(default)]
    coe: Option<String>,
    #[serde(default)]
    host_type: Option<String>,
}

impl WireClusterType {
    fn into_template(self) -> ClusterTemplate {
        ClusterTemplate {
            id: scalar_to_string(&self.id),
            name: self.name,
            coe: self.coe,
            host_type: self.host_type,
        }
    }
}

impl From<WireCluster> for Cluster {
    fn from(wire: WireCluster) -> Self {
        let mut metadata = BTreeMap::new();
        if let Some(reason) = wire.status_reason.filter(|reason| !reason.is_empty()) {
            metadata.insert(String::from("status_reason"), reason);
        }
        let template = wire.cluster_type.map(WireClusterType::into_template);
        Self {
            id: wire.id,
            name: wire.name,
            status: wire.status,
            nodes: wire.node_count,
            coe: template.as_ref().and_then(|t| t.coe.clone()),
            host_type: template.as_ref().and_then(|t| t.host_type.clone()),
            template_id: template.map(|t| t.id),
            autoscale: false,
            metadata,
        }
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_owned)
}

/// Cluster service for the make-coe API.
pub struct MakeCoeService {
    connection: Connection,
    templates: OnceCell<Vec<ClusterTemplate>>,
}

impl MakeCoeService {
    /// Builds a service for the account. No request is sent until the first
    /// operation.
    #[must_use]
    pub fn new(account: &Account, transport: Arc<dyn Transport>) -> Self {
        Self {
            connection: Connection::new(PROFILE, transport, account),
            templates: OnceCell::new(),
        }
    }

    async fn list(&self) -> Result<Vec<Cluster>, ClusterError> {
        tracing::debug!("[make-coe] listing clusters");
        let list: ClusterList = self
            .connection
            .fetch(Call::get("list clusters", "clusters"))
            .await?;
        Ok(list.clusters.into_iter().map(Cluster::from).collect())
    }

    async fn lookup(&self, token: &str) -> Result<Cluster, ClusterError> {
        resolve_cluster(self.list().await?, token)
    }

    async fn cached_templates(&self) -> Result<&Vec<ClusterTemplate>, ClusterError> {
        self.templates
            .get_or_try_init(|| async {
                tracing::debug!("[make-coe] listing cluster types");
                let list: ClusterTypeList = self
                    .connection
                    .fetch(Call::get("list cluster types", "cluster_types"))
                    .await?;
                Ok::<_, ClusterError>(
                    list.cluster_types
                        .into_iter()
                        .map(WireClusterType::into_template)
                        .collect(),
                )
            })
            .await
    }

    async fn cluster_call(&self, call: Call<'_>) -> Result<Cluster, ClusterError> {
        let wire: WireCluster = self.connection.fetch(call).await?;
        Ok(wire.into())
    }
}

fn template_reference(template: &ClusterTemplate) -> serde_json::Value {
    template
        .id
        .parse::<u64>()
        .map_or_else(|_| json!(template.id), |numeric| json!(numeric))
}

impl ClusterService for MakeCoeService {
    fn cloud(&self) -> CloudType {
        CloudType::MakeCoe
    }

    fn quotas(&self) -> ServiceFuture<'_, Quotas> {
        Box::pin(async { Ok::<_, ClusterError>(Quotas::default()) })
    }

    fn create_cluster<'a>(
        &'a self,
        request: &'a CreateClusterRequest,
    ) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            let pattern = template_required(CloudType::MakeCoe, request)?;
            tracing::debug!("[make-coe] looking up a template matching '{pattern}'");
            let templates = self.cached_templates().await?;
            let template = resolve_template(templates, pattern)?;
            tracing::debug!(
                "[make-coe] creating a {}-node cluster from '{}' named {}",
                request.nodes,
                template.name,
                request.name
            );
            let body = json!({
                "name": request.name,
                "cluster_type_id": template_reference(template),
                "node_count": request.nodes,
            });
            self.cluster_call(Call::new("create cluster", Method::Post, "clusters").body(body))
                .await
        })
    }

    fn get_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            tracing::debug!("[make-coe] retrieving cluster ({token})");
            self.lookup(token).await
        })
    }

    fn list_clusters(&self) -> ServiceFuture<'_, Vec<Cluster>> {
        Box::pin(self.list())
    }

    fn list_cluster_templates(&self) -> ServiceFuture<'_, Vec<ClusterTemplate>> {
        Box::pin(async move { Ok::<_, ClusterError>(self.cached_templates().await?.clone()) })
    }

    fn resize_cluster<'a>(&'a self, token: &'a str, nodes: u32) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            let cluster = self.lookup(token).await?;
            tracing::debug!("[make-coe] resizing cluster ({token}) to {nodes} nodes");
            let path = format!("clusters/{}", cluster.id);
            self.cluster_call(
                Call::new(format!("resize cluster ({token})"), Method::Patch, path)
                    .body(json!({ "node_count": nodes }))
                    .about(ResourceKind::Cluster, token),
            )
            .await
        })
    }

    fn grow_cluster<'a>(&'a self, _token: &'a str, _nodes: u32) -> ServiceFuture<'a, Cluster> {
        unsupported(CloudType::MakeCoe, "grow", Some("resize"))
    }

    fn set_autoscale<'a>(&'a self, _token: &'a str, _enabled: bool) -> ServiceFuture<'a, Cluster> {
        unsupported(CloudType::MakeCoe, "autoscale", None)
    }

    fn delete_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            tracing::debug!("[make-coe] deleting cluster ({token})");
            let outcome = match self.lookup(token).await {
                Ok(cluster) => {
                    let path = format!("clusters/{}", cluster.id);
                    self.cluster_call(
                        Call::new(format!("delete cluster ({token})"), Method::Delete, path)
                            .about(ResourceKind::Cluster, token),
                    )
                    .await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Err(err) if err.is_not_found() => {
                    tracing::warn!("could not find the cluster ({token}) to delete");
                    Ok(Cluster::deleted(token))
                }
                other => other,
            }
        })
    }

    fn rebuild_cluster<'a>(&'a self, _token: &'a str) -> ServiceFuture<'a, Cluster> {
        unsupported(CloudType::MakeCoe, "rebuild", None)
    }

    fn cluster_credentials<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, CredentialsBundle> {
        Box::pin(async move {
            let cluster = self.lookup(token).await?;
            tracing::debug!("[make-coe] retrieving cluster credentials ({token})");
            let call = Call::get(
                format!("retrieve credentials ({token})"),
                format!("clusters/{}/credentials", cluster.id),
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
