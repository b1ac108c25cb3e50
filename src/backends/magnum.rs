//! Magnum backend: OpenStack container infrastructure behind Keystone.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use crate::account::{Account, AccountState, CloudType};
use crate::cluster::{
    CA_CERT_FILE, Cluster, ClusterTemplate, CreateClusterRequest, CredentialsBundle, Quotas,
    STATUS_ACTIVE, STATUS_DELETED, STATUS_ERROR,
};
use crate::error::{ClusterError, ResourceKind};
use crate::service::{ClusterService, ServiceFuture};
use crate::template::resolve_template;
use crate::transport::{Method, Transport};

use super::auth::AuthScheme;
use super::connection::{Call, Connection, Profile};
use super::{resolve_cluster, template_required, unsupported};

const PROFILE: Profile = Profile {
    scheme: AuthScheme::Keystone,
    default_endpoint: None,
    headers: &[("OpenStack-API-Version", "container-infra latest")],
};

/// Environment file written next to the CA certificate.
pub const ENV_FILE: &str = "cluster.env";

#[derive(Deserialize)]
struct ClusterList {
    clusters: Vec<WireCluster>,
}

#[derive(Deserialize)]
struct WireCluster {
    uuid: String,
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    node_count: u32,
    #[serde(default)]
    cluster_template_id: Option<String>,
    #[serde(default)]
    status_reason: Option<String>,
    #[serde(default)]
    api_address: Option<String>,
    #[serde(default)]
    flavor_id: Option<String>,
}

#[derive(Deserialize)]
struct TemplateList {
    clustertemplates: Vec<WireTemplate>,
}

#[derive(Deserialize)]
struct WireTemplate {
    uuid: String,
    name: String,
    #[serde(default)]
    coe: Option<String>,
    #[serde(default)]
    flavor_id: Option<String>,
}

#[derive(Deserialize)]
struct Accepted {
    uuid: String,
}

#[derive(Deserialize)]
struct Certificate {
    pem: String,
}

/// Maps Magnum's `<ACTION>_<STATE>` statuses onto the shared vocabulary.
fn normalize_status(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    if upper == "DELETE_COMPLETE" {
        STATUS_DELETED.to_owned()
    } else if upper.ends_with("_COMPLETE") {
        STATUS_ACTIVE.to_owned()
    } else if upper.ends_with("_FAILED") {
        STATUS_ERROR.to_owned()
    } else {
        upper.to_ascii_lowercase()
    }
}

impl From<WireCluster> for Cluster {
    fn from(wire: WireCluster) -> Self {
        let mut metadata = BTreeMap::new();
        let raw_status = wire.status.unwrap_or_default();
        metadata.insert(String::from("magnum_status"), raw_status.clone());
        if let Some(reason) = wire.status_reason.filter(|reason| !reason.is_empty()) {
            metadata.insert(String::from("status_reason"), reason);
        }
        if let Some(address) = wire.api_address {
            metadata.insert(String::from("api_address"), address);
        }
        Self {
            id: wire.uuid,
            name: wire.name,
            status: normalize_status(&raw_status),
            nodes: wire.node_count,
            coe: None,
            host_type: wire.flavor_id,
            template_id: wire.cluster_template_id,
            autoscale: false,
            metadata,
        }
    }
}

impl From<WireTemplate> for ClusterTemplate {
    fn from(wire: WireTemplate) -> Self {
        Self {
            id: wire.uuid,
            name: wire.name,
            coe: wire.coe,
            host_type: wire.flavor_id,
        }
    }
}

/// Cluster service for OpenStack Magnum.
pub struct MagnumService {
    connection: Connection,
    templates: OnceCell<Vec<ClusterTemplate>>,
}

impl MagnumService {
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
        tracing::debug!("[magnum] listing clusters");
        let list: ClusterList = self
            .connection
            .fetch(Call::get("list clusters", "clusters"))
            .await?;
        Ok(list.clusters.into_iter().map(Cluster::from).collect())
    }

    async fn lookup(&self, token: &str) -> Result<Cluster, ClusterError> {
        resolve_cluster(self.list().await?, token)
    }

    async fn detail(&self, uuid: &str, token: &str) -> Result<Cluster, ClusterError> {
        let wire: WireCluster = self
            .connection
            .fetch(
                Call::get(format!("retrieve cluster ({token})"), format!("clusters/{uuid}"))
                    .about(ResourceKind::Cluster, token),
            )
            .await?;
        let mut cluster = Cluster::from(wire);
        self.describe_engine(&mut cluster).await;
        Ok(cluster)
    }

    async fn describe_engine(&self, cluster: &mut Cluster) {
        let Some(template_id) = cluster.template_id.as_deref() else {
            return;
        };
        match self.cached_templates().await {
            Ok(templates) => {
                if let Some(template) = templates.iter().find(|t| t.id == template_id) {
                    cluster.coe.clone_from(&template.coe);
                }
            }
            Err(err) => tracing::debug!("[magnum] unable to describe cluster engine: {err}"),
        }
    }

    async fn cached_templates(&self) -> Result<&Vec<ClusterTemplate>, ClusterError> {
        self.templates
            .get_or_try_init(|| async {
                tracing::debug!("[magnum] listing cluster templates");
                let list: TemplateList = self
                    .connection
                    .fetch(Call::get("list cluster templates", "clustertemplates"))
                    .await?;
                Ok::<_, ClusterError>(
                    list.clustertemplates
                        .into_iter()
                        .map(ClusterTemplate::from)
                        .collect(),
                )
            })
            .await
    }
}

impl ClusterService for MagnumService {
    fn cloud(&self) -> CloudType {
        CloudType::Magnum
    }

    fn quotas(&self) -> ServiceFuture<'_, Quotas> {
        Box::pin(async { Ok::<_, ClusterError>(Quotas::default()) })
    }

    fn create_cluster<'a>(
        &'a self,
        request: &'a CreateClusterRequest,
    ) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            let pattern = template_required(CloudType::Magnum, request)?;
            tracing::debug!("[magnum] looking up a template matching '{pattern}'");
            let templates = self.cached_templates().await?;
            let template = resolve_template(templates, pattern)?;
            tracing::debug!(
                "[magnum] creating a {}-node cluster from '{}' named {}",
                request.nodes,
                template.name,
                request.name
            );
            let body = json!({
                "name": request.name,
                "cluster_template_id": template.id,
                "node_count": request.nodes,
            });
            let accepted: Accepted = self
                .connection
                .fetch(Call::new("create cluster", Method::Post, "clusters").body(body))
                .await?;
            self.detail(&accepted.uuid, &request.name).await
        })
    }

    fn get_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            tracing::debug!("[magnum] retrieving cluster ({token})");
            let found = self.lookup(token).await?;
            self.detail(&found.id, token).await
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
            let found = self.lookup(token).await?;
            tracing::debug!("[magnum] resizing cluster ({token}) to {nodes} nodes");
            let patch = json!([{ "op": "replace", "path": "/node_count", "value": nodes }]);
            let accepted: Accepted = self
                .connection
                .fetch(
                    Call::new(
                        format!("resize cluster ({token})"),
                        Method::Patch,
                        format!("clusters/{}", found.id),
                    )
                    .body(patch)
                    .about(ResourceKind::Cluster, token),
                )
                .await?;
            self.detail(&accepted.uuid, token).await
        })
    }

    fn grow_cluster<'a>(&'a self, _token: &'a str, _nodes: u32) -> ServiceFuture<'a, Cluster> {
        unsupported(CloudType::Magnum, "grow", Some("resize"))
    }

    fn set_autoscale<'a>(&'a self, _token: &'a str, _enabled: bool) -> ServiceFuture<'a, Cluster> {
        unsupported(CloudType::Magnum, "autoscale", None)
    }

    fn delete_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        Box::pin(async move {
            let found = self.lookup(token).await?;
            tracing::debug!("[magnum] deleting cluster ({token})");
            self.connection
                .execute(
                    &Call::new(
                        format!("delete cluster ({token})"),
                        Method::Delete,
                        format!("clusters/{}", found.id),
                    )
                    .about(ResourceKind::Cluster, token),
                )
                .await?;
            match self.detail(&found.id, token).await {
                Err(err) if err.is_not_found() => Ok(Cluster {
                    status: STATUS_DELETED.to_owned(),
                    ..found
                }),
                other => other,
            }
        })
    }

    fn rebuild_cluster<'a>(&'a self, _token: &'a str) -> ServiceFuture<'a, Cluster> {
        unsupported(CloudType::Magnum, "rebuild", None)
    }

    fn cluster_credentials<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, CredentialsBundle> {
        Box::pin(async move {
            let found = self.lookup(token).await?;
            let cluster = self.detail(&found.id, token).await?;
            tracing::debug!("[magnum] retrieving cluster credentials ({token})");
            let certificate: Certificate = self
                .connection
                .fetch(
                    Call::get(
                        format!("retrieve credentials ({token})"),
                        format!("certificates/{}", cluster.id),
                    )
                    .about(ResourceKind::Cluster, token),
                )
                .await?;

            let mut files = BTreeMap::new();
            files.insert(CA_CERT_FILE.to_owned(), certificate.pem.into_bytes());
            files.insert(ENV_FILE.to_owned(), render_env(&cluster).into_bytes());
            Ok::<_, ClusterError>(CredentialsBundle { files })
        })
    }

    fn account_state(&self) -> AccountState {
        self.connection.account_state()
    }
}

fn render_env(cluster: &Cluster) -> String {
    let mut lines = vec![
        format!("CLUSTER_NAME={}", cluster.name),
        format!("CLUSTER_UUID={}", cluster.id),
        format!("CLUSTER_CA_CERT={CA_CERT_FILE}"),
    ];
    if let Some(address) = cluster.metadata.get("api_address") {
        lines.push(format!("CLUSTER_API_ADDRESS={address}"));
    }
    if let Some(coe) = cluster.coe.as_deref() {
        lines.push(format!("CLUSTER_COE={coe}"));
    }
    lines.push(String::new());
    lines.join("\n")
}
