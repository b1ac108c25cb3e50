//! Backend implementations of [`ClusterService`] and the tagged union that
//! dispatches between them.

mod auth;
mod connection;
mod magnum;
mod make_coe;
mod make_swarm;

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::account::{Account, AccountState, CloudType};
use crate::cluster::{
    Cluster, ClusterTemplate, CreateClusterRequest, CredentialsBundle, Quotas,
};
use crate::error::{ClusterError, ResourceKind};
use crate::service::{ClusterService, ServiceFactory, ServiceFuture};
use crate::transport::{HttpTransport, Transport};

pub use magnum::{ENV_FILE as MAGNUM_ENV_FILE, MagnumService};
pub use make_coe::MakeCoeService;
pub use make_swarm::MakeSwarmService;

/// A cluster service for any supported backend.
pub enum CloudService {
    /// make-coe backend.
    MakeCoe(MakeCoeService),
    /// make-swarm backend.
    MakeSwarm(MakeSwarmService),
    /// OpenStack Magnum backend.
    Magnum(MagnumService),
}

impl CloudService {
    /// Builds the variant matching the account's cloud type.
    #[must_use]
    pub fn for_account(account: &Account, transport: Arc<dyn Transport>) -> Self {
        match account.cloud() {
            CloudType::MakeCoe => Self::MakeCoe(MakeCoeService::new(account, transport)),
            CloudType::MakeSwarm => Self::MakeSwarm(MakeSwarmService::new(account, transport)),
            CloudType::Magnum => Self::Magnum(MagnumService::new(account, transport)),
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $service:ident => $call:expr) => {
        match $self {
            CloudService::MakeCoe($service) => $call,
            CloudService::MakeSwarm($service) => $call,
            CloudService::Magnum($service) => $call,
        }
    };
}

impl ClusterService for CloudService {
    fn cloud(&self) -> CloudType {
        dispatch!(self, service => service.cloud())
    }

    fn quotas(&self) -> ServiceFuture<'_, Quotas> {
        dispatch!(self, service => service.quotas())
    }

    fn create_cluster<'a>(
        &'a self,
        request: &'a CreateClusterRequest,
    ) -> ServiceFuture<'a, Cluster> {
        dispatch!(self, service => service.create_cluster(request))
    }

    fn get_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        dispatch!(self, service => service.get_cluster(token))
    }

    fn list_clusters(&self) -> ServiceFuture<'_, Vec<Cluster>> {
        dispatch!(self, service => service.list_clusters())
    }

    fn list_cluster_templates(&self) -> ServiceFuture<'_, Vec<ClusterTemplate>> {
        dispatch!(self, service => service.list_cluster_templates())
    }

    fn resize_cluster<'a>(&'a self, token: &'a str, nodes: u32) -> ServiceFuture<'a, Cluster> {
        dispatch!(self, service => service.resize_cluster(token, nodes))
    }

    fn grow_cluster<'a>(&'a self, token: &'a str, nodes: u32) -> ServiceFuture<'a, Cluster> {
        dispatch!(self, service => service.grow_cluster(token, nodes))
    }

    fn set_autoscale<'a>(&'a self, token: &'a str, enabled: bool) -> ServiceFuture<'a, Cluster> {
        dispatch!(self, service => service.set_autoscale(token, enabled))
    }

    fn delete_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        dispatch!(self, service => service.delete_cluster(token))
    }

    fn rebuild_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        dispatch!(self, service => service.rebuild_cluster(token))
    }

    fn cluster_credentials<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, CredentialsBundle> {
        dispatch!(self, service => service.cluster_credentials(token))
    }

    fn account_state(&self) -> AccountState {
        dispatch!(self, service => service.account_state())
    }
}

/// Builds [`CloudService`] values over a shared transport.
#[derive(Clone)]
pub struct CloudServiceFactory {
    transport: Arc<dyn Transport>,
}

impl CloudServiceFactory {
    /// Uses the given transport for every service.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl Default for CloudServiceFactory {
    fn default() -> Self {
        Self::new(Arc::new(HttpTransport))
    }
}

impl ServiceFactory for CloudServiceFactory {
    type Service = CloudService;

    fn build(&self, account: &Account) -> Result<Self::Service, ClusterError> {
        Ok(CloudService::for_account(account, Arc::clone(&self.transport)))
    }
}

/// Credential payload as returned on the wire: base64 contents keyed by file
/// name.
#[derive(Deserialize)]
struct EncodedBundle {
    files: BTreeMap<String, String>,
}

impl EncodedBundle {
    fn decode(self, action: &str) -> Result<CredentialsBundle, ClusterError> {
        let files = self
            .files
            .into_iter()
            .map(|(name, encoded)| {
                STANDARD
                    .decode(encoded.trim())
                    .map(|bytes| (name.clone(), bytes))
                    .map_err(|err| ClusterError::Decode {
                        action: action.to_owned(),
                        message: format!("{name}: {err}"),
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(CredentialsBundle { files })
    }
}

/// Resolves a token against a cluster list: exact identifier first, then
/// exact name.
fn resolve_cluster(clusters: Vec<Cluster>, token: &str) -> Result<Cluster, ClusterError> {
    let (by_id, others): (Vec<Cluster>, Vec<Cluster>) =
        clusters.into_iter().partition(|cluster| cluster.id == token);
    if let Some(found) = by_id.into_iter().next() {
        return Ok(found);
    }

    let mut named = others.into_iter().filter(|cluster| cluster.name == token);
    let Some(found) = named.next() else {
        return Err(ClusterError::NotFound {
            kind: ResourceKind::Cluster,
            token: token.to_owned(),
        });
    };
    if named.next().is_some() {
        return Err(ClusterError::AmbiguousMatch {
            kind: ResourceKind::Cluster,
            pattern: token.to_owned(),
        });
    }
    Ok(found)
}

fn template_required(
    cloud: CloudType,
    request: &CreateClusterRequest,
) -> Result<&str, ClusterError> {
    request.template.as_deref().ok_or_else(|| {
        ClusterError::InvalidRequest(format!("a template is required to create {cloud} clusters"))
    })
}

fn unsupported<'a, T: Send + 'a>(
    cloud: CloudType,
    operation: &str,
    alternative: Option<&str>,
) -> ServiceFuture<'a, T> {
    Box::pin(std::future::ready(Err(ClusterError::unsupported(
        cloud,
        operation,
        alternative,
    ))))
}

#[cfg(test)]
mod tests;
