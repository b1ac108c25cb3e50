//! Uniform cluster operation set implemented by every backend.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use crate::account::{Account, AccountState, CloudType};
use crate::cluster::{
    Cluster, ClusterTemplate, CreateClusterRequest, CredentialsBundle, Quotas,
};
use crate::error::ClusterError;
use crate::wait;

/// Future returned by cluster service operations.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClusterError>> + Send + 'a>>;

/// Operations a backend exposes for managing clusters.
///
/// `token` arguments accept either a cluster identifier or a unique cluster
/// name. Operations a backend cannot perform return
/// [`ClusterError::Unsupported`].
pub trait ClusterService: Send + Sync {
    /// Backend family this service talks to.
    fn cloud(&self) -> CloudType;

    /// Account limits; empty when the backend does not report quotas.
    fn quotas(&self) -> ServiceFuture<'_, Quotas>;

    /// Creates a cluster and returns the backend's initial view of it.
    fn create_cluster<'a>(
        &'a self,
        request: &'a CreateClusterRequest,
    ) -> ServiceFuture<'a, Cluster>;

    /// Fetches a cluster by identifier or name.
    fn get_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster>;

    /// Lists every cluster visible to the account.
    fn list_clusters(&self) -> ServiceFuture<'_, Vec<Cluster>>;

    /// Lists the templates new clusters may be created from.
    fn list_cluster_templates(&self) -> ServiceFuture<'_, Vec<ClusterTemplate>>;

    /// Sets the node count of a cluster.
    fn resize_cluster<'a>(&'a self, token: &'a str, nodes: u32) -> ServiceFuture<'a, Cluster>;

    /// Adds nodes to a cluster.
    fn grow_cluster<'a>(&'a self, token: &'a str, nodes: u32) -> ServiceFuture<'a, Cluster>;

    /// Enables or disables automatic scaling.
    fn set_autoscale<'a>(&'a self, token: &'a str, enabled: bool) -> ServiceFuture<'a, Cluster>;

    /// Starts deleting a cluster.
    fn delete_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster>;

    /// Rebuilds a cluster in place.
    fn rebuild_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster>;

    /// Downloads the credential bundle for a cluster.
    fn cluster_credentials<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, CredentialsBundle>;

    /// Derived fields that should be persisted for the account.
    fn account_state(&self) -> AccountState;

    /// Delay between polls in the wait loops.
    fn poll_interval(&self) -> Duration {
        wait::POLL_INTERVAL
    }

    /// Polls until the cluster is `active` or `error`, or the deadline passes.
    fn wait_until_cluster_is_active<'a>(
        &'a self,
        cluster: Cluster,
        deadline: Instant,
    ) -> ServiceFuture<'a, Cluster> {
        Box::pin(wait::until_active(self, cluster, self.poll_interval(), deadline))
    }

    /// Polls until the cluster is gone, or the deadline passes.
    fn wait_until_cluster_is_deleted<'a>(
        &'a self,
        cluster: Cluster,
        deadline: Instant,
    ) -> ServiceFuture<'a, Cluster> {
        Box::pin(wait::until_deleted(self, cluster, self.poll_interval(), deadline))
    }
}

/// Builds the service matching an account.
pub trait ServiceFactory: Send + Sync {
    /// Concrete service produced by the factory.
    type Service: ClusterService;

    /// Builds a service seeded with the account's derived state.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Config`] when the account lacks a field the
    /// backend needs.
    fn build(&self, account: &Account) -> Result<Self::Service, ClusterError>;
}
