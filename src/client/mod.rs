//! Orchestrates cluster operations across accounts.
//!
//! Every operation follows the same sequence: hydrate the account from the
//! cache, reuse or build the account's [`ClusterService`], run the operation
//! (optionally waiting for the cluster to settle), and persist the account's
//! derived state. Persistence happens in a drop guard so that it also runs
//! when the operation fails.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};

use crate::account::Account;
use crate::backends::CloudServiceFactory;
use crate::cache::{CACHE_FILE_NAME, Cache, CacheLoad};
use crate::cluster::{Cluster, ClusterTemplate, CreateClusterRequest, Quotas, STATUS_DELETED};
use crate::config::ClientConfig;
use crate::credentials::CredentialManager;
use crate::error::ClusterError;
use crate::service::{ClusterService, ServiceFactory};
use crate::template::filter_templates;
use crate::wait;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Entry point for cluster operations.
pub struct Client<F: ServiceFactory = CloudServiceFactory> {
    factory: F,
    cache: Mutex<Cache>,
    cache_warning: Option<ClusterError>,
    services: Mutex<HashMap<String, Arc<F::Service>>>,
    credentials: CredentialManager,
    wait_timeout: Duration,
    poll_interval: Option<Duration>,
}

impl Client<CloudServiceFactory> {
    /// Builds a client that talks to the real backends over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Config`] when the configuration is invalid.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClusterError> {
        Self::with_factory(CloudServiceFactory::default(), config)
    }
}

impl<F: ServiceFactory> Client<F> {
    /// Builds a client that obtains services from `factory`.
    ///
    /// The cache is opened from `<home>/cache.json` unless caching is
    /// disabled. A cache that cannot be used is reported through
    /// [`Client::cache_warning`] rather than as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Config`] when the configuration is invalid.
    pub fn with_factory(factory: F, config: &ClientConfig) -> Result<Self, ClusterError> {
        config.validate()?;
        let home = config.home_dir()?;
        let CacheLoad { cache, warning } = if config.cache {
            Cache::open(home.join(CACHE_FILE_NAME))
        } else {
            CacheLoad {
                cache: Cache::disabled(),
                warning: None,
            }
        };
        Ok(Self {
            factory,
            cache: Mutex::new(cache),
            cache_warning: warning,
            services: Mutex::new(HashMap::new()),
            credentials: CredentialManager::new(&home),
            wait_timeout: config.wait_timeout(),
            poll_interval: config.poll_interval(),
        })
    }

    /// Reason the cache was ignored, if it could not be loaded.
    #[must_use]
    pub const fn cache_warning(&self) -> Option<&ClusterError> {
        self.cache_warning.as_ref()
    }

    /// Credential bundle manager used by this client.
    #[must_use]
    pub const fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    fn session<'a>(
        &'a self,
        account: &'a mut Account,
    ) -> Result<Session<'a, F::Service>, ClusterError> {
        locked(&self.cache).apply(account);
        let service = self.service_for(account)?;
        Ok(Session {
            cache: &self.cache,
            account,
            service,
        })
    }

    fn service_for(&self, account: &Account) -> Result<Arc<F::Service>, ClusterError> {
        let key = account.fingerprint();
        let mut services = locked(&self.services);
        if let Some(existing) = services.get(&key) {
            return Ok(Arc::clone(existing));
        }
        tracing::debug!(cloud = %account.cloud(), "building cluster service");
        let built = Arc::new(self.factory.build(account)?);
        services.insert(key, Arc::clone(&built));
        Ok(built)
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.wait_timeout
    }

    fn interval(&self, service: &F::Service) -> Duration {
        self.poll_interval.unwrap_or_else(|| service.poll_interval())
    }

    async fn settle(
        &self,
        service: &F::Service,
        cluster: Cluster,
        wait: bool,
    ) -> Result<Cluster, ClusterError> {
        if !wait {
            return Ok(cluster);
        }
        tracing::debug!(cluster = %cluster.name, "waiting for cluster to become active");
        wait::until_active(service, cluster, self.interval(service), self.deadline()).await
    }

    /// Retrieves the account's limits.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn quotas(&self, account: &mut Account) -> Result<Quotas, ClusterError> {
        let session = self.session(account)?;
        session.service.quotas().await
    }

    /// Creates a cluster, optionally waiting for it to become active.
    ///
    /// # Errors
    ///
    /// Propagates backend failures, template resolution errors, and wait
    /// timeouts.
    pub async fn create_cluster(
        &self,
        account: &mut Account,
        request: &CreateClusterRequest,
        wait: bool,
    ) -> Result<Cluster, ClusterError> {
        let session = self.session(account)?;
        tracing::info!(cluster = %request.name, nodes = request.nodes, "creating cluster");
        let cluster = session.service.create_cluster(request).await?;
        self.settle(&session.service, cluster, wait).await
    }

    /// Retrieves a cluster by identifier or name, optionally waiting for it to
    /// become active.
    ///
    /// # Errors
    ///
    /// Propagates backend failures and wait timeouts.
    pub async fn get_cluster(
        &self,
        account: &mut Account,
        token: &str,
        wait: bool,
    ) -> Result<Cluster, ClusterError> {
        let session = self.session(account)?;
        let cluster = session.service.get_cluster(token).await?;
        self.settle(&session.service, cluster, wait).await
    }

    /// Lists the account's clusters.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn list_clusters(
        &self,
        account: &mut Account,
    ) -> Result<Vec<Cluster>, ClusterError> {
        let session = self.session(account)?;
        session.service.list_clusters().await
    }

    /// Lists templates whose names match `filter` (a case-insensitive glob);
    /// no filter lists everything.
    ///
    /// # Errors
    ///
    /// Propagates backend failures and rejects malformed patterns.
    pub async fn list_cluster_templates(
        &self,
        account: &mut Account,
        filter: Option<&str>,
    ) -> Result<Vec<ClusterTemplate>, ClusterError> {
        let session = self.session(account)?;
        let templates = session.service.list_cluster_templates().await?;
        filter_templates(templates, filter.unwrap_or_default())
    }

    /// Sets a cluster's node count.
    ///
    /// # Errors
    ///
    /// Propagates backend failures and wait timeouts.
    pub async fn resize_cluster(
        &self,
        account: &mut Account,
        token: &str,
        nodes: u32,
        wait: bool,
    ) -> Result<Cluster, ClusterError> {
        let session = self.session(account)?;
        let cluster = session.service.resize_cluster(token, nodes).await?;
        self.settle(&session.service, cluster, wait).await
    }

    /// Adds nodes to a cluster.
    ///
    /// # Errors
    ///
    /// Propagates backend failures and wait timeouts.
    pub async fn grow_cluster(
        &self,
        account: &mut Account,
        token: &str,
        nodes: u32,
        wait: bool,
    ) -> Result<Cluster, ClusterError> {
        let session = self.session(account)?;
        let cluster = session.service.grow_cluster(token, nodes).await?;
        self.settle(&session.service, cluster, wait).await
    }

    /// Turns autoscaling on or off.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn set_autoscale(
        &self,
        account: &mut Account,
        token: &str,
        enabled: bool,
    ) -> Result<Cluster, ClusterError> {
        let session = self.session(account)?;
        session.service.set_autoscale(token, enabled).await
    }

    /// Rebuilds a cluster, optionally waiting for it to become active.
    ///
    /// # Errors
    ///
    /// Propagates backend failures and wait timeouts.
    pub async fn rebuild_cluster(
        &self,
        account: &mut Account,
        token: &str,
        wait: bool,
    ) -> Result<Cluster, ClusterError> {
        let session = self.session(account)?;
        let cluster = session.service.rebuild_cluster(token).await?;
        self.settle(&session.service, cluster, wait).await
    }

    /// Deletes a cluster and its local credentials bundle.
    ///
    /// A cluster the backend cannot find is reported as already deleted.
    /// With `wait`, polls until the backend confirms the deletion.
    ///
    /// # Errors
    ///
    /// Propagates backend failures other than a missing cluster,
    /// [`ClusterError::DeletionFailed`], wait timeouts, and
    /// [`ClusterError::CredentialState`] when the local bundle directory
    /// cannot be removed safely.
    pub async fn delete_cluster(
        &self,
        account: &mut Account,
        token: &str,
        wait: bool,
    ) -> Result<Cluster, ClusterError> {
        let session = self.session(account)?;
        tracing::info!(cluster = token, "deleting cluster");
        let mut cluster = match session.service.delete_cluster(token).await {
            Ok(cluster) => cluster,
            Err(err) if err.is_not_found() => {
                tracing::warn!("could not find the cluster ({token}) to delete");
                Cluster::deleted(token)
            }
            Err(err) => return Err(err),
        };
        if wait && !cluster.status_is(STATUS_DELETED) {
            let interval = self.interval(&session.service);
            cluster =
                wait::until_deleted(&*session.service, cluster, interval, self.deadline()).await?;
        }

        let bundle_name = if cluster.name.is_empty() {
            token
        } else {
            cluster.name.as_str()
        };
        if self.credentials.delete(&*session.account, bundle_name, None)? {
            tracing::debug!(cluster = bundle_name, "removed local credentials");
        }
        Ok(cluster)
    }

    /// Downloads a cluster's credentials bundle, returning its directory.
    ///
    /// # Errors
    ///
    /// Propagates backend failures and credential storage errors.
    pub async fn download_cluster_credentials(
        &self,
        account: &mut Account,
        token: &str,
        override_dir: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, ClusterError> {
        let session = self.session(account)?;
        self.credentials
            .download(&*session.service, &*session.account, token, override_dir)
            .await
    }

    /// Returns the bundle directory, downloading it again when the local copy
    /// is missing or incomplete.
    ///
    /// # Errors
    ///
    /// Propagates backend failures and credential storage errors.
    pub async fn ensure_cluster_credentials(
        &self,
        account: &mut Account,
        token: &str,
        override_dir: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, ClusterError> {
        let path = self.credentials.path_for(account, token, override_dir)?;
        if CredentialManager::verify(&path) {
            return Ok(path);
        }
        tracing::debug!(path = %path, "credentials missing or incomplete, downloading");
        self.download_cluster_credentials(account, token, override_dir)
            .await
    }

    /// Removes a cluster's local credentials bundle. Returns `false` when
    /// there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::CredentialState`] for unsafe or unrecognised
    /// directories.
    pub fn delete_cluster_credentials(
        &self,
        account: &Account,
        token: &str,
        override_dir: Option<&Utf8Path>,
    ) -> Result<bool, ClusterError> {
        self.credentials.delete(account, token, override_dir)
    }
}

/// One operation's hold on an account. Dropping it copies the service's
/// derived state onto the account and saves it to the cache.
struct Session<'a, S: ClusterService> {
    cache: &'a Mutex<Cache>,
    account: &'a mut Account,
    service: Arc<S>,
}

impl<S: ClusterService> Drop for Session<'_, S> {
    fn drop(&mut self) {
        self.account.replace_state(self.service.account_state());
        locked(self.cache).save_account(self.account);
    }
}

#[cfg(test)]
mod tests;
