//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::account::{Account, AccountState, CloudType};
use crate::cluster::{
    Cluster, ClusterTemplate, CreateClusterRequest, CredentialsBundle, Quotas,
};
use crate::error::{ClusterError, ResourceKind};
use crate::service::{ClusterService, ServiceFactory, ServiceFuture};
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Poll interval used by scripted services so wait loops finish quickly.
pub const SCRIPTED_POLL_INTERVAL: Duration = Duration::from_millis(1);

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds a cluster snapshot with the given name and status.
#[must_use]
pub fn cluster_with_status(name: &str, status: &str) -> Cluster {
    Cluster {
        id: format!("id-{name}"),
        name: name.to_owned(),
        status: status.to_owned(),
        nodes: 1,
        ..Cluster::default()
    }
}

/// Operations recorded by [`ScriptedService`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// `quotas`
    Quotas,
    /// `create_cluster`
    Create,
    /// `get_cluster`
    Get,
    /// `list_clusters`
    List,
    /// `list_cluster_templates`
    Templates,
    /// `resize_cluster`
    Resize,
    /// `grow_cluster`
    Grow,
    /// `set_autoscale`
    Autoscale,
    /// `delete_cluster`
    Delete,
    /// `rebuild_cluster`
    Rebuild,
    /// `cluster_credentials`
    Credentials,
}

#[derive(Debug, Default)]
struct ServiceScript {
    calls: Vec<Operation>,
    clusters: HashMap<Operation, VecDeque<Result<Cluster, ClusterError>>>,
    listed: Vec<Cluster>,
    templates: Vec<ClusterTemplate>,
    quotas: Quotas,
    credentials: Option<Result<CredentialsBundle, ClusterError>>,
    state: AccountState,
    failure: Option<ClusterError>,
}

/// Cluster service that replays pre-seeded responses.
///
/// Cluster-returning operations pop responses in FIFO order per operation and
/// report the cluster as missing once the queue is empty. Clones share state,
/// so a test can keep a handle while a client owns another.
#[derive(Clone, Debug)]
pub struct ScriptedService {
    cloud: CloudType,
    script: Arc<Mutex<ServiceScript>>,
}

impl ScriptedService {
    /// Creates a service with no queued responses.
    #[must_use]
    pub fn new(cloud: CloudType) -> Self {
        Self {
            cloud,
            script: Arc::new(Mutex::new(ServiceScript::default())),
        }
    }

    /// Queues the next result for a cluster-returning operation.
    pub fn push_cluster(&self, operation: Operation, result: Result<Cluster, ClusterError>) {
        locked(&self.script)
            .clusters
            .entry(operation)
            .or_default()
            .push_back(result);
    }

    /// Sets the clusters returned by `list_clusters`.
    pub fn set_clusters(&self, clusters: Vec<Cluster>) {
        locked(&self.script).listed = clusters;
    }

    /// Sets the templates returned by `list_cluster_templates`.
    pub fn set_templates(&self, templates: Vec<ClusterTemplate>) {
        locked(&self.script).templates = templates;
    }

    /// Sets the quotas returned by `quotas`.
    pub fn set_quotas(&self, quotas: Quotas) {
        locked(&self.script).quotas = quotas;
    }

    /// Sets the result of `cluster_credentials`.
    pub fn set_credentials(&self, result: Result<CredentialsBundle, ClusterError>) {
        locked(&self.script).credentials = Some(result);
    }

    /// Sets the derived state reported through `account_state`.
    pub fn set_account_state(&self, state: AccountState) {
        locked(&self.script).state = state;
    }

    /// Makes every subsequent operation fail with `error`.
    pub fn fail_with(&self, error: ClusterError) {
        locked(&self.script).failure = Some(error);
    }

    /// Operations invoked so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Operation> {
        locked(&self.script).calls.clone()
    }

    /// Number of times `operation` was invoked.
    #[must_use]
    pub fn call_count(&self, operation: Operation) -> usize {
        locked(&self.script)
            .calls
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    fn record(&self, operation: Operation) -> Result<(), ClusterError> {
        let mut script = locked(&self.script);
        script.calls.push(operation);
        script.failure.clone().map_or(Ok(()), Err)
    }

    fn next_cluster(&self, operation: Operation, token: &str) -> Result<Cluster, ClusterError> {
        self.record(operation)?;
        locked(&self.script)
            .clusters
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(ClusterError::NotFound {
                    kind: ResourceKind::Cluster,
                    token: token.to_owned(),
                })
            })
    }

    fn ready<'a, T: Send + 'a>(result: Result<T, ClusterError>) -> ServiceFuture<'a, T> {
        Box::pin(std::future::ready(result))
    }
}

impl ClusterService for ScriptedService {
    fn cloud(&self) -> CloudType {
        self.cloud
    }

    fn quotas(&self) -> ServiceFuture<'_, Quotas> {
        let result = self
            .record(Operation::Quotas)
            .map(|()| locked(&self.script).quotas);
        Self::ready(result)
    }

    fn create_cluster<'a>(
        &'a self,
        request: &'a CreateClusterRequest,
    ) -> ServiceFuture<'a, Cluster> {
        Self::ready(self.next_cluster(Operation::Create, &request.name))
    }

    fn get_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        Self::ready(self.next_cluster(Operation::Get, token))
    }

    fn list_clusters(&self) -> ServiceFuture<'_, Vec<Cluster>> {
        let result = self
            .record(Operation::List)
            .map(|()| locked(&self.script).listed.clone());
        Self::ready(result)
    }

    fn list_cluster_templates(&self) -> ServiceFuture<'_, Vec<ClusterTemplate>> {
        let result = self
            .record(Operation::Templates)
            .map(|()| locked(&self.script).templates.clone());
        Self::ready(result)
    }

    fn resize_cluster<'a>(&'a self, token: &'a str, _nodes: u32) -> ServiceFuture<'a, Cluster> {
        Self::ready(self.next_cluster(Operation::Resize, token))
    }

    fn grow_cluster<'a>(&'a self, token: &'a str, _nodes: u32) -> ServiceFuture<'a, Cluster> {
        Self::ready(self.next_cluster(Operation::Grow, token))
    }

    fn set_autoscale<'a>(&'a self, token: &'a str, _enabled: bool) -> ServiceFuture<'a, Cluster> {
        Self::ready(self.next_cluster(Operation::Autoscale, token))
    }

    fn delete_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        Self::ready(self.next_cluster(Operation::Delete, token))
    }

    fn rebuild_cluster<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, Cluster> {
        Self::ready(self.next_cluster(Operation::Rebuild, token))
    }

    fn cluster_credentials<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, CredentialsBundle> {
        let result = self.record(Operation::Credentials).and_then(|()| {
            locked(&self.script).credentials.clone().unwrap_or_else(|| {
                Err(ClusterError::NotFound {
                    kind: ResourceKind::Cluster,
                    token: token.to_owned(),
                })
            })
        });
        Self::ready(result)
    }

    fn account_state(&self) -> AccountState {
        locked(&self.script).state.clone()
    }

    fn poll_interval(&self) -> Duration {
        SCRIPTED_POLL_INTERVAL
    }
}

/// Factory handing out clones of one [`ScriptedService`] and recording the
/// derived state each account carried when its service was built.
#[derive(Clone, Debug)]
pub struct ScriptedFactory {
    service: ScriptedService,
    seeded: Arc<Mutex<Vec<AccountState>>>,
}

impl ScriptedFactory {
    /// Wraps the service every build returns.
    #[must_use]
    pub fn new(service: ScriptedService) -> Self {
        Self {
            service,
            seeded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of services built so far.
    #[must_use]
    pub fn build_count(&self) -> usize {
        locked(&self.seeded).len()
    }

    /// Account state observed at each build, in order.
    #[must_use]
    pub fn seeded_states(&self) -> Vec<AccountState> {
        locked(&self.seeded).clone()
    }
}

impl ServiceFactory for ScriptedFactory {
    type Service = ScriptedService;

    fn build(&self, account: &Account) -> Result<Self::Service, ClusterError> {
        locked(&self.seeded).push(account.state().clone());
        Ok(self.service.clone())
    }
}

#[derive(Debug, Default)]
struct TransportScript {
    responses: VecDeque<Result<ApiResponse, ClusterError>>,
    requests: Vec<ApiRequest>,
}

/// Transport that replays pre-seeded HTTP responses in FIFO order and records
/// every request.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<TransportScript>>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: u16, body: &serde_json::Value) {
        self.push_response(ApiResponse::new(status, body.to_string()));
    }

    /// Queues an arbitrary response.
    pub fn push_response(&self, response: ApiResponse) {
        locked(&self.script).responses.push_back(Ok(response));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: ClusterError) {
        locked(&self.script).responses.push_back(Err(error));
    }

    /// Requests sent so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        locked(&self.script).requests.clone()
    }

    /// Number of responses still queued.
    #[must_use]
    pub fn pending(&self) -> usize {
        locked(&self.script).responses.len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: ApiRequest) -> ServiceFuture<'_, ApiResponse> {
        let mut script = locked(&self.script);
        let action = request.action.clone();
        script.requests.push(request);
        let result = script.responses.pop_front().unwrap_or_else(|| {
            Err(ClusterError::Transport {
                action,
                message: String::from("no scripted response available"),
            })
        });
        drop(script);
        Box::pin(std::future::ready(result))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    ///
    /// A `None` value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
