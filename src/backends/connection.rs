//! Authenticated request plumbing shared by every backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;

use crate::account::{Account, AccountState, CloudType};
use crate::error::{ClusterError, ResourceKind};
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};

use super::auth::{AuthScheme, Login, join};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const STATUS_UNAUTHORIZED: u16 = 401;

#[derive(Clone, Debug, Eq, PartialEq)]
struct Session {
    token: String,
    endpoint: String,
    from_cache: bool,
}

/// One backend call, described independently of the session.
#[derive(Clone, Debug)]
pub(super) struct Call<'a> {
    action: String,
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    subject: Option<(ResourceKind, &'a str)>,
}

impl<'a> Call<'a> {
    pub(super) fn new(action: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            method,
            path: path.into(),
            body: None,
            subject: None,
        }
    }

    pub(super) fn get(action: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(action, Method::Get, path)
    }

    pub(super) fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Names the object a 404 refers to.
    pub(super) const fn about(mut self, kind: ResourceKind, token: &'a str) -> Self {
        self.subject = Some((kind, token));
        self
    }

    pub(super) fn action(&self) -> &str {
        &self.action
    }
}

/// Backend configuration for a [`Connection`].
#[derive(Clone, Copy, Debug)]
pub(super) struct Profile {
    pub(super) scheme: AuthScheme,
    pub(super) default_endpoint: Option<&'static str>,
    pub(super) headers: &'static [(&'static str, &'static str)],
}

/// Authenticated access to one backend for one account.
///
/// The session is established lazily and memoised. A token hydrated from the
/// account cache is trusted until the backend rejects it, at which point the
/// connection logs in once more and replays the request.
pub(super) struct Connection {
    profile: Profile,
    transport: Arc<dyn Transport>,
    account: Account,
    session: Mutex<Option<Session>>,
    cached_token_rejected: AtomicBool,
    login_lock: tokio::sync::Mutex<()>,
}

impl Connection {
    pub(super) fn new(profile: Profile, transport: Arc<dyn Transport>, account: &Account) -> Self {
        let cached = cached_session(&profile, account);
        if cached.is_some() {
            tracing::debug!(cloud = %account.cloud(), "reusing cached token");
        }
        Self {
            profile,
            transport,
            account: account.clone(),
            session: Mutex::new(cached),
            cached_token_rejected: AtomicBool::new(false),
            login_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(super) const fn cloud(&self) -> CloudType {
        self.account.cloud()
    }

    pub(super) const fn account(&self) -> &Account {
        &self.account
    }

    /// Derived fields worth persisting: the active session, or whatever the
    /// account arrived with when no session exists yet. A cached token the
    /// backend rejected is never reported.
    pub(super) fn account_state(&self) -> AccountState {
        self.current().map_or_else(
            || {
                let mut state = self.account.state().clone();
                if self.cached_token_rejected.load(Ordering::Acquire) {
                    state.token = None;
                }
                state
            },
            |session| AccountState {
                token: Some(session.token),
                service_endpoint: Some(session.endpoint),
            },
        )
    }

    /// Sends a call and decodes a successful JSON response.
    pub(super) async fn fetch<T: DeserializeOwned>(&self, call: Call<'_>) -> Result<T, ClusterError> {
        let response = self.execute(&call).await?;
        response.json(call.action())
    }

    /// Sends a call and returns the successful response.
    pub(super) async fn execute(&self, call: &Call<'_>) -> Result<ApiResponse, ClusterError> {
        let session = self.session().await?;
        let response = self.transport.send(self.request(call, &session)?).await?;

        if response.status == STATUS_UNAUTHORIZED && session.from_cache {
            tracing::info!(cloud = %self.cloud(), "cached token was rejected, authenticating again");
            self.discard(&session);
            let fresh = self.session().await?;
            let retried = self.transport.send(self.request(call, &fresh)?).await?;
            return self.classify(call, retried);
        }

        self.classify(call, response)
    }

    fn classify(&self, call: &Call<'_>, response: ApiResponse) -> Result<ApiResponse, ClusterError> {
        if response.is_success() {
            return Ok(response);
        }
        Err(ClusterError::from_status(
            self.cloud(),
            &call.action,
            call.subject,
            response.status,
            &response.body,
        ))
    }

    fn request(&self, call: &Call<'_>, session: &Session) -> Result<ApiRequest, ClusterError> {
        let mut request = ApiRequest::new(
            call.action.clone(),
            call.method,
            join(&session.endpoint, &call.path)?,
        )
        .header("Accept", "application/json")
        .header(AUTH_TOKEN_HEADER, session.token.clone());
        for (name, value) in self.profile.headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = &call.body {
            request = request.json(body.clone());
        }
        Ok(request)
    }

    fn current(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn discard(&self, stale: &Session) {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref() == Some(stale) {
            *guard = None;
        }
        if stale.from_cache {
            self.cached_token_rejected.store(true, Ordering::Release);
        }
    }

    async fn session(&self) -> Result<Session, ClusterError> {
        if let Some(existing) = self.current() {
            return Ok(existing);
        }

        let _serialised = self.login_lock.lock().await;
        if let Some(existing) = self.current() {
            return Ok(existing);
        }

        let login = self
            .profile
            .scheme
            .login(self.transport.as_ref(), &self.account)
            .await?;
        let fresh = self.fresh_session(login)?;
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(fresh.clone());
        Ok(fresh)
    }

    fn fresh_session(&self, login: Login) -> Result<Session, ClusterError> {
        let endpoint = fixed_endpoint(&self.profile, &self.account)
            .or(login.catalog_endpoint)
            .ok_or_else(|| {
                ClusterError::Config(format!(
                    "no container service endpoint was advertised for {}; set endpoint explicitly",
                    self.cloud()
                ))
            })?;
        Ok(Session {
            token: login.token,
            endpoint,
            from_cache: false,
        })
    }
}

fn fixed_endpoint(profile: &Profile, account: &Account) -> Option<String> {
    account
        .identity()
        .endpoint
        .clone()
        .or_else(|| profile.default_endpoint.map(str::to_owned))
}

fn cached_session(profile: &Profile, account: &Account) -> Option<Session> {
    let state = account.state();
    let token = state.token.clone()?;
    let endpoint =
        fixed_endpoint(profile, account).or_else(|| state.service_endpoint.clone())?;
    Some(Session {
        token,
        endpoint,
        from_cache: true,
    })
}
