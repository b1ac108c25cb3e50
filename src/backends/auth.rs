//! Authentication flows used by the backends.

use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::account::{Account, CloudType, MAKE_COE_IDENTITY_ENDPOINT};
use crate::error::ClusterError;
use crate::transport::{ApiRequest, Method, Transport};

const KEYSTONE_TOKEN_HEADER: &str = "x-subject-token";
const CONTAINER_INFRA_SERVICE: &str = "container-infra";
const PUBLIC_INTERFACE: &str = "public";
const DEFAULT_DOMAIN: &str = "Default";

/// Outcome of a fresh login.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct Login {
    pub(super) token: String,
    pub(super) catalog_endpoint: Option<String>,
}

/// How an account proves its identity to a backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum AuthScheme {
    /// Identity v2 with a user name and API key.
    ApiKey,
    /// Keystone v3 password authentication scoped to a project.
    Keystone,
}

impl AuthScheme {
    pub(super) async fn login(
        self,
        transport: &dyn Transport,
        account: &Account,
    ) -> Result<Login, ClusterError> {
        tracing::debug!(cloud = %account.cloud(), user = account.username(), "authenticating");
        match self {
            Self::ApiKey => api_key_login(transport, account).await,
            Self::Keystone => keystone_login(transport, account).await,
        }
    }
}

#[derive(Deserialize)]
struct IdentityResponse {
    access: IdentityAccess,
}

#[derive(Deserialize)]
struct IdentityAccess {
    token: IdentityToken,
}

#[derive(Deserialize)]
struct IdentityToken {
    id: String,
}

async fn api_key_login(
    transport: &dyn Transport,
    account: &Account,
) -> Result<Login, ClusterError> {
    const ACTION: &str = "authenticate";
    let base = account
        .identity()
        .auth_endpoint
        .as_deref()
        .unwrap_or(MAKE_COE_IDENTITY_ENDPOINT);
    let body = json!({
        "auth": {
            "RAX-KSKEY:apiKeyCredentials": {
                "username": account.username(),
                "apiKey": account.secret().expose(),
            }
        }
    });
    let request = ApiRequest::new(ACTION, Method::Post, join(base, "tokens")?)
        .header("Accept", "application/json")
        .json(body);

    let response = transport.send(request).await?;
    if !response.is_success() {
        return Err(login_failure(account.cloud(), response.status, &response.body));
    }
    let decoded: IdentityResponse = response.json(ACTION)?;
    Ok(Login {
        token: decoded.access.token.id,
        catalog_endpoint: None,
    })
}

#[derive(Deserialize)]
struct KeystoneResponse {
    token: KeystoneToken,
}

#[derive(Deserialize)]
struct KeystoneToken {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

async fn keystone_login(
    transport: &dyn Transport,
    account: &Account,
) -> Result<Login, ClusterError> {
    const ACTION: &str = "authenticate";
    let identity = account.identity();
    let base = identity.auth_endpoint.as_deref().ok_or_else(|| {
        ClusterError::Config(String::from("magnum accounts require an auth_endpoint"))
    })?;
    let domain = identity.domain.as_deref().unwrap_or(DEFAULT_DOMAIN);
    let body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": account.username(),
                        "domain": { "name": domain },
                        "password": account.secret().expose(),
                    }
                }
            },
            "scope": {
                "project": {
                    "name": identity.project.as_deref().unwrap_or_default(),
                    "domain": { "name": domain },
                }
            }
        }
    });
    let request = ApiRequest::new(ACTION, Method::Post, join(base, "auth/tokens")?)
        .header("Accept", "application/json")
        .json(body);

    let response = transport.send(request).await?;
    if !response.is_success() {
        return Err(login_failure(account.cloud(), response.status, &response.body));
    }
    let token = response
        .header(KEYSTONE_TOKEN_HEADER)
        .map(str::to_owned)
        .ok_or_else(|| ClusterError::Decode {
            action: ACTION.to_owned(),
            message: String::from("identity service did not return X-Subject-Token"),
        })?;
    let decoded: KeystoneResponse = response.json(ACTION)?;

    Ok(Login {
        token,
        catalog_endpoint: container_endpoint(&decoded.token.catalog, identity.region.as_deref()),
    })
}

fn container_endpoint(catalog: &[CatalogEntry], region: Option<&str>) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == CONTAINER_INFRA_SERVICE)
        .flat_map(|entry| entry.endpoints.iter())
        .filter(|endpoint| endpoint.interface == PUBLIC_INTERFACE)
        .find(|endpoint| {
            region.is_none_or(|wanted| {
                endpoint
                    .region
                    .as_deref()
                    .is_some_and(|actual| actual.eq_ignore_ascii_case(wanted))
            })
        })
        .map(|endpoint| endpoint.url.clone())
}

fn login_failure(cloud: CloudType, status: u16, body: &str) -> ClusterError {
    match status {
        400 | 401 | 403 => ClusterError::Authentication {
            backend: cloud,
            message: format!("identity service returned HTTP {status}"),
        },
        _ => ClusterError::from_status(cloud, "authenticate", None, status, body),
    }
}

/// Resolves `path` beneath the endpoint `base`, keeping the endpoint's own
/// path prefix. `path` segments must already be percent-encoded.
pub(super) fn join(base: &str, path: &str) -> Result<String, ClusterError> {
    let invalid = |reason: String| ClusterError::Config(format!("invalid endpoint {base}: {reason}"));
    let mut url = Url::parse(base).map_err(|err| invalid(err.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid(String::from("it cannot carry a path")));
    }
    if !url.path().ends_with('/') {
        let directory = format!("{}/", url.path());
        url.set_path(&directory);
    }
    let joined = url
        .join(path.trim_start_matches('/'))
        .map_err(|err| invalid(err.to_string()))?;
    Ok(joined.into())
}
