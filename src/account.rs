//! Account identity, secrets, and backend-derived state.
//!
//! An [`Account`] binds a cloud type to the identity and credentials used to
//! talk to one backend. Identity fields are fixed at construction; only the
//! [`AccountState`] bag may change, either because a backend produced new
//! derived values (for example an authentication token) or because the cache
//! hydrated values saved by a previous invocation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Default API endpoint for the make-coe backend.
pub const MAKE_COE_ENDPOINT: &str = "https://api.getcarina.com";
/// Default identity endpoint used to authenticate make-coe accounts.
pub const MAKE_COE_IDENTITY_ENDPOINT: &str = "https://identity.api.rackspacecloud.com/v2.0";
/// Default API endpoint for the make-swarm backend.
pub const MAKE_SWARM_ENDPOINT: &str = "https://app.getcarina.com";

/// Backend family an account belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudType {
    /// Hosted service exposing the make-coe cluster API.
    MakeCoe,
    /// Legacy hosted service exposing the make-swarm API.
    MakeSwarm,
    /// Privately hosted OpenStack Magnum.
    Magnum,
}

impl CloudType {
    /// Stable tag used in fingerprints and on-disk paths.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::MakeCoe => "make-coe",
            Self::MakeSwarm => "make-swarm",
            Self::Magnum => "magnum",
        }
    }
}

impl fmt::Display for CloudType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CloudType {
    type Err = ClusterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "make-coe" | "public" => Ok(Self::MakeCoe),
            "make-swarm" => Ok(Self::MakeSwarm),
            "magnum" | "private" => Ok(Self::Magnum),
            other => Err(ClusterError::Config(format!(
                "unknown cloud type '{other}': expected make-coe, make-swarm, or magnum"
            ))),
        }
    }
}

/// Secret credential (API key or password) with a redacted debug form.
#[derive(Clone, Eq, PartialEq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value for use in an authentication request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Backend-derived fields that survive between invocations via the cache.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    /// Authentication token issued by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Service endpoint discovered during authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_endpoint: Option<String>,
}

impl AccountState {
    /// Returns `true` when no derived field is populated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.token.is_none() && self.service_endpoint.is_none()
    }
}

/// Identity fields; immutable once the account is built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountIdentity {
    /// Backend family.
    pub cloud: CloudType,
    /// User name used to authenticate.
    pub username: String,
    /// API endpoint override; backends fall back to their defaults.
    pub endpoint: Option<String>,
    /// Identity (authentication) endpoint.
    pub auth_endpoint: Option<String>,
    /// Project (tenant) scope, required by Magnum.
    pub project: Option<String>,
    /// Identity domain, used by Magnum.
    pub domain: Option<String>,
    /// Region used to select a catalog endpoint.
    pub region: Option<String>,
}

/// Credentials and identity for one backend account.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Account {
    identity: AccountIdentity,
    secret: Secret,
    state: AccountState,
}

impl Account {
    /// Starts a builder for an account of the given cloud type.
    #[must_use]
    pub fn builder(cloud: CloudType) -> AccountBuilder {
        AccountBuilder::new(cloud)
    }

    /// Identity fields of the account.
    #[must_use]
    pub const fn identity(&self) -> &AccountIdentity {
        &self.identity
    }

    /// Backend family of the account.
    #[must_use]
    pub const fn cloud(&self) -> CloudType {
        self.identity.cloud
    }

    /// User name of the account.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.identity.username
    }

    /// Secret used to authenticate.
    #[must_use]
    pub const fn secret(&self) -> &Secret {
        &self.secret
    }

    /// Current derived state.
    #[must_use]
    pub const fn state(&self) -> &AccountState {
        &self.state
    }

    /// Replaces the derived state. Identity fields are never touched.
    pub fn replace_state(&mut self, state: AccountState) {
        self.state = state;
    }

    /// Stable key derived from identity fields only.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let id = &self.identity;
        [
            id.cloud.tag(),
            id.endpoint.as_deref().unwrap_or_default(),
            id.auth_endpoint.as_deref().unwrap_or_default(),
            id.username.as_str(),
            id.project.as_deref().unwrap_or_default(),
            id.domain.as_deref().unwrap_or_default(),
            id.region.as_deref().unwrap_or_default(),
        ]
        .join("|")
    }

    /// File-system safe directory name grouping this account's clusters.
    #[must_use]
    pub fn cluster_prefix(&self) -> String {
        let mut prefix = String::from(self.identity.cloud.tag());
        prefix.push('-');
        prefix.push_str(&sanitise_segment(&self.identity.username));
        if let Some(project) = self.identity.project.as_deref() {
            prefix.push('-');
            prefix.push_str(&sanitise_segment(project));
        }
        prefix
    }
}

fn sanitise_segment(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '@') {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>()
        .replace("..", "__")
}

/// Builder for [`Account`] that trims inputs and validates required fields.
#[derive(Clone, Debug)]
pub struct AccountBuilder {
    cloud: CloudType,
    username: String,
    secret: String,
    endpoint: Option<String>,
    auth_endpoint: Option<String>,
    project: Option<String>,
    domain: Option<String>,
    region: Option<String>,
}

impl AccountBuilder {
    /// Creates an empty builder for the cloud type.
    #[must_use]
    pub const fn new(cloud: CloudType) -> Self {
        Self {
            cloud,
            username: String::new(),
            secret: String::new(),
            endpoint: None,
            auth_endpoint: None,
            project: None,
            domain: None,
            region: None,
        }
    }

    /// Sets the user name.
    #[must_use]
    pub fn username(mut self, value: impl Into<String>) -> Self {
        self.username = value.into();
        self
    }

    /// Sets the API key or password.
    #[must_use]
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        self.secret = value.into();
        self
    }

    /// Sets the API endpoint override.
    #[must_use]
    pub fn endpoint(mut self, value: Option<String>) -> Self {
        self.endpoint = value;
        self
    }

    /// Sets the identity endpoint.
    #[must_use]
    pub fn auth_endpoint(mut self, value: Option<String>) -> Self {
        self.auth_endpoint = value;
        self
    }

    /// Sets the project scope.
    #[must_use]
    pub fn project(mut self, value: Option<String>) -> Self {
        self.project = value;
        self
    }

    /// Sets the identity domain.
    #[must_use]
    pub fn domain(mut self, value: Option<String>) -> Self {
        self.domain = value;
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn region(mut self, value: Option<String>) -> Self {
        self.region = value;
        self
    }

    /// Builds and validates the account.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Config`] when a field required by the cloud
    /// type is missing or blank.
    pub fn build(self) -> Result<Account, ClusterError> {
        let identity = AccountIdentity {
            cloud: self.cloud,
            username: self.username.trim().to_owned(),
            endpoint: trimmed(self.endpoint),
            auth_endpoint: trimmed(self.auth_endpoint),
            project: trimmed(self.project),
            domain: trimmed(self.domain),
            region: trimmed(self.region),
        };
        let secret = self.secret.trim().to_owned();

        if identity.username.is_empty() {
            return Err(missing(self.cloud, "username"));
        }
        if secret.is_empty() {
            return Err(missing(self.cloud, "secret"));
        }
        if self.cloud == CloudType::Magnum {
            if identity.auth_endpoint.is_none() {
                return Err(missing(self.cloud, "auth_endpoint"));
            }
            if identity.project.is_none() {
                return Err(missing(self.cloud, "project"));
            }
        }

        Ok(Account {
            identity,
            secret: Secret(secret),
            state: AccountState::default(),
        })
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_owned())
        .filter(|raw| !raw.is_empty())
}

fn missing(cloud: CloudType, field: &str) -> ClusterError {
    ClusterError::Config(format!("{cloud} accounts require a non-empty {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn coe_account(username: &str) -> Account {
        Account::builder(CloudType::MakeCoe)
            .username(username)
            .secret("key")
            .build()
            .unwrap_or_else(|err| panic!("account should build: {err}"))
    }

    #[rstest]
    #[case("public", CloudType::MakeCoe)]
    #[case("Make-COE", CloudType::MakeCoe)]
    #[case("make-swarm", CloudType::MakeSwarm)]
    #[case("private", CloudType::Magnum)]
    fn cloud_type_parses_aliases(#[case] raw: &str, #[case] expected: CloudType) {
        let parsed: CloudType = raw
            .parse()
            .unwrap_or_else(|err| panic!("parse {raw}: {err}"));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn builder_trims_and_requires_username() {
        let err = Account::builder(CloudType::MakeSwarm)
            .username("   ")
            .secret("key")
            .build()
            .expect_err("blank username should fail");
        assert!(matches!(err, ClusterError::Config(ref msg) if msg.contains("username")));
    }

    #[test]
    fn magnum_requires_auth_endpoint_and_project() {
        let err = Account::builder(CloudType::Magnum)
            .username("admin")
            .secret("pw")
            .auth_endpoint(Some(String::from("https://keystone:5000/v3")))
            .build()
            .expect_err("project should be required");
        assert!(matches!(err, ClusterError::Config(ref msg) if msg.contains("project")));
    }

    #[test]
    fn fingerprint_ignores_secret_and_state() {
        let mut first = coe_account("alice");
        let second = Account::builder(CloudType::MakeCoe)
            .username("alice")
            .secret("other-key")
            .build()
            .unwrap_or_else(|err| panic!("account should build: {err}"));
        first.replace_state(AccountState {
            token: Some(String::from("tok")),
            service_endpoint: None,
        });
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_ne!(first.fingerprint(), coe_account("bob").fingerprint());
    }

    #[test]
    fn cluster_prefix_is_path_safe() {
        let account = coe_account("../evil/name");
        let prefix = account.cluster_prefix();
        assert!(!prefix.contains('/'), "prefix: {prefix}");
        assert!(!prefix.contains(".."), "prefix: {prefix}");
    }

    #[test]
    fn secret_debug_is_redacted() {
        let account = coe_account("alice");
        let rendered = format!("{account:?}");
        assert!(rendered.contains("Secret(***)"), "rendered: {rendered}");
        assert!(!rendered.contains("\"key\""), "rendered: {rendered}");
    }
}
