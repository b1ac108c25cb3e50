//! Core library for the Flotilla cluster client.
//!
//! The crate drives container-cluster lifecycles (quotas, create, list,
//! resize, grow, autoscale, rebuild, delete, credentials) across several
//! backend APIs behind one [`ClusterService`] abstraction. A [`Client`]
//! dispatches each operation to the account's backend, persists derived
//! account state in a [`Cache`], and manages local credential bundles through
//! a [`CredentialManager`].

pub mod account;
pub mod backends;
pub mod cache;
pub mod client;
pub mod cluster;
pub mod config;
pub mod credentials;
pub mod error;
pub mod service;
pub mod template;
pub mod test_support;
pub mod transport;
pub mod wait;

pub use account::{Account, AccountBuilder, AccountIdentity, AccountState, CloudType, Secret};
pub use backends::{CloudService, CloudServiceFactory, MagnumService, MakeCoeService, MakeSwarmService};
pub use cache::{Cache, CacheLoad};
pub use client::Client;
pub use cluster::{Cluster, ClusterTemplate, CreateClusterRequest, CredentialsBundle, Quotas};
pub use config::{AccountConfig, ClientConfig, ConfigError};
pub use credentials::CredentialManager;
pub use error::{ClusterError, ResourceKind};
pub use service::{ClusterService, ServiceFactory, ServiceFuture};
pub use template::{filter_templates, resolve_template};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
