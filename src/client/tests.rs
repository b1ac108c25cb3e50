//! Tests for the client orchestrator.

use std::collections::BTreeMap;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::account::{AccountState, CloudType};
use crate::cluster::{CA_CERT_FILE, CredentialsBundle};
use crate::error::ResourceKind;
use crate::test_support::{Operation, ScriptedFactory, ScriptedService, cluster_with_status};

struct Harness {
    _tmp: TempDir,
    home: Utf8PathBuf,
    service: ScriptedService,
    factory: ScriptedFactory,
}

impl Harness {
    fn config(&self) -> ClientConfig {
        ClientConfig {
            home: Some(self.home.to_string()),
            ..ClientConfig::default()
        }
    }

    fn client(&self) -> Client<ScriptedFactory> {
        Client::with_factory(self.factory.clone(), &self.config())
            .unwrap_or_else(|err| panic!("client: {err}"))
    }
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let home = Utf8PathBuf::from_path_buf(tmp.path().join("home"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    let service = ScriptedService::new(CloudType::MakeCoe);
    let factory = ScriptedFactory::new(service.clone());
    Harness {
        _tmp: tmp,
        home,
        service,
        factory,
    }
}

fn account() -> Account {
    Account::builder(CloudType::MakeCoe)
        .username("alice")
        .secret("key")
        .build()
        .unwrap_or_else(|err| panic!("account should build: {err}"))
}

fn token_state(token: &str) -> AccountState {
    AccountState {
        token: Some(token.to_owned()),
        service_endpoint: Some(String::from("https://api.example")),
    }
}

fn not_found(token: &str) -> ClusterError {
    ClusterError::NotFound {
        kind: ResourceKind::Cluster,
        token: token.to_owned(),
    }
}

fn ca_bundle() -> CredentialsBundle {
    let mut files = BTreeMap::new();
    files.insert(CA_CERT_FILE.to_owned(), b"CA".to_vec());
    CredentialsBundle { files }
}

#[rstest]
#[tokio::test]
async fn derived_state_is_saved_even_when_operation_fails(harness: Harness) {
    harness.service.set_account_state(token_state("tok-1"));
    harness.service.fail_with(ClusterError::Api {
        action: String::from("list clusters"),
        status: 500,
        message: String::from("boom"),
    });
    let mut acct = account();

    harness
        .client()
        .list_clusters(&mut acct)
        .await
        .expect_err("scripted failure");

    assert_eq!(acct.state(), &token_state("tok-1"));
    let reopened = Cache::open(harness.home.join(CACHE_FILE_NAME));
    let mut hydrated = account();
    assert!(reopened.cache.apply(&mut hydrated));
    assert_eq!(hydrated.state().token.as_deref(), Some("tok-1"));
}

#[rstest]
#[tokio::test]
async fn cached_state_seeds_the_next_client(harness: Harness) {
    harness.service.set_account_state(token_state("tok-1"));
    harness
        .client()
        .quotas(&mut account())
        .await
        .unwrap_or_else(|err| panic!("quotas: {err}"));

    let factory = ScriptedFactory::new(harness.service.clone());
    let second = Client::with_factory(factory.clone(), &harness.config())
        .unwrap_or_else(|err| panic!("client: {err}"));
    second
        .quotas(&mut account())
        .await
        .unwrap_or_else(|err| panic!("quotas: {err}"));

    assert_eq!(factory.seeded_states(), vec![token_state("tok-1")]);
}

#[rstest]
#[tokio::test]
async fn service_is_built_once_per_account(harness: Harness) {
    harness
        .service
        .set_clusters(vec![cluster_with_status("alpha", "active")]);
    harness.service.set_quotas(Quotas {
        max_clusters: Some(3),
        max_nodes_per_cluster: None,
    });
    let client = harness.client();
    let mut acct = account();

    let clusters = client
        .list_clusters(&mut acct)
        .await
        .unwrap_or_else(|err| panic!("list: {err}"));
    let quotas = client
        .quotas(&mut acct)
        .await
        .unwrap_or_else(|err| panic!("quotas: {err}"));

    assert_eq!(clusters, vec![cluster_with_status("alpha", "active")]);
    assert_eq!(quotas.max_clusters, Some(3));
    assert_eq!(harness.factory.build_count(), 1);
    assert_eq!(
        harness.service.calls(),
        vec![Operation::List, Operation::Quotas]
    );
}

#[rstest]
#[tokio::test]
async fn create_with_wait_polls_until_active(harness: Harness) {
    let service = &harness.service;
    service.push_cluster(Operation::Create, Ok(cluster_with_status("alpha", "building")));
    service.push_cluster(Operation::Get, Ok(cluster_with_status("alpha", "building")));
    service.push_cluster(Operation::Get, Ok(cluster_with_status("alpha", "active")));
    let request = CreateClusterRequest::new("alpha", Some(String::from("*swarm*")), 1)
        .unwrap_or_else(|err| panic!("request: {err}"));

    let cluster = harness
        .client()
        .create_cluster(&mut account(), &request, true)
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(cluster.status, "active");
    assert_eq!(service.call_count(Operation::Get), 2);
}

#[rstest]
#[tokio::test]
async fn create_without_wait_returns_immediately(harness: Harness) {
    harness
        .service
        .push_cluster(Operation::Create, Ok(cluster_with_status("alpha", "building")));
    let request = CreateClusterRequest::new("alpha", None, 1)
        .unwrap_or_else(|err| panic!("request: {err}"));

    let cluster = harness
        .client()
        .create_cluster(&mut account(), &request, false)
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(cluster.status, "building");
    assert_eq!(harness.service.call_count(Operation::Get), 0);
}

#[rstest]
#[tokio::test]
async fn delete_of_missing_cluster_is_synthesized_and_cleans_credentials(harness: Harness) {
    let client = harness.client();
    let mut acct = account();
    harness.service.set_credentials(Ok(ca_bundle()));
    let bundle = client
        .download_cluster_credentials(&mut acct, "alpha", None)
        .await
        .unwrap_or_else(|err| panic!("download: {err}"));
    harness
        .service
        .push_cluster(Operation::Delete, Err(not_found("alpha")));

    let cluster = client
        .delete_cluster(&mut acct, "alpha", true)
        .await
        .unwrap_or_else(|err| panic!("delete: {err}"));

    assert_eq!(cluster, Cluster::deleted("alpha"));
    assert!(!bundle.exists());
    assert_eq!(harness.service.call_count(Operation::Get), 0);
}

#[rstest]
#[tokio::test]
async fn delete_surfaces_unsafe_credentials_directory(harness: Harness) {
    let client = harness.client();
    let mut acct = account();
    let bundle = client
        .credentials()
        .path_for(&acct, "alpha", None)
        .unwrap_or_else(|err| panic!("path: {err}"));
    std::fs::create_dir_all(&bundle).unwrap_or_else(|err| panic!("mkdir: {err}"));
    std::fs::write(bundle.join("notes.txt"), "keep me")
        .unwrap_or_else(|err| panic!("write: {err}"));
    harness.service.set_account_state(token_state("tok-1"));
    harness
        .service
        .push_cluster(Operation::Delete, Ok(cluster_with_status("alpha", STATUS_DELETED)));

    let err = client
        .delete_cluster(&mut acct, "alpha", false)
        .await
        .expect_err("a bundle without a CA should not be removed");

    assert!(
        matches!(err, ClusterError::CredentialState { .. }),
        "unexpected error: {err:?}"
    );
    assert!(bundle.join("notes.txt").exists());
    assert_eq!(acct.state(), &token_state("tok-1"));
}

#[rstest]
#[tokio::test]
async fn delete_with_wait_polls_until_gone(harness: Harness) {
    let service = &harness.service;
    service.push_cluster(Operation::Delete, Ok(cluster_with_status("alpha", "deleting")));
    service.push_cluster(Operation::Get, Ok(cluster_with_status("alpha", "deleting")));
    service.push_cluster(Operation::Get, Err(not_found("alpha")));

    let cluster = harness
        .client()
        .delete_cluster(&mut account(), "alpha", true)
        .await
        .unwrap_or_else(|err| panic!("delete: {err}"));

    assert_eq!(cluster.status, STATUS_DELETED);
    assert_eq!(cluster.id, "id-alpha");
    assert_eq!(service.call_count(Operation::Get), 2);
}

#[rstest]
#[tokio::test]
async fn delete_propagates_other_failures(harness: Harness) {
    let failure = ClusterError::Api {
        action: String::from("delete cluster"),
        status: 500,
        message: String::from("boom"),
    };
    harness
        .service
        .push_cluster(Operation::Delete, Err(failure.clone()));

    let err = harness
        .client()
        .delete_cluster(&mut account(), "alpha", false)
        .await
        .expect_err("failure should propagate");

    assert_eq!(err, failure);
}

#[rstest]
#[tokio::test]
async fn template_listing_applies_filter(harness: Harness) {
    harness.service.set_templates(vec![
        ClusterTemplate {
            id: String::from("1"),
            name: String::from("Kubernetes 1.4.5 on LXC"),
            ..ClusterTemplate::default()
        },
        ClusterTemplate {
            id: String::from("2"),
            name: String::from("Swarm 1.11.2 on LXC"),
            ..ClusterTemplate::default()
        },
    ]);
    let client = harness.client();
    let mut acct = account();

    let filtered = client
        .list_cluster_templates(&mut acct, Some("SWARM*"))
        .await
        .unwrap_or_else(|err| panic!("templates: {err}"));
    let all = client
        .list_cluster_templates(&mut acct, None)
        .await
        .unwrap_or_else(|err| panic!("templates: {err}"));

    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered.first().map(|t| t.id.as_str()), Some("2"));
    assert_eq!(all.len(), 2);
}

#[rstest]
#[tokio::test]
async fn ensure_credentials_downloads_only_when_invalid(harness: Harness) {
    harness.service.set_credentials(Ok(ca_bundle()));
    let client = harness.client();
    let mut acct = account();

    let first = client
        .ensure_cluster_credentials(&mut acct, "alpha", None)
        .await
        .unwrap_or_else(|err| panic!("ensure: {err}"));
    let second = client
        .ensure_cluster_credentials(&mut acct, "alpha", None)
        .await
        .unwrap_or_else(|err| panic!("ensure: {err}"));

    assert_eq!(first, second);
    assert!(CredentialManager::verify(&first));
    assert_eq!(harness.service.call_count(Operation::Credentials), 1);

    assert!(
        client
            .delete_cluster_credentials(&acct, "alpha", None)
            .unwrap_or_else(|err| panic!("delete credentials: {err}"))
    );
}

#[rstest]
#[tokio::test]
async fn corrupt_cache_is_reported_but_not_fatal(harness: Harness) {
    std::fs::create_dir_all(&harness.home).unwrap_or_else(|err| panic!("mkdir: {err}"));
    std::fs::write(harness.home.join(CACHE_FILE_NAME), "{oops")
        .unwrap_or_else(|err| panic!("write: {err}"));

    let client = harness.client();
    client
        .list_clusters(&mut account())
        .await
        .unwrap_or_else(|err| panic!("list: {err}"));

    assert!(matches!(
        client.cache_warning(),
        Some(ClusterError::CacheUnavailable { .. })
    ));
}

#[rstest]
#[tokio::test]
async fn disabled_cache_writes_nothing(harness: Harness) {
    harness.service.set_account_state(token_state("tok-1"));
    let config = ClientConfig {
        cache: false,
        ..harness.config()
    };
    let client = Client::with_factory(harness.factory.clone(), &config)
        .unwrap_or_else(|err| panic!("client: {err}"));

    client
        .quotas(&mut account())
        .await
        .unwrap_or_else(|err| panic!("quotas: {err}"));

    assert!(client.cache_warning().is_none());
    assert!(!harness.home.join(CACHE_FILE_NAME).exists());
}
