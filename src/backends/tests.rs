//! Behavioural tests for the backends against a scripted transport.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::cluster::CA_CERT_FILE;
use crate::test_support::ScriptedTransport;
use crate::transport::{ApiResponse, Method};

const MAKE_COE_URL: &str = crate::account::MAKE_COE_ENDPOINT;

#[fixture]
fn transport() -> ScriptedTransport {
    ScriptedTransport::new()
}

fn coe_account(cached_token: Option<&str>) -> Account {
    let mut account = Account::builder(CloudType::MakeCoe)
        .username("alice")
        .secret("api-key")
        .build()
        .unwrap_or_else(|err| panic!("account should build: {err}"));
    account.replace_state(AccountState {
        token: cached_token.map(str::to_owned),
        service_endpoint: None,
    });
    account
}

fn swarm_account() -> Account {
    let mut account = Account::builder(CloudType::MakeSwarm)
        .username("bob@example.com")
        .secret("api-key")
        .build()
        .unwrap_or_else(|err| panic!("account should build: {err}"));
    account.replace_state(AccountState {
        token: Some(String::from("cached")),
        service_endpoint: None,
    });
    account
}

fn magnum_account() -> Account {
    Account::builder(CloudType::Magnum)
        .username("admin")
        .secret("pw")
        .auth_endpoint(Some(String::from("https://keystone.example/v3")))
        .project(Some(String::from("demo")))
        .region(Some(String::from("RegionOne")))
        .build()
        .unwrap_or_else(|err| panic!("account should build: {err}"))
}

fn service_for(account: &Account, transport: &ScriptedTransport) -> CloudService {
    CloudService::for_account(account, Arc::new(transport.clone()))
}

fn identity_ok(token: &str) -> serde_json::Value {
    json!({ "access": { "token": { "id": token } } })
}

fn coe_cluster(id: &str, name: &str, status: &str) -> serde_json::Value {
    json!({ "id": id, "name": name, "status": status, "node_count": 1 })
}

fn auth_header(transport: &ScriptedTransport, index: usize) -> Option<String> {
    transport
        .requests()
        .get(index)
        .and_then(|request| request.header_value("X-Auth-Token").map(str::to_owned))
}

#[rstest]
#[tokio::test]
async fn cached_token_is_used_without_authenticating(transport: ScriptedTransport) {
    transport.push_json(200, &json!({ "clusters": [coe_cluster("c1", "alpha", "active")] }));
    let service = service_for(&coe_account(Some("cached")), &transport);

    let clusters = service
        .list_clusters()
        .await
        .unwrap_or_else(|err| panic!("list should succeed: {err}"));

    assert_eq!(clusters.len(), 1);
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(auth_header(&transport, 0).as_deref(), Some("cached"));
    assert!(requests.iter().all(|request| request.url.starts_with(MAKE_COE_URL)));
}

#[rstest]
#[tokio::test]
async fn rejected_cached_token_triggers_one_fresh_login(transport: ScriptedTransport) {
    transport.push_response(ApiResponse::new(401, "expired"));
    transport.push_json(200, &identity_ok("fresh"));
    transport.push_json(200, &json!({ "clusters": [] }));
    let service = service_for(&coe_account(Some("stale")), &transport);

    service
        .list_clusters()
        .await
        .unwrap_or_else(|err| panic!("list should succeed after re-auth: {err}"));

    assert_eq!(transport.requests().len(), 3);
    assert_eq!(auth_header(&transport, 2).as_deref(), Some("fresh"));
    let state = service.account_state();
    assert_eq!(state.token.as_deref(), Some("fresh"));
    assert_eq!(state.service_endpoint.as_deref(), Some(MAKE_COE_URL));
}

#[rstest]
#[tokio::test]
async fn rejected_cached_token_is_forgotten_when_login_fails(transport: ScriptedTransport) {
    transport.push_response(ApiResponse::new(401, "expired"));
    transport.push_response(ApiResponse::new(401, "bad key"));
    let service = service_for(&coe_account(Some("stale")), &transport);

    let err = service
        .list_clusters()
        .await
        .expect_err("login with bad credentials should fail");

    assert!(err.is_authentication(), "unexpected error: {err:?}");
    assert_eq!(service.account_state().token, None);
}

#[rstest]
#[tokio::test]
async fn rejected_fresh_credentials_are_not_retried(transport: ScriptedTransport) {
    transport.push_json(200, &identity_ok("fresh"));
    transport.push_response(ApiResponse::new(401, "nope"));
    let service = service_for(&coe_account(None), &transport);

    let err = service
        .list_clusters()
        .await
        .expect_err("401 with fresh token should fail");

    assert!(err.is_authentication(), "unexpected error: {err:?}");
    assert_eq!(transport.requests().len(), 2);
    assert_eq!(transport.pending(), 0);
}

#[rstest]
#[tokio::test]
async fn failed_login_surfaces_authentication_error(transport: ScriptedTransport) {
    transport.push_response(ApiResponse::new(401, "bad key"));
    let service = service_for(&coe_account(None), &transport);

    let err = service.get_cluster("alpha").await.expect_err("login fails");

    assert!(err.is_authentication(), "unexpected error: {err:?}");
    assert_eq!(transport.requests().len(), 1);
}

#[rstest]
#[tokio::test]
async fn not_acceptable_is_a_protocol_error(transport: ScriptedTransport) {
    transport.push_response(ApiResponse::new(406, ""));
    let service = service_for(&coe_account(Some("cached")), &transport);

    let err = service.list_clusters().await.expect_err("406 should fail");

    assert!(
        matches!(err, ClusterError::BackendProtocol { status: 406, backend: CloudType::MakeCoe, .. }),
        "unexpected error: {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn identifier_wins_over_name(transport: ScriptedTransport) {
    transport.push_json(
        200,
        &json!({ "clusters": [
            coe_cluster("alpha", "other", "active"),
            coe_cluster("c2", "alpha", "building"),
        ]}),
    );
    let service = service_for(&coe_account(Some("cached")), &transport);

    let cluster = service
        .get_cluster("alpha")
        .await
        .unwrap_or_else(|err| panic!("get should succeed: {err}"));

    assert_eq!(cluster.name, "other");
}

#[rstest]
#[tokio::test]
async fn duplicate_names_are_ambiguous(transport: ScriptedTransport) {
    transport.push_json(
        200,
        &json!({ "clusters": [
            coe_cluster("c1", "alpha", "active"),
            coe_cluster("c2", "alpha", "active"),
        ]}),
    );
    let service = service_for(&coe_account(Some("cached")), &transport);

    let err = service.get_cluster("alpha").await.expect_err("two clusters share the name");

    assert!(
        matches!(err, ClusterError::AmbiguousMatch { kind: ResourceKind::Cluster, .. }),
        "unexpected error: {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn templates_are_fetched_once_per_service(transport: ScriptedTransport) {
    let types = json!({ "cluster_types": [
        { "id": 1, "name": "Kubernetes 1.4.5 on LXC", "coe": "kubernetes", "host_type": "lxc" },
        { "id": 2, "name": "Swarm 1.11.2 on LXC", "coe": "swarm", "host_type": "lxc" },
    ]});
    transport.push_json(200, &types);
    transport.push_json(201, &coe_cluster("c1", "one", "creating"));
    transport.push_json(201, &coe_cluster("c2", "two", "creating"));
    let service = service_for(&coe_account(Some("cached")), &transport);

    for name in ["one", "two"] {
        let request = CreateClusterRequest::new(name, Some(String::from("*kubernetes*")), 1)
            .unwrap_or_else(|err| panic!("request: {err}"));
        service
            .create_cluster(&request)
            .await
            .unwrap_or_else(|err| panic!("create {name}: {err}"));
    }

    let requests = transport.requests();
    let type_lookups = requests
        .iter()
        .filter(|request| request.url.ends_with("/cluster_types"))
        .count();
    assert_eq!(type_lookups, 1);
    let create_body = requests
        .get(1)
        .and_then(|request| request.body.clone())
        .unwrap_or_else(|| panic!("create request should carry a body"));
    assert_eq!(create_body.get("cluster_type_id"), Some(&json!(1)));
}

#[rstest]
#[tokio::test]
async fn make_coe_requires_template(transport: ScriptedTransport) {
    let service = service_for(&coe_account(Some("cached")), &transport);
    let request = CreateClusterRequest::new("alpha", None, 1)
        .unwrap_or_else(|err| panic!("request: {err}"));

    let err = service.create_cluster(&request).await.expect_err("template missing");

    assert!(matches!(err, ClusterError::InvalidRequest(_)), "unexpected error: {err:?}");
    assert!(transport.requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn make_coe_delete_of_missing_cluster_is_synthesized(transport: ScriptedTransport) {
    transport.push_json(200, &json!({ "clusters": [] }));
    let service = service_for(&coe_account(Some("cached")), &transport);

    let cluster = service
        .delete_cluster("ghost")
        .await
        .unwrap_or_else(|err| panic!("delete should succeed: {err}"));

    assert_eq!(cluster.status, "deleted");
    assert_eq!(cluster.name, "ghost");
}

#[rstest]
#[case(CloudType::MakeCoe, "grow", Some("resize"))]
#[case(CloudType::Magnum, "grow", Some("resize"))]
#[case(CloudType::MakeSwarm, "resize", Some("grow"))]
#[tokio::test]
async fn unsupported_operations_name_alternative(
    transport: ScriptedTransport,
    #[case] cloud: CloudType,
    #[case] operation: &str,
    #[case] alternative: Option<&str>,
) {
    let account = match cloud {
        CloudType::MakeCoe => coe_account(Some("cached")),
        CloudType::MakeSwarm => swarm_account(),
        CloudType::Magnum => magnum_account(),
    };
    let service = service_for(&account, &transport);

    let err = if operation == "grow" {
        service.grow_cluster("alpha", 1).await
    } else {
        service.resize_cluster("alpha", 1).await
    }
    .expect_err("operation is unsupported");

    assert_eq!(
        err,
        ClusterError::Unsupported {
            backend: cloud,
            operation: operation.to_owned(),
            alternative: alternative.map(str::to_owned),
        }
    );
    assert!(transport.requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn swarm_quotas_use_escaped_user_path(transport: ScriptedTransport) {
    transport.push_json(200, &json!({ "max_clusters": 3, "max_nodes_per_cluster": 10 }));
    let service = service_for(&swarm_account(), &transport);

    let quotas = service
        .quotas()
        .await
        .unwrap_or_else(|err| panic!("quotas: {err}"));

    assert_eq!(quotas.max_clusters, Some(3));
    assert_eq!(quotas.max_nodes_per_cluster, Some(10));
    let url = transport
        .requests()
        .first()
        .map(|request| request.url.clone())
        .unwrap_or_default();
    assert!(url.ends_with("/quotas/bob%40example.com"), "url: {url}");
}

#[rstest]
#[tokio::test]
async fn swarm_cluster_names_are_single_escaped_segments(transport: ScriptedTransport) {
    transport.push_json(
        200,
        &json!({ "cluster_name": "team a/b", "status": "active", "node_count": 1 }),
    );
    let service = service_for(&swarm_account(), &transport);

    service
        .get_cluster("team a/b")
        .await
        .unwrap_or_else(|err| panic!("get: {err}"));

    let url = transport
        .requests()
        .first()
        .map(|request| request.url.clone())
        .unwrap_or_default();
    assert_eq!(
        url,
        format!(
            "{}/clusters/bob%40example.com/team%20a%2Fb",
            crate::account::MAKE_SWARM_ENDPOINT
        )
    );
}

#[rstest]
#[tokio::test]
async fn swarm_autoscale_uses_put(transport: ScriptedTransport) {
    transport.push_json(
        200,
        &json!({ "cluster_name": "alpha", "status": "active", "node_count": 2, "autoscale": true }),
    );
    let service = service_for(&swarm_account(), &transport);

    let cluster = service
        .set_autoscale("alpha", true)
        .await
        .unwrap_or_else(|err| panic!("autoscale: {err}"));

    assert!(cluster.autoscale);
    let request = transport
        .requests()
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("a request should be recorded"));
    assert_eq!(request.method, Method::Put);
    assert!(request.url.ends_with("/alpha/autoscale/true"), "url: {}", request.url);
}

#[rstest]
#[tokio::test]
async fn bundle_files_are_base64_decoded(transport: ScriptedTransport) {
    transport.push_json(
        200,
        &json!({ "files": {
            "ca.pem": STANDARD.encode("CA"),
            "docker.env": STANDARD.encode("export DOCKER_HOST=tcp://x"),
        }}),
    );
    let service = service_for(&swarm_account(), &transport);

    let bundle = service
        .cluster_credentials("alpha")
        .await
        .unwrap_or_else(|err| panic!("credentials: {err}"));

    assert!(bundle.has_ca_cert());
    assert_eq!(bundle.files.get(CA_CERT_FILE).map(Vec::as_slice), Some(b"CA".as_slice()));
}

#[rstest]
#[tokio::test]
async fn magnum_discovers_endpoint_and_builds_bundle(transport: ScriptedTransport) {
    let catalog = json!({ "token": { "catalog": [{
        "type": "container-infra",
        "endpoints": [{ "interface": "public", "region": "RegionOne", "url": "https://magnum.example/v1" }],
    }]}});
    transport.push_response(
        ApiResponse::new(201, catalog.to_string()).with_header("X-Subject-Token", "ks-token"),
    );
    transport.push_json(
        200,
        &json!({ "clusters": [{ "uuid": "u1", "name": "alpha", "status": "CREATE_COMPLETE" }] }),
    );
    transport.push_json(
        200,
        &json!({
            "uuid": "u1",
            "name": "alpha",
            "status": "CREATE_COMPLETE",
            "node_count": 2,
            "cluster_template_id": "t1",
            "api_address": "tcp://10.0.0.5:2376",
        }),
    );
    transport.push_json(
        200,
        &json!({ "clustertemplates": [{ "uuid": "t1", "name": "swarm", "coe": "swarm" }] }),
    );
    transport.push_json(200, &json!({ "pem": "-----BEGIN CERTIFICATE-----" }));
    let service = service_for(&magnum_account(), &transport);

    let bundle = service
        .cluster_credentials("alpha")
        .await
        .unwrap_or_else(|err| panic!("credentials: {err}"));

    assert!(bundle.has_ca_cert());
    let env = bundle
        .files
        .get(MAGNUM_ENV_FILE)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default();
    assert!(env.contains("CLUSTER_API_ADDRESS=tcp://10.0.0.5:2376"), "env: {env}");
    assert!(env.contains("CLUSTER_COE=swarm"), "env: {env}");

    let requests = transport.requests();
    assert_eq!(
        requests.get(1).map(|request| request.url.as_str()),
        Some("https://magnum.example/v1/clusters")
    );
    assert_eq!(auth_header(&transport, 1).as_deref(), Some("ks-token"));
    let state = service.account_state();
    assert_eq!(state.service_endpoint.as_deref(), Some("https://magnum.example/v1"));
}

#[rstest]
#[tokio::test]
async fn magnum_delete_reports_deleted_when_cluster_vanishes(transport: ScriptedTransport) {
    let mut account = magnum_account();
    account.replace_state(AccountState {
        token: Some(String::from("cached")),
        service_endpoint: Some(String::from("https://magnum.example/v1")),
    });
    transport.push_json(
        200,
        &json!({ "clusters": [{ "uuid": "u1", "name": "alpha", "status": "CREATE_COMPLETE" }] }),
    );
    transport.push_response(ApiResponse::new(204, ""));
    transport.push_response(ApiResponse::new(404, ""));
    let service = service_for(&account, &transport);

    let cluster = service
        .delete_cluster("alpha")
        .await
        .unwrap_or_else(|err| panic!("delete: {err}"));

    assert_eq!(cluster.status, "deleted");
    assert_eq!(cluster.id, "u1");
    assert_eq!(
        transport.requests().get(1).map(|request| request.method),
        Some(Method::Delete)
    );
}
