//! Polling loops that wait for a cluster to settle.

use std::time::{Duration, Instant};

use tokio::time::sleep;

use crate::cluster::{Cluster, STATUS_ACTIVE, STATUS_DELETED, STATUS_ERROR};
use crate::error::ClusterError;
use crate::service::ClusterService;

/// Default delay between polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Polls `get_cluster` every `interval` until the cluster reports `active` or
/// `error`.
///
/// Both terminal states are returned as `Ok`; callers inspect the status. A
/// cluster that is already terminal is returned without a fetch.
///
/// # Errors
///
/// Propagates fetch errors and returns [`ClusterError::Timeout`] once the
/// deadline passes.
pub async fn until_active<S>(
    service: &S,
    cluster: Cluster,
    interval: Duration,
    deadline: Instant,
) -> Result<Cluster, ClusterError>
where
    S: ClusterService + ?Sized,
{
    let mut current = cluster;
    loop {
        if current.status_is(STATUS_ACTIVE) || current.status_is(STATUS_ERROR) {
            return Ok(current);
        }
        pause(interval, deadline, "become active", &current).await?;
        current = service.get_cluster(current.token()).await?;
        tracing::debug!(cluster = %current.name, status = %current.status, "polled cluster");
    }
}

/// Polls `get_cluster` until the cluster is gone.
///
/// A fetch that reports the cluster as missing counts as deleted.
///
/// # Errors
///
/// Returns [`ClusterError::DeletionFailed`] when the backend reports `error`,
/// [`ClusterError::Timeout`] once the deadline passes, and propagates any
/// other fetch error.
pub async fn until_deleted<S>(
    service: &S,
    cluster: Cluster,
    interval: Duration,
    deadline: Instant,
) -> Result<Cluster, ClusterError>
where
    S: ClusterService + ?Sized,
{
    let mut current = cluster;
    loop {
        if current.status_is(STATUS_DELETED) {
            return Ok(current);
        }
        if current.status_is(STATUS_ERROR) {
            return Err(ClusterError::DeletionFailed {
                cluster: current.name,
            });
        }
        pause(interval, deadline, "be deleted", &current).await?;
        current = match service.get_cluster(current.token()).await {
            Ok(next) => next,
            Err(err) if err.is_not_found() => Cluster {
                status: STATUS_DELETED.to_owned(),
                ..current
            },
            Err(err) => return Err(err),
        };
        tracing::debug!(cluster = %current.name, status = %current.status, "polled cluster");
    }
}

async fn pause(
    interval: Duration,
    deadline: Instant,
    action: &str,
    cluster: &Cluster,
) -> Result<(), ClusterError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(ClusterError::Timeout {
            action: action.to_owned(),
            cluster: cluster.name.clone(),
        });
    }
    sleep(interval.min(remaining)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::CloudType;
    use crate::error::ResourceKind;
    use crate::test_support::{
        Operation, SCRIPTED_POLL_INTERVAL as TICK, ScriptedService, cluster_with_status,
    };
    use rstest::{fixture, rstest};

    #[fixture]
    fn service() -> ScriptedService {
        ScriptedService::new(CloudType::MakeCoe)
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[rstest]
    #[case("active")]
    #[case("ERROR")]
    #[tokio::test]
    async fn settled_cluster_is_returned_without_fetching(
        service: ScriptedService,
        #[case] status: &str,
    ) {
        let cluster = cluster_with_status("alpha", status);
        let result = until_active(&service, cluster.clone(), TICK, later())
            .await
            .unwrap_or_else(|err| panic!("wait should succeed: {err}"));
        assert_eq!(result, cluster);
        assert_eq!(service.call_count(Operation::Get), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn building_cluster_is_refetched_until_active(service: ScriptedService) {
        service.push_cluster(Operation::Get, Ok(cluster_with_status("alpha", "building")));
        service.push_cluster(Operation::Get, Ok(cluster_with_status("alpha", "active")));

        let result = until_active(
            &service,
            cluster_with_status("alpha", "building"),
            TICK,
            later(),
        )
        .await
        .unwrap_or_else(|err| panic!("wait should succeed: {err}"));

        assert!(result.status_is(STATUS_ACTIVE));
        assert_eq!(service.call_count(Operation::Get), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn passing_deadline_times_out(service: ScriptedService) {
        let err = until_active(
            &service,
            cluster_with_status("alpha", "building"),
            TICK,
            Instant::now(),
        )
        .await
        .expect_err("deadline already passed");
        assert!(
            matches!(err, ClusterError::Timeout { ref cluster, .. } if cluster == "alpha"),
            "unexpected error: {err:?}"
        );
        assert_eq!(service.call_count(Operation::Get), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn missing_cluster_counts_as_deleted(service: ScriptedService) {
        service.push_cluster(
            Operation::Get,
            Err(ClusterError::NotFound {
                kind: ResourceKind::Cluster,
                token: String::from("alpha"),
            }),
        );

        let result = until_deleted(
            &service,
            cluster_with_status("alpha", "deleting"),
            TICK,
            later(),
        )
        .await
        .unwrap_or_else(|err| panic!("wait should succeed: {err}"));

        assert!(result.status_is(STATUS_DELETED));
        assert_eq!(result.name, "alpha");
    }

    #[rstest]
    #[tokio::test]
    async fn error_status_fails_deletion(service: ScriptedService) {
        service.push_cluster(Operation::Get, Ok(cluster_with_status("alpha", "error")));

        let err = until_deleted(
            &service,
            cluster_with_status("alpha", "deleting"),
            TICK,
            later(),
        )
        .await
        .expect_err("error status should fail");

        assert_eq!(
            err,
            ClusterError::DeletionFailed {
                cluster: String::from("alpha"),
            }
        );
    }

    #[rstest]
    #[tokio::test]
    async fn other_fetch_errors_propagate(service: ScriptedService) {
        let failure = ClusterError::Api {
            action: String::from("get cluster"),
            status: 500,
            message: String::from("boom"),
        };
        service.push_cluster(Operation::Get, Err(failure.clone()));

        let err = until_deleted(
            &service,
            cluster_with_status("alpha", "deleting"),
            TICK,
            later(),
        )
        .await
        .expect_err("fetch failure should propagate");

        assert_eq!(err, failure);
    }
}
