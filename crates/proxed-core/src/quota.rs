use proxed_common::ProxyError;
use tracing::warn;

use crate::stores::TeamMetricsStore;

/// Checks the team's usage counters before any upstream call is made.
///
/// A canceled plan, or usage at or over a configured limit, rejects with
/// QUOTA_EXCEEDED. A `None` limit is unbounded. On allow, the counter bump
/// is best-effort: a failed increment is logged and the request proceeds.
pub async fn enforce_quota(
    metrics: &dyn TeamMetricsStore,
    team_id: &str,
) -> Result<(), ProxyError> {
    let limits = metrics
        .get_team_limits_metrics(team_id)
        .await
        .map_err(|err| ProxyError::internal(err.to_string()))?;

    if limits.is_canceled {
        return Err(ProxyError::quota_exceeded("subscription is canceled"));
    }
    if let Some(limit) = limits.api_calls_limit {
        if limits.api_calls_used >= limit {
            return Err(ProxyError::quota_exceeded("team api call limit reached"));
        }
    }

    if let Err(err) = metrics.increment_api_calls(team_id).await {
        warn!(event = "quota_increment_failed", team_id = %team_id, error = %err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTeamMetrics;
    use crate::stores::TeamLimits;
    use proxed_common::ErrorCode;

    #[tokio::test]
    async fn under_limit_passes_and_increments() {
        let metrics = MemoryTeamMetrics::default();
        metrics.set_limits(
            "team-1",
            TeamLimits {
                api_calls_used: 3,
                api_calls_limit: Some(5),
                is_canceled: false,
            },
        );
        enforce_quota(&metrics, "team-1").await.unwrap();
        assert_eq!(metrics.calls_used("team-1"), 4);
    }

    #[tokio::test]
    async fn at_limit_is_rejected_without_increment() {
        let metrics = MemoryTeamMetrics::default();
        metrics.set_limits(
            "team-1",
            TeamLimits {
                api_calls_used: 5,
                api_calls_limit: Some(5),
                is_canceled: false,
            },
        );
        let err = enforce_quota(&metrics, "team-1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::QuotaExceeded);
        assert_eq!(metrics.calls_used("team-1"), 5);
    }

    #[tokio::test]
    async fn canceled_plan_is_rejected() {
        let metrics = MemoryTeamMetrics::default();
        metrics.set_limits(
            "team-1",
            TeamLimits {
                api_calls_used: 0,
                api_calls_limit: Some(100),
                is_canceled: true,
            },
        );
        let err = enforce_quota(&metrics, "team-1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::QuotaExceeded);
    }

    #[tokio::test]
    async fn unbounded_limit_always_passes() {
        let metrics = MemoryTeamMetrics::default();
        metrics.set_limits(
            "team-1",
            TeamLimits {
                api_calls_used: 1_000_000,
                api_calls_limit: None,
                is_canceled: false,
            },
        );
        enforce_quota(&metrics, "team-1").await.unwrap();
    }
}
