use async_trait::async_trait;
use proxed_common::Provider;
use thiserror::Error;

use crate::record::ExecutionRecord;

/// Failure inside an external store round-trip. Mapped to INTERNAL_ERROR at
/// the pipeline boundary unless the call is best-effort.
#[derive(Debug, Clone, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// Read-only view of a project, owned by the excluded CRUD surface.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub team_id: String,
    pub active: bool,
    pub test_mode: bool,
    /// Opaque value compared against `x-proxed-test-key`; only meaningful
    /// when `test_mode` is set.
    pub test_key: Option<String>,
    pub device_check_id: Option<String>,
}

/// A provider key row. Holds only the server-side fragment reference; the
/// full upstream key never exists at rest.
#[derive(Debug, Clone)]
pub struct ProviderKeyRecord {
    pub id: String,
    pub provider: Provider,
    pub display_name: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct ProjectWithProvider {
    pub project: Project,
    pub key: ProviderKeyRecord,
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Resolves an active project together with its assigned provider key.
    async fn get_active_project_with_provider(
        &self,
        project_id: &str,
    ) -> Result<Option<ProjectWithProvider>, StoreError>;

    /// Fetches the server-held key fragment for a provider key row.
    async fn get_server_key(&self, provider_key_id: &str) -> Result<Option<String>, StoreError>;
}

/// Device-attestation verification, an external collaborator call.
#[async_trait]
pub trait DeviceVerifier: Send + Sync {
    async fn verify(
        &self,
        token: &str,
        device_check_id: Option<&str>,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamLimits {
    pub api_calls_used: i64,
    /// `None` means unbounded.
    pub api_calls_limit: Option<i64>,
    pub is_canceled: bool,
}

#[async_trait]
pub trait TeamMetricsStore: Send + Sync {
    async fn get_team_limits_metrics(&self, team_id: &str) -> Result<TeamLimits, StoreError>;

    /// Best-effort counter bump; the caller logs and proceeds on failure.
    async fn increment_api_calls(&self, team_id: &str) -> Result<(), StoreError>;
}

/// Terminal persistence boundary for finished execution records.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn create_execution(&self, record: ExecutionRecord) -> Result<String, StoreError>;
}
