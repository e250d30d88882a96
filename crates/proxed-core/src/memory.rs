//! In-memory collaborator implementations, used by the binary's bootstrap
//! and by the deterministic test suites.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::record::ExecutionRecord;
use crate::stores::{
    DeviceVerifier, ExecutionSink, ProjectStore, ProjectWithProvider, StoreError, TeamLimits,
    TeamMetricsStore,
};

#[derive(Debug, Default)]
pub struct MemoryProjectStore {
    projects: Mutex<HashMap<String, ProjectWithProvider>>,
    server_keys: Mutex<HashMap<String, String>>,
}

impl MemoryProjectStore {
    pub fn insert_project(&self, entry: ProjectWithProvider) {
        self.projects
            .lock()
            .expect("project store poisoned")
            .insert(entry.project.id.clone(), entry);
    }

    pub fn insert_server_key(&self, key_id: &str, fragment: &str) {
        self.server_keys
            .lock()
            .expect("server key store poisoned")
            .insert(key_id.to_string(), fragment.to_string());
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get_active_project_with_provider(
        &self,
        project_id: &str,
    ) -> Result<Option<ProjectWithProvider>, StoreError> {
        let guard = self
            .projects
            .lock()
            .map_err(|_| StoreError("project store lock failed".to_string()))?;
        Ok(guard
            .get(project_id)
            .filter(|entry| entry.project.active)
            .cloned())
    }

    async fn get_server_key(&self, provider_key_id: &str) -> Result<Option<String>, StoreError> {
        let guard = self
            .server_keys
            .lock()
            .map_err(|_| StoreError("server key store lock failed".to_string()))?;
        Ok(guard.get(provider_key_id).cloned())
    }
}

/// Verifier that always accepts or always rejects; attestation against a
/// real device-check backend lives behind the same trait in production.
#[derive(Debug, Clone, Copy)]
pub struct StaticDeviceVerifier {
    accept: bool,
}

impl StaticDeviceVerifier {
    pub fn accepting() -> Self {
        Self { accept: true }
    }

    pub fn rejecting() -> Self {
        Self { accept: false }
    }
}

#[async_trait]
impl DeviceVerifier for StaticDeviceVerifier {
    async fn verify(
        &self,
        _token: &str,
        _device_check_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(self.accept)
    }
}

#[derive(Debug, Default)]
pub struct MemoryTeamMetrics {
    limits: Mutex<HashMap<String, TeamLimits>>,
}

impl MemoryTeamMetrics {
    pub fn set_limits(&self, team_id: &str, limits: TeamLimits) {
        self.limits
            .lock()
            .expect("team metrics poisoned")
            .insert(team_id.to_string(), limits);
    }

    pub fn calls_used(&self, team_id: &str) -> i64 {
        self.limits
            .lock()
            .expect("team metrics poisoned")
            .get(team_id)
            .map(|limits| limits.api_calls_used)
            .unwrap_or_default()
    }
}

#[async_trait]
impl TeamMetricsStore for MemoryTeamMetrics {
    async fn get_team_limits_metrics(&self, team_id: &str) -> Result<TeamLimits, StoreError> {
        let guard = self
            .limits
            .lock()
            .map_err(|_| StoreError("team metrics lock failed".to_string()))?;
        Ok(guard.get(team_id).copied().unwrap_or(TeamLimits {
            api_calls_used: 0,
            api_calls_limit: None,
            is_canceled: false,
        }))
    }

    async fn increment_api_calls(&self, team_id: &str) -> Result<(), StoreError> {
        let mut guard = self
            .limits
            .lock()
            .map_err(|_| StoreError("team metrics lock failed".to_string()))?;
        let entry = guard.entry(team_id.to_string()).or_insert(TeamLimits {
            api_calls_used: 0,
            api_calls_limit: None,
            is_canceled: false,
        });
        entry.api_calls_used += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryExecutionSink {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl MemoryExecutionSink {
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .expect("execution sink poisoned")
            .clone()
    }
}

#[async_trait]
impl ExecutionSink for MemoryExecutionSink {
    async fn create_execution(&self, record: ExecutionRecord) -> Result<String, StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StoreError("execution sink lock failed".to_string()))?;
        guard.push(record);
        Ok(format!("exec-{}", guard.len()))
    }
}
