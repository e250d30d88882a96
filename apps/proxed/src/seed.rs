use std::error::Error;

use proxed_common::Provider;
use proxed_core::{
    MemoryProjectStore, MemoryTeamMetrics, Project, ProjectWithProvider, ProviderKeyRecord,
    TeamLimits,
};
use serde::Deserialize;
use tracing::info;

/// On-disk bootstrap data for the in-memory stores. Production deployments
/// replace the stores wholesale; the seed file exists for local runs and
/// integration environments.
#[derive(Debug, Deserialize)]
pub(crate) struct SeedConfig {
    #[serde(default)]
    pub(crate) projects: Vec<SeedProject>,
    #[serde(default)]
    pub(crate) teams: Vec<SeedTeam>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SeedProject {
    pub(crate) id: String,
    pub(crate) team_id: String,
    #[serde(default)]
    pub(crate) test_mode: bool,
    #[serde(default)]
    pub(crate) test_key: Option<String>,
    #[serde(default)]
    pub(crate) device_check_id: Option<String>,
    pub(crate) provider: Provider,
    pub(crate) key_id: String,
    #[serde(default)]
    pub(crate) key_display_name: String,
    pub(crate) server_key_fragment: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SeedTeam {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) api_calls_used: i64,
    #[serde(default)]
    pub(crate) api_calls_limit: Option<i64>,
    #[serde(default)]
    pub(crate) is_canceled: bool,
}

pub(crate) fn load_seed(path: &str) -> Result<SeedConfig, Box<dyn Error + Send + Sync>> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

pub(crate) fn apply_seed(
    seed: SeedConfig,
    projects: &MemoryProjectStore,
    metrics: &MemoryTeamMetrics,
) {
    let project_count = seed.projects.len();
    for entry in seed.projects {
        projects.insert_server_key(&entry.key_id, &entry.server_key_fragment);
        projects.insert_project(ProjectWithProvider {
            project: Project {
                id: entry.id,
                team_id: entry.team_id,
                active: true,
                test_mode: entry.test_mode,
                test_key: entry.test_key,
                device_check_id: entry.device_check_id,
            },
            key: ProviderKeyRecord {
                id: entry.key_id,
                provider: entry.provider,
                display_name: entry.key_display_name,
                active: true,
            },
        });
    }
    let team_count = seed.teams.len();
    for team in seed.teams {
        metrics.set_limits(
            &team.id,
            TeamLimits {
                api_calls_used: team.api_calls_used,
                api_calls_limit: team.api_calls_limit,
                is_canceled: team.is_canceled,
            },
        );
    }
    info!(projects = project_count, teams = team_count, "seed applied");
}
