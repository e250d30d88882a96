use proxed_common::{ProxyError, parse_combined_token};
use proxed_provider::{UpstreamApiKey, assemble_key};
use tracing::debug;

use crate::stores::{DeviceVerifier, Project, ProjectStore, ProviderKeyRecord};

/// Credential material extracted from the inbound request.
#[derive(Debug, Clone, Default)]
pub struct AuthInputs<'a> {
    pub project_id: &'a str,
    /// `x-proxed-test-key` header.
    pub test_key: Option<&'a str>,
    /// `x-ai-key` header: the combined `<fragment>.<token>` credential.
    pub ai_key: Option<&'a str>,
    /// `x-device-token` header, used when the combined token carries none.
    pub device_token: Option<&'a str>,
}

/// A request that passed authentication: the resolved project, the chosen
/// provider key and the fully assembled upstream credential.
#[derive(Debug)]
pub struct AuthenticatedCall {
    pub project: Project,
    pub key: ProviderKeyRecord,
    pub api_key: UpstreamApiKey,
    pub test_mode_used: bool,
}

/// Resolves and verifies the caller.
///
/// Test-mode bypass: a project with test mode enabled accepts a matching
/// `x-proxed-test-key` in place of device attestation. Otherwise the device
/// token recovered from the combined credential (or the dedicated header)
/// must pass verification.
pub async fn authenticate(
    projects: &dyn ProjectStore,
    devices: &dyn DeviceVerifier,
    inputs: AuthInputs<'_>,
) -> Result<AuthenticatedCall, ProxyError> {
    if inputs.project_id.is_empty() {
        return Err(ProxyError::validation("project id is required"));
    }

    let resolved = projects
        .get_active_project_with_provider(inputs.project_id)
        .await
        .map_err(|err| ProxyError::internal(err.to_string()))?
        .ok_or_else(|| ProxyError::not_found("unknown or inactive project"))?;
    let project = resolved.project;
    let key = resolved.key;

    let ai_key = inputs
        .ai_key
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ProxyError::validation("missing x-ai-key header"))?;
    let combined = parse_combined_token(ai_key);
    if combined.api_key_fragment.is_empty() {
        return Err(ProxyError::validation("malformed combined credential"));
    }

    let test_mode_used = project.test_mode
        && matches!(
            (&project.test_key, inputs.test_key),
            (Some(expected), Some(given)) if expected == given
        );

    if !test_mode_used {
        let token = combined
            .token
            .as_deref()
            .or(inputs.device_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ProxyError::validation("missing device token"))?;
        let verified = devices
            .verify(token, project.device_check_id.as_deref())
            .await
            .map_err(|err| ProxyError::internal(err.to_string()))?;
        if !verified {
            debug!(event = "device_verification_failed", project_id = %project.id);
            return Err(ProxyError::auth("device verification failed"));
        }
    }

    if !key.active {
        return Err(ProxyError::credential_unavailable(
            "assigned provider key is inactive",
        ));
    }
    let server_fragment = projects
        .get_server_key(&key.id)
        .await
        .map_err(|err| ProxyError::internal(err.to_string()))?;
    let api_key = assemble_key(&combined.api_key_fragment, server_fragment.as_deref())?;

    Ok(AuthenticatedCall {
        project,
        key,
        api_key,
        test_mode_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryProjectStore, StaticDeviceVerifier};
    use crate::stores::{ProjectWithProvider, ProviderKeyRecord};
    use proxed_common::{ErrorCode, Provider};

    fn store(test_mode: bool, key_active: bool) -> MemoryProjectStore {
        let store = MemoryProjectStore::default();
        store.insert_project(ProjectWithProvider {
            project: Project {
                id: "proj-1".to_string(),
                team_id: "team-1".to_string(),
                active: true,
                test_mode,
                test_key: test_mode.then(|| "test-secret".to_string()),
                device_check_id: Some("dc-1".to_string()),
            },
            key: ProviderKeyRecord {
                id: "key-1".to_string(),
                provider: Provider::OpenAi,
                display_name: "OpenAI production".to_string(),
                active: key_active,
            },
        });
        store.insert_server_key("key-1", "remainder");
        store
    }

    #[tokio::test]
    async fn device_path_succeeds_and_assembles_key() {
        let projects = store(false, true);
        let devices = StaticDeviceVerifier::accepting();
        let out = authenticate(
            &projects,
            &devices,
            AuthInputs {
                project_id: "proj-1",
                test_key: None,
                ai_key: Some("sk-part.device-token"),
                device_token: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(out.api_key.expose(), "sk-partremainder");
        assert!(!out.test_mode_used);
    }

    #[tokio::test]
    async fn test_mode_bypasses_device_verification() {
        let projects = store(true, true);
        // A rejecting verifier proves the bypass is taken.
        let devices = StaticDeviceVerifier::rejecting();
        let out = authenticate(
            &projects,
            &devices,
            AuthInputs {
                project_id: "proj-1",
                test_key: Some("test-secret"),
                ai_key: Some("sk-part"),
                device_token: None,
            },
        )
        .await
        .unwrap();
        assert!(out.test_mode_used);
    }

    #[tokio::test]
    async fn wrong_test_key_still_requires_device_token() {
        let projects = store(true, true);
        let devices = StaticDeviceVerifier::rejecting();
        let err = authenticate(
            &projects,
            &devices,
            AuthInputs {
                project_id: "proj-1",
                test_key: Some("wrong"),
                ai_key: Some("sk-part.tok"),
                device_token: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthError);
    }

    #[tokio::test]
    async fn missing_token_is_a_validation_error() {
        let projects = store(false, true);
        let devices = StaticDeviceVerifier::accepting();
        let err = authenticate(
            &projects,
            &devices,
            AuthInputs {
                project_id: "proj-1",
                test_key: None,
                ai_key: Some("sk-part"),
                device_token: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn dedicated_device_token_header_is_accepted() {
        let projects = store(false, true);
        let devices = StaticDeviceVerifier::accepting();
        let out = authenticate(
            &projects,
            &devices,
            AuthInputs {
                project_id: "proj-1",
                test_key: None,
                ai_key: Some("sk-part"),
                device_token: Some("tok"),
            },
        )
        .await
        .unwrap();
        assert_eq!(out.api_key.expose(), "sk-partremainder");
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let projects = MemoryProjectStore::default();
        let devices = StaticDeviceVerifier::accepting();
        let err = authenticate(
            &projects,
            &devices,
            AuthInputs {
                project_id: "missing",
                test_key: None,
                ai_key: Some("sk-part.tok"),
                device_token: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn inactive_key_is_credential_unavailable() {
        let projects = store(false, false);
        let devices = StaticDeviceVerifier::accepting();
        let err = authenticate(
            &projects,
            &devices,
            AuthInputs {
                project_id: "proj-1",
                test_key: None,
                ai_key: Some("sk-part.tok"),
                device_token: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::CredentialUnavailable);
    }
}
