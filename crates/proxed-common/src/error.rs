use thiserror::Error;

/// Stable error codes exposed in the JSON error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    AuthError,
    NotFound,
    QuotaExceeded,
    CredentialUnavailable,
    UpstreamError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::CredentialUnavailable => "CREDENTIAL_UNAVAILABLE",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    fn default_status(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 400,
            ErrorCode::AuthError => 401,
            ErrorCode::NotFound => 404,
            ErrorCode::QuotaExceeded => 429,
            ErrorCode::CredentialUnavailable => 500,
            ErrorCode::UpstreamError => 502,
            ErrorCode::InternalError => 500,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{}: {message}", code.as_str())]
pub struct ProxyError {
    pub code: ErrorCode,
    pub message: String,
    /// Status returned by the upstream provider, when one was observed.
    pub upstream_status: Option<u16>,
}

impl ProxyError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            upstream_status: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QuotaExceeded, message)
    }

    pub fn credential_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CredentialUnavailable, message)
    }

    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::UpstreamError,
            message: message.into(),
            upstream_status: status,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// HTTP status to answer with: the preserved upstream status when there
    /// is one, otherwise the code's default.
    pub fn http_status(&self) -> u16 {
        self.upstream_status.unwrap_or(self.code.default_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_is_preserved() {
        let err = ProxyError::upstream(Some(503), "provider unavailable");
        assert_eq!(err.http_status(), 503);
        assert_eq!(err.code.as_str(), "UPSTREAM_ERROR");
    }

    #[test]
    fn upstream_without_status_defaults_to_502() {
        let err = ProxyError::upstream(None, "connection refused");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn taxonomy_status_mapping() {
        assert_eq!(ProxyError::validation("x").http_status(), 400);
        assert_eq!(ProxyError::auth("x").http_status(), 401);
        assert_eq!(ProxyError::not_found("x").http_status(), 404);
        assert_eq!(ProxyError::quota_exceeded("x").http_status(), 429);
        assert_eq!(ProxyError::credential_unavailable("x").http_status(), 500);
        assert_eq!(ProxyError::internal("x").http_status(), 500);
    }
}
