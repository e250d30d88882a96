use std::fmt;

use proxed_common::ProxyError;

/// A fully assembled upstream API key.
///
/// Exists only in memory for the duration of one request. `Debug` and
/// `Display` are redacted so the key can never leak through logging.
#[derive(Clone)]
pub struct UpstreamApiKey(String);

impl UpstreamApiKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UpstreamApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UpstreamApiKey(redacted)")
    }
}

impl fmt::Display for UpstreamApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

/// Combines the client-held fragment with the server-held fragment into the
/// full upstream key. The client fragment leads; the server fragment is the
/// stored remainder.
pub fn assemble_key(
    client_fragment: &str,
    server_fragment: Option<&str>,
) -> Result<UpstreamApiKey, ProxyError> {
    let server_fragment = server_fragment
        .filter(|fragment| !fragment.is_empty())
        .ok_or_else(|| {
            ProxyError::credential_unavailable("server key fragment is not available")
        })?;
    Ok(UpstreamApiKey(format!("{client_fragment}{server_fragment}")))
}
