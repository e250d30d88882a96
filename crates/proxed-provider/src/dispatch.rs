use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use proxed_common::{Provider, ProxyError};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::credential::UpstreamApiKey;

pub type Headers = Vec<(String, String)>;

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// One authenticated upstream call, ready to be issued.
#[derive(Debug)]
pub struct UpstreamCall {
    pub provider: Provider,
    pub api_key: UpstreamApiKey,
    pub body: Value,
    /// Resolved model name; required to build the Google endpoint URL.
    pub model: Option<String>,
    pub stream: bool,
    pub trace_id: String,
}

/// Live upstream response. The stream variant hands back the body channel
/// without buffering; the sender side is pumped by a background task that
/// stops on idle timeout, transport error, or receiver drop.
#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, call: UpstreamCall) -> Result<UpstreamResponse, ProxyError>;
}

#[derive(Debug, Clone)]
pub struct WreqDispatcherConfig {
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub google_base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for WreqDispatcherConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com".to_string(),
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            google_base_url: "https://generativelanguage.googleapis.com".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(600),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_ERROR_BODY_CHARS: usize = 2_000;

pub struct WreqDispatcher {
    config: WreqDispatcherConfig,
    client: wreq::Client,
}

impl WreqDispatcher {
    pub fn new(config: WreqDispatcherConfig) -> Result<Self, ProxyError> {
        let client = wreq::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()
            .map_err(|err| ProxyError::internal(err.to_string()))?;
        Ok(Self { config, client })
    }

    fn endpoint_url(&self, call: &UpstreamCall) -> Result<String, ProxyError> {
        let url = match call.provider {
            Provider::OpenAi => format!("{}/v1/chat/completions", self.config.openai_base_url),
            Provider::Anthropic => format!("{}/v1/messages", self.config.anthropic_base_url),
            Provider::Google => {
                let model = call
                    .model
                    .as_deref()
                    .filter(|model| !model.is_empty())
                    .ok_or_else(|| ProxyError::validation("model is required"))?;
                if call.stream {
                    format!(
                        "{}/v1beta/models/{model}:streamGenerateContent?alt=sse",
                        self.config.google_base_url
                    )
                } else {
                    format!(
                        "{}/v1beta/models/{model}:generateContent",
                        self.config.google_base_url
                    )
                }
            }
        };
        Ok(url)
    }

    fn auth_headers(call: &UpstreamCall) -> Headers {
        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        match call.provider {
            Provider::OpenAi => headers.push((
                "authorization".to_string(),
                format!("Bearer {}", call.api_key.expose()),
            )),
            Provider::Anthropic => {
                headers.push(("x-api-key".to_string(), call.api_key.expose().to_string()));
                headers.push((
                    "anthropic-version".to_string(),
                    ANTHROPIC_VERSION.to_string(),
                ));
            }
            Provider::Google => headers.push((
                "x-goog-api-key".to_string(),
                call.api_key.expose().to_string(),
            )),
        }
        headers
    }
}

#[async_trait]
impl Dispatcher for WreqDispatcher {
    async fn dispatch(&self, call: UpstreamCall) -> Result<UpstreamResponse, ProxyError> {
        let url = self.endpoint_url(&call)?;
        let body = serde_json::to_vec(&call.body)
            .map_err(|err| ProxyError::internal(err.to_string()))?;

        let mut builder = self.client.post(&url);
        for (key, value) in Self::auth_headers(&call) {
            builder = builder.header(key, value);
        }

        info!(
            event = "upstream_request",
            trace_id = %call.trace_id,
            provider = %call.provider,
            url = %url,
            is_stream = call.stream
        );
        let started_at = Instant::now();

        let response = builder.body(body).send().await.map_err(|err| {
            warn!(
                event = "upstream_response",
                trace_id = %call.trace_id,
                provider = %call.provider,
                status = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err
            );
            ProxyError::upstream(None, err.to_string())
        })?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        info!(
            event = "upstream_response",
            trace_id = %call.trace_id,
            provider = %call.provider,
            status = status,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            is_stream = call.stream
        );

        if !(200..300).contains(&status) {
            let body = response
                .bytes()
                .await
                .map_err(|err| ProxyError::upstream(Some(status), err.to_string()))?;
            let message: String = String::from_utf8_lossy(&body)
                .chars()
                .take(MAX_ERROR_BODY_CHARS)
                .collect();
            return Err(ProxyError::upstream(Some(status), message));
        }

        if !call.stream {
            let body = response
                .bytes()
                .await
                .map_err(|err| ProxyError::upstream(Some(status), err.to_string()))?;
            return Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Bytes(body),
            });
        }

        let idle_timeout = self.config.stream_idle_timeout;
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle_timeout, stream.next()).await;
                let item = match next {
                    Ok(item) => item,
                    Err(_) => break,
                };
                let Some(item) = item else {
                    break;
                };
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(_) => break,
                };
                if tx.send(chunk).await.is_err() {
                    // Receiver dropped: the caller went away, stop pulling
                    // from upstream so the connection is released.
                    break;
                }
            }
        });

        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Stream(rx),
        })
    }
}

fn collect_headers(map: &wreq::header::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (key, value) in map {
        if let Ok(text) = value.to_str() {
            out.push((key.as_str().to_string(), text.to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::assemble_key;

    fn call(provider: Provider, stream: bool) -> UpstreamCall {
        UpstreamCall {
            provider,
            api_key: assemble_key("sk-part", Some("rest")).unwrap(),
            body: serde_json::json!({}),
            model: Some("gemini-2.0-flash".to_string()),
            stream,
            trace_id: "t".to_string(),
        }
    }

    #[test]
    fn endpoint_urls_per_provider() {
        let dispatcher = WreqDispatcher::new(WreqDispatcherConfig::default()).unwrap();
        assert_eq!(
            dispatcher.endpoint_url(&call(Provider::OpenAi, false)).unwrap(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            dispatcher
                .endpoint_url(&call(Provider::Anthropic, true))
                .unwrap(),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            dispatcher.endpoint_url(&call(Provider::Google, true)).unwrap(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );
        assert_eq!(
            dispatcher
                .endpoint_url(&call(Provider::Google, false))
                .unwrap(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn google_without_model_is_rejected() {
        let dispatcher = WreqDispatcher::new(WreqDispatcherConfig::default()).unwrap();
        let mut bad = call(Provider::Google, true);
        bad.model = None;
        assert!(dispatcher.endpoint_url(&bad).is_err());
    }

    #[test]
    fn auth_headers_per_provider() {
        let openai = WreqDispatcher::auth_headers(&call(Provider::OpenAi, false));
        assert_eq!(header_get(&openai, "authorization"), Some("Bearer sk-partrest"));

        let anthropic = WreqDispatcher::auth_headers(&call(Provider::Anthropic, false));
        assert_eq!(header_get(&anthropic, "x-api-key"), Some("sk-partrest"));
        assert_eq!(
            header_get(&anthropic, "anthropic-version"),
            Some("2023-06-01")
        );

        let google = WreqDispatcher::auth_headers(&call(Provider::Google, false));
        assert_eq!(header_get(&google, "x-goog-api-key"), Some("sk-partrest"));
    }
}
