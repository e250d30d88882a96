use proxed_common::{Provider, ProxyError};
use serde::Deserialize;
use serde_json::{Value, json};

/// Which shared endpoint the structured request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredKind {
    Text,
    Vision,
    Pdf,
}

/// Body accepted by the shared `/v1/text`, `/v1/vision` and `/v1/pdf`
/// endpoints, normalized into the assigned provider's native chat shape
/// before dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct StructuredRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base64 image payload for `/v1/vision`.
    #[serde(default)]
    pub image: Option<String>,
    /// Base64 PDF payload for `/v1/pdf`.
    #[serde(default)]
    pub pdf: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
}

const DEFAULT_ANTHROPIC_MAX_TOKENS: u32 = 1024;

fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "gpt-4o-mini",
        Provider::Anthropic => "claude-3-5-haiku-latest",
        Provider::Google => "gemini-2.0-flash",
    }
}

/// The model a structured request will run against once defaults apply.
pub fn resolved_model(provider: Provider, request: &StructuredRequest) -> String {
    request
        .model
        .clone()
        .unwrap_or_else(|| default_model(provider).to_string())
}

/// Builds the provider-native request body for a structured call.
pub fn structured_to_native(
    provider: Provider,
    kind: StructuredKind,
    request: &StructuredRequest,
) -> Result<Value, ProxyError> {
    match kind {
        StructuredKind::Vision if request.image.is_none() => {
            return Err(ProxyError::validation("vision request requires an image"));
        }
        StructuredKind::Pdf if request.pdf.is_none() => {
            return Err(ProxyError::validation("pdf request requires a document"));
        }
        _ => {}
    }

    let model = request
        .model
        .clone()
        .unwrap_or_else(|| default_model(provider).to_string());

    let body = match provider {
        Provider::OpenAi => openai_body(kind, request, &model)?,
        Provider::Anthropic => anthropic_body(kind, request, &model),
        Provider::Google => google_body(kind, request),
    };
    Ok(body)
}

fn openai_body(
    kind: StructuredKind,
    request: &StructuredRequest,
    model: &str,
) -> Result<Value, ProxyError> {
    let content = match kind {
        StructuredKind::Text => json!(request.prompt),
        StructuredKind::Vision => {
            let image = request.image.as_deref().unwrap_or_default();
            json!([
                { "type": "text", "text": request.prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/jpeg;base64,{image}") }
                }
            ])
        }
        // OpenAI chat completions have no document content block.
        StructuredKind::Pdf => {
            return Err(ProxyError::validation(
                "pdf requests are not supported for openai projects",
            ));
        }
    };

    let mut body = json!({
        "model": model,
        "messages": [{ "role": "user", "content": content }],
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if request.stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }
    Ok(body)
}

fn anthropic_body(kind: StructuredKind, request: &StructuredRequest, model: &str) -> Value {
    let mut blocks = Vec::new();
    match kind {
        StructuredKind::Vision => blocks.push(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": "image/jpeg",
                "data": request.image.as_deref().unwrap_or_default(),
            }
        })),
        StructuredKind::Pdf => blocks.push(json!({
            "type": "document",
            "source": {
                "type": "base64",
                "media_type": "application/pdf",
                "data": request.pdf.as_deref().unwrap_or_default(),
            }
        })),
        StructuredKind::Text => {}
    }
    blocks.push(json!({ "type": "text", "text": request.prompt }));

    let mut body = json!({
        "model": model,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_ANTHROPIC_MAX_TOKENS),
        "messages": [{ "role": "user", "content": blocks }],
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if request.stream {
        body["stream"] = json!(true);
    }
    body
}

fn google_body(kind: StructuredKind, request: &StructuredRequest) -> Value {
    let mut parts = Vec::new();
    match kind {
        StructuredKind::Vision => parts.push(json!({
            "inline_data": {
                "mime_type": "image/jpeg",
                "data": request.image.as_deref().unwrap_or_default(),
            }
        })),
        StructuredKind::Pdf => parts.push(json!({
            "inline_data": {
                "mime_type": "application/pdf",
                "data": request.pdf.as_deref().unwrap_or_default(),
            }
        })),
        StructuredKind::Text => {}
    }
    parts.push(json!({ "text": request.prompt }));

    let mut body = json!({
        "contents": [{ "role": "user", "parts": parts }],
    });
    let mut generation_config = serde_json::Map::new();
    if let Some(max_tokens) = request.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = request.temperature {
        generation_config.insert("temperature".to_string(), json!(temperature));
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }
    body
}
