use proxed_common::Provider;
use serde_json::Value;
use tracing::debug;

/// Normalized telemetry collected from one upstream response.
///
/// Created empty at request start, mutated as events arrive, frozen when the
/// stream ends. Fields the provider never reported stay `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageMetrics {
    pub provider: Provider,
    pub model: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub finish_reason: Option<String>,
}

impl UsageMetrics {
    fn new(provider: Provider) -> Self {
        Self {
            provider,
            model: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            finish_reason: None,
        }
    }

    /// Total defaults to prompt + completion when the provider never
    /// reported it explicitly.
    fn finalize(mut self) -> Self {
        if self.total_tokens.is_none() {
            if let (Some(prompt), Some(completion)) = (self.prompt_tokens, self.completion_tokens)
            {
                self.total_tokens = Some(prompt + completion);
            }
        }
        self
    }
}

/// Per-provider usage accumulator, selected once per request and never
/// re-dispatched mid-stream.
///
/// Tolerates fields arriving across any number of non-contiguous events
/// (last write wins per field) and the stream ending before every field has
/// been seen. A frame that fails to parse as JSON is skipped; a single
/// malformed frame never aborts collection for the rest of the stream.
#[derive(Debug)]
pub enum UsageCollector {
    OpenAi(UsageMetrics),
    Anthropic(UsageMetrics),
    Google(UsageMetrics),
}

impl UsageCollector {
    pub fn new(provider: Provider) -> Self {
        match provider {
            Provider::OpenAi => UsageCollector::OpenAi(UsageMetrics::new(provider)),
            Provider::Anthropic => UsageCollector::Anthropic(UsageMetrics::new(provider)),
            Provider::Google => UsageCollector::Google(UsageMetrics::new(provider)),
        }
    }

    pub fn push_event(&mut self, data: &str) {
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(err) => {
                debug!(event = "usage_frame_skipped", error = %err);
                return;
            }
        };
        match self {
            UsageCollector::OpenAi(metrics) => push_openai(metrics, &value),
            UsageCollector::Anthropic(metrics) => push_anthropic(metrics, &value),
            UsageCollector::Google(metrics) => push_google(metrics, &value),
        }
    }

    pub fn finish(self) -> UsageMetrics {
        match self {
            UsageCollector::OpenAi(metrics)
            | UsageCollector::Anthropic(metrics)
            | UsageCollector::Google(metrics) => metrics.finalize(),
        }
    }
}

fn push_openai(metrics: &mut UsageMetrics, value: &Value) {
    if let Some(model) = value.get("model").and_then(Value::as_str) {
        metrics.model = Some(model.to_string());
    }
    if let Some(usage) = value.get("usage") {
        if let Some(tokens) = usage.get("prompt_tokens").and_then(Value::as_i64) {
            metrics.prompt_tokens = Some(tokens);
        }
        if let Some(tokens) = usage.get("completion_tokens").and_then(Value::as_i64) {
            metrics.completion_tokens = Some(tokens);
        }
        if let Some(tokens) = usage.get("total_tokens").and_then(Value::as_i64) {
            metrics.total_tokens = Some(tokens);
        }
    }
    if let Some(choices) = value.get("choices").and_then(Value::as_array) {
        for choice in choices {
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                metrics.finish_reason = Some(reason.to_string());
            }
        }
    }
}

fn push_anthropic(metrics: &mut UsageMetrics, value: &Value) {
    // Streaming shape: model and input_tokens under `message` on
    // message_start, output_tokens and stop_reason on message_delta. The
    // non-streaming message object carries the same fields at the top level,
    // so both spellings are accepted wherever they appear.
    let message = value.get("message").unwrap_or(value);
    if let Some(model) = message.get("model").and_then(Value::as_str) {
        metrics.model = Some(model.to_string());
    }
    if let Some(usage) = message.get("usage").or_else(|| value.get("usage")) {
        if let Some(tokens) = usage.get("input_tokens").and_then(Value::as_i64) {
            metrics.prompt_tokens = Some(tokens);
        }
        if let Some(tokens) = usage.get("output_tokens").and_then(Value::as_i64) {
            metrics.completion_tokens = Some(tokens);
        }
    }
    let stop_reason = value
        .get("delta")
        .and_then(|delta| delta.get("stop_reason"))
        .or_else(|| value.get("stop_reason"))
        .and_then(Value::as_str);
    if let Some(reason) = stop_reason {
        metrics.finish_reason = Some(normalize_anthropic_stop_reason(reason));
    }
}

fn normalize_anthropic_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" => "stop".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

fn push_google(metrics: &mut UsageMetrics, value: &Value) {
    if let Some(model) = value.get("modelVersion").and_then(Value::as_str) {
        let model = model.strip_prefix("models/").unwrap_or(model);
        metrics.model = Some(model.to_string());
    }
    if let Some(usage) = value.get("usageMetadata") {
        if let Some(tokens) = usage.get("promptTokenCount").and_then(Value::as_i64) {
            metrics.prompt_tokens = Some(tokens);
        }
        if let Some(tokens) = usage.get("candidatesTokenCount").and_then(Value::as_i64) {
            metrics.completion_tokens = Some(tokens);
        }
        if let Some(tokens) = usage.get("totalTokenCount").and_then(Value::as_i64) {
            metrics.total_tokens = Some(tokens);
        }
    }
    let finish_reason = value
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("finishReason"))
        .and_then(Value::as_str);
    if let Some(reason) = finish_reason {
        metrics.finish_reason = Some(reason.to_ascii_lowercase());
    }
}
