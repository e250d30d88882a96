use proxed_common::Provider;

/// Captured prompt/response bodies are clipped to this many characters.
pub const MAX_CAPTURE_CHARS: usize = 10_000;

/// The persistent record of one proxied request. Built once, after the
/// response has completed (cleanly or not), and never mutated afterward.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub team_id: String,
    pub project_id: String,
    pub device_check_id: Option<String>,
    pub key_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub provider: Provider,
    pub model: Option<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub finish_reason: Option<String>,
    pub latency_ms: i64,
    pub response_code: u16,
    pub prompt_cost: String,
    pub completion_cost: String,
    pub total_cost: String,
    pub prompt_body: Option<String>,
    pub response_body: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub country_code: Option<String>,
    pub region_code: Option<String>,
}

/// Character-boundary-safe truncation for captured bodies.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}
