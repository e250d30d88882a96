use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use proxed_common::{Provider, ProxyError};
use proxed_protocol::SseFrameParser;
use proxed_provider::{
    Dispatcher, Headers, StructuredKind, StructuredRequest, UpstreamBody, UpstreamCall,
    UsageCollector, UsageMetrics, calculate_cost, resolved_model, structured_to_native,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::auth::{AuthInputs, authenticate};
use crate::quota::enforce_quota;
use crate::record::{ExecutionRecord, MAX_CAPTURE_CHARS, truncate_chars};
use crate::stores::{DeviceVerifier, ExecutionSink, ProjectStore, TeamMetricsStore};

/// What the caller sent: either a provider-native body for the prefixed
/// routes, or a structured body for the shared endpoints.
#[derive(Debug)]
pub enum CallPayload {
    Native {
        expected_provider: Provider,
        body: Value,
    },
    Structured {
        kind: StructuredKind,
        request: StructuredRequest,
    },
}

#[derive(Debug)]
pub struct ProxyCallRequest {
    pub trace_id: String,
    pub project_id: String,
    pub test_key: Option<String>,
    pub ai_key: Option<String>,
    pub device_token: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub payload: CallPayload,
}

/// The response relayed to the caller, byte-for-byte what upstream sent.
#[derive(Debug)]
pub enum RelayResponse {
    Json {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
    Stream {
        status: u16,
        headers: Headers,
        body: mpsc::Receiver<Bytes>,
    },
}

/// End-to-end request orchestration: authenticate, gate on quota, dispatch,
/// then fork the response stream into the forward branch and the telemetry
/// branch. The telemetry branch owns the only per-request mutable state (the
/// usage accumulator) and can never delay or corrupt the forward branch.
pub struct Pipeline {
    projects: Arc<dyn ProjectStore>,
    devices: Arc<dyn DeviceVerifier>,
    metrics: Arc<dyn TeamMetricsStore>,
    executions: Arc<dyn ExecutionSink>,
    dispatcher: Arc<dyn Dispatcher>,
}

/// Everything needed to assemble the execution record after the response
/// has run its course.
struct RecordContext {
    trace_id: String,
    team_id: String,
    project_id: String,
    device_check_id: Option<String>,
    key_id: String,
    provider: Provider,
    ip: Option<String>,
    user_agent: Option<String>,
    prompt_body: Option<String>,
    started_at: Instant,
    response_code: u16,
}

impl Pipeline {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        devices: Arc<dyn DeviceVerifier>,
        metrics: Arc<dyn TeamMetricsStore>,
        executions: Arc<dyn ExecutionSink>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            projects,
            devices,
            metrics,
            executions,
            dispatcher,
        }
    }

    pub async fn execute(&self, call: ProxyCallRequest) -> Result<RelayResponse, ProxyError> {
        let started_at = Instant::now();

        let auth = authenticate(
            self.projects.as_ref(),
            self.devices.as_ref(),
            AuthInputs {
                project_id: &call.project_id,
                test_key: call.test_key.as_deref(),
                ai_key: call.ai_key.as_deref(),
                device_token: call.device_token.as_deref(),
            },
        )
        .await?;

        enforce_quota(self.metrics.as_ref(), &auth.project.team_id).await?;

        let provider = auth.key.provider;
        let (body, model, stream) = match call.payload {
            CallPayload::Native {
                expected_provider,
                body,
            } => {
                if expected_provider != provider {
                    return Err(ProxyError::validation(format!(
                        "project is assigned a {provider} key, not {expected_provider}",
                    )));
                }
                let model = body.get("model").and_then(Value::as_str).map(str::to_string);
                let stream = body
                    .get("stream")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                (body, model, stream)
            }
            CallPayload::Structured { kind, request } => {
                let model = resolved_model(provider, &request);
                let stream = request.stream;
                let body = structured_to_native(provider, kind, &request)?;
                (body, Some(model), stream)
            }
        };

        let ctx = RecordContext {
            trace_id: call.trace_id.clone(),
            team_id: auth.project.team_id.clone(),
            project_id: auth.project.id.clone(),
            device_check_id: auth.project.device_check_id.clone(),
            key_id: auth.key.id.clone(),
            provider,
            ip: call.ip,
            user_agent: call.user_agent,
            prompt_body: serde_json::to_string(&body)
                .ok()
                .map(|text| truncate_chars(&text, MAX_CAPTURE_CHARS)),
            started_at,
            response_code: 0,
        };

        let upstream = UpstreamCall {
            provider,
            api_key: auth.api_key,
            body,
            model,
            stream,
            trace_id: call.trace_id,
        };

        let response = match self.dispatcher.dispatch(upstream).await {
            Ok(response) => response,
            Err(err) => {
                self.spawn_error_record(ctx, &err);
                return Err(err);
            }
        };

        let status = response.status;
        let headers = response.headers;
        let ctx = RecordContext {
            response_code: status,
            ..ctx
        };

        match response.body {
            UpstreamBody::Bytes(body) => {
                let mut collector = UsageCollector::new(provider);
                collector.push_event(&String::from_utf8_lossy(&body));
                let usage = collector.finish();
                let response_body = Some(truncate_chars(
                    &String::from_utf8_lossy(&body),
                    MAX_CAPTURE_CHARS,
                ));
                let executions = self.executions.clone();
                tokio::spawn(async move {
                    let trace_id = ctx.trace_id.clone();
                    persist_record(
                        executions,
                        trace_id,
                        build_record(ctx, usage, response_body, None),
                    )
                    .await;
                });
                Ok(RelayResponse::Json {
                    status,
                    headers,
                    body,
                })
            }
            UpstreamBody::Stream(upstream_rx) => {
                let forward_rx = self.tee_stream(upstream_rx, ctx);
                Ok(RelayResponse::Stream {
                    status,
                    headers,
                    body: forward_rx,
                })
            }
        }
    }

    /// Forks the upstream byte stream. The pump delivers chunks to both
    /// branches in arrival order; the forward branch ending (client gone)
    /// stops the pump, which in turn closes the telemetry branch so metrics
    /// are finalized from whatever was buffered.
    ///
    /// The telemetry channel is unbounded: a slow telemetry consumer buffers
    /// chunks instead of exerting backpressure, so parsing latency can never
    /// delay bytes on the forward branch.
    fn tee_stream(
        &self,
        mut upstream_rx: mpsc::Receiver<Bytes>,
        ctx: RecordContext,
    ) -> mpsc::Receiver<Bytes> {
        let (forward_tx, forward_rx) = mpsc::channel::<Bytes>(256);
        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<Bytes>();

        tokio::spawn(async move {
            while let Some(chunk) = upstream_rx.recv().await {
                // Unbounded send never blocks, so this cannot delay the
                // forward send below.
                let _ = telemetry_tx.send(chunk.clone());
                if forward_tx.send(chunk).await.is_err() {
                    // Caller disconnected; dropping the upstream receiver
                    // cancels the dispatch pump and the upstream request.
                    break;
                }
            }
        });

        let executions = self.executions.clone();
        let provider = ctx.provider;
        tokio::spawn(async move {
            let (usage, response_body) = collect_stream_usage(provider, telemetry_rx).await;
            let trace_id = ctx.trace_id.clone();
            persist_record(
                executions,
                trace_id,
                build_record(ctx, usage, response_body, None),
            )
            .await;
        });

        forward_rx
    }

    fn spawn_error_record(&self, ctx: RecordContext, err: &ProxyError) {
        let ctx = RecordContext {
            response_code: err.http_status(),
            ..ctx
        };
        let usage = UsageCollector::new(ctx.provider).finish();
        let err = err.clone();
        let executions = self.executions.clone();
        tokio::spawn(async move {
            let trace_id = ctx.trace_id.clone();
            persist_record(
                executions,
                trace_id,
                build_record(
                    ctx,
                    usage,
                    None,
                    Some((
                        err.code.as_str().to_string(),
                        truncate_chars(&err.message, MAX_CAPTURE_CHARS),
                    )),
                ),
            )
            .await;
        });
    }
}

/// Telemetry branch: frame parsing and usage extraction, isolated from the
/// forward branch. A fault here is logged and degrades to partial metrics.
async fn collect_stream_usage(
    provider: Provider,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) -> (UsageMetrics, Option<String>) {
    let mut parser = SseFrameParser::new();
    let mut collector = UsageCollector::new(provider);
    let mut response_body = String::new();
    let mut captured_chars = 0usize;

    while let Some(chunk) = rx.recv().await {
        for frame in parser.push(&chunk) {
            if frame.data.is_empty() || frame.data == "[DONE]" {
                continue;
            }
            if captured_chars < MAX_CAPTURE_CHARS {
                captured_chars += frame.data.chars().count();
                response_body.push_str(&frame.data);
            }
            collector.push_event(&frame.data);
        }
    }

    let mut usage = collector.finish();
    if usage.finish_reason.is_none() {
        // The stream ended without reporting a finish reason: upstream
        // close, timeout, or client disconnect mid-stream.
        usage.finish_reason = Some("incomplete".to_string());
    }
    let response_body = if response_body.is_empty() {
        None
    } else {
        Some(truncate_chars(&response_body, MAX_CAPTURE_CHARS))
    };
    (usage, response_body)
}

fn build_record(
    ctx: RecordContext,
    usage: UsageMetrics,
    response_body: Option<String>,
    error: Option<(String, String)>,
) -> ExecutionRecord {
    let prompt_tokens = usage.prompt_tokens.unwrap_or(0);
    let completion_tokens = usage.completion_tokens.unwrap_or(0);
    let total_tokens = usage
        .total_tokens
        .unwrap_or(prompt_tokens + completion_tokens);
    let cost = calculate_cost(
        ctx.provider,
        usage.model.as_deref().unwrap_or(""),
        prompt_tokens,
        completion_tokens,
    );
    let (error_code, error_message) = match error {
        Some((code, message)) => (Some(code), Some(message)),
        None => (None, None),
    };
    ExecutionRecord {
        team_id: ctx.team_id,
        project_id: ctx.project_id,
        device_check_id: ctx.device_check_id,
        key_id: ctx.key_id,
        ip: ctx.ip,
        user_agent: ctx.user_agent,
        provider: ctx.provider,
        model: usage.model,
        prompt_tokens,
        completion_tokens,
        total_tokens,
        finish_reason: usage.finish_reason,
        latency_ms: ctx.started_at.elapsed().as_millis() as i64,
        response_code: ctx.response_code,
        prompt_cost: cost.prompt_cost,
        completion_cost: cost.completion_cost,
        total_cost: cost.total_cost,
        prompt_body: ctx.prompt_body,
        response_body,
        error_code,
        error_message,
        country_code: None,
        region_code: None,
    }
}

async fn persist_record(
    executions: Arc<dyn ExecutionSink>,
    trace_id: String,
    record: ExecutionRecord,
) {
    if let Err(err) = executions.create_execution(record).await {
        warn!(event = "execution_persist_failed", trace_id = %trace_id, error = %err);
    }
}
