use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use proxed_common::{Provider, ProxyError};
use proxed_core::{CallPayload, Pipeline, ProxyCallRequest, RelayResponse};
use proxed_provider::{StructuredKind, StructuredRequest, header_get};
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

/// Headers recognized on the proxy surface.
const TEST_KEY_HEADER: &str = "x-proxed-test-key";
const AI_KEY_HEADER: &str = "x-ai-key";
const DEVICE_TOKEN_HEADER: &str = "x-device-token";
const PROJECT_ID_HEADER: &str = "x-project-id";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

#[derive(Clone)]
struct RequestTraceId(String);

pub fn proxy_router(pipeline: Arc<Pipeline>) -> Router {
    let state = AppState { pipeline };
    Router::new()
        .route(
            "/v1/openai/{project_id}/chat/completions",
            post(openai_chat_completions),
        )
        .route(
            "/v1/anthropic/{project_id}/messages",
            post(anthropic_messages),
        )
        .route("/v1/text", post(structured_text))
        .route("/v1/vision", post(structured_vision))
        .route("/v1/pdf", post(structured_pdf))
        .route("/health", get(health))
        .layer(middleware::from_fn(request_trace))
        .with_state(state)
}

/// Assigns a trace id to every request and logs the request/response pair.
async fn request_trace(mut req: axum::http::Request<Body>, next: Next) -> Response {
    let trace_id = uuid::Uuid::now_v7().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(RequestTraceId(trace_id.clone()));

    let started_at = Instant::now();
    let response = next.run(req).await;
    info!(
        event = "request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started_at.elapsed().as_millis() as u64
    );
    response
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn openai_chat_completions(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Extension(trace_id): Extension<RequestTraceId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    native_proxy(state, trace_id, headers, body, project_id, Provider::OpenAi).await
}

async fn anthropic_messages(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Extension(trace_id): Extension<RequestTraceId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    native_proxy(
        state,
        trace_id,
        headers,
        body,
        project_id,
        Provider::Anthropic,
    )
    .await
}

async fn structured_text(
    State(state): State<AppState>,
    Extension(trace_id): Extension<RequestTraceId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    structured_proxy(state, trace_id, headers, body, StructuredKind::Text).await
}

async fn structured_vision(
    State(state): State<AppState>,
    Extension(trace_id): Extension<RequestTraceId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    structured_proxy(state, trace_id, headers, body, StructuredKind::Vision).await
}

async fn structured_pdf(
    State(state): State<AppState>,
    Extension(trace_id): Extension<RequestTraceId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    structured_proxy(state, trace_id, headers, body, StructuredKind::Pdf).await
}

async fn native_proxy(
    state: AppState,
    trace_id: RequestTraceId,
    headers: HeaderMap,
    body: Bytes,
    project_id: String,
    expected_provider: Provider,
) -> Response {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            return error_response(&ProxyError::validation(format!(
                "request body is not valid json: {err}"
            )));
        }
    };
    let call = call_request(
        trace_id,
        &headers,
        project_id,
        CallPayload::Native {
            expected_provider,
            body,
        },
    );
    run_pipeline(state, call).await
}

async fn structured_proxy(
    state: AppState,
    trace_id: RequestTraceId,
    headers: HeaderMap,
    body: Bytes,
    kind: StructuredKind,
) -> Response {
    let Some(project_id) = header_str(&headers, PROJECT_ID_HEADER) else {
        return error_response(&ProxyError::validation(format!(
            "missing {PROJECT_ID_HEADER} header"
        )));
    };
    let project_id = project_id.to_string();
    let request: StructuredRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(&ProxyError::validation(format!(
                "malformed request body: {err}"
            )));
        }
    };
    let call = call_request(
        trace_id,
        &headers,
        project_id,
        CallPayload::Structured { kind, request },
    );
    run_pipeline(state, call).await
}

fn call_request(
    trace_id: RequestTraceId,
    headers: &HeaderMap,
    project_id: String,
    payload: CallPayload,
) -> ProxyCallRequest {
    ProxyCallRequest {
        trace_id: trace_id.0,
        project_id,
        test_key: header_str(headers, TEST_KEY_HEADER).map(str::to_string),
        ai_key: header_str(headers, AI_KEY_HEADER).map(str::to_string),
        device_token: header_str(headers, DEVICE_TOKEN_HEADER).map(str::to_string),
        ip: client_ip(headers),
        user_agent: header_str(headers, "user-agent").map(str::to_string),
        payload,
    }
}

async fn run_pipeline(state: AppState, call: ProxyCallRequest) -> Response {
    match state.pipeline.execute(call).await {
        Ok(RelayResponse::Json {
            status,
            headers,
            body,
        }) => {
            let content_type = header_get(&headers, "content-type")
                .unwrap_or("application/json")
                .to_string();
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status_code(status);
            insert_header(&mut response, header::CONTENT_TYPE, &content_type);
            response
        }
        Ok(RelayResponse::Stream {
            status,
            headers,
            body,
        }) => {
            let content_type = header_get(&headers, "content-type")
                .unwrap_or("text/event-stream")
                .to_string();
            let stream = ReceiverStream::new(body).map(Ok::<_, Infallible>);
            let mut response = Response::new(Body::from_stream(stream));
            *response.status_mut() = status_code(status);
            insert_header(&mut response, header::CONTENT_TYPE, &content_type);
            insert_header(&mut response, header::CACHE_CONTROL, "no-cache");
            response
        }
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &ProxyError) -> Response {
    let body = json!({
        "error": {
            "message": err.message,
            "code": err.code.as_str(),
        }
    });
    (status_code(err.http_status()), axum::Json(body)).into_response()
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn insert_header(response: &mut Response, name: header::HeaderName, value: &str) {
    if let Ok(value) = header::HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// First hop of `x-forwarded-for`, when present.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
