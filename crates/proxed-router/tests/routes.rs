use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use proxed_common::{Provider, ProxyError};
use proxed_core::{
    MemoryExecutionSink, MemoryProjectStore, MemoryTeamMetrics, Pipeline, Project,
    ProjectWithProvider, ProviderKeyRecord, StaticDeviceVerifier,
};
use proxed_provider::{
    Dispatcher, Headers, UpstreamBody, UpstreamCall, UpstreamResponse,
};
use proxed_router::proxy_router;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower::util::ServiceExt;

/// Dispatcher that replays a scripted SSE stream without touching the network.
struct ScriptedDispatcher {
    chunks: Vec<&'static str>,
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(&self, _call: UpstreamCall) -> Result<UpstreamResponse, ProxyError> {
        let (tx, rx) = mpsc::channel(16);
        let chunks: Vec<Bytes> = self
            .chunks
            .iter()
            .map(|chunk| Bytes::from_static(chunk.as_bytes()))
            .collect();
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        let headers: Headers = vec![(
            "content-type".to_string(),
            "text/event-stream; charset=utf-8".to_string(),
        )];
        Ok(UpstreamResponse {
            status: 200,
            headers,
            body: UpstreamBody::Stream(rx),
        })
    }
}

fn test_app(provider: Provider, chunks: Vec<&'static str>) -> Router {
    let projects = Arc::new(MemoryProjectStore::default());
    projects.insert_project(ProjectWithProvider {
        project: Project {
            id: "proj-1".to_string(),
            team_id: "team-1".to_string(),
            active: true,
            test_mode: true,
            test_key: Some("test-secret".to_string()),
            device_check_id: None,
        },
        key: ProviderKeyRecord {
            id: "key-1".to_string(),
            provider,
            display_name: "primary".to_string(),
            active: true,
        },
    });
    projects.insert_server_key("key-1", "server-half");

    let pipeline = Pipeline::new(
        projects,
        Arc::new(StaticDeviceVerifier::accepting()),
        Arc::new(MemoryTeamMetrics::default()),
        Arc::new(MemoryExecutionSink::default()),
        Arc::new(ScriptedDispatcher { chunks }),
    );
    proxy_router(Arc::new(pipeline))
}

async fn body_json(body: Body) -> Value {
    let bytes = body.collect().await.expect("collect body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_reports_name_and_version() {
    let app = test_app(Provider::OpenAi, vec![]);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["name"], "proxed-router");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn openai_route_relays_stream_verbatim() {
    let chunks = vec![
        "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n",
        "data: [DONE]\n\n",
    ];
    let app = test_app(Provider::OpenAi, chunks.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/v1/openai/proj-1/chat/completions")
        .header("content-type", "application/json")
        .header("x-proxed-test-key", "test-secret")
        .header("x-ai-key", "client-half.device-token")
        .body(Body::from(
            json!({"model": "gpt-4o-mini", "stream": true}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("text/event-stream; charset=utf-8")
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes, chunks.concat().as_bytes());
}

#[tokio::test]
async fn invalid_json_body_is_rejected_before_auth() {
    let app = test_app(Provider::OpenAi, vec![]);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/openai/proj-1/chat/completions")
        .header("x-proxed-test-key", "test-secret")
        .header("x-ai-key", "client-half.device-token")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn unknown_project_maps_to_not_found_envelope() {
    let app = test_app(Provider::OpenAi, vec![]);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/openai/missing/chat/completions")
        .header("x-ai-key", "client-half.device-token")
        .body(Body::from(json!({"model": "gpt-4o-mini"}).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn anthropic_route_rejects_project_with_openai_key() {
    let app = test_app(Provider::OpenAi, vec![]);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/anthropic/proj-1/messages")
        .header("x-proxed-test-key", "test-secret")
        .header("x-ai-key", "client-half.device-token")
        .body(Body::from(
            json!({"model": "claude-3-5-haiku-latest"}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn structured_route_requires_project_header() {
    let app = test_app(Provider::Anthropic, vec![]);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/text")
        .header("x-ai-key", "client-half.device-token")
        .body(Body::from(json!({"prompt": "hello"}).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn structured_route_dispatches_with_project_header() {
    let chunks = vec![
        "data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-3-5-haiku-latest\",\"usage\":{\"input_tokens\":4}}}\n\n",
    ];
    let app = test_app(Provider::Anthropic, chunks.clone());
    let request = Request::builder()
        .method("POST")
        .uri("/v1/text")
        .header("x-project-id", "proj-1")
        .header("x-proxed-test-key", "test-secret")
        .header("x-ai-key", "client-half.device-token")
        .body(Body::from(
            json!({"prompt": "hello", "stream": true}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes, chunks.concat().as_bytes());
}
