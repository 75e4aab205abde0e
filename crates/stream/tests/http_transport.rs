//! HttpTransport against an in-process NDJSON server.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use parking_lot::Mutex;

use cs_domain::config::{BackendConfig, DecoderConfig};
use cs_domain::error::Error;
use cs_domain::frame::{EventFrame, QueryRequest};
use cs_stream::{frame_stream, ChatTransport, FrameItem, HttpTransport};

#[derive(Clone, Default)]
struct Seen {
    requests: Arc<Mutex<Vec<(QueryRequest, Option<String>)>>>,
}

async fn ndjson(State(seen): State<Seen>, headers: HeaderMap, Json(req): Json<QueryRequest>) -> Response {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    seen.requests.lock().push((req, accept));

    let chunks: Vec<Result<&'static str, Infallible>> = vec![
        Ok("{\"type\":\"processing_step\",\"message\":\"Sear"),
        Ok("ching\"}\n{\"type\":\"comple"),
        Ok("te\",\"response\":\"Filed in 2021.\",\"session_id\":\"abc123\"}\n"),
    ];
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(futures_util::stream::iter(chunks)),
    )
        .into_response()
}

async fn unavailable() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "backend warming up").into_response()
}

async fn spawn_server(seen: Seen) -> String {
    let app = Router::new()
        .route("/query", post(ndjson))
        .route("/down", post(unavailable))
        .with_state(seen);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn backend(base_url: String, query_path: &str) -> BackendConfig {
    BackendConfig {
        base_url,
        query_path: query_path.into(),
        ..BackendConfig::default()
    }
}

#[tokio::test]
async fn streams_frames_from_http_body() {
    let seen = Seen::default();
    let base = spawn_server(seen.clone()).await;
    let transport = HttpTransport::from_config(&backend(base, "/query")).unwrap();

    let req = QueryRequest {
        user_query: "When was the filing made?".into(),
        session_id: Some("prev-token".into()),
    };
    let body = transport.open(&req).await.unwrap();
    let items: Vec<FrameItem> = frame_stream(body, &DecoderConfig::default()).collect().await;

    assert_eq!(items.len(), 3);
    assert!(matches!(
        &items[0],
        FrameItem::Frame { frame: EventFrame::ProcessingStep { message }, .. } if message == "Searching"
    ));
    match &items[1] {
        FrameItem::Frame { frame: EventFrame::Complete(p), .. } => {
            assert_eq!(p.response, "Filed in 2021.");
            assert_eq!(p.session_token(), Some("abc123"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(matches!(items[2], FrameItem::End { bytes_seen } if bytes_seen > 0));

    let requests = seen.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, req);
    assert_eq!(requests[0].1.as_deref(), Some("application/x-ndjson"));
}

#[tokio::test]
async fn non_success_status_is_an_open_error() {
    let base = spawn_server(Seen::default()).await;
    let transport = HttpTransport::from_config(&backend(base, "/down")).unwrap();
    let req = QueryRequest {
        user_query: "hi".into(),
        session_id: None,
    };
    match transport.open(&req).await {
        Err(Error::Status { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "backend warming up");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected a status error"),
    }
}

#[tokio::test]
async fn unreachable_backend_is_an_open_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::from_config(&backend(format!("http://{addr}"), "/query")).unwrap();
    let req = QueryRequest {
        user_query: "hi".into(),
        session_id: None,
    };
    let err = transport.open(&req).await.err().unwrap();
    assert!(matches!(err, Error::Http(_) | Error::Timeout(_)));
}
