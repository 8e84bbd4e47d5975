use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use super::*;
use crate::config::Config;
use crate::index::VectorIndex;
use crate::ingest::loader::DocumentLoader;
use crate::ingest::splitter::SplitterConfig;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::synth::AnswerSynthesizer;
use crate::testing::{EchoLlm, HashEmbedder};

const TOKEN: &str = "s3cret";
const BOUNDARY: &str = "akas-test-boundary";

struct Harness {
    _dir: TempDir,
    app: Router,
    uploads: PathBuf,
}

fn harness(api_token: Option<&str>) -> Harness {
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    config.server.api_token = api_token.map(str::to_string);

    let index = VectorIndex::new(Arc::new(HashEmbedder::new(64)));
    let synthesizer = AnswerSynthesizer::new(Arc::new(EchoLlm::new()), 6000, 0.0);
    let settings = PipelineSettings {
        splitter: SplitterConfig {
            chunk_size: 200,
            overlap: 20,
        },
        query_timeout: Duration::from_secs(10),
        ..PipelineSettings::default()
    };
    let pipeline = Pipeline::new(DocumentLoader::default(), index, synthesizer, settings);

    let state = Arc::new(AppState::new(&config, Arc::new(pipeline)));
    Harness {
        _dir: dir,
        app: router(state, false),
        uploads: config.uploads_path(),
    }
}

fn authorized(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder.header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    authorized(Request::builder().method(method).uri(uri))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn get_request(uri: &str) -> Request<Body> {
    authorized(Request::builder().uri(uri))
        .body(Body::empty())
        .expect("request should build")
}

fn upload_request(filename: &str, contents: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{f}\"\r\n\
         Content-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
        b = BOUNDARY,
        f = filename,
        c = contents
    );
    authorized(Request::builder().method("POST").uri("/api/ingest/upload"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .expect("request should build")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_is_open_and_reports_unloaded() {
    let h = harness(Some(TOKEN));
    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .expect("request should build");

    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["index_ready"], false);
    assert_eq!(body["stage"], "unloaded");
    assert_eq!(body["records"], 0);
    assert_eq!(body["embedding_provider"], "hash");
    assert_eq!(body["embedding_model"], "hash/bow-64");
}

#[tokio::test]
async fn protected_routes_need_the_token() {
    let h = harness(Some(TOKEN));

    let bare = Request::builder()
        .uri("/api/stats")
        .body(Body::empty())
        .expect("request should build");
    let (status, body) = send(&h.app, bare).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let wrong = Request::builder()
        .uri("/api/stats")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .expect("request should build");
    let (status, _) = send(&h.app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&h.app, get_request("/api/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_queries"], 0);
}

#[tokio::test]
async fn no_token_configured_means_open_api() {
    let h = harness(None);
    let request = Request::builder()
        .uri("/api/providers")
        .body(Body::empty())
        .expect("request should build");

    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default"], "ollama");
    assert_eq!(body["available"], json!(["ollama"]));
}

#[tokio::test]
async fn query_before_ingest_is_unavailable() {
    let h = harness(Some(TOKEN));

    let (status, body) = send(
        &h.app,
        json_request("POST", "/api/query", &json!({ "question": "Anything?" })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn upload_then_query_round() {
    let h = harness(Some(TOKEN));

    let (status, body) = send(
        &h.app,
        upload_request("intro.txt", "Paris is the capital of France."),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "upload failed: {}", body);
    assert_eq!(body["files"][0]["filename"], "intro.txt");
    assert_eq!(body["files"][0]["status"], "processed");
    assert_eq!(body["files"][0]["size"], 31);
    assert!(
        body["files"][0]["processing_time"]
            .as_f64()
            .is_some_and(|t| t >= 0.0)
    );
    assert_eq!(body["total_chunks"], 1);
    assert_eq!(body["stage"], "ready");

    let question = json!({
        "question": "What is the capital of France?",
        "max_results": 1,
        "search_type": "similarity",
    });
    let request = authorized(Request::builder().method("POST").uri("/api/query"))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user", "alice")
        .body(Body::from(question.to_string()))
        .expect("request should build");
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK, "query failed: {}", body);
    assert!(body["answer"].as_str().is_some_and(|a| a.contains("Paris")));
    assert_eq!(body["sources"].as_array().map(Vec::len), Some(1));
    assert!(body["query_id"].is_string());

    let request = authorized(Request::builder().uri("/api/query/history?limit=5"))
        .header("x-user", "alice")
        .body(Body::empty())
        .expect("request should build");
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["queries"][0]["query"], "What is the capital of France?");

    let request = authorized(Request::builder().uri("/api/query/history"))
        .header("x-user", "bob")
        .body(Body::empty())
        .expect("request should build");
    let (_, body) = send(&h.app, request).await;
    assert_eq!(body["total"], 0);

    let (_, body) = send(&h.app, get_request("/api/stats")).await;
    assert_eq!(body["total_queries"], 1);
    assert_eq!(body["total_documents"], 1);
}

#[tokio::test]
async fn invalid_query_is_a_bad_request() {
    let h = harness(Some(TOKEN));
    send(&h.app, upload_request("notes.txt", "Rivers flow to the sea.")).await;

    let (status, _) = send(
        &h.app,
        json_request("POST", "/api/query", &json!({ "question": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &h.app,
        json_request(
            "POST",
            "/api/query",
            &json!({ "question": "Where do rivers go?", "max_results": 21 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_bodies_get_json_errors() {
    let h = harness(Some(TOKEN));
    let bodies = [
        ("/api/query", json!({ "question": "q", "search_type": "bm25" })),
        ("/api/query", json!({ "max_results": 3 })),
        ("/api/feedback", json!({ "query": "q", "response": "r", "rating": -1 })),
        ("/api/ingest/urls", json!({ "urls": "https://example.com" })),
    ];

    for (uri, body) in bodies {
        let (status, response) = send(&h.app, json_request("POST", uri, &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} accepted {}", uri, body);
        assert!(
            response["error"].as_str().is_some_and(|e| !e.is_empty()),
            "{} gave no error message for {}",
            uri,
            body
        );
    }
}

#[tokio::test]
async fn non_json_content_type_is_a_bad_request() {
    let h = harness(Some(TOKEN));
    let request = authorized(Request::builder().method("POST").uri("/api/query"))
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("question=hello"))
        .expect("request should build");

    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn failed_uploads_are_not_kept() {
    let h = harness(Some(TOKEN));

    let (status, body) = send(&h.app, upload_request("blob.bin", "not a document")).await;
    assert_eq!(status, StatusCode::OK, "upload failed: {}", body);
    assert_eq!(body["files"][0]["status"], "error");
    assert_eq!(body["files"][0]["size"], 14);
    assert!(body["files"][0]["error"].is_string());

    let (status, _) = send(&h.app, upload_request("kept.txt", "Oceans are salty.")).await;
    assert_eq!(status, StatusCode::OK);

    let remaining: Vec<String> = std::fs::read_dir(&h.uploads)
        .expect("uploads dir should exist")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(remaining.len(), 1, "unexpected uploads: {:?}", remaining);
    assert!(remaining[0].ends_with("_kept.txt"));
}

#[tokio::test]
async fn url_ingest_rejects_other_schemes() {
    let h = harness(Some(TOKEN));

    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            "/api/ingest/urls",
            &json!({ "urls": ["file:///etc/passwd"] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|e| e.contains("file:///etc/passwd"))
    );
}

#[tokio::test]
async fn feedback_is_validated_and_aggregated() {
    let h = harness(Some(TOKEN));

    let (status, _) = send(
        &h.app,
        json_request(
            "POST",
            "/api/feedback",
            &json!({ "query": "q", "response": "r", "rating": 6 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            "/api/feedback",
            &json!({ "query": "q", "response": "r", "rating": 300 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    for rating in [5, 4] {
        let (status, _) = send(
            &h.app,
            json_request(
                "POST",
                "/api/feedback",
                &json!({ "query": "q", "response": "r", "rating": rating, "comment": "ok" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&h.app, get_request("/api/feedback/analytics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_feedback"], 2);
    assert_eq!(body["average_rating"], 4.5);
    assert_eq!(body["rating_distribution"]["5"], 1);
    assert_eq!(body["rating_distribution"]["1"], 0);
}

#[tokio::test]
async fn index_reset_empties_the_index() {
    let h = harness(Some(TOKEN));
    send(&h.app, upload_request("notes.txt", "Rivers flow to the sea.")).await;

    let (status, body) = send(&h.app, json_request("POST", "/api/index/reset", &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records_removed"], 1);

    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .expect("request should build");
    let (_, body) = send(&h.app, request).await;
    assert_eq!(body["index_ready"], false);
    assert_eq!(body["stage"], "unloaded");
}

#[tokio::test]
async fn root_serves_the_page() {
    let h = harness(Some(TOKEN));
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    assert!(String::from_utf8_lossy(&bytes).contains("<title>AKAS</title>"));
}
