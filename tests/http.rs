use std::path::PathBuf;

use axum::extract::State;
use axum::http::header::RANGE;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;

use axum_filestream::{Error, RangedFile, StreamConfig};

const FIXTURE: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

async fn file_handler(
    State(path): State<PathBuf>,
    headers: HeaderMap,
) -> Result<RangedFile, Error> {
    let range = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    Ok(RangedFile::open(&path)
        .await?
        .range_header(range)
        .config(StreamConfig::new().chunk_size(16)))
}

/// Spins up a real server on an ephemeral port serving one fixture file.
async fn spawn_server(name: &str, write_fixture: bool) -> String {
    let _ = tracing_subscriber::fmt().try_init();

    let path = std::env::temp_dir().join(format!(
        "axum-filestream-http-{}-{name}.txt",
        std::process::id(),
    ));
    if write_fixture {
        tokio::fs::write(&path, FIXTURE).await.unwrap();
    }

    let app = Router::new()
        .route("/file", get(file_handler))
        .with_state(path);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/file")
}

#[tokio::test(flavor = "multi_thread")]
async fn full_download() {
    let url = spawn_server("full", true).await;

    let response = reqwest::get(&url).await.unwrap();

    assert_eq!(reqwest::StatusCode::OK, response.status());
    let head = response.headers();
    assert_eq!("bytes", head.get("Accept-Ranges").unwrap());
    assert_eq!("62", head.get("Content-Length").unwrap());
    assert_eq!("text/plain", head.get("Content-Type").unwrap().to_str().unwrap());
    assert!(head.get("ETag").is_some());
    assert!(head.get("Last-Modified").is_some());
    assert!(head.get("Content-Range").is_none());

    assert_eq!(FIXTURE, response.bytes().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_download() {
    let url = spawn_server("partial", true).await;

    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .header("Range", "bytes=10-19")
        .send()
        .await
        .unwrap();

    assert_eq!(reqwest::StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(
        "bytes 10-19/62",
        response.headers().get("Content-Range").unwrap(),
    );
    assert_eq!("10", response.headers().get("Content-Length").unwrap());
    assert_eq!(&FIXTURE[10..20], response.bytes().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn range_reaching_last_byte_is_served_as_ok() {
    let url = spawn_server("capped", true).await;

    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .header("Range", "bytes=50-200")
        .send()
        .await
        .unwrap();

    // the end is capped to the final byte, so the response falls back to 200
    assert_eq!(reqwest::StatusCode::OK, response.status());
    assert_eq!("12", response.headers().get("Content-Length").unwrap());
    assert!(response.headers().get("Content-Range").is_none());
    assert_eq!(&FIXTURE[50..], response.bytes().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn open_ended_range_is_chunk_limited() {
    let url = spawn_server("open-ended", true).await;

    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .header("Range", "bytes=4-")
        .send()
        .await
        .unwrap();

    // the handler serves 16-byte chunks, so "bytes=4-" spans [4, 19]
    assert_eq!(reqwest::StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(
        "bytes 4-19/62",
        response.headers().get("Content-Range").unwrap(),
    );
    assert_eq!(&FIXTURE[4..20], response.bytes().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_range_degrades_to_full_content() {
    let url = spawn_server("malformed", true).await;

    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .header("Range", "pages=1-2")
        .send()
        .await
        .unwrap();

    assert_eq!(reqwest::StatusCode::OK, response.status());
    assert_eq!(FIXTURE, response.bytes().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_file_is_404() {
    let url = spawn_server("missing", false).await;

    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(reqwest::StatusCode::NOT_FOUND, response.status());
}
