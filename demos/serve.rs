use std::time::Duration;

use axum::extract::Query;
use axum::http::header::RANGE;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use axum_filestream::{RangedFile, StreamConfig};

#[derive(Debug, Deserialize)]
struct FileRequest {
    path: String,
    chunk: Option<u64>,
    delay_ms: Option<u64>,
    name: Option<String>,
}

async fn get_file(headers: HeaderMap, Query(q): Query<FileRequest>) -> impl IntoResponse {
    let range = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let mut config = StreamConfig::new();
    if let Some(chunk) = q.chunk {
        config = config.chunk_size(chunk);
    }
    if let Some(delay_ms) = q.delay_ms {
        config = config.throttle(Duration::from_millis(delay_ms));
    }

    match RangedFile::open(&q.path).await {
        Ok(file) => {
            let mut file = file.range_header(range).config(config);
            if let Some(name) = q.name {
                file = file.attachment(name);
            }
            file.into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let router = Router::new()
        .route("/", get(|| async { "Hello, World!" }))
        .route("/file", get(get_file));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    axum::serve(listener, router).await.unwrap();
}
