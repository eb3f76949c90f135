//! Helpers shared by unit tests.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Serve `router` on an ephemeral port, returning its base URL.
pub(crate) async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Fake Whisper service: accepts task `t1`, reports 40%, then completes.
pub(crate) fn scripted_engine() -> Router {
    let polls = Arc::new(AtomicU32::new(0));
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route(
            "/inference",
            post(|_upload: Bytes| async {
                Json(json!({"task_id": "t1", "estimated_time_minutes": 1}))
            }),
        )
        .route(
            "/status/:id",
            get(move |Path(id): Path<String>| {
                let polls = polls.clone();
                async move {
                    if id != "t1" {
                        return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})));
                    }
                    let body: Value = match polls.fetch_add(1, Ordering::SeqCst) {
                        0 => json!({"status": "processing", "progress": 40}),
                        _ => json!({
                            "status": "completed",
                            "result": {
                                "text": "hello world",
                                "segments": [{"start": 0.0, "end": 1.5, "text": "hello world"}]
                            }
                        }),
                    };
                    (StatusCode::OK, Json(body))
                }
            }),
        )
        .layer(DefaultBodyLimit::disable())
}
