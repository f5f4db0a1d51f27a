//! API 라우트 핸들러

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::RagError;
use crate::knowledge::UploadedFile;
use crate::stream::Framing;

use super::AppState;

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!("Request failed: {}", self);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// 헬스 체크
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "resume-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
    }))
}

/// `POST /api/ask` - `{ "question": string }`
pub async fn ask(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        return bad_request("Invalid JSON body");
    };

    let Some(question) = payload.get("question").and_then(Value::as_str) else {
        return bad_request("Question is required");
    };

    let framing = Framing::from_accept(headers.get(ACCEPT).and_then(|v| v.to_str().ok()));

    let answer = match state.pipeline.ask(question).await {
        Ok(answer) => answer,
        Err(e) => return e.into_response(),
    };

    (
        [
            (CONTENT_TYPE, framing.content_type()),
            (CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(answer.encode(framing)),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct BuildRequest {
    #[serde(default)]
    files: Vec<UploadedFile>,
}

/// `POST /api/build-embeddings` - 업로드 파일로 세션 인덱스 빌드
pub async fn build_embeddings(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(request) = serde_json::from_slice::<BuildRequest>(&body) else {
        return bad_request("Invalid JSON body");
    };

    if request.files.is_empty() {
        return bad_request("No files provided");
    }

    let documents: Vec<_> = request
        .files
        .into_iter()
        .map(UploadedFile::into_document)
        .collect();

    match state.pipeline.index().build_session(&documents).await {
        Ok(report) => Json(json!({
            "success": true,
            "chunks": report.chunks,
            "files": report.documents,
            "message": format!(
                "Built embeddings for {} chunks from {} files",
                report.chunks, report.documents
            ),
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/index`
pub async fn index_status(State(state): State<AppState>) -> Response {
    match state.pipeline.index().status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `DELETE /api/index` - 세션 인덱스 제거 (스냅샷으로 폴백)
pub async fn clear_index(State(state): State<AppState>) -> Response {
    let cleared = state.pipeline.index().clear_session();
    if cleared {
        tracing::info!("Cleared session index");
    }
    Json(json!({ "cleared": cleared })).into_response()
}

// ============================================================================
// Tests
// ============================================================================
