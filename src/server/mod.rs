//! HTTP 서버 (axum)
//!
//! | 메서드 | 경로 | 설명 |
//! |---|---|---|
//! | POST | `/api/ask` | 스트리밍 답변 (`text/plain` 또는 `application/x-ndjson`) |
//! | POST | `/api/build-embeddings` | 업로드 파일로 세션 인덱스 빌드 |
//! | GET | `/api/index` | 인덱스 상태 |
//! | DELETE | `/api/index` | 세션 인덱스 제거 |
//! | GET | `/health` | 헬스 체크 |

mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::pipeline::RagPipeline;

/// 핸들러 공유 상태
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
    pub started_at: DateTime<Utc>,
}

/// 라우터 생성
pub fn router(pipeline: Arc<RagPipeline>) -> Router {
    let state = AppState {
        pipeline,
        started_at: Utc::now(),
    };

    Router::new()
        .route("/api/ask", post(routes::ask))
        .route("/api/build-embeddings", post(routes::build_embeddings))
        .route(
            "/api/index",
            get(routes::index_status).delete(routes::clear_index),
        )
        .route("/health", get(routes::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 서버 실행 (Ctrl+C 로 종료)
pub async fn serve(pipeline: Arc<RagPipeline>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
