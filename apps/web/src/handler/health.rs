//! # ヘルスチェックハンドラ
//!
//! ```text
//! GET /health
//! ```
//!
//! ```json
//! {
//!   "status": "healthy",
//!   "version": "0.1.0",
//!   "database": "up"
//! }
//! ```

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::AppState;

/// ヘルスチェックレスポンス
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// 稼働状態（`"healthy"` または `"unhealthy"`）
    pub status:   String,
    /// アプリケーションバージョン（Cargo.toml から取得）
    pub version:  String,
    /// データベース接続状態（`"up"` または `"down"`）
    pub database: String,
}

/// ヘルスチェックエンドポイント
///
/// データベースに `SELECT 1` を発行し、失敗した場合は 503 を返す。
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_up = match state.services.entity_manager.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "データベースのヘルスチェックに失敗しました");
            false
        }
    };

    let (status, label) = if database_up {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status,
        Json(HealthResponse {
            status:   label.to_string(),
            version:  env!("CARGO_PKG_VERSION").to_string(),
            database: if database_up { "up" } else { "down" }.to_string(),
        }),
    )
}
