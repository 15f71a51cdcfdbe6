//! # アプリケーションエラー
//!
//! 設定・起動・アプリケーションコンテキストの各操作で発生するエラーと、
//! HTTP レスポンスへの変換を定義する。
//!
//! ## 設計方針
//!
//! - **RFC 7807 準拠**: Problem Details for HTTP APIs 仕様に従う
//! - **詳細の出し分け**: `dev` 環境のみ `detail` にエラー内容を含める。
//!   それ以外の環境では詳細をログにのみ出力する
//!
//! ## エラーの階層
//!
//! ```text
//! インフラ層エラー (InfraError) / ルーティングエラー (RoutingError)
//!        ↓ From
//! アプリケーションエラー (AppError)
//!        ↓ into_problem / IntoResponse
//! HTTP レスポンス (StatusCode + JSON)
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pixiekat_domain::{Capability, routing::RoutingError};
use pixiekat_infra::InfraError;
use serde::Serialize;
use thiserror::Error;

/// 事前条件の違反
///
/// 呼び出し順序の誤り（ルート設定前に URL ジェネレータを要求した等）を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreconditionError {
    /// ルートテーブルが未設定、または空
    #[error("ルートテーブルが設定されていません")]
    RoutesNotSet,

    /// リクエストコンテキストが未設定
    #[error("リクエストコンテキストが設定されていません")]
    RequestContextNotSet,
}

/// アプリケーション層で発生するエラー
#[derive(Debug, Error)]
pub enum AppError {
    /// 必須の環境変数が未設定
    #[error("必須の環境変数 `{var}` が設定されていません")]
    ConfigMissing { var: String },

    /// 環境変数の値を解釈できない
    #[error("環境変数 `{var}` の値 `{value}` が不正です: {reason}")]
    InvalidConfig {
        var:    String,
        value:  String,
        reason: String,
    },

    /// 事前条件の違反
    #[error("事前条件を満たしていません: {0}")]
    PreconditionFailed(#[from] PreconditionError),

    /// 未登録のキャッシュプール名
    #[error("キャッシュプール `{cache}` は登録されていません")]
    NotFound { cache: String },

    /// 無効化されたケイパビリティの機能を要求した
    #[error("ケイパビリティ `{0}` は無効です")]
    CapabilityDisabled(Capability),

    /// ルーティングエラー
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// インフラ層エラー（DB、メール、テンプレート、キャッシュ、I/O）
    #[error(transparent)]
    Infra(#[from] InfraError),
}

/// RFC 7807 準拠のエラーレスポンス
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// エラーの種類を識別する URI
    #[serde(rename = "type")]
    pub error_type: String,
    /// エラーの概要
    pub title:      String,
    /// HTTP ステータスコード
    pub status:     u16,
    /// エラーの詳細情報（`dev` 環境のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail:     Option<String>,
}

impl AppError {
    /// HTTP ステータスコード
    ///
    /// | AppError | HTTP Status |
    /// |----------|-------------|
    /// | Routing(RouteNotFound / ResourceNotFound) | 404 |
    /// | Routing(MethodNotAllowed) | 405 |
    /// | その他 | 500 |
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Routing(RoutingError::RouteNotFound(_) | RoutingError::ResourceNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            Self::Routing(RoutingError::MethodNotAllowed { .. }) => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// RFC 7807 形式のレスポンスに変換する
    ///
    /// `display_errors` が真ならエラー内容を `detail` に含める。
    pub fn into_problem(self, display_errors: bool) -> Response {
        let status = self.status();
        let title = match status {
            StatusCode::NOT_FOUND => "ページが見つかりません",
            StatusCode::METHOD_NOT_ALLOWED => "メソッドが許可されていません",
            _ => "内部サーバーエラー",
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, "リクエストの処理に失敗しました");
        }

        let body = ErrorResponse {
            error_type: "about:blank".to_string(),
            title: title.to_string(),
            status: status.as_u16(),
            detail: display_errors.then(|| self.to_string()),
        };

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_problem(false)
    }
}
