//! # ページ表示ハンドラ
//!
//! リクエストごとにアプリケーションコンテキストを作成し、URL マッチャーで
//! パスからルートを解決して `{ルート名}.html` をレンダリングする。
//!
//! テンプレートには以下の変数が渡される:
//!
//! - `route`: マッチしたルート名
//! - `params`: ルートパラメータ（デフォルト値を含む）
//! - `app`: 環境名・デバッグフラグ・リクエスト（グローバル変数）

use axum::{
    extract::{Request as HttpRequest, State},
    response::{Html, IntoResponse, Response},
};
use pixiekat_domain::Request;

use crate::{AppState, error::AppError};

/// ルートテーブルに基づいてページを表示する（フォールバックハンドラ）
pub async fn render_page(State(state): State<AppState>, request: HttpRequest) -> Response {
    let (parts, _body) = request.into_parts();
    let request = Request::from_http_parts(&parts);
    let display_errors = state.services.config.env.displays_errors();

    match render(&state, request) {
        Ok(html) => Html(html).into_response(),
        Err(e) => e.into_problem(display_errors),
    }
}

fn render(state: &AppState, request: Request) -> Result<String, AppError> {
    let app = state
        .services
        .create_application(request, Some(state.routes.clone()))?;

    let matched = app.url_matcher()?.match_request()?;

    let mut context = tera::Context::new();
    context.insert("route", &matched.route);
    context.insert("params", &matched.params);
    let html = app.render(&format!("{}.html", matched.route), &context)?;

    if let Ok(logger) = app.logger() {
        logger.with_default(|| {
            tracing::info!(route = %matched.route, path = app.request().path_info(), "ページを表示しました");
        });
    }

    Ok(html)
}
