//! # Pixiekat Web
//!
//! アプリケーションのブートストラップと、組み立てたサービスへの単一の
//! アクセス窓口（[`Application`](application::Application)）を提供する。
//!
//! ## 全体の流れ
//!
//! ```text
//! Bootstrapper ── 環境ファイル読み込み → AppConfig
//!      │
//!      ├─ テンプレートエンジン / メーラー / エンティティマネージャ / ロガー
//!      │
//!      └─ Application（リクエスト + ルートテーブル + キャッシュレジストリ）
//!              ├─ url_generator()  … 初回に構築してメモ化
//!              └─ url_matcher()    … 初回に構築してメモ化
//! ```
//!
//! HTTP サーバ（`pixiekat-web` バイナリ）はサービスを 1 度だけ構築し、
//! リクエストごとに `Application` を作成する。
//!
//! ## モジュール構成
//!
//! - [`application`] - アプリケーションコンテキスト
//! - [`bootstrap`] - 環境の読み込みとサービスの構築
//! - [`config`] - アプリケーション設定
//! - [`error`] - エラー定義と HTTP レスポンスへの変換
//! - [`handler`] - HTTP リクエストハンドラ
//! - [`routes`] - HTTP サーバのルート定義
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use pixiekat_web::{bootstrap::Bootstrapper, routes::default_routes};
//!
//! let bootstrapper = Bootstrapper::from_process_env()?;
//! let app = bootstrapper.create_application(Some(default_routes()?)).await?;
//! let url = app.url_generator()?.generate("hello", &params)?;
//! ```

pub mod application;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handler;
pub mod routes;

use axum::{Router, routing::get};
use pixiekat_domain::routing::RouteTable;
use tower_http::trace::TraceLayer;

use crate::bootstrap::Services;

/// ハンドラが共有する状態
#[derive(Debug, Clone)]
pub struct AppState {
    pub services: Services,
    pub routes:   RouteTable,
}

/// HTTP ルーターを構築する
///
/// `/health` 以外のパスはすべてページ表示ハンドラに渡す。
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handler::health_check))
        .fallback(handler::render_page)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
