//! # Pixiekat Web サーバー
//!
//! 環境を読み込んでサービスを構築し、ルートテーブルに基づいてページを表示する。
//!
//! ## 環境変数
//!
//! アプリケーション設定（`APP_ENV`, `DATABASE_URL` など）は [`pixiekat_web::config`] を参照。
//!
//! | 変数名 | デフォルト | 説明 |
//! |--------|------------|------|
//! | `APP_ROOT` | カレントディレクトリ | 環境ファイル・テンプレートの探索ルート |
//! | `HOST` | `0.0.0.0` | バインドアドレス |
//! | `PORT` | `8000` | ポート番号 |
//! | `LOG_FORMAT` | `pretty` | 標準エラー出力のログ形式（`json` / `pretty`） |
//! | `RUST_LOG` | `info,pixiekat=debug` | 標準エラー出力のログフィルタ |
//!
//! ## 起動方法
//!
//! ```bash
//! APP_ROOT=apps/web cargo run --bin pixiekat-web
//! ```

use std::net::SocketAddr;

use anyhow::Context as _;
use pixiekat_shared::{LogFormat, TracingConfig, observability::init_tracing};
use pixiekat_web::{
    AppState,
    application::cache_registry,
    bootstrap::Bootstrapper,
    router,
    routes::default_routes,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let bootstrapper = Bootstrapper::from_process_env().context("環境の読み込みに失敗しました")?;
    let env = bootstrapper.environment();

    let log_format = env.get("LOG_FORMAT").map(LogFormat::parse).unwrap_or_default();
    init_tracing(TracingConfig::new("pixiekat-web", log_format));

    let host = env.get("HOST").unwrap_or("0.0.0.0").to_string();
    let port: u16 = env
        .get("PORT")
        .map(str::parse::<u16>)
        .transpose()
        .context("PORT が不正です")?
        .unwrap_or(8000);

    let services = bootstrapper
        .build_services()
        .await
        .context("サービスの構築に失敗しました")?;

    // 起動時に期限切れのキャッシュを掃除する
    let pruned = cache_registry(&services.config)?.prune_all()?;
    tracing::debug!(pruned, "期限切れのキャッシュを削除しました");

    let state = AppState {
        services,
        routes: default_routes()?,
    };

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("アドレスのパースに失敗しました")?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Web サーバーが起動しました: {}", addr);

    axum::serve(listener, router(state)).await?;

    Ok(())
}
