//! # Pixiekat インフラ層
//!
//! 外部システム（ファイルシステム、データベース、SMTP）との接続を担当する。
//!
//! ## 設計方針
//!
//! アプリケーションコンテキストが保持するサービスの具体的な実装を提供する。
//! 各サービスは設定値を引数で受け取り、プロセス環境変数を直接読まない
//! （環境の読み込みは [`environment`] に集約する）。
//!
//! ## 依存関係
//!
//! ```text
//! web → infra → domain
//! ```
//!
//! ## モジュール構成
//!
//! - [`cache`] - タグ対応ファイルシステムキャッシュとレジストリ
//! - [`db`] - DSN の解析とエンティティマネージャ
//! - [`environment`] - 階層化された dotenv ファイルの読み込み
//! - [`error`] - インフラ層エラー定義
//! - [`logger`] - ファイル出力ロガー
//! - [`mailer`] - メール送信
//! - [`template`] - テンプレートエンジン
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use pixiekat_infra::{db::{DsnParser, EntityManager, OrmConfig}, environment::EnvironmentLayers};
//!
//! async fn setup() -> Result<(), Box<dyn std::error::Error>> {
//!     let env = EnvironmentLayers::load(".");
//!     let params = DsnParser.parse(env.get("DATABASE_URL").unwrap_or("sqlite::memory:"))?;
//!     let em = EntityManager::connect(params, OrmConfig::attribute_metadata(["src"], false)).await?;
//!     em.ping().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod db;
pub mod environment;
pub mod error;
pub mod logger;
pub mod mailer;
pub mod template;

pub use cache::{CacheRegistry, FilesystemTagAwareCache, Pruneable};
pub use db::{DsnParser, EntityManager, OrmConfig};
pub use environment::EnvironmentLayers;
pub use error::{InfraError, InfraErrorKind};
pub use logger::{Logger, LoggerConfig};
pub use mailer::{EmailMessage, MailTransport, Mailer};
pub use template::TemplateEngine;
