//! # Pixiekat ドメイン層
//!
//! アプリケーションコンテキストが保持する値オブジェクトを定義する。
//!
//! ## 依存関係の方向
//!
//! ```text
//! web → infra → domain
//! ```
//!
//! ドメイン層はインフラ層（DB、ファイルシステム、メール送信）には
//! 一切依存しない。
//!
//! ## モジュール構成
//!
//! - [`clock`] - 時刻プロバイダ
//! - [`environment`] - 実行環境名とケイパビリティ
//! - [`request`] - 受信リクエストの表現
//! - [`routing`] - ルートテーブル、URL ジェネレータ、URL マッチャー
//!
//! ## 使用例
//!
//! ```rust
//! use pixiekat_domain::routing::{RequestContext, Route, RouteTable, UrlGenerator};
//! use std::{collections::BTreeMap, sync::Arc};
//!
//! let mut routes = RouteTable::new();
//! routes.add("hello", Route::new("/hello/{name}")).unwrap();
//!
//! let generator = UrlGenerator::new(Arc::new(routes), RequestContext::default());
//! let params = BTreeMap::from([("name".to_string(), "kat".to_string())]);
//! assert_eq!(generator.generate("hello", &params).unwrap(), "/hello/kat");
//! ```

pub mod clock;
pub mod environment;
pub mod request;
pub mod routing;

pub use clock::{Clock, FixedClock, SystemClock};
pub use environment::{AppEnv, Capabilities, Capability};
pub use request::Request;
