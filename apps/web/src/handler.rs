//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! ## モジュール構成
//!
//! ```text
//! handler.rs          # 親モジュール（re-export）
//! └── handler/
//!     ├── health.rs   # ヘルスチェックハンドラ
//!     └── page.rs     # ルートテーブルに基づくページ表示
//! ```

pub mod health;
pub mod page;

pub use health::health_check;
pub use page::render_page;
