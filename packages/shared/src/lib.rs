//! # Pixiekat 共有ユーティリティ
//!
//! ワークスペース全体で使用される共通ユーティリティを提供する。
//!
//! ## 設計方針
//!
//! - アプリケーション層（web）から依存される
//! - アプリケーション固有のロジックを含まない純粋なユーティリティのみを配置
//! - 外部クレートへの依存は最小限に抑える

pub mod observability;

pub use observability::{LogFormat, TracingConfig, parse_level};
