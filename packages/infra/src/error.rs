//! # インフラ層エラー定義
//!
//! データベース、ファイルシステム、テンプレートエンジン、メール送信で
//! 発生するエラーを表現する。
//!
//! ## 構造
//!
//! `std::io::Error` と同じ struct + enum パターンを採用:
//! - [`InfraError`]: エラー種別（[`InfraErrorKind`]）と [`SpanTrace`] を保持するラッパー
//! - [`InfraErrorKind`]: エラーの具体的な種別（Database, Io, Template 等）
//!
//! `From` 実装や convenience constructor でエラーを生成すると、
//! その時点のスパン情報が自動的にキャプチャされる。

use std::{fmt, path::PathBuf};

use derive_more::Display;
use thiserror::Error;
use tracing_error::SpanTrace;

/// インフラ層で発生するエラー
///
/// エラー種別に応じた処理には [`kind()`](InfraError::kind) を使用する:
///
/// ```ignore
/// match error.kind() {
///     InfraErrorKind::InvalidDsn(reason) => { /* 設定ミス */ }
///     _ => { /* その他 */ }
/// }
/// ```
#[derive(Display)]
#[display("{kind}")]
pub struct InfraError {
    kind:       InfraErrorKind,
    span_trace: SpanTrace,
}

/// インフラ層エラーの種別
#[derive(Debug, Error)]
pub enum InfraErrorKind {
    /// データベースエラー
    ///
    /// 接続失敗、クエリ実行失敗など。
    #[error("データベースエラー: {0}")]
    Database(#[source] sqlx::Error),

    /// 接続文字列（DSN）の解析に失敗
    #[error("DSN が不正です: {0}")]
    InvalidDsn(String),

    /// 未対応のドライバ・トランスポート
    #[error("未対応のスキームです: {0}")]
    UnsupportedScheme(String),

    /// ファイル入出力エラー
    #[error("ファイル入出力エラー（{}）: {source}", .path.display())]
    Io {
        /// 対象パス
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// シリアライズ/デシリアライズエラー
    #[error("シリアライズエラー: {0}")]
    Serialization(#[source] serde_json::Error),

    /// テンプレートの読み込み・レンダリングエラー
    #[error("テンプレートエラー: {0}")]
    Template(#[source] tera::Error),

    /// メール送信エラー
    #[error("メール送信エラー: {0}")]
    Mail(String),

    /// キャッシュキーが不正
    #[error("キャッシュキーが不正です: {0}")]
    InvalidCacheKey(String),
}

// ===== InfraError のメソッド =====

impl InfraError {
    /// エラー種別を取得する
    pub fn kind(&self) -> &InfraErrorKind {
        &self.kind
    }

    /// SpanTrace を取得する
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    /// InfraError を分解して InfraErrorKind と SpanTrace を取り出す
    pub fn into_parts(self) -> (InfraErrorKind, SpanTrace) {
        (self.kind, self.span_trace)
    }

    fn new(kind: InfraErrorKind) -> Self {
        Self {
            kind,
            span_trace: SpanTrace::capture(),
        }
    }

    // ===== Convenience constructors =====

    pub fn invalid_dsn(msg: impl Into<String>) -> Self {
        Self::new(InfraErrorKind::InvalidDsn(msg.into()))
    }

    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        Self::new(InfraErrorKind::UnsupportedScheme(scheme.into()))
    }

    /// パス付きの入出力エラーを生成する
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::new(InfraErrorKind::Io {
            path: path.into(),
            source,
        })
    }

    pub fn mail(msg: impl Into<String>) -> Self {
        Self::new(InfraErrorKind::Mail(msg.into()))
    }

    pub fn invalid_cache_key(key: impl Into<String>) -> Self {
        Self::new(InfraErrorKind::InvalidCacheKey(key.into()))
    }
}

// ===== トレイト実装 =====

impl fmt::Debug for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfraError")
            .field("kind", &self.kind)
            .field("span_trace", &self.span_trace)
            .finish()
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

// ===== From 実装（SpanTrace 自動キャプチャ） =====

impl From<sqlx::Error> for InfraError {
    fn from(source: sqlx::Error) -> Self {
        Self::new(InfraErrorKind::Database(source))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(source: serde_json::Error) -> Self {
        Self::new(InfraErrorKind::Serialization(source))
    }
}

impl From<tera::Error> for InfraError {
    fn from(source: tera::Error) -> Self {
        Self::new(InfraErrorKind::Template(source))
    }
}
