//! # アプリケーション設定
//!
//! 階層化された環境ファイルとプロセス環境変数から、不変の設定値を 1 度だけ組み立てる。
//!
//! ## 設計方針
//!
//! 各コンポーネントは環境変数を直接読まず、[`AppConfig`] を引数で受け取る。
//! 値の取得元は [`AppConfig::from_lookup`] のクロージャで差し替えられるため、
//! テストでプロセス環境変数を書き換える必要がない。
//!
//! ## 環境変数一覧
//!
//! | 変数名 | 必須 | デフォルト | 説明 |
//! |--------|------|------------|------|
//! | `APP_ENV` | No | `dev` | 実行環境 |
//! | `APP_DEBUG` | No | `false` | デバッグモード（`1`/`true`/`yes`/`on`） |
//! | `APP_CAPABILITIES` | No | `logging,route_matching` | 有効な任意機能 |
//! | `DATABASE_URL` | **Yes** | - | データベース接続 DSN |
//! | `MAILER_DSN` | No | - | メール送信 DSN（未設定ならメーラーなし） |
//! | `LOG_PATH` | No | `/var/log/` | ログディレクトリ（ルートからの相対） |
//! | `LOG_LEVEL` | No | `debug` | `debug.log` のしきい値 |
//! | `CACHE_PATH` | No | `/var/cache/` | キャッシュディレクトリ（ルートからの相対） |
//! | `CACHE_DEFAULT_LIFESPAN` | No | `3600` | キャッシュの既定有効期限（秒） |
//! | `TWIG_TEMPLATE_PATH` | No | `/templates` | テンプレートディレクトリ（ルートからの相対） |

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use pixiekat_domain::{AppEnv, Capabilities};
use pixiekat_infra::EnvironmentLayers;
use pixiekat_shared::parse_level;
use tracing::Level;

use crate::error::AppError;

pub const DEFAULT_LOG_PATH: &str = "/var/log/";
pub const DEFAULT_CACHE_PATH: &str = "/var/cache/";
pub const DEFAULT_CACHE_LIFESPAN_SECS: u64 = 3600;
pub const DEFAULT_TEMPLATE_PATH: &str = "/templates";

/// アプリケーション全体の設定
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// ルートディレクトリ
    pub root:                   PathBuf,
    pub env:                    AppEnv,
    pub debug:                  bool,
    /// テンプレートのグローバル変数 `app.debug`（`APP_DEBUG` 未設定なら真）
    pub template_debug:         bool,
    pub capabilities:           Capabilities,
    pub database_url:           String,
    pub mailer_dsn:             Option<String>,
    pub log_path:               String,
    pub log_level:              Level,
    pub cache_path:             String,
    pub cache_default_lifespan: Duration,
    pub template_path:          String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // DSN には資格情報が含まれうるため出力しない
        f.debug_struct("AppConfig")
            .field("root", &self.root)
            .field("env", &self.env)
            .field("debug", &self.debug)
            .field("template_debug", &self.template_debug)
            .field("capabilities", &self.capabilities)
            .field("log_path", &self.log_path)
            .field("log_level", &self.log_level)
            .field("cache_path", &self.cache_path)
            .field("cache_default_lifespan", &self.cache_default_lifespan)
            .field("template_path", &self.template_path)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// 読み込み済みの環境から設定を組み立てる
    pub fn from_layers(layers: &EnvironmentLayers) -> Result<Self, AppError> {
        Self::from_lookup(layers.root(), |key| layers.get(key).map(str::to_string))
    }

    /// 任意の取得関数から設定を組み立てる
    ///
    /// 空文字列は未設定として扱う。
    pub fn from_lookup<F>(root: impl Into<PathBuf>, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or_else(|| AppError::ConfigMissing {
            var: "DATABASE_URL".to_string(),
        })?;

        let explicit_debug = match get("APP_DEBUG") {
            Some(value) => Some(parse_bool(&value).ok_or_else(|| AppError::InvalidConfig {
                var:    "APP_DEBUG".to_string(),
                reason: "真偽値ではありません".to_string(),
                value,
            })?),
            None => None,
        };

        let capabilities = match get("APP_CAPABILITIES") {
            Some(value) => {
                Capabilities::parse_list(&value).map_err(|e| AppError::InvalidConfig {
                    var: "APP_CAPABILITIES".to_string(),
                    reason: e.to_string(),
                    value,
                })?
            }
            None => Capabilities::all(),
        };

        let log_level = match get("LOG_LEVEL") {
            Some(value) => parse_level(&value).ok_or_else(|| AppError::InvalidConfig {
                var:    "LOG_LEVEL".to_string(),
                reason: "ログレベルではありません".to_string(),
                value,
            })?,
            None => Level::DEBUG,
        };

        let cache_default_lifespan = match get("CACHE_DEFAULT_LIFESPAN") {
            Some(value) => value
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|e: std::num::ParseIntError| AppError::InvalidConfig {
                    var: "CACHE_DEFAULT_LIFESPAN".to_string(),
                    reason: e.to_string(),
                    value,
                })?,
            None => Duration::from_secs(DEFAULT_CACHE_LIFESPAN_SECS),
        };

        Ok(Self {
            root: root.into(),
            env: get("APP_ENV").map(|e| AppEnv::parse(&e)).unwrap_or_default(),
            debug: explicit_debug.unwrap_or(false),
            template_debug: explicit_debug.unwrap_or(true),
            capabilities,
            database_url,
            mailer_dsn: get("MAILER_DSN"),
            log_path: get("LOG_PATH").unwrap_or_else(|| DEFAULT_LOG_PATH.to_string()),
            log_level,
            cache_path: get("CACHE_PATH").unwrap_or_else(|| DEFAULT_CACHE_PATH.to_string()),
            cache_default_lifespan,
            template_path: get("TWIG_TEMPLATE_PATH")
                .unwrap_or_else(|| DEFAULT_TEMPLATE_PATH.to_string()),
        })
    }

    /// ルートからの相対パスを絶対パスにする（先頭の `/` は無視する）
    pub fn under_root(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    /// `{root}{TWIG_TEMPLATE_PATH}`
    pub fn template_dir(&self) -> PathBuf {
        self.under_root(&self.template_path)
    }

    /// `{root}{CACHE_PATH}{APP_ENV}`
    pub fn cache_dir(&self) -> PathBuf {
        self.under_root(&self.cache_path).join(self.env.as_str())
    }

    /// `{root}{CACHE_PATH}{APP_ENV}/twig`
    pub fn template_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("twig")
    }

    /// `{root}{LOG_PATH}{APP_ENV}`
    pub fn log_dir(&self) -> PathBuf {
        self.under_root(&self.log_path).join(self.env.as_str())
    }

    /// エンティティ定義のソースディレクトリ `{root}/src`
    pub fn entity_source_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
