//! # アプリケーションロガー
//!
//! ファイルに書き出す専用の `tracing` ディスパッチャ。
//! プロセス全体の subscriber（標準エラー出力）とは独立しており、
//! [`Logger::with_default`] の内側で発行されたイベントだけを記録する。
//!
//! | ファイル | レベル | 条件 |
//! |----------|--------|------|
//! | `app.log` | WARN 以上 | 常に |
//! | `debug.log` | `LOG_LEVEL` 以上 | 開発環境のみ |

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{Dispatch, Level, level_filters::LevelFilter};
use tracing_subscriber::{Layer, fmt, layer::SubscriberExt};

use crate::error::InfraError;

/// ロガーの出力先
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// WARN 以上を書き出すファイル
    pub app_log:     PathBuf,
    /// 詳細ログのファイル（`None` なら出力しない）
    pub debug_log:   Option<PathBuf>,
    /// 詳細ログのしきい値
    pub debug_level: Level,
}

impl LoggerConfig {
    /// `{dir}/app.log` を出力先とする設定
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            app_log:     dir.as_ref().join("app.log"),
            debug_log:   None,
            debug_level: Level::DEBUG,
        }
    }

    /// `{dir}/debug.log` への詳細ログを有効にする
    pub fn with_debug_log(mut self, level: Level) -> Self {
        let dir = self
            .app_log
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        self.debug_log = Some(dir.join("debug.log"));
        self.debug_level = level;
        self
    }
}

/// ファイルロガー
///
/// `Clone` は同じファイルハンドルを共有する。
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
    config:   LoggerConfig,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Logger {
    /// ログファイルを開いてロガーを作成する
    ///
    /// ディレクトリがなければ作成し、ファイルは追記モードで開く。
    pub fn new(config: LoggerConfig) -> Result<Self, InfraError> {
        let app_file = open_append(&config.app_log)?;
        let app_layer = fmt::layer()
            .with_writer(Arc::new(app_file))
            .with_ansi(false)
            .with_filter(LevelFilter::WARN);

        let debug_layer = match &config.debug_log {
            Some(path) => Some(
                fmt::layer()
                    .with_writer(Arc::new(open_append(path)?))
                    .with_ansi(false)
                    .with_filter(LevelFilter::from_level(config.debug_level)),
            ),
            None => None,
        };

        let subscriber = tracing_subscriber::registry()
            .with(app_layer)
            .with(debug_layer);

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            config,
        })
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn app_log_path(&self) -> &Path {
        &self.config.app_log
    }

    pub fn debug_log_path(&self) -> Option<&Path> {
        self.config.debug_log.as_deref()
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// このロガーを既定の subscriber として `f` を実行する
    pub fn with_default<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

fn open_append(path: &Path) -> Result<File, InfraError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| InfraError::io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| InfraError::io(path, e))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn test_warn以上だけがapp_logに書かれる() {
        let dir = TempDir::new().unwrap();
        let sut = Logger::new(LoggerConfig::in_dir(dir.path().join("log/prod"))).unwrap();

        sut.with_default(|| {
            tracing::info!("ignored message");
            tracing::warn!("disk almost full");
            tracing::error!("disk full");
        });

        let app_log = read(sut.app_log_path());
        assert!(!app_log.contains("ignored message"), "{app_log}");
        assert!(app_log.contains("disk almost full"), "{app_log}");
        assert!(app_log.contains("disk full"), "{app_log}");
        assert_eq!(sut.debug_log_path(), None);
    }

    #[test]
    fn test_debug_logはしきい値以上を記録する() {
        let dir = TempDir::new().unwrap();
        let config = LoggerConfig::in_dir(dir.path()).with_debug_log(Level::INFO);
        let sut = Logger::new(config).unwrap();

        sut.with_default(|| {
            tracing::debug!("too verbose");
            tracing::info!("request handled");
        });

        let debug_log = read(&dir.path().join("debug.log"));
        assert!(debug_log.contains("request handled"), "{debug_log}");
        assert!(!debug_log.contains("too verbose"), "{debug_log}");
        assert!(!read(sut.app_log_path()).contains("request handled"));
    }

    #[test]
    fn test_with_defaultの外のイベントは記録されない() {
        let dir = TempDir::new().unwrap();
        let sut = Logger::new(LoggerConfig::in_dir(dir.path())).unwrap();

        tracing::error!("outside");

        assert!(!read(sut.app_log_path()).contains("outside"));
    }
}
