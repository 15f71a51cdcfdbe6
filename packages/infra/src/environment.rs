//! # 階層化された環境ファイル
//!
//! ルートディレクトリの dotenv ファイルを決められた順序で読み込み、
//! 1 つの不変なキー・値の集合にまとめる。
//!
//! ## 読み込み順序
//!
//! ```text
//! .env → .env.local → .env.local.php
//!   （APP_ENV が空でなければ続けて）
//! .env.{env} → .env.{env}.local → .env.{env}.local.php
//! ```
//!
//! - 後に読み込んだファイルが同じキーを上書きする
//! - 存在しないファイルはスキップする（エラーにしない）
//! - プロセスの実環境変数はファイルの値より優先される
//! - プロセス環境変数そのものは変更しない
//!
//! ファイル名の `.php` 接尾辞は歴史的な命名で、中身は他と同じ dotenv 形式として扱う。

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use pixiekat_domain::AppEnv;

/// ベースのファイル名（読み込み順）
pub const BASE_FILES: [&str; 3] = [".env", ".env.local", ".env.local.php"];

/// 環境名ごとのファイル名（読み込み順）
pub fn env_specific_files(env: &str) -> [String; 3] {
    [
        format!(".env.{env}"),
        format!(".env.{env}.local"),
        format!(".env.{env}.local.php"),
    ]
}

/// 読み込み済みの環境
#[derive(Debug, Clone, Default)]
pub struct EnvironmentLayers {
    root:         PathBuf,
    process:      BTreeMap<String, String>,
    files:        BTreeMap<String, String>,
    loaded_files: Vec<PathBuf>,
}

impl EnvironmentLayers {
    /// 実際のプロセス環境変数を使って読み込む
    pub fn load(root: impl Into<PathBuf>) -> Self {
        Self::load_with(root, std::env::vars())
    }

    /// 指定したプロセス環境変数を使って読み込む
    pub fn load_with<I, K, V>(root: impl Into<PathBuf>, process: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut layers = Self {
            root: root.into(),
            process: process
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        };

        for file in BASE_FILES {
            layers.load_file(file);
        }

        if let Some(env) = layers.get("APP_ENV").filter(|e| !e.is_empty()) {
            let env = env.to_string();
            let app_env = AppEnv::parse(&env);
            tracing::debug!(
                env = %app_env,
                display_errors = app_env.displays_errors(),
                "環境ごとのポリシーを適用します"
            );
            for file in env_specific_files(&env) {
                layers.load_file(&file);
            }
        }

        layers
    }

    /// ファイル 1 つを読み込み、既存の値を上書きする
    ///
    /// 存在しないファイルは無視する。構文エラーのあるファイルは
    /// 警告を出してファイル全体をスキップする。
    fn load_file(&mut self, name: &str) {
        let path = self.root.join(name);
        if !path.is_file() {
            return;
        }

        let parsed: Result<Vec<(String, String)>, dotenvy::Error> =
            dotenvy::from_path_iter(&path).and_then(|iter| iter.collect());
        match parsed {
            Ok(values) => {
                tracing::debug!(path = %path.display(), count = values.len(), "環境ファイルを読み込みました");
                self.files.extend(values);
                self.loaded_files.push(path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "環境ファイルの解析に失敗したためスキップします");
            }
        }
    }

    /// 値を取得する（プロセス環境変数 → ファイルの順に探す）
    ///
    /// 空文字列も「設定済み」として返す。
    pub fn get(&self, key: &str) -> Option<&str> {
        self.process
            .get(key)
            .or_else(|| self.files.get(key))
            .map(String::as_str)
    }

    /// ファイルから読み込んだ値のみを取得する
    pub fn file_value(&self, key: &str) -> Option<&str> {
        self.files.get(key).map(String::as_str)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 実際に読み込んだファイル（読み込み順）
    pub fn loaded_files(&self) -> &[PathBuf] {
        &self.loaded_files
    }
}
