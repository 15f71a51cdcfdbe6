//! # 実行環境とケイパビリティ
//!
//! `APP_ENV` の値と、アプリケーションコンテキストが任意で持つ機能
//! （ロギング、ルートマッチング）を表現する。

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::Serialize;
use thiserror::Error;

/// 実行環境
///
/// `dev` / `test` / `prod` 以外の名前も受け付けるが、
/// 環境ごとのポリシーは適用されない。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(into = "String")]
pub enum AppEnv {
    /// 開発環境
    #[default]
    Dev,
    /// テスト環境
    Test,
    /// 本番環境
    Prod,
    /// 上記以外の環境名
    Other(String),
}

impl AppEnv {
    /// 環境名をパースする（失敗しない）
    pub fn parse(s: &str) -> Self {
        match s {
            "dev" => Self::Dev,
            "test" => Self::Test,
            "prod" => Self::Prod,
            other => Self::Other(other.to_string()),
        }
    }

    /// 環境名の文字列表現
    pub fn as_str(&self) -> &str {
        match self {
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Prod => "prod",
            Self::Other(name) => name,
        }
    }

    /// 詳細なエラー表示を有効にするか
    ///
    /// `dev` のみ有効。それ以外はエラー詳細をログにのみ出力する。
    pub fn displays_errors(&self) -> bool {
        matches!(self, Self::Dev)
    }

    /// デバッグログ用のファイルシンクを追加するか
    pub fn writes_debug_log(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AppEnv> for String {
    fn from(env: AppEnv) -> Self {
        env.as_str().to_string()
    }
}

/// アプリケーションコンテキストの任意機能
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// ファイルへのログ出力
    Logging,
    /// パスからルートを解決する URL マッチャー
    RouteMatching,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logging => "logging",
            Self::RouteMatching => "route_matching",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知のケイパビリティ名
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("未知のケイパビリティです: {0}")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logging" => Ok(Self::Logging),
            "route_matching" => Ok(Self::RouteMatching),
            other => Err(UnknownCapability(other.to_string())),
        }
    }
}

/// 有効なケイパビリティの集合
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    /// すべて無効
    pub fn none() -> Self {
        Self::default()
    }

    /// すべて有効
    pub fn all() -> Self {
        Self::none()
            .with(Capability::Logging)
            .with(Capability::RouteMatching)
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.0.remove(&capability);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// カンマ区切りのリストをパースする
    ///
    /// 空白は無視する。空文字列はすべて無効を意味する。
    pub fn parse_list(s: &str) -> Result<Self, UnknownCapability> {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .try_fold(Self::none(), |caps, item| Ok(caps.with(item.parse()?)))
    }
}
