//! # テンプレートエンジン
//!
//! tera をラップし、テンプレートディレクトリからの読み込み、
//! 全レンダリングに共通のグローバル変数、カスタム関数を提供する。
//!
//! ## 設計方針
//!
//! - **`Clone` は独立したコピー**: グローバル変数や関数はインスタンスごとに持つ。
//!   HTTP サーバでは共有のエンジンをリクエストごとに複製して使う
//! - **debug モード**: レンダリングの直前にテンプレートを読み直す（編集が即座に反映される）

use std::path::{Path, PathBuf};

use serde::Serialize;
use tera::{Context, Tera};

use crate::error::InfraError;

/// テンプレートエンジン
#[derive(Clone)]
pub struct TemplateEngine {
    tera:         Tera,
    globals:      Context,
    template_dir: PathBuf,
    cache_dir:    PathBuf,
    debug:        bool,
    /// ディレクトリから読み込んだか（リロード可能か）
    from_glob:    bool,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("template_dir", &self.template_dir)
            .field("cache_dir", &self.cache_dir)
            .field("debug", &self.debug)
            .field("templates", &self.tera.get_template_names().count())
            .finish_non_exhaustive()
    }
}

impl TemplateEngine {
    /// テンプレートディレクトリ配下の全ファイルを読み込んでエンジンを作成する
    ///
    /// ディレクトリが存在しない場合はテンプレートなしで作成する。
    /// `cache_dir` はコンパイル済みテンプレートの置き場所として保持するだけで、
    /// tera はメモリ上でコンパイルするため書き込まない。
    pub fn new(
        template_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        debug: bool,
    ) -> Result<Self, InfraError> {
        let template_dir = template_dir.into();
        let from_glob = template_dir.is_dir();

        let tera = if from_glob {
            let glob = format!("{}/**/*", template_dir.display());
            Tera::new(&glob)?
        } else {
            tracing::debug!(dir = %template_dir.display(), "テンプレートディレクトリが存在しません");
            Tera::default()
        };

        let debug_mode = debug;
        tracing::debug!(
            dir = %template_dir.display(),
            templates = tera.get_template_names().count(),
            debug_mode,
            "テンプレートエンジンを構築しました"
        );

        Ok(Self {
            tera,
            globals: Context::new(),
            template_dir,
            cache_dir: cache_dir.into(),
            debug,
            from_glob,
        })
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// テンプレート文字列を直接登録する
    pub fn add_raw_template(&mut self, name: &str, content: &str) -> Result<(), InfraError> {
        self.tera.add_raw_template(name, content)?;
        Ok(())
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    /// グローバル変数を設定する。同名の変数は上書きする
    pub fn add_global<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
    ) -> Result<(), InfraError> {
        self.globals.try_insert(name, value)?;
        Ok(())
    }

    pub fn global(&self, name: &str) -> Option<&tera::Value> {
        self.globals.get(name)
    }

    /// テンプレートから呼び出せる関数を登録する
    pub fn register_function<F>(&mut self, name: &str, function: F)
    where
        F: tera::Function + 'static,
    {
        self.tera.register_function(name, function);
    }

    /// テンプレートをレンダリングする
    ///
    /// `context` の値はグローバル変数より優先される。
    pub fn render(&self, name: &str, context: &Context) -> Result<String, InfraError> {
        let mut merged = self.globals.clone();
        merged.extend(context.clone());

        if self.debug && self.from_glob {
            let mut tera = self.tera.clone();
            tera.full_reload()?;
            return Ok(tera.render(name, &merged)?);
        }
        Ok(self.tera.render(name, &merged)?)
    }
}
