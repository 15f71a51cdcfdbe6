//! # ブートストラップ
//!
//! 環境を読み込み、各サービスを決められた順序で構築して
//! [`Application`] を作成する。
//!
//! ## 構築順序
//!
//! ```text
//! 環境ファイル → AppConfig → テンプレートエンジン → メーラー
//!   → エンティティマネージャ → ロガー → リクエスト → Application
//! ```
//!
//! DSN の解析失敗・データベース接続失敗はリトライせず呼び出し元に返す。
//! 環境ファイルが存在しないことはエラーにしない。
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use pixiekat_web::bootstrap::Bootstrapper;
//!
//! let bootstrapper = Bootstrapper::from_process_env()?;
//! let app = bootstrapper.create_application(None).await?;
//! app.entity_manager().ping().await?;
//! ```

use std::{path::PathBuf, sync::Arc};

use pixiekat_domain::{
    Capability,
    Request,
    routing::{RequestContext, RouteTable},
};
use pixiekat_infra::{
    DsnParser,
    EntityManager,
    EnvironmentLayers,
    InfraError,
    Logger,
    LoggerConfig,
    Mailer,
    OrmConfig,
    TemplateEngine,
};

use crate::{
    application::{Application, ApplicationParts},
    config::AppConfig,
    error::AppError,
};

/// 環境を読み込み済みのブートストラッパ
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    layers:   EnvironmentLayers,
    config:   Arc<AppConfig>,
    /// リクエストの構築に使う CGI 形式の変数
    cgi_vars: Vec<(String, String)>,
}

impl Bootstrapper {
    /// プロセス環境変数から読み込む
    ///
    /// ルートディレクトリは `APP_ROOT`、未設定ならカレントディレクトリ。
    pub fn from_process_env() -> Result<Self, AppError> {
        let root = match std::env::var_os("APP_ROOT").filter(|v| !v.is_empty()) {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir().map_err(|e| InfraError::io(".", e))?,
        };
        Self::load_with(root, std::env::vars())
    }

    /// 指定したプロセス環境変数で読み込む
    pub fn load_with<I, K, V>(root: impl Into<PathBuf>, process: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let process: Vec<(String, String)> = process
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let layers = Self::load_environment(root, process.clone());
        let config = AppConfig::from_layers(&layers)?;

        tracing::info!(
            root = %config.root.display(),
            env = %config.env,
            debug = config.debug,
            files = layers.loaded_files().len(),
            "環境を読み込みました"
        );

        Ok(Self {
            layers,
            config: Arc::new(config),
            cgi_vars: process,
        })
    }

    /// 階層化された環境ファイルを読み込む
    pub fn load_environment(
        root: impl Into<PathBuf>,
        process: Vec<(String, String)>,
    ) -> EnvironmentLayers {
        EnvironmentLayers::load_with(root, process)
    }

    pub fn environment(&self) -> &EnvironmentLayers {
        &self.layers
    }

    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// テンプレートエンジンを構築する
    pub fn build_template_engine(&self) -> Result<TemplateEngine, AppError> {
        Ok(TemplateEngine::new(
            self.config.template_dir(),
            self.config.template_cache_dir(),
            self.config.debug,
        )?)
    }

    /// メーラーを構築する。`MAILER_DSN` がなければ `None`
    pub fn build_mailer(&self) -> Result<Option<Mailer>, AppError> {
        match &self.config.mailer_dsn {
            Some(dsn) => Ok(Some(Mailer::from_dsn(dsn)?)),
            None => {
                tracing::debug!("MAILER_DSN が未設定のためメーラーを構築しません");
                Ok(None)
            }
        }
    }

    /// DSN を解析してエンティティマネージャを構築する
    pub async fn build_data_access_layer(&self) -> Result<EntityManager, AppError> {
        let params = DsnParser.parse(&self.config.database_url)?;
        let orm = OrmConfig::attribute_metadata(
            [self.config.entity_source_dir()],
            self.config.debug,
        );
        Ok(EntityManager::connect(params, orm).await?)
    }

    /// ファイルロガーを構築する
    ///
    /// Logging ケイパビリティが無効なら `None`。
    /// `dev` 環境では `LOG_LEVEL` 以上を `debug.log` にも書き出す。
    pub fn build_logger(&self) -> Result<Option<Logger>, AppError> {
        if !self.config.capabilities.contains(Capability::Logging) {
            return Ok(None);
        }
        let mut config = LoggerConfig::in_dir(self.config.log_dir());
        if self.config.env.writes_debug_log() {
            config = config.with_debug_log(self.config.log_level);
        }
        Ok(Some(Logger::new(config)?))
    }

    /// リクエストに依存しないサービスをまとめて構築する
    pub async fn build_services(&self) -> Result<Services, AppError> {
        let template_engine = self.build_template_engine()?;
        let mailer = self.build_mailer()?;
        let entity_manager = self.build_data_access_layer().await?;
        let logger = self.build_logger()?;

        Ok(Services {
            config: self.config.clone(),
            template_engine,
            mailer,
            entity_manager,
            logger,
        })
    }

    /// CGI 形式の変数から現在のリクエストを組み立ててアプリケーションを作成する
    pub async fn create_application(
        &self,
        routes: Option<RouteTable>,
    ) -> Result<Application, AppError> {
        let request = Request::from_cgi_vars(self.cgi_vars.iter().cloned());
        self.create_application_for(request, routes).await
    }

    /// 指定したリクエストでアプリケーションを作成する
    pub async fn create_application_for(
        &self,
        request: Request,
        routes: Option<RouteTable>,
    ) -> Result<Application, AppError> {
        self.build_services().await?.create_application(request, routes)
    }
}

/// 構築済みのサービス
///
/// `Clone` は接続プールとファイルハンドルを共有し、テンプレートエンジンは
/// 独立したコピーになる。HTTP サーバでは 1 度だけ構築し、リクエストごとに
/// [`create_application`](Services::create_application) を呼ぶ。
#[derive(Debug, Clone)]
pub struct Services {
    pub config:          Arc<AppConfig>,
    pub template_engine: TemplateEngine,
    pub mailer:          Option<Mailer>,
    pub entity_manager:  EntityManager,
    pub logger:          Option<Logger>,
}

impl Services {
    pub fn create_application(
        &self,
        request: Request,
        routes: Option<RouteTable>,
    ) -> Result<Application, AppError> {
        let request_context = RequestContext::from_request(&request);
        Application::new(ApplicationParts {
            config: self.config.clone(),
            request,
            request_context: Some(request_context),
            template_engine: self.template_engine.clone(),
            mailer: self.mailer.clone(),
            entity_manager: self.entity_manager.clone(),
            routes,
            logger: self.logger.clone(),
        })
    }
}
