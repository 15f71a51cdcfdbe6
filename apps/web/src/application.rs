//! # アプリケーションコンテキスト
//!
//! 起動時に構築したサービス（テンプレートエンジン、メーラー、エンティティマネージャ、
//! ロガー、キャッシュ）と現在のリクエストを 1 つにまとめ、アクセサで公開する。
//!
//! ## 遅延構築とメモ化
//!
//! URL ジェネレータと URL マッチャーは、最初に要求されたときに
//! その時点のルートテーブルとリクエストコンテキストから構築し、以後は同じ
//! インスタンスを返す。
//!
//! [`Application::set_routes`] でルートテーブルを差し替えても、構築済みの
//! ジェネレータ・マッチャーは作り直されない（古いルートテーブルを参照し続ける）。
//! 差し替え後のルートで URL を扱う場合は、新しい `Application` を作成すること。
//!
//! ## テンプレート関数 `path`
//!
//! テンプレートから `{{ path(name="hello", params=link_params) }}` の形で
//! URL を生成できる（`params` はオブジェクト）。この関数は最初に構築された
//! URL ジェネレータを使い続ける。

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, OnceLock},
};

use pixiekat_domain::{
    Capability,
    Request,
    routing::{RequestContext, RouteTable, UrlGenerator, UrlMatcher},
};
use pixiekat_infra::{
    CacheRegistry,
    EntityManager,
    FilesystemTagAwareCache,
    Logger,
    Mailer,
    TemplateEngine,
};
use serde::Serialize;

use crate::{
    config::AppConfig,
    error::{AppError, PreconditionError},
};

/// キャッシュレジストリに登録する既定のプール名
pub const APP_CACHE: &str = "app";

type GeneratorSlot = Arc<OnceLock<Arc<UrlGenerator>>>;

/// アプリケーションの構築に必要な部品
pub struct ApplicationParts {
    pub config:          Arc<AppConfig>,
    pub request:         Request,
    pub request_context: Option<RequestContext>,
    pub template_engine: TemplateEngine,
    pub mailer:          Option<Mailer>,
    pub entity_manager:  EntityManager,
    pub routes:          Option<RouteTable>,
    pub logger:          Option<Logger>,
}

/// アプリケーションコンテキスト
pub struct Application {
    config:          Arc<AppConfig>,
    request:         Request,
    request_context: Option<RequestContext>,
    template_engine: TemplateEngine,
    mailer:          Option<Mailer>,
    entity_manager:  EntityManager,
    logger:          Option<Logger>,
    routes:          Option<Arc<RouteTable>>,
    url_generator:   GeneratorSlot,
    url_matcher:     OnceLock<Arc<UrlMatcher>>,
    caches:          CacheRegistry,
}

/// テンプレートのグローバル変数 `app`
#[derive(Debug, Serialize)]
struct AppGlobal<'a> {
    env:     &'a str,
    debug:   bool,
    request: &'a Request,
}

impl Application {
    /// 部品からアプリケーションコンテキストを構築する
    pub fn new(parts: ApplicationParts) -> Result<Self, AppError> {
        let ApplicationParts {
            config,
            request,
            request_context,
            mut template_engine,
            mailer,
            entity_manager,
            routes,
            logger,
        } = parts;

        let url_generator = GeneratorSlot::default();

        template_engine.add_global(
            "app",
            &AppGlobal {
                env:     config.env.as_str(),
                debug:   config.template_debug,
                request: &request,
            },
        )?;
        template_engine.register_function("path", path_function(url_generator.clone()));

        let caches = cache_registry(&config)?;

        let logger = if config.capabilities.contains(Capability::Logging) {
            logger
        } else {
            None
        };

        let mut app = Self {
            config,
            request,
            request_context,
            template_engine,
            mailer,
            entity_manager,
            logger,
            routes: None,
            url_generator,
            url_matcher: OnceLock::new(),
            caches,
        };

        if let Some(routes) = routes {
            app.set_routes(routes);
            // ルートが揃っていれば `path` 関数が使えるよう先に解決しておく
            if app.url_generator().is_ok() {
                tracing::debug!("URL ジェネレータを解決しました");
            }
        }

        Ok(app)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_context(&self) -> Option<&RequestContext> {
        self.request_context.as_ref()
    }

    /// ファイルロガー（Logging ケイパビリティが有効な場合のみ）
    pub fn logger(&self) -> Result<&Logger, AppError> {
        self.logger
            .as_ref()
            .ok_or(AppError::CapabilityDisabled(Capability::Logging))
    }

    pub fn template_engine(&self) -> &TemplateEngine {
        &self.template_engine
    }

    /// メーラー（`MAILER_DSN` 未設定なら `None`）
    pub fn mailer(&self) -> Option<&Mailer> {
        self.mailer.as_ref()
    }

    pub fn entity_manager(&self) -> &EntityManager {
        &self.entity_manager
    }

    pub fn routes(&self) -> Option<&RouteTable> {
        self.routes.as_deref()
    }

    /// ルートテーブルを設定する
    ///
    /// 構築済みの URL ジェネレータ・マッチャーは作り直さない。
    pub fn set_routes(&mut self, routes: RouteTable) -> &mut Self {
        self.routes = Some(Arc::new(routes));
        self
    }

    /// 名前でキャッシュプールを取得する
    pub fn cache(&self, name: &str) -> Result<Arc<FilesystemTagAwareCache>, AppError> {
        self.caches.get(name).ok_or_else(|| AppError::NotFound {
            cache: name.to_string(),
        })
    }

    pub fn caches(&self) -> &CacheRegistry {
        &self.caches
    }

    /// テンプレートのグローバル変数を設定する（同名の変数は上書き）
    pub fn set_twig_global<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
    ) -> Result<&mut Self, AppError> {
        self.template_engine.add_global(name, value)?;
        Ok(self)
    }

    /// URL ジェネレータを取得する
    ///
    /// 初回呼び出し時に構築してメモ化する。
    ///
    /// # Errors
    ///
    /// - ルートテーブルが未設定または空: [`PreconditionError::RoutesNotSet`]
    /// - リクエストコンテキストが未設定: [`PreconditionError::RequestContextNotSet`]
    pub fn url_generator(&self) -> Result<Arc<UrlGenerator>, AppError> {
        if let Some(generator) = self.url_generator.get() {
            return Ok(generator.clone());
        }
        let (routes, context) = self.routing_inputs()?;
        let generator = self
            .url_generator
            .get_or_init(|| Arc::new(UrlGenerator::new(routes, context)));
        Ok(generator.clone())
    }

    /// URL マッチャーを取得する
    ///
    /// 事前条件とメモ化は [`url_generator`](Self::url_generator) と同じ。
    /// RouteMatching ケイパビリティが無効なら [`AppError::CapabilityDisabled`]。
    pub fn url_matcher(&self) -> Result<Arc<UrlMatcher>, AppError> {
        if !self.config.capabilities.contains(Capability::RouteMatching) {
            return Err(AppError::CapabilityDisabled(Capability::RouteMatching));
        }
        if let Some(matcher) = self.url_matcher.get() {
            return Ok(matcher.clone());
        }
        let (routes, context) = self.routing_inputs()?;
        let matcher = self
            .url_matcher
            .get_or_init(|| Arc::new(UrlMatcher::new(routes, context)));
        Ok(matcher.clone())
    }

    fn routing_inputs(&self) -> Result<(Arc<RouteTable>, RequestContext), PreconditionError> {
        let routes = self
            .routes
            .as_ref()
            .filter(|routes| !routes.is_empty())
            .ok_or(PreconditionError::RoutesNotSet)?;
        let context = self
            .request_context
            .as_ref()
            .ok_or(PreconditionError::RequestContextNotSet)?;
        Ok((routes.clone(), context.clone()))
    }

    /// テンプレートをレンダリングする
    pub fn render(&self, name: &str, context: &tera::Context) -> Result<String, AppError> {
        Ok(self.template_engine.render(name, context)?)
    }
}

/// `app` プールだけを登録したキャッシュレジストリを構築する
///
/// ディレクトリは `{root}{CACHE_PATH}{APP_ENV}/app`。
pub fn cache_registry(config: &AppConfig) -> Result<CacheRegistry, AppError> {
    let mut caches = CacheRegistry::new();
    caches.register(
        APP_CACHE,
        FilesystemTagAwareCache::new(APP_CACHE, config.cache_default_lifespan, config.cache_dir())?,
    );
    Ok(caches)
}

/// テンプレート関数 `path(name, params?)`
fn path_function(slot: GeneratorSlot) -> impl tera::Function {
    move |args: &HashMap<String, tera::Value>| -> tera::Result<tera::Value> {
        let name = args
            .get("name")
            .and_then(tera::Value::as_str)
            .ok_or_else(|| tera::Error::msg("path: `name` 引数が必要です"))?;
        let generator = slot
            .get()
            .ok_or_else(|| tera::Error::msg("path: URL ジェネレータが解決されていません"))?;

        let mut params = BTreeMap::new();
        if let Some(tera::Value::Object(map)) = args.get("params") {
            for (key, value) in map {
                let value = match value {
                    tera::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                params.insert(key.clone(), value);
            }
        }

        generator
            .generate(name, &params)
            .map(tera::Value::String)
            .map_err(|e| tera::Error::msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use pixiekat_domain::routing::Route;
    use pixiekat_infra::{DsnParser, OrmConfig};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn test_config(root: &std::path::Path, vars: &[(&str, &str)]) -> Arc<AppConfig> {
        let mut all: HashMap<String, String> = HashMap::from([(
            "DATABASE_URL".to_string(),
            "sqlite::memory:".to_string(),
        )]);
        all.extend(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        Arc::new(AppConfig::from_lookup(root, |key| all.get(key).cloned()).unwrap())
    }

    async fn build(
        dir: &TempDir,
        vars: &[(&str, &str)],
        routes: Option<RouteTable>,
        with_context: bool,
    ) -> Application {
        let config = test_config(dir.path(), vars);
        let entity_manager = EntityManager::connect(
            DsnParser.parse(&config.database_url).unwrap(),
            OrmConfig::attribute_metadata([config.entity_source_dir()], config.debug),
        )
        .await
        .unwrap();
        let request = Request::from_cgi_vars([("REQUEST_URI", "/hello/kat")]);
        let request_context = with_context.then(|| RequestContext::from_request(&request));

        Application::new(ApplicationParts {
            template_engine: TemplateEngine::new(
                config.template_dir(),
                config.template_cache_dir(),
                config.debug,
            )
            .unwrap(),
            config,
            request,
            request_context,
            mailer: None,
            entity_manager,
            routes,
            logger: None,
        })
        .unwrap()
    }

    fn routes() -> RouteTable {
        let mut routes = RouteTable::new();
        routes
            .add("home", Route::new("/"))
            .unwrap()
            .add("hello", Route::new("/hello/{name}"))
            .unwrap();
        routes
    }

    #[tokio::test]
    async fn test_ルート未設定ならroutes_not_set() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[], None, true).await;

        let err = sut.url_generator().unwrap_err();

        assert!(matches!(
            err,
            AppError::PreconditionFailed(PreconditionError::RoutesNotSet)
        ));
        assert!(sut.routes().is_none());
    }

    #[tokio::test]
    async fn test_空のルートテーブルもroutes_not_set() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[], Some(RouteTable::new()), true).await;

        assert!(matches!(
            sut.url_matcher().unwrap_err(),
            AppError::PreconditionFailed(PreconditionError::RoutesNotSet)
        ));
    }

    #[tokio::test]
    async fn test_コンテキスト未設定ならrequest_context_not_set() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[], Some(routes()), false).await;

        assert!(matches!(
            sut.url_generator().unwrap_err(),
            AppError::PreconditionFailed(PreconditionError::RequestContextNotSet)
        ));
    }

    #[tokio::test]
    async fn test_url_generatorはメモ化される() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[], Some(routes()), true).await;

        let first = sut.url_generator().unwrap();
        let second = sut.url_generator().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let params = BTreeMap::from([("name".to_string(), "kat".to_string())]);
        assert_eq!(first.generate("hello", &params).unwrap(), "/hello/kat");
    }

    #[tokio::test]
    async fn test_set_routes後もメモ化済みのジェネレータは古いルートを使う() {
        let dir = TempDir::new().unwrap();
        let mut sut = build(&dir, &[], Some(routes()), true).await;
        let before = sut.url_generator().unwrap();

        let mut replaced = RouteTable::new();
        replaced.add("bye", Route::new("/bye")).unwrap();
        sut.set_routes(replaced);

        let after = sut.url_generator().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(sut.routes().unwrap().get("bye").is_some());
        assert!(after.generate("bye", &BTreeMap::new()).is_err());
        assert_eq!(after.generate("home", &BTreeMap::new()).unwrap(), "/");
    }

    #[tokio::test]
    async fn test_後から設定したルートでジェネレータを解決できる() {
        let dir = TempDir::new().unwrap();
        let mut sut = build(&dir, &[], None, true).await;

        sut.set_routes(routes());

        assert!(sut.url_generator().is_ok());
    }

    #[tokio::test]
    async fn test_url_matcherはメモ化されパスを解決する() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[], Some(routes()), true).await;

        let matcher = sut.url_matcher().unwrap();

        assert!(Arc::ptr_eq(&matcher, &sut.url_matcher().unwrap()));
        let matched = matcher.match_request().unwrap();
        assert_eq!(matched.route, "hello");
        assert_eq!(matched.param("name"), Some("kat"));
    }

    #[tokio::test]
    async fn test_route_matching無効ならcapability_disabled() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[("APP_CAPABILITIES", "logging")], Some(routes()), true).await;

        assert!(matches!(
            sut.url_matcher().unwrap_err(),
            AppError::CapabilityDisabled(Capability::RouteMatching)
        ));
        assert!(sut.url_generator().is_ok());
    }

    #[tokio::test]
    async fn test_ロガーなしならcapability_disabled() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[], None, true).await;

        assert!(matches!(
            sut.logger().unwrap_err(),
            AppError::CapabilityDisabled(Capability::Logging)
        ));
    }

    #[tokio::test]
    async fn test_appキャッシュだけが登録されている() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[("APP_ENV", "test")], None, true).await;

        let cache = sut.cache("app").unwrap();
        assert_eq!(cache.namespace(), "app");
        assert_eq!(cache.directory(), dir.path().join("var/cache/test/app"));
        assert!(matches!(
            sut.cache("missing").unwrap_err(),
            AppError::NotFound { cache } if cache == "missing"
        ));
    }

    #[tokio::test]
    async fn test_set_twig_globalは上書きする() {
        let dir = TempDir::new().unwrap();
        let mut sut = build(&dir, &[], None, true).await;

        sut.set_twig_global("title", "first")
            .unwrap()
            .set_twig_global("title", "second")
            .unwrap();

        assert_eq!(sut.template_engine().global("title").unwrap(), "second");
    }

    #[tokio::test]
    async fn test_appグローバルに環境とリクエストが入る() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[("APP_ENV", "test"), ("APP_DEBUG", "1")], None, true).await;

        let app = sut.template_engine().global("app").unwrap();

        assert_eq!(app["env"], "test");
        assert_eq!(app["debug"], true);
        assert_eq!(app["request"]["path"], "/hello/kat");
    }

    #[tokio::test]
    async fn test_app_debug未設定ならappグローバルのdebugは真() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[], None, true).await;

        let app = sut.template_engine().global("app").unwrap();

        assert!(!sut.config().debug);
        assert!(!sut.template_engine().is_debug());
        assert_eq!(app["debug"], true);
    }

    #[tokio::test]
    async fn test_set_routes後もメモ化済みのマッチャーは古いルートを使う() {
        let dir = TempDir::new().unwrap();
        let mut sut = build(&dir, &[], Some(routes()), true).await;
        let before = sut.url_matcher().unwrap();

        let mut replaced = RouteTable::new();
        replaced.add("bye", Route::new("/bye")).unwrap();
        sut.set_routes(replaced);

        let after = sut.url_matcher().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.match_path("/bye").is_err());
        assert_eq!(after.match_path("/hello/kat").unwrap().route, "hello");
    }

    #[tokio::test]
    async fn test_コンテキスト未設定ならマッチャーもrequest_context_not_set() {
        let dir = TempDir::new().unwrap();
        let sut = build(&dir, &[], Some(routes()), false).await;

        assert!(matches!(
            sut.url_matcher().unwrap_err(),
            AppError::PreconditionFailed(PreconditionError::RequestContextNotSet)
        ));
    }

    #[tokio::test]
    async fn test_構築後に解決したジェネレータをpath関数が使う() {
        let dir = TempDir::new().unwrap();
        let mut sut = build(&dir, &[], None, true).await;
        sut.template_engine
            .add_raw_template("home-link.txt", r#"{{ path(name="home") }}"#)
            .unwrap();
        assert!(sut.render("home-link.txt", &tera::Context::new()).is_err());

        sut.set_routes(routes());
        sut.url_generator().unwrap();
        let text = sut.render("home-link.txt", &tera::Context::new()).unwrap();

        assert_eq!(text, "/");
    }

    #[tokio::test]
    async fn test_path関数でurlを生成できる() {
        let dir = TempDir::new().unwrap();
        let mut sut = build(&dir, &[], Some(routes()), true).await;
        sut.template_engine
            .add_raw_template("link.txt", r#"{{ path(name="hello", params=link) }} {{ path(name="home") }}"#)
            .unwrap();
        let mut context = tera::Context::new();
        context.insert("link", &BTreeMap::from([("name", "kat")]));

        let text = sut.render("link.txt", &context).unwrap();

        assert_eq!(text, "/hello/kat /");
    }
}
