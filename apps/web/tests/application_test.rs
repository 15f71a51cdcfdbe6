//! ブートストラップからアプリケーションコンテキストまでの統合テスト
//!
//! 一時ディレクトリに環境ファイルと SQLite データベースを置いて実行する。
//!
//! 実行方法:
//! ```bash
//! cargo test -p pixiekat-web --test application_test
//! ```

use std::{collections::BTreeMap, fs, path::Path, sync::Arc};

use pixiekat_domain::routing::{Route, RouteTable};
use pixiekat_infra::db::Driver;
use pixiekat_web::{
    bootstrap::Bootstrapper,
    error::{AppError, PreconditionError},
};
use pretty_assertions::assert_eq;
use serial_test::serial;
use tempfile::TempDir;

/// `.env` と `.env.test` を書き出し、SQLite ファイルを使う設定にする
fn setup_root(dir: &TempDir) {
    fs::write(
        dir.path().join(".env"),
        "APP_ENV=dev\nDATABASE_URL=sqlite::memory:\nGREETING=base\n",
    )
    .unwrap();
    fs::write(
        dir.path().join(".env.test"),
        format!(
            "DATABASE_URL=sqlite://{}/test.db\nGREETING=test\n",
            dir.path().display()
        ),
    )
    .unwrap();
    fs::create_dir_all(dir.path().join("templates")).unwrap();
    fs::write(
        dir.path().join("templates/greeting.txt"),
        "{{ greeting }} from {{ app.env }}",
    )
    .unwrap();
}

fn process_env(vars: &[(&str, &str)]) -> Vec<(String, String)> {
    vars.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_test環境でエンティティマネージャが使えルートは未設定のまま() {
    let dir = TempDir::new().unwrap();
    setup_root(&dir);

    let bootstrapper = Bootstrapper::load_with(dir.path(), process_env(&[("APP_ENV", "test")])).unwrap();
    let sut = bootstrapper.create_application(None).await.unwrap();

    assert_eq!(bootstrapper.environment().get("GREETING"), Some("test"));
    assert!(sut.routes().is_none());
    assert!(sut.mailer().is_none());
    assert_eq!(sut.entity_manager().driver(), Driver::Sqlite);
    assert!(dir.path().join("test.db").exists());

    sqlx::query("CREATE TABLE visits (id INTEGER PRIMARY KEY)")
        .execute(sut.entity_manager().pool())
        .await
        .unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM visits")
        .fetch_one(sut.entity_manager().pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_ルート設定前はジェネレータを要求できず設定後は解決できる() {
    let dir = TempDir::new().unwrap();
    setup_root(&dir);
    let bootstrapper = Bootstrapper::load_with(dir.path(), process_env(&[("APP_ENV", "test")])).unwrap();
    let mut sut = bootstrapper.create_application(None).await.unwrap();

    assert!(matches!(
        sut.url_generator(),
        Err(AppError::PreconditionFailed(PreconditionError::RoutesNotSet))
    ));

    let mut routes = RouteTable::new();
    routes.add("profile", Route::new("/users/{id}")).unwrap();
    sut.set_routes(routes);

    let generator = sut.url_generator().unwrap();
    let params = BTreeMap::from([("id".to_string(), "7".to_string())]);
    assert_eq!(generator.generate("profile", &params).unwrap(), "/users/7");
    assert!(Arc::ptr_eq(&generator, &sut.url_generator().unwrap()));
}

#[tokio::test]
async fn test_テンプレートにグローバル変数が渡される() {
    let dir = TempDir::new().unwrap();
    setup_root(&dir);
    let bootstrapper = Bootstrapper::load_with(dir.path(), process_env(&[("APP_ENV", "test")])).unwrap();
    let mut sut = bootstrapper.create_application(None).await.unwrap();

    sut.set_twig_global("greeting", "hello").unwrap();
    sut.set_twig_global("greeting", "hi").unwrap();
    let rendered = sut.render("greeting.txt", &tera::Context::new()).unwrap();

    assert_eq!(rendered, "hi from test");
}

#[tokio::test]
async fn test_appキャッシュに読み書きできる() {
    let dir = TempDir::new().unwrap();
    setup_root(&dir);
    let bootstrapper = Bootstrapper::load_with(dir.path(), process_env(&[("APP_ENV", "test")])).unwrap();
    let sut = bootstrapper.create_application(None).await.unwrap();

    let cache = sut.cache("app").unwrap();
    cache.set_with("answer", &42, None, &["numbers"]).unwrap();

    assert_eq!(cache.get::<i32>("answer").unwrap(), Some(42));
    assert!(dir.path().join("var/cache/test/app").is_dir());
    assert_eq!(cache.invalidate_tags(&["numbers"]).unwrap(), 1);
    assert!(matches!(sut.cache("sessions"), Err(AppError::NotFound { .. })));
}

#[tokio::test]
async fn test_dev環境ではdebug_logにも書き出す() {
    let dir = TempDir::new().unwrap();
    setup_root(&dir);
    let bootstrapper = Bootstrapper::load_with(dir.path(), process_env(&[])).unwrap();
    let sut = bootstrapper.create_application(None).await.unwrap();

    let logger = sut.logger().unwrap();
    logger.with_default(|| {
        tracing::debug!("cache warmed");
        tracing::error!("mailer unreachable");
    });

    let log_dir = dir.path().join("var/log/dev");
    let debug_log = read(&log_dir.join("debug.log"));
    let app_log = read(&log_dir.join("app.log"));
    assert!(debug_log.contains("cache warmed"), "{debug_log}");
    assert!(debug_log.contains("mailer unreachable"), "{debug_log}");
    assert!(!app_log.contains("cache warmed"), "{app_log}");
    assert!(app_log.contains("mailer unreachable"), "{app_log}");
}

#[tokio::test]
async fn test_不正なdatabase_urlでは起動に失敗する() {
    let dir = TempDir::new().unwrap();
    setup_root(&dir);
    let bootstrapper = Bootstrapper::load_with(
        dir.path(),
        process_env(&[("DATABASE_URL", "mysql://root@localhost/app")]),
    )
    .unwrap();

    let result = bootstrapper.create_application(None).await;

    assert!(matches!(result, Err(AppError::Infra(_))));
}

/// プロセス環境変数を書き換えて元に戻す
struct EnvGuard(Vec<(&'static str, Option<String>)>);

impl EnvGuard {
    fn set(vars: &[(&'static str, &str)]) -> Self {
        let saved = vars
            .iter()
            .map(|(key, value)| {
                let previous = std::env::var(key).ok();
                unsafe { std::env::set_var(key, value) };
                (*key, previous)
            })
            .collect();
        Self(saved)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, previous) in &self.0 {
            match previous {
                Some(value) => unsafe { std::env::set_var(key, value) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }
}

#[tokio::test]
#[serial]
async fn test_プロセス環境変数のapp_rootとcgi変数を使う() {
    let dir = TempDir::new().unwrap();
    setup_root(&dir);
    let root = dir.path().display().to_string();
    let _guard = EnvGuard::set(&[
        ("APP_ROOT", &root),
        ("APP_ENV", "test"),
        ("REQUEST_URI", "/users/42?tab=posts"),
        ("HTTP_HOST", "pixiekat.test"),
    ]);

    let bootstrapper = Bootstrapper::from_process_env().unwrap();
    let sut = bootstrapper.create_application(None).await.unwrap();

    assert_eq!(bootstrapper.config().root.as_path(), Path::new(&root));
    assert_eq!(sut.request().path_info(), "/users/42");
    assert_eq!(sut.request().query_string(), Some("tab=posts"));
    assert_eq!(sut.request_context().unwrap().host, "pixiekat.test");
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}
