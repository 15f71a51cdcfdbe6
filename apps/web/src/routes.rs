//! # ルート定義
//!
//! HTTP サーバが使用するルートテーブル。各ルートは同名のテンプレート
//! （`{ルート名}.html`）で表示される。

use http::Method;
use pixiekat_domain::routing::{Route, RouteTable, RoutingError};

/// 既定のルートテーブルを構築する
///
/// | 名前 | パス | 備考 |
/// |------|------|------|
/// | `home` | `/` | |
/// | `hello` | `/hello/{name}` | `name` の既定値は `world` |
pub fn default_routes() -> Result<RouteTable, RoutingError> {
    let mut routes = RouteTable::new();
    routes
        .add("home", Route::new("/").with_methods([Method::GET, Method::HEAD]))?
        .add(
            "hello",
            Route::new("/hello/{name}")
                .with_default("name", "world")
                .with_requirement("name", "[A-Za-z0-9_-]+")
                .with_methods([Method::GET, Method::HEAD]),
        )?;
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use pixiekat_domain::routing::{RequestContext, UrlGenerator, UrlMatcher};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_既定のルートで生成とマッチングができる() {
        let routes = Arc::new(default_routes().unwrap());
        let generator = UrlGenerator::new(routes.clone(), RequestContext::default());
        let matcher = UrlMatcher::new(routes, RequestContext::default());

        assert_eq!(generator.generate("home", &BTreeMap::new()).unwrap(), "/");
        assert_eq!(generator.generate("hello", &BTreeMap::new()).unwrap(), "/hello");
        assert_eq!(matcher.match_path("/hello").unwrap().param("name"), Some("world"));
        assert_eq!(matcher.match_path("/hello/kat").unwrap().param("name"), Some("kat"));
    }
}
