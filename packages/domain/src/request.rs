//! # 受信リクエスト
//!
//! 現在処理中の HTTP リクエストを表現する。
//!
//! 構築元は 2 種類:
//!
//! - CGI 形式のプロセス変数（`REQUEST_METHOD`, `REQUEST_URI`, `HTTP_HOST` など）
//! - axum / hyper が受け取った [`http::request::Parts`]
//!
//! テンプレートのグローバル変数 `app.request` として公開されるため、
//! [`Serialize`] を実装する。

use std::collections::HashMap;

use http::{HeaderMap, HeaderName, HeaderValue, Method, request::Parts};
use serde::{Serialize, ser::SerializeStruct};

const DEFAULT_HOST: &str = "localhost";

/// 現在のリクエスト
#[derive(Debug, Clone)]
pub struct Request {
    method:       Method,
    scheme:       String,
    host:         String,
    port:         u16,
    base_url:     String,
    path_info:    String,
    query_string: Option<String>,
    headers:      HeaderMap,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method:       Method::GET,
            scheme:       "http".to_string(),
            host:         DEFAULT_HOST.to_string(),
            port:         80,
            base_url:     String::new(),
            path_info:    "/".to_string(),
            query_string: None,
            headers:      HeaderMap::new(),
        }
    }
}

impl Request {
    /// プロセス環境変数（CGI 形式）からリクエストを構築する
    pub fn from_process_env() -> Self {
        Self::from_cgi_vars(std::env::vars())
    }

    /// CGI 形式の変数からリクエストを構築する
    ///
    /// 未設定の変数はデフォルト値（`GET`, `/`, `localhost`, ポート 80）になる。
    /// `HTTP_*` 変数はリクエストヘッダとして取り込む。
    pub fn from_cgi_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let var = |key: &str| vars.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let method = var("REQUEST_METHOD")
            .and_then(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
            .unwrap_or(Method::GET);

        let secure = var("HTTPS").is_some_and(|v| !v.eq_ignore_ascii_case("off"));
        let scheme = if secure { "https" } else { "http" };

        let (host, host_port) = match var("HTTP_HOST") {
            Some(http_host) => split_host_port(http_host),
            None => (var("SERVER_NAME").unwrap_or(DEFAULT_HOST).to_string(), None),
        };
        let port = host_port
            .or_else(|| var("SERVER_PORT").and_then(|p| p.parse().ok()))
            .unwrap_or(if secure { 443 } else { 80 });

        let (path, uri_query) = match var("REQUEST_URI") {
            Some(uri) => split_path_query(uri),
            None => ("/".to_string(), None),
        };
        let query_string = var("QUERY_STRING").map(str::to_string).or(uri_query);

        let (base_url, path_info) = split_base_url(&path, var("SCRIPT_NAME").unwrap_or(""));

        let mut headers = HeaderMap::new();
        for (key, value) in &vars {
            let Some(name) = key.strip_prefix("HTTP_") else {
                continue;
            };
            let name = name.to_ascii_lowercase().replace('_', "-");
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        Self {
            method,
            scheme: scheme.to_string(),
            host,
            port,
            base_url,
            path_info,
            query_string,
            headers,
        }
    }

    /// HTTP リクエストのヘッダ部からリクエストを構築する
    ///
    /// ホストは `Host` ヘッダ、なければ URI の authority から取得する。
    pub fn from_http_parts(parts: &Parts) -> Self {
        let scheme = parts.uri.scheme_str().unwrap_or("http").to_string();
        let secure = scheme == "https";

        let authority = parts
            .headers
            .get(http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()));
        let (host, port) = match authority {
            Some(authority) => split_host_port(&authority),
            None => (DEFAULT_HOST.to_string(), None),
        };

        Self {
            method: parts.method.clone(),
            scheme,
            host,
            port: port.unwrap_or(if secure { 443 } else { 80 }),
            base_url: String::new(),
            path_info: parts.uri.path().to_string(),
            query_string: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// フロントコントローラのパス（例: `/index.php`）。ルート直下なら空文字列
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// ベース URL を除いたパス
    pub fn path_info(&self) -> &str {
        &self.path_info
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 既定ポートを省略した `scheme://host[:port]`
    pub fn scheme_and_http_host(&self) -> String {
        let default_port = if self.is_secure() { 443 } else { 80 };
        if self.port == default_port {
            format!("{}://{}", self.scheme, self.host)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }

    /// 完全な URI
    pub fn uri(&self) -> String {
        let mut uri = format!(
            "{}{}{}",
            self.scheme_and_http_host(),
            self.base_url,
            self.path_info
        );
        if let Some(query) = &self.query_string {
            uri.push('?');
            uri.push_str(query);
        }
        uri
    }
}

impl Serialize for Request {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Request", 7)?;
        state.serialize_field("method", self.method.as_str())?;
        state.serialize_field("scheme", &self.scheme)?;
        state.serialize_field("host", &self.host)?;
        state.serialize_field("port", &self.port)?;
        state.serialize_field("path", &self.path_info)?;
        state.serialize_field("query_string", &self.query_string)?;
        state.serialize_field("uri", &self.uri())?;
        state.end()
    }
}

fn split_host_port(authority: &str) -> (String, Option<u16>) {
    match authority.rsplit_once(':') {
        // IPv6 リテラル（`[::1]`）の内側のコロンは区切りではない
        Some((host, port)) if !port.contains(']') => match port.parse() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (authority.to_string(), None),
        },
        _ => (authority.to_string(), None),
    }
}

fn split_path_query(uri: &str) -> (String, Option<String>) {
    let (path, query) = match uri.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (uri, None),
    };
    let path = if path.is_empty() { "/" } else { path };
    (path.to_string(), query.filter(|q| !q.is_empty()))
}

/// リクエストパスをベース URL とパス情報に分割する
fn split_base_url(path: &str, script_name: &str) -> (String, String) {
    let candidates = [
        Some(script_name),
        script_name.rsplit_once('/').map(|(dir, _)| dir),
    ];
    for base in candidates.into_iter().flatten() {
        if base.is_empty() || base == "/" {
            continue;
        }
        let rest = path
            .strip_prefix(base)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'));
        if let Some(rest) = rest {
            let path_info = if rest.is_empty() { "/" } else { rest };
            return (base.to_string(), path_info.to_string());
        }
    }
    (String::new(), path.to_string())
}
