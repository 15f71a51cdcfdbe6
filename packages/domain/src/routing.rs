//! # ルーティング
//!
//! 名前付きルートの順序付きコレクション（[`RouteTable`]）と、それを使う
//! 2 つの派生オブジェクトを提供する。
//!
//! - [`UrlGenerator`]: ルート名 + パラメータ → URL
//! - [`UrlMatcher`]: パス → ルート名 + パラメータ
//!
//! どちらも [`RequestContext`]（ベース URL、メソッド、ホストなど）に束縛される。
//!
//! ## パスパターン
//!
//! `{name}` をプレースホルダとして扱う。各プレースホルダには正規表現の
//! 制約（requirement）とデフォルト値を設定できる。末尾から連続する
//! デフォルト値付きプレースホルダは省略可能になる。
//!
//! ```text
//! /blog/{page}   page のデフォルトが "1" の場合
//!   /blog        → page = "1"
//!   /blog/3      → page = "3"
//! ```

use std::{collections::BTreeMap, fmt, sync::Arc};

use http::Method;
use regex::Regex;
use thiserror::Error;

use crate::request::Request;

const DEFAULT_REQUIREMENT: &str = "[^/]+";

/// 変数の直前に置かれたとき、変数の一部ではなく区切りとして扱う文字
const SEPARATORS: &str = "/,;.:-_~+*=@|";

/// ルーティングで発生するエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// パスパターンが不正
    #[error("ルート `{path}` のパターンが不正です: {reason}")]
    InvalidPattern { path: String, reason: String },

    /// 指定された名前のルートが存在しない
    #[error("ルート `{0}` は存在しません")]
    RouteNotFound(String),

    /// URL 生成に必要なパラメータが不足している
    #[error("ルート `{route}` の URL 生成に必要なパラメータが不足しています: {}", .missing.join(", "))]
    MissingParameters { route: String, missing: Vec<String> },

    /// パラメータが制約に一致しない
    #[error("ルート `{route}` のパラメータ `{parameter}` は `{requirement}` に一致する必要があります（値: `{value}`）")]
    InvalidParameter {
        route:       String,
        parameter:   String,
        requirement: String,
        value:       String,
    },

    /// パスに一致するルートが存在しない
    #[error("パス `{0}` に一致するルートがありません")]
    ResourceNotFound(String),

    /// パスは一致したがメソッドが許可されていない
    #[error("メソッドが許可されていません（許可: {}）", .allowed.join(", "))]
    MethodNotAllowed { allowed: Vec<String> },
}

// =============================================================================
// RequestContext
// =============================================================================

/// ルーティング用のリクエスト情報
///
/// [`Request`] から URL 生成・マッチングに必要な部分だけを取り出したもの。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub base_url:     String,
    pub path_info:    String,
    pub method:       Method,
    pub host:         String,
    pub scheme:       String,
    pub http_port:    u16,
    pub https_port:   u16,
    pub query_string: String,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            base_url:     String::new(),
            path_info:    "/".to_string(),
            method:       Method::GET,
            host:         "localhost".to_string(),
            scheme:       "http".to_string(),
            http_port:    80,
            https_port:   443,
            query_string: String::new(),
        }
    }
}

impl RequestContext {
    /// リクエストからコンテキストを構築する
    pub fn from_request(request: &Request) -> Self {
        let (http_port, https_port) = if request.is_secure() {
            (80, request.port())
        } else {
            (request.port(), 443)
        };
        Self {
            base_url: request.base_url().to_string(),
            path_info: request.path_info().to_string(),
            method: request.method().clone(),
            host: request.host().to_string(),
            scheme: request.scheme().to_string(),
            http_port,
            https_port,
            query_string: request.query_string().unwrap_or_default().to_string(),
        }
    }

    /// 既定ポートを省略した `scheme://host[:port]`
    fn scheme_and_host(&self) -> String {
        let port = match self.scheme.as_str() {
            "https" if self.https_port != 443 => Some(self.https_port),
            "http" if self.http_port != 80 => Some(self.http_port),
            _ => None,
        };
        match port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }
}

// =============================================================================
// Route
// =============================================================================

/// ルート定義
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    path:         String,
    defaults:     BTreeMap<String, String>,
    requirements: BTreeMap<String, String>,
    methods:      Vec<Method>,
}

impl Route {
    /// パスパターンからルートを作成する
    ///
    /// 先頭の `/` は省略可能。
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            path,
            defaults: BTreeMap::new(),
            requirements: BTreeMap::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    /// プレースホルダに正規表現の制約を付ける
    pub fn with_requirement(mut self, name: impl Into<String>, regex: impl Into<String>) -> Self {
        self.requirements.insert(name.into(), regex.into());
        self
    }

    /// 許可するメソッドを設定する（未設定ならすべて許可）
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    pub fn default_value(&self, name: &str) -> Option<&str> {
        self.defaults.get(name).map(String::as_str)
    }

    pub fn requirements(&self) -> &BTreeMap<String, String> {
        &self.requirements
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    fn allows(&self, method: &Method) -> bool {
        if self.methods.is_empty() || self.methods.contains(method) {
            return true;
        }
        *method == Method::HEAD && self.methods.contains(&Method::GET)
    }

    fn compile(&self) -> Result<CompiledRoute, RoutingError> {
        let invalid = |reason: String| RoutingError::InvalidPattern {
            path: self.path.clone(),
            reason,
        };

        let tokens = tokenize(&self.path).map_err(invalid)?;

        let variables: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Variable { name, .. } => Some(name.clone()),
                Token::Text(_) => None,
            })
            .collect();

        // 末尾から連続するデフォルト値付き変数は省略可能
        let first_optional = tokens
            .iter()
            .rposition(|t| match t {
                Token::Variable { name, .. } => !self.defaults.contains_key(name),
                Token::Text(_) => true,
            })
            .map_or(0, |i| i + 1);

        // 明示的な制約がない変数は、次の区切り文字を含まない値に一致させる
        let mut requirements = BTreeMap::new();
        for (index, token) in tokens.iter().enumerate() {
            let Token::Variable { name, .. } = token else {
                continue;
            };
            let requirement = match self.requirements.get(name) {
                Some(explicit) => explicit.clone(),
                None => match tokens.get(index + 1).and_then(Token::leading_separator) {
                    Some(separator) if separator != '/' => {
                        format!("[^/{}]+", regex::escape(&separator.to_string()))
                    }
                    _ => DEFAULT_REQUIREMENT.to_string(),
                },
            };
            requirements.insert(name.clone(), requirement);
        }

        let mut pattern = String::from("^");
        for (index, token) in tokens.iter().enumerate() {
            let optional = index >= first_optional;
            match token {
                Token::Text(text) => pattern.push_str(&regex::escape(text)),
                Token::Variable { prefix, name } => {
                    // 先頭トークンの区切り文字は省略できない（`/{page}` は `/` に一致する）
                    if optional && index == 0 {
                        pattern.push_str(&regex::escape(prefix));
                        pattern.push_str("(?:");
                    } else {
                        if optional {
                            pattern.push_str("(?:");
                        }
                        pattern.push_str(&regex::escape(prefix));
                    }
                    pattern.push_str(&format!("(?P<{name}>{})", requirements[name]));
                }
            }
        }
        for _ in first_optional..tokens.len() {
            pattern.push_str(")?");
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| invalid(e.to_string()))?;

        let mut requirement_regexes = BTreeMap::new();
        for (name, requirement) in &requirements {
            let anchored = format!("^(?:{requirement})$");
            let compiled = Regex::new(&anchored).map_err(|e| invalid(e.to_string()))?;
            requirement_regexes.insert(name.clone(), compiled);
        }

        Ok(CompiledRoute {
            route: self.clone(),
            tokens,
            variables,
            regex,
            requirements,
            requirement_regexes,
        })
    }
}

#[derive(Debug, Clone)]
enum Token {
    Text(String),
    /// 直前の区切り文字（`/` など）を含む変数
    Variable { prefix: String, name: String },
}

impl Token {
    fn leading_separator(&self) -> Option<char> {
        let first = match self {
            Self::Text(text) => text.chars().next(),
            Self::Variable { prefix, .. } => prefix.chars().next(),
        };
        first.filter(|c| SEPARATORS.contains(*c))
    }
}

fn tokenize(path: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        let end = rest[start..]
            .find('}')
            .map(|i| start + i)
            .ok_or_else(|| "閉じ括弧 `}` がありません".to_string())?;
        let name = &rest[start + 1..end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("変数名 `{name}` は英数字とアンダースコアのみ使用できます"));
        }
        if tokens
            .iter()
            .any(|t| matches!(t, Token::Variable { name: n, .. } if n == name))
        {
            return Err(format!("変数名 `{name}` が重複しています"));
        }

        let mut text = &rest[..start];
        let mut prefix = "";
        if let Some(last) = text.chars().next_back().filter(|c| SEPARATORS.contains(*c)) {
            let split = text.len() - last.len_utf8();
            prefix = &text[split..];
            text = &text[..split];
        }
        if !text.is_empty() {
            tokens.push(Token::Text(text.to_string()));
        }
        tokens.push(Token::Variable {
            prefix: prefix.to_string(),
            name:   name.to_string(),
        });
        rest = &rest[end + 1..];
    }
    if rest.contains('}') {
        return Err("開き括弧 `{` のない `}` があります".to_string());
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    route:               Route,
    tokens:              Vec<Token>,
    variables:           Vec<String>,
    regex:               Regex,
    requirements:        BTreeMap<String, String>,
    requirement_regexes: BTreeMap<String, Regex>,
}

// =============================================================================
// RouteTable
// =============================================================================

/// 名前付きルートの順序付きコレクション
///
/// マッチングは追加順に評価される。既存の名前で追加すると、
/// 古い定義は削除され末尾に追加し直される。
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<(String, CompiledRoute)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// ルートを追加する
    ///
    /// パターンや制約の正規表現が不正な場合はエラーを返す。
    pub fn add(&mut self, name: impl Into<String>, route: Route) -> Result<&mut Self, RoutingError> {
        let name = name.into();
        let compiled = route.compile()?;
        self.routes.retain(|(existing, _)| *existing != name);
        self.routes.push((name, compiled));
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Route> {
        self.find(name).map(|c| &c.route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// 追加順にルート名と定義を返す
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Route)> {
        self.routes
            .iter()
            .map(|(name, compiled)| (name.as_str(), &compiled.route))
    }

    fn find(&self, name: &str) -> Option<&CompiledRoute> {
        self.routes
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, compiled)| compiled)
    }
}

// =============================================================================
// UrlGenerator
// =============================================================================

/// ルート名から URL を生成する
#[derive(Debug, Clone)]
pub struct UrlGenerator {
    routes:  Arc<RouteTable>,
    context: RequestContext,
}

impl UrlGenerator {
    pub fn new(routes: Arc<RouteTable>, context: RequestContext) -> Self {
        Self { routes, context }
    }

    /// 生成時に束縛されたルートテーブル
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// ベース URL 付きの絶対パスを生成する
    ///
    /// パスに現れないパラメータはクエリ文字列として付与する。
    /// 末尾の省略可能な変数がデフォルト値と等しい場合は省略する。
    pub fn generate(
        &self,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<String, RoutingError> {
        let compiled = self
            .routes
            .find(name)
            .ok_or_else(|| RoutingError::RouteNotFound(name.to_string()))?;
        let route = &compiled.route;

        let mut values = route.defaults.clone();
        values.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let missing: Vec<String> = compiled
            .variables
            .iter()
            .filter(|v| !values.contains_key(*v))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(RoutingError::MissingParameters {
                route: name.to_string(),
                missing,
            });
        }

        for variable in &compiled.variables {
            let value = &values[variable];
            if !compiled.requirement_regexes[variable].is_match(value) {
                return Err(RoutingError::InvalidParameter {
                    route:       name.to_string(),
                    parameter:   variable.clone(),
                    requirement: compiled.requirements[variable].clone(),
                    value:       value.clone(),
                });
            }
        }

        let mut segments = Vec::new();
        let mut optional = true;
        for token in compiled.tokens.iter().rev() {
            match token {
                Token::Text(text) => {
                    optional = false;
                    segments.push(text.clone());
                }
                Token::Variable { prefix, name } => {
                    let value = &values[name];
                    if optional && route.default_value(name) == Some(value.as_str()) {
                        continue;
                    }
                    optional = false;
                    segments.push(format!("{prefix}{}", encode_path_segment(value)));
                }
            }
        }
        segments.reverse();
        let mut path = segments.concat();
        if path.is_empty() {
            path.push('/');
        }

        let query: Vec<String> = params
            .iter()
            .filter(|(key, value)| {
                !compiled.variables.contains(key)
                    && route.default_value(key) != Some(value.as_str())
            })
            .map(|(key, value)| {
                format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
            })
            .collect();

        let mut url = format!("{}{}", self.context.base_url, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        Ok(url)
    }

    /// スキーム・ホスト付きの URL を生成する
    pub fn generate_absolute(
        &self,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<String, RoutingError> {
        let path = self.generate(name, params)?;
        Ok(format!("{}{}", self.context.scheme_and_host(), path))
    }
}

fn encode_path_segment(value: &str) -> String {
    urlencoding::encode(value).replace("%2F", "/")
}

// =============================================================================
// UrlMatcher
// =============================================================================

/// マッチしたルート
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// ルート名
    pub route:  String,
    /// デフォルト値にパスから取り出した値を上書きしたパラメータ
    pub params: BTreeMap<String, String>,
}

impl RouteMatch {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

impl fmt::Display for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.route)
    }
}

/// パスからルートを解決する
#[derive(Debug, Clone)]
pub struct UrlMatcher {
    routes:  Arc<RouteTable>,
    context: RequestContext,
}

impl UrlMatcher {
    pub fn new(routes: Arc<RouteTable>, context: RequestContext) -> Self {
        Self { routes, context }
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// コンテキストのメソッドでパスに一致する最初のルートを返す
    ///
    /// パターンに一致してもメソッドが許可されていないルートはスキップし、
    /// 一致するルートが他になければ [`RoutingError::MethodNotAllowed`] を返す。
    pub fn match_path(&self, path: &str) -> Result<RouteMatch, RoutingError> {
        let mut allowed: Vec<String> = Vec::new();

        for (name, compiled) in &self.routes.routes {
            let Some(captures) = compiled.regex.captures(path) else {
                continue;
            };
            if !compiled.route.allows(&self.context.method) {
                for method in &compiled.route.methods {
                    if !allowed.iter().any(|m| m == method.as_str()) {
                        allowed.push(method.as_str().to_string());
                    }
                }
                continue;
            }

            let mut params = compiled.route.defaults.clone();
            for variable in &compiled.variables {
                if let Some(value) = captures.name(variable) {
                    let decoded = urlencoding::decode(value.as_str())
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| value.as_str().to_string());
                    params.insert(variable.clone(), decoded);
                }
            }
            return Ok(RouteMatch {
                route: name.clone(),
                params,
            });
        }

        if allowed.is_empty() {
            Err(RoutingError::ResourceNotFound(path.to_string()))
        } else {
            Err(RoutingError::MethodNotAllowed { allowed })
        }
    }

    /// コンテキストのパス情報でマッチングする
    pub fn match_request(&self) -> Result<RouteMatch, RoutingError> {
        self.match_path(&self.context.path_info)
    }
}
