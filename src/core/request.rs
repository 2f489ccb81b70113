//! Per-request state handed to views, filters and composers

use crate::core::auth::AuthContext;
use crate::core::key::Key;
use axum::http::Method;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Query-string or form arguments, in arrival order
///
/// Repeated names keep the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestArgs {
    values: IndexMap<String, String>,
}

impl RequestArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` string
    pub fn parse(raw: &str) -> Self {
        let mut values = IndexMap::new();
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let (Some(name), Some(value)) = (decode(name), decode(value)) else {
                tracing::debug!(pair, "skipping undecodable argument");
                continue;
            };
            values.insert(name, value);
        }
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Whether the argument is present with a truthy value
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(v) if !v.is_empty() && v != "0" && v != "false")
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.values.shift_remove(name);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Names starting with `prefix`
    pub fn names_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.values
            .keys()
            .map(String::as_str)
            .filter(move |k| k.starts_with(prefix))
    }

    pub fn to_query_string(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn decode(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .ok()
        .map(|s| s.into_owned())
}

/// Append a query string to a path when there is one
pub fn with_query(path: &str, args: &RequestArgs) -> String {
    if args.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, args.to_query_string())
    }
}

/// Arguments captured from the matched URL pattern
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewArgs {
    pub key: Option<Key>,
    pub ancestor_key: Option<Key>,
    pub page: Option<usize>,
}

/// Everything a view needs to know about the current request
#[derive(Debug, Clone)]
pub struct RequestState {
    pub method: Method,
    /// Path without query string, prefix included
    pub path: String,
    pub args: RequestArgs,
    pub form: RequestArgs,
    pub view_args: ViewArgs,
    pub auth: AuthContext,
    /// Request clock used by relative filters
    pub now: DateTime<Utc>,
}

impl RequestState {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            args: RequestArgs::new(),
            form: RequestArgs::new(),
            view_args: ViewArgs::default(),
            auth: AuthContext::Anonymous,
            now: Utc::now(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, form: RequestArgs) -> Self {
        Self::new(Method::POST, path).with_form(form)
    }

    pub fn with_args(mut self, args: RequestArgs) -> Self {
        self.args = args;
        self
    }

    pub fn with_query(self, raw: &str) -> Self {
        self.with_args(RequestArgs::parse(raw))
    }

    pub fn with_form(mut self, form: RequestArgs) -> Self {
        self.form = form;
        self
    }

    pub fn with_view_args(mut self, view_args: ViewArgs) -> Self {
        self.view_args = view_args;
        self
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn is_post(&self) -> bool {
        self.method == Method::POST
    }

    /// Presence alone marks a popup, whatever the value
    pub fn is_popup(&self) -> bool {
        self.args.contains("_popup")
    }

    pub fn is_embed(&self) -> bool {
        self.args.contains("_embed")
    }

    /// The current path with `args` as its query string
    pub fn url_with(&self, args: &RequestArgs) -> String {
        with_query(&self.path, args)
    }

    /// The current URL
    pub fn full_url(&self) -> String {
        self.url_with(&self.args)
    }
}
