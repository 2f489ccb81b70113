//! HTTP entry point of the admin
//!
//! Every request under the prefix goes through [`dispatch`]: identify the
//! user, send anonymous visitors to the login page, resolve the view, check
//! its permission and run it.

use crate::core::auth::AuthContext;
use crate::core::error::{KibbleError, RequestError};
use crate::core::request::{RequestArgs, RequestState};
use crate::server::host::Kibble;
use crate::views::KibbleView;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub const INDEX_TEMPLATE: &str = "kibble/index.html";
pub const FORBIDDEN_TEMPLATE: &str = "kibble/403.html";
pub const NOT_FOUND_TEMPLATE: &str = "kibble/404.html";

/// Router answering every admin URL
pub fn router(host: Arc<Kibble>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(host)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

pub async fn dispatch(
    State(host): State<Arc<Kibble>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handle(host.clone(), method, uri, headers, body).await {
        Ok(response) => response,
        Err(KibbleError::Request(RequestError::NotFound { path })) => {
            tracing::debug!(path = %path, "not found");
            render_status(&host, NOT_FOUND_TEMPLATE, StatusCode::NOT_FOUND, &path).await
        }
        Err(err) => err.into_response(),
    }
}

async fn handle(
    host: Arc<Kibble>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, KibbleError> {
    let full_path = uri.path().to_string();
    let relative = strip_prefix(host.config().prefix(), &full_path).ok_or_else(|| RequestError::NotFound {
        path: full_path.clone(),
    })?;

    let auth = host
        .authenticator()
        .extract_context(&headers)
        .await
        .map_err(|e| RequestError::BadRequest { message: e.to_string() })?;
    if !host.authenticator().is_logged_in(&auth) {
        tracing::debug!(path = %full_path, "redirecting anonymous visitor to login");
        return Ok(Redirect::to(&host.authenticator().login_url()).into_response());
    }

    let mut request = RequestState::new(method.clone(), full_path.clone())
        .with_query(uri.query().unwrap_or_default())
        .with_auth(auth);
    if method == Method::POST {
        request = request.with_form(RequestArgs::parse(&String::from_utf8_lossy(&body)));
    }

    if relative == "/" {
        return index(&host, request).await;
    }

    let (definition, view_args) = host.registry().resolve(&method, relative).map_err(|e| match e {
        RequestError::NotFound { .. } => RequestError::NotFound {
            path: full_path.clone(),
        },
        other => other,
    })?;
    let key = view_args.key.clone();
    let view = KibbleView::new(host.clone(), definition, request.with_view_args(view_args));
    if !view.has_permission_for(key.as_ref()).await {
        tracing::debug!(view = %view.definition().view_name(), "permission denied");
        return Ok(render_status(&host, FORBIDDEN_TEMPLATE, StatusCode::FORBIDDEN, &full_path).await);
    }
    view.dispatch().await
}

/// The part of `path` below the prefix, always starting with `/`
fn strip_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    match rest {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

async fn index(host: &Arc<Kibble>, request: RequestState) -> Result<Response, KibbleError> {
    if request.method != Method::GET && request.method != Method::HEAD {
        return Err(RequestError::MethodNotAllowed {
            method: request.method.to_string(),
        }
        .into());
    }
    let permitted = host
        .authenticator()
        .has_permission_for(&request.auth, None, "index", None)
        .await;
    if !permitted {
        return Ok(render_status(host, FORBIDDEN_TEMPLATE, StatusCode::FORBIDDEN, &request.path).await);
    }

    let mut context = tera::Context::new();
    context.insert("kibble", &host.site_summary(&request.auth).await);
    context.insert("request_url", &request.full_url());
    context.insert("is_popup", &request.is_popup());
    context.insert("is_embed", &request.is_embed());
    host.render(&[INDEX_TEMPLATE.to_string()], &context)
}

async fn render_status(host: &Kibble, template: &str, status: StatusCode, path: &str) -> Response {
    let mut context = tera::Context::new();
    context.insert("kibble", &host.site_summary(&AuthContext::Anonymous).await);
    context.insert("request_url", path);
    context.insert("is_popup", &false);
    context.insert("is_embed", &false);
    match host.render(&[template.to_string()], &context) {
        Ok(page) => (status, page).into_response(),
        Err(err) => err.into_response(),
    }
}
