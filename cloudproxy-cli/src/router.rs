//! HTTP surface: maps `/{namespace}/{region}/{bucket}/{*key}` onto the pipeline.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::extract::rejection::PathRejection;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use axum_extra::extract::CookieJar;
use cloudproxy_engine::error::empty_response;
use cloudproxy_engine::{Credential, FetchPipeline, Namespace, ObjectId, ProxyRequest, Verb};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

pub const OBJECT_ROUTE: &str = "/{namespace}/{region}/{bucket}/{*key}";

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<FetchPipeline>,
    trusted: Arc<Vec<IpAddr>>,
}

impl AppState {
    pub fn new(pipeline: Arc<FetchPipeline>, trusted: Vec<IpAddr>) -> Self {
        Self {
            pipeline,
            trusted: Arc::new(trusted),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            OBJECT_ROUTE,
            get(get_object).head(head_object).delete(delete_object),
        )
        .fallback(|| async { empty_response(StatusCode::NOT_FOUND) })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Undecodable paths are rejected by `proxy` with an empty 404.
type ObjectPath = Result<Path<(String, String, String, String)>, PathRejection>;

async fn get_object(state: State<AppState>, path: ObjectPath, request: Request) -> Response {
    proxy(Verb::Get, state, path, request).await
}

async fn head_object(state: State<AppState>, path: ObjectPath, request: Request) -> Response {
    proxy(Verb::Head, state, path, request).await
}

async fn delete_object(state: State<AppState>, path: ObjectPath, request: Request) -> Response {
    proxy(Verb::Delete, state, path, request).await
}

async fn proxy(
    verb: Verb,
    State(state): State<AppState>,
    path: ObjectPath,
    request: Request,
) -> Response {
    let Path((namespace, region, bucket, key)) = match path {
        Ok(path) => path,
        Err(rejection) => {
            debug!(error = %rejection, "Malformed object path");
            return empty_response(StatusCode::NOT_FOUND);
        }
    };

    let Ok(namespace) = namespace.parse::<Namespace>() else {
        debug!(namespace = %namespace, "Unknown namespace");
        return empty_response(StatusCode::NOT_FOUND);
    };

    if let Some(ConnectInfo(remote)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        if !state.trusted.contains(&remote.ip()) {
            warn!("{} {verb} {bucket}/{key}", remote.ip());
        }
    }

    let auth = &state.pipeline.config().auth;
    let credential = if auth.exempt_path.as_deref() == Some(request.uri().path()) {
        Credential::Exempt
    } else {
        match CookieJar::from_headers(request.headers()).get(&auth.cookie_name) {
            Some(cookie) => Credential::Cookie(cookie.value().to_string()),
            None => Credential::Missing,
        }
    };

    let range = request
        .headers()
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let object = ObjectId::new(namespace, region, bucket, key);
    let proxy_request = ProxyRequest::new(verb, object, credential).with_range_option(range);
    state.pipeline.handle(proxy_request).await
}
