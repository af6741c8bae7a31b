//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: maps (method, path) to a
//! resource operation, dispatches it, and writes the access log line.

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderName, HeaderValue, REFERER, SERVER, USER_AGENT};
use hyper::{Method, Request, Response, StatusCode, Version};
use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::resource;
use crate::config::AppState;
use crate::http;
use crate::logger::{self, AccessLogEntry};

/// Operation selected by method and path shape
#[derive(Debug, PartialEq, Eq)]
pub enum Operation {
    List,
    Get(String),
    Create,
    Update(String),
    Delete(String),
}

/// A matched `/<resource>` or `/<resource>/<id>` request
#[derive(Debug, PartialEq, Eq)]
pub struct Route {
    pub resource: String,
    pub operation: Operation,
}

/// Match a request against the CRUD routing table.
///
/// Empty path segments are ignored, so `/todos/` routes like `/todos`.
pub fn resolve_route(method: &Method, path: &str) -> Option<Route> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let (resource, id) = match segments.as_slice() {
        [resource] => (*resource, None),
        [resource, id] => (*resource, Some(*id)),
        _ => return None,
    };

    let operation = match (method, id) {
        (&Method::GET, None) => Operation::List,
        (&Method::POST, None) => Operation::Create,
        (&Method::GET, Some(id)) => Operation::Get(id.to_string()),
        (&Method::PUT, Some(id)) => Operation::Update(id.to_string()),
        (&Method::DELETE, Some(id)) => Operation::Delete(id.to_string()),
        _ => return None,
    };

    Some(Route {
        resource: resource.to_string(),
        operation,
    })
}

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let started = Instant::now();
    let entry = state
        .config
        .logging
        .access_log
        .then(|| access_entry(&req, peer_addr));

    let mut response = dispatch(req, &state).await;

    if let Ok(value) = HeaderValue::from_str(&state.config.http.server_name) {
        response.headers_mut().insert(SERVER, value);
    }

    if let Some(mut entry) = entry {
        entry.status = response.status().as_u16();
        entry.body_bytes = response.body().size_hint().exact().unwrap_or_default();
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

async fn dispatch<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let health = &state.config.http.health;
    let path = req.uri().path();

    // Health check endpoints take priority over resources
    if health.enabled && *req.method() == Method::GET {
        if path == health.liveness_path {
            return http::build_health_response("ok");
        }
        if path == health.readiness_path {
            return readiness(state).await;
        }
    }

    let Some(route) = resolve_route(req.method(), path) else {
        logger::log_debug(&format!("No route for {} {path}", req.method()));
        return http::build_route_not_found_response();
    };
    let Some(resource) = state.resource(&route.resource) else {
        logger::log_debug(&format!("Unknown resource '{}'", route.resource));
        return http::build_route_not_found_response();
    };

    let max_body_size = state.config.http.max_body_size;
    match route.operation {
        Operation::List => resource::list(resource).await,
        Operation::Get(id) => resource::get_one(resource, &id).await,
        Operation::Create => resource::create(resource, req, max_body_size).await,
        Operation::Update(id) => resource::update(resource, &id, req, max_body_size).await,
        Operation::Delete(id) => resource::delete(resource, &id).await,
    }
}

/// Ready when every backing file can be loaded
async fn readiness(state: &AppState) -> Response<Full<Bytes>> {
    let mut failing = Vec::new();
    for resource in state.resources() {
        if let Err(e) = resource.store.load_all().await {
            logger::log_warning(&format!("Readiness: /{} not ready: {e}", resource.name));
            failing.push(resource.name.as_str());
        }
    }

    if failing.is_empty() {
        http::build_health_response("ok")
    } else {
        http::build_json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &serde_json::json!({ "status": "unavailable", "resources": failing }),
        )
    }
}

fn access_entry<B>(req: &Request<B>, peer_addr: SocketAddr) -> AccessLogEntry {
    let mut entry = AccessLogEntry::new(
        peer_addr.ip().to_string(),
        req.method().to_string(),
        req.uri().path().to_string(),
    );
    entry.query = req.uri().query().map(ToString::to_string);
    entry.http_version = match req.version() {
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        _ => "1.1",
    }
    .to_string();
    entry.referer = header_value(req, &REFERER);
    entry.user_agent = header_value(req, &USER_AGENT);
    entry
}

fn header_value<B>(req: &Request<B>, name: &HeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}
