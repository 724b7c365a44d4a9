//! HTTP routing
//!
//! | Method | Path                          | Handler                  |
//! |--------|-------------------------------|--------------------------|
//! | POST   | `/title`                      | upsert a title           |
//! | GET    | `/title/{tconst}`             | read a title             |
//! | DELETE | `/title/{tconst}`             | delete a title           |
//! | GET    | `/titles`                     | list a page of titles    |
//! | GET    | `/health`                     | per-node health          |
//! | POST   | `/nodes/{node}/availability`  | take a node off/online   |
//! | POST   | `/test/concurrent-read`       | concurrent-read scenario |
//! | POST   | `/test/read-write-conflict`   | read-write scenario      |
//!
//! Successful responses are JSON. Errors are plain text with the status
//! chosen by [`isoprobe_executor::status_code`].

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use isoprobe_core::{NewTitle, NodeId, ProbeError, ProbeResult};
use isoprobe_executor::{
    error_body, parse_json, status_code, AvailabilityRequest, ConcurrentReadRequest,
    ListTitlesQuery, ReadWriteRequest,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::app::AppState;

/// Response type of every route.
pub type HttpResponse = Response<Full<Bytes>>;

/// hyper service entry point.
pub async fn handle(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Result<HttpResponse, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    let uri = &parts.uri;
    let response = route(&state, &parts.method, uri.path(), uri.query(), &body).await;
    info!(
        target: "isoprobe::http",
        method = %parts.method, path = uri.path(), status = response.status().as_u16(),
        "Request handled"
    );
    Ok(response)
}

/// Dispatch one request.
pub async fn route(
    state: &AppState,
    method: &Method,
    path: &str,
    query: Option<&str>,
    body: &[u8],
) -> HttpResponse {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let result = match (method, segments.as_slice()) {
        (&Method::POST, ["title"]) => upsert_title(state, body).await,
        (&Method::GET, ["title", tconst]) => get_title(state, tconst).await,
        (&Method::DELETE, ["title", tconst]) => delete_title(state, tconst).await,
        (&Method::GET, ["titles"]) => list_titles(state, query).await,
        (&Method::GET, ["health"]) => json(&state.controller().health().await),
        (&Method::POST, ["nodes", node, "availability"]) => availability(state, node, body),
        (&Method::POST, ["test", "concurrent-read"]) => concurrent_read(state, body).await,
        (&Method::POST, ["test", "read-write-conflict"]) => {
            read_write_conflict(state, body).await
        }
        _ => return text(StatusCode::NOT_FOUND, format!("no route for {method} {path}")),
    };
    result.unwrap_or_else(|e| error_response(&e))
}

async fn upsert_title(state: &AppState, body: &[u8]) -> ProbeResult<HttpResponse> {
    let title: NewTitle = parse_json(body)?;
    json(&state.controller().upsert_title(&title).await?)
}

async fn get_title(state: &AppState, tconst: &str) -> ProbeResult<HttpResponse> {
    json(&state.controller().get_title(tconst).await?)
}

async fn delete_title(state: &AppState, tconst: &str) -> ProbeResult<HttpResponse> {
    json(&state.controller().delete_title(tconst).await?)
}

async fn list_titles(state: &AppState, query: Option<&str>) -> ProbeResult<HttpResponse> {
    let query = ListTitlesQuery::parse(query)?;
    json(&state.controller().list_titles(&query).await?)
}

async fn concurrent_read(state: &AppState, body: &[u8]) -> ProbeResult<HttpResponse> {
    let req: ConcurrentReadRequest = parse_json(body)?;
    json(&state.controller().concurrent_read(&req).await?)
}

async fn read_write_conflict(state: &AppState, body: &[u8]) -> ProbeResult<HttpResponse> {
    let req: ReadWriteRequest = parse_json(body)?;
    json(&state.controller().read_write_conflict(&req).await?)
}

#[derive(Serialize)]
struct AvailabilityResponse<'a> {
    node: &'a str,
    online: bool,
}

fn availability(state: &AppState, node: &str, body: &[u8]) -> ProbeResult<HttpResponse> {
    let req: AvailabilityRequest = parse_json(body)?;
    let Some(target) = state.node(&NodeId::new(node)) else {
        return Err(ProbeError::validation(format!("unknown node {node}")));
    };
    target.set_online(req.online);
    warn!(target: "isoprobe::http", node, online = req.online, "Node availability set");
    json(&AvailabilityResponse {
        node,
        online: target.is_online(),
    })
}

fn json<T: Serialize>(value: &T) -> ProbeResult<HttpResponse> {
    let body = serde_json::to_vec(value)
        .map_err(|e| ProbeError::internal(format!("serializing response: {e}")))?;
    Ok(respond(StatusCode::OK, "application/json", body.into()))
}

fn text(status: StatusCode, body: String) -> HttpResponse {
    respond(status, "text/plain; charset=utf-8", body.into())
}

fn error_response(err: &ProbeError) -> HttpResponse {
    let status =
        StatusCode::from_u16(status_code(err)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(
            target: "isoprobe::http",
            status = status.as_u16(), kind = %err.kind(), error = %err,
            "Request failed"
        );
    }
    text(status, error_body(err))
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
