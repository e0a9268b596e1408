//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: the two specialization control
//! endpoints, and invocation of the active function for everything else.

use crate::config::AppState;
use crate::engine::{request, InvocationRequest, InvokeError, ModuleReference, SpecializeError};
use crate::http;
use crate::logger::{self, AccessLogEntry};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response};
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const SPECIALIZE_PATH: &str = "/specialize";
const SPECIALIZE_V2_PATH: &str = "/v2/specialize";
const INTERNAL_ERROR: &str = "Internal server error";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which kind of work a request turned into
enum Routed {
    Control,
    Invocation,
}

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let (entry, started) = AccessLogEntry::start(req.method().as_str(), req.uri().path());

    let (response, routed) = route_request(req, &state).await;

    if state.cached_access_log.load(Ordering::Relaxed) {
        let specialized = match routed {
            Routed::Invocation => state.engine.specialized_path().map(ToOwned::to_owned),
            Routed::Control => None,
        };
        logger::log_access(
            &entry
                .finish(response.status().as_u16(), started)
                .with_specialized_path(specialized),
        );
    }
    Ok(response)
}

async fn route_request<B>(req: Request<B>, state: &AppState) -> (Response<Full<Bytes>>, Routed)
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match (req.method(), req.uri().path()) {
        (&Method::POST, SPECIALIZE_PATH) => {
            let reference = request::parse_v1(&state.config.function.default_module);
            (specialize(state, &reference).await, Routed::Control)
        }
        (&Method::POST, SPECIALIZE_V2_PATH) => {
            let response = match read_body(req, state.config.http.max_body_size).await {
                Ok((_, body)) => {
                    match request::parse_v2(&body, &state.config.function.root) {
                        Ok(reference) => specialize(state, &reference).await,
                        Err(e) => {
                            logger::log_error(&e.to_string());
                            http::build_500_response(&e.to_string())
                        }
                    }
                }
                Err(response) => response,
            };
            (response, Routed::Control)
        }
        _ => (invoke(req, state).await, Routed::Invocation),
    }
}

async fn specialize(state: &AppState, reference: &ModuleReference) -> Response<Full<Bytes>> {
    match state.engine.specialize(reference).await {
        Ok(active) => {
            logger::log_specialized(&active.source_path, reference.export_name.as_deref());
            http::build_202_response()
        }
        Err(SpecializeError::AlreadySpecialized) => {
            logger::log_warning("Specialization requested on an already specialized container");
            http::build_400_response(&SpecializeError::AlreadySpecialized.to_string())
        }
        Err(e) => {
            logger::log_specialize_failed(&e, &reference.path, reference.export_name.as_deref());
            http::build_500_response(&e.to_string())
        }
    }
}

async fn invoke<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let path = req.uri().path().to_string();
    let (parts, body) = match read_body(req, state.config.http.max_body_size).await {
        Ok(read) => read,
        Err(response) => return response,
    };

    match state.engine.invoke(invocation_request(&parts, body)).await {
        Ok(response) => response,
        Err(InvokeError::NotSpecialized) => {
            http::build_500_response(&InvokeError::NotSpecialized.to_string())
        }
        Err(e) => {
            logger::log_invoke_failed(&e, &path);
            http::build_500_response(INTERNAL_ERROR)
        }
    }
}

/// Snapshot of the inbound request in the shape user code receives
fn invocation_request(parts: &hyper::http::request::Parts, body: Bytes) -> InvocationRequest {
    let host = parts
        .headers
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(hyper::http::uri::Authority::as_str))
        .unwrap_or("localhost");
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", hyper::http::uri::PathAndQuery::as_str);

    InvocationRequest {
        method: parts.method.to_string(),
        url: format!("http://{host}{path_and_query}"),
        headers: parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body,
    }
}

/// Buffer the whole body, refusing anything above `max_body_size`.
async fn read_body<B>(
    req: Request<B>,
    max_body_size: u64,
) -> Result<(hyper::http::request::Parts, Bytes), Response<Full<Bytes>>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    if let Some(resp) = check_body_size(&req, max_body_size) {
        return Err(resp);
    }

    let (parts, body) = req.into_parts();
    let limit = usize::try_from(max_body_size).unwrap_or(usize::MAX);
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok((parts, collected.to_bytes())),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            logger::log_error(&format!(
                "Request body too large (max: {max_body_size} bytes)"
            ));
            Err(http::build_413_response())
        }
        Err(e) => {
            logger::log_warning(&format!("Failed to read request body: {e}"));
            Err(http::build_500_response(INTERNAL_ERROR))
        }
    }
}

/// Validate Content-Length header and return 413 if exceeded
fn check_body_size<B>(req: &Request<B>, max_body_size: u64) -> Option<Response<Full<Bytes>>> {
    let content_length = req.headers().get("content-length")?;
    content_length.to_str().map_or_else(
        |_| {
            logger::log_warning("Content-Length header contains non-ASCII characters");
            None
        },
        |size_str| match size_str.parse::<u64>() {
            Ok(size) if size > max_body_size => {
                logger::log_error(&format!(
                    "Request body too large: {size} bytes (max: {max_body_size})"
                ));
                Some(http::build_413_response())
            }
            Err(_) => {
                logger::log_warning(&format!(
                    "Invalid Content-Length value: '{size_str}', skipping size check"
                ));
                None
            }
            _ => None,
        },
    )
}
