//! Conversion of user function results into HTTP responses

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};

use super::error::InvokeError;
use super::value::{NativeResponse, Payload, Record, Returned};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Normalize a value returned (or resolved) by the user function.
pub fn normalize_returned(returned: Returned) -> Result<Response<Full<Bytes>>, InvokeError> {
    match returned {
        Returned::Native(native) => from_native(native),
        Returned::Record(record) => {
            let Some(status) = record.status else {
                return Err(InvokeError::contract(
                    "User function result must include numeric status",
                ));
            };
            build_response(status, record.body, &record.headers)
        }
        Returned::Undefined | Returned::Other(_) => Err(InvokeError::contract(
            "User function must return Response or { status, body, headers }",
        )),
    }
}

/// Normalize arguments handed to the completion callback.
///
/// A non-numeric status means "respond empty".
pub fn normalize_callback(record: Record) -> Result<Response<Full<Bytes>>, InvokeError> {
    match record.status {
        Some(status) => build_response(status, record.body, &record.headers),
        None => Ok(empty(StatusCode::NO_CONTENT)),
    }
}

fn from_native(native: NativeResponse) -> Result<Response<Full<Bytes>>, InvokeError> {
    let status = StatusCode::from_u16(native.status)
        .map_err(|e| InvokeError::contract(format!("Invalid response status: {e}")))?;
    let mut response = Response::new(Full::new(native.body));
    *response.status_mut() = status;
    *response.headers_mut() = header_map(&native.headers)?;
    Ok(response)
}

fn build_response(
    status: f64,
    body: Option<Payload>,
    headers: &[(String, String)],
) -> Result<Response<Full<Bytes>>, InvokeError> {
    let status = status_code(status)?;
    let mut headers = header_map(headers)?;

    let body = match body {
        None => Bytes::new(),
        Some(Payload::Text(text) | Payload::Scalar(text)) => Bytes::from(text),
        Some(Payload::Binary(bytes)) => bytes,
        Some(Payload::Json(value)) => {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            }
            let text = serde_json::to_string(&value)
                .map_err(|e| InvokeError::contract(format!("Unserializable body: {e}")))?;
            Bytes::from(text)
        }
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Statuses a response may be constructed with: whole numbers in 200..=599
fn status_code(status: f64) -> Result<StatusCode, InvokeError> {
    let invalid = || InvokeError::contract(format!("Invalid response status: {status}"));
    if status.fract() != 0.0 || !(200.0..=599.0).contains(&status) {
        return Err(invalid());
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    StatusCode::from_u16(status as u16).map_err(|_| invalid())
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, InvokeError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| InvokeError::contract(format!("Invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| InvokeError::contract(format!("Invalid header value for {name}")))?;
        map.append(name, value);
    }
    Ok(map)
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
