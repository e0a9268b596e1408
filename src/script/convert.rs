//! Crossing between QuickJS values and the engine's value model

use hyper::body::Bytes;
use rquickjs::prelude::Coerced;
use rquickjs::{
    ArrayBuffer, CaughtError, Ctx, Exception, FromJs, Function, Object, TypedArray, Value,
};

use crate::engine::value::{InvocationRequest, NativeResponse, Payload, Record, Returned};

/// Global holding the prelude's host helpers
pub const HOST_HELPERS: &str = "__fissionHost";

pub fn host_helpers<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
    ctx.globals().get(HOST_HELPERS)
}

fn helper<'js>(helpers: &Object<'js>, name: &str) -> rquickjs::Result<Function<'js>> {
    helpers.get(name)
}

/// Build the `{ request, logger }` object user functions receive.
pub fn invocation_context<'js>(
    ctx: &Ctx<'js>,
    helpers: &Object<'js>,
    request: &InvocationRequest,
) -> rquickjs::Result<Object<'js>> {
    let headers: Vec<String> = request
        .headers
        .iter()
        .flat_map(|(name, value)| [name.clone(), value.clone()])
        .collect();
    let text = String::from_utf8_lossy(&request.body).into_owned();
    let body = ArrayBuffer::new_copy(ctx.clone(), &request.body[..])?;

    helper(helpers, "makeContext")?.call((
        request.method.as_str(),
        request.url.as_str(),
        headers,
        text,
        body,
    ))
}

pub fn is_thenable<'js>(helpers: &Object<'js>, value: &Value<'js>) -> rquickjs::Result<bool> {
    helper(helpers, "isThenable")?.call((value.clone(),))
}

/// Detach a returned or resolved value from the heap.
pub fn to_returned<'js>(
    ctx: &Ctx<'js>,
    helpers: &Object<'js>,
    value: Value<'js>,
) -> rquickjs::Result<Returned> {
    if value.is_undefined() {
        return Ok(Returned::Undefined);
    }
    if value.is_function() {
        return Ok(Returned::Other("function".to_string()));
    }
    let Some(object) = value.as_object() else {
        return Ok(Returned::Other(value.type_name().to_string()));
    };

    let response_class: Value = helpers.get("Response")?;
    if object.is_instance_of(&response_class) {
        return native_response(helpers, object).map(Returned::Native);
    }

    to_record(
        ctx,
        helpers,
        Some(object.get("status")?),
        Some(object.get("body")?),
        Some(object.get("headers")?),
    )
    .map(Returned::Record)
}

/// Capture `(status, body, headers)`; a non-numeric status is dropped.
pub fn to_record<'js>(
    ctx: &Ctx<'js>,
    helpers: &Object<'js>,
    status: Option<Value<'js>>,
    body: Option<Value<'js>>,
    headers: Option<Value<'js>>,
) -> rquickjs::Result<Record> {
    let status = status.and_then(|value| value.as_number());
    let body = match body {
        Some(value) => to_payload(ctx, helpers, value)?,
        None => None,
    };
    let headers = match headers {
        Some(value) if !is_nullish(&value) => header_pairs(helpers, value)?,
        _ => Vec::new(),
    };
    Ok(Record {
        status,
        body,
        headers,
    })
}

fn to_payload<'js>(
    ctx: &Ctx<'js>,
    helpers: &Object<'js>,
    value: Value<'js>,
) -> rquickjs::Result<Option<Payload>> {
    if is_nullish(&value) {
        return Ok(None);
    }
    if let Some(text) = value.as_string() {
        return Ok(Some(Payload::Text(text.to_string()?)));
    }

    if value.is_object() && !value.is_function() {
        let bytes: Option<TypedArray<u8>> = helper(helpers, "bytesOf")?.call((value.clone(),))?;
        if let Some(bytes) = bytes {
            return Ok(Some(Payload::Binary(Bytes::copy_from_slice(
                bytes.as_bytes().unwrap_or_default(),
            ))));
        }
        if let Some(json) = ctx.json_stringify(value.clone())? {
            let text = json.to_string()?;
            return Ok(Some(match serde_json::from_str(&text) {
                Ok(parsed) => Payload::Json(parsed),
                Err(_) => Payload::Text(text),
            }));
        }
    }

    let Coerced(text) = Coerced::<String>::from_js(ctx, value)?;
    Ok(Some(Payload::Scalar(text)))
}

fn header_pairs<'js>(
    helpers: &Object<'js>,
    value: Value<'js>,
) -> rquickjs::Result<Vec<(String, String)>> {
    let flat: Vec<String> = helper(helpers, "headerPairs")?.call((value,))?;
    Ok(pairs_of(&flat))
}

/// `[name, value, name, value, ...]` into pairs
fn pairs_of(flat: &[String]) -> Vec<(String, String)> {
    flat.chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

fn native_response<'js>(
    helpers: &Object<'js>,
    response: &Object<'js>,
) -> rquickjs::Result<NativeResponse> {
    let parts: Object = helper(helpers, "responseParts")?.call((response.clone(),))?;
    let status: f64 = parts.get("status")?;
    // responseParts already flattens the Headers instance
    let flat: Vec<String> = parts.get("headers")?;
    let headers = pairs_of(&flat);

    let body: Value = parts.get("body")?;
    let body = if let Some(text) = body.as_string() {
        Bytes::from(text.to_string()?)
    } else if let Some(object) = body.into_object() {
        let bytes = TypedArray::<u8>::from_object(object)?;
        Bytes::copy_from_slice(bytes.as_bytes().unwrap_or_default())
    } else {
        Bytes::new()
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let status = status.clamp(0.0, f64::from(u16::MAX)) as u16;
    Ok(NativeResponse {
        status,
        headers,
        body,
    })
}

fn is_nullish(value: &Value<'_>) -> bool {
    value.is_undefined() || value.is_null()
}

/// Readable message for a failed engine call, clearing any pending exception.
pub fn describe_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    match CaughtError::from_error(ctx, error) {
        CaughtError::Error(e) => e.to_string(),
        CaughtError::Exception(exception) => describe_exception(&exception),
        CaughtError::Value(value) => describe_value(ctx, value),
    }
}

fn describe_exception(exception: &Exception<'_>) -> String {
    let name = exception
        .get::<_, Option<String>>("name")
        .ok()
        .flatten()
        .unwrap_or_else(|| "Error".to_string());
    match exception.message() {
        Some(message) if !message.is_empty() => format!("{name}: {message}"),
        _ => name,
    }
}

/// Readable form of an arbitrary thrown or rejected value
pub fn describe_value<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    if let Some(exception) = value
        .as_object()
        .and_then(|object| Exception::from_object(object.clone()))
    {
        return describe_exception(&exception);
    }
    let type_name = value.type_name();
    host_helpers(ctx)
        .and_then(|helpers| helper(&helpers, "describe")?.call::<_, String>((value,)))
        .unwrap_or_else(|_| {
            let _ = ctx.catch();
            type_name.to_string()
        })
}
