//! Values produced by user functions, detached from the script heap

use hyper::body::Bytes;

/// Inbound request handed verbatim to the user function
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvocationRequest {
    pub method: String,
    /// Absolute URL, `http://host/path?query`
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Whatever a user function handed back
#[derive(Debug, Clone, PartialEq)]
pub enum Returned {
    Undefined,
    Native(NativeResponse),
    Record(Record),
    /// Any non-object value; carries its type name for diagnostics
    Other(String),
}

impl Returned {
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }
}

/// A response object built by user code with the host's `Response` class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// A `{ status, body, headers }` shaped result
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Only present when the script value was a number
    pub status: Option<f64>,
    pub body: Option<Payload>,
    pub headers: Vec<(String, String)>,
}

#[cfg(test)]
impl Record {
    pub fn new(status: f64) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Payload) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// A response body as user code supplied it
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
    /// Plain object or array
    Json(serde_json::Value),
    /// Number or boolean, already stringified
    Scalar(String),
}
