//! Request descriptors flowing through the gateway.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::session::Session;

/// Static API key header.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Principal-identifying header checked by the backend against the token.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const AUTHORIZATION_HEADER: &str = "authorization";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported method `{other}`")),
        }
    }
}

/// A call as issued by UI-level code, before credentials are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the backend base URL, e.g. `/api/admin/banners`.
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach headers for one dispatch attempt.
    pub(crate) fn prepare(&self, api_key: &str, session: Option<&Session>) -> PreparedRequest {
        let mut headers = Vec::with_capacity(3);
        if !api_key.is_empty() {
            headers.push((API_KEY_HEADER.to_string(), api_key.to_string()));
        }
        if let Some(session) = session {
            headers.push((
                AUTHORIZATION_HEADER.to_string(),
                format!("Bearer {}", session.identity_token),
            ));
            headers.push((USER_ID_HEADER.to_string(), session.user_id.clone()));
        }
        PreparedRequest {
            method: self.method,
            path: self.path.clone(),
            headers,
            body: self.body.clone(),
        }
    }
}

/// A request with credentials attached, ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Bearer token attached to this request, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.header(AUTHORIZATION_HEADER)
            .and_then(|value| value.strip_prefix("Bearer "))
    }
}
