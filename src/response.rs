//! Outgoing HTTP response and cookie serialization.
//!
//! A [`Response`] is handed to every hook and chain element as `&mut`. The
//! chainable methods (`status`, `set`, `cookie`, …) mutate it in place; the
//! terminal methods (`send`, `json`, `end`, `redirect`) finalize it exactly
//! once. A second terminal call returns [`Error::AlreadySent`] instead of
//! silently overwriting what the client is about to receive.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::Error;

const TEXT: &str = "text/plain; charset=utf-8";
const JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

// ── Body ──────────────────────────────────────────────────────────────────────

/// What [`Response::send`] accepts.
pub enum Body {
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

impl From<&str> for Body {
    fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Body {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self { Self::Bytes(b.into()) }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self { Self::Bytes(b) }
}

impl From<Value> for Body {
    fn from(v: Value) -> Self { Self::Json(v) }
}

// ── Cookies ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax    => "Lax",
            Self::None   => "None",
        }
    }
}

/// Attributes for [`Response::cookie`]. `path` defaults to `/`.
#[derive(Clone, Debug, Default)]
pub struct CookieOptions {
    pub max_age: Option<Duration>,
    pub expires: Option<SystemTime>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    fn serialize(&self, name: &str, value: &str) -> String {
        let mut out = format!("{name}={}", urlencoding::encode(value));
        out.push_str("; Path=");
        out.push_str(self.path.as_deref().unwrap_or("/"));
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", max_age.as_secs()));
        }
        if let Some(expires) = self.expires {
            out.push_str("; Expires=");
            out.push_str(&httpdate::fmt_http_date(expires));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if let Some(same_site) = self.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site.as_str());
        }
        out
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response under construction.
///
/// ```rust
/// use azura::{CookieOptions, Response, StatusCode};
/// use serde_json::json;
///
/// let mut res = Response::new();
/// res.status(StatusCode::CREATED)
///     .set("location", "/users/42")
///     .cookie("sid", "abc", &CookieOptions { http_only: true, ..Default::default() });
/// res.json(&json!({ "id": 42 })).unwrap();
/// assert!(res.is_sent());
/// ```
#[derive(Debug, Default)]
pub struct Response {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Bytes,
    sent: bool,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&mut self, code: StatusCode) -> &mut Self {
        self.status = Some(code);
        self
    }

    /// Current status; `200 OK` until one is set.
    pub fn status_code(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Sets (replaces) a header. Invalid names or values are logged and ignored.
    pub fn set(&mut self, field: &str, value: &str) -> &mut Self {
        if let Some((name, value)) = header_pair(field, value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Alias of [`Response::set`].
    pub fn header(&mut self, field: &str, value: &str) -> &mut Self {
        self.set(field, value)
    }

    /// Adds a header value without replacing existing ones.
    pub fn append(&mut self, field: &str, value: &str) -> &mut Self {
        if let Some((name, value)) = header_pair(field, value) {
            self.headers.append(name, value);
        }
        self
    }

    /// Reads a response header.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.headers.get(field).and_then(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Sets `Content-Type`. Shorthands such as `"json"` and `"html"` expand.
    pub fn content_type(&mut self, value: &str) -> &mut Self {
        let media = match crate::parse::media_type(value) {
            "text/plain" => TEXT,
            "text/html" => "text/html; charset=utf-8",
            other => other,
        };
        self.set(header::CONTENT_TYPE.as_str(), media)
    }

    pub fn location(&mut self, url: &str) -> &mut Self {
        self.set(header::LOCATION.as_str(), url)
    }

    /// Appends a `Set-Cookie` header. Several cookies accumulate.
    pub fn cookie(&mut self, name: &str, value: &str, options: &CookieOptions) -> &mut Self {
        let serialized = options.serialize(name, value);
        self.append(header::SET_COOKIE.as_str(), &serialized)
    }

    /// Tells the client to drop a cookie. Pass the same `path`/`domain` the
    /// cookie was set with.
    pub fn clear_cookie(&mut self, name: &str, options: &CookieOptions) -> &mut Self {
        let expired = CookieOptions {
            max_age: Some(Duration::ZERO),
            expires: Some(SystemTime::UNIX_EPOCH),
            ..options.clone()
        };
        self.cookie(name, "", &expired)
    }

    /// `true` once a terminal method has run.
    pub fn is_sent(&self) -> bool { self.sent }

    pub fn body_bytes(&self) -> &[u8] { &self.body }

    // ── Terminal methods ──────────────────────────────────────────────────────

    /// Sends a body. JSON values go out as JSON, strings as text, bytes as
    /// `application/octet-stream`, unless a content type was already set.
    pub fn send(&mut self, body: impl Into<Body>) -> Result<(), Error> {
        match body.into() {
            Body::Json(value) => self.json(&value),
            Body::Text(text) => self.finish(TEXT, Bytes::from(text)),
            Body::Bytes(bytes) => self.finish(OCTET_STREAM, bytes),
        }
    }

    /// Serializes `body` as JSON with `Content-Type: application/json`.
    pub fn json<T: Serialize + ?Sized>(&mut self, body: &T) -> Result<(), Error> {
        self.guard()?;
        let bytes = serde_json::to_vec(body)?;
        self.set(header::CONTENT_TYPE.as_str(), JSON);
        self.finish(JSON, bytes.into())
    }

    /// Ends the response with no body.
    pub fn end(&mut self) -> Result<(), Error> {
        self.guard()?;
        self.body = Bytes::new();
        self.sent = true;
        Ok(())
    }

    /// `302 Found` to `url`.
    pub fn redirect(&mut self, url: &str) -> Result<(), Error> {
        self.redirect_with(StatusCode::FOUND, url)
    }

    pub fn redirect_with(&mut self, status: StatusCode, url: &str) -> Result<(), Error> {
        self.guard()?;
        self.status(status).location(url);
        self.end()
    }

    fn guard(&self) -> Result<(), Error> {
        if self.sent {
            return Err(Error::AlreadySent);
        }
        Ok(())
    }

    fn finish(&mut self, default_type: &str, body: Bytes) -> Result<(), Error> {
        self.guard()?;
        if !self.headers.contains_key(header::CONTENT_TYPE) {
            self.set(header::CONTENT_TYPE.as_str(), default_type);
        }
        self.body = body;
        self.sent = true;
        Ok(())
    }

    /// Marks an unsent response as sent with whatever it holds so far.
    pub(crate) fn finalize(&mut self) {
        self.sent = true;
    }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut out = http::Response::new(Full::new(self.body));
        *out.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *out.headers_mut() = self.headers;
        out
    }
}

fn header_pair(field: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(field.as_bytes());
    let value = HeaderValue::from_str(value);
    match (name, value) {
        (Ok(name), Ok(value)) => Some((name, value)),
        _ => {
            warn!(header = field, "invalid response header, ignoring");
            None
        }
    }
}
