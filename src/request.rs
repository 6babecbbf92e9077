//! Incoming HTTP request, enriched with parsed query, cookies and body.

use std::collections::HashMap;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderMap};
use http::request::Parts;
use http::{Extensions, Method, Uri, Version};
use http_body::Body;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::Error;
use crate::parse;

/// An incoming HTTP request.
///
/// Built once per request before any hook or handler runs. Query string,
/// cookies and (for POST/PUT/PATCH) the body are already parsed; `params`
/// is filled in by the router.
pub struct Request {
    id: Uuid,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
    pub(crate) params: HashMap<String, String>,
    pub(crate) body: Value,
    ip: String,
    remote_addr: SocketAddr,
    decorations: Arc<Extensions>,
    locals: Extensions,
    pub(crate) error: Option<Error>,
}

impl Request {
    pub(crate) fn from_parts(parts: Parts, remote_addr: SocketAddr, decorations: Arc<Extensions>) -> Self {
        let Parts { method, uri, version, headers, .. } = parts;

        let query = uri.query().map(parse::query).unwrap_or_default();
        let cookies = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .fold(HashMap::new(), |mut acc, raw| {
                for (k, v) in parse::cookies(raw) {
                    acc.entry(k).or_insert(v);
                }
                acc
            });
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map_or_else(|| remote_addr.ip().to_string(), str::to_owned);

        Self {
            id: Uuid::new_v4(),
            method,
            uri,
            version,
            headers,
            query,
            cookies,
            params: HashMap::new(),
            body: Value::Object(Map::new()),
            ip,
            remote_addr,
            decorations,
            locals: Extensions::new(),
            error: None,
        }
    }

    /// `true` for methods whose body azura buffers and parses.
    pub(crate) fn expects_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }

    /// Buffers `body` and parses it by `Content-Type`. A transport error is
    /// logged and leaves the empty body in place.
    pub(crate) async fn read_body<B>(&mut self, body: B)
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        match body.collect().await {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                self.body = parse::body(&bytes, self.header(header::CONTENT_TYPE.as_str()));
            }
            Err(e) => warn!(error = %e, "failed to read request body, continuing without one"),
        }
    }

    /// Per-request unique identifier, also sent back as `x-request-id`.
    pub fn id(&self) -> Uuid { self.id }
    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn version(&self) -> Version { self.version }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Path plus query string, as the client sent it.
    pub fn original_url(&self) -> &str {
        self.uri.path_and_query().map_or("/", |pq| pq.as_str())
    }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Alias of [`Request::header`].
    pub fn get(&self, name: &str) -> Option<&str> {
        self.header(name)
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// The whole query mapping. Repeated keys hold their first value.
    pub fn query_map(&self) -> &HashMap<String, String> { &self.query }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> { &self.cookies }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> { &self.params }

    /// The parsed body. `{}` when absent, unparseable or of an unsupported type.
    pub fn body(&self) -> &Value { &self.body }

    /// Deserializes the parsed body, failing with `400 Bad Request`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            Error::status(http::StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
        })
    }

    /// Client IP: first `X-Forwarded-For` entry, else the socket peer.
    pub fn ip(&self) -> &str { &self.ip }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }

    /// `"https"` when the proxy says so via `X-Forwarded-Proto`, else `"http"`.
    pub fn protocol(&self) -> &str {
        match self.forwarded("x-forwarded-proto") {
            Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
            _ => "http",
        }
    }

    pub fn secure(&self) -> bool {
        self.protocol() == "https"
    }

    /// Host name without port, from `X-Forwarded-Host`, `Host`, or the URI.
    pub fn hostname(&self) -> Option<&str> {
        let host = self
            .forwarded("x-forwarded-host")
            .or_else(|| self.header(header::HOST.as_str()))
            .or_else(|| self.uri.host())?;
        Some(strip_port(host))
    }

    /// Subdomain labels, nearest the root first. `a.b.example.com` gives
    /// `["b", "a"]`. Empty for IP hosts.
    pub fn subdomains(&self) -> Vec<&str> {
        let Some(host) = self.hostname() else {
            return Vec::new();
        };
        if host.trim_matches(['[', ']']).parse::<IpAddr>().is_ok() {
            return Vec::new();
        }
        let mut labels: Vec<&str> = host.split('.').rev().skip(2).collect();
        labels.retain(|l| !l.is_empty());
        labels
    }

    /// Best match among `offered` for the `Accept` header. Shorthands like
    /// `"json"` and `"html"` are understood.
    pub fn accepts<'o>(&self, offered: &[&'o str]) -> Option<&'o str> {
        parse::negotiate(self.header(header::ACCEPT.as_str()), offered)
    }

    /// `true` when the request `Content-Type` matches `media` (shorthands
    /// allowed, `type/*` wildcards allowed).
    pub fn is(&self, media: &str) -> bool {
        let Some(content_type) = self.header(header::CONTENT_TYPE.as_str()) else {
            return false;
        };
        let actual = parse::essence(content_type);
        let wanted = parse::media_type(media).to_ascii_lowercase();
        match wanted.strip_suffix("/*") {
            Some(kind) => actual.split('/').next() == Some(kind),
            None => actual == wanted,
        }
    }

    /// `true` for `X-Requested-With: XMLHttpRequest`.
    pub fn xhr(&self) -> bool {
        self.header("x-requested-with")
            .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
    }

    /// A value decorated on the application with [`App::decorate`](crate::App::decorate).
    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.decorations.get::<T>()
    }

    /// Typed storage scoped to this request, for middleware to hand data to
    /// later handlers.
    pub fn locals(&self) -> &Extensions { &self.locals }
    pub fn locals_mut(&mut self) -> &mut Extensions { &mut self.locals }

    /// The error being handled. Only set while `onError` hooks run.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn forwarded(&self, name: &str) -> Option<&str> {
        self.header(name)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal: keep the brackets, drop anything after them.
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}
