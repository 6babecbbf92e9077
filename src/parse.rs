//! Lenient parsers for query strings, cookies, bodies and `Accept` headers.
//!
//! None of these fail. Malformed input degrades to "less data": a skipped
//! cookie pair, an empty body object. Handlers always receive something.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

/// Parses `a=1&b=2&a=3` into `{a: "1", b: "2"}`. Repeated keys keep the first
/// value.
pub(crate) fn query(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (key, value) in form_pairs(raw.as_bytes()) {
        out.entry(key).or_insert(value);
    }
    out
}

fn form_pairs(raw: &[u8]) -> Vec<(String, String)> {
    // `Vec<(String, String)>` accepts any well-formed pair list; lossy UTF-8
    // decoding means this only fails on truly degenerate input.
    serde_urlencoded::from_bytes(raw).unwrap_or_default()
}

/// Parses a `Cookie` header. Pairs without `=` are skipped; values are
/// unquoted and percent-decoded. Repeated names keep the first value.
pub(crate) fn cookies(header: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        let decoded = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_owned());
        out.entry(name.to_owned()).or_insert(decoded);
    }
    out
}

/// Lower-cased media type without parameters: `"Application/JSON; charset=utf-8"`
/// becomes `"application/json"`.
pub(crate) fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Parses a buffered body according to its content type.
///
/// JSON objects and form bodies are decoded; everything else, including JSON
/// that is not an object and anything that fails to decode, becomes an empty
/// object.
pub(crate) fn body(bytes: &[u8], content_type: Option<&str>) -> Value {
    let empty = || Value::Object(Map::new());
    if bytes.is_empty() {
        return empty();
    }
    let Some(content_type) = content_type else {
        return empty();
    };

    let essence = essence(content_type);
    if essence == "application/json" || essence.ends_with("+json") {
        return match serde_json::from_slice::<Value>(bytes) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => {
                debug!("JSON body is not an object, using empty object");
                empty()
            }
            Err(e) => {
                debug!(error = %e, "malformed JSON body, using empty object");
                empty()
            }
        };
    }
    if essence == "application/x-www-form-urlencoded" {
        let mut map = Map::new();
        for (key, value) in form_pairs(bytes) {
            map.entry(key).or_insert(Value::String(value));
        }
        return Value::Object(map);
    }

    debug!(content_type = %essence, "unsupported body content type, using empty object");
    empty()
}

// ── Content negotiation ───────────────────────────────────────────────────────

/// Expands extension shorthands (`"json"`) to a media type.
pub(crate) fn media_type(offered: &str) -> &str {
    match offered {
        "json" => "application/json",
        "html" => "text/html",
        "text" | "txt" => "text/plain",
        "xml" => "application/xml",
        "form" | "urlencoded" => "application/x-www-form-urlencoded",
        "csv" => "text/csv",
        other => other,
    }
}

struct MediaRange {
    kind: String,
    subtype: String,
    quality: f32,
}

fn media_ranges(accept: &str) -> Vec<MediaRange> {
    accept
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let range = parts.next()?.trim().to_ascii_lowercase();
            let (kind, subtype) = range.split_once('/')?;
            let quality = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            Some(MediaRange {
                kind: kind.to_owned(),
                subtype: subtype.to_owned(),
                quality,
            })
        })
        .collect()
}

fn quality_for(ranges: &[MediaRange], media: &str) -> f32 {
    let media = media.to_ascii_lowercase();
    let Some((kind, subtype)) = media.split_once('/') else {
        return 0.0;
    };
    // Most specific matching range decides.
    ranges
        .iter()
        .filter_map(|r| {
            let specificity = match (r.kind.as_str(), r.subtype.as_str()) {
                (k, s) if k == kind && s == subtype => 2,
                (k, "*") if k == kind => 1,
                ("*", "*") => 0,
                _ => return None,
            };
            Some((specificity, r.quality))
        })
        .max_by_key(|(specificity, _)| *specificity)
        .map_or(0.0, |(_, q)| q)
}

/// Picks the best of `offered` for an `Accept` header value. Ties go to the
/// earlier offer. A missing header accepts the first offer.
pub(crate) fn negotiate<'o>(accept: Option<&str>, offered: &[&'o str]) -> Option<&'o str> {
    let Some(accept) = accept.filter(|a| !a.trim().is_empty()) else {
        return offered.first().copied();
    };
    let ranges = media_ranges(accept);

    let mut best: Option<(&'o str, f32)> = None;
    for &candidate in offered {
        let q = quality_for(&ranges, media_type(candidate));
        if q > 0.0 && best.is_none_or(|(_, best_q)| q > best_q) {
            best = Some((candidate, q));
        }
    }
    best.map(|(candidate, _)| candidate)
}
