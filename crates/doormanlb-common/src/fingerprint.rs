//! Request fingerprinting.
//!
//! A fingerprint identifies equivalent requests: it is the lowercase hex
//! SHA-256 digest of the URL path followed, when parameters are
//! respected and present, by `?` and the normalized query string.
//! Normalization sorts parameters by key, sorts values within a key,
//! percent-encodes both and joins them with `&`, so the fingerprint is
//! independent of parameter arrival order.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use url::form_urlencoded;

/// Builds the fingerprint for a request path and raw query string.
///
/// With `ignore_parameters` set, the query string does not participate
/// and any two requests for the same path collapse onto one key. A
/// degenerate empty request (no path, no query) yields the empty string.
pub fn build(path: &str, raw_query: Option<&str>, ignore_parameters: bool) -> String {
    if path.is_empty() && raw_query.map_or(true, str::is_empty) {
        return String::new();
    }

    let mut key = String::from(path);

    if !ignore_parameters {
        if let Some(raw) = raw_query {
            let normalized = normalize_query(raw);
            if !normalized.is_empty() {
                key.push('?');
                key.push_str(&normalized);
            }
        }
    }

    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)
}

fn normalize_query(raw_query: &str) -> String {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in form_urlencoded::parse(raw_query.as_bytes()) {
        grouped.entry(key.into_owned()).or_default().push(value.into_owned());
    }

    let mut parts = Vec::new();
    for (key, mut values) in grouped {
        values.sort();
        for value in values {
            let mut part = String::new();
            part.extend(form_urlencoded::byte_serialize(key.as_bytes()));
            part.push('=');
            part.extend(form_urlencoded::byte_serialize(value.as_bytes()));
            parts.push(part);
        }
    }

    parts.join("&")
}
