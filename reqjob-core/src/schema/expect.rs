use crate::value::Value;

use super::decode::{field, Decoder};

/// Response facets an expectation tree may name.
pub const RESPONSE_FACETS: &[&str] = &[
    "status_code",
    "json",
    "headers",
    "http_version",
    "reason_phrase",
    "url",
    "content",
    "text",
    "encoding",
    "charset_encoding",
    "is_error",
    "is_redirect",
    "cookies",
    "links",
    "num_bytes_downloaded",
    "request",
    "elapsed",
    "raise_for_status",
];

pub(crate) fn check(d: &mut Decoder, path: &str, value: &Value) {
    let Some(map) = d.optional_map(path, value) else {
        return;
    };
    for key in map.keys() {
        if !RESPONSE_FACETS.contains(&key.as_str()) {
            d.push(field(path, key), "unknown response facet");
        }
    }
}
