use reqjob_core::{Mapping, Value};

use crate::http::HttpResponse;

/// A response facet, or the failure met while extracting it.
pub(crate) enum Facet {
    Value(Value),
    JsonDecodeFailure(String),
}

/// Extracts one facet. Unknown names read as undefined.
pub(crate) fn extract(name: &str, response: &HttpResponse) -> Facet {
    let value = match name {
        "status_code" => Value::Int(i64::from(response.status)),
        "json" => {
            return match response.json() {
                Ok(json) => Facet::Value(Value::from(json)),
                Err(e) => Facet::JsonDecodeFailure(e.to_string()),
            }
        }
        "headers" => Value::Map(lowercased_headers(&response.headers)),
        "http_version" => Value::from(response.http_version.as_str()),
        "reason_phrase" => Value::from(response.reason_phrase()),
        "url" => Value::from(response.url.as_str()),
        "content" => Value::Bytes(response.body.clone()),
        "text" => Value::Str(response.text()),
        "encoding" => Value::Str(response.charset().unwrap_or_else(|| "utf-8".to_string())),
        "charset_encoding" => response.charset().map_or(Value::Null, Value::Str),
        "is_error" => Value::Bool(response.is_error()),
        "is_redirect" => Value::Bool(response.is_redirect()),
        "cookies" => response.cookies().into_iter().collect(),
        "links" => response
            .links()
            .into_iter()
            .map(|(rel, link)| (rel, link.into_iter().collect::<Value>()))
            .collect(),
        "num_bytes_downloaded" => Value::Int(response.body.len() as i64),
        "request" => [
            ("method", Value::from(response.request.method.as_str())),
            ("url", Value::from(response.request.url.as_str())),
            (
                "headers",
                Value::Map(lowercased_headers(&response.request.headers)),
            ),
        ]
        .into_iter()
        .collect(),
        "elapsed" => Value::Float(response.elapsed.as_secs_f64()),
        "raise_for_status" => Value::Bool(response.is_error()),
        _ => Value::Undefined,
    };
    Facet::Value(value)
}

/// Header names and values lowercased; repeated headers are joined with `, `.
fn lowercased_headers(headers: &[(String, String)]) -> Mapping {
    let mut out = Mapping::new();
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        let value = value.to_lowercase();
        match out.get_mut(&name) {
            Some(Value::Str(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                out.insert(name, Value::Str(value));
            }
        }
    }
    out
}
