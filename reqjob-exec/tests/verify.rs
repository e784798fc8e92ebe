use reqjob_core::{Mapping, Value};
use reqjob_exec::{HttpResponse, Verifier, VerifyError};

fn expect(pairs: Vec<(&str, Value)>) -> Verifier {
    Verifier::new(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<Mapping>())
}

fn json(text: &str) -> Value {
    Value::from(serde_json::from_str::<serde_json::Value>(text).unwrap())
}

#[test]
fn status_code_matches() {
    let verifier = expect(vec![("status_code", Value::Int(200))]);
    assert!(verifier.verify(&HttpResponse::new(200, "")).is_empty());

    let errors = verifier.verify(&HttpResponse::new(404, ""));
    assert_eq!(
        errors,
        vec![VerifyError::ValueMismatch {
            actual: Value::Int(404),
            expected: Value::Int(200),
            location: "response.status_code".into(),
        }]
    );
    assert_eq!(
        errors[0].to_string(),
        "ValueMismatch: response.status_code == 404 != 200"
    );
}

#[test]
fn invalid_json_is_a_decode_failure() {
    let verifier = expect(vec![("json", json(r#"{"a": 1}"#))]);
    let errors = verifier.verify(&HttpResponse::new(200, "<html>"));
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], VerifyError::JsonDecode { location, .. } if location == "response.json"));
}

#[test]
fn missing_keys_compare_as_undefined() {
    let verifier = expect(vec![("json", json(r#"{"a": 1, "b": 2}"#))]);
    let errors = verifier.verify(&HttpResponse::new(200, r#"{"a": 1}"#));
    assert_eq!(
        errors,
        vec![VerifyError::ValueMismatch {
            actual: Value::Undefined,
            expected: Value::Int(2),
            location: "response.json.b".into(),
        }]
    );
}

#[test]
fn list_size_mismatch_stops_descent() {
    let verifier = expect(vec![("json", json(r#"{"items": [{"x": 1}, {"y": 2}]}"#))]);
    let errors = verifier.verify(&HttpResponse::new(200, r#"{"items": [{"x": 9}]}"#));
    assert_eq!(
        errors,
        vec![VerifyError::SizeMismatch {
            actual: 1,
            expected: 2,
            location: "response.json.items".into(),
        }]
    );
}

#[test]
fn errors_are_collected_across_facets() {
    let verifier = expect(vec![
        ("status_code", Value::Int(201)),
        ("headers", [("content-type", "application/json")].into_iter().collect()),
        ("json", json(r#"{"id": 7, "tags": ["a", "b"], "owner": {"name": "ann"}}"#)),
    ]);
    let response = HttpResponse::new(200, r#"{"id": 7.0, "tags": ["a", "c"], "owner": "ann"}"#)
        .with_header("Content-Type", "Application/JSON");
    let errors = verifier.verify(&response);
    let summary: Vec<_> = errors.iter().map(|e| (e.kind(), e.location())).collect();
    assert_eq!(
        summary,
        vec![
            ("ValueMismatch", "response.status_code"),
            ("ValueMismatch", "response.json.tags[1]"),
            ("TypeMismatch", "response.json.owner"),
        ]
    );
}

#[test]
fn response_flags() {
    let verifier = expect(vec![
        ("is_error", Value::Bool(false)),
        ("raise_for_status", Value::Bool(false)),
        ("text", Value::from("ok")),
    ]);
    assert!(verifier.verify(&HttpResponse::new(200, "ok")).is_empty());
    assert_eq!(verifier.verify(&HttpResponse::new(500, "ok")).len(), 2);
}

#[test]
fn errors_serialize_with_their_kind() {
    let error = VerifyError::SizeMismatch {
        actual: 1,
        expected: 2,
        location: "response.json".into(),
    };
    let value = serde_json::to_value(&error).unwrap();
    assert_eq!(value["type"], "SizeMismatch");
    assert_eq!(value["location"], "response.json");
}
