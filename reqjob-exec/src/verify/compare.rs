use std::fmt;

use reqjob_core::Value;

use crate::error::VerifyError;

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Where in the response a comparison is looking, e.g. `response.json.items[0].id`.
#[derive(Debug, Clone)]
pub(crate) struct Location {
    segments: Vec<Segment>,
}

impl Location {
    pub(crate) fn root() -> Self {
        Self {
            segments: vec![Segment::Key("response".to_string())],
        }
    }

    pub(crate) fn push_key(&mut self, key: &str) {
        self.segments.push(Segment::Key(key.to_string()));
    }

    fn push_index(&mut self, index: usize) {
        self.segments.push(Segment::Index(index));
    }

    pub(crate) fn pop(&mut self) {
        self.segments.pop();
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => f.write_str(key)?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Same broad kind; ints and floats are interchangeable, bools are not numbers.
fn same_kind(actual: &Value, expected: &Value) -> bool {
    (actual.is_number() && expected.is_number()) || actual.kind() == expected.kind()
}

/// Compares `actual` against `expected`, pushing every difference found.
///
/// Mappings are compared over the expected keys only. A type or size
/// mismatch stops the descent into that branch.
pub(crate) fn compare(
    actual: &Value,
    expected: &Value,
    location: &mut Location,
    errors: &mut Vec<VerifyError>,
) {
    if actual.is_undefined() || expected.is_undefined() {
        if !(actual.is_undefined() && expected.is_undefined()) {
            errors.push(VerifyError::ValueMismatch {
                actual: actual.clone(),
                expected: expected.clone(),
                location: location.to_string(),
            });
        }
        return;
    }
    if !same_kind(actual, expected) {
        errors.push(VerifyError::TypeMismatch {
            actual: actual.clone(),
            expected: expected.clone(),
            location: location.to_string(),
        });
        return;
    }
    match (actual, expected) {
        (Value::Map(actual), Value::Map(expected)) => {
            for (key, expected) in expected {
                location.push_key(key);
                compare(
                    actual.get(key).unwrap_or(&Value::Undefined),
                    expected,
                    location,
                    errors,
                );
                location.pop();
            }
        }
        (Value::Seq(actual), Value::Seq(expected)) => {
            if actual.len() != expected.len() {
                errors.push(VerifyError::SizeMismatch {
                    actual: actual.len(),
                    expected: expected.len(),
                    location: location.to_string(),
                });
                return;
            }
            for (index, (actual, expected)) in actual.iter().zip(expected).enumerate() {
                location.push_index(index);
                compare(actual, expected, location, errors);
                location.pop();
            }
        }
        _ => {
            if !actual.loose_eq(expected) {
                errors.push(VerifyError::ValueMismatch {
                    actual: actual.clone(),
                    expected: expected.clone(),
                    location: location.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(actual: &Value, expected: &Value) -> Vec<VerifyError> {
        let mut errors = Vec::new();
        compare(actual, expected, &mut Location::root(), &mut errors);
        errors
    }

    #[test]
    fn location_renders_keys_and_indexes() {
        let mut location = Location::root();
        location.push_key("json");
        location.push_key("items");
        location.push_index(0);
        location.push_key("id");
        assert_eq!(location.to_string(), "response.json.items[0].id");
    }

    #[test]
    fn numeric_tower_but_not_bools() {
        assert!(run(&Value::Int(1), &Value::Float(1.0)).is_empty());
        let errors = run(&Value::Bool(true), &Value::Int(1));
        assert_eq!(errors[0].kind(), "TypeMismatch");
    }

    #[test]
    fn extra_actual_keys_are_ignored() {
        let actual: Value = [("a", 1), ("b", 2)].into_iter().collect();
        let expected: Value = [("a", 1)].into_iter().collect();
        assert!(run(&actual, &expected).is_empty());
    }

    #[test]
    fn undefined_expectation_requires_absence() {
        let expected: Value = [("gone", Value::Undefined)].into_iter().collect();
        assert!(run(&Value::Map(Default::default()), &expected).is_empty());
        let actual: Value = [("gone", 1)].into_iter().collect();
        assert_eq!(run(&actual, &expected)[0].location(), "response.gone");
    }

    #[test]
    fn type_mismatch_stops_descent_but_siblings_continue() {
        let actual: Value = [
            ("a", Value::from("x")),
            ("b", Value::Seq(vec![Value::Int(1), Value::Int(3)])),
        ]
        .into_iter()
        .collect();
        let expected: Value = [
            ("a", [("deep", 1)].into_iter().collect::<Value>()),
            ("b", Value::Seq(vec![Value::Int(1), Value::Int(2)])),
        ]
        .into_iter()
        .collect();
        let errors = run(&actual, &expected);
        let summary: Vec<_> = errors.iter().map(|e| (e.kind(), e.location())).collect();
        assert_eq!(
            summary,
            vec![("TypeMismatch", "response.a"), ("ValueMismatch", "response.b[1]")]
        );
    }
}
