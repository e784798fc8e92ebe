//! Checking responses against expectation trees.
//!
//! Each top-level key of an expectation names a response facet. Only the
//! facets named are extracted, so a body is never decoded as JSON unless
//! `json` is expected. Differences are collected over the whole tree rather
//! than stopping at the first one.

mod compare;
mod facets;

use reqjob_core::{Mapping, Value};

use crate::error::VerifyError;
use crate::http::HttpResponse;

use self::compare::{compare, Location};
use self::facets::{extract, Facet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verifier {
    expect: Mapping,
}

impl Verifier {
    /// `expect` must already be evaluated.
    pub fn new(expect: Mapping) -> Self {
        Self { expect }
    }

    /// From an optional expectation value; anything but a mapping expects nothing.
    pub fn from_value(expect: Option<&Value>) -> Self {
        Self::new(expect.and_then(Value::as_map).cloned().unwrap_or_default())
    }

    pub fn is_empty(&self) -> bool {
        self.expect.is_empty()
    }

    pub fn verify(&self, response: &HttpResponse) -> Vec<VerifyError> {
        let mut errors = Vec::new();
        let mut location = Location::root();
        for (facet, expected) in &self.expect {
            location.push_key(facet);
            match extract(facet, response) {
                Facet::Value(actual) => compare(&actual, expected, &mut location, &mut errors),
                Facet::JsonDecodeFailure(message) => errors.push(VerifyError::JsonDecode {
                    message,
                    location: location.to_string(),
                }),
            }
            location.pop();
        }
        errors
    }
}
