#![forbid(unsafe_code)]

pub mod error;
pub mod loader;
pub mod merge;
pub mod sandbox;
pub mod schema;
pub mod url;
pub mod value;

pub use crate::error::{
    AttrPathError, EvalError, MergeError, ParseError, ResolveError, SchemaError,
    UrlTemplateError, Violation,
};
pub use crate::loader::{Format, Loader, TagRegistry};
pub use crate::merge::{merge_deep, merge_in_place, merge_shallow, DEFAULT_MAX_DEPTH};
pub use crate::sandbox::{Context, Engine};
pub use crate::schema::{Job, Profile, ResolvedJob, ResolvedTask, Task};
pub use crate::value::{Mapping, Tagged, Value};
