use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::error::AttrPathError;
use crate::value::{Mapping, Value};

/// `module:attribute`, resolved against an attribute registry at run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrPath {
    module: String,
    attribute: String,
}

impl AttrPath {
    pub fn parse(text: &str) -> Result<Self, AttrPathError> {
        if text.is_empty() {
            return Err(AttrPathError::Empty);
        }
        let invalid = || AttrPathError::InvalidFormat(text.to_string());
        if text.matches(':').count() != 1 {
            return Err(invalid());
        }
        let (module, attribute) = text.split_once(':').ok_or_else(invalid)?;
        if module.trim().is_empty() || attribute.trim().is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            module: module.to_string(),
            attribute: attribute.to_string(),
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }
}

impl FromStr for AttrPath {
    type Err = AttrPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.attribute)
    }
}

/// Short name for an [`AttrPath`], declared in an `aliases` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias(String);

const ALIAS_BLOCKED: [char; 4] = [':', ',', '-', '/'];

impl Alias {
    pub fn parse(text: &str) -> Result<Self, AttrPathError> {
        if text.is_empty() || text.contains(ALIAS_BLOCKED) {
            return Err(AttrPathError::InvalidAlias(text.to_string()));
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Aliases = BTreeMap<Alias, AttrPath>;

/// Reference written in a document: a full path or an alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttrTarget {
    Path(AttrPath),
    Alias(Alias),
}

impl AttrTarget {
    pub fn parse(text: &str) -> Result<Self, AttrPathError> {
        if text.contains(':') {
            AttrPath::parse(text).map(AttrTarget::Path)
        } else {
            Alias::parse(text).map(AttrTarget::Alias)
        }
    }

    pub fn resolve<'a>(&'a self, aliases: &'a Aliases) -> Result<&'a AttrPath, AttrPathError> {
        match self {
            AttrTarget::Path(path) => Ok(path),
            AttrTarget::Alias(alias) => aliases
                .get(alias)
                .ok_or_else(|| AttrPathError::UnknownAlias(alias.to_string())),
        }
    }
}

impl fmt::Display for AttrTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrTarget::Path(path) => path.fmt(f),
            AttrTarget::Alias(alias) => alias.fmt(f),
        }
    }
}

/// A factory reference plus the arguments it is called with.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub target: AttrTarget,
    pub args: Vec<Value>,
    pub kwargs: Mapping,
}

impl Instance {
    pub fn of(target: AttrTarget) -> Self {
        Self {
            target,
            args: Vec::new(),
            kwargs: Mapping::new(),
        }
    }
}

/// Server certificate verification.
#[derive(Debug, Clone, PartialEq)]
pub enum Verify {
    Enabled(bool),
    /// PEM bundle of extra trusted roots.
    CaBundle(PathBuf),
    Instance(Instance),
}

impl Default for Verify {
    fn default() -> Self {
        Verify::Enabled(true)
    }
}

/// Client certificate.
#[derive(Debug, Clone, PartialEq)]
pub enum Cert {
    /// PEM file holding the certificate chain and private key.
    Path(PathBuf),
    Instance(Instance),
}

/// Upper bound accepted for `limits.max_connections`.
pub const MAX_CONNECTIONS: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub max_connections: usize,
    pub max_keepalive_connections: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_keepalive_connections: 20,
        }
    }
}

/// One multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub key: String,
    pub name: Option<String>,
    pub path: PathBuf,
    pub media_type: Option<String>,
    /// When false the file may be created while the run is in progress.
    pub exist: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Get,
        Method::Post,
        Method::Patch,
        Method::Put,
        Method::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| {
                let names: Vec<_> = Method::ALL.iter().map(|m| m.as_str()).collect();
                format!("expected one of {}", names.join(", "))
            })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_path_requires_exactly_one_colon() {
        let path = AttrPath::parse("pkg.mod:attr").expect("valid");
        assert_eq!((path.module(), path.attribute()), ("pkg.mod", "attr"));
        assert_eq!(AttrPath::parse(""), Err(AttrPathError::Empty));
        for bad in ["pkg", "a:b:c", ":attr", "pkg:"] {
            assert!(matches!(AttrPath::parse(bad), Err(AttrPathError::InvalidFormat(_))), "{bad}");
        }
    }

    #[test]
    fn aliases_reject_separator_characters() {
        assert!(Alias::parse("debug").is_ok());
        for bad in ["", "a,b", "a-b", "a/b"] {
            assert!(Alias::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn targets_resolve_through_aliases() {
        let mut aliases = Aliases::new();
        aliases.insert(
            Alias::parse("dbg").expect("alias"),
            AttrPath::parse("reqjob.hooks:debug_request").expect("path"),
        );
        let target = AttrTarget::parse("dbg").expect("target");
        assert_eq!(
            target.resolve(&aliases).expect("resolve").to_string(),
            "reqjob.hooks:debug_request"
        );
        let unknown = AttrTarget::parse("nope").expect("target");
        assert_eq!(
            unknown.resolve(&aliases),
            Err(AttrPathError::UnknownAlias("nope".into()))
        );
    }

    #[test]
    fn methods_are_case_insensitive() {
        assert_eq!("post".parse::<Method>(), Ok(Method::Post));
        assert_eq!(
            "TRACE".parse::<Method>(),
            Err("expected one of GET, POST, PATCH, PUT, DELETE".to_string())
        );
    }
}
