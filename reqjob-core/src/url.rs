//! URL templates with `{name}` placeholders and base URL joining.

use std::collections::BTreeSet;

use ::url::Url;

use crate::error::UrlTemplateError;
use crate::value::{Mapping, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Placeholder(String),
}

/// A parsed `str.format`-style template. `{{` and `}}` are literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    source: String,
    pieces: Vec<Piece>,
}

impl UrlTemplate {
    pub fn parse(source: &str) -> Result<Self, UrlTemplateError> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(UrlTemplateError::Unbalanced(offset)),
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(UrlTemplateError::Unbalanced(offset));
                    }
                    if !is_identifier(&name) {
                        return Err(UrlTemplateError::InvalidPlaceholder(name));
                    }
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Placeholder(name));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            pieces,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of first appearance.
    pub fn keywords(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.pieces
            .iter()
            .filter_map(|piece| match piece {
                Piece::Placeholder(name) if seen.insert(name.as_str()) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Placeholders satisfied by neither `kwargs` nor `params`.
    pub fn missing(&self, kwargs: &Mapping, params: &Mapping) -> Vec<String> {
        self.keywords()
            .into_iter()
            .filter(|name| !kwargs.contains_key(*name) && !params.contains_key(*name))
            .map(str::to_string)
            .collect()
    }

    /// Fills the template. Values come from `kwargs` first, then `params`; a
    /// param used for a placeholder is removed from the query. Unused kwargs
    /// are moved into `params`.
    pub fn bind(&self, mut kwargs: Mapping, params: &mut Mapping) -> Result<String, UrlTemplateError> {
        let missing = self.missing(&kwargs, params);
        if !missing.is_empty() {
            return Err(UrlTemplateError::MissingKeywords { required: missing });
        }

        let mut values = Mapping::new();
        for name in self.keywords() {
            let value = match kwargs.shift_remove(name) {
                Some(value) => value,
                None => params.shift_remove(name).unwrap_or(Value::Null),
            };
            values.insert(name.to_string(), value);
        }

        let mut out = String::with_capacity(self.source.len());
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Placeholder(name) => {
                    let text = values.get(name).map(Value::to_param_string).unwrap_or_default();
                    out.push_str(&urlencoding::encode(&text));
                }
            }
        }

        params.extend(kwargs);
        Ok(out)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Joins `url` onto `base`. An absolute `url` wins; a non-empty result must be http(s).
pub fn urljoin(base: &str, url: &str) -> Result<String, UrlTemplateError> {
    if !base.is_empty() && !is_http(base) {
        return Err(UrlTemplateError::InvalidBase(format!("{base}{url}")));
    }
    let joined = if base.is_empty() {
        url.to_string()
    } else if url.is_empty() {
        base.to_string()
    } else {
        let parsed = Url::parse(base).map_err(|e| UrlTemplateError::Join {
            base: base.to_string(),
            url: url.to_string(),
            message: e.to_string(),
        })?;
        parsed
            .join(url)
            .map_err(|e| UrlTemplateError::Join {
                base: base.to_string(),
                url: url.to_string(),
                message: e.to_string(),
            })?
            .to_string()
    };
    if !joined.is_empty() && !is_http(&joined) {
        return Err(UrlTemplateError::InvalidBase(joined));
    }
    Ok(joined)
}
