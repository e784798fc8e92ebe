use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Op(&'static str),
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

// Longest operators first so `**` wins over `*`.
const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "(", ")", "[", "]", "{", "}", ",", ":", ".", "+", "-",
    "*", "/", "%", "<", ">", "=",
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, EvalError> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;

        if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            let (token, end) = number(source, pos)?;
            out.push(Spanned { token, offset: start });
            pos = end;
            continue;
        }

        if c == b'_' || c.is_ascii_alphabetic() || !c.is_ascii() {
            let rest = &source[pos..];
            let len = rest
                .char_indices()
                .find(|(_, ch)| !(ch.is_alphanumeric() || *ch == '_'))
                .map_or(rest.len(), |(i, _)| i);
            if len == 0 {
                return Err(syntax(start, "unexpected character"));
            }
            out.push(Spanned {
                token: Token::Name(rest[..len].to_string()),
                offset: start,
            });
            pos += len;
            continue;
        }

        if c == b'\'' || c == b'"' {
            let (text, end) = string(source, pos)?;
            out.push(Spanned {
                token: Token::Str(text),
                offset: start,
            });
            pos = end;
            continue;
        }

        match OPERATORS.iter().find(|op| source[pos..].starts_with(**op)) {
            Some(&op) => {
                out.push(Spanned {
                    token: Token::Op(op),
                    offset: start,
                });
                pos += op.len();
            }
            None => return Err(syntax(start, format!("unexpected character {:?}", c as char))),
        }
    }

    out.push(Spanned {
        token: Token::End,
        offset: source.len(),
    });
    Ok(out)
}

pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> EvalError {
    EvalError::Syntax {
        offset,
        message: message.into(),
    }
}

/// Skips a run of digits. `_` is only allowed between two digits.
fn digits(bytes: &[u8], mut pos: usize) -> Result<usize, EvalError> {
    while let Some(&c) = bytes.get(pos) {
        match c {
            b'0'..=b'9' => pos += 1,
            b'_' if pos > 0
                && bytes[pos - 1].is_ascii_digit()
                && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) =>
            {
                pos += 1
            }
            b'_' => return Err(syntax(pos, "invalid decimal literal")),
            _ => break,
        }
    }
    Ok(pos)
}

fn number(source: &str, start: usize) -> Result<(Token, usize), EvalError> {
    let bytes = source.as_bytes();
    let mut pos = start;
    let mut is_float = false;

    pos = digits(bytes, pos)?;
    if pos < bytes.len() && bytes[pos] == b'.' {
        is_float = true;
        pos = digits(bytes, pos + 1)?;
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            is_float = true;
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }

    let text: String = source[start..pos].chars().filter(|c| *c != '_').collect();
    let token = if is_float {
        Token::Float(
            text.parse()
                .map_err(|_| syntax(start, format!("invalid number {text:?}")))?,
        )
    } else {
        Token::Int(
            text.parse()
                .map_err(|_| syntax(start, format!("integer literal {text} is too large")))?,
        )
    };
    Ok((token, pos))
}

fn string(source: &str, start: usize) -> Result<(String, usize), EvalError> {
    let mut chars = source[start..].char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => return Err(syntax(start, "unterminated string")),
    };
    let mut out = String::new();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((out, start + i + c.len_utf8())),
            '\\' => {
                let (_, escaped) = chars
                    .next()
                    .ok_or_else(|| syntax(start, "unterminated string"))?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' | '\'' | '"' => out.push(escaped),
                    'x' | 'u' => {
                        let width = if escaped == 'x' { 2 } else { 4 };
                        let mut hex = String::with_capacity(width);
                        for _ in 0..width {
                            match chars.next() {
                                Some((_, h)) => hex.push(h),
                                None => return Err(syntax(start, "truncated escape")),
                            }
                        }
                        let ch = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| syntax(start + i, format!("invalid escape \\{escaped}{hex}")))?;
                        out.push(ch);
                    }
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
            }
            c => out.push(c),
        }
    }
    Err(syntax(start, "unterminated string"))
}
