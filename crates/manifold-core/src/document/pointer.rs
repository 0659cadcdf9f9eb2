//! RFC 6901 JSON-Pointer expressions
//!
//! A pointer is a sequence of reference tokens; the empty pointer
//! addresses the whole document. `~0` unescapes to `~` and `~1` to `/`.

use crate::error::{EngineError, Result};

/// Parsed JSON-Pointer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Pointer {
    tokens: Vec<String>,
}

impl Pointer {
    /// The empty pointer, addressing the document root
    pub fn root() -> Pointer {
        Pointer { tokens: Vec::new() }
    }

    /// Parse a pointer expression
    ///
    /// The empty string is the root; any other expression must start
    /// with `/`.
    pub fn parse(expr: &str) -> Result<Pointer> {
        if expr.is_empty() {
            return Ok(Pointer::root());
        }
        if !expr.starts_with('/') {
            return Err(EngineError::InvalidPointer {
                pointer: expr.to_string(),
            });
        }
        let mut tokens = Vec::new();
        for raw in expr[1..].split('/') {
            tokens.push(unescape(raw, expr)?);
        }
        Ok(Pointer { tokens })
    }

    /// Reference tokens in order
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Whether this pointer addresses the whole document
    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Split into the parent pointer and the final token
    ///
    /// Returns `None` for the root pointer.
    pub fn split_last(&self) -> Option<(Pointer, &str)> {
        let (last, parents) = self.tokens.split_last()?;
        Some((
            Pointer {
                tokens: parents.to_vec(),
            },
            last.as_str(),
        ))
    }

    /// Append one reference token
    pub fn push(&mut self, token: impl Into<String>) {
        self.tokens.push(token.into());
    }
}

impl std::fmt::Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for token in &self.tokens {
            write!(f, "/{}", escape(token))?;
        }
        Ok(())
    }
}

fn unescape(raw: &str, whole: &str) -> Result<String> {
    if !raw.contains('~') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => {
                return Err(EngineError::InvalidPointer {
                    pointer: whole.to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// Escape a reference token for display
pub fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Interpret a reference token as an array index
///
/// Per RFC 6901, indexes are non-negative decimals without leading
/// zeroes; `-` addresses the imaginary element past the end.
pub fn array_index(token: &str, len: usize) -> Option<ArrayIndex> {
    if token == "-" {
        return Some(ArrayIndex::Append);
    }
    if token.len() > 1 && token.starts_with('0') {
        return None;
    }
    let index: usize = token.parse().ok()?;
    if index < len {
        Some(ArrayIndex::At(index))
    } else if index == len {
        Some(ArrayIndex::Append)
    } else {
        None
    }
}

/// Resolved array position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayIndex {
    /// An existing element
    At(usize),
    /// One past the end (`-` or index == len)
    Append,
}
