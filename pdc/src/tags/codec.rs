/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The textual tag encoding.
//!
//! Values are rendered in a compact literal syntax:
//!
//! | value            | encoding            |
//! |------------------|---------------------|
//! | string           | `'text'`            |
//! | integer          | `-12`               |
//! | float            | `3.2`, `3.0`, `nan` |
//! | boolean          | `True`, `False`     |
//! | none             | `None`              |
//! | tuple            | `(1,'a',(None))`    |
//!
//! Tuples never carry a trailing comma, even with a single element.
//! Strings are not escaped, so they may not contain `'`.

use std::fmt;

use enum_as_inner::EnumAsInner;
use serde::Deserialize;
use serde::Serialize;

/// A dynamically typed tag value.
#[derive(Debug, Clone, PartialEq, EnumAsInner, Serialize, Deserialize)]
pub enum TagValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    Tuple(Vec<TagValue>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TagError {
    #[error("tag string {0:?} contains a single quote")]
    QuoteInString(String),

    #[error("tag value is not valid UTF-8")]
    InvalidUtf8,

    #[error("integer `{token}` out of range")]
    Overflow { token: String },

    #[error("malformed tag value `{input}` at offset {offset}: {reason}")]
    Malformed {
        input: String,
        offset: usize,
        reason: String,
    },
}

impl TagValue {
    pub fn tuple<T: Into<TagValue>>(items: impl IntoIterator<Item = T>) -> Self {
        TagValue::Tuple(items.into_iter().map(Into::into).collect())
    }

    /// Encode this value. See [`encode`].
    pub fn encode(&self) -> Result<Vec<u8>, TagError> {
        encode(self)
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Str(s) => write!(f, "'{}'", s),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(x) => write!(f, "{}", format_float(*x)),
            TagValue::Bool(true) => write!(f, "True"),
            TagValue::Bool(false) => write!(f, "False"),
            TagValue::None => write!(f, "None"),
            TagValue::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

macro_rules! tag_value_from {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for TagValue {
                fn from(value: $ty) -> Self {
                    TagValue::$variant(value.into())
                }
            }
        )+
    };
}

tag_value_from!(Str: String, &str);
tag_value_from!(Int: i64, i32, i16, i8, u32, u16, u8);
tag_value_from!(Float: f64, f32);
tag_value_from!(Bool: bool);
tag_value_from!(Tuple: Vec<TagValue>);

impl From<()> for TagValue {
    fn from(_: ()) -> Self {
        TagValue::None
    }
}

impl<T: Into<TagValue>> From<Option<T>> for TagValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(TagValue::None, Into::into)
    }
}

/// Encode a value into its textual form.
///
/// Fails only for strings containing `'`, which would not decode back
/// to the same value.
pub fn encode(value: &TagValue) -> Result<Vec<u8>, TagError> {
    check_encodable(value)?;
    Ok(value.to_string().into_bytes())
}

fn check_encodable(value: &TagValue) -> Result<(), TagError> {
    match value {
        TagValue::Str(s) if s.contains('\'') => Err(TagError::QuoteInString(s.clone())),
        TagValue::Tuple(items) => items.iter().try_for_each(check_encodable),
        _ => Ok(()),
    }
}

fn format_float(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        let text = if x > 0.0 { "inf" } else { "-inf" };
        text.to_string()
    } else {
        // Floats always carry a dot so that they decode as floats.
        let text = x.to_string();
        if text.contains('.') {
            text
        } else {
            text + ".0"
        }
    }
}

/// Decode a value from its textual form. Whitespace between tokens is
/// ignored. Malformed input is always an error; a partially decoded
/// value is never returned.
pub fn decode(bytes: &[u8]) -> Result<TagValue, TagError> {
    let input = std::str::from_utf8(bytes).map_err(|_| TagError::InvalidUtf8)?;
    let mut parser = Parser { input, pos: 0 };
    let value = parser.value()?;
    parser.skip_whitespace();
    if parser.pos != input.len() {
        return Err(parser.error(parser.pos, "trailing characters"));
    }
    Ok(value)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn error(&self, offset: usize, reason: impl Into<String>) -> TagError {
        TagError::Malformed {
            input: self.input.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    fn value(&mut self) -> Result<TagValue, TagError> {
        self.skip_whitespace();
        match self.peek() {
            Some('\'') => self.string(),
            Some('(') => self.tuple(),
            Some(_) => self.scalar(),
            None => Err(self.error(self.pos, "expected a value")),
        }
    }

    fn string(&mut self) -> Result<TagValue, TagError> {
        let start = self.pos;
        let body = &self.rest()[1..];
        let Some(end) = body.find('\'') else {
            return Err(self.error(start, "unterminated string"));
        };
        let value = body[..end].to_string();
        self.pos += end + 2;
        Ok(TagValue::Str(value))
    }

    fn tuple(&mut self) -> Result<TagValue, TagError> {
        self.pos += 1;
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(TagValue::Tuple(items));
        }
        loop {
            items.push(self.value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    // Accept the `(x,)` spelling of a single element tuple.
                    if self.peek() == Some(')') {
                        self.pos += 1;
                        break;
                    }
                }
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => return Err(self.error(self.pos, "expected `,` or `)`")),
                None => return Err(self.error(self.pos, "unterminated tuple")),
            }
        }
        Ok(TagValue::Tuple(items))
    }

    fn scalar(&mut self) -> Result<TagValue, TagError> {
        let start = self.pos;
        let rest = self.rest();
        let end = rest
            .find(|c: char| matches!(c, ',' | '(' | ')' | '\'') || c.is_whitespace())
            .unwrap_or(rest.len());
        let token = &rest[..end];
        self.pos += end;

        match token {
            "" => Err(self.error(start, "expected a value")),
            "True" => Ok(TagValue::Bool(true)),
            "False" => Ok(TagValue::Bool(false)),
            "None" => Ok(TagValue::None),
            "nan" => Ok(TagValue::Float(f64::NAN)),
            "inf" => Ok(TagValue::Float(f64::INFINITY)),
            "-inf" => Ok(TagValue::Float(f64::NEG_INFINITY)),
            _ if token.contains(['.', 'e', 'E']) => token
                .parse::<f64>()
                .map(TagValue::Float)
                .map_err(|_| self.error(start, format!("`{}` is not a number", token))),
            _ => token.parse::<i64>().map(TagValue::Int).map_err(|_| {
                let digits = token.trim_start_matches(['-', '+']);
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    TagError::Overflow {
                        token: token.to_string(),
                    }
                } else {
                    self.error(start, format!("unknown token `{}`", token))
                }
            }),
        }
    }
}
