//! Values passed to and returned from exported functions.
//!
//! The binding layer only knows the four numeric WebAssembly value kinds.
//! Booleans travel as `i32` with value `0` or `1`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The kind of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl ValueKind {
    /// Lowercase WebAssembly name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A WebAssembly value crossing the host/engine boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 32-bit signed integer (also carries booleans).
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::I32(_) => ValueKind::I32,
            Value::I64(_) => ValueKind::I64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::I32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Value::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Interpret an `i32` of `0` or `1` as a boolean.
    ///
    /// Any other value, or any other kind, yields `None`.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::I32(0) => Some(false),
            Value::I32(1) => Some(true),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::I32(i32::from(v))
    }
}

/// Formats as `kind:value`, the same syntax [`FromStr`] accepts.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "i32:{v}"),
            Value::I64(v) => write!(f, "i64:{v}"),
            Value::F32(v) => write!(f, "f32:{v}"),
            Value::F64(v) => write!(f, "f64:{v}"),
        }
    }
}

/// Error returned when a string cannot be parsed as a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseValueError {
    #[error("unknown value kind `{0}` (expected i32, i64, f32 or f64)")]
    UnknownKind(String),

    #[error("invalid {kind} literal `{literal}`")]
    InvalidLiteral { kind: ValueKind, literal: String },
}

/// Parses `i32:1`, `i64:-2`, `f32:1.5`, `f64:2.5`, `true`, `false`, a bare
/// integer (as `i32`) or a bare decimal (as `f64`).
impl FromStr for Value {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        match s {
            "true" => return Ok(Value::from(true)),
            "false" => return Ok(Value::from(false)),
            _ => {}
        }

        if let Some((kind, literal)) = s.split_once(':') {
            return match kind {
                "i32" => parse_literal(ValueKind::I32, literal).map(Value::I32),
                "i64" => parse_literal(ValueKind::I64, literal).map(Value::I64),
                "f32" => parse_literal(ValueKind::F32, literal).map(Value::F32),
                "f64" => parse_literal(ValueKind::F64, literal).map(Value::F64),
                other => Err(ParseValueError::UnknownKind(other.to_string())),
            };
        }

        if s.contains(['.', 'e', 'E']) || s.eq_ignore_ascii_case("nan") || s.ends_with("inf") {
            parse_literal(ValueKind::F64, s).map(Value::F64)
        } else {
            parse_literal(ValueKind::I32, s).map(Value::I32)
        }
    }
}

fn parse_literal<T: FromStr>(kind: ValueKind, literal: &str) -> Result<T, ParseValueError> {
    literal
        .parse()
        .map_err(|_| ParseValueError::InvalidLiteral {
            kind,
            literal: literal.to_string(),
        })
}
