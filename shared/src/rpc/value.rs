use serde::{Deserialize, Serialize};

/// A network-invocation argument or result value.
///
/// The closed set keeps structural matching cheap and the wire encoding
/// stable; richer application types travel as Bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
}

/// The structural type of an ArgValue, used to match supplied arguments
/// against a candidate method's parameter list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    Null,
    Bool,
    I32,
    I64,
    F32,
    F64,
    Str,
    Bytes,
}

impl ArgValue {
    pub fn kind(&self) -> ArgKind {
        match self {
            ArgValue::Null => ArgKind::Null,
            ArgValue::Bool(_) => ArgKind::Bool,
            ArgValue::I32(_) => ArgKind::I32,
            ArgValue::I64(_) => ArgKind::I64,
            ArgValue::F32(_) => ArgKind::F32,
            ArgValue::F64(_) => ArgKind::F64,
            ArgValue::Str(_) => ArgKind::Str,
            ArgValue::Bytes(_) => ArgKind::Bytes,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ArgValue::I32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::I64(value) => Some(*value),
            ArgValue::I32(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            ArgValue::F32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::F64(value) => Some(*value),
            ArgValue::F32(value) => Some(f64::from(*value)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ArgValue::Bytes(value) => Some(value),
            _ => None,
        }
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        ArgValue::I32(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::I64(value)
    }
}

impl From<f32> for ArgValue {
    fn from(value: f32) -> Self {
        ArgValue::F32(value)
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::F64(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Str(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Str(value)
    }
}

impl From<Vec<u8>> for ArgValue {
    fn from(value: Vec<u8>) -> Self {
        ArgValue::Bytes(value)
    }
}
