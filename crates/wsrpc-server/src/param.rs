//! Parameter kinds a handler can declare.
//!
//! Each handler argument type implements [`Param`], which names its
//! [`ParamKind`] and converts one positional JSON argument into the Rust value.

use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Bool,
    Int64,
    Uint64,
    Float64,
    String,
    Array,
    Map,
    /// Any JSON value, passed through untouched.
    Any,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Bool => "bool",
            ParamKind::Int64 => "int64",
            ParamKind::Uint64 => "uint64",
            ParamKind::Float64 => "float64",
            ParamKind::String => "string",
            ParamKind::Array => "array",
            ParamKind::Map => "map",
            ParamKind::Any => "any",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type that can be received as a handler argument.
pub trait Param: Sized + Send + 'static {
    const KIND: ParamKind;

    /// Convert a positional argument. `None` means the value has the wrong shape.
    fn from_value(value: Value) -> Option<Self>;
}

impl Param for bool {
    const KIND: ParamKind = ParamKind::Bool;

    fn from_value(value: Value) -> Option<Self> {
        value.as_bool()
    }
}

impl Param for i64 {
    const KIND: ParamKind = ParamKind::Int64;

    fn from_value(value: Value) -> Option<Self> {
        value.as_i64()
    }
}

impl Param for i32 {
    const KIND: ParamKind = ParamKind::Int64;

    fn from_value(value: Value) -> Option<Self> {
        value.as_i64().and_then(|v| i32::try_from(v).ok())
    }
}

impl Param for u64 {
    const KIND: ParamKind = ParamKind::Uint64;

    fn from_value(value: Value) -> Option<Self> {
        value.as_u64()
    }
}

impl Param for u32 {
    const KIND: ParamKind = ParamKind::Uint64;

    fn from_value(value: Value) -> Option<Self> {
        value.as_u64().and_then(|v| u32::try_from(v).ok())
    }
}

impl Param for f64 {
    const KIND: ParamKind = ParamKind::Float64;

    fn from_value(value: Value) -> Option<Self> {
        value.as_f64()
    }
}

impl Param for String {
    const KIND: ParamKind = ParamKind::String;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Param for Vec<Value> {
    const KIND: ParamKind = ParamKind::Array;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl Param for Map<String, Value> {
    const KIND: ParamKind = ParamKind::Map;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl Param for Value {
    const KIND: ParamKind = ParamKind::Any;

    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}
