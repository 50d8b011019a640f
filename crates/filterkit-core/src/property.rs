//! Typed, introspectable stage properties
//!
//! Every stage publishes an explicit schema of the properties it exposes. The
//! schema is what persistence and live reconfiguration walk when they copy
//! configuration from one stage instance to another.

use crate::error::PropertyError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared value type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Bool,
    Int,
    Float,
    Text,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyKind::Bool => "bool",
            PropertyKind::Int => "int",
            PropertyKind::Float => "float",
            PropertyKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// Whether a property can be read, written, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// One entry of a stage's property schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub access: Access,
}

impl PropertySpec {
    pub const fn read_write(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            access: Access::ReadWrite,
        }
    }

    pub const fn read_only(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            access: Access::ReadOnly,
        }
    }

    pub const fn write_only(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            access: Access::WriteOnly,
        }
    }
}

/// A property value
///
/// Serialized untagged so persisted lists and manifests read naturally
/// (`width: 320`, `path: frames/`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Text(_) => PropertyKind::Text,
        }
    }

    /// Convert into `kind` where the conversion is lossless
    ///
    /// Only `int -> float` widening is performed; everything else must
    /// already match.
    pub fn coerce(self, kind: PropertyKind) -> Option<PropertyValue> {
        match (self, kind) {
            (PropertyValue::Int(v), PropertyKind::Float) => Some(PropertyValue::Float(v as f64)),
            (value, kind) if value.kind() == kind => Some(value),
            _ => None,
        }
    }

    pub fn into_bool(self, name: &str) -> Result<bool, PropertyError> {
        match self {
            PropertyValue::Bool(v) => Ok(v),
            other => Err(mismatch(name, PropertyKind::Bool, &other)),
        }
    }

    pub fn into_int(self, name: &str) -> Result<i64, PropertyError> {
        match self {
            PropertyValue::Int(v) => Ok(v),
            other => Err(mismatch(name, PropertyKind::Int, &other)),
        }
    }

    pub fn into_float(self, name: &str) -> Result<f64, PropertyError> {
        match self {
            PropertyValue::Float(v) => Ok(v),
            other => Err(mismatch(name, PropertyKind::Float, &other)),
        }
    }

    pub fn into_text(self, name: &str) -> Result<String, PropertyError> {
        match self {
            PropertyValue::Text(v) => Ok(v),
            other => Err(mismatch(name, PropertyKind::Text, &other)),
        }
    }

    /// Read a non-negative integer that must fit `u32`
    pub fn into_u32(self, name: &str) -> Result<u32, PropertyError> {
        let v = self.into_int(name)?;
        u32::try_from(v).map_err(|_| PropertyError::Invalid {
            name: name.to_string(),
            reason: format!("{v} is out of range"),
        })
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

fn mismatch(name: &str, expected: PropertyKind, found: &PropertyValue) -> PropertyError {
    PropertyError::TypeMismatch {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}

/// Look up `name` in a schema
pub fn find_spec<'a>(specs: &'a [PropertySpec], name: &str) -> Option<&'a PropertySpec> {
    specs.iter().find(|spec| spec.name == name)
}
