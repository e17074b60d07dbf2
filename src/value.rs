//! Runtime value representation for artifact attributes.
//!
//! Mirrors the shape of the typed attribute model: every
//! custom attribute is either a scalar, a homogeneous list/map of scalars,
//! or a blob slot (single or keyed by map). `AttributeValue` is the
//! in-memory form used by validators, the patch engine and the store;
//! `ScalarValue` is the atomic unit that lists and maps are built from.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ScalarValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarValue::Bool(_) => "bool",
            ScalarValue::Int(_) => "int",
            ScalarValue::Float(_) => "float",
            ScalarValue::Str(_) => "string",
        }
    }

    pub fn as_str_lossless(&self) -> Option<String> {
        match self {
            ScalarValue::Str(s) => Some(s.clone()),
            ScalarValue::Int(i) => Some(i.to_string()),
            ScalarValue::Float(f) => Some(f.to_string()),
            ScalarValue::Bool(b) => Some(b.to_string()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            ScalarValue::Bool(b) => JsonValue::Bool(*b),
            ScalarValue::Int(i) => JsonValue::from(*i),
            ScalarValue::Float(f) => {
                serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
            }
            ScalarValue::Str(s) => JsonValue::String(s.clone()),
        }
    }

    /// Compares two scalars for sort/filter purposes. Mixed numeric types
    /// compare as floats; mismatched non-numeric types are declared equal
    /// to keep sorting total without panicking (callers only reach here
    /// for attributes the type registry already validated as homogeneous).
    pub fn compare(&self, other: &ScalarValue) -> Ordering {
        match (self, other) {
            (ScalarValue::Int(a), ScalarValue::Int(b)) => a.cmp(b),
            (ScalarValue::Float(a), ScalarValue::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (ScalarValue::Int(a), ScalarValue::Float(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (ScalarValue::Float(a), ScalarValue::Int(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            }
            (ScalarValue::Str(a), ScalarValue::Str(b)) => a.cmp(b),
            (ScalarValue::Bool(a), ScalarValue::Bool(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int(i) => write!(f, "{i}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Str(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobStatus {
    Saving,
    Active,
    PendingDelete,
}

impl fmt::Display for BlobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlobStatus::Saving => "saving",
            BlobStatus::Active => "active",
            BlobStatus::PendingDelete => "pending_delete",
        };
        write!(f, "{s}")
    }
}

/// A single blob slot value: the attachment point's current state.
///
/// `size`/`checksum` are populated exactly when `status == Active`
/// (version never changes after first activation). `external` marks a slot that references a
/// URL registered via `RegisterExternalBlob` rather than uploaded bytes;
/// the URL itself never appears here — only inside the backend reference
/// the blob store keeps, never exposed in an API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobSlot {
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub content_type: Option<String>,
    pub status: BlobStatus,
    pub external: bool,
}

impl BlobSlot {
    pub fn empty() -> Self {
        // Absent slots are represented as `None` at the `AttributeValue`
        // level; this constructor exists only for lease bookkeeping.
        Self {
            size: None,
            checksum: None,
            content_type: None,
            status: BlobStatus::Saving,
            external: false,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "size": self.size,
            "checksum": self.checksum,
            "content_type": self.content_type,
            "status": self.status,
            "external": self.external,
        })
    }
}

/// The runtime value of one custom or intrinsic attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Scalar(ScalarValue),
    List(Vec<ScalarValue>),
    Map(BTreeMap<String, ScalarValue>),
    Blob(Option<BlobSlot>),
    BlobMap(BTreeMap<String, BlobSlot>),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null) || matches!(self, AttributeValue::Blob(None))
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            AttributeValue::Null => JsonValue::Null,
            AttributeValue::Scalar(s) => s.to_json(),
            AttributeValue::List(items) => {
                JsonValue::Array(items.iter().map(ScalarValue::to_json).collect())
            }
            AttributeValue::Map(map) => {
                let obj = map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                JsonValue::Object(obj)
            }
            AttributeValue::Blob(None) => JsonValue::Null,
            AttributeValue::Blob(Some(slot)) => slot.to_json(),
            AttributeValue::BlobMap(map) => {
                let obj = map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                JsonValue::Object(obj)
            }
        }
    }

    /// Coerces a scalar JSON value according to the target attribute's
    /// kind. Integer attributes accept any losslessly-convertible value;
    /// string attributes accept a lossless string representation of any
    /// scalar but reject structured values.
    pub fn coerce_scalar(target: ScalarKind, json: &JsonValue) -> ApiResult<ScalarValue> {
        match (target, json) {
            (ScalarKind::Bool, JsonValue::Bool(b)) => Ok(ScalarValue::Bool(*b)),
            (ScalarKind::Int, JsonValue::Number(n)) => n
                .as_i64()
                .map(ScalarValue::Int)
                .ok_or_else(|| ApiError::bad_value("value is not losslessly convertible to an integer")),
            (ScalarKind::Int, JsonValue::String(s)) => s
                .parse::<i64>()
                .map(ScalarValue::Int)
                .map_err(|_| ApiError::bad_value("value is not losslessly convertible to an integer")),
            (ScalarKind::Float, JsonValue::Number(n)) => n
                .as_f64()
                .map(ScalarValue::Float)
                .ok_or_else(|| ApiError::bad_value("value is not a finite number")),
            (ScalarKind::Float, JsonValue::String(s)) => s
                .parse::<f64>()
                .map(ScalarValue::Float)
                .map_err(|_| ApiError::bad_value("value is not a finite number")),
            (ScalarKind::Str, JsonValue::String(s)) => Ok(ScalarValue::Str(s.clone())),
            (ScalarKind::Str, JsonValue::Number(n)) => Ok(ScalarValue::Str(n.to_string())),
            (ScalarKind::Str, JsonValue::Bool(b)) => Ok(ScalarValue::Str(b.to_string())),
            (ScalarKind::Dependency, JsonValue::String(s)) => Ok(ScalarValue::Str(s.clone())),
            (_, JsonValue::Array(_)) | (_, JsonValue::Object(_)) => {
                Err(ApiError::bad_value("structured value not allowed for a scalar attribute"))
            }
            _ => Err(ApiError::bad_value("value does not match the attribute's declared type")),
        }
    }
}

/// The declared scalar kind of a custom attribute (or of a list/map's
/// elements). `Dependency` is a string reference to another artifact; it
/// validates like a string but is checked for referential existence when
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    Str,
    Dependency,
}

impl ScalarKind {
    pub fn json_schema_type(&self) -> &'static [&'static str] {
        match self {
            // Historical: booleans render as ["string", "null"] rather
            // than "boolean" (see DESIGN.md open questions).
            ScalarKind::Bool => &["string", "null"],
            ScalarKind::Int => &["integer", "null"],
            ScalarKind::Float => &["number", "null"],
            ScalarKind::Str | ScalarKind::Dependency => &["string", "null"],
        }
    }
}
