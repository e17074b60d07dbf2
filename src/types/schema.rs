//! Draft-4 JSON Schema generation for an artifact type (C1 `SchemaOf`).
//!
//! Each attribute contributes its own Draft-4 fragment plus the
//! extension keys the client tooling relies on (`filter_ops`, `sortable`,
//! `mutable`, `required_on_activate`, `readOnly`). Two historical quirks
//! are preserved bit-exact: booleans render as
//! `["string", "null"]`, and blob slots render as an object with a fixed
//! set of required keys.

use serde_json::{Map, Value as JsonValue, json};

use super::{AttributeDescriptor, AttributeKind, TypeDescriptor};
use crate::value::ScalarKind;

fn scalar_fragment(kind: ScalarKind) -> JsonValue {
    json!({ "type": kind.json_schema_type() })
}

fn attribute_fragment(attr: &AttributeDescriptor) -> JsonValue {
    let mut fragment = match attr.kind {
        AttributeKind::Scalar(kind) => scalar_fragment(kind),
        AttributeKind::ListOf(kind) => json!({
            "type": ["array", "null"],
            "items": scalar_fragment(kind),
        }),
        AttributeKind::MapOf(kind) => json!({
            "type": ["object", "null"],
            "additionalProperties": scalar_fragment(kind),
        }),
        AttributeKind::Blob => blob_fragment(),
        AttributeKind::BlobMap => json!({
            "type": ["object", "null"],
            "additionalProperties": blob_fragment(),
        }),
    };

    let obj = fragment.as_object_mut().expect("fragment is always an object");
    if let Some(max_len) = attr.caps.max_length {
        obj.insert("maxLength".into(), json!(max_len));
    }
    if let Some(max_items) = attr.caps.max_items {
        obj.insert("maxItems".into(), json!(max_items));
    }
    if let Some(max_props) = attr.caps.max_properties {
        obj.insert("maxProperties".into(), json!(max_props));
    }
    if let Some(max_blob) = attr.caps.max_blob_size {
        obj.insert("max_blob_size".into(), json!(max_blob));
    }
    if let Some(default) = &attr.default {
        obj.insert("default".into(), default.clone());
    }

    obj.insert("filter_ops".into(), json!(attr.filter_ops.iter().map(filter_op_name).collect::<Vec<_>>()));
    obj.insert("sortable".into(), json!(attr.sortable));
    obj.insert("mutable".into(), json!(attr.mutable));
    obj.insert("required_on_activate".into(), json!(attr.required_on_activate));
    obj.insert("readOnly".into(), json!(attr.system));

    fragment
}

fn blob_fragment() -> JsonValue {
    json!({
        "type": ["object", "null"],
        "required": ["size", "checksum", "external", "status", "content_type"],
        "properties": {
            "size": { "type": ["integer", "null"] },
            "checksum": { "type": ["string", "null"] },
            "content_type": { "type": ["string", "null"] },
            "status": { "type": "string", "enum": ["saving", "active", "pending_delete"] },
            "external": { "type": "boolean" },
        },
    })
}

fn filter_op_name(op: &crate::types::FilterOp) -> &'static str {
    use crate::types::FilterOp::*;
    match op {
        Eq => "eq",
        Neq => "neq",
        In => "in",
        Gt => "gt",
        Gte => "gte",
        Lt => "lt",
        Lte => "lte",
    }
}

fn intrinsic_properties() -> Map<String, JsonValue> {
    let mut props = Map::new();
    props.insert("id".into(), json!({ "type": "string", "readOnly": true }));
    props.insert("type_name".into(), json!({ "type": "string", "readOnly": true }));
    props.insert("name".into(), json!({ "type": ["string", "null"], "mutable": false }));
    props.insert("version".into(), json!({ "type": ["string", "null"], "mutable": false }));
    props.insert("owner".into(), json!({ "type": "string", "readOnly": true }));
    props.insert(
        "visibility".into(),
        json!({ "type": "string", "enum": ["private", "public"], "filter_ops": ["eq"] }),
    );
    props.insert(
        "status".into(),
        json!({ "type": "string", "enum": ["queued", "active", "deactivated", "deleted"], "filter_ops": ["eq", "neq", "in"] }),
    );
    props.insert("created_at".into(), json!({ "type": "string", "readOnly": true, "sortable": true }));
    props.insert("updated_at".into(), json!({ "type": "string", "readOnly": true, "sortable": true }));
    props.insert("activated_at".into(), json!({ "type": ["string", "null"], "readOnly": true, "sortable": true }));
    props.insert("description".into(), json!({ "type": ["string", "null"], "mutable": true }));
    props.insert("tags".into(), json!({ "type": "array", "items": { "type": "string" } }));
    props.insert(
        "metadata".into(),
        json!({ "type": "object", "additionalProperties": { "type": "string" }, "mutable": true }),
    );
    props.insert("icon".into(), blob_fragment());
    props
}

/// Builds the combined Draft-4 document for a type: intrinsic properties
/// (same across all types) plus every custom attribute.
pub fn draft4_schema(descriptor: &TypeDescriptor) -> JsonValue {
    let mut properties = intrinsic_properties();
    for (name, attr) in &descriptor.attributes {
        if attr.intrinsic {
            continue;
        }
        properties.insert(name.clone(), attribute_fragment(attr));
    }

    json!({
        "$schema": "http://json-schema.org/draft-04/schema#",
        "name": descriptor.type_name,
        "version": descriptor.type_version,
        "type": "object",
        "properties": properties,
        "required": ["id", "type_name", "owner"],
    })
}
