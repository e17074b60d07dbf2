//! Patch Engine.
//!
//! Implements RFC-6902 `add`/`remove`/`replace` over a pointer language
//! covering top-level attributes, map entries, list entries (by
//! index or `-` for append), with blob slots and tags excluded from
//! generic patch. Pointers are compiled against the type descriptor to a
//! typed setter — the same idea as pointer-to-column dispatch, but
//! over attribute metadata instead of table columns. The result is
//! handed back to the lifecycle engine for invariant/authorization
//! checking; this module only owns *shape* rules: unknown paths,
//! read-only/system rejection, and per-value validation via the
//! attribute validators.

use serde_json::Value as JsonValue;

use crate::error::{ApiError, ApiResult};
use crate::store::{ArtifactRecord, Status, Visibility};
use crate::types::{AttributeDescriptor, AttributeKind, TypeDescriptor};
use crate::validators::{run_list, run_map_keys, run_scalar};
use crate::value::{AttributeValue, ScalarKind, ScalarValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone)]
pub struct RawPatchOp {
    pub op: OpKind,
    pub path: String,
    pub value: Option<JsonValue>,
}

/// Parses the JSON-Patch document body into typed ops. Any shape error
/// (missing `op`/`path`, unknown `op` name, non-array body) is a
/// `BadRequest` — there is no silent-ignore path.
pub fn parse_ops(body: &JsonValue) -> ApiResult<Vec<RawPatchOp>> {
    let array = body.as_array().ok_or_else(|| ApiError::bad_value("patch body must be a JSON array"))?;
    let mut ops = Vec::with_capacity(array.len());
    for entry in array {
        let obj = entry.as_object().ok_or_else(|| ApiError::bad_value("patch operation must be an object"))?;
        let op_name = obj
            .get("op")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ApiError::bad_value("patch operation missing 'op'"))?;
        let op = match op_name {
            "add" => OpKind::Add,
            "remove" => OpKind::Remove,
            "replace" => OpKind::Replace,
            other => return Err(ApiError::bad_value(format!("unsupported patch op '{other}'"))),
        };
        let path = obj
            .get("path")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ApiError::bad_value("patch operation missing 'path'"))?
            .to_string();
        if !path.starts_with('/') {
            return Err(ApiError::bad_value("patch path must start with '/'"));
        }
        // `remove` with a value present is accepted as `replace` semantics
        // and the value is ignored.
        let value = obj.get("value").cloned();
        ops.push(RawPatchOp { op, path, value });
    }
    Ok(ops)
}

fn unescape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.peek() {
                Some('0') => {
                    out.push('~');
                    chars.next();
                }
                Some('1') => {
                    out.push('/');
                    chars.next();
                }
                _ => out.push('~'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn split_pointer(path: &str) -> Vec<String> {
    path.trim_start_matches('/').split('/').map(unescape_segment).collect()
}

/// Attributes that are never client-settable, regardless of status:
/// touching them with any op returns `Forbidden`.
const SYSTEM_INTRINSICS: &[&str] = &["id", "type_name", "owner", "created_at", "updated_at", "activated_at"];

/// What a parsed patch resolves to. Status/visibility changes are kept
/// separate from attribute changes because a
/// status/visibility request to contain *only* that change.
pub enum PatchOutcome {
    StatusChange(Status),
    VisibilityChange(Visibility),
    Attributes(ArtifactRecord),
}

fn parse_status(value: &JsonValue) -> ApiResult<Status> {
    let s = value.as_str().ok_or_else(|| ApiError::bad_value("status value must be a string"))?;
    Status::parse(s).ok_or_else(|| ApiError::bad_value(format!("unknown status '{s}'")))
}

fn parse_visibility(value: &JsonValue) -> ApiResult<Visibility> {
    let s = value.as_str().ok_or_else(|| ApiError::bad_value("visibility value must be a string"))?;
    match s {
        "private" => Ok(Visibility::Private),
        "public" => Ok(Visibility::Public),
        other => Err(ApiError::bad_value(format!("unknown visibility '{other}'"))),
    }
}

/// Applies a parsed patch document to `current`, producing either a
/// status/visibility transition request or a fully mutated attribute
/// record. Does not check lifecycle invariants (mutability-after-active,
/// required-on-activate, authorization) — that is the lifecycle engine's
/// job once it has this outcome.
pub fn apply(descriptor: &TypeDescriptor, current: &ArtifactRecord, ops: &[RawPatchOp]) -> ApiResult<PatchOutcome> {
    if ops.is_empty() {
        return Err(ApiError::bad_value("patch document must contain at least one operation"));
    }

    let touches_lifecycle = ops.iter().any(|op| op.path == "/status" || op.path == "/visibility");
    if touches_lifecycle {
        if ops.len() != 1 {
            return Err(ApiError::bad_value(
                "a status or visibility change must be the only operation in the patch",
            ));
        }
        let op = &ops[0];
        if op.op != OpKind::Replace {
            return Err(ApiError::bad_value("status/visibility may only be replaced, not added or removed"));
        }
        let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
        return if op.path == "/status" {
            Ok(PatchOutcome::StatusChange(parse_status(value)?))
        } else {
            Ok(PatchOutcome::VisibilityChange(parse_visibility(value)?))
        };
    }

    let mut candidate = current.clone();
    for op in ops {
        apply_one(descriptor, &mut candidate, op)?;
    }
    Ok(PatchOutcome::Attributes(candidate))
}

fn apply_one(descriptor: &TypeDescriptor, record: &mut ArtifactRecord, op: &RawPatchOp) -> ApiResult<()> {
    let segments = split_pointer(&op.path);
    let head = segments[0].as_str();

    if SYSTEM_INTRINSICS.contains(&head) {
        return Err(ApiError::Forbidden(format!("'{head}' is server-managed and cannot be modified")));
    }
    if head == "name" {
        return Err(ApiError::bad_value("'name' cannot be changed after creation"));
    }
    if head == "version" {
        if record.activated_at.is_some() {
            return Err(ApiError::bad_value("'version' cannot be changed once the artifact has been activated"));
        }
        return apply_version(record, op, &segments);
    }
    if head == "tags" {
        return Err(ApiError::bad_value("tags can only be modified via the dedicated tags endpoint"));
    }
    if head == "icon" {
        return Err(ApiError::bad_value("blob slots can only be modified via the blob upload endpoint"));
    }
    if head == "description" {
        return apply_description(record, op, &segments);
    }
    if head == "metadata" {
        return apply_metadata(record, op, &segments);
    }

    let attr = descriptor
        .attribute(head)
        .ok_or_else(|| ApiError::bad_value(format!("unknown attribute '{head}'")))?;
    if attr.system {
        return Err(ApiError::Forbidden(format!("'{head}' is server-managed and cannot be modified")));
    }
    if attr.kind.is_blob_like() {
        return Err(ApiError::bad_value("blob slots can only be modified via the blob upload endpoint"));
    }

    match attr.kind {
        AttributeKind::Scalar(kind) => apply_scalar(record, head, kind, op, &segments),
        AttributeKind::ListOf(kind) => apply_list(record, head, kind, op, &segments),
        AttributeKind::MapOf(kind) => apply_map(record, head, kind, op, &segments),
        AttributeKind::Blob | AttributeKind::BlobMap => unreachable!("rejected above"),
    }?;

    if let Some(value) = record.properties.get(head) {
        validate_attribute_value(attr, value)?;
    }
    Ok(())
}

fn kind_of(kind: AttributeKind) -> Option<ScalarKind> {
    match kind {
        AttributeKind::Scalar(k) => Some(k),
        _ => None,
    }
}

/// Runs collection-level caps then element validators against a fully
/// assembled attribute value — shared between the patch engine (after
/// mutating one entry) and the lifecycle engine (after assembling a
/// brand-new record at creation), so the two never drift on rules.
pub fn validate_attribute_value(attr: &AttributeDescriptor, value: &AttributeValue) -> ApiResult<()> {
    let caps = &attr.caps;
    match value {
        AttributeValue::List(items) => {
            if let Some(max) = caps.max_items
                && items.len() > max
            {
                return Err(ApiError::bad_value(format!("list exceeds the maximum of {max} items")));
            }
            run_list(&attr.validators, items)?;
        }
        AttributeValue::Map(map) => {
            if let Some(max) = caps.max_properties
                && map.len() > max
            {
                return Err(ApiError::bad_value(format!("map exceeds the maximum of {max} properties")));
            }
            let keys: std::collections::BTreeSet<&str> = map.keys().map(String::as_str).collect();
            run_map_keys(&attr.validators, &keys)?;
        }
        AttributeValue::Scalar(scalar) => {
            if matches!(kind_of(attr.kind), Some(ScalarKind::Str))
                && let Some(max) = caps.max_length
                && let ScalarValue::Str(s) = scalar
                && s.chars().count() > max
            {
                return Err(ApiError::bad_value(format!("value exceeds the maximum length of {max}")));
            }
            run_scalar(&attr.validators, scalar)?;
        }
        AttributeValue::Null | AttributeValue::Blob(_) | AttributeValue::BlobMap(_) => {}
    }
    Ok(())
}

/// Coerces a whole JSON value into an `AttributeValue` matching `attr`'s
/// declared kind — the shape used at creation, when there is no
/// existing collection to merge an entry into.
pub fn coerce_whole_value(attr: &AttributeDescriptor, json: &JsonValue) -> ApiResult<AttributeValue> {
    if json.is_null() {
        return Ok(AttributeValue::Null);
    }
    match attr.kind {
        AttributeKind::Scalar(kind) => Ok(AttributeValue::Scalar(AttributeValue::coerce_scalar(kind, json)?)),
        AttributeKind::ListOf(kind) => {
            let array = json.as_array().ok_or_else(|| ApiError::bad_value(format!("'{}' must be an array", attr.name)))?;
            let mut items = Vec::with_capacity(array.len());
            for v in array {
                items.push(AttributeValue::coerce_scalar(kind, v)?);
            }
            Ok(AttributeValue::List(items))
        }
        AttributeKind::MapOf(kind) => {
            let obj = json.as_object().ok_or_else(|| ApiError::bad_value(format!("'{}' must be an object", attr.name)))?;
            let mut map = std::collections::BTreeMap::new();
            for (k, v) in obj {
                map.insert(k.clone(), AttributeValue::coerce_scalar(kind, v)?);
            }
            Ok(AttributeValue::Map(map))
        }
        AttributeKind::Blob | AttributeKind::BlobMap => {
            Err(ApiError::bad_value(format!("'{}' can only be set via the blob upload endpoint", attr.name)))
        }
    }
}

fn apply_description(record: &mut ArtifactRecord, op: &RawPatchOp, segments: &[String]) -> ApiResult<()> {
    if segments.len() != 1 {
        return Err(ApiError::bad_value("'description' has no nested paths"));
    }
    match op.op {
        OpKind::Remove => {
            record.description = None;
            Ok(())
        }
        OpKind::Add | OpKind::Replace => {
            let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
            record.description = Some(
                value
                    .as_str()
                    .ok_or_else(|| ApiError::bad_value("'description' must be a string"))?
                    .to_string(),
            );
            Ok(())
        }
    }
}

/// `version` is mutable only before the artifact's first activation;
/// the caller already checked that.
fn apply_version(record: &mut ArtifactRecord, op: &RawPatchOp, segments: &[String]) -> ApiResult<()> {
    if segments.len() != 1 {
        return Err(ApiError::bad_value("'version' has no nested paths"));
    }
    match op.op {
        OpKind::Remove => {
            record.version = None;
            Ok(())
        }
        OpKind::Add | OpKind::Replace => {
            let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
            record.version = Some(
                value.as_str().ok_or_else(|| ApiError::bad_value("'version' must be a string"))?.to_string(),
            );
            Ok(())
        }
    }
}

fn apply_metadata(record: &mut ArtifactRecord, op: &RawPatchOp, segments: &[String]) -> ApiResult<()> {
    if segments.len() == 1 {
        match op.op {
            OpKind::Replace | OpKind::Add => {
                let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
                let obj = value.as_object().ok_or_else(|| ApiError::bad_value("'metadata' must be an object"))?;
                let mut map = std::collections::BTreeMap::new();
                for (k, v) in obj {
                    let s = v.as_str().ok_or_else(|| ApiError::bad_value("metadata values must be strings"))?;
                    map.insert(k.clone(), s.to_string());
                }
                record.metadata = map;
            }
            OpKind::Remove => record.metadata.clear(),
        }
        return Ok(());
    }
    let key = &segments[1];
    match op.op {
        OpKind::Remove => {
            record.metadata.remove(key);
        }
        OpKind::Add | OpKind::Replace => {
            let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
            let s = value.as_str().ok_or_else(|| ApiError::bad_value("metadata values must be strings"))?;
            record.metadata.insert(key.clone(), s.to_string());
        }
    }
    Ok(())
}

fn apply_scalar(
    record: &mut ArtifactRecord,
    name: &str,
    kind: ScalarKind,
    op: &RawPatchOp,
    segments: &[String],
) -> ApiResult<()> {
    if segments.len() != 1 {
        return Err(ApiError::bad_value(format!("'{name}' has no nested paths")));
    }
    match op.op {
        OpKind::Remove => {
            record.properties.insert(name.to_string(), AttributeValue::Null);
            Ok(())
        }
        OpKind::Add | OpKind::Replace => {
            let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
            if value.is_null() {
                record.properties.insert(name.to_string(), AttributeValue::Null);
                return Ok(());
            }
            let scalar = AttributeValue::coerce_scalar(kind, value)?;
            record.properties.insert(name.to_string(), AttributeValue::Scalar(scalar));
            Ok(())
        }
    }
}

fn apply_list(
    record: &mut ArtifactRecord,
    name: &str,
    kind: ScalarKind,
    op: &RawPatchOp,
    segments: &[String],
) -> ApiResult<()> {
    let mut items = match record.properties.get(name) {
        Some(AttributeValue::List(items)) => items.clone(),
        _ => Vec::new(),
    };

    if segments.len() == 1 {
        // Whole-container replace, or `add` with a whole-container value
        // (a historical compatibility shape).
        return match op.op {
            OpKind::Remove => {
                record.properties.insert(name.to_string(), AttributeValue::List(Vec::new()));
                Ok(())
            }
            OpKind::Add | OpKind::Replace => {
                let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
                let array = value.as_array().ok_or_else(|| ApiError::bad_value(format!("'{name}' must be an array")))?;
                let mut new_items = Vec::with_capacity(array.len());
                for v in array {
                    new_items.push(AttributeValue::coerce_scalar(kind, v)?);
                }
                record.properties.insert(name.to_string(), AttributeValue::List(new_items));
                Ok(())
            }
        };
    }

    let index_segment = &segments[1];
    if index_segment == "-" {
        if op.op != OpKind::Add {
            return Err(ApiError::bad_value("'-' is only valid for 'add' (append)"));
        }
        let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
        items.push(AttributeValue::coerce_scalar(kind, value)?);
        record.properties.insert(name.to_string(), AttributeValue::List(items));
        return Ok(());
    }

    let index: usize = index_segment
        .parse()
        .map_err(|_| ApiError::bad_value(format!("invalid list index '{index_segment}'")))?;

    match op.op {
        OpKind::Add => {
            if index > items.len() {
                return Err(ApiError::bad_value("list index out of bounds"));
            }
            let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
            items.insert(index, AttributeValue::coerce_scalar(kind, value)?);
        }
        OpKind::Replace => {
            if index >= items.len() {
                return Err(ApiError::bad_value("list index out of bounds"));
            }
            let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
            items[index] = AttributeValue::coerce_scalar(kind, value)?;
        }
        OpKind::Remove => {
            if index >= items.len() {
                return Err(ApiError::bad_value("list index out of bounds"));
            }
            items.remove(index);
        }
    }
    record.properties.insert(name.to_string(), AttributeValue::List(items));
    Ok(())
}

fn apply_map(
    record: &mut ArtifactRecord,
    name: &str,
    kind: ScalarKind,
    op: &RawPatchOp,
    segments: &[String],
) -> ApiResult<()> {
    let mut map = match record.properties.get(name) {
        Some(AttributeValue::Map(map)) => map.clone(),
        _ => std::collections::BTreeMap::new(),
    };

    if segments.len() == 1 {
        return match op.op {
            OpKind::Remove => {
                record.properties.insert(name.to_string(), AttributeValue::Map(std::collections::BTreeMap::new()));
                Ok(())
            }
            OpKind::Add | OpKind::Replace => {
                let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
                let obj = value.as_object().ok_or_else(|| ApiError::bad_value(format!("'{name}' must be an object")))?;
                let mut new_map = std::collections::BTreeMap::new();
                for (k, v) in obj {
                    new_map.insert(k.clone(), AttributeValue::coerce_scalar(kind, v)?);
                }
                record.properties.insert(name.to_string(), AttributeValue::Map(new_map));
                Ok(())
            }
        };
    }

    let key = segments[1].clone();
    match op.op {
        OpKind::Remove => {
            map.remove(&key);
        }
        OpKind::Add | OpKind::Replace => {
            let value = op.value.as_ref().ok_or_else(|| ApiError::bad_value("missing value"))?;
            map.insert(key, AttributeValue::coerce_scalar(kind, value)?);
        }
    }
    record.properties.insert(name.to_string(), AttributeValue::Map(map));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::sample_artifact;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};
    use uuid::Uuid;

    fn record() -> ArtifactRecord {
        let now = Utc::now();
        ArtifactRecord {
            id: Uuid::new_v4(),
            type_name: "sample_artifact".to_string(),
            name: Some("n".to_string()),
            version: Some("1.0".to_string()),
            owner: "tenant-a".to_string(),
            visibility: Visibility::Private,
            status: Status::Queued,
            created_at: now,
            updated_at: now,
            activated_at: None,
            description: None,
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            icon: None,
            properties: BTreeMap::new(),
            version_token: 1,
        }
    }

    #[test]
    fn unknown_attribute_is_bad_request() {
        let descriptor = sample_artifact::descriptor();
        let ops = parse_ops(&serde_json::json!([{"op": "add", "path": "/foo", "value": "bar"}])).unwrap();
        let err = apply(&descriptor, &record(), &ops).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn owner_is_forbidden() {
        let descriptor = sample_artifact::descriptor();
        let ops = parse_ops(&serde_json::json!([{"op": "replace", "path": "/owner", "value": "x"}])).unwrap();
        let err = apply(&descriptor, &record(), &ops).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn remove_name_is_bad_request() {
        let descriptor = sample_artifact::descriptor();
        let ops = parse_ops(&serde_json::json!([{"op": "remove", "path": "/name"}])).unwrap();
        let err = apply(&descriptor, &record(), &ops).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn status_mixed_with_other_ops_rejected() {
        let descriptor = sample_artifact::descriptor();
        let ops = parse_ops(&serde_json::json!([
            {"op": "replace", "path": "/status", "value": "active"},
            {"op": "replace", "path": "/str1", "value": "x"}
        ]))
        .unwrap();
        let err = apply(&descriptor, &record(), &ops).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn blob_status_cannot_be_patched() {
        let descriptor = sample_artifact::descriptor();
        let ops =
            parse_ops(&serde_json::json!([{"op": "replace", "path": "/blob/status", "value": "saving"}])).unwrap();
        let err = apply(&descriptor, &record(), &ops).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn list_validators_enforce_uniqueness_and_cap() {
        let descriptor = sample_artifact::descriptor();
        let mut r = record();
        r.properties.insert(
            "list_validators".to_string(),
            AttributeValue::List(vec![ScalarValue::Str("a".into()), ScalarValue::Str("b".into()), ScalarValue::Str("c".into())]),
        );

        let ops = parse_ops(&serde_json::json!([{"op": "add", "path": "/list_validators/-", "value": "d"}])).unwrap();
        assert!(apply(&descriptor, &r, &ops).is_err());

        let ops =
            parse_ops(&serde_json::json!([{"op": "replace", "path": "/list_validators/2", "value": "b"}])).unwrap();
        assert!(apply(&descriptor, &r, &ops).is_err());

        let ops =
            parse_ops(&serde_json::json!([{"op": "replace", "path": "/list_validators/1", "value": "d"}])).unwrap();
        let outcome = apply(&descriptor, &r, &ops).unwrap();
        match outcome {
            PatchOutcome::Attributes(updated) => {
                if let Some(AttributeValue::List(items)) = updated.properties.get("list_validators") {
                    assert_eq!(items, &vec![ScalarValue::Str("a".into()), ScalarValue::Str("d".into()), ScalarValue::Str("c".into())]);
                } else {
                    panic!("expected list");
                }
            }
            _ => panic!("expected attribute outcome"),
        }
    }
}
