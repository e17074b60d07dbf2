//! The built-in `sample_artifact` reference type.
//!
//! Ported attribute-for-attribute from the original service's test
//! fixture (`glare/tests/functional/sample_artifact.py`), so the crate is
//! exercisable end-to-end without an external type-definition loader.
//! Nothing here is special-cased by the registry — it is exactly what a
//! configured type module would produce.

use std::collections::{BTreeMap, BTreeSet};

use crate::validators::{AllowedDictKeys, MaxStrLen, Unique};
use crate::value::ScalarKind;

use super::{AttributeDescriptor, AttributeKind, FilterOp, SizeCaps, TypeDescriptor};

fn attr(name: &str, kind: AttributeKind) -> AttributeDescriptor {
    AttributeDescriptor {
        name: name.to_string(),
        kind,
        required_on_activate: false,
        mutable: false,
        sortable: false,
        system: false,
        default: None,
        filter_ops: Vec::new(),
        validators: Vec::new(),
        caps: SizeCaps::default(),
        intrinsic: false,
    }
}

pub fn descriptor() -> TypeDescriptor {
    let mut attributes = BTreeMap::new();

    attributes.insert(
        "blob".to_string(),
        AttributeDescriptor { mutable: true, ..attr("blob", AttributeKind::Blob) },
    );
    attributes.insert("small_blob".to_string(), AttributeDescriptor {
        mutable: true,
        caps: SizeCaps { max_blob_size: Some(10), ..Default::default() },
        ..attr("small_blob", AttributeKind::Blob)
    });
    attributes.insert(
        "dependency1".to_string(),
        attr("dependency1", AttributeKind::Scalar(ScalarKind::Dependency)),
    );
    attributes.insert(
        "dependency2".to_string(),
        attr("dependency2", AttributeKind::Scalar(ScalarKind::Dependency)),
    );
    attributes.insert("bool1".to_string(), AttributeDescriptor {
        filter_ops: vec![FilterOp::Eq],
        default: Some(serde_json::json!(false)),
        ..attr("bool1", AttributeKind::Scalar(ScalarKind::Bool))
    });
    attributes.insert("bool2".to_string(), AttributeDescriptor {
        filter_ops: vec![FilterOp::Eq],
        default: Some(serde_json::json!(false)),
        ..attr("bool2", AttributeKind::Scalar(ScalarKind::Bool))
    });
    for name in ["int1", "int2"] {
        attributes.insert(name.to_string(), AttributeDescriptor {
            sortable: true,
            filter_ops: FilterOp::ALL.to_vec(),
            ..attr(name, AttributeKind::Scalar(ScalarKind::Int))
        });
    }
    for name in ["float1", "float2"] {
        attributes.insert(name.to_string(), AttributeDescriptor {
            sortable: true,
            filter_ops: FilterOp::ALL.to_vec(),
            ..attr(name, AttributeKind::Scalar(ScalarKind::Float))
        });
    }
    attributes.insert("str1".to_string(), AttributeDescriptor {
        sortable: true,
        filter_ops: FilterOp::ALL.to_vec(),
        ..attr("str1", AttributeKind::Scalar(ScalarKind::Str))
    });
    attributes.insert("list_of_str".to_string(), AttributeDescriptor {
        filter_ops: vec![FilterOp::Eq],
        ..attr("list_of_str", AttributeKind::ListOf(ScalarKind::Str))
    });
    attributes.insert("list_of_int".to_string(), AttributeDescriptor {
        filter_ops: vec![FilterOp::Eq],
        ..attr("list_of_int", AttributeKind::ListOf(ScalarKind::Int))
    });
    attributes.insert("dict_of_str".to_string(), AttributeDescriptor {
        filter_ops: vec![FilterOp::Eq],
        ..attr("dict_of_str", AttributeKind::MapOf(ScalarKind::Str))
    });
    attributes.insert("dict_of_int".to_string(), AttributeDescriptor {
        filter_ops: vec![FilterOp::Eq],
        ..attr("dict_of_int", AttributeKind::MapOf(ScalarKind::Int))
    });
    attributes.insert(
        "dict_of_blobs".to_string(),
        attr("dict_of_blobs", AttributeKind::BlobMap),
    );
    attributes.insert("string_mutable".to_string(), AttributeDescriptor {
        mutable: true,
        filter_ops: FilterOp::ALL.to_vec(),
        ..attr("string_mutable", AttributeKind::Scalar(ScalarKind::Str))
    });
    attributes.insert("string_required".to_string(), AttributeDescriptor {
        required_on_activate: true,
        filter_ops: FilterOp::ALL.to_vec(),
        ..attr("string_required", AttributeKind::Scalar(ScalarKind::Str))
    });
    attributes.insert("string_validators".to_string(), AttributeDescriptor {
        filter_ops: FilterOp::ALL.to_vec(),
        validators: vec![Box::new(MaxStrLen(10))],
        ..attr("string_validators", AttributeKind::Scalar(ScalarKind::Str))
    });
    attributes.insert("list_validators".to_string(), AttributeDescriptor {
        caps: SizeCaps { max_items: Some(3), ..Default::default() },
        validators: vec![Box::new(Unique)],
        ..attr("list_validators", AttributeKind::ListOf(ScalarKind::Str))
    });
    attributes.insert("dict_validators".to_string(), AttributeDescriptor {
        caps: SizeCaps { max_properties: Some(3), ..Default::default() },
        validators: vec![Box::new(AllowedDictKeys(
            ["abc", "def", "ghi", "jkl"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        ))],
        ..attr("dict_validators", AttributeKind::MapOf(ScalarKind::Str))
    });
    attributes.insert("system_attribute".to_string(), AttributeDescriptor {
        system: true,
        sortable: true,
        default: Some(serde_json::json!("default")),
        ..attr("system_attribute", AttributeKind::Scalar(ScalarKind::Str))
    });

    TypeDescriptor {
        type_name: "sample_artifact".to_string(),
        type_version: "1.0".to_string(),
        attributes,
    }
}
