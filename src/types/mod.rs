//! Type Registry.
//!
//! Loads artifact-type definitions and exposes per-type metadata to every
//! other component: the patch engine compiles pointers against a
//! descriptor, validators read caps and rules off the attribute, the
//! query engine checks `sortable`/`filter_ops`, and `/schemas` renders
//! the Draft-4 document straight from it. The registry is immutable once
//! built, so it is shared lock-free (`Arc<TypeDescriptor>`) across
//! requests, same as a connection-pool handle.

pub mod sample_artifact;
pub mod schema;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::{ApiError, ApiResult};
use crate::validators::ValidationRule;
use crate::value::ScalarKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterOp {
    Eq,
    Neq,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(FilterOp::Eq),
            "neq" => Some(FilterOp::Neq),
            "in" => Some(FilterOp::In),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            _ => None,
        }
    }

    pub const ALL: [FilterOp; 7] = [
        FilterOp::Eq,
        FilterOp::Neq,
        FilterOp::In,
        FilterOp::Gt,
        FilterOp::Gte,
        FilterOp::Lt,
        FilterOp::Lte,
    ];
}

/// What shape an attribute's value takes. Blob/BlobMap attributes are
/// never reachable through generic JSON-Patch add/remove; they
/// only change through the dedicated blob upload API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Scalar(ScalarKind),
    ListOf(ScalarKind),
    MapOf(ScalarKind),
    Blob,
    BlobMap,
}

impl AttributeKind {
    pub fn is_blob_like(&self) -> bool {
        matches!(self, AttributeKind::Blob | AttributeKind::BlobMap)
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, AttributeKind::ListOf(_) | AttributeKind::MapOf(_))
    }
}

/// Size caps for collection- and blob-shaped attributes.
#[derive(Debug, Clone, Default)]
pub struct SizeCaps {
    pub max_length: Option<usize>,
    pub max_items: Option<usize>,
    pub max_properties: Option<usize>,
    pub max_blob_size: Option<u64>,
}

/// Full metadata for one attribute, intrinsic or custom.
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: AttributeKind,
    pub required_on_activate: bool,
    pub mutable: bool,
    pub sortable: bool,
    pub system: bool,
    pub default: Option<JsonValue>,
    pub filter_ops: Vec<FilterOp>,
    pub validators: Vec<Box<dyn ValidationRule>>,
    pub caps: SizeCaps,
    /// Intrinsic attributes (id, name, version, owner, ...) are handled
    /// by the lifecycle engine directly rather than stored as properties;
    /// this flag lets the registry carry them in the same descriptor list
    /// that drives schema generation without the store treating them as
    /// EAV rows.
    pub intrinsic: bool,
}

impl std::fmt::Debug for AttributeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required_on_activate", &self.required_on_activate)
            .field("mutable", &self.mutable)
            .field("sortable", &self.sortable)
            .field("system", &self.system)
            .field("intrinsic", &self.intrinsic)
            .finish()
    }
}

impl AttributeDescriptor {
    pub fn nullable(&self) -> bool {
        !self.required_on_activate
    }
}

/// An artifact type's full schema: ordered custom attributes plus the
/// type's own version string. Intrinsic attributes are the same for every
/// type and are appended by `TypeRegistry::schema_of`.
pub struct TypeDescriptor {
    pub type_name: String,
    pub type_version: String,
    pub attributes: BTreeMap<String, AttributeDescriptor>,
}

impl TypeDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.get(name)
    }
}

/// Immutable mapping from type name to descriptor. Built once at startup
/// (`TypeRegistry::bootstrap`); `GetType`/`SchemaOf`/`ListTypes` never
/// mutate it afterward, so concurrent reads need no locking.
pub struct TypeRegistry {
    types: BTreeMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self { types: BTreeMap::new() }
    }

    /// Registers a type descriptor. Fails fatally (`RegistryConflict`) on
    /// a duplicate name — this only ever runs at startup.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> ApiResult<()> {
        if self.types.contains_key(&descriptor.type_name) {
            return Err(ApiError::internal(format!(
                "registry conflict: type '{}' already registered",
                descriptor.type_name
            )));
        }
        self.types.insert(descriptor.type_name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// The built-in registry used when no external type-definition loader
    /// is configured: just the reference `sample_artifact` type.
    pub fn bootstrap() -> Self {
        let mut registry = Self::new();
        registry
            .register(sample_artifact::descriptor())
            .expect("sample_artifact registers cleanly at startup");
        registry
    }

    pub fn get_type(&self, name: &str) -> ApiResult<Arc<TypeDescriptor>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("artifact type '{name}' not found")))
    }

    pub fn list_types(&self) -> ApiResult<BTreeMap<String, JsonValue>> {
        let mut out = BTreeMap::new();
        for name in self.types.keys() {
            out.insert(name.clone(), self.schema_of(name)?);
        }
        Ok(out)
    }

    pub fn schema_of(&self, name: &str) -> ApiResult<JsonValue> {
        let descriptor = self.get_type(name)?;
        Ok(schema::draft4_schema(&descriptor))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
