//! Lifecycle Engine.
//!
//! The hub every request passes through: resolve type, authorize, load
//! the current record, compute the proposed next record (via the patch
//! engine for patches, directly for create), validate cross-attribute
//! invariants, commit, emit. Grounded on a `TransactionManager`-as-
//! orchestrator shape: one component owns the multi-step choreography
//! so no other module has to know the full request lifecycle.
//!
//! Authorization here resolves one internal conflict in how "read a
//! deactivated artifact" is described: one place says an owner reading
//! their own deactivated artifact should be denied, another says
//! deactivated artifacts stay visible to their owner and to admins, and
//! a reference case patches a just-deactivated artifact as its owner
//! and gets `Forbidden`, not `NotFound` — which only makes sense if the
//! record is still resolvable. This module keeps owners' read access to
//! their own deactivated artifacts; only mutation (and only an admin
//! reactivating/deactivating/publishing) is gated. Blob downloads are
//! the one place the stricter "deactivated -> admin only" wording is
//! honored literally, since that rule is unambiguous and uncontradicted
//! elsewhere. See DESIGN.md for the full writeup.
//!
//! Similarly, "a foreign private artifact must return the absence
//! signal, never the forbidden signal" is stated as a blanket rule in
//! two independent places, against one table cell that calls for a
//! denial on a single modify-private case. This module follows the
//! blanket rule for every operation, including
//! modify/activate/deactivate/publish/delete.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::blob::{self, InMemoryBlobStore};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::identity::Identity;
use crate::notify::{EventType, NotificationEmitter};
use crate::patch::{self, PatchOutcome};
use crate::query::{self, Page, PageLimits};
use crate::store::{ArtifactRecord, Status, Store, Viewer, Visibility};
use crate::types::{AttributeKind, TypeDescriptor, TypeRegistry};
use crate::value::{AttributeValue, BlobSlot, BlobStatus, ScalarKind, ScalarValue};

const TAG_MAX_LEN: usize = 255;

pub struct LifecycleEngine {
    registry: Arc<TypeRegistry>,
    store: Store,
    blobs: InMemoryBlobStore,
    notifier: NotificationEmitter,
    max_blob_size_default: u64,
    page_limits: PageLimits,
    request_deadline: Duration,
}

impl LifecycleEngine {
    pub fn new(
        registry: Arc<TypeRegistry>,
        store: Store,
        blobs: InMemoryBlobStore,
        notifier: NotificationEmitter,
        max_blob_size_default: u64,
    ) -> Self {
        Self {
            registry,
            store,
            blobs,
            notifier,
            max_blob_size_default,
            page_limits: PageLimits::default(),
            request_deadline: Duration::from_secs(60),
        }
    }

    /// Builds the engine from the service's full `Config`, wiring
    /// `GLAREDB_MAX_PAGE_SIZE`/`GLAREDB_DEFAULT_PAGE_SIZE` into the query
    /// engine and `GLAREDB_REQUEST_DEADLINE_SECS` into blob-upload
    /// cancellation, instead of the library-default fallbacks `new` uses.
    pub fn from_config(
        registry: Arc<TypeRegistry>,
        store: Store,
        blobs: InMemoryBlobStore,
        notifier: NotificationEmitter,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            store,
            blobs,
            notifier,
            max_blob_size_default: config.max_blob_size_default,
            page_limits: PageLimits { default_limit: config.default_page_size, max_limit: config.max_page_size },
            request_deadline: config.request_deadline,
        }
    }

    pub fn schema_of(&self, type_name: &str) -> ApiResult<JsonValue> {
        self.registry.schema_of(type_name)
    }

    pub fn list_types(&self) -> ApiResult<BTreeMap<String, JsonValue>> {
        self.registry.list_types()
    }

    fn viewer(identity: &Identity) -> Viewer {
        Viewer { tenant: identity.tenant().map(str::to_string), is_admin: identity.is_admin() }
    }

    fn actor(identity: &Identity) -> String {
        match identity {
            Identity::Confirmed { user_id, .. } => user_id.clone(),
            Identity::Anonymous => "anonymous".to_string(),
        }
    }

    async fn resolve(&self, type_name: &str, id: Uuid) -> ApiResult<(Arc<TypeDescriptor>, ArtifactRecord)> {
        let descriptor = self.registry.get_type(type_name)?;
        let record = self.store.get_artifact_raw(id).await?;
        if record.type_name != type_name {
            return Err(ApiError::not_found("artifact not found"));
        }
        Ok((descriptor, record))
    }

    async fn validate_dependencies(
        &self,
        descriptor: &TypeDescriptor,
        properties: &BTreeMap<String, AttributeValue>,
    ) -> ApiResult<()> {
        for (name, attr) in &descriptor.attributes {
            if !matches!(attr.kind, AttributeKind::Scalar(ScalarKind::Dependency)) {
                continue;
            }
            let Some(AttributeValue::Scalar(ScalarValue::Str(reference))) = properties.get(name) else {
                continue;
            };
            let target: Uuid = reference
                .parse()
                .map_err(|_| ApiError::bad_value(format!("'{name}' is not a valid artifact reference")))?;
            self.store
                .get_artifact_raw(target)
                .await
                .map_err(|_| ApiError::bad_value(format!("'{name}' references an artifact that does not exist")))?;
        }
        Ok(())
    }

    /// `POST /artifacts/{type}`.
    pub async fn create_artifact(
        &self,
        identity: &Identity,
        type_name: &str,
        body: &JsonValue,
    ) -> ApiResult<(Arc<TypeDescriptor>, ArtifactRecord)> {
        authorize_create(identity)?;
        let descriptor = self.registry.get_type(type_name)?;
        let owner = identity
            .tenant()
            .ok_or_else(|| ApiError::Forbidden("a confirmed tenant is required to create artifacts".to_string()))?
            .to_string();

        let obj = body.as_object().ok_or_else(|| ApiError::bad_value("request body must be a JSON object"))?;

        const SERVER_MANAGED: &[&str] =
            &["id", "type_name", "owner", "status", "visibility", "created_at", "updated_at", "activated_at", "icon"];
        for key in SERVER_MANAGED {
            if obj.contains_key(*key) {
                return Err(ApiError::Forbidden(format!("'{key}' cannot be set on create")));
            }
        }

        const INTRINSIC_BODY_KEYS: &[&str] = &["name", "version", "description", "tags", "metadata"];
        for key in obj.keys() {
            if INTRINSIC_BODY_KEYS.contains(&key.as_str()) {
                continue;
            }
            if descriptor.attribute(key).is_none() {
                return Err(ApiError::bad_value(format!("unknown attribute '{key}'")));
            }
        }

        let name = match obj.get("name") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Null) | None => None,
            Some(_) => return Err(ApiError::bad_value("'name' must be a string")),
        };
        let version = match obj.get("version") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Null) | None => None,
            Some(_) => return Err(ApiError::bad_value("'version' must be a string")),
        };
        let description = match obj.get("description") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Null) | None => None,
            Some(_) => return Err(ApiError::bad_value("'description' must be a string")),
        };
        let tags = match obj.get("tags") {
            Some(v) => parse_tags(v)?,
            None => BTreeSet::new(),
        };
        let metadata = match obj.get("metadata") {
            Some(JsonValue::Object(m)) => {
                let mut out = BTreeMap::new();
                for (k, v) in m {
                    let s = v.as_str().ok_or_else(|| ApiError::bad_value("metadata values must be strings"))?;
                    out.insert(k.clone(), s.to_string());
                }
                out
            }
            Some(JsonValue::Null) | None => BTreeMap::new(),
            Some(_) => return Err(ApiError::bad_value("'metadata' must be an object")),
        };

        let mut properties = BTreeMap::new();
        for (attr_name, attr) in &descriptor.attributes {
            if attr.intrinsic || attr.system || attr.kind.is_blob_like() {
                continue;
            }
            let value = match obj.get(attr_name) {
                Some(v) => patch::coerce_whole_value(attr, v)?,
                None => match &attr.default {
                    Some(default_json) => patch::coerce_whole_value(attr, default_json)?,
                    None => AttributeValue::Null,
                },
            };
            patch::validate_attribute_value(attr, &value)?;
            properties.insert(attr_name.clone(), value);
        }

        self.validate_dependencies(&descriptor, &properties).await?;

        let now = Utc::now();
        let record = ArtifactRecord {
            id: Uuid::new_v4(),
            type_name: type_name.to_string(),
            name,
            version,
            owner,
            visibility: Visibility::Private,
            status: Status::Queued,
            created_at: now,
            updated_at: now,
            activated_at: None,
            description,
            tags,
            metadata,
            icon: None,
            properties,
            version_token: 0,
        };

        let created = self.store.create_artifact(record).await?;
        self.notifier.emit(EventType::Created, &created, &Self::actor(identity), now);
        Ok((descriptor, created))
    }

    /// `GET /artifacts/{type}/{id}`.
    pub async fn get_artifact(
        &self,
        identity: &Identity,
        type_name: &str,
        id: Uuid,
    ) -> ApiResult<(Arc<TypeDescriptor>, ArtifactRecord)> {
        let (descriptor, record) = self.resolve(type_name, id).await?;
        authorize_read(identity, &record)?;
        Ok((descriptor, record))
    }

    /// `GET /artifacts/{type}`.
    pub async fn list_artifacts(
        &self,
        identity: &Identity,
        type_name: &str,
        params: &[(String, String)],
    ) -> ApiResult<(Arc<TypeDescriptor>, Page)> {
        let descriptor = self.registry.get_type(type_name)?;
        let spec = query::parse(params, &descriptor, self.page_limits)?;
        let rows = self.store.snapshot(type_name).await;
        let viewer = Self::viewer(identity);
        let page = query::execute(&spec, rows, &viewer)?;
        Ok((descriptor, page))
    }

    /// `PATCH /artifacts/{type}/{id}`.
    pub async fn patch_artifact(
        &self,
        identity: &Identity,
        type_name: &str,
        id: Uuid,
        body: &JsonValue,
    ) -> ApiResult<(Arc<TypeDescriptor>, ArtifactRecord)> {
        let (descriptor, current) = self.resolve(type_name, id).await?;
        if current.status == Status::Deleted {
            return Err(ApiError::not_found("artifact not found"));
        }

        let ops = patch::parse_ops(body)?;
        let outcome = patch::apply(&descriptor, &current, &ops)?;

        let (event, record) = match outcome {
            PatchOutcome::StatusChange(target) => {
                authorize_transition(identity, &current, target)?;
                if target == current.status {
                    return Ok((descriptor, current));
                }
                if target == Status::Active {
                    enforce_required_on_activate(&descriptor, &current)?;
                }
                let prev_token = current.version_token;
                let updated = self
                    .store
                    .update_artifact(id, prev_token, move |r| {
                        r.status = target;
                        if target == Status::Active && r.activated_at.is_none() {
                            r.activated_at = Some(Utc::now());
                        }
                        Ok(())
                    })
                    .await?;
                let event = match target {
                    Status::Active => EventType::Activated,
                    Status::Deactivated => EventType::Deactivated,
                    Status::Deleted => EventType::Deleted,
                    Status::Queued => EventType::Updated,
                };
                (event, updated)
            }
            PatchOutcome::VisibilityChange(target) => {
                authorize_visibility(identity, &current, target)?;
                if target == current.visibility {
                    return Ok((descriptor, current));
                }
                let prev_token = current.version_token;
                let updated =
                    self.store.update_artifact(id, prev_token, move |r| { r.visibility = target; Ok(()) }).await?;
                (EventType::Published, updated)
            }
            PatchOutcome::Attributes(candidate) => {
                authorize_modify_attrs(identity, &current)?;
                enforce_mutability(&descriptor, &current, &candidate)?;
                self.validate_dependencies(&descriptor, &candidate.properties).await?;
                let prev_token = current.version_token;
                let updated = self
                    .store
                    .update_artifact(id, prev_token, move |r| {
                        r.description = candidate.description;
                        r.metadata = candidate.metadata;
                        r.properties = candidate.properties;
                        Ok(())
                    })
                    .await?;
                (EventType::Updated, updated)
            }
        };

        self.notifier.emit(event, &record, &Self::actor(identity), Utc::now());
        Ok((descriptor, record))
    }

    /// `DELETE /artifacts/{type}/{id}`.
    pub async fn delete_artifact(&self, identity: &Identity, type_name: &str, id: Uuid) -> ApiResult<()> {
        let (_, current) = self.resolve(type_name, id).await?;
        if current.status == Status::Deleted {
            return Err(ApiError::not_found("artifact not found"));
        }
        authorize_delete(identity, &current)?;
        self.store.delete_artifact(id).await?;
        let mut snapshot = current;
        snapshot.status = Status::Deleted;
        self.notifier.emit(EventType::Deleted, &snapshot, &Self::actor(identity), Utc::now());
        Ok(())
    }

    /// `PUT /artifacts/{type}/{id}/tags`.
    pub async fn replace_tags(
        &self,
        identity: &Identity,
        type_name: &str,
        id: Uuid,
        tags_json: &JsonValue,
    ) -> ApiResult<(Arc<TypeDescriptor>, ArtifactRecord)> {
        let (descriptor, current) = self.resolve(type_name, id).await?;
        if current.status == Status::Deleted {
            return Err(ApiError::not_found("artifact not found"));
        }
        authorize_modify_attrs(identity, &current)?;
        let tags = parse_tags(tags_json)?;
        let updated = self.store.replace_tags(id, tags).await?;
        self.notifier.emit(EventType::Updated, &updated, &Self::actor(identity), Utc::now());
        Ok((descriptor, updated))
    }

    /// `DELETE /artifacts/{type}/{id}/tags`.
    pub async fn clear_tags(
        &self,
        identity: &Identity,
        type_name: &str,
        id: Uuid,
    ) -> ApiResult<(Arc<TypeDescriptor>, ArtifactRecord)> {
        let (descriptor, current) = self.resolve(type_name, id).await?;
        if current.status == Status::Deleted {
            return Err(ApiError::not_found("artifact not found"));
        }
        authorize_modify_attrs(identity, &current)?;
        let updated = self.store.delete_tags(id).await?;
        self.notifier.emit(EventType::Updated, &updated, &Self::actor(identity), Utc::now());
        Ok((descriptor, updated))
    }

    /// `PUT /artifacts/{type}/{id}/{blob_path}` with a byte stream.
    pub async fn upload_blob<S, E>(
        &self,
        identity: &Identity,
        type_name: &str,
        id: Uuid,
        path: &str,
        stream: S,
        content_type: Option<String>,
    ) -> ApiResult<(Arc<TypeDescriptor>, ArtifactRecord)>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
    {
        let (descriptor, current) = self.resolve(type_name, id).await?;
        if current.status == Status::Deleted {
            return Err(ApiError::not_found("artifact not found"));
        }
        authorize_modify_attrs(identity, &current)?;
        let max_bytes = blob_max_bytes(&descriptor, path, self.max_blob_size_default)?;

        let lease = self.store.begin_blob_upload(id, path).await?;
        let put = blob::put(&self.blobs, &blob_key(id, path), stream, max_bytes, content_type);
        let outcome = match tokio::time::timeout(self.request_deadline, put).await {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => {
                let _ = self.store.abort_blob_upload(&lease).await;
                return Err(e);
            }
            Err(_timed_out) => {
                // Deadline hit mid-stream: release the lease and discard
                // whatever bytes were buffered, same as an explicit cancel.
                let _ = self.store.abort_blob_upload(&lease).await;
                return Err(ApiError::bad_value("blob upload exceeded the request deadline"));
            }
        };
        let updated =
            self.store.finalize_blob_upload(&lease, outcome.size, outcome.checksum, outcome.content_type).await?;
        self.notifier.emit(EventType::Updated, &updated, &Self::actor(identity), Utc::now());
        Ok((descriptor, updated))
    }

    /// `PUT /artifacts/{type}/{id}/{blob_path}` with an external location body.
    pub async fn register_external_blob(
        &self,
        identity: &Identity,
        type_name: &str,
        id: Uuid,
        path: &str,
        url: &str,
    ) -> ApiResult<(Arc<TypeDescriptor>, ArtifactRecord)> {
        let (descriptor, current) = self.resolve(type_name, id).await?;
        if current.status == Status::Deleted {
            return Err(ApiError::not_found("artifact not found"));
        }
        authorize_modify_attrs(identity, &current)?;
        blob_max_bytes(&descriptor, path, self.max_blob_size_default)?;

        let outcome = self.blobs.probe_external(url).await?;
        let updated =
            self.store.register_external_blob(id, path, outcome.size, outcome.checksum, outcome.content_type).await?;
        self.notifier.emit(EventType::Updated, &updated, &Self::actor(identity), Utc::now());
        Ok((descriptor, updated))
    }

    /// `GET /artifacts/{type}/{id}/{blob_path}`.
    pub async fn download_blob(
        &self,
        identity: &Identity,
        type_name: &str,
        id: Uuid,
        path: &str,
    ) -> ApiResult<(Bytes, BlobSlot)> {
        let (descriptor, current) = self.resolve(type_name, id).await?;
        if current.status == Status::Deleted {
            return Err(ApiError::not_found("artifact not found"));
        }
        // Blob downloads are admin-only while deactivated, a
        // stricter rule than plain GET of the artifact record.
        if current.status == Status::Deactivated && !identity.is_admin() {
            return Err(ApiError::Forbidden(
                "blob downloads are restricted to administrators while the artifact is deactivated".to_string(),
            ));
        }
        authorize_read(identity, &current)?;
        blob_max_bytes(&descriptor, path, self.max_blob_size_default)?;

        let slot = crate::store::read_blob_slot(&current, path)
            .ok_or_else(|| ApiError::bad_value(format!("blob slot '{path}' is empty")))?;
        if slot.status != BlobStatus::Active {
            return Err(ApiError::bad_value(format!("blob slot '{path}' is not available for download")));
        }
        let bytes = self.blobs.get(&blob_key(id, path)).await?;
        Ok((bytes, slot))
    }
}

fn blob_key(id: Uuid, path: &str) -> String {
    format!("{id}/{path}")
}

/// Resolves the `max_blob_size` cap for a blob path, validating that the
/// path actually names a blob slot on this type along the way. `icon` is
/// the one slot with no attribute-level cap, so it falls back to the
/// server default.
fn blob_max_bytes(descriptor: &TypeDescriptor, path: &str, default_cap: u64) -> ApiResult<u64> {
    if path == "icon" {
        return Ok(default_cap);
    }
    let head = path.split('/').next().unwrap_or(path);
    let attr = descriptor.attribute(head).ok_or_else(|| ApiError::bad_value(format!("unknown blob slot '{path}'")))?;
    if !attr.kind.is_blob_like() {
        return Err(ApiError::bad_value(format!("'{head}' is not a blob attribute")));
    }
    match (attr.kind, path.contains('/')) {
        (AttributeKind::Blob, true) => Err(ApiError::bad_value(format!("'{head}' is not a blob-map attribute"))),
        (AttributeKind::BlobMap, false) => {
            Err(ApiError::bad_value(format!("'{head}' requires a map key, e.g. '{head}/mykey'")))
        }
        _ => Ok(attr.caps.max_blob_size.unwrap_or(default_cap)),
    }
}

fn parse_tags(value: &JsonValue) -> ApiResult<BTreeSet<String>> {
    let array = value.as_array().ok_or_else(|| ApiError::bad_value("'tags' must be an array of strings"))?;
    let mut tags = BTreeSet::new();
    for v in array {
        let s = v.as_str().ok_or_else(|| ApiError::bad_value("tags must be strings"))?;
        if s.chars().count() > TAG_MAX_LEN {
            return Err(ApiError::bad_value(format!("tag exceeds the maximum length of {TAG_MAX_LEN}")));
        }
        tags.insert(s.to_string());
    }
    Ok(tags)
}

fn is_owner(identity: &Identity, record: &ArtifactRecord) -> bool {
    identity.tenant() == Some(record.owner.as_str())
}

fn authorize_create(identity: &Identity) -> ApiResult<()> {
    if identity.is_anonymous() {
        return Err(ApiError::Forbidden("anonymous callers cannot create artifacts".to_string()));
    }
    Ok(())
}

/// `Read private`/`Read public`/`Read deactivated` rows.
fn authorize_read(identity: &Identity, record: &ArtifactRecord) -> ApiResult<()> {
    if record.status == Status::Deleted {
        return Err(ApiError::not_found("artifact not found"));
    }
    if identity.is_admin() {
        return Ok(());
    }
    if record.status == Status::Deactivated {
        return if is_owner(identity, record) { Ok(()) } else { Err(ApiError::not_found("artifact not found")) };
    }
    if record.visibility == Visibility::Public {
        return Ok(());
    }
    if is_owner(identity, record) { Ok(()) } else { Err(ApiError::not_found("artifact not found")) }
}

/// `Modify private`/`Modify active (mutable only)`/`Modify public` rows.
/// A foreign-private record never reaches the deactivated/public checks
/// below — it is turned away as `NotFound` first, per the leak-avoidance
/// rule applied uniformly across this module.
fn authorize_modify_attrs(identity: &Identity, record: &ArtifactRecord) -> ApiResult<()> {
    if identity.is_admin() {
        return Ok(());
    }
    if record.visibility == Visibility::Private && !is_owner(identity, record) {
        return Err(ApiError::not_found("artifact not found"));
    }
    if record.status == Status::Deactivated {
        return Err(ApiError::Forbidden("deactivated artifacts cannot be modified except by an admin".to_string()));
    }
    if record.visibility == Visibility::Public {
        return Err(ApiError::Forbidden("public artifacts can only be modified by an admin".to_string()));
    }
    Ok(())
}

fn is_legal_status_transition(from: Status, to: Status) -> bool {
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Status::Queued, Status::Active)
            | (Status::Active, Status::Deactivated)
            | (Status::Deactivated, Status::Active)
            | (Status::Queued, Status::Deleted)
            | (Status::Active, Status::Deleted)
            | (Status::Deactivated, Status::Deleted)
    )
}

/// `Activate`/`Deactivate`/`Publish`(-as-delete) rows, plus the
/// idempotent-reapply carve-out.
fn authorize_transition(identity: &Identity, record: &ArtifactRecord, target: Status) -> ApiResult<()> {
    if !is_legal_status_transition(record.status, target) {
        return Err(ApiError::bad_value(format!(
            "cannot transition from '{}' to '{}'",
            record.status.as_str(),
            target.as_str()
        )));
    }
    if identity.is_admin() {
        return Ok(());
    }
    if record.visibility == Visibility::Private && !is_owner(identity, record) {
        return Err(ApiError::not_found("artifact not found"));
    }
    if target == record.status {
        return Ok(());
    }
    match (record.status, target) {
        (Status::Queued, Status::Active) | (Status::Deactivated, Status::Active) => {
            if is_owner(identity, record) {
                Ok(())
            } else {
                Err(ApiError::Forbidden("only the owner or an admin may activate an artifact".to_string()))
            }
        }
        (Status::Active, Status::Deactivated) => {
            Err(ApiError::Forbidden("only an admin may deactivate an artifact".to_string()))
        }
        (_, Status::Deleted) => Err(ApiError::Forbidden("only an admin may delete via a status change".to_string())),
        _ => unreachable!("checked by is_legal_status_transition"),
    }
}

/// Visibility changes: publish/unpublish, plus the one-way
/// private-to-public rule and the "publish only from active" rule.
fn authorize_visibility(identity: &Identity, record: &ArtifactRecord, target: Visibility) -> ApiResult<()> {
    if identity.is_admin() {
        return Ok(());
    }
    if record.visibility == Visibility::Private && !is_owner(identity, record) {
        return Err(ApiError::not_found("artifact not found"));
    }
    if target == record.visibility {
        return Ok(());
    }
    if record.visibility == Visibility::Public && target == Visibility::Private {
        return Err(ApiError::bad_value("visibility cannot move from public back to private"));
    }
    if record.status != Status::Active {
        return Err(ApiError::bad_value("an artifact must be active before it can be published"));
    }
    Err(ApiError::Forbidden("only an admin may publish an artifact".to_string()))
}

/// `Delete private`/`Delete public` rows.
fn authorize_delete(identity: &Identity, record: &ArtifactRecord) -> ApiResult<()> {
    if identity.is_admin() {
        return Ok(());
    }
    if record.visibility == Visibility::Public {
        return Err(ApiError::Forbidden("only an admin may delete a public artifact".to_string()));
    }
    if is_owner(identity, record) { Ok(()) } else { Err(ApiError::not_found("artifact not found")) }
}

/// Invariant 3: every `required_on_activate` attribute must be non-null,
/// and every required blob slot `active`, at the moment of activation.
fn enforce_required_on_activate(descriptor: &TypeDescriptor, record: &ArtifactRecord) -> ApiResult<()> {
    for (name, attr) in &descriptor.attributes {
        if !attr.required_on_activate {
            continue;
        }
        match attr.kind {
            AttributeKind::Blob => {
                let ready =
                    matches!(record.properties.get(name), Some(AttributeValue::Blob(Some(slot))) if slot.status == BlobStatus::Active);
                if !ready {
                    return Err(ApiError::bad_value(format!("'{name}' must be uploaded before activation")));
                }
            }
            AttributeKind::BlobMap => {
                let ready = matches!(record.properties.get(name), Some(AttributeValue::BlobMap(map)) if !map.is_empty());
                if !ready {
                    return Err(ApiError::bad_value(format!("'{name}' must have at least one blob before activation")));
                }
            }
            _ => {
                let missing = match record.properties.get(name) {
                    None => true,
                    Some(v) => v.is_null(),
                };
                if missing {
                    return Err(ApiError::bad_value(format!("'{name}' is required before activation")));
                }
            }
        }
    }
    Ok(())
}

/// Invariant 4: once active, only attributes declared `mutable` may
/// change value. Intrinsic `description`/`metadata` are always mutable
/// and are not covered by this (they live outside `properties`); tags
/// are never touched by generic patch at all.
fn enforce_mutability(descriptor: &TypeDescriptor, current: &ArtifactRecord, candidate: &ArtifactRecord) -> ApiResult<()> {
    if current.status != Status::Active {
        return Ok(());
    }
    for (name, attr) in &descriptor.attributes {
        if attr.kind.is_blob_like() {
            continue;
        }
        let before = current.properties.get(name);
        let after = candidate.properties.get(name);
        if before != after && !attr.mutable {
            return Err(ApiError::Forbidden(format!("'{name}' is immutable once the artifact is active")));
        }
    }
    Ok(())
}

/// Renders the full JSON view of an artifact: intrinsics plus every
/// custom attribute the type declares, in the shape the web layer
/// returns directly to clients.
pub fn render_artifact(descriptor: &TypeDescriptor, record: &ArtifactRecord) -> JsonValue {
    let mut obj = serde_json::Map::new();
    obj.insert("id".to_string(), JsonValue::String(record.id.to_string()));
    obj.insert("type_name".to_string(), JsonValue::String(record.type_name.clone()));
    obj.insert("name".to_string(), record.name.clone().map(JsonValue::String).unwrap_or(JsonValue::Null));
    obj.insert("version".to_string(), record.version.clone().map(JsonValue::String).unwrap_or(JsonValue::Null));
    obj.insert("owner".to_string(), JsonValue::String(record.owner.clone()));
    obj.insert("visibility".to_string(), JsonValue::String(record.visibility.as_str().to_string()));
    obj.insert("status".to_string(), JsonValue::String(record.status.as_str().to_string()));
    obj.insert("created_at".to_string(), JsonValue::String(record.created_at.to_rfc3339()));
    obj.insert("updated_at".to_string(), JsonValue::String(record.updated_at.to_rfc3339()));
    obj.insert(
        "activated_at".to_string(),
        record.activated_at.map(|t| JsonValue::String(t.to_rfc3339())).unwrap_or(JsonValue::Null),
    );
    obj.insert("description".to_string(), record.description.clone().map(JsonValue::String).unwrap_or(JsonValue::Null));
    obj.insert("tags".to_string(), JsonValue::Array(record.tags.iter().map(|t| JsonValue::String(t.clone())).collect()));
    obj.insert(
        "metadata".to_string(),
        JsonValue::Object(record.metadata.iter().map(|(k, v)| (k.clone(), JsonValue::String(v.clone()))).collect()),
    );
    obj.insert("icon".to_string(), record.icon.as_ref().map(BlobSlot::to_json).unwrap_or(JsonValue::Null));
    for (name, attr) in &descriptor.attributes {
        if attr.intrinsic {
            continue;
        }
        let value = record.properties.get(name).map(AttributeValue::to_json).unwrap_or(JsonValue::Null);
        obj.insert(name.clone(), value);
    }
    JsonValue::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::types::TypeRegistry;

    fn engine() -> LifecycleEngine {
        LifecycleEngine::new(
            Arc::new(TypeRegistry::bootstrap()),
            Store::new(),
            InMemoryBlobStore::new(),
            NotificationEmitter::channel().0,
            1024 * 1024,
        )
    }

    fn owner(tenant: &str) -> Identity {
        Identity::Confirmed { user_id: "u1".to_string(), tenant_id: tenant.to_string(), role: Role::Member }
    }

    fn admin() -> Identity {
        Identity::Confirmed { user_id: "root".to_string(), tenant_id: "ops".to_string(), role: Role::Admin }
    }

    #[tokio::test]
    async fn create_requires_a_confirmed_tenant() {
        let engine = engine();
        let err = engine
            .create_artifact(&Identity::Anonymous, "sample_artifact", &serde_json::json!({"name": "n"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn activate_requires_required_on_activate_attribute() {
        let engine = engine();
        let owner = owner("tenant-a");
        let (_, created) = engine
            .create_artifact(&owner, "sample_artifact", &serde_json::json!({"name": "n", "version": "0.0.1"}))
            .await
            .unwrap();

        let activate = serde_json::json!([{"op": "replace", "path": "/status", "value": "active"}]);
        let err = engine.patch_artifact(&owner, "sample_artifact", created.id, &activate).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let fill = serde_json::json!([{"op": "replace", "path": "/string_required", "value": "x"}]);
        engine.patch_artifact(&owner, "sample_artifact", created.id, &fill).await.unwrap();
        let (_, active) = engine.patch_artifact(&owner, "sample_artifact", created.id, &activate).await.unwrap();
        assert_eq!(active.status, Status::Active);
        assert!(active.activated_at.is_some());
    }

    #[tokio::test]
    async fn owner_cannot_modify_after_admin_deactivates() {
        let engine = engine();
        let owner = owner("tenant-a");
        let admin = admin();
        let (_, created) = engine
            .create_artifact(
                &owner,
                "sample_artifact",
                &serde_json::json!({"name": "n", "version": "0.0.1", "string_required": "x"}),
            )
            .await
            .unwrap();
        let activate = serde_json::json!([{"op": "replace", "path": "/status", "value": "active"}]);
        engine.patch_artifact(&owner, "sample_artifact", created.id, &activate).await.unwrap();

        // owner can still tweak mutable attributes while active+private.
        let mutate = serde_json::json!([{"op": "replace", "path": "/string_mutable", "value": "hi"}]);
        engine.patch_artifact(&owner, "sample_artifact", created.id, &mutate).await.unwrap();

        let deactivate = serde_json::json!([{"op": "replace", "path": "/status", "value": "deactivated"}]);
        let err = engine.patch_artifact(&owner, "sample_artifact", created.id, &deactivate).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        engine.patch_artifact(&admin, "sample_artifact", created.id, &deactivate).await.unwrap();

        // owner still sees it (GET), but can no longer modify it.
        let (_, seen) = engine.get_artifact(&owner, "sample_artifact", created.id).await.unwrap();
        assert_eq!(seen.status, Status::Deactivated);
        let err = engine.patch_artifact(&owner, "sample_artifact", created.id, &mutate).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        // idempotent re-application of the current status is still fine.
        let (_, reapplied) = engine.patch_artifact(&owner, "sample_artifact", created.id, &deactivate).await.unwrap();
        assert_eq!(reapplied.status, Status::Deactivated);
    }

    #[tokio::test]
    async fn foreign_tenant_gets_not_found_not_forbidden() {
        let engine = engine();
        let owner = owner("tenant-a");
        let stranger = owner_for("tenant-b");
        let (_, created) = engine
            .create_artifact(&owner, "sample_artifact", &serde_json::json!({"name": "n", "version": "0.0.1"}))
            .await
            .unwrap();

        let err = engine.get_artifact(&stranger, "sample_artifact", created.id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let mutate = serde_json::json!([{"op": "replace", "path": "/string_mutable", "value": "hi"}]);
        let err = engine.patch_artifact(&stranger, "sample_artifact", created.id, &mutate).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    fn owner_for(tenant: &str) -> Identity {
        Identity::Confirmed { user_id: "u2".to_string(), tenant_id: tenant.to_string(), role: Role::Member }
    }

    #[tokio::test]
    async fn publish_requires_active_status_and_admin() {
        let engine = engine();
        let owner = owner("tenant-a");
        let admin = admin();
        let (_, created) = engine
            .create_artifact(&owner, "sample_artifact", &serde_json::json!({"name": "n", "version": "0.0.1"}))
            .await
            .unwrap();

        let publish = serde_json::json!([{"op": "replace", "path": "/visibility", "value": "public"}]);
        let err = engine.patch_artifact(&admin, "sample_artifact", created.id, &publish).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_))); // still queued

        let fill = serde_json::json!([{"op": "replace", "path": "/string_required", "value": "x"}]);
        engine.patch_artifact(&owner, "sample_artifact", created.id, &fill).await.unwrap();
        let activate = serde_json::json!([{"op": "replace", "path": "/status", "value": "active"}]);
        engine.patch_artifact(&owner, "sample_artifact", created.id, &activate).await.unwrap();

        let err = engine.patch_artifact(&owner, "sample_artifact", created.id, &publish).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        let (_, published) = engine.patch_artifact(&admin, "sample_artifact", created.id, &publish).await.unwrap();
        assert_eq!(published.visibility, Visibility::Public);

        let unpublish = serde_json::json!([{"op": "replace", "path": "/visibility", "value": "private"}]);
        let err = engine.patch_artifact(&admin, "sample_artifact", created.id, &unpublish).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn dependency_reference_must_exist() {
        let engine = engine();
        let owner = owner("tenant-a");
        let err = engine
            .create_artifact(
                &owner,
                "sample_artifact",
                &serde_json::json!({"name": "n", "version": "0.0.1", "dependency1": "not-a-uuid"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn blob_upload_past_deadline_releases_the_lease() {
        let engine = LifecycleEngine {
            request_deadline: std::time::Duration::from_millis(20),
            ..engine()
        };
        let owner = owner("tenant-a");
        let (_, created) = engine
            .create_artifact(&owner, "sample_artifact", &serde_json::json!({"name": "n", "version": "0.0.1"}))
            .await
            .unwrap();

        let stalled = futures::stream::pending::<Result<Bytes, std::io::Error>>();
        let err = engine
            .upload_blob(&owner, "sample_artifact", created.id, "icon", stalled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        // the lease was released, so a fresh upload can still claim the slot.
        let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"ok"))]);
        let (_, updated) = engine
            .upload_blob(&owner, "sample_artifact", created.id, "icon", body, None)
            .await
            .unwrap();
        assert!(matches!(updated.icon.as_ref().map(|s| s.status), Some(BlobStatus::Active)));
    }
}
