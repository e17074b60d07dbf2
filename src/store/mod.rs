//! Persistence Gateway.
//!
//! Owns the durable artifact record exclusively:
//! transactional CRUD, blob-slot lifecycle, tag replacement, uniqueness
//! enforcement and keyset listing all live here. Concurrency control is
//! row-scoped optimistic concurrency, the same idea as a
//! `TransactionManager` but simplified to what this catalog actually asks
//! for: a per-row version token checked on update, rather than full MVCC
//! snapshot isolation. Backed in-process by an `RwLock<HashMap<..>>`,
//! matching an `InMemoryStorage` shape
//! (one lock per logical table, here a single table of artifact rows).

pub mod marker;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::value::{AttributeValue, BlobSlot, BlobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Queued,
    Active,
    Deactivated,
    Deleted,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Active => "active",
            Status::Deactivated => "deactivated",
            Status::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Status::Queued),
            "active" => Some(Status::Active),
            "deactivated" => Some(Status::Deactivated),
            "deleted" => Some(Status::Deleted),
            _ => None,
        }
    }
}

/// The durable artifact row. Custom attributes live in `properties`
/// (an EAV-shaped map, same idea as generic property tables) so the
/// store never needs to know a type's schema.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub id: Uuid,
    pub type_name: String,
    pub name: Option<String>,
    pub version: Option<String>,
    pub owner: String,
    pub visibility: Visibility,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub icon: Option<BlobSlot>,
    pub properties: BTreeMap<String, AttributeValue>,
    /// Monotonically increasing per-row version token for optimistic
    /// concurrency.
    pub version_token: u64,
}

/// The reader's scope, used to apply visibility scoping uniformly
/// across get/list.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub tenant: Option<String>,
    pub is_admin: bool,
}

impl Viewer {
    pub fn can_see(&self, record: &ArtifactRecord) -> bool {
        if record.status == Status::Deleted {
            return false;
        }
        if self.is_admin {
            return true;
        }
        let owns = self.tenant.as_deref() == Some(record.owner.as_str());
        // Deactivated artifacts are visible to their owner and to admins
        // only, regardless of declared visibility.
        if record.status == Status::Deactivated {
            return owns;
        }
        owns || record.visibility == Visibility::Public
    }
}

/// A blob-slot upload lease: returned by `begin_blob_upload`, redeemed by
/// `finalize_blob_upload`/`abort_blob_upload`. Carries enough to find the
/// slot again without re-resolving the artifact/path.
#[derive(Debug, Clone)]
pub struct BlobLease {
    pub artifact_id: Uuid,
    pub path: String,
}

struct StoreInner {
    rows: HashMap<Uuid, ArtifactRecord>,
    next_version: u64,
}

/// The in-process Persistence Gateway. A real deployment would swap this
/// for a network database; every method here keeps the exact transactional
/// semantics this catalog requires so that swap only touches this module.
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
}

impl Store {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(StoreInner { rows: HashMap::new(), next_version: 1 })) }
    }

    fn uniqueness_conflict(
        rows: &HashMap<Uuid, ArtifactRecord>,
        candidate: &ArtifactRecord,
        ignore_id: Option<Uuid>,
    ) -> bool {
        rows.values().any(|row| {
            if Some(row.id) == ignore_id {
                return false;
            }
            if row.type_name != candidate.type_name
                || row.name != candidate.name
                || row.version != candidate.version
            {
                return false;
            }
            // (type, name, version, owner) unique while not deleted.
            let same_owner_conflict =
                row.owner == candidate.owner && row.status != Status::Deleted;
            // (type, name, version) unique once public, regardless of owner.
            let public_conflict =
                row.visibility == Visibility::Public
                    && candidate.visibility == Visibility::Public
                    && row.status != Status::Deleted;
            same_owner_conflict || public_conflict
        })
    }

    pub async fn create_artifact(&self, mut record: ArtifactRecord) -> ApiResult<ArtifactRecord> {
        let mut inner = self.inner.write().await;
        if Self::uniqueness_conflict(&inner.rows, &record, None) {
            return Err(ApiError::Conflict(
                "an artifact with the same name, version and owner already exists".to_string(),
            ));
        }
        record.version_token = inner.next_version;
        inner.next_version += 1;
        inner.rows.insert(record.id, record.clone());
        Ok(record)
    }

    pub async fn get_artifact(&self, id: Uuid, viewer: &Viewer) -> ApiResult<ArtifactRecord> {
        let inner = self.inner.read().await;
        match inner.rows.get(&id) {
            Some(row) if viewer.can_see(row) => Ok(row.clone()),
            _ => Err(ApiError::not_found("artifact not found")),
        }
    }

    /// Loads the record regardless of visibility scoping, for internal
    /// use by the lifecycle engine once authorization has already been
    /// decided by a more specific check (e.g. blob download rules).
    pub async fn get_artifact_raw(&self, id: Uuid) -> ApiResult<ArtifactRecord> {
        let inner = self.inner.read().await;
        inner.rows.get(&id).cloned().ok_or_else(|| ApiError::not_found("artifact not found"))
    }

    /// Applies `mutator` to the current record if `prev_version_token`
    /// still matches, failing with `Conflict` (StaleWrite) otherwise.
    /// Re-checks uniqueness after mutation since name/version/visibility
    /// may have changed.
    pub async fn update_artifact(
        &self,
        id: Uuid,
        prev_version_token: u64,
        mutator: impl FnOnce(&mut ArtifactRecord) -> ApiResult<()>,
    ) -> ApiResult<ArtifactRecord> {
        let mut inner = self.inner.write().await;
        let current = inner
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::not_found("artifact not found"))?;
        if current.version_token != prev_version_token {
            return Err(ApiError::Conflict("concurrent update, please retry".to_string()));
        }

        let mut candidate = current;
        mutator(&mut candidate)?;

        if Self::uniqueness_conflict(&inner.rows, &candidate, Some(id)) {
            return Err(ApiError::Conflict(
                "an artifact with the same name, version and owner already exists".to_string(),
            ));
        }

        candidate.version_token = inner.next_version;
        inner.next_version += 1;
        candidate.updated_at = Utc::now();
        inner.rows.insert(id, candidate.clone());
        Ok(candidate)
    }

    pub async fn delete_artifact(&self, id: Uuid) -> ApiResult<()> {
        let mut inner = self.inner.write().await;
        let row = inner.rows.get_mut(&id).ok_or_else(|| ApiError::not_found("artifact not found"))?;
        row.status = Status::Deleted;
        row.updated_at = Utc::now();
        if let Some(icon) = row.icon.as_mut() {
            icon.status = BlobStatus::PendingDelete;
        }
        for prop in row.properties.values_mut() {
            match prop {
                AttributeValue::Blob(Some(slot)) => slot.status = BlobStatus::PendingDelete,
                AttributeValue::BlobMap(map) => {
                    for slot in map.values_mut() {
                        slot.status = BlobStatus::PendingDelete;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub async fn replace_tags(&self, id: Uuid, tags: BTreeSet<String>) -> ApiResult<ArtifactRecord> {
        let mut inner = self.inner.write().await;
        let row = inner.rows.get_mut(&id).ok_or_else(|| ApiError::not_found("artifact not found"))?;
        row.tags = tags;
        row.updated_at = Utc::now();
        row.version_token = inner.next_version;
        inner.next_version += 1;
        Ok(inner.rows.get(&id).unwrap().clone())
    }

    pub async fn delete_tags(&self, id: Uuid) -> ApiResult<ArtifactRecord> {
        self.replace_tags(id, BTreeSet::new()).await
    }

    /// Snapshot read of every non-deleted row of a type, for the query
    /// engine to filter/sort/paginate over. Does not lock beyond the
    /// clone — listing is a snapshot read.
    pub async fn snapshot(&self, type_name: &str) -> Vec<ArtifactRecord> {
        let inner = self.inner.read().await;
        inner
            .rows
            .values()
            .filter(|r| r.type_name == type_name && r.status != Status::Deleted)
            .cloned()
            .collect()
    }

    // -- Blob-slot leases -----------------------------------------------

    pub async fn begin_blob_upload(&self, id: Uuid, path: &str) -> ApiResult<BlobLease> {
        let mut inner = self.inner.write().await;
        let row = inner.rows.get_mut(&id).ok_or_else(|| ApiError::not_found("artifact not found"))?;
        let existing = read_blob_slot(row, path);
        match existing {
            Some(slot) if slot.status != BlobStatus::PendingDelete => {
                return Err(ApiError::Conflict(format!("blob slot '{path}' is busy")));
            }
            _ => {}
        }
        write_blob_slot(row, path, BlobSlot {
            size: None,
            checksum: None,
            content_type: None,
            status: BlobStatus::Saving,
            external: false,
        })?;
        row.version_token = inner.next_version;
        inner.next_version += 1;
        Ok(BlobLease { artifact_id: id, path: path.to_string() })
    }

    pub async fn finalize_blob_upload(
        &self,
        lease: &BlobLease,
        size: u64,
        checksum: String,
        content_type: String,
    ) -> ApiResult<ArtifactRecord> {
        let mut inner = self.inner.write().await;
        let row = inner
            .rows
            .get_mut(&lease.artifact_id)
            .ok_or_else(|| ApiError::not_found("artifact not found"))?;
        write_blob_slot(row, &lease.path, BlobSlot {
            size: Some(size),
            checksum: Some(checksum),
            content_type: Some(content_type),
            status: BlobStatus::Active,
            external: false,
        })?;
        row.version_token = inner.next_version;
        inner.next_version += 1;
        Ok(row.clone())
    }

    pub async fn abort_blob_upload(&self, lease: &BlobLease) -> ApiResult<()> {
        let mut inner = self.inner.write().await;
        let row = inner
            .rows
            .get_mut(&lease.artifact_id)
            .ok_or_else(|| ApiError::not_found("artifact not found"))?;
        clear_blob_slot(row, &lease.path)?;
        row.version_token = inner.next_version;
        inner.next_version += 1;
        Ok(())
    }

    pub async fn register_external_blob(
        &self,
        id: Uuid,
        path: &str,
        size: u64,
        checksum: String,
        content_type: String,
    ) -> ApiResult<ArtifactRecord> {
        let mut inner = self.inner.write().await;
        let row = inner.rows.get_mut(&id).ok_or_else(|| ApiError::not_found("artifact not found"))?;
        if let Some(slot) = read_blob_slot(row, path)
            && slot.status != BlobStatus::PendingDelete
        {
            return Err(ApiError::Conflict(format!("blob slot '{path}' is busy")));
        }
        write_blob_slot(row, path, BlobSlot {
            size: Some(size),
            checksum: Some(checksum),
            content_type: Some(content_type),
            status: BlobStatus::Active,
            external: true,
        })?;
        row.version_token = inner.next_version;
        inner.next_version += 1;
        Ok(row.clone())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

pub fn read_blob_slot(row: &ArtifactRecord, path: &str) -> Option<BlobSlot> {
    if path == "icon" {
        return row.icon.clone();
    }
    if let Some((map_attr, key)) = path.split_once('/') {
        if let Some(AttributeValue::BlobMap(map)) = row.properties.get(map_attr) {
            return map.get(key).cloned();
        }
        return None;
    }
    match row.properties.get(path) {
        Some(AttributeValue::Blob(slot)) => slot.clone(),
        _ => None,
    }
}

fn write_blob_slot(row: &mut ArtifactRecord, path: &str, slot: BlobSlot) -> ApiResult<()> {
    if path == "icon" {
        row.icon = Some(slot);
        return Ok(());
    }
    if let Some((map_attr, key)) = path.split_once('/') {
        match row.properties.entry(map_attr.to_string()).or_insert_with(|| AttributeValue::BlobMap(BTreeMap::new())) {
            AttributeValue::BlobMap(map) => {
                map.insert(key.to_string(), slot);
                Ok(())
            }
            _ => Err(ApiError::bad_value(format!("'{map_attr}' is not a blob-map attribute"))),
        }
    } else {
        row.properties.insert(path.to_string(), AttributeValue::Blob(Some(slot)));
        Ok(())
    }
}

fn clear_blob_slot(row: &mut ArtifactRecord, path: &str) -> ApiResult<()> {
    if path == "icon" {
        row.icon = None;
        return Ok(());
    }
    if let Some((map_attr, key)) = path.split_once('/') {
        if let Some(AttributeValue::BlobMap(map)) = row.properties.get_mut(map_attr) {
            map.remove(key);
        }
    } else {
        row.properties.insert(path.to_string(), AttributeValue::Blob(None));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_record(type_name: &str, owner: &str) -> ArtifactRecord {
        let now = Utc::now();
        ArtifactRecord {
            id: Uuid::new_v4(),
            type_name: type_name.to_string(),
            name: Some("n".to_string()),
            version: Some("1.0".to_string()),
            owner: owner.to_string(),
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
            version_token: 0,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name_version_owner() {
        let store = Store::new();
        let a = blank_record("sample_artifact", "tenant-a");
        store.create_artifact(a.clone()).await.unwrap();
        let mut b = blank_record("sample_artifact", "tenant-a");
        b.id = Uuid::new_v4();
        let err = store.create_artifact(b).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn stale_write_is_rejected() {
        let store = Store::new();
        let record = store.create_artifact(blank_record("sample_artifact", "tenant-a")).await.unwrap();
        let stale_token = record.version_token;
        store
            .update_artifact(record.id, stale_token, |r| {
                r.description = Some("first".to_string());
                Ok(())
            })
            .await
            .unwrap();
        let err = store
            .update_artifact(record.id, stale_token, |r| {
                r.description = Some("second".to_string());
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn blob_lease_is_exclusive() {
        let store = Store::new();
        let record = store.create_artifact(blank_record("sample_artifact", "tenant-a")).await.unwrap();
        store.begin_blob_upload(record.id, "blob").await.unwrap();
        let err = store.begin_blob_upload(record.id, "blob").await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
