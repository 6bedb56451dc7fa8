//! Persistence seams and stores for the duplicate review pipeline.
//!
//! Three traits cover the external relational store: `PropertyCatalog` for
//! the listing feature's `properties` table, `DuplicateStore` for the tables
//! this core owns, and `FingerprintHasher` for the opaque deterministic hash
//! routine. `PgStore` implements all three against Postgres; `MemoryStore`
//! and `Sha256FingerprintHasher` are the deterministic substitutes used by
//! the test suites.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use dupscan_core::{
    AuditEntry, DuplicateGroup, DuplicateGroupMember, FingerprintFields, GroupStatus,
    MergedPropertyFingerprint, PropertyRecord,
};

pub const CRATE_NAME: &str = "dupscan-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("duplicate group {0} not found or no longer pending")]
    GroupNotFound(Uuid),
    #[error("property {0} not found")]
    PropertyNotFound(Uuid),
    #[error("unexpected group status {0:?} in store")]
    InvalidStatus(String),
}

/// Read/delete access to the listing feature's `properties` table.
///
/// Everything except `delete_property` is read-only; deletion happens only
/// inside a merge, after the fingerprint row is committed.
#[async_trait]
pub trait PropertyCatalog: Send + Sync {
    async fn properties_for_owner(&self, owner_id: Uuid)
        -> Result<Vec<PropertyRecord>, StoreError>;
    async fn property(&self, id: Uuid) -> Result<Option<PropertyRecord>, StoreError>;
    async fn delete_property(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Group, fingerprint, and audit persistence owned by the duplicate core.
#[async_trait]
pub trait DuplicateStore: Send + Sync {
    async fn create_group(
        &self,
        group: &DuplicateGroup,
        members: &[DuplicateGroupMember],
    ) -> Result<(), StoreError>;
    async fn group(&self, id: Uuid) -> Result<Option<DuplicateGroup>, StoreError>;
    async fn group_members(&self, group_id: Uuid)
        -> Result<Vec<DuplicateGroupMember>, StoreError>;
    /// Pending groups ordered by confidence descending.
    async fn list_pending(&self) -> Result<Vec<DuplicateGroup>, StoreError>;
    /// Marks a pending group merged. Refuses rows that are missing or
    /// already terminal, so a resolved group is never reopened or rewritten.
    async fn mark_merged(
        &self,
        group_id: Uuid,
        reviewer_id: Uuid,
        merged_into: Uuid,
    ) -> Result<(), StoreError>;
    async fn mark_dismissed(
        &self,
        group_id: Uuid,
        reviewer_id: Uuid,
        notes: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn record_fingerprint(&self, row: &MergedPropertyFingerprint)
        -> Result<(), StoreError>;
    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool, StoreError>;
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}

/// Opaque deterministic hash over the salient property fields.
#[async_trait]
pub trait FingerprintHasher: Send + Sync {
    async fn fingerprint(&self, fields: &FingerprintFields) -> Result<String, StoreError>;
}

/// Postgres-backed store. One struct implements all three seams; the
/// fingerprint hash delegates to the store's `generate_property_fingerprint`
/// routine so library and bulk-import SQL mint identical strings.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        debug!("applying duplicate detection migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn property_from_row(row: &PgRow) -> Result<PropertyRecord, sqlx::Error> {
    Ok(PropertyRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        street_name: row.try_get("street_name")?,
        street_number: row.try_get("street_number")?,
        city: row.try_get("city")?,
        zip_code: row.try_get("zip_code")?,
        region: row.try_get("region")?,
        country: row.try_get("country")?,
        bedrooms: row.try_get("bedrooms")?,
        bathrooms: row.try_get("bathrooms")?,
        square_meters: row.try_get("square_meters")?,
        monthly_rent: row.try_get("monthly_rent")?,
        photo_urls: row.try_get("photo_urls")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn group_from_row(row: &PgRow) -> Result<DuplicateGroup, StoreError> {
    let status_text: String = row.try_get("status").map_err(StoreError::Database)?;
    let status = GroupStatus::parse(&status_text)
        .ok_or_else(|| StoreError::InvalidStatus(status_text))?;
    Ok(DuplicateGroup {
        id: row.try_get("id").map_err(StoreError::Database)?,
        confidence: row
            .try_get("confidence_score")
            .map_err(StoreError::Database)?,
        status,
        reviewed_by: row.try_get("reviewed_by").map_err(StoreError::Database)?,
        review_notes: row.try_get("review_notes").map_err(StoreError::Database)?,
        merged_into: row
            .try_get("merged_into_property_id")
            .map_err(StoreError::Database)?,
        created_at: row.try_get("created_at").map_err(StoreError::Database)?,
        updated_at: row.try_get("updated_at").map_err(StoreError::Database)?,
    })
}

const PROPERTY_COLUMNS: &str = "id, owner_id, title, description, street_name, street_number, \
     city, zip_code, region, country, bedrooms, bathrooms, square_meters, monthly_rent, \
     photo_urls, created_at, updated_at";

#[async_trait]
impl PropertyCatalog for PgStore {
    async fn properties_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<PropertyRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties WHERE owner_id = $1 ORDER BY created_at"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(property_from_row(row)?);
        }
        Ok(out)
    }

    async fn property(&self, id: Uuid) -> Result<Option<PropertyRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(property_from_row).transpose().map_err(Into::into)
    }

    async fn delete_property(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM properties WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::PropertyNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl DuplicateStore for PgStore {
    async fn create_group(
        &self,
        group: &DuplicateGroup,
        members: &[DuplicateGroupMember],
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO global_duplicate_groups
                (id, confidence_score, status, reviewed_by, review_notes,
                 merged_into_property_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(group.id)
        .bind(group.confidence)
        .bind(group.status.as_str())
        .bind(group.reviewed_by)
        .bind(&group.review_notes)
        .bind(group.merged_into)
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await?;

        for member in members {
            sqlx::query(
                r#"
                INSERT INTO global_duplicate_properties
                    (group_id, property_id, similarity_reasons)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(member.group_id)
            .bind(member.property_id)
            .bind(&member.reasons)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn group(&self, id: Uuid) -> Result<Option<DuplicateGroup>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, confidence_score, status, reviewed_by, review_notes,
                   merged_into_property_id, created_at, updated_at
              FROM global_duplicate_groups
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(group_from_row).transpose()
    }

    async fn group_members(
        &self,
        group_id: Uuid,
    ) -> Result<Vec<DuplicateGroupMember>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT group_id, property_id, similarity_reasons
              FROM global_duplicate_properties
             WHERE group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(DuplicateGroupMember {
                group_id: row.try_get("group_id")?,
                property_id: row.try_get("property_id")?,
                reasons: row.try_get("similarity_reasons")?,
            });
        }
        Ok(out)
    }

    async fn list_pending(&self) -> Result<Vec<DuplicateGroup>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, confidence_score, status, reviewed_by, review_notes,
                   merged_into_property_id, created_at, updated_at
              FROM global_duplicate_groups
             WHERE status = 'pending'
             ORDER BY confidence_score DESC, created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(group_from_row).collect()
    }

    async fn mark_merged(
        &self,
        group_id: Uuid,
        reviewer_id: Uuid,
        merged_into: Uuid,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE global_duplicate_groups
               SET status = 'merged',
                   reviewed_by = $2,
                   merged_into_property_id = $3,
                   updated_at = NOW()
             WHERE id = $1
               AND status = 'pending'
            "#,
        )
        .bind(group_id)
        .bind(reviewer_id)
        .bind(merged_into)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::GroupNotFound(group_id));
        }
        Ok(())
    }

    async fn mark_dismissed(
        &self,
        group_id: Uuid,
        reviewer_id: Uuid,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE global_duplicate_groups
               SET status = 'dismissed',
                   reviewed_by = $2,
                   review_notes = $3,
                   updated_at = NOW()
             WHERE id = $1
               AND status = 'pending'
            "#,
        )
        .bind(group_id)
        .bind(reviewer_id)
        .bind(notes)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::GroupNotFound(group_id));
        }
        Ok(())
    }

    async fn record_fingerprint(
        &self,
        row: &MergedPropertyFingerprint,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO merged_properties_tracking
                (fingerprint, property_snapshot, merged_into_property_id,
                 merged_by, merge_reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&row.fingerprint)
        .bind(sqlx::types::Json(&row.property_snapshot))
        .bind(row.merged_into)
        .bind(row.merged_by)
        .bind(&row.merge_reason)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM merged_properties_tracking WHERE fingerprint = $1)",
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO duplicate_detection_log
                (action, group_id, operator_id, affected_property_ids, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.action.as_str())
        .bind(entry.group_id)
        .bind(entry.operator_id)
        .bind(&entry.affected_property_ids)
        .bind(sqlx::types::Json(&entry.details))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FingerprintHasher for PgStore {
    async fn fingerprint(&self, fields: &FingerprintFields) -> Result<String, StoreError> {
        let fingerprint: String = sqlx::query_scalar(
            "SELECT generate_property_fingerprint($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&fields.title)
        .bind(&fields.street_name)
        .bind(fields.street_number.as_deref())
        .bind(&fields.zip_code)
        .bind(&fields.city)
        .bind(fields.monthly_rent)
        .bind(fields.bedrooms)
        .bind(fields.square_meters)
        .fetch_one(&self.pool)
        .await?;
        Ok(fingerprint)
    }
}

/// In-memory store for tests and for callers staging scans without a
/// database. Interior mutability behind one mutex; no lock is held across an
/// await point.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    properties: HashMap<Uuid, PropertyRecord>,
    groups: HashMap<Uuid, DuplicateGroup>,
    members: Vec<DuplicateGroupMember>,
    fingerprints: Vec<MergedPropertyFingerprint>,
    audit: Vec<AuditEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_property(&self, property: PropertyRecord) {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        inner.properties.insert(property.id, property);
    }

    pub fn property_count(&self) -> usize {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .properties
            .len()
    }

    pub fn contains_property(&self, id: Uuid) -> bool {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .properties
            .contains_key(&id)
    }

    pub fn fingerprints(&self) -> Vec<MergedPropertyFingerprint> {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .fingerprints
            .clone()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .audit
            .clone()
    }

    pub fn group_count(&self) -> usize {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .groups
            .len()
    }
}

#[async_trait]
impl PropertyCatalog for MemoryStore {
    async fn properties_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<PropertyRecord>, StoreError> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        let mut out: Vec<_> = inner
            .properties
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| (p.created_at, p.id));
        Ok(out)
    }

    async fn property(&self, id: Uuid) -> Result<Option<PropertyRecord>, StoreError> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        Ok(inner.properties.get(&id).cloned())
    }

    async fn delete_property(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        inner
            .properties
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::PropertyNotFound(id))
    }
}

#[async_trait]
impl DuplicateStore for MemoryStore {
    async fn create_group(
        &self,
        group: &DuplicateGroup,
        members: &[DuplicateGroupMember],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        inner.groups.insert(group.id, group.clone());
        inner.members.extend_from_slice(members);
        Ok(())
    }

    async fn group(&self, id: Uuid) -> Result<Option<DuplicateGroup>, StoreError> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        Ok(inner.groups.get(&id).cloned())
    }

    async fn group_members(
        &self,
        group_id: Uuid,
    ) -> Result<Vec<DuplicateGroupMember>, StoreError> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        Ok(inner
            .members
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<DuplicateGroup>, StoreError> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        let mut out: Vec<_> = inner
            .groups
            .values()
            .filter(|g| g.status == GroupStatus::Pending)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }

    async fn mark_merged(
        &self,
        group_id: Uuid,
        reviewer_id: Uuid,
        merged_into: Uuid,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        let group = inner
            .groups
            .get_mut(&group_id)
            .filter(|g| g.status == GroupStatus::Pending)
            .ok_or(StoreError::GroupNotFound(group_id))?;
        group.status = GroupStatus::Merged;
        group.reviewed_by = Some(reviewer_id);
        group.merged_into = Some(merged_into);
        group.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_dismissed(
        &self,
        group_id: Uuid,
        reviewer_id: Uuid,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        let group = inner
            .groups
            .get_mut(&group_id)
            .filter(|g| g.status == GroupStatus::Pending)
            .ok_or(StoreError::GroupNotFound(group_id))?;
        group.status = GroupStatus::Dismissed;
        group.reviewed_by = Some(reviewer_id);
        group.review_notes = notes.map(str::to_string);
        group.updated_at = Utc::now();
        Ok(())
    }

    async fn record_fingerprint(
        &self,
        row: &MergedPropertyFingerprint,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        inner.fingerprints.push(row.clone());
        Ok(())
    }

    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        Ok(inner.fingerprints.iter().any(|f| f.fingerprint == fingerprint))
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        inner.audit.push(entry.clone());
        Ok(())
    }
}

/// Deterministic stand-in for the store's fingerprint routine.
///
/// Hashes the contract fields in contract order with trimmed, case-folded
/// strings and fixed two-decimal numeric formatting, so equal salient
/// content always yields an equal string. It does not need to match the SQL
/// routine byte-for-byte: the re-import guard only ever compares
/// fingerprints minted by the same hasher.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256FingerprintHasher;

impl Sha256FingerprintHasher {
    fn hash(fields: &FingerprintFields) -> String {
        fn push(hasher: &mut Sha256, part: &str) {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }

        fn fmt_number(value: Option<f64>) -> String {
            value.map(|v| format!("{v:.2}")).unwrap_or_default()
        }

        let mut hasher = Sha256::new();
        push(&mut hasher, &fields.title.trim().to_lowercase());
        push(&mut hasher, &fields.street_name.trim().to_lowercase());
        push(
            &mut hasher,
            &fields
                .street_number
                .as_deref()
                .unwrap_or("")
                .trim()
                .to_lowercase(),
        );
        push(&mut hasher, &fields.zip_code.trim().to_lowercase());
        push(&mut hasher, &fields.city.trim().to_lowercase());
        push(&mut hasher, &fmt_number(fields.monthly_rent));
        push(&mut hasher, &fields.bedrooms.to_string());
        push(&mut hasher, &fmt_number(fields.square_meters));
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl FingerprintHasher for Sha256FingerprintHasher {
    async fn fingerprint(&self, fields: &FingerprintFields) -> Result<String, StoreError> {
        Ok(Self::hash(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn mk_property(owner_id: Uuid, title: &str) -> PropertyRecord {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).single().unwrap();
        PropertyRecord {
            id: Uuid::new_v4(),
            owner_id,
            title: title.to_string(),
            description: String::new(),
            street_name: "Torstrasse".into(),
            street_number: Some("12".into()),
            city: "Berlin".into(),
            zip_code: "10119".into(),
            region: None,
            country: Some("DE".into()),
            bedrooms: 2,
            bathrooms: 1,
            square_meters: Some(70.0),
            monthly_rent: Some(1400.0),
            photo_urls: vec![],
            created_at: at,
            updated_at: at,
        }
    }

    fn mk_group(confidence: f64, created_offset_mins: i64) -> DuplicateGroup {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).single().unwrap()
            + Duration::minutes(created_offset_mins);
        DuplicateGroup {
            id: Uuid::new_v4(),
            confidence,
            status: GroupStatus::Pending,
            reviewed_by: None,
            review_notes: None,
            merged_into: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn memory_catalog_scopes_by_owner() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        store.insert_property(mk_property(owner, "A"));
        store.insert_property(mk_property(owner, "B"));
        store.insert_property(mk_property(other, "C"));

        let mine = store.properties_for_owner(owner).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|p| p.owner_id == owner));
    }

    #[tokio::test]
    async fn deleting_a_missing_property_is_an_error() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let err = store.delete_property(id).await.unwrap_err();
        assert!(matches!(err, StoreError::PropertyNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn pending_groups_come_back_confidence_descending() {
        let store = MemoryStore::new();
        for (confidence, offset) in [(86.5, 0), (99.0, 1), (91.25, 2)] {
            store
                .create_group(&mk_group(confidence, offset), &[])
                .await
                .unwrap();
        }

        let pending = store.list_pending().await.unwrap();
        let confidences: Vec<f64> = pending.iter().map(|g| g.confidence).collect();
        assert_eq!(confidences, vec![99.0, 91.25, 86.5]);
    }

    #[tokio::test]
    async fn terminal_groups_cannot_be_marked_again() {
        let store = MemoryStore::new();
        let group = mk_group(90.0, 0);
        store.create_group(&group, &[]).await.unwrap();

        let reviewer = Uuid::new_v4();
        store
            .mark_dismissed(group.id, reviewer, Some("same building, different unit"))
            .await
            .unwrap();

        let err = store
            .mark_merged(group.id, reviewer, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::GroupNotFound(id) if id == group.id));

        let stored = store.group(group.id).await.unwrap().unwrap();
        assert_eq!(stored.status, GroupStatus::Dismissed);
        assert_eq!(
            stored.review_notes.as_deref(),
            Some("same building, different unit")
        );
    }

    #[tokio::test]
    async fn sha256_hasher_is_deterministic_and_field_sensitive() {
        let hasher = Sha256FingerprintHasher;
        let property = mk_property(Uuid::new_v4(), "Altbau in Mitte");
        let fields = FingerprintFields::from_property(&property);

        let first = hasher.fingerprint(&fields).await.unwrap();
        let second = hasher.fingerprint(&fields).await.unwrap();
        assert_eq!(first, second);

        // Case and padding do not change the hash; content does.
        let mut folded = fields.clone();
        folded.title = format!("  {}  ", fields.title.to_uppercase());
        assert_eq!(hasher.fingerprint(&folded).await.unwrap(), first);

        let mut changed = fields.clone();
        changed.monthly_rent = Some(1401.0);
        assert_ne!(hasher.fingerprint(&changed).await.unwrap(), first);
    }

    #[tokio::test]
    async fn fingerprint_rows_are_append_only_and_probeable() {
        let store = MemoryStore::new();
        let property = mk_property(Uuid::new_v4(), "Altbau in Mitte");
        let fingerprint = Sha256FingerprintHasher::hash(&FingerprintFields::from_property(
            &property,
        ));

        assert!(!store.fingerprint_exists(&fingerprint).await.unwrap());
        store
            .record_fingerprint(&MergedPropertyFingerprint {
                fingerprint: fingerprint.clone(),
                property_snapshot: property,
                merged_into: Uuid::new_v4(),
                merged_by: Uuid::new_v4(),
                merge_reason: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(store.fingerprint_exists(&fingerprint).await.unwrap());
    }
}
