//! Review pipeline: scan orchestration, group persistence, merge/dismiss,
//! and the fingerprint-based re-import guard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use dupscan_core::{
    AuditAction, AuditEntry, DuplicateGroup, DuplicateGroupMember, DuplicateMatch,
    FingerprintFields, GroupStatus, MergedPropertyFingerprint, PropertyRecord,
};
use dupscan_match::{scan_properties, SimilarityScorer};
use dupscan_store::{DuplicateStore, FingerprintHasher, PropertyCatalog, StoreError};

pub const CRATE_NAME: &str = "dupscan-review";

/// Caller identity for review actions. Merge and dismiss refuse to proceed
/// without an operator, before any mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthContext {
    Anonymous,
    Operator(Uuid),
}

impl AuthContext {
    fn require_operator(&self) -> Result<Uuid, WorkflowError> {
        match self {
            AuthContext::Operator(id) => Ok(*id),
            AuthContext::Anonymous => Err(WorkflowError::Unauthenticated),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no authenticated operator")]
    Unauthenticated,
    #[error("duplicate group {0} not found")]
    GroupNotFound(Uuid),
    #[error("group {group_id} already {status}")]
    GroupAlreadyResolved {
        group_id: Uuid,
        status: GroupStatus,
    },
    #[error("merge requires at least two member properties")]
    TooFewMembers,
    #[error("target property {0} is not among the given members")]
    TargetNotMember(Uuid),
    #[error("property {0} is not a member of the group")]
    MemberNotInGroup(Uuid),
    #[error("property {0} no longer exists")]
    PropertyMissing(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one owner-scoped scan run.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub run_id: Uuid,
    pub owner_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub properties_scanned: usize,
    pub pairs_compared: usize,
    pub matches_found: usize,
    pub groups_created: usize,
}

/// A pending group with nested property details for the review UI.
#[derive(Debug, Clone)]
pub struct PendingGroupView {
    pub group: DuplicateGroup,
    pub members: Vec<PendingMemberView>,
}

#[derive(Debug, Clone)]
pub struct PendingMemberView {
    pub property: PropertyRecord,
    pub reasons: Vec<String>,
}

/// Orchestrates scoring, group persistence, and the review workflow against
/// injected store seams.
pub struct ReviewPipeline {
    catalog: Arc<dyn PropertyCatalog>,
    store: Arc<dyn DuplicateStore>,
    hasher: Arc<dyn FingerprintHasher>,
    scorer: SimilarityScorer,
}

impl ReviewPipeline {
    pub fn new(
        catalog: Arc<dyn PropertyCatalog>,
        store: Arc<dyn DuplicateStore>,
        hasher: Arc<dyn FingerprintHasher>,
    ) -> Self {
        Self {
            catalog,
            store,
            hasher,
            scorer: SimilarityScorer::default(),
        }
    }

    pub fn with_scorer(mut self, scorer: SimilarityScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Scan one owner's portfolio and persist every qualifying pair as a
    /// pending group. A fetch failure aborts before anything is written.
    pub async fn scan_owner(&self, owner_id: Uuid) -> Result<ScanSummary, WorkflowError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let properties = self.catalog.properties_for_owner(owner_id).await?;
        let matches = scan_properties(&self.scorer, &properties);
        let groups_created = self.persist_matches(&matches).await?;

        let summary = ScanSummary {
            run_id,
            owner_id,
            started_at,
            finished_at: Utc::now(),
            properties_scanned: properties.len(),
            pairs_compared: properties.len() * properties.len().saturating_sub(1) / 2,
            matches_found: matches.len(),
            groups_created,
        };
        info!(
            %run_id,
            %owner_id,
            properties = summary.properties_scanned,
            matches = summary.matches_found,
            "duplicate scan finished"
        );
        Ok(summary)
    }

    /// One pending group plus member rows per match. Not transactional
    /// across matches: a failure partway through leaves earlier groups
    /// committed, and re-running the scan recreates the rest.
    pub async fn persist_matches(
        &self,
        matches: &[DuplicateMatch],
    ) -> Result<usize, WorkflowError> {
        let mut created = 0;
        for candidate in matches {
            let now = Utc::now();
            let group = DuplicateGroup {
                id: Uuid::new_v4(),
                confidence: candidate.confidence,
                status: GroupStatus::Pending,
                reviewed_by: None,
                review_notes: None,
                merged_into: None,
                created_at: now,
                updated_at: now,
            };
            let members = [candidate.property_id_a, candidate.property_id_b]
                .map(|property_id| DuplicateGroupMember {
                    group_id: group.id,
                    property_id,
                    reasons: candidate.reasons.clone(),
                });
            self.store.create_group(&group, &members).await?;
            created += 1;
        }
        Ok(created)
    }

    /// Pending groups with nested property details, confidence descending.
    /// Members whose property row has since disappeared are omitted.
    pub async fn list_pending(&self) -> Result<Vec<PendingGroupView>, WorkflowError> {
        let groups = self.store.list_pending().await?;
        let mut views = Vec::with_capacity(groups.len());
        for group in groups {
            let members = self.store.group_members(group.id).await?;
            let mut member_views = Vec::with_capacity(members.len());
            for member in members {
                if let Some(property) = self.catalog.property(member.property_id).await? {
                    member_views.push(PendingMemberView {
                        property,
                        reasons: member.reasons,
                    });
                }
            }
            views.push(PendingGroupView {
                group,
                members: member_views,
            });
        }
        Ok(views)
    }

    /// Merge a group into `target_property_id`.
    ///
    /// For every other member, in order: fingerprint, persist the tracking
    /// row, delete the property. Only then is the group marked merged and
    /// the audit entry appended, so no property is destroyed without a
    /// recoverable fingerprint trail and the group turns terminal only after
    /// the underlying mutation succeeded.
    pub async fn merge(
        &self,
        auth: &AuthContext,
        group_id: Uuid,
        target_property_id: Uuid,
        member_property_ids: &[Uuid],
        reason: Option<&str>,
    ) -> Result<(), WorkflowError> {
        let operator_id = auth.require_operator()?;
        let group = self.pending_group(group_id).await?;

        if member_property_ids.len() < 2 {
            return Err(WorkflowError::TooFewMembers);
        }
        if !member_property_ids.contains(&target_property_id) {
            return Err(WorkflowError::TargetNotMember(target_property_id));
        }
        let stored_members = self.store.group_members(group.id).await?;
        for id in member_property_ids {
            if !stored_members.iter().any(|m| m.property_id == *id) {
                return Err(WorkflowError::MemberNotInGroup(*id));
            }
        }

        let mut affected = Vec::new();
        for &property_id in member_property_ids {
            if property_id == target_property_id {
                continue;
            }
            let property = self
                .catalog
                .property(property_id)
                .await?
                .ok_or(WorkflowError::PropertyMissing(property_id))?;
            let fingerprint = self
                .hasher
                .fingerprint(&FingerprintFields::from_property(&property))
                .await?;
            self.store
                .record_fingerprint(&MergedPropertyFingerprint {
                    fingerprint,
                    property_snapshot: property,
                    merged_into: target_property_id,
                    merged_by: operator_id,
                    merge_reason: reason.map(str::to_string),
                    created_at: Utc::now(),
                })
                .await?;
            self.catalog.delete_property(property_id).await?;
            affected.push(property_id);
        }

        self.store
            .mark_merged(group_id, operator_id, target_property_id)
            .await?;
        self.append_audit(
            AuditAction::Merge,
            group_id,
            operator_id,
            affected.clone(),
            json!({ "target_property_id": target_property_id, "reason": reason }),
        )
        .await;
        info!(
            %group_id,
            %operator_id,
            target = %target_property_id,
            removed = affected.len(),
            "duplicate group merged"
        );
        Ok(())
    }

    /// Dismiss a group as a false positive. Never touches property rows.
    pub async fn dismiss(
        &self,
        auth: &AuthContext,
        group_id: Uuid,
        notes: Option<&str>,
    ) -> Result<(), WorkflowError> {
        let operator_id = auth.require_operator()?;
        let group = self.pending_group(group_id).await?;

        self.store
            .mark_dismissed(group.id, operator_id, notes)
            .await?;
        self.append_audit(
            AuditAction::Dismiss,
            group_id,
            operator_id,
            Vec::new(),
            json!({ "notes": notes }),
        )
        .await;
        info!(%group_id, %operator_id, "duplicate group dismissed");
        Ok(())
    }

    /// Re-import guard: does this candidate's fingerprint match a property
    /// that was previously merged away? Content-based, so a false negative
    /// is possible when salient fields changed since the merge.
    pub async fn is_previously_merged(
        &self,
        candidate: &PropertyRecord,
    ) -> Result<bool, WorkflowError> {
        let fingerprint = self
            .hasher
            .fingerprint(&FingerprintFields::from_property(candidate))
            .await?;
        Ok(self.store.fingerprint_exists(&fingerprint).await?)
    }

    async fn pending_group(&self, group_id: Uuid) -> Result<DuplicateGroup, WorkflowError> {
        let group = self
            .store
            .group(group_id)
            .await?
            .ok_or(WorkflowError::GroupNotFound(group_id))?;
        if group.status.is_terminal() {
            return Err(WorkflowError::GroupAlreadyResolved {
                group_id,
                status: group.status,
            });
        }
        Ok(group)
    }

    /// Audit writes are advisory: a failure is logged and never rolls back
    /// the primary mutation.
    async fn append_audit(
        &self,
        action: AuditAction,
        group_id: Uuid,
        operator_id: Uuid,
        affected_property_ids: Vec<Uuid>,
        details: serde_json::Value,
    ) {
        let entry = AuditEntry {
            action,
            group_id,
            operator_id,
            affected_property_ids,
            details,
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.append_audit(&entry).await {
            warn!(%group_id, action = action.as_str(), error = %err, "audit log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dupscan_store::{MemoryStore, Sha256FingerprintHasher};

    fn mk_property(owner_id: Uuid, title: &str, rent: f64) -> PropertyRecord {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).single().unwrap();
        PropertyRecord {
            id: Uuid::new_v4(),
            owner_id,
            title: title.to_string(),
            description: "Helle Wohnung mit Balkon im dritten Stock".into(),
            street_name: "Alexanderplatz".into(),
            street_number: None,
            city: "Berlin".into(),
            zip_code: "10178".into(),
            region: None,
            country: Some("DE".into()),
            bedrooms: 2,
            bathrooms: 1,
            square_meters: Some(75.0),
            monthly_rent: Some(rent),
            photo_urls: vec!["https://img.example/1.jpg".into()],
            created_at: at,
            updated_at: at,
        }
    }

    fn pipeline(store: &Arc<MemoryStore>) -> ReviewPipeline {
        ReviewPipeline::new(
            store.clone(),
            store.clone(),
            Arc::new(Sha256FingerprintHasher),
        )
    }

    fn seed_duplicate_pair(store: &Arc<MemoryStore>, owner_id: Uuid) -> (Uuid, Uuid) {
        let a = mk_property(owner_id, "Wohnung am Alexanderplatz", 1200.0);
        let b = mk_property(owner_id, "Wohnung am Alexanderplatz", 1250.0);
        let (id_a, id_b) = (a.id, b.id);
        store.insert_property(a);
        store.insert_property(b);
        (id_a, id_b)
    }

    #[tokio::test]
    async fn scan_persists_pending_groups_with_two_members() {
        let store = Arc::new(MemoryStore::new());
        let owner_id = Uuid::new_v4();
        let (id_a, id_b) = seed_duplicate_pair(&store, owner_id);
        store.insert_property(mk_property(Uuid::new_v4(), "Anderes Portfolio", 1200.0));

        let pipeline = pipeline(&store);
        let summary = pipeline.scan_owner(owner_id).await.unwrap();
        assert_eq!(summary.properties_scanned, 2);
        assert_eq!(summary.pairs_compared, 1);
        assert_eq!(summary.matches_found, 1);
        assert_eq!(summary.groups_created, 1);

        let pending = pipeline.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        let view = &pending[0];
        assert_eq!(view.group.status, GroupStatus::Pending);
        assert_eq!(view.members.len(), 2);
        let member_ids: Vec<Uuid> = view.members.iter().map(|m| m.property.id).collect();
        assert!(member_ids.contains(&id_a));
        assert!(member_ids.contains(&id_b));
        assert!(view
            .members
            .iter()
            .all(|m| m.reasons.iter().any(|r| r.contains("street name"))));
    }

    #[tokio::test]
    async fn rescanning_an_unchanged_portfolio_duplicates_groups_identically() {
        let store = Arc::new(MemoryStore::new());
        let owner_id = Uuid::new_v4();
        seed_duplicate_pair(&store, owner_id);

        let pipeline = pipeline(&store);
        pipeline.scan_owner(owner_id).await.unwrap();
        pipeline.scan_owner(owner_id).await.unwrap();

        let pending = pipeline.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_ne!(pending[0].group.id, pending[1].group.id);
        assert_eq!(pending[0].group.confidence, pending[1].group.confidence);
    }

    #[tokio::test]
    async fn merge_fingerprints_then_deletes_then_marks_then_logs() {
        let store = Arc::new(MemoryStore::new());
        let owner_id = Uuid::new_v4();
        let (id_a, id_b) = seed_duplicate_pair(&store, owner_id);

        let pipeline = pipeline(&store);
        pipeline.scan_owner(owner_id).await.unwrap();
        let group_id = pipeline.list_pending().await.unwrap()[0].group.id;

        let operator = Uuid::new_v4();
        let removed_snapshot = store.property(id_b).await.unwrap().unwrap();
        pipeline
            .merge(
                &AuthContext::Operator(operator),
                group_id,
                id_a,
                &[id_a, id_b],
                Some("same unit listed twice"),
            )
            .await
            .unwrap();

        // Exactly the target survives; one fingerprint row per deleted member.
        assert!(store.contains_property(id_a));
        assert!(!store.contains_property(id_b));
        let fingerprints = store.fingerprints();
        assert_eq!(fingerprints.len(), 1);
        assert_eq!(fingerprints[0].merged_into, id_a);
        assert_eq!(fingerprints[0].merged_by, operator);
        assert_eq!(fingerprints[0].property_snapshot.id, id_b);
        assert_eq!(
            fingerprints[0].merge_reason.as_deref(),
            Some("same unit listed twice")
        );

        let group = store.group(group_id).await.unwrap().unwrap();
        assert_eq!(group.status, GroupStatus::Merged);
        assert_eq!(group.reviewed_by, Some(operator));
        assert_eq!(group.merged_into, Some(id_a));

        let audit = store.audit_entries();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Merge);
        assert_eq!(audit[0].group_id, group_id);
        assert_eq!(audit[0].operator_id, operator);
        assert_eq!(audit[0].affected_property_ids, vec![id_b]);

        // Round trip: a later re-import of the removed member is recognized.
        assert!(pipeline.is_previously_merged(&removed_snapshot).await.unwrap());
        let survivor = store.property(id_a).await.unwrap().unwrap();
        assert!(!pipeline.is_previously_merged(&survivor).await.unwrap());
    }

    #[tokio::test]
    async fn dismiss_never_deletes_properties() {
        let store = Arc::new(MemoryStore::new());
        let owner_id = Uuid::new_v4();
        seed_duplicate_pair(&store, owner_id);

        let pipeline = pipeline(&store);
        pipeline.scan_owner(owner_id).await.unwrap();
        let group_id = pipeline.list_pending().await.unwrap()[0].group.id;

        let operator = Uuid::new_v4();
        pipeline
            .dismiss(
                &AuthContext::Operator(operator),
                group_id,
                Some("same building, different unit"),
            )
            .await
            .unwrap();

        assert_eq!(store.property_count(), 2);
        assert!(store.fingerprints().is_empty());
        let group = store.group(group_id).await.unwrap().unwrap();
        assert_eq!(group.status, GroupStatus::Dismissed);
        assert_eq!(
            group.review_notes.as_deref(),
            Some("same building, different unit")
        );

        let audit = store.audit_entries();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Dismiss);
        assert!(audit[0].affected_property_ids.is_empty());
    }

    #[tokio::test]
    async fn anonymous_callers_cannot_mutate_anything() {
        let store = Arc::new(MemoryStore::new());
        let owner_id = Uuid::new_v4();
        let (id_a, id_b) = seed_duplicate_pair(&store, owner_id);

        let pipeline = pipeline(&store);
        pipeline.scan_owner(owner_id).await.unwrap();
        let group_id = pipeline.list_pending().await.unwrap()[0].group.id;

        let err = pipeline
            .merge(&AuthContext::Anonymous, group_id, id_a, &[id_a, id_b], None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthenticated));

        let err = pipeline
            .dismiss(&AuthContext::Anonymous, group_id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthenticated));

        // Raised before any mutation.
        assert_eq!(store.property_count(), 2);
        assert!(store.fingerprints().is_empty());
        assert!(store.audit_entries().is_empty());
        let group = store.group(group_id).await.unwrap().unwrap();
        assert_eq!(group.status, GroupStatus::Pending);
    }

    #[tokio::test]
    async fn resolved_groups_are_terminal() {
        let store = Arc::new(MemoryStore::new());
        let owner_id = Uuid::new_v4();
        let (id_a, id_b) = seed_duplicate_pair(&store, owner_id);

        let pipeline = pipeline(&store);
        pipeline.scan_owner(owner_id).await.unwrap();
        let group_id = pipeline.list_pending().await.unwrap()[0].group.id;

        let operator = AuthContext::Operator(Uuid::new_v4());
        pipeline.dismiss(&operator, group_id, None).await.unwrap();

        let err = pipeline
            .merge(&operator, group_id, id_a, &[id_a, id_b], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::GroupAlreadyResolved {
                status: GroupStatus::Dismissed,
                ..
            }
        ));
        assert!(pipeline.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_validates_target_and_membership() {
        let store = Arc::new(MemoryStore::new());
        let owner_id = Uuid::new_v4();
        let (id_a, id_b) = seed_duplicate_pair(&store, owner_id);
        let outsider = mk_property(owner_id, "Reihenhaus im Grünen", 2100.0);
        let outsider_id = outsider.id;
        store.insert_property(outsider);

        let pipeline = pipeline(&store);
        pipeline.scan_owner(owner_id).await.unwrap();
        let group_id = pipeline
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .find(|v| v.members.iter().any(|m| m.property.id == id_a))
            .unwrap()
            .group
            .id;
        let operator = AuthContext::Operator(Uuid::new_v4());

        let err = pipeline
            .merge(&operator, group_id, id_a, &[id_a], None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::TooFewMembers));

        let err = pipeline
            .merge(&operator, group_id, outsider_id, &[id_a, id_b], None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::TargetNotMember(id) if id == outsider_id));

        let err = pipeline
            .merge(&operator, group_id, id_a, &[id_a, outsider_id], None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MemberNotInGroup(id) if id == outsider_id));

        // Nothing was fingerprinted or deleted along the way.
        assert_eq!(store.property_count(), 3);
        assert!(store.fingerprints().is_empty());
    }

    #[tokio::test]
    async fn missing_group_is_reported_as_such() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(&store);
        let ghost = Uuid::new_v4();
        let err = pipeline
            .dismiss(&AuthContext::Operator(Uuid::new_v4()), ghost, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::GroupNotFound(id) if id == ghost));
    }

    #[tokio::test]
    async fn scan_of_empty_portfolio_creates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(&store);
        let summary = pipeline.scan_owner(Uuid::new_v4()).await.unwrap();
        assert_eq!(summary.properties_scanned, 0);
        assert_eq!(summary.matches_found, 0);
        assert_eq!(store.group_count(), 0);
    }
}
