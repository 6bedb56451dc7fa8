//! Core domain model for property duplicate detection and review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dupscan-core";

/// Property listing row as seen by the duplicate detector.
///
/// Owned by the listing feature; this core reads it, and deletes rows only
/// as part of a merge. Media URLs ride along with the record so review views
/// can show them without a second fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub street_name: String,
    pub street_number: Option<String>,
    pub city: String,
    pub zip_code: String,
    pub region: Option<String>,
    pub country: Option<String>,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub square_meters: Option<f64>,
    pub monthly_rent: Option<f64>,
    pub photo_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One of the four weighted similarity measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComponent {
    Address,
    Specs,
    Title,
    Description,
}

impl ScoreComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreComponent::Address => "address",
            ScoreComponent::Specs => "specs",
            ScoreComponent::Title => "title",
            ScoreComponent::Description => "description",
        }
    }
}

/// An activated sub-score, normalized to 0-100 before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComponentScore {
    pub component: ScoreComponent,
    pub score: f64,
}

/// Scorer output for one unordered property pair.
///
/// `components` holds only the sub-scores that cleared their activation
/// threshold; `total` is the weighted sum over exactly those components.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityBreakdown {
    pub total: f64,
    pub components: Vec<ComponentScore>,
    pub reasons: Vec<String>,
}

/// Candidate pair that cleared both match gates.
///
/// Transient: converted into a `DuplicateGroup` plus members before anything
/// is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    pub property_id_a: Uuid,
    pub property_id_b: Uuid,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

/// Review state of a persisted duplicate group.
///
/// `Pending` is the only non-terminal state; a resolved group is never
/// reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Pending,
    Merged,
    Dismissed,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Pending => "pending",
            GroupStatus::Merged => "merged",
            GroupStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(GroupStatus::Pending),
            "merged" => Some(GroupStatus::Merged),
            "dismissed" => Some(GroupStatus::Dismissed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GroupStatus::Pending)
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted duplicate candidate group awaiting (or past) review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: Uuid,
    pub confidence: f64,
    pub status: GroupStatus,
    pub reviewed_by: Option<Uuid>,
    pub review_notes: Option<String>,
    pub merged_into: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Link row tying a property into a group, with the reasons that put it there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroupMember {
    pub group_id: Uuid,
    pub property_id: Uuid,
    pub reasons: Vec<String>,
}

/// Ordered field tuple handed to the fingerprint routine.
///
/// The field order is part of the hash contract shared with the store's
/// `generate_property_fingerprint` routine and must not change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FingerprintFields {
    pub title: String,
    pub street_name: String,
    pub street_number: Option<String>,
    pub zip_code: String,
    pub city: String,
    pub monthly_rent: Option<f64>,
    pub bedrooms: i32,
    pub square_meters: Option<f64>,
}

impl FingerprintFields {
    pub fn from_property(property: &PropertyRecord) -> Self {
        Self {
            title: property.title.clone(),
            street_name: property.street_name.clone(),
            street_number: property.street_number.clone(),
            zip_code: property.zip_code.clone(),
            city: property.city.clone(),
            monthly_rent: property.monthly_rent,
            bedrooms: property.bedrooms,
            square_meters: property.square_meters,
        }
    }
}

/// Append-only tracking row written when a property is deleted via merge.
///
/// Never deleted: the fingerprint is what lets a later bulk import recognize
/// a previously-merged property, and the snapshot is the recovery trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedPropertyFingerprint {
    pub fingerprint: String,
    pub property_snapshot: PropertyRecord,
    pub merged_into: Uuid,
    pub merged_by: Uuid,
    pub merge_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Review action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Merge,
    Dismiss,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Merge => "merge",
            AuditAction::Dismiss => "dismiss",
        }
    }
}

/// Audit trail entry for a review action. Advisory, write-only append.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub group_id: Uuid,
    pub operator_id: Uuid,
    pub affected_property_ids: Vec<Uuid>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
