//! `CampaignStore` trait: the single async interface for campaign persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::campaigns::model::{
    Campaign, CampaignFilter, CampaignPage, CampaignPlan, CampaignStatus, CampaignSummary,
    DispatchGate, DueTouch, Enrollment, TouchDelivery, TouchOutcome, TouchStats,
};
use crate::error::DatabaseError;

/// A persisted inbound message and what it matched.
#[derive(Debug, Clone, Serialize)]
pub struct InboundReplyRecord {
    pub id: Uuid,
    pub from_phone: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub campaign_id: Option<Uuid>,
    pub enrollment_id: Option<Uuid>,
    /// `suppressed`, `already_suppressed`, `unmatched` or `invalid_phone`.
    pub outcome: String,
}

/// Backend-agnostic campaign store.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Campaigns ───────────────────────────────────────────────────

    /// Insert a campaign with its enrollments and deliveries atomically.
    async fn insert_campaign_plan(&self, plan: &CampaignPlan) -> Result<(), DatabaseError>;

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError>;

    /// Filtered, paginated listing, most recent activity first.
    async fn list_campaigns(&self, filter: &CampaignFilter) -> Result<CampaignPage, DatabaseError>;

    async fn campaign_summary(&self) -> Result<CampaignSummary, DatabaseError>;

    /// Move a campaign to `to` only if its current status is one of `from`.
    /// Returns false when no row matched.
    async fn transition_campaign(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Mark an active campaign completed if it has no pending deliveries left.
    async fn complete_if_exhausted(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError>;

    // ── Enrollments & deliveries ────────────────────────────────────

    async fn list_enrollments(&self, campaign_id: Uuid) -> Result<Vec<Enrollment>, DatabaseError>;

    /// All delivery rows of a campaign, ordered by enrollment, touch and attempt.
    async fn list_deliveries(&self, campaign_id: Uuid) -> Result<Vec<TouchDelivery>, DatabaseError>;

    /// Active campaigns with at least one pending delivery due at `now`.
    async fn due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, DatabaseError>;

    /// Pending deliveries of an active campaign due at `now`, oldest first.
    async fn due_deliveries(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueTouch>, DatabaseError>;

    /// Current campaign status, suppression flag and delivery state.
    async fn dispatch_gate(&self, delivery_id: Uuid) -> Result<Option<DispatchGate>, DatabaseError>;

    /// Record a terminal outcome if the delivery is still pending, updating the
    /// campaign counters in the same transaction. Returns false if the delivery
    /// had already left `pending`.
    async fn complete_delivery(
        &self,
        delivery_id: Uuid,
        outcome: &TouchOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Queue a new attempt for every failed delivery that is the latest
    /// attempt of its touch and whose enrollment is not suppressed.
    /// Returns the number of attempts queued.
    async fn requeue_failed(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<usize, DatabaseError>;

    async fn touch_stats(&self, campaign_id: Uuid) -> Result<Vec<TouchStats>, DatabaseError>;

    async fn next_scheduled(&self, campaign_id: Uuid) -> Result<Option<DateTime<Utc>>, DatabaseError>;

    // ── Replies ─────────────────────────────────────────────────────

    /// Enrollments for a canonical phone in non-deleted campaigns, newest first.
    async fn enrollments_for_phone(
        &self,
        phone: &str,
        campaign_id: Option<Uuid>,
    ) -> Result<Vec<Enrollment>, DatabaseError>;

    /// Set `suppressed` if not already set, bumping the campaign's reply count.
    /// Returns false if the enrollment was already suppressed.
    async fn suppress_enrollment(&self, enrollment_id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError>;

    async fn record_inbound(&self, reply: &InboundReplyRecord) -> Result<(), DatabaseError>;

    async fn inbound_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<InboundReplyRecord>, DatabaseError>;
}
