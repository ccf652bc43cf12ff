//! Campaign data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contacts::model::ContactRecord;
use crate::contacts::phone::LineKind;
use crate::store::InboundReplyRecord;

/// Default touch cadence: nine messages over two and a half weeks.
pub const DEFAULT_DAY_OFFSETS: [u32; 9] = [1, 3, 5, 7, 9, 11, 13, 15, 17];

/// Latest day a touch may be scheduled, counted from enrollment (ten years).
pub const MAX_DAY_OFFSET: u32 = 3650;

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
    Deleted,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "deleted" => Ok(CampaignStatus::Deleted),
            other => Err(format!("unknown campaign status: {other}")),
        }
    }
}

/// One step of the cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchTemplate {
    pub day_offset: u32,
    pub message: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl TouchTemplate {
    pub fn new(day_offset: u32, message: impl Into<String>) -> Self {
        Self {
            day_offset,
            message: message.into(),
            active: true,
        }
    }
}

/// The default nine-step cadence, every step sending `message`.
pub fn default_sequence(message: &str) -> Vec<TouchTemplate> {
    DEFAULT_DAY_OFFSETS
        .iter()
        .map(|&day| TouchTemplate::new(day, message))
        .collect()
}

/// Check a template list: non-empty, strictly increasing offsets no later than
/// [`MAX_DAY_OFFSET`], at least one active step with a non-blank message.
pub fn validate_templates(templates: &[TouchTemplate]) -> Result<(), String> {
    if templates.is_empty() {
        return Err("at least one touch template is required".into());
    }
    if let Some(t) = templates.iter().find(|t| t.day_offset > MAX_DAY_OFFSET) {
        return Err(format!(
            "day offset {} is beyond the {MAX_DAY_OFFSET}-day limit",
            t.day_offset
        ));
    }
    for pair in templates.windows(2) {
        if pair[1].day_offset <= pair[0].day_offset {
            return Err(format!(
                "day offsets must be strictly increasing ({} follows {})",
                pair[1].day_offset, pair[0].day_offset
            ));
        }
    }
    if !templates.iter().any(|t| t.active) {
        return Err("at least one touch template must be active".into());
    }
    if let Some(t) = templates.iter().find(|t| t.active && t.message.trim().is_empty()) {
        return Err(format!("touch on day {} has an empty message", t.day_offset));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub templates: Vec<TouchTemplate>,
    /// Set on campaigns created by `duplicate`.
    pub source_campaign_id: Option<Uuid>,
    pub total_contacts: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    pub reply_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn new(name: impl Into<String>, templates: Vec<TouchTemplate>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: CampaignStatus::Active,
            templates,
            source_campaign_id: None,
            total_contacts: 0,
            sent_count: 0,
            failed_count: 0,
            skipped_count: 0,
            reply_count: 0,
            created_at: now,
            updated_at: now,
            last_activity_at: None,
        }
    }

    /// Replies per sent message, as a percentage with one decimal.
    pub fn reply_rate(&self) -> f64 {
        percent(self.reply_count, self.sent_count)
    }
}

/// One contact in one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact: ContactRecord,
    pub line_kind: LineKind,
    /// Schedule anchor.
    pub enrolled_at: DateTime<Utc>,
    pub suppressed: bool,
    pub suppressed_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn new(campaign_id: Uuid, contact: ContactRecord, line_kind: LineKind, enrolled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            contact,
            line_kind,
            enrolled_at,
            suppressed: false,
            suppressed_at: None,
        }
    }

    pub fn phone(&self) -> &str {
        &self.contact.phone
    }
}

/// Delivery state of one touch attempt. Everything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    SkippedSuppressed,
    SkippedStale,
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
            DeliveryState::SkippedSuppressed => "skipped_suppressed",
            DeliveryState::SkippedStale => "skipped_stale",
            DeliveryState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryState::Pending)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryState::Pending),
            "sent" => Ok(DeliveryState::Sent),
            "skipped_suppressed" => Ok(DeliveryState::SkippedSuppressed),
            "skipped_stale" => Ok(DeliveryState::SkippedStale),
            "failed" => Ok(DeliveryState::Failed),
            other => Err(format!("unknown delivery state: {other}")),
        }
    }
}

/// One scheduled message attempt for one enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TouchDelivery {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub enrollment_id: Uuid,
    /// Position of the template in the campaign's list.
    pub touch_index: u32,
    /// 1 for the scheduled send; retries add attempts.
    pub attempt: u32,
    pub day_offset: u32,
    pub message_template: String,
    pub scheduled_for: DateTime<Utc>,
    pub state: DeliveryState,
    /// The text actually submitted, once rendered.
    pub rendered_body: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TouchDelivery {
    /// Materialize the pending deliveries for one enrollment: one per active
    /// template, due `enrolled_at + day_offset` days.
    pub fn schedule(enrollment: &Enrollment, templates: &[TouchTemplate]) -> Vec<TouchDelivery> {
        templates
            .iter()
            .enumerate()
            .filter(|(_, t)| t.active)
            .map(|(index, t)| TouchDelivery {
                id: Uuid::new_v4(),
                campaign_id: enrollment.campaign_id,
                enrollment_id: enrollment.id,
                touch_index: index as u32,
                attempt: 1,
                day_offset: t.day_offset,
                message_template: t.message.clone(),
                scheduled_for: enrollment.enrolled_at + Duration::days(i64::from(t.day_offset)),
                state: DeliveryState::Pending,
                rendered_body: None,
                sent_at: None,
                provider_message_id: None,
                error: None,
                updated_at: enrollment.enrolled_at,
            })
            .collect()
    }
}

/// A pending delivery that is due, with what is needed to send it.
#[derive(Debug, Clone)]
pub struct DueTouch {
    pub delivery: TouchDelivery,
    pub contact: ContactRecord,
}

/// Terminal outcome recorded for a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchOutcome {
    Sent {
        body: String,
        provider_message_id: Option<String>,
    },
    Failed {
        body: Option<String>,
        error: String,
    },
    SkippedSuppressed,
    SkippedStale,
}

impl TouchOutcome {
    pub fn state(&self) -> DeliveryState {
        match self {
            TouchOutcome::Sent { .. } => DeliveryState::Sent,
            TouchOutcome::Failed { .. } => DeliveryState::Failed,
            TouchOutcome::SkippedSuppressed => DeliveryState::SkippedSuppressed,
            TouchOutcome::SkippedStale => DeliveryState::SkippedStale,
        }
    }
}

/// Fresh view of the state a send depends on, read just before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGate {
    pub campaign_status: CampaignStatus,
    pub suppressed: bool,
    pub state: DeliveryState,
}

/// Listing query.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignFilter {
    /// `None` lists every non-deleted campaign.
    #[serde(default)]
    pub status: Option<CampaignStatus>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_page_size")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_page_size() -> usize {
    20
}

impl Default for CampaignFilter {
    fn default() -> Self {
        Self {
            status: None,
            search: None,
            limit: default_page_size(),
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignPage {
    pub campaigns: Vec<Campaign>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

/// Dashboard totals over all non-deleted campaigns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CampaignSummary {
    pub active_campaigns: u64,
    pub total_campaigns: u64,
    pub total_contacts: u64,
    pub total_messages: u64,
    pub total_replies: u64,
    pub overall_reply_rate: f64,
}

/// Per-touch delivery counts (all attempts).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TouchStats {
    pub touch_index: u32,
    pub day_offset: u32,
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignStats {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub total_contacts: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
    pub pending: u64,
    pub replies: u64,
    pub delivery_rate: f64,
    pub reply_rate: f64,
    pub next_scheduled: Option<DateTime<Utc>>,
    pub estimated_cost: Decimal,
    pub touches: Vec<TouchStats>,
}

/// Input to `create_campaign`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub templates: Vec<TouchTemplate>,
    pub contacts: Vec<ContactRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedContact {
    pub phone: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedCampaign {
    pub campaign: Campaign,
    pub enrolled: usize,
    pub rejected: Vec<RejectedContact>,
}

/// Everything a new campaign writes, inserted in one transaction.
#[derive(Debug, Clone)]
pub struct CampaignPlan {
    pub campaign: Campaign,
    pub enrollments: Vec<Enrollment>,
    pub deliveries: Vec<TouchDelivery>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentHistory {
    pub enrollment: Enrollment,
    pub deliveries: Vec<TouchDelivery>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignDetail {
    pub campaign: Campaign,
    pub stats: CampaignStats,
    pub enrollments: Vec<EnrollmentHistory>,
    pub replies: Vec<InboundReplyRecord>,
}

/// `part / whole * 100`, one decimal; 0 when `whole` is 0.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}
