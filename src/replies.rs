//! Reply listener: turns inbound messages into enrollment suppression.
//!
//! This is the only writer of `enrollments.suppressed`. Suppression runs under
//! the same per-enrollment lock the dispatcher holds while a delivery leaves
//! `pending`, so a touch is never sent after its enrollment is suppressed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::contacts::phone::canonicalize;
use crate::dispatch::locks::EngineLocks;
use crate::error::DatabaseError;
use crate::store::{CampaignStore, InboundReplyRecord};

/// An inbound SMS as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from_phone: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
    /// Restricts matching to one campaign when the transport knows it.
    #[serde(default)]
    pub campaign_hint: Option<Uuid>,
}

impl InboundMessage {
    pub fn new(from_phone: impl Into<String>, body: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            from_phone: from_phone.into(),
            body: body.into(),
            received_at,
            campaign_hint: None,
        }
    }

    pub fn with_hint(mut self, campaign_id: Uuid) -> Self {
        self.campaign_hint = Some(campaign_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplyOutcome {
    /// This message suppressed an enrollment.
    Suppressed { campaign_id: Uuid, enrollment_id: Uuid },
    /// Every matching enrollment was already suppressed.
    AlreadySuppressed { campaign_id: Uuid },
    /// No enrollment for this number.
    Unmatched,
    /// The sender number could not be canonicalized.
    InvalidPhone,
}

impl ReplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyOutcome::Suppressed { .. } => "suppressed",
            ReplyOutcome::AlreadySuppressed { .. } => "already_suppressed",
            ReplyOutcome::Unmatched => "unmatched",
            ReplyOutcome::InvalidPhone => "invalid_phone",
        }
    }
}

pub struct ReplyListener {
    store: Arc<dyn CampaignStore>,
    locks: Arc<EngineLocks>,
}

impl ReplyListener {
    pub fn new(store: Arc<dyn CampaignStore>, locks: Arc<EngineLocks>) -> Self {
        Self { store, locks }
    }

    /// Attribute an inbound message to the most recent non-suppressed
    /// enrollment for its sender and suppress it. Every message is recorded.
    pub async fn on_inbound(&self, message: &InboundMessage) -> Result<ReplyOutcome, DatabaseError> {
        let (phone, outcome) = match canonicalize(&message.from_phone) {
            Some(phone) => {
                let outcome = self.suppress_latest(&phone, message).await?;
                (phone, outcome)
            }
            None => (message.from_phone.trim().to_string(), ReplyOutcome::InvalidPhone),
        };

        let (campaign_id, enrollment_id) = match &outcome {
            ReplyOutcome::Suppressed {
                campaign_id,
                enrollment_id,
            } => (Some(*campaign_id), Some(*enrollment_id)),
            ReplyOutcome::AlreadySuppressed { campaign_id } => (Some(*campaign_id), None),
            _ => (message.campaign_hint, None),
        };

        self.store
            .record_inbound(&InboundReplyRecord {
                id: Uuid::new_v4(),
                from_phone: phone,
                body: message.body.clone(),
                received_at: message.received_at,
                campaign_id,
                enrollment_id,
                outcome: outcome.as_str().to_string(),
            })
            .await?;

        match &outcome {
            ReplyOutcome::Suppressed {
                campaign_id,
                enrollment_id,
            } => info!(campaign_id = %campaign_id, enrollment_id = %enrollment_id, "Reply received, enrollment suppressed"),
            other => debug!(outcome = other.as_str(), "Inbound message recorded"),
        }
        Ok(outcome)
    }

    async fn suppress_latest(&self, phone: &str, message: &InboundMessage) -> Result<ReplyOutcome, DatabaseError> {
        let enrollments = self
            .store
            .enrollments_for_phone(phone, message.campaign_hint)
            .await?;
        let Some(newest) = enrollments.first() else {
            return Ok(ReplyOutcome::Unmatched);
        };
        let newest_campaign = newest.campaign_id;

        for enrollment in enrollments.iter().filter(|e| !e.suppressed) {
            let _guard = self.locks.enrollments.lock(enrollment.id).await;
            if self
                .store
                .suppress_enrollment(enrollment.id, message.received_at)
                .await?
            {
                return Ok(ReplyOutcome::Suppressed {
                    campaign_id: enrollment.campaign_id,
                    enrollment_id: enrollment.id,
                });
            }
        }

        Ok(ReplyOutcome::AlreadySuppressed {
            campaign_id: newest_campaign,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::campaigns::model::{Campaign, CampaignPlan, Enrollment, TouchDelivery, TouchTemplate};
    use crate::contacts::model::ContactRecord;
    use crate::contacts::phone::LineKind;
    use crate::store::LibSqlBackend;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
    }

    async fn enroll(store: &LibSqlBackend, phone: &str, at: DateTime<Utc>) -> (Uuid, Uuid) {
        let mut campaign = Campaign::new("Spring", vec![TouchTemplate::new(1, "Hi {name}")], at);
        campaign.total_contacts = 1;
        let enrollment = Enrollment::new(campaign.id, ContactRecord::new(phone), LineKind::Mobile, at);
        let deliveries = TouchDelivery::schedule(&enrollment, &campaign.templates);
        let ids = (campaign.id, enrollment.id);
        store
            .insert_campaign_plan(&CampaignPlan {
                campaign,
                enrollments: vec![enrollment],
                deliveries,
            })
            .await
            .unwrap();
        ids
    }

    async fn listener() -> (Arc<LibSqlBackend>, ReplyListener) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let listener = ReplyListener::new(store.clone(), Arc::new(EngineLocks::default()));
        (store, listener)
    }

    #[tokio::test]
    async fn suppresses_once_then_noop() {
        let (store, listener) = listener().await;
        let (campaign_id, enrollment_id) = enroll(&store, "+14155550100", t0()).await;

        let msg = InboundMessage::new("(415) 555-0100", "STOP", t0() + Duration::hours(2));
        assert_eq!(
            listener.on_inbound(&msg).await.unwrap(),
            ReplyOutcome::Suppressed {
                campaign_id,
                enrollment_id
            }
        );
        assert_eq!(
            listener.on_inbound(&msg).await.unwrap(),
            ReplyOutcome::AlreadySuppressed { campaign_id }
        );

        let campaign = store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.reply_count, 1);
        let enrollments = store.list_enrollments(campaign_id).await.unwrap();
        assert!(enrollments[0].suppressed);

        let audit = store.inbound_for_campaign(campaign_id).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].outcome, "suppressed");
        assert_eq!(audit[1].outcome, "already_suppressed");
        assert_eq!(audit[0].from_phone, "+14155550100");
    }

    #[tokio::test]
    async fn newest_enrollment_wins() {
        let (store, listener) = listener().await;
        let (old_campaign, _) = enroll(&store, "+14155550100", t0()).await;
        let (new_campaign, _) = enroll(&store, "+14155550100", t0() + Duration::days(2)).await;

        let msg = InboundMessage::new("+1 415 555 0100", "yes", t0() + Duration::days(3));
        let first = listener.on_inbound(&msg).await.unwrap();
        assert!(matches!(first, ReplyOutcome::Suppressed { campaign_id, .. } if campaign_id == new_campaign));

        // A second reply falls through to the older, still-active enrollment.
        let second = listener.on_inbound(&msg).await.unwrap();
        assert!(matches!(second, ReplyOutcome::Suppressed { campaign_id, .. } if campaign_id == old_campaign));
    }

    #[tokio::test]
    async fn hint_scopes_the_match() {
        let (store, listener) = listener().await;
        let (old_campaign, _) = enroll(&store, "+14155550100", t0()).await;
        enroll(&store, "+14155550100", t0() + Duration::days(2)).await;

        let msg = InboundMessage::new("4155550100", "hi", t0() + Duration::days(3)).with_hint(old_campaign);
        let outcome = listener.on_inbound(&msg).await.unwrap();
        assert!(matches!(outcome, ReplyOutcome::Suppressed { campaign_id, .. } if campaign_id == old_campaign));

        let other = InboundMessage::new("4155550100", "hi", t0()).with_hint(Uuid::new_v4());
        assert_eq!(listener.on_inbound(&other).await.unwrap(), ReplyOutcome::Unmatched);
    }

    #[tokio::test]
    async fn unknown_and_invalid_senders() {
        let (_store, listener) = listener().await;
        let unknown = InboundMessage::new("+14155550199", "who is this", t0());
        assert_eq!(listener.on_inbound(&unknown).await.unwrap(), ReplyOutcome::Unmatched);

        let garbage = InboundMessage::new("not a number", "hi", t0());
        assert_eq!(listener.on_inbound(&garbage).await.unwrap(), ReplyOutcome::InvalidPhone);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(ReplyOutcome::Unmatched).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "unmatched"}));
    }

    #[test]
    fn inbound_message_defaults() {
        let msg: InboundMessage = serde_json::from_str(r#"{"from_phone": "+14155550100"}"#).unwrap();
        assert!(msg.body.is_empty());
        assert!(msg.campaign_hint.is_none());
    }
}
