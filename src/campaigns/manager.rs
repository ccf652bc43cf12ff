//! Campaign lifecycle: creation, pause/resume, duplicate, delete, retry and stats.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::campaigns::model::{
    Campaign, CampaignDetail, CampaignFilter, CampaignPage, CampaignPlan, CampaignStats,
    CampaignStatus, CampaignSummary, CreatedCampaign, DeliveryState, Enrollment,
    EnrollmentHistory, NewCampaign, RejectedContact, TouchDelivery, TouchTemplate, percent,
    validate_templates,
};
use crate::config::EnrollmentPolicy;
use crate::contacts::intake::SYSTEM_VARIABLES;
use crate::contacts::model::ContactRecord;
use crate::contacts::phone::classify;
use crate::error::CampaignError;
use crate::store::CampaignStore;
use crate::template::TemplateEngine;

/// Variables that always render, with or without contact data.
const FALLBACK_VARIABLES: &[&str] = &["name", "first_name", "full_name"];

pub struct CampaignManager {
    store: Arc<dyn CampaignStore>,
    templates: Arc<TemplateEngine>,
    policy: EnrollmentPolicy,
    cost_per_message: Decimal,
}

impl CampaignManager {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        templates: Arc<TemplateEngine>,
        policy: EnrollmentPolicy,
        cost_per_message: Decimal,
    ) -> Self {
        Self {
            store,
            templates,
            policy,
            cost_per_message,
        }
    }

    /// Validate, enroll and schedule a new campaign in one transaction.
    pub async fn create_campaign(&self, new: NewCampaign, now: DateTime<Utc>) -> Result<CreatedCampaign, CampaignError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(CampaignError::Invalid("campaign name is required".into()));
        }
        validate_templates(&new.templates).map_err(CampaignError::Invalid)?;
        if new.contacts.is_empty() {
            return Err(CampaignError::Invalid("at least one contact is required".into()));
        }

        self.warn_unbound_variables(&new.templates, &new.contacts);
        self.build_campaign(Campaign::new(name, new.templates, now), new.contacts, now)
            .await
    }

    async fn build_campaign(
        &self,
        mut campaign: Campaign,
        contacts: Vec<ContactRecord>,
        now: DateTime<Utc>,
    ) -> Result<CreatedCampaign, CampaignError> {
        let mut seen = HashSet::new();
        let mut enrollments = Vec::new();
        let mut rejected = Vec::new();

        for mut contact in contacts {
            let phone = classify(&contact.phone);
            let reason = if !phone.valid {
                Some("invalid phone number".to_string())
            } else if !self.policy.is_eligible(phone.kind) {
                Some(format!("{} numbers are not eligible", phone.kind))
            } else if !seen.insert(phone.canonical.clone()) {
                Some("duplicate phone number".to_string())
            } else {
                None
            };

            if let Some(reason) = reason {
                rejected.push(RejectedContact {
                    phone: contact.phone,
                    reason,
                });
                continue;
            }
            contact.phone = phone.canonical;
            enrollments.push(Enrollment::new(campaign.id, contact, phone.kind, now));
        }

        if enrollments.is_empty() {
            return Err(CampaignError::Invalid(format!(
                "no enrollable contacts ({} rejected)",
                rejected.len()
            )));
        }

        campaign.total_contacts = enrollments.len() as u64;
        let deliveries = enrollments
            .iter()
            .flat_map(|e| TouchDelivery::schedule(e, &campaign.templates))
            .collect();
        let plan = CampaignPlan {
            campaign,
            enrollments,
            deliveries,
        };
        self.store.insert_campaign_plan(&plan).await?;

        info!(
            campaign_id = %plan.campaign.id,
            enrolled = plan.enrollments.len(),
            rejected = rejected.len(),
            touches = plan.deliveries.len(),
            "Campaign created"
        );
        Ok(CreatedCampaign {
            enrolled: plan.enrollments.len(),
            campaign: plan.campaign,
            rejected,
        })
    }

    fn warn_unbound_variables(&self, templates: &[TouchTemplate], contacts: &[ContactRecord]) {
        let mut missing = Vec::new();
        for t in templates.iter().filter(|t| t.active) {
            for var in self.templates.referenced_variables(&t.message) {
                if SYSTEM_VARIABLES.contains(&var.as_str()) || FALLBACK_VARIABLES.contains(&var.as_str()) {
                    continue;
                }
                if !missing.contains(&var) && !contacts.iter().any(|c| c.lookup(&var).is_some()) {
                    missing.push(var);
                }
            }
        }
        if !missing.is_empty() {
            warn!(variables = ?missing, "Template variables not present on any contact will render empty");
        }
    }

    pub async fn get_campaign(&self, id: Uuid) -> Result<Campaign, CampaignError> {
        self.store
            .get_campaign(id)
            .await?
            .ok_or(CampaignError::NotFound { id })
    }

    pub async fn list_campaigns(&self, filter: &CampaignFilter) -> Result<CampaignPage, CampaignError> {
        Ok(self.store.list_campaigns(filter).await?)
    }

    pub async fn summary(&self) -> Result<CampaignSummary, CampaignError> {
        Ok(self.store.campaign_summary().await?)
    }

    /// `active → paused`; pausing a paused campaign is a no-op.
    pub async fn pause(&self, id: Uuid, now: DateTime<Utc>) -> Result<Campaign, CampaignError> {
        self.transition(id, CampaignStatus::Active, CampaignStatus::Paused, now)
            .await
    }

    /// `paused → active`; pending touches that came due while paused go out on
    /// the next run, subject to the overdue policy.
    pub async fn resume(&self, id: Uuid, now: DateTime<Utc>) -> Result<Campaign, CampaignError> {
        self.transition(id, CampaignStatus::Paused, CampaignStatus::Active, now)
            .await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(id).await?;
        if campaign.status == to {
            return Ok(campaign);
        }
        if campaign.status == from && self.store.transition_campaign(id, &[from], to, now).await? {
            info!(campaign_id = %id, from = %from, to = %to, "Campaign status changed");
            return self.get_campaign(id).await;
        }

        // Either the status was wrong or it changed under us; report what it is now.
        let current = self.get_campaign(id).await?;
        if current.status == to {
            return Ok(current);
        }
        Err(CampaignError::InvalidTransition {
            id,
            state: current.status.to_string(),
            target: to.to_string(),
        })
    }

    /// Soft delete. Pending touches are never sent afterwards.
    pub async fn delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), CampaignError> {
        self.get_campaign(id).await?;
        let from = [CampaignStatus::Active, CampaignStatus::Paused, CampaignStatus::Completed];
        if self
            .store
            .transition_campaign(id, &from, CampaignStatus::Deleted, now)
            .await?
        {
            info!(campaign_id = %id, "Campaign deleted");
            return Ok(());
        }
        let current = self.get_campaign(id).await?;
        Err(CampaignError::InvalidTransition {
            id,
            state: current.status.to_string(),
            target: CampaignStatus::Deleted.to_string(),
        })
    }

    /// Copy templates and roster into a new active campaign enrolled at `now`.
    pub async fn duplicate(
        &self,
        id: Uuid,
        new_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CreatedCampaign, CampaignError> {
        let source = self.get_campaign(id).await?;
        let name = new_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Copy of {}", source.name));
        let contacts = self
            .store
            .list_enrollments(id)
            .await?
            .into_iter()
            .map(|e| e.contact)
            .collect();

        let mut campaign = Campaign::new(name, source.templates, now);
        campaign.source_campaign_id = Some(id);
        let created = self.build_campaign(campaign, contacts, now).await?;
        info!(campaign_id = %created.campaign.id, source_id = %id, "Campaign duplicated");
        Ok(created)
    }

    /// Queue a fresh attempt for each failed touch. Returns how many were queued.
    pub async fn retry_failed(&self, id: Uuid, now: DateTime<Utc>) -> Result<usize, CampaignError> {
        let campaign = self.get_campaign(id).await?;
        if campaign.status == CampaignStatus::Deleted {
            return Err(CampaignError::InvalidTransition {
                id,
                state: campaign.status.to_string(),
                target: "retry".into(),
            });
        }
        let queued = self.store.requeue_failed(id, now).await?;
        if queued > 0 {
            info!(campaign_id = %id, queued, "Failed touches requeued");
        }
        Ok(queued)
    }

    pub async fn campaign_stats(&self, id: Uuid) -> Result<CampaignStats, CampaignError> {
        let campaign = self.get_campaign(id).await?;
        self.stats_for(&campaign).await
    }

    async fn stats_for(&self, campaign: &Campaign) -> Result<CampaignStats, CampaignError> {
        let touches = self.store.touch_stats(campaign.id).await?;
        let pending = touches.iter().map(|t| t.pending).sum();
        let next_scheduled = self.store.next_scheduled(campaign.id).await?;

        Ok(CampaignStats {
            campaign_id: campaign.id,
            status: campaign.status,
            total_contacts: campaign.total_contacts,
            sent: campaign.sent_count,
            failed: campaign.failed_count,
            skipped: campaign.skipped_count,
            pending,
            replies: campaign.reply_count,
            delivery_rate: percent(campaign.sent_count, campaign.sent_count + campaign.failed_count),
            reply_rate: campaign.reply_rate(),
            next_scheduled,
            estimated_cost: self.cost_per_message * Decimal::from(campaign.sent_count),
            touches,
        })
    }

    /// Campaign, stats, per-enrollment delivery history and the reply log.
    pub async fn campaign_detail(&self, id: Uuid) -> Result<CampaignDetail, CampaignError> {
        let campaign = self.get_campaign(id).await?;
        let stats = self.stats_for(&campaign).await?;
        let mut deliveries = self.store.list_deliveries(id).await?;

        let enrollments = self
            .store
            .list_enrollments(id)
            .await?
            .into_iter()
            .map(|enrollment| {
                let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut deliveries)
                    .into_iter()
                    .partition(|d| d.enrollment_id == enrollment.id);
                deliveries = rest;
                EnrollmentHistory {
                    enrollment,
                    deliveries: mine,
                }
            })
            .collect();
        let replies = self.store.inbound_for_campaign(id).await?;

        Ok(CampaignDetail {
            campaign,
            stats,
            enrollments,
            replies,
        })
    }

    /// Deliveries of a campaign in `state`, for operator review.
    pub async fn deliveries_in_state(&self, id: Uuid, state: DeliveryState) -> Result<Vec<TouchDelivery>, CampaignError> {
        self.get_campaign(id).await?;
        Ok(self
            .store
            .list_deliveries(id)
            .await?
            .into_iter()
            .filter(|d| d.state == state)
            .collect())
    }
}
