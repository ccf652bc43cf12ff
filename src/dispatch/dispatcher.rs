//! Batch dispatcher: finds due touches and drives them to a terminal state.
//!
//! Every delivery leaves `pending` through a compare-and-set in the store, and
//! the gate (campaign status, suppression, delivery state) is re-read under the
//! enrollment lock right before each send. A campaign is drained by at most
//! one run at a time; different campaigns in one batch run concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::campaigns::model::{CampaignStatus, DeliveryState, DueTouch, TouchOutcome};
use crate::config::{DispatchConfig, OverduePolicy};
use crate::dispatch::gateway::DeliveryGateway;
use crate::dispatch::locks::EngineLocks;
use crate::error::CampaignError;
use crate::store::CampaignStore;
use crate::template::TemplateEngine;

/// What one dispatch run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Campaigns drained by this run.
    pub campaigns: usize,
    /// Deliveries that reached a terminal state in this run.
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped_suppressed: usize,
    pub skipped_stale: usize,
    /// Deliveries another run had already finished.
    pub already_done: usize,
    /// Deliveries left pending because their campaign stopped being active.
    pub held: usize,
    /// Campaigns skipped because another run held them.
    pub busy_campaigns: Vec<Uuid>,
    pub completed_campaigns: Vec<Uuid>,
    pub cancelled: bool,
}

impl DispatchReport {
    fn merge(&mut self, other: DispatchReport) {
        self.campaigns += other.campaigns;
        self.processed += other.processed;
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped_suppressed += other.skipped_suppressed;
        self.skipped_stale += other.skipped_stale;
        self.already_done += other.already_done;
        self.held += other.held;
        self.busy_campaigns.extend(other.busy_campaigns);
        self.completed_campaigns.extend(other.completed_campaigns);
        self.cancelled |= other.cancelled;
    }

    fn tally(&mut self, result: TouchResult) {
        match result {
            TouchResult::Recorded(state) => {
                self.processed += 1;
                match state {
                    DeliveryState::Sent => self.sent += 1,
                    DeliveryState::Failed => self.failed += 1,
                    DeliveryState::SkippedSuppressed => self.skipped_suppressed += 1,
                    DeliveryState::SkippedStale => self.skipped_stale += 1,
                    DeliveryState::Pending => {}
                }
            }
            TouchResult::AlreadyDone => self.already_done += 1,
            TouchResult::Held => self.held += 1,
        }
    }
}

/// Per-delivery result inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TouchResult {
    Recorded(DeliveryState),
    AlreadyDone,
    Held,
}

pub struct Dispatcher {
    store: Arc<dyn CampaignStore>,
    gateway: Arc<dyn DeliveryGateway>,
    templates: Arc<TemplateEngine>,
    locks: Arc<EngineLocks>,
    config: DispatchConfig,
    cancel: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        gateway: Arc<dyn DeliveryGateway>,
        templates: Arc<TemplateEngine>,
        locks: Arc<EngineLocks>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            templates,
            locks,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops issuing sends. Runs in progress stop between sends;
    /// transitions already recorded stay.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Process every due delivery of every active campaign, up to the batch limit.
    pub async fn run_due_batch(&self, now: DateTime<Utc>) -> Result<DispatchReport, CampaignError> {
        let campaign_ids = self.store.due_campaigns(now).await?;
        let budget = AtomicUsize::new(self.config.batch_limit);

        let runs = campaign_ids.iter().map(|&id| {
            let budget = &budget;
            async move {
                let mut report = DispatchReport::default();
                let Some(_guard) = self.locks.campaigns.try_lock(id) else {
                    debug!(campaign_id = %id, "Campaign busy, skipping");
                    report.busy_campaigns.push(id);
                    return (report, Ok(()));
                };
                let result = self.drain_campaign(id, now, budget, &mut report).await;
                (report, result)
            }
        });

        let mut report = DispatchReport::default();
        for (id, (partial, result)) in campaign_ids.iter().zip(join_all(runs).await) {
            if let Err(e) = result {
                error!(
                    campaign_id = %id,
                    sent = partial.sent,
                    failed = partial.failed,
                    processed = partial.processed,
                    "Dispatch failed: {e}"
                );
            }
            report.merge(partial);
        }

        if report.processed > 0 || !report.busy_campaigns.is_empty() {
            info!(
                campaigns = report.campaigns,
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped_suppressed + report.skipped_stale,
                busy = report.busy_campaigns.len(),
                "Dispatch batch finished"
            );
        }
        Ok(report)
    }

    /// Process the due deliveries of one campaign. Fails with `Busy` if another
    /// run holds the campaign.
    pub async fn run_campaign(&self, id: Uuid, now: DateTime<Utc>) -> Result<DispatchReport, CampaignError> {
        let campaign = self
            .store
            .get_campaign(id)
            .await?
            .ok_or(CampaignError::NotFound { id })?;
        if campaign.status != CampaignStatus::Active {
            return Err(CampaignError::InvalidTransition {
                id,
                state: campaign.status.to_string(),
                target: "dispatching".into(),
            });
        }

        let _guard = self
            .locks
            .campaigns
            .try_lock(id)
            .ok_or(CampaignError::Busy { id })?;
        let budget = AtomicUsize::new(self.config.batch_limit);
        let mut report = DispatchReport::default();
        if let Err(e) = self.drain_campaign(id, now, &budget, &mut report).await {
            error!(
                campaign_id = %id,
                sent = report.sent,
                failed = report.failed,
                processed = report.processed,
                "Dispatch failed: {e}"
            );
            return Err(e);
        }
        Ok(report)
    }

    /// Caller holds the campaign lock. Tallies land in `report` as they happen,
    /// so a failed drain still accounts for the sends it made.
    async fn drain_campaign(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        budget: &AtomicUsize,
        report: &mut DispatchReport,
    ) -> Result<(), CampaignError> {
        report.campaigns += 1;

        let limit = budget.load(Ordering::SeqCst);
        let due = if limit == 0 {
            Vec::new()
        } else {
            self.store.due_deliveries(id, now, limit).await?
        };

        let mut sent_before = false;
        for touch in due {
            if self.cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                break;
            }
            if budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| b.checked_sub(1))
                .is_err()
            {
                break;
            }
            if sent_before && !self.config.send_spacing.is_zero() {
                tokio::time::sleep(self.config.send_spacing).await;
            }

            let result = self.process(&touch, now).await?;
            sent_before = matches!(
                result,
                TouchResult::Recorded(DeliveryState::Sent | DeliveryState::Failed)
            );
            report.tally(result);
        }

        if !report.cancelled && self.store.complete_if_exhausted(id, now).await? {
            info!(campaign_id = %id, "Campaign completed");
            report.completed_campaigns.push(id);
        }
        Ok(())
    }

    /// Gate, render, send and record one delivery under its enrollment lock.
    async fn process(&self, touch: &DueTouch, now: DateTime<Utc>) -> Result<TouchResult, CampaignError> {
        let d = &touch.delivery;
        let _guard = self.locks.enrollments.lock(d.enrollment_id).await;

        let Some(gate) = self.store.dispatch_gate(d.id).await? else {
            return Ok(TouchResult::AlreadyDone);
        };
        if gate.state != DeliveryState::Pending {
            debug!(delivery_id = %d.id, state = %gate.state, "Delivery already finished");
            return Ok(TouchResult::AlreadyDone);
        }
        if gate.campaign_status != CampaignStatus::Active {
            debug!(delivery_id = %d.id, status = %gate.campaign_status, "Campaign no longer active");
            return Ok(TouchResult::Held);
        }

        let outcome = if gate.suppressed {
            TouchOutcome::SkippedSuppressed
        } else if self.is_stale(d.scheduled_for, now) {
            TouchOutcome::SkippedStale
        } else {
            self.send(touch, now).await
        };

        let state = outcome.state();
        if !self.store.complete_delivery(d.id, &outcome, now).await? {
            warn!(delivery_id = %d.id, "Delivery left pending concurrently; outcome not recorded");
            return Ok(TouchResult::AlreadyDone);
        }
        debug!(
            campaign_id = %d.campaign_id,
            delivery_id = %d.id,
            touch = d.touch_index,
            attempt = d.attempt,
            state = %state,
            "Delivery recorded"
        );
        Ok(TouchResult::Recorded(state))
    }

    fn is_stale(&self, scheduled_for: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.config.overdue {
            OverduePolicy::SendImmediately => false,
            OverduePolicy::SkipOlderThan(window) => chrono::Duration::from_std(window)
                .is_ok_and(|window| now - scheduled_for > window),
        }
    }

    async fn send(&self, touch: &DueTouch, now: DateTime<Utc>) -> TouchOutcome {
        let d = &touch.delivery;
        let body = self.templates.render(&d.message_template, &touch.contact, now);
        let timeout = self.config.send_timeout;

        let outcome = self
            .gateway
            .send_with_timeout(&touch.contact.phone, &body, timeout)
            .await;
        if outcome.success {
            return TouchOutcome::Sent {
                body,
                provider_message_id: outcome.provider_message_id,
            };
        }
        let error = outcome
            .error
            .unwrap_or_else(|| "provider reported failure".into());
        warn!(delivery_id = %d.id, provider = self.gateway.name(), "Send failed: {error}");
        TouchOutcome::Failed {
            body: Some(body),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::campaigns::model::{
        Campaign, CampaignPlan, Enrollment, TouchDelivery, TouchTemplate,
    };
    use crate::contacts::model::ContactRecord;
    use crate::contacts::phone::LineKind;
    use crate::campaigns::model::{
        CampaignFilter, CampaignPage, CampaignSummary, DispatchGate, TouchStats,
    };
    use crate::dispatch::gateway::{FallbackGateway, SendOutcome};
    use crate::error::DatabaseError;
    use crate::store::{InboundReplyRecord, LibSqlBackend};

    /// Records every message; fails for numbers listed in `fail_for`.
    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<(String, String)>>,
        fail_for: Vec<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl DeliveryGateway for RecordingGateway {
        fn name(&self) -> &str {
            "recording"
        }
        async fn send(&self, to: &str, body: &str) -> SendOutcome {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_for.iter().any(|p| p == to) {
                return SendOutcome::failed("carrier rejected");
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((to.to_string(), body.to_string()));
            SendOutcome::delivered(Some(format!("msg-{}", sent.len())))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
    }

    fn day(n: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::days(n)
    }

    async fn seed(store: &LibSqlBackend, phones: &[&str], offsets: &[u32]) -> CampaignPlan {
        let templates = offsets
            .iter()
            .map(|&o| TouchTemplate::new(o, format!("Day {o} for {{name}}")))
            .collect();
        let mut campaign = Campaign::new("Test", templates, t0());
        let enrollments: Vec<Enrollment> = phones
            .iter()
            .map(|p| Enrollment::new(campaign.id, ContactRecord::new(*p).with_name("Sam"), LineKind::Mobile, t0()))
            .collect();
        let deliveries = enrollments
            .iter()
            .flat_map(|e| TouchDelivery::schedule(e, &campaign.templates))
            .collect();
        campaign.total_contacts = enrollments.len() as u64;
        let plan = CampaignPlan {
            campaign,
            enrollments,
            deliveries,
        };
        store.insert_campaign_plan(&plan).await.unwrap();
        plan
    }

    fn dispatcher(store: Arc<LibSqlBackend>, gateway: Arc<RecordingGateway>, config: DispatchConfig) -> Dispatcher {
        Dispatcher::new(
            store,
            gateway,
            Arc::new(TemplateEngine::default()),
            Arc::new(EngineLocks::default()),
            config,
        )
    }

    #[tokio::test]
    async fn sends_due_touches_and_renders() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(RecordingGateway::default());
        let plan = seed(&store, &["+14155550100", "+14155550101"], &[1, 3]).await;
        let d = dispatcher(store.clone(), gateway.clone(), DispatchConfig::default());

        let report = d.run_due_batch(day(1)).await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.campaigns, 1);
        assert!(report.completed_campaigns.is_empty());

        let sent = gateway.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, body)| body == "Day 1 for Sam"));

        // Nothing else is due until day 3.
        let report = d.run_due_batch(day(2)).await.unwrap();
        assert_eq!(report, DispatchReport::default());

        let report = d.run_due_batch(day(3)).await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.completed_campaigns, vec![plan.campaign.id]);
        let campaign = store.get_campaign(plan.campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.sent_count, 4);
    }

    #[tokio::test]
    async fn failures_are_recorded_with_error() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(RecordingGateway {
            fail_for: vec!["+14155550101".into()],
            ..Default::default()
        });
        let plan = seed(&store, &["+14155550100", "+14155550101"], &[1]).await;
        let d = dispatcher(store.clone(), gateway, DispatchConfig::default());

        let report = d.run_due_batch(day(1)).await.unwrap();
        assert_eq!((report.sent, report.failed), (1, 1));

        let failed: Vec<_> = store
            .list_deliveries(plan.campaign.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|d| d.state == DeliveryState::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("carrier rejected"));
        assert_eq!(failed[0].rendered_body.as_deref(), Some("Day 1 for Sam"));
    }

    #[tokio::test]
    async fn batch_limit_bounds_sends() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(RecordingGateway::default());
        seed(&store, &["+14155550100", "+14155550101", "+14155550102"], &[1]).await;
        seed(&store, &["+14155550103", "+14155550104"], &[1]).await;
        let config = DispatchConfig {
            batch_limit: 3,
            ..Default::default()
        };
        let d = dispatcher(store.clone(), gateway.clone(), config);

        let report = d.run_due_batch(day(1)).await.unwrap();
        assert_eq!(report.sent, 3);
        let report = d.run_due_batch(day(1)).await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(gateway.sent.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(RecordingGateway {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let plan = seed(&store, &["+14155550100"], &[1]).await;
        let config = DispatchConfig {
            send_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let d = dispatcher(store.clone(), gateway, config);

        let report = d.run_due_batch(day(1)).await.unwrap();
        assert_eq!(report.failed, 1);
        let deliveries = store.list_deliveries(plan.campaign.id).await.unwrap();
        assert!(deliveries[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn stale_policy_skips_old_touches() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(RecordingGateway::default());
        seed(&store, &["+14155550100"], &[1, 5]).await;
        let config = DispatchConfig {
            overdue: OverduePolicy::SkipOlderThan(Duration::from_secs(48 * 3600)),
            ..Default::default()
        };
        let d = dispatcher(store.clone(), gateway.clone(), config);

        // Day 1 touch is 4 days late (stale); day 5 touch is on time.
        let report = d.run_due_batch(day(5)).await.unwrap();
        assert_eq!(report.skipped_stale, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(gateway.sent.lock().unwrap()[0].1, "Day 5 for Sam");
    }

    #[tokio::test]
    async fn run_campaign_reports_busy_and_inactive() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(RecordingGateway::default());
        let plan = seed(&store, &["+14155550100"], &[1]).await;
        let id = plan.campaign.id;
        let d = dispatcher(store.clone(), gateway, DispatchConfig::default());

        let held = d.locks.campaigns.try_lock(id).unwrap();
        assert!(matches!(d.run_campaign(id, day(1)).await, Err(CampaignError::Busy { .. })));
        let report = d.run_due_batch(day(1)).await.unwrap();
        assert_eq!(report.busy_campaigns, vec![id]);
        assert_eq!(report.sent, 0);
        drop(held);

        assert_eq!(d.run_campaign(id, day(1)).await.unwrap().sent, 1);
        assert!(matches!(
            d.run_campaign(Uuid::new_v4(), day(1)).await,
            Err(CampaignError::NotFound { .. })
        ));
        // Completed after its only touch.
        assert!(matches!(
            d.run_campaign(id, day(1)).await,
            Err(CampaignError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_dispatcher_sends_nothing() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(RecordingGateway::default());
        seed(&store, &["+14155550100"], &[1]).await;
        let d = dispatcher(store.clone(), gateway.clone(), DispatchConfig::default());

        d.cancel_flag().store(true, Ordering::Relaxed);
        let report = d.run_due_batch(day(1)).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.sent, 0);
        assert!(gateway.sent.lock().unwrap().is_empty());
    }

    /// Delegates to an in-memory store but starts failing `complete_delivery`
    /// after `allowed` successful calls.
    struct FlakyStore {
        inner: LibSqlBackend,
        allowed: AtomicUsize,
    }

    #[async_trait]
    impl CampaignStore for FlakyStore {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            self.inner.run_migrations().await
        }
        async fn insert_campaign_plan(&self, plan: &CampaignPlan) -> Result<(), DatabaseError> {
            self.inner.insert_campaign_plan(plan).await
        }
        async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
            self.inner.get_campaign(id).await
        }
        async fn list_campaigns(&self, filter: &CampaignFilter) -> Result<CampaignPage, DatabaseError> {
            self.inner.list_campaigns(filter).await
        }
        async fn campaign_summary(&self) -> Result<CampaignSummary, DatabaseError> {
            self.inner.campaign_summary().await
        }
        async fn transition_campaign(
            &self,
            id: Uuid,
            from: &[CampaignStatus],
            to: CampaignStatus,
            at: DateTime<Utc>,
        ) -> Result<bool, DatabaseError> {
            self.inner.transition_campaign(id, from, to, at).await
        }
        async fn complete_if_exhausted(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
            self.inner.complete_if_exhausted(id, at).await
        }
        async fn list_enrollments(&self, campaign_id: Uuid) -> Result<Vec<Enrollment>, DatabaseError> {
            self.inner.list_enrollments(campaign_id).await
        }
        async fn list_deliveries(&self, campaign_id: Uuid) -> Result<Vec<TouchDelivery>, DatabaseError> {
            self.inner.list_deliveries(campaign_id).await
        }
        async fn due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, DatabaseError> {
            self.inner.due_campaigns(now).await
        }
        async fn due_deliveries(
            &self,
            campaign_id: Uuid,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<DueTouch>, DatabaseError> {
            self.inner.due_deliveries(campaign_id, now, limit).await
        }
        async fn dispatch_gate(&self, delivery_id: Uuid) -> Result<Option<DispatchGate>, DatabaseError> {
            self.inner.dispatch_gate(delivery_id).await
        }
        async fn complete_delivery(
            &self,
            delivery_id: Uuid,
            outcome: &TouchOutcome,
            at: DateTime<Utc>,
        ) -> Result<bool, DatabaseError> {
            if self
                .allowed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                return Err(DatabaseError::Query("complete_delivery: disk I/O error".into()));
            }
            self.inner.complete_delivery(delivery_id, outcome, at).await
        }
        async fn requeue_failed(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
            self.inner.requeue_failed(campaign_id, now).await
        }
        async fn touch_stats(&self, campaign_id: Uuid) -> Result<Vec<TouchStats>, DatabaseError> {
            self.inner.touch_stats(campaign_id).await
        }
        async fn next_scheduled(&self, campaign_id: Uuid) -> Result<Option<DateTime<Utc>>, DatabaseError> {
            self.inner.next_scheduled(campaign_id).await
        }
        async fn enrollments_for_phone(
            &self,
            phone: &str,
            campaign_id: Option<Uuid>,
        ) -> Result<Vec<Enrollment>, DatabaseError> {
            self.inner.enrollments_for_phone(phone, campaign_id).await
        }
        async fn suppress_enrollment(&self, enrollment_id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
            self.inner.suppress_enrollment(enrollment_id, at).await
        }
        async fn record_inbound(&self, reply: &InboundReplyRecord) -> Result<(), DatabaseError> {
            self.inner.record_inbound(reply).await
        }
        async fn inbound_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<InboundReplyRecord>, DatabaseError> {
            self.inner.inbound_for_campaign(campaign_id).await
        }
    }

    #[tokio::test]
    async fn failed_drain_keeps_partial_tallies() {
        let inner = LibSqlBackend::new_memory().await.unwrap();
        let plan = seed(&inner, &["+14155550100", "+14155550101", "+14155550102"], &[1]).await;
        let store = Arc::new(FlakyStore {
            inner,
            allowed: AtomicUsize::new(2),
        });
        let gateway = Arc::new(RecordingGateway::default());
        let d = Dispatcher::new(
            store.clone(),
            gateway.clone(),
            Arc::new(TemplateEngine::default()),
            Arc::new(EngineLocks::default()),
            DispatchConfig::default(),
        );

        let report = d.run_due_batch(day(1)).await.unwrap();
        assert_eq!(report.campaigns, 1);
        assert_eq!((report.sent, report.processed), (2, 2));
        assert!(report.completed_campaigns.is_empty());
        assert_eq!(gateway.sent.lock().unwrap().len(), 3);

        // The single-campaign path reports the error itself.
        let err = d.run_campaign(plan.campaign.id, day(1)).await.unwrap_err();
        assert!(matches!(err, CampaignError::Database(_)));
    }

    #[tokio::test]
    async fn slow_primary_falls_over_to_secondary() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let plan = seed(&store, &["+14155550100"], &[1]).await;
        let primary = Arc::new(RecordingGateway {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let secondary = Arc::new(RecordingGateway::default());
        let providers: Vec<Arc<dyn DeliveryGateway>> = vec![primary.clone(), secondary.clone()];
        let d = Dispatcher::new(
            store.clone(),
            Arc::new(FallbackGateway::new(providers)),
            Arc::new(TemplateEngine::default()),
            Arc::new(EngineLocks::default()),
            DispatchConfig {
                send_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        );

        let report = d.run_due_batch(day(1)).await.unwrap();
        assert_eq!((report.sent, report.failed), (1, 0));
        assert!(primary.sent.lock().unwrap().is_empty());
        assert_eq!(secondary.sent.lock().unwrap().len(), 1);
        let deliveries = store.list_deliveries(plan.campaign.id).await.unwrap();
        assert_eq!(deliveries[0].provider_message_id.as_deref(), Some("msg-1"));
    }
}
