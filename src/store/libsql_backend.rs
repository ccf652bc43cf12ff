//! libSQL backend: async `CampaignStore` implementation.
//!
//! Supports local file and in-memory databases. Every write goes through a
//! single write gate; multi-statement writes run inside a transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::campaigns::model::{
    Campaign, CampaignFilter, CampaignPage, CampaignPlan, CampaignStatus, CampaignSummary,
    DeliveryState, DispatchGate, DueTouch, Enrollment, TouchDelivery, TouchOutcome, TouchStats,
};
use crate::contacts::model::ContactRecord;
use crate::contacts::phone::LineKind;
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{CampaignStore, InboundReplyRecord};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Serializes writers so a transaction never interleaves with another write
    /// on the shared connection.
    write_gate: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_gate: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn begin(&self, op: &str) -> Result<Transaction, DatabaseError> {
        self.conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: begin: {e}")))
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: Transaction,
    op: &str,
    result: Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("{op}: commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!("{op}: rollback failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 UTC, so text comparison in SQL matches time order.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn str_to_line_kind(s: &str) -> LineKind {
    match s {
        "mobile" => LineKind::Mobile,
        "landline" => LineKind::Landline,
        "voip" => LineKind::Voip,
        _ => LineKind::Unknown,
    }
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(fmt_ts(dt)),
        None => libsql::Value::Null,
    }
}

const CAMPAIGN_COLUMNS: &str = "id, name, status, templates, source_campaign_id, total_contacts, sent_count, failed_count, skipped_count, reply_count, created_at, updated_at, last_activity_at";

const ENROLLMENT_COLUMNS: &str =
    "e.id, e.campaign_id, e.phone, e.contact, e.line_kind, e.enrolled_at, e.suppressed, e.suppressed_at";

const DELIVERY_COLUMNS: &str = "d.id, d.campaign_id, d.enrollment_id, d.touch_index, d.attempt, d.day_offset, d.message_template, d.scheduled_for, d.state, d.rendered_body, d.sent_at, d.provider_message_id, d.error, d.updated_at";

/// Map a libsql Row to a Campaign (column order matches CAMPAIGN_COLUMNS).
fn row_to_campaign(row: &libsql::Row) -> Result<Campaign, libsql::Error> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(2)?;
    let templates_str: String = row.get(3)?;
    let source_str: Option<String> = row.get::<String>(4).ok();
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;
    let activity_str: Option<String> = row.get::<String>(12).ok();

    let templates = serde_json::from_str(&templates_str).unwrap_or_else(|e| {
        tracing::warn!(campaign_id = %id_str, "Unreadable templates column: {e}");
        Vec::new()
    });

    Ok(Campaign {
        id: parse_uuid(&id_str),
        name: row.get(1)?,
        status: status_str.parse().unwrap_or(CampaignStatus::Paused),
        templates,
        source_campaign_id: source_str.as_deref().map(parse_uuid),
        total_contacts: row.get::<i64>(5)? as u64,
        sent_count: row.get::<i64>(6)? as u64,
        failed_count: row.get::<i64>(7)? as u64,
        skipped_count: row.get::<i64>(8)? as u64,
        reply_count: row.get::<i64>(9)? as u64,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        last_activity_at: parse_optional_datetime(&activity_str),
    })
}

/// Map a libsql Row to an Enrollment (column order matches ENROLLMENT_COLUMNS).
fn row_to_enrollment(row: &libsql::Row) -> Result<Enrollment, libsql::Error> {
    let phone: String = row.get(2)?;
    let contact_str: String = row.get(3)?;
    let kind_str: String = row.get(4)?;
    let enrolled_str: String = row.get(5)?;
    let suppressed_at: Option<String> = row.get::<String>(7).ok();

    let contact = serde_json::from_str(&contact_str).unwrap_or_else(|e| {
        tracing::warn!(phone = %phone, "Unreadable contact column: {e}");
        ContactRecord::new(phone.clone())
    });

    Ok(Enrollment {
        id: parse_uuid(&row.get::<String>(0)?),
        campaign_id: parse_uuid(&row.get::<String>(1)?),
        contact,
        line_kind: str_to_line_kind(&kind_str),
        enrolled_at: parse_datetime(&enrolled_str),
        suppressed: row.get::<i64>(6)? != 0,
        suppressed_at: parse_optional_datetime(&suppressed_at),
    })
}

/// Map a libsql Row to a TouchDelivery (column order matches DELIVERY_COLUMNS).
fn row_to_delivery(row: &libsql::Row) -> Result<TouchDelivery, libsql::Error> {
    let state_str: String = row.get(8)?;
    let scheduled_str: String = row.get(7)?;
    let sent_str: Option<String> = row.get::<String>(10).ok();
    let updated_str: String = row.get(13)?;

    Ok(TouchDelivery {
        id: parse_uuid(&row.get::<String>(0)?),
        campaign_id: parse_uuid(&row.get::<String>(1)?),
        enrollment_id: parse_uuid(&row.get::<String>(2)?),
        touch_index: row.get::<i64>(3)? as u32,
        attempt: row.get::<i64>(4)? as u32,
        day_offset: row.get::<i64>(5)? as u32,
        message_template: row.get(6)?,
        scheduled_for: parse_datetime(&scheduled_str),
        // Unknown states are treated as terminal so they are never sent.
        state: state_str.parse().unwrap_or(DeliveryState::Failed),
        rendered_body: row.get::<String>(9).ok(),
        sent_at: parse_optional_datetime(&sent_str),
        provider_message_id: row.get::<String>(11).ok(),
        error: row.get::<String>(12).ok(),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_inbound(row: &libsql::Row) -> Result<InboundReplyRecord, libsql::Error> {
    let received_str: String = row.get(3)?;
    Ok(InboundReplyRecord {
        id: parse_uuid(&row.get::<String>(0)?),
        from_phone: row.get(1)?,
        body: row.get(2)?,
        received_at: parse_datetime(&received_str),
        campaign_id: row.get::<String>(4).ok().as_deref().map(parse_uuid),
        enrollment_id: row.get::<String>(5).ok().as_deref().map(parse_uuid),
        outcome: row.get(6)?,
    })
}

// ── Transaction bodies ──────────────────────────────────────────────

async fn insert_plan(conn: &Connection, plan: &CampaignPlan) -> Result<(), DatabaseError> {
    let c = &plan.campaign;
    let templates = serde_json::to_string(&c.templates)
        .map_err(|e| DatabaseError::Serialization(format!("campaign templates: {e}")))?;

    conn.execute(
        "INSERT INTO campaigns (id, name, status, templates, source_campaign_id, total_contacts, sent_count, failed_count, skipped_count, reply_count, created_at, updated_at, last_activity_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            c.id.to_string(),
            c.name.clone(),
            c.status.as_str(),
            templates,
            opt_text(c.source_campaign_id.map(|id| id.to_string()).as_deref()),
            c.total_contacts as i64,
            c.sent_count as i64,
            c.failed_count as i64,
            c.skipped_count as i64,
            c.reply_count as i64,
            fmt_ts(c.created_at),
            fmt_ts(c.updated_at),
            opt_ts(c.last_activity_at),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_campaign: {e}")))?;

    for e in &plan.enrollments {
        let contact = serde_json::to_string(&e.contact)
            .map_err(|err| DatabaseError::Serialization(format!("contact: {err}")))?;
        conn.execute(
            "INSERT INTO enrollments (id, campaign_id, phone, contact, line_kind, enrolled_at, suppressed, suppressed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                e.id.to_string(),
                e.campaign_id.to_string(),
                e.phone(),
                contact,
                e.line_kind.as_str(),
                fmt_ts(e.enrolled_at),
                i64::from(e.suppressed),
                opt_ts(e.suppressed_at),
            ],
        )
        .await
        .map_err(|err| {
            let msg = err.to_string();
            if msg.contains("UNIQUE") {
                DatabaseError::Constraint(format!("duplicate enrollment for {}", e.phone()))
            } else {
                DatabaseError::Query(format!("insert_enrollment: {msg}"))
            }
        })?;
    }

    for d in &plan.deliveries {
        insert_delivery(conn, d).await?;
    }
    Ok(())
}

async fn insert_delivery(conn: &Connection, d: &TouchDelivery) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO touch_deliveries (id, campaign_id, enrollment_id, touch_index, attempt, day_offset, message_template, scheduled_for, state, rendered_body, sent_at, provider_message_id, error, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            d.id.to_string(),
            d.campaign_id.to_string(),
            d.enrollment_id.to_string(),
            i64::from(d.touch_index),
            i64::from(d.attempt),
            i64::from(d.day_offset),
            d.message_template.clone(),
            fmt_ts(d.scheduled_for),
            d.state.as_str(),
            opt_text(d.rendered_body.as_deref()),
            opt_ts(d.sent_at),
            opt_text(d.provider_message_id.as_deref()),
            opt_text(d.error.as_deref()),
            fmt_ts(d.updated_at),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_delivery: {e}")))?;
    Ok(())
}

async fn complete_delivery_tx(
    conn: &Connection,
    delivery_id: Uuid,
    outcome: &TouchOutcome,
    at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let (body, sent_at, provider_id, error, counter) = match outcome {
        TouchOutcome::Sent {
            body,
            provider_message_id,
        } => (
            Some(body.as_str()),
            Some(at),
            provider_message_id.as_deref(),
            None,
            "sent_count",
        ),
        TouchOutcome::Failed { body, error } => {
            (body.as_deref(), None, None, Some(error.as_str()), "failed_count")
        }
        TouchOutcome::SkippedSuppressed | TouchOutcome::SkippedStale => {
            (None, None, None, None, "skipped_count")
        }
    };

    let changed = conn
        .execute(
            "UPDATE touch_deliveries SET state = ?2, rendered_body = ?3, sent_at = ?4, provider_message_id = ?5, error = ?6, updated_at = ?7 WHERE id = ?1 AND state = 'pending'",
            params![
                delivery_id.to_string(),
                outcome.state().as_str(),
                opt_text(body),
                opt_ts(sent_at),
                opt_text(provider_id),
                opt_text(error),
                fmt_ts(at),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("complete_delivery: {e}")))?;

    if changed == 0 {
        return Ok(false);
    }

    conn.execute(
        &format!(
            "UPDATE campaigns SET {counter} = {counter} + 1, last_activity_at = ?2, updated_at = ?2 \
             WHERE id = (SELECT campaign_id FROM touch_deliveries WHERE id = ?1)"
        ),
        params![delivery_id.to_string(), fmt_ts(at)],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("complete_delivery counters: {e}")))?;
    Ok(true)
}

async fn requeue_failed_tx(
    conn: &Connection,
    campaign_id: Uuid,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {DELIVERY_COLUMNS} FROM touch_deliveries d
                 JOIN enrollments e ON e.id = d.enrollment_id
                 WHERE d.campaign_id = ?1 AND d.state = 'failed' AND e.suppressed = 0
                   AND d.attempt = (SELECT MAX(x.attempt) FROM touch_deliveries x
                                    WHERE x.enrollment_id = d.enrollment_id AND x.touch_index = d.touch_index)
                 ORDER BY d.scheduled_for"
            ),
            params![campaign_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("requeue_failed: {e}")))?;

    let mut failed = Vec::new();
    while let Ok(Some(row)) = rows.next().await {
        match row_to_delivery(&row) {
            Ok(d) => failed.push(d),
            Err(e) => tracing::warn!("Skipping malformed delivery row: {e}"),
        }
    }

    for prev in &failed {
        let retry = TouchDelivery {
            id: Uuid::new_v4(),
            attempt: prev.attempt + 1,
            scheduled_for: now,
            state: DeliveryState::Pending,
            rendered_body: None,
            sent_at: None,
            provider_message_id: None,
            error: None,
            updated_at: now,
            ..prev.clone()
        };
        insert_delivery(conn, &retry).await?;
    }

    if !failed.is_empty() {
        conn.execute(
            "UPDATE campaigns SET status = 'active', updated_at = ?2 WHERE id = ?1 AND status = 'completed'",
            params![campaign_id.to_string(), fmt_ts(now)],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("requeue_failed reopen: {e}")))?;
    }
    Ok(failed.len())
}

async fn suppress_tx(conn: &Connection, enrollment_id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
    let changed = conn
        .execute(
            "UPDATE enrollments SET suppressed = 1, suppressed_at = ?2 WHERE id = ?1 AND suppressed = 0",
            params![enrollment_id.to_string(), fmt_ts(at)],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("suppress_enrollment: {e}")))?;
    if changed == 0 {
        return Ok(false);
    }

    conn.execute(
        "UPDATE campaigns SET reply_count = reply_count + 1, last_activity_at = ?2, updated_at = ?2 \
         WHERE id = (SELECT campaign_id FROM enrollments WHERE id = ?1)",
        params![enrollment_id.to_string(), fmt_ts(at)],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("suppress_enrollment counters: {e}")))?;
    Ok(true)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl CampaignStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Campaigns ───────────────────────────────────────────────────

    async fn insert_campaign_plan(&self, plan: &CampaignPlan) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let tx = self.begin("insert_campaign_plan").await?;
        let result = insert_plan(&tx, plan).await;
        finish(tx, "insert_campaign_plan", result).await?;
        debug!(
            campaign_id = %plan.campaign.id,
            enrollments = plan.enrollments.len(),
            deliveries = plan.deliveries.len(),
            "Inserted campaign"
        );
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_campaign: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_campaign(&row).map_err(|e| DatabaseError::Query(format!("get_campaign: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_campaign: {e}"))),
        }
    }

    async fn list_campaigns(&self, filter: &CampaignFilter) -> Result<CampaignPage, DatabaseError> {
        let mut clauses = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        match filter.status {
            Some(status) => {
                values.push(libsql::Value::Text(status.as_str().to_string()));
                clauses.push(format!("status = ?{}", values.len()));
            }
            None => clauses.push("status != 'deleted'".to_string()),
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            values.push(libsql::Value::Text(search.to_string()));
            clauses.push(format!("instr(lower(name), lower(?{})) > 0", values.len()));
        }
        let where_sql = clauses.join(" AND ");

        let mut rows = self
            .conn()
            .query(&format!("SELECT COUNT(*) FROM campaigns WHERE {where_sql}"), values.clone())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_campaigns count: {e}")))?;
        let total = match rows.next().await {
            Ok(Some(row)) => row.get::<i64>(0).unwrap_or(0) as usize,
            _ => 0,
        };

        // SQLite binds signed integers; anything past i64::MAX means "everything".
        values.push(libsql::Value::Integer(i64::try_from(filter.limit).unwrap_or(i64::MAX)));
        values.push(libsql::Value::Integer(i64::try_from(filter.offset).unwrap_or(i64::MAX)));
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE {where_sql} \
             ORDER BY COALESCE(last_activity_at, created_at) DESC, created_at DESC \
             LIMIT ?{} OFFSET ?{}",
            values.len() - 1,
            values.len()
        );
        let mut rows = self
            .conn()
            .query(&sql, values)
            .await
            .map_err(|e| DatabaseError::Query(format!("list_campaigns: {e}")))?;

        let mut campaigns = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_campaign(&row) {
                Ok(c) => campaigns.push(c),
                Err(e) => tracing::warn!("Skipping malformed campaign row: {e}"),
            }
        }

        Ok(CampaignPage {
            has_more: filter.offset.saturating_add(campaigns.len()) < total,
            campaigns,
            total,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    async fn campaign_summary(&self) -> Result<CampaignSummary, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(total_contacts), 0),
                        COALESCE(SUM(sent_count), 0),
                        COALESCE(SUM(reply_count), 0)
                 FROM campaigns WHERE status != 'deleted'",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("campaign_summary: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(CampaignSummary::default()),
            Err(e) => return Err(DatabaseError::Query(format!("campaign_summary: {e}"))),
        };
        let get = |i: i32| row.get::<i64>(i).unwrap_or(0) as u64;

        let total_messages = get(3);
        let total_replies = get(4);
        Ok(CampaignSummary {
            total_campaigns: get(0),
            active_campaigns: get(1),
            total_contacts: get(2),
            total_messages,
            total_replies,
            overall_reply_rate: crate::campaigns::model::percent(total_replies, total_messages),
        })
    }

    async fn transition_campaign(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        if from.is_empty() {
            return Ok(false);
        }
        let mut values = vec![
            libsql::Value::Text(id.to_string()),
            libsql::Value::Text(to.as_str().to_string()),
            libsql::Value::Text(fmt_ts(at)),
        ];
        let placeholders: Vec<String> = from
            .iter()
            .map(|s| {
                values.push(libsql::Value::Text(s.as_str().to_string()));
                format!("?{}", values.len())
            })
            .collect();

        let _gate = self.write_gate.lock().await;
        let changed = self
            .conn()
            .execute(
                &format!(
                    "UPDATE campaigns SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status IN ({})",
                    placeholders.join(", ")
                ),
                values,
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_campaign: {e}")))?;
        Ok(changed > 0)
    }

    async fn complete_if_exhausted(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let changed = self
            .conn()
            .execute(
                "UPDATE campaigns SET status = 'completed', updated_at = ?2
                 WHERE id = ?1 AND status = 'active'
                   AND NOT EXISTS (SELECT 1 FROM touch_deliveries WHERE campaign_id = ?1 AND state = 'pending')",
                params![id.to_string(), fmt_ts(at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_if_exhausted: {e}")))?;
        Ok(changed > 0)
    }

    // ── Enrollments & deliveries ────────────────────────────────────

    async fn list_enrollments(&self, campaign_id: Uuid) -> Result<Vec<Enrollment>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ENROLLMENT_COLUMNS} FROM enrollments e WHERE e.campaign_id = ?1 ORDER BY e.enrolled_at, e.phone"
                ),
                params![campaign_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_enrollments: {e}")))?;

        let mut enrollments = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_enrollment(&row) {
                Ok(e) => enrollments.push(e),
                Err(e) => tracing::warn!("Skipping malformed enrollment row: {e}"),
            }
        }
        Ok(enrollments)
    }

    async fn list_deliveries(&self, campaign_id: Uuid) -> Result<Vec<TouchDelivery>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DELIVERY_COLUMNS} FROM touch_deliveries d WHERE d.campaign_id = ?1 \
                     ORDER BY d.enrollment_id, d.touch_index, d.attempt"
                ),
                params![campaign_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_deliveries: {e}")))?;

        let mut deliveries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_delivery(&row) {
                Ok(d) => deliveries.push(d),
                Err(e) => tracing::warn!("Skipping malformed delivery row: {e}"),
            }
        }
        Ok(deliveries)
    }

    async fn due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT d.campaign_id FROM touch_deliveries d
                 JOIN campaigns c ON c.id = d.campaign_id
                 WHERE d.state = 'pending' AND d.scheduled_for <= ?1 AND c.status = 'active'
                 GROUP BY d.campaign_id
                 ORDER BY MIN(d.scheduled_for)",
                params![fmt_ts(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("due_campaigns: {e}")))?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(id) = row.get::<String>(0) {
                ids.push(parse_uuid(&id));
            }
        }
        Ok(ids)
    }

    async fn due_deliveries(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueTouch>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DELIVERY_COLUMNS}, e.contact, e.phone FROM touch_deliveries d
                     JOIN enrollments e ON e.id = d.enrollment_id
                     JOIN campaigns c ON c.id = d.campaign_id
                     WHERE d.campaign_id = ?1 AND d.state = 'pending' AND d.scheduled_for <= ?2
                       AND c.status = 'active'
                     ORDER BY d.scheduled_for, d.touch_index
                     LIMIT ?3"
                ),
                params![campaign_id.to_string(), fmt_ts(now), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("due_deliveries: {e}")))?;

        let mut due = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let delivery = match row_to_delivery(&row) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Skipping malformed delivery row: {e}");
                    continue;
                }
            };
            let phone: String = row.get(15).unwrap_or_default();
            let contact = row
                .get::<String>(14)
                .ok()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_else(|| ContactRecord::new(phone));
            due.push(DueTouch { delivery, contact });
        }
        Ok(due)
    }

    async fn dispatch_gate(&self, delivery_id: Uuid) -> Result<Option<DispatchGate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT c.status, e.suppressed, d.state FROM touch_deliveries d
                 JOIN enrollments e ON e.id = d.enrollment_id
                 JOIN campaigns c ON c.id = d.campaign_id
                 WHERE d.id = ?1",
                params![delivery_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("dispatch_gate: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("dispatch_gate: {e}"))),
        };
        let status: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("dispatch_gate: {e}")))?;
        let state: String = row
            .get(2)
            .map_err(|e| DatabaseError::Query(format!("dispatch_gate: {e}")))?;

        Ok(Some(DispatchGate {
            campaign_status: status.parse().unwrap_or(CampaignStatus::Paused),
            suppressed: row.get::<i64>(1).unwrap_or(1) != 0,
            state: state.parse().unwrap_or(DeliveryState::Failed),
        }))
    }

    async fn complete_delivery(
        &self,
        delivery_id: Uuid,
        outcome: &TouchOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let tx = self.begin("complete_delivery").await?;
        let result = complete_delivery_tx(&tx, delivery_id, outcome, at).await;
        finish(tx, "complete_delivery", result).await
    }

    async fn requeue_failed(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let tx = self.begin("requeue_failed").await?;
        let result = requeue_failed_tx(&tx, campaign_id, now).await;
        finish(tx, "requeue_failed", result).await
    }

    async fn touch_stats(&self, campaign_id: Uuid) -> Result<Vec<TouchStats>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT touch_index, day_offset, state, COUNT(*) FROM touch_deliveries
                 WHERE campaign_id = ?1
                 GROUP BY touch_index, day_offset, state
                 ORDER BY touch_index",
                params![campaign_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch_stats: {e}")))?;

        let mut stats: Vec<TouchStats> = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let (Ok(index), Ok(offset), Ok(state), Ok(count)) = (
                row.get::<i64>(0),
                row.get::<i64>(1),
                row.get::<String>(2),
                row.get::<i64>(3),
            ) else {
                tracing::warn!("Skipping malformed touch stats row");
                continue;
            };

            let index = index as u32;
            let pos = match stats.iter().position(|s| s.touch_index == index) {
                Some(pos) => pos,
                None => {
                    stats.push(TouchStats {
                        touch_index: index,
                        day_offset: offset as u32,
                        ..Default::default()
                    });
                    stats.len() - 1
                }
            };
            let entry = &mut stats[pos];
            let count = count as u64;
            match state.parse() {
                Ok(DeliveryState::Pending) => entry.pending += count,
                Ok(DeliveryState::Sent) => entry.sent += count,
                Ok(DeliveryState::Failed) => entry.failed += count,
                Ok(DeliveryState::SkippedSuppressed | DeliveryState::SkippedStale) => entry.skipped += count,
                Err(e) => tracing::warn!("touch_stats: {e}"),
            }
        }
        Ok(stats)
    }

    async fn next_scheduled(&self, campaign_id: Uuid) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT MIN(scheduled_for) FROM touch_deliveries WHERE campaign_id = ?1 AND state = 'pending'",
                params![campaign_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("next_scheduled: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok().map(|s| parse_datetime(&s))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("next_scheduled: {e}"))),
        }
    }

    // ── Replies ─────────────────────────────────────────────────────

    async fn enrollments_for_phone(
        &self,
        phone: &str,
        campaign_id: Option<Uuid>,
    ) -> Result<Vec<Enrollment>, DatabaseError> {
        let scope = opt_text(campaign_id.map(|id| id.to_string()).as_deref());
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ENROLLMENT_COLUMNS} FROM enrollments e
                     JOIN campaigns c ON c.id = e.campaign_id
                     WHERE e.phone = ?1 AND c.status != 'deleted'
                       AND (?2 IS NULL OR e.campaign_id = ?2)
                     ORDER BY e.enrolled_at DESC"
                ),
                params![phone, scope],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("enrollments_for_phone: {e}")))?;

        let mut enrollments = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_enrollment(&row) {
                Ok(e) => enrollments.push(e),
                Err(e) => tracing::warn!("Skipping malformed enrollment row: {e}"),
            }
        }
        Ok(enrollments)
    }

    async fn suppress_enrollment(&self, enrollment_id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let tx = self.begin("suppress_enrollment").await?;
        let result = suppress_tx(&tx, enrollment_id, at).await;
        finish(tx, "suppress_enrollment", result).await
    }

    async fn record_inbound(&self, reply: &InboundReplyRecord) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        self.conn()
            .execute(
                "INSERT INTO inbound_replies (id, from_phone, body, received_at, campaign_id, enrollment_id, outcome) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    reply.id.to_string(),
                    reply.from_phone.clone(),
                    reply.body.clone(),
                    fmt_ts(reply.received_at),
                    opt_text(reply.campaign_id.map(|id| id.to_string()).as_deref()),
                    opt_text(reply.enrollment_id.map(|id| id.to_string()).as_deref()),
                    reply.outcome.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_inbound: {e}")))?;
        Ok(())
    }

    async fn inbound_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<InboundReplyRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, from_phone, body, received_at, campaign_id, enrollment_id, outcome
                 FROM inbound_replies WHERE campaign_id = ?1 ORDER BY received_at",
                params![campaign_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("inbound_for_campaign: {e}")))?;

        let mut replies = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_inbound(&row) {
                Ok(r) => replies.push(r),
                Err(e) => tracing::warn!("Skipping malformed inbound row: {e}"),
            }
        }
        Ok(replies)
    }
}
