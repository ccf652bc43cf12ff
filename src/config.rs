//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::contacts::phone::LineKind;
use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub dispatch: DispatchConfig,
    pub intake: IntakeConfig,
    pub templates: TemplateConfig,
    pub enrollment: EnrollmentPolicy,
}

/// What to do with touches that became due long before the run that finds them
/// (typically after a long pause).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverduePolicy {
    /// Send on the next run regardless of how late it is.
    SendImmediately,
    /// Mark touches older than the window as `skipped_stale` instead of sending.
    SkipOlderThan(Duration),
}

/// Batch dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum sends per `run_due_batch` invocation across all campaigns.
    pub batch_limit: usize,
    /// Per-call gateway timeout. A timeout is recorded as `failed`.
    pub send_timeout: Duration,
    /// Pause between consecutive sends within one campaign.
    pub send_spacing: Duration,
    /// Cron expression for the background ticker.
    pub schedule: String,
    pub overdue: OverduePolicy,
    /// Estimated provider cost per sent message, for campaign stats.
    pub cost_per_message: Decimal,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            send_timeout: Duration::from_secs(15),
            send_spacing: Duration::ZERO,
            schedule: "0 */5 * * * *".to_string(), // every 5 minutes
            overdue: OverduePolicy::SendImmediately,
            cost_per_message: dec!(0.05),
        }
    }
}

/// Contact intake thresholds.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// A sheet is invalid when more than this fraction of rows fail classification.
    pub max_invalid_fraction: f64,
    /// A sheet is not campaign-ready at or above this duplicate fraction.
    pub max_duplicate_fraction: f64,
    /// Minimum share of rows that must carry a column before it is offered as a variable.
    pub variable_coverage: f64,
    /// Cap on per-row findings listed in the warnings.
    pub max_row_findings: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_invalid_fraction: 0.5,
            max_duplicate_fraction: 0.25,
            variable_coverage: 0.1,
            max_row_findings: 50,
        }
    }
}

/// Template rendering settings.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Substituted for `{name}` when the contact has none.
    pub name_fallback: String,
    /// Offset applied to `{date}`/`{time}` rendering.
    pub utc_offset: FixedOffset,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            name_fallback: "there".to_string(),
            utc_offset: Utc.fix(),
        }
    }
}

/// Which line kinds may be enrolled (and survive intake `fix`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrollmentPolicy {
    pub allow_landline: bool,
    pub allow_voip: bool,
    pub allow_unknown: bool,
}

impl EnrollmentPolicy {
    pub fn is_eligible(&self, kind: LineKind) -> bool {
        match kind {
            LineKind::Mobile => true,
            LineKind::Landline => self.allow_landline,
            LineKind::Voip => self.allow_voip,
            LineKind::Unknown => self.allow_unknown,
        }
    }
}

impl EngineConfig {
    /// Build from `DRIP_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let d = &mut config.dispatch;
        d.batch_limit = env_or("DRIP_BATCH_LIMIT", d.batch_limit)?;
        d.send_timeout = Duration::from_secs(env_or(
            "DRIP_SEND_TIMEOUT_SECS",
            d.send_timeout.as_secs(),
        )?);
        d.send_spacing = Duration::from_millis(env_or(
            "DRIP_SEND_SPACING_MS",
            d.send_spacing.as_millis() as u64,
        )?);
        if let Ok(schedule) = std::env::var("DRIP_DISPATCH_SCHEDULE") {
            cron::Schedule::from_str(&schedule).map_err(|e| ConfigError::InvalidValue {
                key: "DRIP_DISPATCH_SCHEDULE".into(),
                message: e.to_string(),
            })?;
            d.schedule = schedule;
        }
        let stale_hours: u64 = env_or("DRIP_STALE_AFTER_HOURS", 0)?;
        if stale_hours > 0 {
            d.overdue = OverduePolicy::SkipOlderThan(Duration::from_secs(stale_hours * 3600));
        }
        d.cost_per_message = env_or("DRIP_COST_PER_MESSAGE", d.cost_per_message)?;

        let i = &mut config.intake;
        i.max_invalid_fraction = env_or("DRIP_MAX_INVALID_FRACTION", i.max_invalid_fraction)?;
        i.max_duplicate_fraction =
            env_or("DRIP_MAX_DUPLICATE_FRACTION", i.max_duplicate_fraction)?;

        let t = &mut config.templates;
        if let Ok(fallback) = std::env::var("DRIP_NAME_FALLBACK") {
            t.name_fallback = fallback;
        }
        let offset_minutes: i32 = env_or("DRIP_UTC_OFFSET_MINUTES", 0)?;
        t.utc_offset =
            FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| ConfigError::InvalidValue {
                key: "DRIP_UTC_OFFSET_MINUTES".into(),
                message: format!("{offset_minutes} is out of range"),
            })?;

        let e = &mut config.enrollment;
        e.allow_landline = env_or("DRIP_ALLOW_LANDLINE", e.allow_landline)?;
        e.allow_voip = env_or("DRIP_ALLOW_VOIP", e.allow_voip)?;
        e.allow_unknown = env_or("DRIP_ALLOW_UNKNOWN", e.allow_unknown)?;

        Ok(config)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
