//! Funnel, cost and revenue accounting plus the reports built from it.
//!
//! Recording is best-effort: failures are logged and never interrupt the user flow.
//! Payments are the exception and live in [`insert_payment`], which callers run inside
//! the same transaction that credits the balance.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::metrics;
use crate::storage::{get_connection, DbPool};

/// Steps of the onboarding/generation funnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunnelStep {
    Start,
    ModelUploaded,
    OutfitUploaded,
    GenerationRequested,
    GenerationCompleted,
}

impl FunnelStep {
    pub const ALL: [FunnelStep; 5] = [
        FunnelStep::Start,
        FunnelStep::ModelUploaded,
        FunnelStep::OutfitUploaded,
        FunnelStep::GenerationRequested,
        FunnelStep::GenerationCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelStep::Start => "start",
            FunnelStep::ModelUploaded => "model_uploaded",
            FunnelStep::OutfitUploaded => "outfit_uploaded",
            FunnelStep::GenerationRequested => "generation_requested",
            FunnelStep::GenerationCompleted => "generation_completed",
        }
    }
}

/// Billable vendor call kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCallKind {
    Vision,
    Text,
    ImageGeneration,
}

impl ApiCallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiCallKind::Vision => "vision",
            ApiCallKind::Text => "text",
            ApiCallKind::ImageGeneration => "image_generation",
        }
    }

    pub fn cost_usd(&self) -> f64 {
        match self {
            ApiCallKind::Vision => config::analytics::VISION_CALL_USD,
            ApiCallKind::Text => config::analytics::TEXT_CALL_USD,
            ApiCallKind::ImageGeneration => config::analytics::IMAGE_GEN_USD,
        }
    }
}

/// Date range selector for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFilter {
    Today,
    Yesterday,
    #[default]
    Last7Days,
    Last30Days,
    Last90Days,
    All,
}

impl DateFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateFilter::Today => "today",
            DateFilter::Yesterday => "yesterday",
            DateFilter::Last7Days => "7d",
            DateFilter::Last30Days => "30d",
            DateFilter::Last90Days => "90d",
            DateFilter::All => "all",
        }
    }

    /// Inclusive start day and exclusive end day, `None` meaning unbounded
    pub fn bounds(&self, today: NaiveDate) -> (Option<NaiveDate>, Option<NaiveDate>) {
        let tomorrow = today + Duration::days(1);
        match self {
            DateFilter::Today => (Some(today), Some(tomorrow)),
            DateFilter::Yesterday => (Some(today - Duration::days(1)), Some(today)),
            DateFilter::Last7Days => (Some(today - Duration::days(6)), Some(tomorrow)),
            DateFilter::Last30Days => (Some(today - Duration::days(29)), Some(tomorrow)),
            DateFilter::Last90Days => (Some(today - Duration::days(89)), Some(tomorrow)),
            DateFilter::All => (None, None),
        }
    }
}

impl FromStr for DateFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(DateFilter::Today),
            "yesterday" => Ok(DateFilter::Yesterday),
            "7d" => Ok(DateFilter::Last7Days),
            "30d" => Ok(DateFilter::Last30Days),
            "90d" => Ok(DateFilter::Last90Days),
            "all" => Ok(DateFilter::All),
            other => Err(format!("Unknown filter: {}", other)),
        }
    }
}

/// One generation attempt, appended once it has settled
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub chat_id: i64,
    pub item_count: usize,
    pub prompt: Option<String>,
    pub cost_credits: i64,
    pub success: bool,
    pub error_kind: Option<String>,
    pub refunded: i64,
    pub result_ref: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub refunded_credits: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStats {
    pub attempts: i64,
    pub success: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    pub day: String,
    pub active_users: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub filter: String,
    pub new_users: i64,
    pub active_users: i64,
    pub average_dau: f64,
    pub funnel: BTreeMap<String, i64>,
    pub generations: GenerationStats,
    pub validations: ValidationStats,
    pub api_cost_usd: f64,
    pub purchased_credits: i64,
    /// Revenue in minor currency units
    pub revenue: i64,
    pub errors: BTreeMap<String, i64>,
    pub daily_active: Vec<DailyPoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub joined_at: String,
    pub last_active_at: String,
    pub credits: Option<i64>,
    pub generated_images: i64,
    pub purchased_credits: i64,
    pub total_paid: i64,
    pub api_cost_usd: f64,
}

/// Inserts a payment row; false when this charge was already recorded.
pub fn insert_payment(
    conn: &Connection,
    chat_id: i64,
    package_id: &str,
    credits: i64,
    amount: i64,
    currency: &str,
    charge_id: &str,
) -> AppResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO payments (chat_id, package_id, credits, amount, currency, charge_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![chat_id, package_id, credits, amount, currency, charge_id],
    )?;
    Ok(inserted == 1)
}

fn day_start(day: Option<NaiveDate>) -> Option<String> {
    day.map(|d| format!("{} 00:00:00", d.format("%Y-%m-%d")))
}

fn day_key(day: Option<NaiveDate>) -> Option<String> {
    day.map(|d| d.format("%Y-%m-%d").to_string())
}

/// Analytics recorder and report builder
#[derive(Clone)]
pub struct Analytics {
    pool: Arc<DbPool>,
}

impl Analytics {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    fn write(&self, what: &str, f: impl FnOnce(&Connection) -> rusqlite::Result<usize>) {
        let result = get_connection(&self.pool)
            .map_err(|e| e.to_string())
            .and_then(|conn| f(&conn).map_err(|e| e.to_string()));
        if let Err(e) = result {
            log::error!("Failed to record {}: {}", what, e);
        }
    }

    pub fn record_funnel(&self, chat_id: i64, step: FunnelStep) {
        metrics::FUNNEL_STEPS_TOTAL.with_label_values(&[step.as_str()]).inc();
        self.write("funnel step", |conn| {
            conn.execute(
                "INSERT INTO funnel_events (chat_id, step) VALUES (?1, ?2)",
                params![chat_id, step.as_str()],
            )
        });
    }

    pub fn record_validation(&self, chat_id: i64, success: bool, reason: Option<&str>) {
        self.write("model validation", |conn| {
            conn.execute(
                "INSERT INTO model_validations (chat_id, success, reason) VALUES (?1, ?2, ?3)",
                params![chat_id, success, reason],
            )
        });
    }

    pub fn record_api_call(&self, chat_id: i64, kind: ApiCallKind) {
        self.write("api call", |conn| {
            conn.execute(
                "INSERT INTO api_calls (chat_id, kind, cost_usd) VALUES (?1, ?2, ?3)",
                params![chat_id, kind.as_str(), kind.cost_usd()],
            )
        });
    }

    pub fn record_generation(&self, record: &GenerationRecord) {
        self.write("generation attempt", |conn| {
            conn.execute(
                "INSERT INTO generation_attempts
                     (chat_id, item_count, prompt, cost_credits, success, error_kind, refunded, result_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.chat_id,
                    record.item_count as i64,
                    record.prompt,
                    record.cost_credits,
                    record.success,
                    record.error_kind,
                    record.refunded,
                    record.result_ref,
                ],
            )
        });
    }

    pub fn record_error(&self, chat_id: Option<i64>, kind: &str) {
        self.write("error event", |conn| {
            conn.execute(
                "INSERT INTO error_events (chat_id, kind) VALUES (?1, ?2)",
                params![chat_id, kind],
            )
        });
    }

    /// Marks the chat as active today (DAU)
    pub fn touch_activity(&self, chat_id: i64) {
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        self.write("activity", |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_activity (chat_id, day) VALUES (?1, ?2)",
                params![chat_id, today],
            )
        });
    }

    pub fn report(&self, filter: DateFilter) -> AppResult<AnalyticsReport> {
        self.report_at(filter, Utc::now().date_naive())
    }

    /// Builds the report as seen on `today`
    pub fn report_at(&self, filter: DateFilter, today: NaiveDate) -> AppResult<AnalyticsReport> {
        let conn = get_connection(&self.pool)?;
        let (from, to) = filter.bounds(today);
        let (ts_from, ts_to) = (day_start(from), day_start(to));
        let (day_from, day_to) = (day_key(from), day_key(to));

        let range = "(?1 IS NULL OR created_at >= ?1) AND (?2 IS NULL OR created_at < ?2)";
        let count = |sql: &str| -> rusqlite::Result<i64> {
            conn.query_row(sql, params![ts_from, ts_to], |row| row.get(0))
        };

        let new_users = count(&format!("SELECT COUNT(*) FROM sessions WHERE {}", range))?;

        let mut funnel = BTreeMap::new();
        for step in FunnelStep::ALL {
            let n: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(DISTINCT chat_id) FROM funnel_events WHERE step = ?3 AND {}",
                    range
                ),
                params![ts_from, ts_to, step.as_str()],
                |row| row.get(0),
            )?;
            funnel.insert(step.as_str().to_string(), n);
        }

        let generations = conn.query_row(
            &format!(
                "SELECT COUNT(*), COALESCE(SUM(success), 0), COALESCE(SUM(refunded), 0)
                 FROM generation_attempts WHERE {}",
                range
            ),
            params![ts_from, ts_to],
            |row| {
                let total: i64 = row.get(0)?;
                let success: i64 = row.get(1)?;
                Ok(GenerationStats {
                    total,
                    success,
                    failed: total - success,
                    refunded_credits: row.get(2)?,
                })
            },
        )?;

        let validations = conn.query_row(
            &format!(
                "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM model_validations WHERE {}",
                range
            ),
            params![ts_from, ts_to],
            |row| {
                Ok(ValidationStats {
                    attempts: row.get(0)?,
                    success: row.get(1)?,
                })
            },
        )?;

        let api_cost_usd: f64 = conn.query_row(
            &format!("SELECT COALESCE(SUM(cost_usd), 0.0) FROM api_calls WHERE {}", range),
            params![ts_from, ts_to],
            |row| row.get(0),
        )?;

        let (purchased_credits, revenue): (i64, i64) = conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(credits), 0), COALESCE(SUM(amount), 0) FROM payments WHERE {}",
                range
            ),
            params![ts_from, ts_to],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut errors = BTreeMap::new();
        {
            let mut stmt = conn.prepare(&format!(
                "SELECT kind, COUNT(*) FROM error_events WHERE {} GROUP BY kind",
                range
            ))?;
            let rows = stmt.query_map(params![ts_from, ts_to], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (kind, n) = row?;
                errors.insert(kind, n);
            }
        }

        let day_range = "(?1 IS NULL OR day >= ?1) AND (?2 IS NULL OR day < ?2)";
        let active_users: i64 = conn.query_row(
            &format!("SELECT COUNT(DISTINCT chat_id) FROM user_activity WHERE {}", day_range),
            params![day_from, day_to],
            |row| row.get(0),
        )?;
        let daily_active = {
            let mut stmt = conn.prepare(&format!(
                "SELECT day, COUNT(*) FROM user_activity WHERE {} GROUP BY day ORDER BY day",
                day_range
            ))?;
            let rows = stmt
                .query_map(params![day_from, day_to], |row| {
                    Ok(DailyPoint {
                        day: row.get(0)?,
                        active_users: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        let average_dau = if daily_active.is_empty() {
            0.0
        } else {
            daily_active.iter().map(|d| d.active_users as f64).sum::<f64>() / daily_active.len() as f64
        };

        Ok(AnalyticsReport {
            filter: filter.as_str().to_string(),
            new_users,
            active_users,
            average_dau,
            funnel,
            generations,
            validations,
            api_cost_usd,
            purchased_credits,
            revenue,
            errors,
            daily_active,
        })
    }

    pub fn profiles(&self) -> AppResult<Vec<UserProfile>> {
        let conn = get_connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT s.chat_id, s.username, s.first_name, s.created_at, s.last_active_at, s.credits,
                    (SELECT COUNT(*) FROM generation_attempts g WHERE g.chat_id = s.chat_id AND g.success = 1),
                    (SELECT COALESCE(SUM(p.credits), 0) FROM payments p WHERE p.chat_id = s.chat_id),
                    (SELECT COALESCE(SUM(p.amount), 0) FROM payments p WHERE p.chat_id = s.chat_id),
                    (SELECT COALESCE(SUM(a.cost_usd), 0.0) FROM api_calls a WHERE a.chat_id = s.chat_id)
             FROM sessions s
             ORDER BY s.last_active_at DESC",
        )?;
        let profiles = stmt
            .query_map([], |row| {
                Ok(UserProfile {
                    chat_id: row.get(0)?,
                    username: row.get(1)?,
                    first_name: row.get(2)?,
                    joined_at: row.get(3)?,
                    last_active_at: row.get(4)?,
                    credits: row.get::<_, Option<i64>>(5).ok().flatten(),
                    generated_images: row.get(6)?,
                    purchased_credits: row.get(7)?,
                    total_paid: row.get(8)?,
                    api_cost_usd: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(profiles)
    }
}
