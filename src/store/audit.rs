//! Append-only moderation audit log on libSQL.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::delivery::JobStatus;
use crate::error::DatabaseError;
use crate::moderation::consensus::{FinalDecision, Vote};
use crate::moderation::result::ModerationResult;
use crate::moderation::types::{RouteType, StageVerdict};
use crate::store::migrations;

/// One moderation attempt as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationRecord {
    pub id: Uuid,
    pub template_id: String,
    pub author_id: String,
    pub route: RouteType,
    pub approved: bool,
    pub final_decision: FinalDecision,
    pub reasoning: Vec<String>,
    pub votes: Vec<Vote>,
    /// Full stage detail including raw model text.
    pub verdicts: Vec<StageVerdict>,
    pub cancelled: bool,
    pub job_id: Option<String>,
    pub job_status: Option<JobStatus>,
    /// Estimated classifier spend for this attempt.
    pub cost_usd: Decimal,
    pub created_at: DateTime<Utc>,
}

impl ModerationRecord {
    pub fn new(author_id: &str, result: &ModerationResult, verdicts: &[StageVerdict]) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id: result.template_id.clone(),
            author_id: author_id.to_string(),
            route: result.route,
            approved: result.approved,
            final_decision: result.final_decision,
            reasoning: result.reasoning.clone(),
            votes: result.votes.clone(),
            verdicts: verdicts.to_vec(),
            cancelled: result.cancelled,
            job_id: result.submission.job_id.clone(),
            job_status: result.submission.status,
            cost_usd: verdicts.iter().map(|v| v.usage.cost_usd).sum(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, record: &ModerationRecord) -> Result<(), DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<ModerationRecord>, DatabaseError>;

    /// Newest first.
    async fn recent_for_template(
        &self,
        template_id: &str,
        limit: usize,
    ) -> Result<Vec<ModerationRecord>, DatabaseError>;

    /// Refresh the stored status of a delivery job after a re-poll.
    async fn update_job_status(&self, job_id: &str, status: JobStatus)
    -> Result<(), DatabaseError>;
}

/// libSQL-backed audit log.
///
/// Holds one connection reused for all operations.
pub struct LibSqlAuditLog {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlAuditLog {
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

        let log = Self::from_database(db).await?;
        info!(path = %path.display(), "Audit database opened");
        Ok(log)
    }

    /// In-memory database (tests and ephemeral runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

// ── Helper functions ────────────────────────────────────────────────

const RECORD_COLUMNS: &str = "id, template_id, author_id, route, approved, final_decision, \
     reasoning, votes, verdicts, cancelled, job_id, job_status, cost_usd, created_at";

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Unit enums are stored as their bare serde name.
fn enum_to_str<T: Serialize>(value: &T) -> Result<String, DatabaseError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(DatabaseError::Serialization(format!(
            "expected string enum, got {other}"
        ))),
        Err(e) => Err(DatabaseError::Serialization(e.to_string())),
    }
}

fn enum_from_str<T: DeserializeOwned>(raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| DatabaseError::Serialization(format!("'{raw}': {e}")))
}

fn nullable_text(value: Option<String>) -> libsql::Value {
    match value {
        Some(text) => libsql::Value::Text(text),
        None => libsql::Value::Null,
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("created_at '{s}': {e}")))
}

fn row_to_record(row: &libsql::Row) -> Result<ModerationRecord, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let id: String = row.get(0).map_err(col)?;
    let route: String = row.get(3).map_err(col)?;
    let final_decision: String = row.get(5).map_err(col)?;
    let reasoning: String = row.get(6).map_err(col)?;
    let votes: String = row.get(7).map_err(col)?;
    let verdicts: String = row.get(8).map_err(col)?;
    let job_status: Option<String> = row.get::<String>(11).ok();
    let cost: String = row.get(12).map_err(col)?;
    let created_at: String = row.get(13).map_err(col)?;

    Ok(ModerationRecord {
        id: Uuid::parse_str(&id).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        template_id: row.get(1).map_err(col)?,
        author_id: row.get(2).map_err(col)?,
        route: enum_from_str(&route)?,
        approved: row.get::<i64>(4).map_err(col)? != 0,
        final_decision: enum_from_str(&final_decision)?,
        reasoning: from_json(&reasoning)?,
        votes: from_json(&votes)?,
        verdicts: from_json(&verdicts)?,
        cancelled: row.get::<i64>(9).map_err(col)? != 0,
        job_id: row.get::<String>(10).ok(),
        job_status: job_status.as_deref().map(enum_from_str).transpose()?,
        cost_usd: cost
            .parse::<Decimal>()
            .map_err(|e| DatabaseError::Serialization(format!("cost_usd '{cost}': {e}")))?,
        created_at: parse_datetime(&created_at)?,
    })
}

#[async_trait]
impl AuditLog for LibSqlAuditLog {
    async fn record(&self, record: &ModerationRecord) -> Result<(), DatabaseError> {
        let job_id = nullable_text(record.job_id.clone());
        let job_status = nullable_text(record.job_status.as_ref().map(enum_to_str).transpose()?);
        self.conn
            .execute(
                &format!(
                    "INSERT INTO moderation_records ({RECORD_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    record.id.to_string(),
                    record.template_id.clone(),
                    record.author_id.clone(),
                    enum_to_str(&record.route)?,
                    record.approved as i64,
                    enum_to_str(&record.final_decision)?,
                    to_json(&record.reasoning)?,
                    to_json(&record.votes)?,
                    to_json(&record.verdicts)?,
                    record.cancelled as i64,
                    job_id,
                    job_status,
                    record.cost_usd.to_string(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record: {e}")))?;

        debug!(record_id = %record.id, template_id = %record.template_id, "Moderation recorded");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ModerationRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM moderation_records WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get: {e}"))),
        }
    }

    async fn recent_for_template(
        &self,
        template_id: &str,
        limit: usize,
    ) -> Result<Vec<ModerationRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM moderation_records \
                     WHERE template_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ),
                params![template_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_for_template: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_for_template: {e}")))?
        {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
    ) -> Result<(), DatabaseError> {
        // Only rows whose stored status may move to `status` are touched.
        let predecessors: Vec<String> = JobStatus::ALL
            .iter()
            .filter(|stored| stored.can_refresh_to(status))
            .map(|stored| format!("'{}'", stored.as_str()))
            .collect();
        let guard = if predecessors.is_empty() {
            "job_status IS NULL".to_string()
        } else {
            format!("(job_status IS NULL OR job_status IN ({}))", predecessors.join(", "))
        };

        let changed = self
            .conn
            .execute(
                &format!("UPDATE moderation_records SET job_status = ?1 WHERE job_id = ?2 AND {guard}"),
                params![enum_to_str(&status)?, job_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_job_status: {e}")))?;

        if changed == 0 {
            debug!(job_id, status = %status, "Audited job status left unchanged");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::moderation::consensus::ConsensusDecision;
    use crate::moderation::normalizer::ContentFingerprint;
    use crate::moderation::result::{SubmissionOutcome, format_result};
    use crate::moderation::stages::{SafetyStage, parse_response};
    use crate::moderation::types::StageUsage;

    fn blocked_record(template_id: &str) -> ModerationRecord {
        let verdict = parse_response::<SafetyStage>(
            r#"{"threat_level": 9, "violation_type": "threats", "safety_status": "BLOCK", "confidence": 0.97}"#,
        )
        .with_usage(StageUsage {
            model: "gpt-4o-mini".into(),
            input_tokens: 1000,
            output_tokens: 100,
            cost_usd: dec!(0.0002),
            latency_ms: 300,
        });
        let verdicts = vec![verdict];
        let decision = ConsensusDecision::aggregate(&verdicts);
        let result = format_result(
            template_id,
            RouteType::DirectOutreach,
            &ContentFingerprint::analyze("I will find you."),
            &decision,
            &SubmissionOutcome::NotAttempted,
        );
        ModerationRecord::new("author-1", &result, &verdicts)
    }

    #[tokio::test]
    async fn record_and_read_back() {
        let log = LibSqlAuditLog::new_memory().await.unwrap();
        let record = blocked_record("tpl-1");
        log.record(&record).await.unwrap();

        let loaded = log.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.template_id, "tpl-1");
        assert_eq!(loaded.route, RouteType::DirectOutreach);
        assert!(!loaded.approved);
        assert_eq!(loaded.final_decision, FinalDecision::Block);
        assert_eq!(loaded.verdicts, record.verdicts);
        assert_eq!(loaded.votes, record.votes);
        assert_eq!(loaded.cost_usd, dec!(0.0002));
        assert!(loaded.job_id.is_none());
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let log = LibSqlAuditLog::new_memory().await.unwrap();
        assert!(log.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_for_template_filters_and_limits() {
        let log = LibSqlAuditLog::new_memory().await.unwrap();
        for _ in 0..3 {
            log.record(&blocked_record("tpl-a")).await.unwrap();
        }
        log.record(&blocked_record("tpl-b")).await.unwrap();

        assert_eq!(log.recent_for_template("tpl-a", 10).await.unwrap().len(), 3);
        assert_eq!(log.recent_for_template("tpl-a", 2).await.unwrap().len(), 2);
        assert_eq!(log.recent_for_template("tpl-b", 10).await.unwrap().len(), 1);
        assert!(log.recent_for_template("tpl-c", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_status_update() {
        let log = LibSqlAuditLog::new_memory().await.unwrap();
        let mut record = blocked_record("tpl-1");
        record.job_id = Some("job-9".into());
        record.job_status = Some(JobStatus::TimedOut);
        log.record(&record).await.unwrap();

        log.update_job_status("job-9", JobStatus::Completed).await.unwrap();
        let loaded = log.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.job_status, Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn job_status_update_never_regresses() {
        let log = LibSqlAuditLog::new_memory().await.unwrap();
        let mut record = blocked_record("tpl-1");
        record.job_id = Some("job-10".into());
        record.job_status = Some(JobStatus::Processing);
        log.record(&record).await.unwrap();

        log.update_job_status("job-10", JobStatus::Completed).await.unwrap();
        log.update_job_status("job-10", JobStatus::Queued).await.unwrap();
        log.update_job_status("job-10", JobStatus::Processing).await.unwrap();

        let loaded = log.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.job_status, Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn corrupt_rows_are_errors_not_defaults() {
        let log = LibSqlAuditLog::new_memory().await.unwrap();
        let record = blocked_record("tpl-bad");
        log.record(&record).await.unwrap();

        log.conn
            .execute(
                "UPDATE moderation_records SET created_at = 'yesterday' WHERE id = ?1",
                params![record.id.to_string()],
            )
            .await
            .unwrap();
        assert!(matches!(
            log.get(record.id).await,
            Err(DatabaseError::Serialization(_))
        ));
        assert!(matches!(
            log.recent_for_template("tpl-bad", 10).await,
            Err(DatabaseError::Serialization(_))
        ));

        log.conn
            .execute(
                "UPDATE moderation_records SET created_at = ?1, cost_usd = 'free' WHERE id = ?2",
                params![record.created_at.to_rfc3339(), record.id.to_string()],
            )
            .await
            .unwrap();
        let err = log.get(record.id).await.unwrap_err();
        assert!(err.to_string().contains("cost_usd"));
    }

    #[tokio::test]
    async fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.db");
        let record = blocked_record("tpl-1");
        {
            let log = LibSqlAuditLog::new_local(&path).await.unwrap();
            log.record(&record).await.unwrap();
        }
        let reopened = LibSqlAuditLog::new_local(&path).await.unwrap();
        assert!(reopened.get(record.id).await.unwrap().is_some());
    }
}
