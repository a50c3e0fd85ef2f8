//! Postgres-backed registry.
//!
//! Runtime queries against a `documents` table; workflow steps and the
//! history log are JSONB columns, the rest is plain columns. A unique
//! index on `doc_number` backs the duplicate check, so the count-based
//! number race can only ever surface as `DuplicateNumber`, never as two
//! letters sharing a number.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{
    ApprovalStep, Document, DocumentRegistry, DocumentStatus, HistoryEntry, LetterType,
    NewDocument, RegistryError,
};

const COLUMNS: &str = "doc_id, doc_number, doc_type, status, payload, steps, history, \
                       created_by, file_path, created_at, updated_at, version";

pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Role lookup against the `users` table. The earliest-created holder of
/// a role is treated as its current occupant.
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl crate::workflow::RoleDirectory for PgDirectory {
    async fn find_by_role(&self, role: super::Role) -> Option<super::ActorRef> {
        let row = sqlx::query(
            "SELECT user_id, name FROM users WHERE role = $1 ORDER BY user_id LIMIT 1",
        )
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| log::error!("role lookup failed for {}: {e}", role.as_str()))
        .ok()
        .flatten()?;

        Some(super::ActorRef {
            id: row.try_get("user_id").ok()?,
            name: row.try_get("name").ok()?,
            role,
        })
    }
}

fn parse_status(raw: &str) -> Result<DocumentStatus, RegistryError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| RegistryError::Backend(Box::new(e)))
}

fn parse_type(raw: &str) -> Result<LetterType, RegistryError> {
    LetterType::from_tag(raw).ok_or_else(|| {
        RegistryError::Backend(format!("unknown doc_type {raw} in registry").into())
    })
}

fn row_to_document(row: &PgRow) -> Result<Document, RegistryError> {
    let steps: serde_json::Value = row.try_get("steps")?;
    let history: serde_json::Value = row.try_get("history")?;
    let steps: Vec<ApprovalStep> =
        serde_json::from_value(steps).map_err(|e| RegistryError::Backend(Box::new(e)))?;
    let history: Vec<HistoryEntry> =
        serde_json::from_value(history).map_err(|e| RegistryError::Backend(Box::new(e)))?;

    Ok(Document {
        id: row.try_get("doc_id")?,
        number: row.try_get("doc_number")?,
        doc_type: parse_type(row.try_get::<String, _>("doc_type")?.as_str())?,
        status: parse_status(row.try_get::<String, _>("status")?.as_str())?,
        payload: row.try_get("payload")?,
        steps,
        history,
        created_by: row.try_get("created_by")?,
        file_path: row.try_get("file_path")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, RegistryError> {
    serde_json::to_value(value).map_err(|e| RegistryError::Backend(Box::new(e)))
}

#[async_trait]
impl DocumentRegistry for PgRegistry {
    async fn create(&self, doc: NewDocument) -> Result<Document, RegistryError> {
        let sql = format!(
            "INSERT INTO documents \
             (doc_number, doc_type, status, payload, steps, history, created_by, file_path, \
              created_at, updated_at, version) \
             VALUES ($1, $2, $3, $4, '[]'::jsonb, '[]'::jsonb, $5, $6, now(), now(), 0) \
             RETURNING {COLUMNS}"
        );
        let result = sqlx::query(&sql)
            .bind(&doc.number)
            .bind(doc.doc_type.tag())
            .bind(doc.status.as_str())
            .bind(&doc.payload)
            .bind(doc.created_by)
            .bind(&doc.file_path)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => row_to_document(&row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RegistryError::DuplicateNumber(doc.number))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Document>, RegistryError> {
        let sql = format!("SELECT {COLUMNS} FROM documents WHERE doc_id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<Document>, RegistryError> {
        let sql = format!("SELECT {COLUMNS} FROM documents WHERE doc_number = $1");
        let row = sqlx::query(&sql)
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn count_in_period(
        &self,
        doc_type: LetterType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, RegistryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents \
             WHERE doc_type = $1 AND created_at >= $2 AND created_at < $3",
        )
        .bind(doc_type.tag())
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn last_number(&self, doc_type: LetterType) -> Result<Option<String>, RegistryError> {
        let number: Option<String> = sqlx::query_scalar(
            "SELECT doc_number FROM documents WHERE doc_type = $1 \
             ORDER BY created_at DESC, doc_id DESC LIMIT 1",
        )
        .bind(doc_type.tag())
        .fetch_optional(&self.pool)
        .await?;
        Ok(number)
    }

    async fn save(&self, mut doc: Document) -> Result<Document, RegistryError> {
        let steps = to_json(&doc.steps)?;
        let history = to_json(&doc.history)?;
        let updated = sqlx::query(
            "UPDATE documents SET status = $1, payload = $2, steps = $3, history = $4, \
             file_path = $5, updated_at = now(), version = version + 1 \
             WHERE doc_id = $6 AND version = $7",
        )
        .bind(doc.status.as_str())
        .bind(&doc.payload)
        .bind(&steps)
        .bind(&history)
        .bind(&doc.file_path)
        .bind(doc.id)
        .bind(doc.version)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            // Either the row is gone or someone else won the version race.
            return match self.find_by_id(doc.id).await? {
                Some(_) => Err(RegistryError::Conflict(doc.id)),
                None => Err(RegistryError::NotFound(doc.id)),
            };
        }

        doc.version += 1;
        doc.updated_at = Utc::now();
        Ok(doc)
    }
}
