//! Document registry — the persisted record of every issued or drafted
//! letter.
//!
//! The core treats persistence as a plain record store behind
//! [`DocumentRegistry`]; a Postgres implementation backs the server and an
//! in-memory one backs the tests. Workflow state lives in typed columns
//! (`status`, `steps`, `history`) rather than a free-form metadata blob, so
//! illegal states are unrepresentable.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRegistry;
pub use postgres::{PgDirectory, PgRegistry};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use crate::letters::LetterType;

/// Roles in approval order. Level 1 is satisfied by staff (or admin),
/// level 2 by the kaprodi, level 3 by the dekan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
    Kaprodi,
    Dekan,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Kaprodi => "kaprodi",
            Role::Dekan => "dekan",
        }
    }
}

/// Reference to the acting user. Authentication is an external concern;
/// the core only records who did what.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActorRef {
    pub id: i64,
    pub name: String,
    pub role: Role,
}

/// Lifecycle state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Generated,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Submitted => "submitted",
            DocumentStatus::Approved => "approved",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Generated => "generated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

/// One sign-off slot. Created at submission, immutable once decided.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApprovalStep {
    pub level: u8,
    pub approver: ActorRef,
    pub status: StepStatus,
    pub comments: Option<String>,
    pub signature: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Additive-only audit entry; one per transition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    pub action: String,
    pub actor_id: i64,
    pub actor_role: Role,
    #[schema(value_type = Object)]
    pub changes: Value,
    pub created_at: DateTime<Utc>,
}

/// The unit of record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Document {
    pub id: i64,
    /// Human-readable registration code, unique per (type, period).
    pub number: String,
    pub doc_type: LetterType,
    pub status: DocumentStatus,
    /// Every input field needed to regenerate the binary.
    #[schema(value_type = Object)]
    pub payload: Value,
    pub steps: Vec<ApprovalStep>,
    pub history: Vec<HistoryEntry>,
    pub created_by: i64,
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter, bumped by every `save`.
    pub version: i64,
}

impl Document {
    pub fn push_history(&mut self, actor: &ActorRef, action: &str, changes: Value) {
        self.history.push(HistoryEntry {
            action: action.to_string(),
            actor_id: actor.id,
            actor_role: actor.role,
            changes,
            created_at: Utc::now(),
        });
    }
}

/// New document to persist; the registry assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub number: String,
    pub doc_type: LetterType,
    pub status: DocumentStatus,
    pub payload: Value,
    pub created_by: i64,
    pub file_path: Option<String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registration number {0} already exists")]
    DuplicateNumber(String),
    #[error("document {0} not found")]
    NotFound(i64),
    #[error("document {0} was modified concurrently")]
    Conflict(i64),
    #[error("registry backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        RegistryError::Backend(Box::new(e))
    }
}

/// Record-store operations the core needs. Nothing here assumes a query
/// language.
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    /// Persist a new document; fails with `DuplicateNumber` if the number
    /// is already taken.
    async fn create(&self, doc: NewDocument) -> Result<Document, RegistryError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Document>, RegistryError>;

    async fn find_by_number(&self, number: &str) -> Result<Option<Document>, RegistryError>;

    /// Count documents of a type created inside `[from, to)`.
    async fn count_in_period(
        &self,
        doc_type: LetterType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, RegistryError>;

    /// Number of the most recently created document of a type, if any.
    async fn last_number(&self, doc_type: LetterType) -> Result<Option<String>, RegistryError>;

    /// Save an updated document. The stored version must equal
    /// `doc.version`; on success the persisted version is `doc.version + 1`
    /// and the returned document reflects it.
    async fn save(&self, doc: Document) -> Result<Document, RegistryError>;
}
