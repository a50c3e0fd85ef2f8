//! Sequential approval workflow.
//!
//! Drafts move `Draft -> Submitted -> Approved | Rejected`, with a
//! `Generated` terminal once the binary has been produced for an approved
//! (or ungated) document. Steps are fixed at submission time: level 1 is
//! the submitting staff member (auto-approved, and absent when a reviewer
//! submits their own draft), level 2 the kaprodi, level 3 the dekan.
//! Decisions are serialized per document and saves are
//! version-checked, so two approvers racing on the same letter cannot
//! both win.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;

use crate::letters::LetterType;
use crate::registry::{
    ActorRef, ApprovalStep, Document, DocumentRegistry, DocumentStatus, NewDocument,
    RegistryError, Role, StepStatus,
};
use crate::sequence;

/// Approval chain above the submitter, in decision order.
const REVIEW_LEVELS: [(u8, Role); 2] = [(2, Role::Kaprodi), (3, Role::Dekan)];

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("document {0} not found")]
    NotFound(i64),
    #[error("actor has no pending approval on this document")]
    Forbidden,
    #[error("cannot {action} a {status} document")]
    InvalidTransition { action: &'static str, status: &'static str },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Resolves the current holder of an organizational role. Backed by the
/// users table in production and a fixed map in tests.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn find_by_role(&self, role: Role) -> Option<ActorRef>;
}

/// Static role assignment, for tests and single-tenant deployments.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    holders: HashMap<Role, ActorRef>,
}

impl StaticDirectory {
    pub fn new(holders: impl IntoIterator<Item = ActorRef>) -> Self {
        Self {
            holders: holders.into_iter().map(|a| (a.role, a)).collect(),
        }
    }
}

#[async_trait]
impl RoleDirectory for StaticDirectory {
    async fn find_by_role(&self, role: Role) -> Option<ActorRef> {
        self.holders.get(&role).cloned()
    }
}

pub struct WorkflowEngine {
    registry: Arc<dyn DocumentRegistry>,
    directory: Arc<dyn RoleDirectory>,
    /// Per-document critical sections for decision handling. Weak entries
    /// die with their last holder and are pruned on the next lookup, so
    /// the map never grows with the number of documents ever touched.
    locks: parking_lot::Mutex<HashMap<i64, Weak<tokio::sync::Mutex<()>>>>,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<dyn DocumentRegistry>, directory: Arc<dyn RoleDirectory>) -> Self {
        Self {
            registry,
            directory,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<dyn DocumentRegistry> {
        &self.registry
    }

    fn lock_for(&self, doc_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.retain(|_, weak| weak.strong_count() > 0);
        match locks.get(&doc_id).and_then(Weak::upgrade) {
            Some(lock) => lock,
            None => {
                let lock = Arc::new(tokio::sync::Mutex::new(()));
                locks.insert(doc_id, Arc::downgrade(&lock));
                lock
            }
        }
    }

    /// Register a draft. Mints a registration number when the caller did
    /// not supply one; a supplied number must be free.
    pub async fn create_draft(
        &self,
        doc_type: LetterType,
        number: Option<String>,
        payload: Value,
        actor: &ActorRef,
    ) -> Result<Document, WorkflowError> {
        let explicit = number.is_some();
        let jenis = payload
            .get("jenis_surat")
            .or_else(|| payload.get("jenisSurat"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let mut number = match number {
            Some(n) => {
                if self.registry.find_by_number(&n).await?.is_some() {
                    return Err(RegistryError::DuplicateNumber(n).into());
                }
                n
            }
            None => {
                sequence::next_number(self.registry.as_ref(), doc_type, jenis.as_deref(), Utc::now())
                    .await?
            }
        };

        // Minted numbers can collide with a concurrent draft; the unique
        // constraint reports it and we mint again, a few times at most.
        // Caller-supplied numbers are never rewritten.
        let mut doc = 'create: {
            let mut last = None;
            for _ in 0..3 {
                let record = NewDocument {
                    number: number.clone(),
                    doc_type,
                    status: DocumentStatus::Draft,
                    payload: payload.clone(),
                    created_by: actor.id,
                    file_path: None,
                };
                match self.registry.create(record).await {
                    Ok(doc) => break 'create doc,
                    Err(RegistryError::DuplicateNumber(n)) if !explicit => {
                        log::warn!("registration number {n} was taken, minting a new one");
                        number = sequence::next_number(
                            self.registry.as_ref(),
                            doc_type,
                            jenis.as_deref(),
                            Utc::now(),
                        )
                        .await?;
                        last = Some(RegistryError::DuplicateNumber(n));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            return Err(last
                .unwrap_or_else(|| RegistryError::DuplicateNumber(number))
                .into());
        };
        doc.push_history(actor, "created", json!({ "status": "draft" }));
        Ok(self.registry.save(doc).await?)
    }

    /// Submit a draft for review. Builds the step chain: a staff
    /// submitter gets an already-approved level-1 slot, and one pending
    /// slot is created per reviewer role that currently has a holder.
    pub async fn submit(&self, doc_id: i64, actor: &ActorRef) -> Result<Document, WorkflowError> {
        let guard = self.lock_for(doc_id);
        let _held = guard.lock().await;

        let mut doc = self.fetch(doc_id).await?;
        if doc.status != DocumentStatus::Draft {
            return Err(WorkflowError::InvalidTransition {
                action: "submit",
                status: doc.status.as_str(),
            });
        }

        // The level-1 slot only exists when the submitter sits below the
        // review chain; a kaprodi or dekan submitting their own draft
        // decides at their reviewer level instead.
        let mut steps = Vec::new();
        if !REVIEW_LEVELS.iter().any(|(_, role)| *role == actor.role) {
            steps.push(ApprovalStep {
                level: 1,
                approver: actor.clone(),
                status: StepStatus::Approved,
                comments: None,
                signature: None,
                decided_at: Some(Utc::now()),
            });
        }
        for (level, role) in REVIEW_LEVELS {
            match self.directory.find_by_role(role).await {
                Some(approver) => steps.push(ApprovalStep {
                    level,
                    approver,
                    status: StepStatus::Pending,
                    comments: None,
                    signature: None,
                    decided_at: None,
                }),
                None => log::warn!(
                    "no holder for role {} — skipping level {level} on document {doc_id}",
                    role.as_str()
                ),
            }
        }

        doc.steps = steps;
        doc.status = DocumentStatus::Submitted;
        doc.push_history(actor, "submitted", json!({ "status": "submitted" }));
        Ok(self.registry.save(doc).await?)
    }

    pub async fn approve(
        &self,
        doc_id: i64,
        actor: &ActorRef,
        comments: Option<String>,
        signature: Option<String>,
    ) -> Result<Document, WorkflowError> {
        self.decide(doc_id, actor, StepStatus::Approved, comments, signature)
            .await
    }

    pub async fn reject(
        &self,
        doc_id: i64,
        actor: &ActorRef,
        comments: Option<String>,
    ) -> Result<Document, WorkflowError> {
        self.decide(doc_id, actor, StepStatus::Rejected, comments, None)
            .await
    }

    /// Record a decision on the actor's pending step, then recompute the
    /// aggregate status: any rejection rejects the document; all steps
    /// approved approves it; otherwise it stays submitted.
    async fn decide(
        &self,
        doc_id: i64,
        actor: &ActorRef,
        decision: StepStatus,
        comments: Option<String>,
        signature: Option<String>,
    ) -> Result<Document, WorkflowError> {
        let guard = self.lock_for(doc_id);
        let _held = guard.lock().await;

        let mut doc = self.fetch(doc_id).await?;
        if doc.status != DocumentStatus::Submitted {
            return Err(WorkflowError::InvalidTransition {
                action: if decision == StepStatus::Approved {
                    "approve"
                } else {
                    "reject"
                },
                status: doc.status.as_str(),
            });
        }

        let step = doc
            .steps
            .iter_mut()
            .find(|s| s.approver.id == actor.id && s.status == StepStatus::Pending)
            .ok_or(WorkflowError::Forbidden)?;
        let level = step.level;
        step.status = decision;
        step.comments = comments;
        step.signature = signature;
        step.decided_at = Some(Utc::now());

        doc.status = if doc.steps.iter().any(|s| s.status == StepStatus::Rejected) {
            DocumentStatus::Rejected
        } else if doc.steps.iter().all(|s| s.status == StepStatus::Approved) {
            DocumentStatus::Approved
        } else {
            DocumentStatus::Submitted
        };

        let action = if decision == StepStatus::Approved {
            "approved"
        } else {
            "rejected"
        };
        doc.push_history(
            actor,
            action,
            json!({ "level": level, "status": doc.status.as_str() }),
        );
        Ok(self.registry.save(doc).await?)
    }

    /// Check that a document may move to `Generated`: allowed from
    /// `Approved`, and from `Draft` for letter types that skip the
    /// approval chain. Callers rendering a binary consult this before
    /// doing any work, `mark_generated` re-checks under the lock.
    pub fn generation_allowed(doc: &Document) -> Result<(), WorkflowError> {
        let allowed = matches!(doc.status, DocumentStatus::Approved)
            || (doc.status == DocumentStatus::Draft && !doc.doc_type.is_gated());
        if allowed {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                action: "generate",
                status: doc.status.as_str(),
            })
        }
    }

    /// Record that the binary has been produced. The registration number
    /// minted at draft time is reused verbatim.
    pub async fn mark_generated(
        &self,
        doc_id: i64,
        actor: &ActorRef,
        file_path: String,
    ) -> Result<Document, WorkflowError> {
        let guard = self.lock_for(doc_id);
        let _held = guard.lock().await;

        let mut doc = self.fetch(doc_id).await?;
        Self::generation_allowed(&doc)?;

        doc.file_path = Some(file_path.clone());
        doc.status = DocumentStatus::Generated;
        doc.push_history(actor, "generated", json!({ "file_path": file_path }));
        Ok(self.registry.save(doc).await?)
    }

    async fn fetch(&self, doc_id: i64) -> Result<Document, WorkflowError> {
        self.registry
            .find_by_id(doc_id)
            .await?
            .ok_or(WorkflowError::NotFound(doc_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;

    fn actor(id: i64, name: &str, role: Role) -> ActorRef {
        ActorRef {
            id,
            name: name.to_string(),
            role,
        }
    }

    fn engine() -> (WorkflowEngine, ActorRef, ActorRef, ActorRef) {
        let staff = actor(1, "Siti", Role::Staff);
        let kaprodi = actor(2, "Budi", Role::Kaprodi);
        let dekan = actor(3, "Rina", Role::Dekan);
        let registry: Arc<dyn DocumentRegistry> = Arc::new(InMemoryRegistry::new());
        let directory = Arc::new(StaticDirectory::new([kaprodi.clone(), dekan.clone()]));
        (
            WorkflowEngine::new(registry, directory),
            staff,
            kaprodi,
            dekan,
        )
    }

    async fn submitted_doc(engine: &WorkflowEngine, staff: &ActorRef) -> Document {
        let doc = engine
            .create_draft(LetterType::Prodi, None, json!({ "jenis_surat": "SRM" }), staff)
            .await
            .unwrap();
        engine.submit(doc.id, staff).await.unwrap()
    }

    #[tokio::test]
    async fn test_submit_builds_steps_with_level_one_auto_approved() {
        let (engine, staff, kaprodi, dekan) = engine();
        let doc = submitted_doc(&engine, &staff).await;

        assert_eq!(doc.status, DocumentStatus::Submitted);
        assert_eq!(doc.steps.len(), 3);
        assert_eq!(doc.steps[0].level, 1);
        assert_eq!(doc.steps[0].status, StepStatus::Approved);
        assert_eq!(doc.steps[0].approver.id, staff.id);
        assert_eq!(doc.steps[1].approver.id, kaprodi.id);
        assert_eq!(doc.steps[1].status, StepStatus::Pending);
        assert_eq!(doc.steps[2].approver.id, dekan.id);
    }

    #[tokio::test]
    async fn test_full_approval_chain_reaches_approved() {
        let (engine, staff, kaprodi, dekan) = engine();
        let doc = submitted_doc(&engine, &staff).await;

        let doc = engine
            .approve(doc.id, &kaprodi, Some("ok".into()), None)
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Submitted);

        let doc = engine.approve(doc.id, &dekan, None, None).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Approved);
        assert!(doc.steps.iter().all(|s| s.status == StepStatus::Approved));
    }

    #[tokio::test]
    async fn test_any_rejection_rejects_the_document() {
        let (engine, staff, kaprodi, _dekan) = engine();
        let doc = submitted_doc(&engine, &staff).await;

        let doc = engine
            .reject(doc.id, &kaprodi, Some("revisi".into()))
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Rejected);
    }

    #[tokio::test]
    async fn test_decision_after_rejection_is_invalid_transition() {
        let (engine, staff, kaprodi, dekan) = engine();
        let doc = submitted_doc(&engine, &staff).await;
        engine.reject(doc.id, &kaprodi, None).await.unwrap();

        let err = engine.approve(doc.id, &dekan, None, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_actor_without_pending_step_is_forbidden() {
        let (engine, staff, _kaprodi, _dekan) = engine();
        let doc = submitted_doc(&engine, &staff).await;

        let stranger = actor(99, "Tamu", Role::Staff);
        let err = engine
            .approve(doc.id, &stranger, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden));
    }

    #[tokio::test]
    async fn test_double_decision_on_same_step_is_forbidden() {
        let (engine, staff, kaprodi, _dekan) = engine();
        let doc = submitted_doc(&engine, &staff).await;
        engine.approve(doc.id, &kaprodi, None, None).await.unwrap();

        let err = engine
            .approve(doc.id, &kaprodi, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden));
    }

    #[tokio::test]
    async fn test_submit_twice_is_invalid() {
        let (engine, staff, _kaprodi, _dekan) = engine();
        let doc = submitted_doc(&engine, &staff).await;

        let err = engine.submit(doc.id, &staff).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition { action: "submit", .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_role_holder_skips_level() {
        let staff = actor(1, "Siti", Role::Staff);
        let kaprodi = actor(2, "Budi", Role::Kaprodi);
        let registry: Arc<dyn DocumentRegistry> = Arc::new(InMemoryRegistry::new());
        // No dekan configured.
        let directory = Arc::new(StaticDirectory::new([kaprodi.clone()]));
        let engine = WorkflowEngine::new(registry, directory);

        let doc = engine
            .create_draft(LetterType::Prodi, None, json!({}), &staff)
            .await
            .unwrap();
        let doc = engine.submit(doc.id, &staff).await.unwrap();
        assert_eq!(doc.steps.len(), 2);

        let doc = engine.approve(doc.id, &kaprodi, None, None).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Approved);
    }

    #[tokio::test]
    async fn test_generate_requires_approval_for_gated_type() {
        let (engine, staff, _kaprodi, _dekan) = engine();
        let doc = engine
            .create_draft(LetterType::Prodi, None, json!({}), &staff)
            .await
            .unwrap();

        let err = engine
            .mark_generated(doc.id, &staff, "out.docx".into())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_generate_from_draft_for_ungated_type() {
        let (engine, staff, _kaprodi, _dekan) = engine();
        let doc = engine
            .create_draft(LetterType::Undangan, None, json!({}), &staff)
            .await
            .unwrap();
        let number = doc.number.clone();

        let doc = engine
            .mark_generated(doc.id, &staff, "out.docx".into())
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Generated);
        assert_eq!(doc.number, number);
        assert_eq!(doc.file_path.as_deref(), Some("out.docx"));
    }

    #[tokio::test]
    async fn test_draft_with_explicit_duplicate_number_is_rejected() {
        let (engine, staff, _kaprodi, _dekan) = engine();
        engine
            .create_draft(LetterType::Tugas, Some("ST/001".into()), json!({}), &staff)
            .await
            .unwrap();

        let err = engine
            .create_draft(LetterType::Tugas, Some("ST/001".into()), json!({}), &staff)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Registry(RegistryError::DuplicateNumber(_))
        ));
    }

    #[tokio::test]
    async fn test_reviewer_submitting_gets_no_auto_approved_step() {
        let (engine, _staff, kaprodi, dekan) = engine();
        let doc = engine
            .create_draft(LetterType::Prodi, None, json!({}), &dekan)
            .await
            .unwrap();
        let doc = engine.submit(doc.id, &dekan).await.unwrap();

        // No level-1 slot; the dekan decides at level 3 like any reviewer.
        assert_eq!(doc.steps.len(), 2);
        assert!(doc.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(doc.steps[0].level, 2);
        assert_eq!(doc.steps[1].level, 3);

        let doc = engine.approve(doc.id, &kaprodi, None, None).await.unwrap();
        let doc = engine.approve(doc.id, &dekan, None, None).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Approved);
    }

    #[tokio::test]
    async fn test_lock_map_entries_are_released_after_use() {
        let (engine, staff, kaprodi, dekan) = engine();
        let doc = submitted_doc(&engine, &staff).await;
        engine.approve(doc.id, &kaprodi, None, None).await.unwrap();
        engine.approve(doc.id, &dekan, None, None).await.unwrap();

        assert!(engine
            .locks
            .lock()
            .values()
            .all(|w| w.strong_count() == 0));

        // The next lookup prunes the dead entries.
        let _held = engine.lock_for(doc.id + 1);
        assert_eq!(engine.locks.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_history_records_each_transition() {
        let (engine, staff, kaprodi, dekan) = engine();
        let doc = submitted_doc(&engine, &staff).await;
        engine.approve(doc.id, &kaprodi, None, None).await.unwrap();
        let doc = engine.approve(doc.id, &dekan, None, None).await.unwrap();

        let actions: Vec<&str> = doc.history.iter().map(|h| h.action.as_str()).collect();
        assert_eq!(actions, ["created", "submitted", "approved", "approved"]);
    }
}
