//! In-memory registry for tests and single-process development runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{Document, DocumentRegistry, LetterType, NewDocument, RegistryError};

#[derive(Default)]
pub struct InMemoryRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    docs: HashMap<i64, Document>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRegistry for InMemoryRegistry {
    async fn create(&self, doc: NewDocument) -> Result<Document, RegistryError> {
        let mut inner = self.inner.write();
        if inner.docs.values().any(|d| d.number == doc.number) {
            return Err(RegistryError::DuplicateNumber(doc.number));
        }
        inner.next_id += 1;
        let now = Utc::now();
        let stored = Document {
            id: inner.next_id,
            number: doc.number,
            doc_type: doc.doc_type,
            status: doc.status,
            payload: doc.payload,
            steps: Vec::new(),
            history: Vec::new(),
            created_by: doc.created_by,
            file_path: doc.file_path,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        inner.docs.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Document>, RegistryError> {
        Ok(self.inner.read().docs.get(&id).cloned())
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<Document>, RegistryError> {
        Ok(self
            .inner
            .read()
            .docs
            .values()
            .find(|d| d.number == number)
            .cloned())
    }

    async fn count_in_period(
        &self,
        doc_type: LetterType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, RegistryError> {
        Ok(self
            .inner
            .read()
            .docs
            .values()
            .filter(|d| d.doc_type == doc_type && d.created_at >= from && d.created_at < to)
            .count() as u64)
    }

    async fn last_number(&self, doc_type: LetterType) -> Result<Option<String>, RegistryError> {
        Ok(self
            .inner
            .read()
            .docs
            .values()
            .filter(|d| d.doc_type == doc_type)
            .max_by_key(|d| (d.created_at, d.id))
            .map(|d| d.number.clone()))
    }

    async fn save(&self, mut doc: Document) -> Result<Document, RegistryError> {
        let mut inner = self.inner.write();
        let stored = inner
            .docs
            .get_mut(&doc.id)
            .ok_or(RegistryError::NotFound(doc.id))?;
        if stored.version != doc.version {
            return Err(RegistryError::Conflict(doc.id));
        }
        doc.version += 1;
        doc.updated_at = Utc::now();
        *stored = doc.clone();
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DocumentStatus;
    use serde_json::json;

    fn new_doc(number: &str) -> NewDocument {
        NewDocument {
            number: number.to_string(),
            doc_type: LetterType::Undangan,
            status: DocumentStatus::Generated,
            payload: json!({}),
            created_by: 1,
            file_path: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_number_rejected() {
        let reg = InMemoryRegistry::new();
        reg.create(new_doc("001/UND/FI/01/2026")).await.unwrap();
        let err = reg.create(new_doc("001/UND/FI/01/2026")).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateNumber(_)));
    }

    #[tokio::test]
    async fn test_version_conflict() {
        let reg = InMemoryRegistry::new();
        let doc = reg.create(new_doc("n1")).await.unwrap();
        let stale = doc.clone();
        reg.save(doc).await.unwrap();
        let err = reg.save(stale).await.unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_last_number_is_most_recent() {
        let reg = InMemoryRegistry::new();
        reg.create(new_doc("n1")).await.unwrap();
        reg.create(new_doc("n2")).await.unwrap();
        assert_eq!(
            reg.last_number(LetterType::Undangan).await.unwrap(),
            Some("n2".to_string())
        );
        assert_eq!(reg.last_number(LetterType::Laak).await.unwrap(), None);
    }
}
