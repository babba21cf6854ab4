use async_trait::async_trait;
use exam_core::model::{ExamId, SessionFragment};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::mapping::{FragmentField, decode_fragment, encode_fragment};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("stored session field `{field}` is unreadable: {reason}")]
    Corrupt { field: &'static str, reason: String },
}

impl StorageError {
    /// True when a stored fragment exists but cannot be decoded.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StorageError::Corrupt { .. })
    }
}

/// Durable key-value storage for in-progress exam sessions.
///
/// Keys are scoped by exam id. A completed `write` must be visible to the
/// next `read` of the same exam id in the same process.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the fragment saved for an exam, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupt` if stored values cannot be decoded,
    /// or other storage errors.
    async fn read(&self, exam_id: ExamId) -> Result<Option<SessionFragment>, StorageError>;

    /// Replace every field saved for an exam.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the fragment cannot be stored.
    async fn write(&self, exam_id: ExamId, fragment: &SessionFragment) -> Result<(), StorageError>;

    /// Remove every field saved for an exam. Clearing a missing session is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached.
    async fn clear(&self, exam_id: ExamId) -> Result<(), StorageError>;
}

type FieldMap = HashMap<(ExamId, FragmentField), String>;

/// Simple in-memory store for testing and prototyping.
///
/// Values are kept in their encoded string form so decoding behaves exactly
/// as it does for durable backends.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    fields: Arc<Mutex<FieldMap>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FieldMap>, StorageError> {
        self.fields
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Overwrite one raw field value, bypassing encoding.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn write_field(
        &self,
        exam_id: ExamId,
        field: FragmentField,
        value: impl Into<String>,
    ) -> Result<(), StorageError> {
        self.lock()?.insert((exam_id, field), value.into());
        Ok(())
    }

    /// Read one raw field value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn field(&self, exam_id: ExamId, field: FragmentField) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(&(exam_id, field)).cloned())
    }

    /// Exam ids that currently have at least one stored field.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn exam_ids(&self) -> Result<Vec<ExamId>, StorageError> {
        let guard = self.lock()?;
        let ids: HashSet<ExamId> = guard.keys().map(|(id, _)| *id).collect();
        let mut ids: Vec<ExamId> = ids.into_iter().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn read(&self, exam_id: ExamId) -> Result<Option<SessionFragment>, StorageError> {
        let fields: HashMap<FragmentField, String> = {
            let guard = self.lock()?;
            FragmentField::ALL
                .into_iter()
                .filter_map(|field| {
                    guard
                        .get(&(exam_id, field))
                        .map(|value| (field, value.clone()))
                })
                .collect()
        };
        decode_fragment(&fields)
    }

    async fn write(&self, exam_id: ExamId, fragment: &SessionFragment) -> Result<(), StorageError> {
        let encoded = encode_fragment(fragment)?;
        let mut guard = self.lock()?;
        for (field, value) in encoded {
            guard.insert((exam_id, field), value);
        }
        Ok(())
    }

    async fn clear(&self, exam_id: ExamId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        for field in FragmentField::ALL {
            guard.remove(&(exam_id, field));
        }
        Ok(())
    }
}

/// Aggregates the session store behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub sessions: Arc<dyn SessionStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        Self { sessions }
    }
}
