use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use crate::mapping::{FragmentField, decode_fragment, encode_fragment};
use crate::repository::{SessionStore, StorageError};
use exam_core::model::{ExamId, SessionFragment};

use super::SqliteRepository;

fn exam_id_to_i64(exam_id: ExamId) -> Result<i64, StorageError> {
    i64::try_from(exam_id.value())
        .map_err(|_| StorageError::Serialization("exam_id overflow".into()))
}

fn conn<E: core::fmt::Display>(err: E) -> StorageError {
    StorageError::Connection(err.to_string())
}

#[async_trait]
impl SessionStore for SqliteRepository {
    async fn read(&self, exam_id: ExamId) -> Result<Option<SessionFragment>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT field, value
            FROM session_fields
            WHERE exam_id = ?1
            ",
        )
        .bind(exam_id_to_i64(exam_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut fields = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row
                .try_get("field")
                .map_err(|err| StorageError::Serialization(err.to_string()))?;
            let value: String = row
                .try_get("value")
                .map_err(|err| StorageError::Serialization(err.to_string()))?;
            match FragmentField::from_key(&key) {
                Some(field) => {
                    fields.insert(field, value);
                }
                None => tracing::debug!(%exam_id, key = %key, "ignoring unknown session field"),
            }
        }

        decode_fragment(&fields)
    }

    async fn write(&self, exam_id: ExamId, fragment: &SessionFragment) -> Result<(), StorageError> {
        let exam_id = exam_id_to_i64(exam_id)?;
        let encoded = encode_fragment(fragment)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(conn)?;
        for (field, value) in encoded {
            sqlx::query(
                r"
                INSERT INTO session_fields (exam_id, field, value, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(exam_id, field) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                ",
            )
            .bind(exam_id)
            .bind(field.key())
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }
        tx.commit().await.map_err(conn)?;

        Ok(())
    }

    async fn clear(&self, exam_id: ExamId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM session_fields WHERE exam_id = ?1")
            .bind(exam_id_to_i64(exam_id)?)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }
}
