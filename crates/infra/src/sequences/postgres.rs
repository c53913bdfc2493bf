//! Postgres-backed sequence store.
//!
//! One row per `(company_id, kind, year)`; `next` is a single atomic
//! upsert-returning statement, so two racing allocations are serialized by
//! the row lock and always observe distinct counter values. A counter at the
//! cap is left untouched and reported as exhausted.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE document_sequences (
//!     company_id UUID NOT NULL,
//!     kind       TEXT NOT NULL,
//!     year       INT NOT NULL,
//!     counter    BIGINT NOT NULL CHECK (counter >= 0),
//!     PRIMARY KEY (company_id, kind, year)
//! );
//! ```

use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::instrument;

use faktura_numbering::{MAX_SEQUENCE, SequenceError, SequenceKey, SequenceStore};

/// Postgres-backed atomic sequence store.
#[derive(Debug, Clone)]
pub struct PostgresSequenceStore {
    pool: Arc<PgPool>,
}

impl PostgresSequenceStore {
    /// Create a new PostgresSequenceStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(
        skip(self, key),
        fields(
            company_id = %key.company_id.as_uuid(),
            kind = %key.kind,
            year = key.year
        ),
        err
    )]
    pub async fn next_value(&self, key: SequenceKey) -> Result<u32, SequenceError> {
        // Insert-or-increment in one statement. The conditional UPDATE leaves
        // an exhausted counter unchanged, in which case no row is returned.
        let row = sqlx::query(
            r#"
            INSERT INTO document_sequences (company_id, kind, year, counter)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (company_id, kind, year)
            DO UPDATE SET counter = document_sequences.counter + 1
            WHERE document_sequences.counter < $4
            RETURNING counter
            "#,
        )
        .bind(key.company_id.as_uuid())
        .bind(key.kind.as_str())
        .bind(key.year)
        .bind(i64::from(MAX_SEQUENCE))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| SequenceError::Store(format!("next_value: {e}")))?;

        match row {
            Some(row) => {
                let counter: i64 = row
                    .try_get("counter")
                    .map_err(|e| SequenceError::Store(format!("failed to read counter: {e}")))?;
                Ok(counter as u32)
            }
            None => Err(SequenceError::Exhausted {
                kind: key.kind,
                year: key.year,
            }),
        }
    }

    #[instrument(
        skip(self, key),
        fields(
            company_id = %key.company_id.as_uuid(),
            kind = %key.kind,
            year = key.year
        ),
        err
    )]
    pub async fn advance_to_value(
        &self,
        key: SequenceKey,
        last_used: u32,
    ) -> Result<(), SequenceError> {
        let target = i64::from(last_used.min(MAX_SEQUENCE));

        sqlx::query(
            r#"
            INSERT INTO document_sequences (company_id, kind, year, counter)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (company_id, kind, year)
            DO UPDATE SET counter = GREATEST(document_sequences.counter, EXCLUDED.counter)
            "#,
        )
        .bind(key.company_id.as_uuid())
        .bind(key.kind.as_str())
        .bind(key.year)
        .bind(target)
        .execute(&*self.pool)
        .await
        .map_err(|e| SequenceError::Store(format!("advance_to_value: {e}")))?;

        Ok(())
    }
}

// Sync trait bridged onto async sqlx, same pattern as the Postgres event
// store: requires a tokio runtime context.
impl SequenceStore for PostgresSequenceStore {
    fn next(&self, key: SequenceKey) -> Result<u32, SequenceError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            SequenceError::Store("PostgresSequenceStore requires a tokio runtime context".into())
        })?;

        handle.block_on(self.next_value(key))
    }

    fn advance_to(&self, key: SequenceKey, last_used: u32) -> Result<(), SequenceError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            SequenceError::Store("PostgresSequenceStore requires a tokio runtime context".into())
        })?;

        handle.block_on(self.advance_to_value(key, last_used))
    }
}
