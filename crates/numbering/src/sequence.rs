//! Atomic sequence counters behind the number allocator.
//!
//! One counter per `(company, document kind, year)`. `next` must be atomic:
//! two racing callers observe distinct, strictly increasing values. This is
//! the property that makes generated document numbers unique without a
//! read-then-write scan over existing documents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use faktura_core::CompanyId;

use crate::number::{DocumentKind, MAX_SEQUENCE};

/// Key of one document-number sequence.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    pub company_id: CompanyId,
    pub kind: DocumentKind,
    pub year: i32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// The fixed-width sequence field is used up for this company/kind/year.
    #[error("document sequence exhausted for {kind} in {year} (max {MAX_SEQUENCE})")]
    Exhausted { kind: DocumentKind, year: i32 },

    /// Backend failure (lock poisoning, database error).
    #[error("sequence store failure: {0}")]
    Store(String),
}

/// Atomically incrementing counter store.
pub trait SequenceStore: Send + Sync {
    /// Increment the counter for `key` and return the new value.
    ///
    /// Implementations must be atomic per key and must never hand out a value
    /// above [`MAX_SEQUENCE`].
    fn next(&self, key: SequenceKey) -> Result<u32, SequenceError>;

    /// Raise the counter so future values are strictly greater than
    /// `last_used`. No-op if the counter is already past it.
    ///
    /// Used when seeding sequences from pre-existing documents (imports).
    fn advance_to(&self, key: SequenceKey, last_used: u32) -> Result<(), SequenceError>;
}

impl<S> SequenceStore for Arc<S>
where
    S: SequenceStore + ?Sized,
{
    fn next(&self, key: SequenceKey) -> Result<u32, SequenceError> {
        (**self).next(key)
    }

    fn advance_to(&self, key: SequenceKey, last_used: u32) -> Result<(), SequenceError> {
        (**self).advance_to(key, last_used)
    }
}

/// In-memory sequence store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySequenceStore {
    counters: Mutex<HashMap<SequenceKey, u32>>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SequenceStore for InMemorySequenceStore {
    fn next(&self, key: SequenceKey) -> Result<u32, SequenceError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| SequenceError::Store("lock poisoned".to_string()))?;

        let counter = counters.entry(key).or_insert(0);
        if *counter >= MAX_SEQUENCE {
            return Err(SequenceError::Exhausted {
                kind: key.kind,
                year: key.year,
            });
        }

        *counter += 1;
        Ok(*counter)
    }

    fn advance_to(&self, key: SequenceKey, last_used: u32) -> Result<(), SequenceError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| SequenceError::Store("lock poisoned".to_string()))?;

        let counter = counters.entry(key).or_insert(0);
        if last_used > *counter {
            *counter = last_used.min(MAX_SEQUENCE);
        }
        Ok(())
    }
}
