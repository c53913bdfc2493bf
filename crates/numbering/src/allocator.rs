//! Number allocation: the factory that turns counter values into document
//! numbers.

use thiserror::Error;

use faktura_core::{CompanyId, DomainError};

use crate::config::NumberingConfig;
use crate::number::{DocumentKind, DocumentNumber};
use crate::sequence::{SequenceError, SequenceKey, SequenceStore};

/// Bounded retries for `allocate_unique` before surfacing a conflict.
pub const ALLOCATION_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// The allocated parts did not form a valid number. With a validated
    /// configuration this indicates a bug, not bad user input.
    #[error("allocated number invalid: {0}")]
    Invalid(#[from] DomainError),

    /// Every attempt produced a number that was already taken.
    #[error("could not allocate a unique document number after {attempts} attempts")]
    Conflict { attempts: u32 },
}

/// Allocates the next document number for a company.
///
/// This is an explicit factory: the creation use case calls it immediately
/// before first persistence and stores the result on the new document. There
/// is no save-hook magic and no side effect beyond the counter increment.
#[derive(Debug)]
pub struct NumberAllocator<S> {
    store: S,
}

impl<S> NumberAllocator<S>
where
    S: SequenceStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Allocate the next number for `(company, kind, year)`.
    ///
    /// `config` is the owning company's numbering configuration. Passing
    /// `None` (company could not be resolved) falls back to the kind's
    /// built-in default prefix instead of failing the creation.
    pub fn allocate(
        &self,
        company_id: CompanyId,
        kind: DocumentKind,
        year: i32,
        config: Option<&NumberingConfig>,
    ) -> Result<DocumentNumber, AllocationError> {
        let prefix = config
            .map(|c| c.prefix_for(kind))
            .unwrap_or_else(|| kind.default_prefix());

        let sequence = self.store.next(SequenceKey {
            company_id,
            kind,
            year,
        })?;

        Ok(DocumentNumber::new(prefix, year, sequence)?)
    }

    /// Allocate a number that passes the caller's persistence-time uniqueness
    /// check.
    ///
    /// A collision (e.g. with a manually assigned or imported number) is
    /// retryable: each attempt draws a fresh counter value, so the candidate
    /// strictly increases. After [`ALLOCATION_ATTEMPTS`] failed attempts the
    /// conflict is surfaced to the caller.
    pub fn allocate_unique(
        &self,
        company_id: CompanyId,
        kind: DocumentKind,
        year: i32,
        config: Option<&NumberingConfig>,
        is_taken: impl Fn(&DocumentNumber) -> bool,
    ) -> Result<DocumentNumber, AllocationError> {
        for _ in 0..ALLOCATION_ATTEMPTS {
            let number = self.allocate(company_id, kind, year, config)?;
            if !is_taken(&number) {
                return Ok(number);
            }
        }

        Err(AllocationError::Conflict {
            attempts: ALLOCATION_ATTEMPTS,
        })
    }
}
