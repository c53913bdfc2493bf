//! `faktura-numbering` — sequential document numbers.
//!
//! Every business document (customer, invoice, offer, credit note) carries a
//! human-readable number of the form `PREFIX-YEAR-SEQ`, e.g. `RE-2025-0041`.
//! Sequences are scoped per `(company, document kind, year)` and backed by an
//! explicit atomic counter — never derived by scanning existing rows.
//!
//! The allocator is called deliberately by the creation use case, immediately
//! before the first persistence of the document. Numbers are never reused,
//! even after the document is deleted; gaps from failed creations are
//! acceptable.

pub mod allocator;
pub mod config;
pub mod number;
pub mod sequence;

pub use allocator::{ALLOCATION_ATTEMPTS, AllocationError, NumberAllocator};
pub use config::NumberingConfig;
pub use number::{DocumentKind, DocumentNumber, MAX_SEQUENCE};
pub use sequence::{InMemorySequenceStore, SequenceError, SequenceKey, SequenceStore};
