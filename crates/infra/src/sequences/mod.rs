//! Persistent document-number sequence counters.

pub mod postgres;

pub use postgres::PostgresSequenceStore;
