//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: Can be reconstructed from the event stream
//! - **Company-isolated**: Data is partitioned by company
//! - **Idempotent**: Safe for at-least-once delivery

pub mod cursor_store;

// Domain projections
pub mod companies;
pub mod customers;
pub mod invoices;
pub mod offers;
pub mod products;

// Derived metrics
pub mod customer_metrics;

pub use cursor_store::{InMemoryCursorStore, PostgresCursorStore, ProjectionCursorStore};

pub use customer_metrics::{CustomerMetrics, CustomerMetricsProjection, CustomerMetricsProjectionError};
