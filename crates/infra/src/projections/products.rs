use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;

use faktura_core::{AggregateId, CompanyId};
use faktura_events::EventEnvelope;
use faktura_products::{ProductEvent, ProductId, ProductStatus};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::CompanyStore;

/// Queryable product read model: the billing catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub unit: String,
    pub unit_price: u64,
    pub vat_rate_bps: u32,
    pub status: ProductStatus,
}

/// Company+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    company_id: CompanyId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ProductProjectionError {
    #[error("failed to deserialize product event: {0}")]
    Deserialize(String),

    #[error("company isolation violation: {0}")]
    CompanyIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Product catalog projection.
#[derive(Debug)]
pub struct ProductCatalogProjection<S, C = InMemoryCursorStore>
where
    S: CompanyStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> ProductCatalogProjection<S>
where
    S: CompanyStore<ProductId, ProductReadModel>,
{
    /// Create a new projection with in-memory cursor tracking.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "products.catalog".to_string(),
        }
    }

    /// Create a new projection with persistent cursor tracking.
    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> ProductCatalogProjection<S, C> {
        ProductCatalogProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> ProductCatalogProjection<S, C>
where
    S: CompanyStore<ProductId, ProductReadModel>,
    C: ProjectionCursorStore + 'static,
{
    fn get_cursor(&self, company_id: CompanyId, aggregate_id: AggregateId) -> u64 {
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store
                .get_cursor(company_id, aggregate_id, &self.projection_name)
                .unwrap_or(0)
        } else {
            match self.cursors.read() {
                Ok(cursors) => *cursors
                    .get(&CursorKey {
                        company_id,
                        aggregate_id,
                    })
                    .unwrap_or(&0),
                Err(_) => 0,
            }
        }
    }

    fn update_cursor(&self, company_id: CompanyId, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    company_id,
                    aggregate_id,
                },
                sequence_number,
            );
        }

        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store.update_cursor(
                company_id,
                aggregate_id,
                &self.projection_name,
                sequence_number,
            );
        }
    }

    /// Query read model for one company/product.
    pub fn get(&self, company_id: CompanyId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(company_id, product_id)
    }

    /// List all products for a company (disposable read model).
    pub fn list(&self, company_id: CompanyId) -> Vec<ProductReadModel> {
        self.store.list(company_id)
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProductProjectionError> {
        if envelope.aggregate_type() != "products.product" {
            return Ok(());
        }

        let company_id = envelope.company_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(company_id, aggregate_id);

        if seq == 0 {
            return Err(ProductProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(ProductProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: ProductEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProductProjectionError::Deserialize(e.to_string()))?;

        let event_company = match &ev {
            ProductEvent::ProductCreated(e) => e.company_id,
            ProductEvent::ProductUpdated(e) => e.company_id,
            ProductEvent::ProductArchived(e) => e.company_id,
        };

        if event_company != company_id {
            return Err(ProductProjectionError::CompanyIsolation(
                "event company_id does not match envelope company_id".to_string(),
            ));
        }

        match ev {
            ProductEvent::ProductCreated(e) => {
                self.store.upsert(
                    company_id,
                    e.product_id,
                    ProductReadModel {
                        product_id: e.product_id,
                        name: e.name,
                        description: e.description,
                        unit: e.unit,
                        unit_price: e.unit_price,
                        vat_rate_bps: e.vat_rate_bps,
                        status: ProductStatus::Active,
                    },
                );
            }
            ProductEvent::ProductUpdated(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.product_id) {
                    rm.name = e.name;
                    rm.description = e.description;
                    rm.unit = e.unit;
                    rm.unit_price = e.unit_price;
                    rm.vat_rate_bps = e.vat_rate_bps;
                    self.store.upsert(company_id, e.product_id, rm);
                }
            }
            ProductEvent::ProductArchived(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.product_id) {
                    rm.status = ProductStatus::Archived;
                    self.store.upsert(company_id, e.product_id, rm);
                }
            }
        }

        self.update_cursor(company_id, aggregate_id, seq);
        Ok(())
    }
}
