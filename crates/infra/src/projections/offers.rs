use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use faktura_core::{AggregateId, CompanyId};
use faktura_customers::CustomerId;
use faktura_events::EventEnvelope;
use faktura_offers::{OfferEvent, OfferId, OfferLine, OfferStatus};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::CompanyStore;

/// Queryable offer read model.
///
/// Lines are kept so an accepted offer can be converted into an invoice
/// without reloading the aggregate stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferReadModel {
    pub offer_id: OfferId,
    pub number: String,
    pub customer_id: CustomerId,
    pub status: OfferStatus,
    pub lines: Vec<OfferLine>,
    pub net_total: u64,
    pub valid_until: Option<DateTime<Utc>>,
}

/// Company+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    company_id: CompanyId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum OfferProjectionError {
    #[error("failed to deserialize offer event: {0}")]
    Deserialize(String),

    #[error("company isolation violation: {0}")]
    CompanyIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Offer list projection.
#[derive(Debug)]
pub struct OfferListProjection<S, C = InMemoryCursorStore>
where
    S: CompanyStore<OfferId, OfferReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> OfferListProjection<S>
where
    S: CompanyStore<OfferId, OfferReadModel>,
{
    /// Create a new projection with in-memory cursor tracking.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "offers.list".to_string(),
        }
    }

    /// Create a new projection with persistent cursor tracking.
    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> OfferListProjection<S, C> {
        OfferListProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> OfferListProjection<S, C>
where
    S: CompanyStore<OfferId, OfferReadModel>,
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

    /// Query read model for one company/offer.
    pub fn get(&self, company_id: CompanyId, offer_id: &OfferId) -> Option<OfferReadModel> {
        self.store.get(company_id, offer_id)
    }

    /// List all offers for a company (disposable read model).
    pub fn list(&self, company_id: CompanyId) -> Vec<OfferReadModel> {
        self.store.list(company_id)
    }

    /// Look up an offer by document number (uniqueness probe).
    pub fn find_by_number(&self, company_id: CompanyId, number: &str) -> Option<OfferReadModel> {
        self.list(company_id).into_iter().find(|rm| rm.number == number)
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), OfferProjectionError> {
        if envelope.aggregate_type() != "offers.offer" {
            return Ok(());
        }

        let company_id = envelope.company_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(company_id, aggregate_id);

        if seq == 0 {
            return Err(OfferProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(OfferProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: OfferEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| OfferProjectionError::Deserialize(e.to_string()))?;

        let event_company = match &ev {
            OfferEvent::OfferCreated(e) => e.company_id,
            OfferEvent::OfferSent(e) => e.company_id,
            OfferEvent::OfferAccepted(e) => e.company_id,
            OfferEvent::OfferRejected(e) => e.company_id,
            OfferEvent::OfferExpired(e) => e.company_id,
        };

        if event_company != company_id {
            return Err(OfferProjectionError::CompanyIsolation(
                "event company_id does not match envelope company_id".to_string(),
            ));
        }

        match ev {
            OfferEvent::OfferCreated(e) => {
                self.store.upsert(
                    company_id,
                    e.offer_id,
                    OfferReadModel {
                        offer_id: e.offer_id,
                        number: e.number.to_string(),
                        customer_id: e.customer_id,
                        status: OfferStatus::Draft,
                        lines: e.lines,
                        net_total: e.net_total,
                        valid_until: e.valid_until,
                    },
                );
            }
            OfferEvent::OfferSent(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.offer_id) {
                    rm.status = OfferStatus::Sent;
                    self.store.upsert(company_id, e.offer_id, rm);
                }
            }
            OfferEvent::OfferAccepted(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.offer_id) {
                    rm.status = OfferStatus::Accepted;
                    self.store.upsert(company_id, e.offer_id, rm);
                }
            }
            OfferEvent::OfferRejected(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.offer_id) {
                    rm.status = OfferStatus::Rejected;
                    self.store.upsert(company_id, e.offer_id, rm);
                }
            }
            OfferEvent::OfferExpired(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.offer_id) {
                    rm.status = OfferStatus::Expired;
                    self.store.upsert(company_id, e.offer_id, rm);
                }
            }
        }

        self.update_cursor(company_id, aggregate_id, seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryCompanyStore;
    use faktura_core::AggregateId;
    use faktura_numbering::DocumentNumber;
    use faktura_offers::{OfferAccepted, OfferCreated, OfferSent};
    use faktura_products::ProductId;

    fn make_envelope(
        company_id: CompanyId,
        aggregate_id: AggregateId,
        seq: u64,
        event: OfferEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            company_id,
            aggregate_id,
            "offers.offer".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    #[test]
    fn follows_offer_through_acceptance() {
        let store = Arc::new(InMemoryCompanyStore::<OfferId, OfferReadModel>::new());
        let proj = OfferListProjection::new(store.clone());

        let company_id = CompanyId::new();
        let offer_id = OfferId::new(AggregateId::new());
        let customer_id = CustomerId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            company_id,
            offer_id.0,
            1,
            OfferEvent::OfferCreated(OfferCreated {
                company_id,
                offer_id,
                customer_id,
                number: DocumentNumber::new("AN", 2025, 1).unwrap(),
                lines: vec![OfferLine {
                    line_no: 1,
                    product_id: ProductId::new(AggregateId::new()),
                    description: "Beratung".to_string(),
                    quantity: 1,
                    unit_price: 50_000,
                    vat_rate_bps: 1900,
                }],
                valid_until: None,
                net_total: 50_000,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            company_id,
            offer_id.0,
            2,
            OfferEvent::OfferSent(OfferSent {
                company_id,
                offer_id,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            company_id,
            offer_id.0,
            3,
            OfferEvent::OfferAccepted(OfferAccepted {
                company_id,
                offer_id,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        let rm = proj.get(company_id, &offer_id).unwrap();
        assert_eq!(rm.status, OfferStatus::Accepted);
        assert_eq!(rm.number, "AN-2025-0001");
        assert_eq!(rm.lines.len(), 1);
    }
}
