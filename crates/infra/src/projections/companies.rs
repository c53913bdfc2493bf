use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;

use faktura_companies::CompanyEvent;
use faktura_core::{AggregateId, Address, CompanyId};
use faktura_events::EventEnvelope;
use faktura_numbering::NumberingConfig;

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::CompanyStore;

/// Queryable company read model: profile + numbering settings.
///
/// The numbering configuration here is what the number allocator consumes at
/// document-creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyReadModel {
    pub company_id: CompanyId,
    pub name: String,
    pub address: Address,
    pub tax_number: Option<String>,
    pub vat_id: Option<String>,
    pub small_business: bool,
    pub numbering: NumberingConfig,
}

/// Company+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    company_id: CompanyId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum CompanyProjectionError {
    #[error("failed to deserialize company event: {0}")]
    Deserialize(String),

    #[error("company isolation violation: {0}")]
    CompanyIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Company registry projection.
///
/// Consumes published envelopes (JSON payloads) and maintains the company
/// read model the rest of the application resolves settings from.
#[derive(Debug)]
pub struct CompanyRegistryProjection<S, C = InMemoryCursorStore>
where
    S: CompanyStore<CompanyId, CompanyReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> CompanyRegistryProjection<S>
where
    S: CompanyStore<CompanyId, CompanyReadModel>,
{
    /// Create a new projection with in-memory cursor tracking.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "companies.registry".to_string(),
        }
    }

    /// Create a new projection with persistent cursor tracking.
    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> CompanyRegistryProjection<S, C> {
        CompanyRegistryProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> CompanyRegistryProjection<S, C>
where
    S: CompanyStore<CompanyId, CompanyReadModel>,
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

    /// Query the read model for one company.
    pub fn get(&self, company_id: CompanyId) -> Option<CompanyReadModel> {
        self.store.get(company_id, &company_id)
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), CompanyProjectionError> {
        if envelope.aggregate_type() != "companies.company" {
            return Ok(());
        }

        let company_id = envelope.company_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(company_id, aggregate_id);

        if seq == 0 {
            return Err(CompanyProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(CompanyProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: CompanyEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CompanyProjectionError::Deserialize(e.to_string()))?;

        let event_company = match &ev {
            CompanyEvent::CompanyRegistered(e) => e.company_id,
            CompanyEvent::CompanyProfileUpdated(e) => e.company_id,
            CompanyEvent::NumberingConfigured(e) => e.company_id,
        };

        if event_company != company_id {
            return Err(CompanyProjectionError::CompanyIsolation(
                "event company_id does not match envelope company_id".to_string(),
            ));
        }

        match ev {
            CompanyEvent::CompanyRegistered(e) => {
                self.store.upsert(
                    company_id,
                    company_id,
                    CompanyReadModel {
                        company_id: e.company_id,
                        name: e.name,
                        address: e.address,
                        tax_number: e.tax_number,
                        vat_id: e.vat_id,
                        small_business: e.small_business,
                        numbering: NumberingConfig::default(),
                    },
                );
            }
            CompanyEvent::CompanyProfileUpdated(e) => {
                if let Some(mut rm) = self.store.get(company_id, &company_id) {
                    rm.name = e.name;
                    rm.address = e.address;
                    rm.tax_number = e.tax_number;
                    rm.vat_id = e.vat_id;
                    rm.small_business = e.small_business;
                    self.store.upsert(company_id, company_id, rm);
                }
            }
            CompanyEvent::NumberingConfigured(e) => {
                if let Some(mut rm) = self.store.get(company_id, &company_id) {
                    rm.numbering = e.config;
                    self.store.upsert(company_id, company_id, rm);
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
    use chrono::Utc;
    use faktura_companies::{CompanyRegistered, NumberingConfigured};
    use faktura_core::AggregateId;

    fn make_envelope(
        company_id: CompanyId,
        seq: u64,
        event: CompanyEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            company_id,
            AggregateId::from_uuid(*company_id.as_uuid()),
            "companies.company".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    #[test]
    fn registers_company_and_applies_numbering_config() {
        let store = Arc::new(InMemoryCompanyStore::<CompanyId, CompanyReadModel>::new());
        let proj = CompanyRegistryProjection::new(store.clone());

        let company_id = CompanyId::new();
        let registered = CompanyEvent::CompanyRegistered(CompanyRegistered {
            company_id,
            name: "Muster GmbH".to_string(),
            address: Address::new("Musterstr. 1", "12345", "Berlin", "Deutschland"),
            tax_number: None,
            vat_id: None,
            small_business: true,
            occurred_at: Utc::now(),
        });
        proj.apply_envelope(&make_envelope(company_id, 1, registered))
            .unwrap();

        let rm = proj.get(company_id).unwrap();
        assert_eq!(rm.name, "Muster GmbH");
        assert!(rm.small_business);
        assert_eq!(
            rm.numbering
                .prefix_for(faktura_numbering::DocumentKind::Invoice),
            "RE"
        );

        let config = NumberingConfig::new("KD", "R", "ANG", "GS").unwrap();
        let configured = CompanyEvent::NumberingConfigured(NumberingConfigured {
            company_id,
            config: config.clone(),
            occurred_at: Utc::now(),
        });
        proj.apply_envelope(&make_envelope(company_id, 2, configured))
            .unwrap();

        let rm = proj.get(company_id).unwrap();
        assert_eq!(rm.numbering, config);
    }

    #[test]
    fn replayed_envelopes_are_ignored() {
        let store = Arc::new(InMemoryCompanyStore::<CompanyId, CompanyReadModel>::new());
        let proj = CompanyRegistryProjection::new(store.clone());

        let company_id = CompanyId::new();
        let registered = CompanyEvent::CompanyRegistered(CompanyRegistered {
            company_id,
            name: "Muster GmbH".to_string(),
            address: Address::default(),
            tax_number: None,
            vat_id: None,
            small_business: false,
            occurred_at: Utc::now(),
        });
        let env = make_envelope(company_id, 1, registered);

        proj.apply_envelope(&env).unwrap();
        // Redelivery is tolerated and must not error.
        proj.apply_envelope(&env).unwrap();

        assert!(proj.get(company_id).is_some());
    }
}
