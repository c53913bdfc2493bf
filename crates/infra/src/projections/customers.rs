use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;

use faktura_core::{AggregateId, Address, CompanyId};
use faktura_customers::{CustomerEvent, CustomerId, CustomerKind, CustomerStatus};
use faktura_events::EventEnvelope;

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::CompanyStore;

/// Queryable customer read model: directory of a company's customers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerReadModel {
    pub customer_id: CustomerId,
    pub number: String,
    pub name: String,
    pub kind: CustomerKind,
    pub status: CustomerStatus,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Address,
    pub vat_number: Option<String>,
}

impl CustomerReadModel {
    /// Derived on access, never stored: the VAT-number prompt for German
    /// business customers.
    pub fn needs_vat_number(&self) -> bool {
        self.kind == CustomerKind::Business
            && self.address.country == "Deutschland"
            && self.vat_number.is_none()
    }

    /// Single-line postal address, composed on access.
    pub fn full_address(&self) -> String {
        self.address.composed()
    }
}

/// Company+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    company_id: CompanyId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum CustomerProjectionError {
    #[error("failed to deserialize customer event: {0}")]
    Deserialize(String),

    #[error("company isolation violation: {0}")]
    CompanyIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Customer directory projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a
/// company-isolated read model for customers, suitable for lookup, listing
/// and the uniqueness probe used during number allocation.
#[derive(Debug)]
pub struct CustomerDirectoryProjection<S, C = InMemoryCursorStore>
where
    S: CompanyStore<CustomerId, CustomerReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> CustomerDirectoryProjection<S>
where
    S: CompanyStore<CustomerId, CustomerReadModel>,
{
    /// Create a new projection with in-memory cursor tracking.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "customers.directory".to_string(),
        }
    }

    /// Create a new projection with persistent cursor tracking.
    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> CustomerDirectoryProjection<S, C> {
        CustomerDirectoryProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> CustomerDirectoryProjection<S, C>
where
    S: CompanyStore<CustomerId, CustomerReadModel>,
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

    fn clear_cursors(&self, company_id: CompanyId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.company_id != company_id);
        }

        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store.clear_cursors(company_id, &self.projection_name);
        }
    }

    /// Query read model for one company/customer.
    pub fn get(&self, company_id: CompanyId, customer_id: &CustomerId) -> Option<CustomerReadModel> {
        self.store.get(company_id, customer_id)
    }

    /// List all customers for a company (disposable read model).
    pub fn list(&self, company_id: CompanyId) -> Vec<CustomerReadModel> {
        self.store.list(company_id)
    }

    /// Look up a customer by document number (uniqueness probe).
    pub fn find_by_number(&self, company_id: CompanyId, number: &str) -> Option<CustomerReadModel> {
        self.list(company_id).into_iter().find(|rm| rm.number == number)
    }

    /// Simple in-memory search by name substring (case-insensitive) for a company.
    pub fn search_by_name(&self, company_id: CompanyId, query: &str) -> Vec<CustomerReadModel> {
        let q = query.to_lowercase();
        self.list(company_id)
            .into_iter()
            .filter(|rm| rm.name.to_lowercase().contains(&q))
            .collect()
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), CustomerProjectionError> {
        if envelope.aggregate_type() != "customers.customer" {
            return Ok(());
        }

        let company_id = envelope.company_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(company_id, aggregate_id);

        if seq == 0 {
            return Err(CustomerProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(CustomerProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: CustomerEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CustomerProjectionError::Deserialize(e.to_string()))?;

        let event_company = match &ev {
            CustomerEvent::CustomerRegistered(e) => e.company_id,
            CustomerEvent::CustomerUpdated(e) => e.company_id,
            CustomerEvent::CustomerDeactivated(e) => e.company_id,
            CustomerEvent::CustomerReactivated(e) => e.company_id,
        };

        if event_company != company_id {
            return Err(CustomerProjectionError::CompanyIsolation(
                "event company_id does not match envelope company_id".to_string(),
            ));
        }

        match ev {
            CustomerEvent::CustomerRegistered(e) => {
                self.store.upsert(
                    company_id,
                    e.customer_id,
                    CustomerReadModel {
                        customer_id: e.customer_id,
                        number: e.number.to_string(),
                        name: e.name,
                        kind: e.kind,
                        status: CustomerStatus::Active,
                        email: e.contact.email,
                        phone: e.contact.phone,
                        address: e.address,
                        vat_number: e.vat_number,
                    },
                );
            }
            CustomerEvent::CustomerUpdated(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.customer_id) {
                    rm.name = e.name;
                    rm.kind = e.kind;
                    rm.email = e.contact.email;
                    rm.phone = e.contact.phone;
                    rm.address = e.address;
                    rm.vat_number = e.vat_number;
                    self.store.upsert(company_id, e.customer_id, rm);
                }
            }
            CustomerEvent::CustomerDeactivated(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.customer_id) {
                    rm.status = CustomerStatus::Inactive;
                    self.store.upsert(company_id, e.customer_id, rm);
                }
            }
            CustomerEvent::CustomerReactivated(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.customer_id) {
                    rm.status = CustomerStatus::Active;
                    self.store.upsert(company_id, e.customer_id, rm);
                }
            }
        }

        self.update_cursor(company_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), CustomerProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut companies = envs.iter().map(|e| e.company_id()).collect::<Vec<_>>();
            companies.sort_by_key(|c| *c.as_uuid().as_bytes());
            companies.dedup();
            for c in companies {
                self.store.clear_company(c);
                self.clear_cursors(c);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.company_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
