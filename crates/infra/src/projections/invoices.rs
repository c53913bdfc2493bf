use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use faktura_core::{AggregateId, CompanyId};
use faktura_customers::CustomerId;
use faktura_events::EventEnvelope;
use faktura_invoicing::{InvoiceEvent, InvoiceId, InvoiceStatus, InvoiceTotals};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::CompanyStore;

/// A reminder (Mahnung) recorded against an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderReadModel {
    pub level: u8,
    pub fee: u64,
    pub issued_at: DateTime<Utc>,
}

/// Queryable invoice read model: list/detail view with payment state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceReadModel {
    pub invoice_id: InvoiceId,
    pub number: String,
    pub customer_id: CustomerId,
    pub status: InvoiceStatus,
    pub totals: InvoiceTotals,
    pub total_paid: u64,
    pub due_date: DateTime<Utc>,
    pub reminder_level: u8,
    pub reminders: Vec<ReminderReadModel>,
    /// Credit note number assigned when the invoice was cancelled.
    pub credit_note_number: Option<String>,
}

impl InvoiceReadModel {
    pub fn outstanding(&self) -> u64 {
        self.totals.gross.saturating_sub(self.total_paid)
    }
}

/// Company+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    company_id: CompanyId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum InvoiceProjectionError {
    #[error("failed to deserialize invoice event: {0}")]
    Deserialize(String),

    #[error("company isolation violation: {0}")]
    CompanyIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Invoice list projection.
#[derive(Debug)]
pub struct InvoiceListProjection<S, C = InMemoryCursorStore>
where
    S: CompanyStore<InvoiceId, InvoiceReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> InvoiceListProjection<S>
where
    S: CompanyStore<InvoiceId, InvoiceReadModel>,
{
    /// Create a new projection with in-memory cursor tracking.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "invoicing.list".to_string(),
        }
    }

    /// Create a new projection with persistent cursor tracking.
    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> InvoiceListProjection<S, C> {
        InvoiceListProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> InvoiceListProjection<S, C>
where
    S: CompanyStore<InvoiceId, InvoiceReadModel>,
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

    /// Query read model for one company/invoice.
    pub fn get(&self, company_id: CompanyId, invoice_id: &InvoiceId) -> Option<InvoiceReadModel> {
        self.store.get(company_id, invoice_id)
    }

    /// List all invoices for a company (disposable read model).
    pub fn list(&self, company_id: CompanyId) -> Vec<InvoiceReadModel> {
        self.store.list(company_id)
    }

    /// Look up an invoice by document number (uniqueness probe).
    pub fn find_by_number(&self, company_id: CompanyId, number: &str) -> Option<InvoiceReadModel> {
        self.list(company_id).into_iter().find(|rm| rm.number == number)
    }

    /// Look up an invoice by its credit note number (uniqueness probe).
    pub fn find_by_credit_note_number(
        &self,
        company_id: CompanyId,
        number: &str,
    ) -> Option<InvoiceReadModel> {
        self.list(company_id)
            .into_iter()
            .find(|rm| rm.credit_note_number.as_deref() == Some(number))
    }

    /// Invoices with at least one reminder, for the dunning view.
    pub fn list_with_reminders(&self, company_id: CompanyId) -> Vec<InvoiceReadModel> {
        self.list(company_id)
            .into_iter()
            .filter(|rm| !rm.reminders.is_empty())
            .collect()
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), InvoiceProjectionError> {
        if envelope.aggregate_type() != "invoicing.invoice" {
            return Ok(());
        }

        let company_id = envelope.company_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(company_id, aggregate_id);

        if seq == 0 {
            return Err(InvoiceProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(InvoiceProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| InvoiceProjectionError::Deserialize(e.to_string()))?;

        let event_company = match &ev {
            InvoiceEvent::InvoiceCreated(e) => e.company_id,
            InvoiceEvent::InvoiceSent(e) => e.company_id,
            InvoiceEvent::PaymentRegistered(e) => e.company_id,
            InvoiceEvent::InvoiceMarkedOverdue(e) => e.company_id,
            InvoiceEvent::InvoiceCancelled(e) => e.company_id,
            InvoiceEvent::ReminderIssued(e) => e.company_id,
        };

        if event_company != company_id {
            return Err(InvoiceProjectionError::CompanyIsolation(
                "event company_id does not match envelope company_id".to_string(),
            ));
        }

        match ev {
            InvoiceEvent::InvoiceCreated(e) => {
                self.store.upsert(
                    company_id,
                    e.invoice_id,
                    InvoiceReadModel {
                        invoice_id: e.invoice_id,
                        number: e.number.to_string(),
                        customer_id: e.customer_id,
                        status: InvoiceStatus::Draft,
                        totals: e.totals,
                        total_paid: 0,
                        due_date: e.due_date,
                        reminder_level: 0,
                        reminders: Vec::new(),
                        credit_note_number: None,
                    },
                );
            }
            InvoiceEvent::InvoiceSent(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.invoice_id) {
                    rm.status = InvoiceStatus::Sent;
                    self.store.upsert(company_id, e.invoice_id, rm);
                }
            }
            InvoiceEvent::PaymentRegistered(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.invoice_id) {
                    rm.total_paid = e.new_total_paid;
                    if rm.total_paid >= rm.totals.gross {
                        rm.status = InvoiceStatus::Paid;
                    }
                    self.store.upsert(company_id, e.invoice_id, rm);
                }
            }
            InvoiceEvent::InvoiceMarkedOverdue(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.invoice_id) {
                    rm.status = InvoiceStatus::Overdue;
                    self.store.upsert(company_id, e.invoice_id, rm);
                }
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.invoice_id) {
                    rm.status = InvoiceStatus::Cancelled;
                    rm.credit_note_number = e.credit_note_number.map(|n| n.to_string());
                    self.store.upsert(company_id, e.invoice_id, rm);
                }
            }
            InvoiceEvent::ReminderIssued(e) => {
                if let Some(mut rm) = self.store.get(company_id, &e.invoice_id) {
                    rm.reminder_level = e.level;
                    rm.reminders.push(ReminderReadModel {
                        level: e.level,
                        fee: e.fee,
                        issued_at: e.occurred_at,
                    });
                    self.store.upsert(company_id, e.invoice_id, rm);
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
    use faktura_invoicing::{
        InvoiceCreated, InvoiceLine, InvoiceSent, PaymentRegistered, ReminderIssued,
    };
    use faktura_numbering::DocumentNumber;
    use faktura_products::ProductId;

    fn make_envelope(
        company_id: CompanyId,
        aggregate_id: AggregateId,
        seq: u64,
        event: InvoiceEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            company_id,
            aggregate_id,
            "invoicing.invoice".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn created_event(company_id: CompanyId, invoice_id: InvoiceId) -> InvoiceEvent {
        InvoiceEvent::InvoiceCreated(InvoiceCreated {
            company_id,
            invoice_id,
            customer_id: CustomerId::new(AggregateId::new()),
            number: DocumentNumber::new("RE", 2025, 1).unwrap(),
            lines: vec![InvoiceLine {
                line_no: 1,
                product_id: ProductId::new(AggregateId::new()),
                description: "Beratung".to_string(),
                quantity: 2,
                unit_price: 10_000,
                vat_rate_bps: 1900,
            }],
            due_date: Utc::now(),
            totals: InvoiceTotals {
                net: 20_000,
                vat: 3_800,
                gross: 23_800,
            },
            offer_id: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn tracks_payment_state_and_outstanding() {
        let store = Arc::new(InMemoryCompanyStore::<InvoiceId, InvoiceReadModel>::new());
        let proj = InvoiceListProjection::new(store.clone());

        let company_id = CompanyId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            company_id,
            invoice_id.0,
            1,
            created_event(company_id, invoice_id),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            company_id,
            invoice_id.0,
            2,
            InvoiceEvent::InvoiceSent(InvoiceSent {
                company_id,
                invoice_id,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            company_id,
            invoice_id.0,
            3,
            InvoiceEvent::PaymentRegistered(PaymentRegistered {
                company_id,
                invoice_id,
                amount: 3_800,
                new_total_paid: 3_800,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        let rm = proj.get(company_id, &invoice_id).unwrap();
        assert_eq!(rm.status, InvoiceStatus::Sent);
        assert_eq!(rm.outstanding(), 20_000);
        assert_eq!(rm.number, "RE-2025-0001");
    }

    #[test]
    fn records_reminders_for_the_dunning_view() {
        let store = Arc::new(InMemoryCompanyStore::<InvoiceId, InvoiceReadModel>::new());
        let proj = InvoiceListProjection::new(store.clone());

        let company_id = CompanyId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            company_id,
            invoice_id.0,
            1,
            created_event(company_id, invoice_id),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            company_id,
            invoice_id.0,
            2,
            InvoiceEvent::InvoiceSent(InvoiceSent {
                company_id,
                invoice_id,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            company_id,
            invoice_id.0,
            3,
            InvoiceEvent::ReminderIssued(ReminderIssued {
                company_id,
                invoice_id,
                level: 1,
                fee: 500,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        let with_reminders = proj.list_with_reminders(company_id);
        assert_eq!(with_reminders.len(), 1);
        assert_eq!(with_reminders[0].reminder_level, 1);
        assert_eq!(with_reminders[0].reminders[0].fee, 500);
    }
}
