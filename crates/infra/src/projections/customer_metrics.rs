//! Customer metrics projection.
//!
//! Maintains the per-customer figures the customer detail view shows:
//! invoice count, revenue (gross of paid invoices) and outstanding amount
//! (open gross of sent/overdue invoices). Derived purely from invoice
//! events; rebuildable from scratch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;

use faktura_core::{AggregateId, CompanyId};
use faktura_customers::CustomerId;
use faktura_events::EventEnvelope;
use faktura_invoicing::{InvoiceEvent, InvoiceStatus};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::CompanyStore;

/// Read model: per-customer invoicing figures for a company.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerMetrics {
    pub customer_id: CustomerId,
    /// Number of invoices ever created for this customer (cancellations do
    /// not reduce it; documents never disappear).
    pub invoice_count: u32,
    /// Gross total of paid invoices.
    pub revenue: u64,
    /// Outstanding gross across sent/overdue invoices.
    pub outstanding: u64,
}

impl CustomerMetrics {
    pub fn new(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            invoice_count: 0,
            revenue: 0,
            outstanding: 0,
        }
    }
}

/// Per-invoice state needed to attribute later events to the right customer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InvoiceState {
    customer_id: CustomerId,
    gross: u64,
    paid: u64,
    status: InvoiceStatus,
}

/// Company+aggregate cursor for idempotent projection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    company_id: CompanyId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum CustomerMetricsProjectionError {
    #[error("failed to deserialize invoice event: {0}")]
    Deserialize(String),

    #[error("company isolation violation: {0}")]
    CompanyIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Customer metrics projection: aggregates invoicing figures per customer.
#[derive(Debug)]
pub struct CustomerMetricsProjection<S, C = InMemoryCursorStore>
where
    S: CompanyStore<CustomerId, CustomerMetrics>,
{
    store: S,
    invoice_states: RwLock<HashMap<(CompanyId, AggregateId), InvoiceState>>,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> CustomerMetricsProjection<S>
where
    S: CompanyStore<CustomerId, CustomerMetrics>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            invoice_states: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "customers.metrics".to_string(),
        }
    }

    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> CustomerMetricsProjection<S, C> {
        CustomerMetricsProjection {
            store: self.store,
            invoice_states: self.invoice_states,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> CustomerMetricsProjection<S, C>
where
    S: CompanyStore<CustomerId, CustomerMetrics>,
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

    /// Get metrics for a specific customer.
    pub fn get(&self, company_id: CompanyId, customer_id: &CustomerId) -> Option<CustomerMetrics> {
        self.store.get(company_id, customer_id)
    }

    /// List all customer metrics for a company.
    pub fn list(&self, company_id: CompanyId) -> Vec<CustomerMetrics> {
        self.store.list(company_id)
    }

    /// Customers with outstanding amounts (non-zero).
    pub fn list_with_outstanding(&self, company_id: CompanyId) -> Vec<CustomerMetrics> {
        self.store
            .list(company_id)
            .into_iter()
            .filter(|m| m.outstanding > 0)
            .collect()
    }

    /// Apply envelope into customer metrics.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), CustomerMetricsProjectionError> {
        if envelope.aggregate_type() != "invoicing.invoice" {
            return Ok(());
        }

        let company_id = envelope.company_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(company_id, aggregate_id);

        if seq == 0 {
            return Err(CustomerMetricsProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(CustomerMetricsProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CustomerMetricsProjectionError::Deserialize(e.to_string()))?;

        let event_company = match &ev {
            InvoiceEvent::InvoiceCreated(e) => e.company_id,
            InvoiceEvent::InvoiceSent(e) => e.company_id,
            InvoiceEvent::PaymentRegistered(e) => e.company_id,
            InvoiceEvent::InvoiceMarkedOverdue(e) => e.company_id,
            InvoiceEvent::InvoiceCancelled(e) => e.company_id,
            InvoiceEvent::ReminderIssued(e) => e.company_id,
        };

        if event_company != company_id {
            return Err(CustomerMetricsProjectionError::CompanyIsolation(
                "event company_id does not match envelope company_id".to_string(),
            ));
        }

        match ev {
            InvoiceEvent::InvoiceCreated(e) => {
                if let Ok(mut states) = self.invoice_states.write() {
                    states.insert(
                        (company_id, aggregate_id),
                        InvoiceState {
                            customer_id: e.customer_id,
                            gross: e.totals.gross,
                            paid: 0,
                            status: InvoiceStatus::Draft,
                        },
                    );
                }

                let mut metrics = self
                    .store
                    .get(company_id, &e.customer_id)
                    .unwrap_or_else(|| CustomerMetrics::new(e.customer_id));
                metrics.invoice_count += 1;
                self.store.upsert(company_id, e.customer_id, metrics);
            }
            InvoiceEvent::InvoiceSent(_) => {
                let state = self.state_of(company_id, aggregate_id);
                if let Some(mut state) = state {
                    state.status = InvoiceStatus::Sent;
                    let open = state.gross.saturating_sub(state.paid);
                    self.put_state(company_id, aggregate_id, state.clone());

                    if let Some(mut metrics) = self.store.get(company_id, &state.customer_id) {
                        metrics.outstanding += open;
                        self.store.upsert(company_id, state.customer_id, metrics);
                    }
                }
            }
            InvoiceEvent::PaymentRegistered(e) => {
                let state = self.state_of(company_id, aggregate_id);
                if let Some(mut state) = state {
                    let was_open =
                        matches!(state.status, InvoiceStatus::Sent | InvoiceStatus::Overdue);
                    state.paid = e.new_total_paid;

                    let mut metrics = self
                        .store
                        .get(company_id, &state.customer_id)
                        .unwrap_or_else(|| CustomerMetrics::new(state.customer_id));

                    if was_open {
                        metrics.outstanding = metrics.outstanding.saturating_sub(e.amount);
                    }
                    if state.paid >= state.gross && state.status != InvoiceStatus::Paid {
                        state.status = InvoiceStatus::Paid;
                        metrics.revenue += state.gross;
                    }

                    self.store.upsert(company_id, state.customer_id, metrics);
                    self.put_state(company_id, aggregate_id, state);
                }
            }
            InvoiceEvent::InvoiceMarkedOverdue(_) => {
                // Overdue stays part of outstanding; only the status changes.
                if let Some(mut state) = self.state_of(company_id, aggregate_id) {
                    state.status = InvoiceStatus::Overdue;
                    self.put_state(company_id, aggregate_id, state);
                }
            }
            InvoiceEvent::InvoiceCancelled(_) => {
                if let Some(mut state) = self.state_of(company_id, aggregate_id) {
                    let was_open =
                        matches!(state.status, InvoiceStatus::Sent | InvoiceStatus::Overdue);
                    if was_open {
                        let open = state.gross.saturating_sub(state.paid);
                        if let Some(mut metrics) = self.store.get(company_id, &state.customer_id) {
                            metrics.outstanding = metrics.outstanding.saturating_sub(open);
                            self.store.upsert(company_id, state.customer_id, metrics);
                        }
                    }
                    state.status = InvoiceStatus::Cancelled;
                    self.put_state(company_id, aggregate_id, state);
                }
            }
            InvoiceEvent::ReminderIssued(_) => {
                // No effect on the figures.
            }
        }

        self.update_cursor(company_id, aggregate_id, seq);
        Ok(())
    }

    fn state_of(&self, company_id: CompanyId, aggregate_id: AggregateId) -> Option<InvoiceState> {
        self.invoice_states
            .read()
            .ok()
            .and_then(|m| m.get(&(company_id, aggregate_id)).cloned())
    }

    fn put_state(&self, company_id: CompanyId, aggregate_id: AggregateId, state: InvoiceState) {
        if let Ok(mut states) = self.invoice_states.write() {
            states.insert((company_id, aggregate_id), state);
        }
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), CustomerMetricsProjectionError> {
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

        if let Ok(mut states) = self.invoice_states.write() {
            states.clear();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryCompanyStore;
    use chrono::Utc;
    use faktura_core::AggregateId;
    use faktura_invoicing::{
        InvoiceCancelled, InvoiceCreated, InvoiceId, InvoiceLine, InvoiceSent, InvoiceTotals,
        PaymentRegistered,
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

    fn created_event(
        company_id: CompanyId,
        invoice_id: InvoiceId,
        customer_id: CustomerId,
        seq: u32,
        gross: u64,
    ) -> InvoiceEvent {
        InvoiceEvent::InvoiceCreated(InvoiceCreated {
            company_id,
            invoice_id,
            customer_id,
            number: DocumentNumber::new("RE", 2025, seq).unwrap(),
            lines: vec![InvoiceLine {
                line_no: 1,
                product_id: ProductId::new(AggregateId::new()),
                description: "Leistung".to_string(),
                quantity: 1,
                unit_price: gross,
                vat_rate_bps: 0,
            }],
            due_date: Utc::now(),
            totals: InvoiceTotals {
                net: gross,
                vat: 0,
                gross,
            },
            offer_id: None,
            occurred_at: Utc::now(),
        })
    }

    fn projection()
    -> CustomerMetricsProjection<Arc<InMemoryCompanyStore<CustomerId, CustomerMetrics>>> {
        CustomerMetricsProjection::new(Arc::new(InMemoryCompanyStore::new()))
    }

    #[test]
    fn sending_an_invoice_raises_outstanding() {
        let proj = projection();
        let company_id = CompanyId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());
        let customer_id = CustomerId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            company_id,
            invoice_id.0,
            1,
            created_event(company_id, invoice_id, customer_id, 1, 20_000),
        ))
        .unwrap();

        let metrics = proj.get(company_id, &customer_id).unwrap();
        assert_eq!(metrics.invoice_count, 1);
        assert_eq!(metrics.outstanding, 0);

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

        let metrics = proj.get(company_id, &customer_id).unwrap();
        assert_eq!(metrics.outstanding, 20_000);
        assert_eq!(metrics.revenue, 0);
    }

    #[test]
    fn full_payment_moves_gross_from_outstanding_to_revenue() {
        let proj = projection();
        let company_id = CompanyId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());
        let customer_id = CustomerId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            company_id,
            invoice_id.0,
            1,
            created_event(company_id, invoice_id, customer_id, 1, 20_000),
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
                amount: 5_000,
                new_total_paid: 5_000,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        let metrics = proj.get(company_id, &customer_id).unwrap();
        assert_eq!(metrics.outstanding, 15_000);
        assert_eq!(metrics.revenue, 0);

        proj.apply_envelope(&make_envelope(
            company_id,
            invoice_id.0,
            4,
            InvoiceEvent::PaymentRegistered(PaymentRegistered {
                company_id,
                invoice_id,
                amount: 15_000,
                new_total_paid: 20_000,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        let metrics = proj.get(company_id, &customer_id).unwrap();
        assert_eq!(metrics.outstanding, 0);
        assert_eq!(metrics.revenue, 20_000);
        assert_eq!(metrics.invoice_count, 1);
    }

    #[test]
    fn cancellation_releases_outstanding_but_keeps_the_count() {
        let proj = projection();
        let company_id = CompanyId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());
        let customer_id = CustomerId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            company_id,
            invoice_id.0,
            1,
            created_event(company_id, invoice_id, customer_id, 1, 20_000),
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
            InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
                company_id,
                invoice_id,
                credit_note_number: None,
                reason: None,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        let metrics = proj.get(company_id, &customer_id).unwrap();
        assert_eq!(metrics.outstanding, 0);
        assert_eq!(metrics.revenue, 0);
        assert_eq!(metrics.invoice_count, 1);
    }

    #[test]
    fn metrics_accumulate_across_invoices() {
        let proj = projection();
        let company_id = CompanyId::new();
        let customer_id = CustomerId::new(AggregateId::new());

        for (seq, gross) in [(1u32, 10_000u64), (2, 15_000)] {
            let invoice_id = InvoiceId::new(AggregateId::new());
            proj.apply_envelope(&make_envelope(
                company_id,
                invoice_id.0,
                1,
                created_event(company_id, invoice_id, customer_id, seq, gross),
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
        }

        let metrics = proj.get(company_id, &customer_id).unwrap();
        assert_eq!(metrics.invoice_count, 2);
        assert_eq!(metrics.outstanding, 25_000);

        assert_eq!(proj.list_with_outstanding(company_id).len(), 1);
    }

    #[test]
    fn rebuild_from_scratch_is_deterministic() {
        let proj = projection();
        let company_id = CompanyId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());
        let customer_id = CustomerId::new(AggregateId::new());

        let envs = vec![
            make_envelope(
                company_id,
                invoice_id.0,
                2,
                InvoiceEvent::InvoiceSent(InvoiceSent {
                    company_id,
                    invoice_id,
                    occurred_at: Utc::now(),
                }),
            ),
            make_envelope(
                company_id,
                invoice_id.0,
                1,
                created_event(company_id, invoice_id, customer_id, 1, 20_000),
            ),
        ];

        proj.rebuild_from_scratch(envs).unwrap();

        let metrics = proj.get(company_id, &customer_id).unwrap();
        assert_eq!(metrics.invoice_count, 1);
        assert_eq!(metrics.outstanding, 20_000);
    }
}
