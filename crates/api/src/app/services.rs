use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use faktura_core::{AggregateId, CompanyId, DomainError};
use faktura_customers::CustomerId;
use faktura_events::{EventBus, EventEnvelope, InMemoryEventBus};
use faktura_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{InMemoryEventStore, PostgresEventStore, StoredEvent},
    projections::{
        companies::{CompanyReadModel, CompanyRegistryProjection},
        customer_metrics::{CustomerMetrics, CustomerMetricsProjection},
        customers::{CustomerDirectoryProjection, CustomerReadModel},
        invoices::{InvoiceListProjection, InvoiceReadModel},
        offers::{OfferListProjection, OfferReadModel},
        products::{ProductCatalogProjection, ProductReadModel},
    },
    read_model::InMemoryCompanyStore,
    sequences::PostgresSequenceStore,
};
use faktura_invoicing::InvoiceId;
use faktura_numbering::{
    AllocationError, DocumentKind, DocumentNumber, InMemorySequenceStore, NumberAllocator,
};
use faktura_offers::OfferId;
use faktura_products::ProductId;
use sqlx::PgPool;

type JsonEnvelope = EventEnvelope<serde_json::Value>;

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub company_id: CompanyId,
    pub topic: String,
    pub payload: serde_json::Value,
}

// Type-erased dispatchers for the two store backends.
type InMemoryDispatcher =
    CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<JsonEnvelope>>>;
type PersistentDispatcher =
    CommandDispatcher<Arc<PostgresEventStore>, Arc<InMemoryEventBus<JsonEnvelope>>>;

/// All read-model projections, driven by one bus subscriber.
#[derive(Clone)]
pub struct ProjectionSet {
    pub companies:
        Arc<CompanyRegistryProjection<Arc<InMemoryCompanyStore<CompanyId, CompanyReadModel>>>>,
    pub customers:
        Arc<CustomerDirectoryProjection<Arc<InMemoryCompanyStore<CustomerId, CustomerReadModel>>>>,
    pub products:
        Arc<ProductCatalogProjection<Arc<InMemoryCompanyStore<ProductId, ProductReadModel>>>>,
    pub offers: Arc<OfferListProjection<Arc<InMemoryCompanyStore<OfferId, OfferReadModel>>>>,
    pub invoices: Arc<InvoiceListProjection<Arc<InMemoryCompanyStore<InvoiceId, InvoiceReadModel>>>>,
    pub customer_metrics:
        Arc<CustomerMetricsProjection<Arc<InMemoryCompanyStore<CustomerId, CustomerMetrics>>>>,
}

impl ProjectionSet {
    fn new() -> Self {
        Self {
            companies: Arc::new(CompanyRegistryProjection::new(Arc::new(
                InMemoryCompanyStore::new(),
            ))),
            customers: Arc::new(CustomerDirectoryProjection::new(Arc::new(
                InMemoryCompanyStore::new(),
            ))),
            products: Arc::new(ProductCatalogProjection::new(Arc::new(
                InMemoryCompanyStore::new(),
            ))),
            offers: Arc::new(OfferListProjection::new(Arc::new(InMemoryCompanyStore::new()))),
            invoices: Arc::new(InvoiceListProjection::new(Arc::new(
                InMemoryCompanyStore::new(),
            ))),
            customer_metrics: Arc::new(CustomerMetricsProjection::new(Arc::new(
                InMemoryCompanyStore::new(),
            ))),
        }
    }

    /// Route one published envelope to the projection(s) it concerns.
    fn apply(&self, env: &JsonEnvelope) -> Result<(), String> {
        match env.aggregate_type() {
            "companies.company" => self.companies.apply_envelope(env).map_err(|e| e.to_string()),
            "customers.customer" => self.customers.apply_envelope(env).map_err(|e| e.to_string()),
            "products.product" => self.products.apply_envelope(env).map_err(|e| e.to_string()),
            "offers.offer" => self.offers.apply_envelope(env).map_err(|e| e.to_string()),
            "invoicing.invoice" => {
                self.invoices
                    .apply_envelope(env)
                    .map_err(|e| e.to_string())?;
                self.customer_metrics
                    .apply_envelope(env)
                    .map_err(|e| e.to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        dispatcher: Arc<InMemoryDispatcher>,
        allocator: Arc<NumberAllocator<Arc<InMemorySequenceStore>>>,
        projections: ProjectionSet,
        realtime_tx: broadcast::Sender<RealtimeMessage>,
    },
    Persistent {
        dispatcher: Arc<PersistentDispatcher>,
        allocator: Arc<NumberAllocator<Arc<PostgresSequenceStore>>>,
        projections: ProjectionSet,
        realtime_tx: broadcast::Sender<RealtimeMessage>,
    },
}

pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        return build_persistent_services().await;
    }

    build_in_memory_services()
}

fn spawn_projection_worker(
    bus: &Arc<InMemoryEventBus<JsonEnvelope>>,
    projections: ProjectionSet,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
) {
    let sub = bus.subscribe();
    tokio::task::spawn_blocking(move || {
        loop {
            match sub.recv() {
                Ok(env) => {
                    let at = env.aggregate_type().to_string();

                    if let Err(e) = projections.apply(&env) {
                        tracing::warn!("projection apply failed: {e}");
                        continue;
                    }

                    // Broadcast projection update (lossy; no backpressure on core).
                    let _ = realtime_tx.send(RealtimeMessage {
                        company_id: env.company_id(),
                        topic: format!("{at}.projection_updated"),
                        payload: serde_json::json!({
                            "kind": "projection_update",
                            "aggregate_type": at,
                            "aggregate_id": env.aggregate_id().to_string(),
                            "sequence_number": env.sequence_number(),
                        }),
                    });
                }
                Err(_) => break,
            }
        }
    });
}

fn build_in_memory_services() -> AppServices {
    // In-memory infra wiring (dev/test): store + bus + projections + counters.
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<JsonEnvelope>> = Arc::new(InMemoryEventBus::new());

    let projections = ProjectionSet::new();

    // Realtime channel (SSE): lossy broadcast, company-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_projection_worker(&bus, projections.clone(), realtime_tx.clone());

    let dispatcher: Arc<InMemoryDispatcher> =
        Arc::new(CommandDispatcher::new(store, bus.clone()));
    let allocator = Arc::new(NumberAllocator::new(Arc::new(InMemorySequenceStore::new())));

    AppServices::InMemory {
        dispatcher,
        allocator,
        projections,
        realtime_tx,
    }
}

async fn build_persistent_services() -> AppServices {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    let store = Arc::new(PostgresEventStore::new(pool.clone()));
    let bus: Arc<InMemoryEventBus<JsonEnvelope>> = Arc::new(InMemoryEventBus::new());

    let projections = ProjectionSet::new();

    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_projection_worker(&bus, projections.clone(), realtime_tx.clone());

    let dispatcher: Arc<PersistentDispatcher> =
        Arc::new(CommandDispatcher::new(store, bus.clone()));
    let allocator = Arc::new(NumberAllocator::new(Arc::new(PostgresSequenceStore::new(
        pool,
    ))));

    AppServices::Persistent {
        dispatcher,
        allocator,
        projections,
        realtime_tx,
    }
}

impl AppServices {
    fn projections(&self) -> &ProjectionSet {
        match self {
            AppServices::InMemory { projections, .. } => projections,
            AppServices::Persistent { projections, .. } => projections,
        }
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        match self {
            AppServices::InMemory { realtime_tx, .. } => realtime_tx,
            AppServices::Persistent { realtime_tx, .. } => realtime_tx,
        }
    }

    pub fn dispatch<A>(
        &self,
        company_id: CompanyId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(CompanyId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: faktura_core::Aggregate<Error = DomainError>,
        A::Event: faktura_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        match self {
            AppServices::InMemory { dispatcher, .. } => dispatcher.dispatch::<A>(
                company_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
            AppServices::Persistent { dispatcher, .. } => dispatcher.dispatch::<A>(
                company_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
        }
    }

    /// Allocate the next document number for `(company, kind, year)`.
    ///
    /// Resolves the company's numbering configuration from the read model
    /// (missing company → built-in default prefix) and probes the matching
    /// read model so a collision with an imported number is retried instead
    /// of persisted twice.
    pub fn allocate_document_number(
        &self,
        company_id: CompanyId,
        kind: DocumentKind,
        year: i32,
    ) -> Result<DocumentNumber, AllocationError> {
        let config = self
            .projections()
            .companies
            .get(company_id)
            .map(|rm| rm.numbering);

        let is_taken = |number: &DocumentNumber| self.number_taken(company_id, kind, number);

        match self {
            AppServices::InMemory { allocator, .. } => {
                allocator.allocate_unique(company_id, kind, year, config.as_ref(), is_taken)
            }
            AppServices::Persistent { allocator, .. } => {
                allocator.allocate_unique(company_id, kind, year, config.as_ref(), is_taken)
            }
        }
    }

    fn number_taken(&self, company_id: CompanyId, kind: DocumentKind, number: &DocumentNumber) -> bool {
        let number = number.to_string();
        let projections = self.projections();
        match kind {
            DocumentKind::Customer => projections
                .customers
                .find_by_number(company_id, &number)
                .is_some(),
            DocumentKind::Invoice => projections
                .invoices
                .find_by_number(company_id, &number)
                .is_some(),
            DocumentKind::CreditNote => projections
                .invoices
                .find_by_credit_note_number(company_id, &number)
                .is_some(),
            DocumentKind::Offer => projections
                .offers
                .find_by_number(company_id, &number)
                .is_some(),
        }
    }

    pub fn companies_get(&self, company_id: CompanyId) -> Option<CompanyReadModel> {
        self.projections().companies.get(company_id)
    }

    pub fn customers_get(
        &self,
        company_id: CompanyId,
        customer_id: &CustomerId,
    ) -> Option<CustomerReadModel> {
        self.projections().customers.get(company_id, customer_id)
    }

    pub fn customers_list(&self, company_id: CompanyId) -> Vec<CustomerReadModel> {
        self.projections().customers.list(company_id)
    }

    pub fn customers_search(&self, company_id: CompanyId, query: &str) -> Vec<CustomerReadModel> {
        self.projections().customers.search_by_name(company_id, query)
    }

    pub fn customer_metrics_outstanding(&self, company_id: CompanyId) -> Vec<CustomerMetrics> {
        self.projections()
            .customer_metrics
            .list_with_outstanding(company_id)
    }

    pub fn customer_metrics_get(
        &self,
        company_id: CompanyId,
        customer_id: &CustomerId,
    ) -> Option<CustomerMetrics> {
        self.projections()
            .customer_metrics
            .get(company_id, customer_id)
    }

    pub fn products_get(
        &self,
        company_id: CompanyId,
        product_id: &ProductId,
    ) -> Option<ProductReadModel> {
        self.projections().products.get(company_id, product_id)
    }

    pub fn products_list(&self, company_id: CompanyId) -> Vec<ProductReadModel> {
        self.projections().products.list(company_id)
    }

    pub fn offers_get(&self, company_id: CompanyId, offer_id: &OfferId) -> Option<OfferReadModel> {
        self.projections().offers.get(company_id, offer_id)
    }

    pub fn offers_list(&self, company_id: CompanyId) -> Vec<OfferReadModel> {
        self.projections().offers.list(company_id)
    }

    pub fn invoices_get(
        &self,
        company_id: CompanyId,
        invoice_id: &InvoiceId,
    ) -> Option<InvoiceReadModel> {
        self.projections().invoices.get(company_id, invoice_id)
    }

    pub fn invoices_list(&self, company_id: CompanyId) -> Vec<InvoiceReadModel> {
        self.projections().invoices.list(company_id)
    }

    pub fn invoices_with_reminders(&self, company_id: CompanyId) -> Vec<InvoiceReadModel> {
        self.projections().invoices.list_with_reminders(company_id)
    }
}

/// Helper used by company command handlers: the company aggregate stream is
/// keyed by the same UUID as the company id itself.
pub fn company_aggregate_id(company_id: CompanyId) -> AggregateId {
    AggregateId::from_uuid(*company_id.as_uuid())
}

/// Build an SSE stream for a company (used by `/stream`).
pub fn company_sse_stream(
    services: Arc<AppServices>,
    company_id: CompanyId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.company_id == company_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
