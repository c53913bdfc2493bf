use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{Datelike, Utc};

use faktura_core::AggregateId;
use faktura_customers::CustomerId;
use faktura_invoicing::{
    CancelInvoice, CreateInvoice, Invoice, InvoiceCommand, InvoiceId, InvoiceLine, IssueReminder,
    MarkOverdue, RegisterPayment, SendInvoice,
};
use faktura_numbering::DocumentKind;
use faktura_products::ProductId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_invoice).get(list_invoices))
        .route("/:id", get(get_invoice))
        .route("/:id/send", post(send_invoice))
        .route("/:id/payments", post(register_payment))
        .route("/:id/overdue", post(mark_overdue))
        .route("/:id/cancel", post(cancel_invoice))
        .route("/:id/reminders", post(issue_reminder))
}

fn parse_lines(lines: Vec<dto::LineRequest>) -> Result<Vec<InvoiceLine>, axum::response::Response> {
    lines
        .into_iter()
        .enumerate()
        .map(|(idx, line)| {
            let product_agg: AggregateId = line.product_id.parse().map_err(|_| {
                errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id")
            })?;
            Ok(InvoiceLine {
                line_no: idx as u32 + 1,
                product_id: ProductId::new(product_agg),
                description: line.description,
                quantity: line.quantity,
                unit_price: line.unit_price,
                vat_rate_bps: line.vat_rate_bps,
            })
        })
        .collect()
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Json(body): Json<dto::CreateInvoiceRequest>,
) -> axum::response::Response {
    let company_id = company.company_id();

    let customer_agg: AggregateId = match body.customer_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid customer id");
        }
    };
    let customer_id = CustomerId::new(customer_agg);

    if services.customers_get(company_id, &customer_id).is_none() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "customer not found");
    }

    let due_date = match errors::parse_rfc3339(&body.due_date) {
        Ok(dt) => dt,
        Err(resp) => return resp,
    };

    let lines = match parse_lines(body.lines) {
        Ok(l) => l,
        Err(resp) => return resp,
    };

    // Kleinunternehmer companies issue VAT-free invoices.
    let vat_exempt = services
        .companies_get(company_id)
        .map(|rm| rm.small_business)
        .unwrap_or(false);

    let now = Utc::now();
    let number =
        match services.allocate_document_number(company_id, DocumentKind::Invoice, now.year()) {
            Ok(n) => n,
            Err(e) => return errors::allocation_error_to_response(e),
        };

    let agg = AggregateId::new();
    let invoice_id = InvoiceId::new(agg);

    let cmd = InvoiceCommand::CreateInvoice(CreateInvoice {
        company_id,
        invoice_id,
        customer_id,
        number: number.clone(),
        lines,
        due_date,
        vat_exempt,
        offer_id: None,
        occurred_at: now,
    });

    let committed = match services.dispatch::<Invoice>(
        company_id,
        agg,
        "invoicing.invoice",
        cmd,
        |_c, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "number": number.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
) -> axum::response::Response {
    let items = services
        .invoices_list(company.company_id())
        .into_iter()
        .map(dto::invoice_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

/// Dunning view: every invoice that has at least one reminder.
pub async fn list_reminders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
) -> axum::response::Response {
    let items = services
        .invoices_with_reminders(company.company_id())
        .into_iter()
        .map(dto::invoice_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id");
        }
    };
    let invoice_id = InvoiceId::new(agg);

    match services.invoices_get(company.company_id(), &invoice_id) {
        Some(rm) => (StatusCode::OK, Json(dto::invoice_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
    }
}

pub async fn send_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    dispatch_invoice_command(services, company, id, |company_id, invoice_id, now| {
        InvoiceCommand::SendInvoice(SendInvoice {
            company_id,
            invoice_id,
            occurred_at: now,
        })
    })
    .await
}

pub async fn register_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RegisterPaymentRequest>,
) -> axum::response::Response {
    dispatch_invoice_command(services, company, id, move |company_id, invoice_id, now| {
        InvoiceCommand::RegisterPayment(RegisterPayment {
            company_id,
            invoice_id,
            amount: body.amount,
            occurred_at: now,
        })
    })
    .await
}

pub async fn mark_overdue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    dispatch_invoice_command(services, company, id, |company_id, invoice_id, now| {
        InvoiceCommand::MarkOverdue(MarkOverdue {
            company_id,
            invoice_id,
            occurred_at: now,
        })
    })
    .await
}

/// Cancelling an issued invoice produces a credit note (Stornorechnung) with
/// its own `GU-` number; draft invoices are cancelled without one.
pub async fn cancel_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelInvoiceRequest>,
) -> axum::response::Response {
    let company_id = company.company_id();

    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id");
        }
    };
    let invoice_id = InvoiceId::new(agg);

    let needs_credit_note = services
        .invoices_get(company_id, &invoice_id)
        .map(|rm| rm.status != faktura_invoicing::InvoiceStatus::Draft)
        .unwrap_or(false);

    let now = Utc::now();
    let credit_note_number = if needs_credit_note {
        match services.allocate_document_number(company_id, DocumentKind::CreditNote, now.year()) {
            Ok(n) => Some(n),
            Err(e) => return errors::allocation_error_to_response(e),
        }
    } else {
        None
    };

    let cmd = InvoiceCommand::CancelInvoice(CancelInvoice {
        company_id,
        invoice_id,
        credit_note_number: credit_note_number.clone(),
        reason: body.reason,
        occurred_at: now,
    });

    let committed = match services.dispatch::<Invoice>(
        company_id,
        agg,
        "invoicing.invoice",
        cmd,
        |_c, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "credit_note_number": credit_note_number.map(|n| n.to_string()),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn issue_reminder(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::IssueReminderRequest>,
) -> axum::response::Response {
    let company_id = company.company_id();

    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id");
        }
    };
    let invoice_id = InvoiceId::new(agg);

    // The next level comes from the read model; the aggregate re-checks the
    // escalation invariant, so a stale read surfaces as 422 instead of a
    // silently skipped level.
    let current_level = services
        .invoices_get(company_id, &invoice_id)
        .map(|rm| rm.reminder_level)
        .unwrap_or(0);

    let cmd = InvoiceCommand::IssueReminder(IssueReminder {
        company_id,
        invoice_id,
        level: current_level + 1,
        fee: body.fee,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Invoice>(
        company_id,
        agg,
        "invoicing.invoice",
        cmd,
        |_c, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "level": current_level + 1,
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

async fn dispatch_invoice_command(
    services: Arc<AppServices>,
    company: crate::context::CompanyContext,
    id: String,
    make_command: impl FnOnce(
        faktura_core::CompanyId,
        InvoiceId,
        chrono::DateTime<Utc>,
    ) -> InvoiceCommand,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id");
        }
    };
    let invoice_id = InvoiceId::new(agg);

    let cmd = make_command(company.company_id(), invoice_id, Utc::now());

    let committed = match services.dispatch::<Invoice>(
        company.company_id(),
        agg,
        "invoicing.invoice",
        cmd,
        |_c, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()})),
    )
        .into_response()
}
