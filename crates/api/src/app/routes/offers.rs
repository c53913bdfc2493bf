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
use faktura_invoicing::{CreateInvoice, Invoice, InvoiceCommand, InvoiceId, InvoiceLine};
use faktura_numbering::DocumentKind;
use faktura_offers::{
    AcceptOffer, CreateOffer, ExpireOffer, Offer, OfferCommand, OfferId, OfferLine, OfferStatus,
    RejectOffer, SendOffer,
};
use faktura_products::ProductId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_offer).get(list_offers))
        .route("/:id", get(get_offer))
        .route("/:id/send", post(send_offer))
        .route("/:id/accept", post(accept_offer))
        .route("/:id/reject", post(reject_offer))
        .route("/:id/expire", post(expire_offer))
        .route("/:id/invoice", post(convert_offer))
}

fn parse_lines(lines: Vec<dto::LineRequest>) -> Result<Vec<OfferLine>, axum::response::Response> {
    lines
        .into_iter()
        .enumerate()
        .map(|(idx, line)| {
            let product_agg: AggregateId = line.product_id.parse().map_err(|_| {
                errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id")
            })?;
            Ok(OfferLine {
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

pub async fn create_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Json(body): Json<dto::CreateOfferRequest>,
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

    let valid_until = match body.valid_until {
        Some(ref s) => match errors::parse_rfc3339(s) {
            Ok(dt) => Some(dt),
            Err(resp) => return resp,
        },
        None => None,
    };

    let lines = match parse_lines(body.lines) {
        Ok(l) => l,
        Err(resp) => return resp,
    };

    let now = Utc::now();
    let number = match services.allocate_document_number(company_id, DocumentKind::Offer, now.year())
    {
        Ok(n) => n,
        Err(e) => return errors::allocation_error_to_response(e),
    };

    let agg = AggregateId::new();
    let offer_id = OfferId::new(agg);

    let cmd = OfferCommand::CreateOffer(CreateOffer {
        company_id,
        offer_id,
        customer_id,
        number: number.clone(),
        lines,
        valid_until,
        occurred_at: now,
    });

    let committed = match services.dispatch::<Offer>(
        company_id,
        agg,
        "offers.offer",
        cmd,
        |_c, aggregate_id| Offer::empty(OfferId::new(aggregate_id)),
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

pub async fn list_offers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
) -> axum::response::Response {
    let items = services
        .offers_list(company.company_id())
        .into_iter()
        .map(dto::offer_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid offer id");
        }
    };
    let offer_id = OfferId::new(agg);

    match services.offers_get(company.company_id(), &offer_id) {
        Some(rm) => (StatusCode::OK, Json(dto::offer_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "offer not found"),
    }
}

pub async fn send_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    dispatch_status_command(services, company, id, |company_id, offer_id, now| {
        OfferCommand::SendOffer(SendOffer {
            company_id,
            offer_id,
            occurred_at: now,
        })
    })
    .await
}

pub async fn accept_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    dispatch_status_command(services, company, id, |company_id, offer_id, now| {
        OfferCommand::AcceptOffer(AcceptOffer {
            company_id,
            offer_id,
            occurred_at: now,
        })
    })
    .await
}

pub async fn expire_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    dispatch_status_command(services, company, id, |company_id, offer_id, now| {
        OfferCommand::ExpireOffer(ExpireOffer {
            company_id,
            offer_id,
            occurred_at: now,
        })
    })
    .await
}

pub async fn reject_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RejectOfferRequest>,
) -> axum::response::Response {
    dispatch_status_command(services, company, id, move |company_id, offer_id, now| {
        OfferCommand::RejectOffer(RejectOffer {
            company_id,
            offer_id,
            reason: body.reason.clone(),
            occurred_at: now,
        })
    })
    .await
}

/// Convert an accepted offer into a draft invoice: copy the lines, allocate
/// an invoice number, and create the invoice referencing the offer.
pub async fn convert_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ConvertOfferRequest>,
) -> axum::response::Response {
    let company_id = company.company_id();

    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid offer id");
        }
    };
    let offer_id = OfferId::new(agg);

    let offer = match services.offers_get(company_id, &offer_id) {
        Some(rm) => rm,
        None => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "offer not found"),
    };

    if offer.status != OfferStatus::Accepted {
        return errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invariant_violation",
            "only accepted offers can be invoiced",
        );
    }

    let due_date = match errors::parse_rfc3339(&body.due_date) {
        Ok(dt) => dt,
        Err(resp) => return resp,
    };

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

    let invoice_agg = AggregateId::new();
    let invoice_id = InvoiceId::new(invoice_agg);
    let lines = offer
        .lines
        .iter()
        .map(|line| InvoiceLine {
            line_no: line.line_no,
            product_id: line.product_id,
            description: line.description.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            vat_rate_bps: line.vat_rate_bps,
        })
        .collect();

    let cmd = InvoiceCommand::CreateInvoice(CreateInvoice {
        company_id,
        invoice_id,
        customer_id: offer.customer_id,
        number: number.clone(),
        lines,
        due_date,
        vat_exempt,
        offer_id: Some(offer_id),
        occurred_at: now,
    });

    let committed = match services.dispatch::<Invoice>(
        company_id,
        invoice_agg,
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
            "id": invoice_agg.to_string(),
            "number": number.to_string(),
            "offer_id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

async fn dispatch_status_command(
    services: Arc<AppServices>,
    company: crate::context::CompanyContext,
    id: String,
    make_command: impl FnOnce(faktura_core::CompanyId, OfferId, chrono::DateTime<Utc>) -> OfferCommand,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid offer id");
        }
    };
    let offer_id = OfferId::new(agg);

    let cmd = make_command(company.company_id(), offer_id, Utc::now());

    let committed = match services.dispatch::<Offer>(
        company.company_id(),
        agg,
        "offers.offer",
        cmd,
        |_c, aggregate_id| Offer::empty(OfferId::new(aggregate_id)),
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
