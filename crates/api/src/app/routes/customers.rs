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
use faktura_customers::{
    Customer, CustomerCommand, CustomerId, DeactivateCustomer, ReactivateCustomer,
    RegisterCustomer, UpdateCustomer,
};
use faktura_numbering::DocumentKind;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_customer).get(list_customers))
        .route("/outstanding", get(list_outstanding))
        .route("/:id", get(get_customer).patch(update_customer))
        .route("/:id/deactivate", post(deactivate_customer))
        .route("/:id/reactivate", post(reactivate_customer))
        .route("/:id/metrics", get(customer_metrics))
}

#[derive(Debug, serde::Deserialize)]
pub struct ListCustomersQuery {
    /// Case-insensitive name substring filter.
    pub q: Option<String>,
}

pub async fn register_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Json(body): Json<dto::RegisterCustomerRequest>,
) -> axum::response::Response {
    let company_id = company.company_id();
    let kind = match errors::parse_customer_kind(&body.kind) {
        Ok(k) => k,
        Err(resp) => return resp,
    };

    let now = Utc::now();
    let number =
        match services.allocate_document_number(company_id, DocumentKind::Customer, now.year()) {
            Ok(n) => n,
            Err(e) => return errors::allocation_error_to_response(e),
        };

    let agg = AggregateId::new();
    let customer_id = CustomerId::new(agg);

    let cmd = CustomerCommand::RegisterCustomer(RegisterCustomer {
        company_id,
        customer_id,
        number: number.clone(),
        name: body.name,
        kind,
        contact: body.contact,
        address: body.address,
        vat_number: body.vat_number,
        occurred_at: now,
    });

    let committed = match services.dispatch::<Customer>(
        company_id,
        agg,
        "customers.customer",
        cmd,
        |_c, aggregate_id| Customer::empty(CustomerId::new(aggregate_id)),
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

pub async fn list_customers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    axum::extract::Query(query): axum::extract::Query<ListCustomersQuery>,
) -> axum::response::Response {
    let customers = match query.q {
        Some(ref q) => services.customers_search(company.company_id(), q),
        None => services.customers_list(company.company_id()),
    };
    let items = customers
        .into_iter()
        .map(dto::customer_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

/// Customers that still owe money, with their open amounts.
pub async fn list_outstanding(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
) -> axum::response::Response {
    let items = services
        .customer_metrics_outstanding(company.company_id())
        .into_iter()
        .map(dto::customer_metrics_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid customer id");
        }
    };
    let customer_id = CustomerId::new(agg);

    match services.customers_get(company.company_id(), &customer_id) {
        Some(rm) => (StatusCode::OK, Json(dto::customer_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "customer not found"),
    }
}

pub async fn update_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateCustomerRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid customer id");
        }
    };
    let customer_id = CustomerId::new(agg);

    let kind = match body.kind {
        Some(ref s) => match errors::parse_customer_kind(s) {
            Ok(k) => Some(k),
            Err(resp) => return resp,
        },
        None => None,
    };

    let cmd = CustomerCommand::UpdateCustomer(UpdateCustomer {
        company_id: company.company_id(),
        customer_id,
        name: body.name,
        kind,
        contact: body.contact,
        address: body.address,
        vat_number: body.vat_number,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Customer>(
        company.company_id(),
        agg,
        "customers.customer",
        cmd,
        |_c, aggregate_id| Customer::empty(CustomerId::new(aggregate_id)),
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

pub async fn deactivate_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::DeactivateCustomerRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid customer id");
        }
    };
    let customer_id = CustomerId::new(agg);

    let cmd = CustomerCommand::DeactivateCustomer(DeactivateCustomer {
        company_id: company.company_id(),
        customer_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Customer>(
        company.company_id(),
        agg,
        "customers.customer",
        cmd,
        |_c, aggregate_id| Customer::empty(CustomerId::new(aggregate_id)),
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

pub async fn reactivate_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid customer id");
        }
    };
    let customer_id = CustomerId::new(agg);

    let cmd = CustomerCommand::ReactivateCustomer(ReactivateCustomer {
        company_id: company.company_id(),
        customer_id,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Customer>(
        company.company_id(),
        agg,
        "customers.customer",
        cmd,
        |_c, aggregate_id| Customer::empty(CustomerId::new(aggregate_id)),
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

pub async fn customer_metrics(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid customer id");
        }
    };
    let customer_id = CustomerId::new(agg);

    // A customer without invoices has empty metrics, not a 404; only an
    // unknown customer id is an error.
    if services
        .customers_get(company.company_id(), &customer_id)
        .is_none()
    {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "customer not found");
    }

    let metrics = services
        .customer_metrics_get(company.company_id(), &customer_id)
        .unwrap_or_else(|| faktura_infra::projections::CustomerMetrics::new(customer_id));

    (StatusCode::OK, Json(dto::customer_metrics_to_json(metrics))).into_response()
}
