use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use chrono::Utc;

use faktura_companies::{
    Company, CompanyCommand, ConfigureNumbering, RegisterCompany, UpdateCompanyProfile,
};
use faktura_core::CompanyId;
use faktura_numbering::NumberingConfig;

use crate::app::services::{AppServices, company_aggregate_id};
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_company).patch(update_company))
        .route("/:id/numbering", put(configure_numbering))
}

/// Registration is the one company route outside the company context: it
/// creates the context everything else runs under.
pub async fn register_company(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterCompanyRequest>,
) -> axum::response::Response {
    let company_id = CompanyId::new();

    let cmd = CompanyCommand::RegisterCompany(RegisterCompany {
        company_id,
        name: body.name,
        address: body.address.unwrap_or_default(),
        tax_number: body.tax_number,
        vat_id: body.vat_id,
        small_business: body.small_business,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Company>(
        company_id,
        company_aggregate_id(company_id),
        "companies.company",
        cmd,
        |c, _aggregate_id| Company::empty(c),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": company_id.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn get_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let company_id = match parse_scoped_company_id(&company, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.companies_get(company_id) {
        Some(rm) => (StatusCode::OK, Json(dto::company_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "company not found"),
    }
}

pub async fn update_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateCompanyRequest>,
) -> axum::response::Response {
    let company_id = match parse_scoped_company_id(&company, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = CompanyCommand::UpdateCompanyProfile(UpdateCompanyProfile {
        company_id,
        name: body.name,
        address: body.address,
        tax_number: body.tax_number,
        vat_id: body.vat_id,
        small_business: body.small_business,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Company>(
        company_id,
        company_aggregate_id(company_id),
        "companies.company",
        cmd,
        |c, _aggregate_id| Company::empty(c),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": company_id.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn configure_numbering(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ConfigureNumberingRequest>,
) -> axum::response::Response {
    let company_id = match parse_scoped_company_id(&company, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Prefixes are validated once, here at the boundary.
    let config = match NumberingConfig::new(
        body.customer_prefix,
        body.invoice_prefix,
        body.offer_prefix,
        body.credit_note_prefix,
    ) {
        Ok(c) => c,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string());
        }
    };

    let cmd = CompanyCommand::ConfigureNumbering(ConfigureNumbering {
        company_id,
        config,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Company>(
        company_id,
        company_aggregate_id(company_id),
        "companies.company",
        cmd,
        |c, _aggregate_id| Company::empty(c),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": company_id.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

/// The path id must name the company from the request context; anything else
/// is treated as an unknown resource.
fn parse_scoped_company_id(
    company: &crate::context::CompanyContext,
    id: &str,
) -> Result<CompanyId, axum::response::Response> {
    let parsed: CompanyId = id.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid company id")
    })?;

    if parsed != company.company_id() {
        return Err(errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "company not found",
        ));
    }

    Ok(parsed)
}
