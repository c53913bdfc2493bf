use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use faktura_core::AggregateId;
use faktura_products::{
    ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId, UpdateProduct,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/:id", get(get_product).patch(update_product))
        .route("/:id/archive", post(archive_product))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();
    let product_id = ProductId::new(agg);

    let cmd = ProductCommand::CreateProduct(CreateProduct {
        company_id: company.company_id(),
        product_id,
        name: body.name,
        description: body.description,
        unit: body.unit,
        unit_price: body.unit_price,
        vat_rate_bps: body.vat_rate_bps,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Product>(
        company.company_id(),
        agg,
        "products.product",
        cmd,
        |_c, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
) -> axum::response::Response {
    let items = services
        .products_list(company.company_id())
        .into_iter()
        .map(dto::product_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id");
        }
    };
    let product_id = ProductId::new(agg);

    match services.products_get(company.company_id(), &product_id) {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateProductRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id");
        }
    };
    let product_id = ProductId::new(agg);

    let cmd = ProductCommand::UpdateProduct(UpdateProduct {
        company_id: company.company_id(),
        product_id,
        name: body.name,
        description: body.description,
        unit: body.unit,
        unit_price: body.unit_price,
        vat_rate_bps: body.vat_rate_bps,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Product>(
        company.company_id(),
        agg,
        "products.product",
        cmd,
        |_c, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
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

pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id");
        }
    };
    let product_id = ProductId::new(agg);

    let cmd = ProductCommand::ArchiveProduct(ArchiveProduct {
        company_id: company.company_id(),
        product_id,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Product>(
        company.company_id(),
        agg,
        "products.product",
        cmd,
        |_c, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
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
