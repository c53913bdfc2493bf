use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, sse::Event as SseEvent},
    Json,
};

use crate::app::services::{self, AppServices};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(company): Extension<crate::context::CompanyContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "company_id": company.company_id().to_string(),
    }))
}

pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(company): Extension<crate::context::CompanyContext>,
) -> axum::response::Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>>
{
    services::company_sse_stream(services, company.company_id())
}
