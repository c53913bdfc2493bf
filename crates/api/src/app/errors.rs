use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use faktura_customers::CustomerKind;
use faktura_infra::command_dispatcher::DispatchError;
use faktura_numbering::{AllocationError, SequenceError};

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
        DispatchError::CompanyIsolation(msg) => {
            json_error(StatusCode::FORBIDDEN, "company_isolation", msg)
        }
    }
}

pub fn allocation_error_to_response(err: AllocationError) -> axum::response::Response {
    match err {
        AllocationError::Sequence(SequenceError::Exhausted { .. }) => json_error(
            StatusCode::CONFLICT,
            "sequence_exhausted",
            err.to_string(),
        ),
        AllocationError::Conflict { .. } => {
            json_error(StatusCode::CONFLICT, "number_conflict", err.to_string())
        }
        AllocationError::Sequence(SequenceError::Store(msg)) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "sequence_store_error", msg)
        }
        AllocationError::Invalid(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "allocation_error",
            e.to_string(),
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_customer_kind(s: &str) -> Result<CustomerKind, axum::response::Response> {
    match s.to_lowercase().as_str() {
        "business" => Ok(CustomerKind::Business),
        "private" => Ok(CustomerKind::Private),
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_customer_kind",
            "kind must be one of: business, private",
        )),
    }
}

pub fn parse_rfc3339(s: &str) -> Result<chrono::DateTime<chrono::Utc>, axum::response::Response> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|_| {
            json_error(
                StatusCode::BAD_REQUEST,
                "invalid_date",
                "expected an RFC3339 timestamp",
            )
        })
}
