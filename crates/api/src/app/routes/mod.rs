use axum::{Router, routing::get};

pub mod companies;
pub mod customers;
pub mod invoices;
pub mod offers;
pub mod products;
pub mod system;

/// Router for all company-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .route("/reminders", get(invoices::list_reminders))
        .nest("/companies", companies::router())
        .nest("/customers", customers::router())
        .nest("/products", products::router())
        .nest("/offers", offers::router())
        .nest("/invoices", invoices::router())
}
