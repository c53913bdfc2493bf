use serde::Deserialize;

use faktura_core::Address;
use faktura_customers::{ContactInfo, CustomerKind, CustomerStatus};
use faktura_infra::projections::{
    companies::CompanyReadModel,
    customer_metrics::CustomerMetrics,
    customers::CustomerReadModel,
    invoices::InvoiceReadModel,
    offers::OfferReadModel,
    products::ProductReadModel,
};
use faktura_offers::OfferStatus;
use faktura_products::ProductStatus;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterCompanyRequest {
    pub name: String,
    pub address: Option<Address>,
    pub tax_number: Option<String>,
    pub vat_id: Option<String>,
    #[serde(default)]
    pub small_business: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCompanyRequest {
    pub name: Option<String>,
    pub address: Option<Address>,
    pub tax_number: Option<String>,
    pub vat_id: Option<String>,
    pub small_business: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigureNumberingRequest {
    pub customer_prefix: String,
    pub invoice_prefix: String,
    pub offer_prefix: String,
    pub credit_note_prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterCustomerRequest {
    pub name: String,
    /// "business" or "private".
    pub kind: String,
    pub contact: Option<ContactInfo>,
    pub address: Option<Address>,
    pub vat_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCustomerRequest {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub contact: Option<ContactInfo>,
    pub address: Option<Address>,
    pub vat_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateCustomerRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub unit: String,
    pub unit_price: u64,
    pub vat_rate_bps: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub unit_price: Option<u64>,
    pub vat_rate_bps: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LineRequest {
    pub product_id: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: u64,
    pub vat_rate_bps: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOfferRequest {
    pub customer_id: String,
    pub lines: Vec<LineRequest>,
    /// RFC3339 timestamp.
    pub valid_until: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectOfferRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConvertOfferRequest {
    /// RFC3339 timestamp.
    pub due_date: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub customer_id: String,
    pub lines: Vec<LineRequest>,
    /// RFC3339 timestamp.
    pub due_date: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPaymentRequest {
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct CancelInvoiceRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssueReminderRequest {
    /// Late fee in cents.
    #[serde(default)]
    pub fee: u64,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn company_to_json(rm: CompanyReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.company_id.to_string(),
        "name": rm.name,
        "address": rm.address.composed(),
        "tax_number": rm.tax_number,
        "vat_id": rm.vat_id,
        "small_business": rm.small_business,
        "numbering": {
            "customer_prefix": rm.numbering.customer_prefix,
            "invoice_prefix": rm.numbering.invoice_prefix,
            "offer_prefix": rm.numbering.offer_prefix,
            "credit_note_prefix": rm.numbering.credit_note_prefix,
        },
    })
}

pub fn customer_to_json(rm: CustomerReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.customer_id.0.to_string(),
        "number": rm.number,
        "name": rm.name,
        "kind": customer_kind_str(rm.kind),
        "status": match rm.status {
            CustomerStatus::Active => "active",
            CustomerStatus::Inactive => "inactive",
        },
        "email": rm.email,
        "phone": rm.phone,
        "full_address": rm.full_address(),
        "vat_number": rm.vat_number,
        "needs_vat_number": rm.needs_vat_number(),
    })
}

pub fn customer_metrics_to_json(m: CustomerMetrics) -> serde_json::Value {
    serde_json::json!({
        "customer_id": m.customer_id.0.to_string(),
        "invoice_count": m.invoice_count,
        "revenue": m.revenue,
        "outstanding": m.outstanding,
    })
}

pub fn product_to_json(rm: ProductReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.product_id.0.to_string(),
        "name": rm.name,
        "description": rm.description,
        "unit": rm.unit,
        "unit_price": rm.unit_price,
        "vat_rate_bps": rm.vat_rate_bps,
        "status": match rm.status {
            ProductStatus::Active => "active",
            ProductStatus::Archived => "archived",
        },
    })
}

pub fn offer_to_json(rm: OfferReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.offer_id.0.to_string(),
        "number": rm.number,
        "customer_id": rm.customer_id.0.to_string(),
        "status": match rm.status {
            OfferStatus::Draft => "draft",
            OfferStatus::Sent => "sent",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Expired => "expired",
        },
        "net_total": rm.net_total,
        "valid_until": rm.valid_until.map(|dt| dt.to_rfc3339()),
    })
}

pub fn invoice_to_json(rm: InvoiceReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.invoice_id.0.to_string(),
        "number": rm.number,
        "customer_id": rm.customer_id.0.to_string(),
        "status": invoice_status_str(rm.status),
        "net": rm.totals.net,
        "vat": rm.totals.vat,
        "gross": rm.totals.gross,
        "total_paid": rm.total_paid,
        "outstanding": rm.outstanding(),
        "due_date": rm.due_date.to_rfc3339(),
        "credit_note_number": rm.credit_note_number,
        "reminder_level": rm.reminder_level,
        "reminders": rm.reminders.iter().map(|r| serde_json::json!({
            "level": r.level,
            "fee": r.fee,
            "issued_at": r.issued_at.to_rfc3339(),
        })).collect::<Vec<_>>(),
    })
}

fn customer_kind_str(kind: CustomerKind) -> &'static str {
    match kind {
        CustomerKind::Business => "business",
        CustomerKind::Private => "private",
    }
}

fn invoice_status_str(status: faktura_invoicing::InvoiceStatus) -> &'static str {
    match status {
        faktura_invoicing::InvoiceStatus::Draft => "draft",
        faktura_invoicing::InvoiceStatus::Sent => "sent",
        faktura_invoicing::InvoiceStatus::Paid => "paid",
        faktura_invoicing::InvoiceStatus::Overdue => "overdue",
        faktura_invoicing::InvoiceStatus::Cancelled => "cancelled",
    }
}
