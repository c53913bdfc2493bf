use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use faktura_core::{Aggregate, AggregateId, AggregateRoot, CompanyId, DomainError};
use faktura_events::Event;

/// Product identifier (company-scoped via `company_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Archived,
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    company_id: Option<CompanyId>,
    name: String,
    description: Option<String>,
    /// Billing unit, e.g. "Stück" or "Stunde".
    unit: String,
    /// Net price per unit in cents.
    unit_price: u64,
    /// VAT rate in basis points (1900 = 19%).
    vat_rate_bps: u32,
    status: ProductStatus,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            company_id: None,
            name: String::new(),
            description: None,
            unit: String::new(),
            unit_price: 0,
            vat_rate_bps: 0,
            status: ProductStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn vat_rate_bps(&self) -> u32 {
        self.vat_rate_bps
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    /// Invariant helper: archived products cannot be billed or modified.
    pub fn is_billable(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub unit: String,
    pub unit_price: u64,
    pub vat_rate_bps: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    /// Optional new name (if None, keep existing).
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub unit_price: Option<u64>,
    pub vat_rate_bps: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    UpdateProduct(UpdateProduct),
    ArchiveProduct(ArchiveProduct),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub unit: String,
    pub unit_price: u64,
    pub vat_rate_bps: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdated {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub unit: String,
    pub unit_price: u64,
    pub vat_rate_bps: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductUpdated(ProductUpdated),
    ProductArchived(ProductArchived),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::ProductUpdated(_) => "products.product.updated",
            ProductEvent::ProductArchived(_) => "products.product.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductUpdated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.company_id = Some(e.company_id);
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.unit = e.unit.clone();
                self.unit_price = e.unit_price;
                self.vat_rate_bps = e.vat_rate_bps;
                self.status = ProductStatus::Active;
                self.created = true;
            }
            ProductEvent::ProductUpdated(e) => {
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.unit = e.unit.clone();
                self.unit_price = e.unit_price;
                self.vat_rate_bps = e.vat_rate_bps;
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::UpdateProduct(cmd) => self.handle_update(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Product {
    fn ensure_company(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn validate_vat_rate(vat_rate_bps: u32) -> Result<(), DomainError> {
        // 100% in basis points; German rates in practice are 0, 700 or 1900.
        if vat_rate_bps > 10_000 {
            return Err(DomainError::validation("vat rate cannot exceed 100%"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit.trim().is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }
        Self::validate_vat_rate(cmd.vat_rate_bps)?;

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            company_id: cmd.company_id,
            product_id: cmd.product_id,
            name: cmd.name.clone(),
            description: cmd.description.clone(),
            unit: cmd.unit.clone(),
            unit_price: cmd.unit_price,
            vat_rate_bps: cmd.vat_rate_bps,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived product cannot be updated"));
        }

        let new_name = cmd.name.clone().unwrap_or_else(|| self.name.clone());
        if new_name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let new_unit = cmd.unit.clone().unwrap_or_else(|| self.unit.clone());
        if new_unit.trim().is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }
        let new_vat = cmd.vat_rate_bps.unwrap_or(self.vat_rate_bps);
        Self::validate_vat_rate(new_vat)?;

        Ok(vec![ProductEvent::ProductUpdated(ProductUpdated {
            company_id: cmd.company_id,
            product_id: cmd.product_id,
            name: new_name,
            description: cmd.description.clone().or_else(|| self.description.clone()),
            unit: new_unit,
            unit_price: cmd.unit_price.unwrap_or(self.unit_price),
            vat_rate_bps: new_vat,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product is already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            company_id: cmd.company_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
