use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use faktura_core::{Address, Aggregate, AggregateId, AggregateRoot, CompanyId, DomainError};
use faktura_events::Event;
use faktura_numbering::DocumentNumber;

/// Customer identifier (company-scoped via `company_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub AggregateId);

impl CustomerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Customer classification: business or private individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerKind {
    Business,
    Private,
}

/// Customer status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Active,
    Inactive,
}

/// Contact information for a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Aggregate root: Customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    id: CustomerId,
    company_id: Option<CompanyId>,
    /// Assigned at registration, immutable afterwards, never recycled.
    number: Option<DocumentNumber>,
    name: String,
    kind: CustomerKind,
    contact: ContactInfo,
    address: Address,
    vat_number: Option<String>,
    status: CustomerStatus,
    version: u64,
    created: bool,
}

impl Customer {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CustomerId) -> Self {
        Self {
            id,
            company_id: None,
            number: None,
            name: String::new(),
            kind: CustomerKind::Private,
            contact: ContactInfo::default(),
            address: Address::default(),
            vat_number: None,
            status: CustomerStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CustomerId {
        self.id
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn number(&self) -> Option<&DocumentNumber> {
        self.number.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CustomerKind {
        self.kind
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn vat_number(&self) -> Option<&str> {
        self.vat_number.as_deref()
    }

    pub fn status(&self) -> CustomerStatus {
        self.status
    }

    /// Invariant helper: inactive customers cannot receive new documents.
    pub fn can_transact(&self) -> bool {
        self.status == CustomerStatus::Active
    }

    /// Whether a VAT number should be collected for this customer.
    ///
    /// True exactly for business customers in Deutschland without a recorded
    /// VAT number; every other combination is false.
    pub fn needs_vat_number(&self) -> bool {
        self.kind == CustomerKind::Business
            && self.address.country == "Deutschland"
            && self.vat_number.is_none()
    }

    /// Single-line postal address, recomputed from the current fields.
    pub fn full_address(&self) -> String {
        self.address.composed()
    }
}

impl AggregateRoot for Customer {
    type Id = CustomerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterCustomer.
///
/// The document number is allocated by the creation use case (see
/// `faktura-numbering`) and passed in; the aggregate only records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCustomer {
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    pub number: DocumentNumber,
    pub name: String,
    pub kind: CustomerKind,
    pub contact: Option<ContactInfo>,
    pub address: Option<Address>,
    pub vat_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateCustomer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCustomer {
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    /// Optional new name (if None, keep existing).
    pub name: Option<String>,
    pub kind: Option<CustomerKind>,
    pub contact: Option<ContactInfo>,
    pub address: Option<Address>,
    pub vat_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateCustomer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateCustomer {
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    /// Optional human-readable reason.
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReactivateCustomer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactivateCustomer {
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerCommand {
    RegisterCustomer(RegisterCustomer),
    UpdateCustomer(UpdateCustomer),
    DeactivateCustomer(DeactivateCustomer),
    ReactivateCustomer(ReactivateCustomer),
}

/// Event: CustomerRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRegistered {
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    pub number: DocumentNumber,
    pub name: String,
    pub kind: CustomerKind,
    pub contact: ContactInfo,
    pub address: Address,
    pub vat_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CustomerUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerUpdated {
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    pub name: String,
    pub kind: CustomerKind,
    pub contact: ContactInfo,
    pub address: Address,
    pub vat_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CustomerDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDeactivated {
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CustomerReactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerReactivated {
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerEvent {
    CustomerRegistered(CustomerRegistered),
    CustomerUpdated(CustomerUpdated),
    CustomerDeactivated(CustomerDeactivated),
    CustomerReactivated(CustomerReactivated),
}

impl Event for CustomerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustomerEvent::CustomerRegistered(_) => "customers.customer.registered",
            CustomerEvent::CustomerUpdated(_) => "customers.customer.updated",
            CustomerEvent::CustomerDeactivated(_) => "customers.customer.deactivated",
            CustomerEvent::CustomerReactivated(_) => "customers.customer.reactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CustomerEvent::CustomerRegistered(e) => e.occurred_at,
            CustomerEvent::CustomerUpdated(e) => e.occurred_at,
            CustomerEvent::CustomerDeactivated(e) => e.occurred_at,
            CustomerEvent::CustomerReactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Customer {
    type Command = CustomerCommand;
    type Event = CustomerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CustomerEvent::CustomerRegistered(e) => {
                self.id = e.customer_id;
                self.company_id = Some(e.company_id);
                self.number = Some(e.number.clone());
                self.name = e.name.clone();
                self.kind = e.kind;
                self.contact = e.contact.clone();
                self.address = e.address.clone();
                self.vat_number = e.vat_number.clone();
                self.status = CustomerStatus::Active;
                self.created = true;
            }
            CustomerEvent::CustomerUpdated(e) => {
                self.name = e.name.clone();
                self.kind = e.kind;
                self.contact = e.contact.clone();
                self.address = e.address.clone();
                self.vat_number = e.vat_number.clone();
            }
            CustomerEvent::CustomerDeactivated(_) => {
                self.status = CustomerStatus::Inactive;
            }
            CustomerEvent::CustomerReactivated(_) => {
                self.status = CustomerStatus::Active;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CustomerCommand::RegisterCustomer(cmd) => self.handle_register(cmd),
            CustomerCommand::UpdateCustomer(cmd) => self.handle_update(cmd),
            CustomerCommand::DeactivateCustomer(cmd) => self.handle_deactivate(cmd),
            CustomerCommand::ReactivateCustomer(cmd) => self.handle_reactivate(cmd),
        }
    }
}

impl Customer {
    fn ensure_company(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        Ok(())
    }

    fn ensure_customer_id(&self, customer_id: CustomerId) -> Result<(), DomainError> {
        if self.id != customer_id {
            return Err(DomainError::invariant("customer_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterCustomer) -> Result<Vec<CustomerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("customer already exists"));
        }

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![CustomerEvent::CustomerRegistered(CustomerRegistered {
            company_id: cmd.company_id,
            customer_id: cmd.customer_id,
            number: cmd.number.clone(),
            name: cmd.name.clone(),
            kind: cmd.kind,
            contact: cmd.contact.clone().unwrap_or_default(),
            address: cmd.address.clone().unwrap_or_default(),
            vat_number: cmd.vat_number.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateCustomer) -> Result<Vec<CustomerEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_customer_id(cmd.customer_id)?;

        let new_name = cmd.name.clone().unwrap_or_else(|| self.name.clone());
        if new_name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![CustomerEvent::CustomerUpdated(CustomerUpdated {
            company_id: cmd.company_id,
            customer_id: cmd.customer_id,
            name: new_name,
            kind: cmd.kind.unwrap_or(self.kind),
            contact: cmd.contact.clone().unwrap_or_else(|| self.contact.clone()),
            address: cmd.address.clone().unwrap_or_else(|| self.address.clone()),
            vat_number: cmd.vat_number.clone().or_else(|| self.vat_number.clone()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(
        &self,
        cmd: &DeactivateCustomer,
    ) -> Result<Vec<CustomerEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_customer_id(cmd.customer_id)?;

        if self.status == CustomerStatus::Inactive {
            return Err(DomainError::conflict("customer is already inactive"));
        }

        Ok(vec![CustomerEvent::CustomerDeactivated(
            CustomerDeactivated {
                company_id: cmd.company_id,
                customer_id: cmd.customer_id,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_reactivate(
        &self,
        cmd: &ReactivateCustomer,
    ) -> Result<Vec<CustomerEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_customer_id(cmd.customer_id)?;

        if self.status == CustomerStatus::Active {
            return Err(DomainError::conflict("customer is already active"));
        }

        Ok(vec![CustomerEvent::CustomerReactivated(
            CustomerReactivated {
                company_id: cmd.company_id,
                customer_id: cmd.customer_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
