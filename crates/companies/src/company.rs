use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use faktura_core::{Address, Aggregate, AggregateRoot, CompanyId, DomainError};
use faktura_events::Event;
use faktura_numbering::NumberingConfig;

/// Aggregate root: Company.
///
/// The company doubles as the tenant boundary; its aggregate stream is keyed
/// by the same UUID as the `CompanyId` used to scope all other documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Company {
    id: CompanyId,
    name: String,
    address: Address,
    /// German tax number (Steuernummer).
    tax_number: Option<String>,
    /// VAT id (USt-IdNr.), if the company has one.
    vat_id: Option<String>,
    /// Kleinunternehmer per §19 UStG: invoices carry no VAT.
    small_business: bool,
    numbering: NumberingConfig,
    version: u64,
    created: bool,
}

impl Company {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: CompanyId) -> Self {
        Self {
            id,
            name: String::new(),
            address: Address::default(),
            tax_number: None,
            vat_id: None,
            small_business: false,
            numbering: NumberingConfig::default(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CompanyId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn tax_number(&self) -> Option<&str> {
        self.tax_number.as_deref()
    }

    pub fn vat_id(&self) -> Option<&str> {
        self.vat_id.as_deref()
    }

    pub fn is_small_business(&self) -> bool {
        self.small_business
    }

    pub fn numbering(&self) -> &NumberingConfig {
        &self.numbering
    }

    /// Whether invoices issued by this company carry VAT.
    pub fn charges_vat(&self) -> bool {
        !self.small_business
    }
}

impl AggregateRoot for Company {
    type Id = CompanyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterCompany.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCompany {
    pub company_id: CompanyId,
    pub name: String,
    pub address: Address,
    pub tax_number: Option<String>,
    pub vat_id: Option<String>,
    pub small_business: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateCompanyProfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCompanyProfile {
    pub company_id: CompanyId,
    /// Optional new name (if None, keep existing).
    pub name: Option<String>,
    /// Optional new address (if None, keep existing).
    pub address: Option<Address>,
    pub tax_number: Option<String>,
    pub vat_id: Option<String>,
    pub small_business: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfigureNumbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureNumbering {
    pub company_id: CompanyId,
    pub config: NumberingConfig,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanyCommand {
    RegisterCompany(RegisterCompany),
    UpdateCompanyProfile(UpdateCompanyProfile),
    ConfigureNumbering(ConfigureNumbering),
}

/// Event: CompanyRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRegistered {
    pub company_id: CompanyId,
    pub name: String,
    pub address: Address,
    pub tax_number: Option<String>,
    pub vat_id: Option<String>,
    pub small_business: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CompanyProfileUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfileUpdated {
    pub company_id: CompanyId,
    pub name: String,
    pub address: Address,
    pub tax_number: Option<String>,
    pub vat_id: Option<String>,
    pub small_business: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: NumberingConfigured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingConfigured {
    pub company_id: CompanyId,
    pub config: NumberingConfig,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanyEvent {
    CompanyRegistered(CompanyRegistered),
    CompanyProfileUpdated(CompanyProfileUpdated),
    NumberingConfigured(NumberingConfigured),
}

impl Event for CompanyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CompanyEvent::CompanyRegistered(_) => "companies.company.registered",
            CompanyEvent::CompanyProfileUpdated(_) => "companies.company.profile_updated",
            CompanyEvent::NumberingConfigured(_) => "companies.company.numbering_configured",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CompanyEvent::CompanyRegistered(e) => e.occurred_at,
            CompanyEvent::CompanyProfileUpdated(e) => e.occurred_at,
            CompanyEvent::NumberingConfigured(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Company {
    type Command = CompanyCommand;
    type Event = CompanyEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CompanyEvent::CompanyRegistered(e) => {
                self.id = e.company_id;
                self.name = e.name.clone();
                self.address = e.address.clone();
                self.tax_number = e.tax_number.clone();
                self.vat_id = e.vat_id.clone();
                self.small_business = e.small_business;
                self.numbering = NumberingConfig::default();
                self.created = true;
            }
            CompanyEvent::CompanyProfileUpdated(e) => {
                self.name = e.name.clone();
                self.address = e.address.clone();
                self.tax_number = e.tax_number.clone();
                self.vat_id = e.vat_id.clone();
                self.small_business = e.small_business;
            }
            CompanyEvent::NumberingConfigured(e) => {
                self.numbering = e.config.clone();
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CompanyCommand::RegisterCompany(cmd) => self.handle_register(cmd),
            CompanyCommand::UpdateCompanyProfile(cmd) => self.handle_update(cmd),
            CompanyCommand::ConfigureNumbering(cmd) => self.handle_configure_numbering(cmd),
        }
    }
}

impl Company {
    fn ensure_company_id(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if self.id != company_id {
            return Err(DomainError::invariant("company_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterCompany) -> Result<Vec<CompanyEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("company already exists"));
        }

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![CompanyEvent::CompanyRegistered(CompanyRegistered {
            company_id: cmd.company_id,
            name: cmd.name.clone(),
            address: cmd.address.clone(),
            tax_number: cmd.tax_number.clone(),
            vat_id: cmd.vat_id.clone(),
            small_business: cmd.small_business,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateCompanyProfile) -> Result<Vec<CompanyEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company_id(cmd.company_id)?;

        let new_name = cmd.name.clone().unwrap_or_else(|| self.name.clone());
        if new_name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![CompanyEvent::CompanyProfileUpdated(
            CompanyProfileUpdated {
                company_id: cmd.company_id,
                name: new_name,
                address: cmd.address.clone().unwrap_or_else(|| self.address.clone()),
                tax_number: cmd.tax_number.clone().or_else(|| self.tax_number.clone()),
                vat_id: cmd.vat_id.clone().or_else(|| self.vat_id.clone()),
                small_business: cmd.small_business.unwrap_or(self.small_business),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_configure_numbering(
        &self,
        cmd: &ConfigureNumbering,
    ) -> Result<Vec<CompanyEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company_id(cmd.company_id)?;

        // Validated here, at the boundary; readers trust the stored config.
        cmd.config.validate()?;

        Ok(vec![CompanyEvent::NumberingConfigured(NumberingConfigured {
            company_id: cmd.company_id,
            config: cmd.config.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faktura_core::Address;

    fn test_company_id() -> CompanyId {
        CompanyId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn register_cmd(company_id: CompanyId) -> RegisterCompany {
        RegisterCompany {
            company_id,
            name: "Muster GmbH".to_string(),
            address: Address::new("Musterstr. 1", "12345", "Berlin", "Deutschland"),
            tax_number: Some("12/345/67890".to_string()),
            vat_id: None,
            small_business: false,
            occurred_at: test_time(),
        }
    }

    #[test]
    fn register_company_emits_company_registered_event() {
        let company_id = test_company_id();
        let company = Company::empty(company_id);
        let cmd = register_cmd(company_id);

        let events = company
            .handle(&CompanyCommand::RegisterCompany(cmd.clone()))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            CompanyEvent::CompanyRegistered(e) => {
                assert_eq!(e.company_id, company_id);
                assert_eq!(e.name, "Muster GmbH");
                assert!(!e.small_business);
            }
            _ => panic!("Expected CompanyRegistered event"),
        }
    }

    #[test]
    fn register_company_rejects_empty_name() {
        let company_id = test_company_id();
        let company = Company::empty(company_id);
        let mut cmd = register_cmd(company_id);
        cmd.name = "   ".to_string();

        let err = company
            .handle(&CompanyCommand::RegisterCompany(cmd))
            .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for empty name"),
        }
    }

    #[test]
    fn register_company_rejects_duplicate_registration() {
        let company_id = test_company_id();
        let mut company = Company::empty(company_id);
        let cmd = register_cmd(company_id);

        let events = company
            .handle(&CompanyCommand::RegisterCompany(cmd.clone()))
            .unwrap();
        company.apply(&events[0]);

        let err = company
            .handle(&CompanyCommand::RegisterCompany(cmd))
            .unwrap_err();
        match err {
            DomainError::Conflict(_) => {}
            _ => panic!("Expected Conflict error for duplicate registration"),
        }
    }

    #[test]
    fn configure_numbering_replaces_default_prefixes() {
        let company_id = test_company_id();
        let mut company = Company::empty(company_id);
        let events = company
            .handle(&CompanyCommand::RegisterCompany(register_cmd(company_id)))
            .unwrap();
        company.apply(&events[0]);

        assert_eq!(
            company
                .numbering()
                .prefix_for(faktura_numbering::DocumentKind::Customer),
            "KU"
        );

        let config = NumberingConfig::new("KD", "R", "ANG", "GS").unwrap();
        let cmd = ConfigureNumbering {
            company_id,
            config: config.clone(),
            occurred_at: test_time(),
        };
        let events = company
            .handle(&CompanyCommand::ConfigureNumbering(cmd))
            .unwrap();
        company.apply(&events[0]);

        assert_eq!(company.numbering(), &config);
    }

    #[test]
    fn configure_numbering_requires_registered_company() {
        let company_id = test_company_id();
        let company = Company::empty(company_id);
        let cmd = ConfigureNumbering {
            company_id,
            config: NumberingConfig::default(),
            occurred_at: test_time(),
        };

        let err = company
            .handle(&CompanyCommand::ConfigureNumbering(cmd))
            .unwrap_err();
        match err {
            DomainError::NotFound => {}
            _ => panic!("Expected NotFound error for unregistered company"),
        }
    }

    #[test]
    fn update_profile_keeps_unspecified_fields() {
        let company_id = test_company_id();
        let mut company = Company::empty(company_id);
        let events = company
            .handle(&CompanyCommand::RegisterCompany(register_cmd(company_id)))
            .unwrap();
        company.apply(&events[0]);

        let cmd = UpdateCompanyProfile {
            company_id,
            name: None,
            address: None,
            tax_number: None,
            vat_id: Some("DE123456789".to_string()),
            small_business: Some(true),
            occurred_at: test_time(),
        };
        let events = company
            .handle(&CompanyCommand::UpdateCompanyProfile(cmd))
            .unwrap();
        company.apply(&events[0]);

        assert_eq!(company.name(), "Muster GmbH");
        assert_eq!(company.tax_number(), Some("12/345/67890"));
        assert_eq!(company.vat_id(), Some("DE123456789"));
        assert!(company.is_small_business());
        assert!(!company.charges_vat());
    }

    #[test]
    fn version_increments_on_apply() {
        let company_id = test_company_id();
        let mut company = Company::empty(company_id);
        assert_eq!(company.version(), 0);

        let events = company
            .handle(&CompanyCommand::RegisterCompany(register_cmd(company_id)))
            .unwrap();
        company.apply(&events[0]);
        assert_eq!(company.version(), 1);

        let cmd = ConfigureNumbering {
            company_id,
            config: NumberingConfig::default(),
            occurred_at: test_time(),
        };
        let events = company
            .handle(&CompanyCommand::ConfigureNumbering(cmd))
            .unwrap();
        company.apply(&events[0]);
        assert_eq!(company.version(), 2);
    }
}
