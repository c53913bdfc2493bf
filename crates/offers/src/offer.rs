use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use faktura_core::{Aggregate, AggregateId, AggregateRoot, CompanyId, DomainError};
use faktura_customers::CustomerId;
use faktura_events::Event;
use faktura_numbering::DocumentNumber;
use faktura_products::ProductId;

/// Offer identifier (company-scoped via `company_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(pub AggregateId);

impl OfferId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OfferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Offer status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
}

/// Offer line: product, description, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub description: String,
    pub quantity: i64,
    /// Net price in smallest currency unit (cents).
    pub unit_price: u64,
    /// VAT rate in basis points (1900 = 19%).
    pub vat_rate_bps: u32,
}

/// Aggregate root: Offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    id: OfferId,
    company_id: Option<CompanyId>,
    customer_id: Option<CustomerId>,
    number: Option<DocumentNumber>,
    status: OfferStatus,
    lines: Vec<OfferLine>,
    valid_until: Option<DateTime<Utc>>,
    net_total: u64,
    version: u64,
    created: bool,
}

impl Offer {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OfferId) -> Self {
        Self {
            id,
            company_id: None,
            customer_id: None,
            number: None,
            status: OfferStatus::Draft,
            lines: Vec::new(),
            valid_until: None,
            net_total: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OfferId {
        self.id
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn number(&self) -> Option<&DocumentNumber> {
        self.number.as_ref()
    }

    pub fn status(&self) -> OfferStatus {
        self.status
    }

    pub fn lines(&self) -> &[OfferLine] {
        &self.lines
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    pub fn net_total(&self) -> u64 {
        self.net_total
    }

    /// Invariant: only accepted offers can be turned into invoices.
    pub fn is_invoiceable(&self) -> bool {
        self.status == OfferStatus::Accepted
    }
}

impl AggregateRoot for Offer {
    type Id = OfferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOffer {
    pub company_id: CompanyId,
    pub offer_id: OfferId,
    pub customer_id: CustomerId,
    pub number: DocumentNumber,
    pub lines: Vec<OfferLine>,
    pub valid_until: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendOffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOffer {
    pub company_id: CompanyId,
    pub offer_id: OfferId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptOffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptOffer {
    pub company_id: CompanyId,
    pub offer_id: OfferId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectOffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectOffer {
    pub company_id: CompanyId,
    pub offer_id: OfferId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireOffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireOffer {
    pub company_id: CompanyId,
    pub offer_id: OfferId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferCommand {
    CreateOffer(CreateOffer),
    SendOffer(SendOffer),
    AcceptOffer(AcceptOffer),
    RejectOffer(RejectOffer),
    ExpireOffer(ExpireOffer),
}

/// Event: OfferCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferCreated {
    pub company_id: CompanyId,
    pub offer_id: OfferId,
    pub customer_id: CustomerId,
    pub number: DocumentNumber,
    pub lines: Vec<OfferLine>,
    pub valid_until: Option<DateTime<Utc>>,
    pub net_total: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OfferSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferSent {
    pub company_id: CompanyId,
    pub offer_id: OfferId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OfferAccepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferAccepted {
    pub company_id: CompanyId,
    pub offer_id: OfferId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OfferRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRejected {
    pub company_id: CompanyId,
    pub offer_id: OfferId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OfferExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferExpired {
    pub company_id: CompanyId,
    pub offer_id: OfferId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferEvent {
    OfferCreated(OfferCreated),
    OfferSent(OfferSent),
    OfferAccepted(OfferAccepted),
    OfferRejected(OfferRejected),
    OfferExpired(OfferExpired),
}

impl Event for OfferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OfferEvent::OfferCreated(_) => "offers.offer.created",
            OfferEvent::OfferSent(_) => "offers.offer.sent",
            OfferEvent::OfferAccepted(_) => "offers.offer.accepted",
            OfferEvent::OfferRejected(_) => "offers.offer.rejected",
            OfferEvent::OfferExpired(_) => "offers.offer.expired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OfferEvent::OfferCreated(e) => e.occurred_at,
            OfferEvent::OfferSent(e) => e.occurred_at,
            OfferEvent::OfferAccepted(e) => e.occurred_at,
            OfferEvent::OfferRejected(e) => e.occurred_at,
            OfferEvent::OfferExpired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Offer {
    type Command = OfferCommand;
    type Event = OfferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OfferEvent::OfferCreated(e) => {
                self.id = e.offer_id;
                self.company_id = Some(e.company_id);
                self.customer_id = Some(e.customer_id);
                self.number = Some(e.number.clone());
                self.lines = e.lines.clone();
                self.valid_until = e.valid_until;
                self.net_total = e.net_total;
                self.status = OfferStatus::Draft;
                self.created = true;
            }
            OfferEvent::OfferSent(_) => {
                self.status = OfferStatus::Sent;
            }
            OfferEvent::OfferAccepted(_) => {
                self.status = OfferStatus::Accepted;
            }
            OfferEvent::OfferRejected(_) => {
                self.status = OfferStatus::Rejected;
            }
            OfferEvent::OfferExpired(_) => {
                self.status = OfferStatus::Expired;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OfferCommand::CreateOffer(cmd) => self.handle_create(cmd),
            OfferCommand::SendOffer(cmd) => self.handle_send(cmd),
            OfferCommand::AcceptOffer(cmd) => self.handle_accept(cmd),
            OfferCommand::RejectOffer(cmd) => self.handle_reject(cmd),
            OfferCommand::ExpireOffer(cmd) => self.handle_expire(cmd),
        }
    }
}

impl Offer {
    fn ensure_company(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        Ok(())
    }

    fn ensure_offer_id(&self, offer_id: OfferId) -> Result<(), DomainError> {
        if self.id != offer_id {
            return Err(DomainError::invariant("offer_id mismatch"));
        }
        Ok(())
    }

    fn ensure_open_for_decision(&self) -> Result<(), DomainError> {
        match self.status {
            OfferStatus::Sent => Ok(()),
            OfferStatus::Draft => Err(DomainError::invariant("offer has not been sent")),
            _ => Err(DomainError::invariant("offer is already closed")),
        }
    }

    fn handle_create(&self, cmd: &CreateOffer) -> Result<Vec<OfferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("offer already exists"));
        }

        let net_total = sum_lines(&cmd.lines)?;

        Ok(vec![OfferEvent::OfferCreated(OfferCreated {
            company_id: cmd.company_id,
            offer_id: cmd.offer_id,
            customer_id: cmd.customer_id,
            number: cmd.number.clone(),
            lines: cmd.lines.clone(),
            valid_until: cmd.valid_until,
            net_total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_send(&self, cmd: &SendOffer) -> Result<Vec<OfferEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_offer_id(cmd.offer_id)?;

        if self.status != OfferStatus::Draft {
            return Err(DomainError::invariant("only draft offers can be sent"));
        }

        Ok(vec![OfferEvent::OfferSent(OfferSent {
            company_id: cmd.company_id,
            offer_id: cmd.offer_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_accept(&self, cmd: &AcceptOffer) -> Result<Vec<OfferEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_offer_id(cmd.offer_id)?;
        self.ensure_open_for_decision()?;

        Ok(vec![OfferEvent::OfferAccepted(OfferAccepted {
            company_id: cmd.company_id,
            offer_id: cmd.offer_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectOffer) -> Result<Vec<OfferEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_offer_id(cmd.offer_id)?;
        self.ensure_open_for_decision()?;

        Ok(vec![OfferEvent::OfferRejected(OfferRejected {
            company_id: cmd.company_id,
            offer_id: cmd.offer_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireOffer) -> Result<Vec<OfferEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_offer_id(cmd.offer_id)?;
        self.ensure_open_for_decision()?;

        Ok(vec![OfferEvent::OfferExpired(OfferExpired {
            company_id: cmd.company_id,
            offer_id: cmd.offer_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn sum_lines(lines: &[OfferLine]) -> Result<u64, DomainError> {
    if lines.is_empty() {
        return Err(DomainError::validation("cannot create offer without lines"));
    }

    let mut total: u64 = 0;
    for line in lines {
        if line.quantity <= 0 {
            return Err(DomainError::validation(
                "offer line quantity must be positive",
            ));
        }
        if line.unit_price == 0 {
            return Err(DomainError::validation(
                "offer line unit_price must be positive",
            ));
        }
        let line_total = (line.quantity as i128)
            .checked_mul(line.unit_price as i128)
            .ok_or_else(|| DomainError::invariant("offer line amount overflow"))?;
        total = total
            .checked_add(line_total as u64)
            .ok_or_else(|| DomainError::invariant("offer total overflow"))?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use faktura_core::AggregateId;

    fn test_company_id() -> CompanyId {
        CompanyId::new()
    }

    fn test_offer_id() -> OfferId {
        OfferId::new(AggregateId::new())
    }

    fn test_customer_id() -> CustomerId {
        CustomerId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_number() -> DocumentNumber {
        DocumentNumber::new("AN", 2025, 1).unwrap()
    }

    fn single_line() -> OfferLine {
        OfferLine {
            line_no: 1,
            product_id: ProductId::new(AggregateId::new()),
            description: "Beratung".to_string(),
            quantity: 2,
            unit_price: 12_000,
            vat_rate_bps: 1900,
        }
    }

    fn create_cmd(company_id: CompanyId, offer_id: OfferId) -> CreateOffer {
        CreateOffer {
            company_id,
            offer_id,
            customer_id: test_customer_id(),
            number: test_number(),
            lines: vec![single_line()],
            valid_until: None,
            occurred_at: test_time(),
        }
    }

    fn sent_offer(company_id: CompanyId, offer_id: OfferId) -> Offer {
        let mut offer = Offer::empty(offer_id);
        let events = offer
            .handle(&OfferCommand::CreateOffer(create_cmd(company_id, offer_id)))
            .unwrap();
        offer.apply(&events[0]);
        let events = offer
            .handle(&OfferCommand::SendOffer(SendOffer {
                company_id,
                offer_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        offer.apply(&events[0]);
        offer
    }

    #[test]
    fn create_offer_computes_net_total() {
        let company_id = test_company_id();
        let offer_id = test_offer_id();
        let offer = Offer::empty(offer_id);

        let events = offer
            .handle(&OfferCommand::CreateOffer(create_cmd(company_id, offer_id)))
            .unwrap();

        match &events[0] {
            OfferEvent::OfferCreated(e) => {
                assert_eq!(e.net_total, 24_000);
                assert_eq!(e.number.to_string(), "AN-2025-0001");
            }
            _ => panic!("Expected OfferCreated event"),
        }
    }

    #[test]
    fn create_offer_rejects_empty_lines() {
        let offer = Offer::empty(test_offer_id());
        let mut cmd = create_cmd(test_company_id(), test_offer_id());
        cmd.lines.clear();

        let err = offer.handle(&OfferCommand::CreateOffer(cmd)).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for empty lines"),
        }
    }

    #[test]
    fn draft_offer_cannot_be_accepted() {
        let company_id = test_company_id();
        let offer_id = test_offer_id();
        let mut offer = Offer::empty(offer_id);
        let events = offer
            .handle(&OfferCommand::CreateOffer(create_cmd(company_id, offer_id)))
            .unwrap();
        offer.apply(&events[0]);

        let err = offer
            .handle(&OfferCommand::AcceptOffer(AcceptOffer {
                company_id,
                offer_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("not been sent") => {}
            _ => panic!("Expected InvariantViolation for accepting draft offer"),
        }
    }

    #[test]
    fn sent_offer_can_be_accepted_and_becomes_invoiceable() {
        let company_id = test_company_id();
        let offer_id = test_offer_id();
        let mut offer = sent_offer(company_id, offer_id);

        let events = offer
            .handle(&OfferCommand::AcceptOffer(AcceptOffer {
                company_id,
                offer_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        offer.apply(&events[0]);

        assert_eq!(offer.status(), OfferStatus::Accepted);
        assert!(offer.is_invoiceable());
    }

    #[test]
    fn accepted_offer_is_terminal() {
        let company_id = test_company_id();
        let offer_id = test_offer_id();
        let mut offer = sent_offer(company_id, offer_id);

        let events = offer
            .handle(&OfferCommand::AcceptOffer(AcceptOffer {
                company_id,
                offer_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        offer.apply(&events[0]);

        let err = offer
            .handle(&OfferCommand::RejectOffer(RejectOffer {
                company_id,
                offer_id,
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("already closed") => {}
            _ => panic!("Expected InvariantViolation for deciding a closed offer"),
        }
    }

    #[test]
    fn rejected_offer_records_reason() {
        let company_id = test_company_id();
        let offer_id = test_offer_id();
        let mut offer = sent_offer(company_id, offer_id);

        let events = offer
            .handle(&OfferCommand::RejectOffer(RejectOffer {
                company_id,
                offer_id,
                reason: Some("zu teuer".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();

        match &events[0] {
            OfferEvent::OfferRejected(e) => {
                assert_eq!(e.reason.as_deref(), Some("zu teuer"));
            }
            _ => panic!("Expected OfferRejected event"),
        }
        offer.apply(&events[0]);
        assert_eq!(offer.status(), OfferStatus::Rejected);
        assert!(!offer.is_invoiceable());
    }
}
