use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use faktura_core::{Aggregate, AggregateId, AggregateRoot, CompanyId, DomainError};
use faktura_customers::CustomerId;
use faktura_events::Event;
use faktura_numbering::DocumentNumber;
use faktura_offers::OfferId;
use faktura_products::ProductId;

/// Highest reminder level (Mahnstufe) an invoice can reach.
pub const MAX_REMINDER_LEVEL: u8 = 3;

/// Invoice identifier (company-scoped via `company_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

/// Invoice line: product, description, quantity, unit price, VAT rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub description: String,
    pub quantity: i64,
    /// Net price in smallest currency unit (cents).
    pub unit_price: u64,
    /// VAT rate in basis points (1900 = 19%).
    pub vat_rate_bps: u32,
}

/// Net/VAT/gross totals in cents.
///
/// VAT is computed per line (rounded down) and summed; a Kleinunternehmer
/// company issues invoices with zero VAT regardless of line rates.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InvoiceTotals {
    pub net: u64,
    pub vat: u64,
    pub gross: u64,
}

impl InvoiceTotals {
    /// Compute totals from lines. `vat_exempt` suppresses VAT entirely.
    pub fn from_lines(lines: &[InvoiceLine], vat_exempt: bool) -> Result<Self, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::validation(
                "cannot create invoice without lines",
            ));
        }

        let mut net: u64 = 0;
        let mut vat: u64 = 0;
        for line in lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation(
                    "invoice line quantity must be positive",
                ));
            }
            if line.unit_price == 0 {
                return Err(DomainError::validation(
                    "invoice line unit_price must be positive",
                ));
            }
            if line.vat_rate_bps > 10_000 {
                return Err(DomainError::validation(
                    "invoice line vat rate cannot exceed 100%",
                ));
            }

            let line_net = (line.quantity as i128)
                .checked_mul(line.unit_price as i128)
                .ok_or_else(|| DomainError::invariant("invoice line amount overflow"))?;
            net = net
                .checked_add(line_net as u64)
                .ok_or_else(|| DomainError::invariant("invoice net total overflow"))?;

            if !vat_exempt {
                let line_vat = line_net * (line.vat_rate_bps as i128) / 10_000;
                vat = vat
                    .checked_add(line_vat as u64)
                    .ok_or_else(|| DomainError::invariant("invoice vat total overflow"))?;
            }
        }

        let gross = net
            .checked_add(vat)
            .ok_or_else(|| DomainError::invariant("invoice gross total overflow"))?;

        Ok(Self { net, vat, gross })
    }
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    company_id: Option<CompanyId>,
    customer_id: Option<CustomerId>,
    number: Option<DocumentNumber>,
    /// Set when the invoice was converted from an accepted offer.
    offer_id: Option<OfferId>,
    /// Set when the invoice was cancelled with a credit note.
    credit_note_number: Option<DocumentNumber>,
    status: InvoiceStatus,
    lines: Vec<InvoiceLine>,
    due_date: Option<DateTime<Utc>>,
    totals: InvoiceTotals,
    total_paid: u64,
    reminder_level: u8,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            company_id: None,
            customer_id: None,
            number: None,
            offer_id: None,
            credit_note_number: None,
            status: InvoiceStatus::Draft,
            lines: Vec::new(),
            due_date: None,
            totals: InvoiceTotals::default(),
            total_paid: 0,
            reminder_level: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
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

    pub fn offer_id(&self) -> Option<OfferId> {
        self.offer_id
    }

    pub fn credit_note_number(&self) -> Option<&DocumentNumber> {
        self.credit_note_number.as_ref()
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn totals(&self) -> InvoiceTotals {
        self.totals
    }

    pub fn total_paid(&self) -> u64 {
        self.total_paid
    }

    pub fn reminder_level(&self) -> u8 {
        self.reminder_level
    }

    pub fn outstanding_amount(&self) -> u64 {
        self.totals.gross.saturating_sub(self.total_paid)
    }

    /// Invariant: only open (sent/overdue) invoices accept payments.
    pub fn can_accept_payment(&self) -> bool {
        matches!(self.status, InvoiceStatus::Sent | InvoiceStatus::Overdue)
            && self.outstanding_amount() > 0
    }

    /// Invariant: reminders only escalate on open invoices.
    pub fn can_remind(&self) -> bool {
        matches!(self.status, InvoiceStatus::Sent | InvoiceStatus::Overdue)
            && self.reminder_level < MAX_REMINDER_LEVEL
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice.
///
/// The document number is allocated by the creation use case; `vat_exempt`
/// reflects the issuing company's Kleinunternehmer status at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub number: DocumentNumber,
    pub lines: Vec<InvoiceLine>,
    pub due_date: DateTime<Utc>,
    pub vat_exempt: bool,
    pub offer_id: Option<OfferId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendInvoice {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    /// Payment amount in smallest currency unit.
    pub amount: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkOverdue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkOverdue {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice (Storno).
///
/// Cancelling an issued invoice produces a credit note; its `GU-` number is
/// allocated by the cancellation use case and recorded with the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub credit_note_number: Option<DocumentNumber>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueReminder (Mahnung).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReminder {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    /// Requested level; must be exactly one above the current level.
    pub level: u8,
    /// Late fee in cents recorded with the reminder.
    pub fee: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateInvoice(CreateInvoice),
    SendInvoice(SendInvoice),
    RegisterPayment(RegisterPayment),
    MarkOverdue(MarkOverdue),
    CancelInvoice(CancelInvoice),
    IssueReminder(IssueReminder),
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub number: DocumentNumber,
    pub lines: Vec<InvoiceLine>,
    pub due_date: DateTime<Utc>,
    pub totals: InvoiceTotals,
    pub offer_id: Option<OfferId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSent {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub new_total_paid: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceMarkedOverdue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceMarkedOverdue {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub credit_note_number: Option<DocumentNumber>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReminderIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderIssued {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub level: u8,
    pub fee: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    InvoiceSent(InvoiceSent),
    PaymentRegistered(PaymentRegistered),
    InvoiceMarkedOverdue(InvoiceMarkedOverdue),
    InvoiceCancelled(InvoiceCancelled),
    ReminderIssued(ReminderIssued),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "invoicing.invoice.created",
            InvoiceEvent::InvoiceSent(_) => "invoicing.invoice.sent",
            InvoiceEvent::PaymentRegistered(_) => "invoicing.invoice.payment_registered",
            InvoiceEvent::InvoiceMarkedOverdue(_) => "invoicing.invoice.marked_overdue",
            InvoiceEvent::InvoiceCancelled(_) => "invoicing.invoice.cancelled",
            InvoiceEvent::ReminderIssued(_) => "invoicing.invoice.reminder_issued",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::InvoiceSent(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered(e) => e.occurred_at,
            InvoiceEvent::InvoiceMarkedOverdue(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
            InvoiceEvent::ReminderIssued(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.company_id = Some(e.company_id);
                self.customer_id = Some(e.customer_id);
                self.number = Some(e.number.clone());
                self.offer_id = e.offer_id;
                self.lines = e.lines.clone();
                self.due_date = Some(e.due_date);
                self.totals = e.totals;
                self.total_paid = 0;
                self.reminder_level = 0;
                self.status = InvoiceStatus::Draft;
                self.created = true;
            }
            InvoiceEvent::InvoiceSent(_) => {
                self.status = InvoiceStatus::Sent;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.total_paid = e.new_total_paid;
                if self.total_paid >= self.totals.gross {
                    self.status = InvoiceStatus::Paid;
                }
            }
            InvoiceEvent::InvoiceMarkedOverdue(_) => {
                self.status = InvoiceStatus::Overdue;
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                self.credit_note_number = e.credit_note_number.clone();
                self.status = InvoiceStatus::Cancelled;
            }
            InvoiceEvent::ReminderIssued(e) => {
                self.reminder_level = e.level;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            InvoiceCommand::SendInvoice(cmd) => self.handle_send(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            InvoiceCommand::MarkOverdue(cmd) => self.handle_mark_overdue(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
            InvoiceCommand::IssueReminder(cmd) => self.handle_issue_reminder(cmd),
        }
    }
}

impl Invoice {
    fn ensure_company(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }

        let totals = InvoiceTotals::from_lines(&cmd.lines, cmd.vat_exempt)?;

        Ok(vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            company_id: cmd.company_id,
            invoice_id: cmd.invoice_id,
            customer_id: cmd.customer_id,
            number: cmd.number.clone(),
            lines: cmd.lines.clone(),
            due_date: cmd.due_date,
            totals,
            offer_id: cmd.offer_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_send(&self, cmd: &SendInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invariant("only draft invoices can be sent"));
        }

        Ok(vec![InvoiceEvent::InvoiceSent(InvoiceSent {
            company_id: cmd.company_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(
        &self,
        cmd: &RegisterPayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if !self.can_accept_payment() {
            return Err(DomainError::invariant(
                "cannot register payment on this invoice",
            ));
        }

        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let new_total_paid = self
            .total_paid
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invariant("payment total overflow"))?;

        if new_total_paid > self.totals.gross {
            return Err(DomainError::invariant("cannot overpay invoice"));
        }

        Ok(vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            company_id: cmd.company_id,
            invoice_id: cmd.invoice_id,
            amount: cmd.amount,
            new_total_paid,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_overdue(&self, cmd: &MarkOverdue) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.status != InvoiceStatus::Sent {
            return Err(DomainError::invariant(
                "only sent invoices can become overdue",
            ));
        }

        match self.due_date {
            Some(due) if due < cmd.occurred_at => {}
            _ => {
                return Err(DomainError::invariant("invoice is not past its due date"));
            }
        }

        Ok(vec![InvoiceEvent::InvoiceMarkedOverdue(
            InvoiceMarkedOverdue {
                company_id: cmd.company_id,
                invoice_id: cmd.invoice_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.status == InvoiceStatus::Cancelled {
            return Err(DomainError::conflict("invoice is already cancelled"));
        }
        if self.status == InvoiceStatus::Paid {
            return Err(DomainError::invariant("paid invoice cannot be cancelled"));
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            company_id: cmd.company_id,
            invoice_id: cmd.invoice_id,
            credit_note_number: cmd.credit_note_number.clone(),
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue_reminder(&self, cmd: &IssueReminder) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if !matches!(self.status, InvoiceStatus::Sent | InvoiceStatus::Overdue) {
            return Err(DomainError::invariant(
                "reminders require a sent or overdue invoice",
            ));
        }

        if self.reminder_level >= MAX_REMINDER_LEVEL {
            return Err(DomainError::invariant("final reminder level reached"));
        }

        // Levels escalate strictly: 1, then 2, then 3.
        if cmd.level != self.reminder_level + 1 {
            return Err(DomainError::invariant(format!(
                "reminder level must be {} (got {})",
                self.reminder_level + 1,
                cmd.level
            )));
        }

        Ok(vec![InvoiceEvent::ReminderIssued(ReminderIssued {
            company_id: cmd.company_id,
            invoice_id: cmd.invoice_id,
            level: cmd.level,
            fee: cmd.fee,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use faktura_core::AggregateId;

    fn test_company_id() -> CompanyId {
        CompanyId::new()
    }

    fn test_invoice_id() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn test_customer_id() -> CustomerId {
        CustomerId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_number() -> DocumentNumber {
        DocumentNumber::new("RE", 2025, 1).unwrap()
    }

    fn single_line() -> InvoiceLine {
        InvoiceLine {
            line_no: 1,
            product_id: ProductId::new(AggregateId::new()),
            description: "Beratung".to_string(),
            quantity: 2,
            unit_price: 10_000,
            vat_rate_bps: 1900,
        }
    }

    fn create_cmd(company_id: CompanyId, invoice_id: InvoiceId) -> CreateInvoice {
        CreateInvoice {
            company_id,
            invoice_id,
            customer_id: test_customer_id(),
            number: test_number(),
            lines: vec![single_line()],
            due_date: test_time() + Duration::days(14),
            vat_exempt: false,
            offer_id: None,
            occurred_at: test_time(),
        }
    }

    fn sent_invoice(company_id: CompanyId, invoice_id: InvoiceId) -> Invoice {
        let mut invoice = Invoice::empty(invoice_id);
        let events = invoice
            .handle(&InvoiceCommand::CreateInvoice(create_cmd(
                company_id, invoice_id,
            )))
            .unwrap();
        invoice.apply(&events[0]);
        let events = invoice
            .handle(&InvoiceCommand::SendInvoice(SendInvoice {
                company_id,
                invoice_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        invoice.apply(&events[0]);
        invoice
    }

    #[test]
    fn create_invoice_computes_net_vat_and_gross() {
        let company_id = test_company_id();
        let invoice_id = test_invoice_id();
        let invoice = Invoice::empty(invoice_id);

        let events = invoice
            .handle(&InvoiceCommand::CreateInvoice(create_cmd(
                company_id, invoice_id,
            )))
            .unwrap();

        match &events[0] {
            InvoiceEvent::InvoiceCreated(e) => {
                assert_eq!(e.totals.net, 20_000);
                assert_eq!(e.totals.vat, 3_800);
                assert_eq!(e.totals.gross, 23_800);
                assert_eq!(e.number.to_string(), "RE-2025-0001");
            }
            _ => panic!("Expected InvoiceCreated event"),
        }
    }

    #[test]
    fn small_business_invoice_carries_no_vat() {
        let company_id = test_company_id();
        let invoice_id = test_invoice_id();
        let invoice = Invoice::empty(invoice_id);

        let mut cmd = create_cmd(company_id, invoice_id);
        cmd.vat_exempt = true;

        let events = invoice
            .handle(&InvoiceCommand::CreateInvoice(cmd))
            .unwrap();

        match &events[0] {
            InvoiceEvent::InvoiceCreated(e) => {
                assert_eq!(e.totals.net, 20_000);
                assert_eq!(e.totals.vat, 0);
                assert_eq!(e.totals.gross, 20_000);
            }
            _ => panic!("Expected InvoiceCreated event"),
        }
    }

    #[test]
    fn draft_invoice_cannot_accept_payment() {
        let company_id = test_company_id();
        let invoice_id = test_invoice_id();
        let mut invoice = Invoice::empty(invoice_id);
        let events = invoice
            .handle(&InvoiceCommand::CreateInvoice(create_cmd(
                company_id, invoice_id,
            )))
            .unwrap();
        invoice.apply(&events[0]);

        let err = invoice
            .handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                company_id,
                invoice_id,
                amount: 100,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            _ => panic!("Expected InvariantViolation for payment on draft invoice"),
        }
    }

    #[test]
    fn paying_to_gross_marks_invoice_paid() {
        let company_id = test_company_id();
        let invoice_id = test_invoice_id();
        let mut invoice = sent_invoice(company_id, invoice_id);
        assert_eq!(invoice.totals().gross, 23_800);

        let events = invoice
            .handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                company_id,
                invoice_id,
                amount: 10_000,
                occurred_at: test_time(),
            }))
            .unwrap();
        invoice.apply(&events[0]);
        assert_eq!(invoice.status(), InvoiceStatus::Sent);
        assert_eq!(invoice.outstanding_amount(), 13_800);

        let events = invoice
            .handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                company_id,
                invoice_id,
                amount: 13_800,
                occurred_at: test_time(),
            }))
            .unwrap();
        invoice.apply(&events[0]);
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.outstanding_amount(), 0);
    }

    #[test]
    fn cannot_overpay_invoice() {
        let company_id = test_company_id();
        let invoice_id = test_invoice_id();
        let invoice = sent_invoice(company_id, invoice_id);

        let err = invoice
            .handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                company_id,
                invoice_id,
                amount: 23_801,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("cannot overpay invoice") => {}
            _ => panic!("Expected InvariantViolation for overpaying invoice"),
        }
    }

    #[test]
    fn mark_overdue_requires_past_due_date() {
        let company_id = test_company_id();
        let invoice_id = test_invoice_id();
        let mut invoice = sent_invoice(company_id, invoice_id);

        // Due date is 14 days out; marking overdue now must fail.
        let err = invoice
            .handle(&InvoiceCommand::MarkOverdue(MarkOverdue {
                company_id,
                invoice_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("not past its due date") => {}
            _ => panic!("Expected InvariantViolation before due date"),
        }

        // Past the due date it succeeds.
        let events = invoice
            .handle(&InvoiceCommand::MarkOverdue(MarkOverdue {
                company_id,
                invoice_id,
                occurred_at: test_time() + Duration::days(15),
            }))
            .unwrap();
        invoice.apply(&events[0]);
        assert_eq!(invoice.status(), InvoiceStatus::Overdue);
        assert!(invoice.can_accept_payment());
    }

    #[test]
    fn paid_invoice_cannot_be_cancelled() {
        let company_id = test_company_id();
        let invoice_id = test_invoice_id();
        let mut invoice = sent_invoice(company_id, invoice_id);

        let events = invoice
            .handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                company_id,
                invoice_id,
                amount: 23_800,
                occurred_at: test_time(),
            }))
            .unwrap();
        invoice.apply(&events[0]);
        assert_eq!(invoice.status(), InvoiceStatus::Paid);

        let err = invoice
            .handle(&InvoiceCommand::CancelInvoice(CancelInvoice {
                company_id,
                invoice_id,
                credit_note_number: None,
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("paid invoice") => {}
            _ => panic!("Expected InvariantViolation for cancelling paid invoice"),
        }
    }

    #[test]
    fn cancelled_invoice_rejects_payment() {
        let company_id = test_company_id();
        let invoice_id = test_invoice_id();
        let mut invoice = sent_invoice(company_id, invoice_id);

        let credit_note = DocumentNumber::new("GU", 2025, 1).unwrap();
        let events = invoice
            .handle(&InvoiceCommand::CancelInvoice(CancelInvoice {
                company_id,
                invoice_id,
                credit_note_number: Some(credit_note.clone()),
                reason: Some("Storno auf Kundenwunsch".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        invoice.apply(&events[0]);
        assert_eq!(invoice.status(), InvoiceStatus::Cancelled);
        assert_eq!(invoice.credit_note_number(), Some(&credit_note));

        let err = invoice
            .handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                company_id,
                invoice_id,
                amount: 100,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            _ => panic!("Expected InvariantViolation for payment on cancelled invoice"),
        }
    }

    #[test]
    fn reminders_escalate_strictly_to_level_three() {
        let company_id = test_company_id();
        let invoice_id = test_invoice_id();
        let mut invoice = sent_invoice(company_id, invoice_id);

        // Skipping a level is rejected.
        let err = invoice
            .handle(&InvoiceCommand::IssueReminder(IssueReminder {
                company_id,
                invoice_id,
                level: 2,
                fee: 0,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("reminder level must be 1") => {}
            _ => panic!("Expected InvariantViolation for skipped reminder level"),
        }

        for level in 1..=MAX_REMINDER_LEVEL {
            let events = invoice
                .handle(&InvoiceCommand::IssueReminder(IssueReminder {
                    company_id,
                    invoice_id,
                    level,
                    fee: u64::from(level) * 500,
                    occurred_at: test_time(),
                }))
                .unwrap();
            invoice.apply(&events[0]);
            assert_eq!(invoice.reminder_level(), level);
        }

        assert!(!invoice.can_remind());
        let err = invoice
            .handle(&InvoiceCommand::IssueReminder(IssueReminder {
                company_id,
                invoice_id,
                level: 4,
                fee: 0,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("final reminder level") => {}
            _ => panic!("Expected InvariantViolation past final reminder level"),
        }
    }

    #[test]
    fn reminder_requires_sent_or_overdue_invoice() {
        let company_id = test_company_id();
        let invoice_id = test_invoice_id();
        let mut invoice = Invoice::empty(invoice_id);
        let events = invoice
            .handle(&InvoiceCommand::CreateInvoice(create_cmd(
                company_id, invoice_id,
            )))
            .unwrap();
        invoice.apply(&events[0]);

        let err = invoice
            .handle(&InvoiceCommand::IssueReminder(IssueReminder {
                company_id,
                invoice_id,
                level: 1,
                fee: 0,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("sent or overdue") => {}
            _ => panic!("Expected InvariantViolation for reminder on draft invoice"),
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: VAT never exceeds net, and gross = net + vat.
            #[test]
            fn totals_are_consistent(
                quantity in 1i64..1_000,
                unit_price in 1u64..1_000_000,
                vat_rate_bps in 0u32..=10_000,
                vat_exempt: bool,
            ) {
                let lines = vec![InvoiceLine {
                    line_no: 1,
                    product_id: ProductId::new(AggregateId::new()),
                    description: "x".to_string(),
                    quantity,
                    unit_price,
                    vat_rate_bps,
                }];

                let totals = InvoiceTotals::from_lines(&lines, vat_exempt).unwrap();
                prop_assert_eq!(totals.gross, totals.net + totals.vat);
                prop_assert!(totals.vat <= totals.net);
                if vat_exempt {
                    prop_assert_eq!(totals.vat, 0);
                }
            }
        }
    }
}
