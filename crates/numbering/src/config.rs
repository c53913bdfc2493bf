use serde::{Deserialize, Serialize};

use faktura_core::{DomainError, DomainResult};

use crate::number::{DocumentKind, validate_prefix};

/// Per-company numbering preferences: one prefix per document kind.
///
/// This is a fully typed configuration with explicit defaults, validated once
/// when the company configures it — read sites never fall back field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingConfig {
    pub customer_prefix: String,
    pub invoice_prefix: String,
    pub offer_prefix: String,
    pub credit_note_prefix: String,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            customer_prefix: DocumentKind::Customer.default_prefix().to_string(),
            invoice_prefix: DocumentKind::Invoice.default_prefix().to_string(),
            offer_prefix: DocumentKind::Offer.default_prefix().to_string(),
            credit_note_prefix: DocumentKind::CreditNote.default_prefix().to_string(),
        }
    }
}

impl NumberingConfig {
    /// Build a validated configuration. Every prefix must be 1-8 uppercase
    /// ASCII alphanumeric characters.
    pub fn new(
        customer_prefix: impl Into<String>,
        invoice_prefix: impl Into<String>,
        offer_prefix: impl Into<String>,
        credit_note_prefix: impl Into<String>,
    ) -> DomainResult<Self> {
        let config = Self {
            customer_prefix: customer_prefix.into(),
            invoice_prefix: invoice_prefix.into(),
            offer_prefix: offer_prefix.into(),
            credit_note_prefix: credit_note_prefix.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Re-validate (e.g. after deserializing from an event payload).
    pub fn validate(&self) -> DomainResult<()> {
        for (kind, prefix) in [
            (DocumentKind::Customer, &self.customer_prefix),
            (DocumentKind::Invoice, &self.invoice_prefix),
            (DocumentKind::Offer, &self.offer_prefix),
            (DocumentKind::CreditNote, &self.credit_note_prefix),
        ] {
            validate_prefix(prefix)
                .map_err(|e| DomainError::validation(format!("{kind} prefix: {e}")))?;
        }
        Ok(())
    }

    pub fn prefix_for(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Customer => &self.customer_prefix,
            DocumentKind::Invoice => &self.invoice_prefix,
            DocumentKind::Offer => &self.offer_prefix,
            DocumentKind::CreditNote => &self.credit_note_prefix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_builtin_prefixes() {
        let config = NumberingConfig::default();
        assert_eq!(config.prefix_for(DocumentKind::Customer), "KU");
        assert_eq!(config.prefix_for(DocumentKind::Invoice), "RE");
        assert_eq!(config.prefix_for(DocumentKind::Offer), "AN");
        assert_eq!(config.prefix_for(DocumentKind::CreditNote), "GU");
    }

    #[test]
    fn rejects_invalid_prefixes_at_construction() {
        assert!(NumberingConfig::new("ku", "RE", "AN", "GU").is_err());
        assert!(NumberingConfig::new("KU", "", "AN", "GU").is_err());
        assert!(NumberingConfig::new("KU", "RE", "ANGEBOTE25", "GU").is_err());
    }

    #[test]
    fn accepts_custom_prefixes() {
        let config = NumberingConfig::new("KD", "R26", "ANG", "GS").unwrap();
        assert_eq!(config.prefix_for(DocumentKind::Customer), "KD");
        assert_eq!(config.prefix_for(DocumentKind::Invoice), "R26");
    }
}
