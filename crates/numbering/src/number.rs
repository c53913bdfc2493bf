use core::str::FromStr;
use serde::{Deserialize, Serialize};

use faktura_core::{DomainError, DomainResult, ValueObject};

/// Highest sequence value a document number can carry.
///
/// The sequence field is fixed-width (4 digits). Rather than silently widening
/// past `9999` — which would break the fixed format — allocation fails with
/// [`crate::SequenceError::Exhausted`] once a `(company, kind, year)` sequence
/// is used up.
pub const MAX_SEQUENCE: u32 = 9999;

/// Kind of numbered business document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Customer,
    Invoice,
    Offer,
    CreditNote,
}

impl DocumentKind {
    /// Built-in prefix used when the owning company has no numbering
    /// configuration (e.g. the company was deleted mid-request).
    pub fn default_prefix(&self) -> &'static str {
        match self {
            DocumentKind::Customer => "KU",
            DocumentKind::Invoice => "RE",
            DocumentKind::Offer => "AN",
            DocumentKind::CreditNote => "GU",
        }
    }

    /// Stable identifier used in storage keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Customer => "customer",
            DocumentKind::Invoice => "invoice",
            DocumentKind::Offer => "offer",
            DocumentKind::CreditNote => "credit_note",
        }
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a numbering prefix: 1–8 uppercase ASCII alphanumeric characters.
pub(crate) fn validate_prefix(prefix: &str) -> DomainResult<()> {
    if prefix.is_empty() || prefix.len() > 8 {
        return Err(DomainError::validation(
            "numbering prefix must be 1-8 characters",
        ));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(DomainError::validation(
            "numbering prefix must be uppercase ASCII alphanumeric",
        ));
    }
    Ok(())
}

/// A document number: `PREFIX-YEAR-SEQ`, e.g. `KU-2025-0001`.
///
/// The sequence field is zero-padded to 4 digits, which makes numbers within
/// one prefix/year both human-sortable and lexicographically sortable.
/// Ordering derives from `(prefix, year, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentNumber {
    prefix: String,
    year: i32,
    sequence: u32,
}

impl DocumentNumber {
    pub fn new(prefix: impl Into<String>, year: i32, sequence: u32) -> DomainResult<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;

        if !(1000..=9999).contains(&year) {
            return Err(DomainError::validation("year must have four digits"));
        }
        if sequence == 0 || sequence > MAX_SEQUENCE {
            return Err(DomainError::validation(format!(
                "sequence must be between 1 and {MAX_SEQUENCE}"
            )));
        }

        Ok(Self {
            prefix,
            year,
            sequence,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl ValueObject for DocumentNumber {}

impl core::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}-{:04}", self.prefix, self.year, self.sequence)
    }
}

impl FromStr for DocumentNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let (prefix, year, seq) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(y), Some(n)) => (p, y, n),
            _ => {
                return Err(DomainError::validation(format!(
                    "malformed document number: {s}"
                )));
            }
        };

        if year.len() != 4 || seq.len() != 4 {
            return Err(DomainError::validation(format!(
                "malformed document number: {s}"
            )));
        }

        let year: i32 = year
            .parse()
            .map_err(|_| DomainError::validation(format!("malformed year in: {s}")))?;
        let sequence: u32 = seq
            .parse()
            .map_err(|_| DomainError::validation(format!("malformed sequence in: {s}")))?;

        Self::new(prefix, year, sequence)
    }
}

impl Serialize for DocumentNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DocumentNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_zero_padded_sequence() {
        let n = DocumentNumber::new("KU", 2025, 1).unwrap();
        assert_eq!(n.to_string(), "KU-2025-0001");

        let n = DocumentNumber::new("RE", 2025, 9999).unwrap();
        assert_eq!(n.to_string(), "RE-2025-9999");
    }

    #[test]
    fn parses_its_own_display_output() {
        let n = DocumentNumber::new("AN", 2024, 42).unwrap();
        let parsed: DocumentNumber = n.to_string().parse().unwrap();
        assert_eq!(parsed, n);
    }

    #[test]
    fn rejects_sequence_zero_and_overflow() {
        assert!(DocumentNumber::new("KU", 2025, 0).is_err());
        assert!(DocumentNumber::new("KU", 2025, MAX_SEQUENCE + 1).is_err());
    }

    #[test]
    fn rejects_bad_prefixes() {
        assert!(DocumentNumber::new("", 2025, 1).is_err());
        assert!(DocumentNumber::new("ku", 2025, 1).is_err());
        assert!(DocumentNumber::new("TOOLONGPREFIX", 2025, 1).is_err());
        assert!(DocumentNumber::new("K U", 2025, 1).is_err());
    }

    #[test]
    fn rejects_malformed_strings() {
        for s in ["KU-2025", "KU-2025-1", "KU-25-0001", "2025-0001", "KU-2025-00x1"] {
            assert!(s.parse::<DocumentNumber>().is_err(), "accepted: {s}");
        }
    }

    #[test]
    fn ordering_matches_string_ordering_within_prefix_and_year() {
        let a = DocumentNumber::new("RE", 2025, 7).unwrap();
        let b = DocumentNumber::new("RE", 2025, 8).unwrap();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: Display/FromStr round-trip for every valid number.
            #[test]
            fn display_parse_round_trip(
                prefix in "[A-Z0-9]{1,8}",
                year in 1000i32..=9999,
                sequence in 1u32..=MAX_SEQUENCE,
            ) {
                let n = DocumentNumber::new(prefix, year, sequence).unwrap();
                let parsed: DocumentNumber = n.to_string().parse().unwrap();
                prop_assert_eq!(parsed, n);
            }

            /// Property: zero-padding keeps lexicographic and numeric order
            /// in agreement within one prefix/year.
            #[test]
            fn string_sort_agrees_with_numeric_sort(
                a in 1u32..=MAX_SEQUENCE,
                b in 1u32..=MAX_SEQUENCE,
            ) {
                let na = DocumentNumber::new("RE", 2025, a).unwrap();
                let nb = DocumentNumber::new("RE", 2025, b).unwrap();
                prop_assert_eq!(a.cmp(&b), na.to_string().cmp(&nb.to_string()));
            }
        }
    }
}
