//! Postal address value object.

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// German-style postal address. All components are optional in the sense
/// that empty strings are tolerated and simply omitted when composing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Address {
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
}

impl Address {
    pub fn new(
        street: impl Into<String>,
        postal_code: impl Into<String>,
        city: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            postal_code: postal_code.into(),
            city: city.into(),
            country: country.into(),
        }
    }

    /// Compose a single-line address: `street, postal_code city, country`.
    ///
    /// Empty components are omitted; the result never contains doubled
    /// separators or dangling commas. Recomputed on every call.
    pub fn composed(&self) -> String {
        let locality = [self.postal_code.trim(), self.city.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        [self.street.trim(), locality.as_str(), self.country.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.composed().is_empty()
    }
}

impl ValueObject for Address {}
