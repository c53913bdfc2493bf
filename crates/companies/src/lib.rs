//! `faktura-companies` — the company (Mandant) registry.
//!
//! A company owns every other document in the system and carries the
//! settings the rest of the domain consumes: numbering prefixes, tax ids,
//! and the Kleinunternehmer flag that controls VAT on invoices.

pub mod company;

pub use company::{
    Company, CompanyCommand, CompanyEvent, CompanyProfileUpdated, CompanyRegistered,
    ConfigureNumbering, NumberingConfigured, RegisterCompany, UpdateCompanyProfile,
};
