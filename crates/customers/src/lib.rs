//! `faktura-customers` — customer master data.
//!
//! Customers are company-scoped, carry an assigned `KU-` document number that
//! never changes or gets recycled, and expose the VAT-number predicate the
//! invoicing UI surfaces for German business customers.

pub mod customer;

pub use customer::{
    ContactInfo, Customer, CustomerCommand, CustomerDeactivated, CustomerEvent, CustomerId,
    CustomerKind, CustomerReactivated, CustomerRegistered, CustomerStatus, CustomerUpdated,
    DeactivateCustomer, ReactivateCustomer, RegisterCustomer, UpdateCustomer,
};
