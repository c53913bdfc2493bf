//! `faktura-products` — the product/service catalog offered on invoices and
//! offers.

pub mod product;

pub use product::{
    ArchiveProduct, CreateProduct, Product, ProductArchived, ProductCommand, ProductCreated,
    ProductEvent, ProductId, ProductStatus, ProductUpdated, UpdateProduct,
};
