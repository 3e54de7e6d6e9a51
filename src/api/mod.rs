// HTTP API over the invoicing gateway and the catalog store

mod error;
pub mod catalogs;
pub mod invoices;

pub use catalogs::{create_catalog_router, CatalogAppState};
pub use error::AppError;
pub use invoices::{create_invoice_router, InvoiceAppState};
