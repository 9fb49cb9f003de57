//! Invoice line data access.

mod cached_client;
mod types;

pub use cached_client::{InvoiceLines, SourceFactory, DATA_TYPE};
pub use types::InvoiceLine;
