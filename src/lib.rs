//! Filter-aware query result caching and cursor pagination for invoice
//! line listings.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod filters;
pub mod invoice;
pub mod logging;
pub mod paginator;
