//! Remote row sources consumed by the paginator.

pub mod memory;
pub mod postgrest;

use color_eyre::Result;
use futures::future::BoxFuture;

use crate::cursor::Cursor;

pub use memory::MemorySource;
pub use postgrest::RpcSource;

/// One bounded page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
  /// Return only rows strictly after this position; `None` starts the stream
  pub after: Option<Cursor>,
  /// Maximum number of rows to return
  pub limit: usize,
}

/// A filterable, ordered, cursor-resumable row source.
///
/// Implementations own their filter predicate; the paginator only drives
/// position and page size. Errors are passed through to the caller as-is.
pub trait PageSource<R>: Send + Sync {
  fn fetch_page<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<Vec<R>>>;
}
