//! Cache-aware invoice line loading.

use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::backend::memory::{MemorySource, SortOrder};
use crate::backend::{PageSource, RpcSource};
use crate::cache::{CacheResult, QueryKey, Scope, UnifiedCache};
use crate::config::BackendConfig;
use crate::filters::FilterSet;
use crate::paginator::Paginator;

use super::types::InvoiceLine;

/// Cache data type for invoice line queries
pub const DATA_TYPE: &str = "invoice_lines";

/// Builds the row source serving one scope and filter set.
pub type SourceFactory =
  dyn Fn(&Scope, &FilterSet) -> Result<Arc<dyn PageSource<InvoiceLine>>> + Send + Sync;

/// Invoice line loader with transparent filter-aware caching.
///
/// A load first asks the cache, which may answer from a broader earlier
/// result. On a miss every page is fetched and the complete result is
/// stored for later reuse.
#[derive(Clone)]
pub struct InvoiceLines {
  cache: UnifiedCache,
  sources: Arc<SourceFactory>,
  page_size: usize,
  ttl: Option<Duration>,
}

impl InvoiceLines {
  pub fn new<F>(cache: UnifiedCache, page_size: usize, sources: F) -> Self
  where
    F: Fn(&Scope, &FilterSet) -> Result<Arc<dyn PageSource<InvoiceLine>>> + Send + Sync + 'static,
  {
    Self {
      cache,
      sources: Arc::new(sources),
      page_size,
      ttl: None,
    }
  }

  /// Load from the configured list function.
  pub fn rpc(cache: UnifiedCache, page_size: usize, backend: BackendConfig) -> Self {
    Self::new(cache, page_size, move |scope, filters| {
      let source = RpcSource::<InvoiceLine>::new(&backend, scope.clone(), filters.clone())?;
      Ok(Arc::new(source) as Arc<dyn PageSource<InvoiceLine>>)
    })
  }

  /// Load from a fixed set of rows. The rows are assumed to belong to
  /// whichever scope is asked for; every filter is applied locally.
  pub fn fixture(cache: UnifiedCache, page_size: usize, rows: Vec<InvoiceLine>) -> Self {
    Self::new(cache, page_size, move |_, filters| {
      let matching: Vec<InvoiceLine> = rows
        .iter()
        .filter(|r| r.matches_exact(filters))
        .cloned()
        .collect();
      let source = MemorySource::filtered(matching, filters, SortOrder::Descending);
      Ok(Arc::new(source) as Arc<dyn PageSource<InvoiceLine>>)
    })
  }

  /// Override the cache's default lifetime for stored results.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  pub fn cache(&self) -> &UnifiedCache {
    &self.cache
  }

  /// Get every line matching `filters`, from the cache when possible.
  ///
  /// A failed fetch is returned as-is and leaves the cache untouched.
  pub async fn load(&self, scope: &Scope, filters: &FilterSet) -> Result<CacheResult<Vec<InvoiceLine>>> {
    let key = QueryKey::new(DATA_TYPE, scope.clone(), filters.clone());

    if let Some(rows) = self.cache.get_intelligent::<InvoiceLine>(&key) {
      return Ok(CacheResult::from_cache(rows));
    }

    let rows = self.paginate(scope, filters)?.fetch_all().await?;
    info!(query = %key.description(), rows = rows.len(), "Fetched invoice lines");

    self.cache.set_intelligent(&key, &rows, self.ttl);
    Ok(CacheResult::from_network(rows))
  }

  /// Start an uncached "load more" session.
  pub fn paginate(&self, scope: &Scope, filters: &FilterSet) -> Result<Paginator<InvoiceLine>> {
    let source = (self.sources)(scope, filters)?;
    Ok(Paginator::new(source, self.page_size))
  }

  /// Drop every cached invoice line result. Returns how many were removed.
  pub fn invalidate(&self) -> Result<usize> {
    let pattern = Regex::new(&QueryKey::data_type_pattern(DATA_TYPE))
      .map_err(|e| eyre!("Invalid invalidation pattern: {}", e))?;
    Ok(self.cache.clear_pattern(&pattern))
  }
}
