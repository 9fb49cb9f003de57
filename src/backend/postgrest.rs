//! PostgREST RPC row source (Supabase `rest/v1/rpc/{function}`).

use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{PageRequest, PageSource};
use crate::cache::Scope;
use crate::config::{BackendConfig, Config};
use crate::filters::{DocumentType, FilterSet, ProductCodeMode, SearchMode};

/// Body of a cursor-paged list RPC call.
///
/// Constraints the list function does not take by default are only sent
/// when the filter actually uses them.
#[derive(Debug, Serialize)]
struct RpcParams<'a> {
  p_org: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  p_business_unit: Option<&'a str>,
  p_start_date: Option<NaiveDate>,
  p_end_date: Option<NaiveDate>,
  p_location_ids: Option<Vec<&'a str>>,
  p_supplier_ids: Option<Vec<&'a str>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  p_category_ids: Option<Vec<&'a str>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  p_document_type: Option<DocumentType>,
  #[serde(skip_serializing_if = "Option::is_none")]
  p_product_code_mode: Option<ProductCodeMode>,
  p_search: Option<String>,
  /// How the whitespace-separated terms in `p_search` combine
  #[serde(skip_serializing_if = "Option::is_none")]
  p_search_mode: Option<SearchMode>,
  p_limit: usize,
  p_after_invoice_date: Option<&'a str>,
  p_after_created_at: Option<&'a str>,
  p_after_id: Option<&'a str>,
}

fn rpc_params<'a>(scope: &'a Scope, filters: &'a FilterSet, request: &'a PageRequest) -> RpcParams<'a> {
  let ids = |set: &'a Option<std::collections::BTreeSet<String>>| {
    set
      .as_ref()
      .map(|s| s.iter().map(String::as_str).collect::<Vec<_>>())
  };

  let search = filters
    .product_search
    .as_ref()
    .filter(|s| !s.terms.is_empty());

  RpcParams {
    p_org: &scope.organization_id,
    p_business_unit: scope.business_unit_id.as_deref(),
    p_start_date: filters.date_range.map(|r| r.start),
    p_end_date: filters.date_range.map(|r| r.end),
    p_location_ids: ids(&filters.locations),
    p_supplier_ids: ids(&filters.suppliers),
    p_category_ids: ids(&filters.categories),
    p_document_type: filters.document_type,
    p_product_code_mode: filters.product_code_mode,
    p_search: search.map(|s| s.terms.join(" ")),
    p_search_mode: search.map(|s| s.mode),
    p_limit: request.limit,
    p_after_invoice_date: request.after.as_ref().map(|c| c.primary.as_str()),
    p_after_created_at: request.after.as_ref().map(|c| c.secondary.as_str()),
    p_after_id: request.after.as_ref().map(|c| c.tie_break_id.as_str()),
  }
}

/// Row source backed by a PostgREST list function.
pub struct RpcSource<R> {
  client: reqwest::Client,
  endpoint: Url,
  api_key: String,
  scope: Scope,
  filters: FilterSet,
  _rows: PhantomData<fn() -> R>,
}

impl<R> RpcSource<R> {
  /// Create a source for one scope and filter set.
  pub fn new(backend: &BackendConfig, scope: Scope, filters: FilterSet) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_api_key(backend, api_key, scope, filters)
  }

  pub fn with_api_key(
    backend: &BackendConfig,
    api_key: String,
    scope: Scope,
    filters: FilterSet,
  ) -> Result<Self> {
    let base = Url::parse(&backend.url)
      .map_err(|e| eyre!("Invalid backend url {}: {}", backend.url, e))?;
    let endpoint = base
      .join(&format!("rest/v1/rpc/{}", backend.rpc))
      .map_err(|e| eyre!("Invalid RPC name {}: {}", backend.rpc, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(backend.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      endpoint,
      api_key,
      scope,
      filters,
      _rows: PhantomData,
    })
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }
}

impl<R> PageSource<R> for RpcSource<R>
where
  R: DeserializeOwned + Send,
{
  fn fetch_page<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<Vec<R>>> {
    Box::pin(async move {
      let params = rpc_params(&self.scope, &self.filters, request);
      debug!(endpoint = %self.endpoint, limit = request.limit, resumed = request.after.is_some(), "Fetching page");

      let response = self
        .client
        .post(self.endpoint.clone())
        .header("apikey", &self.api_key)
        .bearer_auth(&self.api_key)
        .json(&params)
        .send()
        .await
        .map_err(|e| eyre!("Failed to call {}: {}", self.endpoint, e))?;

      let status = response.status();
      if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(eyre!("RPC {} failed with {}: {}", self.endpoint, status, body));
      }

      response
        .json::<Vec<R>>()
        .await
        .map_err(|e| eyre!("Failed to parse rows from {}: {}", self.endpoint, e))
    })
  }
}
