//! Cache key construction.
//!
//! Callers must always go through these builders; keys are opaque.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::filters::FilterSet;

/// Tenant scope every cache entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
  pub organization_id: String,
  pub business_unit_id: Option<String>,
}

impl Scope {
  pub fn new(organization_id: impl Into<String>, business_unit_id: Option<String>) -> Self {
    Self {
      organization_id: organization_id.into(),
      business_unit_id,
    }
  }

  pub fn organization(organization_id: impl Into<String>) -> Self {
    Self::new(organization_id, None)
  }
}

/// Identity of one filter-aware request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  pub data_type: String,
  pub scope: Scope,
  pub filters: FilterSet,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyPayload<'a> {
  org_id: &'a str,
  business_unit_id: Option<&'a str>,
  #[serde(flatten)]
  filters: &'a FilterSet,
}

impl QueryKey {
  pub fn new(data_type: impl Into<String>, scope: Scope, filters: FilterSet) -> Self {
    Self {
      data_type: data_type.into(),
      scope,
      filters,
    }
  }

  /// Render `{data_type}:{base64(json)}`.
  ///
  /// Sets are ordered and struct fields serialize in declaration order, so
  /// logically identical requests always yield the same key.
  pub fn cache_key(&self) -> String {
    let payload = KeyPayload {
      org_id: &self.scope.organization_id,
      business_unit_id: self.scope.business_unit_id.as_deref(),
      filters: &self.filters,
    };
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    format!("{}:{}", self.data_type, STANDARD.encode(json))
  }

  /// Human readable description for logs and stats.
  pub fn description(&self) -> String {
    let bu = self.scope.business_unit_id.as_deref().unwrap_or("all");
    if self.filters.is_unconstrained() {
      format!("{} for {}/{}", self.data_type, self.scope.organization_id, bu)
    } else {
      format!(
        "{} for {}/{} (filtered)",
        self.data_type, self.scope.organization_id, bu
      )
    }
  }

  /// Pattern matching every filter-aware key of `data_type`.
  pub fn data_type_pattern(data_type: &str) -> String {
    format!("^{}:", regex::escape(data_type))
  }
}

/// Builders for simple `{domain}:{id}` keys.
pub mod keys {
  pub fn user(id: &str) -> String {
    format!("user:{}", id)
  }

  pub fn orgs(user_id: &str) -> String {
    format!("orgs:{}", user_id)
  }

  pub fn locations(org_id: &str, bu_id: Option<&str>) -> String {
    format!("locations:{}:{}", org_id, bu_id.unwrap_or("all"))
  }

  pub fn suppliers(org_id: &str) -> String {
    format!("suppliers:{}", org_id)
  }

  pub fn products(org_id: &str, filters: Option<&str>) -> String {
    format!("products:{}:{}", org_id, filters.unwrap_or("all"))
  }

  pub fn dashboard(org_id: &str, bu_id: Option<&str>) -> String {
    format!("dashboard:{}:{}", org_id, bu_id.unwrap_or("all"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::filters::{DateRange, DocumentType, ProductCodeMode, ProductSearch, SearchMode};
  use std::collections::HashSet;

  fn scope() -> Scope {
    Scope::new("org-1", Some("bu-1".to_string()))
  }

  #[test]
  fn test_identical_requests_share_a_key() {
    let a = QueryKey::new(
      "invoice_lines",
      scope(),
      FilterSet::new().with_locations(["L2", "L1"]),
    );
    let b = QueryKey::new(
      "invoice_lines",
      scope(),
      FilterSet::new().with_locations(["L1", "L2"]),
    );

    assert_eq!(a.cache_key(), b.cache_key());
  }

  #[test]
  fn test_any_field_changes_the_key() {
    let base = FilterSet::new().with_date_range(DateRange::parse("2024-01-01", "2024-01-31").unwrap());
    let plain = QueryKey::new("invoice_lines", scope(), base.clone());
    let typed = QueryKey::new(
      "invoice_lines",
      scope(),
      base.clone().with_document_type(DocumentType::Invoice),
    );
    let other_bu = QueryKey::new("invoice_lines", Scope::organization("org-1"), base.clone());
    let other_type = QueryKey::new("products", scope(), base);

    assert_ne!(plain.cache_key(), typed.cache_key());
    assert_ne!(plain.cache_key(), other_bu.cache_key());
    assert_ne!(plain.cache_key(), other_type.cache_key());
  }

  #[test]
  fn test_exact_match_fields_never_share_a_key() {
    let search = |mode: SearchMode| ProductSearch {
      terms: vec!["oat".into(), "milk".into()],
      mode,
    };
    let variants = [
      FilterSet::new(),
      FilterSet::new().with_product_search(search(SearchMode::And)),
      FilterSet::new().with_product_search(search(SearchMode::Or)),
      FilterSet::new().with_product_search(ProductSearch {
        terms: vec!["oat".into()],
        mode: SearchMode::Or,
      }),
      FilterSet::new().with_product_code_mode(ProductCodeMode::WithCodes),
      FilterSet::new().with_product_code_mode(ProductCodeMode::WithoutCodes),
      FilterSet::new().with_document_type(DocumentType::Invoice),
      FilterSet::new().with_document_type(DocumentType::CreditNote),
    ];

    let keys: HashSet<String> = variants
      .iter()
      .map(|f| QueryKey::new("invoice_lines", scope(), f.clone()).cache_key())
      .collect();

    assert_eq!(keys.len(), variants.len());
  }

  #[test]
  fn test_key_payload_decodes_to_json() {
    let key = QueryKey::new("invoice_lines", scope(), FilterSet::new()).cache_key();
    let (prefix, encoded) = key.split_once(':').unwrap();
    let json: serde_json::Value = serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();

    assert_eq!(prefix, "invoice_lines");
    assert_eq!(json["orgId"], "org-1");
    assert_eq!(json["businessUnitId"], "bu-1");
  }

  #[test]
  fn test_simple_keys() {
    assert_eq!(keys::locations("org-1", None), "locations:org-1:all");
    assert_eq!(keys::locations("org-1", Some("bu-2")), "locations:org-1:bu-2");
    assert_eq!(keys::products("org-1", None), "products:org-1:all");
  }
}
