use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cache::FilterableRow;
use crate::cursor::{Cursor, CursorRow};
use crate::filters::{FilterSet, ProductCodeMode, ProductSearch, SearchMode};

/// One invoice line as returned by the list function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
  pub id: String,
  pub invoice_date: NaiveDate,
  pub created_at: String,
  #[serde(default)]
  pub invoice_number: Option<String>,
  #[serde(default)]
  pub document_type: Option<String>, // "Faktura" or "Kreditnota"
  #[serde(default)]
  pub product_code: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub quantity: Option<f64>,
  #[serde(default)]
  pub unit_price: Option<f64>,
  #[serde(default)]
  pub total_price: Option<f64>,
  #[serde(default)]
  pub category_id: Option<String>,
  #[serde(default)]
  pub location_id: Option<String>,
  #[serde(default)]
  pub location_name: Option<String>,
  #[serde(default)]
  pub supplier_id: Option<String>,
  #[serde(default)]
  pub supplier_name: Option<String>,
}

impl InvoiceLine {
  /// Minimal line, mostly for fixtures.
  pub fn new(id: impl Into<String>, invoice_date: NaiveDate, created_at: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      invoice_date,
      created_at: created_at.into(),
      invoice_number: None,
      document_type: None,
      product_code: None,
      description: None,
      quantity: None,
      unit_price: None,
      total_price: None,
      category_id: None,
      location_id: None,
      location_name: None,
      supplier_id: None,
      supplier_name: None,
    }
  }
}

impl InvoiceLine {
  /// Check the constraints the subset matcher compares by equality:
  /// document type, product code presence and product search.
  ///
  /// Search terms match case-insensitively against the description or
  /// product code.
  pub fn matches_exact(&self, filters: &FilterSet) -> bool {
    let document_ok = filters
      .document_type
      .map_or(true, |t| self.document_type.as_deref() == Some(t.as_str()));

    let has_code = self
      .product_code
      .as_deref()
      .is_some_and(|c| !c.trim().is_empty());
    let code_ok = match filters.product_code_mode {
      None => true,
      Some(ProductCodeMode::WithCodes) => has_code,
      Some(ProductCodeMode::WithoutCodes) => !has_code,
    };

    document_ok && code_ok && self.matches_search(filters.product_search.as_ref())
  }

  fn matches_search(&self, search: Option<&ProductSearch>) -> bool {
    let Some(search) = search.filter(|s| !s.terms.is_empty()) else {
      return true;
    };

    let haystack = [self.description.as_deref(), self.product_code.as_deref()]
      .into_iter()
      .flatten()
      .collect::<Vec<_>>()
      .join(" ")
      .to_lowercase();
    let found = |term: &String| haystack.contains(&term.to_lowercase());

    match search.mode {
      SearchMode::And => search.terms.iter().all(found),
      SearchMode::Or => search.terms.iter().any(found),
    }
  }
}

impl FilterableRow for InvoiceLine {
  fn row_date(&self) -> Option<NaiveDate> {
    Some(self.invoice_date)
  }

  fn location_id(&self) -> Option<&str> {
    self.location_id.as_deref()
  }

  fn supplier_id(&self) -> Option<&str> {
    self.supplier_id.as_deref()
  }

  fn category_id(&self) -> Option<&str> {
    self.category_id.as_deref()
  }
}

impl CursorRow for InvoiceLine {
  fn cursor(&self) -> Cursor {
    Cursor::new(self.invoice_date.to_string(), &self.created_at, &self.id)
  }
}
