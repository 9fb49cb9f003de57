//! Normalized description of a data request.
//!
//! Every field is independently optional. `None` means "unconstrained",
//! never "empty set".

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
  pub start: NaiveDate,
  pub end: NaiveDate,
}

impl DateRange {
  pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
    Self { start, end }
  }

  /// Parse a range from two `YYYY-MM-DD` strings.
  pub fn parse(start: &str, end: &str) -> Option<Self> {
    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(end, "%Y-%m-%d").ok()?;
    Some(Self { start, end })
  }

  pub fn contains(&self, date: NaiveDate) -> bool {
    date >= self.start && date <= self.end
  }

  /// True if `other` lies entirely within this range.
  pub fn covers(&self, other: &DateRange) -> bool {
    other.start >= self.start && other.end <= self.end
  }
}

/// Accounting document kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
  /// Regular invoice
  #[serde(rename = "Faktura")]
  Invoice,
  /// Credit note
  #[serde(rename = "Kreditnota")]
  CreditNote,
}

impl DocumentType {
  /// Name the backend uses for this kind.
  pub fn as_str(&self) -> &'static str {
    match self {
      DocumentType::Invoice => "Faktura",
      DocumentType::CreditNote => "Kreditnota",
    }
  }
}

/// How multiple search terms combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchMode {
  And,
  /// Match any term, as the dashboard's product search does by default
  #[default]
  Or,
}

/// Free-text product search. Compared by deep equality only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductSearch {
  pub terms: Vec<String>,
  #[serde(default)]
  pub mode: SearchMode,
}

/// Product-code presence filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCodeMode {
  WithCodes,
  WithoutCodes,
}

/// Query predicate for a cached or requested result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSet {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub date_range: Option<DateRange>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub locations: Option<BTreeSet<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub suppliers: Option<BTreeSet<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub categories: Option<BTreeSet<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub document_type: Option<DocumentType>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub product_search: Option<ProductSearch>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub product_code_mode: Option<ProductCodeMode>,
}

impl FilterSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_date_range(mut self, range: DateRange) -> Self {
    self.date_range = Some(range);
    self
  }

  pub fn with_locations<I, S>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.locations = Some(ids.into_iter().map(Into::into).collect());
    self
  }

  pub fn with_suppliers<I, S>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.suppliers = Some(ids.into_iter().map(Into::into).collect());
    self
  }

  pub fn with_categories<I, S>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.categories = Some(ids.into_iter().map(Into::into).collect());
    self
  }

  pub fn with_document_type(mut self, document_type: DocumentType) -> Self {
    self.document_type = Some(document_type);
    self
  }

  pub fn with_product_search(mut self, search: ProductSearch) -> Self {
    self.product_search = Some(search);
    self
  }

  pub fn with_product_code_mode(mut self, mode: ProductCodeMode) -> Self {
    self.product_code_mode = Some(mode);
    self
  }

  /// True if no field constrains the request.
  pub fn is_unconstrained(&self) -> bool {
    *self == Self::default()
  }
}
