//! Subset detection and local re-filtering of cached result sets.
//!
//! The policy is conservative: a cached result only ever gets *narrowed*.
//! A request is served from cache only when every dimension it constrains
//! was constrained at least as broadly by the cached fetch. Missed hits are
//! acceptable, serving rows from an unverified range is not.

use std::collections::BTreeSet;

use super::traits::FilterableRow;
use crate::filters::FilterSet;

/// Decide whether `requested` is entailed by `cached`.
///
/// All per-field rules must hold:
/// - date range and id sets: both unconstrained, or both constrained with
///   the requested value contained in the cached one. Constraint on only
///   one side fails.
/// - document type, product search, product code mode: equal values
///   (including both absent).
pub fn is_subset(requested: &FilterSet, cached: &FilterSet) -> bool {
  let date_ok = match (&requested.date_range, &cached.date_range) {
    (None, None) => true,
    (Some(req), Some(have)) => have.covers(req),
    _ => false,
  };

  date_ok
    && set_contained(&requested.locations, &cached.locations)
    && set_contained(&requested.suppliers, &cached.suppliers)
    && set_contained(&requested.categories, &cached.categories)
    && requested.document_type == cached.document_type
    && requested.product_search == cached.product_search
    && requested.product_code_mode == cached.product_code_mode
}

fn set_contained(requested: &Option<BTreeSet<String>>, cached: &Option<BTreeSet<String>>) -> bool {
  match (requested, cached) {
    (None, None) => true,
    (Some(req), Some(have)) => req.is_subset(have),
    _ => false,
  }
}

/// Replay the requested constraints over rows fetched for `cached`.
///
/// Only dimensions constrained on both sides are re-applied; the input
/// slice is left untouched.
pub fn filter_rows<R>(rows: &[R], requested: &FilterSet, cached: &FilterSet) -> Vec<R>
where
  R: FilterableRow + Clone,
{
  let date_range = requested.date_range.filter(|_| cached.date_range.is_some());
  let locations = both(&requested.locations, &cached.locations);
  let suppliers = both(&requested.suppliers, &cached.suppliers);
  let categories = both(&requested.categories, &cached.categories);

  rows
    .iter()
    .filter(|row| {
      date_range.map_or(true, |range| row.row_date().is_some_and(|d| range.contains(d)))
        && member(locations, row.location_id())
        && member(suppliers, row.supplier_id())
        && member(categories, row.category_id())
    })
    .cloned()
    .collect()
}

fn both<'a>(
  requested: &'a Option<BTreeSet<String>>,
  cached: &Option<BTreeSet<String>>,
) -> Option<&'a BTreeSet<String>> {
  requested.as_ref().filter(|_| cached.is_some())
}

fn member(set: Option<&BTreeSet<String>>, id: Option<&str>) -> bool {
  match set {
    None => true,
    Some(set) => id.is_some_and(|id| set.contains(id)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::filters::{DateRange, DocumentType, ProductCodeMode, ProductSearch, SearchMode};
  use chrono::NaiveDate;

  #[derive(Debug, Clone, PartialEq)]
  struct Row {
    date: &'static str,
    location: Option<&'static str>,
    supplier: Option<&'static str>,
  }

  impl FilterableRow for Row {
    fn row_date(&self) -> Option<NaiveDate> {
      NaiveDate::parse_from_str(self.date, "%Y-%m-%d").ok()
    }

    fn location_id(&self) -> Option<&str> {
      self.location
    }

    fn supplier_id(&self) -> Option<&str> {
      self.supplier
    }

    fn category_id(&self) -> Option<&str> {
      None
    }
  }

  fn range(start: &str, end: &str) -> DateRange {
    DateRange::parse(start, end).unwrap()
  }

  fn january_l1_l2() -> FilterSet {
    FilterSet::new()
      .with_date_range(range("2024-01-01", "2024-01-31"))
      .with_locations(["L1", "L2"])
  }

  fn rows() -> Vec<Row> {
    vec![
      Row { date: "2024-01-02", location: Some("L1"), supplier: Some("S1") },
      Row { date: "2024-01-10", location: Some("L1"), supplier: Some("S2") },
      Row { date: "2024-01-15", location: Some("L2"), supplier: Some("S1") },
      Row { date: "2024-01-20", location: Some("L1"), supplier: None },
      Row { date: "2024-01-25", location: Some("L1"), supplier: Some("S1") },
    ]
  }

  #[test]
  fn test_narrower_request_is_subset() {
    let requested = FilterSet::new()
      .with_date_range(range("2024-01-10", "2024-01-20"))
      .with_locations(["L1"]);

    assert!(is_subset(&requested, &january_l1_l2()));
  }

  #[test]
  fn test_range_outside_cache_is_not_subset() {
    let requested = FilterSet::new()
      .with_date_range(range("2024-02-01", "2024-02-10"))
      .with_locations(["L1"]);

    assert!(!is_subset(&requested, &january_l1_l2()));

    let overlapping = FilterSet::new()
      .with_date_range(range("2023-12-20", "2024-01-10"))
      .with_locations(["L1"]);
    assert!(!is_subset(&overlapping, &january_l1_l2()));
  }

  #[test]
  fn test_extra_location_is_not_subset() {
    let requested = FilterSet::new()
      .with_date_range(range("2024-01-10", "2024-01-20"))
      .with_locations(["L1", "L3"]);

    assert!(!is_subset(&requested, &january_l1_l2()));
  }

  #[test]
  fn test_one_sided_constraints_are_not_subsets() {
    let cached_unbounded = FilterSet::new().with_locations(["L1", "L2"]);
    let requested_dated = FilterSet::new()
      .with_date_range(range("2024-01-10", "2024-01-20"))
      .with_locations(["L1"]);
    assert!(!is_subset(&requested_dated, &cached_unbounded));

    // Requesting everything must not be answered by a dated cache entry
    let requested_undated = FilterSet::new().with_locations(["L1"]);
    assert!(!is_subset(&requested_undated, &january_l1_l2()));

    let cached_all_suppliers = january_l1_l2();
    let requested_supplier = january_l1_l2().with_suppliers(["S1"]);
    assert!(!is_subset(&requested_supplier, &cached_all_suppliers));
  }

  #[test]
  fn test_exact_match_fields() {
    let cached = january_l1_l2().with_document_type(DocumentType::Invoice);

    assert!(is_subset(&cached.clone(), &cached));
    assert!(!is_subset(&january_l1_l2(), &cached));
    assert!(!is_subset(
      &january_l1_l2().with_document_type(DocumentType::CreditNote),
      &cached
    ));

    let search = ProductSearch {
      terms: vec!["milk".into()],
      mode: SearchMode::And,
    };
    let cached = january_l1_l2().with_product_search(search.clone());
    let other_mode = ProductSearch {
      mode: SearchMode::Or,
      ..search.clone()
    };
    assert!(is_subset(&january_l1_l2().with_product_search(search), &cached));
    assert!(!is_subset(&january_l1_l2().with_product_search(other_mode), &cached));

    let cached = january_l1_l2().with_product_code_mode(ProductCodeMode::WithCodes);
    assert!(!is_subset(
      &january_l1_l2().with_product_code_mode(ProductCodeMode::WithoutCodes),
      &cached
    ));
  }

  #[test]
  fn test_unconstrained_both_sides_is_subset() {
    assert!(is_subset(&FilterSet::new(), &FilterSet::new()));
  }

  #[test]
  fn test_filter_rows_narrows_date_and_location() {
    let data = rows();
    let requested = FilterSet::new()
      .with_date_range(range("2024-01-10", "2024-01-20"))
      .with_locations(["L1"]);

    let filtered = filter_rows(&data, &requested, &january_l1_l2());

    assert_eq!(
      filtered.iter().map(|r| r.date).collect::<Vec<_>>(),
      vec!["2024-01-10", "2024-01-20"]
    );
    // Input untouched
    assert_eq!(data, rows());
  }

  #[test]
  fn test_filter_rows_with_identical_filters_is_identity() {
    let data = rows();
    let cached = january_l1_l2();

    assert_eq!(filter_rows(&data, &cached, &cached), data);
  }

  #[test]
  fn test_filter_rows_ignores_dimensions_missing_from_cache() {
    let data = rows();
    let cached = january_l1_l2();
    // Suppliers were never part of the cached fetch, so they are not replayed
    let requested = january_l1_l2().with_suppliers(["S1"]);

    assert_eq!(filter_rows(&data, &requested, &cached).len(), data.len());
  }

  #[test]
  fn test_filter_rows_drops_rows_without_value() {
    let data = rows();
    let cached = january_l1_l2().with_suppliers(["S1", "S2"]);
    let requested = january_l1_l2().with_suppliers(["S1"]);

    let filtered = filter_rows(&data, &requested, &cached);
    assert_eq!(filtered.len(), 3);
    assert!(filtered.iter().all(|r| r.supplier == Some("S1")));
  }
}
