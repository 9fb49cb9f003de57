//! In-memory row source with the same paging contract as the backend.

use color_eyre::Result;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{PageRequest, PageSource};
use crate::cache::{filter_rows, FilterableRow};
use crate::cursor::CursorRow;
use crate::filters::FilterSet;

/// Sort direction of a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
  Ascending,
  /// Newest first, as the invoice list RPC returns rows
  #[default]
  Descending,
}

/// Rows held in memory, served in cursor order.
pub struct MemorySource<R> {
  rows: Vec<R>,
  order: SortOrder,
  latency: Option<Duration>,
  calls: AtomicUsize,
}

impl<R: CursorRow + Clone> MemorySource<R> {
  /// Create a source over `rows`; they are sorted by cursor here.
  pub fn new(mut rows: Vec<R>, order: SortOrder) -> Self {
    rows.sort_by_key(|r| r.cursor());
    if order == SortOrder::Descending {
      rows.reverse();
    }

    Self {
      rows,
      order,
      latency: None,
      calls: AtomicUsize::new(0),
    }
  }

  /// Delay every page by `latency`.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// Number of page requests served so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  fn page(&self, request: &PageRequest) -> Vec<R> {
    let start = match &request.after {
      None => 0,
      Some(after) => self
        .rows
        .iter()
        .position(|row| match self.order {
          SortOrder::Ascending => row.cursor() > *after,
          SortOrder::Descending => row.cursor() < *after,
        })
        .unwrap_or(self.rows.len()),
    };

    self
      .rows
      .iter()
      .skip(start)
      .take(request.limit)
      .cloned()
      .collect()
  }
}

impl<R: CursorRow + FilterableRow + Clone> MemorySource<R> {
  /// Create a source that only serves rows matching `filters`.
  pub fn filtered(rows: Vec<R>, filters: &FilterSet, order: SortOrder) -> Self {
    Self::new(filter_rows(&rows, filters, filters), order)
  }
}

impl<R> PageSource<R> for MemorySource<R>
where
  R: CursorRow + Clone + Send + Sync,
{
  fn fetch_page<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<Vec<R>>> {
    Box::pin(async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      match self.latency {
        Some(latency) => tokio::time::sleep(latency).await,
        None => tokio::task::yield_now().await,
      }
      Ok(self.page(request))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cursor::Cursor;

  #[derive(Debug, Clone, PartialEq)]
  struct Row(&'static str, &'static str, &'static str);

  impl CursorRow for Row {
    fn cursor(&self) -> Cursor {
      Cursor::new(self.0, self.1, self.2)
    }
  }

  fn rows() -> Vec<Row> {
    vec![
      Row("2024-01-01", "t1", "a"),
      Row("2024-01-02", "t1", "b"),
      Row("2024-01-02", "t1", "c"),
      Row("2024-01-03", "t2", "d"),
    ]
  }

  #[tokio::test]
  async fn test_descending_pages_resume_strictly_after() {
    let source = MemorySource::new(rows(), SortOrder::Descending);

    let first = source
      .fetch_page(&PageRequest { after: None, limit: 2 })
      .await
      .unwrap();
    assert_eq!(first.iter().map(|r| r.2).collect::<Vec<_>>(), vec!["d", "c"]);

    let second = source
      .fetch_page(&PageRequest {
        after: Some(first[1].cursor()),
        limit: 2,
      })
      .await
      .unwrap();
    assert_eq!(second.iter().map(|r| r.2).collect::<Vec<_>>(), vec!["b", "a"]);
    assert_eq!(source.calls(), 2);
  }

  #[tokio::test]
  async fn test_ascending_past_end_is_empty() {
    let source = MemorySource::new(rows(), SortOrder::Ascending);

    let page = source
      .fetch_page(&PageRequest {
        after: Some(Cursor::new("2024-01-03", "t2", "d")),
        limit: 10,
      })
      .await
      .unwrap();
    assert!(page.is_empty());
  }
}
