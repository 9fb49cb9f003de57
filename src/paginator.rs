//! Cursor-based "load more" sessions over a paged row source.
//!
//! A `Paginator<R>` accumulates rows from repeated bounded fetches without
//! ever asking the backend for a total count. Pages are requested strictly
//! one at a time.
//!
//! # Example
//!
//! ```ignore
//! let paginator = Paginator::new(source, 50);
//!
//! // First page
//! paginator.load_more().await?;
//!
//! // User scrolls to the bottom
//! if paginator.has_more() {
//!     paginator.load_more().await?;
//! }
//!
//! // Filters changed
//! paginator.refresh().await?;
//! ```

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::backend::{PageRequest, PageSource};
use crate::cursor::{Cursor, CursorRow};

/// The state of a paginator session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginatorState {
  /// Ready for the next page
  Idle,
  /// A page request is in flight
  Loading,
  /// The source has no more rows
  Exhausted,
  /// The last page request failed
  Error(String),
}

impl PaginatorState {
  pub fn is_loading(&self) -> bool {
    matches!(self, PaginatorState::Loading)
  }

  pub fn is_exhausted(&self) -> bool {
    matches!(self, PaginatorState::Exhausted)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, PaginatorState::Error(_))
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      PaginatorState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// What a `load_more` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
  /// A page with this many rows was appended
  Appended(usize),
  /// Nothing requested: a page is already in flight or the source is exhausted
  Skipped,
  /// The session was reset while the page was in flight; the page was dropped
  Discarded,
}

struct Session<R> {
  rows: Vec<R>,
  cursor: Option<Cursor>,
  has_more: bool,
  state: PaginatorState,
  /// Bumped on every reset so late pages can be recognized
  generation: u64,
}

impl<R> Session<R> {
  fn fresh(generation: u64) -> Self {
    Self {
      rows: Vec::new(),
      cursor: None,
      has_more: true,
      state: PaginatorState::Idle,
      generation,
    }
  }
}

/// Releases the in-flight flag if a load is dropped before its page arrives.
struct InFlight<'a, R> {
  session: &'a Mutex<Session<R>>,
  generation: u64,
  armed: bool,
}

impl<R> Drop for InFlight<'_, R> {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }
    let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
    if session.generation == self.generation && session.state.is_loading() {
      debug!("Page load cancelled");
      session.state = PaginatorState::Idle;
    }
  }
}

/// Accumulating cursor-paginated fetch session.
///
/// Each request asks for one row more than the page size. The extra row is
/// never kept; it only tells whether another page exists, so the final
/// page is recognized without an empty round trip.
pub struct Paginator<R> {
  source: Arc<dyn PageSource<R>>,
  page_size: usize,
  timeout: Option<Duration>,
  session: Mutex<Session<R>>,
}

impl<R> Paginator<R>
where
  R: CursorRow + Clone + Send,
{
  /// Create a session over `source`. A page size of zero is treated as one.
  pub fn new(source: Arc<dyn PageSource<R>>, page_size: usize) -> Self {
    Self {
      source,
      page_size: page_size.max(1),
      timeout: None,
      session: Mutex::new(Session::fresh(0)),
    }
  }

  /// Fail a page request that takes longer than `timeout`.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  fn lock(&self) -> MutexGuard<'_, Session<R>> {
    self.session.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  /// Snapshot of the accumulated rows, in source order.
  pub fn rows(&self) -> Vec<R> {
    self.lock().rows.clone()
  }

  pub fn len(&self) -> usize {
    self.lock().rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().rows.is_empty()
  }

  pub fn has_more(&self) -> bool {
    self.lock().has_more
  }

  /// Position of the last accumulated row.
  pub fn cursor(&self) -> Option<Cursor> {
    self.lock().cursor.clone()
  }

  pub fn state(&self) -> PaginatorState {
    self.lock().state.clone()
  }

  pub fn is_loading(&self) -> bool {
    self.lock().state.is_loading()
  }

  /// Fetch and append the next page.
  ///
  /// This is a no-op while a page is in flight or after the source is
  /// exhausted. A failure is returned unchanged and recorded in the state;
  /// `has_more` is left alone so the call can be retried.
  pub async fn load_more(&self) -> Result<LoadOutcome> {
    let (generation, request) = {
      let mut session = self.lock();
      if session.state.is_loading() || !session.has_more {
        return Ok(LoadOutcome::Skipped);
      }
      session.state = PaginatorState::Loading;
      let request = PageRequest {
        after: session.cursor.clone(),
        limit: self.page_size + 1,
      };
      (session.generation, request)
    };

    let mut in_flight = InFlight {
      session: &self.session,
      generation,
      armed: true,
    };
    let result = self.fetch(&request).await;
    in_flight.armed = false;

    let mut session = self.lock();
    if session.generation != generation {
      debug!("Dropping page fetched before a reset");
      return Ok(LoadOutcome::Discarded);
    }

    match result {
      Ok(mut rows) => {
        let more = rows.len() > self.page_size;
        rows.truncate(self.page_size);
        if let Some(last) = rows.last() {
          session.cursor = Some(last.cursor());
        }

        let appended = rows.len();
        session.rows.extend(rows);
        session.has_more = more;
        session.state = if more {
          PaginatorState::Idle
        } else {
          PaginatorState::Exhausted
        };

        debug!(appended, total = session.rows.len(), has_more = more, "Page loaded");
        Ok(LoadOutcome::Appended(appended))
      }
      Err(e) => {
        session.state = PaginatorState::Error(e.to_string());
        Err(e)
      }
    }
  }

  async fn fetch(&self, request: &PageRequest) -> Result<Vec<R>> {
    let page = self.source.fetch_page(request);
    match self.timeout {
      Some(limit) => tokio::time::timeout(limit, page)
        .await
        .map_err(|_| eyre!("Page request timed out after {:?}", limit))?,
      None => page.await,
    }
  }

  /// Clear rows and cursor. Any page still in flight will be discarded.
  pub fn reset(&self) {
    let mut session = self.lock();
    let generation = session.generation + 1;
    *session = Session::fresh(generation);
  }

  /// Reset, then load the first page.
  pub async fn refresh(&self) -> Result<LoadOutcome> {
    self.reset();
    self.load_more().await
  }

  /// Keep loading pages until the source is exhausted.
  ///
  /// Stops at the first failure and returns it. If another caller has a
  /// page in flight, returns what has accumulated so far.
  pub async fn fetch_all(&self) -> Result<Vec<R>> {
    while let LoadOutcome::Appended(_) = self.load_more().await? {}
    Ok(self.rows())
  }
}

impl<R> std::fmt::Debug for Paginator<R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
    f.debug_struct("Paginator")
      .field("page_size", &self.page_size)
      .field("rows", &session.rows.len())
      .field("has_more", &session.has_more)
      .field("state", &session.state)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::memory::{MemorySource, SortOrder};
  use futures::future::BoxFuture;
  use std::collections::HashSet;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Debug, Clone, PartialEq)]
  struct Line {
    date: String,
    created: String,
    id: String,
  }

  impl CursorRow for Line {
    fn cursor(&self) -> Cursor {
      Cursor::new(&self.date, &self.created, &self.id)
    }
  }

  /// `n` rows where many share the same date and creation time.
  fn lines(n: usize) -> Vec<Line> {
    (0..n)
      .map(|i| Line {
        date: format!("2024-01-{:02}", 1 + i / 7),
        created: format!("T{}", i % 2),
        id: format!("id-{:03}", i),
      })
      .collect()
  }

  fn paginator(source: &Arc<MemorySource<Line>>, page_size: usize) -> Paginator<Line> {
    Paginator::new(source.clone(), page_size)
  }

  /// Fails the first `failures` calls, then serves from `inner`.
  struct Flaky {
    inner: MemorySource<Line>,
    failures: AtomicUsize,
  }

  impl PageSource<Line> for Flaky {
    fn fetch_page<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<Vec<Line>>> {
      Box::pin(async move {
        if self
          .failures
          .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
          .is_ok()
        {
          return Err(eyre!("connection reset"));
        }
        self.inner.fetch_page(request).await
      })
    }
  }

  #[tokio::test]
  async fn test_accumulates_every_row_once() {
    let source = Arc::new(MemorySource::new(lines(23), SortOrder::Descending));
    let pager = paginator(&source, 5);

    let rows = pager.fetch_all().await.unwrap();

    assert_eq!(rows.len(), 23);
    let ids: HashSet<_> = rows.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids.len(), 23);
    // Strictly descending, so nothing was reordered across page boundaries
    assert!(rows.windows(2).all(|w| w[0].cursor() > w[1].cursor()));

    assert_eq!(source.calls(), 5);
    assert!(!pager.has_more());
    assert_eq!(pager.state(), PaginatorState::Exhausted);
  }

  #[tokio::test]
  async fn test_exact_multiple_needs_no_extra_request() {
    let source = Arc::new(MemorySource::new(lines(20), SortOrder::Descending));
    let pager = paginator(&source, 5);

    assert_eq!(pager.fetch_all().await.unwrap().len(), 20);
    assert_eq!(source.calls(), 4);
  }

  #[tokio::test]
  async fn test_empty_source_is_exhausted_after_one_request() {
    let source = Arc::new(MemorySource::new(Vec::<Line>::new(), SortOrder::Descending));
    let pager = paginator(&source, 5);

    assert_eq!(pager.load_more().await.unwrap(), LoadOutcome::Appended(0));
    assert!(pager.is_empty());
    assert!(pager.state().is_exhausted());
    assert_eq!(pager.cursor(), None);
  }

  #[tokio::test]
  async fn test_load_more_after_exhaustion_is_noop() {
    let source = Arc::new(MemorySource::new(lines(3), SortOrder::Descending));
    let pager = paginator(&source, 5);

    assert_eq!(pager.load_more().await.unwrap(), LoadOutcome::Appended(3));
    assert_eq!(pager.load_more().await.unwrap(), LoadOutcome::Skipped);
    assert_eq!(source.calls(), 1);
  }

  #[tokio::test]
  async fn test_cursor_tracks_last_row() {
    let source = Arc::new(MemorySource::new(lines(12), SortOrder::Ascending));
    let pager = paginator(&source, 5);

    pager.load_more().await.unwrap();
    let rows = pager.rows();
    assert_eq!(pager.cursor(), Some(rows[4].cursor()));
    assert!(pager.has_more());
    assert_eq!(pager.state(), PaginatorState::Idle);
  }

  #[tokio::test]
  async fn test_overlapping_calls_fetch_once() {
    let source = Arc::new(
      MemorySource::new(lines(30), SortOrder::Descending).with_latency(Duration::from_millis(20)),
    );
    let pager = paginator(&source, 10);

    let (first, second) = tokio::join!(pager.load_more(), pager.load_more());

    assert_eq!(first.unwrap(), LoadOutcome::Appended(10));
    assert_eq!(second.unwrap(), LoadOutcome::Skipped);
    assert_eq!(source.calls(), 1);
    assert_eq!(pager.len(), 10);
  }

  #[tokio::test]
  async fn test_failure_is_surfaced_and_retryable() {
    let source = Arc::new(Flaky {
      inner: MemorySource::new(lines(8), SortOrder::Descending),
      failures: AtomicUsize::new(1),
    });
    let pager: Paginator<Line> = Paginator::new(source, 5);

    let err = pager.load_more().await.unwrap_err();
    assert_eq!(err.to_string(), "connection reset");
    assert_eq!(pager.state().error(), Some("connection reset"));
    assert!(pager.has_more());
    assert!(pager.is_empty());

    assert_eq!(pager.load_more().await.unwrap(), LoadOutcome::Appended(5));
    assert_eq!(pager.load_more().await.unwrap(), LoadOutcome::Appended(3));
    assert!(pager.state().is_exhausted());
  }

  #[tokio::test]
  async fn test_fetch_all_stops_at_error() {
    let source = Arc::new(Flaky {
      inner: MemorySource::new(lines(8), SortOrder::Descending),
      failures: AtomicUsize::new(1),
    });
    let pager: Paginator<Line> = Paginator::new(source, 5);

    assert!(pager.fetch_all().await.is_err());
    assert!(pager.state().is_error());
  }

  #[tokio::test]
  async fn test_page_in_flight_during_reset_is_discarded() {
    let source = Arc::new(
      MemorySource::new(lines(30), SortOrder::Descending).with_latency(Duration::from_millis(30)),
    );
    let pager = paginator(&source, 10);

    let (outcome, _) = tokio::join!(pager.load_more(), async {
      tokio::time::sleep(Duration::from_millis(5)).await;
      pager.reset();
    });

    assert_eq!(outcome.unwrap(), LoadOutcome::Discarded);
    assert!(pager.is_empty());
    assert!(pager.has_more());
    assert_eq!(pager.state(), PaginatorState::Idle);
  }

  #[tokio::test]
  async fn test_cancelled_load_can_be_retried() {
    let source = Arc::new(
      MemorySource::new(lines(3), SortOrder::Descending).with_latency(Duration::from_millis(50)),
    );
    let pager = paginator(&source, 5);

    let cancelled = tokio::time::timeout(Duration::from_millis(5), pager.load_more()).await;
    assert!(cancelled.is_err());
    assert_eq!(pager.state(), PaginatorState::Idle);
    assert!(pager.has_more());

    assert_eq!(pager.load_more().await.unwrap(), LoadOutcome::Appended(3));
    assert!(pager.state().is_exhausted());
  }

  #[tokio::test]
  async fn test_refresh_restarts_from_the_top() {
    let source = Arc::new(MemorySource::new(lines(7), SortOrder::Descending));
    let pager = paginator(&source, 5);

    pager.fetch_all().await.unwrap();
    let first_pass = pager.rows();

    assert_eq!(pager.refresh().await.unwrap(), LoadOutcome::Appended(5));
    assert_eq!(pager.rows(), first_pass[..5].to_vec());
    assert!(pager.has_more());
  }

  #[tokio::test]
  async fn test_timeout_is_a_failure() {
    let source = Arc::new(
      MemorySource::new(lines(5), SortOrder::Descending).with_latency(Duration::from_millis(200)),
    );
    let pager = paginator(&source, 5).with_timeout(Duration::from_millis(10));

    let err = pager.load_more().await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert!(pager.state().is_error());
    assert!(pager.has_more());
  }
}
