//! Resume positions for cursor-paginated fetches.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Position of the last row emitted, in backend sort order.
///
/// Composite of the two sort keys the backend orders by plus a unique id,
/// so rows sharing a primary sort value are neither dropped nor repeated
/// across page boundaries. Derived ordering compares the fields in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
  /// Primary sort key (e.g. invoice date)
  pub primary: String,
  /// Secondary sort key (e.g. creation timestamp)
  pub secondary: String,
  /// Unique row id
  pub tie_break_id: String,
}

impl Cursor {
  pub fn new(
    primary: impl Into<String>,
    secondary: impl Into<String>,
    tie_break_id: impl Into<String>,
  ) -> Self {
    Self {
      primary: primary.into(),
      secondary: secondary.into(),
      tie_break_id: tie_break_id.into(),
    }
  }

  /// Encode as an opaque token.
  pub fn encode(&self) -> String {
    // Serializing three strings cannot fail
    let json = serde_json::to_vec(self).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
  }

  /// Decode a token produced by [`Cursor::encode`]. Returns `None` for
  /// anything that is not a valid token.
  pub fn decode(token: &str) -> Option<Self> {
    let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
    serde_json::from_slice(&bytes).ok()
  }
}

/// Rows that can produce their own resume position.
pub trait CursorRow {
  fn cursor(&self) -> Cursor;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tie_break_orders_duplicates() {
    let a = Cursor::new("2024-01-05", "2024-01-05T10:00:00Z", "a");
    let b = Cursor::new("2024-01-05", "2024-01-05T10:00:00Z", "b");
    let c = Cursor::new("2024-01-05", "2024-01-05T11:00:00Z", "a");

    assert!(a < b);
    assert!(b < c);
  }

  #[test]
  fn test_token_decodes() {
    let cursor = Cursor::new("2024-01-05", "2024-01-05T10:00:00Z", "row-1");
    assert_eq!(Cursor::decode(&cursor.encode()), Some(cursor));
  }

  #[test]
  fn test_garbage_token_is_none() {
    assert_eq!(Cursor::decode("not a cursor"), None);
    assert_eq!(Cursor::decode(&URL_SAFE_NO_PAD.encode("{}")), None);
  }
}
