//! Pagination types: opaque-cursor page references and key pages.

use reflex_core::ArgValue;
use serde::{Deserialize, Serialize};

/// Default page size for listings.
pub const DEFAULT_PAGE_SIZE: usize = 5;

/// A page request: an opaque cursor plus a requested count.
///
/// The cursor is the last key of the previous page; `None` means the
/// first page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    /// Resume strictly after this key.
    pub after: Option<String>,
    /// Number of items requested.
    pub count: usize,
}

impl Default for PageRef {
    fn default() -> Self {
        Self {
            after: None,
            count: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRef {
    /// First page with the given count.
    pub fn first(count: usize) -> Self {
        Self { after: None, count }
    }

    /// Page resuming after the given key.
    pub fn after(cursor: impl Into<String>, count: usize) -> Self {
        Self {
            after: Some(cursor.into()),
            count,
        }
    }

    /// Same page reference asking for one extra item.
    ///
    /// The conventional overfetch: request `count + 1`, and if that many
    /// come back the caller truncates and sets `has_more`.
    pub fn one_more(&self) -> Self {
        Self {
            after: self.after.clone(),
            count: self.count + 1,
        }
    }

    /// Encode this page reference as a call-key argument.
    pub fn to_arg(&self) -> ArgValue {
        ArgValue::List(vec![
            ArgValue::opt_text(self.after.as_deref()),
            ArgValue::from(self.count),
        ])
    }
}

/// One page of keys from a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPage {
    /// The keys, in lexicographic order.
    pub keys: Vec<String>,
    /// Whether more keys exist past this page.
    pub has_more: bool,
}

impl KeyPage {
    /// An empty page.
    pub fn empty() -> Self {
        Self {
            keys: Vec::new(),
            has_more: false,
        }
    }

    /// The cursor for the next page, if any.
    pub fn next_cursor(&self) -> Option<&str> {
        if self.has_more {
            self.keys.last().map(String::as_str)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_more_keeps_cursor() {
        let page = PageRef::after("todo/u1/items/5", 5);
        let plus = page.one_more();
        assert_eq!(plus.count, 6);
        assert_eq!(plus.after.as_deref(), Some("todo/u1/items/5"));
    }

    #[test]
    fn test_page_ref_arg_is_stable() {
        let a = PageRef::first(5).to_arg();
        let b = PageRef::first(5).to_arg();
        assert_eq!(a, b);
        assert_ne!(a, PageRef::first(6).to_arg());
    }

    #[test]
    fn test_next_cursor_only_when_more() {
        let page = KeyPage {
            keys: vec!["a".into(), "b".into()],
            has_more: false,
        };
        assert_eq!(page.next_cursor(), None);

        let page = KeyPage {
            keys: vec!["a".into(), "b".into()],
            has_more: true,
        };
        assert_eq!(page.next_cursor(), Some("b"));
    }
}
