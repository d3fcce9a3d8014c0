//! Search, ordering and pagination for list queries.

use serde::{Deserialize, Serialize};

/// How a list query is narrowed and sliced.
///
/// `search` is a case-insensitive prefix on the item's title or name.
/// Items arrive in their natural order (events by start time, tags by name,
/// notifications newest first) and `descending` reverses it. `page` is
/// 1-based; a `limit` of 0 returns everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListOptions {
    pub search: Option<String>,
    pub descending: bool,
    pub page: u32,
    pub limit: u32,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            search: None,
            descending: false,
            page: 1,
            limit: 0,
        }
    }
}

/// One page of results plus the number of matches before slicing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl ListOptions {
    #[must_use]
    pub fn search(term: impl Into<String>) -> Self {
        Self {
            search: Some(term.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn paged(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            ..Self::default()
        }
    }

    pub fn apply<T>(&self, items: Vec<T>, key: impl Fn(&T) -> &str) -> Page<T> {
        let needle = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let mut matched: Vec<T> = match needle {
            Some(needle) => items
                .into_iter()
                .filter(|item| key(item).to_lowercase().starts_with(&needle))
                .collect(),
            None => items,
        };
        if self.descending {
            matched.reverse();
        }
        let total = matched.len();
        if self.limit == 0 {
            return Page {
                items: matched,
                total,
            };
        }
        let limit = self.limit as usize;
        let skip = (self.page.max(1) as usize - 1).saturating_mul(limit);
        let items = matched.into_iter().skip(skip).take(limit).collect();
        Page { items, total }
    }
}
