//! 📄 Pagination: page numbers arrive as strings from the outside world and leave as math.

use serde::Serialize;

/// 📏 The most a single page will ever hold.
pub const MAX_PER_PAGE: usize = 100;

/// 📄 Which slice of results the caller wants. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub page: usize,
    pub per_page: usize,
}

impl PageRequest {
    /// 🧮 Page 0 is page 1. `per_page` is clamped to `1..=MAX_PER_PAGE`.
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    /// 🔤 Coerce a query-string page. Garbage, negatives and blanks mean page 1.
    pub fn parse(page: &str, per_page: usize) -> Self {
        Self::new(page.trim().parse::<usize>().unwrap_or(1), per_page)
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

/// 📚 One page of results plus enough context to render a pager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginatedCollection<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total_count: u64,
}

impl<T> PaginatedCollection<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_count: u64) -> Self {
        Self {
            items,
            page: request.page,
            per_page: request.per_page,
            total_count,
        }
    }

    pub fn empty(request: PageRequest, total_count: u64) -> Self {
        Self::new(Vec::new(), request, total_count)
    }

    pub fn total_pages(&self) -> usize {
        (self.total_count as usize).div_ceil(self.per_page.max(1))
    }

    pub fn is_out_of_range(&self) -> bool {
        self.page > self.total_pages().max(1)
    }

    pub fn next_page(&self) -> Option<usize> {
        (self.page < self.total_pages()).then_some(self.page + 1)
    }

    pub fn prev_page(&self) -> Option<usize> {
        (self.page > 1).then_some(self.page - 1)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
