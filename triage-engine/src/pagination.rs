use serde::Serialize;
use triage_core::DEFAULT_PAGE_SIZE;

/// How much of the filtered list is on screen. Grows one page per "load
/// more" and falls back to a single page whenever the selection changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    page_size: usize,
    display_count: usize,
}

impl Pagination {
    pub fn new(page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            page_size,
            display_count: page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn display_count(&self) -> usize {
        self.display_count
    }

    pub fn load_more(&mut self) {
        self.display_count = self.display_count.saturating_add(self.page_size);
    }

    pub fn reset(&mut self) {
        self.display_count = self.page_size;
    }

    pub fn visible<'a, T>(&self, filtered: &'a [T]) -> &'a [T] {
        &filtered[..self.display_count.min(filtered.len())]
    }

    pub fn has_more(&self, total: usize) -> bool {
        total > self.display_count
    }

    pub fn remaining(&self, total: usize) -> usize {
        total.saturating_sub(self.display_count)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}
