use std::ops::Range;

use crate::engine::EngineError;
use crate::limits::MAX_PAGE_SIZE;

/// Where one page falls inside an ordered, counted collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWindow {
    pub page: usize,
    pub page_size: usize,
    pub total_items: u64,
    pub total_pages: usize,
    /// Item offsets on this page, clipped to `[0, total_items)`.
    pub items: Range<usize>,
}

impl PageWindow {
    /// `page` is 1-based. A page past the end yields an empty range, not an error.
    pub fn compute(total_items: u64, page_size: usize, page: usize) -> Result<Self, EngineError> {
        if page_size == 0 {
            return Err(EngineError::Validation("page size must be at least 1".into()));
        }
        if page_size > MAX_PAGE_SIZE {
            return Err(EngineError::LimitExceeded("page size too large"));
        }
        if page == 0 {
            return Err(EngineError::Validation("page numbers start at 1".into()));
        }

        let total = usize::try_from(total_items).unwrap_or(usize::MAX);
        let total_pages = total.div_ceil(page_size);
        let start = (page - 1).saturating_mul(page_size).min(total);
        let end = page.saturating_mul(page_size).min(total);

        Ok(Self {
            page,
            page_size,
            total_items,
            total_pages,
            items: start..end,
        })
    }

    pub fn offset(&self) -> usize {
        self.items.start
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// One page of items plus the metadata to navigate from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub window: PageWindow,
}

impl<T> PageResult<T> {
    pub fn new(items: Vec<T>, window: PageWindow) -> Self {
        Self { items, window }
    }

    pub fn current_page(&self) -> usize {
        self.window.page
    }

    pub fn page_size(&self) -> usize {
        self.window.page_size
    }

    pub fn total_items(&self) -> u64 {
        self.window.total_items
    }

    pub fn total_pages(&self) -> usize {
        self.window.total_pages
    }

    pub fn has_next(&self) -> bool {
        self.window.has_next()
    }

    pub fn has_previous(&self) -> bool {
        self.window.has_previous()
    }

    /// Next page number, or the current one on the last page.
    pub fn next_page(&self) -> usize {
        if self.has_next() {
            self.window.page + 1
        } else {
            self.window.page
        }
    }

    /// Previous page number, or the current one on the first page.
    pub fn previous_page(&self) -> usize {
        if self.has_previous() {
            self.window.page - 1
        } else {
            self.window.page
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PageResult<U> {
        PageResult {
            items: self.items.into_iter().map(f).collect(),
            window: self.window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_partial_page_is_clipped() {
        let p = PageWindow::compute(12, 5, 3).unwrap();
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.items, 10..12);
        assert_eq!(p.len(), 2);
        assert!(!p.has_next());
        assert!(p.has_previous());
    }

    #[test]
    fn full_pages() {
        let p1 = PageWindow::compute(12, 5, 1).unwrap();
        assert_eq!(p1.items, 0..5);
        assert!(p1.has_next());
        assert!(!p1.has_previous());

        let p2 = PageWindow::compute(12, 5, 2).unwrap();
        assert_eq!(p2.items, 5..10);
        assert!(p2.has_next());
        assert!(p2.has_previous());
    }

    #[test]
    fn page_past_end_is_empty_not_error() {
        let p = PageWindow::compute(12, 5, 4).unwrap();
        assert!(p.is_empty());
        assert_eq!(p.items, 12..12);
        assert!(!p.has_next());
        assert!(p.has_previous());

        let far = PageWindow::compute(12, 5, 1_000).unwrap();
        assert!(far.is_empty());
    }

    #[test]
    fn empty_collection() {
        let p = PageWindow::compute(0, 10, 1).unwrap();
        assert_eq!(p.total_pages, 0);
        assert!(p.is_empty());
        assert!(!p.has_next());
        assert!(!p.has_previous());
    }

    #[test]
    fn exact_multiple() {
        let p = PageWindow::compute(10, 5, 2).unwrap();
        assert_eq!(p.total_pages, 2);
        assert_eq!(p.items, 5..10);
        assert!(!p.has_next());
    }

    #[test]
    fn invalid_arguments() {
        assert!(matches!(
            PageWindow::compute(10, 0, 1),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            PageWindow::compute(10, 5, 0),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            PageWindow::compute(10, MAX_PAGE_SIZE + 1, 1),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn next_and_previous_stay_put_at_edges() {
        let first = PageResult::new(vec![1, 2], PageWindow::compute(4, 2, 1).unwrap());
        assert_eq!(first.previous_page(), 1);
        assert_eq!(first.next_page(), 2);

        let last = PageResult::new(vec![3, 4], PageWindow::compute(4, 2, 2).unwrap());
        assert_eq!(last.previous_page(), 1);
        assert_eq!(last.next_page(), 2);
    }

    #[test]
    fn map_keeps_metadata() {
        let page = PageResult::new(vec![1, 2], PageWindow::compute(7, 2, 1).unwrap());
        let mapped = page.map(|n| n * 10);
        assert_eq!(mapped.items, vec![10, 20]);
        assert_eq!(mapped.total_items(), 7);
        assert_eq!(mapped.total_pages(), 4);
        assert_eq!(mapped.page_size(), 2);
        assert_eq!(mapped.current_page(), 1);
    }
}
