//! Page Pool
//!
//! Bounded free-list of name → size maps used while merging listing pages, so
//! successive pages of one listing reuse their allocations. A pool belongs to a
//! single listing request; borrowed pages are never shared between requests.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// Object name → size
pub type Page = HashMap<String, u64>;

#[derive(Debug)]
pub struct PagePool {
    free: Mutex<Vec<Page>>,
    capacity: usize,
    page_size: usize,
}

impl PagePool {
    /// `capacity` pages are retained at most; new pages are sized for `page_size`
    pub fn new(capacity: usize, page_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of idle pages held by the pool
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn alloc(&self) -> Page {
        self.free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| HashMap::with_capacity(self.page_size))
    }

    /// Clear `page` and keep it for reuse unless the pool is full or the page grew
    /// far beyond the expected size
    pub fn free(&self, mut page: Page) {
        if page.capacity() > self.page_size.saturating_mul(4).max(64) {
            return;
        }
        page.clear();
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < self.capacity {
            free.push(page);
        }
    }

    /// Borrow a page that goes back to the pool when dropped
    pub fn get(&self) -> PooledPage<'_> {
        PooledPage {
            page: self.alloc(),
            pool: self,
        }
    }
}

/// Page on loan from a [`PagePool`]
pub struct PooledPage<'a> {
    page: Page,
    pool: &'a PagePool,
}

impl Deref for PooledPage<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl DerefMut for PooledPage<'_> {
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.page
    }
}

impl Drop for PooledPage<'_> {
    fn drop(&mut self) {
        self.pool.free(std::mem::take(&mut self.page));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_come_back_cleared() {
        let pool = PagePool::new(2, 16);
        {
            let mut page = pool.get();
            page.insert("a".to_string(), 1);
            page.insert("b".to_string(), 2);
        }
        assert_eq!(pool.idle(), 1);
        let page = pool.alloc();
        assert!(page.is_empty());
        assert!(page.capacity() >= 2);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = PagePool::new(2, 8);
        for _ in 0..5 {
            pool.free(Page::new());
        }
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_oversized_pages_are_dropped() {
        let pool = PagePool::new(4, 8);
        let mut page = pool.alloc();
        for i in 0..1000 {
            page.insert(format!("n{}", i), i);
        }
        pool.free(page);
        assert_eq!(pool.idle(), 0);
    }
}
