/// Shared types used across the codebase

use serde::{Deserialize, Serialize};

/// `?page=&page_size=` as sent by clients
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// Resolved, bounded pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }

    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.page_size as i64
    }
}

impl Pagination {
    /// Pages start at 1; page size falls back to `default_size` and never
    /// exceeds `max_size`.
    pub fn resolve(&self, default_size: u32, max_size: u32) -> PageRequest {
        let page = self.page.filter(|p| *p > 0).unwrap_or(1);
        let page_size = self
            .page_size
            .filter(|s| *s > 0)
            .unwrap_or(default_size)
            .min(max_size.max(1));
        PageRequest { page, page_size }
    }
}

/// One page of results plus the unpaginated total
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T: Serialize> {
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub data: Vec<T>,
}

impl<T: Serialize> Paged<T> {
    pub fn new(data: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            total,
            page: request.page,
            page_size: request.page_size,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_offsets() {
        let request = Pagination::default().resolve(10, 100);
        assert_eq!(request, PageRequest { page: 1, page_size: 10 });
        assert_eq!(request.offset(), 0);

        let request = Pagination { page: Some(3), page_size: Some(20) }.resolve(10, 100);
        assert_eq!(request.offset(), 40);
        assert_eq!(request.limit(), 20);
    }

    #[test]
    fn clamps_page_size_and_zero_page() {
        let request = Pagination { page: Some(0), page_size: Some(5000) }.resolve(10, 100);
        assert_eq!(request, PageRequest { page: 1, page_size: 100 });
    }
}
