use serde::{Deserialize, Serialize};

const MAX_PAGE_SIZE: u64 = 100;

/// 1-based page selector, read from `?index=&size=`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Pagination {
    pub index: u64,
    pub size: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { index: 1, size: 20 }
    }
}

impl Pagination {
    pub fn offset(&self) -> u64 {
        self.index.saturating_sub(1).saturating_mul(self.size)
    }

    pub fn limit(&self) -> u64 {
        self.size
    }

    /// Falls back to the first page for zero values and caps the page size.
    pub fn check(&self) -> Self {
        if self.index < 1 || self.size < 1 {
            return Self::default();
        }
        Self {
            index: self.index,
            size: self.size.min(MAX_PAGE_SIZE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pages_fall_back_to_the_first() {
        let page = Pagination { index: 0, size: 10 }.check();
        assert_eq!((page.offset(), page.limit()), (0, 20));

        let page = Pagination { index: 3, size: 500 }.check();
        assert_eq!((page.offset(), page.limit()), (200, 100));
    }

    #[test]
    fn huge_index_saturates() {
        let page = Pagination { index: u64::MAX, size: 100 }.check();
        assert_eq!(page.offset(), u64::MAX);
    }
}
