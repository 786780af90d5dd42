//! Page/limit query parameters shared by list endpoints.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// `?page=2&limit=50`. Pages start at 1; `limit` is clamped to `1..=100`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl PageParams {
    pub fn limit(&self) -> i64 {
        self.limit.clamp(1, MAX_LIMIT)
    }

    /// Row offset. Saturates instead of overflowing on absurd page numbers;
    /// such pages are simply empty.
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.limit())
    }
}

/// One page of results plus the total count for the same filter.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, params: PageParams, total: i64) -> Self {
        Self {
            items,
            page: params.page.max(1),
            limit: params.limit(),
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        let params = PageParams { page: 1, limit: 10_000 };
        assert_eq!(params.limit(), MAX_LIMIT);
        let params = PageParams { page: 1, limit: 0 };
        assert_eq!(params.limit(), 1);
    }

    #[test]
    fn offset_starts_at_page_one() {
        assert_eq!(PageParams { page: 0, limit: 20 }.offset(), 0);
        assert_eq!(PageParams { page: 1, limit: 20 }.offset(), 0);
        assert_eq!(PageParams { page: 3, limit: 20 }.offset(), 40);
    }

    #[test]
    fn huge_page_saturates() {
        let params = PageParams { page: i64::MAX, limit: 20 };
        assert_eq!(params.offset(), i64::MAX);
        let params = PageParams { page: i64::MIN, limit: 20 };
        assert_eq!(params.offset(), 0);
    }
}
