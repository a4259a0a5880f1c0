use serde::{Deserialize, Serialize};

pub mod batch;
pub mod customer;
pub mod scheme;

pub const MAX_PAGE_SIZE: i64 = 100;

#[inline]
const fn default_page() -> i64 {
    0
}

#[inline]
const fn default_limit() -> i64 {
    50
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_page")]
    pub page: i64,
}

impl Pagination {
    pub fn new(limit: i64, page: i64) -> Self {
        Self { limit, page }
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`
    pub fn page_size(&self) -> i64 {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn page(&self) -> i64 {
        self.page.max(0)
    }

    pub fn offset(&self) -> i64 {
        self.page().saturating_mul(self.page_size())
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(default_limit(), default_page())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub total_items: i64,
    pub total_pages: i64,
    pub page_size: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total_items: i64, page_size: i64, page: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total_items + page_size - 1) / page_size
        } else {
            0
        };

        Self {
            items,
            page,
            page_size,
            total_items,
            total_pages,
        }
    }
}
