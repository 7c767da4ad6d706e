//! Pagination utilities for listing endpoints
//!
//! Batch and failed-row listings are paged with a caller-chosen page size,
//! clamped to the configured maximum.

use serde::{Deserialize, Serialize};

/// Pagination metadata calculated from total results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    /// Rows per page
    pub page_size: i64,
    /// Total number of pages
    pub total_pages: i64,
    /// Offset for SQL LIMIT/OFFSET query
    pub offset: i64,
}

/// Calculate pagination metadata from total results and requested page
///
/// Ensures page is within valid bounds [1, total_pages] and page size is
/// within [1, max_page_size].
///
/// # Examples
/// ```
/// use jdx_common::pagination::calculate_pagination;
///
/// // 250 total results at 100/page = 3 pages (100 + 100 + 50)
/// let p = calculate_pagination(250, 2, 100, 500);
/// assert_eq!(p.page, 2);
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 100);
///
/// // Requesting out-of-bounds page gets clamped
/// let p = calculate_pagination(250, 99, 100, 500);
/// assert_eq!(p.page, 3);
/// assert_eq!(p.offset, 200);
/// ```
pub fn calculate_pagination(
    total_results: i64,
    requested_page: i64,
    requested_page_size: i64,
    max_page_size: i64,
) -> Pagination {
    let page_size = requested_page_size.clamp(1, max_page_size.max(1));
    let total_pages = (total_results.max(0) + page_size - 1) / page_size;
    let page = requested_page.max(1).min(total_pages.max(1));
    let offset = (page - 1) * page_size;

    Pagination {
        page,
        page_size,
        total_pages,
        offset,
    }
}

/// One page of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    /// Assemble a page from fetched items and the pagination used to fetch them
    pub fn new(items: Vec<T>, pagination: Pagination, total_items: i64) -> Self {
        Self {
            items,
            page: pagination.page,
            page_size: pagination.page_size,
            total_items,
            total_pages: pagination.total_pages,
        }
    }
}
