//! Offset pagination helpers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PER_PAGE: u32 = 15;
pub const DEFAULT_PAGE_NAME: &str = "page";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaginationError {
    #[error("per-page size must be greater than zero")]
    ZeroPerPage,
    #[error("page number must be greater than zero")]
    ZeroPage,
}

/// Caller-facing pagination request; unset fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub per_page: Option<u32>,
    pub page: Option<u32>,
    pub page_name: String,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            per_page: None,
            page: None,
            page_name: DEFAULT_PAGE_NAME.to_string(),
        }
    }
}

impl PageRequest {
    pub fn new(per_page: u32, page: u32) -> Self {
        Self {
            per_page: Some(per_page),
            page: Some(page),
            ..Self::default()
        }
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_name(mut self, page_name: impl Into<String>) -> Self {
        self.page_name = page_name.into();
        self
    }

    /// Fill defaults so an omitted value and an explicit default are identical.
    pub fn resolve(&self, default_per_page: u32) -> Result<ResolvedPage, PaginationError> {
        let per_page = self.per_page.unwrap_or(default_per_page);
        if per_page == 0 {
            return Err(PaginationError::ZeroPerPage);
        }
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(PaginationError::ZeroPage);
        }
        Ok(ResolvedPage {
            per_page,
            page,
            page_name: self.page_name.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPage {
    pub per_page: u32,
    pub page: u32,
    pub page_name: String,
}

impl ResolvedPage {
    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.per_page as usize
    }
}

/// One page of results plus the totals needed to render page links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub per_page: u32,
    pub current_page: u32,
    pub last_page: u32,
    pub page_name: String,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, page: &ResolvedPage) -> Self {
        let per_page = u64::from(page.per_page);
        let last_page = total.div_ceil(per_page).max(1);
        Self {
            items,
            total,
            per_page: page.per_page,
            current_page: page.page,
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
            page_name: page.page_name.clone(),
        }
    }

    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omitted_values_resolve_like_explicit_defaults() {
        let implicit = PageRequest::default().resolve(DEFAULT_PER_PAGE).expect("resolve");
        let explicit = PageRequest::new(DEFAULT_PER_PAGE, 1)
            .resolve(DEFAULT_PER_PAGE)
            .expect("resolve");
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert_eq!(
            PageRequest::default().per_page(0).resolve(10),
            Err(PaginationError::ZeroPerPage)
        );
        assert_eq!(
            PageRequest::default().page(0).resolve(10),
            Err(PaginationError::ZeroPage)
        );
    }

    #[test]
    fn last_page_rounds_up_and_never_drops_below_one() {
        let page = PageRequest::new(10, 2).resolve(10).expect("resolve");
        let paginated = Paginated::new(vec![1, 2, 3], 23, &page);
        assert_eq!(paginated.last_page, 3);
        assert!(paginated.has_more_pages());
        assert_eq!(page.offset(), 10);

        let empty: Paginated<u8> = Paginated::new(Vec::new(), 0, &page);
        assert_eq!(empty.last_page, 1);
    }
}
