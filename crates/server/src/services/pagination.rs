use axum::http::Uri;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Query parameters accepted by every list endpoint.
///
/// `page` stays a string so that junk values map to `Invalid page.` rather
/// than a query rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    pub project: Option<String>,
    pub issue: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub number: i64,
    pub size: i64,
}

impl PageRequest {
    /// Parses the raw `page` parameter. Absent or empty means the first
    /// page; anything that is not a positive integer, or whose offset does
    /// not fit in an `i64`, is an invalid page.
    pub fn new(page: Option<&str>, size: i64) -> Result<Self> {
        let number = match page.map(str::trim) {
            None | Some("") => 1,
            Some(raw) => raw.parse::<i64>().map_err(|_| invalid_page())?,
        };
        if number < 1 || (number - 1).checked_mul(size).is_none() {
            return Err(invalid_page());
        }
        Ok(Self { number, size })
    }

    pub fn limit(&self) -> i64 {
        self.size
    }

    pub fn offset(&self) -> i64 {
        (self.number - 1).saturating_mul(self.size)
    }

    /// Rejects pages past the end. The first page always exists, even when
    /// there is nothing to show on it.
    pub fn check(&self, count: i64) -> Result<()> {
        if self.number > 1 && self.offset() >= count {
            return Err(invalid_page());
        }
        Ok(())
    }
}

fn invalid_page() -> AppError {
    AppError::NotFound("Invalid page.".to_string())
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(results: Vec<T>, count: i64, request: PageRequest, uri: &Uri) -> Self {
        let next = (request.offset().saturating_add(request.limit()) < count)
            .then(|| page_link(uri, request.number + 1));
        let previous = (request.number > 1).then(|| page_link(uri, request.number - 1));

        Self {
            count,
            next,
            previous,
            results,
        }
    }
}

impl<T: Serialize> Page<T> {
    pub fn into_value(self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| AppError::Internal(format!("Failed to encode page: {e}")))
    }
}

/// Link to another page of the same listing, keeping any filters.
fn page_link(uri: &Uri, page: i64) -> String {
    let mut params: Vec<String> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|p| !p.is_empty() && *p != "page" && !p.starts_with("page="))
        .map(str::to_string)
        .collect();

    if page > 1 {
        params.push(format!("page={page}"));
    }

    if params.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), params.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn first_page_links_forward_only() {
        let request = PageRequest::new(None, 2).unwrap();
        let page = Page::new(vec![1, 2], 5, request, &uri("/api/issues?project=p1"));

        assert_eq!(page.next.as_deref(), Some("/api/issues?project=p1&page=2"));
        assert_eq!(page.previous, None);
    }

    #[test]
    fn middle_page_links_both_ways() {
        let request = PageRequest::new(Some("2"), 2).unwrap();
        let page = Page::new(vec![3, 4], 5, request, &uri("/api/projects?page=2"));

        assert_eq!(page.next.as_deref(), Some("/api/projects?page=3"));
        assert_eq!(page.previous.as_deref(), Some("/api/projects"));
    }

    #[test]
    fn last_page_has_no_next() {
        let request = PageRequest::new(Some("3"), 2).unwrap();
        let page = Page::new(vec![5], 5, request, &uri("/api/projects?page=3"));

        assert_eq!(page.next, None);
        assert_eq!(page.previous.as_deref(), Some("/api/projects?page=2"));
    }

    #[test]
    fn pages_out_of_range_are_rejected() {
        assert!(PageRequest::new(Some("0"), 10).is_err());
        assert!(PageRequest::new(Some("2"), 10).unwrap().check(10).is_err());
        assert!(PageRequest::new(Some("2"), 10).unwrap().check(11).is_ok());
        assert!(PageRequest::new(None, 10).unwrap().check(0).is_ok());
    }

    #[test]
    fn offset_follows_page_number() {
        let request = PageRequest::new(Some("3"), 10).unwrap();
        assert_eq!(request.offset(), 20);
        assert_eq!(request.limit(), 10);
    }

    #[test]
    fn junk_page_numbers_are_invalid_pages() {
        for raw in ["abc", "1.5", "-3", "0x10", "99999999999999999999"] {
            assert!(
                matches!(PageRequest::new(Some(raw), 10), Err(AppError::NotFound(_))),
                "{raw}"
            );
        }
        assert_eq!(PageRequest::new(Some(""), 10).unwrap().number, 1);
        assert_eq!(PageRequest::new(Some(" 2 "), 10).unwrap().number, 2);
    }

    #[test]
    fn pages_whose_offset_overflows_are_rejected() {
        assert!(PageRequest::new(Some(&i64::MAX.to_string()), 10).is_err());

        let largest = i64::MAX / 10 + 1;
        let request = PageRequest::new(Some(&largest.to_string()), 10).unwrap();
        assert!(request.check(5).is_err());

        let page = Page::new(Vec::<i32>::new(), 5, request, &uri("/api/projects"));
        assert_eq!(page.next, None);
    }
}
