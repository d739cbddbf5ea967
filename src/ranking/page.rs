use std::num::IntErrorKind;

use serde::Serialize;

use crate::constants::{DEFAULT_PAGE, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// A clamped page/limit pair.
///
/// Pages are 1-based. Anything below 1 (or unparsable) becomes page 1, and the limit is kept
/// within `1..=MAX_PAGE_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = match page {
            Some(p) if p >= 1 => p as u64,
            _ => DEFAULT_PAGE,
        };

        let limit = limit
            .map(|l| l.clamp(1, MAX_PAGE_LIMIT as i64) as u64)
            .unwrap_or(DEFAULT_PAGE_LIMIT);

        Self { page, limit }
    }

    /// Builds a request from raw query string values, treating garbage as absent
    pub fn from_query(page: Option<&str>, limit: Option<&str>) -> Self {
        Self::new(page.and_then(parse_int), limit.and_then(parse_int))
    }

    /// Number of items preceding this page
    pub fn skip(&self) -> usize {
        let skip = (self.page - 1).saturating_mul(self.limit);
        usize::try_from(skip).unwrap_or(usize::MAX)
    }

    pub fn take(&self) -> usize {
        self.limit as usize
    }
}

/// Out-of-range integers saturate so they are clamped like any other value
fn parse_int(raw: &str) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(value) => Some(value),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i64::MAX),
            IntErrorKind::NegOverflow => Some(i64::MIN),
            _ => None,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

impl<T> Page<T> {
    /// Wraps an already-sliced set of items (e.g. one fetched with `LIMIT/OFFSET`)
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            limit: request.limit,
        }
    }
}

/// Slices the requested page out of a fully materialized sequence.
///
/// A page past the end is empty; `total` always reports the full sequence length.
pub fn paginate<T>(items: Vec<T>, request: PageRequest) -> Page<T> {
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(request.skip())
        .take(request.take())
        .collect();

    Page::new(items, total, request)
}
