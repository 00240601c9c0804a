use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const RECORD_ID_LEN: usize = 24;

/// Identifier shared by every table: 4 bytes of unix time followed by 8 random
/// bytes, rendered as 24 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn generate() -> Self {
        let seconds = Utc::now().timestamp() as u32;
        let random: [u8; 8] = rand::random();

        let mut hex = String::with_capacity(RECORD_ID_LEN);
        for byte in seconds.to_be_bytes().iter().chain(random.iter()) {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 1-based page request shared by the list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page_size: i64,
    pub page_number: i64,
}

impl Pagination {
    pub const DEFAULT_PAGE_SIZE: i64 = 20;
    pub const MAX_PAGE_SIZE: i64 = 100;

    /// Missing, unparsable or non-positive values fall back to the defaults.
    /// Page sizes above [Self::MAX_PAGE_SIZE] are clamped to it.
    pub fn from_query(page_size: Option<&str>, page_number: Option<&str>) -> Self {
        let parse = |raw: Option<&str>, default: i64| {
            raw.and_then(|value| value.trim().parse::<i64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default)
        };

        Self {
            page_size: parse(page_size, Self::DEFAULT_PAGE_SIZE).min(Self::MAX_PAGE_SIZE),
            page_number: parse(page_number, 1),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page_number - 1).saturating_mul(self.page_size)
    }

    pub fn total_pages(&self, total_count: i64) -> i64 {
        total_count / self.page_size + i64::from(total_count % self.page_size != 0)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            page_number: 1,
        }
    }
}

/// One page of results as returned to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub total_pages: i64,
    pub page_size: i64,
    pub page_number: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_count: i64, pagination: Pagination) -> Self {
        Self {
            items,
            total_count,
            total_pages: pagination.total_pages(total_count),
            page_size: pagination.page_size,
            page_number: pagination.page_number,
        }
    }
}
