//! Common DTOs used across the API

use serde::{Deserialize, Serialize};
use validator::Validate;

/// `{data, message?}` envelope for JSON endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            data,
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: Some(message.into()),
        }
    }
}

/// `?page=&per_page=` query parameters
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PaginationParams {
    /// 1-indexed
    #[serde(default = "default_page", deserialize_with = "lenient_i64")]
    #[validate(range(min = 1))]
    pub page: i64,

    #[serde(default = "default_per_page", deserialize_with = "lenient_i64")]
    #[validate(range(min = 1, max = 200))]
    pub per_page: i64,
}

/// Query strings carry numbers as text, JSON bodies as numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(i64),
    Text(String),
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Lenient::deserialize(deserializer)? {
        Lenient::Number(n) => Ok(n),
        Lenient::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    25
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    #[inline]
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }

    #[inline]
    pub fn limit(&self) -> i64 {
        self.per_page
    }

    /// Wrap one page of `data` out of `total` rows
    pub fn paginate<T>(&self, data: Vec<T>, total: i64) -> PaginatedResponse<T> {
        PaginatedResponse {
            data,
            pagination: PaginationMeta::new(total, self.page, self.per_page),
        }
    }
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl PaginationMeta {
    pub fn new(total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if per_page > 0 {
            (total + per_page - 1) / per_page
        } else {
            0
        };
        Self {
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_offset() {
        let params = PaginationParams {
            page: 3,
            per_page: 20,
        };
        assert_eq!(params.offset(), 40);
        assert_eq!(params.limit(), 20);
    }

    #[test]
    fn test_pagination_meta_rounds_up() {
        let meta = PaginationMeta::new(41, 1, 20);
        assert_eq!(meta.total_pages, 3);
        assert_eq!(PaginationMeta::new(0, 1, 20).total_pages, 0);
    }

    #[test]
    fn test_pagination_from_query_strings() {
        let params: PaginationParams =
            serde_json::from_str(r#"{"page":"2","per_page":10}"#).unwrap();
        assert_eq!(params.page, 2);
        assert_eq!(params.per_page, 10);

        let params: PaginationParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.page, 1);
        assert_eq!(params.per_page, 25);
    }

    #[test]
    fn test_pagination_validation() {
        let params = PaginationParams {
            page: 0,
            per_page: 10,
        };
        assert!(params.validate().is_err());

        let params = PaginationParams {
            page: 1,
            per_page: 500,
        };
        assert!(params.validate().is_err());
    }
}
