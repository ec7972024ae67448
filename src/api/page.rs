// ==========================================
// 工厂生产排程系统 - 分页
// ==========================================

use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 200;

/// 分页请求参数 (page 从 1 开始)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// 由可选参数构造并校验
    ///
    /// # 错误
    /// - `ValidationError`: page < 1 或 page_size 不在 1..=200
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> ApiResult<Self> {
        let req = Self {
            page: page.unwrap_or(1),
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        };
        if req.page < 1 {
            return Err(ApiError::ValidationError(format!(
                "page 必须 ≥ 1, 实际 {}",
                req.page
            )));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&req.page_size) {
            return Err(ApiError::ValidationError(format!(
                "page_size 必须在 1..={} 之间, 实际 {}",
                MAX_PAGE_SIZE, req.page_size
            )));
        }
        Ok(req)
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, req: PageRequest) -> Self {
        Self {
            items,
            total,
            page: req.page,
            page_size: req.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_bounds() {
        let req = PageRequest::new(Some(3), Some(50)).unwrap();
        assert_eq!(req.offset(), 100);
        assert_eq!(req.limit(), 50);

        assert!(PageRequest::new(Some(0), None).is_err());
        assert!(PageRequest::new(None, Some(0)).is_err());
        assert!(PageRequest::new(None, Some(201)).is_err());
        assert_eq!(PageRequest::new(None, None).unwrap().page_size, DEFAULT_PAGE_SIZE);
    }
}
