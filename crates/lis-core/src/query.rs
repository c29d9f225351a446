//! 查询条件与分页

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    OverallStatus, ResultStatus, TestCategory, TestPriority, TestStatus,
};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 200;

/// 分页参数，页码从1开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, pagination: Pagination, total: u64) -> Self {
        let limit = u64::from(pagination.limit);
        Self {
            items,
            page: pagination.page,
            limit: pagination.limit,
            total,
            pages: total.div_ceil(limit),
        }
    }
}

/// 患者查询条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientFilter {
    /// 姓名或患者编号模糊匹配
    pub search: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// 检验查询条件，只返回未删除的记录
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestFilter {
    pub status: Option<TestStatus>,
    pub priority: Option<TestPriority>,
    pub category: Option<TestCategory>,
    pub patient_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub completed_from: Option<DateTime<Utc>>,
    pub completed_before: Option<DateTime<Utc>>,
    /// 检验编号、样本编号或项目类型模糊匹配
    pub search: Option<String>,
}

/// 结果查询条件，只返回未删除的记录
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultFilter {
    pub status: Option<ResultStatus>,
    pub overall_status: Option<OverallStatus>,
    pub test_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub performed_from: Option<DateTime<Utc>>,
    pub performed_before: Option<DateTime<Utc>>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// 结果编号模糊匹配
    pub search: Option<String>,
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// 最新优先
    #[default]
    NewestFirst,
    OldestFirst,
}
