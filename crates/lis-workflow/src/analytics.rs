//! 统计与分析
//!
//! 计数由存储完成，这里只负责比率、周转时间汇总等纯计算。

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use lis_core::{LabTest, TestCategory};
use lis_database::TurnaroundSample;
use serde::Serialize;

/// 保留一位小数
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// 环比变化百分比
///
/// 上期为0时，本期大于0记为100，否则为0。
pub fn percentage_change(current: u64, previous: u64) -> f64 {
    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    round1((current as f64 - previous as f64) / previous as f64 * 100.0)
}

/// 完成率百分比，总数为0时为0
pub fn completion_rate(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(completed as f64 / total as f64 * 100.0)
}

/// 本期与上期对比
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodComparison {
    pub current: u64,
    pub previous: u64,
    pub change_percent: f64,
}

impl PeriodComparison {
    pub fn new(current: u64, previous: u64) -> Self {
        Self {
            current,
            previous,
            change_percent: percentage_change(current, previous),
        }
    }
}

/// 周转时间汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnaroundSummary {
    pub count: u64,
    pub average_hours: f64,
    pub min_hours: Option<i64>,
    pub max_hours: Option<i64>,
    pub within_24h_percent: f64,
    pub within_48h_percent: f64,
}

impl TurnaroundSummary {
    pub fn from_hours(hours: &[i64]) -> Self {
        let count = hours.len() as u64;
        if count == 0 {
            return Self {
                count: 0,
                average_hours: 0.0,
                min_hours: None,
                max_hours: None,
                within_24h_percent: 0.0,
                within_48h_percent: 0.0,
            };
        }

        let total: i64 = hours.iter().sum();
        let within = |limit: i64| hours.iter().filter(|h| **h <= limit).count() as u64;

        Self {
            count,
            average_hours: round1(total as f64 / count as f64),
            min_hours: hours.iter().min().copied(),
            max_hours: hours.iter().max().copied(),
            within_24h_percent: completion_rate(within(24), count),
            within_48h_percent: completion_rate(within(48), count),
        }
    }
}

/// 按分类的周转时间
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTurnaround {
    pub category: TestCategory,
    #[serde(flatten)]
    pub summary: TurnaroundSummary,
}

/// 周转时间报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnaroundReport {
    pub overall: TurnaroundSummary,
    pub by_category: Vec<CategoryTurnaround>,
}

impl TurnaroundReport {
    /// 分类按枚举顺序输出，没有样本的分类省略
    pub fn from_samples(samples: &[TurnaroundSample]) -> Self {
        let all: Vec<i64> = samples.iter().map(|s| s.hours).collect();
        let by_category = TestCategory::ALL
            .iter()
            .filter_map(|category| {
                let hours: Vec<i64> = samples
                    .iter()
                    .filter(|s| s.category == *category)
                    .map(|s| s.hours)
                    .collect();
                (!hours.is_empty()).then(|| CategoryTurnaround {
                    category: *category,
                    summary: TurnaroundSummary::from_hours(&hours),
                })
            })
            .collect();

        Self {
            overall: TurnaroundSummary::from_hours(&all),
            by_category,
        }
    }
}

/// 检验统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestStats {
    pub today: u64,
    pub this_week: u64,
    pub this_month: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<String, u64>,
    pub by_category: BTreeMap<String, u64>,
    pub average_turnaround_hours: Option<f64>,
}

/// 结果统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultStats {
    pub today: u64,
    pub this_week: u64,
    pub this_month: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_overall_status: BTreeMap<String, u64>,
    pub critical: u64,
    pub pending_review: u64,
    pub pending_approval: u64,
}

/// 仪表盘
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardAnalytics {
    pub generated_at: DateTime<Utc>,
    pub tests_today: PeriodComparison,
    pub tests_this_week: PeriodComparison,
    pub tests_this_month: PeriodComparison,
    pub results_today: u64,
    pub pending_review: u64,
    pub critical_results: u64,
    pub patients_today: u64,
    pub patients_total: u64,
    pub completion_rate: f64,
}

/// 当日工作量
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadSummary {
    pub date: NaiveDate,
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<String, u64>,
    pub tests: Vec<LabTest>,
}

impl WorkloadSummary {
    pub fn new(date: NaiveDate, tests: Vec<LabTest>) -> Self {
        let mut by_status = BTreeMap::new();
        let mut by_priority = BTreeMap::new();
        for test in &tests {
            *by_status.entry(test.status.to_string()).or_insert(0) += 1;
            *by_priority.entry(test.priority.to_string()).or_insert(0) += 1;
        }

        Self {
            date,
            total: tests.len() as u64,
            by_status,
            by_priority,
            tests,
        }
    }
}
