//! 内存存储
//!
//! 用于测试和无数据库的本地运行。所有表共用一把读写锁，
//! 单个实体的条件写入因此是原子的。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lis_core::{
    LabResult, LabTest, LisError, Pagination, Patient, PatientFilter, Result, ResultFilter,
    SortOrder, TestFilter, TestStatus,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{LabStore, TurnaroundSample};

#[derive(Debug, Default)]
struct Tables {
    sequences: HashMap<String, i64>,
    patients: HashMap<Uuid, Patient>,
    tests: HashMap<Uuid, LabTest>,
    results: HashMap<Uuid, LabResult>,
}

/// 内存存储实现
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn in_range(
    value: Option<DateTime<Utc>>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> bool {
    if from.is_none() && to.is_none() {
        return true;
    }
    match value {
        Some(value) => from.map_or(true, |f| value >= f) && to.map_or(true, |t| value < t),
        None => false,
    }
}

fn patient_matches(filter: &PatientFilter, patient: &Patient) -> bool {
    patient.is_active
        && in_range(Some(patient.created_at), filter.created_from, filter.created_before)
        && filter.search.as_deref().map_or(true, |s| {
            contains_ignore_case(&patient.patient_code, s)
                || contains_ignore_case(&patient.first_name, s)
                || contains_ignore_case(&patient.last_name, s)
        })
}

fn test_matches(filter: &TestFilter, test: &LabTest) -> bool {
    test.is_active
        && filter.status.map_or(true, |s| test.status == s)
        && filter.priority.map_or(true, |p| test.priority == p)
        && filter.category.map_or(true, |c| test.category == c)
        && filter.patient_id.map_or(true, |id| test.patient_id == id)
        && in_range(Some(test.created_at), filter.created_from, filter.created_before)
        && in_range(test.completed_at, filter.completed_from, filter.completed_before)
        && filter.search.as_deref().map_or(true, |s| {
            contains_ignore_case(&test.test_code, s)
                || contains_ignore_case(&test.sample_code, s)
                || contains_ignore_case(test.test_type.as_str(), s)
        })
}

fn result_matches(filter: &ResultFilter, result: &LabResult) -> bool {
    result.is_active
        && filter.status.map_or(true, |s| result.status == s)
        && filter.overall_status.map_or(true, |s| result.overall_status == s)
        && filter.test_id.map_or(true, |id| result.test_id == id)
        && filter.patient_id.map_or(true, |id| result.patient_id == id)
        && in_range(Some(result.performed_at), filter.performed_from, filter.performed_before)
        && in_range(Some(result.created_at), filter.created_from, filter.created_before)
        && filter
            .search
            .as_deref()
            .map_or(true, |s| contains_ignore_case(&result.result_code, s))
}

/// 按 (创建时间, 编号) 排序后截取一页
fn paginate<T: Clone>(
    mut items: Vec<&T>,
    sort_key: impl Fn(&T) -> (DateTime<Utc>, String),
    pagination: Pagination,
    order: SortOrder,
) -> Vec<T> {
    items.sort_by_key(|item| sort_key(*item));
    if order == SortOrder::NewestFirst {
        items.reverse();
    }
    items
        .into_iter()
        .skip(pagination.offset() as usize)
        .take(pagination.limit as usize)
        .cloned()
        .collect()
}

/// 条件写入：校验版本并递增
fn bump_version(current: i64, expected: i64, what: &str) -> Result<i64> {
    if current != expected {
        return Err(LisError::Conflict(format!(
            "{} 已被其他请求修改 (当前版本 {}, 请求版本 {})",
            what, current, expected
        )));
    }
    Ok(current + 1)
}

#[async_trait]
impl LabStore for InMemoryStore {
    async fn next_sequence(&self, name: &str) -> Result<i64> {
        let mut tables = self.tables.write().await;
        let value = tables.sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn insert_patient(&self, patient: &Patient) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .patients
            .values()
            .any(|p| p.id == patient.id || p.patient_code == patient.patient_code)
        {
            return Err(LisError::Conflict(format!(
                "患者编号已存在: {}",
                patient.patient_code
            )));
        }
        tables.patients.insert(patient.id, patient.clone());
        Ok(())
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        Ok(self.tables.read().await.patients.get(&id).cloned())
    }

    async fn update_patient(&self, patient: &Patient) -> Result<Patient> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .patients
            .get_mut(&patient.id)
            .ok_or_else(|| LisError::not_found(format!("患者 {}", patient.id)))?;
        let version = bump_version(stored.version, patient.version, &patient.patient_code)?;
        *stored = Patient {
            version,
            ..patient.clone()
        };
        Ok(stored.clone())
    }

    async fn list_patients(
        &self,
        filter: &PatientFilter,
        pagination: Pagination,
    ) -> Result<Vec<Patient>> {
        let tables = self.tables.read().await;
        let matching = tables
            .patients
            .values()
            .filter(|p| patient_matches(filter, p))
            .collect();
        Ok(paginate(
            matching,
            |p| (p.created_at, p.patient_code.clone()),
            pagination,
            SortOrder::NewestFirst,
        ))
    }

    async fn count_patients(&self, filter: &PatientFilter) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .patients
            .values()
            .filter(|p| patient_matches(filter, p))
            .count() as u64)
    }

    async fn insert_test(&self, test: &LabTest) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.tests.values().any(|t| {
            t.id == test.id || t.test_code == test.test_code || t.sample_code == test.sample_code
        }) {
            return Err(LisError::Conflict(format!("检验编号已存在: {}", test.test_code)));
        }
        tables.tests.insert(test.id, test.clone());
        Ok(())
    }

    async fn get_test(&self, id: Uuid) -> Result<Option<LabTest>> {
        Ok(self.tables.read().await.tests.get(&id).cloned())
    }

    async fn update_test(&self, test: &LabTest) -> Result<LabTest> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .tests
            .get(&test.id)
            .ok_or_else(|| LisError::not_found(format!("检验 {}", test.id)))?;
        let version = bump_version(stored.version, test.version, &test.test_code)?;
        // 软删除与结果插入在同一把锁下互斥
        let deactivating = stored.is_active && !test.is_active;
        if deactivating
            && tables
                .results
                .values()
                .any(|r| r.is_active && r.test_id == test.id)
        {
            return Err(LisError::Conflict(format!(
                "检验 {} 已有有效结果，不能删除",
                test.test_code
            )));
        }

        let stored = tables
            .tests
            .get_mut(&test.id)
            .ok_or_else(|| LisError::not_found(format!("检验 {}", test.id)))?;
        *stored = LabTest {
            version,
            ..test.clone()
        };
        Ok(stored.clone())
    }

    async fn list_tests(
        &self,
        filter: &TestFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> Result<Vec<LabTest>> {
        let tables = self.tables.read().await;
        let matching = tables
            .tests
            .values()
            .filter(|t| test_matches(filter, t))
            .collect();
        Ok(paginate(matching, |t| (t.created_at, t.test_code.clone()), pagination, order))
    }

    async fn count_tests(&self, filter: &TestFilter) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .tests
            .values()
            .filter(|t| test_matches(filter, t))
            .count() as u64)
    }

    async fn turnaround_samples(&self, filter: &TestFilter) -> Result<Vec<TurnaroundSample>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tests
            .values()
            .filter(|t| test_matches(filter, t))
            .filter(|t| t.status == TestStatus::Completed)
            .filter_map(|t| {
                t.turnaround_hours.map(|hours| TurnaroundSample {
                    category: t.category,
                    hours,
                })
            })
            .collect())
    }

    async fn insert_result(&self, result: &LabResult) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .results
            .values()
            .any(|r| r.id == result.id || r.result_code == result.result_code)
        {
            return Err(LisError::Conflict(format!(
                "结果编号已存在: {}",
                result.result_code
            )));
        }
        if result.is_active {
            let completed = tables
                .tests
                .get(&result.test_id)
                .map_or(false, |t| t.is_active && t.status == TestStatus::Completed);
            if !completed {
                return Err(LisError::Conflict(format!(
                    "检验 {} 不存在或未完成",
                    result.test_id
                )));
            }
        }
        if result.is_active
            && tables
                .results
                .values()
                .any(|r| r.is_active && r.test_id == result.test_id)
        {
            return Err(LisError::Conflict(format!(
                "检验 {} 已存在有效结果",
                result.test_id
            )));
        }
        tables.results.insert(result.id, result.clone());
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<LabResult>> {
        Ok(self.tables.read().await.results.get(&id).cloned())
    }

    async fn update_result(&self, result: &LabResult) -> Result<LabResult> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .results
            .get_mut(&result.id)
            .ok_or_else(|| LisError::not_found(format!("结果 {}", result.id)))?;
        let version = bump_version(stored.version, result.version, &result.result_code)?;
        *stored = LabResult {
            version,
            ..result.clone()
        };
        Ok(stored.clone())
    }

    async fn find_active_result_for_test(&self, test_id: Uuid) -> Result<Option<LabResult>> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .values()
            .find(|r| r.is_active && r.test_id == test_id)
            .cloned())
    }

    async fn list_results(
        &self,
        filter: &ResultFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> Result<Vec<LabResult>> {
        let tables = self.tables.read().await;
        let matching = tables
            .results
            .values()
            .filter(|r| result_matches(filter, r))
            .collect();
        Ok(paginate(matching, |r| (r.created_at, r.result_code.clone()), pagination, order))
    }

    async fn count_results(&self, filter: &ResultFilter) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .values()
            .filter(|r| result_matches(filter, r))
            .count() as u64)
    }
}
