//! 存储接口
//!
//! 工作流层只依赖此接口。所有更新都是带版本号的条件写入：
//! 传入实体的 `version` 必须等于存储中的当前版本，写入成功后版本加一，
//! 版本不一致时返回 `LisError::Conflict`。

use async_trait::async_trait;
use lis_core::{
    LabResult, LabTest, Pagination, Patient, PatientFilter, Result, ResultFilter, SortOrder,
    TestCategory, TestFilter,
};
use serde::Serialize;
use uuid::Uuid;

/// 周转时间样本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TurnaroundSample {
    pub category: TestCategory,
    pub hours: i64,
}

/// 检验数据存储
#[async_trait]
pub trait LabStore: Send + Sync {
    /// 原子递增命名序列，返回递增后的值（从1开始）
    async fn next_sequence(&self, name: &str) -> Result<i64>;

    // ========== 患者 ==========

    async fn insert_patient(&self, patient: &Patient) -> Result<()>;

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>>;

    async fn update_patient(&self, patient: &Patient) -> Result<Patient>;

    async fn list_patients(
        &self,
        filter: &PatientFilter,
        pagination: Pagination,
    ) -> Result<Vec<Patient>>;

    async fn count_patients(&self, filter: &PatientFilter) -> Result<u64>;

    // ========== 检验 ==========

    async fn insert_test(&self, test: &LabTest) -> Result<()>;

    async fn get_test(&self, id: Uuid) -> Result<Option<LabTest>>;

    /// 将存在有效结果的检验置为无效时返回 `Conflict`
    async fn update_test(&self, test: &LabTest) -> Result<LabTest>;

    async fn list_tests(
        &self,
        filter: &TestFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> Result<Vec<LabTest>>;

    async fn count_tests(&self, filter: &TestFilter) -> Result<u64>;

    /// 已完成且有周转时间的检验
    async fn turnaround_samples(&self, filter: &TestFilter) -> Result<Vec<TurnaroundSample>>;

    // ========== 结果 ==========

    /// 同一检验只能有一条有效结果，重复插入返回 `Conflict`；
    /// 所属检验不存在、已删除或未完成时同样返回 `Conflict`
    async fn insert_result(&self, result: &LabResult) -> Result<()>;

    async fn get_result(&self, id: Uuid) -> Result<Option<LabResult>>;

    async fn update_result(&self, result: &LabResult) -> Result<LabResult>;

    async fn find_active_result_for_test(&self, test_id: Uuid) -> Result<Option<LabResult>>;

    async fn list_results(
        &self,
        filter: &ResultFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> Result<Vec<LabResult>>;

    async fn count_results(&self, filter: &ResultFilter) -> Result<u64>;
}
