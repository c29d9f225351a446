//! PostgreSQL存储实现

use async_trait::async_trait;
use lis_core::{
    LabResult, LabTest, LisError, Pagination, Patient, PatientFilter, Result, ResultFilter,
    SortOrder, TestFilter, TestStatus,
};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::*;
use crate::store::{LabStore, TurnaroundSample};

/// 基于PostgreSQL的存储
#[derive(Debug, Clone)]
pub struct PgLabStore {
    pool: DatabasePool,
}

impl PgLabStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 命名序列，用于生成顺序编号
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS lis_sequences (
                name VARCHAR(64) PRIMARY KEY,
                value BIGINT NOT NULL
            )
        "#).execute(pool).await?;

        // 创建患者表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS patients (
                id UUID PRIMARY KEY,
                patient_code VARCHAR(32) UNIQUE NOT NULL,
                first_name VARCHAR(128) NOT NULL,
                last_name VARCHAR(128) NOT NULL,
                date_of_birth DATE,
                sex VARCHAR(16),
                phone VARCHAR(32),
                email VARCHAR(255),
                created_by VARCHAR(64) NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                version BIGINT NOT NULL DEFAULT 1
            )
        "#).execute(pool).await?;

        // 创建检验表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS lab_tests (
                id UUID PRIMARY KEY,
                test_code VARCHAR(32) UNIQUE NOT NULL,
                sample_code VARCHAR(32) UNIQUE NOT NULL,
                patient_id UUID NOT NULL REFERENCES patients(id),
                test_type VARCHAR(64) NOT NULL,
                category VARCHAR(32) NOT NULL,
                sample_type VARCHAR(32) NOT NULL,
                priority VARCHAR(16) NOT NULL DEFAULT 'routine',
                status VARCHAR(16) NOT NULL DEFAULT 'ordered',
                ordered_by VARCHAR(64) NOT NULL,
                collected_at TIMESTAMP WITH TIME ZONE,
                collected_by VARCHAR(64),
                processing_at TIMESTAMP WITH TIME ZONE,
                processed_by VARCHAR(64),
                completed_at TIMESTAMP WITH TIME ZONE,
                completed_by VARCHAR(64),
                turnaround_hours BIGINT,
                cancellation_reason TEXT,
                clinical_notes TEXT,
                special_instructions TEXT,
                fasting_required BOOLEAN NOT NULL DEFAULT FALSE,
                comments TEXT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                version BIGINT NOT NULL DEFAULT 1
            )
        "#).execute(pool).await?;

        // 创建结果表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS lab_results (
                id UUID PRIMARY KEY,
                result_code VARCHAR(32) UNIQUE NOT NULL,
                test_id UUID NOT NULL REFERENCES lab_tests(id),
                patient_id UUID NOT NULL REFERENCES patients(id),
                test_values JSONB NOT NULL DEFAULT '[]',
                overall_status VARCHAR(16) NOT NULL DEFAULT 'normal',
                interpretation TEXT,
                recommendations TEXT,
                status VARCHAR(16) NOT NULL DEFAULT 'draft',
                performed_by VARCHAR(64) NOT NULL,
                performed_at TIMESTAMP WITH TIME ZONE NOT NULL,
                reviewed_by VARCHAR(64),
                reviewed_at TIMESTAMP WITH TIME ZONE,
                review_comments TEXT,
                approved_by VARCHAR(64),
                approved_at TIMESTAMP WITH TIME ZONE,
                approval_comments TEXT,
                reported_at TIMESTAMP WITH TIME ZONE,
                amendments JSONB NOT NULL DEFAULT '[]',
                critical_notified_at TIMESTAMP WITH TIME ZONE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                version BIGINT NOT NULL DEFAULT 1
            )
        "#).execute(pool).await?;

        // 创建索引以优化查询性能
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_patients_last_name ON patients(last_name)",
            "CREATE INDEX IF NOT EXISTS idx_patients_created_at ON patients(created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_lab_tests_patient_id ON lab_tests(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_lab_tests_status ON lab_tests(status)",
            "CREATE INDEX IF NOT EXISTS idx_lab_tests_category ON lab_tests(category)",
            "CREATE INDEX IF NOT EXISTS idx_lab_tests_priority ON lab_tests(priority)",
            "CREATE INDEX IF NOT EXISTS idx_lab_tests_created_at ON lab_tests(created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_lab_tests_collected_at ON lab_tests(collected_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_lab_results_test_id ON lab_results(test_id)",
            "CREATE INDEX IF NOT EXISTS idx_lab_results_patient_id ON lab_results(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_lab_results_status ON lab_results(status)",
            "CREATE INDEX IF NOT EXISTS idx_lab_results_overall_status ON lab_results(overall_status)",
            "CREATE INDEX IF NOT EXISTS idx_lab_results_performed_at ON lab_results(performed_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_lab_results_reported_at ON lab_results(reported_at DESC)",
            // 每个检验最多一条有效结果
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_lab_results_active_test ON lab_results(test_id) WHERE is_active",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }

    /// 条件更新未命中时区分"不存在"与"版本冲突"
    async fn missing_or_conflict(&self, table: &str, id: Uuid) -> LisError {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", table);
        match sqlx::query_scalar::<_, bool>(&sql)
            .bind(id)
            .fetch_one(self.pool.pool())
            .await
        {
            Ok(true) => LisError::Conflict(format!("{} {} 已被其他请求修改", table, id)),
            Ok(false) => LisError::not_found(format!("{} {}", table, id)),
            Err(e) => e.into(),
        }
    }
}

fn order_clause(order: SortOrder) -> &'static str {
    match order {
        SortOrder::NewestFirst => " ORDER BY created_at DESC, id DESC",
        SortOrder::OldestFirst => " ORDER BY created_at ASC, id ASC",
    }
}

/// 子串匹配模式，转义 LIKE 通配符（PostgreSQL 默认转义符为反斜杠）
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_page(builder: &mut QueryBuilder<'_, Postgres>, pagination: Pagination) {
    builder
        .push(" LIMIT ")
        .push_bind(i64::from(pagination.limit))
        .push(" OFFSET ")
        .push_bind(pagination.offset() as i64);
}

fn push_patient_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &PatientFilter) {
    builder.push(" WHERE is_active = TRUE");
    if let Some(from) = filter.created_from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_before {
        builder.push(" AND created_at < ").push_bind(to);
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        builder
            .push(" AND (patient_code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_test_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &TestFilter) {
    builder.push(" WHERE is_active = TRUE");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(priority) = filter.priority {
        builder.push(" AND priority = ").push_bind(priority.as_str());
    }
    if let Some(category) = filter.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(patient_id) = filter.patient_id {
        builder.push(" AND patient_id = ").push_bind(patient_id);
    }
    if let Some(from) = filter.created_from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_before {
        builder.push(" AND created_at < ").push_bind(to);
    }
    if let Some(from) = filter.completed_from {
        builder.push(" AND completed_at >= ").push_bind(from);
    }
    if let Some(to) = filter.completed_before {
        builder.push(" AND completed_at < ").push_bind(to);
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        builder
            .push(" AND (test_code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR sample_code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR test_type ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_result_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ResultFilter) {
    builder.push(" WHERE is_active = TRUE");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(overall) = filter.overall_status {
        builder.push(" AND overall_status = ").push_bind(overall.as_str());
    }
    if let Some(test_id) = filter.test_id {
        builder.push(" AND test_id = ").push_bind(test_id);
    }
    if let Some(patient_id) = filter.patient_id {
        builder.push(" AND patient_id = ").push_bind(patient_id);
    }
    if let Some(from) = filter.performed_from {
        builder.push(" AND performed_at >= ").push_bind(from);
    }
    if let Some(to) = filter.performed_before {
        builder.push(" AND performed_at < ").push_bind(to);
    }
    if let Some(from) = filter.created_from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_before {
        builder.push(" AND created_at < ").push_bind(to);
    }
    if let Some(search) = &filter.search {
        builder
            .push(" AND result_code ILIKE ")
            .push_bind(like_pattern(search));
    }
}

#[async_trait]
impl LabStore for PgLabStore {
    async fn next_sequence(&self, name: &str) -> Result<i64> {
        let value = sqlx::query_scalar::<_, i64>(r#"
            INSERT INTO lis_sequences (name, value) VALUES ($1, 1)
            ON CONFLICT (name) DO UPDATE SET value = lis_sequences.value + 1
            RETURNING value
        "#)
        .bind(name)
        .fetch_one(self.pool.pool())
        .await?;
        Ok(value)
    }

    // ========== 患者相关操作 ==========

    async fn insert_patient(&self, patient: &Patient) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO patients (id, patient_code, first_name, last_name, date_of_birth, sex,
                phone, email, created_by, is_active, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#)
        .bind(patient.id)
        .bind(&patient.patient_code)
        .bind(&patient.first_name)
        .bind(&patient.last_name)
        .bind(patient.date_of_birth)
        .bind(patient.sex.map(|s| s.as_str()))
        .bind(&patient.phone)
        .bind(&patient.email)
        .bind(&patient.created_by)
        .bind(patient.is_active)
        .bind(patient.created_at)
        .bind(patient.updated_at)
        .bind(patient.version)
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        let row = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        row.map(Patient::try_from).transpose()
    }

    async fn update_patient(&self, patient: &Patient) -> Result<Patient> {
        let row = sqlx::query_as::<_, DbPatient>(r#"
            UPDATE patients SET first_name = $3, last_name = $4, date_of_birth = $5, sex = $6,
                phone = $7, email = $8, is_active = $9, updated_at = $10, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING *
        "#)
        .bind(patient.id)
        .bind(patient.version)
        .bind(&patient.first_name)
        .bind(&patient.last_name)
        .bind(patient.date_of_birth)
        .bind(patient.sex.map(|s| s.as_str()))
        .bind(&patient.phone)
        .bind(&patient.email)
        .bind(patient.is_active)
        .bind(patient.updated_at)
        .fetch_optional(self.pool.pool())
        .await?;

        match row {
            Some(row) => Patient::try_from(row),
            None => Err(self.missing_or_conflict("patients", patient.id).await),
        }
    }

    async fn list_patients(
        &self,
        filter: &PatientFilter,
        pagination: Pagination,
    ) -> Result<Vec<Patient>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM patients");
        push_patient_filter(&mut builder, filter);
        builder.push(order_clause(SortOrder::NewestFirst));
        push_page(&mut builder, pagination);

        let rows = builder
            .build_query_as::<DbPatient>()
            .fetch_all(self.pool.pool())
            .await?;
        rows.into_iter().map(Patient::try_from).collect()
    }

    async fn count_patients(&self, filter: &PatientFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM patients");
        push_patient_filter(&mut builder, filter);
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    // ========== 检验相关操作 ==========

    async fn insert_test(&self, test: &LabTest) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO lab_tests (id, test_code, sample_code, patient_id, test_type, category,
                sample_type, priority, status, ordered_by, clinical_notes, special_instructions,
                fasting_required, comments, is_active, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#)
        .bind(test.id)
        .bind(&test.test_code)
        .bind(&test.sample_code)
        .bind(test.patient_id)
        .bind(test.test_type.as_str())
        .bind(test.category.as_str())
        .bind(test.sample_type.as_str())
        .bind(test.priority.as_str())
        .bind(test.status.as_str())
        .bind(&test.ordered_by)
        .bind(&test.clinical_notes)
        .bind(&test.special_instructions)
        .bind(test.fasting_required)
        .bind(&test.comments)
        .bind(test.is_active)
        .bind(test.created_at)
        .bind(test.updated_at)
        .bind(test.version)
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }

    async fn get_test(&self, id: Uuid) -> Result<Option<LabTest>> {
        let row = sqlx::query_as::<_, DbLabTest>("SELECT * FROM lab_tests WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        row.map(LabTest::try_from).transpose()
    }

    async fn update_test(&self, test: &LabTest) -> Result<LabTest> {
        let mut tx = self.pool.pool().begin().await?;

        // 锁定检验行，与 insert_result 串行化
        let was_active = sqlx::query_scalar::<_, bool>(
            "SELECT is_active FROM lab_tests WHERE id = $1 FOR UPDATE",
        )
        .bind(test.id)
        .fetch_optional(&mut *tx)
        .await?;
        if was_active == Some(true) && !test.is_active {
            let has_result = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM lab_results WHERE test_id = $1 AND is_active = TRUE)",
            )
            .bind(test.id)
            .fetch_one(&mut *tx)
            .await?;
            if has_result {
                return Err(LisError::Conflict(format!(
                    "检验 {} 已有有效结果，不能删除",
                    test.test_code
                )));
            }
        }

        let row = sqlx::query_as::<_, DbLabTest>(r#"
            UPDATE lab_tests SET priority = $3, status = $4, collected_at = $5, collected_by = $6,
                processing_at = $7, processed_by = $8, completed_at = $9, completed_by = $10,
                turnaround_hours = $11, cancellation_reason = $12, clinical_notes = $13,
                special_instructions = $14, fasting_required = $15, comments = $16,
                is_active = $17, updated_at = $18, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING *
        "#)
        .bind(test.id)
        .bind(test.version)
        .bind(test.priority.as_str())
        .bind(test.status.as_str())
        .bind(test.collected_at)
        .bind(&test.collected_by)
        .bind(test.processing_at)
        .bind(&test.processed_by)
        .bind(test.completed_at)
        .bind(&test.completed_by)
        .bind(test.turnaround_hours)
        .bind(&test.cancellation_reason)
        .bind(&test.clinical_notes)
        .bind(&test.special_instructions)
        .bind(test.fasting_required)
        .bind(&test.comments)
        .bind(test.is_active)
        .bind(test.updated_at)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        match row {
            Some(row) => LabTest::try_from(row),
            None => Err(self.missing_or_conflict("lab_tests", test.id).await),
        }
    }

    async fn list_tests(
        &self,
        filter: &TestFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> Result<Vec<LabTest>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM lab_tests");
        push_test_filter(&mut builder, filter);
        builder.push(order_clause(order));
        push_page(&mut builder, pagination);

        let rows = builder
            .build_query_as::<DbLabTest>()
            .fetch_all(self.pool.pool())
            .await?;
        rows.into_iter().map(LabTest::try_from).collect()
    }

    async fn count_tests(&self, filter: &TestFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM lab_tests");
        push_test_filter(&mut builder, filter);
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn turnaround_samples(&self, filter: &TestFilter) -> Result<Vec<TurnaroundSample>> {
        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT category, turnaround_hours FROM lab_tests");
        push_test_filter(&mut builder, filter);
        builder.push(" AND status = 'completed' AND turnaround_hours IS NOT NULL");

        let rows = builder
            .build_query_as::<DbTurnaround>()
            .fetch_all(self.pool.pool())
            .await?;
        rows.into_iter()
            .map(|row| -> Result<TurnaroundSample> {
                Ok(TurnaroundSample {
                    category: row.category.parse()?,
                    hours: row.turnaround_hours,
                })
            })
            .collect()
    }

    // ========== 结果相关操作 ==========

    async fn insert_result(&self, result: &LabResult) -> Result<()> {
        let mut tx = self.pool.pool().begin().await?;

        if result.is_active {
            // 锁定所属检验，避免与检验软删除交错
            let test = sqlx::query_as::<_, (bool, String)>(
                "SELECT is_active, status FROM lab_tests WHERE id = $1 FOR UPDATE",
            )
            .bind(result.test_id)
            .fetch_optional(&mut *tx)
            .await?;
            let completed = matches!(
                &test,
                Some((true, status)) if status.as_str() == TestStatus::Completed.as_str()
            );
            if !completed {
                return Err(LisError::Conflict(format!(
                    "检验 {} 不存在或未完成",
                    result.test_id
                )));
            }
        }

        sqlx::query(r#"
            INSERT INTO lab_results (id, result_code, test_id, patient_id, test_values,
                overall_status, interpretation, recommendations, status, performed_by,
                performed_at, amendments, is_active, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#)
        .bind(result.id)
        .bind(&result.result_code)
        .bind(result.test_id)
        .bind(result.patient_id)
        .bind(Json(result.test_values.clone()))
        .bind(result.overall_status.as_str())
        .bind(&result.interpretation)
        .bind(&result.recommendations)
        .bind(result.status.as_str())
        .bind(&result.performed_by)
        .bind(result.performed_at)
        .bind(Json(result.amendments.clone()))
        .bind(result.is_active)
        .bind(result.created_at)
        .bind(result.updated_at)
        .bind(result.version)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<LabResult>> {
        let row = sqlx::query_as::<_, DbLabResult>("SELECT * FROM lab_results WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        row.map(LabResult::try_from).transpose()
    }

    async fn update_result(&self, result: &LabResult) -> Result<LabResult> {
        let row = sqlx::query_as::<_, DbLabResult>(r#"
            UPDATE lab_results SET test_values = $3, overall_status = $4, interpretation = $5,
                recommendations = $6, status = $7, reviewed_by = $8, reviewed_at = $9,
                review_comments = $10, approved_by = $11, approved_at = $12,
                approval_comments = $13, reported_at = $14, amendments = $15,
                critical_notified_at = $16, is_active = $17, updated_at = $18,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING *
        "#)
        .bind(result.id)
        .bind(result.version)
        .bind(Json(result.test_values.clone()))
        .bind(result.overall_status.as_str())
        .bind(&result.interpretation)
        .bind(&result.recommendations)
        .bind(result.status.as_str())
        .bind(&result.reviewed_by)
        .bind(result.reviewed_at)
        .bind(&result.review_comments)
        .bind(&result.approved_by)
        .bind(result.approved_at)
        .bind(&result.approval_comments)
        .bind(result.reported_at)
        .bind(Json(result.amendments.clone()))
        .bind(result.critical_notified_at)
        .bind(result.is_active)
        .bind(result.updated_at)
        .fetch_optional(self.pool.pool())
        .await?;

        match row {
            Some(row) => LabResult::try_from(row),
            None => Err(self.missing_or_conflict("lab_results", result.id).await),
        }
    }

    async fn find_active_result_for_test(&self, test_id: Uuid) -> Result<Option<LabResult>> {
        let row = sqlx::query_as::<_, DbLabResult>(
            "SELECT * FROM lab_results WHERE test_id = $1 AND is_active = TRUE LIMIT 1",
        )
        .bind(test_id)
        .fetch_optional(self.pool.pool())
        .await?;
        row.map(LabResult::try_from).transpose()
    }

    async fn list_results(
        &self,
        filter: &ResultFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> Result<Vec<LabResult>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM lab_results");
        push_result_filter(&mut builder, filter);
        builder.push(order_clause(order));
        push_page(&mut builder, pagination);

        let rows = builder
            .build_query_as::<DbLabResult>()
            .fetch_all(self.pool.pool())
            .await?;
        rows.into_iter().map(LabResult::try_from).collect()
    }

    async fn count_results(&self, filter: &ResultFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM lab_results");
        push_result_filter(&mut builder, filter);
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.pool())
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("TEST0001"), "%TEST0001%");
        assert_eq!(like_pattern("50%"), "%50\\%%");
        assert_eq!(like_pattern("a_b"), "%a\\_b%");
        assert_eq!(like_pattern("c:\\x"), "%c:\\\\x%");
    }

    #[test]
    fn test_result_search_is_bound_not_inlined() {
        let filter = ResultFilter {
            search: Some("RES_".to_string()),
            ..Default::default()
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM lab_results");
        push_result_filter(&mut builder, &filter);
        assert!(builder.sql().contains("result_code ILIKE $1"));
    }
}
