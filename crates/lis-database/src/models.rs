//! 数据库模型

use chrono::{DateTime, NaiveDate, Utc};
use lis_core::models::*;
use lis_core::{LisError, Result};
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询，枚举以字符串存储

fn parse_column<T: FromStr<Err = LisError>>(column: &str, value: &str) -> Result<T> {
    T::from_str(value).map_err(|e| LisError::Database(format!("列 {} 数据异常: {}", column, e)))
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: Uuid,
    pub patient_code: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_by: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl TryFrom<DbPatient> for Patient {
    type Error = LisError;

    fn try_from(row: DbPatient) -> Result<Self> {
        Ok(Patient {
            id: row.id,
            patient_code: row.patient_code,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: row.date_of_birth,
            sex: row.sex.as_deref().map(|s| parse_column("sex", s)).transpose()?,
            phone: row.phone,
            email: row.email,
            created_by: row.created_by,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

/// 数据库检验表
#[derive(Debug, FromRow)]
pub struct DbLabTest {
    pub id: Uuid,
    pub test_code: String,
    pub sample_code: String,
    pub patient_id: Uuid,
    pub test_type: String,
    pub category: String,
    pub sample_type: String,
    pub priority: String,
    pub status: String,
    pub ordered_by: String,
    pub collected_at: Option<DateTime<Utc>>,
    pub collected_by: Option<String>,
    pub processing_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub turnaround_hours: Option<i64>,
    pub cancellation_reason: Option<String>,
    pub clinical_notes: Option<String>,
    pub special_instructions: Option<String>,
    pub fasting_required: bool,
    pub comments: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl TryFrom<DbLabTest> for LabTest {
    type Error = LisError;

    fn try_from(row: DbLabTest) -> Result<Self> {
        Ok(LabTest {
            id: row.id,
            test_code: row.test_code,
            sample_code: row.sample_code,
            patient_id: row.patient_id,
            test_type: parse_column("test_type", &row.test_type)?,
            category: parse_column("category", &row.category)?,
            sample_type: parse_column("sample_type", &row.sample_type)?,
            priority: parse_column("priority", &row.priority)?,
            status: parse_column("status", &row.status)?,
            ordered_by: row.ordered_by,
            collected_at: row.collected_at,
            collected_by: row.collected_by,
            processing_at: row.processing_at,
            processed_by: row.processed_by,
            completed_at: row.completed_at,
            completed_by: row.completed_by,
            turnaround_hours: row.turnaround_hours,
            cancellation_reason: row.cancellation_reason,
            clinical_notes: row.clinical_notes,
            special_instructions: row.special_instructions,
            fasting_required: row.fasting_required,
            comments: row.comments,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

/// 数据库结果表，检验值与修订记录存为JSONB
#[derive(Debug, FromRow)]
pub struct DbLabResult {
    pub id: Uuid,
    pub result_code: String,
    pub test_id: Uuid,
    pub patient_id: Uuid,
    pub test_values: Json<Vec<TestValue>>,
    pub overall_status: String,
    pub interpretation: Option<String>,
    pub recommendations: Option<String>,
    pub status: String,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_comments: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approval_comments: Option<String>,
    pub reported_at: Option<DateTime<Utc>>,
    pub amendments: Json<Vec<Amendment>>,
    pub critical_notified_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl TryFrom<DbLabResult> for LabResult {
    type Error = LisError;

    fn try_from(row: DbLabResult) -> Result<Self> {
        Ok(LabResult {
            id: row.id,
            result_code: row.result_code,
            test_id: row.test_id,
            patient_id: row.patient_id,
            test_values: row.test_values.0,
            overall_status: parse_column("overall_status", &row.overall_status)?,
            interpretation: row.interpretation,
            recommendations: row.recommendations,
            status: parse_column("status", &row.status)?,
            performed_by: row.performed_by,
            performed_at: row.performed_at,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            review_comments: row.review_comments,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            approval_comments: row.approval_comments,
            reported_at: row.reported_at,
            amendments: row.amendments.0,
            critical_notified_at: row.critical_notified_at,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

/// 周转时间查询行
#[derive(Debug, FromRow)]
pub struct DbTurnaround {
    pub category: String,
    pub turnaround_hours: i64,
}
