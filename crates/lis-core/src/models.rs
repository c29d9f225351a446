//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LisError;

/// 生成与存储字符串一一对应的封闭枚举
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            /// 全部取值
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = LisError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(LisError::Validation(format!(
                        "未知的{}取值: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// 性别
    Sex {
        Male => "male",
        Female => "female",
        Other => "other",
    }
}

string_enum! {
    /// 用户角色
    UserRole {
        Admin => "admin",
        Manager => "manager",
        Doctor => "doctor",
        LabTechnician => "lab_technician",
        Receptionist => "receptionist",
    }
}

string_enum! {
    /// 检验项目类型
    TestType {
        CompleteBloodCount => "complete_blood_count",
        BasicMetabolicPanel => "basic_metabolic_panel",
        LipidPanel => "lipid_panel",
        LiverFunctionTest => "liver_function_test",
        ThyroidFunctionTest => "thyroid_function_test",
        Urinalysis => "urinalysis",
        BloodGlucose => "blood_glucose",
        HemoglobinA1c => "hemoglobin_a1c",
        Cholesterol => "cholesterol",
        Triglycerides => "triglycerides",
        Creatinine => "creatinine",
        Bun => "bun",
        Electrolytes => "electrolytes",
        ProteinTotal => "protein_total",
        Albumin => "albumin",
        Bilirubin => "bilirubin",
        Alt => "alt",
        Ast => "ast",
        AlkalinePhosphatase => "alkaline_phosphatase",
        Culture => "culture",
        Sensitivity => "sensitivity",
        GramStain => "gram_stain",
        Covid19 => "covid_19",
        FluTest => "flu_test",
        StrepTest => "strep_test",
        PregnancyTest => "pregnancy_test",
        DrugScreen => "drug_screen",
        VitaminD => "vitamin_d",
        VitaminB12 => "vitamin_b12",
        Folate => "folate",
        IronStudies => "iron_studies",
        Psa => "psa",
        Cea => "cea",
        Ca125 => "ca_125",
        Ca199 => "ca_19_9",
        Troponin => "troponin",
        Bnp => "bnp",
        PtInr => "pt_inr",
        Ptt => "ptt",
        Esr => "esr",
        Crp => "crp",
        RheumatoidFactor => "rheumatoid_factor",
        Ana => "ana",
        HepatitisPanel => "hepatitis_panel",
        HivTest => "hiv_test",
        SyphilisTest => "syphilis_test",
    }
}

string_enum! {
    /// 检验分类
    TestCategory {
        Hematology => "hematology",
        Chemistry => "chemistry",
        Microbiology => "microbiology",
        Immunology => "immunology",
        Molecular => "molecular",
        Pathology => "pathology",
    }
}

string_enum! {
    /// 检验优先级
    TestPriority {
        Routine => "routine",
        Urgent => "urgent",
        Stat => "stat",
        Asap => "asap",
    }
}

impl Default for TestPriority {
    fn default() -> Self {
        TestPriority::Routine
    }
}

string_enum! {
    /// 样本类型
    SampleType {
        Blood => "blood",
        Urine => "urine",
        Stool => "stool",
        Sputum => "sputum",
        Csf => "csf",
        SynovialFluid => "synovial_fluid",
        Tissue => "tissue",
        Swab => "swab",
        Other => "other",
    }
}

impl SampleType {
    /// 样本编号前缀: 样本类型的前三个字母大写
    pub fn code_prefix(&self) -> String {
        self.as_str()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .take(3)
            .collect::<String>()
            .to_ascii_uppercase()
    }
}

string_enum! {
    /// 检验状态
    TestStatus {
        Ordered => "ordered",
        Collected => "collected",
        Processing => "processing",
        Completed => "completed",
        Cancelled => "cancelled",
        OnHold => "on_hold",
    }
}

impl TestStatus {
    /// 已完成或已取消的检验不再接受任何变更
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestStatus::Completed | TestStatus::Cancelled)
    }

    /// 仍在实验室流程中的状态
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            TestStatus::Ordered | TestStatus::Collected | TestStatus::Processing
        )
    }
}

string_enum! {
    /// 单项结果标记
    ResultFlag {
        Normal => "normal",
        High => "high",
        Low => "low",
        CriticalHigh => "critical_high",
        CriticalLow => "critical_low",
        Abnormal => "abnormal",
    }
}

impl Default for ResultFlag {
    fn default() -> Self {
        ResultFlag::Normal
    }
}

impl ResultFlag {
    pub fn is_critical(&self) -> bool {
        matches!(self, ResultFlag::CriticalHigh | ResultFlag::CriticalLow)
    }

    pub fn is_abnormal(&self) -> bool {
        matches!(self, ResultFlag::High | ResultFlag::Low | ResultFlag::Abnormal)
    }
}

string_enum! {
    /// 结果总体判定
    OverallStatus {
        Normal => "normal",
        Abnormal => "abnormal",
        Critical => "critical",
    }
}

impl Default for OverallStatus {
    fn default() -> Self {
        OverallStatus::Normal
    }
}

string_enum! {
    /// 结果状态
    ResultStatus {
        Draft => "draft",
        Reviewed => "reviewed",
        Approved => "approved",
        Reported => "reported",
        Amended => "amended",
        Archived => "archived",
    }
}

impl ResultStatus {
    /// 已发布的结果只能通过修订变更
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            ResultStatus::Reported | ResultStatus::Amended | ResultStatus::Archived
        )
    }
}

/// 操作人
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: UserRole,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: UserRole) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

/// 患者基本信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub patient_code: String, // PAT000001
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<Sex>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_by: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// 新建患者请求
#[derive(Debug, Clone, Deserialize)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<Sex>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// 患者信息更新请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<Sex>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// 检验申请
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabTest {
    pub id: Uuid,
    pub test_code: String,   // TEST000001
    pub sample_code: String, // BLO000001
    pub patient_id: Uuid,
    pub test_type: TestType,
    pub category: TestCategory,
    pub sample_type: SampleType,
    pub priority: TestPriority,
    pub status: TestStatus,
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

/// 新建检验申请
#[derive(Debug, Clone, Deserialize)]
pub struct NewTestOrder {
    pub patient_id: Uuid,
    pub test_type: TestType,
    pub category: TestCategory,
    pub sample_type: SampleType,
    #[serde(default)]
    pub priority: TestPriority,
    pub clinical_notes: Option<String>,
    pub special_instructions: Option<String>,
    #[serde(default)]
    pub fasting_required: bool,
    pub comments: Option<String>,
}

/// 检验申请非状态字段更新
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestUpdate {
    pub priority: Option<TestPriority>,
    pub clinical_notes: Option<String>,
    pub special_instructions: Option<String>,
    pub fasting_required: Option<bool>,
    pub comments: Option<String>,
}

/// 参考范围
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub text: Option<String>,
}

/// 单项检验值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestValue {
    pub parameter: String,
    pub value: String,
    pub unit: Option<String>,
    pub reference_range: Option<ReferenceRange>,
    #[serde(default)]
    pub flag: ResultFlag,
    pub comments: Option<String>,
}

impl TestValue {
    pub fn new(parameter: impl Into<String>, value: impl Into<String>, flag: ResultFlag) -> Self {
        Self {
            parameter: parameter.into(),
            value: value.into(),
            unit: None,
            reference_range: None,
            flag,
            comments: None,
        }
    }
}

/// 修订记录，追加后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amendment {
    pub amended_at: DateTime<Utc>,
    pub amended_by: String,
    pub reason: String,
    pub previous_values: Vec<TestValue>,
    pub new_values: Vec<TestValue>,
    pub previous_interpretation: Option<String>,
    pub new_interpretation: Option<String>,
}

/// 检验结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub id: Uuid,
    pub result_code: String, // RES000001
    pub test_id: Uuid,
    pub patient_id: Uuid,
    pub test_values: Vec<TestValue>,
    pub overall_status: OverallStatus,
    pub interpretation: Option<String>,
    pub recommendations: Option<String>,
    pub status: ResultStatus,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_comments: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approval_comments: Option<String>,
    pub reported_at: Option<DateTime<Utc>>,
    pub amendments: Vec<Amendment>,
    pub critical_notified_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl LabResult {
    /// 危急值条目
    pub fn critical_values(&self) -> Vec<&TestValue> {
        self.test_values
            .iter()
            .filter(|value| value.flag.is_critical())
            .collect()
    }
}

/// 新建结果请求
#[derive(Debug, Clone, Deserialize)]
pub struct NewResult {
    pub test_id: Uuid,
    #[serde(default)]
    pub test_values: Vec<TestValue>,
    pub interpretation: Option<String>,
    pub recommendations: Option<String>,
}

/// 结果内容更新请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultUpdate {
    pub test_values: Option<Vec<TestValue>>,
    pub interpretation: Option<String>,
    pub recommendations: Option<String>,
}

/// 修订请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AmendRequest {
    pub reason: String,
    pub test_values: Option<Vec<TestValue>>,
    pub interpretation: Option<String>,
}

/// 批量批准请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchApproveRequest {
    pub result_ids: Vec<Uuid>,
    pub approval_comments: Option<String>,
}

/// 批量操作结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// 符合条件的记录数
    pub matched_count: u64,
    /// 实际写入的记录数
    pub modified_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_wire_names_are_snake_case() {
        let json = serde_json::to_string(&ResultFlag::CriticalHigh).unwrap();
        assert_eq!(json, "\"critical_high\"");

        let status: TestStatus = serde_json::from_str("\"on_hold\"").unwrap();
        assert_eq!(status, TestStatus::OnHold);
        assert_eq!(TestType::from_str("ca_19_9").unwrap(), TestType::Ca199);
    }

    #[test]
    fn test_unknown_value_is_validation_error() {
        let err = TestStatus::from_str("shipped").unwrap_err();
        assert!(matches!(err, LisError::Validation(_)));
    }

    #[test]
    fn test_sample_code_prefix() {
        assert_eq!(SampleType::Blood.code_prefix(), "BLO");
        assert_eq!(SampleType::Csf.code_prefix(), "CSF");
        assert_eq!(SampleType::SynovialFluid.code_prefix(), "SYN");
    }

    #[test]
    fn test_status_helpers() {
        assert!(TestStatus::Completed.is_terminal());
        assert!(!TestStatus::OnHold.is_terminal());
        assert!(!TestStatus::OnHold.is_in_progress());
        assert!(ResultStatus::Archived.is_locked());
        assert!(!ResultStatus::Approved.is_locked());
    }

    #[test]
    fn test_flag_defaults_to_normal() {
        let value: TestValue =
            serde_json::from_str(r#"{"parameter":"Na+","value":"140","unit":"mmol/L"}"#).unwrap();
        assert_eq!(value.flag, ResultFlag::Normal);
    }
}
