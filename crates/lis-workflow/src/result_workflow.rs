//! 结果状态守卫与总体判定
//!
//! 所有操作都是纯函数，返回新的结果副本。写入前总体判定总是根据条目标记重新计算。

use chrono::{DateTime, Utc};
use lis_core::{
    Actor, AmendRequest, Amendment, LabResult, LabTest, LisError, NewResult, OverallStatus,
    Result, ResultStatus, ResultUpdate, TestStatus, TestValue,
};
use uuid::Uuid;

use crate::state_machine::{ResultEvent, ResultStateMachine};

/// 根据条目标记计算总体判定：危急 > 异常 > 正常
pub fn derive_overall_status(values: &[TestValue]) -> OverallStatus {
    if values.iter().any(|value| value.flag.is_critical()) {
        OverallStatus::Critical
    } else if values.iter().any(|value| value.flag.is_abnormal()) {
        OverallStatus::Abnormal
    } else {
        OverallStatus::Normal
    }
}

#[derive(Debug, Clone)]
pub struct ResultWorkflow {
    state_machine: ResultStateMachine,
}

impl ResultWorkflow {
    pub fn new() -> Self {
        Self {
            state_machine: ResultStateMachine::for_results(),
        }
    }

    /// 为已完成的检验起草结果
    pub fn draft(
        &self,
        result_code: String,
        test: &LabTest,
        request: NewResult,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<LabResult> {
        if test.status != TestStatus::Completed {
            return Err(LisError::invalid_transition(
                format!("test {}", test.test_code),
                test.status,
                "record result",
            ));
        }

        Ok(LabResult {
            id: Uuid::new_v4(),
            result_code,
            test_id: test.id,
            patient_id: test.patient_id,
            overall_status: derive_overall_status(&request.test_values),
            test_values: request.test_values,
            interpretation: request.interpretation,
            recommendations: request.recommendations,
            status: ResultStatus::Draft,
            performed_by: actor.user_id.clone(),
            performed_at: at,
            reviewed_by: None,
            reviewed_at: None,
            review_comments: None,
            approved_by: None,
            approved_at: None,
            approval_comments: None,
            reported_at: None,
            amendments: Vec::new(),
            critical_notified_at: None,
            is_active: true,
            created_at: at,
            updated_at: at,
            version: 1,
        })
    }

    /// 审核、批准、发布
    ///
    /// 修订需要附带内容，走 [`ResultWorkflow::amend`]。
    pub fn advance(
        &self,
        result: &LabResult,
        event: ResultEvent,
        actor: &Actor,
        comments: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LabResult> {
        if event == ResultEvent::Amend {
            return Err(LisError::Validation("修订必须提供原因和修订内容".to_string()));
        }
        let next = self.next_status(result, event)?;

        let mut updated = result.clone();
        updated.status = next;
        updated.updated_at = at;
        match event {
            ResultEvent::Review => {
                updated.reviewed_by = Some(actor.user_id.clone());
                updated.reviewed_at = Some(at);
                updated.review_comments = comments;
            }
            ResultEvent::Approve => {
                updated.approved_by = Some(actor.user_id.clone());
                updated.approved_at = Some(at);
                updated.approval_comments = comments;
            }
            ResultEvent::Report => {
                updated.reported_at = Some(at);
            }
            ResultEvent::Amend => {}
        }

        tracing::debug!(
            "Result {} transitioned {} -> {} by {}",
            result.result_code,
            result.status,
            next,
            actor.user_id
        );
        Ok(updated)
    }

    /// 修订已发布的结果，追加修订记录，状态保持 reported
    pub fn amend(
        &self,
        result: &LabResult,
        request: AmendRequest,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<LabResult> {
        let next = self.next_status(result, ResultEvent::Amend)?;

        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(LisError::Validation("修订原因不能为空".to_string()));
        }
        if request.test_values.is_none() && request.interpretation.is_none() {
            return Err(LisError::Validation(
                "修订至少需要提供检验值或解释之一".to_string(),
            ));
        }

        let mut updated = result.clone();
        let new_values = request
            .test_values
            .unwrap_or_else(|| result.test_values.clone());
        let new_interpretation = request
            .interpretation
            .or_else(|| result.interpretation.clone());

        updated.amendments.push(Amendment {
            amended_at: at,
            amended_by: actor.user_id.clone(),
            reason: reason.to_string(),
            previous_values: result.test_values.clone(),
            new_values: new_values.clone(),
            previous_interpretation: result.interpretation.clone(),
            new_interpretation: new_interpretation.clone(),
        });
        updated.overall_status = derive_overall_status(&new_values);
        updated.test_values = new_values;
        updated.interpretation = new_interpretation;
        updated.status = next;
        updated.updated_at = at;

        tracing::info!(
            "Result {} amended by {} ({} amendments)",
            result.result_code,
            actor.user_id,
            updated.amendments.len()
        );
        Ok(updated)
    }

    /// 修改内容，已发布的结果拒绝修改
    pub fn apply_update(
        &self,
        result: &LabResult,
        update: ResultUpdate,
        at: DateTime<Utc>,
    ) -> Result<LabResult> {
        if result.status.is_locked() {
            return Err(LisError::invalid_transition(
                format!("result {}", result.result_code),
                result.status,
                "update",
            ));
        }

        let mut updated = result.clone();
        if let Some(values) = update.test_values {
            updated.test_values = values;
        }
        if update.interpretation.is_some() {
            updated.interpretation = update.interpretation;
        }
        if update.recommendations.is_some() {
            updated.recommendations = update.recommendations;
        }
        updated.overall_status = derive_overall_status(&updated.test_values);
        updated.updated_at = at;
        Ok(updated)
    }

    /// 已发布的结果不能删除
    pub fn ensure_deletable(&self, result: &LabResult) -> Result<()> {
        if result.status.is_locked() {
            return Err(LisError::invalid_transition(
                format!("result {}", result.result_code),
                result.status,
                "delete",
            ));
        }
        Ok(())
    }

    fn next_status(&self, result: &LabResult, event: ResultEvent) -> Result<ResultStatus> {
        self.state_machine
            .transition(result.status, event)
            .ok_or_else(|| {
                LisError::invalid_transition(
                    format!("result {}", result.result_code),
                    result.status,
                    event,
                )
            })
    }
}

impl Default for ResultWorkflow {
    fn default() -> Self {
        Self::new()
    }
}
