//! 检验状态守卫
//!
//! 纯函数：校验转换是否合法并返回新的检验副本，输入保持不变。

use chrono::{DateTime, Utc};
use lis_core::utils::elapsed_hours_rounded;
use lis_core::{Actor, LabTest, LisError, Result, TestUpdate};

use crate::state_machine::{TestEvent, TestStateMachine};

/// 取消检验时未填写原因的默认值
pub const DEFAULT_CANCELLATION_REASON: &str = "Test cancelled";

#[derive(Debug, Clone)]
pub struct TestWorkflow {
    state_machine: TestStateMachine,
}

impl TestWorkflow {
    pub fn new() -> Self {
        Self {
            state_machine: TestStateMachine::for_tests(),
        }
    }

    /// 推进检验状态
    ///
    /// `note` 仅对 `cancel` 有意义，作为取消原因。
    pub fn advance(
        &self,
        test: &LabTest,
        event: TestEvent,
        actor: &Actor,
        at: DateTime<Utc>,
        note: Option<&str>,
    ) -> Result<LabTest> {
        let next = self
            .state_machine
            .transition(test.status, event)
            .ok_or_else(|| {
                LisError::invalid_transition(format!("test {}", test.test_code), test.status, event)
            })?;

        let mut updated = test.clone();
        updated.status = next;
        updated.updated_at = at;

        match event {
            TestEvent::Collect => {
                updated.collected_at = Some(at);
                updated.collected_by = Some(actor.user_id.clone());
            }
            TestEvent::Process => {
                updated.processing_at = Some(at);
                updated.processed_by = Some(actor.user_id.clone());
            }
            TestEvent::Complete => {
                updated.completed_at = Some(at);
                updated.completed_by = Some(actor.user_id.clone());
                updated.turnaround_hours = updated
                    .collected_at
                    .map(|collected| elapsed_hours_rounded(collected, at));
            }
            TestEvent::Cancel => {
                let reason = note
                    .map(str::trim)
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or(DEFAULT_CANCELLATION_REASON);
                updated.cancellation_reason = Some(reason.to_string());
            }
        }

        tracing::debug!(
            "Test {} transitioned {} -> {} by {}",
            test.test_code,
            test.status,
            next,
            actor.user_id
        );
        Ok(updated)
    }

    /// 更新非状态字段，已完成或已取消的检验拒绝修改
    pub fn apply_update(
        &self,
        test: &LabTest,
        update: &TestUpdate,
        at: DateTime<Utc>,
    ) -> Result<LabTest> {
        if test.status.is_terminal() {
            return Err(LisError::invalid_transition(
                format!("test {}", test.test_code),
                test.status,
                "update",
            ));
        }

        let mut updated = test.clone();
        if let Some(priority) = update.priority {
            updated.priority = priority;
        }
        if let Some(notes) = &update.clinical_notes {
            updated.clinical_notes = Some(notes.clone());
        }
        if let Some(instructions) = &update.special_instructions {
            updated.special_instructions = Some(instructions.clone());
        }
        if let Some(fasting) = update.fasting_required {
            updated.fasting_required = fasting;
        }
        if let Some(comments) = &update.comments {
            updated.comments = Some(comments.clone());
        }
        updated.updated_at = at;
        Ok(updated)
    }

    /// 存在有效结果的检验不能删除
    pub fn ensure_deletable(&self, test: &LabTest, has_active_result: bool) -> Result<()> {
        if has_active_result {
            return Err(LisError::Conflict(format!(
                "检验 {} 存在有效结果，不能删除",
                test.test_code
            )));
        }
        Ok(())
    }
}

impl Default for TestWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lis_core::{SampleType, TestCategory, TestPriority, TestStatus, TestType, UserRole};
    use uuid::Uuid;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn tech() -> Actor {
        Actor::new("tech-1", UserRole::LabTechnician)
    }

    fn sample_test(status: TestStatus) -> LabTest {
        let created = at("2024-01-10T07:00:00Z");
        LabTest {
            id: Uuid::new_v4(),
            test_code: "TEST000001".to_string(),
            sample_code: "BLO000001".to_string(),
            patient_id: Uuid::new_v4(),
            test_type: TestType::BasicMetabolicPanel,
            category: TestCategory::Chemistry,
            sample_type: SampleType::Blood,
            priority: TestPriority::Routine,
            status,
            ordered_by: "dr-1".to_string(),
            collected_at: None,
            collected_by: None,
            processing_at: None,
            processed_by: None,
            completed_at: None,
            completed_by: None,
            turnaround_hours: None,
            cancellation_reason: None,
            clinical_notes: None,
            special_instructions: None,
            fasting_required: false,
            comments: None,
            is_active: true,
            created_at: created,
            updated_at: created,
            version: 1,
        }
    }

    #[test]
    fn test_complete_computes_turnaround() {
        let workflow = TestWorkflow::new();
        let mut test = sample_test(TestStatus::Processing);
        test.collected_at = Some(at("2024-01-10T08:00:00Z"));

        let done = workflow
            .advance(&test, TestEvent::Complete, &tech(), at("2024-01-11T08:00:00Z"), None)
            .unwrap();

        assert_eq!(done.status, TestStatus::Completed);
        assert_eq!(done.turnaround_hours, Some(24));
        assert_eq!(done.completed_by.as_deref(), Some("tech-1"));
        // 输入不变
        assert_eq!(test.status, TestStatus::Processing);
        assert_eq!(test.turnaround_hours, None);
    }

    #[test]
    fn test_complete_without_collection_has_no_turnaround() {
        let workflow = TestWorkflow::new();
        let test = sample_test(TestStatus::Processing);

        let done = workflow
            .advance(&test, TestEvent::Complete, &tech(), at("2024-01-11T08:00:00Z"), None)
            .unwrap();
        assert_eq!(done.turnaround_hours, None);
    }

    #[test]
    fn test_turnaround_never_negative() {
        let workflow = TestWorkflow::new();
        let mut test = sample_test(TestStatus::Processing);
        test.collected_at = Some(at("2024-01-11T08:00:00Z"));

        let done = workflow
            .advance(&test, TestEvent::Complete, &tech(), at("2024-01-10T08:00:00Z"), None)
            .unwrap();
        assert_eq!(done.turnaround_hours, Some(0));
    }

    #[test]
    fn test_happy_path_records_actors() {
        let workflow = TestWorkflow::new();
        let now = at("2024-01-10T08:00:00Z");
        let test = sample_test(TestStatus::Ordered);

        let collected = workflow
            .advance(&test, TestEvent::Collect, &tech(), now, None)
            .unwrap();
        assert_eq!(collected.collected_at, Some(now));
        assert_eq!(collected.collected_by.as_deref(), Some("tech-1"));

        let processing = workflow
            .advance(&collected, TestEvent::Process, &tech(), now, None)
            .unwrap();
        assert_eq!(processing.status, TestStatus::Processing);
        assert_eq!(processing.processed_by.as_deref(), Some("tech-1"));
    }

    #[test]
    fn test_skipping_a_step_is_rejected() {
        let workflow = TestWorkflow::new();
        let test = sample_test(TestStatus::Ordered);

        let err = workflow
            .advance(&test, TestEvent::Complete, &tech(), Utc::now(), None)
            .unwrap_err();
        match err {
            LisError::InvalidTransition { from, requested, .. } => {
                assert_eq!(from, "ordered");
                assert_eq!(requested, "complete");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cancel_reason_defaults() {
        let workflow = TestWorkflow::new();
        let test = sample_test(TestStatus::OnHold);

        let cancelled = workflow
            .advance(&test, TestEvent::Cancel, &tech(), Utc::now(), Some("  "))
            .unwrap();
        assert_eq!(cancelled.status, TestStatus::Cancelled);
        assert_eq!(
            cancelled.cancellation_reason.as_deref(),
            Some(DEFAULT_CANCELLATION_REASON)
        );

        let again = workflow.advance(&cancelled, TestEvent::Cancel, &tech(), Utc::now(), None);
        assert!(matches!(again, Err(LisError::InvalidTransition { .. })));
    }

    #[test]
    fn test_update_rejected_when_terminal() {
        let workflow = TestWorkflow::new();
        let update = TestUpdate {
            priority: Some(TestPriority::Stat),
            ..Default::default()
        };

        let open = sample_test(TestStatus::Collected);
        let updated = workflow.apply_update(&open, &update, Utc::now()).unwrap();
        assert_eq!(updated.priority, TestPriority::Stat);

        let done = sample_test(TestStatus::Completed);
        assert!(workflow.apply_update(&done, &update, Utc::now()).is_err());
    }

    #[test]
    fn test_delete_blocked_by_active_result() {
        let workflow = TestWorkflow::new();
        let test = sample_test(TestStatus::Completed);

        assert!(workflow.ensure_deletable(&test, false).is_ok());
        assert!(matches!(
            workflow.ensure_deletable(&test, true),
            Err(LisError::Conflict(_))
        ));
    }
}
