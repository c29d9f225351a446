//! 工作流引擎
//!
//! 协调存储、状态守卫和通知发送的服务层。每个状态变更都是
//! 读取 → 纯函数转换 → 带版本号的条件写入，并发修改以 `Conflict` 失败。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lis_core::query::MAX_PAGE_SIZE;
use lis_core::utils::{
    format_code, start_of_day, start_of_month, start_of_previous_month, start_of_week,
    PATIENT_CODE_PREFIX, RESULT_CODE_PREFIX, TEST_CODE_PREFIX,
};
use lis_core::{
    Actor, AmendRequest, Amendment, BatchApproveRequest, BatchOutcome, LabResult, LabTest,
    LisError, NewPatient, NewResult, NewTestOrder, OverallStatus, Page, Pagination, Patient,
    PatientFilter, PatientUpdate, Result, ResultFilter, ResultStatus, ResultUpdate, SortOrder,
    TestCategory, TestFilter, TestPriority, TestStatus, TestUpdate,
};
use lis_database::LabStore;
use serde_json::json;
use uuid::Uuid;

use crate::analytics::{
    completion_rate, round1, DashboardAnalytics, PeriodComparison, ResultStats, TestStats,
    TurnaroundReport, WorkloadSummary,
};
use crate::notification::{
    dispatch_best_effort, Notification, NotificationDispatcher, NotificationKind,
};
use crate::result_workflow::ResultWorkflow;
use crate::state_machine::{ResultEvent, TestEvent};
use crate::test_workflow::TestWorkflow;

/// 工作流引擎
pub struct WorkflowEngine {
    store: Arc<dyn LabStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    /// 除开单医生外，危急值还需通知的人员
    critical_recipients: Vec<String>,
    tests: TestWorkflow,
    results: ResultWorkflow,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn LabStore>, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        Self {
            store,
            notifier,
            critical_recipients: Vec::new(),
            tests: TestWorkflow::new(),
            results: ResultWorkflow::new(),
        }
    }

    pub fn with_critical_recipients(mut self, recipients: Vec<String>) -> Self {
        self.critical_recipients = recipients;
        self
    }

    pub fn store(&self) -> &Arc<dyn LabStore> {
        &self.store
    }

    // ========== 患者 ==========

    pub async fn create_patient(&self, actor: &Actor, request: NewPatient) -> Result<Patient> {
        let first_name = request.first_name.trim();
        let last_name = request.last_name.trim();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(LisError::Validation("患者姓名不能为空".to_string()));
        }

        let sequence = self.store.next_sequence("patient").await?;
        let now = Utc::now();
        let patient = Patient {
            id: Uuid::new_v4(),
            patient_code: format_code(PATIENT_CODE_PREFIX, sequence),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            date_of_birth: request.date_of_birth,
            sex: request.sex,
            phone: request.phone,
            email: request.email,
            created_by: actor.user_id.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        self.store.insert_patient(&patient).await?;

        tracing::info!("Patient {} registered by {}", patient.patient_code, actor.user_id);
        Ok(patient)
    }

    pub async fn get_patient(&self, id: Uuid) -> Result<Patient> {
        match self.store.get_patient(id).await? {
            Some(patient) if patient.is_active => Ok(patient),
            _ => Err(LisError::not_found(format!("患者 {}", id))),
        }
    }

    pub async fn list_patients(
        &self,
        filter: &PatientFilter,
        pagination: Pagination,
    ) -> Result<Page<Patient>> {
        let items = self.store.list_patients(filter, pagination).await?;
        let total = self.store.count_patients(filter).await?;
        Ok(Page::new(items, pagination, total))
    }

    pub async fn update_patient(&self, id: Uuid, update: PatientUpdate) -> Result<Patient> {
        let mut patient = self.get_patient(id).await?;

        if let Some(first_name) = non_blank(update.first_name) {
            patient.first_name = first_name;
        }
        if let Some(last_name) = non_blank(update.last_name) {
            patient.last_name = last_name;
        }
        if update.date_of_birth.is_some() {
            patient.date_of_birth = update.date_of_birth;
        }
        if update.sex.is_some() {
            patient.sex = update.sex;
        }
        if update.phone.is_some() {
            patient.phone = update.phone;
        }
        if update.email.is_some() {
            patient.email = update.email;
        }
        patient.updated_at = Utc::now();

        self.store.update_patient(&patient).await
    }

    /// 软删除，仍有进行中检验的患者不能删除
    pub async fn delete_patient(&self, id: Uuid, actor: &Actor) -> Result<()> {
        let mut patient = self.get_patient(id).await?;

        let mut in_progress = 0;
        for status in TestStatus::ALL.iter().filter(|s| s.is_in_progress()) {
            let filter = TestFilter {
                patient_id: Some(id),
                status: Some(*status),
                ..Default::default()
            };
            in_progress += self.store.count_tests(&filter).await?;
        }
        if in_progress > 0 {
            return Err(LisError::Conflict(format!(
                "患者 {} 有 {} 项进行中的检验，不能删除",
                patient.patient_code, in_progress
            )));
        }

        patient.is_active = false;
        patient.updated_at = Utc::now();
        self.store.update_patient(&patient).await?;

        tracing::info!("Patient {} deleted by {}", patient.patient_code, actor.user_id);
        Ok(())
    }

    // ========== 检验 ==========

    /// 开立检验申请，生成检验编号和样本编号
    pub async fn order_test(&self, actor: &Actor, order: NewTestOrder) -> Result<LabTest> {
        let patient = self.get_patient(order.patient_id).await?;

        let test_sequence = self.store.next_sequence("test").await?;
        let sample_sequence = self
            .store
            .next_sequence(&format!("sample:{}", order.sample_type))
            .await?;

        let now = Utc::now();
        let test = LabTest {
            id: Uuid::new_v4(),
            test_code: format_code(TEST_CODE_PREFIX, test_sequence),
            sample_code: format_code(&order.sample_type.code_prefix(), sample_sequence),
            patient_id: patient.id,
            test_type: order.test_type,
            category: order.category,
            sample_type: order.sample_type,
            priority: order.priority,
            status: TestStatus::Ordered,
            ordered_by: actor.user_id.clone(),
            collected_at: None,
            collected_by: None,
            processing_at: None,
            processed_by: None,
            completed_at: None,
            completed_by: None,
            turnaround_hours: None,
            cancellation_reason: None,
            clinical_notes: order.clinical_notes,
            special_instructions: order.special_instructions,
            fasting_required: order.fasting_required,
            comments: order.comments,
            is_active: true,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        self.store.insert_test(&test).await?;

        tracing::info!(
            "Test {} ({}) ordered for patient {} by {} with priority {}",
            test.test_code,
            test.test_type,
            patient.patient_code,
            actor.user_id,
            test.priority
        );
        Ok(test)
    }

    pub async fn get_test(&self, id: Uuid) -> Result<LabTest> {
        match self.store.get_test(id).await? {
            Some(test) if test.is_active => Ok(test),
            _ => Err(LisError::not_found(format!("检验 {}", id))),
        }
    }

    pub async fn list_tests(
        &self,
        filter: &TestFilter,
        pagination: Pagination,
    ) -> Result<Page<LabTest>> {
        let items = self
            .store
            .list_tests(filter, pagination, SortOrder::NewestFirst)
            .await?;
        let total = self.store.count_tests(filter).await?;
        Ok(Page::new(items, pagination, total))
    }

    pub async fn update_test(&self, id: Uuid, update: TestUpdate) -> Result<LabTest> {
        let test = self.get_test(id).await?;
        let updated = self.tests.apply_update(&test, &update, Utc::now())?;
        self.store.update_test(&updated).await
    }

    pub async fn collect_test(&self, id: Uuid, actor: &Actor) -> Result<LabTest> {
        self.transition_test(id, TestEvent::Collect, actor, None).await
    }

    pub async fn process_test(&self, id: Uuid, actor: &Actor) -> Result<LabTest> {
        self.transition_test(id, TestEvent::Process, actor, None).await
    }

    pub async fn complete_test(&self, id: Uuid, actor: &Actor) -> Result<LabTest> {
        self.transition_test(id, TestEvent::Complete, actor, None).await
    }

    pub async fn cancel_test(
        &self,
        id: Uuid,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<LabTest> {
        self.transition_test(id, TestEvent::Cancel, actor, reason).await
    }

    async fn transition_test(
        &self,
        id: Uuid,
        event: TestEvent,
        actor: &Actor,
        note: Option<&str>,
    ) -> Result<LabTest> {
        let test = self.get_test(id).await?;
        let next = self.tests.advance(&test, event, actor, Utc::now(), note)?;
        let saved = self.store.update_test(&next).await?;

        tracing::info!(
            "Test {} status updated from {} to {} by {}",
            saved.test_code,
            test.status,
            saved.status,
            actor.user_id
        );
        Ok(saved)
    }

    /// 软删除，存在有效结果时拒绝
    pub async fn delete_test(&self, id: Uuid, actor: &Actor) -> Result<()> {
        let mut test = self.get_test(id).await?;
        let active_result = self.store.find_active_result_for_test(id).await?;
        self.tests.ensure_deletable(&test, active_result.is_some())?;

        test.is_active = false;
        test.updated_at = Utc::now();
        self.store.update_test(&test).await?;

        tracing::info!("Test {} deleted by {}", test.test_code, actor.user_id);
        Ok(())
    }

    /// 今天开立的全部检验
    pub async fn today_workload(&self, now: DateTime<Utc>) -> Result<WorkloadSummary> {
        let today = start_of_day(now);
        let filter = TestFilter {
            created_from: Some(today),
            created_before: Some(today + Duration::days(1)),
            ..Default::default()
        };
        let tests = self.all_tests(&filter).await?;
        Ok(WorkloadSummary::new(today.date_naive(), tests))
    }

    async fn all_tests(&self, filter: &TestFilter) -> Result<Vec<LabTest>> {
        let mut tests = Vec::new();
        let mut page = 1;
        loop {
            let pagination = Pagination::new(Some(page), Some(MAX_PAGE_SIZE));
            let batch = self
                .store
                .list_tests(filter, pagination, SortOrder::OldestFirst)
                .await?;
            let done = batch.len() < MAX_PAGE_SIZE as usize;
            tests.extend(batch);
            if done {
                return Ok(tests);
            }
            page += 1;
        }
    }

    pub async fn test_stats(&self, now: DateTime<Utc>) -> Result<TestStats> {
        let today = self.count_tests_since(start_of_day(now)).await?;
        let this_week = self.count_tests_since(start_of_week(now)).await?;
        let this_month = self.count_tests_since(start_of_month(now)).await?;

        let mut by_status = std::collections::BTreeMap::new();
        for status in TestStatus::ALL {
            let filter = TestFilter {
                status: Some(*status),
                ..Default::default()
            };
            by_status.insert(status.to_string(), self.store.count_tests(&filter).await?);
        }

        let mut by_priority = std::collections::BTreeMap::new();
        for priority in TestPriority::ALL {
            let filter = TestFilter {
                priority: Some(*priority),
                ..Default::default()
            };
            by_priority.insert(priority.to_string(), self.store.count_tests(&filter).await?);
        }

        let mut by_category = std::collections::BTreeMap::new();
        for category in TestCategory::ALL {
            let filter = TestFilter {
                category: Some(*category),
                ..Default::default()
            };
            by_category.insert(category.to_string(), self.store.count_tests(&filter).await?);
        }

        let samples = self
            .store
            .turnaround_samples(&TestFilter::default())
            .await?;
        let average_turnaround_hours = (!samples.is_empty()).then(|| {
            let total: i64 = samples.iter().map(|s| s.hours).sum();
            round1(total as f64 / samples.len() as f64)
        });

        Ok(TestStats {
            today,
            this_week,
            this_month,
            by_status,
            by_priority,
            by_category,
            average_turnaround_hours,
        })
    }

    async fn count_tests_since(&self, from: DateTime<Utc>) -> Result<u64> {
        self.count_tests_between(from, None).await
    }

    async fn count_tests_between(
        &self,
        from: DateTime<Utc>,
        before: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let filter = TestFilter {
            created_from: Some(from),
            created_before: before,
            ..Default::default()
        };
        self.store.count_tests(&filter).await
    }

    // ========== 结果 ==========

    /// 为已完成的检验录入结果，每个检验只能有一条有效结果
    pub async fn create_result(&self, actor: &Actor, request: NewResult) -> Result<LabResult> {
        let test = self.get_test(request.test_id).await?;
        if let Some(existing) = self.store.find_active_result_for_test(test.id).await? {
            return Err(LisError::Conflict(format!(
                "检验 {} 已有结果 {}",
                test.test_code, existing.result_code
            )));
        }

        // 先校验再取号，避免非法请求消耗编号
        let preview = self
            .results
            .draft(String::new(), &test, request, actor, Utc::now())?;
        let sequence = self.store.next_sequence("result").await?;
        let result = LabResult {
            result_code: format_code(RESULT_CODE_PREFIX, sequence),
            ..preview
        };
        self.store.insert_result(&result).await?;

        tracing::info!(
            "Result {} recorded for test {} by {} ({})",
            result.result_code,
            test.test_code,
            actor.user_id,
            result.overall_status
        );

        if result.overall_status == OverallStatus::Critical {
            self.send_critical_alerts(&result, &test).await;
        }
        Ok(result)
    }

    pub async fn get_result(&self, id: Uuid) -> Result<LabResult> {
        match self.store.get_result(id).await? {
            Some(result) if result.is_active => Ok(result),
            _ => Err(LisError::not_found(format!("结果 {}", id))),
        }
    }

    pub async fn list_results(
        &self,
        filter: &ResultFilter,
        pagination: Pagination,
    ) -> Result<Page<LabResult>> {
        let items = self
            .store
            .list_results(filter, pagination, SortOrder::NewestFirst)
            .await?;
        let total = self.store.count_results(filter).await?;
        Ok(Page::new(items, pagination, total))
    }

    pub async fn update_result(
        &self,
        id: Uuid,
        actor: &Actor,
        update: ResultUpdate,
    ) -> Result<LabResult> {
        let result = self.get_result(id).await?;
        let next = self.results.apply_update(&result, update, Utc::now())?;
        let saved = self.store.update_result(&next).await?;

        tracing::info!("Result {} updated by {}", saved.result_code, actor.user_id);
        self.alert_if_newly_critical(&result, &saved).await;
        Ok(saved)
    }

    pub async fn review_result(
        &self,
        id: Uuid,
        actor: &Actor,
        comments: Option<String>,
    ) -> Result<LabResult> {
        self.transition_result(id, ResultEvent::Review, actor, comments)
            .await
    }

    pub async fn approve_result(
        &self,
        id: Uuid,
        actor: &Actor,
        comments: Option<String>,
    ) -> Result<LabResult> {
        self.transition_result(id, ResultEvent::Approve, actor, comments)
            .await
    }

    /// 批量批准已审核的结果，逐条经过状态守卫和版本写入
    ///
    /// 不存在、已删除或不在 `reviewed` 状态的结果被跳过，
    /// 并发修改造成的冲突只记录日志，不计入写入数。
    pub async fn batch_approve(
        &self,
        actor: &Actor,
        request: BatchApproveRequest,
    ) -> Result<BatchOutcome> {
        if request.result_ids.is_empty() {
            return Err(LisError::Validation("结果ID列表不能为空".to_string()));
        }

        let mut ids = request.result_ids;
        ids.sort();
        ids.dedup();

        let mut outcome = BatchOutcome::default();
        for id in ids {
            let result = match self.store.get_result(id).await? {
                Some(result) if result.is_active && result.status == ResultStatus::Reviewed => {
                    result
                }
                _ => continue,
            };
            outcome.matched_count += 1;

            let next = self.results.advance(
                &result,
                ResultEvent::Approve,
                actor,
                request.approval_comments.clone(),
                Utc::now(),
            )?;
            match self.store.update_result(&next).await {
                Ok(_) => outcome.modified_count += 1,
                Err(LisError::Conflict(message)) => {
                    tracing::warn!(
                        "Result {} skipped in batch approval: {}",
                        result.result_code,
                        message
                    );
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "Batch approval by {}: {} matched, {} approved",
            actor.user_id,
            outcome.matched_count,
            outcome.modified_count
        );
        Ok(outcome)
    }

    /// 发布结果并通知开单医生
    pub async fn report_result(&self, id: Uuid, actor: &Actor) -> Result<LabResult> {
        let saved = self
            .transition_result(id, ResultEvent::Report, actor, None)
            .await?;

        let Some(test) = self.test_for_notification(&saved).await else {
            return Ok(saved);
        };
        let notification = Notification::new(
            NotificationKind::ResultReported,
            test.ordered_by.clone(),
            json!({
                "result_id": saved.id,
                "result_code": saved.result_code,
                "test_code": test.test_code,
                "test_type": test.test_type,
                "patient_id": saved.patient_id,
                "overall_status": saved.overall_status,
                "reported_at": saved.reported_at,
            }),
        );
        dispatch_best_effort(self.notifier.as_ref(), &notification).await;
        Ok(saved)
    }

    async fn transition_result(
        &self,
        id: Uuid,
        event: ResultEvent,
        actor: &Actor,
        comments: Option<String>,
    ) -> Result<LabResult> {
        let result = self.get_result(id).await?;
        let next = self
            .results
            .advance(&result, event, actor, comments, Utc::now())?;
        let saved = self.store.update_result(&next).await?;

        tracing::info!(
            "Result {} status updated from {} to {} by {}",
            saved.result_code,
            result.status,
            saved.status,
            actor.user_id
        );
        Ok(saved)
    }

    pub async fn amend_result(
        &self,
        id: Uuid,
        actor: &Actor,
        request: AmendRequest,
    ) -> Result<LabResult> {
        let result = self.get_result(id).await?;
        let next = self.results.amend(&result, request, actor, Utc::now())?;
        let saved = self.store.update_result(&next).await?;

        tracing::info!(
            "Result {} amended by {} ({} amendments)",
            saved.result_code,
            actor.user_id,
            saved.amendments.len()
        );
        self.alert_if_newly_critical(&result, &saved).await;
        Ok(saved)
    }

    pub async fn amendment_history(&self, id: Uuid) -> Result<Vec<Amendment>> {
        Ok(self.get_result(id).await?.amendments)
    }

    /// 软删除，已发布的结果不能删除
    pub async fn delete_result(&self, id: Uuid, actor: &Actor) -> Result<()> {
        let mut result = self.get_result(id).await?;
        self.results.ensure_deletable(&result)?;

        result.is_active = false;
        result.updated_at = Utc::now();
        self.store.update_result(&result).await?;

        tracing::info!("Result {} deleted by {}", result.result_code, actor.user_id);
        Ok(())
    }

    /// 手动发送危急值通知并记录通知时间
    ///
    /// 所有接收人都发送失败时返回 `Notification` 错误，不记录通知时间。
    pub async fn notify_critical(&self, id: Uuid, actor: &Actor) -> Result<LabResult> {
        let mut result = self.get_result(id).await?;
        if result.critical_values().is_empty() {
            return Err(LisError::Validation(format!(
                "结果 {} 没有危急值",
                result.result_code
            )));
        }

        let test = self.get_test(result.test_id).await?;
        let sent = self.send_critical_alerts(&result, &test).await;
        if sent == 0 {
            return Err(LisError::Notification(format!(
                "结果 {} 的危急值通知全部发送失败",
                result.result_code
            )));
        }

        let now = Utc::now();
        result.critical_notified_at = Some(now);
        result.updated_at = now;
        let saved = self.store.update_result(&result).await?;

        tracing::warn!(
            "Critical values of result {} notified by {} ({} recipients)",
            saved.result_code,
            actor.user_id,
            sent
        );
        Ok(saved)
    }

    /// 写入后的危急值提醒：仅当结果变为危急或危急项发生变化时发送
    async fn alert_if_newly_critical(&self, before: &LabResult, after: &LabResult) {
        if after.overall_status != OverallStatus::Critical {
            return;
        }
        if before.overall_status == OverallStatus::Critical
            && before.critical_values() == after.critical_values()
        {
            return;
        }
        if let Some(test) = self.test_for_notification(after).await {
            self.send_critical_alerts(after, &test).await;
        }
    }

    /// 通知所需的检验信息，变更已提交，查询失败只记录日志
    async fn test_for_notification(&self, result: &LabResult) -> Option<LabTest> {
        match self.store.get_test(result.test_id).await {
            Ok(Some(test)) => Some(test),
            Ok(None) => {
                tracing::warn!(
                    "Test {} of result {} not found, notification skipped",
                    result.test_id,
                    result.result_code
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load test of result {}, notification skipped: {}",
                    result.result_code,
                    e
                );
                None
            }
        }
    }

    /// 返回发送成功的接收人数量
    async fn send_critical_alerts(&self, result: &LabResult, test: &LabTest) -> usize {
        let critical_values = result.critical_values();
        tracing::warn!(
            "Result {} has {} critical values",
            result.result_code,
            critical_values.len()
        );

        let data = json!({
            "result_id": result.id,
            "result_code": result.result_code,
            "test_code": test.test_code,
            "test_type": test.test_type,
            "patient_id": result.patient_id,
            "critical_values": critical_values,
            "performed_at": result.performed_at,
        });

        let mut recipients = vec![test.ordered_by.clone()];
        for recipient in &self.critical_recipients {
            if !recipients.contains(recipient) {
                recipients.push(recipient.clone());
            }
        }

        let mut sent = 0;
        for recipient in recipients {
            let notification =
                Notification::new(NotificationKind::CriticalResult, recipient, data.clone());
            if dispatch_best_effort(self.notifier.as_ref(), &notification).await {
                sent += 1;
            }
        }
        sent
    }

    /// 待审核结果，最早录入的在前
    pub async fn pending_reviews(&self, pagination: Pagination) -> Result<Page<LabResult>> {
        let filter = ResultFilter {
            status: Some(ResultStatus::Draft),
            ..Default::default()
        };
        let items = self
            .store
            .list_results(&filter, pagination, SortOrder::OldestFirst)
            .await?;
        let total = self.store.count_results(&filter).await?;
        Ok(Page::new(items, pagination, total))
    }

    pub async fn critical_results(&self, pagination: Pagination) -> Result<Page<LabResult>> {
        let filter = ResultFilter {
            overall_status: Some(OverallStatus::Critical),
            ..Default::default()
        };
        self.list_results(&filter, pagination).await
    }

    pub async fn result_stats(&self, now: DateTime<Utc>) -> Result<ResultStats> {
        let since = |from: DateTime<Utc>| ResultFilter {
            created_from: Some(from),
            ..Default::default()
        };
        let today = self.store.count_results(&since(start_of_day(now))).await?;
        let this_week = self.store.count_results(&since(start_of_week(now))).await?;
        let this_month = self.store.count_results(&since(start_of_month(now))).await?;

        let mut by_status = std::collections::BTreeMap::new();
        for status in ResultStatus::ALL {
            let filter = ResultFilter {
                status: Some(*status),
                ..Default::default()
            };
            by_status.insert(status.to_string(), self.store.count_results(&filter).await?);
        }

        let mut by_overall_status = std::collections::BTreeMap::new();
        for overall in OverallStatus::ALL {
            let filter = ResultFilter {
                overall_status: Some(*overall),
                ..Default::default()
            };
            by_overall_status.insert(overall.to_string(), self.store.count_results(&filter).await?);
        }

        let count_of = |map: &std::collections::BTreeMap<String, u64>, key: &str| {
            map.get(key).copied().unwrap_or(0)
        };
        Ok(ResultStats {
            today,
            this_week,
            this_month,
            critical: count_of(&by_overall_status, OverallStatus::Critical.as_str()),
            pending_review: count_of(&by_status, ResultStatus::Draft.as_str()),
            pending_approval: count_of(&by_status, ResultStatus::Reviewed.as_str()),
            by_status,
            by_overall_status,
        })
    }

    // ========== 报表 ==========

    pub async fn dashboard(&self, now: DateTime<Utc>) -> Result<DashboardAnalytics> {
        let today = start_of_day(now);
        let yesterday = today - Duration::days(1);
        let week = start_of_week(now);
        let last_week = week - Duration::days(7);
        let month = start_of_month(now);
        let last_month = start_of_previous_month(now);

        let tests_today = PeriodComparison::new(
            self.count_tests_since(today).await?,
            self.count_tests_between(yesterday, Some(today)).await?,
        );
        let tests_this_week = PeriodComparison::new(
            self.count_tests_since(week).await?,
            self.count_tests_between(last_week, Some(week)).await?,
        );
        let tests_this_month = PeriodComparison::new(
            self.count_tests_since(month).await?,
            self.count_tests_between(last_month, Some(month)).await?,
        );

        let completed_this_month = self
            .store
            .count_tests(&TestFilter {
                status: Some(TestStatus::Completed),
                created_from: Some(month),
                ..Default::default()
            })
            .await?;

        let results_today = self
            .store
            .count_results(&ResultFilter {
                created_from: Some(today),
                ..Default::default()
            })
            .await?;
        let pending_review = self
            .store
            .count_results(&ResultFilter {
                status: Some(ResultStatus::Draft),
                ..Default::default()
            })
            .await?;
        let critical_results = self
            .store
            .count_results(&ResultFilter {
                overall_status: Some(OverallStatus::Critical),
                ..Default::default()
            })
            .await?;

        let patients_today = self
            .store
            .count_patients(&PatientFilter {
                created_from: Some(today),
                ..Default::default()
            })
            .await?;
        let patients_total = self.store.count_patients(&PatientFilter::default()).await?;

        Ok(DashboardAnalytics {
            generated_at: now,
            completion_rate: completion_rate(completed_this_month, tests_this_month.current),
            tests_today,
            tests_this_week,
            tests_this_month,
            results_today,
            pending_review,
            critical_results,
            patients_today,
            patients_total,
        })
    }

    /// 按分类的周转时间报告，可按完成时间和分类过滤
    pub async fn turnaround_report(&self, filter: &TestFilter) -> Result<TurnaroundReport> {
        let samples = self.store.turnaround_samples(filter).await?;
        Ok(TurnaroundReport::from_samples(&samples))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lis_core::{ResultFlag, SampleType, TestType, TestValue, UserRole};
    use lis_database::{InMemoryStore, TurnaroundSample};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    impl RecordingDispatcher {
        fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn kinds(&self) -> Vec<(NotificationKind, String)> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|n| (n.kind, n.recipient.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn dispatch(&self, notification: &Notification) -> Result<()> {
            if self.fail {
                return Err(LisError::Notification("unreachable".to_string()));
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    /// 检验查询可被切换为失败的存储
    #[derive(Default)]
    struct FlakyTestLookup {
        inner: InMemoryStore,
        fail_test_lookup: AtomicBool,
    }

    #[async_trait]
    impl LabStore for FlakyTestLookup {
        async fn next_sequence(&self, name: &str) -> Result<i64> {
            self.inner.next_sequence(name).await
        }

        async fn insert_patient(&self, patient: &Patient) -> Result<()> {
            self.inner.insert_patient(patient).await
        }

        async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
            self.inner.get_patient(id).await
        }

        async fn update_patient(&self, patient: &Patient) -> Result<Patient> {
            self.inner.update_patient(patient).await
        }

        async fn list_patients(
            &self,
            filter: &PatientFilter,
            pagination: Pagination,
        ) -> Result<Vec<Patient>> {
            self.inner.list_patients(filter, pagination).await
        }

        async fn count_patients(&self, filter: &PatientFilter) -> Result<u64> {
            self.inner.count_patients(filter).await
        }

        async fn insert_test(&self, test: &LabTest) -> Result<()> {
            self.inner.insert_test(test).await
        }

        async fn get_test(&self, id: Uuid) -> Result<Option<LabTest>> {
            if self.fail_test_lookup.load(Ordering::SeqCst) {
                return Err(LisError::Database("connection reset".to_string()));
            }
            self.inner.get_test(id).await
        }

        async fn update_test(&self, test: &LabTest) -> Result<LabTest> {
            self.inner.update_test(test).await
        }

        async fn list_tests(
            &self,
            filter: &TestFilter,
            pagination: Pagination,
            order: SortOrder,
        ) -> Result<Vec<LabTest>> {
            self.inner.list_tests(filter, pagination, order).await
        }

        async fn count_tests(&self, filter: &TestFilter) -> Result<u64> {
            self.inner.count_tests(filter).await
        }

        async fn turnaround_samples(&self, filter: &TestFilter) -> Result<Vec<TurnaroundSample>> {
            self.inner.turnaround_samples(filter).await
        }

        async fn insert_result(&self, result: &LabResult) -> Result<()> {
            self.inner.insert_result(result).await
        }

        async fn get_result(&self, id: Uuid) -> Result<Option<LabResult>> {
            self.inner.get_result(id).await
        }

        async fn update_result(&self, result: &LabResult) -> Result<LabResult> {
            self.inner.update_result(result).await
        }

        async fn find_active_result_for_test(&self, test_id: Uuid) -> Result<Option<LabResult>> {
            self.inner.find_active_result_for_test(test_id).await
        }

        async fn list_results(
            &self,
            filter: &ResultFilter,
            pagination: Pagination,
            order: SortOrder,
        ) -> Result<Vec<LabResult>> {
            self.inner.list_results(filter, pagination, order).await
        }

        async fn count_results(&self, filter: &ResultFilter) -> Result<u64> {
            self.inner.count_results(filter).await
        }
    }

    fn admin() -> Actor {
        Actor::new("admin-1", UserRole::Admin)
    }

    fn doctor() -> Actor {
        Actor::new("dr-house", UserRole::Doctor)
    }

    fn tech() -> Actor {
        Actor::new("tech-1", UserRole::LabTechnician)
    }

    fn engine_with(dispatcher: Arc<RecordingDispatcher>) -> WorkflowEngine {
        WorkflowEngine::new(Arc::new(InMemoryStore::new()), dispatcher)
            .with_critical_recipients(vec!["lab-manager".to_string()])
    }

    async fn patient(engine: &WorkflowEngine) -> Patient {
        engine
            .create_patient(
                &admin(),
                NewPatient {
                    first_name: "Ada".to_string(),
                    last_name: "Lovelace".to_string(),
                    date_of_birth: None,
                    sex: None,
                    phone: None,
                    email: None,
                },
            )
            .await
            .unwrap()
    }

    fn order(patient_id: Uuid, sample_type: SampleType) -> NewTestOrder {
        NewTestOrder {
            patient_id,
            test_type: TestType::Electrolytes,
            category: TestCategory::Chemistry,
            sample_type,
            priority: TestPriority::Stat,
            clinical_notes: None,
            special_instructions: None,
            fasting_required: false,
            comments: None,
        }
    }

    async fn completed_test(engine: &WorkflowEngine, patient_id: Uuid) -> LabTest {
        let test = engine
            .order_test(&doctor(), order(patient_id, SampleType::Blood))
            .await
            .unwrap();
        engine.collect_test(test.id, &tech()).await.unwrap();
        engine.process_test(test.id, &tech()).await.unwrap();
        engine.complete_test(test.id, &tech()).await.unwrap()
    }

    fn critical_values() -> Vec<TestValue> {
        vec![
            TestValue::new("K+", "6.9", ResultFlag::CriticalHigh),
            TestValue::new("Na+", "140", ResultFlag::Normal),
        ]
    }

    fn new_result(test_id: Uuid, test_values: Vec<TestValue>) -> NewResult {
        NewResult {
            test_id,
            test_values,
            interpretation: None,
            recommendations: None,
        }
    }

    #[tokio::test]
    async fn test_codes_are_sequential() {
        let engine = engine_with(Arc::default());
        let patient = patient(&engine).await;
        assert_eq!(patient.patient_code, "PAT000001");

        let first = engine
            .order_test(&doctor(), order(patient.id, SampleType::Blood))
            .await
            .unwrap();
        let second = engine
            .order_test(&doctor(), order(patient.id, SampleType::Urine))
            .await
            .unwrap();
        let third = engine
            .order_test(&doctor(), order(patient.id, SampleType::Blood))
            .await
            .unwrap();

        assert_eq!(first.test_code, "TEST000001");
        assert_eq!(second.test_code, "TEST000002");
        assert_eq!(first.sample_code, "BLO000001");
        assert_eq!(second.sample_code, "URI000001");
        assert_eq!(third.sample_code, "BLO000002");
        assert_eq!(first.ordered_by, "dr-house");
        assert_eq!(first.status, TestStatus::Ordered);
    }

    #[tokio::test]
    async fn test_order_requires_active_patient() {
        let engine = engine_with(Arc::default());
        let err = engine
            .order_test(&doctor(), order(Uuid::new_v4(), SampleType::Blood))
            .await
            .unwrap_err();
        assert!(matches!(err, LisError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_transition_is_not_persisted() {
        let engine = engine_with(Arc::default());
        let patient = patient(&engine).await;
        let test = engine
            .order_test(&doctor(), order(patient.id, SampleType::Blood))
            .await
            .unwrap();

        let err = engine.complete_test(test.id, &tech()).await.unwrap_err();
        assert!(matches!(err, LisError::InvalidTransition { .. }));

        let stored = engine.get_test(test.id).await.unwrap();
        assert_eq!(stored.status, TestStatus::Ordered);
        assert_eq!(stored.version, test.version);
    }

    #[tokio::test]
    async fn test_complete_flow_sets_turnaround() {
        let engine = engine_with(Arc::default());
        let patient = patient(&engine).await;
        let test = completed_test(&engine, patient.id).await;

        assert_eq!(test.status, TestStatus::Completed);
        assert_eq!(test.turnaround_hours, Some(0));
        assert_eq!(test.version, 4);

        let report = engine.turnaround_report(&TestFilter::default()).await.unwrap();
        assert_eq!(report.overall.count, 1);
        assert_eq!(report.by_category[0].category, TestCategory::Chemistry);
    }

    #[tokio::test]
    async fn test_cancel_and_update_after_cancel() {
        let engine = engine_with(Arc::default());
        let patient = patient(&engine).await;
        let test = engine
            .order_test(&doctor(), order(patient.id, SampleType::Blood))
            .await
            .unwrap();

        let cancelled = engine.cancel_test(test.id, &admin(), None).await.unwrap();
        assert_eq!(cancelled.status, TestStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Test cancelled"));

        let update = TestUpdate {
            comments: Some("late".to_string()),
            ..Default::default()
        };
        assert!(engine.update_test(test.id, update).await.is_err());
    }

    #[tokio::test]
    async fn test_result_requires_completed_test() {
        let engine = engine_with(Arc::default());
        let patient = patient(&engine).await;
        let test = engine
            .order_test(&doctor(), order(patient.id, SampleType::Blood))
            .await
            .unwrap();

        let err = engine
            .create_result(&tech(), new_result(test.id, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, LisError::InvalidTransition { .. }));

        // 失败的请求不消耗结果编号
        let test = completed_test(&engine, patient.id).await;
        let result = engine
            .create_result(&tech(), new_result(test.id, vec![]))
            .await
            .unwrap();
        assert_eq!(result.result_code, "RES000001");
    }

    #[tokio::test]
    async fn test_duplicate_result_conflicts() {
        let engine = engine_with(Arc::default());
        let patient = patient(&engine).await;
        let test = completed_test(&engine, patient.id).await;

        engine
            .create_result(&tech(), new_result(test.id, vec![]))
            .await
            .unwrap();
        let err = engine
            .create_result(&tech(), new_result(test.id, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, LisError::Conflict(_)));

        // 有效结果存在时检验不能删除
        let err = engine.delete_test(test.id, &admin()).await.unwrap_err();
        assert!(matches!(err, LisError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_critical_result_alerts_without_stamping() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = engine_with(dispatcher.clone());
        let patient = patient(&engine).await;
        let test = completed_test(&engine, patient.id).await;

        let result = engine
            .create_result(&tech(), new_result(test.id, critical_values()))
            .await
            .unwrap();

        assert_eq!(result.overall_status, OverallStatus::Critical);
        assert!(result.critical_notified_at.is_none());
        assert_eq!(
            dispatcher.kinds(),
            vec![
                (NotificationKind::CriticalResult, "dr-house".to_string()),
                (NotificationKind::CriticalResult, "lab-manager".to_string()),
            ]
        );

        let notified = engine.notify_critical(result.id, &tech()).await.unwrap();
        assert!(notified.critical_notified_at.is_some());
        assert_eq!(dispatcher.kinds().len(), 4);
    }

    #[tokio::test]
    async fn test_notify_critical_requires_critical_values() {
        let engine = engine_with(Arc::default());
        let patient = patient(&engine).await;
        let test = completed_test(&engine, patient.id).await;
        let values = vec![TestValue::new("Na+", "140", ResultFlag::Normal)];
        let result = engine
            .create_result(&tech(), new_result(test.id, values))
            .await
            .unwrap();

        let err = engine.notify_critical(result.id, &tech()).await.unwrap_err();
        assert!(matches!(err, LisError::Validation(_)));
    }

    #[tokio::test]
    async fn test_dispatch_failure_does_not_fail_workflow() {
        let dispatcher = Arc::new(RecordingDispatcher::failing());
        let engine = engine_with(dispatcher);
        let patient = patient(&engine).await;
        let test = completed_test(&engine, patient.id).await;

        let result = engine
            .create_result(&tech(), new_result(test.id, critical_values()))
            .await
            .unwrap();
        engine.review_result(result.id, &doctor(), None).await.unwrap();
        engine.approve_result(result.id, &doctor(), None).await.unwrap();
        let reported = engine.report_result(result.id, &doctor()).await.unwrap();
        assert_eq!(reported.status, ResultStatus::Reported);

        let err = engine.notify_critical(result.id, &tech()).await.unwrap_err();
        assert!(matches!(err, LisError::Notification(_)));
        let stored = engine.get_result(result.id).await.unwrap();
        assert!(stored.critical_notified_at.is_none());
    }

    #[tokio::test]
    async fn test_report_amend_and_lock() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = engine_with(dispatcher.clone());
        let patient = patient(&engine).await;
        let test = completed_test(&engine, patient.id).await;
        let values = vec![TestValue::new("Na+", "140", ResultFlag::Normal)];
        let result = engine
            .create_result(&tech(), new_result(test.id, values))
            .await
            .unwrap();

        let reviewed = engine
            .review_result(result.id, &doctor(), Some("looks fine".into()))
            .await
            .unwrap();
        assert_eq!(reviewed.reviewed_by.as_deref(), Some("dr-house"));
        engine.approve_result(result.id, &doctor(), None).await.unwrap();
        let reported = engine.report_result(result.id, &doctor()).await.unwrap();
        assert!(reported.reported_at.is_some());
        assert_eq!(
            dispatcher.kinds(),
            vec![(NotificationKind::ResultReported, "dr-house".to_string())]
        );

        let update = ResultUpdate {
            interpretation: Some("edit".to_string()),
            ..Default::default()
        };
        assert!(engine.update_result(result.id, &tech(), update).await.is_err());
        assert!(engine.delete_result(result.id, &admin()).await.is_err());

        for n in 1..=2 {
            let request = AmendRequest {
                reason: format!("recalibration {n}"),
                test_values: None,
                interpretation: Some(format!("revision {n}")),
            };
            engine.amend_result(result.id, &tech(), request).await.unwrap();
        }
        let history = engine.amendment_history(result.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].new_interpretation.as_deref(), Some("revision 1"));
        assert_eq!(history[1].previous_interpretation.as_deref(), Some("revision 1"));
    }

    #[tokio::test]
    async fn test_patient_delete_blocked_by_open_tests() {
        let engine = engine_with(Arc::default());
        let patient = patient(&engine).await;
        let test = engine
            .order_test(&doctor(), order(patient.id, SampleType::Blood))
            .await
            .unwrap();

        let err = engine.delete_patient(patient.id, &admin()).await.unwrap_err();
        assert!(matches!(err, LisError::Conflict(_)));

        engine.cancel_test(test.id, &admin(), Some("duplicate")).await.unwrap();
        engine.delete_patient(patient.id, &admin()).await.unwrap();
        assert!(matches!(
            engine.get_patient(patient.id).await,
            Err(LisError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_queues_and_stats() {
        let engine = engine_with(Arc::default());
        let patient = patient(&engine).await;
        let first = completed_test(&engine, patient.id).await;
        let second = completed_test(&engine, patient.id).await;
        engine
            .order_test(&doctor(), order(patient.id, SampleType::Urine))
            .await
            .unwrap();

        let critical = engine
            .create_result(&tech(), new_result(first.id, critical_values()))
            .await
            .unwrap();
        let normal = engine
            .create_result(&tech(), new_result(second.id, vec![]))
            .await
            .unwrap();
        engine.review_result(normal.id, &doctor(), None).await.unwrap();

        let pending = engine.pending_reviews(Pagination::default()).await.unwrap();
        assert_eq!(pending.total, 1);
        assert_eq!(pending.items[0].id, critical.id);

        let criticals = engine.critical_results(Pagination::default()).await.unwrap();
        assert_eq!(criticals.total, 1);

        let now = Utc::now();
        let workload = engine.today_workload(now).await.unwrap();
        assert_eq!(workload.total, 3);
        assert_eq!(workload.by_status.get("completed"), Some(&2));
        assert_eq!(workload.by_status.get("ordered"), Some(&1));

        let stats = engine.test_stats(now).await.unwrap();
        assert_eq!(stats.today, 3);
        assert_eq!(stats.by_priority.get("stat"), Some(&3));
        assert_eq!(stats.average_turnaround_hours, Some(0.0));

        let result_stats = engine.result_stats(now).await.unwrap();
        assert_eq!(result_stats.today, 2);
        assert_eq!(result_stats.critical, 1);
        assert_eq!(result_stats.pending_review, 1);
        assert_eq!(result_stats.pending_approval, 1);

        let dashboard = engine.dashboard(now).await.unwrap();
        assert_eq!(dashboard.tests_today.current, 3);
        assert_eq!(dashboard.tests_today.previous, 0);
        assert_eq!(dashboard.tests_today.change_percent, 100.0);
        assert_eq!(dashboard.completion_rate, 66.7);
        assert_eq!(dashboard.patients_total, 1);
        assert_eq!(dashboard.critical_results, 1);
    }
    #[tokio::test]
    async fn test_committed_report_survives_notification_lookup_failure() {
        let store = Arc::new(FlakyTestLookup::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = WorkflowEngine::new(store.clone(), dispatcher.clone());
        let patient = patient(&engine).await;
        let test = completed_test(&engine, patient.id).await;
        let result = engine
            .create_result(&tech(), new_result(test.id, vec![]))
            .await
            .unwrap();
        engine.review_result(result.id, &doctor(), None).await.unwrap();
        engine.approve_result(result.id, &doctor(), None).await.unwrap();

        store.fail_test_lookup.store(true, Ordering::SeqCst);
        let reported = engine.report_result(result.id, &doctor()).await.unwrap();
        assert_eq!(reported.status, ResultStatus::Reported);
        assert!(dispatcher.kinds().is_empty());

        let request = AmendRequest {
            reason: "transcription error".to_string(),
            test_values: Some(critical_values()),
            interpretation: None,
        };
        let amended = engine.amend_result(result.id, &tech(), request).await.unwrap();
        assert_eq!(amended.overall_status, OverallStatus::Critical);

        let stored = engine.get_result(result.id).await.unwrap();
        assert_eq!(stored.amendments.len(), 1);
        assert_eq!(stored.version, amended.version);
    }

    #[tokio::test]
    async fn test_critical_alert_only_when_critical_values_change() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = engine_with(dispatcher.clone());
        let patient = patient(&engine).await;
        let test = completed_test(&engine, patient.id).await;
        let result = engine
            .create_result(&tech(), new_result(test.id, critical_values()))
            .await
            .unwrap();
        assert_eq!(dispatcher.kinds().len(), 2);

        let update = ResultUpdate {
            recommendations: Some("repeat in 2h".to_string()),
            ..Default::default()
        };
        engine.update_result(result.id, &tech(), update).await.unwrap();
        assert_eq!(dispatcher.kinds().len(), 2);

        let update = ResultUpdate {
            test_values: Some(vec![
                TestValue::new("K+", "7.4", ResultFlag::CriticalHigh),
                TestValue::new("Na+", "140", ResultFlag::Normal),
            ]),
            ..Default::default()
        };
        engine.update_result(result.id, &tech(), update).await.unwrap();
        assert_eq!(dispatcher.kinds().len(), 4);

        // 非危急结果变为危急时提醒
        let second = completed_test(&engine, patient.id).await;
        let normal = engine
            .create_result(&tech(), new_result(second.id, vec![]))
            .await
            .unwrap();
        assert_eq!(dispatcher.kinds().len(), 4);
        let update = ResultUpdate {
            test_values: Some(critical_values()),
            ..Default::default()
        };
        engine.update_result(normal.id, &tech(), update).await.unwrap();
        assert_eq!(dispatcher.kinds().len(), 6);
    }

    #[tokio::test]
    async fn test_batch_approve_only_touches_reviewed_results() {
        let engine = engine_with(Arc::default());
        let patient = patient(&engine).await;

        let mut reviewed = Vec::new();
        for _ in 0..2 {
            let test = completed_test(&engine, patient.id).await;
            let result = engine
                .create_result(&tech(), new_result(test.id, vec![]))
                .await
                .unwrap();
            engine.review_result(result.id, &doctor(), None).await.unwrap();
            reviewed.push(result.id);
        }
        let test = completed_test(&engine, patient.id).await;
        let draft = engine
            .create_result(&tech(), new_result(test.id, vec![]))
            .await
            .unwrap();

        let manager = Actor::new("manager-1", UserRole::Manager);
        let request = BatchApproveRequest {
            result_ids: vec![reviewed[0], reviewed[1], reviewed[0], draft.id, Uuid::new_v4()],
            approval_comments: Some("batch sign-off".to_string()),
        };
        let outcome = engine.batch_approve(&manager, request.clone()).await.unwrap();
        assert_eq!(
            outcome,
            BatchOutcome {
                matched_count: 2,
                modified_count: 2
            }
        );

        for id in &reviewed {
            let stored = engine.get_result(*id).await.unwrap();
            assert_eq!(stored.status, ResultStatus::Approved);
            assert_eq!(stored.approved_by.as_deref(), Some("manager-1"));
            assert_eq!(stored.approval_comments.as_deref(), Some("batch sign-off"));
        }
        let stored = engine.get_result(draft.id).await.unwrap();
        assert_eq!(stored.status, ResultStatus::Draft);

        let again = engine.batch_approve(&manager, request).await.unwrap();
        assert_eq!(again.matched_count, 0);

        let empty = BatchApproveRequest::default();
        let err = engine.batch_approve(&manager, empty).await.unwrap_err();
        assert!(matches!(err, LisError::Validation(_)));
    }
}
