//! # LIS工作流模块
//!
//! 检验与结果的工作流管理，包括：
//! - 状态机：检验和结果的状态转换规则
//! - 状态守卫：纯函数形式的状态推进、字段更新和删除校验
//! - 工作流引擎：协调存储、守卫和通知的服务层
//! - 结果通知：危急值和结果发布通知
//! - 统计分析：工作量、周转时间和仪表盘数据

pub mod analytics;
pub mod engine;
pub mod notification;
pub mod result_workflow;
pub mod state_machine;
pub mod test_workflow;

// 重新导出主要类型
pub use analytics::{
    percentage_change, CategoryTurnaround, DashboardAnalytics, PeriodComparison, ResultStats,
    TestStats, TurnaroundReport, TurnaroundSummary, WorkloadSummary,
};
pub use engine::WorkflowEngine;
pub use notification::{
    LogDispatcher, Notification, NotificationDispatcher, NotificationKind, WebhookDispatcher,
};
pub use result_workflow::{derive_overall_status, ResultWorkflow};
pub use state_machine::{ResultEvent, ResultStateMachine, StateMachine, TestEvent, TestStateMachine};
pub use test_workflow::TestWorkflow;
