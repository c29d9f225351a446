//! 状态机
//!
//! 检验与结果的状态转换表。转换规则以 (当前状态, 事件) → 目标状态 的形式登记，
//! 未登记的组合一律视为非法转换。

use lis_core::{ResultStatus, TestStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// 检验状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestEvent {
    Collect,
    Process,
    Complete,
    Cancel,
}

impl TestEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestEvent::Collect => "collect",
            TestEvent::Process => "process",
            TestEvent::Complete => "complete",
            TestEvent::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for TestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结果状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResultEvent {
    Review,
    Approve,
    Report,
    Amend,
}

impl ResultEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultEvent::Review => "review",
            ResultEvent::Approve => "approve",
            ResultEvent::Report => "report",
            ResultEvent::Amend => "amend",
        }
    }
}

impl std::fmt::Display for ResultEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通用状态机
#[derive(Debug, Clone)]
pub struct StateMachine<S, E> {
    transitions: HashMap<(S, E), S>,
}

impl<S, E> StateMachine<S, E>
where
    S: Copy + Eq + Hash,
    E: Copy + Eq + Hash,
{
    /// 由转换规则创建状态机
    pub fn new(rules: impl IntoIterator<Item = (S, E, S)>) -> Self {
        let transitions = rules
            .into_iter()
            .map(|(from, event, to)| ((from, event), to))
            .collect();
        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: S, event: E) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 目标状态，非法转换返回 `None`
    pub fn transition(&self, from: S, event: E) -> Option<S> {
        self.transitions.get(&(from, event)).copied()
    }

    /// 获取状态的所有可能事件
    pub fn possible_events(&self, current: S) -> Vec<E> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect()
    }
}

pub type TestStateMachine = StateMachine<TestStatus, TestEvent>;
pub type ResultStateMachine = StateMachine<ResultStatus, ResultEvent>;

impl TestStateMachine {
    /// ordered → collected → processing → completed，未结束的检验均可取消
    pub fn for_tests() -> Self {
        let mut rules = vec![
            (TestStatus::Ordered, TestEvent::Collect, TestStatus::Collected),
            (TestStatus::Collected, TestEvent::Process, TestStatus::Processing),
            (TestStatus::Processing, TestEvent::Complete, TestStatus::Completed),
        ];
        rules.extend(
            TestStatus::ALL
                .iter()
                .filter(|status| !status.is_terminal())
                .map(|status| (*status, TestEvent::Cancel, TestStatus::Cancelled)),
        );
        Self::new(rules)
    }
}

impl ResultStateMachine {
    /// draft → reviewed → approved → reported；修订不改变 reported 状态
    pub fn for_results() -> Self {
        Self::new([
            (ResultStatus::Draft, ResultEvent::Review, ResultStatus::Reviewed),
            (ResultStatus::Reviewed, ResultEvent::Approve, ResultStatus::Approved),
            (ResultStatus::Approved, ResultEvent::Report, ResultStatus::Reported),
            (ResultStatus::Reported, ResultEvent::Amend, ResultStatus::Reported),
        ])
    }
}
