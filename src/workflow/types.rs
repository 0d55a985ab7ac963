//! 工作流类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Router 的输出：下一步执行哪个节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    Supervisor,
    SafetyCheck,
    DeficiencyCheck,
    Recommendation,
    Clarification,
    Synthesis,
    /// 无法路由，直接结束
    End,
}

impl NextStep {
    pub fn name(&self) -> &'static str {
        match self {
            NextStep::Supervisor => "supervisor",
            NextStep::SafetyCheck => "safety_check",
            NextStep::DeficiencyCheck => "deficiency_check",
            NextStep::Recommendation => "recommendation",
            NextStep::Clarification => "clarification",
            NextStep::Synthesis => "synthesis",
            NextStep::End => "END",
        }
    }
}

impl std::fmt::Display for NextStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 工作流限额
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkflowLimits {
    /// 达到该迭代数强制进入 synthesis
    pub max_iterations: u32,
    pub evidence_loop_limit: u32,
    pub confidence_threshold: f64,
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            evidence_loop_limit: 3,
            confidence_threshold: 0.7,
        }
    }
}

/// answer() 的返回
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAnswer {
    pub run_id: String,
    pub answer: String,
    pub confidence: f64,
    pub iterations: u32,
    pub evidence_chain: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
