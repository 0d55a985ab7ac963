//! Router：Decision + 状态 -> 下一步（纯函数）
//!
//! 先看覆盖规则：有 error_message 或迭代数达到上限时一律进入 synthesis；
//! 否则对封闭的 Decision 做穷尽匹配。

use crate::core::{ConversationState, Decision};
use crate::workflow::types::NextStep;

/// 决策到节点的基础映射
fn step_for(decision: Decision) -> NextStep {
    match decision {
        Decision::Clarify => NextStep::Clarification,
        Decision::CheckSafety => NextStep::SafetyCheck,
        Decision::CheckDeficiency => NextStep::DeficiencyCheck,
        Decision::GetRecommendations => NextStep::Recommendation,
        Decision::NeedMoreEvidence => NextStep::Supervisor,
        Decision::Synthesize => NextStep::Synthesis,
    }
}

fn overlay(state: &ConversationState, max_iterations: u32) -> Option<NextStep> {
    if let Some(error) = &state.error_message {
        tracing::warn!("Routing to synthesis due to error: {}", error);
        return Some(NextStep::Synthesis);
    }
    if state.iterations() >= max_iterations {
        tracing::warn!(
            "Iteration ceiling reached ({}/{}), forcing synthesis",
            state.iterations(),
            max_iterations
        );
        return Some(NextStep::Synthesis);
    }
    None
}

/// 按 state.supervisor_decision 路由；没有决策时结束
pub fn route(state: &ConversationState, max_iterations: u32) -> NextStep {
    if let Some(step) = overlay(state, max_iterations) {
        return step;
    }
    match state.supervisor_decision {
        Some(decision) => {
            let next = step_for(decision);
            tracing::debug!("Routing {} -> {}", decision, next);
            next
        }
        None => {
            tracing::warn!("No supervisor decision recorded, ending workflow");
            NextStep::End
        }
    }
}

/// 字符串 token 路由（外部输入 / 历史别名）；未知 token 结束
pub fn route_token(token: &str, state: &ConversationState, max_iterations: u32) -> NextStep {
    if let Some(step) = overlay(state, max_iterations) {
        return step;
    }
    match Decision::from_token(token) {
        Some(decision) => step_for(decision),
        None => {
            tracing::warn!("Unknown decision token '{}', ending workflow", token);
            NextStep::End
        }
    }
}
