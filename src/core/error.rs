//! 工作流错误类型
//!
//! 各层各有 thiserror 枚举（LlmError、GraphError），在这里汇总为 WorkflowError；
//! 状态约束被违反时返回 StateError。

use thiserror::Error;

use crate::core::report::CheckKind;
use crate::graph::GraphError;
use crate::llm::LlmError;

/// 会话状态约束被违反
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("{0} result already recorded")]
    SlotAlreadyFilled(CheckKind),

    #[error("final answer already set")]
    FinalAnswerAlreadySet,
}

/// 工作流运行中的错误（对外的 answer() 不会返回它，只会写入 error_message）
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid workflow configuration: {0}")]
    InvalidConfiguration(String),
}
