//! 审议流程中的各个角色
//!
//! - extractor / normalizer：问题 -> 实体 -> 图谱规范 id
//! - supervisor：每次调用产出一个 Decision
//! - safety / deficiency / recommendation：三个专家，各写自己的结果槽
//! - clarification：歧义实体的外部输入挂起点
//! - synthesis：终态，生成最终回答

pub mod clarification;
pub mod deficiency;
pub mod extractor;
pub mod normalizer;
pub mod recommendation;
pub mod safety;
pub mod supervisor;
pub mod synthesis;

use async_trait::async_trait;

use crate::core::{CheckKind, ConversationState};

pub use clarification::{
    ClarificationRequest, ClarificationResponse, ClarificationStep, Clarifier, NoClarifier,
    ScriptedClarifier,
};
pub use deficiency::DeficiencyAnalyzer;
pub use extractor::EntityExtractor;
pub use normalizer::EntityNormalizer;
pub use recommendation::RecommendationAdvisor;
pub use safety::SafetyChecker;
pub use supervisor::{Requirements, Supervisor, SupervisorSettings};
pub use synthesis::{SynthesisComposer, LOW_CONFIDENCE_DISCLAIMER};

/// 专家：消费状态、写入自己的结果槽后交还
///
/// 专家不返回错误；查询失败体现在结果的 verdict / confidence 上。
#[async_trait]
pub trait Specialist: Send + Sync {
    fn kind(&self) -> CheckKind;

    async fn run(&self, state: ConversationState) -> ConversationState;
}
