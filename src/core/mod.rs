//! 核心层：会话状态、专家结果类型、错误、调用端重试

pub mod error;
pub mod report;
pub mod retry;
pub mod state;

pub use error::{StateError, WorkflowError};
pub use report::*;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use state::{
    Candidate, CheckSlot, ConfidenceTier, ConversationState, Decision, EntityKind, EvidenceChain,
    ExtractedEntities, NormalizedEntity, PatientProfile, QueryRecord,
};
