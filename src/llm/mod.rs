//! LLM 层：推理服务客户端抽象与实现（OpenAI 兼容 / Mock）、防御式 JSON 解析

pub mod json;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, RetryingLlmClient};
