//! 推理服务客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete(prompt, max_tokens) -> text。
//! 服务本身不保证输出格式，结构化校验由调用方负责（见 llm::json）。
//! RetryingLlmClient 在客户端层包一层指数退避重试，决策逻辑保持无重试。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::retry::{retry_with_backoff, RetryPolicy};
use crate::llm::Message;

/// 推理服务调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("request timed out")]
    Timeout,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("empty response")]
    EmptyResponse,
}

impl LlmError {
    /// 是否值得在客户端层重试（连接/限流/超时/服务不可用）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Timeout | LlmError::Unavailable(_)
        )
    }
}

/// 推理服务客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成：messages 为完整上下文，max_tokens 为本次输出上限
    async fn complete(&self, messages: &[Message], max_tokens: u32) -> Result<String, LlmError>;

    /// 单条 user prompt 的便捷调用
    async fn complete_prompt(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        self.complete(&[Message::user(prompt)], max_tokens).await
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 带重试的客户端包装：对瞬时错误做上限指数退避
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message], max_tokens: u32) -> Result<String, LlmError> {
        let inner = &self.inner;
        retry_with_backoff(&self.policy, "llm completion", LlmError::is_transient, move || {
            inner.complete(messages, max_tokens)
        })
        .await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
