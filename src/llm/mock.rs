//! Mock 推理服务客户端（用于测试与无 API Key 时本地跑通流程）
//!
//! 按 prompt 中的关键字匹配脚本化回复；可注入失败、记录全部调用，便于断言工作流行为。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// 一条脚本规则：prompt 含 `pattern` 时返回 `reply`
#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    reply: Result<String, LlmError>,
}

/// Mock 客户端：规则按注册顺序匹配，未命中时返回默认回复
#[derive(Debug)]
pub struct MockLlmClient {
    rules: Vec<Rule>,
    default_reply: String,
    /// 前 N 次调用直接失败（测试重试）
    failures: Mutex<VecDeque<LlmError>>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: "(mock) no scripted reply".to_string(),
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// prompt 含 `pattern` 时回复 `reply`
    pub fn on(mut self, pattern: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push(Rule {
            pattern: pattern.into(),
            reply: Ok(reply.into()),
        });
        self
    }

    /// prompt 含 `pattern` 时返回错误
    pub fn fail_on(mut self, pattern: impl Into<String>, err: LlmError) -> Self {
        self.rules.push(Rule {
            pattern: pattern.into(),
            reply: Err(err),
        });
        self
    }

    /// 前 `n` 次调用（不论 prompt）返回 `err`
    pub fn fail_times(self, n: usize, err: LlmError) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.extend(std::iter::repeat(err).take(n));
        }
        self
    }

    pub fn with_default(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// 已收到的全部 prompt（按调用顺序）
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// 含 `pattern` 的调用次数
    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], _max_tokens: u32) -> Result<String, LlmError> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.clone());
        }

        if let Some(err) = self.failures.lock().ok().and_then(|mut f| f.pop_front()) {
            return Err(err);
        }

        self.rules
            .iter()
            .find(|r| prompt.contains(&r.pattern))
            .map(|r| r.reply.clone())
            .unwrap_or_else(|| Ok(self.default_reply.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_match_in_order() {
        let mock = MockLlmClient::new()
            .on("extract", "{\"a\": 1}")
            .on("extract entities", "never reached")
            .with_default("fallback");
        assert_eq!(
            mock.complete_prompt("please extract entities", 10).await,
            Ok("{\"a\": 1}".to_string())
        );
        assert_eq!(
            mock.complete_prompt("something else", 10).await,
            Ok("fallback".to_string())
        );
        assert_eq!(mock.calls_matching("extract"), 1);
    }

    #[tokio::test]
    async fn test_fail_on_pattern() {
        let mock = MockLlmClient::new().fail_on("boom", LlmError::Request("nope".into()));
        assert!(mock.complete_prompt("boom now", 10).await.is_err());
        assert!(mock.complete_prompt("calm", 10).await.is_ok());
    }
}
