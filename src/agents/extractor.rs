//! 实体抽取：问题文本 -> 用药 / 补充剂 / 病症 / 饮食限制
//!
//! 推理服务只负责给出 JSON；输出格式不可信，统一经 `parse_lenient` 宽松解析。

use std::sync::Arc;

use crate::core::ExtractedEntities;
use crate::llm::json::parse_lenient;
use crate::llm::{LlmClient, LlmError};

pub const DEFAULT_EXTRACTION_MAX_TOKENS: u32 = 1000;

/// 抽取 prompt 的固定开头（Mock 脚本按此匹配）
pub const EXTRACTION_PROMPT_HEADER: &str =
    "You are a medical entity extraction system. Extract structured information from user input.";

pub struct EntityExtractor {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
}

impl EntityExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            max_tokens: DEFAULT_EXTRACTION_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn prompt(question: &str) -> String {
        format!(
            r#"{EXTRACTION_PROMPT_HEADER}

User input: "{question}"

Extract:
1. Medications (including brand names, generics, misspellings)
2. Supplements (vitamins, minerals, herbs)
3. Health conditions
4. Dietary restrictions (vegan, vegetarian, keto, etc.)

Return ONLY valid JSON (no markdown, no preamble):
{{
    "medications": ["medication1", "medication2"],
    "supplements": ["supplement1"],
    "conditions": ["condition1"],
    "dietary_restrictions": ["restriction1"]
}}

If nothing found for a category, return empty array []."#
        )
    }

    /// 调用失败返回 Err；输出无法解析返回 Ok(None)
    pub async fn extract(&self, question: &str) -> Result<Option<ExtractedEntities>, LlmError> {
        let raw = self
            .llm
            .complete_prompt(&Self::prompt(question), self.max_tokens)
            .await?;
        let parsed = parse_lenient::<ExtractedEntities>(&raw);
        match &parsed {
            Some(e) => tracing::debug!(
                "Extracted {} medications, {} supplements, {} conditions, {} restrictions",
                e.medications.len(),
                e.supplements.len(),
                e.conditions.len(),
                e.dietary_restrictions.len()
            ),
            None => tracing::warn!("Entity extraction returned unparseable output"),
        }
        Ok(parsed)
    }
}
