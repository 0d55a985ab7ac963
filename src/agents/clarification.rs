//! 歧义实体的澄清：工作流在此挂起等待外部输入
//!
//! 注入的 Clarifier 返回用户选择时，对应实体升级为 HIGH（match_type = "user_clarified"）；
//! 无回答时保持原样。无论哪种情况都标记 clarification_requested，Supervisor 不会再次询问。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Candidate, ConversationState, EntityKind, NormalizedEntity};

/// 一个待澄清的实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub kind: EntityKind,
    pub user_input: String,
    pub candidates: Vec<Candidate>,
    /// 给用户看的问题
    pub prompt: String,
}

impl ClarificationRequest {
    fn for_entity(entity: &NormalizedEntity) -> Self {
        let options = entity
            .candidates
            .iter()
            .enumerate()
            .map(|(i, c)| match &c.via {
                Some(via) => format!("{}. {} (matched '{}')", i + 1, c.name, via),
                None => format!("{}. {}", i + 1, c.name),
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            kind: entity.kind,
            user_input: entity.user_input.clone(),
            candidates: entity.candidates.clone(),
            prompt: format!(
                "\"{}\" matches several {}s. Which one did you mean?\n{}",
                entity.user_input, entity.kind, options
            ),
        }
    }
}

/// 用户的选择：候选项的 canonical_id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationResponse {
    pub canonical_id: String,
}

/// 外部输入接口
#[async_trait]
pub trait Clarifier: Send + Sync {
    async fn clarify(&self, request: &ClarificationRequest) -> Option<ClarificationResponse>;
}

/// 不提供澄清（非交互运行）
pub struct NoClarifier;

#[async_trait]
impl Clarifier for NoClarifier {
    async fn clarify(&self, request: &ClarificationRequest) -> Option<ClarificationResponse> {
        tracing::debug!("No clarifier attached, leaving '{}' ambiguous", request.user_input);
        None
    }
}

/// 预置回答（按小写 user_input 查表），测试与批处理用
#[derive(Default)]
pub struct ScriptedClarifier {
    answers: HashMap<String, String>,
    asked: Mutex<Vec<ClarificationRequest>>,
}

impl ScriptedClarifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, user_input: &str, canonical_id: &str) -> Self {
        self.answers
            .insert(user_input.to_lowercase(), canonical_id.to_string());
        self
    }

    pub fn asked(&self) -> Vec<ClarificationRequest> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Clarifier for ScriptedClarifier {
    async fn clarify(&self, request: &ClarificationRequest) -> Option<ClarificationResponse> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(request.clone());
        }
        self.answers
            .get(&request.user_input.to_lowercase())
            .map(|id| ClarificationResponse {
                canonical_id: id.clone(),
            })
    }
}

/// 按用户选择把 AMBIGUOUS 升级为 HIGH；选择不在候选中时不变
fn apply_choice(entity: &mut NormalizedEntity, response: &ClarificationResponse) -> bool {
    let Some(choice) = entity
        .candidates
        .iter()
        .find(|c| c.canonical_id == response.canonical_id)
        .cloned()
    else {
        return false;
    };
    *entity = NormalizedEntity {
        corrected_from: entity.corrected_from.take(),
        ..NormalizedEntity::high(
            entity.kind,
            entity.user_input.clone(),
            choice.name,
            choice.canonical_id,
            "user_clarified",
        )
    };
    true
}

/// 澄清后可能与已有条目同一身份，保留先出现的那个
fn drop_duplicate_identities(list: &mut Vec<NormalizedEntity>) -> usize {
    let before = list.len();
    let mut seen = HashSet::new();
    list.retain(|e| seen.insert(e.identity()));
    before - list.len()
}

/// 工作流中的澄清步骤
pub struct ClarificationStep {
    clarifier: Arc<dyn Clarifier>,
}

impl ClarificationStep {
    pub fn new(clarifier: Arc<dyn Clarifier>) -> Self {
        Self { clarifier }
    }

    pub async fn run(&self, mut state: ConversationState) -> ConversationState {
        let mut resolved = 0;
        let mut unresolved = 0;

        for list in [
            &mut state.normalized_medications,
            &mut state.normalized_supplements,
        ] {
            for entity in list.iter_mut().filter(|e| e.is_ambiguous()) {
                let request = ClarificationRequest::for_entity(entity);
                tracing::info!("Requesting clarification for '{}'", entity.user_input);
                match self.clarifier.clarify(&request).await {
                    Some(response) if apply_choice(entity, &response) => resolved += 1,
                    Some(response) => {
                        tracing::warn!(
                            "Clarification '{}' is not a candidate for '{}'",
                            response.canonical_id,
                            entity.user_input
                        );
                        unresolved += 1;
                    }
                    None => unresolved += 1,
                }
            }
            let dropped = drop_duplicate_identities(list);
            if dropped > 0 {
                tracing::debug!("Dropped {} duplicate entity(ies) after clarification", dropped);
            }
        }

        state.clarification_requested = true;
        state.evidence_chain.push(format!(
            "Clarification: {} entity(ies) resolved, {} still ambiguous",
            resolved, unresolved
        ));
        state
    }
}
