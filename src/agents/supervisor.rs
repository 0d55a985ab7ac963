//! Supervisor：每次调用产出一个 Decision
//!
//! 1. 首次调用时抽取并规范化实体（只做一次）
//! 2. 请推理服务判断需要哪些检查，解析失败默认只做安全检查
//! 3. 统计已完成 / 待完成的检查，重算置信度
//! 4. 按固定优先级决策：clarify -> 待完成检查 -> need_more_evidence -> synthesize
//! 5. iterations +1，决策与理由写入证据链
//!
//! 本层不做重试；重试只在 LLM / 图存储客户端层。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agents::extractor::EntityExtractor;
use crate::agents::normalizer::EntityNormalizer;
use crate::core::state::dedup_names;
use crate::core::{CheckKind, ConversationState, Decision, EntityKind, WorkflowError};
use crate::llm::json::parse_lenient;
use crate::llm::LlmClient;

pub const DEFAULT_REQUIREMENTS_MAX_TOKENS: u32 = 500;

/// 需求分析 prompt 的固定开头
pub const REQUIREMENTS_PROMPT_HEADER: &str =
    "Analyze this user question and determine what they need:";

/// Supervisor 的决策阈值
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub confidence_threshold: f64,
    /// need_more_evidence 只在 iterations 小于该值时给出
    pub evidence_loop_limit: u32,
    pub requirements_max_tokens: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            evidence_loop_limit: 3,
            requirements_max_tokens: DEFAULT_REQUIREMENTS_MAX_TOKENS,
        }
    }
}

/// 推理服务给出的检查需求
///
/// 三个开关至少要出现一个，否则整体视为无法解析（调用方退回 safety_only）；
/// 缺省的单个开关按 false 处理。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRequirements")]
pub struct Requirements {
    pub needs_safety_check: bool,
    pub needs_deficiency_check: bool,
    pub needs_recommendations: bool,
    pub reasoning: String,
}

#[derive(Deserialize)]
struct RawRequirements {
    #[serde(default, alias = "needs_safety")]
    needs_safety_check: Option<bool>,
    #[serde(default, alias = "needs_deficiency")]
    needs_deficiency_check: Option<bool>,
    #[serde(default, alias = "needs_recommendation")]
    needs_recommendations: Option<bool>,
    #[serde(default)]
    reasoning: String,
}

impl TryFrom<RawRequirements> for Requirements {
    type Error = String;

    fn try_from(raw: RawRequirements) -> Result<Self, Self::Error> {
        if raw.needs_safety_check.is_none()
            && raw.needs_deficiency_check.is_none()
            && raw.needs_recommendations.is_none()
        {
            return Err("no requirement flags present".to_string());
        }
        Ok(Self {
            needs_safety_check: raw.needs_safety_check.unwrap_or(false),
            needs_deficiency_check: raw.needs_deficiency_check.unwrap_or(false),
            needs_recommendations: raw.needs_recommendations.unwrap_or(false),
            reasoning: raw.reasoning,
        })
    }
}

impl Requirements {
    /// 解析失败时的保守默认：只做安全检查
    pub fn safety_only() -> Self {
        Self {
            needs_safety_check: true,
            needs_deficiency_check: false,
            needs_recommendations: false,
            reasoning: "Could not parse LLM intent, defaulting to safety check".to_string(),
        }
    }

    /// 按固定顺序列出需要的检查
    pub fn required(&self) -> Vec<CheckKind> {
        [
            (self.needs_safety_check, CheckKind::Safety),
            (self.needs_deficiency_check, CheckKind::Deficiency),
            (self.needs_recommendations, CheckKind::Recommendation),
        ]
        .into_iter()
        .filter_map(|(needed, kind)| needed.then_some(kind))
        .collect()
    }
}

/// 决策输入（纯数据，便于单测）
#[derive(Debug, Clone)]
pub struct Progress {
    pub pending: Vec<CheckKind>,
    pub confidence: f64,
    pub needs_clarification: bool,
    /// 本次调用前的 iterations
    pub iterations: u32,
}

/// 首个命中的规则胜出
pub fn decide(progress: &Progress, settings: &SupervisorSettings) -> (Decision, String) {
    if progress.needs_clarification {
        return (
            Decision::Clarify,
            "Entities are ambiguous and need user clarification".to_string(),
        );
    }
    if let Some(kind) = progress.pending.first() {
        return match kind {
            CheckKind::Safety => (
                Decision::CheckSafety,
                "Safety check needed based on question analysis".to_string(),
            ),
            CheckKind::Deficiency => (
                Decision::CheckDeficiency,
                "Deficiency analysis needed based on question analysis".to_string(),
            ),
            CheckKind::Recommendation => (
                Decision::GetRecommendations,
                "Recommendations requested by user".to_string(),
            ),
        };
    }
    if progress.confidence < settings.confidence_threshold
        && progress.iterations < settings.evidence_loop_limit
    {
        return (
            Decision::NeedMoreEvidence,
            format!(
                "Confidence too low ({:.2}), need more investigation",
                progress.confidence
            ),
        );
    }
    if progress.confidence < settings.confidence_threshold {
        return (
            Decision::Synthesize,
            format!(
                "Evidence loop limit reached at low confidence ({:.2}), synthesizing anyway",
                progress.confidence
            ),
        );
    }
    (
        Decision::Synthesize,
        "All required checks complete with sufficient confidence".to_string(),
    )
}

pub struct Supervisor {
    llm: Arc<dyn LlmClient>,
    extractor: EntityExtractor,
    normalizer: EntityNormalizer,
    settings: SupervisorSettings,
}

impl Supervisor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        extractor: EntityExtractor,
        normalizer: EntityNormalizer,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            llm,
            extractor,
            normalizer,
            settings,
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// 一次 Supervisor 调用
    pub async fn step(&self, mut state: ConversationState) -> ConversationState {
        if !state.entities_extracted {
            if let Err(e) = self.extract_entities(&mut state).await {
                tracing::error!("Entity extraction failed: {}", e);
                let reasoning = format!("Cannot continue: {}", e);
                state.error_message = Some(e.to_string());
                return self.commit(state, Decision::Synthesize, reasoning);
            }
        }

        let requirements = self.analyze_requirements(&state).await;
        state.evidence_chain.push(format!(
            "Requirements: safety={}, deficiency={}, recommendations={} ({})",
            requirements.needs_safety_check,
            requirements.needs_deficiency_check,
            requirements.needs_recommendations,
            requirements.reasoning
        ));

        let confidence = state.recompute_confidence();
        let progress = Progress {
            pending: requirements
                .required()
                .into_iter()
                .filter(|k| !state.is_checked(*k))
                .collect(),
            confidence,
            needs_clarification: state.has_ambiguous_entities() && !state.clarification_requested,
            iterations: state.iterations(),
        };
        let (decision, reasoning) = decide(&progress, &self.settings);
        self.commit(state, decision, reasoning)
    }

    fn commit(
        &self,
        mut state: ConversationState,
        decision: Decision,
        reasoning: String,
    ) -> ConversationState {
        let iteration = state.bump_iterations();
        tracing::info!(
            "Supervisor decision [iteration {}]: {} ({})",
            iteration,
            decision,
            reasoning
        );
        state.evidence_chain.push(format!(
            "Supervisor [iteration {}]: {} - {}",
            iteration, decision, reasoning
        ));
        state.supervisor_decision = Some(decision);
        state.supervisor_reasoning = Some(reasoning);
        state
    }

    /// 抽取 + 规范化；推理服务调用失败或图查询失败返回错误
    async fn extract_entities(&self, state: &mut ConversationState) -> Result<(), WorkflowError> {
        let extracted = match self.extractor.extract(state.question()).await? {
            Some(entities) => entities,
            None => {
                state
                    .evidence_chain
                    .push("Entity extraction: unparseable output, continuing with profile only");
                Default::default()
            }
        };
        state.extracted_entities = extracted;

        let medications = dedup_names(
            state
                .extracted_entities
                .medications
                .iter()
                .chain(state.profile().medications.iter())
                .cloned(),
        );
        let supplements = dedup_names(
            state
                .extracted_entities
                .supplements
                .iter()
                .chain(state.profile().supplements.iter())
                .cloned(),
        );

        for (kind, names) in [
            (EntityKind::Medication, medications),
            (EntityKind::Supplement, supplements),
        ] {
            for name in names {
                match self.normalizer.normalize(&name, kind).await {
                    Ok(entity) => {
                        let kind_label = format!("normalize_{}", kind);
                        state.log_query(kind_label, entity.candidates.len(), true);
                        tracing::debug!(
                            "Normalized {} '{}' -> {:?} ({})",
                            kind,
                            name,
                            entity.confidence_tier,
                            entity.match_type
                        );
                        state.push_normalized(entity);
                    }
                    Err(e) => {
                        state.log_query(format!("normalize_{}", kind), 0, false);
                        return Err(e.into());
                    }
                }
            }
        }

        state.normalized_dietary_restrictions = dedup_names(
            state
                .extracted_entities
                .dietary_restrictions
                .iter()
                .chain(state.profile().dietary_restrictions.iter())
                .cloned(),
        );
        state.entities_extracted = true;

        let ambiguous = state.normalized_entities().filter(|e| e.is_ambiguous()).count();
        state.evidence_chain.push(format!(
            "Entities: {} medication(s), {} supplement(s), {} dietary restriction(s), {} ambiguous",
            state.normalized_medications.len(),
            state.normalized_supplements.len(),
            state.normalized_dietary_restrictions.len(),
            ambiguous
        ));
        Ok(())
    }

    fn requirements_prompt(state: &ConversationState) -> String {
        let or_none = |names: Vec<String>| {
            if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            }
        };
        format!(
            r#"{REQUIREMENTS_PROMPT_HEADER}

Question: "{question}"

User Profile:
- Medications: {medications}
- Supplements: {supplements}
- Conditions: {conditions}
- Dietary restrictions: {diet}

Determine what needs to be checked:
1. Safety check? (drug-supplement interactions)
2. Deficiency analysis? (nutrient gaps from diet/medications)
3. Supplement recommendations? (suggestions for conditions/symptoms)

Return ONLY JSON:
{{
    "needs_safety_check": true/false,
    "needs_deficiency_check": true/false,
    "needs_recommendations": true/false,
    "reasoning": "brief explanation"
}}"#,
            question = state.question(),
            medications = or_none(state.medication_names()),
            supplements = or_none(state.supplement_names()),
            conditions = or_none(dedup_names(
                state
                    .extracted_entities
                    .conditions
                    .iter()
                    .chain(state.profile().conditions.iter())
                    .cloned()
            )),
            diet = or_none(state.dietary_restrictions()),
        )
    }

    /// 需求分析；调用失败或输出无法解析时退回 safety_only
    pub async fn analyze_requirements(&self, state: &ConversationState) -> Requirements {
        let prompt = Self::requirements_prompt(state);
        match self
            .llm
            .complete_prompt(&prompt, self.settings.requirements_max_tokens)
            .await
        {
            Ok(raw) => parse_lenient::<Requirements>(&raw).unwrap_or_else(|| {
                tracing::warn!("Unparseable requirement analysis, defaulting to safety check");
                Requirements::safety_only()
            }),
            Err(e) => {
                tracing::warn!("Requirement analysis failed ({}), defaulting to safety check", e);
                Requirements::safety_only()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PatientProfile, RetryPolicy};
    use crate::graph::{InMemoryGraph, QueryExecutor};
    use crate::llm::{LlmError, MockLlmClient};

    fn progress(pending: Vec<CheckKind>, confidence: f64, iterations: u32) -> Progress {
        Progress {
            pending,
            confidence,
            needs_clarification: false,
            iterations,
        }
    }

    fn supervisor(mock: MockLlmClient) -> Supervisor {
        let llm: Arc<dyn LlmClient> = Arc::new(mock);
        let graph = InMemoryGraph::new()
            .node("DB00682", "Drug", "Warfarin")
            .node("S07", "Supplement", "Fish Oil");
        let executor = QueryExecutor::new(Arc::new(graph), RetryPolicy::none());
        Supervisor::new(
            llm.clone(),
            EntityExtractor::new(llm),
            EntityNormalizer::new(executor),
            SupervisorSettings::default(),
        )
    }

    #[test]
    fn test_decision_priority() {
        let settings = SupervisorSettings::default();
        let mut p = progress(vec![CheckKind::Deficiency, CheckKind::Recommendation], 0.0, 0);
        p.needs_clarification = true;
        assert_eq!(decide(&p, &settings).0, Decision::Clarify);

        p.needs_clarification = false;
        assert_eq!(decide(&p, &settings).0, Decision::CheckDeficiency);

        let (d, reason) = decide(&progress(vec![], 0.5, 2), &settings);
        assert_eq!(d, Decision::NeedMoreEvidence);
        assert_eq!(reason, "Confidence too low (0.50), need more investigation");

        assert_eq!(decide(&progress(vec![], 0.5, 3), &settings).0, Decision::Synthesize);
        assert_eq!(decide(&progress(vec![], 0.9, 0), &settings).0, Decision::Synthesize);
    }

    #[test]
    fn test_synthesis_rationale_reflects_confidence() {
        let settings = SupervisorSettings::default();
        let (d, reason) = decide(&progress(vec![], 0.0, 3), &settings);
        assert_eq!(d, Decision::Synthesize);
        assert!(reason.contains("at low confidence (0.00)"));
        assert!(!reason.contains("sufficient confidence"));

        let (d, reason) = decide(&progress(vec![], 0.9, 1), &settings);
        assert_eq!(d, Decision::Synthesize);
        assert_eq!(reason, "All required checks complete with sufficient confidence");
    }

    #[test]
    fn test_requirements_parse() {
        let r: Requirements = parse_lenient(
            "Sure!\n```json\n{\"needs_safety_check\": false, \"needs_recommendations\": true, \"reasoning\": \"asks for ideas\"}\n```",
        )
        .unwrap();
        assert_eq!(r.required(), vec![CheckKind::Recommendation]);
        assert_eq!(Requirements::safety_only().required(), vec![CheckKind::Safety]);
    }

    #[test]
    fn test_requirements_without_flags_is_rejected() {
        assert!(parse_lenient::<Requirements>(r#"{"reasoning": "x"}"#).is_none());
        assert!(parse_lenient::<Requirements>("{}").is_none());

        let r: Requirements = parse_lenient(r#"{"needs_deficiency": true}"#).unwrap();
        assert_eq!(r.required(), vec![CheckKind::Deficiency]);
    }

    #[tokio::test]
    async fn test_flagless_reply_falls_back_to_safety() {
        let mock = MockLlmClient::new()
            .on(
                "medical entity extraction",
                r#"{"medications": ["warfarin"], "supplements": ["fish oil"]}"#,
            )
            .on("determine what they need", r#"{"reasoning": "x"}"#);
        let sup = supervisor(mock);
        let state = sup
            .step(ConversationState::new(
                "Can I take fish oil with warfarin?",
                PatientProfile::default(),
            ))
            .await;
        assert_eq!(state.supervisor_decision, Some(Decision::CheckSafety));
    }

    #[tokio::test]
    async fn test_first_step_extracts_once_and_defaults_to_safety() {
        let mock = MockLlmClient::new()
            .on(
                "medical entity extraction",
                r#"{"medications": ["warfarin"], "supplements": ["fish oil"]}"#,
            )
            .on("determine what they need", "no idea");
        let sup = supervisor(mock);
        let profile = PatientProfile {
            medications: vec!["Warfarin".into()],
            ..Default::default()
        };
        let state = sup
            .step(ConversationState::new("Can I take fish oil with warfarin?", profile))
            .await;

        assert!(state.entities_extracted);
        assert_eq!(state.normalized_medications.len(), 1);
        assert_eq!(state.normalized_medications[0].canonical_id.as_deref(), Some("DB00682"));
        assert_eq!(state.normalized_supplements.len(), 1);
        assert_eq!(state.supervisor_decision, Some(Decision::CheckSafety));
        assert_eq!(state.iterations(), 1);

        let state = sup.step(state).await;
        assert_eq!(state.normalized_medications.len(), 1);
        assert_eq!(state.iterations(), 2);
    }

    #[tokio::test]
    async fn test_extraction_failure_forces_synthesis() {
        let mock = MockLlmClient::new().fail_on("medical entity extraction", LlmError::Timeout);
        let sup = supervisor(mock);
        let state = sup
            .step(ConversationState::new("anything", PatientProfile::default()))
            .await;
        assert!(state.error_message.is_some());
        assert_eq!(state.supervisor_decision, Some(Decision::Synthesize));
        assert!(!state.entities_extracted);
    }
}
