//! 会话状态：一次提问对应一个 ConversationState，逐步按值传递（owned-in / owned-out）
//!
//! 约束都收在类型里：
//! - question / profile 构造后只读
//! - 每个专家的结果槽只能写一次（CheckSlot）
//! - evidence_chain / query_log 只追加
//! - iterations 只增不减
//! - final_answer 只能设置一次

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::error::StateError;
use crate::core::report::{CheckKind, DeficiencyReport, RecommendationReport, SafetyReport};

// ---------------------------------------------------------------------------
// Profile / entities
// ---------------------------------------------------------------------------

/// 调用方提供的健康档案
///
/// 各字段接受字符串列表、逗号分隔字符串，或带 `drug_name` / `supplement_name` / `name` 的对象列表。
/// `diet` 是 `dietary_restrictions` 的别名。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    #[serde(default, deserialize_with = "flexible_names")]
    pub medications: Vec<String>,
    #[serde(default, deserialize_with = "flexible_names")]
    pub supplements: Vec<String>,
    #[serde(default, deserialize_with = "flexible_names")]
    pub conditions: Vec<String>,
    #[serde(default, alias = "diet", deserialize_with = "flexible_names")]
    pub dietary_restrictions: Vec<String>,
}

impl PatientProfile {
    pub fn is_empty(&self) -> bool {
        self.medications.is_empty()
            && self.supplements.is_empty()
            && self.conditions.is_empty()
            && self.dietary_restrictions.is_empty()
    }
}

fn flexible_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(names_from_value(&value))
}

/// 把任意形态的名字字段摊平为非空、已 trim 的字符串列表
pub fn names_from_value(value: &Value) -> Vec<String> {
    const NAME_KEYS: [&str; 6] = [
        "drug_name",
        "supplement_name",
        "name",
        "matched_name",
        "matched_drug",
        "user_input",
    ];
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(map) => NAME_KEYS
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .map(|s| s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// 从问题中抽取的原始实体
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    #[serde(default, deserialize_with = "flexible_names")]
    pub medications: Vec<String>,
    #[serde(default, deserialize_with = "flexible_names")]
    pub supplements: Vec<String>,
    #[serde(default, alias = "symptoms", deserialize_with = "flexible_names")]
    pub conditions: Vec<String>,
    #[serde(default, alias = "diet", deserialize_with = "flexible_names")]
    pub dietary_restrictions: Vec<String>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.medications.is_empty()
            && self.supplements.is_empty()
            && self.conditions.is_empty()
            && self.dietary_restrictions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Medication,
    Supplement,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Medication => f.write_str("medication"),
            EntityKind::Supplement => f.write_str("supplement"),
        }
    }
}

/// 规范化匹配质量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    High,
    Ambiguous,
    NotFound,
}

/// AMBIGUOUS 时的候选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub canonical_id: String,
    pub name: String,
    /// 命中途径（品牌名 / 同义词 / 部分匹配的原文）
    pub via: Option<String>,
}

/// 规范化结果：HIGH 带 canonical_id，AMBIGUOUS 带 candidates，NOT_FOUND 两者皆无
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEntity {
    pub kind: EntityKind,
    /// 实际用于匹配的名字（经拼写纠正时为纠正后的名字）
    pub user_input: String,
    pub matched_name: Option<String>,
    pub canonical_id: Option<String>,
    pub confidence_tier: ConfidenceTier,
    pub match_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
    /// 经拼写纠正命中时的原始输入
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_from: Option<String>,
}

impl NormalizedEntity {
    pub fn high(
        kind: EntityKind,
        user_input: impl Into<String>,
        matched_name: impl Into<String>,
        canonical_id: impl Into<String>,
        match_type: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            user_input: user_input.into(),
            matched_name: Some(matched_name.into()),
            canonical_id: Some(canonical_id.into()),
            confidence_tier: ConfidenceTier::High,
            match_type: match_type.into(),
            candidates: Vec::new(),
            corrected_from: None,
        }
    }

    pub fn ambiguous(
        kind: EntityKind,
        user_input: impl Into<String>,
        candidates: Vec<Candidate>,
        match_type: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            user_input: user_input.into(),
            matched_name: None,
            canonical_id: None,
            confidence_tier: ConfidenceTier::Ambiguous,
            match_type: match_type.into(),
            candidates,
            corrected_from: None,
        }
    }

    pub fn not_found(kind: EntityKind, user_input: impl Into<String>) -> Self {
        Self {
            kind,
            user_input: user_input.into(),
            matched_name: None,
            canonical_id: None,
            confidence_tier: ConfidenceTier::NotFound,
            match_type: "none".to_string(),
            candidates: Vec::new(),
            corrected_from: None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.confidence_tier == ConfidenceTier::Ambiguous
    }

    /// 下游查询用的名字：命中名优先，否则原始输入
    pub fn display_name(&self) -> &str {
        self.matched_name.as_deref().unwrap_or(&self.user_input)
    }

    /// 规范化身份：有 canonical_id 用 id，否则用小写输入
    pub fn identity(&self) -> (EntityKind, String) {
        match &self.canonical_id {
            Some(id) => (self.kind, id.clone()),
            None => (self.kind, self.user_input.to_lowercase()),
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Supervisor 每次调用产出的决策（封闭枚举，Router 对其穷尽匹配）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Clarify,
    CheckSafety,
    CheckDeficiency,
    GetRecommendations,
    NeedMoreEvidence,
    Synthesize,
}

impl Decision {
    pub const ALL: [Decision; 6] = [
        Decision::Clarify,
        Decision::CheckSafety,
        Decision::CheckDeficiency,
        Decision::GetRecommendations,
        Decision::NeedMoreEvidence,
        Decision::Synthesize,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Decision::Clarify => "clarify",
            Decision::CheckSafety => "check_safety",
            Decision::CheckDeficiency => "check_deficiency",
            Decision::GetRecommendations => "get_recommendations",
            Decision::NeedMoreEvidence => "need_more_evidence",
            Decision::Synthesize => "synthesize",
        }
    }

    /// 字符串 token 解析（含历史别名）；未知 token 返回 None
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "clarify" => Some(Decision::Clarify),
            "check_safety" => Some(Decision::CheckSafety),
            "check_deficiency" => Some(Decision::CheckDeficiency),
            "get_recommendations" | "check_recommendations" => Some(Decision::GetRecommendations),
            "need_more_evidence" | "loop_back" => Some(Decision::NeedMoreEvidence),
            "synthesize" | "finish" => Some(Decision::Synthesize),
            _ => None,
        }
    }

    /// 该决策对应的专家检查
    pub fn check(&self) -> Option<CheckKind> {
        match self {
            Decision::CheckSafety => Some(CheckKind::Safety),
            Decision::CheckDeficiency => Some(CheckKind::Deficiency),
            Decision::GetRecommendations => Some(CheckKind::Recommendation),
            Decision::Clarify | Decision::NeedMoreEvidence | Decision::Synthesize => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ---------------------------------------------------------------------------
// Write-once slot / append-only log
// ---------------------------------------------------------------------------

/// 只写一次的结果槽：checked ⇔ 有值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckSlot<T>(Option<T>);

impl<T> Default for CheckSlot<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> CheckSlot<T> {
    pub fn is_checked(&self) -> bool {
        self.0.is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    fn fill(&mut self, kind: CheckKind, value: T) -> Result<(), StateError> {
        if self.0.is_some() {
            return Err(StateError::SlotAlreadyFilled(kind));
        }
        self.0 = Some(value);
        Ok(())
    }
}

/// 只追加的审计日志
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceChain(Vec<String>);

impl EvidenceChain {
    pub fn push(&mut self, entry: impl Into<String>) {
        self.0.push(entry.into());
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

/// 一次图查询的记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub kind: String,
    pub row_count: usize,
    pub success: bool,
}

// ---------------------------------------------------------------------------
// ConversationState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    question: String,
    profile: PatientProfile,

    pub entities_extracted: bool,
    pub extracted_entities: ExtractedEntities,
    pub normalized_medications: Vec<NormalizedEntity>,
    pub normalized_supplements: Vec<NormalizedEntity>,
    pub normalized_dietary_restrictions: Vec<String>,

    safety: CheckSlot<SafetyReport>,
    deficiency: CheckSlot<DeficiencyReport>,
    recommendation: CheckSlot<RecommendationReport>,

    pub supervisor_decision: Option<Decision>,
    pub supervisor_reasoning: Option<String>,
    iterations: u32,
    confidence_level: f64,

    pub evidence_chain: EvidenceChain,
    query_log: Vec<QueryRecord>,

    pub clarification_requested: bool,
    pub error_message: Option<String>,
    final_answer: Option<String>,
}

impl ConversationState {
    pub fn new(question: impl Into<String>, profile: PatientProfile) -> Self {
        Self {
            question: question.into(),
            profile,
            entities_extracted: false,
            extracted_entities: ExtractedEntities::default(),
            normalized_medications: Vec::new(),
            normalized_supplements: Vec::new(),
            normalized_dietary_restrictions: Vec::new(),
            safety: CheckSlot::default(),
            deficiency: CheckSlot::default(),
            recommendation: CheckSlot::default(),
            supervisor_decision: None,
            supervisor_reasoning: None,
            iterations: 0,
            confidence_level: 0.0,
            evidence_chain: EvidenceChain::default(),
            query_log: Vec::new(),
            clarification_requested: false,
            error_message: None,
            final_answer: None,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn profile(&self) -> &PatientProfile {
        &self.profile
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Supervisor 每次调用 +1
    pub fn bump_iterations(&mut self) -> u32 {
        self.iterations = self.iterations.saturating_add(1);
        self.iterations
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn query_log(&self) -> &[QueryRecord] {
        &self.query_log
    }

    pub fn log_query(&mut self, kind: impl Into<String>, row_count: usize, success: bool) {
        self.query_log.push(QueryRecord {
            kind: kind.into(),
            row_count,
            success,
        });
    }

    // ---- specialist slots ----

    pub fn safety(&self) -> Option<&SafetyReport> {
        self.safety.get()
    }

    pub fn deficiency(&self) -> Option<&DeficiencyReport> {
        self.deficiency.get()
    }

    pub fn recommendation(&self) -> Option<&RecommendationReport> {
        self.recommendation.get()
    }

    pub fn is_checked(&self, kind: CheckKind) -> bool {
        match kind {
            CheckKind::Safety => self.safety.is_checked(),
            CheckKind::Deficiency => self.deficiency.is_checked(),
            CheckKind::Recommendation => self.recommendation.is_checked(),
        }
    }

    pub fn record_safety(&mut self, report: SafetyReport) -> Result<(), StateError> {
        let confidence = report.confidence;
        self.safety.fill(CheckKind::Safety, report)?;
        self.merge_confidence(confidence);
        Ok(())
    }

    pub fn record_deficiency(&mut self, report: DeficiencyReport) -> Result<(), StateError> {
        let confidence = report.confidence;
        self.deficiency.fill(CheckKind::Deficiency, report)?;
        self.merge_confidence(confidence);
        Ok(())
    }

    pub fn record_recommendation(
        &mut self,
        report: RecommendationReport,
    ) -> Result<(), StateError> {
        let confidence = report.confidence;
        self.recommendation
            .fill(CheckKind::Recommendation, report)?;
        self.merge_confidence(confidence);
        Ok(())
    }

    /// 已完成专家的 (种类, 置信度)，按 safety / deficiency / recommendation 顺序
    pub fn completed_confidences(&self) -> Vec<(CheckKind, f64)> {
        let mut out = Vec::with_capacity(3);
        if let Some(r) = self.safety.get() {
            out.push((CheckKind::Safety, r.confidence));
        }
        if let Some(r) = self.deficiency.get() {
            out.push((CheckKind::Deficiency, r.confidence));
        }
        if let Some(r) = self.recommendation.get() {
            out.push((CheckKind::Recommendation, r.confidence));
        }
        out
    }

    /// 保守合并：首个完成的专家直接采用其置信度，之后取最小值
    fn merge_confidence(&mut self, incoming: f64) {
        let incoming = incoming.clamp(0.0, 1.0);
        self.confidence_level = if self.completed_confidences().len() <= 1 {
            incoming
        } else {
            self.confidence_level.min(incoming)
        };
    }

    /// 由全部已完成结果重新计算（算术平均，无结果为 0.0）
    pub fn recompute_confidence(&mut self) -> f64 {
        self.confidence_level = mean_confidence(&self.completed_confidences());
        self.confidence_level
    }

    // ---- final answer ----

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    pub fn set_final_answer(&mut self, answer: impl Into<String>) -> Result<(), StateError> {
        if self.final_answer.is_some() {
            return Err(StateError::FinalAnswerAlreadySet);
        }
        self.final_answer = Some(answer.into());
        Ok(())
    }

    // ---- entities ----

    /// 追加规范化结果；与已有条目规范化身份相同时跳过，返回是否追加
    pub fn push_normalized(&mut self, entity: NormalizedEntity) -> bool {
        let list = match entity.kind {
            EntityKind::Medication => &mut self.normalized_medications,
            EntityKind::Supplement => &mut self.normalized_supplements,
        };
        let identity = entity.identity();
        if list.iter().any(|e| e.identity() == identity) {
            return false;
        }
        list.push(entity);
        true
    }

    pub fn normalized_entities(&self) -> impl Iterator<Item = &NormalizedEntity> {
        self.normalized_medications
            .iter()
            .chain(self.normalized_supplements.iter())
    }

    pub fn has_ambiguous_entities(&self) -> bool {
        self.normalized_entities().any(NormalizedEntity::is_ambiguous)
    }

    /// 补充剂名：规范化结果 ∪ 问题抽取 ∪ 档案（大小写不敏感去重，保留首次出现）
    pub fn supplement_names(&self) -> Vec<String> {
        dedup_names(
            self.normalized_supplements
                .iter()
                .map(|e| e.display_name().to_string())
                .chain(self.extracted_entities.supplements.iter().cloned())
                .chain(self.profile.supplements.iter().cloned()),
        )
    }

    /// 用药名：规范化结果 ∪ 问题抽取 ∪ 档案
    pub fn medication_names(&self) -> Vec<String> {
        dedup_names(
            self.normalized_medications
                .iter()
                .map(|e| e.display_name().to_string())
                .chain(self.extracted_entities.medications.iter().cloned())
                .chain(self.profile.medications.iter().cloned()),
        )
    }

    /// 饮食限制：问题抽取 ∪ 档案
    pub fn dietary_restrictions(&self) -> Vec<String> {
        dedup_names(
            self.normalized_dietary_restrictions
                .iter()
                .cloned()
                .chain(self.profile.dietary_restrictions.iter().cloned()),
        )
    }
}

/// 大小写不敏感去重，保留首次出现的写法
pub fn dedup_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && seen.insert(n.to_lowercase()))
        .collect()
}

/// 置信度均值；空集为 0.0
pub fn mean_confidence(values: &[(CheckKind, f64)]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|(_, c)| c).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::{
        DeficiencyVerdict, RecommendationVerdict, SafetyVerdict,
    };
    use std::collections::BTreeMap;

    fn safety(confidence: f64) -> SafetyReport {
        SafetyReport {
            safe: true,
            interactions: vec![],
            confidence,
            verdict: SafetyVerdict::Safe,
            supplements_checked: vec![],
            medications_checked: vec![],
            failed_checks: 0,
        }
    }

    fn deficiency(confidence: f64) -> DeficiencyReport {
        DeficiencyReport {
            verdict: DeficiencyVerdict::NothingToCheck,
            findings: vec![],
            nutrient_sources: BTreeMap::new(),
            critical_overlaps: vec![],
            total_count: 0,
            confidence,
            failed_queries: 0,
            suggestions: vec![],
        }
    }

    fn recommendation(confidence: f64) -> RecommendationReport {
        RecommendationReport {
            verdict: RecommendationVerdict::NoCondition,
            condition: None,
            recommendations: vec![],
            safe_count: 0,
            unsafe_count: 0,
            medications_checked: vec![],
            confidence,
        }
    }

    #[test]
    fn test_profile_accepts_flexible_shapes() {
        let profile: PatientProfile = serde_json::from_value(serde_json::json!({
            "medications": "Warfarin, Metformin ,",
            "supplements": [{"supplement_name": "Fish oil"}, "CoQ10"],
            "diet": ["Vegan"]
        }))
        .expect("profile");
        assert_eq!(profile.medications, vec!["Warfarin", "Metformin"]);
        assert_eq!(profile.supplements, vec!["Fish oil", "CoQ10"]);
        assert_eq!(profile.dietary_restrictions, vec!["Vegan"]);
        assert!(profile.conditions.is_empty());
    }

    #[test]
    fn test_slot_is_write_once() {
        let mut state = ConversationState::new("q", PatientProfile::default());
        assert!(!state.is_checked(CheckKind::Safety));
        state.record_safety(safety(0.9)).expect("first write");
        assert!(state.is_checked(CheckKind::Safety));
        assert_eq!(
            state.record_safety(safety(0.1)),
            Err(StateError::SlotAlreadyFilled(CheckKind::Safety))
        );
        assert_eq!(state.safety().map(|r| r.confidence), Some(0.9));
    }

    #[test]
    fn test_merge_is_conservative_and_recompute_idempotent() {
        let mut state = ConversationState::new("q", PatientProfile::default());
        state.record_safety(safety(0.9)).expect("safety");
        assert!((state.confidence_level() - 0.9).abs() < 1e-9);
        state.record_deficiency(deficiency(0.7)).expect("deficiency");
        assert!((state.confidence_level() - 0.7).abs() < 1e-9);
        state.record_recommendation(recommendation(0.8)).expect("rec");
        assert!((state.confidence_level() - 0.7).abs() < 1e-9);

        let max_input = 0.9;
        assert!(state.confidence_level() <= max_input);

        let first = state.recompute_confidence();
        let second = state.recompute_confidence();
        assert_eq!(first, second);
        assert!((first - 0.8).abs() < 1e-9);
        assert!(first <= max_input);
    }

    #[test]
    fn test_final_answer_set_once() {
        let mut state = ConversationState::new("q", PatientProfile::default());
        state.set_final_answer("done").expect("first");
        assert!(state.set_final_answer("again").is_err());
        assert_eq!(state.final_answer(), Some("done"));
    }

    #[test]
    fn test_push_normalized_dedups_by_identity() {
        let mut state = ConversationState::new("q", PatientProfile::default());
        let warfarin =
            NormalizedEntity::high(EntityKind::Medication, "warfarin", "Warfarin", "DB00682", "exact_drug_name");
        let coumadin =
            NormalizedEntity::high(EntityKind::Medication, "Coumadin", "Warfarin", "DB00682", "brand_name");
        assert!(state.push_normalized(warfarin));
        assert!(!state.push_normalized(coumadin));
        assert!(state.push_normalized(NormalizedEntity::not_found(EntityKind::Medication, "blood thinner")));
        assert!(!state.push_normalized(NormalizedEntity::not_found(EntityKind::Medication, "Blood Thinner")));
        assert_eq!(state.normalized_medications.len(), 2);
    }

    #[test]
    fn test_name_gathering_merges_sources() {
        let profile = PatientProfile {
            supplements: vec!["fish oil".into(), "Iron".into()],
            ..Default::default()
        };
        let mut state = ConversationState::new("q", profile);
        state.push_normalized(NormalizedEntity::high(
            EntityKind::Supplement,
            "fish oil",
            "Fish Oil",
            "S07",
            "exact_supplement_name",
        ));
        state.extracted_entities.supplements = vec!["Fish Oil".into(), "Zinc".into()];
        assert_eq!(state.supplement_names(), vec!["Fish Oil", "Zinc", "Iron"]);
    }

    #[test]
    fn test_decision_tokens() {
        for d in Decision::ALL {
            assert_eq!(Decision::from_token(d.token()), Some(d));
        }
        assert_eq!(Decision::from_token("finish"), Some(Decision::Synthesize));
        assert_eq!(Decision::from_token("loop_back"), Some(Decision::NeedMoreEvidence));
        assert_eq!(Decision::from_token("dance"), None);
    }
}
