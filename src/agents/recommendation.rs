//! RecommendationAdvisor：病症 -> 候选补充剂 -> 逐个安全过滤 -> 排序
//!
//! 病症来源依次为：问题抽取的病症、档案病症、问题中的短语（"supplements for ..." 等）。
//! 候选先按症状查询，查不到再按长度 > 3 的词做宽泛搜索。

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::agents::safety::SafetyChecker;
use crate::agents::Specialist;
use crate::core::{
    CheckKind, ConversationState, EvidenceGrade, Interaction, RecommendationReport,
    RecommendationVerdict, RecommendedSupplement,
};
use crate::graph::{text_field, GraphQuery, QueryExecutor, Row};

pub const NO_CONDITION_CONFIDENCE: f64 = 0.7;
pub const NO_CANDIDATES_CONFIDENCE: f64 = 0.3;
const BROAD_SEARCH_LIMIT: usize = 10;

const CONDITION_PATTERNS: [&str; 7] = [
    r"supplements?\s+(?:for|that help(?: with)?)\s+([a-zA-Z\s]+?)(?:\?|$)",
    r"support\s+([a-zA-Z\s]+?)(?:\?|$)",
    r"help\s+(?:with|for)\s+([a-zA-Z\s]+?)(?:\?|$)",
    r"good\s+for\s+([a-zA-Z\s]+?)(?:\?|$)",
    r"treat\s+([a-zA-Z\s]+?)(?:\?|$)",
    r"recommend.*for\s+([a-zA-Z\s]+?)(?:\?|$)",
    r"for\s+(?:my\s+)?([a-zA-Z\s]+?)(?:\?|$)",
];

const STOP_WORDS: [&str; 10] = ["me", "my", "the", "a", "an", "that", "this", "it", "i", "you"];

fn condition_regexes() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        CONDITION_PATTERNS
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::error!("Invalid condition pattern {}: {}", p, e);
                    None
                }
            })
            .collect()
    })
}

/// 从问题文本中找病症短语；全部模式都不命中时返回 None
pub fn condition_from_question(question: &str) -> Option<String> {
    let lowered = question.to_lowercase();
    let lowered = lowered.trim();
    condition_regexes().iter().find_map(|re| {
        let symptom = re.captures(lowered)?.get(1)?.as_str().trim().trim_end_matches('.');
        (!symptom.is_empty() && !STOP_WORDS.contains(&symptom)).then(|| symptom.to_string())
    })
}

/// 病症解析顺序：抽取 -> 档案 -> 问题短语
pub fn resolve_condition(state: &ConversationState) -> Option<String> {
    state
        .extracted_entities
        .conditions
        .iter()
        .chain(state.profile().conditions.iter())
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
        .map(String::from)
        .or_else(|| condition_from_question(state.question()))
}

/// 一个待评估的候选
#[derive(Debug, Clone)]
struct CandidateSupplement {
    supplement_id: Option<String>,
    name: String,
    symptom_treated: Option<String>,
    grade: EvidenceGrade,
}

fn candidate_from_row(row: &Row) -> Option<CandidateSupplement> {
    Some(CandidateSupplement {
        name: text_field(row, "supplement")?,
        supplement_id: text_field(row, "supplement_id"),
        symptom_treated: text_field(row, "symptom"),
        grade: text_field(row, "safety_rating")
            .map(|g| EvidenceGrade::parse(&g))
            .unwrap_or(EvidenceGrade::Unknown),
    })
}

/// 有相互作用时的可读结论
fn caution_verdict(interactions: &[Interaction]) -> String {
    let high = interactions.iter().filter(|ix| ix.severity == "HIGH").count();
    let medium = interactions
        .iter()
        .filter(|ix| ix.severity == "MEDIUM" || ix.severity == "MODERATE")
        .count();
    let mut verdict = format!("CAUTION - {} interaction(s) found", interactions.len());
    if high > 0 {
        verdict.push_str(&format!(" ({} HIGH RISK)", high));
    } else if medium > 0 {
        verdict.push_str(&format!(" ({} MEDIUM RISK)", medium));
    }
    verdict
}

/// 排序：安全优先，其次证据等级 A > B > C > UNKNOWN，最后按名字
pub fn rank(recommendations: &mut [RecommendedSupplement]) {
    recommendations.sort_by(|a, b| {
        b.safe
            .cmp(&a.safe)
            .then_with(|| b.grade.score().cmp(&a.grade.score()))
            .then_with(|| a.name.cmp(&b.name))
    });
    for (i, rec) in recommendations.iter_mut().enumerate() {
        rec.rank = i + 1;
    }
}

/// 0.5 + 0.3×安全比例 + min(0.2, 0.05×A 级数)，有检查出错 −0.1；截断到 [0,1]，保留两位小数
pub fn recommendation_confidence(recommendations: &[RecommendedSupplement]) -> f64 {
    if recommendations.is_empty() {
        return NO_CANDIDATES_CONFIDENCE;
    }
    let total = recommendations.len() as f64;
    let safe = recommendations.iter().filter(|r| r.safe).count() as f64;
    let a_grades = recommendations
        .iter()
        .filter(|r| r.grade == EvidenceGrade::A)
        .count() as f64;
    let mut confidence = 0.5 + 0.3 * safe / total + (0.05 * a_grades).min(0.2);
    if recommendations.iter().any(|r| r.errored) {
        confidence -= 0.1;
    }
    (confidence.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

pub struct RecommendationAdvisor {
    executor: QueryExecutor,
    safety: SafetyChecker,
}

impl RecommendationAdvisor {
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            safety: SafetyChecker::new(executor.clone()),
            executor,
        }
    }

    async fn find_candidates(
        &self,
        condition: &str,
        state: &mut ConversationState,
    ) -> Vec<CandidateSupplement> {
        let mut rows = self
            .logged(
                GraphQuery::SupplementsForSymptom {
                    symptom: condition.to_string(),
                },
                state,
            )
            .await;

        if rows.is_empty() {
            let words: Vec<String> = condition
                .split_whitespace()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| w.chars().count() > 3)
                .collect();
            if !words.is_empty() {
                tracing::debug!("No direct match for '{}', broad search on {:?}", condition, words);
                rows = self
                    .logged(
                        GraphQuery::SupplementsForSymptomWords {
                            words,
                            limit: BROAD_SEARCH_LIMIT,
                        },
                        state,
                    )
                    .await;
            }
        }

        let mut seen = HashSet::new();
        rows.iter()
            .filter_map(candidate_from_row)
            .filter(|c| seen.insert(c.name.to_lowercase()))
            .collect()
    }

    async fn logged(&self, query: GraphQuery, state: &mut ConversationState) -> Vec<Row> {
        match self.executor.run(&query).await {
            Ok(rows) => {
                state.log_query(query.kind(), rows.len(), true);
                rows
            }
            Err(e) => {
                tracing::warn!("Candidate query {} failed: {}", query.kind(), e);
                state.log_query(query.kind(), 0, false);
                Vec::new()
            }
        }
    }

    async fn evaluate(
        &self,
        candidate: CandidateSupplement,
        medications: &[String],
        state: &mut ConversationState,
    ) -> RecommendedSupplement {
        let mut rec = RecommendedSupplement {
            rank: 0,
            supplement_id: candidate.supplement_id,
            name: candidate.name,
            symptom_treated: candidate.symptom_treated,
            grade: candidate.grade,
            safe: true,
            errored: false,
            interactions: Vec::new(),
            safety_verdict: "SAFE - No medications to check against".to_string(),
        };
        if medications.is_empty() {
            return rec;
        }

        match self.safety.check_supplement(&rec.name, medications).await {
            Ok(interactions) if interactions.is_empty() => {
                state.log_query("comprehensive_safety", 0, true);
                rec.safety_verdict = "SAFE - No interactions found".to_string();
            }
            Ok(interactions) => {
                state.log_query("comprehensive_safety", interactions.len(), true);
                rec.safe = false;
                rec.safety_verdict = caution_verdict(&interactions);
                rec.interactions = interactions;
            }
            Err(e) => {
                tracing::warn!("Safety check for candidate '{}' failed: {}", rec.name, e);
                state.log_query("comprehensive_safety", 0, false);
                rec.safe = false;
                rec.errored = true;
                rec.safety_verdict = "UNKNOWN - Query failed".to_string();
            }
        }
        rec
    }

    pub async fn advise(
        &self,
        condition: Option<String>,
        medications: &[String],
        state: &mut ConversationState,
    ) -> RecommendationReport {
        let Some(condition) = condition else {
            return RecommendationReport {
                verdict: RecommendationVerdict::NoCondition,
                condition: None,
                recommendations: Vec::new(),
                safe_count: 0,
                unsafe_count: 0,
                medications_checked: medications.to_vec(),
                confidence: NO_CONDITION_CONFIDENCE,
            };
        };

        let candidates = self.find_candidates(&condition, state).await;
        let mut recommendations = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            recommendations.push(self.evaluate(candidate, medications, state).await);
        }
        rank(&mut recommendations);

        let safe_count = recommendations.iter().filter(|r| r.safe).count();
        RecommendationReport {
            verdict: if recommendations.is_empty() {
                RecommendationVerdict::NoCandidates
            } else {
                RecommendationVerdict::Recommended
            },
            condition: Some(condition),
            safe_count,
            unsafe_count: recommendations.len() - safe_count,
            medications_checked: medications.to_vec(),
            confidence: recommendation_confidence(&recommendations),
            recommendations,
        }
    }
}

#[async_trait]
impl Specialist for RecommendationAdvisor {
    fn kind(&self) -> CheckKind {
        CheckKind::Recommendation
    }

    async fn run(&self, mut state: ConversationState) -> ConversationState {
        let condition = resolve_condition(&state);
        let medications = state.medication_names();
        tracing::info!(
            "Recommendation check: condition {:?}, filtering against {} medication(s)",
            condition,
            medications.len()
        );

        let report = self.advise(condition, &medications, &mut state).await;
        let line = match &report.condition {
            Some(condition) => format!(
                "Recommendation check: Found {} safe options for {} (filtered {} unsafe)",
                report.safe_count, condition, report.unsafe_count
            ),
            None => "Recommendation check: no condition or symptom to address".to_string(),
        };
        tracing::info!("{} (confidence {:.2})", line, report.confidence);
        state.evidence_chain.push(line);
        if let Err(e) = state.record_recommendation(report) {
            tracing::warn!("Discarding duplicate recommendation result: {}", e);
        }
        state
    }
}
