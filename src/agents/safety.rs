//! SafetyChecker：补充剂 × 用药的多路径相互作用检查
//!
//! 每个补充剂跑一次 ComprehensiveSafety 查询（五条路径 UNION），结果拼接不去重。
//! 单个补充剂查询失败只计数，全部失败时给出 CHECK_FAILED。

use async_trait::async_trait;

use crate::agents::Specialist;
use crate::core::{
    CheckKind, ConversationState, Interaction, InteractionPathway, SafetyReport, SafetyVerdict,
};
use crate::graph::{text_field, GraphError, GraphQuery, QueryExecutor, Row};

/// 未发现相互作用时的置信度
pub const NO_INTERACTION_CONFIDENCE: f64 = 0.9;
/// 缺少一侧输入（无补充剂 / 无用药）时的中性置信度
pub const MISSING_INPUT_CONFIDENCE: f64 = 0.7;
pub const CHECK_FAILED_CONFIDENCE: f64 = 0.3;
const PARTIAL_FAILURE_PENALTY: f64 = 0.1;

pub struct SafetyChecker {
    executor: QueryExecutor,
}

impl SafetyChecker {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// 单个补充剂对一组用药的检查
    pub async fn check_supplement(
        &self,
        supplement: &str,
        medications: &[String],
    ) -> Result<Vec<Interaction>, GraphError> {
        let rows = self
            .executor
            .run(&GraphQuery::ComprehensiveSafety {
                supplement: supplement.to_string(),
                medications: medications.to_vec(),
            })
            .await?;
        Ok(interactions_from_rows(&rows))
    }

    /// 对全部补充剂逐一检查并汇总；同时写入 query_log
    pub async fn assess(
        &self,
        supplements: &[String],
        medications: &[String],
        state: &mut ConversationState,
    ) -> SafetyReport {
        if supplements.is_empty() || medications.is_empty() {
            return build_report(supplements, medications, Vec::new());
        }

        let mut outcomes = Vec::with_capacity(supplements.len());
        for supplement in supplements {
            let outcome = self.check_supplement(supplement, medications).await;
            match &outcome {
                Ok(found) => state.log_query("comprehensive_safety", found.len(), true),
                Err(e) => {
                    tracing::warn!("Safety query for '{}' failed: {}", supplement, e);
                    state.log_query("comprehensive_safety", 0, false);
                }
            }
            outcomes.push(outcome);
        }
        build_report(supplements, medications, outcomes)
    }
}

/// 查询行 -> Interaction；pathway 标签无法识别的行丢弃
pub fn interactions_from_rows(rows: &[Row]) -> Vec<Interaction> {
    rows.iter()
        .filter_map(|row| {
            let pathway = text_field(row, "pathway")
                .and_then(|p| InteractionPathway::from_label(&p))?;
            Some(Interaction {
                supplement: text_field(row, "supplement").unwrap_or_default(),
                target: text_field(row, "target").unwrap_or_default(),
                description: text_field(row, "description")
                    .unwrap_or_else(|| "Interaction recorded without description".to_string()),
                severity: text_field(row, "severity")
                    .map(|s| s.to_uppercase())
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                detail: text_field(row, "detail"),
                pathway,
            })
        })
        .collect()
}

/// 命中路径的默认置信度取最大值（多条路径互相印证）；无命中为 0.9
pub fn pathway_confidence(interactions: &[Interaction]) -> f64 {
    interactions
        .iter()
        .map(|ix| ix.pathway.default_confidence())
        .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.max(c))))
        .unwrap_or(NO_INTERACTION_CONFIDENCE)
}

pub fn build_report(
    supplements: &[String],
    medications: &[String],
    outcomes: Vec<Result<Vec<Interaction>, GraphError>>,
) -> SafetyReport {
    let mut report = SafetyReport {
        safe: true,
        interactions: Vec::new(),
        confidence: MISSING_INPUT_CONFIDENCE,
        verdict: SafetyVerdict::Safe,
        supplements_checked: supplements.to_vec(),
        medications_checked: medications.to_vec(),
        failed_checks: 0,
    };
    if supplements.is_empty() {
        report.verdict = SafetyVerdict::NoSupplements;
        return report;
    }
    if medications.is_empty() {
        report.verdict = SafetyVerdict::NoMedications;
        return report;
    }

    let attempted = outcomes.len();
    for outcome in outcomes {
        match outcome {
            Ok(found) => report.interactions.extend(found),
            Err(_) => report.failed_checks += 1,
        }
    }

    if attempted > 0 && report.failed_checks == attempted {
        report.safe = false;
        report.verdict = SafetyVerdict::CheckFailed;
        report.confidence = CHECK_FAILED_CONFIDENCE;
        return report;
    }

    report.safe = report.interactions.is_empty();
    report.verdict = if report.safe {
        SafetyVerdict::Safe
    } else {
        SafetyVerdict::CautionAdvised
    };
    let mut confidence = pathway_confidence(&report.interactions);
    if report.failed_checks > 0 {
        confidence -= PARTIAL_FAILURE_PENALTY;
    }
    report.confidence = confidence.clamp(0.0, 1.0);
    report
}

/// 证据链摘要
pub fn evidence_line(report: &SafetyReport) -> String {
    match report.verdict {
        SafetyVerdict::NoSupplements => "Safety check: no supplements to check".to_string(),
        SafetyVerdict::NoMedications => {
            "Safety check: no medications to check against".to_string()
        }
        SafetyVerdict::CheckFailed => format!(
            "Safety check: all {} interaction queries failed",
            report.failed_checks
        ),
        SafetyVerdict::Safe => format!(
            "Safety check: No interactions found for {} with {}",
            report.supplements_checked.join(", "),
            report.medications_checked.join(", ")
        ),
        SafetyVerdict::CautionAdvised => {
            let summary = report
                .by_pathway()
                .iter()
                .map(|(p, n)| format!("{}: {}", p, n))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "Safety check: {} interaction(s) found ({})",
                report.interactions.len(),
                summary
            )
        }
    }
}

#[async_trait]
impl Specialist for SafetyChecker {
    fn kind(&self) -> CheckKind {
        CheckKind::Safety
    }

    async fn run(&self, mut state: ConversationState) -> ConversationState {
        let supplements = state.supplement_names();
        let medications = state.medication_names();
        tracing::info!(
            "Safety check: {} supplement(s) x {} medication(s)",
            supplements.len(),
            medications.len()
        );

        let report = self.assess(&supplements, &medications, &mut state).await;
        tracing::info!(
            "Safety check complete: {} ({} interactions, confidence {:.2})",
            report.verdict,
            report.interactions.len(),
            report.confidence
        );
        state.evidence_chain.push(evidence_line(&report));
        if let Err(e) = state.record_safety(report) {
            tracing::warn!("Discarding duplicate safety result: {}", e);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PatientProfile, RetryPolicy};
    use crate::graph::InMemoryGraph;
    use std::sync::Arc;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn ix(pathway: InteractionPathway) -> Interaction {
        Interaction {
            supplement: "S".into(),
            target: "M".into(),
            description: "d".into(),
            severity: "HIGH".into(),
            detail: None,
            pathway,
        }
    }

    #[test]
    fn test_confidence_by_pathway() {
        assert_eq!(pathway_confidence(&[]), NO_INTERACTION_CONFIDENCE);
        assert_eq!(pathway_confidence(&[ix(InteractionPathway::SimilarEffect)]), 0.75);
        assert_eq!(
            pathway_confidence(&[
                ix(InteractionPathway::SimilarEffect),
                ix(InteractionPathway::DirectSupplementMedication)
            ]),
            0.85
        );
    }

    #[test]
    fn test_missing_inputs_and_failures() {
        let report = build_report(&[], &names(&["Warfarin"]), vec![]);
        assert_eq!(report.verdict, SafetyVerdict::NoSupplements);
        assert!(report.safe);

        let report = build_report(&names(&["Fish Oil"]), &[], vec![]);
        assert_eq!(report.verdict, SafetyVerdict::NoMedications);

        let report = build_report(
            &names(&["Fish Oil", "Zinc"]),
            &names(&["Warfarin"]),
            vec![Err(GraphError::Timeout), Err(GraphError::Timeout)],
        );
        assert_eq!(report.verdict, SafetyVerdict::CheckFailed);
        assert!(!report.safe);
        assert_eq!(report.confidence, CHECK_FAILED_CONFIDENCE);

        let report = build_report(
            &names(&["Fish Oil", "Zinc"]),
            &names(&["Warfarin"]),
            vec![Ok(vec![]), Err(GraphError::Timeout)],
        );
        assert_eq!(report.verdict, SafetyVerdict::Safe);
        assert!((report.confidence - 0.8).abs() < 1e-9);
        assert_eq!(report.failed_checks, 1);
    }

    #[tokio::test]
    async fn test_run_records_slot_and_evidence() {
        let graph = InMemoryGraph::new()
            .node("DB00682", "Drug", "Warfarin")
            .node("M1", "Medication", "Warfarin")
            .node("S07", "Supplement", "Fish Oil")
            .node("C1", "Category", "Anticoagulant")
            .edge("M1", "CONTAINS_DRUG", "DB00682")
            .edge("DB00682", "BELONGS_TO", "C1")
            .edge("S07", "HAS_SIMILAR_EFFECT_TO", "C1");
        let checker = SafetyChecker::new(QueryExecutor::new(Arc::new(graph), RetryPolicy::none()));
        let profile = PatientProfile {
            medications: names(&["Warfarin"]),
            supplements: names(&["Fish Oil"]),
            ..Default::default()
        };
        let state = checker.run(ConversationState::new("Is Fish Oil safe?", profile)).await;

        let report = state.safety().unwrap();
        assert!(!report.safe);
        assert_eq!(report.verdict, SafetyVerdict::CautionAdvised);
        assert!((report.confidence - 0.75).abs() < 1e-9);
        assert_eq!(
            state.evidence_chain.entries().last().map(String::as_str),
            Some("Safety check: 1 interaction(s) found (SIMILAR_EFFECT: 1)")
        );
        assert_eq!(state.query_log().len(), 1);
    }
}
