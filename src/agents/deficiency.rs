//! DeficiencyAnalyzer：饮食 / 补充剂 / 用药三条途径的营养风险与交叉重叠
//!
//! 聚合规则：同一营养素标签（区分大小写）被 ≥2 个不同来源影响即为 CriticalOverlap，
//! combined_risk 固定 CRITICAL，highest_individual_risk 取各来源中最严重的等级。
//! 发现风险后，为每个风险营养素查找能补充它的补充剂，并逐个对照用药做安全检查。

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::agents::{SafetyChecker, Specialist};
use crate::core::{
    CheckKind, ConversationState, CriticalOverlap, DeficiencyFinding, DeficiencyReport,
    DeficiencyVerdict, Interaction, NutrientSource, NutrientSuggestion, RiskLevel, SourceType,
    SuggestionStatus,
};
use crate::graph::{number_field, text_field, GraphQuery, QueryExecutor, Row};

pub const NOTHING_TO_CHECK_CONFIDENCE: f64 = 0.7;
pub const NO_FINDINGS_CONFIDENCE: f64 = 0.75;
const ALL_FAILED_CONFIDENCE: f64 = 0.3;
const DIET_DEFAULT_CONFIDENCE: f64 = 0.85;
const DEPLETION_DEFAULT_CONFIDENCE: f64 = 0.8;
const OVERLAP_BOOST: f64 = 0.05;
const OVERLAP_CAP: f64 = 0.95;
const SUGGESTIONS_PER_NUTRIENT: usize = 5;

pub struct DeficiencyAnalyzer {
    executor: QueryExecutor,
    safety: SafetyChecker,
}

/// 一条途径的查询结果
struct PathwayOutcome {
    findings: Vec<DeficiencyFinding>,
    failed: bool,
}

impl DeficiencyAnalyzer {
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            safety: SafetyChecker::new(executor.clone()),
            executor,
        }
    }

    async fn query(
        &self,
        query: GraphQuery,
        state: &mut ConversationState,
        parse: impl Fn(&Row) -> Option<DeficiencyFinding>,
    ) -> PathwayOutcome {
        match self.executor.run(&query).await {
            Ok(rows) => {
                state.log_query(query.kind(), rows.len(), true);
                PathwayOutcome {
                    findings: rows.iter().filter_map(parse).collect(),
                    failed: false,
                }
            }
            Err(e) => {
                tracing::warn!("Deficiency query {} failed: {}", query.kind(), e);
                state.log_query(query.kind(), 0, false);
                PathwayOutcome {
                    findings: Vec::new(),
                    failed: true,
                }
            }
        }
    }

    pub async fn analyze(
        &self,
        restrictions: &[String],
        supplements: &[String],
        medications: &[String],
        state: &mut ConversationState,
    ) -> DeficiencyReport {
        if restrictions.is_empty() && supplements.is_empty() && medications.is_empty() {
            return build_report(Vec::new(), 0, 0);
        }

        let mut findings = Vec::new();
        let mut attempted = 0;
        let mut failed = 0;

        if !restrictions.is_empty() {
            let outcome = self
                .query(
                    GraphQuery::DietDeficiencies {
                        restrictions: restrictions.to_vec(),
                    },
                    state,
                    diet_finding,
                )
                .await;
            let mut diet = outcome.findings;
            sort_diet_findings(&mut diet);
            findings.extend(diet);
            attempted += 1;
            failed += usize::from(outcome.failed);
        }

        if !supplements.is_empty() {
            let outcome = self
                .query(
                    GraphQuery::SupplementDepletions {
                        supplements: supplements.to_vec(),
                    },
                    state,
                    supplement_finding,
                )
                .await;
            findings.extend(outcome.findings);
            attempted += 1;
            failed += usize::from(outcome.failed);
        }

        if !medications.is_empty() {
            let outcome = self
                .query(
                    GraphQuery::MedicationDepletions {
                        medications: medications.to_vec(),
                    },
                    state,
                    medication_finding,
                )
                .await;
            findings.extend(outcome.findings);
            attempted += 1;
            failed += usize::from(outcome.failed);
        }

        let mut report = build_report(findings, attempted, failed);
        if report.verdict == DeficiencyVerdict::RisksFound {
            let nutrients: Vec<String> = report.nutrient_sources.keys().cloned().collect();
            report.suggestions = self.suggest(&nutrients, medications, state).await;
        }
        report
    }

    /// 每个风险营养素最多 5 个补充剂；查不到或查询失败给一条通用建议
    async fn suggest(
        &self,
        nutrients: &[String],
        medications: &[String],
        state: &mut ConversationState,
    ) -> Vec<NutrientSuggestion> {
        let mut suggestions = Vec::new();
        for nutrient in nutrients {
            let query = GraphQuery::SupplementsProvidingNutrient {
                nutrient: nutrient.clone(),
                limit: SUGGESTIONS_PER_NUTRIENT,
            };
            let rows = match self.executor.run(&query).await {
                Ok(rows) => {
                    state.log_query(query.kind(), rows.len(), true);
                    rows
                }
                Err(e) => {
                    tracing::warn!("Supplement lookup for {} failed: {}", nutrient, e);
                    state.log_query(query.kind(), 0, false);
                    suggestions.push(NutrientSuggestion::generic(
                        nutrient,
                        "Please consult healthcare provider",
                    ));
                    continue;
                }
            };

            let before = suggestions.len();
            for row in &rows {
                let Some(supplement) = text_field(row, "supplement") else {
                    continue;
                };
                let (status, warnings) = self.screen(&supplement, medications, state).await;
                suggestions.push(NutrientSuggestion {
                    nutrient: nutrient.clone(),
                    supplement,
                    category: text_field(row, "category"),
                    active_ingredient: text_field(row, "active_ingredient"),
                    status,
                    warnings,
                });
            }
            if suggestions.len() == before {
                suggestions.push(NutrientSuggestion::generic(
                    nutrient,
                    "Please consult healthcare provider for specific product recommendations",
                ));
            }
        }
        suggestions
    }

    async fn screen(
        &self,
        supplement: &str,
        medications: &[String],
        state: &mut ConversationState,
    ) -> (SuggestionStatus, Vec<String>) {
        if medications.is_empty() {
            return (SuggestionStatus::Safe, Vec::new());
        }
        match self.safety.check_supplement(supplement, medications).await {
            Ok(interactions) => {
                state.log_query("comprehensive_safety", interactions.len(), true);
                (suggestion_status(&interactions), interaction_warnings(&interactions))
            }
            Err(e) => {
                tracing::warn!("Safety screen for suggested '{}' failed: {}", supplement, e);
                state.log_query("comprehensive_safety", 0, false);
                (
                    SuggestionStatus::CheckRequired,
                    vec!["Unable to verify safety".to_string()],
                )
            }
        }
    }
}

fn suggestion_status(interactions: &[Interaction]) -> SuggestionStatus {
    if interactions.is_empty() {
        return SuggestionStatus::Safe;
    }
    let severe = interactions.iter().any(|i| {
        matches!(
            RiskLevel::parse(&i.severity),
            RiskLevel::Critical | RiskLevel::High
        )
    });
    if severe {
        SuggestionStatus::Unsafe
    } else {
        SuggestionStatus::Caution
    }
}

fn interaction_warnings(interactions: &[Interaction]) -> Vec<String> {
    interactions
        .iter()
        .map(|i| format!("{}: {} (with {})", i.severity, i.description, i.target))
        .collect()
}

fn diet_finding(row: &Row) -> Option<DeficiencyFinding> {
    Some(DeficiencyFinding {
        nutrient: text_field(row, "nutrient")?,
        source_type: SourceType::Diet,
        source_name: text_field(row, "diet")?,
        risk_level: text_field(row, "risk_level")
            .map(|r| RiskLevel::parse(&r))
            .unwrap_or(RiskLevel::Unknown),
        mechanism: None,
        confidence: number_field(row, "confidence").unwrap_or(DIET_DEFAULT_CONFIDENCE),
    })
}

fn supplement_finding(row: &Row) -> Option<DeficiencyFinding> {
    Some(DeficiencyFinding {
        nutrient: text_field(row, "nutrient")?,
        source_type: SourceType::Supplement,
        source_name: text_field(row, "supplement")?,
        risk_level: text_field(row, "severity")
            .map(|r| RiskLevel::parse(&r))
            .unwrap_or(RiskLevel::Unknown),
        mechanism: text_field(row, "mechanism"),
        confidence: number_field(row, "confidence").unwrap_or(DEPLETION_DEFAULT_CONFIDENCE),
    })
}

fn medication_finding(row: &Row) -> Option<DeficiencyFinding> {
    let mechanism = match (text_field(row, "drug"), text_field(row, "mechanism")) {
        (Some(drug), Some(m)) => Some(format!("{}: {}", drug, m)),
        (None, m) => m,
        (Some(drug), None) => Some(format!("depleted by {}", drug)),
    };
    Some(DeficiencyFinding {
        nutrient: text_field(row, "nutrient")?,
        source_type: SourceType::Medication,
        source_name: text_field(row, "medication")?,
        risk_level: text_field(row, "risk_level")
            .map(|r| RiskLevel::parse(&r))
            .unwrap_or(RiskLevel::Unknown),
        mechanism,
        confidence: number_field(row, "confidence").unwrap_or(DEPLETION_DEFAULT_CONFIDENCE),
    })
}

/// 饮食途径排序：CRITICAL/HIGH 在前，其次 MODERATE，其余在后；同级按营养素名
fn sort_diet_findings(findings: &mut [DeficiencyFinding]) {
    fn rank(level: RiskLevel) -> u8 {
        match level {
            RiskLevel::Critical | RiskLevel::High => 0,
            RiskLevel::Moderate => 1,
            RiskLevel::Low | RiskLevel::Unknown => 2,
        }
    }
    findings.sort_by(|a, b| {
        rank(a.risk_level)
            .cmp(&rank(b.risk_level))
            .then_with(|| a.nutrient.cmp(&b.nutrient))
    });
}

/// 按营养素聚合来源（同一来源只记一次），并找出交叉重叠
pub fn aggregate(
    findings: &[DeficiencyFinding],
) -> (BTreeMap<String, Vec<NutrientSource>>, Vec<CriticalOverlap>) {
    let mut by_nutrient: BTreeMap<String, Vec<NutrientSource>> = BTreeMap::new();
    for finding in findings {
        let sources = by_nutrient.entry(finding.nutrient.clone()).or_default();
        let duplicate = sources
            .iter()
            .any(|s| s.source_type == finding.source_type && s.source_name == finding.source_name);
        if !duplicate {
            sources.push(NutrientSource::from(finding));
        }
    }

    let overlaps = by_nutrient
        .iter()
        .filter(|(_, sources)| sources.len() >= 2)
        .map(|(nutrient, sources)| CriticalOverlap {
            nutrient: nutrient.clone(),
            sources: sources.clone(),
            combined_risk: RiskLevel::Critical,
            highest_individual_risk: sources
                .iter()
                .map(|s| s.risk_level)
                .min()
                .unwrap_or(RiskLevel::Unknown),
        })
        .collect();

    (by_nutrient, overlaps)
}

pub fn build_report(
    findings: Vec<DeficiencyFinding>,
    attempted: usize,
    failed: usize,
) -> DeficiencyReport {
    if attempted == 0 || failed >= attempted {
        let (verdict, confidence) = if attempted == 0 {
            (DeficiencyVerdict::NothingToCheck, NOTHING_TO_CHECK_CONFIDENCE)
        } else {
            (DeficiencyVerdict::CheckFailed, ALL_FAILED_CONFIDENCE)
        };
        return DeficiencyReport {
            verdict,
            findings,
            nutrient_sources: BTreeMap::new(),
            critical_overlaps: Vec::new(),
            total_count: 0,
            confidence,
            failed_queries: failed,
            suggestions: Vec::new(),
        };
    }

    let (nutrient_sources, critical_overlaps) = aggregate(&findings);
    let confidence = if findings.is_empty() {
        NO_FINDINGS_CONFIDENCE
    } else {
        let mean = findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64;
        if critical_overlaps.is_empty() {
            mean
        } else {
            (mean + OVERLAP_BOOST).min(OVERLAP_CAP)
        }
    };

    DeficiencyReport {
        verdict: if findings.is_empty() {
            DeficiencyVerdict::NoRisksFound
        } else {
            DeficiencyVerdict::RisksFound
        },
        total_count: nutrient_sources.len(),
        findings,
        nutrient_sources,
        critical_overlaps,
        confidence: confidence.clamp(0.0, 1.0),
        failed_queries: failed,
        suggestions: Vec::new(),
    }
}

fn evidence_lines(report: &DeficiencyReport) -> Vec<String> {
    let mut lines = vec![match report.verdict {
        DeficiencyVerdict::NothingToCheck => {
            "Deficiency check: no diet, supplements or medications to analyze".to_string()
        }
        DeficiencyVerdict::NoRisksFound => "Deficiency check: no nutrient risks found".to_string(),
        DeficiencyVerdict::CheckFailed => format!(
            "Deficiency check failed: all {} pathway queries failed, nutrient risks unknown",
            report.failed_queries
        ),
        DeficiencyVerdict::RisksFound => format!(
            "Deficiency check: {} nutrient(s) at risk, {} critical overlap(s)",
            report.total_count,
            report.critical_overlaps.len()
        ),
    }];
    for overlap in &report.critical_overlaps {
        let sources = overlap
            .sources
            .iter()
            .map(|s| format!("{} ({})", s.source_type, s.source_name))
            .collect::<Vec<_>>()
            .join(" + ");
        lines.push(format!(
            "CRITICAL OVERLAP: {} affected by {}",
            overlap.nutrient, sources
        ));
    }
    if !report.suggestions.is_empty() {
        let listed = report
            .suggestions
            .iter()
            .map(|s| format!("{} for {} ({})", s.supplement, s.nutrient, s.status))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Suggested supplements: {}", listed));
    }
    lines
}

#[async_trait]
impl Specialist for DeficiencyAnalyzer {
    fn kind(&self) -> CheckKind {
        CheckKind::Deficiency
    }

    async fn run(&self, mut state: ConversationState) -> ConversationState {
        let restrictions = state.dietary_restrictions();
        let supplements = state.supplement_names();
        let medications = state.medication_names();
        tracing::info!(
            "Deficiency check: {} restriction(s), {} supplement(s), {} medication(s)",
            restrictions.len(),
            supplements.len(),
            medications.len()
        );

        let report = self
            .analyze(&restrictions, &supplements, &medications, &mut state)
            .await;
        tracing::info!(
            "Deficiency check complete: {} ({} nutrients, {} overlaps, confidence {:.2})",
            report.verdict,
            report.total_count,
            report.critical_overlaps.len(),
            report.confidence
        );
        for line in evidence_lines(&report) {
            state.evidence_chain.push(line);
        }
        if let Err(e) = state.record_deficiency(report) {
            tracing::warn!("Discarding duplicate deficiency result: {}", e);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::core::{PatientProfile, RetryPolicy};
    use crate::graph::{GraphError, GraphStore, InMemoryGraph};

    /// 所有查询都连接失败的存储
    struct DownStore;

    #[async_trait]
    impl GraphStore for DownStore {
        async fn execute(&self, _query: &GraphQuery) -> Result<Vec<Row>, GraphError> {
            Err(GraphError::Connection("connection refused".into()))
        }
    }

    fn analyzer(store: Arc<dyn GraphStore>) -> DeficiencyAnalyzer {
        DeficiencyAnalyzer::new(QueryExecutor::new(store, RetryPolicy::none()))
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn blank_state() -> ConversationState {
        ConversationState::new("anything", PatientProfile::default())
    }

    /// Vegan 缺 B12 与维生素 D，Metformin 消耗 B12；两种维生素 D 产品，其中一个与 Warfarin 同类
    fn nutrition_graph() -> InMemoryGraph {
        InMemoryGraph::new()
            .node("D1", "DietaryRestriction", "Vegan")
            .node("N1", "Nutrient", "Vitamin B-12")
            .node("N2", "Nutrient", "Vitamin D")
            .node("DB00331", "Drug", "Metformin")
            .node("DB00682", "Drug", "Warfarin")
            .node("M1", "Medication", "Metformin")
            .node("M2", "Medication", "Warfarin")
            .node("C1", "Category", "Anticoagulant")
            .node("AI1", "ActiveIngredient", "Cholecalciferol")
            .node_with("S1", "Supplement", "Vitamin D3", json!({"category": "Vitamin"}))
            .node_with("S2", "Supplement", "Cod Liver Oil", json!({"category": "Oil"}))
            .edge_with(
                "D1",
                "DEFICIENT_IN",
                "N1",
                json!({"risk_level": "HIGH", "confidence": 0.85}),
            )
            .edge_with(
                "D1",
                "DEFICIENT_IN",
                "N2",
                json!({"risk_level": "MODERATE", "confidence": 0.8}),
            )
            .edge("M1", "CONTAINS_DRUG", "DB00331")
            .edge("M2", "CONTAINS_DRUG", "DB00682")
            .edge_with(
                "DB00331",
                "DEPLETES",
                "N1",
                json!({"risk_level": "HIGH", "mechanism": "reduced absorption", "confidence": 0.9}),
            )
            .edge("DB00682", "BELONGS_TO", "C1")
            .edge("AI1", "PROVIDES", "N2")
            .edge("S1", "CONTAINS", "AI1")
            .edge("S2", "CONTAINS", "AI1")
            .edge("S2", "HAS_SIMILAR_EFFECT_TO", "C1")
    }

    fn finding(
        nutrient: &str,
        source_type: SourceType,
        name: &str,
        risk: RiskLevel,
    ) -> DeficiencyFinding {
        DeficiencyFinding {
            nutrient: nutrient.into(),
            source_type,
            source_name: name.into(),
            risk_level: risk,
            mechanism: None,
            confidence: 0.8,
        }
    }

    #[test]
    fn test_overlap_needs_two_distinct_sources() {
        let findings = vec![
            finding("Vitamin B-12", SourceType::Diet, "Vegan", RiskLevel::High),
            finding("Vitamin B-12", SourceType::Supplement, "Iron", RiskLevel::Moderate),
            finding("Iron", SourceType::Diet, "Vegan", RiskLevel::Moderate),
        ];
        let (sources, overlaps) = aggregate(&findings);
        assert_eq!(sources.len(), 2);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].nutrient, "Vitamin B-12");
        assert_eq!(overlaps[0].sources.len(), 2);
        assert_eq!(overlaps[0].combined_risk, RiskLevel::Critical);
        assert_eq!(overlaps[0].highest_individual_risk, RiskLevel::High);
    }

    #[test]
    fn test_same_source_twice_is_not_an_overlap() {
        let findings = vec![
            finding("Zinc", SourceType::Supplement, "Iron", RiskLevel::Low),
            finding("Zinc", SourceType::Supplement, "Iron", RiskLevel::Low),
            finding("zinc", SourceType::Diet, "Vegan", RiskLevel::Low),
        ];
        let (sources, overlaps) = aggregate(&findings);
        assert!(overlaps.is_empty());
        assert_eq!(sources["Zinc"].len(), 1);
    }

    #[test]
    fn test_report_confidence() {
        let report = build_report(Vec::new(), 0, 0);
        assert_eq!(report.verdict, DeficiencyVerdict::NothingToCheck);
        assert_eq!(report.confidence, NOTHING_TO_CHECK_CONFIDENCE);

        let report = build_report(Vec::new(), 1, 0);
        assert_eq!(report.verdict, DeficiencyVerdict::NoRisksFound);

        let report = build_report(Vec::new(), 2, 2);
        assert_eq!(report.verdict, DeficiencyVerdict::CheckFailed);
        assert_eq!(report.confidence, ALL_FAILED_CONFIDENCE);

        let report = build_report(
            vec![
                finding("Vitamin B-12", SourceType::Diet, "Vegan", RiskLevel::High),
                finding("Vitamin B-12", SourceType::Supplement, "Iron", RiskLevel::Moderate),
            ],
            2,
            0,
        );
        assert_eq!(report.verdict, DeficiencyVerdict::RisksFound);
        assert_eq!(report.total_count, 1);
        assert!((report.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_diet_sort_order() {
        let mut findings = vec![
            finding("Zinc", SourceType::Diet, "Vegan", RiskLevel::Low),
            finding("Iron", SourceType::Diet, "Vegan", RiskLevel::Moderate),
            finding("Vitamin D", SourceType::Diet, "Vegan", RiskLevel::High),
            finding("Calcium", SourceType::Diet, "Vegan", RiskLevel::High),
        ];
        sort_diet_findings(&mut findings);
        let order: Vec<&str> = findings.iter().map(|f| f.nutrient.as_str()).collect();
        assert_eq!(order, vec!["Calcium", "Vitamin D", "Iron", "Zinc"]);
    }

    #[tokio::test]
    async fn test_all_queries_failing_is_not_reassurance() {
        let analyzer = analyzer(Arc::new(DownStore));
        let mut state = blank_state();
        let report = analyzer
            .analyze(
                &names(&["Vegan"]),
                &names(&["Iron"]),
                &names(&["Metformin"]),
                &mut state,
            )
            .await;
        assert_eq!(report.verdict, DeficiencyVerdict::CheckFailed);
        assert_eq!(report.verdict.to_string(), "CHECK_FAILED");
        assert!((report.confidence - 0.3).abs() < 1e-9);
        assert_eq!(report.failed_queries, 3);
        assert!(report.suggestions.is_empty());
        assert!(evidence_lines(&report)[0].contains("nutrient risks unknown"));
    }

    #[tokio::test]
    async fn test_diet_and_medication_overlap() {
        let analyzer = analyzer(Arc::new(nutrition_graph()));
        let mut state = blank_state();
        let report = analyzer
            .analyze(&names(&["Vegan"]), &[], &names(&["Metformin"]), &mut state)
            .await;

        assert_eq!(report.verdict, DeficiencyVerdict::RisksFound);
        assert_eq!(report.failed_queries, 0);
        assert_eq!(report.critical_overlaps.len(), 1);
        let overlap = &report.critical_overlaps[0];
        assert_eq!(overlap.nutrient, "Vitamin B-12");
        let kinds: Vec<SourceType> = overlap.sources.iter().map(|s| s.source_type).collect();
        assert_eq!(kinds, vec![SourceType::Diet, SourceType::Medication]);
        assert_eq!(overlap.combined_risk, RiskLevel::Critical);

        let medication = report
            .findings
            .iter()
            .find(|f| f.source_type == SourceType::Medication)
            .unwrap();
        assert_eq!(medication.source_name, "Metformin");
        assert_eq!(
            medication.mechanism.as_deref(),
            Some("Metformin: reduced absorption")
        );
    }

    #[tokio::test]
    async fn test_suggestions_are_screened_against_medications() {
        let analyzer = analyzer(Arc::new(nutrition_graph()));
        let mut state = blank_state();
        let report = analyzer
            .analyze(&names(&["Vegan"]), &[], &names(&["Warfarin"]), &mut state)
            .await;

        // B12 在图中没有产品，退回通用建议
        let b12: Vec<&NutrientSuggestion> = report
            .suggestions
            .iter()
            .filter(|s| s.nutrient == "Vitamin B-12")
            .collect();
        assert_eq!(b12.len(), 1);
        assert_eq!(b12[0].supplement, "Vitamin B-12 supplement");
        assert_eq!(b12[0].status, SuggestionStatus::CheckRequired);

        let vitamin_d: Vec<(&str, SuggestionStatus)> = report
            .suggestions
            .iter()
            .filter(|s| s.nutrient == "Vitamin D")
            .map(|s| (s.supplement.as_str(), s.status))
            .collect();
        assert_eq!(
            vitamin_d,
            vec![
                ("Vitamin D3", SuggestionStatus::Safe),
                ("Cod Liver Oil", SuggestionStatus::Caution),
            ]
        );
        let cod = report
            .suggestions
            .iter()
            .find(|s| s.supplement == "Cod Liver Oil")
            .unwrap();
        assert_eq!(cod.active_ingredient.as_deref(), Some("Cholecalciferol"));
        assert!(cod.warnings[0].starts_with("MODERATE"));
    }
}
