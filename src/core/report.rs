//! 专家结果类型：安全检查 / 营养缺乏分析 / 补充剂推荐
//!
//! 每份报告都带 confidence，Supervisor 用它们计算整体置信度；Synthesis 用 verdict 与计数组织上下文。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 专家种类（每种在一次运行中最多完成一次）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Safety,
    Deficiency,
    Recommendation,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckKind::Safety => "safety",
            CheckKind::Deficiency => "deficiency",
            CheckKind::Recommendation => "recommendation",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Safety
// ---------------------------------------------------------------------------

/// 相互作用路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionPathway {
    /// Supplement -INTERACTS_WITH-> Medication
    DirectSupplementMedication,
    /// Supplement -INTERACTS_WITH-> Drug <-CONTAINS_DRUG- Medication
    SupplementDrugMedication,
    /// 补充剂成分等价于某药物，该药物与用药中的成分相互作用
    SharedDrugInteraction,
    /// 补充剂成分等价于用药中已含的药物（重复用药）
    HiddenPharmaEquivalence,
    /// 补充剂与用药成分同属一个药理类别
    SimilarEffect,
}

impl InteractionPathway {
    pub const ALL: [InteractionPathway; 5] = [
        InteractionPathway::DirectSupplementMedication,
        InteractionPathway::SupplementDrugMedication,
        InteractionPathway::SharedDrugInteraction,
        InteractionPathway::HiddenPharmaEquivalence,
        InteractionPathway::SimilarEffect,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            InteractionPathway::DirectSupplementMedication => "DIRECT_SUPPLEMENT_MEDICATION",
            InteractionPathway::SupplementDrugMedication => "SUPPLEMENT_DRUG_MEDICATION",
            InteractionPathway::SharedDrugInteraction => "SHARED_DRUG_INTERACTION",
            InteractionPathway::HiddenPharmaEquivalence => "HIDDEN_PHARMA_EQUIVALENCE",
            InteractionPathway::SimilarEffect => "SIMILAR_EFFECT",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.label() == label)
    }

    /// 该路径命中时对警告结论的置信度；推断路径低于有直接记录的路径
    pub fn default_confidence(&self) -> f64 {
        match self {
            InteractionPathway::DirectSupplementMedication
            | InteractionPathway::SupplementDrugMedication => 0.85,
            InteractionPathway::SharedDrugInteraction
            | InteractionPathway::HiddenPharmaEquivalence => 0.80,
            InteractionPathway::SimilarEffect => 0.75,
        }
    }
}

impl fmt::Display for InteractionPathway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 单条相互作用记录（一行图查询结果）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub supplement: String,
    /// 被影响的用药名
    pub target: String,
    pub description: String,
    pub severity: String,
    pub detail: Option<String>,
    pub pathway: InteractionPathway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyVerdict {
    #[serde(rename = "SAFE")]
    Safe,
    #[serde(rename = "CAUTION ADVISED")]
    CautionAdvised,
    #[serde(rename = "NO_SUPPLEMENTS")]
    NoSupplements,
    #[serde(rename = "NO_MEDICATIONS")]
    NoMedications,
    #[serde(rename = "CHECK_FAILED")]
    CheckFailed,
}

impl fmt::Display for SafetyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyVerdict::Safe => "SAFE",
            SafetyVerdict::CautionAdvised => "CAUTION ADVISED",
            SafetyVerdict::NoSupplements => "NO_SUPPLEMENTS",
            SafetyVerdict::NoMedications => "NO_MEDICATIONS",
            SafetyVerdict::CheckFailed => "CHECK_FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    /// 当且仅当没有任何相互作用
    pub safe: bool,
    pub interactions: Vec<Interaction>,
    pub confidence: f64,
    pub verdict: SafetyVerdict,
    pub supplements_checked: Vec<String>,
    pub medications_checked: Vec<String>,
    /// 查询失败的补充剂数
    pub failed_checks: usize,
}

impl SafetyReport {
    /// 按路径分组计数（证据链摘要用，顺序稳定）
    pub fn by_pathway(&self) -> BTreeMap<InteractionPathway, usize> {
        let mut map = BTreeMap::new();
        for ix in &self.interactions {
            *map.entry(ix.pathway).or_insert(0) += 1;
        }
        map
    }
}

// ---------------------------------------------------------------------------
// Deficiency
// ---------------------------------------------------------------------------

/// 营养风险来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Diet,
    Supplement,
    Medication,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceType::Diet => "diet",
            SourceType::Supplement => "supplement",
            SourceType::Medication => "medication",
        };
        f.write_str(s)
    }
}

/// 风险等级；声明顺序即严重程度（越靠前越严重，`min()` 取最高风险）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Critical,
    High,
    /// MODERATE 与 MEDIUM 同级
    Moderate,
    Low,
    Unknown,
}

impl RiskLevel {
    /// 宽松解析图中的等级字符串；SEVERE 视同 HIGH
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "CRITICAL" => RiskLevel::Critical,
            "HIGH" | "SEVERE" => RiskLevel::High,
            "MODERATE" | "MEDIUM" => RiskLevel::Moderate,
            "LOW" | "MILD" | "MINOR" => RiskLevel::Low,
            _ => RiskLevel::Unknown,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Critical => "CRITICAL",
            RiskLevel::High => "HIGH",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::Low => "LOW",
            RiskLevel::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeficiencyFinding {
    pub nutrient: String,
    pub source_type: SourceType,
    pub source_name: String,
    pub risk_level: RiskLevel,
    pub mechanism: Option<String>,
    pub confidence: f64,
}

/// 聚合后某营养素的一个来源摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NutrientSource {
    pub source_type: SourceType,
    pub source_name: String,
    pub risk_level: RiskLevel,
    pub mechanism: Option<String>,
}

impl From<&DeficiencyFinding> for NutrientSource {
    fn from(f: &DeficiencyFinding) -> Self {
        Self {
            source_type: f.source_type,
            source_name: f.source_name.clone(),
            risk_level: f.risk_level,
            mechanism: f.mechanism.clone(),
        }
    }
}

/// 两个及以上独立来源同时影响同一营养素
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalOverlap {
    pub nutrient: String,
    pub sources: Vec<NutrientSource>,
    pub combined_risk: RiskLevel,
    pub highest_individual_risk: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeficiencyVerdict {
    RisksFound,
    NoRisksFound,
    NothingToCheck,
    /// 所有途径查询都失败，结论未知
    CheckFailed,
}

impl fmt::Display for DeficiencyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeficiencyVerdict::RisksFound => "RISKS_FOUND",
            DeficiencyVerdict::NoRisksFound => "NO_RISKS_FOUND",
            DeficiencyVerdict::NothingToCheck => "NOTHING_TO_CHECK",
            DeficiencyVerdict::CheckFailed => "CHECK_FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeficiencyReport {
    pub verdict: DeficiencyVerdict,
    pub findings: Vec<DeficiencyFinding>,
    /// nutrient -> 来源列表
    pub nutrient_sources: BTreeMap<String, Vec<NutrientSource>>,
    pub critical_overlaps: Vec<CriticalOverlap>,
    /// 去重后的营养素数量
    pub total_count: usize,
    pub confidence: f64,
    pub failed_queries: usize,
    /// 针对风险营养素的补充剂建议（已对照用药做安全检查）
    pub suggestions: Vec<NutrientSuggestion>,
}

/// 补充剂建议的安全状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionStatus {
    Safe,
    Caution,
    /// 存在 HIGH 及以上的相互作用
    Unsafe,
    /// 图中没有具体产品，或安全检查失败
    CheckRequired,
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuggestionStatus::Safe => "SAFE",
            SuggestionStatus::Caution => "CAUTION",
            SuggestionStatus::Unsafe => "UNSAFE",
            SuggestionStatus::CheckRequired => "CHECK_REQUIRED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientSuggestion {
    pub nutrient: String,
    pub supplement: String,
    pub category: Option<String>,
    pub active_ingredient: Option<String>,
    pub status: SuggestionStatus,
    pub warnings: Vec<String>,
}

impl NutrientSuggestion {
    /// 图中找不到具体产品时的通用建议
    pub fn generic(nutrient: &str, warning: &str) -> Self {
        Self {
            nutrient: nutrient.to_string(),
            supplement: format!("{} supplement", nutrient),
            category: Some("General".to_string()),
            active_ingredient: Some(nutrient.to_string()),
            status: SuggestionStatus::CheckRequired,
            warnings: vec![warning.to_string()],
        }
    }
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

/// 补充剂安全证据等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceGrade {
    A,
    B,
    C,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl EvidenceGrade {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "A" => EvidenceGrade::A,
            "B" => EvidenceGrade::B,
            "C" => EvidenceGrade::C,
            _ => EvidenceGrade::Unknown,
        }
    }

    pub fn score(&self) -> u8 {
        match self {
            EvidenceGrade::A => 3,
            EvidenceGrade::B => 2,
            EvidenceGrade::C => 1,
            EvidenceGrade::Unknown => 0,
        }
    }
}

impl fmt::Display for EvidenceGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvidenceGrade::A => "A",
            EvidenceGrade::B => "B",
            EvidenceGrade::C => "C",
            EvidenceGrade::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedSupplement {
    /// 排名，从 1 开始
    pub rank: usize,
    pub supplement_id: Option<String>,
    pub name: String,
    pub symptom_treated: Option<String>,
    pub grade: EvidenceGrade,
    pub safe: bool,
    /// 安全检查本身失败（此时 safe 为 false）
    pub errored: bool,
    pub interactions: Vec<Interaction>,
    pub safety_verdict: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationVerdict {
    Recommended,
    NoCandidates,
    NoCondition,
}

impl fmt::Display for RecommendationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecommendationVerdict::Recommended => "RECOMMENDED",
            RecommendationVerdict::NoCandidates => "NO_CANDIDATES",
            RecommendationVerdict::NoCondition => "NO_CONDITION",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationReport {
    pub verdict: RecommendationVerdict,
    pub condition: Option<String>,
    pub recommendations: Vec<RecommendedSupplement>,
    pub safe_count: usize,
    pub unsafe_count: usize,
    pub medications_checked: Vec<String>,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordinal() {
        assert!(RiskLevel::Critical < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Moderate);
        assert!(RiskLevel::Moderate < RiskLevel::Low);
        assert_eq!(RiskLevel::parse("medium"), RiskLevel::Moderate);
        assert_eq!(RiskLevel::parse("SEVERE"), RiskLevel::High);
        assert_eq!(RiskLevel::parse("???"), RiskLevel::Unknown);
    }

    #[test]
    fn test_pathway_labels_round_trip() {
        for p in InteractionPathway::ALL {
            assert_eq!(InteractionPathway::from_label(p.label()), Some(p));
        }
        assert_eq!(
            serde_json::to_value(InteractionPathway::SimilarEffect).ok(),
            Some(serde_json::json!("SIMILAR_EFFECT"))
        );
    }

    #[test]
    fn test_verdict_serialization() {
        assert_eq!(
            serde_json::to_value(SafetyVerdict::CautionAdvised).ok(),
            Some(serde_json::json!("CAUTION ADVISED"))
        );
        assert_eq!(SafetyVerdict::NoMedications.to_string(), "NO_MEDICATIONS");
        assert_eq!(
            serde_json::to_value(DeficiencyVerdict::CheckFailed).ok(),
            Some(serde_json::json!("CHECK_FAILED"))
        );
        assert_eq!(DeficiencyVerdict::CheckFailed.to_string(), "CHECK_FAILED");
        assert_eq!(
            serde_json::to_value(SuggestionStatus::CheckRequired).ok(),
            Some(serde_json::json!("CHECK_REQUIRED"))
        );
        assert_eq!(EvidenceGrade::parse("b"), EvidenceGrade::B);
    }
}
