//! 类型化图查询：每个变体携带自己的参数，后端负责把它翻译成具体查询

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::Row;

/// 名字匹配一律大小写不敏感
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphQuery {
    /// Drug 名精确匹配（最多 1 行）
    DrugByExactName { name: String },
    /// BrandName 包含匹配 -> 其所含 Drug
    DrugByBrandName { name: String, limit: usize },
    /// Synonym 包含匹配 -> 对应 Drug
    DrugBySynonym { name: String, limit: usize },
    SupplementByExactName { name: String },
    /// 名字包含输入，或名字中某个词等于输入
    SupplementByPartialName { name: String, limit: usize },
    /// 一个补充剂对一组用药的全路径安全检查
    ComprehensiveSafety {
        supplement: String,
        medications: Vec<String>,
    },
    /// DietaryRestriction -DEFICIENT_IN-> Nutrient
    DietDeficiencies { restrictions: Vec<String> },
    /// Supplement -DEPLETES-> Nutrient
    SupplementDepletions { supplements: Vec<String> },
    /// Medication -CONTAINS_DRUG-> Drug -DEPLETES-> Nutrient
    MedicationDepletions { medications: Vec<String> },
    /// Supplement -TREATS-> Symptom，症状名或描述包含关键词
    SupplementsForSymptom { symptom: String },
    /// 宽泛搜索：症状名包含任一词
    SupplementsForSymptomWords { words: Vec<String>, limit: usize },
    /// Supplement -CONTAINS-> ActiveIngredient -PROVIDES-> Nutrient，营养素名精确匹配
    SupplementsProvidingNutrient { nutrient: String, limit: usize },
}

impl GraphQuery {
    /// 查询种类（日志 / query_log 用）
    pub fn kind(&self) -> &'static str {
        match self {
            GraphQuery::DrugByExactName { .. } => "drug_by_exact_name",
            GraphQuery::DrugByBrandName { .. } => "drug_by_brand_name",
            GraphQuery::DrugBySynonym { .. } => "drug_by_synonym",
            GraphQuery::SupplementByExactName { .. } => "supplement_by_exact_name",
            GraphQuery::SupplementByPartialName { .. } => "supplement_by_partial_name",
            GraphQuery::ComprehensiveSafety { .. } => "comprehensive_safety",
            GraphQuery::DietDeficiencies { .. } => "diet_deficiencies",
            GraphQuery::SupplementDepletions { .. } => "supplement_depletions",
            GraphQuery::MedicationDepletions { .. } => "medication_depletions",
            GraphQuery::SupplementsForSymptom { .. } => "supplements_for_symptom",
            GraphQuery::SupplementsForSymptomWords { .. } => "supplements_for_symptom_words",
            GraphQuery::SupplementsProvidingNutrient { .. } => "supplements_providing_nutrient",
        }
    }
}

/// 取字符串列；数字转字符串，空串与 null 视为缺失
pub fn text_field(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 取数值列；兼容写成字符串的数字
pub fn number_field(row: &Row, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_helpers() {
        let row: Row = json!({"a": "x", "b": 0.8, "c": "", "d": null, "e": "0.5"})
            .as_object()
            .cloned()
            .unwrap_or_default();
        assert_eq!(text_field(&row, "a").as_deref(), Some("x"));
        assert_eq!(text_field(&row, "c"), None);
        assert_eq!(text_field(&row, "d"), None);
        assert_eq!(number_field(&row, "b"), Some(0.8));
        assert_eq!(number_field(&row, "e"), Some(0.5));
        assert_eq!(number_field(&row, "missing"), None);
    }

    #[test]
    fn test_query_serializes_with_kind_tag() {
        let q = GraphQuery::DrugByExactName {
            name: "Warfarin".into(),
        };
        let v = serde_json::to_value(&q).unwrap_or_default();
        assert_eq!(v["kind"], "drug_by_exact_name");
        assert_eq!(q.kind(), "drug_by_exact_name");
    }
}
