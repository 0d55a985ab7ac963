//! GraphQuery -> Cypher 语句 + 参数
//!
//! 对应 Neo4j 中的药物知识图谱：Drug / BrandName / Synonym / Medication / Supplement /
//! ActiveIngredient / Category / DietaryRestriction / Nutrient / Symptom。
//! 所有列名与内存图返回的列名一致，上层不区分后端。

use serde_json::{json, Map, Value};

use crate::graph::GraphQuery;

/// 一条可直接提交给 Neo4j 的语句
#[derive(Debug, Clone, PartialEq)]
pub struct CypherStatement {
    pub statement: String,
    pub parameters: Map<String, Value>,
}

impl CypherStatement {
    fn new(statement: &str, parameters: Value) -> Self {
        Self {
            statement: statement.trim().to_string(),
            parameters: parameters.as_object().cloned().unwrap_or_default(),
        }
    }
}

fn lowered(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

const COMPREHENSIVE_SAFETY: &str = r#"
MATCH (s:Supplement)-[r:INTERACTS_WITH]->(m:Medication)
WHERE toLower(s.supplement_name) = toLower($supplement_name)
  AND toLower(m.medication_name) IN $medication_names_lower
RETURN s.supplement_name AS supplement, m.medication_name AS target,
       r.description AS description, r.severity AS severity,
       null AS detail, 'DIRECT_SUPPLEMENT_MEDICATION' AS pathway
UNION ALL
MATCH (s:Supplement)-[r:INTERACTS_WITH]->(d:Drug)<-[:CONTAINS_DRUG]-(m:Medication)
WHERE toLower(s.supplement_name) = toLower($supplement_name)
  AND toLower(m.medication_name) IN $medication_names_lower
RETURN s.supplement_name AS supplement, m.medication_name AS target,
       r.description AS description, r.severity AS severity,
       d.drug_name AS detail, 'SUPPLEMENT_DRUG_MEDICATION' AS pathway
UNION ALL
MATCH (s:Supplement)-[:CONTAINS]->(a:ActiveIngredient)-[:EQUIVALENT_TO]->(d1:Drug)
      -[r:INTERACTS_WITH]-(d2:Drug)<-[:CONTAINS_DRUG]-(m:Medication)
WHERE toLower(s.supplement_name) = toLower($supplement_name)
  AND toLower(m.medication_name) IN $medication_names_lower
  AND d1 <> d2
RETURN s.supplement_name AS supplement, m.medication_name AS target,
       r.description AS description, r.severity AS severity,
       d1.drug_name + ' <-> ' + d2.drug_name AS detail, 'SHARED_DRUG_INTERACTION' AS pathway
UNION ALL
MATCH (s:Supplement)-[:CONTAINS]->(a:ActiveIngredient)
      -[:EQUIVALENT_TO]->(d:Drug)<-[:CONTAINS_DRUG]-(m:Medication)
WHERE toLower(s.supplement_name) = toLower($supplement_name)
  AND toLower(m.medication_name) IN $medication_names_lower
RETURN s.supplement_name AS supplement, m.medication_name AS target,
       'Contains equivalent pharmaceutical ingredient - duplication risk' AS description,
       'HIGH' AS severity,
       a.active_ingredient + ' = ' + d.drug_name AS detail, 'HIDDEN_PHARMA_EQUIVALENCE' AS pathway
UNION ALL
MATCH (s:Supplement)-[:HAS_SIMILAR_EFFECT_TO]->(c:Category)
      <-[:BELONGS_TO]-(d:Drug)<-[:CONTAINS_DRUG]-(m:Medication)
WHERE toLower(s.supplement_name) = toLower($supplement_name)
  AND toLower(m.medication_name) IN $medication_names_lower
RETURN s.supplement_name AS supplement, m.medication_name AS target,
       'Similar pharmacological effect - additive or antagonistic risk' AS description,
       'MODERATE' AS severity,
       c.category AS detail, 'SIMILAR_EFFECT' AS pathway
"#;

/// 翻译一条 GraphQuery
pub fn to_cypher(query: &GraphQuery) -> CypherStatement {
    match query {
        GraphQuery::DrugByExactName { name } => CypherStatement::new(
            r#"
MATCH (d:Drug)
WHERE toLower(d.drug_name) = toLower($name)
RETURN d.drug_id AS drug_id, d.drug_name AS drug_name
LIMIT 1"#,
            json!({ "name": name }),
        ),
        GraphQuery::DrugByBrandName { name, limit } => CypherStatement::new(
            r#"
MATCH (b:BrandName)-[:CONTAINS_DRUG]->(d:Drug)
WHERE toLower(b.brand_name) CONTAINS toLower($name)
RETURN d.drug_id AS drug_id, d.drug_name AS drug_name, b.brand_name AS brand_name
LIMIT $limit"#,
            json!({ "name": name, "limit": limit }),
        ),
        GraphQuery::DrugBySynonym { name, limit } => CypherStatement::new(
            r#"
MATCH (d:Drug)-[:KNOWN_AS]->(syn:Synonym)
WHERE toLower(syn.synonym) CONTAINS toLower($name)
RETURN d.drug_id AS drug_id, d.drug_name AS drug_name, syn.synonym AS synonym
LIMIT $limit"#,
            json!({ "name": name, "limit": limit }),
        ),
        GraphQuery::SupplementByExactName { name } => CypherStatement::new(
            r#"
MATCH (s:Supplement)
WHERE toLower(s.supplement_name) = toLower($name)
RETURN s.supplement_id AS supplement_id, s.supplement_name AS supplement_name
LIMIT 1"#,
            json!({ "name": name }),
        ),
        GraphQuery::SupplementByPartialName { name, limit } => CypherStatement::new(
            r#"
MATCH (s:Supplement)
WHERE toLower(s.supplement_name) CONTAINS toLower($name)
   OR ANY(word IN split(s.supplement_name, ' ') WHERE toLower(word) = toLower($name))
RETURN s.supplement_id AS supplement_id, s.supplement_name AS supplement_name
LIMIT $limit"#,
            json!({ "name": name, "limit": limit }),
        ),
        GraphQuery::ComprehensiveSafety {
            supplement,
            medications,
        } => CypherStatement::new(
            COMPREHENSIVE_SAFETY,
            json!({
                "supplement_name": supplement,
                "medication_names_lower": lowered(medications),
            }),
        ),
        GraphQuery::DietDeficiencies { restrictions } => CypherStatement::new(
            r#"
MATCH (dr:DietaryRestriction)-[r:DEFICIENT_IN]->(n:Nutrient)
WHERE toLower(dr.dietary_restriction_name) IN $restrictions
RETURN dr.dietary_restriction_name AS diet, n.nutrient_name AS nutrient,
       r.risk_level AS risk_level, r.confidence AS confidence"#,
            json!({ "restrictions": lowered(restrictions) }),
        ),
        GraphQuery::SupplementDepletions { supplements } => CypherStatement::new(
            r#"
MATCH (s:Supplement)-[r:DEPLETES]->(n:Nutrient)
WHERE toLower(s.supplement_name) IN $supplements
RETURN s.supplement_name AS supplement, n.nutrient_name AS nutrient,
       r.severity AS severity, r.mechanism AS mechanism, r.confidence AS confidence"#,
            json!({ "supplements": lowered(supplements) }),
        ),
        GraphQuery::MedicationDepletions { medications } => CypherStatement::new(
            r#"
MATCH (m:Medication)-[:CONTAINS_DRUG]->(d:Drug)-[r:DEPLETES]->(n:Nutrient)
WHERE toLower(m.medication_name) IN $medications
RETURN m.medication_name AS medication, d.drug_name AS drug, n.nutrient_name AS nutrient,
       r.risk_level AS risk_level, r.mechanism AS mechanism, r.confidence AS confidence"#,
            json!({ "medications": lowered(medications) }),
        ),
        GraphQuery::SupplementsForSymptom { symptom } => CypherStatement::new(
            r#"
MATCH (s:Supplement)-[:TREATS]->(sym:Symptom)
WHERE toLower(sym.symptom_name) CONTAINS toLower($symptom)
   OR toLower(sym.description) CONTAINS toLower($symptom)
RETURN DISTINCT s.supplement_name AS supplement, s.supplement_id AS supplement_id,
       sym.symptom_name AS symptom, s.safety_rating AS safety_rating
ORDER BY supplement"#,
            json!({ "symptom": symptom }),
        ),
        GraphQuery::SupplementsForSymptomWords { words, limit } => CypherStatement::new(
            r#"
MATCH (s:Supplement)-[:TREATS]->(sym:Symptom)
WHERE ANY(word IN $words WHERE toLower(sym.symptom_name) CONTAINS word)
RETURN DISTINCT s.supplement_name AS supplement, s.supplement_id AS supplement_id,
       sym.symptom_name AS symptom, s.safety_rating AS safety_rating
ORDER BY supplement
LIMIT $limit"#,
            json!({ "words": lowered(words), "limit": limit }),
        ),
        GraphQuery::SupplementsProvidingNutrient { nutrient, limit } => CypherStatement::new(
            r#"
MATCH (s:Supplement)-[:CONTAINS]->(ai:ActiveIngredient)-[:PROVIDES]->(n:Nutrient)
WHERE toLower(n.nutrient_name) = toLower($nutrient)
RETURN s.supplement_name AS supplement, s.category AS category,
       ai.active_ingredient AS active_ingredient
LIMIT $limit"#,
            json!({ "nutrient": nutrient, "limit": limit }),
        ),
    }
}
