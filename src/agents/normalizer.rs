//! 实体规范化：自由文本名字 -> 图谱中的规范实体
//!
//! 用药：药名精确 -> 品牌名包含 -> 同义词包含 -> 推理服务拼写纠正后重试一次
//! 补充剂：名字精确 -> 部分匹配 -> 拼写纠正后重试一次
//!
//! 命中同一 canonical_id 的多行视为同一个实体（HIGH）；多个不同 id 为 AMBIGUOUS。

use std::sync::Arc;

use crate::core::{Candidate, EntityKind, NormalizedEntity};
use crate::graph::{text_field, GraphError, GraphQuery, QueryExecutor, Row};
use crate::llm::LlmClient;

pub const DEFAULT_CORRECTION_MAX_TOKENS: u32 = 50;
const CANDIDATE_LIMIT: usize = 5;

pub struct EntityNormalizer {
    executor: QueryExecutor,
    /// 为 None 时跳过拼写纠正
    llm: Option<Arc<dyn LlmClient>>,
    correction_max_tokens: u32,
}

impl EntityNormalizer {
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            executor,
            llm: None,
            correction_max_tokens: DEFAULT_CORRECTION_MAX_TOKENS,
        }
    }

    pub fn with_spell_correction(mut self, llm: Arc<dyn LlmClient>, max_tokens: u32) -> Self {
        self.llm = Some(llm);
        self.correction_max_tokens = max_tokens;
        self
    }

    /// 规范化一个名字；只有图查询失败才返回错误
    pub async fn normalize(
        &self,
        name: &str,
        kind: EntityKind,
    ) -> Result<NormalizedEntity, GraphError> {
        let name = name.trim();
        if let Some(entity) = self.lookup(name, kind).await? {
            return Ok(entity);
        }

        if let Some(corrected) = self.spell_correct(name, kind).await {
            tracing::info!("Spell correction: '{}' -> '{}'", name, corrected);
            if let Some(mut entity) = self.lookup(&corrected, kind).await? {
                entity.corrected_from = Some(name.to_string());
                return Ok(entity);
            }
        }

        tracing::debug!("No {} match for '{}'", kind, name);
        Ok(NormalizedEntity::not_found(kind, name))
    }

    async fn lookup(
        &self,
        name: &str,
        kind: EntityKind,
    ) -> Result<Option<NormalizedEntity>, GraphError> {
        match kind {
            EntityKind::Medication => self.lookup_medication(name).await,
            EntityKind::Supplement => self.lookup_supplement(name).await,
        }
    }

    async fn lookup_medication(&self, name: &str) -> Result<Option<NormalizedEntity>, GraphError> {
        let kind = EntityKind::Medication;
        let rows = self
            .executor
            .run(&GraphQuery::DrugByExactName { name: name.to_string() })
            .await?;
        if let Some(c) = candidates(&rows, "drug_id", "drug_name", None).into_iter().next() {
            return Ok(Some(NormalizedEntity::high(
                kind,
                name,
                c.name,
                c.canonical_id,
                "exact_drug_name",
            )));
        }

        let rows = self
            .executor
            .run(&GraphQuery::DrugByBrandName {
                name: name.to_string(),
                limit: CANDIDATE_LIMIT,
            })
            .await?;
        let found = candidates(&rows, "drug_id", "drug_name", Some("brand_name"));
        if let Some(entity) = resolve(kind, name, found, "brand_name", "multiple_brand_names") {
            return Ok(Some(entity));
        }

        let rows = self
            .executor
            .run(&GraphQuery::DrugBySynonym {
                name: name.to_string(),
                limit: CANDIDATE_LIMIT,
            })
            .await?;
        let found = candidates(&rows, "drug_id", "drug_name", Some("synonym"));
        Ok(resolve(kind, name, found, "synonym", "multiple_synonyms"))
    }

    async fn lookup_supplement(&self, name: &str) -> Result<Option<NormalizedEntity>, GraphError> {
        let kind = EntityKind::Supplement;
        let rows = self
            .executor
            .run(&GraphQuery::SupplementByExactName { name: name.to_string() })
            .await?;
        if let Some(c) = candidates(&rows, "supplement_id", "supplement_name", None)
            .into_iter()
            .next()
        {
            return Ok(Some(NormalizedEntity::high(
                kind,
                name,
                c.name,
                c.canonical_id,
                "exact_supplement_name",
            )));
        }

        let rows = self
            .executor
            .run(&GraphQuery::SupplementByPartialName {
                name: name.to_string(),
                limit: CANDIDATE_LIMIT,
            })
            .await?;
        let found = candidates(&rows, "supplement_id", "supplement_name", None);
        Ok(resolve(kind, name, found, "partial_match", "multiple_supplements"))
    }

    /// 请推理服务纠正拼写；与原文（忽略大小写）相同或调用失败时返回 None
    async fn spell_correct(&self, name: &str, kind: EntityKind) -> Option<String> {
        let llm = self.llm.as_ref()?;
        let prompt = format!(
            "You are a medical spell-checker. The user typed \"{name}\" as a {kind} name. \
             If it is a misspelling, abbreviation or common nickname, reply with ONLY the \
             correct {kind} name. If it already looks correct, reply with the same text. \
             No explanation."
        );
        let reply = match llm.complete_prompt(&prompt, self.correction_max_tokens).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Spell correction for '{}' failed: {}", name, e);
                return None;
            }
        };
        let corrected = reply.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        if corrected.is_empty() || corrected.eq_ignore_ascii_case(name) {
            return None;
        }
        Some(corrected.to_string())
    }
}

/// 行 -> 候选项，按 canonical_id 去重（保留首次出现）
fn candidates(rows: &[Row], id_key: &str, name_key: &str, via_key: Option<&str>) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();
    for row in rows {
        let (Some(id), Some(name)) = (text_field(row, id_key), text_field(row, name_key)) else {
            continue;
        };
        if out.iter().any(|c| c.canonical_id == id) {
            continue;
        }
        out.push(Candidate {
            canonical_id: id,
            name,
            via: via_key.and_then(|k| text_field(row, k)),
        });
    }
    out
}

fn resolve(
    kind: EntityKind,
    input: &str,
    mut found: Vec<Candidate>,
    single: &str,
    multiple: &str,
) -> Option<NormalizedEntity> {
    match found.len() {
        0 => None,
        1 => {
            let c = found.remove(0);
            Some(NormalizedEntity::high(kind, input, c.name, c.canonical_id, single))
        }
        _ => Some(NormalizedEntity::ambiguous(kind, input, found, multiple)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConfidenceTier, RetryPolicy};
    use crate::graph::InMemoryGraph;
    use crate::llm::MockLlmClient;

    fn executor() -> QueryExecutor {
        let graph = InMemoryGraph::new()
            .node("DB00682", "Drug", "Warfarin")
            .node("DB01050", "Drug", "Ibuprofen")
            .node("DB00316", "Drug", "Acetaminophen")
            .node("B1", "BrandName", "Coumadin")
            .node("B2", "BrandName", "Advil")
            .node("B3", "BrandName", "Advil PM")
            .node("B4", "BrandName", "Tylenol")
            .node("B5", "BrandName", "Tylenol PM Advanced")
            .node("SYN1", "Synonym", "paracetamol")
            .node("S01", "Supplement", "Vitamin D3")
            .node("S02", "Supplement", "Vitamin B12")
            .node("S03", "Supplement", "Fish Oil")
            .edge("B1", "CONTAINS_DRUG", "DB00682")
            .edge("B2", "CONTAINS_DRUG", "DB01050")
            .edge("B3", "CONTAINS_DRUG", "DB01050")
            .edge("B4", "CONTAINS_DRUG", "DB00316")
            .edge("B5", "CONTAINS_DRUG", "DB00316")
            .edge("B5", "CONTAINS_DRUG", "DB01050")
            .edge("DB00316", "KNOWN_AS", "SYN1");
        QueryExecutor::new(Arc::new(graph), RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_exact_name_round_trip() {
        let normalizer = EntityNormalizer::new(executor());
        let entity = normalizer.normalize("WARFARIN", EntityKind::Medication).await.unwrap();
        assert_eq!(entity.confidence_tier, ConfidenceTier::High);
        assert_eq!(entity.canonical_id.as_deref(), Some("DB00682"));
        assert_eq!(entity.match_type, "exact_drug_name");
    }

    #[tokio::test]
    async fn test_brand_rows_for_same_drug_collapse() {
        let normalizer = EntityNormalizer::new(executor());
        let entity = normalizer.normalize("advil", EntityKind::Medication).await.unwrap();
        assert_eq!(entity.confidence_tier, ConfidenceTier::High);
        assert_eq!(entity.matched_name.as_deref(), Some("Ibuprofen"));
        assert_eq!(entity.match_type, "brand_name");
    }

    #[tokio::test]
    async fn test_brand_matching_two_drugs_is_ambiguous() {
        let normalizer = EntityNormalizer::new(executor());
        let entity = normalizer.normalize("tylenol", EntityKind::Medication).await.unwrap();
        assert!(entity.is_ambiguous());
        assert_eq!(entity.match_type, "multiple_brand_names");
        assert_eq!(entity.candidates.len(), 2);
        assert!(entity.canonical_id.is_none());
    }

    #[tokio::test]
    async fn test_synonym_and_partial_matches() {
        let normalizer = EntityNormalizer::new(executor());
        let entity = normalizer.normalize("Paracetamol", EntityKind::Medication).await.unwrap();
        assert_eq!(entity.canonical_id.as_deref(), Some("DB00316"));
        assert_eq!(entity.match_type, "synonym");

        let entity = normalizer.normalize("fish", EntityKind::Supplement).await.unwrap();
        assert_eq!(entity.canonical_id.as_deref(), Some("S03"));
        assert_eq!(entity.match_type, "partial_match");

        let entity = normalizer.normalize("vitamin", EntityKind::Supplement).await.unwrap();
        assert_eq!(entity.match_type, "multiple_supplements");
    }

    #[tokio::test]
    async fn test_spell_correction_retries_once() {
        let mock = Arc::new(MockLlmClient::new().on("spell-checker", "\"Warfarin\""));
        let normalizer = EntityNormalizer::new(executor()).with_spell_correction(mock.clone(), 50);
        let entity = normalizer.normalize("warfrin", EntityKind::Medication).await.unwrap();
        assert_eq!(entity.canonical_id.as_deref(), Some("DB00682"));
        assert_eq!(entity.user_input, "Warfarin");
        assert_eq!(entity.corrected_from.as_deref(), Some("warfrin"));
        assert_eq!(mock.calls_matching("spell-checker"), 1);
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let mock = Arc::new(MockLlmClient::new().on("spell-checker", "zzzqx"));
        let normalizer = EntityNormalizer::new(executor()).with_spell_correction(mock, 50);
        let entity = normalizer.normalize("zzzqx", EntityKind::Supplement).await.unwrap();
        assert_eq!(entity.confidence_tier, ConfidenceTier::NotFound);
        assert_eq!(entity.match_type, "none");
        assert!(entity.corrected_from.is_none());
    }
}
