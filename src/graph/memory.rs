//! 内存属性图：测试与演示用的 GraphStore 实现
//!
//! 节点 {id, label, name, 属性}，边 {from, rel, to, 属性}；按 id 建索引并维护出/入邻接表。
//! 可从 JSON 种子文件加载（`{"nodes": [...], "edges": [...]}`），也可用链式方法直接搭建。
//! 每个 GraphQuery 变体在这里有一份与 Cypher 语义一致的遍历实现。

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::core::report::InteractionPathway;
use crate::graph::{GraphError, GraphQuery, GraphStore, Row};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedNode {
    pub id: String,
    pub label: String,
    pub name: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedEdge {
    pub from: String,
    pub rel: String,
    pub to: String,
    /// 边属性写在 "properties" 对象里
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// 种子文件格式
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub nodes: Vec<SeedNode>,
    #[serde(default)]
    pub edges: Vec<SeedEdge>,
}

#[derive(Debug, Clone)]
struct Edge {
    from: usize,
    rel: String,
    to: usize,
    properties: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct InMemoryGraph {
    nodes: Vec<SeedNode>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    outgoing: HashMap<usize, Vec<usize>>,
    incoming: HashMap<usize, Vec<usize>>,
}

const DUPLICATION_RISK: &str = "Contains equivalent pharmaceutical ingredient - duplication risk";
const SIMILAR_EFFECT_RISK: &str = "Similar pharmacological effect - additive or antagonistic risk";

fn props(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从种子数据构建；重复节点 id 或悬空边返回 Seed 错误
    pub fn from_seed(seed: SeedData) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in seed.nodes {
            if graph.index.contains_key(&node.id) {
                return Err(GraphError::Seed(format!("duplicate node id '{}'", node.id)));
            }
            graph.insert_node(node);
        }
        for edge in seed.edges {
            graph.insert_edge(&edge.from, &edge.rel, &edge.to, edge.properties)?;
        }
        Ok(graph)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, GraphError> {
        let seed: SeedData =
            serde_json::from_str(raw).map_err(|e| GraphError::Seed(e.to_string()))?;
        Self::from_seed(seed)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Seed(format!("{}: {}", path.display(), e)))?;
        let graph = Self::from_json_str(&raw)?;
        tracing::info!(
            "Loaded seed graph from {} ({} nodes, {} edges)",
            path.display(),
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// 链式添加节点（同 id 覆盖名字与属性）
    pub fn node(self, id: &str, label: &str, name: &str) -> Self {
        self.node_with(id, label, name, Value::Null)
    }

    pub fn node_with(mut self, id: &str, label: &str, name: &str, properties: Value) -> Self {
        let node = SeedNode {
            id: id.to_string(),
            label: label.to_string(),
            name: name.to_string(),
            properties: props(properties),
        };
        match self.index.get(id) {
            Some(&idx) => self.nodes[idx] = node,
            None => self.insert_node(node),
        }
        self
    }

    /// 链式添加边；端点不存在时记录告警并忽略
    pub fn edge(self, from: &str, rel: &str, to: &str) -> Self {
        self.edge_with(from, rel, to, Value::Null)
    }

    pub fn edge_with(mut self, from: &str, rel: &str, to: &str, properties: Value) -> Self {
        if let Err(e) = self.insert_edge(from, rel, to, props(properties)) {
            tracing::warn!("skipping edge: {}", e);
        }
        self
    }

    fn insert_node(&mut self, node: SeedNode) {
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    fn insert_edge(
        &mut self,
        from: &str,
        rel: &str,
        to: &str,
        properties: Map<String, Value>,
    ) -> Result<(), GraphError> {
        let lookup = |id: &str| {
            self.index.get(id).copied().ok_or_else(|| {
                GraphError::Seed(format!(
                    "edge {}-[{}]->{} references unknown node '{}'",
                    from, rel, to, id
                ))
            })
        };
        let (from_idx, to_idx) = (lookup(from)?, lookup(to)?);
        let edge_idx = self.edges.len();
        self.edges.push(Edge {
            from: from_idx,
            rel: rel.to_string(),
            to: to_idx,
            properties,
        });
        self.outgoing.entry(from_idx).or_default().push(edge_idx);
        self.incoming.entry(to_idx).or_default().push(edge_idx);
        Ok(())
    }

    // ---- traversal primitives ----

    fn with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.label == label)
            .map(|(i, _)| i)
    }

    /// 名字（小写）落在集合内的节点
    fn named_in<'a>(
        &'a self,
        label: &'a str,
        names_lower: &'a HashSet<String>,
    ) -> impl Iterator<Item = usize> + 'a {
        self.with_label(label)
            .filter(move |&i| names_lower.contains(&self.nodes[i].name.to_lowercase()))
    }

    /// 出边：(边, 目标节点)，限定关系名与目标标签
    fn out<'a>(
        &'a self,
        node: usize,
        rel: &'a str,
        target_label: &'a str,
    ) -> impl Iterator<Item = (&'a Edge, usize)> + 'a {
        self.outgoing
            .get(&node)
            .into_iter()
            .flatten()
            .map(move |&e| &self.edges[e])
            .filter(move |e| e.rel == rel && self.nodes[e.to].label == target_label)
            .map(|e| (e, e.to))
    }

    /// 入边：(边, 源节点)
    fn inc<'a>(
        &'a self,
        node: usize,
        rel: &'a str,
        source_label: &'a str,
    ) -> impl Iterator<Item = (&'a Edge, usize)> + 'a {
        self.incoming
            .get(&node)
            .into_iter()
            .flatten()
            .map(move |&e| &self.edges[e])
            .filter(move |e| e.rel == rel && self.nodes[e.from].label == source_label)
            .map(|e| (e, e.from))
    }

    fn name(&self, idx: usize) -> &str {
        &self.nodes[idx].name
    }

    fn id(&self, idx: usize) -> &str {
        &self.nodes[idx].id
    }

    fn node_prop(&self, idx: usize, key: &str) -> Value {
        self.nodes[idx].properties.get(key).cloned().unwrap_or(Value::Null)
    }

    // ---- query implementations ----

    fn drug_by_exact_name(&self, name: &str) -> Vec<Row> {
        let wanted = name.to_lowercase();
        self.with_label("Drug")
            .filter(|&i| self.name(i).to_lowercase() == wanted)
            .take(1)
            .map(|i| row(json!({ "drug_id": self.id(i), "drug_name": self.name(i) })))
            .collect()
    }

    fn drug_by_brand_name(&self, name: &str, limit: usize) -> Vec<Row> {
        let wanted = name.to_lowercase();
        self.with_label("BrandName")
            .filter(|&b| contains_ci(self.name(b), &wanted))
            .flat_map(|b| {
                self.out(b, "CONTAINS_DRUG", "Drug").map(move |(_, d)| {
                    row(json!({
                        "drug_id": self.id(d),
                        "drug_name": self.name(d),
                        "brand_name": self.name(b),
                    }))
                })
            })
            .take(limit)
            .collect()
    }

    fn drug_by_synonym(&self, name: &str, limit: usize) -> Vec<Row> {
        let wanted = name.to_lowercase();
        self.with_label("Synonym")
            .filter(|&s| contains_ci(self.name(s), &wanted))
            .flat_map(|s| {
                self.inc(s, "KNOWN_AS", "Drug").map(move |(_, d)| {
                    row(json!({
                        "drug_id": self.id(d),
                        "drug_name": self.name(d),
                        "synonym": self.name(s),
                    }))
                })
            })
            .take(limit)
            .collect()
    }

    fn supplement_by_exact_name(&self, name: &str) -> Vec<Row> {
        let wanted = name.to_lowercase();
        self.with_label("Supplement")
            .filter(|&i| self.name(i).to_lowercase() == wanted)
            .take(1)
            .map(|i| row(json!({ "supplement_id": self.id(i), "supplement_name": self.name(i) })))
            .collect()
    }

    fn supplement_by_partial_name(&self, name: &str, limit: usize) -> Vec<Row> {
        let wanted = name.to_lowercase();
        self.with_label("Supplement")
            .filter(|&i| {
                let n = self.name(i).to_lowercase();
                n.contains(&wanted) || n.split(' ').any(|w| w == wanted)
            })
            .take(limit)
            .map(|i| row(json!({ "supplement_id": self.id(i), "supplement_name": self.name(i) })))
            .collect()
    }

    fn comprehensive_safety(&self, supplement: &str, medications: &[String]) -> Vec<Row> {
        let supp_lower = supplement.to_lowercase();
        let med_names: HashSet<String> = medications.iter().map(|m| m.to_lowercase()).collect();
        let meds: HashSet<usize> = self.named_in("Medication", &med_names).collect();
        let supplements: Vec<usize> = self
            .with_label("Supplement")
            .filter(|&s| self.name(s).to_lowercase() == supp_lower)
            .collect();

        // 用药 -> 其所含药物
        let meds_containing = |drug: usize| -> Vec<usize> {
            self.inc(drug, "CONTAINS_DRUG", "Medication")
                .map(|(_, m)| m)
                .filter(|m| meds.contains(m))
                .collect()
        };
        let from_edge = |e: &Edge| (edge_prop(e, "description"), edge_prop(e, "severity"));

        let mut rows = Vec::new();
        let mut push = |s: usize,
                        m: usize,
                        (description, severity): (Value, Value),
                        detail: Value,
                        pathway: InteractionPathway| {
            rows.push(row(json!({
                "supplement": self.name(s),
                "target": self.name(m),
                "description": description,
                "severity": severity,
                "detail": detail,
                "pathway": pathway.label(),
            })));
        };

        for &s in &supplements {
            for (e, m) in self.out(s, "INTERACTS_WITH", "Medication") {
                if meds.contains(&m) {
                    push(
                        s,
                        m,
                        from_edge(e),
                        Value::Null,
                        InteractionPathway::DirectSupplementMedication,
                    );
                }
            }
        }
        for &s in &supplements {
            for (e, d) in self.out(s, "INTERACTS_WITH", "Drug") {
                for m in meds_containing(d) {
                    push(
                        s,
                        m,
                        from_edge(e),
                        json!(self.name(d)),
                        InteractionPathway::SupplementDrugMedication,
                    );
                }
            }
        }
        for &s in &supplements {
            for (_, a) in self.out(s, "CONTAINS", "ActiveIngredient") {
                for (_, d1) in self.out(a, "EQUIVALENT_TO", "Drug") {
                    let partners = self
                        .out(d1, "INTERACTS_WITH", "Drug")
                        .chain(self.inc(d1, "INTERACTS_WITH", "Drug"))
                        .filter(|(_, d2)| *d2 != d1);
                    for (e, d2) in partners {
                        for m in meds_containing(d2) {
                            let detail = format!("{} <-> {}", self.name(d1), self.name(d2));
                            push(
                                s,
                                m,
                                from_edge(e),
                                json!(detail),
                                InteractionPathway::SharedDrugInteraction,
                            );
                        }
                    }
                }
            }
        }
        for &s in &supplements {
            for (_, a) in self.out(s, "CONTAINS", "ActiveIngredient") {
                for (_, d) in self.out(a, "EQUIVALENT_TO", "Drug") {
                    for m in meds_containing(d) {
                        let detail = format!("{} = {}", self.name(a), self.name(d));
                        push(
                            s,
                            m,
                            (json!(DUPLICATION_RISK), json!("HIGH")),
                            json!(detail),
                            InteractionPathway::HiddenPharmaEquivalence,
                        );
                    }
                }
            }
        }
        for &s in &supplements {
            for (_, c) in self.out(s, "HAS_SIMILAR_EFFECT_TO", "Category") {
                for (_, d) in self.inc(c, "BELONGS_TO", "Drug") {
                    for m in meds_containing(d) {
                        push(
                            s,
                            m,
                            (json!(SIMILAR_EFFECT_RISK), json!("MODERATE")),
                            json!(self.name(c)),
                            InteractionPathway::SimilarEffect,
                        );
                    }
                }
            }
        }
        rows
    }

    fn diet_deficiencies(&self, restrictions: &[String]) -> Vec<Row> {
        let wanted: HashSet<String> = restrictions.iter().map(|r| r.to_lowercase()).collect();
        self.named_in("DietaryRestriction", &wanted)
            .flat_map(|dr| {
                self.out(dr, "DEFICIENT_IN", "Nutrient").map(move |(e, n)| {
                    row(json!({
                        "diet": self.name(dr),
                        "nutrient": self.name(n),
                        "risk_level": edge_prop(e, "risk_level"),
                        "confidence": edge_prop(e, "confidence"),
                    }))
                })
            })
            .collect()
    }

    fn supplement_depletions(&self, supplements: &[String]) -> Vec<Row> {
        let wanted: HashSet<String> = supplements.iter().map(|s| s.to_lowercase()).collect();
        self.named_in("Supplement", &wanted)
            .flat_map(|s| {
                self.out(s, "DEPLETES", "Nutrient").map(move |(e, n)| {
                    row(json!({
                        "supplement": self.name(s),
                        "nutrient": self.name(n),
                        "severity": edge_prop(e, "severity"),
                        "mechanism": edge_prop(e, "mechanism"),
                        "confidence": edge_prop(e, "confidence"),
                    }))
                })
            })
            .collect()
    }

    fn medication_depletions(&self, medications: &[String]) -> Vec<Row> {
        let wanted: HashSet<String> = medications.iter().map(|m| m.to_lowercase()).collect();
        self.named_in("Medication", &wanted)
            .flat_map(|m| {
                self.out(m, "CONTAINS_DRUG", "Drug").flat_map(move |(_, d)| {
                    self.out(d, "DEPLETES", "Nutrient").map(move |(e, n)| {
                        row(json!({
                            "medication": self.name(m),
                            "drug": self.name(d),
                            "nutrient": self.name(n),
                            "risk_level": edge_prop(e, "risk_level"),
                            "mechanism": edge_prop(e, "mechanism"),
                            "confidence": edge_prop(e, "confidence"),
                        }))
                    })
                })
            })
            .collect()
    }

    /// Supplement -CONTAINS-> ActiveIngredient -PROVIDES-> Nutrient
    fn supplements_providing_nutrient(&self, nutrient: &str, limit: usize) -> Vec<Row> {
        let wanted = nutrient.to_lowercase();
        self.with_label("Nutrient")
            .filter(|&n| self.name(n).to_lowercase() == wanted)
            .flat_map(|n| {
                self.inc(n, "PROVIDES", "ActiveIngredient").flat_map(move |(_, a)| {
                    self.inc(a, "CONTAINS", "Supplement").map(move |(_, s)| {
                        row(json!({
                            "supplement": self.name(s),
                            "category": self.node_prop(s, "category"),
                            "active_ingredient": self.name(a),
                        }))
                    })
                })
            })
            .take(limit)
            .collect()
    }

    /// Supplement -TREATS-> Symptom，按补充剂名排序去重
    fn supplements_treating(
        &self,
        matches: impl Fn(usize) -> bool,
        limit: Option<usize>,
    ) -> Vec<Row> {
        let mut found: Vec<(String, usize, usize)> = Vec::new();
        let mut seen = HashSet::new();
        for sym in self.with_label("Symptom").filter(|&i| matches(i)) {
            for (_, s) in self.inc(sym, "TREATS", "Supplement") {
                if seen.insert(s) {
                    found.push((self.name(s).to_string(), s, sym));
                }
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, s, sym)| {
                row(json!({
                    "supplement": self.name(s),
                    "supplement_id": self.id(s),
                    "symptom": self.name(sym),
                    "safety_rating": self.node_prop(s, "safety_rating"),
                }))
            })
            .collect()
    }

    fn supplements_for_symptom(&self, symptom: &str) -> Vec<Row> {
        let wanted = symptom.trim().to_lowercase();
        if wanted.is_empty() {
            return Vec::new();
        }
        self.supplements_treating(
            |sym| {
                contains_ci(self.name(sym), &wanted)
                    || self
                        .node_prop(sym, "description")
                        .as_str()
                        .map(|d| contains_ci(d, &wanted))
                        .unwrap_or(false)
            },
            None,
        )
    }

    fn supplements_for_symptom_words(&self, words: &[String], limit: usize) -> Vec<Row> {
        let words: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
        if words.is_empty() {
            return Vec::new();
        }
        self.supplements_treating(
            |sym| words.iter().any(|w| contains_ci(self.name(sym), w)),
            Some(limit),
        )
    }
}

fn row(value: Value) -> Row {
    props(value)
}

fn edge_prop(edge: &Edge, key: &str) -> Value {
    edge.properties.get(key).cloned().unwrap_or(Value::Null)
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn execute(&self, query: &GraphQuery) -> Result<Vec<Row>, GraphError> {
        let rows = match query {
            GraphQuery::DrugByExactName { name } => self.drug_by_exact_name(name),
            GraphQuery::DrugByBrandName { name, limit } => self.drug_by_brand_name(name, *limit),
            GraphQuery::DrugBySynonym { name, limit } => self.drug_by_synonym(name, *limit),
            GraphQuery::SupplementByExactName { name } => self.supplement_by_exact_name(name),
            GraphQuery::SupplementByPartialName { name, limit } => {
                self.supplement_by_partial_name(name, *limit)
            }
            GraphQuery::ComprehensiveSafety {
                supplement,
                medications,
            } => self.comprehensive_safety(supplement, medications),
            GraphQuery::DietDeficiencies { restrictions } => self.diet_deficiencies(restrictions),
            GraphQuery::SupplementDepletions { supplements } => {
                self.supplement_depletions(supplements)
            }
            GraphQuery::MedicationDepletions { medications } => {
                self.medication_depletions(medications)
            }
            GraphQuery::SupplementsForSymptom { symptom } => self.supplements_for_symptom(symptom),
            GraphQuery::SupplementsForSymptomWords { words, limit } => {
                self.supplements_for_symptom_words(words, *limit)
            }
            GraphQuery::SupplementsProvidingNutrient { nutrient, limit } => {
                self.supplements_providing_nutrient(nutrient, *limit)
            }
        };
        Ok(rows)
    }

    fn backend(&self) -> &str {
        "memory"
    }
}
