//! 集成测试共用：演示图谱、脚本化推理服务、引擎装配

#![allow(dead_code)]

use std::sync::Arc;

use nutrimind::agents::Clarifier;
use nutrimind::core::RetryPolicy;
use nutrimind::graph::InMemoryGraph;
use nutrimind::llm::MockLlmClient;
use nutrimind::workflow::{WorkflowBuilder, WorkflowEngine, WorkflowLimits};
use nutrimind::PatientProfile;

pub const EXTRACTION: &str = "medical entity extraction";
pub const REQUIREMENTS: &str = "determine what they need";
pub const SYNTHESIS: &str = "supplement safety advisor";

pub fn demo_graph() -> InMemoryGraph {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/demo_graph.json");
    InMemoryGraph::from_json_file(path).expect("demo graph should load")
}

/// 需求分析回复
pub fn requirements(safety: bool, deficiency: bool, recommendations: bool) -> String {
    format!(
        r#"{{"needs_safety_check": {}, "needs_deficiency_check": {}, "needs_recommendations": {}, "reasoning": "scripted"}}"#,
        safety, deficiency, recommendations
    )
}

/// 抽取 + 需求分析 + synthesis 三段脚本
pub fn scripted(extraction: &str, requirements: &str) -> MockLlmClient {
    MockLlmClient::new()
        .on(EXTRACTION, extraction)
        .on(REQUIREMENTS, requirements)
        .on(SYNTHESIS, "Here is your personalized answer.")
}

pub fn engine_with(
    llm: Arc<MockLlmClient>,
    limits: WorkflowLimits,
    clarifier: Option<Arc<dyn Clarifier>>,
) -> WorkflowEngine {
    let mut builder = WorkflowBuilder::new(llm, Arc::new(demo_graph()))
        .limits(limits)
        .llm_retry(RetryPolicy::none())
        .graph_retry(RetryPolicy::none())
        .spell_correction(false);
    if let Some(clarifier) = clarifier {
        builder = builder.clarifier(clarifier);
    }
    builder.build().expect("engine should build")
}

pub fn engine(llm: Arc<MockLlmClient>) -> WorkflowEngine {
    engine_with(llm, WorkflowLimits::default(), None)
}

pub fn profile(medications: &[&str], supplements: &[&str], diet: &[&str]) -> PatientProfile {
    let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
    PatientProfile {
        medications: owned(medications),
        supplements: owned(supplements),
        conditions: Vec::new(),
        dietary_restrictions: owned(diet),
    }
}
