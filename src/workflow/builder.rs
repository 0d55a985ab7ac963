//! 工作流构建器
//!
//! 推理服务客户端与图存储由调用方注入；构建器负责包上重试层并装配各节点。

use std::sync::Arc;
use std::time::Duration;

use crate::agents::{
    ClarificationStep, Clarifier, DeficiencyAnalyzer, EntityExtractor, EntityNormalizer,
    NoClarifier, RecommendationAdvisor, SafetyChecker, Specialist, Supervisor,
    SupervisorSettings, SynthesisComposer,
};
use crate::config::{AppConfig, MaxTokensSection};
use crate::core::{RetryPolicy, WorkflowError};
use crate::graph::{GraphStore, InMemoryGraph, Neo4jHttpStore, QueryExecutor};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryingLlmClient};
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::types::WorkflowLimits;

/// 工作流构建器
pub struct WorkflowBuilder {
    llm: Arc<dyn LlmClient>,
    graph: Arc<dyn GraphStore>,
    limits: WorkflowLimits,
    llm_retry: RetryPolicy,
    graph_retry: RetryPolicy,
    max_tokens: MaxTokensSection,
    spell_correction: bool,
    clarifier: Arc<dyn Clarifier>,
}

impl WorkflowBuilder {
    pub fn new(llm: Arc<dyn LlmClient>, graph: Arc<dyn GraphStore>) -> Self {
        Self {
            llm,
            graph,
            limits: WorkflowLimits::default(),
            llm_retry: RetryPolicy::default(),
            graph_retry: RetryPolicy::default(),
            max_tokens: MaxTokensSection::default(),
            spell_correction: true,
            clarifier: Arc::new(NoClarifier),
        }
    }

    /// 按配置文件设置限额、重试、输出上限
    pub fn with_config(self, cfg: &AppConfig) -> Self {
        self.limits(cfg.workflow.limits())
            .llm_retry(cfg.llm.retry.clone())
            .graph_retry(cfg.graph.retry.clone())
            .max_tokens(cfg.llm.max_tokens.clone())
            .spell_correction(cfg.llm.spell_correction)
    }

    pub fn limits(mut self, limits: WorkflowLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn llm_retry(mut self, policy: RetryPolicy) -> Self {
        self.llm_retry = policy;
        self
    }

    pub fn graph_retry(mut self, policy: RetryPolicy) -> Self {
        self.graph_retry = policy;
        self
    }

    pub fn max_tokens(mut self, max_tokens: MaxTokensSection) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn spell_correction(mut self, enabled: bool) -> Self {
        self.spell_correction = enabled;
        self
    }

    pub fn clarifier(mut self, clarifier: Arc<dyn Clarifier>) -> Self {
        self.clarifier = clarifier;
        self
    }

    /// 校验限额并装配引擎
    pub fn build(self) -> Result<WorkflowEngine, WorkflowError> {
        let limits = self.limits;
        if limits.max_iterations == 0 {
            return Err(WorkflowError::InvalidConfiguration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&limits.confidence_threshold) {
            return Err(WorkflowError::InvalidConfiguration(format!(
                "confidence_threshold {} is outside [0, 1]",
                limits.confidence_threshold
            )));
        }

        let llm: Arc<dyn LlmClient> =
            Arc::new(RetryingLlmClient::new(self.llm, self.llm_retry));
        let executor = QueryExecutor::new(self.graph, self.graph_retry);

        let mut normalizer = EntityNormalizer::new(executor.clone());
        if self.spell_correction {
            normalizer = normalizer.with_spell_correction(llm.clone(), self.max_tokens.correction);
        }
        let supervisor = Supervisor::new(
            llm.clone(),
            EntityExtractor::new(llm.clone()).with_max_tokens(self.max_tokens.extraction),
            normalizer,
            SupervisorSettings {
                confidence_threshold: limits.confidence_threshold,
                evidence_loop_limit: limits.evidence_loop_limit,
                requirements_max_tokens: self.max_tokens.requirements,
            },
        );
        let specialists: Vec<Box<dyn Specialist>> = vec![
            Box::new(SafetyChecker::new(executor.clone())),
            Box::new(DeficiencyAnalyzer::new(executor.clone())),
            Box::new(RecommendationAdvisor::new(executor)),
        ];

        tracing::debug!(
            "Workflow assembled: max_iterations={}, evidence_loop_limit={}, threshold={:.2}",
            limits.max_iterations,
            limits.evidence_loop_limit,
            limits.confidence_threshold
        );
        Ok(WorkflowEngine {
            llm: llm.clone(),
            supervisor,
            specialists,
            clarification: ClarificationStep::new(self.clarifier),
            synthesis: SynthesisComposer::new(llm, limits.confidence_threshold)
                .with_max_tokens(self.max_tokens.synthesis),
            limits,
        })
    }
}

/// 根据配置与环境变量选择推理服务后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var(&cfg.llm.api_key_env).ok();

    match (provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key))
                    .with_temperature(cfg.llm.temperature)
                    .with_request_timeout(Duration::from_secs(cfg.llm.timeouts.request)),
            )
        }
        ("mock", _) => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        (other, _) => {
            tracing::warn!(
                "No API key in {} or provider '{}' unknown, using Mock LLM",
                cfg.llm.api_key_env,
                other
            );
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 根据配置创建图存储（内存种子图 / Neo4j）
pub fn create_graph_from_config(cfg: &AppConfig) -> Result<Arc<dyn GraphStore>, WorkflowError> {
    match cfg.graph.backend.to_lowercase().as_str() {
        "memory" => {
            let graph = match &cfg.graph.seed_path {
                Some(path) => InMemoryGraph::from_json_file(path)?,
                None => {
                    tracing::warn!("No graph.seed_path configured, starting with an empty graph");
                    InMemoryGraph::new()
                }
            };
            Ok(Arc::new(graph))
        }
        "neo4j" => {
            let neo = &cfg.graph.neo4j;
            tracing::info!("Using Neo4j at {} (database {})", neo.uri, neo.database);
            let store = Neo4jHttpStore::with_timeout(
                &neo.uri,
                &neo.database,
                &neo.user,
                &neo.password,
                Duration::from_secs(neo.timeout_secs),
            )?;
            Ok(Arc::new(store))
        }
        other => Err(WorkflowError::InvalidConfiguration(format!(
            "unknown graph backend '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new(Arc::new(MockLlmClient::new()), Arc::new(InMemoryGraph::new()))
    }

    #[test]
    fn test_rejects_bad_limits() {
        let zero = WorkflowLimits {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(
            builder().limits(zero).build(),
            Err(WorkflowError::InvalidConfiguration(_))
        ));

        let threshold = WorkflowLimits {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(builder().limits(threshold).build().is_err());
        assert!(builder().build().is_ok());
    }

    #[test]
    fn test_graph_backend_selection() {
        let mut cfg = AppConfig::default();
        cfg.graph.backend = "cassandra".into();
        assert!(create_graph_from_config(&cfg).is_err());

        cfg.graph.backend = "memory".into();
        assert!(create_graph_from_config(&cfg).is_ok());
    }
}
