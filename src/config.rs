//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NUTRIMIND__*` 覆盖（双下划线表示嵌套，如 `NUTRIMIND__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::RetryPolicy;
use crate::workflow::WorkflowLimits;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub graph: GraphSection,
    pub workflow: WorkflowSection,
}

/// [app] 段：应用名与默认日志级别（RUST_LOG 优先）
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// [llm] 段：后端选择、超时、各用途的输出上限与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    /// 拼写纠正是否走推理服务
    #[serde(default = "default_true")]
    pub spell_correction: bool,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    #[serde(default)]
    pub max_tokens: MaxTokensSection,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            spell_correction: true,
            timeouts: LlmTimeoutsSection::default(),
            max_tokens: MaxTokensSection::default(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [llm.max_tokens] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaxTokensSection {
    pub extraction: u32,
    pub requirements: u32,
    pub correction: u32,
    pub synthesis: u32,
}

impl Default for MaxTokensSection {
    fn default() -> Self {
        Self {
            extraction: 1000,
            requirements: 500,
            correction: 50,
            synthesis: 1500,
        }
    }
}

/// [graph] 段：memory（种子文件）或 neo4j
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    pub seed_path: Option<PathBuf>,
    #[serde(default)]
    pub neo4j: Neo4jSection,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            seed_path: None,
            neo4j: Neo4jSection::default(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}

/// [graph.neo4j] 段；密码建议用 NUTRIMIND__GRAPH__NEO4J__PASSWORD 注入
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jSection {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub timeout_secs: u64,
}

impl Default for Neo4jSection {
    fn default() -> Self {
        Self {
            uri: "http://localhost:7474".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
            timeout_secs: 30,
        }
    }
}

/// [workflow] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub max_iterations: u32,
    pub evidence_loop_limit: u32,
    pub confidence_threshold: f64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        let limits = WorkflowLimits::default();
        Self {
            max_iterations: limits.max_iterations,
            evidence_loop_limit: limits.evidence_loop_limit,
            confidence_threshold: limits.confidence_threshold,
        }
    }
}

impl WorkflowSection {
    pub fn limits(&self) -> WorkflowLimits {
        WorkflowLimits {
            max_iterations: self.max_iterations,
            evidence_loop_limit: self.evidence_loop_limit,
            confidence_threshold: self.confidence_threshold,
        }
    }
}

/// 从 config 目录加载配置，环境变量 NUTRIMIND__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NUTRIMIND__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NUTRIMIND")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
