//! NutriMind - 补充剂 / 药物 / 饮食安全问答
//!
//! 模块划分：
//! - **agents**: Supervisor、实体抽取与归一化、安全 / 缺乏 / 推荐三类专家、澄清、Synthesis
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态、专家结果类型、错误、调用端重试
//! - **graph**: 知识图谱查询（内存图 / Neo4j）
//! - **llm**: 推理服务客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **workflow**: Router、工作流引擎与构建器

pub mod agents;
pub mod config;
pub mod core;
pub mod graph;
pub mod llm;
pub mod observability;
pub mod workflow;

pub use crate::core::{ConversationState, PatientProfile};
pub use workflow::{WorkflowAnswer, WorkflowBuilder, WorkflowEngine};
