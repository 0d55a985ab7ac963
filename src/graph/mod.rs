//! 图存储层：类型化查询、Cypher 生成、内存图、Neo4j HTTP 后端与带重试的执行器
//!
//! 上层只依赖 GraphStore::execute(query) -> rows；rows 是扁平的 key/value 记录。

pub mod cypher;
pub mod executor;
pub mod memory;
pub mod neo4j;
pub mod query;

use async_trait::async_trait;
use thiserror::Error;

pub use cypher::{to_cypher, CypherStatement};
pub use executor::QueryExecutor;
pub use memory::{InMemoryGraph, SeedData};
pub use neo4j::Neo4jHttpStore;
pub use query::{number_field, text_field, GraphQuery};

/// 一行查询结果（列名 -> 值）
pub type Row = serde_json::Map<String, serde_json::Value>;

/// 图存储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query timed out")]
    Timeout,

    #[error("transient store error: {0}")]
    Transient(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("invalid seed data: {0}")]
    Seed(String),
}

impl GraphError {
    /// 连接、超时、存储端临时错误可重试；查询本身错误不重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GraphError::Connection(_) | GraphError::Timeout | GraphError::Transient(_)
        )
    }
}

/// 图存储接口
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn execute(&self, query: &GraphQuery) -> Result<Vec<Row>, GraphError>;

    /// 后端名（日志用）
    fn backend(&self) -> &str {
        "graph"
    }
}
