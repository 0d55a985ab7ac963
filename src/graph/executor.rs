//! 带重试与计时日志的查询执行器：所有专家都经由它访问图存储

use std::sync::Arc;
use std::time::Instant;

use crate::core::retry::{retry_with_backoff, RetryPolicy};
use crate::graph::{GraphError, GraphQuery, GraphStore, Row};

#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn GraphStore>,
    policy: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn GraphStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn backend(&self) -> &str {
        self.store.backend()
    }

    /// 执行一条查询；临时错误按策略退避重试
    pub async fn run(&self, query: &GraphQuery) -> Result<Vec<Row>, GraphError> {
        let started = Instant::now();
        let store = &self.store;
        let result = retry_with_backoff(
            &self.policy,
            query.kind(),
            GraphError::is_transient,
            move || async move { store.execute(query).await },
        )
        .await;

        match &result {
            Ok(rows) => tracing::debug!(
                "[{}] {} -> {} rows in {:?}",
                self.store.backend(),
                query.kind(),
                rows.len(),
                started.elapsed()
            ),
            Err(e) => tracing::warn!(
                "[{}] {} failed after {:?}: {}",
                self.store.backend(),
                query.kind(),
                started.elapsed(),
                e
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 前 n 次返回超时，之后返回一行
    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl GraphStore for FlakyStore {
        async fn execute(&self, _query: &GraphQuery) -> Result<Vec<Row>, GraphError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(GraphError::Timeout)
            } else {
                Ok(vec![Row::new()])
            }
        }
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_flaky_store_recovers() {
        let store = Arc::new(FlakyStore {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let executor = QueryExecutor::new(store.clone(), quick_policy(3));
        let rows = executor
            .run(&GraphQuery::DrugByExactName { name: "x".into() })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let store = Arc::new(FlakyStore {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let executor = QueryExecutor::new(store.clone(), quick_policy(2));
        let err = executor
            .run(&GraphQuery::DrugByExactName { name: "x".into() })
            .await
            .unwrap_err();
        assert_eq!(err, GraphError::Timeout);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }
}
