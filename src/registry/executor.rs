//! Execution engine seam
//!
//! The compiler never runs SQL itself. Anything that can execute a statement
//! (a connection pool, a migration runner, a dry-run log) implements
//! [`SqlExecutor`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::rollup::{RollupError, RollupResult};

/// Executes DDL and refresh statements against the engine
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute one statement
    async fn execute(&self, statement: &str) -> RollupResult<()>;
}

/// Executor that records statements instead of running them
///
/// Used for dry runs and tests. Optionally fails on statements containing a
/// given pattern to stand in for an engine error.
#[derive(Debug, Clone, Default)]
pub struct StatementLog {
    statements: Arc<RwLock<Vec<String>>>,
    fail_on: Option<String>,
}

impl StatementLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any statement containing `pattern`
    pub fn failing_on(pattern: impl Into<String>) -> Self {
        Self {
            statements: Arc::default(),
            fail_on: Some(pattern.into()),
        }
    }

    /// Statements recorded so far, in execution order
    pub async fn statements(&self) -> Vec<String> {
        self.statements.read().await.clone()
    }

    /// Drain the recorded statements
    pub async fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.statements.write().await)
    }
}

#[async_trait]
impl SqlExecutor for StatementLog {
    async fn execute(&self, statement: &str) -> RollupResult<()> {
        if let Some(pattern) = &self.fail_on {
            if statement.contains(pattern.as_str()) {
                return Err(RollupError::Executor(format!(
                    "statement rejected: {}",
                    statement
                )));
            }
        }

        self.statements.write().await.push(statement.to_string());
        Ok(())
    }
}
