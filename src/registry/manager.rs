//! Registry - Coordinates every registered chain
//!
//! Provides a unified interface to:
//! - ChainBuilder (compiles each registered definition)
//! - DdlEmitter (create / drop / refresh statements)
//! - SqlExecutor (the external engine running those statements)
//!
//! # Ordering
//!
//! ```text
//! create:  ticks_per_minute → ticks_per_hour → ticks_per_day → volume_per_hour → ...
//! refresh: ticks_per_minute → ticks_per_hour → ticks_per_day
//! drop:    volume_per_day → volume_per_hour → ticks_per_day → ticks_per_hour → ...
//! ```

use crate::ddl::{DdlEmitter, RefreshWindow};
use crate::registry::SqlExecutor;
use crate::rollup::{
    AggregateDefinition, ChainBuilder, ChainHandle, DerivedView, Granularity, Interval,
    RefreshPolicy, RewriteWarning, RollupError, RollupResult,
};

/// Holds the chains of all registered definitions
#[derive(Debug, Clone, Default)]
pub struct Registry {
    /// Compiles definitions into chains
    builder: ChainBuilder,
    /// Emits statements for chains
    emitter: DdlEmitter,
    /// Chains in registration order
    chains: Vec<ChainHandle>,
}

impl Registry {
    /// Create an empty registry
    pub fn new(builder: ChainBuilder, emitter: DdlEmitter) -> Self {
        Self {
            builder,
            emitter,
            chains: Vec::new(),
        }
    }

    // ==================== Registration ====================

    /// Build and register the chain for `definition`
    pub fn register(
        &mut self,
        definition: AggregateDefinition,
        granularities: &[Granularity],
    ) -> RollupResult<&ChainHandle> {
        if self.chains.iter().any(|c| c.name() == definition.name()) {
            return Err(RollupError::DuplicateDefinition(definition.name().to_string()));
        }

        let chain = self.builder.build(definition, granularities)?;
        self.chains.push(chain);

        let chain = &self.chains[self.chains.len() - 1];
        tracing::info!(aggregate = %chain.name(), views = chain.len(), "Registered aggregate");
        Ok(chain)
    }

    // ==================== Lookup ====================

    /// All chains, in registration order
    pub fn chains(&self) -> &[ChainHandle] {
        &self.chains
    }

    /// Chain registered under `name`
    pub fn chain(&self, name: &str) -> RollupResult<&ChainHandle> {
        self.chains
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| RollupError::DefinitionNotFound(name.to_string()))
    }

    /// View of `name` at `granularity`
    pub fn view(&self, name: &str, granularity: Granularity) -> RollupResult<&DerivedView> {
        self.chain(name)?
            .view(granularity)
            .ok_or_else(|| RollupError::GranularityNotInChain {
                name: name.to_string(),
                granularity: granularity.to_string(),
            })
    }

    /// Refresh policy of `name` at `granularity`
    pub fn refresh_policy(
        &self,
        name: &str,
        granularity: Granularity,
    ) -> RollupResult<Option<&RefreshPolicy>> {
        Ok(self.view(name, granularity)?.refresh_policy())
    }

    /// Refresh policy of every view of `name`, finest first
    pub fn refresh_policies(
        &self,
        name: &str,
    ) -> RollupResult<Vec<(Granularity, Option<&RefreshPolicy>)>> {
        Ok(self
            .chain(name)?
            .views()
            .iter()
            .map(|view| (view.granularity(), view.refresh_policy()))
            .collect())
    }

    /// Rewrite warnings across all chains
    pub fn warnings(&self) -> impl Iterator<Item = &RewriteWarning> {
        self.chains.iter().flat_map(|c| c.warnings())
    }

    /// SELECT rolling the `from` view of `name` up to `interval`
    pub fn adhoc_rollup(
        &self,
        name: &str,
        from: Granularity,
        interval: &Interval,
    ) -> RollupResult<String> {
        let view = self.view(name, from)?;
        self.builder.adhoc_rollup(view, interval)
    }

    // ==================== Statements ====================

    /// CREATE and policy statements for every chain
    pub fn create_statements(&self) -> Vec<String> {
        self.chains
            .iter()
            .flat_map(|c| self.emitter.create(c))
            .collect()
    }

    /// DROP statements for every chain
    pub fn drop_statements(&self) -> Vec<String> {
        self.emitter.drop_all(self.chains.iter())
    }

    /// Policy removal statements for every chain, in drop order
    pub fn remove_policy_statements(&self) -> Vec<String> {
        self.chains
            .iter()
            .rev()
            .flat_map(|c| self.emitter.remove_policies(c))
            .collect()
    }

    /// Refresh statements for `name`, optionally limited to some granularities
    pub fn refresh_statements(
        &self,
        name: &str,
        window: &RefreshWindow,
        only: Option<&[Granularity]>,
    ) -> RollupResult<Vec<String>> {
        let chain = self.chain(name)?;

        if let Some(only) = only {
            for granularity in only {
                if chain.view(*granularity).is_none() {
                    return Err(RollupError::GranularityNotInChain {
                        name: name.to_string(),
                        granularity: granularity.to_string(),
                    });
                }
            }
        }

        Ok(self.emitter.refresh(chain, window, only))
    }

    // ==================== Execution ====================

    /// Create every view and policy
    pub async fn create_all(&self, executor: &dyn SqlExecutor) -> RollupResult<usize> {
        run(executor, self.create_statements()).await
    }

    /// Drop every view, coarsest first per definition
    pub async fn drop_all(&self, executor: &dyn SqlExecutor) -> RollupResult<usize> {
        run(executor, self.drop_statements()).await
    }

    /// Remove every refresh policy, leaving the views in place
    pub async fn remove_policies(&self, executor: &dyn SqlExecutor) -> RollupResult<usize> {
        run(executor, self.remove_policy_statements()).await
    }

    /// Refresh every view of `name`, finest first
    pub async fn refresh(
        &self,
        name: &str,
        window: &RefreshWindow,
        executor: &dyn SqlExecutor,
    ) -> RollupResult<usize> {
        run(executor, self.refresh_statements(name, window, None)?).await
    }

    /// Refresh only the given granularities of `name`, finest first
    pub async fn refresh_granularities(
        &self,
        name: &str,
        granularities: &[Granularity],
        window: &RefreshWindow,
        executor: &dyn SqlExecutor,
    ) -> RollupResult<usize> {
        run(
            executor,
            self.refresh_statements(name, window, Some(granularities))?,
        )
        .await
    }
}

/// Execute statements in order, stopping at the first failure
async fn run(executor: &dyn SqlExecutor, statements: Vec<String>) -> RollupResult<usize> {
    for statement in &statements {
        tracing::debug!(statement = %statement, "Executing");
        executor.execute(statement).await?;
    }
    Ok(statements.len())
}
