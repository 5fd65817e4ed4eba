//! Aggregate definitions
//!
//! An [`AggregateDefinition`] describes the finest-grain aggregation of a
//! time-stamped relation: its select list, group keys, filter predicate and
//! per-granularity refresh policies. It is assembled with
//! [`AggregateDefinitionBuilder`] and immutable afterwards.

use crate::rollup::ast::SelectItem;
use crate::rollup::error::{RollupError, RollupResult};
use crate::rollup::granularity::{Granularity, Interval};
use crate::rollup::parser::{is_alias, is_identifier, parse_expr, parse_select_item};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Refresh schedule of one materialized view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshPolicy {
    /// Start of the refresh window relative to now; `None` refreshes from the beginning
    #[serde(default)]
    pub start_offset: Option<Interval>,
    /// End of the refresh window relative to now; `None` refreshes up to now
    #[serde(default)]
    pub end_offset: Option<Interval>,
    /// How often the refresh job runs
    pub schedule_interval: Interval,
}

impl RefreshPolicy {
    /// Create a policy from interval literals
    pub fn parse(
        start_offset: Option<&str>,
        end_offset: Option<&str>,
        schedule_interval: &str,
    ) -> RollupResult<Self> {
        Ok(Self {
            start_offset: start_offset.map(Interval::parse).transpose()?,
            end_offset: end_offset.map(Interval::parse).transpose()?,
            schedule_interval: Interval::parse(schedule_interval)?,
        })
    }
}

/// Select item as handed to the builder, parsed in `build()`
#[derive(Debug, Clone)]
enum PendingItem {
    Text(String),
    Pair { expression: String, alias: String },
    Parsed(SelectItem),
}

/// The finest-grain aggregation a chain is derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateDefinition {
    name: String,
    relation: String,
    time_column: String,
    select_items: Vec<SelectItem>,
    group_by: Vec<String>,
    filter: Option<String>,
    refresh_policy: BTreeMap<Granularity, RefreshPolicy>,
}

impl AggregateDefinition {
    /// Start building a definition
    pub fn builder(
        name: impl Into<String>,
        relation: impl Into<String>,
        time_column: impl Into<String>,
    ) -> AggregateDefinitionBuilder {
        AggregateDefinitionBuilder::new(name, relation, time_column)
    }

    /// Definition name, prefix of every derived table
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw relation the finest view reads
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Timestamp column bucketed at every level
    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    /// Finest-level select items, in order
    pub fn select_items(&self) -> &[SelectItem] {
        &self.select_items
    }

    /// Group keys, excluding the time bucket
    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    /// Filter predicate applied to raw rows
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Refresh policy for one granularity
    pub fn refresh_policy(&self, granularity: Granularity) -> Option<&RefreshPolicy> {
        self.refresh_policy.get(&granularity)
    }

    /// All configured refresh policies, finest first
    pub fn refresh_policies(&self) -> &BTreeMap<Granularity, RefreshPolicy> {
        &self.refresh_policy
    }

    /// Output aliases, in select order
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.select_items.iter().map(|item| item.alias.as_str())
    }
}

/// Builder for [`AggregateDefinition`]
#[derive(Debug, Clone)]
pub struct AggregateDefinitionBuilder {
    name: String,
    relation: String,
    time_column: String,
    select: Vec<PendingItem>,
    group_by: Vec<String>,
    filter: Option<String>,
    refresh_policy: BTreeMap<Granularity, RefreshPolicy>,
}

impl AggregateDefinitionBuilder {
    /// Create a builder for `name` over `relation`, bucketed on `time_column`
    pub fn new(
        name: impl Into<String>,
        relation: impl Into<String>,
        time_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            relation: relation.into(),
            time_column: time_column.into(),
            select: Vec::new(),
            group_by: Vec::new(),
            filter: None,
            refresh_policy: BTreeMap::new(),
        }
    }

    /// Add a select item written as SQL, e.g. `count(*) as total`
    pub fn select(mut self, item: impl Into<String>) -> Self {
        self.select.push(PendingItem::Text(item.into()));
        self
    }

    /// Add a select item from an `(expression, alias)` pair
    pub fn select_as(mut self, expression: impl Into<String>, alias: impl Into<String>) -> Self {
        self.select.push(PendingItem::Pair {
            expression: expression.into(),
            alias: alias.into(),
        });
        self
    }

    /// Add an already parsed select item
    pub fn select_item(mut self, item: SelectItem) -> Self {
        self.select.push(PendingItem::Parsed(item));
        self
    }

    /// Add a group key
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Set the raw-row filter predicate
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.filter = Some(predicate.into());
        self
    }

    /// Set the refresh policy for one granularity
    pub fn refresh_policy(mut self, granularity: Granularity, policy: RefreshPolicy) -> Self {
        self.refresh_policy.insert(granularity, policy);
        self
    }

    /// Validate and build the definition
    pub fn build(self) -> RollupResult<AggregateDefinition> {
        if !is_identifier(&self.name) {
            return Err(RollupError::Configuration(format!(
                "aggregate name '{}' is not an identifier",
                self.name
            )));
        }
        if self.relation.trim().is_empty() {
            return Err(RollupError::Configuration(format!(
                "aggregate '{}' has no source relation",
                self.name
            )));
        }
        if self.time_column.trim().is_empty() {
            return Err(RollupError::Configuration(format!(
                "aggregate '{}' has no time column",
                self.name
            )));
        }
        if !is_identifier(&self.time_column) {
            return Err(RollupError::Configuration(format!(
                "time column '{}' is not an identifier",
                self.time_column
            )));
        }

        let select_items = self
            .select
            .into_iter()
            .map(|pending| match pending {
                PendingItem::Text(text) => parse_select_item(&text),
                PendingItem::Pair { expression, alias } => {
                    Ok(SelectItem::new(parse_expr(&expression), alias.trim()))
                }
                PendingItem::Parsed(item) => Ok(item),
            })
            .collect::<RollupResult<Vec<_>>>()?;

        if select_items.is_empty() {
            return Err(RollupError::Configuration(format!(
                "aggregate '{}' selects nothing",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for item in &select_items {
            if item.alias.is_empty() {
                return Err(RollupError::Configuration(format!(
                    "select item '{}' has an empty alias",
                    item.expr
                )));
            }
            if !is_alias(&item.alias) {
                return Err(RollupError::Configuration(format!(
                    "alias '{}' of '{}' is not an identifier",
                    item.alias, item.expr
                )));
            }
            if item.alias == self.time_column {
                return Err(RollupError::Configuration(format!(
                    "alias '{}' collides with the time bucket column",
                    item.alias
                )));
            }
            if !seen.insert(item.alias.as_str()) {
                return Err(RollupError::Configuration(format!(
                    "alias '{}' is selected more than once",
                    item.alias
                )));
            }
        }

        for column in &self.group_by {
            if column.trim().is_empty() {
                return Err(RollupError::Configuration(format!(
                    "aggregate '{}' has an empty group-by column",
                    self.name
                )));
            }
        }

        let filter = self
            .filter
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());

        Ok(AggregateDefinition {
            name: self.name,
            relation: self.relation.trim().to_string(),
            time_column: self.time_column,
            select_items,
            group_by: self.group_by.into_iter().map(|c| c.trim().to_string()).collect(),
            filter,
            refresh_policy: self.refresh_policy,
        })
    }
}
