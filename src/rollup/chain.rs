//! Rollup chain builder
//!
//! Turns one [`AggregateDefinition`] and a granularity sequence into a linear
//! chain of [`DerivedView`]s. The finest view aggregates raw rows; every
//! coarser view aggregates the view one step finer:
//!
//! ```text
//! trades ──▶ ticks_per_minute ──▶ ticks_per_hour ──▶ ticks_per_day
//!   count(*) as total   sum(total) as total   sum(total) as total
//! ```
//!
//! SQL is rendered eagerly while the chain is built, so a built chain is an
//! immutable value that can be shared between threads.

use std::fmt;

use serde::Serialize;

use crate::rollup::ast::SelectItem;
use crate::rollup::definition::{AggregateDefinition, RefreshPolicy};
use crate::rollup::error::{RewriteWarning, RollupError, RollupResult};
use crate::rollup::granularity::{Granularity, GranularitySequence, Interval};
use crate::rollup::rules::{Rewrite, RuleTable};

/// Where a derived view reads its rows from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewSource {
    /// The raw relation (finest view only)
    Relation { name: String },
    /// The derived view one granularity finer
    View {
        granularity: Granularity,
        table_name: String,
    },
}

impl ViewSource {
    /// Relation or table name used in the FROM clause
    pub fn name(&self) -> &str {
        match self {
            Self::Relation { name } => name,
            Self::View { table_name, .. } => table_name,
        }
    }
}

/// One materialized aggregate of a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedView {
    granularity: Granularity,
    source: ViewSource,
    table_name: String,
    time_column: String,
    select_items: Vec<SelectItem>,
    group_keys: Vec<String>,
    filter: Option<String>,
    select_sql: String,
    refresh_policy: Option<RefreshPolicy>,
}

impl DerivedView {
    /// Bucket width of this view
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Relation or finer view this view reads
    pub fn source(&self) -> &ViewSource {
        &self.source
    }

    /// Materialized view name, `<definition>_per_<granularity>`
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Time bucket column name
    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    /// Select items after the time bucket
    pub fn select_items(&self) -> &[SelectItem] {
        &self.select_items
    }

    /// Output column names after the time bucket
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.select_items.iter().map(|item| item.alias.as_str())
    }

    /// The bucketing expression of this view
    pub fn bucket_expr(&self) -> String {
        self.granularity.bucket_expr(&self.time_column)
    }

    /// Full GROUP BY list: bucket expression, then the group keys
    pub fn group_by(&self) -> Vec<String> {
        std::iter::once(self.bucket_expr())
            .chain(self.group_keys.iter().cloned())
            .collect()
    }

    /// Raw-row filter, present on the finest view only
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// SELECT statement materialized by this view
    pub fn select_sql(&self) -> &str {
        &self.select_sql
    }

    /// Refresh policy configured for this granularity
    pub fn refresh_policy(&self) -> Option<&RefreshPolicy> {
        self.refresh_policy.as_ref()
    }

    /// Whether this view reads raw rows
    pub fn is_finest(&self) -> bool {
        matches!(self.source, ViewSource::Relation { .. })
    }
}

/// SELECT text of a view
pub fn select_sql(view: &DerivedView) -> &str {
    view.select_sql()
}

/// Refresh policy of a view
pub fn refresh_policy(view: &DerivedView) -> Option<&RefreshPolicy> {
    view.refresh_policy()
}

/// A built chain: one view per granularity, finest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainHandle {
    definition: AggregateDefinition,
    granularities: GranularitySequence,
    views: Vec<DerivedView>,
    warnings: Vec<RewriteWarning>,
}

impl ChainHandle {
    /// The definition the chain was built from
    pub fn definition(&self) -> &AggregateDefinition {
        &self.definition
    }

    /// Definition name
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Granularities of the chain, finest first
    pub fn granularities(&self) -> &GranularitySequence {
        &self.granularities
    }

    /// Views, finest first
    pub fn views(&self) -> &[DerivedView] {
        &self.views
    }

    /// Views, coarsest first (drop order)
    pub fn views_coarsest_first(&self) -> impl Iterator<Item = &DerivedView> {
        self.views.iter().rev()
    }

    /// The view at `granularity`
    pub fn view(&self, granularity: Granularity) -> Option<&DerivedView> {
        self.views.iter().find(|v| v.granularity == granularity)
    }

    /// The view reading raw rows
    pub fn finest(&self) -> &DerivedView {
        &self.views[0]
    }

    /// The last view of the chain
    pub fn coarsest(&self) -> &DerivedView {
        &self.views[self.views.len() - 1]
    }

    /// Expressions forwarded without a matching rollup rule
    pub fn warnings(&self) -> &[RewriteWarning] {
        &self.warnings
    }

    /// Number of views
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Always false, a chain has at least one view
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

/// Builds chains with a given rule table
#[derive(Debug, Clone, Default)]
pub struct ChainBuilder {
    rules: RuleTable,
    strict: bool,
}

impl ChainBuilder {
    /// Create a builder using `rules`
    pub fn new(rules: RuleTable) -> Self {
        Self {
            rules,
            strict: false,
        }
    }

    /// Fail instead of warning when an expression matches no rule
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// The rule table in use
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Build the chain for `definition` over `granularities`
    pub fn build(
        &self,
        definition: AggregateDefinition,
        granularities: &[Granularity],
    ) -> RollupResult<ChainHandle> {
        let granularities = GranularitySequence::new(granularities.to_vec())?;

        for granularity in definition.refresh_policies().keys() {
            if !granularities.contains(*granularity) {
                tracing::warn!(
                    aggregate = %definition.name(),
                    granularity = %granularity,
                    "Refresh policy configured for a granularity outside the chain, ignoring"
                );
            }
        }

        let mut views: Vec<DerivedView> = Vec::with_capacity(granularities.len());
        let mut warnings = Vec::new();

        for granularity in granularities.iter() {
            let table_name = format!("{}_per_{}", definition.name(), granularity);

            let (source, select_items, filter) = match views.last() {
                None => (
                    ViewSource::Relation {
                        name: definition.relation().to_string(),
                    },
                    definition.select_items().to_vec(),
                    definition.filter().map(str::to_string),
                ),
                Some(finer) => {
                    check_group_keys(definition.group_by(), finer)?;

                    let mut items = Vec::with_capacity(finer.select_items.len());
                    for rewrite in self.rules.rewrite_all(&finer.select_items) {
                        if rewrite.is_forwarded() {
                            let warning = forwarded_warning(&table_name, rewrite.item());
                            if self.strict {
                                return Err(warning.into_error());
                            }
                            warnings.push(warning);
                        }
                        items.push(rewrite.into_item());
                    }

                    (
                        ViewSource::View {
                            granularity: finer.granularity,
                            table_name: finer.table_name.clone(),
                        },
                        items,
                        None,
                    )
                }
            };

            let select_sql = SelectSql {
                bucket: granularity.interval(),
                time_column: definition.time_column(),
                items: &select_items,
                source: source.name(),
                filter: filter.as_deref(),
                group_keys: definition.group_by(),
            }
            .render()?;

            let refresh_policy = definition.refresh_policy(granularity).cloned();
            if let (Some(finer), Some(policy)) = (views.last(), refresh_policy.as_ref()) {
                warn_if_refreshing_faster(finer, &table_name, policy);
            }

            tracing::debug!(view = %table_name, source = %source.name(), "Derived view");

            views.push(DerivedView {
                granularity,
                source,
                table_name,
                time_column: definition.time_column().to_string(),
                select_items,
                group_keys: definition.group_by().to_vec(),
                filter,
                select_sql,
                refresh_policy,
            });
        }

        tracing::info!(
            aggregate = %definition.name(),
            views = views.len(),
            warnings = warnings.len(),
            "Built rollup chain"
        );

        Ok(ChainHandle {
            definition,
            granularities,
            views,
            warnings,
        })
    }

    /// SELECT rolling `view` up to an arbitrary bucket width
    ///
    /// Used for ad-hoc queries over a materialized level, e.g. five minute
    /// buckets computed from the minute view.
    pub fn adhoc_rollup(&self, view: &DerivedView, interval: &Interval) -> RollupResult<String> {
        if interval.approx_secs() < view.granularity.approx_duration_secs() {
            return Err(RollupError::Configuration(format!(
                "interval '{}' is finer than the {} buckets of {}",
                interval, view.granularity, view.table_name
            )));
        }

        let mut items = Vec::with_capacity(view.select_items.len());
        for rewrite in self.rules.rewrite_all(&view.select_items) {
            if rewrite.is_forwarded() {
                let warning = forwarded_warning(view.table_name(), rewrite.item());
                if self.strict {
                    return Err(warning.into_error());
                }
            }
            items.push(rewrite.into_item());
        }

        check_group_keys(&view.group_keys, view)?;

        SelectSql {
            bucket: interval.as_str(),
            time_column: &view.time_column,
            items: &items,
            source: &view.table_name,
            filter: None,
            group_keys: &view.group_keys,
        }
        .render()
    }
}

/// Build a chain with the fixed rule table
pub fn build_chain(
    definition: AggregateDefinition,
    granularities: &[Granularity],
) -> RollupResult<ChainHandle> {
    ChainBuilder::default().build(definition, granularities)
}

/// Every group key must be a column of the finer view
fn check_group_keys(group_keys: &[String], finer: &DerivedView) -> RollupResult<()> {
    for column in group_keys {
        if !finer.aliases().any(|alias| alias == column) {
            return Err(RollupError::MissingGroupColumn {
                column: column.clone(),
                view: finer.table_name.clone(),
            });
        }
    }
    Ok(())
}

fn forwarded_warning(view: &str, item: &SelectItem) -> RewriteWarning {
    let warning = RewriteWarning {
        view: view.to_string(),
        alias: item.alias.clone(),
        expression: item.expr.to_string(),
    };
    tracing::warn!(
        view = %warning.view,
        alias = %warning.alias,
        expression = %warning.expression,
        "No rollup rule matched, forwarding expression unchanged"
    );
    warning
}

/// A coarser view should not refresh more often than its source
fn warn_if_refreshing_faster(finer: &DerivedView, view: &str, policy: &RefreshPolicy) {
    if let Some(finer_policy) = finer.refresh_policy() {
        if policy.schedule_interval.approx_secs() < finer_policy.schedule_interval.approx_secs() {
            tracing::warn!(
                view = %view,
                schedule = %policy.schedule_interval,
                source = %finer.table_name,
                source_schedule = %finer_policy.schedule_interval,
                "View refreshes more often than its source"
            );
        }
    }
}

/// Renders `SELECT <bucket>, <items> FROM <source> [WHERE ..] GROUP BY ..`
struct SelectSql<'a> {
    bucket: &'a str,
    time_column: &'a str,
    items: &'a [SelectItem],
    source: &'a str,
    filter: Option<&'a str>,
    group_keys: &'a [String],
}

impl SelectSql<'_> {
    fn render(&self) -> RollupResult<String> {
        let mut sql = String::new();
        self.write(&mut sql)?;
        Ok(sql)
    }

    fn write(&self, w: &mut dyn fmt::Write) -> fmt::Result {
        let bucket = format!("time_bucket('{}', {})", self.bucket, self.time_column);

        write!(w, "SELECT {} AS {}", bucket, self.time_column)?;
        comma_sep(self.items, false, w, |w, item| write!(w, "{}", item.to_sql()))?;
        write!(w, " FROM {}", self.source)?;
        if let Some(filter) = self.filter {
            write!(w, " WHERE {}", filter)?;
        }
        write!(w, " GROUP BY {}", bucket)?;
        comma_sep(self.group_keys, false, w, |w, key| write!(w, "{}", key))
    }
}

/// Write the elements in `list` separated by commas into `w`. With
/// `first == false` a separator also precedes the first element.
fn comma_sep<T, F>(
    list: impl IntoIterator<Item = T>,
    mut first: bool,
    w: &mut dyn fmt::Write,
    out: F,
) -> fmt::Result
where
    F: Fn(&mut dyn fmt::Write, T) -> fmt::Result,
{
    for elem in list {
        if !first {
            write!(w, ", ")?;
        }
        first = false;
        out(w, elem)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::rules::CustomRule;
    use std::collections::BTreeSet;

    const MINUTE_SQL: &str = "SELECT time_bucket('1 minute', ts) AS ts, count(*) as total \
                              FROM raw GROUP BY time_bucket('1 minute', ts)";
    const HOUR_SQL: &str = "SELECT time_bucket('1 hour', ts) AS ts, sum(total) as total \
                            FROM total_per_minute GROUP BY time_bucket('1 hour', ts)";
    const DAY_SQL: &str = "SELECT time_bucket('1 day', ts) AS ts, sum(total) as total \
                           FROM total_per_hour GROUP BY time_bucket('1 day', ts)";

    fn total() -> AggregateDefinition {
        AggregateDefinition::builder("total", "raw", "ts")
            .select_as("count(*)", "total")
            .build()
            .unwrap()
    }

    fn ticks() -> AggregateDefinition {
        AggregateDefinition::builder("ticks", "trades", "ts")
            .select("symbol")
            .select("count(*) as total")
            .select("sum(volume) as volume")
            .select("first(price, ts) as open")
            .select("max(price) as high")
            .select("min(price) as low")
            .select("last(price, ts) as close")
            .select("stats_agg(price) as stats_agg")
            .group_by("symbol")
            .filter("price > 0")
            .refresh_policy(
                Granularity::Minute,
                RefreshPolicy::parse(Some("10 minutes"), Some("1 minute"), "1 minute").unwrap(),
            )
            .build()
            .unwrap()
    }

    const MINUTE_HOUR_DAY: &[Granularity] =
        &[Granularity::Minute, Granularity::Hour, Granularity::Day];

    #[test]
    fn test_end_to_end_count() {
        let chain = build_chain(total(), MINUTE_HOUR_DAY).unwrap();

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.view(Granularity::Minute).unwrap().select_sql(), MINUTE_SQL);
        assert_eq!(chain.view(Granularity::Hour).unwrap().select_sql(), HOUR_SQL);
        assert_eq!(chain.view(Granularity::Day).unwrap().select_sql(), DAY_SQL);
        assert!(chain.warnings().is_empty());
    }

    #[test]
    fn test_combinator_correctness() {
        let def = AggregateDefinition::builder("prices", "raw", "ts")
            .select_as("stats_agg(price)", "stats_agg")
            .build()
            .unwrap();
        let chain = build_chain(def, &[Granularity::Minute, Granularity::Hour]).unwrap();

        let hour = chain.view(Granularity::Hour).unwrap();
        assert_eq!(hour.select_items()[0].to_sql(), "rollup(stats_agg) as stats_agg");

        let chain = build_chain(total(), &[Granularity::Minute, Granularity::Hour]).unwrap();
        let hour = chain.view(Granularity::Hour).unwrap();
        assert_eq!(hour.select_items()[0].to_sql(), "sum(total) as total");
    }

    #[test]
    fn test_candlestick_chain() {
        let chain = build_chain(ticks(), MINUTE_HOUR_DAY).unwrap();
        let day = chain.view(Granularity::Day).unwrap();

        assert_eq!(
            day.select_sql(),
            "SELECT time_bucket('1 day', ts) AS ts, symbol, sum(total) as total, \
             sum(volume) as volume, first(open, ts) as open, max(high) as high, \
             min(low) as low, last(close, ts) as close, rollup(stats_agg) as stats_agg \
             FROM ticks_per_hour GROUP BY time_bucket('1 day', ts), symbol"
        );
    }

    #[test]
    fn test_alias_stability() {
        let chain = build_chain(ticks(), MINUTE_HOUR_DAY).unwrap();
        let expected: Vec<&str> = chain.definition().aliases().collect();

        for view in chain.views() {
            assert_eq!(view.aliases().collect::<Vec<_>>(), expected);
        }
    }

    #[test]
    fn test_chain_linearity() {
        let chain = build_chain(ticks(), MINUTE_HOUR_DAY).unwrap();

        assert_eq!(
            chain.finest().source(),
            &ViewSource::Relation {
                name: "trades".to_string()
            }
        );
        assert!(chain.finest().is_finest());

        for pair in chain.views().windows(2) {
            assert_eq!(
                pair[1].source(),
                &ViewSource::View {
                    granularity: pair[0].granularity(),
                    table_name: pair[0].table_name().to_string(),
                }
            );
        }
    }

    #[test]
    fn test_group_by_propagation() {
        let chain = build_chain(ticks(), MINUTE_HOUR_DAY).unwrap();

        for view in chain.views() {
            let expected: BTreeSet<String> = [view.bucket_expr(), "symbol".to_string()].into();
            let actual: BTreeSet<String> = view.group_by().into_iter().collect();
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_filter_confinement() {
        let chain = build_chain(ticks(), MINUTE_HOUR_DAY).unwrap();

        assert!(chain.finest().select_sql().contains(" WHERE price > 0 "));
        assert_eq!(chain.finest().filter(), Some("price > 0"));

        for view in &chain.views()[1..] {
            assert!(!view.select_sql().contains("WHERE"));
            assert_eq!(view.filter(), None);
        }
    }

    #[test]
    fn test_table_names_and_policies() {
        let chain = build_chain(ticks(), MINUTE_HOUR_DAY).unwrap();
        let names: Vec<&str> = chain.views().iter().map(|v| v.table_name()).collect();
        assert_eq!(names, vec!["ticks_per_minute", "ticks_per_hour", "ticks_per_day"]);

        let minute = chain.view(Granularity::Minute).unwrap();
        assert_eq!(
            refresh_policy(minute).map(|p| p.schedule_interval.as_str()),
            Some("1 minute")
        );
        assert!(refresh_policy(chain.view(Granularity::Hour).unwrap()).is_none());
        assert_eq!(select_sql(minute), minute.select_sql());
    }

    #[test]
    fn test_missing_group_column() {
        let def = AggregateDefinition::builder("ticks", "trades", "ts")
            .select("count(*) as total")
            .group_by("symbol")
            .build()
            .unwrap();

        // A single level reads raw rows, where the column exists
        assert!(build_chain(def.clone(), &[Granularity::Minute]).is_ok());

        let err = build_chain(def, MINUTE_HOUR_DAY).unwrap_err();
        assert_eq!(
            err,
            RollupError::MissingGroupColumn {
                column: "symbol".to_string(),
                view: "ticks_per_minute".to_string(),
            }
        );
        assert!(err.to_string().contains("symbol"));
    }

    #[test]
    fn test_non_monotonic_granularities() {
        let err = build_chain(total(), &[Granularity::Day, Granularity::Hour]).unwrap_err();
        assert!(matches!(err, RollupError::NonMonotonicGranularity { .. }));

        let err = build_chain(total(), &[]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unmatched_expression_warns() {
        let def = AggregateDefinition::builder("prices", "trades", "ts")
            .select("avg(price) as mean")
            .build()
            .unwrap();

        let chain = build_chain(def.clone(), MINUTE_HOUR_DAY).unwrap();
        assert_eq!(chain.warnings().len(), 2);
        assert_eq!(chain.warnings()[0].view, "prices_per_hour");
        assert_eq!(chain.warnings()[0].expression, "avg(price)");
        assert_eq!(
            chain.view(Granularity::Hour).unwrap().select_items()[0].to_sql(),
            "avg(price) as mean"
        );

        let err = ChainBuilder::default()
            .strict(true)
            .build(def, MINUTE_HOUR_DAY)
            .unwrap_err();
        assert!(matches!(err, RollupError::RewriteAmbiguity { ref alias, .. } if alias == "mean"));
    }

    #[test]
    fn test_custom_rules_apply() {
        let rules = RuleTable::with_rules([CustomRule::new("hll", "hll_union_agg({alias})")])
            .unwrap();
        let def = AggregateDefinition::builder("visits", "events", "ts")
            .select("hll(user_id) as visitors")
            .build()
            .unwrap();

        let chain = ChainBuilder::new(rules)
            .build(def, &[Granularity::Minute, Granularity::Hour])
            .unwrap();
        assert_eq!(
            chain.view(Granularity::Hour).unwrap().select_items()[0].to_sql(),
            "hll_union_agg(visitors) as visitors"
        );
    }

    #[test]
    fn test_adhoc_rollup() {
        let chain = build_chain(ticks(), MINUTE_HOUR_DAY).unwrap();
        let minute = chain.view(Granularity::Minute).unwrap();
        let interval = Interval::parse("5 minutes").unwrap();

        let sql = ChainBuilder::default().adhoc_rollup(minute, &interval).unwrap();
        assert!(sql.starts_with("SELECT time_bucket('5 minutes', ts) AS ts, symbol, sum(total) as total"));
        assert!(sql.contains(" FROM ticks_per_minute "));
        assert!(sql.ends_with("GROUP BY time_bucket('5 minutes', ts), symbol"));
    }

    #[test]
    fn test_adhoc_rollup_rejects_finer_interval() {
        let chain = build_chain(ticks(), MINUTE_HOUR_DAY).unwrap();
        let hour = chain.view(Granularity::Hour).unwrap();
        let builder = ChainBuilder::default();

        let err = builder
            .adhoc_rollup(hour, &Interval::parse("5 minutes").unwrap())
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(builder.adhoc_rollup(hour, &Interval::parse("1 hour").unwrap()).is_ok());
    }

    #[test]
    fn test_expression_arguments_roll_up() {
        let def = AggregateDefinition::builder("ticks", "trades", "ts")
            .select("sum(price * volume) as notional")
            .select("max(price - 1) as high")
            .build()
            .unwrap();

        let chain = build_chain(def, &[Granularity::Minute, Granularity::Hour]).unwrap();
        assert!(chain.warnings().is_empty());
        assert_eq!(
            chain.view(Granularity::Hour).unwrap().select_sql(),
            "SELECT time_bucket('1 hour', ts) AS ts, sum(notional) as notional, max(high) as high \
             FROM ticks_per_minute GROUP BY time_bucket('1 hour', ts)"
        );
    }

    #[test]
    fn test_huge_policy_interval_builds() {
        let def = AggregateDefinition::builder("total", "raw", "ts")
            .select("count(*) as total")
            .refresh_policy(
                Granularity::Minute,
                RefreshPolicy::parse(None, None, "1 minute").unwrap(),
            )
            .refresh_policy(
                Granularity::Hour,
                RefreshPolicy::parse(None, None, "1000000000000000 years").unwrap(),
            )
            .build()
            .unwrap();

        let chain = build_chain(def, &[Granularity::Minute, Granularity::Hour]).unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build_chain(ticks(), MINUTE_HOUR_DAY).unwrap();
        let b = build_chain(ticks(), MINUTE_HOUR_DAY).unwrap();
        assert_eq!(a, b);
    }
}
