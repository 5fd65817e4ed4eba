//! Rollup rule table
//!
//! Maps the select items of a finer view to the select items of the next
//! coarser view. Every output item keeps its alias and reads the finer view's
//! column of the same name:
//!
//! ```text
//! count(*) as a          → sum(a) as a
//! sum(x) as a            → sum(a) as a
//! min(x) as a            → min(a) as a
//! max(x) as a            → max(a) as a
//! first(x, t) as a       → first(a, t) as a
//! last(x, t) as a        → last(a, t) as a
//! stats_agg(x) as a      → rollup(a) as a     (any opaque summary)
//! rollup(x) as a         → rollup(a) as a
//! symbol                 → symbol
//! ```
//!
//! Custom rules are consulted after the fixed table, and only for function
//! calls the fixed table does not know.

use crate::rollup::ast::{AggregateShape, Expr, SelectItem, OPAQUE_SUMMARY_FUNCTIONS};
use crate::rollup::error::{RollupError, RollupResult};
use crate::rollup::parser::{is_identifier, parse_expr};
use serde::{Deserialize, Serialize};

/// Functions handled by the fixed rules
const FIXED_FUNCTIONS: &[&str] = &["count", "sum", "min", "max", "first", "last", "rollup"];

/// A caller-supplied rewrite for one aggregate function
///
/// `template` is the coarser-level expression. `{alias}` expands to the
/// finer view's column and `{0}`, `{1}`, ... to the original call's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRule {
    /// Function name the rule applies to (case-insensitive)
    pub function: String,
    /// Replacement expression template
    pub template: String,
}

impl CustomRule {
    /// Create a custom rule
    pub fn new(function: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            function: function.into().to_lowercase(),
            template: template.into(),
        }
    }

    /// Expand the template for `item`, if every placeholder can be filled
    fn apply(&self, item: &SelectItem) -> Option<Expr> {
        let Expr::Call { args, .. } = &item.expr else {
            return None;
        };

        let mut text = self.template.replace("{alias}", &item.alias);
        for (i, arg) in args.iter().enumerate() {
            text = text.replace(&format!("{{{}}}", i), &arg.to_string());
        }

        if text.contains('{') {
            return None;
        }

        Some(parse_expr(&text))
    }
}

/// Outcome of rewriting one select item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// An aggregate mapped to its rollup combinator
    Rolled(SelectItem),
    /// A column or constant carried over to the coarser view
    PassThrough(SelectItem),
    /// Nothing matched; the expression is forwarded unchanged
    Forwarded(SelectItem),
}

impl Rewrite {
    /// The resulting select item
    pub fn item(&self) -> &SelectItem {
        match self {
            Self::Rolled(item) | Self::PassThrough(item) | Self::Forwarded(item) => item,
        }
    }

    /// Consume into the resulting select item
    pub fn into_item(self) -> SelectItem {
        match self {
            Self::Rolled(item) | Self::PassThrough(item) | Self::Forwarded(item) => item,
        }
    }

    /// Whether the item was forwarded without a matching rule
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded(_))
    }
}

/// Ordered rewrite rules: the fixed combinator table, then custom rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    custom: Vec<CustomRule>,
}

impl RuleTable {
    /// Table with the fixed rules only
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with custom rules appended after the fixed ones
    pub fn with_rules(rules: impl IntoIterator<Item = CustomRule>) -> RollupResult<Self> {
        let mut table = Self::new();
        for rule in rules {
            table.add_rule(rule)?;
        }
        Ok(table)
    }

    /// Append a custom rule
    ///
    /// Rules may not shadow a fixed rule or another custom rule.
    pub fn add_rule(&mut self, rule: CustomRule) -> RollupResult<()> {
        let function = rule.function.to_lowercase();

        if !is_identifier(&function) {
            return Err(RollupError::Configuration(format!(
                "custom rule function '{}' is not an identifier",
                rule.function
            )));
        }
        if !rule.template.contains("{alias}") {
            return Err(RollupError::Configuration(format!(
                "custom rule for '{}' must reference {{alias}}",
                function
            )));
        }
        if FIXED_FUNCTIONS.contains(&function.as_str())
            || OPAQUE_SUMMARY_FUNCTIONS.contains(&function.as_str())
        {
            return Err(RollupError::RuleConflict(format!(
                "'{}' is already handled by a fixed rule",
                function
            )));
        }
        if self.custom.iter().any(|r| r.function == function) {
            return Err(RollupError::RuleConflict(format!(
                "'{}' has more than one custom rule",
                function
            )));
        }

        self.custom.push(CustomRule {
            function,
            template: rule.template,
        });
        Ok(())
    }

    /// Custom rules in registration order
    pub fn custom_rules(&self) -> &[CustomRule] {
        &self.custom
    }

    /// Rewrite one finer-level item into its coarser-level form
    pub fn rewrite(&self, item: &SelectItem) -> Rewrite {
        let alias = &item.alias;
        let column = || Expr::column(alias.clone());
        let rolled = |expr: Expr| Rewrite::Rolled(SelectItem::new(expr, alias.clone()));

        match item.shape() {
            AggregateShape::Count | AggregateShape::Sum => rolled(Expr::call("sum", vec![column()])),
            AggregateShape::Min => rolled(Expr::call("min", vec![column()])),
            AggregateShape::Max => rolled(Expr::call("max", vec![column()])),
            AggregateShape::First { order } => rolled(Expr::call("first", vec![column(), order])),
            AggregateShape::Last { order } => rolled(Expr::call("last", vec![column(), order])),
            AggregateShape::OpaqueSummary { .. } | AggregateShape::Rollup => {
                rolled(Expr::call("rollup", vec![column()]))
            }
            AggregateShape::Column { .. } => {
                Rewrite::PassThrough(SelectItem::new(column(), alias.clone()))
            }
            AggregateShape::Constant => Rewrite::PassThrough(item.clone()),
            AggregateShape::Call { function } => self
                .custom
                .iter()
                .find(|rule| rule.function == function)
                .and_then(|rule| rule.apply(item))
                .map(rolled)
                .unwrap_or_else(|| Rewrite::Forwarded(item.clone())),
            AggregateShape::Unrecognized => Rewrite::Forwarded(item.clone()),
        }
    }

    /// Rewrite a whole select list, preserving order
    pub fn rewrite_all(&self, items: &[SelectItem]) -> Vec<Rewrite> {
        items.iter().map(|item| self.rewrite(item)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::parser::parse_select_item;

    fn rewrite_sql(table: &RuleTable, item: &str) -> String {
        let item = parse_select_item(item).unwrap();
        table.rewrite(&item).item().to_sql()
    }

    #[test]
    fn test_fixed_rules() {
        let table = RuleTable::new();

        assert_eq!(rewrite_sql(&table, "count(*) as total"), "sum(total) as total");
        assert_eq!(rewrite_sql(&table, "sum(volume) as volume"), "sum(volume) as volume");
        assert_eq!(rewrite_sql(&table, "sum(price) as notional"), "sum(notional) as notional");
        assert_eq!(rewrite_sql(&table, "min(price) as low"), "min(low) as low");
        assert_eq!(rewrite_sql(&table, "max(price) as high"), "max(high) as high");
        assert_eq!(rewrite_sql(&table, "first(price, ts) as open"), "first(open, ts) as open");
        assert_eq!(rewrite_sql(&table, "last(price, ts) as close"), "last(close, ts) as close");
    }

    #[test]
    fn test_fixed_rules_over_expressions() {
        let table = RuleTable::new();

        assert_eq!(
            rewrite_sql(&table, "sum(price * volume) as notional"),
            "sum(notional) as notional"
        );
        assert_eq!(rewrite_sql(&table, "max(price - 1) as high"), "max(high) as high");
        assert_eq!(rewrite_sql(&table, "count(price > 0) as priced"), "sum(priced) as priced");
        assert_eq!(
            rewrite_sql(&table, "first(price * 2, ts) as open"),
            "first(open, ts) as open"
        );

        let distinct = parse_select_item("count(DISTINCT trader) as traders").unwrap();
        assert!(table.rewrite(&distinct).is_forwarded());
    }

    #[test]
    fn test_opaque_summaries_roll_up() {
        let table = RuleTable::new();

        assert_eq!(
            rewrite_sql(&table, "stats_agg(price) as stats_agg"),
            "rollup(stats_agg) as stats_agg"
        );
        assert_eq!(
            rewrite_sql(&table, "candlestick_agg(ts, price, volume) as candlestick"),
            "rollup(candlestick) as candlestick"
        );
        assert_eq!(
            rewrite_sql(&table, "percentile_agg(latency) as pct"),
            "rollup(pct) as pct"
        );
        assert_eq!(rewrite_sql(&table, "rollup(pct) as pct"), "rollup(pct) as pct");
    }

    #[test]
    fn test_rules_are_stable_under_reapplication() {
        let table = RuleTable::new();
        let first = table.rewrite(&parse_select_item("count(*) as total").unwrap());
        let second = table.rewrite(first.item());
        assert_eq!(first.item(), second.item());
    }

    #[test]
    fn test_columns_pass_through() {
        let table = RuleTable::new();
        let item = parse_select_item("t.symbol as sym").unwrap();
        let rewrite = table.rewrite(&item);

        assert!(matches!(rewrite, Rewrite::PassThrough(_)));
        assert_eq!(rewrite.item().to_sql(), "sym");
    }

    #[test]
    fn test_unknown_aggregate_is_forwarded() {
        let table = RuleTable::new();
        let item = parse_select_item("avg(price) as mean").unwrap();
        let rewrite = table.rewrite(&item);

        assert!(rewrite.is_forwarded());
        assert_eq!(rewrite.into_item(), item);
    }

    #[test]
    fn test_custom_rule() {
        let table =
            RuleTable::with_rules([CustomRule::new("hll", "hll_union_agg({alias})")]).unwrap();

        assert_eq!(
            rewrite_sql(&table, "hll(user_id) as visitors"),
            "hll_union_agg(visitors) as visitors"
        );
    }

    #[test]
    fn test_custom_rule_with_arguments() {
        let table =
            RuleTable::with_rules([CustomRule::new("approx_top_k", "topk_merge({alias}, {1})")])
                .unwrap();

        assert_eq!(
            rewrite_sql(&table, "approx_top_k(symbol, 10) as top"),
            "topk_merge(top, 10) as top"
        );
        // Placeholder without an argument leaves the item forwarded
        let item = parse_select_item("approx_top_k(symbol) as top").unwrap();
        assert!(table.rewrite(&item).is_forwarded());
    }

    #[test]
    fn test_custom_rule_conflicts() {
        let err = RuleTable::with_rules([CustomRule::new("SUM", "sum({alias})")]).unwrap_err();
        assert!(matches!(err, RollupError::RuleConflict(_)));

        let err = RuleTable::with_rules([CustomRule::new("stats_agg", "rollup({alias})")])
            .unwrap_err();
        assert!(matches!(err, RollupError::RuleConflict(_)));

        let err = RuleTable::with_rules([
            CustomRule::new("hll", "hll_union_agg({alias})"),
            CustomRule::new("hll", "other({alias})"),
        ])
        .unwrap_err();
        assert!(matches!(err, RollupError::RuleConflict(_)));

        let err = RuleTable::with_rules([CustomRule::new("hll", "hll_union_agg(x)")]).unwrap_err();
        assert!(matches!(err, RollupError::Configuration(_)));
    }
}
