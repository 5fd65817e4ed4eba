//! Statement emission for built chains
//!
//! Pure text generation; nothing here talks to a database.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::rollup::{ChainHandle, DerivedView, Granularity, RefreshPolicy, RollupError, RollupResult};

/// Window handed to `refresh_continuous_aggregate`; open ends refresh everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshWindow {
    /// Inclusive start, `None` for the beginning of time
    pub start: Option<DateTime<Utc>>,
    /// Exclusive end, `None` for now
    pub end: Option<DateTime<Utc>>,
}

impl RefreshWindow {
    /// Unbounded window
    pub fn all() -> Self {
        Self::default()
    }

    /// Window between two optional bounds
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> RollupResult<Self> {
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err(RollupError::Configuration(format!(
                    "refresh window start {} is not before end {}",
                    start, end
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Window covering the last `duration` up to now
    pub fn last(duration: chrono::Duration) -> Self {
        let end = Utc::now();
        Self {
            start: Some(end - duration),
            end: Some(end),
        }
    }
}

fn timestamp_literal(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format!("'{}'", ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => "NULL".to_string(),
    }
}

fn interval_literal(interval: Option<&crate::rollup::Interval>) -> String {
    match interval {
        Some(interval) => format!("INTERVAL '{}'", interval),
        None => "NULL".to_string(),
    }
}

/// Generates DDL for chains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DdlEmitter {
    with_data: bool,
    materialized_only: bool,
}

impl DdlEmitter {
    /// Emitter creating views `WITH NO DATA`
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate views immediately on creation
    pub fn with_data(mut self, with_data: bool) -> Self {
        self.with_data = with_data;
        self
    }

    /// Disable real-time aggregation (only materialized rows are returned)
    pub fn materialized_only(mut self, materialized_only: bool) -> Self {
        self.materialized_only = materialized_only;
        self
    }

    /// CREATE statement for one view
    pub fn create_view(&self, view: &DerivedView) -> String {
        let options = if self.materialized_only {
            "timescaledb.continuous, timescaledb.materialized_only = true"
        } else {
            "timescaledb.continuous"
        };
        let data = if self.with_data { "WITH DATA" } else { "WITH NO DATA" };

        format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS {} WITH ({}) AS {} {}",
            view.table_name(),
            options,
            view.select_sql(),
            data
        )
    }

    /// Policy registration for one view, if it has a policy
    pub fn add_policy(&self, view: &DerivedView) -> Option<String> {
        view.refresh_policy()
            .map(|policy| policy_statement(view.table_name(), policy))
    }

    /// CREATE and policy statements, finest view first
    pub fn create(&self, chain: &ChainHandle) -> Vec<String> {
        let mut statements = Vec::with_capacity(chain.len() * 2);
        for view in chain.views() {
            statements.push(self.create_view(view));
            if let Some(policy) = self.add_policy(view) {
                statements.push(policy);
            }
        }
        statements
    }

    /// DROP statements, coarsest view first
    pub fn drop(&self, chain: &ChainHandle) -> Vec<String> {
        chain
            .views_coarsest_first()
            .map(|view| format!("DROP MATERIALIZED VIEW IF EXISTS {} CASCADE", view.table_name()))
            .collect()
    }

    /// DROP statements for several chains, each chain's views together
    ///
    /// Chains are dropped in reverse registration order.
    pub fn drop_all<'a>(&self, chains: impl DoubleEndedIterator<Item = &'a ChainHandle>) -> Vec<String> {
        chains.rev().flat_map(|chain| self.drop(chain)).collect()
    }

    /// Policy removal statements for views that have a policy, coarsest first
    pub fn remove_policies(&self, chain: &ChainHandle) -> Vec<String> {
        chain
            .views_coarsest_first()
            .filter(|view| view.refresh_policy().is_some())
            .map(|view| {
                format!(
                    "SELECT remove_continuous_aggregate_policy('{}', if_exists => true)",
                    view.table_name()
                )
            })
            .collect()
    }

    /// Refresh calls in chain order, optionally limited to some granularities
    pub fn refresh(
        &self,
        chain: &ChainHandle,
        window: &RefreshWindow,
        only: Option<&[Granularity]>,
    ) -> Vec<String> {
        chain
            .views()
            .iter()
            .filter(|view| only.map_or(true, |only| only.contains(&view.granularity())))
            .map(|view| refresh_statement(view, window))
            .collect()
    }
}

fn policy_statement(table_name: &str, policy: &RefreshPolicy) -> String {
    format!(
        "SELECT add_continuous_aggregate_policy('{}', start_offset => {}, end_offset => {}, schedule_interval => {})",
        table_name,
        interval_literal(policy.start_offset.as_ref()),
        interval_literal(policy.end_offset.as_ref()),
        interval_literal(Some(&policy.schedule_interval)),
    )
}

/// Refresh call for one view
pub fn refresh_statement(view: &DerivedView, window: &RefreshWindow) -> String {
    format!(
        "CALL refresh_continuous_aggregate('{}', {}, {})",
        view.table_name(),
        timestamp_literal(window.start),
        timestamp_literal(window.end)
    )
}

/// CREATE (and policy) statements for a chain
pub fn emit_create(chain: &ChainHandle, with_data: bool) -> Vec<String> {
    DdlEmitter::new().with_data(with_data).create(chain)
}

/// DROP statements for a chain, coarsest first
pub fn emit_drop(chain: &ChainHandle) -> Vec<String> {
    DdlEmitter::new().drop(chain)
}

/// DROP statements for several chains, in reverse order
pub fn emit_drop_all<'a>(chains: impl DoubleEndedIterator<Item = &'a ChainHandle>) -> Vec<String> {
    DdlEmitter::new().drop_all(chains)
}

/// Policy removal statements for a chain, coarsest first
pub fn emit_remove_policies(chain: &ChainHandle) -> Vec<String> {
    DdlEmitter::new().remove_policies(chain)
}

/// Refresh calls for a chain, finest first
pub fn emit_refresh(
    chain: &ChainHandle,
    window: &RefreshWindow,
    only: Option<&[Granularity]>,
) -> Vec<String> {
    DdlEmitter::new().refresh(chain, window, only)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::{build_chain, AggregateDefinition};
    use chrono::TimeZone;

    fn chain() -> ChainHandle {
        let def = AggregateDefinition::builder("total", "raw", "ts")
            .select_as("count(*)", "total")
            .refresh_policy(
                Granularity::Minute,
                RefreshPolicy::parse(Some("10 minutes"), Some("1 minute"), "1 minute").unwrap(),
            )
            .refresh_policy(
                Granularity::Day,
                RefreshPolicy::parse(None, Some("1 day"), "1 day").unwrap(),
            )
            .build()
            .unwrap();
        build_chain(def, &[Granularity::Minute, Granularity::Hour, Granularity::Day]).unwrap()
    }

    #[test]
    fn test_emit_create() {
        let statements = emit_create(&chain(), false);

        assert_eq!(statements.len(), 5);
        assert_eq!(
            statements[0],
            "CREATE MATERIALIZED VIEW IF NOT EXISTS total_per_minute WITH (timescaledb.continuous) AS \
             SELECT time_bucket('1 minute', ts) AS ts, count(*) as total FROM raw \
             GROUP BY time_bucket('1 minute', ts) WITH NO DATA"
        );
        assert_eq!(
            statements[1],
            "SELECT add_continuous_aggregate_policy('total_per_minute', \
             start_offset => INTERVAL '10 minutes', end_offset => INTERVAL '1 minute', \
             schedule_interval => INTERVAL '1 minute')"
        );
        assert!(statements[2].starts_with("CREATE MATERIALIZED VIEW IF NOT EXISTS total_per_hour "));
        assert!(statements[3].starts_with("CREATE MATERIALIZED VIEW IF NOT EXISTS total_per_day "));
        assert_eq!(
            statements[4],
            "SELECT add_continuous_aggregate_policy('total_per_day', \
             start_offset => NULL, end_offset => INTERVAL '1 day', \
             schedule_interval => INTERVAL '1 day')"
        );
    }

    #[test]
    fn test_emit_create_with_data_and_options() {
        let emitter = DdlEmitter::new().with_data(true).materialized_only(true);
        let statements = emitter.create(&chain());

        assert!(statements[0].ends_with(" WITH DATA"));
        assert!(statements[0]
            .contains("WITH (timescaledb.continuous, timescaledb.materialized_only = true)"));
    }

    #[test]
    fn test_emission_is_idempotent() {
        let chain = chain();
        assert_eq!(emit_create(&chain, true), emit_create(&chain, true));
        assert_eq!(emit_drop(&chain), emit_drop(&chain));
    }

    #[test]
    fn test_emit_drop_coarsest_first() {
        assert_eq!(
            emit_drop(&chain()),
            vec![
                "DROP MATERIALIZED VIEW IF EXISTS total_per_day CASCADE",
                "DROP MATERIALIZED VIEW IF EXISTS total_per_hour CASCADE",
                "DROP MATERIALIZED VIEW IF EXISTS total_per_minute CASCADE",
            ]
        );
    }

    #[test]
    fn test_drop_all_groups_by_definition() {
        let first = chain();
        let def = AggregateDefinition::builder("volume", "raw", "ts")
            .select("sum(amount) as volume")
            .build()
            .unwrap();
        let second = build_chain(def, &[Granularity::Hour, Granularity::Day]).unwrap();

        let statements = emit_drop_all([&first, &second].into_iter());
        let tables: Vec<&str> = statements
            .iter()
            .map(|s| s.split_whitespace().nth(5).unwrap())
            .collect();
        assert_eq!(
            tables,
            vec![
                "volume_per_day",
                "volume_per_hour",
                "total_per_day",
                "total_per_hour",
                "total_per_minute",
            ]
        );
    }

    #[test]
    fn test_remove_policies() {
        assert_eq!(
            emit_remove_policies(&chain()),
            vec![
                "SELECT remove_continuous_aggregate_policy('total_per_day', if_exists => true)",
                "SELECT remove_continuous_aggregate_policy('total_per_minute', if_exists => true)",
            ]
        );
    }

    #[test]
    fn test_refresh_statements() {
        let chain = chain();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let window = RefreshWindow::new(Some(start), Some(end)).unwrap();

        let statements = emit_refresh(&chain, &window, None);
        assert_eq!(
            statements[0],
            "CALL refresh_continuous_aggregate('total_per_minute', '2024-01-01T00:00:00Z', '2024-02-01T00:00:00Z')"
        );
        assert_eq!(statements.len(), 3);

        let only_day =
            DdlEmitter::new().refresh(&chain, &RefreshWindow::all(), Some(&[Granularity::Day]));
        assert_eq!(
            only_day,
            vec!["CALL refresh_continuous_aggregate('total_per_day', NULL, NULL)"]
        );
    }

    #[test]
    fn test_refresh_window_validation() {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(RefreshWindow::new(Some(start), Some(end)).is_err());
        assert!(RefreshWindow::new(Some(start), None).is_ok());

        let window = RefreshWindow::last(chrono::Duration::days(7));
        assert!(window.start < window.end);
    }
}
