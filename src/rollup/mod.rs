//! Cascade Rollup Compiler
//!
//! Derives a chain of coarser aggregates from one finest-grain definition:
//!
//! - **granularity**: Bucket widths and interval literals
//! - **ast**: Select-item expressions and their aggregate shapes
//! - **parser**: Parse select items into the AST
//! - **rules**: Combinator table mapping finer items to coarser ones
//! - **definition**: The finest-grain aggregate definition
//! - **chain**: Chain builder and derived views
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! AggregateDefinition + [minute, hour, day]
//!   → minute view: aggregate raw rows (filter applied here only)
//!   → hour view:   rules(minute items) over the minute view
//!   → day view:    rules(hour items) over the hour view
//! ```
//!
//! # Example
//!
//! ```rust
//! use cascade::rollup::{build_chain, AggregateDefinition, Granularity};
//!
//! let definition = AggregateDefinition::builder("total", "raw", "ts")
//!     .select_as("count(*)", "total")
//!     .build()
//!     .unwrap();
//!
//! let chain = build_chain(definition, &[Granularity::Minute, Granularity::Hour]).unwrap();
//! let hour = chain.view(Granularity::Hour).unwrap();
//!
//! assert_eq!(
//!     hour.select_sql(),
//!     "SELECT time_bucket('1 hour', ts) AS ts, sum(total) as total \
//!      FROM total_per_minute GROUP BY time_bucket('1 hour', ts)"
//! );
//! ```

pub mod ast;
pub mod chain;
pub mod definition;
pub mod error;
pub mod granularity;
pub mod parser;
pub mod rules;

pub use ast::{AggregateShape, Expr, SelectItem, OPAQUE_SUMMARY_FUNCTIONS};
pub use chain::{
    build_chain, refresh_policy, select_sql, ChainBuilder, ChainHandle, DerivedView, ViewSource,
};
pub use definition::{AggregateDefinition, AggregateDefinitionBuilder, RefreshPolicy};
pub use error::{RewriteWarning, RollupError, RollupResult};
pub use granularity::{Granularity, GranularitySequence, Interval};
pub use parser::{parse_expr, parse_select_item};
pub use rules::{CustomRule, Rewrite, RuleTable};
