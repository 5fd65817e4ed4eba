//! Cascade DDL Emitter
//!
//! Turns built chains into statement text for the execution engine:
//!
//! - **create**: `CREATE MATERIALIZED VIEW ... WITH (timescaledb.continuous)`
//!   per view, finest first, each followed by its refresh policy
//! - **drop**: `DROP MATERIALIZED VIEW`, coarsest first (dependents before
//!   their sources)
//! - **policies**: `add_continuous_aggregate_policy` /
//!   `remove_continuous_aggregate_policy` per view with a policy
//! - **refresh**: `CALL refresh_continuous_aggregate(...)`, finest first
//!
//! # Example
//!
//! ```rust
//! use cascade::ddl::{emit_create, emit_drop};
//! use cascade::rollup::{build_chain, AggregateDefinition, Granularity};
//!
//! let definition = AggregateDefinition::builder("total", "raw", "ts")
//!     .select("count(*) as total")
//!     .build()
//!     .unwrap();
//! let chain = build_chain(definition, &[Granularity::Minute, Granularity::Hour]).unwrap();
//!
//! assert_eq!(emit_create(&chain, false).len(), 2);
//! assert_eq!(
//!     emit_drop(&chain)[0],
//!     "DROP MATERIALIZED VIEW IF EXISTS total_per_hour CASCADE"
//! );
//! ```

mod emitter;

pub use emitter::{
    emit_create, emit_drop, emit_drop_all, emit_refresh, emit_remove_policies, refresh_statement,
    DdlEmitter, RefreshWindow,
};
