//! # Cascade
//!
//! Hierarchical rollup compiler for continuous aggregates. One finest-grain
//! aggregate definition plus a granularity chain becomes a set of
//! materialized views, each rolled up from the next finer one.
//!
//! ## Features
//!
//! - **Typed rewrites**: Select items are parsed once and rolled up by shape
//! - **Stable aliases**: Every view exposes the same columns as its source
//! - **DDL emission**: CREATE, DROP, refresh policy and refresh statements
//! - **Registry**: Lookup and ordered execution over many chains
//!
//! ## Modules
//!
//! - [`rollup`]: Definitions, granularities, rewrite rules and chain building
//! - [`ddl`]: Statement emission for built chains
//! - [`registry`]: Registered chains and statement execution
//! - [`config`]: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust
//! use cascade::{build_chain, emit_create, AggregateDefinition, Granularity};
//!
//! let definition = AggregateDefinition::builder("downloads", "downloads", "ts")
//!     .select("gem_name")
//!     .select("count(*) as total")
//!     .group_by("gem_name")
//!     .build()
//!     .unwrap();
//!
//! let chain = build_chain(
//!     definition,
//!     &[Granularity::Minute, Granularity::Hour, Granularity::Day],
//! )
//! .unwrap();
//!
//! let statements = emit_create(&chain, false);
//! assert_eq!(statements.len(), 3);
//! assert!(statements[1].contains("FROM downloads_per_minute"));
//! ```

pub mod config;
pub mod ddl;
pub mod registry;
pub mod rollup;

pub use ddl::{emit_create, emit_drop, DdlEmitter, RefreshWindow};
pub use registry::{Registry, SqlExecutor};
pub use rollup::{
    build_chain, refresh_policy, select_sql, AggregateDefinition, ChainHandle, DerivedView,
    Granularity, RefreshPolicy, RollupError, RollupResult,
};
