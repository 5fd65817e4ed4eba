//! Cascade Registry
//!
//! Lookup, refresh and teardown over registered chains. The registry does no
//! computation of its own: chains come from the rollup compiler, statements
//! from the DDL emitter, and execution is delegated to a [`SqlExecutor`].
//!
//! # Example
//!
//! ```rust
//! use cascade::ddl::RefreshWindow;
//! use cascade::registry::{Registry, StatementLog};
//! use cascade::rollup::{AggregateDefinition, Granularity};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = Registry::default();
//! registry.register(
//!     AggregateDefinition::builder("total", "downloads", "ts")
//!         .select("count(*) as total")
//!         .build()?,
//!     &[Granularity::Minute, Granularity::Hour],
//! )?;
//!
//! let log = StatementLog::new();
//! registry.refresh("total", &RefreshWindow::all(), &log).await?;
//! assert_eq!(log.statements().await.len(), 2);
//! # Ok(())
//! # }
//! ```

mod executor;
mod manager;

pub use executor::{SqlExecutor, StatementLog};
pub use manager::Registry;
