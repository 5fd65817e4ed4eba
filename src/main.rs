//! Cascade CLI
//!
//! Command-line interface for the rollup compiler:
//! - Emit CREATE / DROP statements for configured aggregates
//! - Inspect derived views and refresh policies
//! - Emit refresh calls and ad-hoc rollup queries
//! - Generate a default config file

use anyhow::{bail, Context};
use cascade::config::{generate_default_config, Config, LoggingConfig};
use cascade::ddl::RefreshWindow;
use cascade::registry::{Registry, StatementLog};
use cascade::rollup::{Granularity, GranularitySequence, Interval};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cascade")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hierarchical rollup compiler for continuous aggregates")]
#[command(long_about = "Cascade turns one finest-grain aggregate definition into a chain of\ncontinuous aggregates, each rolled up from the next finer one.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Emit CREATE statements and refresh policies for every aggregate
    Create {
        /// Populate views on creation
        #[arg(long)]
        with_data: bool,
    },

    /// Emit DROP statements for every aggregate
    Drop {
        /// Only remove refresh policies, keep the views
        #[arg(long)]
        policies: bool,
    },

    /// Show the derived views of an aggregate
    Show {
        /// Aggregate name
        name: String,
        /// Only this granularity
        #[arg(short, long)]
        granularity: Option<String>,
    },

    /// Emit refresh calls for an aggregate, finest first
    Refresh {
        /// Aggregate name
        name: String,
        /// Window start (RFC 3339)
        #[arg(long)]
        start: Option<String>,
        /// Window end (RFC 3339)
        #[arg(long)]
        end: Option<String>,
        /// Refresh the last period instead (e.g., 7d, 4w, 3m, 1y)
        #[arg(short, long, conflicts_with_all = ["start", "end"])]
        last: Option<String>,
        /// Only these granularities
        #[arg(short, long)]
        granularity: Vec<String>,
    },

    /// Roll a view up to an arbitrary interval
    Rollup {
        /// Aggregate name
        name: String,
        /// Granularity of the view to roll up
        #[arg(long)]
        from: String,
        /// Target bucket width (e.g., "6 hours")
        #[arg(short, long)]
        interval: String,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        return write_default_config(output.as_ref());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => tracing::subscriber::with_default(bootstrap_subscriber(), Config::load_default),
    };
    init_logging(&config.logging);

    if let Commands::Create { with_data: true } = cli.command {
        config.compiler.with_data = true;
    }

    let registry = config.registry().context("building rollup chains")?;
    for warning in registry.warnings() {
        tracing::warn!("{}", warning);
    }

    let json = match cli.format.as_str() {
        "text" => false,
        "json" => true,
        other => bail!("Unknown output format: {}. Use: text, json", other),
    };

    match cli.command {
        Commands::Create { .. } => {
            let log = StatementLog::new();
            let count = registry.create_all(&log).await?;
            tracing::info!(statements = count, "Emitted create statements");
            print_statements(&log.take().await, json)?;
        }

        Commands::Drop { policies } => {
            let log = StatementLog::new();
            let count = if policies {
                registry.remove_policies(&log).await?
            } else {
                registry.drop_all(&log).await?
            };
            tracing::info!(statements = count, "Emitted drop statements");
            print_statements(&log.take().await, json)?;
        }

        Commands::Show { name, granularity } => {
            show(&registry, &name, granularity.as_deref(), json)?;
        }

        Commands::Refresh {
            name,
            start,
            end,
            last,
            granularity,
        } => {
            let window = match last {
                Some(last) => RefreshWindow::last(parse_duration(&last)?),
                None => RefreshWindow::new(
                    start.as_deref().map(parse_timestamp).transpose()?,
                    end.as_deref().map(parse_timestamp).transpose()?,
                )?,
            };

            let log = StatementLog::new();
            if granularity.is_empty() {
                registry.refresh(&name, &window, &log).await?;
            } else {
                let only = granularity
                    .iter()
                    .map(|g| g.parse())
                    .collect::<Result<Vec<Granularity>, _>>()?;
                registry
                    .refresh_granularities(&name, &only, &window, &log)
                    .await?;
            }
            print_statements(&log.take().await, json)?;
        }

        Commands::Rollup {
            name,
            from,
            interval,
        } => {
            let sql = registry.adhoc_rollup(&name, from.parse()?, &Interval::parse(&interval)?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sql)?);
            } else {
                println!("{};", sql);
            }
        }

        Commands::Config { output } => write_default_config(output.as_ref())?,
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("cascade={}", logging.level)),
    );

    // stdout carries statements
    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Stderr subscriber used while the config, and with it the log settings, loads
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cascade=info".into()),
        ))
        .with_writer(std::io::stderr)
        .finish()
}

fn write_default_config(output: Option<&PathBuf>) -> anyhow::Result<()> {
    let config = generate_default_config();

    match output {
        Some(path) => {
            // Create parent directory if needed
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &config)?;
            println!("Config written to {:?}", path);
        }
        None => {
            print!("{}", config);
        }
    }

    Ok(())
}

fn show(registry: &Registry, name: &str, granularity: Option<&str>, json: bool) -> anyhow::Result<()> {
    let chain = registry.chain(name)?;
    let views = match granularity {
        Some(g) => vec![registry.view(name, g.parse()?)?],
        None => chain.views().iter().collect(),
    };

    if json {
        let value = serde_json::json!({
            "name": chain.name(),
            "granularities": chain.granularities(),
            "views": views,
            "warnings": chain.warnings(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{} ({})", chain.name(), format_granularities(chain.granularities()));
    for view in views {
        println!();
        println!("{}", view.table_name());
        println!("  Source: {}", view.source().name());
        println!("  Group by: {}", view.group_by().join(", "));
        match view.refresh_policy() {
            Some(policy) => println!(
                "  Refresh: every {} (start {}, end {})",
                policy.schedule_interval,
                policy.start_offset.as_ref().map_or("NULL", |i| i.as_str()),
                policy.end_offset.as_ref().map_or("NULL", |i| i.as_str()),
            ),
            None => println!("  Refresh: manual"),
        }
        println!("  {}", view.select_sql());
    }

    if !chain.warnings().is_empty() {
        println!();
        println!("Warnings:");
        for warning in chain.warnings() {
            println!("  {}", warning);
        }
    }

    Ok(())
}

fn print_statements(statements: &[String], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(statements)?);
    } else {
        for statement in statements {
            println!("{};", statement);
        }
    }
    Ok(())
}

fn format_granularities(granularities: &GranularitySequence) -> String {
    granularities
        .iter()
        .map(|g| g.to_string())
        .collect::<Vec<_>>()
        .join(" → ")
}

fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}. Use RFC 3339", s))
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim().to_lowercase();

    let duration = if let Some(hours) = s.strip_suffix('h') {
        Duration::try_hours(hours.parse()?)
    } else if let Some(days) = s.strip_suffix('d') {
        Duration::try_days(days.parse()?)
    } else if let Some(weeks) = s.strip_suffix('w') {
        Duration::try_weeks(weeks.parse()?)
    } else if let Some(months) = s.strip_suffix('m') {
        months.parse::<i64>()?.checked_mul(30).and_then(Duration::try_days)
    } else if let Some(years) = s.strip_suffix('y') {
        years.parse::<i64>()?.checked_mul(365).and_then(Duration::try_days)
    } else {
        bail!("Invalid duration format: {}. Use: 12h, 7d, 4w, 3m, 1y", s)
    };

    match duration {
        Some(duration) => Ok(duration),
        None => bail!("Duration out of range: {}", s),
    }
}
