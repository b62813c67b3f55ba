// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! CDP CLI
//!
//! Command-line access to the storage substrate: physical address
//! resolution, index installation, time-range queries and histograms.

mod config;

use anyhow::{Context as _, Result};
use cdp_core::{with_context, CdpConfig, Context, DEFAULT_TENANT};
use cdp_query::{
    DatetimeSpec, DeltaTime, ExpressionParser, FilterTranslator, QueryEngine, SqlTranslator,
    TimeRangePayload, TimeUnit,
};
use cdp_storage::{
    ElasticBackend, IndexInstaller, IndexResolver, LogicalIndex, PersistenceService, SearchBackend,
};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "cdp")]
#[command(author, version, about = "Multi-tenant CDP storage tooling", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, env = "CDP_CONFIG")]
    config: Option<PathBuf>,

    /// Tenant to act for
    #[arg(short, long, env = "CDP_TENANT", default_value = DEFAULT_TENANT)]
    tenant: String,

    /// Use the production environment instead of staging
    #[arg(long, env = "CDP_PRODUCTION")]
    production: bool,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Output and logs as JSON (machine-readable)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the physical addresses of a logical index
    Resolve {
        /// Logical index name, e.g. `event` or `event-source`
        index: LogicalIndex,
    },

    /// Create missing templates, indices and aliases
    Install {
        /// Only this logical index (default: all)
        index: Option<LogicalIndex>,
    },

    /// Newest records inside a time range
    Query {
        index: LogicalIndex,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Record counts per time bucket
    Histogram {
        index: LogicalIndex,

        #[command(flatten)]
        range: RangeArgs,

        /// Split every bucket by this field
        #[arg(long)]
        group_by: Option<String>,
    },
}

#[derive(Args)]
struct RangeArgs {
    /// Range start (RFC 3339)
    #[arg(long)]
    from: Option<DateTime<Utc>>,

    /// Range end (RFC 3339, default: now)
    #[arg(long)]
    to: Option<DateTime<Utc>>,

    /// Relative range start such as `15m`, `24h`, `7d` or `3M`
    #[arg(long, value_parser = parse_lookback, conflicts_with = "from")]
    last: Option<DeltaTime>,

    /// Filter expression
    #[arg(long = "where")]
    filter: Option<String>,

    /// Translate the filter as a SQL WHERE clause
    #[arg(long)]
    sql: bool,

    /// IANA time zone for bucket boundaries
    #[arg(long)]
    time_zone: Option<String>,

    /// Field holding the record time
    #[arg(long, default_value = "metadata.time.insert")]
    time_field: String,

    #[arg(long, default_value = "0")]
    start: usize,

    #[arg(long, default_value = "20")]
    limit: usize,
}

impl RangeArgs {
    fn payload(&self) -> TimeRangePayload {
        let from = match (self.from, self.last) {
            (Some(from), _) => DatetimeSpec::absolute(from),
            (None, Some(last)) => DatetimeSpec {
                absolute: None,
                delta: Some(last),
            },
            (None, None) => DatetimeSpec::now(),
        };
        let to = self.to.map(DatetimeSpec::absolute).unwrap_or_default();

        TimeRangePayload {
            from,
            to,
            time_zone: self.time_zone.clone(),
            filter: self.filter.clone(),
            start: self.start,
            limit: self.limit,
        }
    }
}

/// `7d` means seven days back
fn parse_lookback(text: &str) -> std::result::Result<DeltaTime, String> {
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in {text:?}"))?;
    let (amount, unit) = text.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| format!("invalid amount in {text:?}"))?;
    let unit = match unit {
        "s" => TimeUnit::Second,
        "m" => TimeUnit::Minute,
        "h" => TimeUnit::Hour,
        "d" => TimeUnit::Day,
        "w" => TimeUnit::Week,
        "M" => TimeUnit::Month,
        "y" => TimeUnit::Year,
        other => return Err(format!("unknown unit {other:?}, expected one of s m h d w M y")),
    };
    Ok(DeltaTime::new(-amount, unit))
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| if verbose { "cdp=debug" } else { "cdp=info" }.into());
    let registry = tracing_subscriber::registry().with(filter);
    // stdout carries command output
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn connect(config: &CdpConfig) -> Result<Arc<dyn SearchBackend>> {
    let backend = ElasticBackend::new(&config.elastic).context("Failed to create search client")?;
    Ok(Arc::new(backend))
}

async fn run(cli: Cli, config: CdpConfig) -> Result<()> {
    let resolver = Arc::new(IndexResolver::from_config(&config)?);

    match cli.command {
        Commands::Resolve { index } => {
            let descriptor = resolver.descriptor(index).clone();
            let alias = resolver.resolve_alias(index);
            let write_target = resolver.resolve_write_target(index, Utc::now())?;
            let storage_index = resolver.resolve_storage_index(index, Utc::now())?;
            let template = resolver.resolve_template(index);

            if cli.json {
                print_json(&json!({
                    "descriptor": descriptor,
                    "alias": alias,
                    "write_target": write_target,
                    "storage_index": storage_index,
                    "template": template,
                }))?;
            } else {
                println!("{index}:");
                println!("  Alias:         {alias}");
                println!("  Write target:  {write_target}");
                println!("  Storage index: {storage_index}");
                if let Some(template) = template {
                    println!("  Template:      {} ({})", template.name, template.pattern);
                }
                println!("  Schema file:   {}", descriptor.schema_file);
            }
        }
        Commands::Install { index } => {
            let mut installer = IndexInstaller::new(connect(&config)?, resolver);
            if let Some(dir) = &config.mappings_dir {
                installer = installer.with_mappings_dir(dir.clone());
            }
            let report = match index {
                Some(index) => installer.install(index).await?,
                None => installer.install_all().await?,
            };

            if cli.json {
                print_json(&report)?;
            } else if report.is_noop() {
                println!("✓ Everything already installed");
            } else {
                for name in &report.templates {
                    println!("✓ Template {name}");
                }
                for name in &report.indices {
                    println!("✓ Index {name}");
                }
                for name in &report.aliases {
                    println!("✓ Alias {name}");
                }
            }
        }
        Commands::Query { index, range } => {
            let storage = PersistenceService::new(connect(&config)?, resolver);
            let engine = engine(storage, index, range.sql);
            let records = engine
                .time_range_query(index, &range.payload(), &range.time_field)
                .await?;

            if cli.json {
                print_json(&records)?;
            } else {
                println!("Found {} records, showing {}:", records.total(), records.len());
                for record in &records {
                    let time = record
                        .get_path(&range.time_field)
                        .and_then(|v| v.as_str())
                        .unwrap_or("-");
                    println!("  {}  {}", time, record.id().unwrap_or("-"));
                }
            }
        }
        Commands::Histogram {
            index,
            range,
            group_by,
        } => {
            let storage = PersistenceService::new(connect(&config)?, resolver);
            let engine = engine(storage, index, range.sql);
            let histogram = engine
                .histogram(index, &range.payload(), &range.time_field, group_by.as_deref())
                .await?;

            if cli.json {
                print_json(&histogram)?;
            } else {
                println!(
                    "{} records, {} buckets of {} ({})",
                    histogram.total,
                    histogram.buckets.len(),
                    histogram.interval,
                    histogram.time_zone
                );
                for bucket in &histogram.buckets {
                    let groups: Vec<String> = bucket
                        .groups
                        .iter()
                        .map(|(group, count)| format!("{group}={count}"))
                        .collect();
                    println!("  {}  {:>6}  {}", bucket.label, bucket.count, groups.join(" "));
                }
            }
        }
    }

    Ok(())
}

fn engine(storage: PersistenceService, index: LogicalIndex, sql: bool) -> QueryEngine {
    let translator: Arc<dyn FilterTranslator> = if sql {
        Arc::new(SqlTranslator::new(storage.clone(), index))
    } else {
        Arc::new(ExpressionParser)
    };
    QueryEngine::new(storage, translator)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let config = config::load(cli.config.clone())?;
    tracing::debug!(hosts = ?config.elastic.hosts, prefix = %config.version_prefix, "configuration loaded");

    let ctx = Context::new(cli.tenant.clone(), cli.production);
    tracing::info!(tenant = %ctx.tenant(), production = ctx.is_production(), "cdp");
    with_context(ctx, run(cli, config)).await
}
