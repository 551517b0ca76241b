// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use podstats_core::rpc::partition_names;
use podstats_core::{RawRedirectEvent, RpcClient};
use podstats_query::{
    compute_daily_downloads, compute_hourly_downloads, query_redirect_logs, PatternClassifier,
    Permission, StaticShowLookup,
};
use podstats_server::{init_tracing, Backend, LocalTransport, PodstatsConfig};
use podstats_storage::FsBlobs;
use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Events sent per log-raw-redirects call during ingest.
const INGEST_BATCH: usize = 1000;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Journal directory (overrides config file)
    #[arg(long, global = true, env = "PODSTATS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Blob store directory (overrides config file)
    #[arg(long, global = true, env = "PODSTATS_STATS_DIR")]
    stats_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append raw redirect events from a JSON-lines file
    Ingest {
        path: PathBuf,
        #[arg(long, default_value = partition_names::COMBINED_REDIRECT_LOG)]
        partition: String,
    },
    /// Query the combined redirect log and print the export
    Query(QueryArgs),
    /// Compute the downloads for one hour (yyyy-MM-ddTHH)
    Hourly {
        hour: String,
        #[arg(long)]
        max_queries: Option<usize>,
        #[arg(long)]
        query_size: Option<usize>,
        #[arg(long)]
        max_hits: Option<usize>,
    },
    /// Compute the downloads for one date (yyyy-MM-dd)
    Daily {
        date: String,
        /// Only write per-show outputs for these shows
        #[arg(long = "only-show")]
        only_show: Vec<String>,
        /// JSON object mapping destination URLs to show/episode
        #[arg(long)]
        shows: Option<PathBuf>,
    },
    /// Re-derive one secondary index over a span of the log
    RebuildIndex {
        name: String,
        #[arg(long, default_value = "")]
        start: String,
        #[arg(long)]
        inclusive: bool,
        #[arg(long, default_value_t = 1000)]
        limit: usize,
        #[arg(long, default_value = partition_names::COMBINED_REDIRECT_LOG)]
        partition: String,
    },
    /// Print a partition's metrics
    Metrics {
        #[arg(long, default_value = partition_names::COMBINED_REDIRECT_LOG)]
        partition: String,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    start_after: Option<String>,
    #[arg(long)]
    end: Option<String>,
    /// tsv, json-o or json-a
    #[arg(long)]
    format: Option<String>,
    /// Field filter as name=value (at most one)
    #[arg(long)]
    filter: Vec<String>,
}

impl QueryArgs {
    fn params(self) -> Result<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        let named = [
            ("limit", self.limit.map(|l| l.to_string())),
            ("start", self.start),
            ("startAfter", self.start_after),
            ("end", self.end),
            ("format", self.format),
        ];
        for (name, value) in named {
            if let Some(value) = value {
                params.insert(name.to_string(), value);
            }
        }
        for filter in self.filter {
            let (name, value) = filter
                .split_once('=')
                .with_context(|| format!("filter must be name=value: {}", filter))?;
            params.insert(name.to_string(), value.to_string());
        }
        Ok(params)
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn ingest(client: &RpcClient, path: &Path, partition: &str) -> Result<usize> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {:?}", path))?;
    let mut batch = Vec::with_capacity(INGEST_BATCH);
    let mut count = 0;
    for (i, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: RawRedirectEvent = serde_json::from_str(&line)
            .with_context(|| format!("{:?} line {}", path, i + 1))?;
        batch.push(event);
        if batch.len() >= INGEST_BATCH {
            count += batch.len();
            client.log_raw_redirects(std::mem::take(&mut batch), partition).await?;
        }
    }
    if !batch.is_empty() {
        count += batch.len();
        client.log_raw_redirects(batch, partition).await?;
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Load configuration
    let mut config = PodstatsConfig::load(cli.config)?;

    // Apply CLI overrides
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(stats_dir) = cli.stats_dir {
        config.storage.stats_dir = stats_dir;
    }
    config.validate()?;

    let backend = Arc::new(Backend::new(config.partition_config()?));
    let client = RpcClient::new(Arc::new(LocalTransport::new(backend)));
    let blobs = FsBlobs::new(&config.storage.stats_dir);

    match cli.command {
        Command::Ingest { path, partition } => {
            let count = ingest(&client, &path, &partition).await?;
            tracing::info!(count, partition = %partition, "ingested redirect events");
        }
        Command::Query(args) => {
            let params = args.params()?;
            let permissions = BTreeSet::from([Permission::Admin]);
            let response = query_redirect_logs(&permissions, "GET", &params, &client).await?;
            print!("{}", response.body);
        }
        Command::Hourly {
            hour,
            max_queries,
            query_size,
            max_hits,
        } => {
            let mut options = config.hourly_options();
            options.max_queries = max_queries.unwrap_or(options.max_queries);
            options.query_size = query_size.unwrap_or(options.query_size);
            options.max_hits = max_hits.unwrap_or(options.max_hits);
            let result =
                compute_hourly_downloads(&hour, options, &client, &blobs, &PatternClassifier).await?;
            print_json(&result)?;
        }
        Command::Daily {
            date,
            only_show,
            shows,
        } => {
            let lookup = match shows {
                Some(path) => StaticShowLookup::from_json(
                    &std::fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?,
                )?,
                None => StaticShowLookup::default(),
            };
            let only = (!only_show.is_empty()).then_some(only_show.as_slice());
            let result = compute_daily_downloads(&date, only, &blobs, &lookup).await?;
            print_json(&result)?;
        }
        Command::RebuildIndex {
            name,
            start,
            inclusive,
            limit,
            partition,
        } => {
            let result = client
                .admin_rebuild_index(&name, &start, inclusive, limit, &partition)
                .await?;
            print_json(&result)?;
        }
        Command::Metrics { partition } => {
            print_json(&client.admin_get_metrics(&partition).await?)?;
        }
    }

    Ok(())
}
