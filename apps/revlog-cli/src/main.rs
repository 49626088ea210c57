mod config;

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use revlog_common::{ChangeType, ContentType, EntityType};
use revlog_kernel::{HistoryQuery, SaveRequest, VersionHistoryManager};
use revlog_persist::{Content, FileStore};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "revlog", version, about = "Version history and rollback for stored entities")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory (overrides the config file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Target {
    /// Entity type (file, project, config, deployment, user_setting, api_key, template)
    #[arg(short = 't', long = "type")]
    entity_type: EntityType,
    /// Entity id
    #[arg(short, long)]
    id: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new version of an entity
    Save {
        #[command(flatten)]
        target: Target,
        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long, default_value = "update")]
        change: ChangeType,
        #[arg(long, default_value = "text")]
        content_type: ContentType,
        /// Read content from a file
        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,
        /// Inline content (stdin is read when neither this nor --file is given)
        #[arg(long)]
        content: Option<String>,
        #[arg(short, long)]
        author: Option<String>,
        #[arg(short, long)]
        message: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Metadata as key=value; values that parse as JSON are kept as JSON
        #[arg(long = "meta")]
        metadata: Vec<String>,
    },
    /// Print a stored version (latest when --version is omitted)
    Get {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        version: Option<u64>,
        /// Write the raw content instead of JSON
        #[arg(long)]
        raw: bool,
    },
    /// List entries newest first
    History {
        #[command(flatten)]
        target: Target,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Restore an earlier version as a new revert entry
    Rollback {
        #[command(flatten)]
        target: Target,
        /// Version to restore
        #[arg(long)]
        to: u64,
        #[arg(short, long)]
        author: Option<String>,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Unified diff between two versions
    Diff {
        #[command(flatten)]
        target: Target,
        version_a: u64,
        version_b: u64,
        /// Print only the diff text
        #[arg(long)]
        text: bool,
    },
    /// Search entries across every timeline
    Search {
        /// Case-insensitive substring of the message
        #[arg(short = 'q', long)]
        text: Option<String>,
        #[arg(short = 't', long = "type")]
        entity_type: Option<EntityType>,
        #[arg(short, long)]
        change: Option<ChangeType>,
        #[arg(short, long)]
        author: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// RFC 3339 lower bound, inclusive
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound, inclusive
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Fork an entity into `{id}:branch:{name}`
    Branch {
        #[command(flatten)]
        target: Target,
        #[arg(short, long)]
        name: String,
        /// Source version (latest when omitted)
        #[arg(long)]
        from: Option<u64>,
    },
    /// Aggregate statistics for one timeline
    Summary {
        #[command(flatten)]
        target: Target,
    },
    /// Export a timeline as JSON
    Export {
        #[command(flatten)]
        target: Target,
        /// Include snapshot summaries and content
        #[arg(long)]
        snapshots: bool,
    },
    /// List every timeline in the store
    Timelines,
    /// List entity, change and content types
    Types,
    /// Verify the store's hash chain
    Verify,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Types = cli.command {
        return print_json(&serde_json::json!({
            "entity_types": EntityType::ALL.map(|t| t.as_str()),
            "change_types": ChangeType::ALL.map(|t| t.as_str()),
            "content_types": ContentType::ALL.map(|t| t.as_str()),
        }));
    }

    let config = CliConfig::load(cli.config.as_deref())?;
    let store_dir = config.store_dir(cli.store.as_deref());
    let store = FileStore::open(&store_dir, config.storage.clone())
        .with_context(|| format!("opening store {}", store_dir.display()))?;

    if let Commands::Verify = cli.command {
        store.verify_integrity()?;
        tracing::info!(store = %store_dir.display(), "integrity verified");
        return print_json(&store.meta());
    }

    let page_size = config.engine.history_page_size;
    let manager = VersionHistoryManager::open(store, config.engine)?;
    run(&manager, cli.command, page_size)
}

fn run(manager: &VersionHistoryManager, command: Commands, page_size: usize) -> anyhow::Result<()> {
    match command {
        Commands::Save {
            target,
            name,
            change,
            content_type,
            file,
            content,
            author,
            message,
            tags,
            metadata,
        } => {
            let bytes = read_content(file, content)?;
            let name = name.unwrap_or_else(|| target.id.clone());
            let mut request = SaveRequest::new(
                target.entity_type,
                target.id,
                name,
                change,
                Content::new(content_type, bytes),
            )
            .tags(tags);
            request.author = author;
            request.message = message;
            for pair in &metadata {
                let (key, value) = parse_meta(pair)?;
                request = request.metadata(key, value);
            }
            print_json(&manager.save_version(request)?)
        }
        Commands::Get {
            target,
            version,
            raw,
        } => {
            let Some(snapshot) = manager.get_version(target.entity_type, &target.id, version) else {
                bail!("{} not found", describe(&target, version));
            };
            if raw {
                use std::io::Write;
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&snapshot.content.bytes)?;
                stdout.flush()?;
                return Ok(());
            }
            print_json(&serde_json::json!({
                "snapshot": snapshot.summary(),
                "content": snapshot.content.to_json_value(),
            }))
        }
        Commands::History {
            target,
            limit,
            offset,
        } => print_json(&manager.get_history(
            target.entity_type,
            &target.id,
            limit.unwrap_or(page_size),
            offset,
        )),
        Commands::Rollback {
            target,
            to,
            author,
            message,
        } => {
            let entry = manager.rollback(
                target.entity_type,
                &target.id,
                to,
                author.as_deref(),
                message.as_deref(),
            )?;
            match entry {
                Some(entry) => print_json(&entry),
                None => bail!("{} not found", describe(&target, Some(to))),
            }
        }
        Commands::Diff {
            target,
            version_a,
            version_b,
            text,
        } => {
            let comparison =
                manager.compare_versions(target.entity_type, &target.id, version_a, version_b)?;
            if text {
                print!("{}", comparison.diff);
                Ok(())
            } else {
                print_json(&comparison)
            }
        }
        Commands::Search {
            text,
            entity_type,
            change,
            author,
            tags,
            since,
            until,
            limit,
        } => {
            let query = HistoryQuery {
                text,
                entity_type,
                change_type: change,
                author,
                tags,
                start_date: since,
                end_date: until,
                limit,
            };
            print_json(&manager.search_history(&query))
        }
        Commands::Branch { target, name, from } => {
            match manager.create_branch(target.entity_type, &target.id, &name, from)? {
                Some(branch) => print_json(&branch),
                None => bail!("{} not found", describe(&target, from)),
            }
        }
        Commands::Summary { target } => {
            match manager.get_timeline_summary(target.entity_type, &target.id) {
                Some(summary) => print_json(&summary),
                None => bail!("{} not found", describe(&target, None)),
            }
        }
        Commands::Export { target, snapshots } => {
            print_json(&manager.export_timeline(target.entity_type, &target.id, snapshots)?)
        }
        Commands::Timelines => print_json(&manager.list_timelines()),
        Commands::Types | Commands::Verify => Ok(()),
    }
}

fn read_content(file: Option<PathBuf>, inline: Option<String>) -> anyhow::Result<Vec<u8>> {
    if let Some(path) = file {
        return std::fs::read(&path).with_context(|| format!("reading {}", path.display()));
    }
    if let Some(text) = inline {
        return Ok(text.into_bytes());
    }
    let mut buf = Vec::new();
    std::io::stdin().lock().read_to_end(&mut buf)?;
    Ok(buf)
}

/// Split `key=value`. The value is kept as JSON when it parses, else as a string.
fn parse_meta(pair: &str) -> anyhow::Result<(String, serde_json::Value)> {
    let Some((key, value)) = pair.split_once('=') else {
        bail!("metadata must be key=value, got {pair:?}");
    };
    if key.is_empty() {
        bail!("metadata key is empty in {pair:?}");
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn describe(target: &Target, version: Option<u64>) -> String {
    match version {
        Some(v) => format!("version {v} of {}:{}", target.entity_type, target.id),
        None => format!("{}:{}", target.entity_type, target.id),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
