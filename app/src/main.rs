use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use lexi_core::config::{Config, DictionaryConfig, TargetSpec};
use lexi_core::dictionary::DictionarySource;
use lexi_core::index::Indexer;
use lexi_core::ready::SegmenterGate;
use lexi_core::search::SearchService;
use lexi_core::segmenter::Segmenter;
use lexi_core::store::Store;
use lexi_crawler::{Scheduler, SourceRegistry};
use lexi_indexer::IndexRun;

#[derive(Parser)]
#[command(name = "lexi")]
#[command(about = "Crawl sources, index them with dictionary segmentation, and search the index")]
struct Cli {
    /// TOML config file; defaults apply when it does not exist
    #[arg(long, default_value = "./lexi.toml")]
    config: PathBuf,
    /// Store directory (overrides store.path)
    #[arg(long)]
    store: Option<PathBuf>,
    /// Comma-separated dictionary files, highest priority first
    #[arg(long)]
    dictionaries: Option<String>,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// Run one crawl pass over eligible targets
    Crawler {
        /// Seeds file, one `url [kind] [discover]` per line
        #[arg(long)]
        seeds: Option<PathBuf>,
        #[command(subcommand)]
        action: Option<CrawlerAction>,
    },
    /// Index queued documents
    Indexer {
        /// Rebuild the whole index from stored documents
        #[arg(long, default_value_t = false)]
        full: bool,
        #[command(subcommand)]
        action: Option<IndexerAction>,
    },
    /// Run a query against the index
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print a stored document
    Doc { id: u64 },
}

#[derive(Subcommand)]
enum CrawlerAction {
    /// Re-enable a disabled target by id or URL
    Enable { target: String },
    /// Print every registered target
    List,
}

#[derive(Subcommand)]
enum IndexerAction {
    /// Import JSON/JSONL documents from a file or directory
    Import {
        #[arg(long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if let Some(store) = cli.store {
        config.store.path = store;
    }
    if let Some(list) = cli.dictionaries.as_deref() {
        config.dictionary = DictionaryConfig::from_comma_list(list);
    }
    config.validate()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    fmt().with_env_filter(filter).init();

    let Some(mode) = cli.mode else {
        tracing::info!("no mode given; queries are served by the web layer over SearchService");
        return Ok(());
    };

    let store = Store::open(&config.store.path)
        .with_context(|| format!("opening store at {}", config.store.path.display()))?;
    let shutdown = shutdown_signal();

    let result = match mode {
        Mode::Crawler { action: Some(CrawlerAction::List), .. } => list_targets(&store),
        Mode::Crawler { action: Some(CrawlerAction::Enable { target }), .. } => {
            enable_target(&store, &target)
        }
        Mode::Crawler { seeds, action: None } => {
            crawl(&config, &store, seeds.as_deref(), shutdown).await
        }
        Mode::Indexer { full, action } => {
            let segmenter = load_segmenter(&config).await?;
            let run = IndexRun::new(Indexer::new(store.clone(), segmenter));
            let summary = tokio::task::spawn_blocking(move || -> Result<_> {
                Ok(match action {
                    Some(IndexerAction::Import { input }) => run.import(&input, &shutdown)?,
                    None if full => run.run_full()?,
                    None => run.run_pending(&shutdown)?,
                })
            })
            .await??;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Mode::Search { query, limit } => {
            let segmenter = load_segmenter(&config).await?;
            let service = SearchService::new(store.clone(), segmenter, config.search.clone());
            let results = service.query(&query, limit.unwrap_or(config.search.default_limit))?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Mode::Doc { id } => {
            let doc = store.document(id)?.ok_or_else(|| anyhow!("document {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
    };

    store.flush()?;
    result
}

/// Flips to true on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; finishing in-flight work");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn load_segmenter(config: &Config) -> Result<Arc<Segmenter>> {
    let source = DictionarySource::from_priority_paths(&config.dictionary.paths);
    let gate = SegmenterGate::spawn(source);
    let segmenter = gate.ready().await?;
    let stats = segmenter.dictionary().stats();
    tracing::info!(
        entries = segmenter.dictionary().len(),
        files = stats.files,
        malformed = stats.malformed,
        overridden = stats.overridden,
        "dictionary loaded"
    );
    Ok(segmenter)
}

fn register_specs(store: &Store, specs: &[TargetSpec]) -> Result<usize> {
    let now = OffsetDateTime::now_utc();
    let mut created = 0;
    for spec in specs {
        let (_, new) = store.register_target(&spec.url, spec.kind, spec.discover, None, now)?;
        created += usize::from(new);
    }
    Ok(created)
}

fn read_seeds(path: &Path) -> Result<Vec<TargetSpec>> {
    let file = File::open(path).with_context(|| format!("opening seeds file {}", path.display()))?;
    let mut specs = Vec::new();
    for line in BufReader::new(file).lines() {
        if let Some(spec) = TargetSpec::parse_seed_line(&line?) {
            specs.push(spec);
        }
    }
    Ok(specs)
}

async fn crawl(
    config: &Config,
    store: &Store,
    seeds: Option<&Path>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut specs = config.targets.clone();
    if let Some(path) = seeds {
        specs.extend(read_seeds(path)?);
    }
    let created = register_specs(store, &specs)?;
    tracing::info!(declared = specs.len(), created, "targets registered");

    let indexer = if config.crawler.index_on_accept {
        Some(Indexer::new(store.clone(), load_segmenter(config).await?))
    } else {
        None
    };
    let sources = SourceRegistry::standard();
    let scheduler = Scheduler::new(store.clone(), &config.crawler, sources, indexer)?;
    let summary = scheduler.run(shutdown).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn list_targets(store: &Store) -> Result<()> {
    for target in store.targets()? {
        println!("{}", serde_json::to_string(&target)?);
    }
    Ok(())
}

fn enable_target(store: &Store, target: &str) -> Result<()> {
    let id = match target.parse::<u64>() {
        Ok(id) => id,
        Err(_) => {
            let found = store.target_by_url(target)?;
            found.ok_or_else(|| anyhow!("no target registered for {target}"))?.id
        }
    };
    let t = store.enable_target(id, OffsetDateTime::now_utc())?;
    tracing::info!(target_id = t.id, url = %t.source_url, "target re-enabled");
    Ok(())
}
