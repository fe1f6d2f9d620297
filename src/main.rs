//! CLI entry point for vaultdex.
//!
//! Loads the layered settings, opens the index under `.vaultdex/index` and
//! dispatches one command. Long-running commands run on the blocking pool
//! and stop between notes on Ctrl-C; whatever was indexed until then is
//! saved.

use anyhow::{Context, Result};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vaultdex::display::{
    THEME, Tone, create_gc_table, create_progress_bar, create_results_table, create_spinner,
    create_stats_table, with_spinner,
};
use vaultdex::vector::create_gateway;
use vaultdex::{
    BulkReport, FilePersistence, FileWalker, FsSource, IndexError, IndexingResult,
    RetrievalEngine, Settings,
};

/// Notes handed to the engine per progress bar update.
const INDEX_BATCH: usize = 64;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Semantic search for your notes
#[derive(Parser)]
#[command(
    name = "vaultdex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Semantic search for your notes",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ vaultdex init\n  $ vaultdex index notes/\n  $ vaultdex search \"how did I fix the boiler\"\n  $ vaultdex sync"
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log progress details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up .vaultdex directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Embed notes and add them to the index
    Index {
        /// Files or directories to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Number of threads to use (overrides config)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Skip notes whose content did not change since they were indexed
        #[arg(long)]
        if_changed: bool,

        /// Show what would be indexed without indexing
        #[arg(long)]
        dry_run: bool,

        /// Start from an empty index instead of the saved one, replacing it
        /// once indexing finishes (needed after changing chunking or model)
        #[arg(long, conflicts_with = "if_changed")]
        rebuild: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove notes from the index
    Remove {
        /// Files to remove
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Find the passages closest to a query
    #[command(
        after_help = "Examples:\n  vaultdex search \"sourdough starter ratio\"\n  vaultdex search \"tax deadlines\" -k 10 --json | jq '.[].path'"
    )]
    Search {
        query: String,

        /// Number of results (defaults to search.top_k)
        #[arg(short = 'k', long)]
        limit: Option<usize>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Drop deleted notes from the index files
    Compact {
        /// Only compact once deleted rows reach gc.tombstone_ratio
        #[arg(long)]
        if_needed: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Re-index changed notes and drop deleted ones
    Sync {
        /// Directory to sync (defaults to the workspace root)
        path: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics
    Stats {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Display active settings
    Config,
}

/// Error payload printed for `--json` commands.
#[derive(Serialize)]
struct JsonError<'a> {
    status: String,
    error: String,
    suggestions: Vec<&'a str>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = wants_json(&cli.command);

    if let Err(err) = run(cli).await {
        report_error(&err, json);
        std::process::exit(1);
    }
}

fn wants_json(command: &Commands) -> bool {
    match command {
        Commands::Index { json, .. }
        | Commands::Search { json, .. }
        | Commands::Compact { json, .. }
        | Commands::Sync { json, .. }
        | Commands::Stats { json } => *json,
        Commands::Init { .. } | Commands::Remove { .. } | Commands::Config => false,
    }
}

fn report_error(err: &anyhow::Error, json: bool) {
    let index_error = err.downcast_ref::<IndexError>();
    let suggestions = index_error.map(IndexError::recovery_suggestions).unwrap_or_default();

    if json {
        let payload = JsonError {
            status: index_error.map_or_else(|| "ERROR".to_string(), IndexError::status_code),
            error: format!("{err:#}"),
            suggestions,
        };
        match serde_json::to_string_pretty(&payload) {
            Ok(text) => println!("{text}"),
            Err(_) => eprintln!("{err:#}"),
        }
        return;
    }

    eprintln!("{}", THEME.status(Tone::Failure, &format!("{err:#}")));
    for suggestion in suggestions {
        eprintln!("  {}", THEME.muted(suggestion));
    }
}

fn init_logging(verbose: bool, debug: bool) {
    let default = if debug {
        "vaultdex=debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_settings(config: Option<&Path>) -> Result<Settings> {
    let mut settings = match config {
        Some(path) => Settings::load_from(path).map_err(|e| {
            anyhow::anyhow!("Configuration error loading from {}: {e}", path.display())
        })?,
        None => Settings::load().map_err(|e| anyhow::anyhow!("Configuration error: {e}"))?,
    };
    if settings.workspace_root.is_none() {
        settings.workspace_root = Some(std::env::current_dir()?);
    }
    Ok(settings)
}

fn workspace_root(settings: &Settings) -> PathBuf {
    settings
        .workspace_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Absolute form of a path given on the command line.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn open_engine(settings: Arc<Settings>, quiet: bool) -> Result<Arc<RetrievalEngine>> {
    start_engine(settings, quiet, false)
}

/// With `rebuild` the saved index is not loaded; the next save replaces it.
fn start_engine(
    settings: Arc<Settings>,
    quiet: bool,
    rebuild: bool,
) -> Result<Arc<RetrievalEngine>> {
    let embedder = with_spinner("Loading embedding model", quiet, || {
        create_gateway(&settings.embedding)
    })
    .map_err(IndexError::from)?;

    let source = Arc::new(FsSource::new(workspace_root(&settings)));
    let persistence = Arc::new(FilePersistence::new(settings.resolved_index_path()));
    let engine = if rebuild {
        RetrievalEngine::replacing(settings, embedder, source, persistence)?
    } else {
        RetrievalEngine::open(settings, embedder, source, persistence)?
    };
    Ok(Arc::new(engine))
}

/// Token cancelled by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current note...");
            child.cancel();
        }
    });
    token
}

async fn blocking<T, F>(engine: &Arc<RetrievalEngine>, operation: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&RetrievalEngine) -> vaultdex::IndexResult<T> + Send + 'static,
{
    let engine = Arc::clone(engine);
    let result = tokio::task::spawn_blocking(move || operation(&engine))
        .await
        .context("Worker thread panicked")?;
    Ok(result?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force } = &cli.command {
        init_logging(cli.verbose, false);
        let root = std::env::current_dir()?;
        let path = Settings::init_config_file(&root, *force)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        println!(
            "{}",
            THEME.status(Tone::Success, &format!("Created configuration at {}", path.display()))
        );
        println!("Edit this file to customize your settings.");
        return Ok(());
    }

    let mut settings = load_settings(cli.config.as_deref())?;
    init_logging(cli.verbose, settings.debug);

    match cli.command {
        Commands::Init { .. } => Ok(()),

        Commands::Config => {
            println!("{}", THEME.header("Current Configuration:"));
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }

        Commands::Index {
            paths,
            threads,
            if_changed,
            dry_run,
            rebuild,
            json,
        } => {
            if let Some(threads) = threads {
                settings.indexing.parallel_threads = threads;
            }
            settings.validate()?;
            let settings = Arc::new(settings);
            let files = collect_files(&settings, &paths)?;

            if dry_run {
                for file in &files {
                    println!("{}", file.display());
                }
                println!("{} notes would be indexed", files.len());
                return Ok(());
            }

            let engine = start_engine(Arc::clone(&settings), json, rebuild)?;
            let cancel = cancel_on_ctrl_c();
            let report = index_files(&engine, files, if_changed, json, cancel).await?;
            if rebuild && report.cancelled {
                // Keep the previous index rather than a partial rebuild
                anyhow::bail!(IndexError::Cancelled);
            }
            engine.save()?;

            if json {
                print_json(&report)?;
            } else {
                report.display();
            }
            Ok(())
        }

        Commands::Remove { paths } => {
            let engine = open_engine(Arc::new(settings), false)?;
            let mut removed = 0;
            for path in &paths {
                match engine.remove_document(&absolute(path)?) {
                    Ok(()) => removed += 1,
                    Err(e @ IndexError::NotFound { .. }) => {
                        eprintln!("{}", THEME.status(Tone::Caution, &e.to_string()));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            engine.save()?;
            println!(
                "{}",
                THEME.status(Tone::Success, &format!("Removed {removed} notes"))
            );
            Ok(())
        }

        Commands::Search { query, limit, json } => {
            let top_k = limit.unwrap_or(settings.search.top_k);
            let engine = open_engine(Arc::new(settings), json)?;

            let results = match blocking(&engine, move |engine| {
                engine.similarity_search(&query, top_k)
            })
            .await
            {
                Ok(results) => results,
                Err(err)
                    if matches!(
                        err.downcast_ref::<IndexError>(),
                        Some(IndexError::NoDocumentsIndexed)
                    ) =>
                {
                    // An empty index is not a failure
                    if json {
                        print_json(&Vec::<vaultdex::SimilarityResult>::new())?;
                    } else {
                        println!("{}", IndexError::NoDocumentsIndexed);
                    }
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            if json {
                print_json(&results)?;
            } else if results.is_empty() {
                println!("No matching passages found.");
            } else {
                println!("{}", create_results_table(&results));
            }
            Ok(())
        }

        Commands::Compact { if_needed, json } => {
            let engine = open_engine(Arc::new(settings), json)?;
            if if_needed && !engine.needs_compaction() {
                if json {
                    print_json(&vaultdex::GcReport::default())?;
                } else {
                    println!("Compaction not needed.");
                }
                return Ok(());
            }

            let cancel = cancel_on_ctrl_c();
            let report = blocking(&engine, move |engine| engine.collect_garbage(&cancel)).await?;
            if !report.is_noop() {
                engine.save()?;
            }

            if json {
                print_json(&report)?;
            } else if report.is_noop() {
                println!("Nothing to compact.");
            } else {
                println!("{}", create_gc_table(&report));
            }
            Ok(())
        }

        Commands::Sync { path, json } => {
            let root = match path {
                Some(path) => absolute(&path)?,
                None => workspace_root(&settings),
            };
            let engine = open_engine(Arc::new(settings), json)?;
            let cancel = cancel_on_ctrl_c();

            let spinner = (!json).then(|| create_spinner("Syncing notes"));
            let report =
                blocking(&engine, move |engine| engine.sync_directory(&root, &cancel)).await;
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            let report = report?;
            engine.save()?;

            if json {
                print_json(&report)?;
            } else {
                report.display();
            }
            Ok(())
        }

        Commands::Stats { json } => {
            let engine = open_engine(Arc::new(settings), json)?;
            let stats = engine.stats();
            if json {
                print_json(&stats)?;
            } else {
                println!("{}", create_stats_table(&stats));
            }
            Ok(())
        }
    }
}

/// Expands directories into the notes they contain.
fn collect_files(settings: &Arc<Settings>, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let walker = FileWalker::new(Arc::clone(settings));
    let mut files = Vec::new();
    for path in paths {
        let path = absolute(path)?;
        if path.is_dir() {
            files.extend(walker.walk(&path)?);
        } else if path.is_file() {
            files.push(path);
        } else {
            anyhow::bail!("Path not found: {}", path.display());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

async fn index_files(
    engine: &Arc<RetrievalEngine>,
    files: Vec<PathBuf>,
    if_changed: bool,
    quiet: bool,
    cancel: CancellationToken,
) -> Result<BulkReport> {
    let mut report = BulkReport::new();
    let bar = (!quiet).then(|| create_progress_bar(files.len() as u64, "notes"));

    for batch in files.chunks(INDEX_BATCH) {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let batch = batch.to_vec();
        let batch_len = batch.len() as u64;
        let token = cancel.clone();

        let batch_report = if if_changed {
            blocking(engine, move |engine| {
                let mut report = BulkReport::new();
                for path in batch {
                    if token.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    match engine.update_document(&path) {
                        Ok(IndexingResult::Indexed(_)) => report.indexed += 1,
                        Ok(IndexingResult::Unchanged(_)) => report.unchanged += 1,
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => report.add_error(path, e.to_string()),
                    }
                }
                Ok(report)
            })
            .await?
        } else {
            blocking(engine, move |engine| engine.add_documents(&batch, &token)).await?
        };

        report.absorb(batch_report);
        if let Some(bar) = &bar {
            bar.inc(batch_len);
        }
    }

    if let Some(bar) = bar {
        let message = if report.cancelled { "cancelled" } else { "done" };
        bar.finish_with_message(message);
    }
    report.stop_timing();

    if report.failed > 0 && THEME.colored() && !quiet {
        eprintln!(
            "{}",
            THEME.status(Tone::Caution, &format!("{} notes could not be indexed", report.failed))
        );
    }
    Ok(report)
}
