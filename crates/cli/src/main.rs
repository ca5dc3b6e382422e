use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::{logging, render};
use codeguard_core::config::{self, AppConfig};
use codeguard_core::pipeline::{self, ScanRequest};
use codeguard_core::{CancelToken, ScanSource, ScanStatus};
use std::path::PathBuf;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    logging::init(&cfg.logging, cli.verbose)?;

    match cli.command {
        Commands::Scan {
            target,
            branch,
            include,
            exclude,
            files,
            output,
            json,
            no_save,
        } => {
            run_scan(
                cfg,
                ScanArgs {
                    target,
                    branch,
                    include,
                    exclude,
                    files,
                    output,
                    json,
                    no_save,
                },
            )
            .await
        }
        Commands::Show { scan_id, json } => run_show(cfg, &scan_id, json).await,
        Commands::List { limit, offset, json } => run_list(cfg, limit, offset, json).await,
        Commands::Purge { scan_id } => run_purge(cfg, &scan_id).await,
        Commands::Search {
            query,
            scan_id,
            language,
            topk,
        } => run_search(cfg, query, scan_id, language, topk).await,
    }
}

#[derive(Parser)]
#[command(name = "codeguard")]
#[command(about = "Retrieval-augmented security and code review scanner", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a repository URL or local directory
    Scan {
        /// Git URL or local path
        target: String,
        /// Branch to clone for remote targets
        #[arg(long)]
        branch: Option<String>,
        /// Include glob, relative to the repository root (repeatable)
        #[arg(long)]
        include: Vec<String>,
        /// Exclude glob, relative to the repository root (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
        /// Only scan these relative paths (repeatable)
        #[arg(long = "files")]
        files: Vec<String>,
        /// Write the JSON result to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the JSON result instead of the summary table
        #[arg(long)]
        json: bool,
        /// Do not persist the result
        #[arg(long)]
        no_save: bool,
    },
    /// Show a stored scan
    Show {
        scan_id: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored scans, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a scan's indexed chunks and stored result
    Purge { scan_id: String },
    /// Semantic search over indexed chunks
    Search {
        /// Query text to embed and search
        query: String,
        /// Restrict to one scan
        #[arg(long)]
        scan_id: Option<String>,
        /// Restrict to one language
        #[arg(long)]
        language: Option<String>,
        /// Number of results
        #[arg(short, long, default_value_t = 5)]
        topk: usize,
    },
}

struct ScanArgs {
    target: String,
    branch: Option<String>,
    include: Vec<String>,
    exclude: Vec<String>,
    files: Vec<String>,
    output: Option<PathBuf>,
    json: bool,
    no_save: bool,
}

async fn open_db(cfg: &AppConfig) -> Result<storage::SqlitePool> {
    let pool = storage::connect(&cfg.database.path)
        .await
        .with_context(|| format!("db connect {}", cfg.database.path))?;
    storage::migrate(&pool).await.context("db migrate")?;
    Ok(pool)
}

async fn run_scan(cfg: AppConfig, args: ScanArgs) -> Result<()> {
    let orchestrator = pipeline::build_orchestrator(&cfg)?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling scan");
            on_signal.cancel();
        }
    });

    let mut req = ScanRequest::new(ScanSource::from_target(&args.target, args.branch));
    req.include = args.include;
    req.exclude = args.exclude;
    req.files = args.files;

    let result = orchestrator.scan_with_cancel(req, &cancel).await;

    if !args.no_save {
        let pool = open_db(&cfg).await?;
        storage::save_scan(&pool, &result).await.context("save scan")?;
        info!(scan_id = %result.scan_id, db = %cfg.database.path, "scan saved");
    }

    let body = serde_json::to_string_pretty(&result)?;
    if let Some(path) = &args.output {
        std::fs::write(path, &body).with_context(|| format!("write {}", path.display()))?;
    }
    if args.json {
        println!("{body}");
    } else {
        print!("{}", render::summary_table(&result));
    }

    if result.status == ScanStatus::Failed {
        anyhow::bail!(
            "scan {} failed: {}",
            result.scan_id,
            result.summary.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn run_show(cfg: AppConfig, scan_id: &str, json: bool) -> Result<()> {
    let pool = open_db(&cfg).await?;
    let result = storage::get_scan(&pool, scan_id)
        .await?
        .with_context(|| format!("no scan with id {scan_id}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render::summary_table(&result));
    }
    Ok(())
}

async fn run_list(cfg: AppConfig, limit: i64, offset: i64, json: bool) -> Result<()> {
    let pool = open_db(&cfg).await?;
    let scans = storage::list_scans(&pool, limit, offset).await?;
    if json {
        let rows: Vec<serde_json::Value> = scans
            .iter()
            .map(|s| {
                serde_json::json!({
                    "scan_id": s.scan_id,
                    "status": s.status,
                    "repository_source": s.repository_source,
                    "started_at": s.started_at,
                    "completed_at": s.completed_at,
                    "total_files": s.total_files,
                    "scanned_files": s.scanned_files,
                    "summary": s.summary,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", render::scan_list(&scans));
    }
    Ok(())
}

async fn run_purge(cfg: AppConfig, scan_id: &str) -> Result<()> {
    let index = pipeline::build_index(&cfg)?;
    index
        .delete_by_scan(scan_id)
        .await
        .context("delete indexed chunks")?;
    let pool = open_db(&cfg).await?;
    let removed = storage::delete_scan(&pool, scan_id).await?;
    if removed {
        println!("Purged scan {scan_id}");
    } else {
        println!("Removed indexed chunks for {scan_id}; no stored result found");
    }
    Ok(())
}

async fn run_search(
    cfg: AppConfig,
    query: String,
    scan_id: Option<String>,
    language: Option<String>,
    topk: usize,
) -> Result<()> {
    if cfg.vectors.provider == "memory" {
        warn!("vectors.provider is memory; the index starts empty in every process");
    }
    let registry = pipeline::build_registry(&cfg);
    let embedder = pipeline::build_embedder(&cfg, &registry)?;
    let index = pipeline::build_index(&cfg)?;

    let vector = embedder.embed_one(&query).await.context("embed query")?;
    let mut filters = Vec::new();
    if let Some(id) = scan_id {
        filters.push(("scan_id".to_string(), serde_json::Value::String(id)));
    }
    if let Some(lang) = language {
        filters.push(("language".to_string(), serde_json::Value::String(lang)));
    }
    let hits = index.query(&vector, topk, &filters).await?;

    let results: Vec<serde_json::Value> = hits
        .iter()
        .map(|h| {
            serde_json::json!({
                "score": h.score,
                "file_path": h.chunk.file_path,
                "language": h.chunk.language,
                "start_line": h.chunk.start_line,
                "end_line": h.chunk.end_line,
                "function_name": h.chunk.metadata.function_name,
                "content": h.chunk.content,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
