//! Phloem CLI
//!
//! `phloem serve` runs the stdio JSON-RPC loop; the remaining subcommands are
//! thin wrappers over the same engine for shell use.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use phloem::citations::decay;
use phloem::embedding::create_embedder;
use phloem::graft;
use phloem::mcp::{McpServer, PhloemHandler};
use phloem::search::recall;
use phloem::storage::{citations as citation_rows, queries, Store};
use phloem::types::{Cancellation, ListOptions, MemoryFilters};
use phloem::{EngineConfig, PhloemError};

const EXIT_CODES_HELP: &str = "EXIT CODES:
  0   success
  1   generic failure
  2   invalid usage or input
  65  corrupt database or malformed graft
  66  input file does not exist
  74  I/O failure
  77  permission denied";

#[derive(Parser)]
#[command(name = "phloem")]
#[command(about = "Local long-term memory for AI coding assistants")]
#[command(version)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Storage directory (default: ~/.phloem)
    #[arg(long, env = "PHLOEM_DATA_DIR")]
    data_dir: Option<String>,

    /// Embedding backend (local, openai, voyage)
    #[arg(long, env = "PHLOEM_EMBEDDINGS", default_value = "local")]
    embeddings: String,

    /// Force the local embedder and disable all outbound network
    #[arg(long, env = "PHLOEM_AIR_GAPPED")]
    air_gapped: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the JSON-RPC loop on stdin/stdout (exits 0 on clean EOF)
    Serve,
    /// Show store statistics
    Stats,
    /// Store a memory
    Remember {
        /// Content to remember
        content: String,
        /// Tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
        /// Scope (default: detected repository, or global)
        #[arg(short, long)]
        scope: Option<String>,
    },
    /// Retrieve memories by semantic similarity
    Recall {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Scope (default: detected repository, or global)
        #[arg(short, long)]
        scope: Option<String>,
    },
    /// Re-verify citations and apply confidence decay
    Decay {
        /// Delete citations that fall below the confidence floor
        #[arg(long)]
        prune: bool,
    },
    /// Pack, inspect, or import portable memory bundles
    Graft {
        #[command(subcommand)]
        command: GraftCommands,
    },
}

#[derive(Subcommand)]
enum GraftCommands {
    /// Export memories into a graft file
    Pack {
        /// Output path
        output: PathBuf,
        /// Bundle name
        #[arg(long, default_value = "phloem-graft")]
        name: String,
        /// Bundle description
        #[arg(long, default_value = "")]
        description: String,
        /// Bundle author
        #[arg(long, default_value = "")]
        author: String,
        /// Only memories carrying ALL of these tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
        /// Only memories in this scope
        #[arg(short, long)]
        scope: Option<String>,
        /// Include citations
        #[arg(long)]
        citations: bool,
    },
    /// Print a graft's manifest without importing
    Inspect {
        /// Graft file
        path: PathBuf,
    },
    /// Import a graft through the normal insert path (dedup applies)
    Import {
        /// Graft file
        path: PathBuf,
        /// Scope to import into (default: global)
        #[arg(short, long, default_value = "")]
        scope: String,
    },
}

fn split_tags(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

fn resolve_scope(explicit: Option<String>) -> String {
    explicit.unwrap_or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|dir| phloem::scope::detect_scope(&dir))
            .unwrap_or_default()
    })
}

fn engine_config(cli: &Cli) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = PathBuf::from(shellexpand::tilde(dir).to_string());
    }
    config.embeddings = cli.embeddings.clone();
    config.air_gapped = config.air_gapped || cli.air_gapped;
    config
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = engine_config(&cli);
    let store = Store::open(config.clone()).context("opening memory store")?;
    let embedder = create_embedder(&config).context("constructing embedder")?;

    match cli.command {
        Commands::Serve => {
            let handler = PhloemHandler::new(store, embedder);
            let server = McpServer::new(handler);
            tracing::info!("phloem MCP server starting");
            server.run_stdio()?;
            tracing::info!("stdin closed, shutting down");
        }
        Commands::Stats => {
            let mut stats = store.with_connection(queries::collect_stats)?;
            stats.db_size_bytes = store.db_size()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Remember {
            content,
            tags,
            scope,
        } => {
            let scope = resolve_scope(scope);
            let embedding = embedder.embed(&content)?;
            let model = embedder.model_name().to_string();
            let outcome = store.with_write(|conn| {
                let outcome = queries::insert_memory(
                    conn,
                    &queries::InsertMemory {
                        content: content.clone(),
                        tags: split_tags(tags.clone()),
                        context: None,
                        scope: scope.clone(),
                        embedding: embedding.clone(),
                        model: model.clone(),
                    },
                )?;
                if outcome.created {
                    phloem::causal::link_memory(
                        conn,
                        embedder.as_ref(),
                        &config,
                        &outcome.memory,
                        &Cancellation::none(),
                    )?;
                }
                Ok(outcome)
            })?;
            if outcome.created {
                println!("remembered {}", outcome.memory.id);
            } else {
                println!("already known as {}", outcome.memory.id);
            }
        }
        Commands::Recall {
            query,
            limit,
            scope,
        } => {
            let filters = MemoryFilters {
                tags: vec![],
                scope: Some(resolve_scope(scope)),
            };
            let results = recall(
                &store,
                embedder.as_ref(),
                &query,
                limit,
                &filters,
                &Cancellation::none(),
            )?;
            for hit in &results {
                println!("{:.3}  {}  {}", hit.score, hit.memory.id, hit.memory.content);
            }
            if results.is_empty() {
                eprintln!("no matches");
            }
        }
        Commands::Decay { prune } => {
            let report = decay(&store, prune, &Cancellation::none())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Graft { command } => run_graft(command, &store, embedder.as_ref())?,
    }

    Ok(())
}

fn run_graft(
    command: GraftCommands,
    store: &Store,
    embedder: &dyn phloem::embedding::Embedder,
) -> anyhow::Result<()> {
    match command {
        GraftCommands::Pack {
            output,
            name,
            description,
            author,
            tags,
            scope,
            citations,
        } => {
            let tag_list = split_tags(tags);
            let memories = store.with_connection(|conn| {
                queries::list_memories(
                    conn,
                    &ListOptions {
                        tags: tag_list.clone(),
                        scope,
                        limit: Some(i64::MAX),
                        ..Default::default()
                    },
                )
            })?;

            let graft_citations = if citations {
                let mut collected = Vec::new();
                for memory in &memories {
                    let rows = store.with_connection(|conn| {
                        citation_rows::citations_for_memory(conn, &memory.id)
                    })?;
                    collected.extend(rows.iter().map(graft::GraftCitation::from));
                }
                Some(collected)
            } else {
                None
            };

            let manifest = graft::GraftManifest {
                id: phloem::types::new_id(),
                name,
                description,
                author,
                version: phloem::VERSION.to_string(),
                created_at: chrono::Utc::now(),
                memory_count: memories.len(),
                tags: tag_list,
            };
            let exported: Vec<graft::GraftMemory> =
                memories.iter().map(graft::GraftMemory::from).collect();

            let payload = graft::package(manifest, exported, graft_citations, &output)?;
            println!(
                "packed {} memories into {}",
                payload.memories.len(),
                output.display()
            );
        }
        GraftCommands::Inspect { path } => {
            let manifest = graft::inspect(&path)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        GraftCommands::Import { path, scope } => {
            let payload = graft::unpack(&path)?;
            let report = graft::import(store, embedder, &payload, &scope)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

/// Map an error to the documented exit codes
fn exit_code(error: &anyhow::Error) -> i32 {
    let Some(phloem_error) = error.downcast_ref::<PhloemError>() else {
        return 1;
    };
    match phloem_error {
        PhloemError::Validation(_) => 2,
        PhloemError::StorageCorrupt(_) | PhloemError::Graft(_) => 65,
        PhloemError::Io(e) | PhloemError::IoPath { source: e, .. } => match e.kind() {
            std::io::ErrorKind::NotFound => 66,
            std::io::ErrorKind::PermissionDenied => 77,
            _ => 74,
        },
        PhloemError::Config(_) | PhloemError::NotImplemented(_) => 2,
        _ => 1,
    }
}

fn main() {
    // stdout carries JSON-RPC frames; all diagnostics go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        tracing::error!("{:#}", error);
        eprintln!("error: {:#}", error);
        std::process::exit(exit_code(&error));
    }
}
