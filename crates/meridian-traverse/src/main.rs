//! CLI entry point for querying a Meridian store held in Neo4j.
//!
//! Reads a JSON request from stdin, writes a JSON result to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use meridian_core::events::TracingAuditSink;
use meridian_core::SimpleTypeRegistry;
use meridian_graph::{GraphClient, GraphConfig};
use meridian_store::{EntitySearch, MetadataStore};
use meridian_traverse::{PathsRequest, SubgraphRequest, TraversalEngine};

#[derive(Parser)]
#[command(name = "meridian-query")]
#[command(about = "Subgraph, path and search queries against a Meridian metadata store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Type definitions (JSON array of type defs).
    #[arg(long, global = true, default_value = "types.json")]
    types: PathBuf,

    /// Config file prefix (default: meridian).
    #[arg(short, long, default_value = "meridian", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Command {
    /// Extract the neighborhood of an entity (reads JSON from stdin).
    Subgraph,
    /// Find the entities and relationships linking two entities (reads JSON from stdin).
    Paths,
    /// Search entity details (reads JSON from stdin).
    Search,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    let settings = meridian_core::config::load(&cli.config)?;
    let registry = Arc::new(SimpleTypeRegistry::load_file(&cli.types)?);
    let graph = Arc::new(GraphClient::connect(&load_graph_config(&cli.config))?);
    let store = MetadataStore::open(graph, registry, &settings, &TracingAuditSink)
        .map_err(|e| anyhow::anyhow!("{} ({})", e.message(), e.code().id()))?;
    let engine = TraversalEngine::new(Arc::new(store));

    let input = std::io::read_to_string(std::io::stdin())?;
    match cli.command {
        Command::Subgraph => {
            let request: SubgraphRequest = serde_json::from_str(&input)?;
            let result = engine.get_sub_graph(&request)?;
            println!("{}", serde_json::to_string(&result)?);
        }
        Command::Paths => {
            let request: PathsRequest = serde_json::from_str(&input)?;
            let result = engine.get_paths(&request)?;
            println!("{}", serde_json::to_string(&result)?);
        }
        Command::Search => {
            let request: EntitySearch = serde_json::from_str(&input)?;
            let result = engine.store().find_entities(&request)?;
            println!("{}", serde_json::to_string(&result)?);
        }
    }

    Ok(())
}

fn load_graph_config(file_prefix: &str) -> GraphConfig {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("MERIDIAN")
                .separator("__")
                .try_parsing(true),
        )
        .build();

    match cfg.and_then(|c| c.get::<GraphConfig>("neo4j")) {
        Ok(graph) => graph,
        Err(e) => {
            tracing::debug!(error = %e, "No [neo4j] section; using defaults");
            GraphConfig::default()
        }
    }
}
