//! notegraph: run one query against a note graph and print JSON.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use notegraph_core::NotegraphConfig;
use notegraph_query::{QueryEngine, QueryRequest};
use notegraph_store::SqliteGraphStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var("NOTEGRAPH_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn print_help() {
    println!("notegraph: query a knowledge-base graph");
    println!();
    println!("Usage: notegraph [--db <data-dir>] <command>");
    println!();
    println!("Commands:");
    println!("  query '<json>'    Run one query request; '-' reads it from stdin");
    println!("  stats             Show store statistics");
    println!("  help              Show this help message");
    println!();
    println!("Example:");
    println!(r#"  notegraph query '{{"mode":"traverse","note":"notes/a.md","hops":2}}'"#);
}

fn open_store(data_dir: PathBuf) -> anyhow::Result<(NotegraphConfig, Arc<SqliteGraphStore>)> {
    let config = NotegraphConfig::from_env(&data_dir)
        .with_context(|| format!("Failed to prepare data directory {}", data_dir.display()))?;
    info!("Data directory: {}", config.data_paths.root.display());
    let store = SqliteGraphStore::open(&config.data_paths.graph, config.embedding_dim)
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;
    Ok((config, Arc::new(store)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays valid JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut data_dir = None;
    if let Some(pos) = args.iter().position(|a| a == "--db") {
        if pos + 1 >= args.len() {
            eprintln!("--db needs a directory");
            std::process::exit(1);
        }
        data_dir = Some(PathBuf::from(args.remove(pos + 1)));
        args.remove(pos);
    }

    match args.first().map(String::as_str) {
        Some("query") => {
            let raw = match args.get(1).map(String::as_str) {
                Some("-") | None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read request from stdin")?;
                    buf
                }
                Some(json) => json.to_string(),
            };
            let request: QueryRequest =
                serde_json::from_str(&raw).context("Invalid query request")?;

            let (config, store) = open_store(resolve_data_dir(data_dir))?;
            let engine = QueryEngine::from_store(store, config.query)
                .map_err(|e| anyhow::anyhow!("Invalid query configuration: {}", e))?;
            let response = engine
                .execute(request)
                .await
                .map_err(|e| anyhow::anyhow!("Query failed: {}", e))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Some("stats") => {
            let (_, store) = open_store(resolve_data_dir(data_dir))?;
            let stats = store
                .get_stats()
                .map_err(|e| anyhow::anyhow!("Failed to read stats: {}", e))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Some("--help" | "-h" | "help") | None => print_help(),
        Some(other) => {
            eprintln!("Unknown command: {}. Use 'notegraph help' for usage.", other);
            std::process::exit(1);
        }
    }
    Ok(())
}
