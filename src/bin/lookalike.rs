//! `lookalike` command-line front end.
//!
//! ```bash
//! lookalike --config lookalike.yaml index car-1 ./photos/car-1.jpg
//! lookalike --config lookalike.yaml search ./photos/query.jpg -k 3
//! RUST_LOG=debug lookalike stats
//! ```

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lookalike::VisionConfig;

/// On-device visual similarity search
#[derive(Parser)]
#[command(name = "lookalike")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed an image and store it under an entity id
    Index {
        entity_id: String,
        image: String,
    },

    /// Rank stored entities against an image
    Search {
        image: String,

        /// Number of matches (defaults to search.default_k)
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Delete the stored embedding of an entity
    Remove { entity_id: String },

    /// Print stored row count and bytes
    Stats,

    /// Load the model and open the store, then report their state
    Init,
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json_logs {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = match &cli.config {
        Some(path) => VisionConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => VisionConfig::default(),
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        model_path = %config.model.model_path.display(),
        "lookalike_starting"
    );
    let search = config.builder().build();

    match cli.command {
        Commands::Index { entity_id, image } => {
            let indexed = search.index_item(&entity_id, &image).await;
            print_json(&json!({ "entity_id": entity_id, "indexed": indexed }))?;
            if !indexed {
                bail!("failed to index {entity_id}");
            }
        }
        Commands::Search { image, k } => {
            let k = k.unwrap_or(search.default_k());
            let matches = search.find_similar_to_image(&image, k).await;
            print_json(&json!({ "query": image, "matches": matches }))?;
        }
        Commands::Remove { entity_id } => {
            let removed = search.remove_embedding(&entity_id).await;
            print_json(&json!({ "entity_id": entity_id, "removed": removed }))?;
            if !removed {
                bail!("failed to remove {entity_id}");
            }
        }
        Commands::Stats => match search.stats().await {
            Some(stats) => print_json(&serde_json::to_value(stats)?)?,
            None => bail!("store unavailable"),
        },
        Commands::Init => {
            let report = search.init().await;
            print_json(&serde_json::to_value(report)?)?;
            if !report.is_ready() {
                bail!("initialization incomplete");
            }
        }
    }

    Ok(())
}
