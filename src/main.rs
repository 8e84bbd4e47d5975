use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use akas::commands::{ask_question, ingest_inputs, init_config, serve, show_status};
use akas::config::{Config, show_config};
use akas::index::SearchType;
use akas::{AkasError, Result};

#[derive(Parser)]
#[command(name = "akas")]
#[command(about = "Ingest documents and answer questions about them with retrieval-augmented generation")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the saved index (default: $AKAS_HOME or ~/.akas)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and browser UI
    Serve,
    /// Add files, directories or web pages to the index
    Ingest {
        /// Files or directories (http(s) URLs are accepted here too)
        #[arg(required_unless_present = "url")]
        paths: Vec<String>,
        /// Web page to fetch; repeat for several
        #[arg(long)]
        url: Vec<String>,
    },
    /// Ask a question about the ingested documents
    Ask {
        question: String,
        /// Number of passages to retrieve (1-20)
        #[arg(short, long)]
        k: Option<usize>,
        /// Retrieval strategy: similarity or mmr
        #[arg(long, default_value = "similarity")]
        search_type: SearchType,
    },
    /// Show the saved index and provider health
    Status,
    /// Write config.toml with defaults if missing, then print it
    Config {
        /// Only print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::default_dir().map_err(|e| AkasError::Configuration(e.to_string()))?,
    };
    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Serve => serve(&config).await?,
        Commands::Ingest { mut paths, url } => {
            paths.extend(url);
            ingest_inputs(&config, &paths).await?;
        }
        Commands::Ask {
            question,
            k,
            search_type,
        } => ask_question(&config, &question, k, search_type).await?,
        Commands::Status => show_status(&config).await?,
        Commands::Config { show } => {
            if !show {
                init_config(&config)?;
                println!();
            }
            show_config(&config);
        }
    }

    Ok(())
}
