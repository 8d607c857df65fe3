//! # Tenant RAG CLI (`trag`)
//!
//! ## Usage
//!
//! ```bash
//! trag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trag serve` | Start the HTTP server |
//! | `trag ingest <file> --company <code>` | Parse, split, tag, embed and store one document |
//! | `trag ask "<prompt>"` | Answer a prompt, optionally scoped to a tenant and session |
//!
//! ## Examples
//!
//! ```bash
//! # Load a handbook for ACME into the persistent store
//! trag ingest ./handbook.pdf --company ACME
//!
//! # Ask a question against ACME's documents
//! trag ask "How many vacation days do I get?" --company ACME
//!
//! # Serve GET / and POST /upload
//! trag serve --config ./config/rag.toml
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `tenant_rag=info,tower_http=info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tenant_rag::app::App;
use tenant_rag::config::load_config;
use tenant_rag::ingest::Document;
use tenant_rag::query::QueryRequest;
use tenant_rag::server;

/// Tenant RAG: upload documents per company and ask questions answered
/// from that company's documents only.
#[derive(Parser)]
#[command(
    name = "trag",
    about = "Tenant RAG: multi-tenant document upload and retrieval-augmented answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rag.toml`. See `config/rag.example.toml`.
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Ingest one document for a tenant.
    ///
    /// With the `memory` store backend the chunks are gone when the
    /// command exits; use `backend = "sqlite"` to keep them.
    Ingest {
        /// Path of the document to upload.
        file: PathBuf,

        /// Tenant identifier (`companyCode`) to tag the chunks with.
        #[arg(long)]
        company: String,
    },

    /// Answer a prompt and print the structured response as JSON.
    Ask {
        prompt: String,

        /// Restrict retrieval to this tenant.
        #[arg(long)]
        company: Option<String>,

        /// Conversation session to continue.
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tenant_rag=info,tower_http=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { file, company } => {
            if cfg.store.backend == "memory" {
                tracing::warn!("store backend is `memory`; ingested chunks will not persist");
            }
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut document = Document::new(bytes);
            if let Some(name) = file.file_name() {
                document = document.with_filename(name.to_string_lossy());
            }

            let app = App::from_config(&cfg).await?;
            let report = app.ingest.ingest(document, Some(company.as_str())).await?;
            println!("{}", report.confirmation());
        }
        Commands::Ask {
            prompt,
            company,
            session,
        } => {
            let app = App::from_config(&cfg).await?;
            let outcome = app
                .query
                .query(QueryRequest {
                    prompt: &prompt,
                    company_code: company.as_deref(),
                    session_id: session.as_deref(),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome.answer)?);
            eprintln!(
                "retrieved {} chunk(s); tokens: prompt={} generation={} total={}",
                outcome.retrieved.len(),
                outcome.usage.prompt,
                outcome.usage.generation,
                outcome.usage.total
            );
        }
    }

    Ok(())
}
