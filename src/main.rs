use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use scribe_core::SpeechProvider;
use scribe_engine::{Orchestrator, OrchestratorConfig, StatusPublisher, Sweeper, SweeperConfig};
use scribe_provider::{SpeechKitConfig, SpeechKitProvider};
use scribe_store::{Database, JobRepo, TranscriptRepo};
use tokio_util::sync::CancellationToken;

/// Scribe transcription server.
#[derive(Parser, Debug)]
#[command(name = "scribe", about = "Asynchronous speech transcription server")]
struct Cli {
    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Path to the SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Concurrent transcription workers.
    #[arg(long, default_value = "5")]
    workers: usize,
}

impl Cli {
    fn default_db_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".scribe").join("scribe.db")
    }
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting scribe transcription server");

    // Database
    let db_path = args.db_path.unwrap_or_else(Cli::default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create database directory");
    }
    let db = Database::open(&db_path).expect("Failed to open database");
    tracing::info!(path = %db_path.display(), "Database opened");

    let jobs = JobRepo::new(db.clone());
    let transcripts = TranscriptRepo::new(db);

    // Recognition backend; credentials come from the environment so they
    // never land in shell history or process listings.
    let api_key = std::env::var("YANDEX_API_KEY").expect("YANDEX_API_KEY is not set");
    let folder_id = std::env::var("YANDEX_FOLDER_ID").expect("YANDEX_FOLDER_ID is not set");
    let provider: Arc<dyn SpeechProvider> = Arc::new(
        SpeechKitProvider::new(SpeechKitConfig::new(api_key, folder_id))
            .expect("Failed to configure SpeechKit provider"),
    );

    // Status fan-out shared by the workers, the sweeper and the server
    let publisher = Arc::new(StatusPublisher::new(jobs.clone()));

    // Worker pool; picks up jobs left behind by a previous run
    let orchestrator = Orchestrator::new(
        jobs.clone(),
        transcripts.clone(),
        provider,
        Arc::clone(&publisher),
        OrchestratorConfig {
            workers: args.workers,
            ..OrchestratorConfig::default()
        },
    );
    orchestrator.start().expect("Failed to start workers");

    // Retention sweep + stuck-job recovery
    let shutdown = CancellationToken::new();
    let sweeper = Sweeper::new(jobs.clone(), Arc::clone(&publisher), SweeperConfig::default());
    let sweeper_handle = sweeper.spawn(shutdown.clone());

    // HTTP + WebSocket front end
    let config = scribe_server::ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = scribe_server::start(config, jobs, transcripts, orchestrator.clone(), publisher)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, workers = args.workers, "Scribe server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
    orchestrator.stop();
    shutdown.cancel();
    let _ = sweeper_handle.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_default_port() {
        let cli = Cli::parse_from(["scribe"]);
        assert_eq!(cli.port, 8080);
    }

    #[test]
    fn cli_custom_port() {
        let cli = Cli::parse_from(["scribe", "--port", "9000"]);
        assert_eq!(cli.port, 9000);
    }

    #[test]
    fn cli_default_workers() {
        let cli = Cli::parse_from(["scribe"]);
        assert_eq!(cli.workers, 5);
    }

    #[test]
    fn cli_db_path() {
        let cli = Cli::parse_from(["scribe", "--db-path", "/tmp/test.db"]);
        assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/test.db")));
    }

    #[test]
    fn default_db_path_under_scribe_dir() {
        let path = Cli::default_db_path();
        assert!(path.to_string_lossy().contains(".scribe"));
        assert!(path.to_string_lossy().ends_with("scribe.db"));
    }
}
