use anyhow::Context;
use ingestion::blob::FsBlobStore;
use ingestion::chunker::{Chunker, ChunkerSettings};
use ingestion::pipeline::IngestionPipeline;
use jobs::queue::JobScheduler;
use providers::factory::{build_completer, build_embedder};
use quarry_core::config::AppConfig;
use quarry_core::model::Document;
use query::engine::QueryPipeline;
use quarry_server::{router, AppState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use storage::keyvault::KeyVault;
use storage::repo::MemoryDocumentRepository;
use storage::store::EmbeddedStore;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    quarry_core::init_tracing();

    let config = AppConfig::load().context("failed to load configuration")?;
    // The service refuses to start without a usable master key.
    let master_key = config
        .security
        .master_key_bytes()
        .context("invalid master key")?;

    let data_dir = Path::new(&config.storage.data_dir);
    let store = Arc::new(
        EmbeddedStore::open(data_dir.join("chunks"), config.embedding.dimension)
            .await
            .context("failed to open chunk store")?,
    );
    let keyvault = Arc::new(KeyVault::new(master_key, store.clone()));

    let documents = Arc::new(MemoryDocumentRepository::new());
    let blob_root = data_dir.join("blobs");
    register_documents_from_blobs(&blob_root, &documents).await;
    let blobs = Arc::new(FsBlobStore::new(blob_root));

    let embedder = build_embedder(&config.embedding).context("embedding provider setup failed")?;
    let completer = build_completer(&config.completion).context("completion provider setup failed")?;

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        documents.clone(),
        blobs,
        store.clone(),
        keyvault.clone(),
        embedder.clone(),
        Chunker::new(ChunkerSettings::from_config(&config.chunking)),
    ));

    let workers = config
        .jobs
        .workers
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4));
    let scheduler = JobScheduler::start(
        ingestion_pipeline,
        workers,
        config.jobs.queue_depth,
        Duration::from_secs(config.jobs.soft_deadline_secs),
    );

    let query_pipeline = QueryPipeline::new(
        documents,
        store,
        keyvault,
        embedder.clone(),
        completer.clone(),
    );

    let state = AppState {
        scheduler,
        query: query_pipeline,
        embedding_info: embedder.capabilities().describe(),
        completion_info: completer.describe(),
        database_info: format!("embedded ({})", config.storage.data_dir),
    };

    let app = router(state, &config.server.cors_origins);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr, version = quarry_server::VERSION, "quarry server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Single-node stand-in for the platform's documents table: every file
/// under `{blobs}/{org}/` becomes a pending document named by its stem.
async fn register_documents_from_blobs(root: &Path, documents: &MemoryDocumentRepository) {
    let Ok(mut orgs) = tokio::fs::read_dir(root).await else {
        return;
    };

    let mut registered = 0usize;
    while let Ok(Some(org_entry)) = orgs.next_entry().await {
        let org_id = org_entry.file_name().to_string_lossy().into_owned();
        let Ok(mut files) = tokio::fs::read_dir(org_entry.path()).await else {
            continue;
        };
        while let Ok(Some(file)) = files.next_entry().await {
            let path = file.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let mut document = Document::new(stem, org_id.clone(), path.to_string_lossy().into_owned());
            document.title = path.file_name().map(|n| n.to_string_lossy().into_owned());
            documents.insert(document);
            registered += 1;
        }
    }

    if registered > 0 {
        info!(registered, "registered documents from blob store");
    }
}
