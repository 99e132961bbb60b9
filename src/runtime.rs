//! Runtime wiring
//!
//! Opens the stores, builds every component with explicit constructor
//! wiring, spawns the worker pools, and runs until a shutdown signal. The
//! `Core` bundle is also what integration tests stand up directly.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::ai::AiClient;
use crate::config::Config;
use crate::observability::Metrics;
use crate::processors;
use crate::queue::{JobEngine, ProcessorRegistry, QueueStore, spawn_workers};
use crate::render::{BrowserRasterizer, DocumentRenderer};
use crate::services::{
    AtsService, CvService, GenerationService, JobService, OptimizeService, ParsingService,
    WebhookService,
};
use crate::storage::BlobStore;
use crate::store::CoreStore;
use crate::versions::VersionService;
use crate::webhooks::WebhookDispatcher;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every wired component, ready to serve.
pub struct Core {
    pub config: Config,
    pub store: CoreStore,
    pub blobs: BlobStore,
    pub engine: Arc<JobEngine>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub metrics: Arc<Metrics>,
    registry: Arc<ProcessorRegistry>,

    pub cvs: CvService,
    pub parsing: ParsingService,
    pub optimize: OptimizeService,
    pub ats: AtsService,
    pub generation: GenerationService,
    pub jobs: JobService,
    pub webhooks: WebhookService,
}

impl Core {
    /// Wire everything from configuration. No worker runs yet; call
    /// [`start_workers`](Self::start_workers).
    pub fn build(config: Config) -> Result<Self, AnyError> {
        let ai = AiClient::from_config(&config.ai)?;
        Self::build_with_ai(config, ai)
    }

    /// Wire with an injected AI client (tests, custom providers).
    pub fn build_with_ai(config: Config, ai: AiClient) -> Result<Self, AnyError> {
        let store = CoreStore::open(config.runtime.data_dir.join("docs"))?;
        let queue = Arc::new(QueueStore::open(config.runtime.data_dir.join("queue"))?);
        let blobs = BlobStore::from_config(&config.storage)?;
        let metrics = Arc::new(Metrics::new());

        let engine = Arc::new(JobEngine::new(
            store.clone(),
            queue,
            config.queues.clone(),
            metrics.clone(),
        ));
        let versions = VersionService::new(store.clone());
        let dispatcher = Arc::new(WebhookDispatcher::new(store.clone(), engine.clone()));
        let renderer = DocumentRenderer::new(BrowserRasterizer::from_config(&config.render));

        let registry = Arc::new(processors::build_registry(
            store.clone(),
            blobs.clone(),
            ai.clone(),
            versions.clone(),
            renderer,
            dispatcher.clone(),
        ));

        let cvs = CvService::new(
            store.clone(),
            blobs.clone(),
            versions.clone(),
            config.storage.max_upload,
        );
        let parsing = ParsingService::new(store.clone(), engine.clone());
        let optimize = OptimizeService::new(store.clone(), engine.clone());
        let ats = AtsService::new(store.clone(), engine.clone());
        let generation = GenerationService::new(store.clone(), blobs.clone(), engine.clone());
        let jobs = JobService::new(engine.clone());
        let webhooks = WebhookService::new(store.clone(), dispatcher.clone());

        info!(
            ai_provider = ai.provider_name(),
            storage = blobs.provider(),
            "Core wired"
        );

        Ok(Self {
            config,
            store,
            blobs,
            engine,
            dispatcher,
            metrics,
            registry,
            cvs,
            parsing,
            optimize,
            ats,
            generation,
            jobs,
            webhooks,
        })
    }

    /// Spawn the per-queue worker pools and the lease sweeper.
    pub fn start_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        spawn_workers(
            self.engine.clone(),
            self.registry.clone(),
            self.dispatcher.clone(),
            shutdown,
        )
    }
}

/// Boot the full runtime and serve until SIGINT/SIGTERM.
pub async fn run(config: Config) -> Result<(), AnyError> {
    let core = Core::build(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = core.start_workers(shutdown_rx);
    info!(workers = handles.len(), "Worker pools running");

    // Periodic retention sweep
    let prune_store = core.store.clone();
    let retention = core.config.retention.clone();
    let mut prune_shutdown = shutdown_tx.subscribe();
    let prune_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        interval.tick().await; // first tick is immediate; skip it
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = prune_store.prune_expired(&retention) {
                        error!(error = %err, "Retention sweep failed");
                    }
                }
                _ = prune_shutdown.changed() => break,
            }
        }
    });

    shutdown_signal().await;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }
    prune_handle.abort();
    core.store.persist()?;
    core.engine.queue_store().flush()?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
