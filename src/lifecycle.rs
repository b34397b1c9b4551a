//! Lifecycle Manager: orchestrates strict startup order (artefacts →
//! index → kernel → dispatcher → consumer → registry), graceful shutdown
//! in reverse, discovery registry registration, and signal handling.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::artefacts::ArtefactRegistry;
use crate::config::Settings;
use crate::consumer::{BatchConsumer, ConsumerState};
use crate::dispatcher::CallbackDispatcher;
use crate::error::{WorkerError, WorkerResult};
use crate::index::{RedisIndexClient, VectorIndexClient};
use crate::kernel::ScoringKernel;
use crate::registry_client::RegistryClient;

const CONSUMER_DRAIN_DEADLINE: Duration = Duration::from_secs(30);
const DISPATCHER_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Drives the worker process from cold start through graceful shutdown.
pub struct LifecycleManager {
    settings: Settings,
}

impl LifecycleManager {
    /// Build a manager from already-loaded configuration.
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Run the strict startup order, then block until a shutdown signal
    /// arrives, then run the strict reverse shutdown order.
    pub async fn run(self) -> WorkerResult<()> {
        // 1. Config already loaded by the caller.
        // 2. Load artefacts; abort on fatal error unless degraded.
        let artefacts = self.load_artefacts()?;

        // 3. Open Vector Index Client; ping.
        let index = self.open_index().await?;

        let kernel = Arc::new(ScoringKernel::new(artefacts, index.clone()));

        // Mount the synchronous scoring surface behind the `service`
        // feature; it shares the kernel with the streaming pipeline
        // rather than looping back through HTTP.
        #[cfg(feature = "service")]
        self.spawn_service_surface(kernel.clone());

        // 5. Start Callback Dispatcher workers.
        let (dispatcher, dispatcher_handles) = CallbackDispatcher::spawn(
            self.settings.callback.url.clone(),
            Duration::from_secs(self.settings.callback.timeout_s),
            num_cpus::get().max(1).min(16),
            self.settings.broker.prefetch as usize * 10,
        )
        .map_err(crate::error::WorkerError::Dispatch)?;

        // 4. Broker connection is opened inside BatchConsumer::run, which
        // performs the idempotent topology declare on every (re)connect.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer = BatchConsumer::new(
            self.settings.broker.clone(),
            self.settings.batch,
            kernel.clone(),
            dispatcher.clone(),
            shutdown_rx,
        );
        let consumer_state = consumer.state();

        // 6. Start Batch Consumer subscription.
        let consumer_handle = tokio::spawn(consumer.run());

        // 7. Register instance with discovery registry.
        let registry = RegistryClient::new(
            self.settings.registry.clone(),
            self.settings.server.clone(),
            local_ip(),
        )
        .map_err(WorkerError::Registry)?;
        registry.register().await.map_err(WorkerError::Registry)?;

        info!("riskflow-worker startup complete");

        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining");

        self.shutdown(
            registry,
            shutdown_tx,
            consumer_state,
            consumer_handle,
            dispatcher,
            dispatcher_handles,
        )
        .await
    }

    fn load_artefacts(&self) -> WorkerResult<ArtefactRegistry> {
        let encoder_path = PathBuf::from(&self.settings.artefacts.encoder_path);
        let standardiser_path = PathBuf::from(&self.settings.artefacts.standardiser_path);
        let thresholds_path = self.settings.artefacts.thresholds_path.as_ref().map(PathBuf::from);

        match ArtefactRegistry::load(&encoder_path, &standardiser_path, thresholds_path.as_deref()) {
            Ok(registry) => Ok(registry),
            Err(err) if self.settings.degraded_mode => {
                warn!(error = %err, "artefact load failed, continuing in degraded mode with identity fixture");
                Ok(ArtefactRegistry::degraded_fallback())
            }
            Err(err) => Err(WorkerError::Artefact(err)),
        }
    }

    /// Bind the synchronous scoring surface (`GET /health`, `POST
    /// /score`) on `server.port` and serve it on a detached task. Spawn
    /// failures (port already bound) are logged, not fatal — this surface
    /// is an adjacent convenience, not part of the streaming pipeline's
    /// startup contract.
    #[cfg(feature = "service")]
    fn spawn_service_surface(&self, kernel: Arc<ScoringKernel>) {
        let port = self.settings.server.port;
        tokio::spawn(async move {
            let state = crate::service::ServiceState::new(kernel);
            let router = crate::service::router(state);
            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!(%addr, "synchronous scoring surface listening");
                    if let Err(err) = axum::serve(listener, router).await {
                        warn!(error = %err, "synchronous scoring surface exited");
                    }
                }
                Err(err) => warn!(error = %err, %addr, "failed to bind synchronous scoring surface"),
            }
        });
    }

    async fn open_index(&self) -> WorkerResult<Arc<dyn VectorIndexClient>> {
        let index = RedisIndexClient::connect(
            &self.settings.index.host,
            self.settings.index.port,
            self.settings.index.db,
            Some(&self.settings.index.password),
            self.settings.index.index_name.clone(),
            self.settings.index.pool_size,
        )
        .await
        .map_err(WorkerError::Index)?;
        Ok(Arc::new(index))
    }

    #[allow(clippy::too_many_arguments)]
    async fn shutdown(
        &self,
        registry: RegistryClient,
        shutdown_tx: watch::Sender<bool>,
        consumer_state: Arc<crate::consumer::ConsumerStateTracker>,
        consumer_handle: tokio::task::JoinHandle<Result<(), crate::consumer::ConsumerError>>,
        dispatcher: Arc<CallbackDispatcher>,
        dispatcher_handles: Vec<tokio::task::JoinHandle<()>>,
    ) -> WorkerResult<()> {
        // 1. Deregister from discovery registry.
        if let Err(err) = registry.deregister().await {
            warn!(error = %err, "failed to deregister from discovery registry");
        }

        // 2. Signal Batch Consumer Draining; wait for Stopped or deadline.
        let _ = shutdown_tx.send(true);
        let drained = tokio::time::timeout(CONSUMER_DRAIN_DEADLINE, consumer_handle).await;
        match drained {
            Ok(Ok(Ok(()))) => info!("batch consumer stopped cleanly"),
            Ok(Ok(Err(err))) => warn!(error = %err, "batch consumer exited with error"),
            Ok(Err(err)) => warn!(error = %err, "batch consumer task panicked"),
            Err(_) => {
                warn!("batch consumer drain deadline exceeded, state={:?}", consumer_state.state());
                return Err(WorkerError::ShutdownTimeout { stage: "consumer drain" });
            }
        }
        debug_assert_eq!(consumer_state.state(), ConsumerState::Stopped);

        // 3. Drain Callback Dispatcher.
        drop(dispatcher);
        for handle in dispatcher_handles {
            if tokio::time::timeout(DISPATCHER_DRAIN_DEADLINE, handle).await.is_err() {
                warn!("dispatcher worker did not drain within deadline");
            }
        }

        // 4. Close broker/vector-index/HTTP clients — dropped here as
        // their owning handles go out of scope.
        info!("shutdown complete");
        Ok(())
    }
}

fn local_ip() -> String {
    std::env::var("RISKFLOW_INSTANCE_IP").unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Wait for SIGINT/SIGTERM (Unix) or Ctrl-C (all platforms). A second
/// signal forces immediate exit.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            warn!("second shutdown signal received, forcing immediate exit");
            std::process::exit(130);
        });
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
