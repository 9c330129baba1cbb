//! Composition root: picks the backend and store, registers processors and
//! owns every worker pool and maintenance loop.

use {
    crate::{
        config::{BackendKind, Config},
        domain::{
            job::{JobKind, JobOptions, QueueName},
            provider::ShopifyApi,
            retry::RetryPolicy,
        },
        jobs::{ProcessorDeps, ProcessorRegistry, RegistryError, default_registry, email::Mailer},
        queue::{
            DEFAULT_STALL_INTERVAL, QueueBackend, QueueError, broker::BrokerQueue,
            polling::PollingQueue, redis_broker::RedisQueue,
        },
        services::{
            supervisor::QueueSupervisor,
            worker::{DEFAULT_SHUTDOWN_TIMEOUT, PoolConfig, WorkerPool, run_stall_monitor},
        },
        store::{CommerceStore, memory::MemoryStore, postgres::PgStore},
    },
    sqlx::{PgPool, postgres::PgPoolOptions},
    std::{sync::Arc, time::Duration},
    thiserror::Error,
    tokio::{sync::watch, task::JoinHandle},
};

/// Polling backend sweeps less often than the broker's stall interval.
pub const POLLING_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    #[error("DATABASE_URL is required for the postgres backend")]
    MissingDatabase,

    #[error("REDIS_URL is required for the broker backend")]
    MissingRedis,
}

/// Open the backend and store selected by `config`. The store follows
/// `DATABASE_URL` alone: any configured database holds the mirror, whichever
/// queue carries the jobs. Only the memory backend without a database keeps
/// everything in process.
pub async fn connect(
    config: &Config,
) -> Result<(Arc<dyn QueueBackend>, Arc<dyn CommerceStore>), AppError> {
    let pool = match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(3))
                .connect(url)
                .await?;
            migrate(&pool).await?;
            Some(pool)
        }
        None => None,
    };

    let store: Arc<dyn CommerceStore> = match &pool {
        Some(pool) => Arc::new(PgStore::new(pool.clone())),
        None => {
            tracing::warn!("DATABASE_URL not set, mirrored entities live in process memory");
            Arc::new(MemoryStore::new())
        }
    };

    let backend: Arc<dyn QueueBackend> = match config.backend {
        BackendKind::Postgres => {
            let pool = pool.ok_or(AppError::MissingDatabase)?;
            Arc::new(PollingQueue::new(pool))
        }
        BackendKind::Broker => {
            let url = config.redis_url.as_deref().ok_or(AppError::MissingRedis)?;
            Arc::new(RedisQueue::connect(url).await?)
        }
        BackendKind::Memory => Arc::new(BrokerQueue::new()),
    };
    tracing::info!(backend = backend.name(), "queue backend ready");
    Ok((backend, store))
}

pub async fn migrate(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Runtime knobs for the pools and maintenance loops.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
    pub stall_sweep_every: Duration,
    pub stall_interval: Duration,
    pub retention: Duration,
    pub cleanup_every: Duration,
    pub retry: RetryPolicy,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            stall_sweep_every: DEFAULT_STALL_INTERVAL,
            stall_interval: DEFAULT_STALL_INTERVAL,
            retention: crate::services::supervisor::DEFAULT_RETENTION,
            cleanup_every: CLEANUP_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

impl AppSettings {
    pub fn from_config(config: &Config) -> Self {
        let stall_sweep_every = match config.backend {
            BackendKind::Broker | BackendKind::Memory => DEFAULT_STALL_INTERVAL,
            BackendKind::Postgres => POLLING_SWEEP_INTERVAL,
        };
        Self {
            poll_interval: config.poll_interval,
            shutdown_timeout: config.shutdown_timeout,
            stall_sweep_every,
            retention: config.job_retention,
            ..Self::default()
        }
    }
}

/// Running application. Dropping it leaves the tasks running; call
/// [`App::shutdown`].
pub struct App {
    backend: Arc<dyn QueueBackend>,
    store: Arc<dyn CommerceStore>,
    supervisor: QueueSupervisor,
    pools: Vec<WorkerPool>,
    maintenance: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl App {
    /// Register the built-in processors and spawn one pool per queue.
    pub fn start(
        backend: Arc<dyn QueueBackend>,
        store: Arc<dyn CommerceStore>,
        shopify: Arc<dyn ShopifyApi>,
        mailer: Arc<dyn Mailer>,
        settings: AppSettings,
    ) -> Result<Self, AppError> {
        let registry = default_registry(ProcessorDeps {
            backend: backend.clone(),
            store: store.clone(),
            shopify,
            mailer,
        })?;
        Ok(Self::with_registry(backend, store, registry, settings))
    }

    pub fn with_registry(
        backend: Arc<dyn QueueBackend>,
        store: Arc<dyn CommerceStore>,
        registry: ProcessorRegistry,
        settings: AppSettings,
    ) -> Self {
        let registry = Arc::new(registry);
        let pools = registry
            .queues()
            .into_iter()
            .map(|queue| {
                let config = PoolConfig::for_queue(queue)
                    .with_poll_interval(settings.poll_interval)
                    .with_shutdown_timeout(settings.shutdown_timeout)
                    .with_retry(settings.retry);
                WorkerPool::spawn(config, backend.clone(), registry.clone())
            })
            .collect();

        let (maintenance, rx) = watch::channel(false);
        let loops = vec![
            tokio::spawn(run_stall_monitor(
                backend.clone(),
                settings.stall_sweep_every,
                settings.stall_interval,
                rx.clone(),
            )),
            tokio::spawn(run_cleanup_scheduler(
                backend.clone(),
                settings.cleanup_every,
                settings.retention,
                rx,
            )),
        ];

        tracing::info!(backend = backend.name(), pools = registry.queues().len(), "app started");
        Self {
            supervisor: QueueSupervisor::new(backend.clone()),
            backend,
            store,
            pools,
            maintenance,
            loops,
        }
    }

    pub fn backend(&self) -> Arc<dyn QueueBackend> {
        self.backend.clone()
    }

    pub fn store(&self) -> Arc<dyn CommerceStore> {
        self.store.clone()
    }

    pub fn supervisor(&self) -> QueueSupervisor {
        self.supervisor.clone()
    }

    /// Stop the maintenance loops, then close every pool concurrently.
    pub async fn shutdown(self) {
        tracing::info!("app shutting down");
        let _ = self.maintenance.send(true);
        for handle in self.loops {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "maintenance loop failed");
            }
        }
        futures_util::future::join_all(self.pools.into_iter().map(WorkerPool::close)).await;
        tracing::info!("app stopped");
    }
}

/// Enqueue a `cleanup-jobs` run every `every`. The job goes through the
/// background pool like any other, so it is retried and visible in stats.
async fn run_cleanup_scheduler(
    backend: Arc<dyn QueueBackend>,
    every: Duration,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(every) => {}
        }
        let payload = serde_json::json!({ "olderThanMs": retention.as_millis() as u64 });
        match backend
            .enqueue(QueueName::Background, JobKind::CleanupJobs, payload, JobOptions::new())
            .await
        {
            Ok(job) => tracing::debug!(job_id = %job.id, "cleanup scheduled"),
            Err(e) => tracing::error!(error = %e, "failed to schedule cleanup"),
        }
    }
}
