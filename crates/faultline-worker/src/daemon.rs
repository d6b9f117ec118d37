use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use faultline_core::config::Config;
use faultline_core::store::EventStore;
use faultline_harness::shutdown::ShutdownSignal;
use faultline_harness::throttle::ThrottleGate;
use faultline_ingest::dedup::EventDedup;
use faultline_ingest::state::AppState;
use tracing::{error, info};

use crate::alerts::{AlertEvaluator, RecentIssues};
use crate::batch::{self, BatchWorkerConfig};

const EVENT_DEDUP_TTL: Duration = Duration::from_secs(90);

/// The batch-tier daemon: owns the store, the ingest HTTP surface, the batch
/// worker pool, and the alert evaluator, and coordinates their shutdown.
pub struct Daemon {
    config: Config,
    store: Arc<EventStore>,
    shutdown: ShutdownSignal,
    app_state: AppState,
    recent_issues: Arc<RecentIssues>,
    receiver: flume::Receiver<faultline_types::IngestTaskMessage>,
}

impl Daemon {
    pub async fn new(config: Config) -> Result<Self> {
        let store = Arc::new(
            EventStore::new(&config.storage.path)
                .await
                .context("failed to open event store")?,
        );
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Arc<EventStore>) -> Self {
        let shutdown = ShutdownSignal::new();
        let throttle = Arc::new(ThrottleGate::new(
            Duration::from_secs(config.throttle.block_cache_ttl_secs),
            config.throttle.audit_probability_denominator,
        ));
        let dedup = Arc::new(EventDedup::new(EVENT_DEDUP_TTL));
        let (sender, receiver) = flume::bounded(config.batch.queue_capacity);
        let app_state = AppState::new(
            store.clone(),
            throttle,
            dedup,
            sender,
            config.server.max_request_bytes as usize,
        );
        Self {
            config,
            store,
            shutdown,
            app_state,
            recent_issues: Arc::new(RecentIssues::new()),
            receiver,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn spawn_background_loops(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let batch_config = Arc::new(BatchWorkerConfig {
            worker_count: self.config.batch.worker_count,
            flush_every: self.config.batch.flush_every,
            flush_interval: Duration::from_secs(self.config.batch.flush_interval_secs),
            search_vector_max_chars: crate::grouping::default_max_search_vector_chars(),
        });
        let mut handles = batch::spawn_workers(
            self.receiver.clone(),
            self.store.clone(),
            self.recent_issues.clone(),
            batch_config,
        );

        handles.push(tokio::spawn(Self::run_alert_and_maintenance_loop(
            self.store.clone(),
            self.recent_issues.clone(),
            self.app_state.maintenance_freeze.clone(),
            self.config.alerts.clone(),
            self.config.partitioning.clone(),
            self.shutdown.clone(),
        )));

        handles
    }

    /// The alert-evaluation and soft-delete-purge loop: the batch tier's
    /// equivalent of the teacher's patrol/heartbeat/kpi `tokio::select!`
    /// (spec §4.7 "fixed interval", §9.1 "maintenance").
    async fn run_alert_and_maintenance_loop(
        store: Arc<EventStore>,
        recent_issues: Arc<RecentIssues>,
        maintenance_freeze: Arc<std::sync::atomic::AtomicBool>,
        alerts_config: faultline_core::config::AlertsConfig,
        partitioning_config: faultline_core::config::PartitioningConfig,
        shutdown: ShutdownSignal,
    ) {
        let evaluator = AlertEvaluator::new(
            store.clone(),
            recent_issues,
            alerts_config.dispatch_timeout_secs,
            alerts_config.max_issues_per_alert,
        );

        let mut alert_interval = tokio::time::interval(Duration::from_secs(alerts_config.eval_interval_secs));
        let mut maintenance_interval =
            tokio::time::interval(Duration::from_secs(partitioning_config.maintenance_interval_secs));
        alert_interval.tick().await;
        maintenance_interval.tick().await;

        let mut shutdown_rx = shutdown.subscribe();

        loop {
            tokio::select! {
                _ = alert_interval.tick() => {
                    evaluator.tick().await;
                }
                _ = maintenance_interval.tick() => {
                    maintenance_freeze.store(true, Ordering::Relaxed);
                    match store.purge_soft_deleted(chrono::Utc::now(), partitioning_config.soft_delete_grace_hours).await {
                        Ok(purged) if purged > 0 => info!(purged, "soft-deleted issues purged"),
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "soft-delete purge failed"),
                    }
                    maintenance_freeze.store(false, Ordering::Relaxed);
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping background loops");
                    break;
                }
            }
        }
    }

    /// Run the daemon as a standalone server using a pre-bound listener.
    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let router = faultline_ingest::ingest_router(self.app_state.clone());
        let bind_addr = listener.local_addr()?;
        let api_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "ingest server error");
            }
        });
        info!(%bind_addr, "ingest server listening");

        let background = self.spawn_background_loops();

        let mut shutdown_rx = self.shutdown.subscribe();
        let _ = shutdown_rx.recv().await;

        api_handle.abort();
        for handle in background {
            handle.abort();
        }
        info!("daemon stopped");
        Ok(())
    }

    /// Run the daemon as a standalone server, binding from config.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind ingest listener on {bind_addr}"))?;
        self.run_with_listener(listener).await
    }
}
