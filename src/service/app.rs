//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the matching
//! components together and owns the servers and background tasks.

use crate::clock::SystemClock;
use crate::config::AppConfig;
use crate::matchmaking::Matchmaker;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::notify::{NotificationBridge, SocketRegistry};
use crate::service::health::{HealthCheck, HealthStatus};
use crate::store::{InMemoryBackend, MatchBackend, MatchStore};
use crate::transport::{WsServer, WsServerConfig};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Core matchmaking component
    matchmaker: Arc<Matchmaker>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Client connection server
    ws_server: Arc<WsServer>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        let backend: Arc<dyn MatchBackend> = Arc::new(InMemoryBackend::new());
        Self::with_backend(config, backend).await
    }

    /// Initialize the application on top of the given backing store
    pub async fn with_backend(
        config: AppConfig,
        backend: Arc<dyn MatchBackend>,
    ) -> Result<Self, ServiceError> {
        info!("Initializing duel-room matchmaking service");
        info!(
            "Configuration: service={}, ws_port={}, queue_timeout={}ms",
            config.service.name, config.service.ws_port, config.matchmaking.queue_timeout_ms
        );

        let ws_addr = config.ws_addr().map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let matchmaker = Arc::new(Self::initialize_matchmaking_system(
            &config,
            backend,
            metrics_collector.clone(),
        ));

        let is_running = Arc::new(RwLock::new(false));
        let metrics_service = Self::initialize_metrics(
            &config,
            metrics_collector,
            matchmaker.clone(),
            is_running.clone(),
        );

        let ws_server = Arc::new(WsServer::new(
            WsServerConfig {
                host: ws_addr.ip().to_string(),
                port: ws_addr.port(),
            },
            matchmaker.clone(),
        ));

        Ok(Self {
            config,
            matchmaker,
            metrics_service,
            ws_server,
            background_tasks: Vec::new(),
            is_running,
        })
    }

    /// Start the servers and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting duel-room matchmaking service");

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_ws_server().await?;
        self.start_background_tasks().await?;

        info!("✅ Duel-room matchmaking service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of duel-room service");

        *self.is_running.write().await = false;

        if let Err(e) = self.ws_server.stop().await {
            warn!("Failed to stop WebSocket server: {}", e);
        } else {
            info!("✅ WebSocket server stopped");
        }

        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        self.stop_background_tasks().await;
        self.matchmaker.shutdown();

        let final_stats =
            self.matchmaker
                .get_stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("✅ Duel-room service shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn matchmaker(&self) -> Arc<Matchmaker> {
        self.matchmaker.clone()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Build store, registry, bridge and matchmaker around one collector
    fn initialize_matchmaking_system(
        config: &AppConfig,
        backend: Arc<dyn MatchBackend>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Matchmaker {
        info!("Initializing matchmaking system components");

        let store = Arc::new(MatchStore::with_metrics(
            backend,
            Arc::new(SystemClock),
            config.queue_timeout(),
            metrics_collector.clone(),
        ));
        let registry = Arc::new(SocketRegistry::new());
        let bridge = Arc::new(NotificationBridge::new(
            registry,
            metrics_collector.clone(),
        ));

        Matchmaker::with_metrics(store, bridge, metrics_collector)
    }

    fn initialize_metrics(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
        matchmaker: Arc<Matchmaker>,
        is_running: Arc<RwLock<bool>>,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.metrics_port
        );

        let health_config = HealthServerConfig {
            port: config.service.metrics_port,
            host: config.service.ws_host.clone(),
        };

        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone())
                .with_matchmaker(matchmaker, is_running),
        );

        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.metrics_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to start up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    async fn start_ws_server(&mut self) -> Result<(), ServiceError> {
        let ws_server = self.ws_server.clone();
        let port = self.config.service.ws_port;

        let ws_handle = tokio::spawn(async move {
            if let Err(e) = ws_server.start().await {
                error!("WebSocket server failed: {}", e);
            } else {
                info!("WebSocket server task completed");
            }
        });
        self.background_tasks.push(ws_handle);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        info!("✅ WebSocket server started on port {}", port);
        Ok(())
    }

    /// Start the periodic stats task
    async fn start_background_tasks(&mut self) -> Result<(), ServiceError> {
        let stats_interval = self.config.stats_interval();
        info!(
            "Starting stats update task ({}s interval)...",
            stats_interval.as_secs()
        );

        let stats_task = {
            let matchmaker = self.matchmaker.clone();
            let metrics_collector = self.metrics_service.collector();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(stats_interval);
                let start_time = tokio::time::Instant::now();
                info!("Stats update task started");

                while *is_running.read().await {
                    interval.tick().await;

                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(start_time.elapsed().as_secs() as i64);

                    match matchmaker.get_stats().await {
                        Ok(stats) => {
                            debug!(
                                "Updating metrics - queue: {}, waiting: {}, paired: {}, connected: {}",
                                stats.queue_length,
                                stats.waiting_users,
                                stats.paired_users,
                                stats.connected_users
                            );
                            metrics_collector.update_from_stats(&stats);
                        }
                        Err(e) => {
                            warn!("Failed to get matchmaker stats for metrics update: {}", e);
                        }
                    }

                    let status = HealthCheck::readiness_check(&matchmaker, true)
                        .await
                        .unwrap_or(HealthStatus::Unhealthy);
                    metrics_collector.update_health_status(status.as_gauge());
                    metrics_collector.update_component_health(
                        "backend",
                        status == HealthStatus::Healthy,
                    );
                }

                info!("Stats update task stopped");
            })
        };

        self.background_tasks.push(stats_task);
        Ok(())
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        // Let the servers finish their graceful shutdown first
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
