//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the duel-room matchmaking
//! service using Prometheus metrics.

use crate::matchmaking::MatchmakerStats;
use crate::types::EndReason;
use anyhow::Result;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Waiting queue metrics
    queue_metrics: QueueMetrics,

    /// Pair registry metrics
    pair_metrics: PairMetrics,

    /// Connection and notification metrics
    connection_metrics: ConnectionMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,

    /// Backing store failures by operation
    pub backend_errors_total: IntCounterVec,
}

/// Waiting queue metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Match requests by result (accepted, duplicate)
    pub match_requests_total: IntCounterVec,

    /// Raw length of the waiting list, stale slots included
    pub queue_length: IntGauge,

    /// Users with a membership entry
    pub waiting_users: IntGauge,

    /// Stale queue slots discarded while dequeuing
    pub stale_entries_total: IntCounter,

    /// Membership entries removed by expiry timers
    pub expirations_total: IntCounter,

    /// Requests withdrawn before a match was found
    pub cancellations_total: IntCounter,
}

/// Pair registry metrics
#[derive(Clone)]
pub struct PairMetrics {
    /// Pairs formed
    pub pairs_formed_total: IntCounter,

    /// Pairs torn down by reason
    pub matches_ended_total: IntCounterVec,

    /// Chat messages relayed between opponents
    pub messages_relayed_total: IntCounter,
}

/// Connection and notification metrics
#[derive(Clone)]
pub struct ConnectionMetrics {
    /// Users with a live channel
    pub connected_users: IntGauge,

    /// Connections accepted
    pub connections_total: IntCounter,

    /// Notifications by event and status (delivered, dropped)
    pub notifications_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Matchmaker operation durations
    pub operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let pair_metrics = PairMetrics::new(&registry)?;
        let connection_metrics = ConnectionMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            pair_metrics,
            connection_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn pairs(&self) -> &PairMetrics {
        &self.pair_metrics
    }

    pub fn connections(&self) -> &ConnectionMetrics {
        &self.connection_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Update gauges from a matchmaker stats snapshot
    pub fn update_from_stats(&self, stats: &MatchmakerStats) {
        self.queue_metrics.queue_length.set(stats.queue_length as i64);
        self.queue_metrics
            .waiting_users
            .set(stats.waiting_users as i64);
        self.connection_metrics
            .connected_users
            .set(stats.connected_users as i64);
    }

    /// Record the result of a match request
    pub fn record_match_request(&self, accepted: bool) {
        let result = if accepted { "accepted" } else { "duplicate" };
        self.queue_metrics
            .match_requests_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn record_stale_entry(&self) {
        self.queue_metrics.stale_entries_total.inc();
    }

    pub fn record_expiration(&self) {
        self.queue_metrics.expirations_total.inc();
    }

    pub fn record_cancellation(&self) {
        self.queue_metrics.cancellations_total.inc();
    }

    pub fn record_pair_formed(&self) {
        self.pair_metrics.pairs_formed_total.inc();
    }

    pub fn record_match_ended(&self, reason: EndReason) {
        self.pair_metrics
            .matches_ended_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    pub fn record_message_relayed(&self) {
        self.pair_metrics.messages_relayed_total.inc();
    }

    pub fn record_connection(&self) {
        self.connection_metrics.connections_total.inc();
    }

    /// Record a notification attempt
    pub fn record_notification(&self, event: &str, delivered: bool) {
        let status = if delivered { "delivered" } else { "dropped" };
        self.connection_metrics
            .notifications_total
            .with_label_values(&[event, status])
            .inc();
    }

    pub fn record_backend_error(&self, operation: &str) {
        self.service_metrics
            .backend_errors_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Record matchmaker operation duration
    pub fn record_operation(&self, operation: &str, duration: Duration) {
        self.performance_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("duel_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "duel_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("duel_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let backend_errors_total = IntCounterVec::new(
            Opts::new(
                "duel_room_backend_errors_total",
                "Backing store failures by operation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(backend_errors_total.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
            backend_errors_total,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let match_requests_total = IntCounterVec::new(
            Opts::new("duel_room_match_requests_total", "Total match requests"),
            &["result"],
        )?;
        registry.register(Box::new(match_requests_total.clone()))?;

        let queue_length = IntGauge::new(
            "duel_room_queue_length",
            "Waiting list length including stale slots",
        )?;
        registry.register(Box::new(queue_length.clone()))?;

        let waiting_users = IntGauge::new(
            "duel_room_waiting_users",
            "Users currently holding a waiting entry",
        )?;
        registry.register(Box::new(waiting_users.clone()))?;

        let stale_entries_total = IntCounter::new(
            "duel_room_stale_entries_total",
            "Stale queue slots skipped while dequeuing",
        )?;
        registry.register(Box::new(stale_entries_total.clone()))?;

        let expirations_total = IntCounter::new(
            "duel_room_expirations_total",
            "Waiting entries removed by expiry timers",
        )?;
        registry.register(Box::new(expirations_total.clone()))?;

        let cancellations_total = IntCounter::new(
            "duel_room_cancellations_total",
            "Waiting entries withdrawn before pairing",
        )?;
        registry.register(Box::new(cancellations_total.clone()))?;

        Ok(Self {
            match_requests_total,
            queue_length,
            waiting_users,
            stale_entries_total,
            expirations_total,
            cancellations_total,
        })
    }
}

impl PairMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pairs_formed_total =
            IntCounter::new("duel_room_pairs_formed_total", "Total pairs formed")?;
        registry.register(Box::new(pairs_formed_total.clone()))?;

        let matches_ended_total = IntCounterVec::new(
            Opts::new("duel_room_matches_ended_total", "Total matches ended"),
            &["reason"],
        )?;
        registry.register(Box::new(matches_ended_total.clone()))?;

        let messages_relayed_total = IntCounter::new(
            "duel_room_messages_relayed_total",
            "Chat messages relayed to opponents",
        )?;
        registry.register(Box::new(messages_relayed_total.clone()))?;

        Ok(Self {
            pairs_formed_total,
            matches_ended_total,
            messages_relayed_total,
        })
    }
}

impl ConnectionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let connected_users =
            IntGauge::new("duel_room_connected_users", "Users with a live channel")?;
        registry.register(Box::new(connected_users.clone()))?;

        let connections_total =
            IntCounter::new("duel_room_connections_total", "Total connections accepted")?;
        registry.register(Box::new(connections_total.clone()))?;

        let notifications_total = IntCounterVec::new(
            Opts::new("duel_room_notifications_total", "Notifications sent to users"),
            &["event", "status"],
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        Ok(Self {
            connected_users,
            connections_total,
            notifications_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "duel_room_operation_duration_seconds",
                "Matchmaker operation duration",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self { operation_duration })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _queue = collector.queue();
        let _pairs = collector.pairs();
        let _connections = collector.connections();
        let _performance = collector.performance();
    }

    #[test]
    fn test_match_request_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_match_request(true);
        collector.record_match_request(true);
        collector.record_match_request(false);

        let requests = &collector.queue().match_requests_total;
        assert_eq!(requests.with_label_values(&["accepted"]).get(), 2);
        assert_eq!(requests.with_label_values(&["duplicate"]).get(), 1);
    }

    #[test]
    fn test_pair_lifecycle_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_pair_formed();
        collector.record_match_ended(EndReason::Disconnected);
        collector.record_notification("enemy_left", false);

        assert_eq!(collector.pairs().pairs_formed_total.get(), 1);
        assert_eq!(
            collector
                .pairs()
                .matches_ended_total
                .with_label_values(&["disconnected"])
                .get(),
            1
        );
        assert_eq!(
            collector
                .connections()
                .notifications_total
                .with_label_values(&["enemy_left", "dropped"])
                .get(),
            1
        );
    }

    #[test]
    fn test_gauges_follow_stats() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        let stats = MatchmakerStats {
            queue_length: 5,
            waiting_users: 3,
            connected_users: 7,
            ..Default::default()
        };

        collector.update_from_stats(&stats);

        assert_eq!(collector.queue().queue_length.get(), 5);
        assert_eq!(collector.queue().waiting_users.get(), 3);
        assert_eq!(collector.connections().connected_users.get(), 7);
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.elapsed();
        assert!(duration >= Duration::from_millis(10));

        collector.record_operation("request_match", timer.stop());
    }
}
