//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the duel-room
//! matchmaking service, including readiness and liveness probes.

use crate::matchmaking::Matchmaker;
use crate::utils::current_timestamp;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric form used by the health status gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional status message
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Raw waiting queue length, stale slots included
    pub queue_length: usize,
    /// Users currently waiting
    pub users_waiting: usize,
    /// Users currently in a pair
    pub users_paired: usize,
    /// Users with a live connection
    pub users_connected: usize,
    /// Total pairs formed since service start
    pub pairs_formed: u64,
    /// Total matches ended since service start
    pub matches_ended: u64,
}

impl HealthCheck {
    /// Perform a full health check of the service
    pub async fn check(matchmaker: &Matchmaker, running: bool, service_name: &str) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        let service_check = Self::check_service_running(running);
        if service_check.status != HealthStatus::Healthy {
            overall_status = HealthStatus::Unhealthy;
        }
        checks.push(service_check);

        let backend_check = Self::check_backend(matchmaker).await;
        if backend_check.status == HealthStatus::Unhealthy {
            overall_status = HealthStatus::Unhealthy;
        }
        checks.push(backend_check);

        let matchmaker_check = Self::check_matchmaker(matchmaker).await;
        if matchmaker_check.status == HealthStatus::Unhealthy {
            overall_status = HealthStatus::Unhealthy;
        } else if matchmaker_check.status == HealthStatus::Degraded
            && overall_status == HealthStatus::Healthy
        {
            overall_status = HealthStatus::Degraded;
        }
        checks.push(matchmaker_check);

        let stats = Self::gather_service_stats(matchmaker).await;

        Ok(HealthCheck {
            status: overall_status,
            service: service_name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: current_timestamp(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub fn liveness_check(running: bool) -> HealthStatus {
        if running {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Readiness check - verify the backing store answers
    pub async fn readiness_check(matchmaker: &Matchmaker, running: bool) -> Result<HealthStatus> {
        if !running {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_backend(matchmaker).await.status)
    }

    fn check_service_running(running: bool) -> ComponentCheck {
        let (status, message) = if running {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: 0,
        }
    }

    async fn check_backend(matchmaker: &Matchmaker) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match matchmaker.store().ping().await {
            Ok(()) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Backing store ping failed: {}", e);
                (HealthStatus::Unhealthy, Some(format!("Ping failed: {}", e)))
            }
        };

        ComponentCheck {
            name: "backend".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_matchmaker(matchmaker: &Matchmaker) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match matchmaker.get_stats().await {
            Ok(_stats) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Matchmaker stats check failed: {}", e);
                (
                    HealthStatus::Degraded,
                    Some(format!("Stats check failed: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "matchmaker".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(matchmaker: &Matchmaker) -> ServiceStats {
        match matchmaker.get_stats().await {
            Ok(stats) => ServiceStats {
                queue_length: stats.queue_length,
                users_waiting: stats.waiting_users,
                users_paired: stats.paired_users,
                users_connected: stats.connected_users,
                pairs_formed: stats.pairs_formed,
                matches_ended: stats.matches_ended,
            },
            Err(e) => {
                debug!("Failed to get matchmaker stats for health check: {}", e);
                ServiceStats::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
