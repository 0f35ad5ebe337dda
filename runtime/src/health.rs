//! Readiness checks.
//!
//! Liveness (`/health`) needs no checks. Readiness asks whether the pipeline can
//! commit events right now: the event store must answer within its timeout.

use crate::gateway::AccessGateway;

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health report
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self { status, checks }
    }

    /// Check if every component is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Status of one component, if it was checked
    #[must_use]
    pub fn component(&self, name: &str) -> Option<HealthStatus> {
        self.checks
            .iter()
            .find(|check| check.component == name)
            .map(|check| check.status)
    }
}

/// Component name of the event store check.
pub const STORE_COMPONENT: &str = "store";

/// Check whether the gateway's event store is reachable.
pub async fn readiness(gateway: &AccessGateway) -> HealthReport {
    let store = match gateway.store_ready().await {
        Ok(_) => HealthCheck::healthy(STORE_COMPONENT),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            HealthCheck::unhealthy(STORE_COMPONENT, e.to_string())
        }
    };

    HealthReport::new(vec![store])
}
