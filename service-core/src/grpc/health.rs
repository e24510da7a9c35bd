//! gRPC health check service utilities.
//!
//! Wraps `tonic-health` so every service registered on one server flips
//! between SERVING and NOT_SERVING together, along with the overall ("") entry.

use std::sync::Arc;
use tokio::sync::Mutex;
use tonic_health::server::HealthReporter as TonicHealthReporter;

/// Health status for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Service is healthy and ready to accept requests.
    Serving,
    /// Service is not ready to accept requests.
    NotServing,
    /// Health status is unknown.
    Unknown,
}

impl From<HealthStatus> for tonic_health::ServingStatus {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Serving => tonic_health::ServingStatus::Serving,
            HealthStatus::NotServing => tonic_health::ServingStatus::NotServing,
            HealthStatus::Unknown => tonic_health::ServingStatus::Unknown,
        }
    }
}

struct ReporterState {
    reporter: TonicHealthReporter,
    current: HealthStatus,
}

/// Reporter for updating the health of a group of gRPC services.
#[derive(Clone)]
pub struct HealthReporter {
    inner: Arc<Mutex<ReporterState>>,
    service_names: Arc<[String]>,
}

impl HealthReporter {
    fn new(reporter: TonicHealthReporter, service_names: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ReporterState {
                reporter,
                current: HealthStatus::Unknown,
            })),
            service_names: service_names.into(),
        }
    }

    /// Set the status of every tracked service. Returns true when the status changed.
    pub async fn set_status(&self, status: HealthStatus) -> bool {
        let mut state = self.inner.lock().await;
        if state.current == status {
            return false;
        }
        state
            .reporter
            .set_service_status("", status.into())
            .await;
        for name in self.service_names.iter() {
            state.reporter.set_service_status(name, status.into()).await;
        }
        state.current = status;
        true
    }

    /// Mark the services as serving (healthy).
    pub async fn set_serving(&self) -> bool {
        self.set_status(HealthStatus::Serving).await
    }

    /// Mark the services as not serving (unhealthy).
    pub async fn set_not_serving(&self) -> bool {
        self.set_status(HealthStatus::NotServing).await
    }

    /// Last status written through this reporter.
    pub async fn status(&self) -> HealthStatus {
        self.inner.lock().await.current
    }
}

/// Health service components returned by `create_health_service`.
pub struct HealthComponents<S> {
    /// The health server to add to the gRPC router.
    pub server: tonic_health::pb::health_server::HealthServer<S>,
    /// The reporter for updating health status.
    pub reporter: HealthReporter,
}

/// Create a health service tracking the given fully-qualified gRPC service names.
///
/// Every service starts out SERVING.
pub async fn create_health_service(
    service_names: Vec<String>,
) -> HealthComponents<impl tonic_health::pb::health_server::Health> {
    let (reporter, health_server) = tonic_health::server::health_reporter();

    let reporter = HealthReporter::new(reporter, service_names);
    reporter.set_serving().await;

    HealthComponents {
        server: health_server,
        reporter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_conversion() {
        assert_eq!(
            tonic_health::ServingStatus::from(HealthStatus::Serving),
            tonic_health::ServingStatus::Serving
        );
        assert_eq!(
            tonic_health::ServingStatus::from(HealthStatus::NotServing),
            tonic_health::ServingStatus::NotServing
        );
    }

    #[tokio::test]
    async fn test_reporter_reports_transitions_only() {
        let health = create_health_service(vec![
            "sso.v1.Auth".to_string(),
            "sso.v1.Permission".to_string(),
        ])
        .await;
        assert_eq!(health.reporter.status().await, HealthStatus::Serving);

        assert!(!health.reporter.set_serving().await);
        assert!(health.reporter.set_not_serving().await);
        assert_eq!(health.reporter.status().await, HealthStatus::NotServing);
    }
}
