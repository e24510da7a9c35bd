//! Tonic server construction and reflection.

use std::time::Duration;

use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tonic server with HTTP/2 keepalive always on and an optional
/// per-connection concurrency cap.
pub struct GrpcServerBuilder {
    service_name: String,
    concurrency_limit: Option<usize>,
}

impl GrpcServerBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            concurrency_limit: None,
        }
    }

    /// Caps in-flight requests per connection. Zero leaves it unbounded.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = (limit > 0).then_some(limit);
        self
    }

    pub fn build_server(&self) -> Server {
        tracing::debug!(
            service = %self.service_name,
            concurrency_limit = ?self.concurrency_limit,
            "Configuring gRPC server"
        );

        let server = Server::builder()
            .http2_keepalive_interval(Some(KEEPALIVE_INTERVAL))
            .http2_keepalive_timeout(Some(KEEPALIVE_TIMEOUT));

        match self.concurrency_limit {
            Some(limit) => server.concurrency_limit_per_connection(limit),
            None => server,
        }
    }
}

/// Reflection over every encoded descriptor set passed in.
pub fn create_reflection_service(
    file_descriptor_sets: &[&[u8]],
) -> Result<
    tonic_reflection::server::ServerReflectionServer<
        impl tonic_reflection::server::ServerReflection + use<>,
    >,
    tonic_reflection::server::Error,
> {
    file_descriptor_sets
        .iter()
        .fold(ReflectionBuilder::configure(), |builder, fds| {
            builder.register_encoded_file_descriptor_set(fds)
        })
        .build_v1()
}
