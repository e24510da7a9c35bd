//! Application startup and lifecycle management.
//!
//! Runs the gRPC server (behind the authorization pipeline) and the HTTP
//! gateway side by side; one cancellation token stops both.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use service_core::error::AppError;
use service_core::grpc::{
    create_health_service, create_reflection_service, GrpcServerBuilder, HealthReporter,
};
use service_core::shutdown::{cancel_on_signal, drain_with_timeout};
use service_core::tower::ServiceBuilder;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::server::NamedService;

use crate::config::SsoConfig;
use crate::db;
use crate::gateway::{self, GatewayState};
use crate::grpc::{
    proto::{auth_server::AuthServer, permission_server::PermissionServer, FILE_DESCRIPTOR_SET},
    AuthServiceImpl, PermissionServiceImpl,
};
use crate::pipeline::{AuditLayer, AuthorizationLayer, PolicyTable, RecoveryLayer};
use crate::services::{
    AuthService, AuthSettings, LogMailer, Mailer, PermissionService, SmtpMailer, TokenCodec,
};
use crate::storage::{PostgresStorage, Storage};
use crate::utils::PasswordHasher;

pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    config: SsoConfig,
    storage: Arc<dyn Storage>,
    auth: AuthService,
    permissions: PermissionService,
    policies: Arc<PolicyTable>,
    shutdown: CancellationToken,
}

impl Application {
    /// Connects to Postgres, runs migrations and binds both listeners.
    pub async fn build(config: SsoConfig) -> Result<Self, AppError> {
        let pool = db::create_pool(&config.database).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            AppError::DatabaseError(e.into())
        })?;

        db::run_migrations(&pool).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            AppError::DatabaseError(e.into())
        })?;

        let mailer: Arc<dyn Mailer> = if config.mail.enabled {
            Arc::new(SmtpMailer::new(&config.mail)?)
        } else {
            tracing::warn!("Mail delivery disabled, mails are only logged");
            Arc::new(LogMailer)
        };

        Self::build_with(config, Arc::new(PostgresStorage::new(pool)), mailer).await
    }

    /// Wires the services over the given collaborators and binds both listeners.
    pub async fn build_with(
        config: SsoConfig,
        storage: Arc<dyn Storage>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, AppError> {
        let hasher = PasswordHasher::new(
            config.password.memory_kib,
            config.password.iterations,
            config.password.parallelism,
        )
        .map_err(AppError::ConfigError)?;

        let codec = TokenCodec::new(config.tokens.issuer.clone());
        let permissions = PermissionService::new(storage.clone());
        let auth = AuthService::new(
            storage.clone(),
            permissions.clone(),
            codec,
            mailer,
            hasher,
            AuthSettings::from_config(&config.tokens, &config.mail),
        );

        // Port 0 picks a free port
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.grpc_port));
        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC listener");
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(http_port, grpc_port, "SSO service listeners bound");

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            config,
            storage,
            auth,
            permissions,
            policies: Arc::new(PolicyTable::default_sso()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Replaces the authorization policy table.
    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = Arc::new(policies);
        self
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    /// Cancelling this token stops the application as a signal would.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        let token = self.shutdown.clone();
        let grace = self.config.shutdown_timeout();
        let signal_task = cancel_on_signal(token.clone());

        let health = create_health_service(vec![
            <AuthServer<AuthServiceImpl> as NamedService>::NAME.to_string(),
            <PermissionServer<PermissionServiceImpl> as NamedService>::NAME.to_string(),
        ])
        .await;

        let reflection = create_reflection_service(&[FILE_DESCRIPTOR_SET])
            .map_err(|e| AppError::InternalError(e.into()))?;

        let monitor = tokio::spawn(monitor_storage(
            self.storage.clone(),
            health.reporter.clone(),
            Duration::from_secs(self.config.database.health_check_interval_seconds.max(1)),
            token.clone(),
        ));

        let pipeline = ServiceBuilder::new()
            .layer(RecoveryLayer)
            .layer(AuditLayer::new(self.policies.clone()))
            .layer(AuthorizationLayer::new(
                self.policies.clone(),
                self.auth.codec().clone(),
                self.storage.clone(),
                self.permissions.clone(),
                self.config.tokens.app_secret_lookup_timeout(),
            ))
            .into_inner();

        let grpc_shutdown = token.clone();
        let grpc_server = GrpcServerBuilder::new(&self.config.service_name)
            .with_concurrency_limit(self.config.grpc_concurrency_limit)
            .build_server()
            .layer(pipeline)
            .add_service(health.server)
            .add_service(reflection)
            .add_service(AuthServer::new(AuthServiceImpl::new(self.auth.clone())))
            .add_service(PermissionServer::new(PermissionServiceImpl::new(
                self.permissions.clone(),
            )))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(self.grpc_listener),
                async move { grpc_shutdown.cancelled().await },
            );

        let gateway_state = GatewayState::new(
            format!("http://127.0.0.1:{}", self.grpc_port),
            self.storage.clone(),
        )?;
        let http_shutdown = token.clone();
        let http_server = axum::serve(self.http_listener, gateway::router(gateway_state, &self.config.allowed_origins))
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .into_future();

        tracing::info!(
            service = %self.config.service_name,
            version = %self.config.service_version,
            "SSO service started"
        );

        // A server that stops on its own takes the other one down with it.
        let grpc = async {
            let result = drain_with_timeout("grpc", grpc_server, token.clone(), grace).await;
            token.cancel();
            result
        };
        let http = async {
            let result = drain_with_timeout("http", http_server, token.clone(), grace).await;
            token.cancel();
            result
        };
        let (grpc_result, http_result) = tokio::join!(grpc, http);

        signal_task.abort();
        if let Err(e) = monitor.await {
            tracing::warn!(error = %e, "Storage monitor task failed");
        }
        self.storage.close().await;
        tracing::info!("SSO service stopped");

        grpc_result.map_err(|e| {
            tracing::error!(error = %e, "gRPC server error");
            AppError::from(e)
        })?;
        http_result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            AppError::from(e)
        })?;

        Ok(())
    }
}

/// Pings storage every `interval`, flipping gRPC health on transitions.
async fn monitor_storage(
    storage: Arc<dyn Storage>,
    reporter: HealthReporter,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                match storage.health_check().await {
                    Ok(()) => {
                        if reporter.set_serving().await {
                            tracing::info!("Storage reachable again, reporting SERVING");
                        }
                    }
                    Err(e) => {
                        if reporter.set_not_serving().await {
                            tracing::warn!(error = %e, "Storage health check failed, reporting NOT_SERVING");
                        }
                    }
                }
            }
        }
    }
}
