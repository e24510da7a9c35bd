#![allow(dead_code)]

use std::sync::Arc;

use secrecy::SecretString;
use service_core::config::{Config as CoreConfig, Environment};
use service_core::observability::LogFormat;
use sso_service::config::{DatabaseConfig, MailConfig, PasswordHashConfig, SsoConfig, TokenConfig};
use sso_service::grpc::proto::{
    auth_client::AuthClient, permission_client::PermissionClient, LoginRequest, LoginResponse,
    RegisterRequest,
};
use sso_service::models::App;
use sso_service::services::MockMailer;
use sso_service::storage::{InMemoryStorage, PermissionStore};
use sso_service::Application;
use tokio_util::sync::CancellationToken;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;

pub const TEST_APP_ID: i32 = 1;
pub const TEST_APP_SECRET: &str = "test-app-secret";
pub const TEST_PASSWORD: &str = "correct-horse-battery";
pub const PUBLIC_BASE_URL: &str = "http://sso.test";
/// Seeded ids of the `user` and `admin` permissions.
pub const USER_PERMISSION_ID: i64 = 1;
pub const ADMIN_PERMISSION_ID: i64 = 2;

pub struct TestApp {
    pub http_address: String,
    pub grpc_address: String,
    pub storage: Arc<InMemoryStorage>,
    pub mailer: MockMailer,
    shutdown: CancellationToken,
}

pub struct Session {
    pub user_id: i64,
    pub email: String,
    pub tokens: LoginResponse,
}

pub fn test_config() -> SsoConfig {
    SsoConfig {
        common: CoreConfig { port: 0 },
        environment: Environment::Dev,
        service_name: "sso-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "warn".to_string(),
        log_format: LogFormat::Pretty,
        grpc_port: 0,
        grpc_concurrency_limit: 0,
        shutdown_timeout_seconds: 5,
        allowed_origins: vec!["*".to_string()],
        database: DatabaseConfig::for_url("postgres://unused/sso_test"),
        tokens: TokenConfig::default(),
        password: PasswordHashConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
        mail: MailConfig {
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: SecretString::new(String::new()),
            from_address: "no-reply@sso.test".to_string(),
            from_name: "SSO".to_string(),
            public_base_url: PUBLIC_BASE_URL.to_string(),
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let storage = Arc::new(
            InMemoryStorage::new().with_app(App::new(TEST_APP_ID, "test-app", TEST_APP_SECRET)),
        );
        let mailer = MockMailer::new();

        let app = Application::build_with(test_config(), storage.clone(), Arc::new(mailer.clone()))
            .await
            .expect("Failed to build test application");

        let http_address = format!("http://127.0.0.1:{}", app.http_port());
        let grpc_address = format!("http://127.0.0.1:{}", app.grpc_port());
        let shutdown = app.shutdown_token();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the gateway by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            grpc_address,
            storage,
            mailer,
            shutdown,
        }
    }

    pub async fn auth_client(&self) -> AuthClient<Channel> {
        AuthClient::connect(self.grpc_address.clone())
            .await
            .expect("Failed to connect to gRPC server")
    }

    pub async fn permission_client(&self) -> PermissionClient<Channel> {
        PermissionClient::connect(self.grpc_address.clone())
            .await
            .expect("Failed to connect to gRPC server")
    }

    /// Registers `email` with [`TEST_PASSWORD`] and logs in to the test app.
    pub async fn register_and_login(&self, email: &str) -> Session {
        let mut client = self.auth_client().await;

        let registered = client
            .register(RegisterRequest {
                name: "Test User".to_string(),
                email: email.to_string(),
                password: TEST_PASSWORD.to_string(),
                ..Default::default()
            })
            .await
            .expect("register failed")
            .into_inner();

        let tokens = self.login(email).await;

        Session {
            user_id: registered.user_id,
            email: email.to_string(),
            tokens,
        }
    }

    pub async fn login(&self, email: &str) -> LoginResponse {
        self.auth_client()
            .await
            .login(LoginRequest {
                email: email.to_string(),
                password: TEST_PASSWORD.to_string(),
                app_id: TEST_APP_ID,
            })
            .await
            .expect("login failed")
            .into_inner()
    }

    /// Grants `admin` directly in storage; tokens minted earlier keep their old snapshot.
    pub async fn make_admin(&self, user_id: i64) {
        self.storage
            .grant_permission(user_id, ADMIN_PERMISSION_ID)
            .await
            .expect("grant failed");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Wraps `message` with a bearer `authorization` header.
pub fn with_auth<T>(message: T, access_token: &str) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    let value = format!("Bearer {access_token}")
        .parse::<MetadataValue<Ascii>>()
        .expect("invalid metadata value");
    request.metadata_mut().insert("authorization", value);
    request
}
