//! HTTP/JSON gateway.
//!
//! Every route forwards to the gRPC server through the generated clients, so
//! gateway calls pass the same authorization layers as native gRPC calls.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::{http_trace_layer, request_id_middleware, REQUEST_ID_HEADER};
use service_core::tower_http::cors::{AllowOrigin, CorsLayer};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};

use crate::grpc::proto::{
    auth_client::AuthClient, permission_client::PermissionClient, EmailVerifyRequest,
    EmailVerifyResponse, ForgotPasswordRequest, ForgotPasswordResponse, GetUserInfoRequest,
    GetUserInfoResponse, GetUserPermissionsRequest, GetUserPermissionsResponse,
    GrantPermissionRequest, GrantPermissionResponse, HasUserPermissionRequest,
    HasUserPermissionResponse, LoginRequest, LoginResponse, LogoutRequest, LogoutResponse,
    RefreshTokenRequest, RefreshTokenResponse, RegisterRequest, RegisterResponse,
    ResetPasswordRequest, ResetPasswordResponse, SendEmailVerificationRequest,
    SendEmailVerificationResponse,
};
use crate::storage::Storage;

#[derive(Clone)]
pub struct GatewayState {
    auth: AuthClient<Channel>,
    permissions: PermissionClient<Channel>,
    storage: Arc<dyn Storage>,
}

impl GatewayState {
    /// Lazily connects to the gRPC server at `grpc_addr` (e.g. `http://127.0.0.1:44044`).
    pub fn new(grpc_addr: String, storage: Arc<dyn Storage>) -> Result<Self, AppError> {
        let channel = Endpoint::from_shared(grpc_addr)
            .map_err(|e| AppError::ConfigError(e.into()))?
            .connect_lazy();

        Ok(Self {
            auth: AuthClient::new(channel.clone()),
            permissions: PermissionClient::new(channel),
            storage,
        })
    }
}

pub fn router(state: GatewayState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/v1/auth/register", post(register))
        .route("/v1/auth/login", post(login))
        .route("/v1/auth/logout", post(logout))
        .route("/v1/auth/userinfo", post(user_info))
        .route("/v1/auth/refresh", post(refresh))
        .route("/v1/auth/forgot-password", post(forgot_password))
        .route(
            "/v1/auth/reset-password",
            get(reset_password_page).post(reset_password),
        )
        .route("/v1/auth/reset-password/form", post(reset_password_form))
        .route("/v1/auth/send-verification", post(send_verification))
        .route("/v1/auth/verify-email", get(verify_email))
        .route(
            "/v1/users/:user_id/permissions",
            get(user_permissions).post(grant_permission),
        )
        .route("/v1/users/:user_id/permissions/:code", get(has_permission))
        .layer(http_trace_layer())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

/// A `*` entry allows any origin; unparseable entries are dropped.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins.iter().filter_map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|e| tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin"))
                .ok()
        }))
    };
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, request_id.clone()])
        .expose_headers([request_id])
}

/// Wraps `message`, carrying over the caller's bearer token and request id.
fn forward<T>(headers: &HeaderMap, message: T) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);

    for name in ["authorization", REQUEST_ID_HEADER] {
        let value = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<MetadataValue<Ascii>>().ok());
        if let Some(value) = value {
            request.metadata_mut().insert(name, value);
        }
    }

    request
}

async fn health_check(State(state): State<GatewayState>) -> impl IntoResponse {
    match state.storage.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "sso-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

async fn register(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let response = state.auth.clone().register(forward(&headers, body)).await?;
    Ok((StatusCode::CREATED, Json(response.into_inner())))
}

async fn login(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = state.auth.clone().login(forward(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn logout(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, AppError> {
    let response = state.auth.clone().logout(forward(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn user_info(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<GetUserInfoRequest>,
) -> Result<Json<GetUserInfoResponse>, AppError> {
    let response = state
        .auth
        .clone()
        .get_user_info(forward(&headers, body))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn refresh(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<RefreshTokenRequest>,
) -> Result<Json<RefreshTokenResponse>, AppError> {
    let response = state
        .auth
        .clone()
        .refresh_token(forward(&headers, body))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn forgot_password(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<Json<ForgotPasswordResponse>, AppError> {
    let response = state
        .auth
        .clone()
        .forgot_password(forward(&headers, body))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn reset_password(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<ResetPasswordResponse>, AppError> {
    let response = state
        .auth
        .clone()
        .reset_password(forward(&headers, body))
        .await?;
    Ok(Json(response.into_inner()))
}

#[derive(Template)]
#[template(path = "reset_password.html")]
struct ResetPasswordPage {
    token: String,
    error: Option<String>,
}

#[derive(Template)]
#[template(path = "reset_password_done.html")]
struct ResetPasswordDone {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResetLinkQuery {
    #[serde(default)]
    token: String,
}

/// Target of the emailed reset link.
async fn reset_password_page(Query(query): Query<ResetLinkQuery>) -> impl IntoResponse {
    ResetPasswordPage {
        token: query.token,
        error: None,
    }
}

/// Form submission from [`reset_password_page`]. Failures re-render the form.
async fn reset_password_form(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Form(body): Form<ResetPasswordRequest>,
) -> Response {
    let token = body.token.clone();

    match state
        .auth
        .clone()
        .reset_password(forward(&headers, body))
        .await
    {
        Ok(response) => ResetPasswordDone {
            message: response.into_inner().message,
        }
        .into_response(),
        Err(status) => {
            let error = status.message().to_string();
            let code = AppError::from(status).into_response().status();
            (
                code,
                ResetPasswordPage {
                    token,
                    error: Some(error),
                },
            )
                .into_response()
        }
    }
}

async fn send_verification(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<SendEmailVerificationRequest>,
) -> Result<Json<SendEmailVerificationResponse>, AppError> {
    let response = state
        .auth
        .clone()
        .send_email_verification(forward(&headers, body))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn verify_email(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<EmailVerifyRequest>,
) -> Result<Json<EmailVerifyResponse>, AppError> {
    let response = state
        .auth
        .clone()
        .email_verify(forward(&headers, query))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn user_permissions(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> Result<Json<GetUserPermissionsResponse>, AppError> {
    let response = state
        .permissions
        .clone()
        .get_user_permissions(forward(&headers, GetUserPermissionsRequest { user_id }))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn has_permission(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path((user_id, permission)): Path<(i64, String)>,
) -> Result<Json<HasUserPermissionResponse>, AppError> {
    let response = state
        .permissions
        .clone()
        .has_user_permission(forward(
            &headers,
            HasUserPermissionRequest {
                user_id,
                permission,
            },
        ))
        .await?;
    Ok(Json(response.into_inner()))
}

#[derive(Debug, Deserialize)]
struct GrantBody {
    permission_id: i64,
}

async fn grant_permission(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    Json(body): Json<GrantBody>,
) -> Result<Json<GrantPermissionResponse>, AppError> {
    let response = state
        .permissions
        .clone()
        .grant_permission(forward(
            &headers,
            GrantPermissionRequest {
                user_id,
                permission_id: body.permission_id,
            },
        ))
        .await?;
    Ok(Json(response.into_inner()))
}
