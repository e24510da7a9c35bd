//! gRPC implementation of the `sso.v1.Auth` service.

use tonic::{Request, Response, Status};

use super::proto::{
    auth_server::Auth, EmailVerifyRequest, EmailVerifyResponse, ForgotPasswordRequest,
    ForgotPasswordResponse, GetUserInfoRequest, GetUserInfoResponse, LoginRequest, LoginResponse,
    LogoutRequest, LogoutResponse, RefreshTokenRequest, RefreshTokenResponse, RegisterRequest,
    RegisterResponse, ResetPasswordRequest, ResetPasswordResponse, SendEmailVerificationRequest,
    SendEmailVerificationResponse,
};
use super::{into_status, require};
use crate::pipeline::Authenticated;
use crate::services::{AuthService, Registration};

pub struct AuthServiceImpl {
    auth: AuthService,
}

impl AuthServiceImpl {
    pub fn new(auth: AuthService) -> Self {
        Self { auth }
    }
}

#[tonic::async_trait]
impl Auth for AuthServiceImpl {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        require("name", !req.name.trim().is_empty())?;
        require("email", !req.email.is_empty())?;
        require("password", !req.password.is_empty())?;

        let user = self
            .auth
            .register(Registration {
                name: req.name,
                phone: req.phone,
                address: req.address,
                email: req.email,
                password: req.password,
            })
            .await
            .map_err(into_status)?;

        Ok(Response::new(RegisterResponse {
            user_id: user.id,
            name: user.name,
            email: user.email,
            activated: user.activated,
        }))
    }

    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let req = request.into_inner();
        require("email", !req.email.is_empty())?;
        require("password", !req.password.is_empty())?;
        require("app_id", req.app_id != 0)?;

        let pair = self
            .auth
            .login(&req.email, &req.password, req.app_id)
            .await
            .map_err(into_status)?;

        Ok(Response::new(LoginResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_at: pair.expires_at.timestamp(),
        }))
    }

    async fn logout(
        &self,
        request: Request<LogoutRequest>,
    ) -> Result<Response<LogoutResponse>, Status> {
        let req = request.into_inner();
        require("refresh_token", !req.refresh_token.is_empty())?;

        self.auth
            .logout(&req.refresh_token)
            .await
            .map_err(into_status)?;

        Ok(Response::new(LogoutResponse { success: true }))
    }

    async fn get_user_info(
        &self,
        request: Request<GetUserInfoRequest>,
    ) -> Result<Response<GetUserInfoResponse>, Status> {
        let req = request.into_inner();
        require("access_token", !req.access_token.is_empty())?;

        let profile = self
            .auth
            .user_info(&req.access_token)
            .await
            .map_err(into_status)?;

        Ok(Response::new(GetUserInfoResponse {
            user_id: profile.id,
            email: profile.email,
            name: profile.name,
            phone: profile.phone,
            address: profile.address,
            activated: profile.activated,
        }))
    }

    async fn refresh_token(
        &self,
        request: Request<RefreshTokenRequest>,
    ) -> Result<Response<RefreshTokenResponse>, Status> {
        let req = request.into_inner();
        require("refresh_token", !req.refresh_token.is_empty())?;

        let pair = self
            .auth
            .refresh(&req.refresh_token)
            .await
            .map_err(into_status)?;

        Ok(Response::new(RefreshTokenResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_at: pair.expires_at.timestamp(),
        }))
    }

    async fn forgot_password(
        &self,
        request: Request<ForgotPasswordRequest>,
    ) -> Result<Response<ForgotPasswordResponse>, Status> {
        let req = request.into_inner();
        require("email", !req.email.is_empty())?;
        require("app_id", req.app_id != 0)?;

        let outcome = self
            .auth
            .forgot_password(&req.email, req.app_id)
            .await
            .map_err(into_status)?;

        Ok(Response::new(ForgotPasswordResponse {
            success: outcome.success,
            message: outcome.message,
            expires_at: outcome.expires_at,
        }))
    }

    async fn reset_password(
        &self,
        request: Request<ResetPasswordRequest>,
    ) -> Result<Response<ResetPasswordResponse>, Status> {
        let req = request.into_inner();
        require("token", !req.token.is_empty())?;
        require("new_password", !req.new_password.is_empty())?;

        self.auth
            .reset_password(&req.token, &req.new_password)
            .await
            .map_err(into_status)?;

        Ok(Response::new(ResetPasswordResponse {
            success: true,
            message: "Password reset successfully".to_string(),
        }))
    }

    async fn send_email_verification(
        &self,
        request: Request<SendEmailVerificationRequest>,
    ) -> Result<Response<SendEmailVerificationResponse>, Status> {
        let caller = Authenticated::from_request(&request)?.clone();
        let req = request.into_inner();
        require("user_id", req.user_id != 0)?;
        require("app_id", req.app_id != 0)?;
        caller
            .ensure_owner(&req, self.auth.permissions())
            .await?;

        let outcome = self
            .auth
            .send_verification_email(req.user_id, req.app_id)
            .await
            .map_err(into_status)?;

        Ok(Response::new(SendEmailVerificationResponse {
            success: outcome.success,
            message: outcome.message,
            expires_at: outcome.expires_at,
        }))
    }

    async fn email_verify(
        &self,
        request: Request<EmailVerifyRequest>,
    ) -> Result<Response<EmailVerifyResponse>, Status> {
        let req = request.into_inner();
        require("token", !req.token.is_empty())?;

        self.auth
            .verify_email(&req.token)
            .await
            .map_err(into_status)?;

        Ok(Response::new(EmailVerifyResponse {
            success: true,
            message: "Email verified successfully".to_string(),
            activated: true,
        }))
    }
}
