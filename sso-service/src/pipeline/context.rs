use tonic::Status;

use super::authorization::live_grant;
use crate::models::ADMIN;
use crate::services::{PermissionService, TokenClaims};

/// Identity established by the authorization layer, stored in request extensions.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user_id: i64,
    pub claims: TokenClaims,
}

impl Authenticated {
    pub fn new(claims: TokenClaims) -> Self {
        Self {
            user_id: claims.user_id,
            claims,
        }
    }

    pub fn from_request<T>(request: &tonic::Request<T>) -> Result<&Authenticated, Status> {
        request
            .extensions()
            .get::<Authenticated>()
            .ok_or_else(|| Status::unauthenticated("request is not authenticated"))
    }

    /// Token snapshot first, then the live grant, as the authorization layer checks.
    pub async fn holds(&self, permissions: &PermissionService, code: &str) -> Result<bool, Status> {
        if self.claims.has_permission(code) {
            return Ok(true);
        }
        live_grant(permissions, self.user_id, code).await
    }

    /// Caller must be the owner named by `request`, unless they hold `admin`.
    pub async fn ensure_owner<R: OwnedRequest>(
        &self,
        request: &R,
        permissions: &PermissionService,
    ) -> Result<(), Status> {
        if self.user_id == request.owner_id() || self.holds(permissions, ADMIN).await? {
            Ok(())
        } else {
            Err(Status::permission_denied(
                "caller may only act on their own account",
            ))
        }
    }
}

/// A request that targets one user's account.
pub trait OwnedRequest {
    fn owner_id(&self) -> i64;
}
