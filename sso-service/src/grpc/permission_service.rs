//! gRPC implementation of the `sso.v1.Permission` service.
//!
//! Access control happens in the authorization layer; handlers only validate input.

use tonic::{Request, Response, Status};

use super::proto::{
    permission_server::Permission, GetUserPermissionsRequest, GetUserPermissionsResponse,
    GrantPermissionRequest, GrantPermissionResponse, HasUserPermissionRequest,
    HasUserPermissionResponse,
};
use super::{into_status, require};
use crate::services::{PermissionService, ServiceError};

pub struct PermissionServiceImpl {
    permissions: PermissionService,
}

impl PermissionServiceImpl {
    pub fn new(permissions: PermissionService) -> Self {
        Self { permissions }
    }
}

#[tonic::async_trait]
impl Permission for PermissionServiceImpl {
    async fn get_user_permissions(
        &self,
        request: Request<GetUserPermissionsRequest>,
    ) -> Result<Response<GetUserPermissionsResponse>, Status> {
        let req = request.into_inner();
        require("user_id", req.user_id != 0)?;

        let permissions = self
            .permissions
            .list_permissions(req.user_id)
            .await
            .map_err(target_status)?;

        Ok(Response::new(GetUserPermissionsResponse { permissions }))
    }

    async fn has_user_permission(
        &self,
        request: Request<HasUserPermissionRequest>,
    ) -> Result<Response<HasUserPermissionResponse>, Status> {
        let req = request.into_inner();
        require("user_id", req.user_id != 0)?;
        require("permission", !req.permission.is_empty())?;

        let allowed = self
            .permissions
            .has_permission(req.user_id, &req.permission)
            .await
            .map_err(target_status)?;

        Ok(Response::new(HasUserPermissionResponse { allowed }))
    }

    async fn grant_permission(
        &self,
        request: Request<GrantPermissionRequest>,
    ) -> Result<Response<GrantPermissionResponse>, Status> {
        let req = request.into_inner();
        require("user_id", req.user_id != 0)?;
        require("permission_id", req.permission_id != 0)?;

        self.permissions
            .grant(req.user_id, req.permission_id)
            .await
            .map_err(target_status)?;

        Ok(Response::new(GrantPermissionResponse { success: true }))
    }
}

/// The authority reports a missing user as invalid credentials. Here that user
/// is the target named by the caller, not the caller.
fn target_status(err: ServiceError) -> Status {
    match err {
        ServiceError::InvalidCredentials => into_status(ServiceError::UserNotFound),
        other => into_status(other),
    }
}
