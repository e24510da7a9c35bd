//! gRPC service implementations for sso-service.

pub mod auth_service;
pub mod permission_service;

// Include the generated proto code
pub mod proto {
    tonic::include_proto!("sso.v1");

    // File descriptor set for gRPC reflection
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("sso_service_descriptor");
}

pub use auth_service::AuthServiceImpl;
pub use permission_service::PermissionServiceImpl;

use service_core::error::AppError;
use service_core::grpc::IntoStatus;
use tonic::Status;

use crate::pipeline::OwnedRequest;
use crate::services::ServiceError;

pub(crate) fn into_status(err: ServiceError) -> Status {
    AppError::from(err).into_status()
}

pub(crate) fn require(field: &str, present: bool) -> Result<(), Status> {
    if present {
        Ok(())
    } else {
        Err(Status::invalid_argument(format!("{field} is required")))
    }
}

impl OwnedRequest for proto::SendEmailVerificationRequest {
    fn owner_id(&self) -> i64 {
        self.user_id
    }
}
