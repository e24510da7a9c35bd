//! gRPC utilities shared by the SSO services.
//!
//! - Error conversion between `AppError` and `tonic::Status`
//! - Health reporting on top of `tonic-health`
//! - Server builder and reflection helpers

pub mod error;
pub mod health;
pub mod server;

pub use error::{GrpcResult, IntoStatus};
pub use health::{HealthComponents, HealthReporter, HealthStatus, create_health_service};
pub use server::{GrpcServerBuilder, create_reflection_service};

pub use tonic::{Code, Request, Response, Status};
