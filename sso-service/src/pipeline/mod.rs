//! Tower layers wrapped around the gRPC router.
//!
//! Applied outermost first: [`RecoveryLayer`], [`AuditLayer`], [`AuthorizationLayer`].

mod audit;
mod authorization;
mod context;
mod policy;
mod recovery;

pub use audit::{AuditLayer, AuditService};
pub use authorization::{AuthorizationLayer, AuthorizationService};
pub use context::{Authenticated, OwnedRequest};
pub use policy::{methods, MethodPolicy, PolicyTable};
pub use recovery::{RecoveryLayer, RecoveryService};

use http::header::{HeaderValue, CONTENT_TYPE};
use tonic::Status;

pub(crate) const GRPC_STATUS_HEADER: &str = "grpc-status";

/// Trailers-only gRPC response carrying `status`.
pub(crate) fn status_response<B: Default>(status: &Status) -> http::Response<B> {
    let mut response = http::Response::new(B::default());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    if status.add_header(headers).is_err() {
        headers.insert(GRPC_STATUS_HEADER, HeaderValue::from(status.code() as i32));
    }
    response
}
