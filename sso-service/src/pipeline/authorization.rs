use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use http::header::AUTHORIZATION;
use http::HeaderMap;
use tonic::Status;
use tower::{Layer, Service};

use super::{status_response, Authenticated, MethodPolicy, PolicyTable};
use crate::services::{
    PermissionService, ServiceError, TokenClaims, TokenCodec, TokenType, VerifyError,
};
use crate::storage::Storage;

struct Authorizer {
    policies: Arc<PolicyTable>,
    codec: TokenCodec,
    storage: Arc<dyn Storage>,
    permissions: PermissionService,
    lookup_timeout: Duration,
}

/// Enforces the [`PolicyTable`] and attaches [`Authenticated`] to admitted requests.
#[derive(Clone)]
pub struct AuthorizationLayer {
    authorizer: Arc<Authorizer>,
}

impl AuthorizationLayer {
    pub fn new(
        policies: Arc<PolicyTable>,
        codec: TokenCodec,
        storage: Arc<dyn Storage>,
        permissions: PermissionService,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            authorizer: Arc::new(Authorizer {
                policies,
                codec,
                storage,
                permissions,
                lookup_timeout,
            }),
        }
    }
}

impl<S> Layer<S> for AuthorizationLayer {
    type Service = AuthorizationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizationService {
            inner,
            authorizer: self.authorizer.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthorizationService<S> {
    inner: S,
    authorizer: Arc<Authorizer>,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for AuthorizationService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        let policy = self
            .authorizer
            .policies
            .policy(req.uri().path())
            .filter(|p| p.needs_auth())
            .cloned();

        let Some(policy) = policy else {
            return Box::pin(self.inner.call(req));
        };

        let authorizer = self.authorizer.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let method = req.uri().path().to_string();
            match authorizer.authorize(req.headers(), &policy).await {
                Ok(authenticated) => {
                    req.extensions_mut().insert(authenticated);
                    inner.call(req).await
                }
                Err(status) => {
                    tracing::warn!(
                        method = %method,
                        code = ?status.code(),
                        reason = %status.message(),
                        "Call rejected"
                    );
                    Ok(status_response(&status))
                }
            }
        })
    }
}

impl Authorizer {
    async fn authorize(
        &self,
        headers: &HeaderMap,
        policy: &MethodPolicy,
    ) -> Result<Authenticated, Status> {
        let token = bearer_token(headers)
            .ok_or_else(|| Status::unauthenticated("missing or malformed authorization header"))?;

        let claims = self
            .codec
            .verify_with(
                self.storage.as_ref(),
                token,
                TokenType::Access,
                self.lookup_timeout,
            )
            .await
            .map_err(|e| match e {
                VerifyError::Token(e) => Status::unauthenticated(e.to_string()),
                VerifyError::Timeout => Status::unauthenticated("token verification timed out"),
                VerifyError::SecretLookup(e) => {
                    tracing::error!(error = %e, "App secret lookup failed");
                    Status::internal("internal error")
                }
            })?;

        for code in &policy.required {
            if !self.holds(&claims, code).await? {
                return Err(Status::permission_denied(format!(
                    "missing required permission: {code}"
                )));
            }
        }

        if !policy.one_of.is_empty() && !self.holds_any(&claims, &policy.one_of).await? {
            return Err(Status::permission_denied(format!(
                "requires one of: {}",
                policy.one_of.join(", ")
            )));
        }

        Ok(Authenticated::new(claims))
    }

    /// Snapshot first, then the live grant.
    async fn holds(&self, claims: &TokenClaims, code: &str) -> Result<bool, Status> {
        if claims.has_permission(code) {
            return Ok(true);
        }
        live_grant(&self.permissions, claims.user_id, code).await
    }

    async fn holds_any(&self, claims: &TokenClaims, codes: &[String]) -> Result<bool, Status> {
        if codes.iter().any(|code| claims.has_permission(code)) {
            return Ok(true);
        }
        for code in codes {
            if live_grant(&self.permissions, claims.user_id, code).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Live grant lookup behind the snapshot check. An unknown code is not granted.
pub(crate) async fn live_grant(
    permissions: &PermissionService,
    user_id: i64,
    code: &str,
) -> Result<bool, Status> {
    match permissions.has_permission(user_id, code).await {
        Ok(granted) => {
            if granted {
                tracing::debug!(user_id, code = %code, "Permission granted after token issuance");
            }
            Ok(granted)
        }
        Err(ServiceError::InvalidInput(_)) => Ok(false),
        Err(ServiceError::InvalidCredentials) => {
            Err(Status::unauthenticated("user no longer exists"))
        }
        Err(e) => {
            tracing::error!(user_id, code = %code, error = %e, "Permission lookup failed");
            Err(Status::internal("internal error"))
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&headers("bearer   abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("abc")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
