use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};

use super::{PolicyTable, GRPC_STATUS_HEADER};

/// Logs method, status and latency of every call outside the sensitive set.
///
/// Bodies are never logged. Unary successes carry their status in trailers,
/// so a response without a `grpc-status` header is reported as 0.
#[derive(Clone)]
pub struct AuditLayer {
    policies: Arc<PolicyTable>,
}

impl AuditLayer {
    pub fn new(policies: Arc<PolicyTable>) -> Self {
        Self { policies }
    }
}

impl<S> Layer<S> for AuditLayer {
    type Service = AuditService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditService {
            inner,
            policies: self.policies.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuditService<S> {
    inner: S,
    policies: Arc<PolicyTable>,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for AuditService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let method = req.uri().path().to_string();
        let sensitive = self.policies.is_sensitive(&method);
        let future = self.inner.call(req);

        if sensitive {
            return Box::pin(future);
        }

        Box::pin(async move {
            let started = Instant::now();
            tracing::info!(method = %method, "gRPC call started");

            let result = future.await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(response) => {
                    let grpc_status = response
                        .headers()
                        .get(GRPC_STATUS_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<i32>().ok())
                        .unwrap_or(0);
                    if grpc_status == 0 {
                        tracing::info!(method = %method, grpc_status, latency_ms, "gRPC call finished");
                    } else {
                        tracing::warn!(method = %method, grpc_status, latency_ms, "gRPC call failed");
                    }
                }
                Err(e) => {
                    tracing::error!(method = %method, error = %e, latency_ms, "gRPC transport error");
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::methods;
    use std::convert::Infallible;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tower::{service_fn, ServiceExt};

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes).unwrap()
        }

        fn clear(&self) {
            self.0.lock().unwrap().clear();
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    async fn audited_call(method: &str) {
        let inner = service_fn(|_req: http::Request<()>| async {
            Ok::<_, Infallible>(http::Response::new(String::new()))
        });
        let service = AuditLayer::new(Arc::new(PolicyTable::default_sso())).layer(inner);
        let request = http::Request::builder().uri(method).body(()).unwrap();
        service.oneshot(request).await.unwrap();
    }

    #[tokio::test]
    async fn test_audit_is_transparent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let inner = service_fn(move |_req: http::Request<()>| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(http::Response::new("body".to_string()))
            }
        });
        let layer = AuditLayer::new(Arc::new(PolicyTable::default_sso()));
        let mut service = layer.layer(inner);

        for method in [methods::LOGIN, methods::GET_USER_INFO] {
            let request = http::Request::builder().uri(method).body(()).unwrap();
            let response = service.ready().await.unwrap().call(request).await.unwrap();
            assert_eq!(response.body(), "body");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_credential_methods_are_never_logged() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        for method in [methods::LOGIN, methods::REGISTER] {
            audited_call(method).await;
            assert_eq!(logs.contents(), "", "{method} was logged");
        }

        audited_call(methods::GET_USER_INFO).await;
        let output = logs.contents();
        assert!(output.contains("method=/sso.v1.Auth/GetUserInfo"), "{output}");
        assert!(output.contains("grpc_status=0"), "{output}");

        logs.clear();
        audited_call(methods::LOGIN).await;
        assert_eq!(logs.contents(), "");
    }
}
