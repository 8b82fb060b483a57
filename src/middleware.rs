//! Guard middleware implementation for axum.
//!
//! This module provides the [`GuardLayer`] and [`GuardMiddleware`] types that
//! integrate with axum's middleware system.

use crate::error::AccessDenied;
use crate::failure::FailureResponse;
use crate::guard::Guard;

use axum::extract::ConnectInfo;
use axum::response::Response;
use futures_util::future::BoxFuture;
use http::{HeaderName, Request};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A Tower layer that authenticates, authorizes and renders failures.
///
/// # Example
/// ```no_run
/// use axum::{Router, routing::get};
/// use axum_guard::{Guard, SecurityConfig};
/// use std::net::SocketAddr;
///
/// async fn handler() -> &'static str {
///     "Hello, World!"
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let config = SecurityConfig::from_file("security.toml").unwrap();
///     let guard = Guard::from_config(config).unwrap();
///
///     let app = Router::new()
///         .route("/", get(handler))
///         .layer(guard.layer());
///
///     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
///     axum::serve(
///         listener,
///         app.into_make_service_with_connect_info::<SocketAddr>()
///     ).await.unwrap();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct GuardLayer {
    guard: Arc<Guard>,
}

impl GuardLayer {
    /// Create a layer around a built guard.
    pub fn new(guard: Guard) -> Self {
        Self { guard: Arc::new(guard) }
    }

    /// Get a reference to the guard.
    pub fn guard(&self) -> &Guard {
        &self.guard
    }
}

impl<S> Layer<S> for GuardLayer {
    type Service = GuardMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GuardMiddleware {
            inner,
            guard: self.guard.clone(),
        }
    }
}

/// The guard middleware service.
#[derive(Debug, Clone)]
pub struct GuardMiddleware<S> {
    inner: S,
    guard: Arc<Guard>,
}

impl<S, B> Service<Request<B>> for GuardMiddleware<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let guard = self.guard.clone();
        // The clone may not be ready; keep the instance poll_ready was called on.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let address = client_address(&request, guard.forwarded_ip_header());
        let principal = guard.authenticate(request.headers(), address);
        let path = request.uri().path().to_string();
        let method = request.method().clone();

        let decision = guard.authorize(&path, &method, &principal);
        if !decision.allowed {
            tracing::info!(
                principal = principal.name().unwrap_or("-"),
                method = %method,
                path = %path,
                ip = ?address,
                reason = ?decision.reason,
                "Request denied"
            );
            let denied = AccessDenied::from_decision(
                &decision,
                path.as_str(),
                method,
                principal.name().map(str::to_string),
            );
            let response = guard.failure_response(&denied, Some(&path), None, request.headers());
            return Box::pin(async move { Ok::<_, S::Error>(response) });
        }

        tracing::trace!(
            principal = principal.name().unwrap_or("-"),
            method = %method,
            path = %path,
            ip = ?address,
            reason = ?decision.reason,
            "Request allowed"
        );

        let request_headers = guard
            .is_responsible(&path)
            .then(|| request.headers().clone());
        request.extensions_mut().insert(principal);

        Box::pin(async move {
            let mut response = inner.call(request).await?;

            let Some(request_headers) = request_headers else {
                return Ok(response);
            };
            let Some(failure) = response.extensions_mut().remove::<FailureResponse>() else {
                return Ok(response);
            };

            tracing::debug!(
                path = %path,
                class_name = failure.failure().class_name(),
                handler = failure.handler().map(|h| h.name.as_str()),
                "Rendering handler failure"
            );
            Ok(guard.failure_response(
                failure.failure(),
                Some(&path),
                failure.handler(),
                &request_headers,
            ))
        })
    }
}

/// Extract the client IP address from the request.
fn client_address<B>(
    request: &Request<B>,
    forwarded_header: Option<&HeaderName>,
) -> Option<IpAddr> {
    // First, check the forwarded header if configured
    if let Some(header_name) = forwarded_header {
        if let Some(value) = request.headers().get(header_name) {
            if let Ok(s) = value.to_str() {
                // X-Forwarded-For format: client, proxy1, proxy2, ...
                if let Some(first_ip) = s.split(',').next() {
                    if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                        return Some(ip);
                    }
                }
            }
        }
    }

    // Fall back to ConnectInfo
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
}
