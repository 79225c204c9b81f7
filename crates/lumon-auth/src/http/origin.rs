//! Origin/Referer check for state-changing requests.
//!
//! POST, PUT, PATCH and DELETE outside `/health*` must carry an allowed
//! `Origin`, or failing that a `Referer` whose origin is allowed. With
//! neither header, production rejects and development lets the request
//! through. Development also accepts `localhost` and `127.0.0.1` on any
//! port.

use axum::{
    body::Body,
    http::{header, Method, Request},
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;
use tower::{Layer, Service};

use crate::domain::AuthError;
use crate::http::response::HttpError;

/// Allow-list policy.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: HashSet<String>,
    production: bool,
}

impl OriginPolicy {
    pub fn new<I, S>(allowed: I, production: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|o| o.into().trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            production,
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        if self.allowed.contains(origin) {
            return true;
        }
        !self.production && is_local(origin)
    }

    /// `Err` with the rejection message, `Ok` to pass.
    pub fn check(&self, origin: Option<&str>, referer: Option<&str>) -> Result<(), &'static str> {
        if let Some(origin) = origin {
            return if self.is_allowed(origin) {
                Ok(())
            } else {
                Err("Invalid origin. Cross-site requests are not allowed.")
            };
        }
        if let Some(referer) = referer {
            return match referer_origin(referer) {
                Some(o) if self.is_allowed(o) => Ok(()),
                _ => Err("Invalid referer. Cross-site requests are not allowed."),
            };
        }
        if self.production {
            return Err("Missing Origin or Referer header. Cross-site requests require proper headers.");
        }
        Ok(())
    }
}

fn host_of(origin: &str) -> Option<&str> {
    let (_, rest) = origin.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => Some(h),
        _ => Some(host),
    }
}

fn is_local(origin: &str) -> bool {
    matches!(host_of(origin), Some("localhost" | "127.0.0.1"))
}

/// `https://example.com/path?q` -> `https://example.com`
fn referer_origin(referer: &str) -> Option<&str> {
    let scheme_end = referer.find("://")? + 3;
    let end = referer[scheme_end..]
        .find(['/', '?', '#'])
        .map_or(referer.len(), |i| scheme_end + i);
    (end > scheme_end).then(|| &referer[..end])
}

fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Origin check layer
#[derive(Clone)]
pub struct OriginLayer {
    policy: Arc<OriginPolicy>,
}

impl OriginLayer {
    pub fn new(policy: OriginPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }
}

impl<S> Layer<S> for OriginLayer {
    type Service = OriginService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OriginService {
            inner,
            policy: Arc::clone(&self.policy),
        }
    }
}

/// Origin check service
#[derive(Clone)]
pub struct OriginService<S> {
    inner: S,
    policy: Arc<OriginPolicy>,
}

impl<S> Service<Request<Body>> for OriginService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let policy = Arc::clone(&self.policy);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !is_state_changing(req.method()) || req.uri().path().starts_with("/health") {
                return inner.call(req).await;
            }

            let headers = req.headers();
            let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
            let referer = headers.get(header::REFERER).and_then(|v| v.to_str().ok());

            if let Err(reason) = policy.check(origin, referer) {
                lumon_telemetry::log_rejection!(
                    "origin_rejected",
                    "Blocked cross-site request",
                    method = %req.method(),
                    path = req.uri().path(),
                    origin = origin.unwrap_or("-"),
                    referer = referer.unwrap_or("-")
                );
                return Ok(
                    HttpError::new(AuthError::Forbidden(reason.into()), policy.production)
                        .into_response(),
                );
            }
            inner.call(req).await
        })
    }
}
