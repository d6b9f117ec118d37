//! DSN resolution + Auth/Throttle Gate, implemented as a `tower::Layer`/
//! `Service` pair: boxed-future `call()`, no early return without consulting
//! the inner service, DSN resolved against storage and checked against a
//! throttle decision before the request reaches a handler.

use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{HeaderMap, Request, Response},
    response::IntoResponse,
};
use faultline_core::model::{Organization, Project};
use tower::{Layer, Service};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Project + organization resolved by the gate, handed to handlers via
/// request extensions, plus the (possibly scrubbed) client IP.
#[derive(Debug, Clone)]
pub struct ResolvedAuth {
    pub project: Project,
    pub organization: Organization,
    pub client_ip: Option<String>,
}

#[derive(Clone)]
pub struct AuthThrottleLayer {
    state: AppState,
}

impl AuthThrottleLayer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for AuthThrottleLayer {
    type Service = AuthThrottleMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthThrottleMiddleware {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthThrottleMiddleware<S> {
    inner: S,
    state: AppState,
}

impl<S> Service<Request<Body>> for AuthThrottleMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let state = self.state.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if state.is_frozen() {
                return Ok(ApiError::MaintenanceFreeze.into_response());
            }

            let Some(path_project_id) = extract_project_id(req.uri().path()) else {
                return Ok(ApiError::AuthDenied("unknown project".to_string()).into_response());
            };

            if let Err(e) = state.throttle.check_cached(path_project_id) {
                return Ok(ApiError::from(e).into_response());
            }

            let Some(public_key) = extract_dsn_key(req.uri().query(), req.headers()) else {
                return Ok(ApiError::AuthDenied("Invalid DSN".to_string()).into_response());
            };

            let lookup = match state.store.lookup_project_by_dsn(public_key).await {
                Ok(found) => found,
                Err(e) => return Ok(ApiError::from(e).into_response()),
            };

            let Some(lookup) = lookup else {
                state.throttle.record_invalid_dsn(path_project_id);
                return Ok(ApiError::AuthDenied("Invalid DSN".to_string()).into_response());
            };

            if lookup.project.id != path_project_id {
                state.throttle.record_invalid_dsn(path_project_id);
                return Ok(ApiError::AuthDenied("Invalid DSN".to_string()).into_response());
            }

            if let Err(e) = state.throttle.decide(
                lookup.project.id,
                lookup.organization.is_accepting_events,
                lookup.organization.throttle_pct,
                lookup.project.throttle_pct,
            ) {
                return Ok(ApiError::from(e).into_response());
            }

            if state.throttle.should_audit() {
                tracing::debug!(project_id = lookup.project.id, "scheduling throttle audit");
            }

            let scrub = lookup.project.effective_scrub_ip(&lookup.organization);
            let client_ip = extract_client_ip(req.headers()).map(|ip| {
                if scrub {
                    anonymize_ip(&ip)
                } else {
                    ip
                }
            });

            req.extensions_mut().insert(ResolvedAuth {
                project: lookup.project,
                organization: lookup.organization,
                client_ip,
            });

            inner.call(req).await
        })
    }
}

/// `/api/<project_id>/(store|envelope|security)/` → `<project_id>`.
fn extract_project_id(path: &str) -> Option<i64> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    if segments.next()? != "api" {
        return None;
    }
    segments.next()?.parse().ok()
}

fn extract_dsn_key(query: Option<&str>, headers: &HeaderMap) -> Option<Uuid> {
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                if k == "sentry_key" || k == "glitchtip_key" {
                    if let Ok(id) = Uuid::parse_str(v) {
                        return Some(id);
                    }
                }
            }
        }
    }
    for header_name in ["x-sentry-auth", "authorization"] {
        if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            if let Some(key) = parse_kv_auth_header(value) {
                return Some(key);
            }
        }
    }
    None
}

/// Parses `Sentry sentry_key=<uuid>, sentry_version=7, ...` (space- or
/// comma-separated `k=v` pairs, optional leading scheme word).
fn parse_kv_auth_header(value: &str) -> Option<Uuid> {
    for part in value.split([',', ' ']) {
        let part = part.trim();
        if let Some((k, v)) = part.split_once('=') {
            if k == "sentry_key" {
                if let Ok(id) = Uuid::parse_str(v) {
                    return Some(id);
                }
            }
        }
    }
    None
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
}

/// Anonymizes to /24 (IPv4) or /48 (IPv6); non-parseable values pass through
/// unchanged since anonymization is best-effort, not a hard gate.
fn anonymize_ip(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let o = v4.octets();
            format!("{}.{}.{}.0", o[0], o[1], o[2])
        }
        Ok(IpAddr::V6(v6)) => {
            let seg = v6.segments();
            format!("{:x}:{:x}:{:x}::", seg[0], seg[1], seg[2])
        }
        Err(_) => ip.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_project_id_from_store_path() {
        assert_eq!(extract_project_id("/api/42/store/"), Some(42));
        assert_eq!(extract_project_id("/api/7/envelope/"), Some(7));
        assert_eq!(extract_project_id("/not-api/7/envelope/"), None);
        assert_eq!(extract_project_id("/api/not-a-number/store/"), None);
    }

    #[test]
    fn dsn_key_from_query_param() {
        let key = Uuid::new_v4();
        let query = format!("sentry_key={key}");
        let headers = HeaderMap::new();
        assert_eq!(extract_dsn_key(Some(&query), &headers), Some(key));
    }

    #[test]
    fn dsn_key_from_sentry_auth_header() {
        let key = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-sentry-auth",
            HeaderValue::from_str(&format!(
                "Sentry sentry_key={key}, sentry_version=7, sentry_client=test/1.0"
            ))
            .unwrap(),
        );
        assert_eq!(extract_dsn_key(None, &headers), Some(key));
    }

    #[test]
    fn missing_dsn_returns_none() {
        assert_eq!(extract_dsn_key(None, &HeaderMap::new()), None);
    }

    #[test]
    fn anonymizes_ipv4_to_slash_24() {
        assert_eq!(anonymize_ip("203.0.113.42"), "203.0.113.0");
    }

    #[test]
    fn anonymizes_ipv6_to_slash_48() {
        assert_eq!(anonymize_ip("2001:db8:1234:5678::1"), "2001:db8:1234::");
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.1, 10.0.0.1"),
        );
        assert_eq!(
            extract_client_ip(&headers),
            Some("198.51.100.1".to_string())
        );
    }
}
