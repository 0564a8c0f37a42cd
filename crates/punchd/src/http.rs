//! HTTP surface for punchd
//!
//! Routes requests to the punch engine. Identity comes from headers set by
//! the gateway in front of this service.

use bytes::Bytes;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use punch_api::{
    BreakEndRequest, BreakStartRequest, Coordinates, ErrorInfo, ErrorKind, HistoryQuery,
    Identity, LateExceptionRequest, PunchInRequest, PunchOutRequest, Role, SessionStatus,
    TeamFilter, API_VERSION,
};
use punch_core::PunchEngine;
use punch_util::{RateLimiter, SiteId, UserId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Largest request body accepted
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Shared request-handling state
pub struct AppState {
    pub engine: Arc<PunchEngine>,
    pub rate_limiter: Mutex<RateLimiter>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(engine: Arc<PunchEngine>) -> Self {
        let service = &engine.policy().service;
        let rate_limiter = RateLimiter::new(service.punch_rate_per_minute, Duration::from_secs(60));
        let request_timeout = service.request_timeout;

        Self {
            engine,
            rate_limiter: Mutex::new(rate_limiter),
            request_timeout,
        }
    }

    fn allow(&self, user_id: &UserId) -> bool {
        match self.rate_limiter.lock() {
            Ok(mut limiter) => limiter.check(user_id),
            Err(poisoned) => poisoned.into_inner().check(user_id),
        }
    }

    /// Forget rate-limit buckets idle for longer than `stale_after`
    pub fn cleanup_rate_limits(&self, stale_after: Duration) {
        if let Ok(mut limiter) = self.rate_limiter.lock() {
            limiter.cleanup(stale_after);
        }
    }
}

type HttpResponse = Response<Full<Bytes>>;

fn response(status: StatusCode, body: Vec<u8>) -> HttpResponse {
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => response(status, body),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            error_response(&ErrorInfo::new(ErrorKind::Internal, "Internal error"))
        }
    }
}

fn error_response(info: &ErrorInfo) -> HttpResponse {
    let status = StatusCode::from_u16(info.kind.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(info).unwrap_or_else(|_| br#"{"kind":"internal"}"#.to_vec());
    response(status, body)
}

fn validation(message: impl Into<String>) -> ErrorInfo {
    ErrorInfo::new(ErrorKind::ValidationError, message)
}

fn identity_of<B>(req: &Request<B>) -> Result<Identity, ErrorInfo> {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let user_id = header(USER_ID_HEADER)
        .ok_or_else(|| ErrorInfo::new(ErrorKind::Unauthenticated, "Missing user identity"))?;
    let role: Role = header(USER_ROLE_HEADER)
        .ok_or_else(|| ErrorInfo::new(ErrorKind::Unauthenticated, "Missing user role"))?
        .parse()
        .map_err(|e: String| ErrorInfo::new(ErrorKind::Unauthenticated, e))?;

    Ok(Identity::new(user_id, role))
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

fn decode_component(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                out.push((hex_value(bytes[i + 1]) << 4) | hex_value(bytes[i + 2]));
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

fn param<T: std::str::FromStr>(params: &HashMap<String, String>, name: &str) -> Result<Option<T>, ErrorInfo> {
    match params.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| validation(format!("Invalid {}: {}", name, v))),
        None => Ok(None),
    }
}

/// RFC 3339 timestamp, or a bare `YYYY-MM-DD` taken as the start (or end) of that local day.
/// The end of a day is the last millisecond before the next local midnight, the
/// resolution sessions are indexed at.
fn parse_bound(params: &HashMap<String, String>, name: &str, end_of_day: bool) -> Result<Option<DateTime<Local>>, ErrorInfo> {
    let Some(raw) = params.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(dt.with_timezone(&Local)));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| validation(format!("Invalid {}: {}", name, raw)))?;
    let midnight = |d: NaiveDate| {
        d.and_hms_opt(0, 0, 0)
            .and_then(|n| Local.from_local_datetime(&n).earliest())
    };

    if end_of_day {
        Ok(date
            .succ_opt()
            .and_then(midnight)
            .map(|next| next - chrono::Duration::milliseconds(1)))
    } else {
        Ok(midnight(date))
    }
}

async fn read_json<B, T>(req: Request<B>) -> Result<T, ErrorInfo>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    T: DeserializeOwned,
{
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| validation(format!("Unreadable request body: {}", e)))?
        .to_bytes();

    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        &body
    };

    serde_json::from_slice(body).map_err(|e| validation(format!("Malformed JSON body: {}", e)))
}

fn rate_limited(state: &AppState, identity: &Identity) -> Result<(), ErrorInfo> {
    if state.allow(&identity.user_id) {
        Ok(())
    } else {
        warn!(user_id = %identity.user_id, "Rate limited");
        Err(ErrorInfo::new(ErrorKind::RateLimited, "Too many punch requests, slow down"))
    }
}

async fn route<B>(req: Request<B>, state: &AppState) -> Result<HttpResponse, ErrorInfo>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let engine = &state.engine;
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();

    if method == Method::GET && path == "/health" {
        let healthy = engine.is_healthy();
        let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
        return Ok(json(
            status,
            &serde_json::json!({
                "status": if healthy { "ok" } else { "degraded" },
                "apiVersion": API_VERSION,
            }),
        ));
    }

    let identity = identity_of(&req)?;
    let params = parse_query(req.uri().query());
    let now = punch_util::now();

    match (method, path.as_str()) {
        (Method::POST, "/attendance/punch-in") => {
            rate_limited(state, &identity)?;
            let body: PunchInRequest = read_json(req).await?;
            let resp = engine.clock_in(&identity, &body, now).await?;
            Ok(json(StatusCode::CREATED, &resp))
        }
        (Method::POST, "/attendance/punch-out") => {
            rate_limited(state, &identity)?;
            let body: PunchOutRequest = read_json(req).await?;
            let resp = engine.clock_out(&identity, None, &body, now).await?;
            Ok(json(StatusCode::OK, &resp))
        }
        (Method::POST, "/attendance/break/start") => {
            rate_limited(state, &identity)?;
            let body: BreakStartRequest = read_json(req).await?;
            let resp = engine.start_break(&identity, None, &body, now)?;
            Ok(json(StatusCode::OK, &resp))
        }
        (Method::POST, "/attendance/break/end") => {
            rate_limited(state, &identity)?;
            let body: BreakEndRequest = read_json(req).await?;
            let resp = engine.end_break(&identity, None, &body, now)?;
            Ok(json(StatusCode::OK, &resp))
        }
        (Method::POST, "/attendance/exceptions/late") => {
            rate_limited(state, &identity)?;
            let body: LateExceptionRequest = read_json(req).await?;
            let resp = engine.request_late_exception(&identity, &body, now).await?;
            Ok(json(StatusCode::ACCEPTED, &resp))
        }
        (Method::GET, "/attendance/current") => {
            Ok(json(StatusCode::OK, &engine.current(&identity)?))
        }
        (Method::GET, "/attendance/history") => {
            let query = HistoryQuery {
                status: param::<SessionStatus>(&params, "status")?,
                from: parse_bound(&params, "from", false)?,
                to: parse_bound(&params, "to", true)?,
                page: param(&params, "page")?.unwrap_or(1),
                per_page: param(&params, "perPage")?.unwrap_or(HistoryQuery::DEFAULT_PER_PAGE),
            };
            Ok(json(StatusCode::OK, &engine.history(&identity, &query)?))
        }
        (Method::GET, "/attendance/team/status") => {
            let filter = TeamFilter {
                manager_id: param::<String>(&params, "managerId")?.map(UserId::new),
                status: param(&params, "status")?,
                workplace_id: param::<String>(&params, "workplaceId")?.map(SiteId::new),
            };
            let members = engine.team_status(&identity, &filter).await?;
            Ok(json(StatusCode::OK, &members))
        }
        (Method::GET, "/attendance/verify-location") => {
            let workplace: String = param(&params, "workplaceId")?
                .ok_or_else(|| validation("workplaceId is required"))?;
            let coordinates = Coordinates {
                latitude: param(&params, "latitude")?,
                longitude: param(&params, "longitude")?,
                accuracy: param(&params, "accuracy")?,
            };
            let resp = engine.verify_location(&SiteId::new(workplace), &coordinates, now)?;
            Ok(json(StatusCode::OK, &resp))
        }
        _ => Err(ErrorInfo::new(ErrorKind::NotFound, format!("No route for {}", path))),
    }
}

/// Handle one request under the configured request timeout
pub async fn handle<B>(req: Request<B>, state: Arc<AppState>) -> Result<HttpResponse, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let resp = match tokio::time::timeout(state.request_timeout, route(req, &state)).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(info)) => error_response(&info),
        Err(_) => {
            warn!(method = %method, path = %path, "Request timed out");
            error_response(&ErrorInfo::new(
                ErrorKind::Timeout,
                "Request timed out; re-read current state before retrying",
            ))
        }
    };

    debug!(
        method = %method,
        path = %path,
        status = resp.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );

    Ok(resp)
}

/// Accept connections until `shutdown` flips to true
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(peer = %peer, error = %e, "Connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("HTTP server stopping");
                    return;
                }
            }
        }
    }
}
