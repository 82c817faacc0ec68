//! Bearer authentication and per-client request budgets for the reference
//! service.
//!
//! Clients are budgeted by the bearer token they present, falling back to
//! their address for anonymous calls. An exhausted budget is answered with
//! `429`, a `Retry-After` header and a body the engine's rate-limit
//! classifier recognizes.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, Ipv4Addr},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Token clients must present, and the one the CLI sends.
pub const TOKEN_ENV: &str = "NOTIFY_SYNC_TOKEN";
/// Comma-separated CORS origins.
pub const CORS_ORIGINS_ENV: &str = "NOTIFY_SYNC_CORS_ORIGINS";
/// Requests per minute per client.
pub const RATE_LIMIT_ENV: &str = "NOTIFY_SYNC_RATE_LIMIT";

/// Access rules of the reference service.
#[derive(Clone, Debug, Default)]
pub struct SecurityConfig {
    /// Required bearer token. `None` leaves the notification routes open.
    pub token: Option<String>,
    /// CORS allow-list. `None` is permissive.
    pub allowed_origins: Option<Vec<String>>,
    pub budget: Option<RequestBudget>,
}

impl SecurityConfig {
    pub fn from_env() -> Self {
        let allowed_origins = std::env::var(CORS_ORIGINS_ENV).ok().map(|origins| {
            origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect()
        });
        let budget = std::env::var(RATE_LIMIT_ENV)
            .ok()
            .and_then(|limit| limit.parse::<usize>().ok())
            .map(RequestBudget::per_minute);

        Self {
            token: std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()),
            allowed_origins,
            budget,
        }
    }

    /// Open service: no token, permissive CORS, no budget.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::open()
        }
    }

    /// Allow each client `max_requests` per `window`.
    pub fn with_budget(mut self, max_requests: usize, window: Duration) -> Self {
        self.budget = Some(RequestBudget::new(max_requests, window));
        self
    }
}

/// Who a request is charged to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClientKey {
    Token(String),
    Address(IpAddr),
}

impl ClientKey {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match bearer_token(headers) {
            Some(token) => Self::Token(token.to_string()),
            None => Self::Address(client_address(headers)),
        }
    }
}

/// Sliding-window request budget, one window per client.
#[derive(Clone, Debug)]
pub struct RequestBudget {
    max_requests: usize,
    window: Duration,
    spent: Arc<Mutex<HashMap<ClientKey, VecDeque<Instant>>>>,
}

impl RequestBudget {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            spent: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Charge one request to `client`. When the budget is spent, returns how
    /// long until the oldest charge leaves the window.
    pub fn spend(&self, client: &ClientKey) -> Result<(), Duration> {
        let now = Instant::now();
        let mut spent = self.spent();
        let history = spent.entry(client.clone()).or_default();
        while history
            .front()
            .is_some_and(|at| now.duration_since(*at) >= self.window)
        {
            history.pop_front();
        }

        if history.len() < self.max_requests {
            history.push_back(now);
            return Ok(());
        }
        let waited = history.front().map_or(Duration::ZERO, |at| now.duration_since(*at));
        Err(self.window.saturating_sub(waited))
    }

    /// Forget clients whose charges have all left the window. Returns how
    /// many were forgotten.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut spent = self.spent();
        let before = spent.len();
        spent.retain(|_, history| {
            history
                .back()
                .is_some_and(|at| now.duration_since(*at) < self.window)
        });
        before - spent.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.spent().len()
    }

    fn spent(&self) -> MutexGuard<'_, HashMap<ClientKey, VecDeque<Instant>>> {
        self.spent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reject notification requests without the configured bearer token.
pub async fn auth_middleware(
    State(config): State<SecurityConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = config.token.as_deref() else {
        return next.run(request).await;
    };

    let rejection = match bearer_token(request.headers()) {
        Some(token) if token == expected => None,
        Some(_) => Some("Invalid bearer token"),
        None => Some("Missing bearer token"),
    };
    match rejection {
        None => next.run(request).await,
        Some(reason) => {
            tracing::warn!(reason, "rejected notification request");
            (StatusCode::UNAUTHORIZED, reason).into_response()
        }
    }
}

/// Charge the request to its client and answer `429` once the budget is spent.
pub async fn rate_limit_middleware(
    State(budget): State<RequestBudget>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = ClientKey::from_headers(request.headers());
    match budget.spend(&client) {
        Ok(()) => next.run(request).await,
        Err(retry_in) => {
            let seconds = retry_after_seconds(retry_in);
            tracing::warn!(?client, retry_after = seconds, "request budget exhausted");
            too_many_requests(seconds)
        }
    }
}

fn too_many_requests(seconds: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        format!("Too many requests, retry in {}s", seconds),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
    response
}

/// Whole seconds to advertise in `Retry-After`, never zero.
fn retry_after_seconds(wait: Duration) -> u64 {
    let seconds = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    seconds.max(1)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Address of an anonymous caller: first proxy hop, then `X-Real-IP`, then
/// loopback.
fn client_address(headers: &HeaderMap) -> IpAddr {
    let header_ip = |name: &str, first_hop: bool| -> Option<IpAddr> {
        let value = headers.get(name)?.to_str().ok()?;
        let value = if first_hop {
            value.split(',').next()?
        } else {
            value
        };
        value.trim().parse::<IpAddr>().ok()
    };

    header_ip("x-forwarded-for", true)
        .or_else(|| header_ip("x-real-ip", false))
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
