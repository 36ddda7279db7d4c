use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const KEY_HEADER: &str = "X-Barter-Key";

#[derive(Clone)]
pub struct AuthState {
    members: Arc<HashMap<String, AuthContext>>,
    limiter: Arc<TokenBuckets>,
}

/// The authenticated member behind a request. Wizards are scoped to `user_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub api_key_id: String,
    pub premium: bool,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("BARTER_API_KEYS").unwrap_or_default();
        Self::new(parse_keys(&raw), TokenBuckets::from_env())
    }

    fn new(members: HashMap<String, AuthContext>, limiter: TokenBuckets) -> Self {
        Self {
            members: Arc::new(members),
            limiter: Arc::new(limiter),
        }
    }

    #[cfg(test)]
    pub fn for_tests(raw: &str) -> Self {
        Self::new(
            parse_keys(raw),
            TokenBuckets {
                rate_per_sec: 1000.0,
                capacity: 1000.0,
                buckets: Arc::new(Mutex::new(HashMap::new())),
            },
        )
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.members.get(presented).cloned()
    }
}

pub async fn require_member(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(reject(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Barter-Key or a Bearer token",
        ));
    };

    let Some(member) = state.authenticate(&presented) else {
        return Ok(reject(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    match state.limiter.consume(&member.user_id).await {
        Ok(permit) => {
            request.extensions_mut().insert(member);
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(exceeded) => {
            warn!(target = "barter.api", user_id = %member.user_id, "rate limited");
            let mut response = reject(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            );
            exceeded.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn reject(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

/// Parses `user:key[:premium]` entries separated by commas. An empty or
/// fully malformed list falls back to a single local member.
fn parse_keys(raw: &str) -> HashMap<String, AuthContext> {
    let mut members = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(3, ':').map(str::trim);
        let user = parts.next().filter(|s| !s.is_empty());
        let key = parts.next().filter(|s| !s.is_empty());
        let premium = parts.next().is_some_and(|tier| tier.eq_ignore_ascii_case("premium"));
        match (user, key) {
            (Some(user), Some(secret)) => {
                members.insert(
                    secret.to_string(),
                    AuthContext {
                        user_id: user.to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                        premium,
                    },
                );
            }
            _ => warn!(target = "barter.api", "ignored malformed BARTER_API_KEYS entry: {trimmed}"),
        }
    }

    if members.is_empty() {
        warn!(
            target = "barter.api",
            "BARTER_API_KEYS produced no keys; falling back to local-member:local-key"
        );
        members.insert(
            "local-key".to_string(),
            AuthContext {
                user_id: "local-member".to_string(),
                api_key_id: "key-01".to_string(),
                premium: false,
            },
        );
    } else {
        info!(target = "barter.api", key_count = members.len(), "loaded member keys");
    }
    members
}

/// Per-member token buckets refilled continuously.
struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl TokenBuckets {
    fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        // Image uploads and draft edits come in bursts.
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(20.0);
        Self {
            rate_per_sec,
            capacity,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn consume(&self, user_id: &str) -> Result<RatePermit, RateExceeded> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let bucket = guard.entry(user_id.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }

        let snapshot = BucketSnapshot {
            capacity: self.capacity,
            tokens: bucket.tokens,
            rate: self.rate_per_sec,
        };
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(RatePermit(BucketSnapshot {
                tokens: bucket.tokens,
                ..snapshot
            }))
        } else {
            Err(RateExceeded(snapshot))
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy)]
struct BucketSnapshot {
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl BucketSnapshot {
    fn reset_secs(&self) -> u64 {
        ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64
    }

    fn write_common(&self, headers: &mut http::HeaderMap, remaining: u64) {
        set_number(headers, "X-RateLimit-Limit", self.capacity as u64);
        set_number(headers, "X-RateLimit-Remaining", remaining);
        set_number(headers, "X-RateLimit-Reset", self.reset_secs());
    }
}

#[derive(Debug)]
pub struct RatePermit(BucketSnapshot);

impl RatePermit {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let remaining = self.0.tokens.max(0.0).floor() as u64;
        self.0.write_common(headers, remaining);
    }
}

#[derive(Debug)]
pub struct RateExceeded(BucketSnapshot);

impl RateExceeded {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let retry_after = ((1.0 - self.0.tokens) / self.0.rate).ceil().max(1.0) as u64;
        set_number(headers, http::header::RETRY_AFTER, retry_after);
        self.0.write_common(headers, 0);
    }
}

fn set_number(headers: &mut http::HeaderMap, name: impl http::header::IntoHeaderName, value: u64) {
    let value = HeaderValue::from_str(&value.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("0"));
    headers.insert(name, value);
}
