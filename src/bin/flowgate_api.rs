//! flowgate_api: a minimal REST façade over the distributed rate-limiting
//! core.
//!
//! Public endpoints (JSON unless noted):
//! - GET    /v1/health
//! - GET    /v1/version
//! - POST   /v1/check/:algorithm                 run one admission decision
//! - DELETE /v1/limits/:algorithm/:identifier    clear persisted state
//! - GET    /v1/demo                             sample endpoint guarded by
//!                                               the limiter middleware
//!
//! The identifier for a check is resolved from the `X-Client-Id` header,
//! else the `id` query parameter, else the peer address.
//!
//! Response contract on denial (compatible with standard rate-limit tooling):
//! - status 429 with `X-RateLimit-Limit`, `X-RateLimit-Remaining`,
//!   `X-RateLimit-Algorithm`, and, only when a reset hint exists,
//!   `X-RateLimit-Reset` (seconds since epoch). An absent hint never
//!   produces an empty-valued header.
//! - validation faults (unknown algorithm tag, bad parameters) are 400 with
//!   the fixed message the core generated; everything else is a constant 500.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use flowgate::{AlgorithmKind, Decision, Limiter, ScriptExecutor, StrategyConfig};

// ------------------------------ State ------------------------------

#[derive(Clone)]
struct AppState {
    limiter: Arc<Limiter>,
    demo_kind: AlgorithmKind,
}

// ------------------------------ Types ------------------------------

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Version {
    api: &'static str,
    algorithms: Vec<AlgorithmInfo>,
}

#[derive(Serialize)]
struct AlgorithmInfo {
    kind: AlgorithmKind,
    configured: String,
}

#[derive(Serialize)]
struct CheckRes<'a> {
    identifier: &'a str,
    remaining: i64,
    #[serde(flatten)]
    decision: &'a Decision,
}

// ------------------------------ Helpers ------------------------------

/// `X-Client-Id` header, else `id` query parameter, else the peer address.
fn resolve_identifier(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    peer: SocketAddr,
) -> String {
    if let Some(id) = headers.get("x-client-id").and_then(|h| h.to_str().ok()) {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    if let Some(id) = params.get("id") {
        if !id.is_empty() {
            return id.clone();
        }
    }
    peer.ip().to_string()
}

/// The `X-RateLimit-*` header set for a decision. `X-RateLimit-Reset` is
/// emitted only when a reset hint exists.
fn rate_limit_headers(decision: &Decision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-ratelimit-limit",
        HeaderValue::from_str(&decision.limit().to_string()).expect("integer header"),
    );
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from_str(&decision.remaining().to_string()).expect("integer header"),
    );
    headers.insert(
        "x-ratelimit-algorithm",
        HeaderValue::from_static(decision.algorithm().as_str()),
    );
    if let Some(reset_at) = decision.reset_at() {
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from_str(&reset_at.to_string()).expect("integer header"),
        );
    }
    headers
}

fn decision_response(identifier: &str, decision: &Decision) -> Response {
    let status = if decision.admitted() {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let body = Json(CheckRes {
        identifier,
        remaining: decision.remaining(),
        decision,
    });
    (status, rate_limit_headers(decision), body).into_response()
}

// ------------------------------ Handlers ------------------------------

async fn health() -> impl IntoResponse {
    Json(Health { status: "ok" })
}

async fn version(State(st): State<AppState>) -> impl IntoResponse {
    let algorithms = AlgorithmKind::ALL
        .iter()
        .map(|&kind| AlgorithmInfo {
            kind,
            configured: st.limiter.describe(kind),
        })
        .collect();
    Json(Version {
        api: "flowgate-api/0.1",
        algorithms,
    })
}

async fn check(
    State(st): State<AppState>,
    Path(algorithm): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let kind: AlgorithmKind = algorithm
        .parse()
        .map_err(|e: flowgate::ValidationError| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let identifier = resolve_identifier(&headers, &params, peer);
    let decision = st.limiter.check(kind, &identifier).await;
    Ok(decision_response(&identifier, &decision))
}

async fn reset(
    State(st): State<AppState>,
    Path((algorithm, identifier)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, String)> {
    let kind: AlgorithmKind = algorithm
        .parse()
        .map_err(|e: flowgate::ValidationError| (StatusCode::BAD_REQUEST, e.to_string()))?;
    st.limiter.reset(kind, &identifier).await;
    Ok(StatusCode::NO_CONTENT)
}

/// The interceptor role: admit or reject before the inner handler runs.
async fn limit_middleware(
    State(st): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = resolve_identifier(request.headers(), &params, peer);
    let decision = st.limiter.check(st.demo_kind, &identifier).await;
    if !decision.admitted() {
        let body = Json(serde_json::json!({ "error": "rate limit exceeded" }));
        return (
            StatusCode::TOO_MANY_REQUESTS,
            rate_limit_headers(&decision),
            body,
        )
            .into_response();
    }
    next.run(request).await
}

async fn demo() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "request admitted" }))
}

// ------------------------------ Config ------------------------------

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Strategy defaults, overridable per deployment.
fn defaults_from_env() -> anyhow::Result<StrategyConfig> {
    let config = StrategyConfig::new()
        .capacity(env_parsed("FLOWGATE_CAPACITY", 10))?
        .refill_rate(env_parsed("FLOWGATE_REFILL_RATE", 1.0))?
        .leak_rate(env_parsed("FLOWGATE_LEAK_RATE", 1.0))?
        .limit(env_parsed("FLOWGATE_LIMIT", 10))?
        .window_size(env_parsed("FLOWGATE_WINDOW_SECS", 60))?;
    Ok(config)
}

// ------------------------------ Main ------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "flowgate=info,tower_http=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    info!("starting flowgate API server");

    let addr: SocketAddr = std::env::var("FLOWGATE_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".into());
    let kvs_timeout = Duration::from_millis(env_parsed("FLOWGATE_KVS_TIMEOUT_MS", 2_000));
    let executor = Arc::new(ScriptExecutor::with_timeout(&redis_url, kvs_timeout)?);

    let defaults = defaults_from_env()?;
    let limiter = Arc::new(Limiter::new(executor, defaults));

    let demo_kind: AlgorithmKind = std::env::var("FLOWGATE_DEMO_ALGORITHM")
        .unwrap_or_else(|_| "token_bucket".into())
        .parse()?;
    info!("demo route guarded by {}", limiter.describe(demo_kind));

    let allowed_origins =
        std::env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".into());
    let cors = if allowed_origins == "*" {
        warn!("CORS set to permissive mode (*); not for production");
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        info!("CORS configured for origins: {:?}", origins);
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("x-client-id"),
            ])
    };

    let state = AppState { limiter, demo_kind };

    let app = Router::new()
        .route("/v1/health", get(health))
        .route("/v1/version", get(version))
        .route("/v1/check/:algorithm", post(check))
        .route("/v1/limits/:algorithm/:identifier", delete(reset))
        .route(
            "/v1/demo",
            get(demo).layer(middleware::from_fn_with_state(
                state.clone(),
                limit_middleware,
            )),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Anything that escapes a handler becomes a constant 500; internals
        // never reach the client.
        .layer(CatchPanicLayer::new());

    info!("flowgate API listening on http://{addr}");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_reset_hint_emits_no_reset_header() {
        // Fail-open decisions carry no reset hint by construction.
        let d = fail_open_decision();
        let headers = rate_limit_headers(&d);
        assert!(headers.get("x-ratelimit-reset").is_none());
        assert_eq!(
            headers.get("x-ratelimit-algorithm").unwrap().to_str().unwrap(),
            "token_bucket"
        );
        assert_eq!(
            headers.get("x-ratelimit-limit").unwrap().to_str().unwrap(),
            i64::MAX.to_string()
        );
    }

    fn fail_open_decision() -> Decision {
        // An unreachable executor makes the limiter fail open, which is the
        // only way to obtain a hint-free decision from outside the crate.
        let executor = Arc::new(
            ScriptExecutor::with_timeout("redis://127.0.0.1:9/", Duration::from_millis(200))
                .unwrap(),
        );
        let limiter = Limiter::new(executor, StrategyConfig::default());
        tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(limiter.check(AlgorithmKind::TokenBucket, "header-test"))
    }

    #[test]
    fn identifier_prefers_header_then_query_then_peer() {
        let peer: SocketAddr = "10.1.2.3:55555".parse().unwrap();
        let mut headers = HeaderMap::new();
        let mut params = HashMap::new();

        assert_eq!(resolve_identifier(&headers, &params, peer), "10.1.2.3");

        params.insert("id".to_string(), "query-id".to_string());
        assert_eq!(resolve_identifier(&headers, &params, peer), "query-id");

        headers.insert("x-client-id", HeaderValue::from_static("header-id"));
        assert_eq!(resolve_identifier(&headers, &params, peer), "header-id");
    }
}
