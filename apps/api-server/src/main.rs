//! api-server — HTTP API for the URL Shortener workspace.
//!
//! Provides shortening, listing, analytics and redirect endpoints over the
//! link service in `domain`:
//! - `POST /api/shorten`: create a link (random code or custom alias).
//! - `GET /api/links`: every stored link with click counts.
//! - `GET /api/links/:code`: analytics for one live link.
//! - `GET /:code`: record a click and redirect (302).
//!
//! Storage is in-memory (default) or SQLite when the `sqlite` feature is
//! enabled and `STORAGE_PROVIDER=sqlite`. Every route is rate limited per
//! client IP.
//!
//! Run:
//! ```bash
//! # pretty logs (default); LISTEN_ADDR optional
//! cargo run -p api-server
//!
//! # persistent storage, JSON logs
//! STORAGE_PROVIDER=sqlite DB_PATH=./data/links.db LOG_FORMAT=json \
//!   cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.
//!

mod config;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use domain::adapters::memory_repo::InMemoryStore;
use domain::service::{build_link_details, short_url, LinkService};
use domain::shortcode::RandomCodeGenerator;
use domain::{
    AnalyticsStore, ClickInput, Code, CoreError, LinkDetails, LinkOverview, ShortenRequest,
    SystemClock,
};
use geoip::GeoLookup;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use qrcode::render::svg;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Service = LinkService<Arc<dyn AnalyticsStore>, RandomCodeGenerator, SystemClock>;

#[derive(Clone)]
struct AppState {
    links: Arc<Service>,
    geo: Arc<GeoLookup>,
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
    base_url: Arc<str>,
}

impl AppState {
    fn new(
        store: Arc<dyn AnalyticsStore>,
        geo: GeoLookup,
        base_url: &str,
        per_minute: NonZeroU32,
    ) -> Self {
        Self {
            links: Arc::new(LinkService::new(store, RandomCodeGenerator, SystemClock)),
            geo: Arc::new(geo),
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            base_url: Arc::from(base_url.trim_end_matches('/')),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_ephemeral();

    if let Err(e) = run(cfg).await {
        error!(err = %e, "api-server stopped");
        std::process::exit(1);
    }
}

async fn run(cfg: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = build_store(&cfg)?;
    let geo = GeoLookup::new(cfg.geoip_endpoint.clone())?;
    info!(endpoint = %geo.endpoint(), "geo lookup configured");
    let state = AppState::new(store, geo, &cfg.base_url, cfg.rate_limit_per_minute);

    // Forget idle rate limit keys and stale geo answers once a minute
    let limiter = state.limiter.clone();
    let geo_cache = state.geo.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            limiter.retain_recent();
            geo_cache.purge_expired();
        }
    });

    let app = build_router(state, cors_layer(&cfg.cors_allow_origin));

    info!(addr = %cfg.listen_addr, base_url = %cfg.base_url, "api-server listening");
    let listener = tokio::net::TcpListener::bind(cfg.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(err = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

// Construct the store selected by config and feature flags.
fn build_store(cfg: &config::Config) -> Result<Arc<dyn AnalyticsStore>, domain::StoreError> {
    match cfg.storage_provider {
        #[cfg(feature = "sqlite")]
        config::StorageProvider::Sqlite => {
            let store = sqlite_adapter::SqliteStore::new(&cfg.db_path)?;
            info!(path = %cfg.db_path.display(), "using sqlite store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        config::StorageProvider::Sqlite => {
            warn!("STORAGE_PROVIDER=sqlite but the sqlite feature is disabled; using memory");
            Ok(Arc::new(InMemoryStore::new()))
        }
        config::StorageProvider::Memory => {
            info!("using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

fn cors_layer(allow_origin: &HeaderValue) -> CorsLayer {
    if *allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([allow_origin.clone()]))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    }
}

fn build_router(state: AppState, cors: CorsLayer) -> Router {
    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    Router::new()
        .route("/api/shorten", post(shorten))
        .route("/api/links", get(list_links))
        .route("/api/links/:code", get(link_details))
        .route("/:code", get(redirect))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

// ---- Middleware ----

async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let ip = http_common::client_ip(req.headers(), peer);
    if state.limiter.check_key(&ip).is_err() {
        warn!(ip = %ip, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(http_common::json_err("rate_limited")),
        )
            .into_response();
    }
    next.run(req).await
}

// ---- DTOs ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShortenReq {
    url: String,
    #[serde(default)]
    custom_alias: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShortenOut {
    code: String,
    short_url: String,
    original_url: String,
    expires_at: Option<String>,
    qr_code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkOverviewOut {
    code: String,
    original_url: String,
    created_at: String,
    expires_at: Option<String>,
    total_clicks: usize,
    unique_visitors: usize,
}

impl From<LinkOverview> for LinkOverviewOut {
    fn from(o: LinkOverview) -> Self {
        Self {
            code: o.code.as_str().to_string(),
            original_url: o.original_url,
            created_at: http_common::system_time_to_rfc3339(o.created_at),
            expires_at: o.expires_at.map(http_common::system_time_to_rfc3339),
            total_clicks: o.total_clicks,
            unique_visitors: o.unique_visitors,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkDetailsOut {
    code: String,
    short_url: String,
    original_url: String,
    created_at: String,
    expires_at: Option<String>,
    total_clicks: usize,
    unique_visitors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_accessed: Option<String>,
    country_counts: BTreeMap<String, usize>,
    qr_code: String,
}

impl LinkDetailsOut {
    fn new(d: LinkDetails, qr_code: String) -> Self {
        Self {
            code: d.code.as_str().to_string(),
            short_url: d.short_url,
            original_url: d.original_url,
            created_at: http_common::system_time_to_rfc3339(d.created_at),
            expires_at: d.expires_at.map(http_common::system_time_to_rfc3339),
            total_clicks: d.total_clicks,
            unique_visitors: d.unique_visitors,
            last_accessed: d.last_accessed.map(http_common::system_time_to_rfc3339),
            country_counts: d.country_counts,
            qr_code,
        }
    }
}

// ---- Handlers ----

async fn shorten(
    State(state): State<AppState>,
    body: Result<Json<ShortenReq>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rej) => {
            warn!(err = %rej, "shorten: bad payload");
            return error_response(StatusCode::BAD_REQUEST, "bad_request", "invalid JSON payload");
        }
    };

    let expires_at = match body.expires_at.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match http_common::parse_rfc3339(raw) {
            Ok(t) => Some(t),
            Err(_) => {
                // URL and alias problems are reported ahead of a malformed expiry
                if let Err(e) = state
                    .links
                    .check_url_and_alias(&body.url, body.custom_alias.as_deref())
                {
                    return core_error_response(&e);
                }
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_expiry",
                    "expiresAt must be RFC3339 timestamp",
                );
            }
        },
    };

    let request = ShortenRequest {
        original_url: body.url,
        custom_alias: body.custom_alias,
        expires_at,
    };
    let link = match state.links.create(request) {
        Ok(link) => link,
        Err(e) => return core_error_response(&e),
    };

    let short = short_url(&state.base_url, &link.code);
    let qr_code = match qr_data_url(&short) {
        Ok(qr) => qr,
        Err(e) => {
            error!(code = %link.code, err = %e, "qr render failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "failed to generate QR code",
            );
        }
    };
    info!(code = %link.code, short_url = %short, "shorten ok");
    (
        StatusCode::CREATED,
        Json(ShortenOut {
            code: link.code.as_str().to_string(),
            short_url: short,
            original_url: link.original_url,
            expires_at: link.expires_at.map(http_common::system_time_to_rfc3339),
            qr_code,
        }),
    )
        .into_response()
}

async fn list_links(State(state): State<AppState>) -> Response {
    match state.links.list() {
        Ok(items) => {
            let out: Vec<LinkOverviewOut> = items.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(out)).into_response()
        }
        Err(e) => core_error_response(&e),
    }
}

async fn link_details(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    let Ok(code) = Code::new(code) else {
        return (StatusCode::NOT_FOUND, Json(http_common::json_err("not_found"))).into_response();
    };
    let link = match state.links.lookup(&code) {
        Ok(link) => link,
        Err(e) => return core_error_response(&e),
    };
    let details = build_link_details(&link, &state.base_url);
    match qr_data_url(&details.short_url) {
        Ok(qr) => (StatusCode::OK, Json(LinkDetailsOut::new(details, qr))).into_response(),
        Err(e) => {
            error!(code = %code, err = %e, "qr render failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "failed to build link response",
            )
        }
    }
}

async fn redirect(
    State(state): State<AppState>,
    Path(code): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let Ok(code) = Code::new(code) else {
        return (StatusCode::NOT_FOUND, Json(http_common::json_err("not_found"))).into_response();
    };
    let link = match state.links.lookup(&code) {
        Ok(link) => link,
        Err(e) => return core_error_response(&e),
    };

    let ip = http_common::client_ip(&headers, peer.map(|ci| ci.0));
    let country = state.geo.country_for(&ip).await;
    let click = ClickInput {
        ip,
        country,
        user_agent: http_common::user_agent(&headers),
    };
    // The visitor still gets redirected when the click cannot be stored.
    match state.links.record_visit(&code, click) {
        Ok(updated) => {
            info!(code = %code, clicks = updated.total_clicks(), "redirect");
        }
        Err(CoreError::NotFound | CoreError::Expired) => {}
        Err(e) => {
            error!(code = %code, err = %e, "failed to record click");
        }
    }
    (StatusCode::FOUND, [(header::LOCATION, link.original_url)]).into_response()
}

// ---- Helpers ----

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(http_common::json_error_with_message(code, message)),
    )
        .into_response()
}

fn core_error_response(e: &CoreError) -> Response {
    let message = e.to_string();
    match e {
        CoreError::InvalidUrl(_) => error_response(StatusCode::BAD_REQUEST, "invalid_url", &message),
        CoreError::InvalidCode(_) | CoreError::InvalidAlias => {
            error_response(StatusCode::BAD_REQUEST, "invalid_alias", &message)
        }
        CoreError::InvalidExpiry(_) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_expiry", &message)
        }
        CoreError::CodeExists | CoreError::AliasInUse => {
            error_response(StatusCode::BAD_REQUEST, "conflict", &message)
        }
        CoreError::NotFound => {
            (StatusCode::NOT_FOUND, Json(http_common::json_err("not_found"))).into_response()
        }
        CoreError::Expired => {
            (StatusCode::GONE, Json(http_common::json_err("expired"))).into_response()
        }
        CoreError::GenerationExhausted(_) | CoreError::Generation(_) | CoreError::Storage(_) => {
            error!(err = %e, "request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", &message)
        }
    }
}

/// Render `content` as an SVG QR code wrapped in a base64 data URL.
fn qr_data_url(content: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(content.as_bytes())?;
    let svg_string = code
        .render()
        .min_dimensions(200, 200)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    let encoded = base64::engine::general_purpose::STANDARD.encode(svg_string);
    Ok(format!("data:image/svg+xml;base64,{encoded}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use domain::{Link, LinkStore};
    use std::time::UNIX_EPOCH;
    use tower::util::ServiceExt;

    const BASE: &str = "http://sho.rt";

    /// Router over a fresh in-memory store. Geo lookups go to a closed local
    /// port so every click lands in "Unknown".
    async fn app_with_limit(per_minute: u32) -> (Router, Arc<InMemoryStore>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed = listener.local_addr().unwrap();
        drop(listener);

        let store = Arc::new(InMemoryStore::new());
        let geo = GeoLookup::new(format!("http://{closed}/%s")).unwrap();
        let state = AppState::new(
            store.clone(),
            geo,
            BASE,
            NonZeroU32::new(per_minute).unwrap(),
        );
        (build_router(state, CorsLayer::permissive()), store)
    }

    async fn app() -> (Router, Arc<InMemoryStore>) {
        app_with_limit(1_000).await
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, serde_json::Value) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, headers, json)
    }

    fn post_shorten(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/shorten")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn visit(uri: &str, ip: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", ip)
            .header(header::USER_AGENT, "test-agent")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn shorten_redirect_and_details_flow() {
        let (router, _store) = app().await;

        let (status, _, body) = send(
            &router,
            post_shorten(r#"{"url":"https://example.com/x","customAlias":"promo1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["code"], "promo1");
        assert_eq!(body["shortUrl"], "http://sho.rt/promo1");
        assert_eq!(body["originalUrl"], "https://example.com/x");
        assert!(body["expiresAt"].is_string());
        assert!(body["qrCode"]
            .as_str()
            .unwrap()
            .starts_with("data:image/svg+xml;base64,"));

        for ip in ["1.2.3.4", "1.2.3.4", "5.6.7.8"] {
            let (status, headers, _) = send(&router, visit("/promo1", ip)).await;
            assert_eq!(status, StatusCode::FOUND);
            assert_eq!(headers.get(header::LOCATION).unwrap(), "https://example.com/x");
        }

        let (status, _, body) = send(&router, get("/api/links/promo1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalClicks"], 3);
        assert_eq!(body["uniqueVisitors"], 2);
        assert_eq!(body["countryCounts"]["Unknown"], 3);
        assert!(body["lastAccessed"].is_string());
        assert_eq!(body["shortUrl"], "http://sho.rt/promo1");
    }

    #[tokio::test]
    async fn random_code_when_no_alias() {
        let (router, _store) = app().await;
        let (status, _, body) =
            send(&router, post_shorten(r#"{"url":"https://example.com"}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        let code = body["code"].as_str().unwrap();
        assert!((6..=8).contains(&code.len()));
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn details_without_clicks_omit_last_accessed() {
        let (router, _store) = app().await;
        send(
            &router,
            post_shorten(r#"{"url":"https://example.com","customAlias":"quiet"}"#),
        )
        .await;
        let (status, _, body) = send(&router, get("/api/links/quiet")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalClicks"], 0);
        assert!(body.get("lastAccessed").is_none());
        assert_eq!(body["countryCounts"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn shorten_rejects_bad_input() {
        let (router, _store) = app().await;

        let (status, _, body) = send(&router, post_shorten("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");

        let (status, _, body) =
            send(&router, post_shorten(r#"{"url":"ftp://example.com"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_url");

        let (status, _, body) = send(
            &router,
            post_shorten(r#"{"url":"https://example.com","customAlias":"a!"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_alias");

        let (status, _, body) = send(
            &router,
            post_shorten(r#"{"url":"https://example.com","expiresAt":"next week"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_expiry");

        let (status, _, body) = send(
            &router,
            post_shorten(r#"{"url":"https://example.com","expiresAt":"2001-01-01T00:00:00Z"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_expiry");
    }

    #[tokio::test]
    async fn malformed_expiry_is_reported_after_url_and_alias() {
        let (router, _store) = app().await;
        let (status, _, body) = send(
            &router,
            post_shorten(r#"{"url":"notaurl","customAlias":"a!","expiresAt":"soon"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_url");

        let (_, _, body) = send(
            &router,
            post_shorten(r#"{"url":"https://example.com","customAlias":"a!","expiresAt":"soon"}"#),
        )
        .await;
        assert_eq!(body["error"]["code"], "invalid_alias");

        let (status, _, _) = send(
            &router,
            post_shorten(r#"{"url":"https://example.com","customAlias":"taken"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, _, body) = send(
            &router,
            post_shorten(r#"{"url":"https://example.com","customAlias":"taken","expiresAt":"soon"}"#),
        )
        .await;
        assert_eq!(body["error"]["code"], "conflict");

        let (_, _, body) = send(
            &router,
            post_shorten(r#"{"url":"https://example.com","customAlias":"fresh","expiresAt":"soon"}"#),
        )
        .await;
        assert_eq!(body["error"]["code"], "invalid_expiry");
        assert_eq!(body["error"]["message"], "expiresAt must be RFC3339 timestamp");
        // Nothing was stored for the rejected request
        let (status, _, _) = send(&router, get("/api/links/fresh")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_alias_is_rejected() {
        let (router, _store) = app().await;
        let req = r#"{"url":"https://example.com","customAlias":"dup"}"#;
        let (status, _, _) = send(&router, post_shorten(req)).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _, body) = send(&router, post_shorten(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "conflict");
    }

    #[tokio::test]
    async fn unknown_code_is_404() {
        let (router, _store) = app().await;
        let (status, _, body) = send(&router, get("/nope42")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
        let (status, _, _) = send(&router, get("/api/links/nope42")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(&router, get("/bad.code")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn expired_link_is_gone_and_not_counted() {
        let (router, store) = app().await;
        let past = UNIX_EPOCH + Duration::from_secs(1_000);
        store
            .save(Link::new(
                Code::new("old").unwrap(),
                "https://example.com/old".into(),
                UNIX_EPOCH,
                Some(past),
            ))
            .unwrap();

        let (status, _, body) = send(&router, visit("/old", "1.2.3.4")).await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["error"]["code"], "expired");
        let (status, _, _) = send(&router, get("/api/links/old")).await;
        assert_eq!(status, StatusCode::GONE);

        let stored = store.get(&Code::new("old").unwrap()).unwrap().unwrap();
        assert_eq!(stored.total_clicks(), 0);
    }

    #[tokio::test]
    async fn expired_alias_stays_reserved_for_custom_requests() {
        let (router, store) = app().await;
        store
            .save(Link::new(
                Code::new("again").unwrap(),
                "https://example.com/old".into(),
                UNIX_EPOCH,
                Some(UNIX_EPOCH + Duration::from_secs(1)),
            ))
            .unwrap();
        // Still listed, with its original target
        let (_, _, list) = send(&router, get("/api/links")).await;
        assert_eq!(list[0]["originalUrl"], "https://example.com/old");

        // The alias check runs against stored codes, expired or not
        let (status, _, body) = send(
            &router,
            post_shorten(r#"{"url":"https://example.com/new","customAlias":"again"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "conflict");
    }

    #[tokio::test]
    async fn list_is_newest_first_with_counts() {
        let (router, _store) = app().await;
        for alias in ["first", "second"] {
            let body = format!(r#"{{"url":"https://example.com/{alias}","customAlias":"{alias}"}}"#);
            let (status, _, _) = send(&router, post_shorten(&body)).await;
            assert_eq!(status, StatusCode::CREATED);
            // created_at must differ for a stable order
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        send(&router, visit("/first", "9.9.9.9")).await;

        let (status, _, body) = send(&router, get("/api/links")).await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["code"], "second");
        assert_eq!(items[1]["code"], "first");
        assert_eq!(items[1]["totalClicks"], 1);
        assert_eq!(items[1]["uniqueVisitors"], 1);
        assert!(items[0]["createdAt"].is_string());
    }

    #[tokio::test]
    async fn rate_limit_is_per_client() {
        let (router, _store) = app_with_limit(2).await;
        for _ in 0..2 {
            let (status, _, _) = send(&router, visit("/api/links", "1.1.1.1")).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _, body) = send(&router, visit("/api/links", "1.1.1.1")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "rate_limited");

        let (status, _, _) = send(&router, visit("/api/links", "2.2.2.2")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn qr_data_url_is_svg() {
        let url = qr_data_url("http://sho.rt/promo1").unwrap();
        let payload = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        let svg = String::from_utf8(svg).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn overview_dto_uses_rfc3339() {
        let out = LinkOverviewOut::from(LinkOverview {
            code: Code::new("abc123").unwrap(),
            original_url: "https://example.com".into(),
            created_at: UNIX_EPOCH + Duration::from_secs(1_704_164_645),
            expires_at: None,
            total_clicks: 0,
            unique_visitors: 0,
        });
        let json = serde_json::to_value(out).unwrap();
        assert_eq!(json["createdAt"], "2024-01-02T03:04:05Z");
        assert!(json["expiresAt"].is_null());
    }
}
