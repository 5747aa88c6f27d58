mod abuse;
mod access;
mod auth;
mod breaker;
mod config;
mod gateway;
#[cfg(feature = "metrics")]
mod metrics;
mod presence;
mod ratelimit;
mod store;

const REQUEST_ID_HEADER: &str = "x-request-id";
const CONTENT_SECURITY_POLICY: &str =
    "default-src 'none'; frame-ancestors 'none'; base-uri 'none'; form-action 'self'";
const REFERRER_POLICY: &str = "no-referrer";
const X_CONTENT_TYPE_OPTIONS: &str = "nosniff";
const X_FRAME_OPTIONS: &str = "DENY";

use std::{
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use anyhow::Result;
#[cfg(feature = "metrics")]
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
};
use axum::{
    extract::State,
    http::{header::HeaderName, HeaderValue},
    routing::{delete, get, post},
    Json, Router,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    propagate_header::PropagateHeaderLayer,
    request_id::{MakeRequestUuid, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use ch4tgate_storage::{connect, PgPool};

use crate::{
    auth::TokenKeyring,
    config::{CliOverrides, GatewayConfig, LogFormat},
    gateway::GatewayService,
    presence::PresenceTracker,
    store::{DurableStore, InMemoryStore, MessageStore},
};
#[cfg(feature = "metrics")]
use crate::metrics::MetricsContext;

#[derive(Clone)]
struct StorageState {
    status: StorageStatus,
    pool: Option<PgPool>,
}

#[derive(Clone)]
enum StorageStatus {
    Unconfigured,
    Connected,
    Error(String),
}

impl StorageState {
    fn unconfigured() -> Self {
        Self {
            status: StorageStatus::Unconfigured,
            pool: None,
        }
    }

    fn connected_with_pool(pool: PgPool) -> Self {
        Self {
            status: StorageStatus::Connected,
            pool: Some(pool),
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: StorageStatus::Error(message),
            pool: None,
        }
    }

    fn component(&self) -> ComponentStatus {
        match &self.status {
            StorageStatus::Unconfigured => ComponentStatus {
                name: "database",
                status: "pending",
                details: Some("database_url not configured; messages are ephemeral".to_string()),
            },
            StorageStatus::Connected => ComponentStatus {
                name: "database",
                status: "configured",
                details: Some("connection established".to_string()),
            },
            StorageStatus::Error(message) => ComponentStatus {
                name: "database",
                status: "error",
                details: Some(message.clone()),
            },
        }
    }

    fn readiness_status(&self) -> &'static str {
        match self.status {
            StorageStatus::Connected => "ready",
            StorageStatus::Unconfigured | StorageStatus::Error(_) => "degraded",
        }
    }

    fn pool(&self) -> Option<PgPool> {
        self.pool.clone()
    }
}

#[derive(Parser, Debug, Default)]
#[command(name = "ch4tgate-server", version, about = "ch4tgate chat gateway")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Args, Debug, Default, Clone)]
struct ConfigArgs {
    #[arg(long)]
    bind_addr: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    metrics_enabled: Option<bool>,
    #[arg(long)]
    metrics_bind_addr: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    admin_token: Option<String>,
    #[arg(long)]
    allow_anon_public: Option<bool>,
    #[arg(long)]
    signing_key: Option<String>,
    #[arg(long)]
    rate_refill_per_sec: Option<f64>,
    #[arg(long)]
    rate_burst: Option<f64>,
    #[arg(long)]
    flood_count: Option<usize>,
    #[arg(long)]
    flood_window_ms: Option<i64>,
    #[arg(long)]
    duplicate_count: Option<usize>,
    #[arg(long)]
    duplicate_window_ms: Option<i64>,
    #[arg(long)]
    hourly_limit: Option<i64>,
}

impl ConfigArgs {
    fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            bind_addr: self.bind_addr,
            host: self.host,
            port: self.port,
            log_format: self.log_format,
            metrics_enabled: self.metrics_enabled,
            metrics_bind_addr: self.metrics_bind_addr,
            database_url: self.database_url,
            admin_token: self.admin_token,
            allow_anon_public: self.allow_anon_public,
            signing_key: self.signing_key,
            rate_refill_per_sec: self.rate_refill_per_sec,
            rate_burst: self.rate_burst,
            flood_count: self.flood_count,
            flood_window_ms: self.flood_window_ms,
            duplicate_count: self.duplicate_count,
            duplicate_window_ms: self.duplicate_window_ms,
            hourly_limit: self.hourly_limit,
        }
    }
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Mint a bearer token for a nickname using the configured signing key.
    MintToken(MintTokenCommand),
}

#[derive(Args, Debug)]
struct MintTokenCommand {
    /// Nickname embedded in the token.
    #[arg(long)]
    nick: String,
    /// Token lifetime in hours.
    #[arg(long, default_value_t = 720)]
    ttl_hours: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = cli.config.clone().into_overrides();
    let mut config = GatewayConfig::load()?;
    config.apply_overrides(&overrides)?;

    if let Some(command) = cli.command {
        return run_command(&config, command);
    }

    let config = Arc::new(config);
    run(config).await
}

fn run_command(config: &GatewayConfig, command: CliCommand) -> Result<()> {
    match command {
        CliCommand::MintToken(cmd) => mint_token(config, cmd),
    }
}

fn mint_token(config: &GatewayConfig, cmd: MintTokenCommand) -> Result<()> {
    let nick = cmd.nick.trim();
    if nick.is_empty() {
        anyhow::bail!("nick must be provided");
    }
    if config.auth.signing_key.is_none() {
        anyhow::bail!("auth.signing_key must be configured; an ephemeral key would not outlive this command");
    }

    let keyring = TokenKeyring::from_config(&config.auth)?;
    let token = keyring.mint(nick, chrono::Duration::hours(cmd.ttl_hours))?;
    println!("{token}");
    Ok(())
}

async fn run(config: Arc<GatewayConfig>) -> Result<()> {
    init_tracing(&config);

    let env_override_keys = GatewayConfig::environment_override_keys();
    if env_override_keys.is_empty() {
        info!("no CH4TGATE environment overrides detected");
    } else {
        info!(keys = ?env_override_keys, "detected CH4TGATE environment overrides");
    }

    info!(
        bind_addr = ?config.bind_addr,
        host = %config.host,
        port = config.port,
        log_format = ?config.log_format,
        metrics_enabled = config.metrics.enabled,
        database_url_configured = config.database_url.is_some(),
        admin_token_configured = config.admin_token.is_some(),
        allow_anon_public = config.allow_anon_public,
        hard_delete_enabled = config.hard_delete_enabled,
        purge_enabled = config.purge_enabled,
        rate_refill_per_sec = config.abuse.rate_refill_per_sec,
        rate_burst = config.abuse.rate_burst,
        flood_count = config.abuse.flood_count,
        flood_window_ms = config.abuse.flood_window_ms,
        duplicate_count = config.abuse.duplicate_count,
        duplicate_window_ms = config.abuse.duplicate_window_ms,
        hourly_limit = config.abuse.hourly_limit,
        "resolved gateway configuration"
    );

    let storage = match config.database_url.as_deref() {
        Some(url) => match connect(url).await {
            Ok(pool) => {
                info!("database connection established");
                StorageState::connected_with_pool(pool)
            }
            Err(err) => {
                error!(?err, "failed to establish database connection");
                StorageState::error(err.to_string())
            }
        },
        None => StorageState::unconfigured(),
    };

    let keyring = Arc::new(TokenKeyring::from_config(&config.auth)?);
    if config.auth.signing_key.is_some() {
        info!(
            verifying_key = %keyring.verifying_key_base64(),
            "token signing key loaded from configuration"
        );
    } else {
        info!(
            verifying_key = %keyring.verifying_key_base64(),
            "no token signing key supplied; generated ephemeral key"
        );
    }

    let store: Arc<dyn MessageStore> = match storage.pool() {
        Some(pool) => Arc::new(DurableStore::new(pool)),
        None => {
            info!("no database configured; using in-memory message store");
            Arc::new(InMemoryStore::new())
        }
    };

    let gateway_service = Arc::new(GatewayService::new(store, &config));
    gateway_service.hydrate().await;

    #[cfg(feature = "metrics")]
    let metrics_ctx = if config.metrics.enabled {
        Some(MetricsContext::init()?)
    } else {
        None
    };

    #[cfg_attr(not(feature = "metrics"), allow(unused_mut))]
    let mut state = AppState::new(config.clone(), storage, gateway_service, keyring);
    #[cfg(feature = "metrics")]
    {
        state = state.with_metrics(metrics_ctx.clone());
    }

    #[cfg(feature = "metrics")]
    {
        if config.metrics.enabled {
            if let Some(bind_addr) = &config.metrics.bind_addr {
                let metrics_addr: SocketAddr = bind_addr
                    .parse()
                    .map_err(|_| anyhow::anyhow!("failed to parse metrics bind addr"))?;
                let metrics_state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_metrics(metrics_addr, metrics_state).await {
                        error!(?err, "metrics server terminated unexpectedly");
                    }
                });
            }
        }
    }

    let app = build_app(state);

    let addr: SocketAddr = config.listener_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Clone)]
struct AppState {
    started_at: Instant,
    config: Arc<GatewayConfig>,
    storage: StorageState,
    gateway: Arc<GatewayService>,
    keyring: Arc<TokenKeyring>,
    presence: Arc<PresenceTracker>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<MetricsContext>>,
}

impl AppState {
    fn new(
        config: Arc<GatewayConfig>,
        storage: StorageState,
        gateway: Arc<GatewayService>,
        keyring: Arc<TokenKeyring>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            config,
            storage,
            gateway,
            keyring,
            presence: Arc::new(PresenceTracker::new()),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    fn with_metrics(mut self, metrics: Option<Arc<MetricsContext>>) -> Self {
        self.metrics = metrics;
        self
    }

    fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub(crate) fn gateway(&self) -> Arc<GatewayService> {
        self.gateway.clone()
    }

    pub(crate) fn keyring(&self) -> Arc<TokenKeyring> {
        self.keyring.clone()
    }

    pub(crate) fn presence(&self) -> Arc<PresenceTracker> {
        self.presence.clone()
    }

    pub(crate) fn admin_token(&self) -> Option<String> {
        self.config.admin_token.clone()
    }

    pub(crate) fn hard_delete_enabled(&self) -> bool {
        self.config.hard_delete_enabled
    }

    pub(crate) fn purge_enabled(&self) -> bool {
        self.config.purge_enabled
    }

    pub(crate) fn record_http_request(&self, route: &str, status: u16) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            let status = status.to_string();
            metrics
                .http_requests_total
                .with_label_values(&[route, status.as_str()])
                .inc();
        }
        #[cfg(not(feature = "metrics"))]
        {
            let _ = (route, status);
        }
    }

    pub(crate) fn record_gateway_rejection(&self, reason: &str) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics
                .gateway_rejections_total
                .with_label_values(&[reason])
                .inc();
        }
        #[cfg(not(feature = "metrics"))]
        {
            let _ = reason;
        }
    }

    fn database_component(&self) -> ComponentStatus {
        self.storage.component()
    }
}

async fn health(State(state): State<AppState>) -> &'static str {
    state.record_http_request("health", 200);
    "ok"
}

#[derive(Serialize)]
struct ReadinessResponse {
    status: &'static str,
    uptime_seconds: u64,
    components: Vec<ComponentStatus>,
}

#[derive(Serialize)]
struct ComponentStatus {
    name: &'static str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

async fn readiness(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let gateway_component = ComponentStatus {
        name: "gateway",
        status: if state.gateway().is_locked().await {
            "locked"
        } else {
            "open"
        },
        details: None,
    };
    let components = vec![state.database_component(), gateway_component];
    let status = state.storage.readiness_status();
    state.record_http_request("ready", 200);

    Json(ReadinessResponse {
        status,
        uptime_seconds: state.uptime_seconds(),
        components,
    })
}

#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
}

async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    state.record_http_request("version", 200);
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn build_app(state: AppState) -> Router {
    #[cfg(feature = "metrics")]
    let expose_metrics_here = state.config.metrics.enabled && state.config.metrics.bind_addr.is_none();

    #[cfg_attr(not(feature = "metrics"), allow(unused_mut))]
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/ready", get(readiness))
        .route("/version", get(version))
        .route(
            "/messages",
            get(gateway::list_messages).post(gateway::post_message),
        )
        .route("/messages/{id}", delete(gateway::delete_message))
        .route("/admin/messages/{id}", get(gateway::audit_message))
        .route("/admin/lock", post(gateway::lock_all))
        .route("/admin/unlock", post(gateway::unlock_all))
        .route("/admin/channels/{channel}", delete(gateway::clear_channel))
        .route(
            "/presence",
            get(presence::counts).post(presence::heartbeat),
        );

    #[cfg(feature = "metrics")]
    {
        if expose_metrics_here {
            router = router.route("/metrics", get(metrics_handler));
        }
    }

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    let instrumentation = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("content-security-policy"),
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static(REFERRER_POLICY),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static(X_CONTENT_TYPE_OPTIONS),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static(X_FRAME_OPTIONS),
        ))
        .layer(PropagateHeaderLayer::new(request_id_header.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(CorsLayer::permissive())
        .into_inner();

    router.layer(instrumentation).with_state(state)
}

fn init_tracing(config: &GatewayConfig) {
    // Respect RUST_LOG if set, otherwise default to info for our crates.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ch4tgate_server=info,ch4tgate=info"));

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> =
        if matches!(config.log_format(), LogFormat::Json) {
            Box::new(
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json()),
            )
        } else {
            Box::new(
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer()),
            )
        };

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(?e, "failed to install Ctrl+C handler");
    }
    info!("shutdown signal received");
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let Some(metrics) = state.metrics.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(?err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(feature = "metrics")]
async fn serve_metrics(bind_addr: SocketAddr, state: AppState) -> Result<()> {
    let router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state);
    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;
    info!("metrics listening on {addr}");
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt; // for `oneshot`

    fn test_state(config: GatewayConfig) -> AppState {
        let config = Arc::new(config);
        let store: Arc<dyn MessageStore> = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(GatewayService::new(store, &config));
        let keyring = Arc::new(TokenKeyring::from_config(&config.auth).expect("keyring"));
        AppState::new(config, StorageState::unconfigured(), gateway, keyring)
    }

    fn default_app() -> Router {
        build_app(test_state(GatewayConfig::default()))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_endpoint_responds_ok() {
        let response = default_app()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn version_reports_the_cargo_package_version() {
        let response = default_app()
            .oneshot(Request::get("/version").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn readiness_reports_degraded_without_a_database() {
        let response = default_app()
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["components"][1]["name"], "gateway");
        assert_eq!(body["components"][1]["status"], "open");
    }

    #[tokio::test]
    async fn post_and_read_a_public_message() {
        let app = default_app();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/messages",
                json!({"channel": "#wtf", "author": "anon", "text": "hello world"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let posted = body_json(response).await;
        assert!(posted["id"].is_string());

        let response = app
            .oneshot(
                Request::get("/messages?channel=%23wtf")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let listed = body_json(response).await;
        let list = listed.as_array().expect("array");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["author"], "anon");
        assert_eq!(list[0]["from"], "anon");
        assert_eq!(list[0]["channel"], "wtf");
        assert_eq!(list[0]["text"], "hello world");
    }

    #[tokio::test]
    async fn blank_text_is_rejected_with_400() {
        let response = default_app()
            .oneshot(json_request(
                "POST",
                "/messages",
                json!({"channel": "#wtf", "text": "   "}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "text_required");
    }

    #[tokio::test]
    async fn unparseable_bodies_are_rejected_as_invalid_json() {
        let response = default_app()
            .oneshot(
                Request::post("/messages")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_json");
    }

    #[tokio::test]
    async fn named_author_without_token_is_unauthorized() {
        let response = default_app()
            .oneshot(json_request(
                "POST",
                "/messages",
                json!({"channel": "#wtf", "author": "alice", "text": "hi"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "auth_required");
    }

    #[tokio::test]
    async fn whisper_round_trip_requires_a_participant_token() {
        let state = test_state(GatewayConfig::default());
        let token = state
            .keyring()
            .mint("alice", chrono::Duration::hours(1))
            .expect("token");
        let app = build_app(state);

        let mut request = json_request(
            "POST",
            "/messages",
            json!({"channel": "dm:Bob|Alice", "author": "alice", "text": "psst"}),
        );
        request.headers_mut().insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().expect("header"),
        );
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        // No token: the whisper is unreadable.
        let response = app
            .clone()
            .oneshot(
                Request::get("/messages?channel=dm:alice%7Cbob")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/messages?channel=dm:alice%7Cbob")
                    .header(
                        axum::http::header::AUTHORIZATION,
                        format!("Bearer {token}"),
                    )
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().expect("array").len(), 1);
    }

    #[tokio::test]
    async fn admin_lock_requires_the_exact_operator_token() {
        let config = GatewayConfig {
            admin_token: Some("op-secret".into()),
            ..GatewayConfig::default()
        };
        let app = build_app(test_state(config));

        let response = app
            .clone()
            .oneshot(
                Request::post("/admin/lock")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::post("/admin/lock")
                    .header(axum::http::header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(
                Request::post("/admin/lock")
                    .header(axum::http::header::AUTHORIZATION, "Bearer op-secret")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        // The gateway is now locked for every writer.
        let response = app
            .oneshot(json_request(
                "POST",
                "/messages",
                json!({"channel": "#wtf", "text": "anyone there?"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::LOCKED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "global_locked");
    }

    #[tokio::test]
    async fn admin_routes_are_absent_without_a_configured_token() {
        let response = default_app()
            .oneshot(
                Request::post("/admin/lock")
                    .header(axum::http::header::AUTHORIZATION, "Bearer anything")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn presence_heartbeats_are_counted() {
        let app = default_app();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/presence", json!({"nick": "alice"})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::get("/presence")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["nicks"], 1);
        assert_eq!(body["anon"], 0);
    }

    #[tokio::test]
    async fn hard_delete_stays_disabled_by_default() {
        let config = GatewayConfig {
            admin_token: Some("op-secret".into()),
            ..GatewayConfig::default()
        };
        let app = build_app(test_state(config));

        let response = app
            .oneshot(
                Request::delete("/messages/some-id?hard=true")
                    .header(axum::http::header::AUTHORIZATION, "Bearer op-secret")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["error"], "hard_delete_disabled");
    }
}
