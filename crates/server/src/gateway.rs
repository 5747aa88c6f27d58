use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use ch4tgate_core::{author_key, clean_text, ChannelId, DenyCode, Message, PurgeReason};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    abuse,
    access,
    auth::{parse_bearer, Caller},
    breaker::{BreakerSnapshot, BreakerVerdict, VolumeBreaker},
    config::{AbuseConfig, GatewayConfig},
    ratelimit::RateLimiter,
    store::{MessageStore, StoreError},
    AppState,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Denied(DenyCode),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// How an admitted write ended: stored and readable, or stored and then
/// purged by the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted { id: String, ts: i64 },
    Purged { reason: PurgeReason, deleted: usize },
}

/// The admission pipeline. Holds the store behind the adapter trait, the
/// per-author rate limiter, and the global volume breaker; every decision
/// takes the resolved caller and the request clock as explicit parameters.
pub struct GatewayService {
    store: Arc<dyn MessageStore>,
    limiter: RateLimiter,
    breaker: VolumeBreaker,
    abuse: AbuseConfig,
    allow_anon_public: bool,
}

impl GatewayService {
    pub fn new(store: Arc<dyn MessageStore>, config: &GatewayConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.abuse.rate_refill_per_sec, config.abuse.rate_burst),
            breaker: VolumeBreaker::new(config.abuse.hourly_limit),
            abuse: config.abuse.clone(),
            allow_anon_public: config.allow_anon_public,
            store,
        }
    }

    /// Restore persisted breaker state, if the backend has any.
    pub async fn hydrate(&self) {
        match self.store.load_breaker().await {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    locked = snapshot.locked,
                    count = snapshot.count,
                    "restored volume breaker state"
                );
                self.breaker.hydrate(snapshot).await;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(?err, "failed to load persisted breaker state");
            }
        }
    }

    pub async fn write(
        &self,
        raw_channel: &str,
        requested_author: &str,
        text: &str,
        caller: &Caller,
        now_ms: i64,
    ) -> Result<WriteOutcome, GatewayError> {
        let Some(text) = clean_text(text) else {
            return Err(GatewayError::Denied(DenyCode::TextRequired));
        };
        let channel = ChannelId::normalize(raw_channel);
        if channel.is_empty() {
            return Err(GatewayError::Denied(DenyCode::ChannelRequired));
        }

        let grant = access::check_write(caller, &channel, requested_author, self.allow_anon_public)
            .map_err(GatewayError::Denied)?;

        if self.breaker.is_locked().await {
            return Err(GatewayError::Denied(DenyCode::GlobalLocked));
        }

        let bucket = author_key(&grant.effective_author);
        if !self.limiter.try_acquire(&bucket, now_ms).await {
            return Err(GatewayError::Denied(DenyCode::RateLimited));
        }

        let (verdict, snapshot) = self.breaker.record(now_ms).await;
        self.persist_breaker(snapshot).await;
        if verdict == BreakerVerdict::Tripped {
            tracing::warn!(
                channel = %channel,
                count = snapshot.count,
                "hourly volume threshold exceeded; gateway locked"
            );
            return Err(GatewayError::Denied(DenyCode::AutoLockedAll));
        }

        let message = Message::new(grant.channel, grant.effective_author, text, now_ms);
        self.store.append(&message).await?;

        let floor_ts =
            now_ms - self.abuse.flood_window_ms.max(self.abuse.duplicate_window_ms);
        let window = self
            .store
            .recent_window(&channel, floor_ts, self.abuse.lookback_limit)
            .await?;
        if let Some(purge) = abuse::inspect(&self.abuse, &window, &message) {
            self.store.soft_delete(&purge.ids).await?;
            tracing::info!(
                channel = %channel,
                author = %message.author,
                reason = purge.reason.as_str(),
                deleted = purge.ids.len(),
                "purged message burst"
            );
            return Ok(WriteOutcome::Purged {
                reason: purge.reason,
                deleted: purge.ids.len(),
            });
        }

        Ok(WriteOutcome::Accepted {
            id: message.id,
            ts: message.ts,
        })
    }

    pub async fn read(
        &self,
        raw_channel: &str,
        caller: &Caller,
        since_exclusive: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, GatewayError> {
        let channel = ChannelId::normalize(raw_channel);
        if channel.is_empty() {
            return Err(GatewayError::Denied(DenyCode::ChannelRequired));
        }
        access::check_read(caller, &channel).map_err(GatewayError::Denied)?;
        Ok(self.store.query(&channel, since_exclusive, limit).await?)
    }

    /// Audit lookup; returns soft-deleted rows as stored.
    pub async fn audit_fetch(&self, id: &str) -> Result<Option<Message>, GatewayError> {
        Ok(self.store.fetch(id).await?)
    }

    pub async fn soft_delete_one(&self, id: &str) -> Result<bool, GatewayError> {
        if self.store.fetch(id).await?.is_none() {
            return Ok(false);
        }
        let ids = [id.to_string()];
        self.store.soft_delete(&ids).await?;
        Ok(true)
    }

    pub async fn hard_delete_one(&self, id: &str) -> Result<bool, GatewayError> {
        Ok(self.store.hard_delete(id).await?)
    }

    pub async fn clear_channel(&self, raw_channel: &str) -> Result<u64, GatewayError> {
        let channel = ChannelId::normalize(raw_channel);
        if channel.is_empty() {
            return Err(GatewayError::Denied(DenyCode::ChannelRequired));
        }
        Ok(self.store.clear_channel(&channel).await?)
    }

    pub async fn lock_all(&self) -> BreakerSnapshot {
        let snapshot = self.breaker.lock().await;
        self.persist_breaker(snapshot).await;
        snapshot
    }

    pub async fn unlock_all(&self, now_ms: i64) -> BreakerSnapshot {
        let snapshot = self.breaker.unlock(now_ms).await;
        self.persist_breaker(snapshot).await;
        snapshot
    }

    pub async fn is_locked(&self) -> bool {
        self.breaker.is_locked().await
    }

    async fn persist_breaker(&self, snapshot: BreakerSnapshot) {
        if let Err(err) = self.store.store_breaker(&snapshot).await {
            tracing::warn!(?err, "failed to persist breaker state");
        }
    }
}

fn deny_status(code: DenyCode) -> StatusCode {
    match code {
        DenyCode::TextRequired | DenyCode::ChannelRequired => StatusCode::BAD_REQUEST,
        DenyCode::AuthRequired | DenyCode::AuthorMismatch | DenyCode::AnonDisabled => {
            StatusCode::UNAUTHORIZED
        }
        DenyCode::DmForbidden => StatusCode::FORBIDDEN,
        DenyCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        DenyCode::GlobalLocked | DenyCode::AutoLockedAll => StatusCode::LOCKED,
    }
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Serialize)]
struct AcceptedResponse {
    id: String,
    ts: i64,
}

#[derive(Debug, Serialize)]
struct PurgedResponse {
    purged: PurgeReason,
    deleted: usize,
}

#[derive(Debug, Serialize)]
struct DeletedResponse {
    ok: bool,
    id: String,
}

#[derive(Debug, Serialize)]
struct ClearedResponse {
    deleted: u64,
}

#[derive(Debug, Serialize)]
struct LockResponse {
    locked: bool,
}

/// Read-side projection. `from` mirrors `author` for older clients that
/// still read that field.
#[derive(Debug, Serialize)]
struct MessageView {
    id: String,
    channel: String,
    author: String,
    from: String,
    text: String,
    ts: i64,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            channel: message.channel.to_string(),
            from: message.author.clone(),
            author: message.author,
            text: message.text,
            ts: message.ts,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

fn resolve_caller(state: &AppState, headers: &HeaderMap) -> Caller {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    state.keyring().resolve(parse_bearer(header))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Response {
    let route = "messages.post";
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(%rejection, "rejected unparseable message body");
            let status = StatusCode::BAD_REQUEST;
            state.record_http_request(route, status.as_u16());
            return (
                status,
                Json(ErrorBody {
                    error: "invalid_json",
                }),
            )
                .into_response();
        }
    };
    let caller = resolve_caller(&state, &headers);
    let channel = body.channel.or(query.channel).unwrap_or_default();
    let author = body.author.unwrap_or_default();

    match state
        .gateway()
        .write(&channel, &author, &body.text, &caller, now_ms())
        .await
    {
        Ok(WriteOutcome::Accepted { id, ts }) => {
            state.record_http_request(route, StatusCode::OK.as_u16());
            (StatusCode::OK, Json(AcceptedResponse { id, ts })).into_response()
        }
        Ok(WriteOutcome::Purged { reason, deleted }) => {
            state.record_http_request(route, StatusCode::OK.as_u16());
            state.record_gateway_rejection(reason.as_str());
            (
                StatusCode::OK,
                Json(PurgedResponse {
                    purged: reason,
                    deleted,
                }),
            )
                .into_response()
        }
        Err(GatewayError::Denied(code)) => {
            let status = deny_status(code);
            state.record_http_request(route, status.as_u16());
            state.record_gateway_rejection(code.as_str());
            (status, Json(ErrorBody { error: code.as_str() })).into_response()
        }
        Err(GatewayError::Store(err)) => {
            tracing::error!(channel = %channel, ?err, "failed to write message");
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            state.record_http_request(route, status.as_u16());
            (status, Json(ErrorBody { error: err.code() })).into_response()
        }
    }
}

pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
) -> Response {
    let route = "messages.list";
    let caller = resolve_caller(&state, &headers);
    let channel = query.channel.unwrap_or_default();

    match state
        .gateway()
        .read(&channel, &caller, query.since, query.limit)
        .await
    {
        Ok(messages) => {
            state.record_http_request(route, StatusCode::OK.as_u16());
            let views: Vec<MessageView> = messages.into_iter().map(MessageView::from).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(GatewayError::Denied(code)) => {
            let status = deny_status(code);
            state.record_http_request(route, status.as_u16());
            state.record_gateway_rejection(code.as_str());
            (status, Json(ErrorBody { error: code.as_str() })).into_response()
        }
        Err(GatewayError::Store(err)) => {
            tracing::error!(channel = %channel, ?err, "failed to list messages");
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            state.record_http_request(route, status.as_u16());
            (status, Json(ErrorBody { error: err.code() })).into_response()
        }
    }
}

/// Exact-match check against the static operator token. Admin routes are
/// absent (404) when no token is configured at all.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.admin_token() else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "admin_disabled",
            }),
        )
            .into_response());
    };
    let presented = parse_bearer(
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    );
    match presented {
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody { error: "no_token" }),
        )
            .into_response()),
        Some(token) if token == expected => Ok(()),
        Some(_) => Err((
            StatusCode::FORBIDDEN,
            Json(ErrorBody {
                error: "invalid_token",
            }),
        )
            .into_response()),
    }
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
    headers: HeaderMap,
) -> Response {
    let route = "messages.delete";
    if let Err(response) = require_admin(&state, &headers) {
        state.record_http_request(route, response.status().as_u16());
        return response;
    }

    if query.hard && !state.hard_delete_enabled() {
        let status = StatusCode::FORBIDDEN;
        state.record_http_request(route, status.as_u16());
        return (
            status,
            Json(ErrorBody {
                error: "hard_delete_disabled",
            }),
        )
            .into_response();
    }

    let result = if query.hard {
        state.gateway().hard_delete_one(&id).await
    } else {
        state.gateway().soft_delete_one(&id).await
    };

    match result {
        Ok(true) => {
            state.record_http_request(route, StatusCode::OK.as_u16());
            (StatusCode::OK, Json(DeletedResponse { ok: true, id })).into_response()
        }
        Ok(false) => {
            let status = StatusCode::NOT_FOUND;
            state.record_http_request(route, status.as_u16());
            (status, Json(ErrorBody { error: "not_found" })).into_response()
        }
        Err(err) => {
            tracing::error!(message_id = %id, ?err, "failed to delete message");
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            state.record_http_request(route, status.as_u16());
            (status, Json(ErrorBody { error: "db_write_failed" })).into_response()
        }
    }
}

pub async fn audit_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let route = "admin.messages.audit";
    if let Err(response) = require_admin(&state, &headers) {
        state.record_http_request(route, response.status().as_u16());
        return response;
    }

    match state.gateway().audit_fetch(&id).await {
        Ok(Some(message)) => {
            state.record_http_request(route, StatusCode::OK.as_u16());
            (StatusCode::OK, Json(message)).into_response()
        }
        Ok(None) => {
            let status = StatusCode::NOT_FOUND;
            state.record_http_request(route, status.as_u16());
            (status, Json(ErrorBody { error: "not_found" })).into_response()
        }
        Err(err) => {
            tracing::error!(message_id = %id, ?err, "failed to fetch message for audit");
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            state.record_http_request(route, status.as_u16());
            (status, Json(ErrorBody { error: "db_read_failed" })).into_response()
        }
    }
}

pub async fn lock_all(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let route = "admin.lock";
    if let Err(response) = require_admin(&state, &headers) {
        state.record_http_request(route, response.status().as_u16());
        return response;
    }
    let snapshot = state.gateway().lock_all().await;
    tracing::warn!("gateway locked by operator");
    state.record_http_request(route, StatusCode::OK.as_u16());
    (
        StatusCode::OK,
        Json(LockResponse {
            locked: snapshot.locked,
        }),
    )
        .into_response()
}

pub async fn unlock_all(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let route = "admin.unlock";
    if let Err(response) = require_admin(&state, &headers) {
        state.record_http_request(route, response.status().as_u16());
        return response;
    }
    let snapshot = state.gateway().unlock_all(now_ms()).await;
    tracing::info!("gateway unlocked by operator");
    state.record_http_request(route, StatusCode::OK.as_u16());
    (
        StatusCode::OK,
        Json(LockResponse {
            locked: snapshot.locked,
        }),
    )
        .into_response()
}

pub async fn clear_channel(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
) -> Response {
    let route = "admin.channels.clear";
    if let Err(response) = require_admin(&state, &headers) {
        state.record_http_request(route, response.status().as_u16());
        return response;
    }

    if !state.purge_enabled() {
        let status = StatusCode::FORBIDDEN;
        state.record_http_request(route, status.as_u16());
        return (
            status,
            Json(ErrorBody {
                error: "purge_disabled",
            }),
        )
            .into_response();
    }

    match state.gateway().clear_channel(&channel).await {
        Ok(deleted) => {
            state.record_http_request(route, StatusCode::OK.as_u16());
            (StatusCode::OK, Json(ClearedResponse { deleted })).into_response()
        }
        Err(GatewayError::Denied(code)) => {
            let status = deny_status(code);
            state.record_http_request(route, status.as_u16());
            (status, Json(ErrorBody { error: code.as_str() })).into_response()
        }
        Err(GatewayError::Store(err)) => {
            tracing::error!(channel = %channel, ?err, "failed to clear channel");
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            state.record_http_request(route, status.as_u16());
            (status, Json(ErrorBody { error: err.code() })).into_response()
        }
    }
}
