use std::collections::HashMap;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::AppState;

/// How long a heartbeat keeps a visitor counted.
const PRESENCE_WINDOW_MS: i64 = 60_000;

/// Who is around right now: named nicks in a last-seen map, anonymous
/// visitors as a pruned list of heartbeat timestamps. Process-local by
/// design; a multi-instance deployment undercounts.
#[derive(Default)]
pub struct PresenceTracker {
    nicks: Mutex<HashMap<String, i64>>,
    anon: Mutex<Vec<i64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceCounts {
    pub nicks: usize,
    pub anon: usize,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn heartbeat(&self, nick: Option<&str>, now_ms: i64) {
        match nick.map(str::trim).filter(|n| !n.is_empty()) {
            Some(nick) => {
                self.nicks
                    .lock()
                    .await
                    .insert(nick.to_lowercase(), now_ms);
            }
            None => {
                let mut anon = self.anon.lock().await;
                anon.push(now_ms);
                anon.retain(|ts| *ts >= now_ms - PRESENCE_WINDOW_MS);
            }
        }
    }

    pub async fn counts(&self, now_ms: i64) -> PresenceCounts {
        let floor = now_ms - PRESENCE_WINDOW_MS;
        let mut nicks = self.nicks.lock().await;
        nicks.retain(|_, seen| *seen >= floor);
        let named = nicks.len();
        drop(nicks);

        let mut anon = self.anon.lock().await;
        anon.retain(|ts| *ts >= floor);
        PresenceCounts {
            nicks: named,
            anon: anon.len(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub nick: Option<String>,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    ok: bool,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub async fn heartbeat(
    State(state): State<AppState>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Response {
    // An unreadable body is still a heartbeat, just an anonymous one.
    let nick = body.ok().and_then(|Json(body)| body.nick);
    state.presence().heartbeat(nick.as_deref(), now_ms()).await;
    state.record_http_request("presence.post", StatusCode::OK.as_u16());
    (StatusCode::OK, Json(HeartbeatResponse { ok: true })).into_response()
}

pub async fn counts(State(state): State<AppState>) -> Response {
    let counts = state.presence().counts(now_ms()).await;
    state.record_http_request("presence.get", StatusCode::OK.as_u16());
    (StatusCode::OK, Json(counts)).into_response()
}
