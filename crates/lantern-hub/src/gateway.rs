//! HTTP ingress for clients without a mesh relay.
//!
//! The gateway is untrusted: clients seal their plaintext locally and submit
//! only ciphertext plus the wrapped session key. The hub synthesises the two
//! envelopes and injects them into the fan-out as a reserved `gateway` peer —
//! message first, then the key after a short settle, so an admin on the same
//! hub usually joins on the key's arrival.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    Json,
};
use chrono::Utc;
use lantern_proto::{
    HubFrame, KeyEnvelope, MeshPayload, MessageEnvelope, Meta, MsgId,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::HubState;

/// Reserved peer id for gateway-injected frames.
const GATEWAY_PEER: &str = "gateway";

/// Fallback sender tag when the submission names none.
const GATEWAY_USER: &str = "gateway_user";

/// Delay between injecting the message and the key envelope.
const KEY_SETTLE: Duration = Duration::from_millis(100);

/// Gateway submission body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Submission {
    encrypted_payload: Option<String>,
    wrapped_key: Option<String>,
    msg_id: Option<String>,
    from: Option<String>,
    #[serde(default)]
    meta: Option<Meta>,
}

/// Success response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Submitted {
    success: bool,
    msg_id: MsgId,
}

/// `POST /gateway/submit`.
pub(crate) async fn submit(
    State(state): State<Arc<HubState>>,
    Json(body): Json<Submission>,
) -> impl IntoResponse {
    let (payload, wrapped_key, msg_id) = match require_fields(&body) {
        Ok(fields) => fields,
        Err(missing) => {
            return bad_request(format!("missing required field: {missing}"));
        },
    };

    if payload.len() + wrapped_key.len() > state.config.max_frame_bytes {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({ "error": "submission exceeds frame cap" })),
        )
            .into_response();
    }

    let msg_id: MsgId = match msg_id.parse() {
        Ok(id) => id,
        Err(_) => return bad_request("msgId must be 32 lower-case hex characters".into()),
    };

    let now = Utc::now();
    let from = body.from.clone().unwrap_or_else(|| GATEWAY_USER.to_string());
    let meta = body.meta.clone().unwrap_or_default();

    let message =
        MessageEnvelope::e2e(msg_id, GATEWAY_PEER, from.clone(), payload.clone(), meta, now);
    if let Err(e) = message.validate() {
        return bad_request(e.to_string());
    }

    let key = KeyEnvelope::new(msg_id, from, wrapped_key.clone());
    if let Err(e) = key.validate() {
        return bad_request(e.to_string());
    }

    // Message first, key after a settle. Ordering affects only join latency
    // (an admin parks a key that arrives first), not correctness.
    inject(&state, MeshPayload::Message(message));
    tokio::time::sleep(KEY_SETTLE).await;
    inject(&state, MeshPayload::Key(key));

    tracing::info!(msg_id = %msg_id, "gateway submission fanned out");

    (StatusCode::OK, Json(Submitted { success: true, msg_id })).into_response()
}

/// `GET /gateway` — the static ingress page.
pub(crate) async fn page() -> Html<&'static str> {
    Html(include_str!("../assets/gateway.html"))
}

fn require_fields(body: &Submission) -> Result<(String, String, String), &'static str> {
    let payload = body.encrypted_payload.clone().ok_or("encryptedPayload")?;
    let wrapped_key = body.wrapped_key.clone().ok_or("wrappedKey")?;
    let msg_id = body.msg_id.clone().ok_or("msgId")?;
    Ok((payload, wrapped_key, msg_id))
}

fn inject(state: &Arc<HubState>, payload: MeshPayload) {
    let (envelope, envelope_type) = match payload.into_parts() {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!(error = %e, "gateway envelope encode failed");
            return;
        },
    };

    let frame = HubFrame::MeshMessage {
        envelope,
        from_peer: GATEWAY_PEER.to_string(),
        envelope_type,
    };
    state.fan_out_from(GATEWAY_PEER, &frame);
}

fn bad_request(error: String) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response()
}
