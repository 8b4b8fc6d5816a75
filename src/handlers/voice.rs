use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{OriginalUri, Path, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::db::{self, queries};
use crate::models::{Language, Tenant};
use crate::services::dialogue::script::script;
use crate::services::dialogue::{self, Dialogue, TurnInput};
use crate::services::tenant::{self, Resolution};
use crate::services::voice::VoiceResponse;
use crate::services::{context, speech};
use crate::state::AppState;

type Params = HashMap<String, String>;

fn param<'a>(params: &'a Params, key: &str) -> &'a str {
    params.get(key).map(|v| v.trim()).unwrap_or("")
}

fn validate_twilio_signature(auth_token: &str, signature: &str, url: &str, params: &Params) -> bool {
    // URL followed by every parameter, sorted by name
    let mut data = url.to_string();
    let mut sorted: Vec<(&String, &String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in sorted {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac = match Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(data.as_bytes());
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    expected == signature
}

/// Rejects webhooks not signed with the account's auth token. Skipped when
/// no token is configured (local development).
fn verify(state: &AppState, headers: &HeaderMap, uri: &axum::http::Uri, params: &Params) -> Result<(), Response> {
    let auth_token = &state.config.twilio_auth_token;
    if auth_token.is_empty() {
        return Ok(());
    }

    let signature = headers
        .get("x-twilio-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if signature.is_empty() {
        tracing::warn!(path = %uri.path(), "missing X-Twilio-Signature header");
        return Err((StatusCode::FORBIDDEN, "Missing signature").into_response());
    }

    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = format!("{}{path}", state.config.public_base_url);
    if !validate_twilio_signature(auth_token, signature, &url, params) {
        tracing::warn!(path = %uri.path(), "invalid Twilio signature");
        return Err((StatusCode::FORBIDDEN, "Invalid signature").into_response());
    }
    Ok(())
}

/// Voices the document with synthesized audio where possible and renders it.
async fn respond(state: &AppState, mut resp: VoiceResponse) -> Response {
    speech::voice_over(
        state.speech.as_ref(),
        &state.db,
        &state.config.public_base_url,
        state.config.audio_ttl,
        state.config.tts_timeout,
        &mut resp,
    )
    .await;
    ([(header::CONTENT_TYPE, "application/xml")], resp.render()).into_response()
}

fn apology(language: Language) -> VoiceResponse {
    VoiceResponse::new()
        .say(script(language).technical_difficulty, language)
        .hangup()
}

fn not_in_service() -> VoiceResponse {
    VoiceResponse::new()
        .say(script(Language::En).not_in_service, Language::En)
        .hangup()
}

// POST /voice/incoming
pub async fn incoming(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Form(params): Form<Params>,
) -> Response {
    if let Err(rejected) = verify(&state, &headers, &uri, &params) {
        return rejected;
    }
    let from = param(&params, "From");
    let to = param(&params, "To");
    let call_sid = param(&params, "CallSid");
    tracing::info!(from = %from, to = %to, call_sid = %call_sid, "incoming call");

    let resp = match tenant::resolve(&state.db, state.usage.as_ref(), to).await {
        Ok(Resolution::Ready(tenant)) => Dialogue::new(&state, &tenant).start(from, call_sid),
        Ok(Resolution::AgentDisabled(tenant)) => Dialogue::new(&state, &tenant).forward(from, call_sid),
        Ok(Resolution::Exhausted(tenant)) => {
            Dialogue::new(&state, &tenant).voicemail_only(from, call_sid)
        }
        Ok(Resolution::NotFound) => not_in_service(),
        Err(e) => {
            tracing::error!(to = %to, error = %e, "tenant resolution failed");
            apology(Language::En)
        }
    };
    respond(&state, resp).await
}

/// Asks the caller to call back when the call context is unreadable.
fn expired(state: &AppState, params: &Params) -> VoiceResponse {
    let to = param(params, "To");
    let found = db::lock(&state.db).and_then(|conn| tenant::lookup(&conn, to));
    match found {
        Ok(Some(tenant)) => Dialogue::new(state, &tenant)
            .expired(param(params, "From"), param(params, "CallSid")),
        Ok(None) => not_in_service(),
        Err(e) => {
            tracing::error!(to = %to, error = %e, "tenant lookup failed");
            apology(Language::En)
        }
    }
}

fn load_tenant(state: &AppState, tenant_id: i64) -> anyhow::Result<Option<Tenant>> {
    let conn = db::lock(&state.db)?;
    queries::get_tenant(&conn, tenant_id)
}

// POST /voice/turn?<context>
pub async fn turn(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    RawQuery(query): RawQuery,
    Form(params): Form<Params>,
) -> Response {
    if let Err(rejected) = verify(&state, &headers, &uri, &params) {
        return rejected;
    }

    let ctx = match context::decode(query.as_deref().unwrap_or("")) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::warn!(error = %e, call_sid = %param(&params, "CallSid"), "unreadable call context, ending call");
            let resp = expired(&state, &params);
            return respond(&state, resp).await;
        }
    };

    let resp = match load_tenant(&state, ctx.tenant_id) {
        Ok(Some(tenant)) => {
            let input = TurnInput {
                speech: params.get("SpeechResult").cloned(),
                digits: params.get("Digits").cloned(),
                dial_status: params.get("DialCallStatus").cloned(),
                recording_url: params.get("RecordingUrl").cloned(),
                recording_sid: params.get("RecordingSid").cloned(),
            };
            Dialogue::new(&state, &tenant).turn(ctx, &input).await
        }
        Ok(None) => {
            tracing::warn!(tenant_id = ctx.tenant_id, "tenant disappeared mid-call");
            not_in_service()
        }
        Err(e) => {
            tracing::error!(tenant_id = ctx.tenant_id, error = %e, "failed to load tenant");
            apology(ctx.language)
        }
    };
    respond(&state, resp).await
}

// POST /voice/transcription?<context>
pub async fn transcription(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    RawQuery(query): RawQuery,
    Form(params): Form<Params>,
) -> Response {
    if let Err(rejected) = verify(&state, &headers, &uri, &params) {
        return rejected;
    }

    let ctx = match context::decode(query.as_deref().unwrap_or("")) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::warn!(error = %e, "transcription without a readable context");
            return StatusCode::NO_CONTENT.into_response();
        }
    };
    let recording_sid = param(&params, "RecordingSid");
    let text = param(&params, "TranscriptionText");
    let status = params.get("TranscriptionStatus").map(String::as_str).unwrap_or("completed");
    if recording_sid.is_empty() || text.is_empty() || status != "completed" {
        tracing::info!(call_id = %ctx.call_id, status = %status, "transcription unusable, keeping placeholder");
        return StatusCode::NO_CONTENT.into_response();
    }

    if let Err(e) = dialogue::record_transcription(&state, &ctx, recording_sid, text).await {
        tracing::error!(call_id = %ctx.call_id, error = %e, "failed to store voicemail summary");
    }
    StatusCode::NO_CONTENT.into_response()
}

// POST /voice/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Form(params): Form<Params>,
) -> Response {
    if let Err(rejected) = verify(&state, &headers, &uri, &params) {
        return rejected;
    }
    let call_sid = param(&params, "CallSid");
    let call_status = param(&params, "CallStatus");
    if call_sid.is_empty() || !tenant::FINAL_CALL_STATUSES.contains(&call_status) {
        return StatusCode::NO_CONTENT.into_response();
    }
    let to = param(&params, "To");
    let duration: i64 = param(&params, "CallDuration").parse().unwrap_or(0);

    let metered = db::lock(&state.db).and_then(|conn| match tenant::lookup(&conn, to)? {
        Some(found) => tenant::meter_call(
            &conn,
            &found,
            call_sid,
            param(&params, "From"),
            call_status,
            duration,
        )
        .map(Some),
        None => Ok(None),
    });
    match metered {
        Ok(Some(_)) => {}
        Ok(None) => tracing::warn!(to = %to, call_sid = %call_sid, "status callback for unknown number"),
        Err(e) => tracing::error!(call_sid = %call_sid, error = %e, "failed to meter call"),
    }
    StatusCode::NO_CONTENT.into_response()
}

// GET /audio/:id
pub async fn audio(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let clip = db::lock(&state.db)
        .and_then(|conn| queries::get_audio_clip(&conn, &id, Utc::now().naive_utc()));
    match clip {
        Ok(Some(clip)) => ([(header::CONTENT_TYPE, clip.content_type)], clip.bytes).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(clip_id = %id, error = %e, "failed to load audio clip");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
