/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The authentication pipeline: session cookie/header decoding, bearer
//! tokens with scope checks, and the local-account endpoints.

use crate::errors::{auth_failure_id, ApiFail, ApiResult};
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use base64::Engine as _;
use comentario_core::config_store::{KEY_AUTH_SIGNUP_CONFIRM_USER, KEY_AUTH_SIGNUP_ENABLED};
use comentario_core::tokens::{Token, SCOPE_CONFIRM_EMAIL, SCOPE_RESET_PASSWORD};
use comentario_core::users::{
    can_authenticate, hash_password, new_local_user, verify_password, ClientFingerprint,
    Principal, User,
};
use comentario_core::{mail, Error};
use comentario_protocol::ErrorId;
use chrono::Duration as ChronoDuration;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "comentario_user_session";
pub const AUTH_SESSION_COOKIE: &str = "_comentario_auth_session";
pub const SESSION_HEADER: &str = "x-user-session";

/// base64url(user-uuid || session-uuid), 32 bytes decoded, no padding.
pub fn encode_session(user_id: Uuid, session_id: Uuid) -> String {
    let mut buf = [0u8; 32];
    buf[..16].copy_from_slice(user_id.as_bytes());
    buf[16..].copy_from_slice(session_id.as_bytes());
    B64URL.encode(buf)
}

pub fn decode_session(value: &str) -> Option<(Uuid, Uuid)> {
    let bytes = B64URL.decode(value).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let user = Uuid::from_slice(&bytes[..16]).ok()?;
    let session = Uuid::from_slice(&bytes[16..]).ok()?;
    Some((user, session))
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|c| {
        let (k, v) = c.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

/// A Set-Cookie value with the fixed flag set: HttpOnly, SameSite=Lax,
/// Path=/, Secure iff the base URL is https.
pub fn session_cookie(value: &str, secure: bool, max_age_secs: i64) -> String {
    let mut cookie =
        format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", secure, 0)
}

pub fn auth_session_cookie(id: Uuid, secure: bool, max_age_secs: i64) -> String {
    let mut cookie = format!(
        "{AUTH_SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// The session payload from either the cookie or the embed SDK's header.
fn session_payload(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| cookie_value(headers, SESSION_COOKIE))
        .filter(|s| !s.is_empty())
}

/// Resolves the request's Principal. No credentials at all means the
/// anonymous principal; bad credentials are a 401.
pub async fn principal(state: &AppState, headers: &HeaderMap) -> ApiResult<Principal> {
    let Some(payload) = session_payload(headers) else {
        return Ok(Principal::Anonymous);
    };
    let (user_id, session_id) =
        decode_session(&payload).ok_or_else(|| ApiFail::unauthorized(ErrorId::Unauthenticated))?;
    let user = match state.users.by_session(user_id, session_id).await {
        Ok(u) => u,
        Err(Error::NotFound) => return Err(ApiFail::unauthorized(ErrorId::Unauthenticated)),
        Err(e) => return Err(e.into()),
    };
    can_authenticate(&user, true).map_err(|f| ApiFail::unauthorized(auth_failure_id(f)))?;
    Ok(Principal::from_user(user))
}

/// Like `principal`, but refuses anonymous callers.
pub async fn require_principal(state: &AppState, headers: &HeaderMap) -> ApiResult<Principal> {
    let p = principal(state, headers).await?;
    if p.is_anonymous() {
        return Err(ApiFail::unauthorized(ErrorId::Unauthenticated));
    }
    Ok(p)
}

/// Bearer authentication: the token's scope must intersect the endpoint's
/// scope set. One-shot tokens are spent on success.
pub async fn bearer_principal(
    state: &AppState,
    headers: &HeaderMap,
    scopes: &[&str],
) -> ApiResult<(Principal, Token)> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiFail::unauthorized(ErrorId::Unauthenticated))?;
    let token = match state.tokens.find(value, false).await {
        Ok(t) => t,
        Err(Error::NotFound) => return Err(ApiFail::bad_request(ErrorId::BadToken)),
        Err(e) => return Err(e.into()),
    };
    if !token.scope_in(scopes) {
        return Err(ApiFail::forbidden(ErrorId::Unauthenticated));
    }
    let user = state.users.by_id(token.user_id).await?;
    can_authenticate(&user, true).map_err(|f| ApiFail::unauthorized(auth_failure_id(f)))?;
    if !token.multiuse {
        state.tokens.spend(&token).await?;
    }
    Ok((Principal::from_user(user), token))
}

/// The anti-enumeration delay applied to every failed local login.
pub async fn wrong_auth_delay(state: &AppState) {
    let min = state.cfg.wrong_auth_delay_min_ms;
    let max = state.cfg.wrong_auth_delay_max_ms.max(min);
    let ms = if max == 0 {
        return;
    } else {
        rand::thread_rng().gen_range(min..=max)
    };
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn fingerprint(state: &AppState, headers: &HeaderMap) -> ClientFingerprint {
    let hv = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("")
        .trim()
        .to_string();
    ClientFingerprint {
        host: hv("host"),
        proto: if state.cfg.secure_cookies() {
            "https".into()
        } else {
            "http".into()
        },
        ip,
        country: hv("cf-ipcountry"),
        user_agent: hv("user-agent"),
    }
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(rename = "isSuperuser")]
    pub is_superuser: bool,
    pub confirmed: bool,
    #[serde(rename = "federatedIdP", skip_serializing_if = "Option::is_none")]
    pub federated_idp: Option<String>,
}

impl From<&User> for UserInfo {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            is_superuser: u.is_superuser,
            confirmed: u.confirmed,
            federated_idp: u.federated_idp.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Response> {
    let user = match state.users.by_email(&req.email).await {
        Ok(u) => u,
        Err(Error::NotFound) => {
            wrong_auth_delay(&state).await;
            return Err(ApiFail::unauthorized(ErrorId::InvalidCredentials));
        }
        Err(e) => return Err(e.into()),
    };
    if !verify_password(&req.password, &user.password_hash) {
        wrong_auth_delay(&state).await;
        // A federated-only account gets told to use its IdP instead.
        if !user.is_local() {
            return Err(ApiFail::bad_request(ErrorId::LoginUsingIdp));
        }
        return Err(ApiFail::unauthorized(ErrorId::InvalidCredentials));
    }
    if let Err(f) = can_authenticate(&user, true) {
        wrong_auth_delay(&state).await;
        return Err(ApiFail::unauthorized(auth_failure_id(f)));
    }
    let session = state
        .users
        .create_session(user.id, &fingerprint(&state, &headers))
        .await?;
    let cookie = session_cookie(
        &encode_session(user.id, session.id),
        state.cfg.secure_cookies(),
        comentario_core::users::user_session_duration().num_seconds(),
    );
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(UserInfo::from(&user)),
    )
        .into_response())
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if let Some((user_id, session_id)) = session_payload(&headers).and_then(|p| decode_session(&p))
    {
        match state.users.delete_session(user_id, session_id).await {
            Ok(()) | Err(Error::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok((
        [(
            header::SET_COOKIE,
            clear_session_cookie(state.cfg.secure_cookies()),
        )],
        StatusCode::NO_CONTENT,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SignupRequest>,
) -> ApiResult<Response> {
    if !state.cfgstore.get_bool(KEY_AUTH_SIGNUP_ENABLED).await {
        return Err(ApiFail::forbidden(ErrorId::SignupsForbidden));
    }
    if req.email.trim().is_empty() || !req.email.contains('@') || req.password.is_empty() {
        return Err(ApiFail::bad_request(ErrorId::InvalidPropValue));
    }
    match state.users.by_email(&req.email).await {
        Ok(_) => return Err(ApiFail::bad_request(ErrorId::EmailAlreadyExists)),
        Err(Error::NotFound) => {}
        Err(e) => return Err(e.into()),
    }
    let hash = hash_password(&req.password)?;
    let mut user = new_local_user(&req.email, &req.name, hash, &fingerprint(&state, &headers));
    let confirm_required = state.cfgstore.get_bool(KEY_AUTH_SIGNUP_CONFIRM_USER).await
        && state.mailer.enabled();
    user.confirmed = !confirm_required;
    state.users.create(&user).await?;
    if let Err(e) = state.plugins.user_created(&user).await {
        warn!("plugin user-create hook failed: {e:#}");
        return Err(ApiFail::internal());
    }

    if confirm_required {
        let token = Token::new(user.id, SCOPE_CONFIRM_EMAIL, ChronoDuration::days(3), false);
        state.tokens.create(&token).await?;
        let url = format!("{}/api/auth/confirm?token={}", state.cfg.base_url, token.value);
        let mut values = std::collections::HashMap::new();
        values.insert("name", user.name.clone());
        values.insert("confirmUrl", url);
        let html = mail::render_template(mail::TEMPLATE_CONFIRM_EMAIL, &values);
        if let Err(e) = state
            .mailer
            .send(&user.email, "Please confirm your email", html)
            .await
        {
            warn!("confirmation mail failed: {e}");
        }
    }
    Ok((StatusCode::CREATED, Json(UserInfo::from(&user))).into_response())
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

/// Email-confirmation link target; redirects to the UI afterwards.
pub async fn confirm_email(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> ApiResult<Redirect> {
    let token = match state.tokens.find(&q.token, false).await {
        Ok(t) => t,
        Err(Error::NotFound) => return Err(ApiFail::bad_request(ErrorId::BadToken)),
        Err(e) => return Err(e.into()),
    };
    if !token.scope_in(&[SCOPE_CONFIRM_EMAIL]) {
        return Err(ApiFail::bad_request(ErrorId::BadToken));
    }
    state.users.confirm(token.user_id).await?;
    state.tokens.spend(&token).await?;
    Ok(Redirect::to(&state.cfg.base_url))
}

#[derive(Debug, Deserialize)]
pub struct PwdResetRequest {
    pub email: String,
}

/// Always answers 204 so the endpoint can't be used for enumeration.
pub async fn request_pwd_reset(
    State(state): State<AppState>,
    Json(req): Json<PwdResetRequest>,
) -> ApiResult<StatusCode> {
    let user = match state.users.by_email(&req.email).await {
        Ok(u) => u,
        Err(Error::NotFound) => return Ok(StatusCode::NO_CONTENT),
        Err(e) => return Err(e.into()),
    };
    if !user.is_local() {
        return Ok(StatusCode::NO_CONTENT);
    }
    let token = Token::new(user.id, SCOPE_RESET_PASSWORD, ChronoDuration::hours(12), false);
    state.tokens.create(&token).await?;
    let url = format!("{}/?pwdResetToken={}", state.cfg.base_url, token.value);
    let mut values = std::collections::HashMap::new();
    values.insert("name", user.name.clone());
    values.insert("resetUrl", url);
    values.insert("validHours", "12".to_string());
    let html = mail::render_template(mail::TEMPLATE_RESET_PASSWORD, &values);
    if let Err(e) = state.mailer.send(&user.email, "Reset your password", html).await {
        warn!("password reset mail failed: {e}");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PwdResetComplete {
    pub token: String,
    pub password: String,
}

pub async fn complete_pwd_reset(
    State(state): State<AppState>,
    Json(req): Json<PwdResetComplete>,
) -> ApiResult<StatusCode> {
    let token = match state.tokens.find(&req.token, false).await {
        Ok(t) => t,
        Err(Error::NotFound) => return Err(ApiFail::bad_request(ErrorId::BadToken)),
        Err(e) => return Err(e.into()),
    };
    if !token.scope_in(&[SCOPE_RESET_PASSWORD]) {
        return Err(ApiFail::bad_request(ErrorId::BadToken));
    }
    if req.password.is_empty() {
        return Err(ApiFail::bad_request(ErrorId::InvalidPropValue));
    }
    let hash = hash_password(&req.password)?;
    state.users.update_password(token.user_id, &hash).await?;
    state.tokens.spend(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PwdChangeRequest {
    #[serde(rename = "curPassword")]
    pub cur_password: String,
    #[serde(rename = "newPassword")]
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PwdChangeRequest>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    let user = p.user().ok_or_else(|| ApiFail::unauthorized(ErrorId::Unauthenticated))?;
    if !user.is_local() {
        return Err(ApiFail::bad_request(ErrorId::NoLocalUser));
    }
    if !verify_password(&req.cur_password, &user.password_hash) {
        return Err(ApiFail::bad_request(ErrorId::WrongCurPassword));
    }
    if req.new_password.is_empty() {
        return Err(ApiFail::bad_request(ErrorId::InvalidPropValue));
    }
    let hash = hash_password(&req.new_password)?;
    state.users.update_password(user.id, &hash).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/user` — who am I.
pub async fn current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let p = principal(&state, &headers).await?;
    Ok(Json(match p.user() {
        Some(u) => json!({ "authenticated": true, "user": UserInfo::from(u) }),
        None => json!({ "authenticated": false }),
    }))
}

/// Unsubscribe link target for notification mails; HTML response.
pub async fn unsubscribe(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> ApiResult<axum::response::Html<String>> {
    let token = match state.tokens.find(&q.token, false).await {
        Ok(t) => t,
        Err(Error::NotFound) => return Err(ApiFail::bad_request(ErrorId::BadToken)),
        Err(e) => return Err(e.into()),
    };
    if !token.scope_in(&[comentario_core::tokens::SCOPE_UNSUBSCRIBE]) {
        return Err(ApiFail::bad_request(ErrorId::BadToken));
    }
    state
        .db
        .exec(
            "UPDATE cm_domains_users SET notify_replies = false, notify_moderator = false \
             WHERE user_id = $1",
            &[&token.user_id],
        )
        .await?;
    state.tokens.spend(&token).await?;
    Ok(axum::response::Html(
        "<html><body><p>You have been unsubscribed from comment notifications.</p></body></html>"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_encoding_round_trip() {
        let u = Uuid::new_v4();
        let s = Uuid::new_v4();
        let enc = encode_session(u, s);
        assert!(!enc.contains('='));
        assert_eq!(decode_session(&enc), Some((u, s)));
    }

    #[test]
    fn decode_rejects_wrong_length_and_garbage() {
        assert_eq!(decode_session(""), None);
        assert_eq!(decode_session("not base64!!"), None);
        let short = B64URL.encode([0u8; 16]);
        assert_eq!(decode_session(&short), None);
    }

    #[test]
    fn cookie_flags() {
        let c = session_cookie("abc", true, 60);
        assert!(c.starts_with("comentario_user_session=abc"));
        assert!(c.contains("HttpOnly"));
        assert!(c.contains("SameSite=Lax"));
        assert!(c.contains("Path=/"));
        assert!(c.contains("Secure"));
        let c = session_cookie("abc", false, 60);
        assert!(!c.contains("Secure"));
    }

    #[test]
    fn cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "lang=en; comentario_user_session=xyz; other=1".parse().unwrap(),
        );
        assert_eq!(cookie_value(&headers, SESSION_COOKIE).as_deref(), Some("xyz"));
        assert_eq!(cookie_value(&headers, "lang").as_deref(), Some("en"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
