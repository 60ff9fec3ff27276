/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Federated sign-in: the OAuth authorization-code flow against the known
//! identity providers, and the per-domain shared-secret SSO variant.

use crate::auth::{
    auth_session_cookie, cookie_value, encode_session, fingerprint, session_cookie,
    AUTH_SESSION_COOKIE,
};
use crate::errors::{ApiFail, ApiResult};
use crate::AppState;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use chrono::Duration as ChronoDuration;
use comentario_core::authsessions::{auth_session_ttl, AuthSession};
use comentario_core::tokens::{Token, SCOPE_FEDERATED_CALLBACK};
use comentario_core::users::{new_federated_user, user_session_duration, User, ANONYMOUS_ID};
use comentario_core::{util, Error};
use comentario_protocol::ErrorId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const AVATAR_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const AVATAR_MAX_BYTES: usize = 1024 * 1024;

/// A known identity provider and its protocol endpoints.
struct IdProvider {
    id: &'static str,
    auth_url: &'static str,
    token_url: &'static str,
    userinfo_url: &'static str,
    scope: &'static str,
}

static PROVIDERS: &[IdProvider] = &[
    IdProvider {
        id: "github",
        auth_url: "https://github.com/login/oauth/authorize",
        token_url: "https://github.com/login/oauth/access_token",
        userinfo_url: "https://api.github.com/user",
        scope: "read:user user:email",
    },
    IdProvider {
        id: "gitlab",
        auth_url: "https://gitlab.com/oauth/authorize",
        token_url: "https://gitlab.com/oauth/token",
        userinfo_url: "https://gitlab.com/api/v4/user",
        scope: "read_user",
    },
    IdProvider {
        id: "google",
        auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo",
        scope: "openid email profile",
    },
    IdProvider {
        id: "facebook",
        auth_url: "https://www.facebook.com/v19.0/dialog/oauth",
        token_url: "https://graph.facebook.com/v19.0/oauth/access_token",
        userinfo_url: "https://graph.facebook.com/me?fields=id,name,email,picture",
        scope: "public_profile email",
    },
    IdProvider {
        id: "twitter",
        auth_url: "https://twitter.com/i/oauth2/authorize",
        token_url: "https://api.twitter.com/2/oauth2/token",
        userinfo_url: "https://api.twitter.com/2/users/me",
        scope: "users.read tweet.read",
    },
    IdProvider {
        id: "linkedin",
        auth_url: "https://www.linkedin.com/oauth/v2/authorization",
        token_url: "https://www.linkedin.com/oauth/v2/accessToken",
        userinfo_url: "https://api.linkedin.com/v2/userinfo",
        scope: "openid email profile",
    },
];

fn provider(id: &str) -> Option<&'static IdProvider> {
    PROVIDERS.iter().find(|p| p.id == id)
}

/// The state stashed in the AuthSession blob between redirect and callback.
#[derive(Debug, Serialize, Deserialize)]
struct HandshakePayload {
    provider: String,
    state: String,
    host: String,
}

fn redirect_uri(state: &AppState, provider_id: &str) -> String {
    format!("{}/api/auth/oauth/{provider_id}/callback", state.cfg.base_url)
}

fn idp_secrets(state: &AppState, id: &str) -> ApiResult<crate::config::IdpSecrets> {
    let secrets = state
        .secrets
        .idp
        .get(id)
        .cloned()
        .ok_or_else(|| ApiFail::bad_request(ErrorId::IdpUnconfigured))?;
    if secrets.disable || secrets.key.is_empty() {
        return Err(ApiFail::bad_request(ErrorId::IdpUnconfigured));
    }
    Ok(secrets)
}

#[derive(Debug, Deserialize)]
pub struct InitQuery {
    pub url: Option<String>,
}

/// `GET /api/auth/oauth/:provider` — starts the handshake with a 307 to the
/// provider. The browser only gets the AuthSession's ID, in a cookie.
pub async fn oauth_init(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(provider_id): UrlPath<String>,
    Query(q): Query<InitQuery>,
) -> ApiResult<Response> {
    let provider =
        provider(&provider_id).ok_or_else(|| ApiFail::bad_request(ErrorId::IdpUnknown))?;
    let secrets = idp_secrets(&state, provider.id)?;

    let handshake = HandshakePayload {
        provider: provider.id.to_string(),
        state: util::random_hex(64),
        host: fingerprint(&state, &headers).host,
    };
    let source_url = q.url.unwrap_or_default();
    let data = serde_json::to_vec(&handshake).map_err(|e| {
        warn!("handshake payload marshalling failed: {e}");
        ApiFail::internal()
    })?;
    let session = AuthSession::new(data, &source_url);
    state.authsessions.create(&session).await?;

    let location = format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
        provider.auth_url,
        urlencoding::encode(&secrets.key),
        urlencoding::encode(&redirect_uri(&state, provider.id)),
        urlencoding::encode(provider.scope),
        handshake.state,
    );
    let cookie = auth_session_cookie(
        session.id,
        state.cfg.secure_cookies(),
        auth_session_ttl().num_seconds(),
    );
    Ok((
        StatusCode::TEMPORARY_REDIRECT,
        [
            (header::SET_COOKIE, cookie),
            (header::LOCATION, location),
        ],
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

/// `GET /api/auth/oauth/:provider/callback` — finishes the handshake and
/// returns the popup-closing page.
pub async fn oauth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(provider_id): UrlPath<String>,
    Query(q): Query<CallbackQuery>,
) -> ApiResult<Response> {
    let provider =
        provider(&provider_id).ok_or_else(|| ApiFail::bad_request(ErrorId::IdpUnknown))?;
    let secrets = idp_secrets(&state, provider.id)?;

    let session_id = cookie_value(&headers, AUTH_SESSION_COOKIE)
        .and_then(|v| Uuid::parse_str(&v).ok())
        .ok_or_else(|| ApiFail::unauthorized(ErrorId::Unauthenticated))?;
    let session = match state.authsessions.take(session_id).await {
        Ok(s) => s,
        Err(Error::NotFound) => return Err(ApiFail::unauthorized(ErrorId::Unauthenticated)),
        Err(e) => return Err(e.into()),
    };
    let handshake: HandshakePayload = serde_json::from_slice(&session.data)
        .map_err(|_| ApiFail::unauthorized(ErrorId::Unauthenticated))?;
    if handshake.provider != provider.id {
        return Err(ApiFail::unauthorized(ErrorId::Unauthenticated));
    }
    if q.state.as_deref() != Some(handshake.state.as_str()) {
        return Err(ApiFail::with_details(
            StatusCode::UNAUTHORIZED,
            ErrorId::Unauthenticated,
            "auth session state mismatch",
        ));
    }
    let code = q
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiFail::unauthorized(ErrorId::Unauthenticated))?;

    let access_token = exchange_code(&state, provider, &secrets, &code)
        .await
        .map_err(|e| {
            warn!(provider = provider.id, "code exchange failed: {e:#}");
            ApiFail::unauthorized(ErrorId::Unauthenticated)
        })?;
    let identity = fetch_identity(&state, provider, &access_token)
        .await
        .map_err(|e| {
            warn!(provider = provider.id, "identity fetch failed: {e:#}");
            ApiFail::unauthorized(ErrorId::Unauthenticated)
        })?;

    let user = resolve_federated_user(&state, &headers, provider.id, &identity).await?;
    if let Some(url) = &identity.avatar_url {
        spawn_avatar_fetch(&state, user.id, url.clone());
    }
    finish_login(&state, &headers, &user).await
}

/// The subset of the provider's user record the service cares about.
#[derive(Debug)]
struct FederatedIdentity {
    subject: String,
    email: String,
    name: String,
    avatar_url: Option<String>,
}

async fn exchange_code(
    state: &AppState,
    provider: &IdProvider,
    secrets: &crate::config::IdpSecrets,
    code: &str,
) -> anyhow::Result<String> {
    let body = state
        .http
        .post(provider.token_url)
        .header(header::ACCEPT, "application/json")
        .form(&[
            ("client_id", secrets.key.as_str()),
            ("client_secret", secrets.secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", &redirect_uri(state, provider.id)),
        ])
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    parse_access_token(&body)
}

/// Extracts `access_token` from a token-exchange response. Providers answer
/// in JSON or, some of the older ones, in form-urlencoded; an explicit
/// `error` field wins over a missing token. The raw body is never surfaced so
/// tokens can't leak into logs.
fn parse_access_token(body: &str) -> anyhow::Result<String> {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(tok) = v.get("access_token").and_then(Value::as_str) {
            return Ok(tok.to_string());
        }
        if let Some(err) = v.get("error").and_then(Value::as_str) {
            let desc = v
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or("");
            anyhow::bail!("provider error {err:?}: {desc}");
        }
        anyhow::bail!("token response carries no access_token");
    }
    if body.contains('=') {
        let mut token = None;
        let mut error = None;
        for part in body.split('&') {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            let v = urlencoding::decode(v)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| v.to_string());
            match k {
                "access_token" => token = Some(v),
                "error" => error = Some(v),
                _ => {}
            }
        }
        if let Some(tok) = token {
            return Ok(tok);
        }
        if let Some(err) = error {
            anyhow::bail!("provider error {err:?}");
        }
        anyhow::bail!("token response carries no access_token");
    }
    anyhow::bail!("unrecognized token response format")
}

async fn fetch_identity(
    state: &AppState,
    provider: &IdProvider,
    access_token: &str,
) -> anyhow::Result<FederatedIdentity> {
    let v: Value = state
        .http
        .get(provider.userinfo_url)
        .bearer_auth(access_token)
        .header(header::ACCEPT, "application/json")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    extract_identity(&v)
}

/// Field names vary per provider; `(subject, email, name)` are all required.
fn extract_identity(v: &Value) -> anyhow::Result<FederatedIdentity> {
    let str_field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| v.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    };
    let subject = str_field(&["sub", "id"])
        .or_else(|| {
            // Numeric IDs (GitHub, GitLab) come back as JSON numbers.
            ["id", "sub"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_i64))
                .map(|n| n.to_string())
        })
        .ok_or_else(|| anyhow::anyhow!("provider user record lacks an id"))?;
    let email = str_field(&["email"])
        .filter(|e| !e.is_empty())
        .ok_or_else(|| anyhow::anyhow!("provider user record lacks an email"))?;
    let name = str_field(&["name", "login", "username"])
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow::anyhow!("provider user record lacks a name"))?;
    let avatar_url = str_field(&["picture", "avatar_url"]);
    Ok(FederatedIdentity {
        subject,
        email,
        name,
        avatar_url,
    })
}

/// The account-matching rules shared by OAuth and SSO.
async fn resolve_federated_user(
    state: &AppState,
    headers: &HeaderMap,
    idp: &str,
    identity: &FederatedIdentity,
) -> ApiResult<User> {
    match state.users.by_email(&identity.email).await {
        Err(Error::NotFound) => {
            // The IdP vouched for the email, so the account starts confirmed.
            let mut user = new_federated_user(
                &identity.email,
                &identity.name,
                idp,
                &identity.subject,
                &fingerprint(state, headers),
            );
            user.confirmed = true;
            state.users.create(&user).await?;
            if let Err(e) = state.plugins.user_created(&user).await {
                warn!("plugin user-create hook failed: {e:#}");
                return Err(ApiFail::internal());
            }
            Ok(user)
        }
        Err(e) => Err(e.into()),
        Ok(user) if user.is_local() => Err(ApiFail::bad_request(ErrorId::LoginLocally)),
        Ok(user) => match user.federated_idp.as_deref() {
            Some(stored) if stored != idp => Err(ApiFail::with_details(
                StatusCode::BAD_REQUEST,
                ErrorId::LoginUsingIdp,
                stored.to_string(),
            )),
            _ => {
                state
                    .users
                    .update_federated(user.id, &identity.email, &identity.name, &identity.subject)
                    .await?;
                state.users.by_id(user.id).await.map_err(Into::into)
            }
        },
    }
}

/// Issues the user session and answers with the popup-closing page.
async fn finish_login(state: &AppState, headers: &HeaderMap, user: &User) -> ApiResult<Response> {
    if let Err(f) = comentario_core::users::can_authenticate(user, true) {
        return Err(ApiFail::unauthorized(crate::errors::auth_failure_id(f)));
    }
    let session = state
        .users
        .create_session(user.id, &fingerprint(state, headers))
        .await?;
    let cookie = session_cookie(
        &encode_session(user.id, session.id),
        state.cfg.secure_cookies(),
        user_session_duration().num_seconds(),
    );
    let page = "<!DOCTYPE html><html><head><script>\
        if (window.opener) { window.opener.postMessage('auth.complete', '*'); }\
        window.close();\
        </script></head><body>Login successful. You can close this window.</body></html>";
    Ok((
        [(header::SET_COOKIE, cookie)],
        Html(page.to_string()),
    )
        .into_response())
}

fn spawn_avatar_fetch(state: &AppState, user_id: Uuid, url: String) {
    let http = state.http.clone();
    let users = state.users.clone();
    tokio::spawn(async move {
        let resp = match http
            .get(&url)
            .timeout(AVATAR_FETCH_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(r) => r,
            Err(e) => {
                debug!(url, "avatar fetch failed: {e}");
                return;
            }
        };
        let body = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                debug!(url, "avatar body read failed: {e}");
                return;
            }
        };
        if body.is_empty() || body.len() > AVATAR_MAX_BYTES {
            return;
        }
        if let Err(e) = users.set_avatar(user_id, &body).await {
            warn!(%user_id, "avatar store failed: {e}");
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct SsoInitQuery {
    pub host: String,
    pub url: Option<String>,
}

/// `GET /api/auth/sso` — hands the browser off to the domain's SSO endpoint
/// with an HMAC-signed one-shot token.
pub async fn sso_init(
    State(state): State<AppState>,
    Query(q): Query<SsoInitQuery>,
) -> ApiResult<Response> {
    let domain = match state.domains.by_host(&q.host).await {
        Ok(d) => d,
        Err(Error::NotFound) => {
            return Err(ApiFail::new(StatusCode::NOT_FOUND, ErrorId::UnknownHost))
        }
        Err(e) => return Err(e.into()),
    };
    if domain.sso_url.is_empty() || domain.sso_secret.is_empty() {
        return Err(ApiFail::bad_request(ErrorId::SsoMisconfigured));
    }
    let token = Token::new(
        ANONYMOUS_ID,
        SCOPE_FEDERATED_CALLBACK,
        ChronoDuration::minutes(15),
        false,
    );
    state.tokens.create(&token).await?;
    let hmac = hex::encode(util::hmac_sign(
        token.value.as_bytes(),
        domain.sso_secret.as_bytes(),
    ));
    let sep = if domain.sso_url.contains('?') { '&' } else { '?' };
    let location = format!("{}{sep}token={}&hmac={hmac}", domain.sso_url, token.value);
    Ok((
        StatusCode::TEMPORARY_REDIRECT,
        [(header::LOCATION, location)],
    )
        .into_response())
}

/// The identity payload the external SSO site posts back.
#[derive(Debug, Deserialize)]
struct SsoPayload {
    token: String,
    email: String,
    name: String,
    #[serde(default)]
    photo: String,
    // Part of the signed payload contract; there is no profile-link column to store it in.
    #[serde(default)]
    #[allow(dead_code)]
    link: String,
}

#[derive(Debug, Deserialize)]
pub struct SsoCallbackQuery {
    /// Hex-encoded JSON payload.
    pub payload: String,
    pub hmac: String,
}

/// `GET /api/auth/sso/callback` — verifies the signed payload and logs the
/// asserted identity in.
pub async fn sso_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<SsoCallbackQuery>,
) -> ApiResult<Response> {
    let payload_bytes = hex::decode(&q.payload)
        .map_err(|_| ApiFail::bad_request(ErrorId::InvalidPropValue))?;
    let sig =
        hex::decode(&q.hmac).map_err(|_| ApiFail::bad_request(ErrorId::InvalidPropValue))?;
    let payload: SsoPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|_| ApiFail::bad_request(ErrorId::InvalidPropValue))?;

    // The token pins the callback to the initiating domain and its secret.
    let token = match state.tokens.find(&payload.token, false).await {
        Ok(t) => t,
        Err(Error::NotFound) => return Err(ApiFail::bad_request(ErrorId::BadToken)),
        Err(e) => return Err(e.into()),
    };
    if !token.scope_in(&[SCOPE_FEDERATED_CALLBACK]) {
        return Err(ApiFail::bad_request(ErrorId::BadToken));
    }
    let host = fingerprint(&state, &headers).host;
    let domain = match state.domains.by_host(&host).await {
        Ok(d) => d,
        Err(Error::NotFound) => {
            return Err(ApiFail::new(StatusCode::NOT_FOUND, ErrorId::UnknownHost))
        }
        Err(e) => return Err(e.into()),
    };
    if domain.sso_secret.is_empty() {
        return Err(ApiFail::bad_request(ErrorId::SsoMisconfigured));
    }
    if !util::hmac_verify(&payload_bytes, &sig, domain.sso_secret.as_bytes()) {
        return Err(ApiFail::unauthorized(ErrorId::Unauthenticated));
    }
    state.tokens.spend(&token).await?;

    if payload.email.is_empty() || payload.name.is_empty() {
        return Err(ApiFail::bad_request(ErrorId::InvalidPropValue));
    }
    let identity = FederatedIdentity {
        subject: payload.email.clone(),
        email: payload.email,
        name: payload.name,
        avatar_url: (!payload.photo.is_empty()).then_some(payload.photo),
    };
    let user = resolve_federated_user(&state, &headers, "sso", &identity).await?;
    if let Some(url) = &identity.avatar_url {
        spawn_avatar_fetch(&state, user.id, url.clone());
    }
    finish_login(&state, &headers, &user).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_parse_json() {
        assert_eq!(
            parse_access_token(r#"{"access_token":"abc","token_type":"bearer"}"#).unwrap(),
            "abc"
        );
    }

    #[test]
    fn token_parse_form_urlencoded() {
        assert_eq!(
            parse_access_token("access_token=abc&token_type=bearer&scope=read%3Auser").unwrap(),
            "abc"
        );
    }

    #[test]
    fn token_parse_provider_error_wins() {
        let err = parse_access_token(r#"{"error":"bad_verification_code"}"#).unwrap_err();
        assert!(err.to_string().contains("bad_verification_code"));
        assert!(parse_access_token("error=access_denied").is_err());
        assert!(parse_access_token("garbage").is_err());
    }

    #[test]
    fn identity_requires_all_three_fields() {
        let full = serde_json::json!({"id": 42, "email": "a@b.c", "name": "A", "avatar_url": "x"});
        let id = extract_identity(&full).unwrap();
        assert_eq!(id.subject, "42");
        assert_eq!(id.avatar_url.as_deref(), Some("x"));

        let no_email = serde_json::json!({"id": "42", "name": "A"});
        assert!(extract_identity(&no_email).is_err());
        let no_name = serde_json::json!({"sub": "42", "email": "a@b.c"});
        assert!(extract_identity(&no_name).is_err());
    }

    #[test]
    fn known_providers_resolve() {
        for id in ["github", "gitlab", "google", "facebook", "twitter", "linkedin"] {
            assert!(provider(id).is_some(), "{id} missing");
        }
        assert!(provider("myspace").is_none());
    }
}
