/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The management API: domain CRUD and roles, dynamic configuration, and
//! user administration.

use crate::auth::{require_principal, UserInfo};
use crate::errors::{ApiFail, ApiResult};
use crate::plugins::PluginEvent;
use crate::AppState;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use comentario_core::config_store::{
    ConfigItem, UpdateError, DOMAIN_DEFAULTS_PREFIX, ITEM_CATALOGUE,
    KEY_OPERATION_NEW_OWNER_ENABLED,
};
use comentario_core::domains::{new_domain, Domain, DomainState, DomainUser, ModNotifyPolicy};
use comentario_core::users::Principal;
use comentario_core::{util, Error};
use comentario_protocol::ErrorId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// UUID path/body parsing with the dedicated error id.
pub fn parse_uuid(s: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(s).map_err(|_| ApiFail::bad_request(ErrorId::InvalidUuid))
}

#[derive(Debug, Serialize)]
pub struct DomainInfo {
    pub id: Uuid,
    pub host: String,
    pub name: String,
    pub state: &'static str,
    #[serde(rename = "requireIdentification")]
    pub require_identification: bool,
    #[serde(rename = "requireModeration")]
    pub require_moderation: bool,
    #[serde(rename = "moderateAnonymous")]
    pub moderate_anonymous: bool,
    #[serde(rename = "autoSpamFilter")]
    pub auto_spam_filter: bool,
    #[serde(rename = "modNotifyPolicy")]
    pub mod_notify_policy: &'static str,
    pub idps: Vec<String>,
    #[serde(rename = "ssoUrl")]
    pub sso_url: String,
    #[serde(rename = "defaultSort")]
    pub default_sort: String,
    #[serde(rename = "countComments")]
    pub count_comments: i64,
    #[serde(rename = "countViews")]
    pub count_views: i64,
}

impl From<&Domain> for DomainInfo {
    fn from(d: &Domain) -> Self {
        Self {
            id: d.id,
            host: d.host.clone(),
            name: d.name.clone(),
            state: d.state.as_str(),
            require_identification: d.require_identification,
            require_moderation: d.require_moderation,
            moderate_anonymous: d.moderate_anonymous,
            auto_spam_filter: d.auto_spam_filter,
            mod_notify_policy: d.mod_notify_policy.as_str(),
            idps: d.idps.clone(),
            sso_url: d.sso_url.clone(),
            default_sort: d.default_sort.clone(),
            count_comments: d.count_comments,
            count_views: d.count_views,
        }
    }
}

/// Loads the domain and asserts the principal owns it (superusers pass).
async fn owned_domain(state: &AppState, p: &Principal, id: Uuid) -> ApiResult<Domain> {
    let domain = state.domains.by_id(id).await?;
    if p.is_superuser() {
        return Ok(domain);
    }
    match state.domains.domain_user(domain.id, p.id()).await {
        Ok(du) if du.is_owner => Ok(domain),
        Ok(_) => Err(ApiFail::forbidden(ErrorId::NotDomainOwner)),
        Err(Error::NotFound) => Err(ApiFail::forbidden(ErrorId::NotDomainOwner)),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Serialize)]
pub struct DomainListEntry {
    #[serde(flatten)]
    pub domain: DomainInfo,
    #[serde(rename = "isOwner")]
    pub is_owner: bool,
    #[serde(rename = "isModerator")]
    pub is_moderator: bool,
}

/// `GET /api/domains` — the caller's domains, owners first.
pub async fn list_domains(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<DomainListEntry>>> {
    let p = require_principal(&state, &headers).await?;
    let list = state.domains.list_for_user(p.id()).await?;
    Ok(Json(
        list.iter()
            .map(|(d, du)| DomainListEntry {
                domain: DomainInfo::from(d),
                is_owner: du.is_owner,
                is_moderator: du.is_moderator,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct NewDomainRequest {
    pub host: String,
    pub name: String,
}

/// `POST /api/domains` — registers a domain and makes the caller its owner.
pub async fn create_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewDomainRequest>,
) -> ApiResult<(StatusCode, Json<DomainInfo>)> {
    let p = require_principal(&state, &headers).await?;
    let host = req.host.trim().to_lowercase();
    if host.is_empty() || host.contains('/') || req.name.trim().is_empty() {
        return Err(ApiFail::bad_request(ErrorId::InvalidPropValue));
    }
    // First-time owners are admitted only while the instance allows it.
    if !p.is_superuser()
        && !state.domains.user_owns_domains(p.id()).await?
        && !state.cfgstore.get_bool(KEY_OPERATION_NEW_OWNER_ENABLED).await
    {
        return Err(ApiFail::forbidden(ErrorId::NewOwnersForbidden));
    }
    match state.domains.by_host(&host).await {
        Ok(_) => return Err(ApiFail::bad_request(ErrorId::HostAlreadyExists)),
        Err(Error::NotFound) => {}
        Err(e) => return Err(e.into()),
    }

    let domain = new_domain(&host, req.name.trim());
    state.domains.create(&domain).await?;
    let mut du = state.domains.ensure_domain_user(domain.id, p.id()).await?;
    du.is_owner = true;
    du.is_moderator = true;
    state.domains.save_domain_user(&du).await?;

    if let Some(user) = p.user() {
        let mut user = user.clone();
        if let Err(e) = state
            .plugins
            .dispatch(&mut PluginEvent::UserBecomesOwner(&mut user))
            .await
        {
            warn!("plugin owner hook failed: {e:#}");
        }
    }
    Ok((StatusCode::CREATED, Json(DomainInfo::from(&domain))))
}

/// `GET /api/domains/:id`.
pub async fn get_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<DomainInfo>> {
    let p = require_principal(&state, &headers).await?;
    let domain = owned_domain(&state, &p, parse_uuid(&id)?).await?;
    Ok(Json(DomainInfo::from(&domain)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateDomainRequest {
    pub name: String,
    pub state: String,
    #[serde(rename = "requireIdentification")]
    pub require_identification: bool,
    #[serde(rename = "requireModeration")]
    pub require_moderation: bool,
    #[serde(rename = "moderateAnonymous")]
    pub moderate_anonymous: bool,
    #[serde(rename = "autoSpamFilter")]
    pub auto_spam_filter: bool,
    #[serde(rename = "modNotifyPolicy")]
    pub mod_notify_policy: String,
    #[serde(default)]
    pub idps: Vec<String>,
    #[serde(rename = "ssoUrl", default)]
    pub sso_url: String,
    #[serde(rename = "defaultSort", default = "default_sort_key")]
    pub default_sort: String,
}

fn default_sort_key() -> String {
    "td".to_string()
}

/// `PUT /api/domains/:id` — the host is immutable; everything else isn't.
pub async fn update_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
    Json(req): Json<UpdateDomainRequest>,
) -> ApiResult<Json<DomainInfo>> {
    let p = require_principal(&state, &headers).await?;
    let mut domain = owned_domain(&state, &p, parse_uuid(&id)?).await?;
    domain.name = req.name.trim().to_string();
    domain.state =
        DomainState::parse(&req.state).map_err(|_| ApiFail::bad_request(ErrorId::InvalidPropValue))?;
    domain.require_identification = req.require_identification;
    domain.require_moderation = req.require_moderation;
    domain.moderate_anonymous = req.moderate_anonymous;
    domain.auto_spam_filter = req.auto_spam_filter;
    domain.mod_notify_policy = ModNotifyPolicy::parse(&req.mod_notify_policy)
        .map_err(|_| ApiFail::bad_request(ErrorId::InvalidPropValue))?;
    domain.idps = req.idps;
    domain.sso_url = req.sso_url;
    if !["ta", "td", "sd"].contains(&req.default_sort.as_str()) {
        return Err(ApiFail::bad_request(ErrorId::InvalidPropValue));
    }
    domain.default_sort = req.default_sort;
    state.domains.update(&domain).await?;
    Ok(Json(DomainInfo::from(&domain)))
}

/// `DELETE /api/domains/:id` — cascades over the domain's whole subtree.
pub async fn delete_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    let domain = owned_domain(&state, &p, parse_uuid(&id)?).await?;
    state.domains.delete(domain.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct SsoSecretResponse {
    #[serde(rename = "ssoSecret")]
    pub sso_secret: String,
}

/// `POST /api/domains/:id/sso-secret` — rotates the shared secret. The old
/// one stops verifying immediately.
pub async fn rotate_sso_secret(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<SsoSecretResponse>> {
    let p = require_principal(&state, &headers).await?;
    let domain = owned_domain(&state, &p, parse_uuid(&id)?).await?;
    let secret = state.domains.new_sso_secret(domain.id).await?;
    Ok(Json(SsoSecretResponse { sso_secret: secret }))
}

#[derive(Debug, Serialize)]
pub struct DomainUserInfo {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    #[serde(rename = "isOwner")]
    pub is_owner: bool,
    #[serde(rename = "isModerator")]
    pub is_moderator: bool,
    #[serde(rename = "isCommenter")]
    pub is_commenter: bool,
    #[serde(rename = "notifyReplies")]
    pub notify_replies: bool,
    #[serde(rename = "notifyModerator")]
    pub notify_moderator: bool,
}

impl From<&DomainUser> for DomainUserInfo {
    fn from(du: &DomainUser) -> Self {
        Self {
            user_id: du.user_id,
            is_owner: du.is_owner,
            is_moderator: du.is_moderator,
            is_commenter: du.is_commenter,
            notify_replies: du.notify_replies,
            notify_moderator: du.notify_moderator,
        }
    }
}

/// `GET /api/domains/:id/moderators`.
pub async fn list_moderators(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<Vec<DomainUserInfo>>> {
    let p = require_principal(&state, &headers).await?;
    let domain = owned_domain(&state, &p, parse_uuid(&id)?).await?;
    let mods = state.domains.moderators(domain.id).await?;
    Ok(Json(mods.iter().map(DomainUserInfo::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct RolesRequest {
    #[serde(rename = "isOwner")]
    pub is_owner: bool,
    #[serde(rename = "isModerator")]
    pub is_moderator: bool,
    #[serde(rename = "isCommenter")]
    pub is_commenter: bool,
}

/// `PUT /api/domains/:id/users/:user_id` — assigns roles on the domain.
pub async fn save_domain_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath((id, user_id)): UrlPath<(String, String)>,
    Json(req): Json<RolesRequest>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    let domain = owned_domain(&state, &p, parse_uuid(&id)?).await?;
    let user_id = parse_uuid(&user_id)?;
    let user = state.users.by_id(user_id).await?;
    let mut du = state.domains.ensure_domain_user(domain.id, user_id).await?;
    let becomes_owner = req.is_owner && !du.is_owner;
    du.is_owner = req.is_owner;
    du.is_moderator = req.is_moderator;
    du.is_commenter = req.is_commenter;
    state.domains.save_domain_user(&du).await?;
    if becomes_owner {
        let mut user = user;
        if let Err(e) = state
            .plugins
            .dispatch(&mut PluginEvent::UserBecomesOwner(&mut user))
            .await
        {
            warn!("plugin owner hook failed: {e:#}");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ReadonlyRequest {
    pub readonly: bool,
}

/// `PUT /api/domains/:id/pages/:page_id/readonly` — freezes one page.
pub async fn set_page_readonly(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath((id, page_id)): UrlPath<(String, String)>,
    Json(req): Json<ReadonlyRequest>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    let domain_id = parse_uuid(&id)?;
    let page_id = parse_uuid(&page_id)?;
    if !p.is_superuser() {
        let du = match state.domains.domain_user(domain_id, p.id()).await {
            Ok(du) => du,
            Err(Error::NotFound) => return Err(ApiFail::forbidden(ErrorId::NotModerator)),
            Err(e) => return Err(e.into()),
        };
        if !du.can_moderate() {
            return Err(ApiFail::forbidden(ErrorId::NotModerator));
        }
    }
    let page = state.pages.by_id(page_id).await?;
    if page.domain_id != domain_id {
        return Err(ApiFail::not_found());
    }
    state.pages.set_readonly(page_id, req.readonly).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ConfigItemInfo {
    pub key: String,
    pub value: String,
    #[serde(rename = "defaultValue")]
    pub default_value: String,
}

impl From<ConfigItem> for ConfigItemInfo {
    fn from(item: ConfigItem) -> Self {
        Self {
            key: item.key,
            value: item.value,
            default_value: item.default_value,
        }
    }
}

fn config_fail(e: UpdateError) -> ApiFail {
    match e {
        UpdateError::Validation(v) => ApiFail::with_details(
            StatusCode::BAD_REQUEST,
            ErrorId::InvalidPropValue,
            v.to_string(),
        ),
        UpdateError::Db(e) => e.into(),
    }
}

/// `GET /api/config` — every instance item with its effective value.
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<Vec<ConfigItemInfo>>> {
    let mut items = Vec::with_capacity(ITEM_CATALOGUE.len());
    for spec in ITEM_CATALOGUE {
        items.push(ConfigItemInfo::from(state.cfgstore.get(spec.key).await?));
    }
    Ok(Json(items))
}

/// `PUT /api/config` — superuser-only atomic multi-key write.
pub async fn update_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(updates): Json<HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    if !p.is_superuser() {
        return Err(ApiFail::forbidden(ErrorId::NotModerator));
    }
    state
        .cfgstore
        .update(p.id(), &updates)
        .await
        .map_err(config_fail)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/domains/:id/config` — the domain's effective override view.
pub async fn get_domain_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<Vec<ConfigItemInfo>>> {
    let p = require_principal(&state, &headers).await?;
    let domain = owned_domain(&state, &p, parse_uuid(&id)?).await?;
    let mut items = Vec::new();
    for spec in ITEM_CATALOGUE {
        let Some(key) = spec.key.strip_prefix(DOMAIN_DEFAULTS_PREFIX) else {
            continue;
        };
        items.push(ConfigItemInfo::from(
            state.cfgstore.domain_get(domain.id, key).await?,
        ));
    }
    Ok(Json(items))
}

/// `PUT /api/domains/:id/config`.
pub async fn update_domain_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
    Json(updates): Json<HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    let domain = owned_domain(&state, &p, parse_uuid(&id)?).await?;
    state
        .cfgstore
        .domain_update(p.id(), domain.id, &updates)
        .await
        .map_err(config_fail)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub banned: bool,
}

/// `PUT /api/users/:id/ban` — superuser only; plugins observe the change.
pub async fn ban_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
    Json(req): Json<BanRequest>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    if !p.is_superuser() {
        return Err(ApiFail::forbidden(ErrorId::NotModerator));
    }
    let user_id = parse_uuid(&id)?;
    let user = state.users.by_id(user_id).await?;
    if user.is_system || user.id == p.id() {
        return Err(ApiFail::bad_request(ErrorId::ImmutableProperty));
    }
    state.users.set_banned(user_id, req.banned).await?;
    if let Err(e) = state.plugins.user_ban_status(&user, req.banned).await {
        warn!("plugin ban hook failed: {e:#}");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    pub locked: bool,
}

/// `PUT /api/users/:id/lock` — superuser only.
pub async fn lock_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
    Json(req): Json<LockRequest>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    if !p.is_superuser() {
        return Err(ApiFail::forbidden(ErrorId::NotModerator));
    }
    let user_id = parse_uuid(&id)?;
    let user = state.users.by_id(user_id).await?;
    if user.is_system {
        return Err(ApiFail::bad_request(ErrorId::ImmutableProperty));
    }
    state.users.set_locked(user_id, req.locked).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/users/:id` — superuser view of any account.
pub async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<UserInfo>> {
    let p = require_principal(&state, &headers).await?;
    if !p.is_superuser() {
        return Err(ApiFail::forbidden(ErrorId::NotModerator));
    }
    let user = state.users.by_id(parse_uuid(&id)?).await?;
    Ok(Json(UserInfo::from(&user)))
}

/// `DELETE /api/users/:id` — self-service or superuser. Owners must hand over
/// or delete their domains first.
pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    let user_id = parse_uuid(&id)?;
    if user_id != p.id() && !p.is_superuser() {
        return Err(ApiFail::forbidden(ErrorId::NotModerator));
    }
    let user = state.users.by_id(user_id).await?;
    if user.is_system {
        return Err(ApiFail::bad_request(ErrorId::ImmutableProperty));
    }
    if state.domains.user_owns_domains(user_id).await? {
        return Err(ApiFail::bad_request(ErrorId::OwnerHasDomains));
    }
    state.users.delete(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/users/:id/avatar` — raw JPEG bytes, 404 when absent.
pub async fn get_avatar(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Response> {
    let user_id = parse_uuid(&id)?;
    let image = state.users.avatar(user_id).await?;
    Ok((
        [(header::CONTENT_TYPE, "image/jpeg")],
        image,
    )
        .into_response())
}

/// Liveness probe.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness: answers 200 only while the DB pool hands out connections.
pub async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.db.ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

// Keeps the masked-IP helper reachable from admin views of sessions.
pub fn masked_ip_for_display(ip: &str, log_full_ips: bool) -> String {
    if log_full_ips {
        ip.to_string()
    } else {
        util::mask_ip(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_parsing_maps_to_invalid_uuid() {
        assert!(parse_uuid(&Uuid::new_v4().to_string()).is_ok());
        let err = parse_uuid("not-a-uuid").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn validation_failure_maps_to_invalid_prop_value() {
        let e = UpdateError::Validation(
            comentario_core::config_store::ValidationError::UnknownKey("x".into()),
        );
        let fail = config_fail(e);
        assert_eq!(fail.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn display_ip_masking_honours_flag() {
        assert_eq!(masked_ip_for_display("10.20.30.40", true), "10.20.30.40");
        assert_eq!(masked_ip_for_display("10.20.30.40", false), "10.20.x.x");
    }
}
