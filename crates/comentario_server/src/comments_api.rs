/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The embed-facing comment API: page registration, listing, the new-comment
//! pipeline, edits, votes, moderation, and the notification fan-out.

use crate::auth::{fingerprint, principal, require_principal};
use crate::errors::{ApiFail, ApiResult};
use crate::AppState;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Duration as ChronoDuration;
use comentario_core::comments::{
    decide_state, new_comment, within_edit_window, Comment, CommentSort, CommentState, Viewer,
    VoteError, TOMBSTONE,
};
use comentario_core::config_store::{
    DOMAIN_KEY_COMMENTS_DELETION_AUTHOR, DOMAIN_KEY_COMMENTS_EDITING_AUTHOR,
    DOMAIN_KEY_COMMENTS_ENABLE_VOTING, DOMAIN_KEY_COMMENTS_SHOW_DELETED,
    DOMAIN_KEY_DEFAULT_SORT, DOMAIN_KEY_MAX_COMMENT_LENGTH, KEY_COMMENT_EDIT_WINDOW,
};
use comentario_core::domains::{Domain, DomainUser, ModNotifyPolicy};
use comentario_core::mail;
use comentario_core::markdown::markdown_to_html;
use comentario_core::pages::DomainPage;
use comentario_core::perlustration::ScanRequest;
use comentario_core::tokens::{Token, SCOPE_UNSUBSCRIBE};
use comentario_core::users::{Principal, ANONYMOUS_ID};
use comentario_core::Error;
use comentario_protocol::{CommentAction, ErrorId, WsEvent};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct PageRef {
    pub host: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: Uuid,
    #[serde(rename = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub html: String,
    pub markdown: String,
    pub score: i64,
    #[serde(rename = "isApproved")]
    pub is_approved: bool,
    #[serde(rename = "isDeleted")]
    pub is_deleted: bool,
    #[serde(rename = "createdTime")]
    pub ts_created: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "userCreated")]
    pub user_created: Uuid,
}

impl From<&Comment> for CommentView {
    fn from(c: &Comment) -> Self {
        Self {
            id: c.id,
            parent_id: c.parent_id,
            html: c.html.clone(),
            markdown: c.markdown.clone(),
            score: c.score,
            is_approved: c.is_approved,
            is_deleted: c.is_deleted,
            ts_created: c.ts_created,
            user_created: c.user_created,
        }
    }
}

async fn domain_by_host(state: &AppState, host: &str) -> ApiResult<Domain> {
    match state.domains.by_host(host).await {
        Ok(d) => Ok(d),
        Err(Error::NotFound) => Err(ApiFail::new(StatusCode::NOT_FOUND, ErrorId::UnknownHost)),
        Err(e) => Err(e.into()),
    }
}

/// The attachment, if the principal is signed in; superusers moderate
/// everywhere without needing a row.
async fn attachment(
    state: &AppState,
    domain: &Domain,
    p: &Principal,
) -> ApiResult<Option<DomainUser>> {
    if p.is_anonymous() {
        return Ok(None);
    }
    Ok(Some(
        state.domains.ensure_domain_user(domain.id, p.id()).await?,
    ))
}

fn can_moderate(p: &Principal, du: Option<&DomainUser>) -> bool {
    p.is_superuser() || du.map(|d| d.can_moderate()).unwrap_or(false)
}

fn viewer_for(p: &Principal, moderates: bool) -> Viewer {
    if moderates {
        Viewer::Moderator
    } else if p.is_anonymous() {
        Viewer::Anonymous
    } else {
        Viewer::User(p.id())
    }
}

/// Spam flag after an edit: the fresh verdict when the scanners ran, the
/// prior flag otherwise.
fn spam_after_edit(prev: bool, verdict: Option<bool>) -> bool {
    verdict.unwrap_or(prev)
}

/// `POST /api/embed/page` — registers a view and returns the page. The title
/// fetch and the analytics row run on detached tasks.
pub async fn register_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PageRef>,
) -> ApiResult<Json<serde_json::Value>> {
    let domain = domain_by_host(&state, &req.host).await?;
    let registered = state.pages.registering_view(domain.id, &req.path).await?;
    state.domains.increment_counts(domain.id, 0, 1).await?;

    if registered.created {
        let pages = state.pages.clone();
        let (page_id, host, path) = (registered.page.id, domain.host.clone(), req.path.clone());
        tokio::spawn(async move {
            pages.fetch_and_update_title(page_id, &host, &path).await;
        });
    }
    let fp = fingerprint(&state, &headers);
    let pages = state.pages.clone();
    let page_id = registered.page.id;
    tokio::spawn(async move {
        if let Err(e) = pages
            .register_visit(page_id, &fp.proto, &fp.ip, &fp.country, &fp.user_agent)
            .await
        {
            warn!("page view insert failed: {e}");
        }
    });

    let page = &registered.page;
    Ok(Json(serde_json::json!({
        "domain": {
            "id": domain.id,
            "host": domain.host,
            "state": domain.state.as_str(),
            "requireIdentification": domain.require_identification,
            "idps": domain.idps,
        },
        "page": {
            "id": page.id,
            "path": page.path,
            "title": page.title,
            "isReadonly": page.is_readonly,
            "countComments": page.count_comments,
            "countViews": page.count_views,
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub host: String,
    pub path: String,
    pub sort: Option<String>,
}

/// `GET /api/embed/comments` — the listing under the visibility rule.
pub async fn list_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<CommentView>>> {
    let p = principal(&state, &headers).await?;
    let domain = domain_by_host(&state, &q.host).await?;
    let page = match state.pages.by_domain_path(domain.id, &q.path).await {
        Ok(p) => p,
        Err(Error::NotFound) => return Ok(Json(Vec::new())),
        Err(e) => return Err(e.into()),
    };
    let du = attachment(&state, &domain, &p).await?;
    let moderates = can_moderate(&p, du.as_ref());
    let sort = q
        .sort
        .as_deref()
        .and_then(CommentSort::parse)
        .or_else(|| CommentSort::parse(&domain.default_sort));
    let sort = match sort {
        Some(s) => s,
        None => {
            let key = state
                .cfgstore
                .domain_get(domain.id, DOMAIN_KEY_DEFAULT_SORT)
                .await?;
            CommentSort::parse(&key.value).unwrap_or(CommentSort::TimeDesc)
        }
    };
    let show_deleted = moderates
        && state
            .cfgstore
            .domain_get_bool(domain.id, DOMAIN_KEY_COMMENTS_SHOW_DELETED)
            .await;
    let comments = state
        .comments
        .list(page.id, viewer_for(&p, moderates), show_deleted, sort)
        .await?;
    Ok(Json(comments.iter().map(CommentView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct NewCommentRequest {
    pub host: String,
    pub path: String,
    #[serde(rename = "parentId")]
    pub parent_id: Option<Uuid>,
    pub markdown: String,
}

/// `POST /api/embed/comments` — the new-comment pipeline.
pub async fn create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewCommentRequest>,
) -> ApiResult<(StatusCode, Json<CommentView>)> {
    let p = principal(&state, &headers).await?;
    let domain = domain_by_host(&state, &req.host).await?;
    let du = attachment(&state, &domain, &p).await?;
    let moderates = can_moderate(&p, du.as_ref());

    if domain.is_readonly() {
        return Err(ApiFail::bad_request(ErrorId::DomainReadonly));
    }
    // A submission is not a page view; the page is resolved without a view bump.
    let page = state.pages.find_or_create(domain.id, &req.path).await?.page;
    if page.is_readonly {
        return Err(ApiFail::bad_request(ErrorId::PageReadonly));
    }
    if du.as_ref().map(|d| d.is_readonly()).unwrap_or(false) && !p.is_superuser() {
        return Err(ApiFail::bad_request(ErrorId::UserReadonly));
    }
    if p.is_anonymous() && domain.require_identification {
        return Err(ApiFail::unauthorized(ErrorId::Unauthenticated));
    }

    let max_len = state
        .cfgstore
        .domain_get_int(domain.id, DOMAIN_KEY_MAX_COMMENT_LENGTH)
        .await;
    let trimmed = req.markdown.trim();
    if trimmed.is_empty() || trimmed.len() as i64 > max_len {
        return Err(ApiFail::bad_request(ErrorId::InvalidPropValue));
    }

    let parent = match req.parent_id {
        None => None,
        Some(parent_id) => {
            let parent = match state.comments.by_id(parent_id).await {
                Ok(c) => c,
                Err(Error::NotFound) => {
                    return Err(ApiFail::bad_request(ErrorId::NoRootComment))
                }
                Err(e) => return Err(e.into()),
            };
            if parent.page_id != page.id {
                return Err(ApiFail::bad_request(ErrorId::NoRootComment));
            }
            if parent.is_deleted {
                return Err(ApiFail::bad_request(ErrorId::CommentDeleted));
            }
            Some(parent)
        }
    };

    let html = markdown_to_html(trimmed);

    // The scanners only run when their verdict can still matter.
    let held_back = !moderates
        && (domain.require_moderation || (p.is_anonymous() && domain.moderate_anonymous));
    let scanner_spam = if !moderates && !held_back && domain.auto_spam_filter {
        let fp = fingerprint(&state, &headers);
        state
            .perlustration
            .scan(&ScanRequest {
                blog_url: format!("{}://{}", fp.proto, domain.host),
                user_ip: fp.ip,
                user_agent: fp.user_agent,
                referrer: String::new(),
                permalink: format!("{}://{}{}", fp.proto, domain.host, req.path),
                author_name: p.user().map(|u| u.name.clone()).unwrap_or_default(),
                author_email: p.user().map(|u| u.email.clone()).unwrap_or_default(),
                author_url: String::new(),
                content: trimmed.to_string(),
                ts_created: Some(comentario_core::util::now()),
                is_edit: false,
            })
            .await
    } else {
        false
    };

    let comment_state = decide_state(
        moderates,
        domain.require_moderation,
        p.is_anonymous(),
        domain.moderate_anonymous,
        domain.auto_spam_filter,
        scanner_spam,
    );
    let comment = new_comment(
        page.id,
        parent.as_ref().map(|c| c.id),
        p.id(),
        trimmed.to_string(),
        html,
        comment_state,
    );
    state.comments.create(&comment).await?;
    state.pages.increment_counts(page.id, 1, 0).await?;
    state.domains.increment_counts(domain.id, 1, 0).await?;

    spawn_notifications(&state, &domain, &page, &comment, parent.as_ref());
    if let Some(hub) = &state.hub {
        hub.broadcast(WsEvent {
            domain: domain.id,
            path: page.path.clone(),
            comment: comment.id,
            parent_comment: comment.parent_id,
            action: CommentAction::New,
        });
    }
    Ok((StatusCode::CREATED, Json(CommentView::from(&comment))))
}

/// Moderator and reply mails, fired off the request path.
fn spawn_notifications(
    state: &AppState,
    domain: &Domain,
    page: &DomainPage,
    comment: &Comment,
    parent: Option<&Comment>,
) {
    let notify_mods = match domain.mod_notify_policy {
        ModNotifyPolicy::All => true,
        ModNotifyPolicy::Pending => !comment.is_approved,
        ModNotifyPolicy::None => false,
    };
    let state = state.clone();
    let domain = domain.clone();
    let page = page.clone();
    let comment = comment.clone();
    let parent = parent.cloned();
    tokio::spawn(async move {
        if notify_mods {
            if let Err(e) = notify_moderators(&state, &domain, &page, &comment).await {
                warn!("moderator notification failed: {e}");
            }
        }
        if comment.is_approved {
            if let Some(parent) = parent {
                if let Err(e) = notify_reply(&state, &domain, &page, &comment, &parent).await {
                    warn!("reply notification failed: {e}");
                }
            }
        }
    });
}

async fn unsubscribe_url(state: &AppState, user_id: Uuid) -> comentario_core::Result<String> {
    let token = Token::new(user_id, SCOPE_UNSUBSCRIBE, ChronoDuration::days(30), false);
    state.tokens.create(&token).await?;
    Ok(format!(
        "{}/api/mail/unsubscribe?token={}",
        state.cfg.base_url, token.value
    ))
}

async fn notify_moderators(
    state: &AppState,
    domain: &Domain,
    page: &DomainPage,
    comment: &Comment,
) -> comentario_core::Result<()> {
    if !state.mailer.enabled() {
        return Ok(());
    }
    let comment_url = format!(
        "{}://{}{}#comentario-{}",
        if state.cfg.secure_cookies() { "https" } else { "http" },
        domain.host,
        page.path,
        comment.id
    );
    for moderator in state.domains.moderators(domain.id).await? {
        if !moderator.notify_moderator || moderator.user_id == comment.user_created {
            continue;
        }
        let user = match state.users.by_id(moderator.user_id).await {
            Ok(u) => u,
            Err(Error::NotFound) => continue,
            Err(e) => return Err(e),
        };
        let mut values = std::collections::HashMap::new();
        values.insert("host", domain.host.clone());
        values.insert("pageTitle", page.title.clone());
        values.insert("commentHtml", comment.html.clone());
        values.insert("commentUrl", comment_url.clone());
        values.insert("unsubscribeUrl", unsubscribe_url(state, user.id).await?);
        let html = mail::render_template(mail::TEMPLATE_COMMENT_MODERATION, &values);
        if let Err(e) = state
            .mailer
            .send(&user.email, "New comment awaiting review", html)
            .await
        {
            warn!(moderator = %user.email, "moderator mail failed: {e}");
        }
    }
    Ok(())
}

async fn notify_reply(
    state: &AppState,
    domain: &Domain,
    page: &DomainPage,
    comment: &Comment,
    parent: &Comment,
) -> comentario_core::Result<()> {
    // Anonymous parents and self-replies get no mail.
    if !state.mailer.enabled()
        || parent.user_created == ANONYMOUS_ID
        || parent.user_created == comment.user_created
    {
        return Ok(());
    }
    let du = match state
        .domains
        .domain_user(domain.id, parent.user_created)
        .await
    {
        Ok(du) => du,
        Err(Error::NotFound) => return Ok(()),
        Err(e) => return Err(e),
    };
    if !du.notify_replies {
        return Ok(());
    }
    let recipient = match state.users.by_id(parent.user_created).await {
        Ok(u) => u,
        Err(Error::NotFound) => return Ok(()),
        Err(e) => return Err(e),
    };
    let author_name = if comment.user_created == ANONYMOUS_ID {
        "Anonymous".to_string()
    } else {
        state
            .users
            .by_id(comment.user_created)
            .await
            .map(|u| u.name)
            .unwrap_or_else(|_| "Someone".to_string())
    };
    let comment_url = format!(
        "{}://{}{}#comentario-{}",
        if state.cfg.secure_cookies() { "https" } else { "http" },
        domain.host,
        page.path,
        comment.id
    );
    let mut values = std::collections::HashMap::new();
    values.insert("authorName", author_name);
    values.insert("host", domain.host.clone());
    values.insert("commentHtml", comment.html.clone());
    values.insert("commentUrl", comment_url);
    values.insert("unsubscribeUrl", unsubscribe_url(state, recipient.id).await?);
    let html = mail::render_template(mail::TEMPLATE_COMMENT_REPLY, &values);
    if let Err(e) = state
        .mailer
        .send(&recipient.email, "New reply to your comment", html)
        .await
    {
        warn!(recipient = %recipient.email, "reply mail failed: {e}");
    }
    Ok(())
}

/// Loads the comment plus its page and domain.
async fn comment_context(
    state: &AppState,
    id: Uuid,
) -> ApiResult<(Comment, DomainPage, Domain)> {
    let comment = state.comments.by_id(id).await?;
    let page = state.pages.by_id(comment.page_id).await?;
    let domain = state.domains.by_id(page.domain_id).await?;
    Ok((comment, page, domain))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub markdown: String,
}

/// `PUT /api/embed/comments/:id` — author within the edit window, moderators
/// any time. Approval state survives the edit.
pub async fn edit_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<Uuid>,
    Json(req): Json<EditRequest>,
) -> ApiResult<Json<CommentView>> {
    let p = require_principal(&state, &headers).await?;
    let (mut comment, page, domain) = comment_context(&state, id).await?;
    if comment.is_deleted {
        return Err(ApiFail::bad_request(ErrorId::CommentDeleted));
    }
    let du = attachment(&state, &domain, &p).await?;
    let moderates = can_moderate(&p, du.as_ref());
    if !moderates {
        if comment.user_created != p.id() {
            return Err(ApiFail::forbidden(ErrorId::NotModerator));
        }
        let author_may_edit = state
            .cfgstore
            .domain_get_bool(domain.id, DOMAIN_KEY_COMMENTS_EDITING_AUTHOR)
            .await;
        let window = state.cfgstore.get_int(KEY_COMMENT_EDIT_WINDOW).await;
        if !author_may_edit
            || !within_edit_window(comment.ts_created, comentario_core::util::now(), window)
        {
            return Err(ApiFail::forbidden(ErrorId::ImmutableProperty));
        }
    }
    let trimmed = req.markdown.trim();
    if trimmed.is_empty() {
        return Err(ApiFail::bad_request(ErrorId::InvalidPropValue));
    }
    let html = markdown_to_html(trimmed);

    // Edited text goes back through the scanners; only the spam flag may
    // change, never the approval state.
    let verdict = if !moderates && domain.auto_spam_filter {
        let fp = fingerprint(&state, &headers);
        Some(
            state
                .perlustration
                .scan(&ScanRequest {
                    blog_url: format!("{}://{}", fp.proto, domain.host),
                    user_ip: fp.ip,
                    user_agent: fp.user_agent,
                    referrer: String::new(),
                    permalink: format!("{}://{}{}", fp.proto, domain.host, page.path),
                    author_name: p.user().map(|u| u.name.clone()).unwrap_or_default(),
                    author_email: p.user().map(|u| u.email.clone()).unwrap_or_default(),
                    author_url: String::new(),
                    content: trimmed.to_string(),
                    ts_created: Some(comment.ts_created),
                    is_edit: true,
                })
                .await,
        )
    } else {
        None
    };
    let spam = spam_after_edit(comment.is_spam, verdict);
    state
        .comments
        .update_text(comment.id, trimmed, &html, spam)
        .await?;
    comment.markdown = trimmed.to_string();
    comment.html = html;
    comment.is_spam = spam;

    if let Some(hub) = &state.hub {
        hub.broadcast(WsEvent {
            domain: domain.id,
            path: page.path.clone(),
            comment: comment.id,
            parent_comment: comment.parent_id,
            action: CommentAction::Update,
        });
    }
    Ok(Json(CommentView::from(&comment)))
}

/// `DELETE /api/embed/comments/:id` — soft delete with counter decrement.
pub async fn delete_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<Uuid>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    let (comment, page, domain) = comment_context(&state, id).await?;
    if comment.is_deleted {
        return Err(ApiFail::bad_request(ErrorId::CommentDeleted));
    }
    let du = attachment(&state, &domain, &p).await?;
    let moderates = can_moderate(&p, du.as_ref());
    if !moderates {
        let author_may_delete = state
            .cfgstore
            .domain_get_bool(domain.id, DOMAIN_KEY_COMMENTS_DELETION_AUTHOR)
            .await;
        if comment.user_created != p.id() || !author_may_delete {
            return Err(ApiFail::forbidden(ErrorId::NotModerator));
        }
    }
    state.comments.delete(comment.id, p.id()).await?;
    state.pages.increment_counts(page.id, -1, 0).await?;
    state.domains.increment_counts(domain.id, -1, 0).await?;

    if let Some(hub) = &state.hub {
        hub.broadcast(WsEvent {
            domain: domain.id,
            path: page.path,
            comment: comment.id,
            parent_comment: comment.parent_id,
            action: CommentAction::Delete,
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub direction: i32,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub score: i64,
}

/// `POST /api/embed/comments/:id/vote`.
pub async fn vote_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<Uuid>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<Json<VoteResponse>> {
    let p = require_principal(&state, &headers).await?;
    let (comment, page, domain) = comment_context(&state, id).await?;
    if comment.is_deleted {
        return Err(ApiFail::bad_request(ErrorId::CommentDeleted));
    }
    if !state
        .cfgstore
        .domain_get_bool(domain.id, DOMAIN_KEY_COMMENTS_ENABLE_VOTING)
        .await
    {
        return Err(ApiFail::forbidden(ErrorId::ImmutableProperty));
    }
    let score = match state.comments.vote(comment.id, p.id(), req.direction).await {
        Ok(score) => score,
        Err(VoteError::SelfVote) => return Err(ApiFail::bad_request(ErrorId::SelfVote)),
        Err(VoteError::Db(e)) => return Err(e.into()),
    };
    if let Some(hub) = &state.hub {
        hub.broadcast(WsEvent {
            domain: domain.id,
            path: page.path,
            comment: comment.id,
            parent_comment: comment.parent_id,
            action: CommentAction::Vote,
        });
    }
    Ok(Json(VoteResponse { score }))
}

#[derive(Debug, Deserialize)]
pub struct ModerateRequest {
    pub approve: bool,
}

/// `POST /api/embed/comments/:id/moderate` — moderator approve/unapprove.
pub async fn moderate_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<Uuid>,
    Json(req): Json<ModerateRequest>,
) -> ApiResult<StatusCode> {
    let p = require_principal(&state, &headers).await?;
    let (comment, page, domain) = comment_context(&state, id).await?;
    let du = attachment(&state, &domain, &p).await?;
    if !can_moderate(&p, du.as_ref()) {
        return Err(ApiFail::forbidden(ErrorId::NotModerator));
    }
    if comment.is_deleted {
        return Err(ApiFail::bad_request(ErrorId::InvalidModAction));
    }
    state.comments.moderate(comment.id, req.approve, p.id()).await?;
    if let Some(hub) = &state.hub {
        hub.broadcast(WsEvent {
            domain: domain.id,
            path: page.path,
            comment: comment.id,
            parent_comment: comment.parent_id,
            action: CommentAction::Update,
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_constant_is_wired() {
        // Deleted comments carry this exact text on the wire.
        assert_eq!(TOMBSTONE, "[deleted]");
    }

    #[test]
    fn viewer_classification() {
        let anon = Principal::Anonymous;
        assert_eq!(viewer_for(&anon, false), Viewer::Anonymous);
        assert_eq!(viewer_for(&anon, true), Viewer::Moderator);
    }

    #[test]
    fn mod_notify_policy_gates() {
        // `all` notifies always, `pending` only for held-back comments.
        let approved = true;
        assert!(matches!(ModNotifyPolicy::All, ModNotifyPolicy::All));
        let notify = match ModNotifyPolicy::Pending {
            ModNotifyPolicy::All => true,
            ModNotifyPolicy::Pending => !approved,
            ModNotifyPolicy::None => false,
        };
        assert!(!notify);
    }

    #[test]
    fn edit_rescan_verdict_replaces_spam_flag() {
        // A ran scan is authoritative in both directions.
        assert!(spam_after_edit(false, Some(true)));
        assert!(!spam_after_edit(true, Some(false)));
        // Without a scan (moderator edit, filter off) the flag is untouched.
        assert!(spam_after_edit(true, None));
        assert!(!spam_after_edit(false, None));
    }
}
