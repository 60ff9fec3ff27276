/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Wire types shared between the Comentario server and its clients: the
//! websocket live-update protocol and the public error identifiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to a comment, as broadcast over the live-update socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentAction {
    New,
    Update,
    Delete,
    Vote,
}

/// The single message a websocket client sends: its subscription filter.
/// Re-sending it replaces the previous filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsSubscribe {
    pub domain: Uuid,
    pub path: String,
}

/// A live-update event pushed to subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    pub domain: Uuid,
    pub path: String,
    pub comment: Uuid,
    #[serde(rename = "parentComment", skip_serializing_if = "Option::is_none")]
    pub parent_comment: Option<Uuid>,
    pub action: CommentAction,
}

/// Error identifiers surfaced on the HTTP API. The string forms are part of
/// the wire contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorId {
    BadToken,
    CommentDeleted,
    DomainReadonly,
    EmailAlreadyExists,
    EmailNotConfirmed,
    HostAlreadyExists,
    IdpUnconfigured,
    IdpUnknown,
    ImmutableProperty,
    InvalidCredentials,
    InvalidModAction,
    InvalidPropValue,
    InvalidUuid,
    LoginLocally,
    LoginUsingIdp,
    NewOwnersForbidden,
    NoLocalUser,
    NoRootComment,
    NotDomainOwner,
    NotModerator,
    OwnerHasDomains,
    PageReadonly,
    SelfVote,
    SignupsForbidden,
    SsoMisconfigured,
    Unauthenticated,
    UnknownHost,
    UserBanned,
    UserLocked,
    UserReadonly,
    WrongCurPassword,
}

impl ErrorId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorId::BadToken => "bad-token",
            ErrorId::CommentDeleted => "comment-deleted",
            ErrorId::DomainReadonly => "domain-readonly",
            ErrorId::EmailAlreadyExists => "email-already-exists",
            ErrorId::EmailNotConfirmed => "email-not-confirmed",
            ErrorId::HostAlreadyExists => "host-already-exists",
            ErrorId::IdpUnconfigured => "idp-unconfigured",
            ErrorId::IdpUnknown => "idp-unknown",
            ErrorId::ImmutableProperty => "immutable-property",
            ErrorId::InvalidCredentials => "invalid-credentials",
            ErrorId::InvalidModAction => "invalid-mod-action",
            ErrorId::InvalidPropValue => "invalid-prop-value",
            ErrorId::InvalidUuid => "invalid-uuid",
            ErrorId::LoginLocally => "login-locally",
            ErrorId::LoginUsingIdp => "login-using-idp",
            ErrorId::NewOwnersForbidden => "new-owners-forbidden",
            ErrorId::NoLocalUser => "no-local-user",
            ErrorId::NoRootComment => "no-root-comment",
            ErrorId::NotDomainOwner => "not-domain-owner",
            ErrorId::NotModerator => "not-moderator",
            ErrorId::OwnerHasDomains => "owner-has-domains",
            ErrorId::PageReadonly => "page-readonly",
            ErrorId::SelfVote => "self-vote",
            ErrorId::SignupsForbidden => "signups-forbidden",
            ErrorId::SsoMisconfigured => "sso-misconfigured",
            ErrorId::Unauthenticated => "unauthenticated",
            ErrorId::UnknownHost => "unknown-host",
            ErrorId::UserBanned => "user-banned",
            ErrorId::UserLocked => "user-locked",
            ErrorId::UserReadonly => "user-readonly",
            ErrorId::WrongCurPassword => "wrong-cur-password",
        }
    }
}

/// JSON body returned with any non-2xx API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub id: ErrorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(id: ErrorId) -> Self {
        Self { id, details: None }
    }

    pub fn with_details(id: ErrorId, details: impl Into<String>) -> Self {
        Self {
            id,
            details: Some(details.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_id_serializes_to_wire_form() {
        let v = serde_json::to_value(ErrorId::WrongCurPassword).unwrap();
        assert_eq!(v, serde_json::json!("wrong-cur-password"));
        assert_eq!(ErrorId::SelfVote.as_str(), "self-vote");
    }

    #[test]
    fn ws_event_omits_missing_parent() {
        let ev = WsEvent {
            domain: Uuid::nil(),
            path: "/p".into(),
            comment: Uuid::nil(),
            parent_comment: None,
            action: CommentAction::New,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert!(v.get("parentComment").is_none());
        assert_eq!(v["action"], "new");
    }

    #[test]
    fn subscribe_parses_client_message() {
        let msg: WsSubscribe =
            serde_json::from_str(r#"{"domain":"00000000-0000-0000-0000-000000000000","path":"/a"}"#)
                .unwrap();
        assert_eq!(msg.path, "/a");
    }
}
