/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! HTTP error mapping: internal errors become status codes plus the public
//! wire identifiers; DB details never leave the process.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use comentario_core::users::AuthFailure;
use comentario_core::Error;
use comentario_protocol::{ApiError, ErrorId};
use tracing::error;

pub type ApiResult<T> = std::result::Result<T, ApiFail>;

#[derive(Debug)]
pub struct ApiFail {
    pub status: StatusCode,
    pub body: Option<ApiError>,
}

impl ApiFail {
    pub fn new(status: StatusCode, id: ErrorId) -> Self {
        Self {
            status,
            body: Some(ApiError::new(id)),
        }
    }

    pub fn with_details(status: StatusCode, id: ErrorId, details: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(ApiError::with_details(id, details)),
        }
    }

    pub fn bad_request(id: ErrorId) -> Self {
        Self::new(StatusCode::BAD_REQUEST, id)
    }

    pub fn unauthorized(id: ErrorId) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, id)
    }

    pub fn forbidden(id: ErrorId) -> Self {
        Self::new(StatusCode::FORBIDDEN, id)
    }

    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: None,
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: None,
        }
    }
}

impl IntoResponse for ApiFail {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

impl From<Error> for ApiFail {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound => ApiFail::not_found(),
            Error::BadToken => ApiFail::bad_request(ErrorId::BadToken),
            other => {
                error!("request failed: {other}");
                ApiFail::internal()
            }
        }
    }
}

/// The 401 identifier for each authentication-gate refusal.
pub fn auth_failure_id(f: AuthFailure) -> ErrorId {
    match f {
        AuthFailure::InvalidCredentials => ErrorId::InvalidCredentials,
        AuthFailure::UserLocked => ErrorId::UserLocked,
        AuthFailure::UserBanned => ErrorId::UserBanned,
        AuthFailure::EmailNotConfirmed => ErrorId::EmailNotConfirmed,
    }
}

impl From<AuthFailure> for ApiFail {
    fn from(f: AuthFailure) -> Self {
        ApiFail::unauthorized(auth_failure_id(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_without_body() {
        let fail: ApiFail = Error::NotFound.into();
        assert_eq!(fail.status, StatusCode::NOT_FOUND);
        assert!(fail.body.is_none());
    }

    #[test]
    fn db_errors_hide_details() {
        let fail: ApiFail = Error::Database("secret ddl".into()).into();
        assert_eq!(fail.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(fail.body.is_none());
    }

    #[test]
    fn auth_failures_are_401() {
        let fail: ApiFail = AuthFailure::UserBanned.into();
        assert_eq!(fail.status, StatusCode::UNAUTHORIZED);
        assert_eq!(fail.body.unwrap().id, ErrorId::UserBanned);
    }
}
