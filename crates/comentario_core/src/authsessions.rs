/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Short-lived OAuth handshake state. The browser only ever holds the record
//! ID (in a cookie); the provider payload stays server-side and is consumed
//! exactly once on callback.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::util;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// How long a pending OAuth handshake stays redeemable.
pub fn auth_session_ttl() -> Duration {
    Duration::minutes(15)
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: Uuid,
    /// Opaque marshalled provider session (state, nonce, provider name).
    pub data: Vec<u8>,
    /// Where the user came from; the popup returns here.
    pub source_url: String,
    pub ts_created: DateTime<Utc>,
    pub ts_expires: DateTime<Utc>,
}

impl AuthSession {
    pub fn new(data: Vec<u8>, source_url: &str) -> Self {
        let now = util::now();
        Self {
            id: Uuid::new_v4(),
            data,
            source_url: source_url.to_string(),
            ts_created: now,
            ts_expires: now + auth_session_ttl(),
        }
    }
}

#[derive(Clone)]
pub struct AuthSessionService {
    db: Database,
}

impl AuthSessionService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, session: &AuthSession) -> Result<()> {
        self.db
            .exec_one(
                "INSERT INTO cm_auth_sessions(id, data, source_url, ts_created, ts_expires) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &session.id,
                    &session.data,
                    &session.source_url,
                    &session.ts_created,
                    &session.ts_expires,
                ],
            )
            .await
    }

    /// Atomically delete and return the session. Expired rows are deleted but
    /// reported as missing.
    pub async fn take(&self, id: Uuid) -> Result<AuthSession> {
        let row = self
            .db
            .query_opt(
                "DELETE FROM cm_auth_sessions WHERE id = $1 \
                 RETURNING id, data, source_url, ts_created, ts_expires",
                &[&id],
            )
            .await?
            .ok_or(Error::NotFound)?;
        let session = AuthSession {
            id: row.get(0),
            data: row.get(1),
            source_url: row.get(2),
            ts_created: row.get(3),
            ts_expires: row.get(4),
        };
        if session.ts_expires <= util::now() {
            return Err(Error::NotFound);
        }
        Ok(session)
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        self.db
            .exec("DELETE FROM cm_auth_sessions WHERE ts_expires < now()", &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_window_matches_ttl() {
        let s = AuthSession::new(b"payload".to_vec(), "https://example.org/post");
        assert_eq!(s.ts_expires - s.ts_created, auth_session_ttl());
        assert_eq!(s.source_url, "https://example.org/post");
    }
}
