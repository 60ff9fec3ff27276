/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Scoped tokens: email confirmation, password reset, federated callbacks,
//! unsubscribe links and bearer credentials. Values are 32 random bytes,
//! stored and compared as lowercase hex.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::util;
use chrono::{DateTime, Duration, Utc};
use tokio_postgres::Row;
use uuid::Uuid;

pub const SCOPE_CONFIRM_EMAIL: &str = "confirm-email";
pub const SCOPE_RESET_PASSWORD: &str = "reset-password";
pub const SCOPE_FEDERATED_CALLBACK: &str = "federated-callback";
pub const SCOPE_UNSUBSCRIBE: &str = "unsubscribe";

#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub user_id: Uuid,
    pub scope: String,
    pub ts_expires: DateTime<Utc>,
    pub multiuse: bool,
}

impl Token {
    pub fn new(user_id: Uuid, scope: &str, ttl: Duration, multiuse: bool) -> Self {
        Self {
            value: util::random_hex(32),
            user_id,
            scope: scope.to_string(),
            ts_expires: util::now() + ttl,
            multiuse,
        }
    }

    pub fn expired(&self) -> bool {
        self.ts_expires <= util::now()
    }

    /// Scope membership is a plain set-inclusion check over opaque strings.
    pub fn scope_in(&self, scopes: &[&str]) -> bool {
        scopes.iter().any(|s| *s == self.scope)
    }
}

fn token_from_row(row: &Row) -> Token {
    Token {
        value: row.get(0),
        user_id: row.get(1),
        scope: row.get(2),
        ts_expires: row.get(3),
        multiuse: row.get(4),
    }
}

#[derive(Clone)]
pub struct TokenService {
    db: Database,
}

impl TokenService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, token: &Token) -> Result<()> {
        self.db
            .exec_one(
                "INSERT INTO cm_tokens(value, user_id, scope, ts_expires, multiuse) \
                 VALUES (lower($1), $2, $3, $4, $5)",
                &[
                    &token.value,
                    &token.user_id,
                    &token.scope,
                    &token.ts_expires,
                    &token.multiuse,
                ],
            )
            .await
    }

    /// Case-insensitive hex lookup. With `allow_expired = false` an expired
    /// token is indistinguishable from a missing one.
    pub async fn find(&self, value: &str, allow_expired: bool) -> Result<Token> {
        let row = self
            .db
            .query_row(
                "SELECT value, user_id, scope, ts_expires, multiuse \
                 FROM cm_tokens WHERE value = lower($1)",
                &[&value],
            )
            .await?;
        let token = token_from_row(&row);
        if !allow_expired && token.expired() {
            return Err(Error::NotFound);
        }
        Ok(token)
    }

    pub async fn delete(&self, value: &str) -> Result<()> {
        let n = self
            .db
            .exec("DELETE FROM cm_tokens WHERE value = lower($1)", &[&value])
            .await?;
        if n == 0 {
            return Err(Error::BadToken);
        }
        Ok(())
    }

    /// Redeem a token after a successful authentication: one-shot tokens are
    /// deleted so the link cannot be replayed.
    pub async fn spend(&self, token: &Token) -> Result<()> {
        if token.multiuse {
            return Ok(());
        }
        self.delete(&token.value).await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        self.db
            .exec("DELETE FROM cm_tokens WHERE ts_expires < now()", &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_hex_and_unexpired() {
        let t = Token::new(Uuid::new_v4(), SCOPE_CONFIRM_EMAIL, Duration::hours(1), false);
        assert_eq!(t.value.len(), 64);
        assert!(t.value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(!t.expired());
    }

    #[test]
    fn scope_inclusion() {
        let t = Token::new(Uuid::new_v4(), SCOPE_RESET_PASSWORD, Duration::hours(1), false);
        assert!(t.scope_in(&[SCOPE_CONFIRM_EMAIL, SCOPE_RESET_PASSWORD]));
        assert!(!t.scope_in(&[SCOPE_UNSUBSCRIBE]));
        assert!(!t.scope_in(&[]));
    }

    #[test]
    fn expiry_check() {
        let mut t = Token::new(Uuid::new_v4(), SCOPE_UNSUBSCRIBE, Duration::hours(1), true);
        t.ts_expires = util::now() - Duration::seconds(1);
        assert!(t.expired());
    }
}
