/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The service error taxonomy. Everything the persistence gateway and the
//! services return to callers collapses into these five kinds; finer-grained
//! wire identifiers are the server's concern.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The requested row does not exist (or has expired, for token lookups).
    #[error("record not found")]
    NotFound,

    /// Any database failure other than a missing row.
    #[error("database error: {0}")]
    Database(String),

    /// A token operation affected no rows or the value failed to decode.
    #[error("bad token")]
    BadToken,

    /// SMTP dispatch failed. Only surfaced on foreground mail paths.
    #[error("email send failed: {0}")]
    EmailSend(String),

    /// An outbound HTTP fetch (title, avatar, spam check) failed.
    #[error("resource fetch failed: {0}")]
    ResourceFetch(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        // The driver has no dedicated no-rows error; gateways use query_opt and
        // map the None themselves, so everything arriving here is a real fault.
        Error::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Error::Database(format!("pool: {e}"))
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinguishable() {
        assert!(Error::NotFound.is_not_found());
        assert!(!Error::BadToken.is_not_found());
        assert!(!Error::Database("x".into()).is_not_found());
    }
}
