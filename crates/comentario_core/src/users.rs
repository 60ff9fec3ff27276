/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Users, their sessions, and the authentication gate.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::util::{self, AgentFacts};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use tokio_postgres::Row;
use tracing::info;
use uuid::Uuid;

/// How long a login session stays valid.
pub fn user_session_duration() -> Duration {
    Duration::days(28)
}

/// The well-known ID of the anonymous commenter. The initial migration seeds
/// a system user at this ID so comment author keys always resolve.
pub const ANONYMOUS_ID: Uuid = Uuid::nil();

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub is_system: bool,
    pub is_superuser: bool,
    pub confirmed: bool,
    pub banned: bool,
    pub locked: bool,
    pub federated_idp: Option<String>,
    pub federated_sub: Option<String>,
    pub ts_created: DateTime<Utc>,
    pub signup_ip: String,
    pub signup_country: String,
    pub signup_host: String,
    pub signup_url: String,
}

impl User {
    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_ID
    }

    pub fn is_local(&self) -> bool {
        self.federated_idp.is_none()
    }
}

/// The authenticated actor behind a request.
#[derive(Debug, Clone)]
pub enum Principal {
    System,
    Anonymous,
    Local(User),
    Federated(User),
}

impl Principal {
    pub fn from_user(user: User) -> Self {
        if user.is_anonymous() {
            Principal::Anonymous
        } else if user.is_system {
            Principal::System
        } else if user.is_local() {
            Principal::Local(user)
        } else {
            Principal::Federated(user)
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Principal::Local(u) | Principal::Federated(u) => Some(u),
            _ => None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.user().map(|u| u.id).unwrap_or(ANONYMOUS_ID)
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    pub fn is_superuser(&self) -> bool {
        self.user().map(|u| u.is_superuser).unwrap_or(false)
    }
}

/// Why `can_authenticate` refused a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    UserLocked,
    UserBanned,
    EmailNotConfirmed,
}

/// The authentication gate applied by every login path and session lookup.
pub fn can_authenticate(user: &User, require_confirmed: bool) -> std::result::Result<(), AuthFailure> {
    if user.is_system || user.is_anonymous() {
        return Err(AuthFailure::InvalidCredentials);
    }
    if user.locked {
        return Err(AuthFailure::UserLocked);
    }
    if user.banned {
        return Err(AuthFailure::UserBanned);
    }
    if require_confirmed && !user.confirmed {
        return Err(AuthFailure::EmailNotConfirmed);
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Database(format!("password hash: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    // Federated-only accounts carry an empty hash and can never log in locally.
    if hash.is_empty() {
        return false;
    }
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ts_created: DateTime<Utc>,
    pub ts_expires: DateTime<Utc>,
    pub host: String,
    pub proto: String,
    pub ip: String,
    pub country: String,
    pub ua_browser: String,
    pub ua_os: String,
    pub ua_device: String,
}

/// Client facts recorded with a session or a page view.
#[derive(Debug, Clone, Default)]
pub struct ClientFingerprint {
    pub host: String,
    pub proto: String,
    pub ip: String,
    pub country: String,
    pub user_agent: String,
}

const USER_COLS: &str = "id, email, name, password_hash, is_system, is_superuser, confirmed, \
     banned, locked, federated_idp, federated_sub, ts_created, signup_ip, signup_country, \
     signup_host, signup_url";

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get(0),
        email: row.get(1),
        name: row.get(2),
        password_hash: row.get(3),
        is_system: row.get(4),
        is_superuser: row.get(5),
        confirmed: row.get(6),
        banned: row.get(7),
        locked: row.get(8),
        federated_idp: row.get(9),
        federated_sub: row.get(10),
        ts_created: row.get(11),
        signup_ip: row.get(12),
        signup_country: row.get(13),
        signup_host: row.get(14),
        signup_url: row.get(15),
    }
}

#[derive(Clone)]
pub struct UserService {
    db: Database,
    log_full_ips: bool,
}

impl UserService {
    pub fn new(db: Database, log_full_ips: bool) -> Self {
        Self { db, log_full_ips }
    }

    pub async fn create(&self, user: &User) -> Result<()> {
        self.db
            .exec_one(
                &format!(
                    "INSERT INTO cm_users({USER_COLS}) \
                     VALUES ($1, lower($2), $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
                ),
                &[
                    &user.id,
                    &user.email,
                    &user.name,
                    &user.password_hash,
                    &user.is_system,
                    &user.is_superuser,
                    &user.confirmed,
                    &user.banned,
                    &user.locked,
                    &user.federated_idp,
                    &user.federated_sub,
                    &user.ts_created,
                    &user.signup_ip,
                    &user.signup_country,
                    &user.signup_host,
                    &user.signup_url,
                ],
            )
            .await
    }

    pub async fn by_id(&self, id: Uuid) -> Result<User> {
        let row = self
            .db
            .query_row(&format!("SELECT {USER_COLS} FROM cm_users WHERE id = $1"), &[&id])
            .await?;
        Ok(user_from_row(&row))
    }

    pub async fn by_email(&self, email: &str) -> Result<User> {
        let row = self
            .db
            .query_row(
                &format!("SELECT {USER_COLS} FROM cm_users WHERE email = lower($1)"),
                &[&email],
            )
            .await?;
        Ok(user_from_row(&row))
    }

    /// Look the user up via one of their sessions, checking the session's
    /// validity window.
    pub async fn by_session(&self, user_id: Uuid, session_id: Uuid) -> Result<User> {
        let row = self
            .db
            .query_row(
                &format!(
                    "SELECT {} FROM cm_users u \
                     JOIN cm_user_sessions s ON s.user_id = u.id \
                     WHERE u.id = $1 AND s.id = $2 AND s.ts_created <= now() AND s.ts_expires > now()",
                    USER_COLS
                        .split(", ")
                        .map(|c| format!("u.{c}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                &[&user_id, &session_id],
            )
            .await?;
        Ok(user_from_row(&row))
    }

    pub async fn update_profile(&self, id: Uuid, name: &str) -> Result<()> {
        self.db
            .exec_one("UPDATE cm_users SET name = $2 WHERE id = $1", &[&id, &name])
            .await
    }

    pub async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        self.db
            .exec_one(
                "UPDATE cm_users SET password_hash = $2 WHERE id = $1",
                &[&id, &password_hash],
            )
            .await
    }

    pub async fn confirm(&self, id: Uuid) -> Result<()> {
        self.db
            .exec_one("UPDATE cm_users SET confirmed = true WHERE id = $1", &[&id])
            .await
    }

    pub async fn set_banned(&self, id: Uuid, banned: bool) -> Result<()> {
        self.db
            .exec_one("UPDATE cm_users SET banned = $2 WHERE id = $1", &[&id, &banned])
            .await
    }

    pub async fn set_locked(&self, id: Uuid, locked: bool) -> Result<()> {
        self.db
            .exec_one("UPDATE cm_users SET locked = $2 WHERE id = $1", &[&id, &locked])
            .await
    }

    /// Update the identity fields refreshed on every federated login.
    pub async fn update_federated(
        &self,
        id: Uuid,
        email: &str,
        name: &str,
        federated_sub: &str,
    ) -> Result<()> {
        self.db
            .exec_one(
                "UPDATE cm_users SET email = lower($2), name = $3, federated_sub = $4 WHERE id = $1",
                &[&id, &email, &name, &federated_sub],
            )
            .await
    }

    /// Delete a user: sessions, tokens and domain joins go with them, and
    /// their comments are anonymised rather than removed.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut client = self.db.client().await?;
        let tx = client.transaction().await.map_err(Error::from)?;
        tx.execute("DELETE FROM cm_user_sessions WHERE user_id = $1", &[&id])
            .await?;
        tx.execute("DELETE FROM cm_tokens WHERE user_id = $1", &[&id])
            .await?;
        tx.execute("DELETE FROM cm_domains_users WHERE user_id = $1", &[&id])
            .await?;
        tx.execute("DELETE FROM cm_user_attrs WHERE user_id = $1", &[&id])
            .await?;
        tx.execute("DELETE FROM cm_user_avatars WHERE user_id = $1", &[&id])
            .await?;
        tx.execute(
            "UPDATE cm_comments SET user_created = $2 WHERE user_created = $1",
            &[&id, &ANONYMOUS_ID],
        )
        .await?;
        let n = tx.execute("DELETE FROM cm_users WHERE id = $1", &[&id]).await?;
        tx.commit().await.map_err(Error::from)?;
        if n == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Promote one user to superuser at startup, by UUID or email.
    pub async fn elevate_superuser(&self, id_or_email: &str) -> Result<User> {
        let user = match id_or_email.parse::<Uuid>() {
            Ok(id) => self.by_id(id).await?,
            Err(_) => self.by_email(id_or_email).await?,
        };
        if !user.is_superuser {
            self.db
                .exec_one(
                    "UPDATE cm_users SET is_superuser = true WHERE id = $1",
                    &[&user.id],
                )
                .await?;
            info!(user = %user.email, "elevated to superuser");
        }
        self.by_id(user.id).await
    }

    pub async fn create_session(
        &self,
        user_id: Uuid,
        fp: &ClientFingerprint,
    ) -> Result<UserSession> {
        let facts: AgentFacts = util::agent_facts(&fp.user_agent);
        let session = UserSession {
            id: Uuid::new_v4(),
            user_id,
            ts_created: util::now(),
            ts_expires: util::now() + user_session_duration(),
            host: fp.host.clone(),
            proto: fp.proto.clone(),
            ip: util::storable_ip(&fp.ip, self.log_full_ips),
            country: fp.country.clone(),
            ua_browser: facts.browser,
            ua_os: facts.os,
            ua_device: facts.device,
        };
        self.db
            .exec_one(
                "INSERT INTO cm_user_sessions(id, user_id, ts_created, ts_expires, host, proto, \
                 ip, country, ua_browser, ua_os, ua_device) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &session.id,
                    &session.user_id,
                    &session.ts_created,
                    &session.ts_expires,
                    &session.host,
                    &session.proto,
                    &session.ip,
                    &session.country,
                    &session.ua_browser,
                    &session.ua_os,
                    &session.ua_device,
                ],
            )
            .await?;
        Ok(session)
    }

    /// Logout: remove one session.
    pub async fn delete_session(&self, user_id: Uuid, session_id: Uuid) -> Result<()> {
        self.db
            .exec_one(
                "DELETE FROM cm_user_sessions WHERE id = $1 AND user_id = $2",
                &[&session_id, &user_id],
            )
            .await
    }

    pub async fn set_avatar(&self, user_id: Uuid, image: &[u8]) -> Result<()> {
        self.db
            .exec(
                "INSERT INTO cm_user_avatars(user_id, ts_updated, avatar) VALUES ($1, now(), $2) \
                 ON CONFLICT (user_id) DO UPDATE SET ts_updated = now(), avatar = EXCLUDED.avatar",
                &[&user_id, &image],
            )
            .await?;
        Ok(())
    }

    pub async fn avatar(&self, user_id: Uuid) -> Result<Vec<u8>> {
        let row = self
            .db
            .query_row("SELECT avatar FROM cm_user_avatars WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(row.get(0))
    }
}

/// Build a fresh local-signup user record.
pub fn new_local_user(email: &str, name: &str, password_hash: String, fp: &ClientFingerprint) -> User {
    User {
        id: Uuid::new_v4(),
        email: email.trim().to_ascii_lowercase(),
        name: name.trim().to_string(),
        password_hash,
        is_system: false,
        is_superuser: false,
        confirmed: false,
        banned: false,
        locked: false,
        federated_idp: None,
        federated_sub: None,
        ts_created: util::now(),
        signup_ip: util::mask_ip(&fp.ip),
        signup_country: fp.country.clone(),
        signup_host: fp.host.clone(),
        signup_url: String::new(),
    }
}

/// Build a user record for a first federated login. The IdP vouched for the
/// email, so the account starts out confirmed.
pub fn new_federated_user(
    email: &str,
    name: &str,
    idp: &str,
    subject: &str,
    fp: &ClientFingerprint,
) -> User {
    User {
        id: Uuid::new_v4(),
        email: email.trim().to_ascii_lowercase(),
        name: name.trim().to_string(),
        password_hash: String::new(),
        is_system: false,
        is_superuser: false,
        confirmed: true,
        banned: false,
        locked: false,
        federated_idp: Some(idp.to_string()),
        federated_sub: Some(subject.to_string()),
        ts_created: util::now(),
        signup_ip: util::mask_ip(&fp.ip),
        signup_country: fp.country.clone(),
        signup_host: fp.host.clone(),
        signup_url: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "u@example.org".into(),
            name: "U".into(),
            password_hash: String::new(),
            is_system: false,
            is_superuser: false,
            confirmed: true,
            banned: false,
            locked: false,
            federated_idp: None,
            federated_sub: None,
            ts_created: Utc::now(),
            signup_ip: String::new(),
            signup_country: String::new(),
            signup_host: String::new(),
            signup_url: String::new(),
        }
    }

    #[test]
    fn gate_rejects_system_anonymous_banned_locked() {
        let mut u = user();
        u.is_system = true;
        assert_eq!(can_authenticate(&u, true), Err(AuthFailure::InvalidCredentials));

        let mut u = user();
        u.id = ANONYMOUS_ID;
        assert_eq!(can_authenticate(&u, false), Err(AuthFailure::InvalidCredentials));

        let mut u = user();
        u.locked = true;
        assert_eq!(can_authenticate(&u, true), Err(AuthFailure::UserLocked));

        let mut u = user();
        u.banned = true;
        // Banned wins over unconfirmed.
        u.confirmed = false;
        assert_eq!(can_authenticate(&u, true), Err(AuthFailure::UserBanned));
    }

    #[test]
    fn gate_checks_confirmation_only_when_required() {
        let mut u = user();
        u.confirmed = false;
        assert_eq!(can_authenticate(&u, true), Err(AuthFailure::EmailNotConfirmed));
        assert_eq!(can_authenticate(&u, false), Ok(()));
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn empty_hash_never_verifies() {
        assert!(!verify_password("", ""));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn principal_classification() {
        let u = user();
        assert!(matches!(Principal::from_user(u.clone()), Principal::Local(_)));
        let mut f = user();
        f.federated_idp = Some("github".into());
        assert!(matches!(Principal::from_user(f), Principal::Federated(_)));
    }

    #[test]
    fn session_window_fits_duration() {
        // Invariant: expires - created == the configured session duration.
        let created = Utc::now();
        let expires = created + user_session_duration();
        assert!(expires > created);
        assert_eq!(expires - created, user_session_duration());
    }
}
