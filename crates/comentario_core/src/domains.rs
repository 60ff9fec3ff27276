/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Domains and the per-domain role attachments of users.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::util;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    Active,
    Readonly,
    Frozen,
}

impl DomainState {
    pub fn as_str(self) -> &'static str {
        match self {
            DomainState::Active => "active",
            DomainState::Readonly => "readonly",
            DomainState::Frozen => "frozen",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(DomainState::Active),
            "readonly" => Ok(DomainState::Readonly),
            "frozen" => Ok(DomainState::Frozen),
            other => Err(Error::Database(format!("unknown domain state {other:?}"))),
        }
    }

    /// Whether new comments are accepted at all.
    pub fn accepts_comments(self) -> bool {
        matches!(self, DomainState::Active)
    }
}

/// When moderators get notified about new comments on the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModNotifyPolicy {
    None,
    Pending,
    All,
}

impl ModNotifyPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ModNotifyPolicy::None => "none",
            ModNotifyPolicy::Pending => "pending",
            ModNotifyPolicy::All => "all",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(ModNotifyPolicy::None),
            "pending" => Ok(ModNotifyPolicy::Pending),
            "all" => Ok(ModNotifyPolicy::All),
            other => Err(Error::Database(format!("unknown notify policy {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Domain {
    pub id: Uuid,
    pub host: String,
    pub name: String,
    pub state: DomainState,
    pub require_identification: bool,
    pub require_moderation: bool,
    pub moderate_anonymous: bool,
    pub auto_spam_filter: bool,
    pub mod_notify_policy: ModNotifyPolicy,
    pub idps: Vec<String>,
    pub sso_url: String,
    // Lowercase hex; empty until an SSO secret has been generated.
    pub sso_secret: String,
    pub default_sort: String,
    pub ts_created: DateTime<Utc>,
    pub count_comments: i64,
    pub count_views: i64,
}

impl Domain {
    pub fn is_readonly(&self) -> bool {
        !self.state.accepts_comments()
    }

    pub fn idp_enabled(&self, idp: &str) -> bool {
        self.idps.iter().any(|i| i == idp)
    }
}

#[derive(Debug, Clone)]
pub struct DomainUser {
    pub domain_id: Uuid,
    pub user_id: Uuid,
    pub is_owner: bool,
    pub is_moderator: bool,
    pub is_commenter: bool,
    pub notify_replies: bool,
    pub notify_moderator: bool,
    pub ts_created: DateTime<Utc>,
}

impl DomainUser {
    /// Owners implicitly moderate.
    pub fn can_moderate(&self) -> bool {
        self.is_owner || self.is_moderator
    }

    /// A row with no commenter right is a read-only attachment.
    pub fn is_readonly(&self) -> bool {
        !self.is_owner && !self.is_moderator && !self.is_commenter
    }
}

const DOMAIN_COLS: &str = "id, host, name, state, require_identification, require_moderation, \
     moderate_anonymous, auto_spam_filter, mod_notify_policy, idps, sso_url, sso_secret, \
     default_sort, ts_created, count_comments, count_views";

fn domain_from_row(row: &Row) -> Result<Domain> {
    let state: String = row.get(3);
    let policy: String = row.get(8);
    Ok(Domain {
        id: row.get(0),
        host: row.get(1),
        name: row.get(2),
        state: DomainState::parse(&state)?,
        require_identification: row.get(4),
        require_moderation: row.get(5),
        moderate_anonymous: row.get(6),
        auto_spam_filter: row.get(7),
        mod_notify_policy: ModNotifyPolicy::parse(&policy)?,
        idps: row.get(9),
        sso_url: row.get(10),
        sso_secret: row.get(11),
        default_sort: row.get(12),
        ts_created: row.get(13),
        count_comments: row.get(14),
        count_views: row.get(15),
    })
}

fn domain_user_from_row(row: &Row) -> DomainUser {
    DomainUser {
        domain_id: row.get(0),
        user_id: row.get(1),
        is_owner: row.get(2),
        is_moderator: row.get(3),
        is_commenter: row.get(4),
        notify_replies: row.get(5),
        notify_moderator: row.get(6),
        ts_created: row.get(7),
    }
}

const DOMAIN_USER_COLS: &str = "domain_id, user_id, is_owner, is_moderator, is_commenter, \
     notify_replies, notify_moderator, ts_created";

#[derive(Clone)]
pub struct DomainService {
    db: Database,
}

impl DomainService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, domain: &Domain) -> Result<()> {
        self.db
            .exec(
                &format!(
                    "INSERT INTO cm_domains({DOMAIN_COLS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
                ),
                &[
                    &domain.id,
                    &domain.host,
                    &domain.name,
                    &domain.state.as_str(),
                    &domain.require_identification,
                    &domain.require_moderation,
                    &domain.moderate_anonymous,
                    &domain.auto_spam_filter,
                    &domain.mod_notify_policy.as_str(),
                    &domain.idps,
                    &domain.sso_url,
                    &domain.sso_secret,
                    &domain.default_sort,
                    &domain.ts_created,
                    &domain.count_comments,
                    &domain.count_views,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn by_id(&self, id: Uuid) -> Result<Domain> {
        let row = self
            .db
            .query_row(
                &format!("SELECT {DOMAIN_COLS} FROM cm_domains WHERE id = $1"),
                &[&id],
            )
            .await?;
        domain_from_row(&row)
    }

    /// Host lookup is exact and case-insensitive (hosts are stored lowercase).
    pub async fn by_host(&self, host: &str) -> Result<Domain> {
        let row = self
            .db
            .query_row(
                &format!("SELECT {DOMAIN_COLS} FROM cm_domains WHERE host = lower($1)"),
                &[&host],
            )
            .await?;
        domain_from_row(&row)
    }

    pub async fn update(&self, domain: &Domain) -> Result<()> {
        self.db
            .exec_one(
                "UPDATE cm_domains SET name = $2, state = $3, require_identification = $4, \
                 require_moderation = $5, moderate_anonymous = $6, auto_spam_filter = $7, \
                 mod_notify_policy = $8, idps = $9, sso_url = $10, default_sort = $11 \
                 WHERE id = $1",
                &[
                    &domain.id,
                    &domain.name,
                    &domain.state.as_str(),
                    &domain.require_identification,
                    &domain.require_moderation,
                    &domain.moderate_anonymous,
                    &domain.auto_spam_filter,
                    &domain.mod_notify_policy.as_str(),
                    &domain.idps,
                    &domain.sso_url,
                    &domain.default_sort,
                ],
            )
            .await
    }

    /// Rotates the SSO shared secret, returning the new lowercase-hex value.
    pub async fn new_sso_secret(&self, id: Uuid) -> Result<String> {
        let secret = util::random_hex(32);
        self.db
            .exec_one(
                "UPDATE cm_domains SET sso_secret = $2 WHERE id = $1",
                &[&id, &secret],
            )
            .await?;
        Ok(secret)
    }

    /// Hard delete: comments, votes, pages, views, attrs, config, user
    /// attachments all go with the domain, in one transaction.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut client = self.db.client().await?;
        let tx = client.transaction().await.map_err(Error::from)?;
        let stmts = [
            "DELETE FROM cm_comment_votes WHERE comment_id IN \
             (SELECT c.id FROM cm_comments c \
              JOIN cm_domain_pages p ON p.id = c.page_id WHERE p.domain_id = $1)",
            "DELETE FROM cm_comments WHERE page_id IN \
             (SELECT id FROM cm_domain_pages WHERE domain_id = $1)",
            "DELETE FROM cm_domain_page_views WHERE page_id IN \
             (SELECT id FROM cm_domain_pages WHERE domain_id = $1)",
            "DELETE FROM cm_domain_pages WHERE domain_id = $1",
            "DELETE FROM cm_domains_users WHERE domain_id = $1",
            "DELETE FROM cm_domain_attrs WHERE domain_id = $1",
            "DELETE FROM cm_domain_configuration WHERE domain_id = $1",
            "DELETE FROM cm_domains WHERE id = $1",
        ];
        for sql in stmts {
            tx.execute(sql, &[&id]).await.map_err(Error::from)?;
        }
        tx.commit().await.map_err(Error::from)
    }

    /// Domains the user is attached to, owners first.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<(Domain, DomainUser)>> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {DOMAIN_COLS}, du.is_owner, du.is_moderator, du.is_commenter, \
                            du.notify_replies, du.notify_moderator, du.ts_created \
                     FROM cm_domains d \
                     JOIN cm_domains_users du ON du.domain_id = d.id \
                     WHERE du.user_id = $1 \
                     ORDER BY du.is_owner DESC, d.host"
                ),
                &[&user_id],
            )
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let domain = domain_from_row(&row)?;
            out.push((
                domain,
                DomainUser {
                    domain_id: row.get(0),
                    user_id,
                    is_owner: row.get(16),
                    is_moderator: row.get(17),
                    is_commenter: row.get(18),
                    notify_replies: row.get(19),
                    notify_moderator: row.get(20),
                    ts_created: row.get(21),
                },
            ));
        }
        Ok(out)
    }

    pub async fn domain_user(&self, domain_id: Uuid, user_id: Uuid) -> Result<DomainUser> {
        let row = self
            .db
            .query_row(
                &format!(
                    "SELECT {DOMAIN_USER_COLS} FROM cm_domains_users \
                     WHERE domain_id = $1 AND user_id = $2"
                ),
                &[&domain_id, &user_id],
            )
            .await?;
        Ok(domain_user_from_row(&row))
    }

    /// Fetches the attachment, creating a default commenter row on first
    /// contact. Races on the insert settle via ON CONFLICT.
    pub async fn ensure_domain_user(&self, domain_id: Uuid, user_id: Uuid) -> Result<DomainUser> {
        match self.domain_user(domain_id, user_id).await {
            Ok(du) => return Ok(du),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let du = DomainUser {
            domain_id,
            user_id,
            is_owner: false,
            is_moderator: false,
            is_commenter: true,
            notify_replies: true,
            notify_moderator: true,
            ts_created: util::now(),
        };
        self.db
            .exec(
                &format!(
                    "INSERT INTO cm_domains_users({DOMAIN_USER_COLS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     ON CONFLICT (domain_id, user_id) DO NOTHING"
                ),
                &[
                    &du.domain_id,
                    &du.user_id,
                    &du.is_owner,
                    &du.is_moderator,
                    &du.is_commenter,
                    &du.notify_replies,
                    &du.notify_moderator,
                    &du.ts_created,
                ],
            )
            .await?;
        self.domain_user(domain_id, user_id).await
    }

    pub async fn save_domain_user(&self, du: &DomainUser) -> Result<()> {
        self.db
            .exec(
                &format!(
                    "INSERT INTO cm_domains_users({DOMAIN_USER_COLS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     ON CONFLICT (domain_id, user_id) DO UPDATE \
                     SET is_owner = EXCLUDED.is_owner, is_moderator = EXCLUDED.is_moderator, \
                         is_commenter = EXCLUDED.is_commenter, \
                         notify_replies = EXCLUDED.notify_replies, \
                         notify_moderator = EXCLUDED.notify_moderator"
                ),
                &[
                    &du.domain_id,
                    &du.user_id,
                    &du.is_owner,
                    &du.is_moderator,
                    &du.is_commenter,
                    &du.notify_replies,
                    &du.notify_moderator,
                    &du.ts_created,
                ],
            )
            .await?;
        Ok(())
    }

    /// Moderators of a domain, with their notification opt-in flags.
    pub async fn moderators(&self, domain_id: Uuid) -> Result<Vec<DomainUser>> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {DOMAIN_USER_COLS} FROM cm_domains_users \
                     WHERE domain_id = $1 AND (is_owner OR is_moderator)"
                ),
                &[&domain_id],
            )
            .await?;
        Ok(rows.iter().map(domain_user_from_row).collect())
    }

    pub async fn user_owns_domains(&self, user_id: Uuid) -> Result<bool> {
        let row = self
            .db
            .query_row(
                "SELECT count(*) FROM cm_domains_users WHERE user_id = $1 AND is_owner",
                &[&user_id],
            )
            .await?;
        let n: i64 = row.get(0);
        Ok(n > 0)
    }

    /// Single-statement counter bump; the GREATEST guard keeps counters from
    /// ever dipping below zero.
    pub async fn increment_counts(&self, id: Uuid, d_comments: i64, d_views: i64) -> Result<()> {
        self.db
            .exec_one(
                "UPDATE cm_domains \
                 SET count_comments = GREATEST(count_comments + $2, 0), \
                     count_views = GREATEST(count_views + $3, 0) \
                 WHERE id = $1",
                &[&id, &d_comments, &d_views],
            )
            .await
    }
}

/// Builder for a fresh domain owned by nobody yet; the caller attaches the
/// owner via `save_domain_user`.
pub fn new_domain(host: &str, name: &str) -> Domain {
    Domain {
        id: Uuid::new_v4(),
        host: host.to_lowercase(),
        name: name.to_string(),
        state: DomainState::Active,
        require_identification: false,
        require_moderation: false,
        moderate_anonymous: false,
        auto_spam_filter: false,
        mod_notify_policy: ModNotifyPolicy::Pending,
        idps: Vec::new(),
        sso_url: String::new(),
        sso_secret: String::new(),
        default_sort: "td".to_string(),
        ts_created: util::now(),
        count_comments: 0,
        count_views: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trip() {
        for s in [DomainState::Active, DomainState::Readonly, DomainState::Frozen] {
            assert_eq!(DomainState::parse(s.as_str()).unwrap(), s);
        }
        assert!(DomainState::parse("melted").is_err());
    }

    #[test]
    fn only_active_accepts_comments() {
        assert!(DomainState::Active.accepts_comments());
        assert!(!DomainState::Readonly.accepts_comments());
        assert!(!DomainState::Frozen.accepts_comments());
    }

    #[test]
    fn owner_can_moderate() {
        let mut du = DomainUser {
            domain_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            is_owner: true,
            is_moderator: false,
            is_commenter: false,
            notify_replies: true,
            notify_moderator: true,
            ts_created: util::now(),
        };
        assert!(du.can_moderate());
        assert!(!du.is_readonly());
        du.is_owner = false;
        assert!(!du.can_moderate());
        assert!(du.is_readonly());
        du.is_commenter = true;
        assert!(!du.is_readonly());
    }

    #[test]
    fn new_domain_lowercases_host() {
        let d = new_domain("Example.ORG:8443", "Example");
        assert_eq!(d.host, "example.org:8443");
        assert_eq!(d.state, DomainState::Active);
        assert!(d.sso_secret.is_empty());
    }
}
