/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Runtime-mutable configuration: instance-wide items plus per-domain
//! overrides of the `domain.defaults.*` namespace. Items equal to their
//! default are stored as absent; domain overrides sit in a TTL cache that is
//! flushed whenever an instance-level default changes.

use crate::db::Database;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const KEY_AUTH_SIGNUP_ENABLED: &str = "auth.signup.enabled";
pub const KEY_AUTH_SIGNUP_CONFIRM_USER: &str = "auth.signup.confirm.user";
pub const KEY_OPERATION_NEW_OWNER_ENABLED: &str = "operation.newOwner.enabled";
pub const KEY_COMMENT_EDIT_WINDOW: &str = "comments.edit.window.seconds";

pub const DOMAIN_DEFAULTS_PREFIX: &str = "domain.defaults.";
pub const DOMAIN_KEY_COMMENTS_SHOW_DELETED: &str = "comments.showDeleted";
pub const DOMAIN_KEY_COMMENTS_ENABLE_VOTING: &str = "comments.enableVoting";
pub const DOMAIN_KEY_COMMENTS_DELETION_AUTHOR: &str = "comments.deletion.author";
pub const DOMAIN_KEY_COMMENTS_EDITING_AUTHOR: &str = "comments.editing.author";
pub const DOMAIN_KEY_MAX_COMMENT_LENGTH: &str = "maxCommentLength";
pub const DOMAIN_KEY_DEFAULT_SORT: &str = "sort";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Bool,
    Int,
    Enum,
    String,
}

/// Static description of a known configuration key.
#[derive(Debug, Clone)]
pub struct ItemSpec {
    pub key: &'static str,
    pub datatype: Datatype,
    pub default_value: &'static str,
    pub min: i64,
    pub max: i64,
    pub allowed: &'static [&'static str],
}

/// The full catalogue of instance items. Per-domain items are the
/// `domain.defaults.*` entries with the prefix stripped.
pub static ITEM_CATALOGUE: &[ItemSpec] = &[
    ItemSpec {
        key: KEY_AUTH_SIGNUP_ENABLED,
        datatype: Datatype::Bool,
        default_value: "true",
        min: 0,
        max: 0,
        allowed: &[],
    },
    ItemSpec {
        key: KEY_AUTH_SIGNUP_CONFIRM_USER,
        datatype: Datatype::Bool,
        default_value: "true",
        min: 0,
        max: 0,
        allowed: &[],
    },
    ItemSpec {
        key: KEY_OPERATION_NEW_OWNER_ENABLED,
        datatype: Datatype::Bool,
        default_value: "true",
        min: 0,
        max: 0,
        allowed: &[],
    },
    ItemSpec {
        key: KEY_COMMENT_EDIT_WINDOW,
        datatype: Datatype::Int,
        default_value: "600",
        min: 0,
        max: 86_400,
        allowed: &[],
    },
    ItemSpec {
        key: "domain.defaults.comments.showDeleted",
        datatype: Datatype::Bool,
        default_value: "true",
        min: 0,
        max: 0,
        allowed: &[],
    },
    ItemSpec {
        key: "domain.defaults.comments.enableVoting",
        datatype: Datatype::Bool,
        default_value: "true",
        min: 0,
        max: 0,
        allowed: &[],
    },
    ItemSpec {
        key: "domain.defaults.comments.deletion.author",
        datatype: Datatype::Bool,
        default_value: "true",
        min: 0,
        max: 0,
        allowed: &[],
    },
    ItemSpec {
        key: "domain.defaults.comments.editing.author",
        datatype: Datatype::Bool,
        default_value: "true",
        min: 0,
        max: 0,
        allowed: &[],
    },
    ItemSpec {
        key: "domain.defaults.maxCommentLength",
        datatype: Datatype::Int,
        default_value: "4096",
        min: 140,
        max: 1_048_576,
        allowed: &[],
    },
    ItemSpec {
        key: "domain.defaults.sort",
        datatype: Datatype::Enum,
        default_value: "td",
        min: 0,
        max: 0,
        allowed: &["ta", "td", "sd"],
    },
];

pub fn item_spec(key: &str) -> Option<&'static ItemSpec> {
    ITEM_CATALOGUE.iter().find(|s| s.key == key)
}

fn domain_item_spec(key: &str) -> Option<&'static ItemSpec> {
    item_spec(&format!("{DOMAIN_DEFAULTS_PREFIX}{key}"))
}

/// Why a proposed value was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown configuration key {0:?}")]
    UnknownKey(String),
    #[error("invalid value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Db(#[from] Error),
}

pub fn validate_value(spec: &ItemSpec, value: &str) -> std::result::Result<(), ValidationError> {
    let bad = || ValidationError::InvalidValue {
        key: spec.key.to_string(),
        value: value.to_string(),
    };
    match spec.datatype {
        Datatype::Bool => match value {
            "true" | "false" => Ok(()),
            _ => Err(bad()),
        },
        Datatype::Int => match value.parse::<i64>() {
            Ok(n) if n >= spec.min && n <= spec.max => Ok(()),
            _ => Err(bad()),
        },
        Datatype::Enum => {
            if spec.allowed.contains(&value) {
                Ok(())
            } else {
                Err(bad())
            }
        }
        Datatype::String => Ok(()),
    }
}

/// A resolved item: the spec plus the effective value and update metadata.
#[derive(Debug, Clone)]
pub struct ConfigItem {
    pub key: String,
    pub value: String,
    pub datatype: Datatype,
    pub default_value: String,
    pub ts_updated: Option<DateTime<Utc>>,
    pub user_updated: Option<Uuid>,
}

impl ConfigItem {
    pub fn as_bool(&self) -> bool {
        self.value
            .parse::<bool>()
            .unwrap_or_else(|_| self.default_value == "true")
    }

    pub fn as_int(&self) -> i64 {
        self.value
            .parse::<i64>()
            .unwrap_or_else(|_| self.default_value.parse().unwrap_or(0))
    }
}

struct DomainCacheEntry {
    loaded: Instant,
    overrides: HashMap<String, String>,
}

/// The store proper. `get` paths take the read half of the lock; `update`
/// paths take the write half and are transactional on the DB side.
#[derive(Clone)]
pub struct ConfigStore {
    db: Database,
    overrides: Arc<RwLock<HashMap<String, (String, DateTime<Utc>, Uuid)>>>,
    domain_cache: Arc<RwLock<HashMap<Uuid, DomainCacheEntry>>>,
    domain_ttl: Duration,
}

impl ConfigStore {
    pub fn new(db: Database, domain_ttl: Duration) -> Self {
        Self {
            db,
            overrides: Arc::new(RwLock::new(HashMap::new())),
            domain_cache: Arc::new(RwLock::new(HashMap::new())),
            domain_ttl,
        }
    }

    /// Read all persisted instance overrides. Called once at startup.
    pub async fn load(&self) -> Result<()> {
        let rows = self
            .db
            .query(
                "SELECT key, value, ts_updated, user_updated FROM cm_configuration",
                &[],
            )
            .await?;
        let mut map = HashMap::new();
        for row in rows {
            let key: String = row.get(0);
            // Rows for keys dropped from the catalogue are ignored, not errors.
            if item_spec(&key).is_some() {
                map.insert(key, (row.get(1), row.get(2), row.get(3)));
            }
        }
        *self.overrides.write().await = map;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<ConfigItem> {
        let spec = item_spec(key).ok_or(Error::NotFound)?;
        let overrides = self.overrides.read().await;
        let (value, ts, user) = match overrides.get(key) {
            Some((v, ts, u)) => (v.clone(), Some(*ts), Some(*u)),
            None => (spec.default_value.to_string(), None, None),
        };
        Ok(ConfigItem {
            key: spec.key.to_string(),
            value,
            datatype: spec.datatype,
            default_value: spec.default_value.to_string(),
            ts_updated: ts,
            user_updated: user,
        })
    }

    /// Boolean lookup that falls back to the item default on any failure.
    pub async fn get_bool(&self, key: &str) -> bool {
        match self.get(key).await {
            Ok(item) => item.as_bool(),
            Err(_) => item_spec(key).map(|s| s.default_value == "true").unwrap_or(false),
        }
    }

    /// Integer lookup that falls back to the item default on any failure.
    pub async fn get_int(&self, key: &str) -> i64 {
        match self.get(key).await {
            Ok(item) => item.as_int(),
            Err(_) => item_spec(key)
                .and_then(|s| s.default_value.parse().ok())
                .unwrap_or(0),
        }
    }

    /// Atomic multi-key update: every value is validated first and nothing is
    /// written unless all pass. Values equal to the default delete their row.
    pub async fn update(
        &self,
        cur_user: Uuid,
        updates: &HashMap<String, String>,
    ) -> std::result::Result<(), UpdateError> {
        let mut validated = Vec::with_capacity(updates.len());
        for (key, value) in updates {
            let spec = item_spec(key).ok_or_else(|| ValidationError::UnknownKey(key.clone()))?;
            validate_value(spec, value)?;
            validated.push((spec, value.clone()));
        }

        let now = crate::util::now();
        let mut client = self.db.client().await.map_err(UpdateError::Db)?;
        let tx = client.transaction().await.map_err(Error::from).map_err(UpdateError::Db)?;
        for (spec, value) in &validated {
            if *value == spec.default_value {
                tx.execute("DELETE FROM cm_configuration WHERE key = $1", &[&spec.key])
                    .await
                    .map_err(Error::from)?;
            } else {
                tx.execute(
                    "INSERT INTO cm_configuration(key, value, ts_updated, user_updated) \
                     VALUES ($1, $2, $3, $4) \
                     ON CONFLICT (key) DO UPDATE \
                     SET value = EXCLUDED.value, ts_updated = EXCLUDED.ts_updated, \
                         user_updated = EXCLUDED.user_updated",
                    &[&spec.key, value, &now, &cur_user],
                )
                .await
                .map_err(Error::from)?;
            }
        }
        tx.commit().await.map_err(Error::from).map_err(UpdateError::Db)?;

        let mut touched_defaults = false;
        {
            let mut overrides = self.overrides.write().await;
            for (spec, value) in validated {
                if value == spec.default_value {
                    overrides.remove(spec.key);
                } else {
                    overrides.insert(spec.key.to_string(), (value, now, cur_user));
                }
                if spec.key.starts_with(DOMAIN_DEFAULTS_PREFIX) {
                    touched_defaults = true;
                }
            }
        }
        // Any change to the defaults namespace invalidates every cached
        // domain view.
        if touched_defaults {
            self.reset_domain_cache().await;
        }
        Ok(())
    }

    pub async fn reset_domain_cache(&self) {
        self.domain_cache.write().await.clear();
    }

    async fn domain_overrides(&self, domain_id: Uuid) -> Result<HashMap<String, String>> {
        {
            let cache = self.domain_cache.read().await;
            if let Some(entry) = cache.get(&domain_id) {
                if entry.loaded.elapsed() < self.domain_ttl {
                    return Ok(entry.overrides.clone());
                }
            }
        }
        let rows = self
            .db
            .query(
                "SELECT key, value FROM cm_domain_configuration WHERE domain_id = $1",
                &[&domain_id],
            )
            .await?;
        let mut overrides = HashMap::new();
        for row in rows {
            let key: String = row.get(0);
            if domain_item_spec(&key).is_some() {
                overrides.insert(key, row.get(1));
            }
        }
        self.domain_cache.write().await.insert(
            domain_id,
            DomainCacheEntry {
                loaded: Instant::now(),
                overrides: overrides.clone(),
            },
        );
        Ok(overrides)
    }

    /// Per-domain lookup: domain override, else the instance
    /// `domain.defaults.<key>` item (which may itself be overridden), else the
    /// catalogue default.
    pub async fn domain_get(&self, domain_id: Uuid, key: &str) -> Result<ConfigItem> {
        let spec = domain_item_spec(key).ok_or(Error::NotFound)?;
        let overrides = self.domain_overrides(domain_id).await?;
        if let Some(value) = overrides.get(key) {
            return Ok(ConfigItem {
                key: key.to_string(),
                value: value.clone(),
                datatype: spec.datatype,
                default_value: spec.default_value.to_string(),
                ts_updated: None,
                user_updated: None,
            });
        }
        let mut item = self.get(spec.key).await?;
        item.key = key.to_string();
        Ok(item)
    }

    pub async fn domain_get_bool(&self, domain_id: Uuid, key: &str) -> bool {
        match self.domain_get(domain_id, key).await {
            Ok(item) => item.as_bool(),
            Err(_) => domain_item_spec(key)
                .map(|s| s.default_value == "true")
                .unwrap_or(false),
        }
    }

    pub async fn domain_get_int(&self, domain_id: Uuid, key: &str) -> i64 {
        match self.domain_get(domain_id, key).await {
            Ok(item) => item.as_int(),
            Err(_) => domain_item_spec(key)
                .and_then(|s| s.default_value.parse().ok())
                .unwrap_or(0),
        }
    }

    /// Atomic per-domain update; evicts the domain's cache entry on success.
    pub async fn domain_update(
        &self,
        cur_user: Uuid,
        domain_id: Uuid,
        updates: &HashMap<String, String>,
    ) -> std::result::Result<(), UpdateError> {
        let mut validated = Vec::with_capacity(updates.len());
        for (key, value) in updates {
            let spec =
                domain_item_spec(key).ok_or_else(|| ValidationError::UnknownKey(key.clone()))?;
            validate_value(spec, value)?;
            validated.push((key.clone(), spec, value.clone()));
        }

        let now = crate::util::now();
        let mut client = self.db.client().await.map_err(UpdateError::Db)?;
        let tx = client.transaction().await.map_err(Error::from).map_err(UpdateError::Db)?;
        for (key, spec, value) in &validated {
            if *value == spec.default_value {
                tx.execute(
                    "DELETE FROM cm_domain_configuration WHERE domain_id = $1 AND key = $2",
                    &[&domain_id, key],
                )
                .await
                .map_err(Error::from)?;
            } else {
                tx.execute(
                    "INSERT INTO cm_domain_configuration(domain_id, key, value, ts_updated, user_updated) \
                     VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (domain_id, key) DO UPDATE \
                     SET value = EXCLUDED.value, ts_updated = EXCLUDED.ts_updated, \
                         user_updated = EXCLUDED.user_updated",
                    &[&domain_id, key, value, &now, &cur_user],
                )
                .await
                .map_err(Error::from)?;
            }
        }
        tx.commit().await.map_err(Error::from).map_err(UpdateError::Db)?;

        self.domain_cache.write().await.remove(&domain_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_validation() {
        let spec = item_spec(KEY_AUTH_SIGNUP_ENABLED).unwrap();
        assert!(validate_value(spec, "true").is_ok());
        assert!(validate_value(spec, "false").is_ok());
        assert!(validate_value(spec, "TRUE").is_err());
        assert!(validate_value(spec, "1").is_err());
    }

    #[test]
    fn int_validation_enforces_bounds() {
        let spec = item_spec(KEY_COMMENT_EDIT_WINDOW).unwrap();
        assert!(validate_value(spec, "0").is_ok());
        assert!(validate_value(spec, "600").is_ok());
        assert!(validate_value(spec, "86400").is_ok());
        assert!(validate_value(spec, "86401").is_err());
        assert!(validate_value(spec, "-1").is_err());
        assert!(validate_value(spec, "ten").is_err());
    }

    #[test]
    fn enum_validation_checks_membership() {
        let spec = item_spec("domain.defaults.sort").unwrap();
        assert!(validate_value(spec, "ta").is_ok());
        assert!(validate_value(spec, "sd").is_ok());
        assert!(validate_value(spec, "xx").is_err());
    }

    #[test]
    fn domain_keys_resolve_through_defaults_namespace() {
        assert!(domain_item_spec(DOMAIN_KEY_COMMENTS_SHOW_DELETED).is_some());
        assert!(domain_item_spec(DOMAIN_KEY_DEFAULT_SORT).is_some());
        assert!(domain_item_spec("auth.signup.enabled").is_none());
    }

    #[test]
    fn item_fallback_parsing() {
        let item = ConfigItem {
            key: KEY_COMMENT_EDIT_WINDOW.into(),
            value: "garbage".into(),
            datatype: Datatype::Int,
            default_value: "600".into(),
            ts_updated: None,
            user_updated: None,
        };
        assert_eq!(item.as_int(), 600);

        let item = ConfigItem {
            key: KEY_AUTH_SIGNUP_ENABLED.into(),
            value: "maybe".into(),
            datatype: Datatype::Bool,
            default_value: "true".into(),
            ts_updated: None,
            user_updated: None,
        };
        assert!(item.as_bool());
    }
}
