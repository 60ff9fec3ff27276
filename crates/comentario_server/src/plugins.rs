/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-process plugin host. Plugins are compiled-in modules registered at
//! startup; each one gets a scoped connector whose attribute stores prefix
//! every key with `<plugin-id>/`, and events flow through a sequential bus.

use anyhow::bail;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::Method;
use comentario_core::db::Database;
use comentario_core::users::User;
use comentario_core::Error;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Host-side facts a plugin may read.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub base_url: String,
    pub default_lang: String,
}

/// The scoped connector handed to each plugin. All persistence goes through
/// here; plugins never see the database.
#[derive(Clone)]
pub struct PluginConnector {
    plugin_id: String,
    db: Database,
    pub host: HostConfig,
}

fn scoped_key(plugin_id: &str, key: &str) -> String {
    format!("{plugin_id}/{key}")
}

impl PluginConnector {
    pub async fn domain_attr(&self, domain_id: Uuid, key: &str) -> comentario_core::Result<Option<String>> {
        let row = self
            .db
            .query_opt(
                "SELECT value FROM cm_domain_attrs WHERE domain_id = $1 AND key = $2",
                &[&domain_id, &scoped_key(&self.plugin_id, key)],
            )
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn set_domain_attr(
        &self,
        domain_id: Uuid,
        key: &str,
        value: &str,
    ) -> comentario_core::Result<()> {
        self.db
            .exec(
                "INSERT INTO cm_domain_attrs(domain_id, key, value, ts_updated) \
                 VALUES ($1, $2, $3, now()) \
                 ON CONFLICT (domain_id, key) \
                 DO UPDATE SET value = EXCLUDED.value, ts_updated = now()",
                &[&domain_id, &scoped_key(&self.plugin_id, key), &value],
            )
            .await?;
        Ok(())
    }

    pub async fn user_attr(&self, user_id: Uuid, key: &str) -> comentario_core::Result<Option<String>> {
        let row = self
            .db
            .query_opt(
                "SELECT value FROM cm_user_attrs WHERE user_id = $1 AND key = $2",
                &[&user_id, &scoped_key(&self.plugin_id, key)],
            )
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn set_user_attr(
        &self,
        user_id: Uuid,
        key: &str,
        value: &str,
    ) -> comentario_core::Result<()> {
        self.db
            .exec(
                "INSERT INTO cm_user_attrs(user_id, key, value, ts_updated) \
                 VALUES ($1, $2, $3, now()) \
                 ON CONFLICT (user_id, key) \
                 DO UPDATE SET value = EXCLUDED.value, ts_updated = now()",
                &[&user_id, &scoped_key(&self.plugin_id, key), &value],
            )
            .await?;
        Ok(())
    }

    /// Read-only user lookup.
    pub async fn user(&self, id: Uuid) -> comentario_core::Result<Option<User>> {
        let svc = comentario_core::users::UserService::new(self.db.clone(), false);
        match svc.by_id(id).await {
            Ok(u) => Ok(Some(u)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Lifecycle and user events fanned out to plugins. The user payload is
/// mutable so a plugin can attach computed state before it is persisted.
#[derive(Debug)]
pub enum PluginEvent<'a> {
    UserCreated(&'a mut User),
    UserUpdated(&'a mut User),
    UserBanStatus { user: &'a mut User, banned: bool },
    UserBecomesOwner(&'a mut User),
}

#[derive(Debug, Clone)]
pub struct PluginRequest {
    pub method: Method,
    /// Path remainder after the plugin's serving prefix was stripped.
    pub path: String,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct PluginResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait ComentarioPlugin: Send + Sync {
    /// Stable unique identifier; also the attribute-store scope.
    fn id(&self) -> &'static str;

    /// Serving path under the API base, without surrounding slashes.
    fn path(&self) -> &'static str;

    async fn init(
        &self,
        connector: PluginConnector,
        secrets: serde_json::Value,
    ) -> anyhow::Result<()>;

    /// Called once after every plugin has initialised.
    async fn activate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle_event(&self, _event: &mut PluginEvent<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handles `<base>/api/<path>/…` requests.
    async fn api_request(&self, _req: PluginRequest) -> Option<PluginResponse> {
        None
    }

    /// Handles `GET|HEAD|OPTIONS <base>/<path>/…` requests.
    async fn static_request(&self, _req: PluginRequest) -> Option<PluginResponse> {
        None
    }

    async fn shutdown(&self) {}
}

#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn ComentarioPlugin>>,
    by_path: HashMap<String, usize>,
}

impl PluginRegistry {
    /// Wires up the given plugins: duplicate IDs are fatal, plugins disabled
    /// in the secrets are skipped, every survivor is initialised with its
    /// scoped connector and then activated.
    pub async fn build(
        candidates: Vec<Arc<dyn ComentarioPlugin>>,
        db: Database,
        host: HostConfig,
        secrets: &crate::config::Secrets,
    ) -> anyhow::Result<Self> {
        let mut registry = Self::default();
        let mut seen = HashSet::new();
        for plugin in candidates {
            let id = plugin.id();
            if !seen.insert(id) {
                bail!("duplicate plugin id {id:?}");
            }
            if secrets.plugin_disabled(id) {
                info!(plugin = id, "plugin disabled via secrets, skipping");
                continue;
            }
            let connector = PluginConnector {
                plugin_id: id.to_string(),
                db: db.clone(),
                host: host.clone(),
            };
            let plugin_secrets = secrets
                .plugins
                .get(id)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            plugin
                .init(connector, plugin_secrets)
                .await
                .map_err(|e| anyhow::anyhow!("plugin {id:?} init failed: {e:#}"))?;
            let path = plugin.path().trim_matches('/').to_string();
            if !path.is_empty() {
                registry.by_path.insert(path, registry.plugins.len());
            }
            registry.plugins.push(plugin);
        }
        for plugin in &registry.plugins {
            plugin
                .activate()
                .await
                .map_err(|e| anyhow::anyhow!("plugin {:?} activation failed: {e:#}", plugin.id()))?;
        }
        info!(count = registry.plugins.len(), "plugin registry ready");
        Ok(registry)
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Sequential event bus; the first error aborts the chain.
    pub async fn dispatch(&self, event: &mut PluginEvent<'_>) -> anyhow::Result<()> {
        for plugin in &self.plugins {
            plugin.handle_event(event).await?;
        }
        Ok(())
    }

    pub async fn user_created(&self, user: &User) -> anyhow::Result<()> {
        let mut user = user.clone();
        self.dispatch(&mut PluginEvent::UserCreated(&mut user)).await
    }

    pub async fn user_ban_status(&self, user: &User, banned: bool) -> anyhow::Result<()> {
        let mut user = user.clone();
        self.dispatch(&mut PluginEvent::UserBanStatus {
            user: &mut user,
            banned,
        })
        .await
    }

    /// Resolves a request path like `some-plugin/sub/page` to the owning
    /// plugin and the stripped remainder.
    pub fn resolve<'a>(&self, path: &'a str) -> Option<(&Arc<dyn ComentarioPlugin>, &'a str)> {
        let path = path.trim_start_matches('/');
        let (prefix, rest) = match path.split_once('/') {
            Some((p, r)) => (p, r),
            None => (path, ""),
        };
        let idx = *self.by_path.get(prefix)?;
        Some((&self.plugins[idx], rest))
    }

    pub async fn shutdown(&self) {
        for plugin in &self.plugins {
            plugin.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop(&'static str, &'static str);

    #[async_trait]
    impl ComentarioPlugin for Nop {
        fn id(&self) -> &'static str {
            self.0
        }
        fn path(&self) -> &'static str {
            self.1
        }
        async fn init(
            &self,
            _connector: PluginConnector,
            _secrets: serde_json::Value,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn keys_are_scoped_per_plugin() {
        assert_eq!(scoped_key("gravatar", "cache"), "gravatar/cache");
        assert_ne!(scoped_key("a", "k"), scoped_key("b", "k"));
    }

    #[test]
    fn path_resolution_strips_prefix() {
        let mut registry = PluginRegistry::default();
        registry.by_path.insert("widget".into(), 0);
        registry.plugins.push(Arc::new(Nop("widget", "widget")));

        let (plugin, rest) = registry.resolve("/widget/assets/app.js").unwrap();
        assert_eq!(plugin.id(), "widget");
        assert_eq!(rest, "assets/app.js");

        let (_, rest) = registry.resolve("widget").unwrap();
        assert_eq!(rest, "");

        assert!(registry.resolve("/unknown/x").is_none());
    }
}
