/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Process configuration: `COMENTARIO_*` environment variables for everything
//! operational, plus a YAML secrets file for credentials.

use anyhow::Context;
use comentario_core::db::DbConfig;
use comentario_core::mail::SmtpConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// External base URL, e.g. `https://comments.example.org`.
    pub base_url: String,
    pub email_from: String,
    pub secrets_path: PathBuf,
    pub migrations_path: PathBuf,
    /// UUID or email of the user to promote at startup; empty to skip.
    pub superuser: String,
    pub log_full_ips: bool,
    pub no_live_update: bool,
    pub ws_max_clients: usize,
    pub e2e: bool,
    pub e2e_seed_path: Option<PathBuf>,
    pub wrong_auth_delay_min_ms: u64,
    pub wrong_auth_delay_max_ms: u64,
    pub page_view_retention_days: i64,
    pub domain_config_ttl_secs: u64,
}

impl ServerConfig {
    pub fn secure_cookies(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn load_config() -> anyhow::Result<ServerConfig> {
    let bind = env_str("COMENTARIO_BIND", "0.0.0.0:8080");
    let bind: SocketAddr = bind
        .parse()
        .with_context(|| format!("COMENTARIO_BIND invalid: {bind:?}"))?;
    let base_url = env_str("COMENTARIO_BASE_URL", "http://localhost:8080")
        .trim_end_matches('/')
        .to_string();
    Ok(ServerConfig {
        bind,
        base_url,
        email_from: env_str("COMENTARIO_EMAIL_FROM", "noreply@localhost"),
        secrets_path: PathBuf::from(env_str("COMENTARIO_SECRETS", "secrets.yaml")),
        migrations_path: PathBuf::from(env_str("COMENTARIO_DB_MIGRATION_PATH", "migrations")),
        superuser: env_str("COMENTARIO_SUPERUSER", ""),
        log_full_ips: env_flag("COMENTARIO_LOG_FULL_IPS"),
        no_live_update: env_flag("COMENTARIO_NO_LIVE_UPDATE"),
        ws_max_clients: env_parse("COMENTARIO_WS_MAX_CLIENTS", 10_000),
        e2e: env_flag("COMENTARIO_E2E"),
        e2e_seed_path: std::env::var("COMENTARIO_E2E_SEED")
            .ok()
            .map(PathBuf::from),
        wrong_auth_delay_min_ms: env_parse("COMENTARIO_WRONG_AUTH_DELAY_MIN_MS", 100),
        wrong_auth_delay_max_ms: env_parse("COMENTARIO_WRONG_AUTH_DELAY_MAX_MS", 4000),
        page_view_retention_days: env_parse("COMENTARIO_PAGE_VIEW_RETENTION_DAYS", 45),
        domain_config_ttl_secs: env_parse("COMENTARIO_DOMAIN_CONFIG_TTL_SECS", 60),
    })
}

/// One federated identity provider's credentials.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdpSecrets {
    pub key: String,
    pub secret: String,
    pub disable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PostgresSecrets {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub sslmode: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SmtpSecrets {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub encryption: String,
    pub insecure: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AkismetSecrets {
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Secrets {
    pub postgres: PostgresSecrets,
    #[serde(rename = "smtpServer")]
    pub smtp_server: SmtpSecrets,
    pub idp: HashMap<String, IdpSecrets>,
    pub akismet: AkismetSecrets,
    /// Per-plugin blobs; only `disable` is interpreted by the host.
    pub plugins: HashMap<String, serde_json::Value>,
}

impl Secrets {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .build()
            .with_context(|| format!("reading secrets file {}", path.display()))?;
        settings
            .try_deserialize()
            .context("parsing secrets file")
    }

    pub fn db_config(&self) -> DbConfig {
        let mut cfg = DbConfig::default();
        if !self.postgres.host.is_empty() {
            cfg.host = self.postgres.host.clone();
        }
        if self.postgres.port != 0 {
            cfg.port = self.postgres.port;
        }
        cfg.username = self.postgres.username.clone();
        cfg.password = self.postgres.password.clone();
        if !self.postgres.database.is_empty() {
            cfg.database = self.postgres.database.clone();
        }
        if !self.postgres.sslmode.is_empty() {
            cfg.sslmode = self.postgres.sslmode.clone();
        }
        cfg
    }

    pub fn smtp_config(&self) -> SmtpConfig {
        SmtpConfig {
            host: self.smtp_server.host.clone(),
            port: if self.smtp_server.port == 0 {
                587
            } else {
                self.smtp_server.port
            },
            username: self.smtp_server.username.clone(),
            password: self.smtp_server.password.clone(),
            encryption: if self.smtp_server.encryption.is_empty() {
                "default".to_string()
            } else {
                self.smtp_server.encryption.clone()
            },
            insecure: self.smtp_server.insecure,
        }
    }

    pub fn plugin_disabled(&self, id: &str) -> bool {
        self.plugins
            .get(id)
            .and_then(|v| v.get("disable"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_cookies_follow_scheme() {
        let mut cfg = ServerConfig {
            bind: "127.0.0.1:8080".parse().unwrap(),
            base_url: "https://c.example.org".into(),
            email_from: String::new(),
            secrets_path: PathBuf::new(),
            migrations_path: PathBuf::new(),
            superuser: String::new(),
            log_full_ips: false,
            no_live_update: false,
            ws_max_clients: 100,
            e2e: false,
            e2e_seed_path: None,
            wrong_auth_delay_min_ms: 0,
            wrong_auth_delay_max_ms: 0,
            page_view_retention_days: 45,
            domain_config_ttl_secs: 60,
        };
        assert!(cfg.secure_cookies());
        cfg.base_url = "http://localhost:8080".into();
        assert!(!cfg.secure_cookies());
    }

    #[test]
    fn plugin_disable_flag() {
        let mut secrets = Secrets::default();
        secrets
            .plugins
            .insert("example".into(), serde_json::json!({ "disable": true }));
        secrets
            .plugins
            .insert("other".into(), serde_json::json!({ "apiKey": "k" }));
        assert!(secrets.plugin_disabled("example"));
        assert!(!secrets.plugin_disabled("other"));
        assert!(!secrets.plugin_disabled("absent"));
    }
}
