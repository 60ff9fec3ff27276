/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Persistence gateway: a single handle over the Postgres pool with connect
//! retry, thin query helpers and the filename+checksum migration runner.

use crate::error::{Error, Result};
use anyhow::{bail, Context};
use deadpool_postgres::{ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub sslmode: String,
    pub pool_max_size: usize,
    pub connect_retries: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            database: "comentario".into(),
            username: "postgres".into(),
            password: String::new(),
            sslmode: "disable".into(),
            pool_max_size: 16,
            connect_retries: 10,
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Open the pool and verify connectivity, retrying with a delay that
    /// doubles each round (1s, 2s, 4s, ...). The loop aborts early when the
    /// shutdown signal fires.
    pub async fn connect(cfg: &DbConfig, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<Self> {
        if cfg.sslmode != "disable" && cfg.sslmode != "prefer" {
            bail!("unsupported sslmode {:?} (TLS termination is external)", cfg.sslmode);
        }

        let mut pg = deadpool_postgres::Config::new();
        pg.host = Some(cfg.host.clone());
        pg.port = Some(cfg.port);
        pg.dbname = Some(cfg.database.clone());
        pg.user = Some(cfg.username.clone());
        pg.password = Some(cfg.password.clone());
        pg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pg.pool = Some(PoolConfig::new(cfg.pool_max_size.max(1)));

        let pool = pg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("create postgres pool")?;

        let mut delay = Duration::from_secs(1);
        let attempts = cfg.connect_retries.max(1);
        for attempt in 1..=attempts {
            match pool.get().await {
                Ok(client) => {
                    client.simple_query("SELECT 1").await.context("db ping")?;
                    info!(attempt, "connected to postgres at {}:{}", cfg.host, cfg.port);
                    return Ok(Self { pool });
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, "postgres not ready ({e}), retrying in {delay:?}");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                bail!("shutdown requested while waiting for postgres");
                            }
                        }
                    }
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e).context("connect to postgres"),
            }
        }
        unreachable!("connect loop returns or errors")
    }

    pub async fn client(&self) -> Result<deadpool_postgres::Object> {
        Ok(self.pool.get().await?)
    }

    /// Whether the pool can currently hand out a working connection.
    pub async fn ready(&self) -> bool {
        match self.pool.get().await {
            Ok(c) => c.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }

    pub async fn exec(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let client = self.client().await?;
        Ok(client.execute(sql, params).await?)
    }

    /// Execute a statement that must affect exactly one row.
    pub async fn exec_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<()> {
        match self.exec(sql, params).await? {
            0 => Err(Error::NotFound),
            1 => Ok(()),
            n => Err(Error::Database(format!("statement affected {n} rows, expected 1"))),
        }
    }

    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        let client = self.client().await?;
        Ok(client.query(sql, params).await?)
    }

    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>> {
        let client = self.client().await?;
        Ok(client.query_opt(sql, params).await?)
    }

    /// Query a single row, failing with `NotFound` when there is none.
    pub async fn query_row(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Row> {
        self.query_opt(sql, params).await?.ok_or(Error::NotFound)
    }

    /// Apply pending migrations from `dir` in lexicographic filename order.
    /// Each installed file is recorded as `(filename, md5)`; a checksum change
    /// of an already-installed file refuses to run. Returns the number of
    /// newly installed migrations (zero on an idempotent re-run).
    pub async fn migrate(&self, dir: &Path) -> anyhow::Result<usize> {
        let mut client = self.client().await.map_err(anyhow::Error::new)?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS cm_migrations (
                    filename     TEXT PRIMARY KEY,
                    md5          BYTEA NOT NULL,
                    ts_installed TIMESTAMPTZ NOT NULL DEFAULT now()
                )",
            )
            .await
            .context("create cm_migrations")?;

        let mut files = list_migration_files(dir)?;
        files.sort();

        let mut installed = 0usize;
        for name in files {
            let path = dir.join(&name);
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("read migration {}", path.display()))?;
            let digest = md5::compute(sql.as_bytes()).0.to_vec();

            let row = client
                .query_opt("SELECT md5 FROM cm_migrations WHERE filename = $1", &[&name])
                .await?;
            if let Some(row) = row {
                let stored: Vec<u8> = row.get(0);
                if stored != digest {
                    bail!("checksum mismatch for installed migration {name}; refusing to migrate");
                }
                continue;
            }

            let tx = client.transaction().await?;
            tx.batch_execute(&sql)
                .await
                .with_context(|| format!("apply migration {name}"))?;
            tx.execute(
                "INSERT INTO cm_migrations(filename, md5) VALUES ($1, $2)",
                &[&name, &digest],
            )
            .await?;
            tx.commit().await?;
            info!(migration = %name, "installed");
            installed += 1;
        }
        Ok(installed)
    }

    /// E2E support: drop and recreate the public schema, reapply all
    /// migrations, then run the seed script (if any) in one transaction.
    pub async fn recreate_schema(&self, dir: &Path, seed: Option<&Path>) -> anyhow::Result<()> {
        {
            let client = self.client().await.map_err(anyhow::Error::new)?;
            client
                .batch_execute("DROP SCHEMA public CASCADE; CREATE SCHEMA public")
                .await
                .context("recreate schema")?;
        }
        self.migrate(dir).await?;
        if let Some(seed) = seed {
            let sql = std::fs::read_to_string(seed)
                .with_context(|| format!("read seed script {}", seed.display()))?;
            let mut client = self.client().await.map_err(anyhow::Error::new)?;
            let tx = client.transaction().await?;
            tx.batch_execute(&sql).await.context("apply seed script")?;
            tx.commit().await?;
            info!("seed script applied");
        }
        Ok(())
    }
}

fn list_migration_files(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".sql") {
            files.push(name);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_files_sort_lexicographically() {
        let mut names = vec![
            "0010_views.sql".to_string(),
            "0001_initial.sql".to_string(),
            "0002_tokens.sql".to_string(),
        ];
        names.sort();
        assert_eq!(names[0], "0001_initial.sql");
        assert_eq!(names[2], "0010_views.sql");
    }

    #[test]
    fn md5_digest_is_sixteen_bytes_and_content_addressed() {
        let a = md5::compute(b"CREATE TABLE x(id INT);").0;
        let b = md5::compute(b"CREATE TABLE x(id INT); -- edited").0;
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
        assert_eq!(a, md5::compute(b"CREATE TABLE x(id INT);").0);
    }
}
