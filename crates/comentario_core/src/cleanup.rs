/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Background pruning of expired and aged-out rows. Each table gets its own
//! loop so a slow DELETE never delays the others.

use crate::db::Database;
use crate::util;
use chrono::Duration as ChronoDuration;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const HOURLY: Duration = Duration::from_secs(3600);
const DAILY: Duration = Duration::from_secs(86_400);

#[derive(Clone)]
pub struct CleanupService {
    db: Database,
    view_retention_days: i64,
}

impl CleanupService {
    pub fn new(db: Database, view_retention_days: i64) -> Self {
        Self {
            db,
            view_retention_days,
        }
    }

    /// Spawns the four pruning loops; they end when the shutdown flag flips.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_loop(shutdown.clone(), HOURLY, "expired tokens", |svc| {
                Box::pin(svc.prune_tokens())
            }),
            self.spawn_loop(shutdown.clone(), HOURLY, "expired auth sessions", |svc| {
                Box::pin(svc.prune_auth_sessions())
            }),
            self.spawn_loop(shutdown.clone(), DAILY, "expired user sessions", |svc| {
                Box::pin(svc.prune_user_sessions())
            }),
            self.spawn_loop(shutdown, DAILY, "old page views", |svc| {
                Box::pin(svc.prune_page_views())
            }),
        ]
    }

    fn spawn_loop(
        &self,
        mut shutdown: watch::Receiver<bool>,
        period: Duration,
        what: &'static str,
        prune: for<'a> fn(
            &'a CleanupService,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = crate::Result<u64>> + Send + 'a>,
        >,
    ) -> JoinHandle<()> {
        let svc = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = shutdown.changed() => {
                        info!(what, "cleanup loop stopping");
                        return;
                    }
                }
                match prune(&svc).await {
                    Ok(deleted) => info!(deleted, what, "cleanup pass done"),
                    Err(e) => warn!(what, "cleanup pass failed: {e}"),
                }
            }
        })
    }

    pub async fn prune_tokens(&self) -> crate::Result<u64> {
        self.db
            .exec("DELETE FROM cm_tokens WHERE ts_expires < $1", &[&util::now()])
            .await
    }

    pub async fn prune_auth_sessions(&self) -> crate::Result<u64> {
        self.db
            .exec(
                "DELETE FROM cm_auth_sessions WHERE ts_expires < $1",
                &[&util::now()],
            )
            .await
    }

    pub async fn prune_user_sessions(&self) -> crate::Result<u64> {
        self.db
            .exec(
                "DELETE FROM cm_user_sessions WHERE ts_expires < $1",
                &[&util::now()],
            )
            .await
    }

    pub async fn prune_page_views(&self) -> crate::Result<u64> {
        let cutoff = util::now() - ChronoDuration::days(self.view_retention_days);
        self.db
            .exec(
                "DELETE FROM cm_domain_page_views WHERE ts_created < $1",
                &[&cutoff],
            )
            .await
    }
}
