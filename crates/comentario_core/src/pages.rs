/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Page registrar: UPSERT-on-view page rows, per-visit analytics rows, and
//! the background HTML title fetch.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::util;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_postgres::Row;
use tracing::{debug, warn};
use uuid::Uuid;

const TITLE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TITLE_LEN: usize = 100;

#[derive(Debug, Clone)]
pub struct DomainPage {
    pub id: Uuid,
    pub domain_id: Uuid,
    pub path: String,
    pub title: String,
    pub is_readonly: bool,
    pub ts_created: DateTime<Utc>,
    pub count_comments: i64,
    pub count_views: i64,
}

const PAGE_COLS: &str =
    "id, domain_id, path, title, is_readonly, ts_created, count_comments, count_views";

fn page_from_row(row: &Row) -> DomainPage {
    DomainPage {
        id: row.get(0),
        domain_id: row.get(1),
        path: row.get(2),
        title: row.get(3),
        is_readonly: row.get(4),
        ts_created: row.get(5),
        count_comments: row.get(6),
        count_views: row.get(7),
    }
}

/// What a registering view resolved to.
#[derive(Debug)]
pub struct RegisteredView {
    pub page: DomainPage,
    /// True iff this call inserted the row (won the first-visit race).
    pub created: bool,
}

#[derive(Clone)]
pub struct PageService {
    db: Database,
    http: reqwest::Client,
    log_full_ips: bool,
}

impl PageService {
    pub fn new(db: Database, log_full_ips: bool) -> Self {
        Self {
            db,
            http: reqwest::Client::builder()
                .timeout(TITLE_FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
            log_full_ips,
        }
    }

    pub async fn by_id(&self, id: Uuid) -> Result<DomainPage> {
        let row = self
            .db
            .query_row(
                &format!("SELECT {PAGE_COLS} FROM cm_domain_pages WHERE id = $1"),
                &[&id],
            )
            .await?;
        Ok(page_from_row(&row))
    }

    pub async fn by_domain_path(&self, domain_id: Uuid, path: &str) -> Result<DomainPage> {
        let row = self
            .db
            .query_row(
                &format!(
                    "SELECT {PAGE_COLS} FROM cm_domain_pages \
                     WHERE domain_id = $1 AND path = $2"
                ),
                &[&domain_id, &path],
            )
            .await?;
        Ok(page_from_row(&row))
    }

    /// The embed-load hot path: one statement that either inserts the page
    /// with a view count of 1 or bumps the existing row's views. Concurrent
    /// first visits all observe the single winner's id; this call won the
    /// race exactly when the returned id equals the candidate it generated.
    pub async fn registering_view(&self, domain_id: Uuid, path: &str) -> Result<RegisteredView> {
        self.upsert_page(&registering_view_sql(), domain_id, path)
            .await
    }

    /// Find-or-create without touching `count_views`: the comment pipeline
    /// needs the page row but a submission is not a page view.
    pub async fn find_or_create(&self, domain_id: Uuid, path: &str) -> Result<RegisteredView> {
        self.upsert_page(&find_or_create_sql(), domain_id, path)
            .await
    }

    async fn upsert_page(&self, sql: &str, domain_id: Uuid, path: &str) -> Result<RegisteredView> {
        let candidate = Uuid::new_v4();
        let now = util::now();
        let row = self
            .db
            .query_row(sql, &[&candidate, &domain_id, &path, &now])
            .await?;
        let page = page_from_row(&row);
        let created = page.id == candidate;
        Ok(RegisteredView { page, created })
    }

    /// Single-statement counter bump, never negative.
    pub async fn increment_counts(&self, id: Uuid, d_comments: i64, d_views: i64) -> Result<()> {
        self.db
            .exec_one(
                "UPDATE cm_domain_pages \
                 SET count_comments = GREATEST(count_comments + $2, 0), \
                     count_views = GREATEST(count_views + $3, 0) \
                 WHERE id = $1",
                &[&id, &d_comments, &d_views],
            )
            .await
    }

    pub async fn set_readonly(&self, id: Uuid, readonly: bool) -> Result<()> {
        self.db
            .exec_one(
                "UPDATE cm_domain_pages SET is_readonly = $2 WHERE id = $1",
                &[&id, &readonly],
            )
            .await
    }

    pub async fn update_title(&self, id: Uuid, title: &str) -> Result<()> {
        self.db
            .exec_one(
                "UPDATE cm_domain_pages SET title = $2 WHERE id = $1",
                &[&id, &title],
            )
            .await
    }

    /// Best-effort title resolution for a freshly created page: HTTPS first,
    /// plain HTTP on failure, and the page's own URL when neither yields a
    /// usable `<title>`. Meant to run on a detached task.
    pub async fn fetch_and_update_title(&self, page_id: Uuid, host: &str, path: &str) {
        let fallback = format!("{host}{path}");
        let mut title = None;
        for scheme in ["https", "http"] {
            let url = format!("{scheme}://{host}{path}");
            match self.fetch_title(&url).await {
                Ok(Some(t)) => {
                    title = Some(t);
                    break;
                }
                Ok(None) => break,
                Err(e) => debug!(url, "title fetch failed: {e:#}"),
            }
        }
        let title = title.unwrap_or(fallback);
        if let Err(e) = self.update_title(page_id, &title).await {
            warn!(%page_id, "failed to store page title: {e}");
        }
    }

    async fn fetch_title(&self, url: &str) -> anyhow::Result<Option<String>> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        let body = resp.text().await?;
        Ok(extract_title(&body))
    }

    /// Appends the analytics row for one visit. Failures are the caller's to
    /// log; nothing in the serving path depends on this row.
    pub async fn register_visit(
        &self,
        page_id: Uuid,
        proto: &str,
        ip: &str,
        country: &str,
        user_agent: &str,
    ) -> Result<()> {
        let facts = util::agent_facts(user_agent);
        let stored_ip = util::storable_ip(ip, self.log_full_ips);
        let now = util::now();
        self.db
            .exec(
                "INSERT INTO cm_domain_page_views(page_id, ts_created, proto, ip, country, \
                 ua_browser, ua_os, ua_device) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &page_id,
                    &now,
                    &proto,
                    &stored_ip,
                    &country,
                    &facts.browser,
                    &facts.os,
                    &facts.device,
                ],
            )
            .await?;
        Ok(())
    }
}

fn registering_view_sql() -> String {
    format!(
        "INSERT INTO cm_domain_pages({PAGE_COLS}) \
         VALUES ($1, $2, $3, '', false, $4, 0, 1) \
         ON CONFLICT (domain_id, path) \
         DO UPDATE SET count_views = cm_domain_pages.count_views + 1 \
         RETURNING {PAGE_COLS}"
    )
}

// The no-op conflict update makes RETURNING yield the existing row.
fn find_or_create_sql() -> String {
    format!(
        "INSERT INTO cm_domain_pages({PAGE_COLS}) \
         VALUES ($1, $2, $3, '', false, $4, 0, 0) \
         ON CONFLICT (domain_id, path) \
         DO UPDATE SET path = excluded.path \
         RETURNING {PAGE_COLS}"
    )
}

/// Pulls the text of the first `<title>` element out of an HTML document,
/// whitespace-collapsed and capped in length.
pub fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let start = lower.find("<title")?;
    let open_end = html[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title")? + open_end;
    let raw = html[open_end..close].trim();
    if raw.is_empty() {
        return None;
    }
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let title: String = collapsed.chars().take(MAX_TITLE_LEN).collect();
    Some(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_title() {
        let html = "<html><head><title>Hello, World</title></head><body/></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Hello, World"));
    }

    #[test]
    fn title_with_attributes_and_whitespace() {
        let html = "<TITLE lang=\"en\">\n  Spread \n over\tlines  </TITLE>";
        assert_eq!(extract_title(html).as_deref(), Some("Spread over lines"));
    }

    #[test]
    fn missing_or_empty_title() {
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
        assert_eq!(extract_title("<title>   </title>"), None);
        assert_eq!(extract_title("<title>unterminated"), None);
    }

    #[test]
    fn long_title_is_capped() {
        let html = format!("<title>{}</title>", "x".repeat(500));
        assert_eq!(extract_title(&html).unwrap().len(), MAX_TITLE_LEN);
    }

    #[test]
    fn registering_view_counts_the_visit() {
        let sql = registering_view_sql();
        assert!(sql.contains("0, 1)"), "first visit starts at one view");
        assert!(sql.contains("count_views = cm_domain_pages.count_views + 1"));
    }

    #[test]
    fn find_or_create_never_bumps_views() {
        let sql = find_or_create_sql();
        assert!(sql.contains("0, 0)"), "insert starts with zero views");
        assert!(
            !sql.contains("count_views +"),
            "resolving a page for a comment must not count as a view"
        );
        assert!(sql.contains("RETURNING"));
    }
}
