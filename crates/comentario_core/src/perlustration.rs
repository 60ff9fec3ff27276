/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Spam perlustration: an ordered chain of content scanners. The first one
//! that cries spam wins; a failing scanner is logged and skipped.

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const AKISMET_ENDPOINT: &str = "https://rest.akismet.com/1.1/comment-check";
const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a scanner may want to know about a submission.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub blog_url: String,
    pub user_ip: String,
    pub user_agent: String,
    pub referrer: String,
    pub permalink: String,
    pub author_name: String,
    pub author_email: String,
    pub author_url: String,
    pub content: String,
    pub ts_created: Option<DateTime<Utc>>,
    pub is_edit: bool,
}

#[async_trait]
pub trait Scanner: Send + Sync {
    fn id(&self) -> &'static str;

    /// Returns `Ok(true)` for spam, `Ok(false)` for ham.
    async fn scan(&self, req: &ScanRequest) -> anyhow::Result<bool>;
}

#[derive(Clone, Default)]
pub struct PerlustrationService {
    scanners: Arc<Vec<Box<dyn Scanner>>>,
}

impl PerlustrationService {
    pub fn new(scanners: Vec<Box<dyn Scanner>>) -> Self {
        Self {
            scanners: Arc::new(scanners),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }

    /// Runs the chain in registration order. Errors never abort the chain;
    /// the verdict is spam as soon as any scanner says so.
    pub async fn scan(&self, req: &ScanRequest) -> bool {
        for scanner in self.scanners.iter() {
            match scanner.scan(req).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => warn!(scanner = scanner.id(), "scanner failed: {e:#}"),
            }
        }
        false
    }
}

pub struct AkismetScanner {
    api_key: String,
    http: reqwest::Client,
}

impl AkismetScanner {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: reqwest::Client::builder()
                .timeout(SCAN_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

/// The `comment-check` form body, in a fixed field order.
pub fn akismet_form(api_key: &str, req: &ScanRequest) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("api_key", api_key.to_string()),
        ("blog", req.blog_url.clone()),
        ("user_ip", req.user_ip.clone()),
        ("user_agent", req.user_agent.clone()),
        ("referrer", req.referrer.clone()),
        ("permalink", req.permalink.clone()),
        ("comment_type", "comment".to_string()),
        ("comment_author", req.author_name.clone()),
        ("comment_author_email", req.author_email.clone()),
        ("comment_author_url", req.author_url.clone()),
        ("comment_content", req.content.clone()),
    ];
    if let Some(ts) = req.ts_created {
        form.push(("comment_date_gmt", ts.to_rfc3339()));
    }
    form.push(("blog_charset", "UTF-8".to_string()));
    if req.is_edit {
        form.push(("recheck_reason", "edit".to_string()));
    }
    form
}

/// Akismet answers with a bare `true` or `false`; anything else is an error.
pub fn akismet_verdict(body: &str) -> anyhow::Result<bool> {
    match body.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => bail!("unexpected comment-check response {other:?}"),
    }
}

#[async_trait]
impl Scanner for AkismetScanner {
    fn id(&self) -> &'static str {
        "akismet"
    }

    async fn scan(&self, req: &ScanRequest) -> anyhow::Result<bool> {
        let resp = self
            .http
            .post(AKISMET_ENDPOINT)
            .form(&akismet_form(&self.api_key, req))
            .send()
            .await
            .context("comment-check request failed")?
            .error_for_status()?;
        let body = resp.text().await.context("reading comment-check body")?;
        akismet_verdict(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(anyhow::Result<bool>, &'static str);

    #[async_trait]
    impl Scanner for Fixed {
        fn id(&self) -> &'static str {
            self.1
        }
        async fn scan(&self, _req: &ScanRequest) -> anyhow::Result<bool> {
            match &self.0 {
                Ok(v) => Ok(*v),
                Err(e) => bail!("{e}"),
            }
        }
    }

    #[tokio::test]
    async fn first_positive_wins() {
        let svc = PerlustrationService::new(vec![
            Box::new(Fixed(Ok(false), "a")),
            Box::new(Fixed(Ok(true), "b")),
            Box::new(Fixed(Ok(false), "c")),
        ]);
        assert!(svc.scan(&ScanRequest::default()).await);
    }

    #[tokio::test]
    async fn errors_do_not_abort_the_chain() {
        let svc = PerlustrationService::new(vec![
            Box::new(Fixed(Err(anyhow::anyhow!("down")), "a")),
            Box::new(Fixed(Ok(true), "b")),
        ]);
        assert!(svc.scan(&ScanRequest::default()).await);

        let svc = PerlustrationService::new(vec![
            Box::new(Fixed(Err(anyhow::anyhow!("down")), "a")),
            Box::new(Fixed(Ok(false), "b")),
        ]);
        assert!(!svc.scan(&ScanRequest::default()).await);
    }

    #[test]
    fn form_fields_and_order() {
        let req = ScanRequest {
            blog_url: "https://example.org".into(),
            user_ip: "203.0.113.7".into(),
            user_agent: "UA".into(),
            content: "buy stuff".into(),
            is_edit: true,
            ..Default::default()
        };
        let form = akismet_form("k3y", &req);
        let keys: Vec<_> = form.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            [
                "api_key",
                "blog",
                "user_ip",
                "user_agent",
                "referrer",
                "permalink",
                "comment_type",
                "comment_author",
                "comment_author_email",
                "comment_author_url",
                "comment_content",
                "blog_charset",
                "recheck_reason",
            ]
        );
        assert_eq!(form[0].1, "k3y");
        assert_eq!(form.last().unwrap().1, "edit");
    }

    #[test]
    fn verdict_is_strict() {
        assert!(akismet_verdict("true").unwrap());
        assert!(!akismet_verdict("false").unwrap());
        assert!(akismet_verdict("True").is_err());
        assert!(akismet_verdict("").is_err());
        assert!(akismet_verdict("invalid request").is_err());
    }
}
