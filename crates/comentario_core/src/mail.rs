/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Outbound mail: HTML templates plus an async SMTP transport. Notification
//! senders treat failures as log-only; the request paths that triggered them
//! never depend on delivery.

use crate::error::{Error, Result};
use anyhow::Context;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// One of `default`, `none`, `ssl`, `tls`.
    pub encryption: String,
    /// Accept invalid TLS certificates (test setups only).
    pub insecure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    None,
    Ssl,
    Starttls,
}

/// Picks the wire encryption: explicit modes win, `default` selects from the
/// well-known submission ports (465 implicit TLS, everything else STARTTLS).
pub fn effective_encryption(mode: &str, port: u16) -> Encryption {
    match mode {
        "none" => Encryption::None,
        "ssl" => Encryption::Ssl,
        "tls" => Encryption::Starttls,
        _ => {
            if port == 465 {
                Encryption::Ssl
            } else {
                Encryption::Starttls
            }
        }
    }
}

/// Substitutes `{{name}}` placeholders from the value map. Unknown
/// placeholders stay verbatim, which makes template typos visible in output.
pub fn render_template(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

pub const TEMPLATE_CONFIRM_EMAIL: &str = "\
<html><body>\
<p>Hello {{name}},</p>\
<p>Please confirm your email address by following \
<a href=\"{{confirmUrl}}\">this link</a>.</p>\
<p>If you didn't sign up, simply ignore this message.</p>\
</body></html>";

pub const TEMPLATE_RESET_PASSWORD: &str = "\
<html><body>\
<p>Hello {{name}},</p>\
<p>A password reset was requested for your account. You can set a new \
password via <a href=\"{{resetUrl}}\">this link</a>; it expires in \
{{validHours}} hours.</p>\
<p>If you didn't request a reset, no action is needed.</p>\
</body></html>";

pub const TEMPLATE_COMMENT_MODERATION: &str = "\
<html><body>\
<p>A new comment on <b>{{host}}</b> ({{pageTitle}}) is awaiting review:</p>\
<blockquote>{{commentHtml}}</blockquote>\
<p><a href=\"{{commentUrl}}\">Open the comment</a></p>\
<p><a href=\"{{unsubscribeUrl}}\">Unsubscribe from moderator notifications</a></p>\
</body></html>";

pub const TEMPLATE_COMMENT_REPLY: &str = "\
<html><body>\
<p>{{authorName}} replied to your comment on <b>{{host}}</b>:</p>\
<blockquote>{{commentHtml}}</blockquote>\
<p><a href=\"{{commentUrl}}\">View the reply</a></p>\
<p><a href=\"{{unsubscribeUrl}}\">Unsubscribe from reply notifications</a></p>\
</body></html>";

#[derive(Clone)]
pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
}

impl Mailer {
    /// A mailer with no SMTP host behaves as disabled: sends succeed as
    /// no-ops so signup and notification paths keep working in dev setups.
    pub fn new(cfg: &SmtpConfig, from: &str) -> anyhow::Result<Self> {
        if cfg.host.is_empty() {
            info!("no SMTP host configured, mailing is disabled");
            return Ok(Self {
                transport: None,
                from: from.to_string(),
            });
        }
        let mut tls_params = TlsParameters::builder(cfg.host.clone());
        if cfg.insecure {
            tls_params = tls_params.dangerous_accept_invalid_certs(true);
        }
        let tls = tls_params.build().context("building SMTP TLS parameters")?;
        let mut builder = match effective_encryption(&cfg.encryption, cfg.port) {
            Encryption::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
            }
            Encryption::Ssl => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
                .tls(Tls::Wrapper(tls)),
            Encryption::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
                    .tls(Tls::Required(tls))
            }
        }
        .port(cfg.port);
        if !cfg.username.is_empty() {
            builder = builder
                .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()));
        }
        Ok(Self {
            transport: Some(builder.build()),
            from: from.to_string(),
        })
    }

    pub fn enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn send(&self, to: &str, subject: &str, html: String) -> Result<()> {
        let Some(transport) = &self.transport else {
            info!(to, subject, "mailing disabled, dropping message");
            return Ok(());
        };
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| Error::EmailSend(format!("bad sender address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| Error::EmailSend(format!("bad recipient address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| Error::EmailSend(e.to_string()))?;
        transport
            .send(message)
            .await
            .map_err(|e| Error::EmailSend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encryption_selection() {
        assert_eq!(effective_encryption("default", 465), Encryption::Ssl);
        assert_eq!(effective_encryption("default", 587), Encryption::Starttls);
        assert_eq!(effective_encryption("default", 25), Encryption::Starttls);
        assert_eq!(effective_encryption("none", 465), Encryption::None);
        assert_eq!(effective_encryption("ssl", 587), Encryption::Ssl);
        assert_eq!(effective_encryption("tls", 465), Encryption::Starttls);
    }

    #[test]
    fn template_rendering() {
        let mut values = HashMap::new();
        values.insert("name", "Ada".to_string());
        values.insert("confirmUrl", "https://x/confirm?t=1".to_string());
        let html = render_template(TEMPLATE_CONFIRM_EMAIL, &values);
        assert!(html.contains("Hello Ada,"));
        assert!(html.contains("href=\"https://x/confirm?t=1\""));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn unknown_placeholders_stay_visible() {
        let html = render_template("pre {{missing}} post", &HashMap::new());
        assert_eq!(html, "pre {{missing}} post");
    }
}
