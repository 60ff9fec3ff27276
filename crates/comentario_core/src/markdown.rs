/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Markdown-to-HTML with a fixed sanitising policy: no scripts, no images,
//! bare URLs autolinked, and every link forced to
//! `rel="nofollow noopener" target="_blank"`.

use pulldown_cmark::{html, Options, Parser};

pub fn markdown_to_html(markdown: &str) -> String {
    let autolinked = autolink(markdown);
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_STRIKETHROUGH);
    opts.insert(Options::ENABLE_TABLES);
    let parser = Parser::new_ext(&autolinked, opts);
    let mut raw = String::new();
    html::push_html(&mut raw, parser);
    sanitize(&raw)
}

fn sanitize(raw: &str) -> String {
    ammonia::Builder::default()
        .rm_tags(["img"])
        .link_rel(Some("nofollow noopener"))
        .set_tag_attribute_value("a", "target", "_blank")
        .clean(raw)
        .to_string()
}

/// Wraps bare `http(s)://` URLs in angle brackets so the parser turns them
/// into links. URLs already part of markdown link syntax are left alone.
fn autolink(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut rest = markdown;
    while let Some(pos) = rest.find("http") {
        let (before, at) = rest.split_at(pos);
        out.push_str(before);
        let is_url = at.starts_with("http://") || at.starts_with("https://");
        let prev = before.chars().last();
        let bare = is_url
            && prev.map_or(true, |c| c.is_whitespace())
            && !before.ends_with("](")
            && !before.ends_with('<');
        if bare {
            let end = at
                .find(|c: char| c.is_whitespace())
                .unwrap_or(at.len());
            let (url, tail) = at.split_at(end);
            let trimmed = url.trim_end_matches(['.', ',', ';', ')', ']']);
            let punct = &url[trimmed.len()..];
            out.push('<');
            out.push_str(trimmed);
            out.push('>');
            out.push_str(punct);
            rest = tail;
        } else {
            out.push_str(&at[..4]);
            rest = &at[4..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_basic_markdown() {
        let html = markdown_to_html("**bold** and _em_");
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("<em>em</em>"));
    }

    #[test]
    fn strikethrough_enabled() {
        assert!(markdown_to_html("~~gone~~").contains("<del>gone</del>"));
    }

    #[test]
    fn scripts_are_stripped() {
        let html = markdown_to_html("hi <script>alert('xss')</script> there");
        assert!(!html.contains("<script"));
        assert!(!html.contains("alert('xss')"));
    }

    #[test]
    fn images_are_removed() {
        let html = markdown_to_html("![alt](https://evil.example/x.png)");
        assert!(!html.contains("<img"));
    }

    #[test]
    fn links_get_rel_and_target() {
        let html = markdown_to_html("[site](https://example.org)");
        assert!(html.contains("rel=\"nofollow noopener\""));
        assert!(html.contains("target=\"_blank\""));
        assert!(html.contains("href=\"https://example.org\""));
    }

    #[test]
    fn bare_urls_are_autolinked() {
        let html = markdown_to_html("see https://example.org/page.");
        assert!(html.contains("href=\"https://example.org/page\""));
        // Existing link syntax is untouched.
        let html = markdown_to_html("[x](https://example.org)");
        assert_eq!(html.matches("href=").count(), 1);
    }

    #[test]
    fn event_handlers_are_stripped() {
        let html = markdown_to_html("<a href=\"https://x.y\" onclick=\"evil()\">x</a>");
        assert!(!html.contains("onclick"));
    }

    #[test]
    fn sanitisation_is_idempotent() {
        let once = markdown_to_html("~~a~~ **b** [c](https://example.org) <script>x</script>");
        assert_eq!(sanitize(&once), once);
    }
}
