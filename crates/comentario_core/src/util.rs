/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Small shared helpers: time, random material, IP masking, HMAC signing and
//! the User-Agent fact extraction used for session and view fingerprints.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Lowercase hex of `n` random bytes.
pub fn random_hex(n: usize) -> String {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Sign a message with HMAC-SHA256.
pub fn hmac_sign(msg: &[u8], key: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time verification of an HMAC-SHA256 signature.
pub fn hmac_verify(msg: &[u8], sig: &[u8], key: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(msg);
    mac.verify_slice(sig).is_ok()
}

/// Mask an IP for storage: keep the first two octets (IPv4) or hextets (IPv6)
/// and replace the rest with `x`, preserving the component count. Unparseable
/// input is masked entirely.
pub fn mask_ip(ip: &str) -> String {
    let ip = ip.trim();
    if ip.is_empty() {
        return String::new();
    }
    if ip.contains('.') && !ip.contains(':') {
        return mask_components(ip, '.');
    }
    if ip.contains(':') {
        return mask_components(ip, ':');
    }
    "x".to_string()
}

fn mask_components(ip: &str, sep: char) -> String {
    ip.split(sep)
        .enumerate()
        .map(|(i, part)| if i < 2 { part } else { "x" })
        .collect::<Vec<_>>()
        .join(&sep.to_string())
}

/// IP as stored, honouring the full-IP logging switch.
pub fn storable_ip(ip: &str, log_full_ips: bool) -> String {
    if log_full_ips {
        ip.to_string()
    } else {
        mask_ip(ip)
    }
}

/// Browser, OS and device family extracted from a User-Agent string. A coarse
/// classifier is all the analytics rows need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentFacts {
    pub browser: String,
    pub os: String,
    pub device: String,
}

pub fn agent_facts(ua: &str) -> AgentFacts {
    let l = ua.to_ascii_lowercase();
    let browser = if l.contains("edg/") {
        "Edge"
    } else if l.contains("opr/") || l.contains("opera") {
        "Opera"
    } else if l.contains("chrome/") {
        "Chrome"
    } else if l.contains("safari/") && l.contains("version/") {
        "Safari"
    } else if l.contains("firefox/") {
        "Firefox"
    } else if l.contains("bot") || l.contains("spider") || l.contains("crawl") {
        "Bot"
    } else {
        "Unknown"
    };
    let os = if l.contains("windows") {
        "Windows"
    } else if l.contains("android") {
        "Android"
    } else if l.contains("iphone") || l.contains("ipad") || l.contains("ios") {
        "iOS"
    } else if l.contains("mac os") || l.contains("macos") {
        "macOS"
    } else if l.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    };
    let device = if l.contains("mobile") || l.contains("iphone") || l.contains("android") {
        "Mobile"
    } else if l.contains("ipad") || l.contains("tablet") {
        "Tablet"
    } else if browser == "Bot" {
        "Other"
    } else {
        "Desktop"
    };
    AgentFacts {
        browser: browser.to_string(),
        os: os.to_string(),
        device: device.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_ipv4_after_second_octet() {
        assert_eq!(mask_ip("203.0.113.7"), "203.0.x.x");
        assert_eq!(mask_ip("10.1.2.3"), "10.1.x.x");
    }

    #[test]
    fn masks_ipv6_after_second_hextet() {
        assert_eq!(mask_ip("2001:db8:85a3:0:0:8a2e:370:7334"), "2001:db8:x:x:x:x:x:x");
        assert_eq!(mask_ip("fe80::1"), "fe80::x");
    }

    #[test]
    fn masked_ip_keeps_at_most_two_components() {
        for ip in ["1.2.3.4", "255.255.255.255", "2001:db8::ff00:42:8329"] {
            let masked = mask_ip(ip);
            let sep = if ip.contains(':') { ':' } else { '.' };
            let kept = masked
                .split(sep)
                .zip(ip.split(sep))
                .filter(|(m, o)| m == o && *m != "x")
                .count();
            assert!(kept <= 2, "{ip} -> {masked}");
        }
    }

    #[test]
    fn full_ip_switch_bypasses_masking() {
        assert_eq!(storable_ip("1.2.3.4", true), "1.2.3.4");
        assert_eq!(storable_ip("1.2.3.4", false), "1.2.x.x");
    }

    #[test]
    fn hmac_round_trip_and_key_mismatch() {
        let sig = hmac_sign(b"payload", b"k1");
        assert!(hmac_verify(b"payload", &sig, b"k1"));
        assert!(!hmac_verify(b"payload", &sig, b"k2"));
        assert!(!hmac_verify(b"tampered", &sig, b"k1"));
    }

    #[test]
    fn agent_facts_classify_common_strings() {
        let f = agent_facts(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
        );
        assert_eq!(f.browser, "Chrome");
        assert_eq!(f.os, "Windows");
        assert_eq!(f.device, "Desktop");

        let f = agent_facts("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Version/17.0 Mobile/15E148 Safari/604.1");
        assert_eq!(f.browser, "Safari");
        assert_eq!(f.os, "iOS");
        assert_eq!(f.device, "Mobile");
    }

    #[test]
    fn random_hex_is_lowercase_and_sized() {
        let h = random_hex(32);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
