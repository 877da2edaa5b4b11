//! `web_scrape` - fetch a page over HTTP(S) and reduce it to text
//!
//! URLs are checked before any request is made (SSRF prevention): only
//! http/https, no localhost, private ranges or cloud metadata hosts unless
//! `allow_private_hosts` is set. Every redirect hop goes through the same check.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::Tool;
use crate::context::RunScope;

/// Characters of page text returned
const MAX_TEXT_CHARS: usize = 20_000;

static SCRIPT_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)\s*>").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Redirect hops followed before giving up
const MAX_REDIRECTS: usize = 5;

pub struct WebScrapeTool {
    client: reqwest::Client,
    timeout: Duration,
    allow_private_hosts: bool,
}

impl WebScrapeTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_client(timeout, false),
            timeout,
            allow_private_hosts: false,
        }
    }

    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self.client = build_client(self.timeout, allow);
        self
    }
}

fn build_client(timeout: Duration, allow_private_hosts: bool) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(redirect_policy(allow_private_hosts))
        .user_agent(concat!("crewflow/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Follow at most [`MAX_REDIRECTS`] hops, re-validating each target
fn redirect_policy(allow_private_hosts: bool) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("too many redirects (max {})", MAX_REDIRECTS));
        }
        let url = attempt.url().to_string();
        let target = if allow_private_hosts {
            check_scheme(&url)
        } else {
            validate_http_url(&url)
        };
        match target {
            Ok(()) => attempt.follow(),
            Err(e) => attempt.error(format!("redirect to '{}' refused: {}", url, e)),
        }
    })
}

fn check_scheme(url: &str) -> Result<(), String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err("Invalid URL scheme: only http/https allowed".to_string())
    }
}

#[async_trait]
impl Tool for WebScrapeTool {
    fn name(&self) -> &str {
        "web_scrape"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its title and visible text"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "minLength": 1 }
            },
            "required": ["url"]
        })
    }

    async fn invoke(&self, params: Value, _scope: &RunScope) -> Result<Value> {
        let url = params["url"]
            .as_str()
            .context("web_scrape requires a 'url' string")?;

        if self.allow_private_hosts {
            check_scheme(url).map_err(anyhow::Error::msg)?;
        } else {
            validate_http_url(url).map_err(anyhow::Error::msg)?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request to '{}' failed: {}", url, error_chain(&e)))?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} from '{}'", status, url);
        }

        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        let (title, text) = html_to_text(&body);
        let truncated = text.chars().count() > MAX_TEXT_CHARS;
        let text: String = text.chars().take(MAX_TEXT_CHARS).collect();

        Ok(json!({
            "url": url,
            "status": status.as_u16(),
            "title": title,
            "text": text,
            "truncated": truncated,
        }))
    }
}

/// Error text including sources, so a refused redirect says why
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Extract the page title and whitespace-collapsed visible text
fn html_to_text(html: &str) -> (Option<String>, String) {
    let title = TITLE
        .captures(html)
        .map(|c| decode_entities(WHITESPACE.replace_all(c[1].trim(), " ").as_ref()));

    let without_scripts = SCRIPT_STYLE.replace_all(html, " ");
    let without_tags = TAG.replace_all(&without_scripts, " ");
    let text = WHITESPACE.replace_all(&without_tags, " ");
    (title, decode_entities(text.trim()))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Validate an HTTP URL for security (SSRF prevention)
///
/// Blocks:
/// - Non-HTTP(S) schemes
/// - Localhost and loopback addresses
/// - Private and link-local IPv4/IPv6 ranges
/// - Cloud metadata and cluster-internal hostnames
/// - Encoded hostnames (hex or percent-encoded)
pub(crate) fn validate_http_url(url: &str) -> Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("Invalid URL: {}", e))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(format!(
                "Invalid URL scheme '{}': only http/https allowed",
                scheme
            ))
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| "URL has no host".to_string())?;

    if host.contains('%') || host.contains("0x") || host.contains("0X") {
        return Err("SSRF blocked: URL encoding in hostname not allowed".to_string());
    }

    if host == "localhost" || host.ends_with(".localhost") || host.ends_with(".localdomain") {
        return Err("SSRF blocked: localhost not allowed".to_string());
    }

    match parsed.host() {
        Some(url::Host::Ipv4(ip)) if is_private_ip(&IpAddr::V4(ip)) => {
            return Err(format!("SSRF blocked: private IP {} not allowed", ip));
        }
        Some(url::Host::Ipv6(ip)) if is_private_ip(&IpAddr::V6(ip)) => {
            return Err(format!("SSRF blocked: private IPv6 {} not allowed", ip));
        }
        _ => {}
    }

    if host.ends_with(".internal")
        || host.ends_with(".metadata")
        || host == "metadata.goog"
        || host.ends_with(".svc.cluster.local")
        || host.ends_with(".pod.cluster.local")
    {
        return Err("SSRF blocked: internal endpoint not allowed".to_string());
    }

    Ok(())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_private_ipv4(ipv4),
        IpAddr::V6(ipv6) => {
            let octets = ipv6.octets();
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                // fc00::/7 unique local
                || (octets[0] & 0xfe) == 0xfc
                // fe80::/10 link-local
                || (octets[0] == 0xfe && (octets[1] & 0xc0) == 0x80)
                // ::ffff:a.b.c.d
                || ipv6.to_ipv4_mapped().is_some_and(|v4| is_private_ipv4(&v4))
        }
    }
}

fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}
