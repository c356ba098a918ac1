// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! HTTP probing: response headers of interest plus the two well-known files
//! which routinely name sibling infrastructure, `security.txt` and
//! `robots.txt`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

use crate::dissect;
use crate::probe::{DomainProber, ProbeKind, Resolution};
use crate::Result;

/// Headers whose values routinely carry foreign origins.
pub const DEFAULT_HEADERS: &[&str] = &[
    "access-control-allow-origin",
    "alt-svc",
    "content-security-policy",
    "content-security-policy-report-only",
];

/// Upper bound on how much of a well-known file body is read.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpHeader {
    pub name: String,
    pub values: Vec<String>,
}

impl fmt::Display for HttpHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.values.join(", "))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpResolution {
    query: String,
    headers: Vec<HttpHeader>,
    security_txt_domains: Vec<String>,
    robots_txt_domains: Vec<String>,
}

impl HttpResolution {
    pub fn new<S: Into<String>>(
        query: S,
        headers: Vec<HttpHeader>,
        security_txt_domains: Vec<String>,
        robots_txt_domains: Vec<String>,
    ) -> HttpResolution {
        HttpResolution {
            query: query.into(),
            headers,
            security_txt_domains,
            robots_txt_domains,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn headers(&self) -> &[HttpHeader] {
        &self.headers
    }

    pub fn security_txt_domains(&self) -> &[String] {
        &self.security_txt_domains
    }

    pub fn robots_txt_domains(&self) -> &[String] {
        &self.robots_txt_domains
    }

    /// De-duplicated union of header-derived and well-known-file-derived
    /// domains, in first-seen order.
    pub fn domains(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut domains = Vec::new();

        let header_domains = self
            .headers
            .iter()
            .flat_map(|header| dissect::domains_from_strs(&header.values));
        for domain in header_domains
            .chain(self.security_txt_domains.iter().cloned())
            .chain(self.robots_txt_domains.iter().cloned())
        {
            if seen.insert(domain.clone()) {
                domains.push(domain);
            }
        }

        domains
    }
}

pub struct HttpProber {
    headers: Vec<String>,
    client: Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<HttpProber> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(HttpProber {
            headers: DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect(),
            client,
        })
    }

    pub fn with_headers(mut self, headers: Vec<String>) -> HttpProber {
        self.headers = headers;
        self
    }

    async fn fetch_headers(&self, url: &str) -> Vec<HttpHeader> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                // Don't bother looking for CSP on unreachable sites.
                error!("Could not GET {} -> {}", url, err);
                return Vec::new();
            }
        };

        let mut headers = Vec::new();
        for name in &self.headers {
            let values: Vec<String> = response
                .headers()
                .get_all(name.as_str())
                .iter()
                .filter_map(|value| value.to_str().ok())
                .map(|value| value.to_string())
                .collect();
            if dissect::domains_from_strs(&values).is_empty() {
                continue;
            }
            headers.push(HttpHeader {
                name: name.clone(),
                values,
            });
        }
        headers
    }

    /// Reads up to [`MAX_BODY_BYTES`] of the given URL, only for status 200.
    async fn fetch_body(&self, url: &str) -> Option<String> {
        let mut response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!("Could not GET {} -> {}", url, err);
                return None;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            debug!("GET {} -> {}", url, response.status());
            return None;
        }

        let mut body: Vec<u8> = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let remaining = MAX_BODY_BYTES - body.len();
                    body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                    if body.len() >= MAX_BODY_BYTES {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!("Reading {} failed -> {}", url, err);
                    break;
                }
            }
        }

        Some(String::from_utf8_lossy(&body).to_string())
    }
}

#[async_trait]
impl DomainProber for HttpProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Http
    }

    async fn probe_domain(&self, domain: &str) -> Resolution {
        let headers = self.fetch_headers(&format!("https://{}", domain)).await;

        let security_txt = self
            .fetch_body(&format!("https://{}/.well-known/security.txt", domain))
            .await
            .map(|body| dissect::domains_from_str(&body))
            .unwrap_or_default();
        let robots_txt = self
            .fetch_body(&format!("https://{}/robots.txt", domain))
            .await
            .map(|body| dissect::domains_from_str(&body))
            .unwrap_or_default();

        Resolution::Http(HttpResolution::new(domain, headers, security_txt, robots_txt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use spectral::prelude::*;

    #[test]
    fn domains_are_a_deduplicated_union() {
        let resolution = HttpResolution::new(
            "example.com",
            vec![HttpHeader {
                name: "content-security-policy".to_string(),
                values: vec!["default-src 'self' cdn.example.net".to_string()],
            }],
            vec!["security.example.org".to_string(), "cdn.example.net".to_string()],
            vec!["cdn.example.net".to_string()],
        );

        assert_that(&resolution.domains()).is_equal_to(vec![
            "cdn.example.net".to_string(),
            "security.example.org".to_string(),
        ]);
    }
}
