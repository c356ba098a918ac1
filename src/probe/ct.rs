// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Certificate Transparency probing against a crt.sh style aggregator.
//!
//! Logs are aggregated per distinct `name_value`, keeping the first and last
//! time the name was seen inside the configured window. The cache is keyed by
//! domain and consulted for every ancestor as well: a CT query for
//! `sub.example.com` after `example.com` would only repeat the same logs, so
//! an ancestor hit deliberately yields an empty resolution.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::dissect;
use crate::probe::{DomainProber, ProbeKind, Resolution};
use crate::Result;

pub const DEFAULT_CT_API_URL: &str = "https://crt.sh";

/// Log classes excluded from aggregator queries by default.
pub const DEFAULT_CT_EXCLUDE: &str = "expired";

/// One crt.sh log entry. The JSON field names come from the crt.sh API schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtLog {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub issuer_name: String,
    #[serde(default)]
    pub name_value: String,
    #[serde(default, rename = "entry_timestamp")]
    pub logged_at: String,
    #[serde(default)]
    pub not_before: String,
    #[serde(default)]
    pub not_after: String,
}

/// A log aggregated over all entries with the same `name_value`, keeping the
/// most recent entry and the observation window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedCtLog {
    #[serde(flatten)]
    pub log: CtLog,
    pub first_seen: String,
    pub last_seen: String,
}

impl fmt::Display for AggregatedCtLog {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "name: {}, first_seen: {}, last_seen: {}, not_before: {}, not_after: {}, issuer: {}",
            self.log.name_value, self.first_seen, self.last_seen, self.log.not_before, self.log.not_after, self.log.issuer_name
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CtResolution {
    query: String,
    logs: Vec<AggregatedCtLog>,
}

impl CtResolution {
    pub fn new<S: Into<String>>(query: S, logs: Vec<AggregatedCtLog>) -> CtResolution {
        CtResolution {
            query: query.into(),
            logs,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn logs(&self) -> &[AggregatedCtLog] {
        &self.logs
    }

    /// De-duplicated domains lifted from every `name_value`.
    pub fn domains(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut domains = Vec::new();
        for log in &self.logs {
            for domain in dissect::domains_from_str(&log.log.name_value) {
                if seen.insert(domain.clone()) {
                    domains.push(domain);
                }
            }
        }
        domains
    }
}

pub struct CtProber {
    client: Client,
    api_url: String,
    since: String,
    exclude: String,
    cached: Mutex<HashSet<String>>,
}

impl CtProber {
    /// `since` defaults to one year ago; `exclude` defaults to `expired`.
    pub fn new(timeout: Duration, since: Option<String>, exclude: Option<String>) -> Result<CtProber> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        let since = since.unwrap_or_else(|| {
            (Utc::now() - ChronoDuration::days(365)).format("%Y-%m-%d").to_string()
        });

        Ok(CtProber {
            client,
            api_url: DEFAULT_CT_API_URL.to_string(),
            since,
            exclude: exclude.unwrap_or_else(|| DEFAULT_CT_EXCLUDE.to_string()),
            cached: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_api_url<S: Into<String>>(mut self, api_url: S) -> CtProber {
        self.api_url = api_url.into();
        self
    }

    /// True when this domain or any ancestor up to the second-order domain
    /// has been queried before.
    fn is_cached(&self, domain: &str) -> bool {
        let cached = self.cached.lock().unwrap();
        if cached.contains(domain) {
            return true;
        }
        let mut ancestor = dissect::parent_domain_of(domain);
        while let Some(current) = ancestor {
            if cached.contains(&current) {
                return true;
            }
            ancestor = dissect::parent_domain_of(&current);
        }
        false
    }

    async fn fetch_logs(&self, domain: &str) -> Vec<AggregatedCtLog> {
        let url = format!(
            "{}/?match=LIKE&exclude={}&CN={}&output=json",
            self.api_url, self.exclude, domain
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                error!("CT {} -> {}", domain, err);
                return Vec::new();
            }
        };

        let raw_logs: Vec<CtLog> = match response.json().await {
            Ok(logs) => logs,
            Err(err) => {
                error!("CT {} -> {}", domain, err);
                return Vec::new();
            }
        };

        aggregate_logs(raw_logs, &self.since)
    }
}

#[async_trait]
impl DomainProber for CtProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Ct
    }

    async fn probe_domain(&self, domain: &str) -> Resolution {
        if self.is_cached(domain) {
            // Repeating the ancestor's logs would burn the output without
            // adding value.
            debug!("CT {} already covered by an earlier query", domain);
            return Resolution::Ct(CtResolution::new(domain, Vec::new()));
        }

        let logs = self.fetch_logs(domain).await;
        self.cached.lock().unwrap().insert(domain.to_string());

        Resolution::Ct(CtResolution::new(domain, logs))
    }
}

/// Aggregates raw logs by `name_value`, dropping entries logged before
/// `since`. ISO dates compare correctly as strings.
pub fn aggregate_logs(raw_logs: Vec<CtLog>, since: &str) -> Vec<AggregatedCtLog> {
    let mut aggregated: BTreeMap<String, AggregatedCtLog> = BTreeMap::new();

    for log in raw_logs {
        if log.logged_at.as_str() < since {
            continue;
        }

        match aggregated.get_mut(&log.name_value) {
            None => {
                aggregated.insert(
                    log.name_value.clone(),
                    AggregatedCtLog {
                        first_seen: log.logged_at.clone(),
                        last_seen: log.logged_at.clone(),
                        log,
                    },
                );
            }
            Some(entry) => {
                if entry.first_seen > log.logged_at {
                    entry.first_seen = log.logged_at.clone();
                }
                if entry.last_seen < log.logged_at {
                    entry.last_seen = log.logged_at.clone();
                    entry.log = log;
                }
            }
        }
    }

    aggregated.into_iter().map(|(_, log)| log).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use spectral::prelude::*;

    fn log(name_value: &str, logged_at: &str) -> CtLog {
        CtLog {
            id: 1,
            issuer_name: "C=US, O=Example CA".to_string(),
            name_value: name_value.to_string(),
            logged_at: logged_at.to_string(),
            not_before: "2025-01-01".to_string(),
            not_after: "2026-01-01".to_string(),
        }
    }

    #[test]
    fn logs_with_the_same_name_are_merged() {
        let raw = vec![log("example.com", "2025-01-15"), log("example.com", "2025-02-01")];

        let aggregated = aggregate_logs(raw, "2000-01-01");

        assert_that(&aggregated).has_length(1);
        assert_that(&aggregated[0].first_seen).is_equal_to("2025-01-15".to_string());
        assert_that(&aggregated[0].last_seen).is_equal_to("2025-02-01".to_string());
        assert_that(&aggregated[0].log.logged_at).is_equal_to("2025-02-01".to_string());
    }

    #[test]
    fn merge_order_does_not_matter() {
        let raw = vec![log("example.com", "2025-02-01"), log("example.com", "2025-01-15")];

        let aggregated = aggregate_logs(raw, "2000-01-01");

        assert_that(&aggregated).has_length(1);
        assert_that(&aggregated[0].first_seen).is_equal_to("2025-01-15".to_string());
        assert_that(&aggregated[0].last_seen).is_equal_to("2025-02-01".to_string());
        assert_that(&(aggregated[0].first_seen <= aggregated[0].last_seen)).is_true();
    }

    #[test]
    fn logs_before_the_window_are_dropped() {
        let raw = vec![log("example.com", "2019-06-01"), log("example.com", "2025-02-01")];

        let aggregated = aggregate_logs(raw, "2020-01-01");

        assert_that(&aggregated).has_length(1);
        assert_that(&aggregated[0].first_seen).is_equal_to("2025-02-01".to_string());
    }

    #[test]
    fn distinct_names_stay_distinct() {
        let raw = vec![log("example.com", "2025-01-15"), log("www.example.com", "2025-01-16")];

        let aggregated = aggregate_logs(raw, "2000-01-01");

        assert_that(&aggregated).has_length(2);
    }

    #[tokio::test]
    async fn ancestor_queries_silence_descendants() {
        let prober = CtProber::new(std::time::Duration::from_secs(1), Some("2000-01-01".to_string()), None).unwrap();
        prober.cached.lock().unwrap().insert("example.com".to_string());

        assert_that(&prober.is_cached("example.com")).is_true();
        assert_that(&prober.is_cached("deep.sub.example.com")).is_true();
        assert_that(&prober.is_cached("other.org")).is_false();

        // A cached domain never reaches the aggregator and yields an empty
        // resolution.
        let resolution = match prober.probe_domain("sub.example.com").await {
            Resolution::Ct(resolution) => resolution,
            _ => unreachable!(),
        };
        assert_that(&resolution.logs().is_empty()).is_true();
    }

    #[test]
    fn resolution_domains_are_deduplicated() {
        let aggregated = aggregate_logs(
            vec![log("example.com\nwww.example.com", "2025-01-15"), log("example.com", "2025-01-16")],
            "2000-01-01",
        );
        let resolution = CtResolution::new("example.com", aggregated);

        assert_that(&resolution.domains()).is_equal_to(vec!["example.com".to_string()]);
    }
}
