// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Authoritative DNS probing.
//!
//! For every popped domain the prober first discovers an authoritative name
//! server (NS query at the local resolver, walking up to parent domains for
//! subdomains, falling back to the local resolver), then fans out one query
//! per configured record type against that server.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lazy_static::lazy_static;
use lru_time_cache::LruCache;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, error};

use crate::dissect;
use crate::probe::{DomainProber, ProbeKind, Resolution};

pub use exchange::{DnsExchange, QueryError, QueryResult, QueryTarget, TrustDnsExchange};
pub use records::{RData, Record, RecordType, CAA, DEFAULT_QUERY_TYPES, MX, NSEC, RRSIG, SOA, SRV};

pub mod exchange;
pub mod records;

const NS_CACHE_SIZE: usize = 4096;

lazy_static! {
    static ref DMARC_POLICY: Regex = Regex::new(r"\bp=([^;\s]+)").unwrap();
    static ref DMARC_RUA: Regex = Regex::new(r"\brua=([^;\s]+)").unwrap();
    static ref DMARC_RUF: Regex = Regex::new(r"\bruf=([^;\s]+)").unwrap();
}

/// DMARC disposition of a domain, read from the TXT record at `_dmarc.<domain>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dmarc {
    pub policy: Option<String>,
    pub rua: Option<String>,
    pub ruf: Option<String>,
}

impl std::fmt::Display for Dmarc {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "policy: {}, rua: {}, ruf: {}",
            self.policy.as_deref().unwrap_or("-"),
            self.rua.as_deref().unwrap_or("-"),
            self.ruf.as_deref().unwrap_or("-")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecordPair {
    pub query_type: RecordType,
    pub record: Record,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsResolution {
    query: String,
    name_server: String,
    records: Vec<DnsRecordPair>,
    dnssec_signed: bool,
    dmarc: Option<Dmarc>,
}

impl DnsResolution {
    pub fn new<S: Into<String>, T: Into<String>>(query: S, name_server: T) -> DnsResolution {
        DnsResolution {
            query: query.into(),
            name_server: name_server.into(),
            records: Vec::new(),
            dnssec_signed: false,
            dmarc: None,
        }
    }

    pub fn add_record(&mut self, query_type: RecordType, record: Record) {
        self.records.push(DnsRecordPair { query_type, record });
    }

    pub fn set_dnssec_signed(&mut self, signed: bool) {
        self.dnssec_signed = signed;
    }

    pub fn set_dmarc(&mut self, dmarc: Option<Dmarc>) {
        self.dmarc = dmarc;
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn name_server(&self) -> &str {
        &self.name_server
    }

    pub fn records(&self) -> &[DnsRecordPair] {
        &self.records
    }

    pub fn dnssec_signed(&self) -> bool {
        self.dnssec_signed
    }

    pub fn dmarc(&self) -> Option<&Dmarc> {
        self.dmarc.as_ref()
    }

    pub fn domains(&self) -> Vec<String> {
        self.records
            .iter()
            .flat_map(|pair| pair.record.referenced_domains())
            .collect()
    }

    pub fn ips(&self) -> Vec<String> {
        self.records
            .iter()
            .flat_map(|pair| pair.record.referenced_ips())
            .collect()
    }
}

pub struct DnsProber {
    query_types: Vec<RecordType>,
    name_server: Option<String>,
    exchange: Arc<dyn DnsExchange>,
    ns_cache: Mutex<LruCache<String, QueryTarget>>,
}

impl DnsProber {
    pub fn new(exchange: Arc<dyn DnsExchange>) -> DnsProber {
        DnsProber {
            query_types: DEFAULT_QUERY_TYPES.to_vec(),
            name_server: None,
            exchange,
            ns_cache: Mutex::new(LruCache::with_capacity(NS_CACHE_SIZE)),
        }
    }

    /// Uses the given name server for all queries instead of discovering one.
    pub fn with_name_server<T: Into<Option<String>>>(mut self, name_server: T) -> DnsProber {
        self.name_server = name_server.into();
        self
    }

    pub fn with_query_types(mut self, query_types: Vec<RecordType>) -> DnsProber {
        self.query_types = query_types;
        self
    }

    /// Discovers the name server to use for `domain`.
    ///
    /// NS query at the local resolver; a subdomain without its own NS records
    /// is retried with its parent; anything else falls back to the local
    /// resolver. The decision is cached for every domain on the walked chain.
    async fn find_name_server_for(&self, domain: &str) -> QueryTarget {
        if let Some(ns) = &self.name_server {
            return QueryTarget::Server(ns.clone());
        }

        let mut chain: Vec<String> = Vec::new();
        let mut current = domain.to_string();
        let target = loop {
            if let Some(target) = self.ns_cache.lock().unwrap().get(&current) {
                break target.clone();
            }

            match self.name_server_of(&current).await {
                Some(server) => break QueryTarget::Server(server),
                None if dissect::is_subdomain(&current) => {
                    debug!("No NS found for subdomain {} -> trying parent domain", current);
                    chain.push(current.clone());
                    match dissect::parent_domain_of(&current) {
                        Some(parent) => current = parent,
                        None => break QueryTarget::Local,
                    }
                }
                None => {
                    error!("Could not resolve NS for domain {} -> falling back to local", current);
                    break QueryTarget::Local;
                }
            }
        };

        chain.push(current);
        let mut cache = self.ns_cache.lock().unwrap();
        for walked in chain {
            cache.insert(walked, target.clone());
        }
        target
    }

    async fn name_server_of(&self, domain: &str) -> Option<String> {
        match self.exchange.query(domain, RecordType::NS, &QueryTarget::Local).await {
            Ok(records) => records.iter().find_map(|record| match record.rdata() {
                RData::NS(name) if !name.is_empty() => Some(name.clone()),
                _ => None,
            }),
            Err(QueryError::NxDomain) => None,
            Err(err) => {
                error!("NS {} -> {}", domain, err);
                None
            }
        }
    }

    async fn query_dmarc(&self, domain: &str, target: &QueryTarget) -> Option<Dmarc> {
        let name = format!("_dmarc.{}", domain);
        let records = match self.exchange.query(&name, RecordType::TXT, target).await {
            Ok(records) => records,
            Err(QueryError::NxDomain) => return None,
            Err(err) => {
                debug!("TXT {} -> {}", name, err);
                return None;
            }
        };

        records
            .iter()
            .filter_map(|record| match record.rdata() {
                RData::TXT(fragments) => Some(fragments.join("")),
                _ => None,
            })
            .find(|txt| txt.to_lowercase().starts_with("v=dmarc1"))
            .map(|txt| parse_dmarc(&txt))
    }
}

#[async_trait]
impl DomainProber for DnsProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Dns
    }

    async fn probe_domain(&self, domain: &str) -> Resolution {
        let target = self.find_name_server_for(domain).await;
        debug!("Using NS {} for domain {}", target, domain);

        let mut resolution = DnsResolution::new(domain, target.to_string());

        // One query per record type, all in flight at once.
        let handles: Vec<_> = self
            .query_types
            .iter()
            .map(|query_type| {
                let exchange = self.exchange.clone();
                let domain = domain.to_string();
                let target = target.clone();
                let query_type = *query_type;
                tokio::spawn(async move { (query_type, exchange.query(&domain, query_type, &target).await) })
            })
            .collect();

        for handle in futures::future::join_all(handles).await {
            let (query_type, result) = match handle {
                Ok(outcome) => outcome,
                Err(_) => continue,
            };
            match result {
                Ok(records) => {
                    for record in records {
                        resolution.add_record(query_type, record);
                    }
                }
                Err(QueryError::NxDomain) => debug!("{} {} -> no records", query_type, domain),
                Err(err) => error!("{} {} -> {}", query_type, domain, err),
            }
        }

        let signed = resolution
            .records()
            .iter()
            .any(|pair| pair.record.rr_type() == RecordType::DNSKEY);
        resolution.set_dnssec_signed(signed);

        let dmarc = self.query_dmarc(domain, &target).await;
        resolution.set_dmarc(dmarc);

        Resolution::Dns(resolution)
    }
}

fn parse_dmarc(txt: &str) -> Dmarc {
    let capture = |re: &Regex| re.captures(txt).map(|c| c[1].to_string());
    Dmarc {
        policy: capture(&DMARC_POLICY),
        rua: capture(&DMARC_RUA),
        ruf: capture(&DMARC_RUF),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use spectral::prelude::*;

    #[test]
    fn parses_a_full_dmarc_record() {
        let dmarc = parse_dmarc("v=DMARC1; p=reject; rua=mailto:dmarc@example.com; ruf=mailto:forensic@example.com");

        assert_that(&dmarc.policy).is_equal_to(Some("reject".to_string()));
        assert_that(&dmarc.rua).is_equal_to(Some("mailto:dmarc@example.com".to_string()));
        assert_that(&dmarc.ruf).is_equal_to(Some("mailto:forensic@example.com".to_string()));
    }

    #[test]
    fn parses_a_policy_only_dmarc_record() {
        let dmarc = parse_dmarc("v=DMARC1; p=none");

        assert_that(&dmarc.policy).is_equal_to(Some("none".to_string()));
        assert_that(&dmarc.rua).is_equal_to(None);
        assert_that(&dmarc.ruf).is_equal_to(None);
    }

    use super::exchange::testing::ScriptedExchange;

    fn ns_answer(domain: &str, ns: &str) -> Vec<Record> {
        vec![Record::new(domain, RecordType::NS, 3600, RData::NS(ns.to_string()))]
    }

    #[tokio::test]
    async fn fans_out_against_the_discovered_name_server() {
        let exchange = Arc::new(
            ScriptedExchange::new()
                .answer("example.com", RecordType::NS, QueryTarget::Local, ns_answer("example.com", "ns1.example.com"))
                .answer(
                    "example.com",
                    RecordType::A,
                    QueryTarget::Server("ns1.example.com".to_string()),
                    vec![Record::new("example.com", RecordType::A, 300, RData::A("93.184.216.34".parse().unwrap()))],
                ),
        );
        let prober = DnsProber::new(exchange.clone()).with_query_types(vec![RecordType::A]);

        let resolution = match prober.probe_domain("example.com").await {
            Resolution::Dns(resolution) => resolution,
            _ => unreachable!(),
        };

        assert_that(&resolution.name_server()).is_equal_to("ns1.example.com:53");
        assert_that(&resolution.records().len()).is_equal_to(1);
        assert_that(&resolution.ips()).is_equal_to(vec!["93.184.216.34".to_string()]);
    }

    #[tokio::test]
    async fn subdomains_without_ns_records_walk_up_to_their_parent() {
        let exchange = Arc::new(ScriptedExchange::new().answer(
            "example.com",
            RecordType::NS,
            QueryTarget::Local,
            ns_answer("example.com", "ns1.example.com"),
        ));
        let prober = DnsProber::new(exchange.clone()).with_query_types(vec![RecordType::A]);

        let resolution = match prober.probe_domain("deep.sub.example.com").await {
            Resolution::Dns(resolution) => resolution,
            _ => unreachable!(),
        };

        assert_that(&resolution.name_server()).is_equal_to("ns1.example.com:53");

        // The whole chain is cached; a second probe issues no NS query.
        let ns_queries_before = count_ns_queries(&exchange);
        prober.probe_domain("deep.sub.example.com").await;
        assert_that(&count_ns_queries(&exchange)).is_equal_to(ns_queries_before);
    }

    #[tokio::test]
    async fn domains_without_any_name_server_fall_back_to_the_local_resolver() {
        let exchange = Arc::new(ScriptedExchange::new());
        let prober = DnsProber::new(exchange.clone()).with_query_types(vec![RecordType::A]);

        let resolution = match prober.probe_domain("example.com").await {
            Resolution::Dns(resolution) => resolution,
            _ => unreachable!(),
        };

        assert_that(&resolution.name_server()).is_equal_to("local resolver");
    }

    #[tokio::test]
    async fn a_dnskey_answer_marks_the_domain_dnssec_signed() {
        let exchange = Arc::new(
            ScriptedExchange::new()
                .answer("example.com", RecordType::NS, QueryTarget::Local, ns_answer("example.com", "ns1.example.com"))
                .answer(
                    "example.com",
                    RecordType::DNSKEY,
                    QueryTarget::Server("ns1.example.com".to_string()),
                    vec![Record::new("example.com", RecordType::DNSKEY, 300, RData::DNSKEY)],
                ),
        );
        let prober = DnsProber::new(exchange).with_query_types(vec![RecordType::A, RecordType::DNSKEY]);

        let resolution = match prober.probe_domain("example.com").await {
            Resolution::Dns(resolution) => resolution,
            _ => unreachable!(),
        };

        assert_that(&resolution.dnssec_signed()).is_true();
    }

    #[tokio::test]
    async fn the_dmarc_record_is_read_from_the_dmarc_subdomain() {
        let exchange = Arc::new(
            ScriptedExchange::new()
                .answer("example.com", RecordType::NS, QueryTarget::Local, ns_answer("example.com", "ns1.example.com"))
                .answer(
                    "_dmarc.example.com",
                    RecordType::TXT,
                    QueryTarget::Server("ns1.example.com".to_string()),
                    vec![Record::new(
                        "_dmarc.example.com",
                        RecordType::TXT,
                        300,
                        RData::TXT(vec!["v=DMARC1; p=quarantine; rua=mailto:dmarc@example.com".to_string()]),
                    )],
                ),
        );
        let prober = DnsProber::new(exchange).with_query_types(vec![RecordType::A]);

        let resolution = match prober.probe_domain("example.com").await {
            Resolution::Dns(resolution) => resolution,
            _ => unreachable!(),
        };

        let dmarc = resolution.dmarc().unwrap();
        assert_that(&dmarc.policy).is_equal_to(Some("quarantine".to_string()));
        assert_that(&dmarc.rua).is_equal_to(Some("mailto:dmarc@example.com".to_string()));
    }

    #[tokio::test]
    async fn a_user_supplied_name_server_skips_discovery() {
        let exchange = Arc::new(ScriptedExchange::new());
        let prober = DnsProber::new(exchange.clone())
            .with_name_server("ns.custom.net".to_string())
            .with_query_types(vec![RecordType::A]);

        let resolution = match prober.probe_domain("example.com").await {
            Resolution::Dns(resolution) => resolution,
            _ => unreachable!(),
        };

        assert_that(&resolution.name_server()).is_equal_to("ns.custom.net:53");
        assert_that(&count_ns_queries(&exchange)).is_equal_to(0);
    }

    fn count_ns_queries(exchange: &ScriptedExchange) -> usize {
        exchange
            .calls()
            .iter()
            .filter(|(_, record_type, target)| *record_type == RecordType::NS && *target == QueryTarget::Local)
            .count()
    }

    #[test]
    fn resolution_collects_domains_and_ips_from_records() {
        let mut resolution = DnsResolution::new("example.com", "local resolver");
        resolution.add_record(
            RecordType::A,
            Record::new("example.com", RecordType::A, 300, RData::A("93.184.216.34".parse().unwrap())),
        );
        resolution.add_record(
            RecordType::MX,
            Record::new(
                "example.com",
                RecordType::MX,
                300,
                RData::MX(MX {
                    preference: 10,
                    exchange: "mail.example.net".to_string(),
                }),
            ),
        );

        assert_that(&resolution.domains()).is_equal_to(vec!["mail.example.net".to_string()]);
        assert_that(&resolution.ips()).is_equal_to(vec!["93.184.216.34".to_string()]);
    }
}
