// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! BGP origin lookups via the DNS interface of Team Cymru's IP-to-ASN
//! mapping service: a TXT query per IP yields the originating ASN, a second
//! TXT query per ASN yields the AS description.

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lazy_static::lazy_static;
use lru_time_cache::LruCache;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, error};

use crate::dissect;
use crate::probe::dns::{DnsExchange, QueryError, QueryTarget, RData, RecordType};
use crate::probe::{IpProber, ProbeKind, Resolution};

const CACHE_SIZE: usize = 4096;

lazy_static! {
    // For parsing ASN records, e.g. "13335 | 104.28.16.0/20 | US | arin | 2014-03-28"
    static ref ASN_RECORD_PATTERN: Regex = Regex::new(r"([0-9]+) \| (.+) \| ([A-Z]+) \| (.+) \| (.+)").unwrap();
    // For parsing AS records, e.g. "13335 | US | arin | 2010-07-14 | CLOUDFLARENET, US"
    static ref AS_RECORD_PATTERN: Regex = Regex::new(r"([0-9]+) \| ([A-Z]+) \| (.+) \| (.+) \| (.+)").unwrap();
}

/// Information about an Autonomous System.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsRecord {
    pub asn: u32,
    pub name: String,
    pub bgp_prefix: String,
    pub registry: String,
    pub allocated: String,
}

impl fmt::Display for AsRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ASN: {}, AS: {}, prefix: {}, registry: {}, allocated: {}",
            self.asn, self.name, self.bgp_prefix, self.registry, self.allocated
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BgpResolution {
    query: String,
    records: Vec<AsRecord>,
}

impl BgpResolution {
    pub fn new<S: Into<String>>(query: S, records: Vec<AsRecord>) -> BgpResolution {
        BgpResolution {
            query: query.into(),
            records,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn records(&self) -> &[AsRecord] {
        &self.records
    }
}

pub struct BgpProber {
    exchange: Arc<dyn DnsExchange>,
    cache: Mutex<LruCache<String, Vec<AsRecord>>>,
}

impl BgpProber {
    pub fn new(exchange: Arc<dyn DnsExchange>) -> BgpProber {
        BgpProber {
            exchange,
            cache: Mutex::new(LruCache::with_capacity(CACHE_SIZE)),
        }
    }

    async fn lookup_asn(&self, ip: &str) -> Vec<String> {
        let addr: IpAddr = match ip.parse() {
            Ok(addr) => addr,
            Err(_) => {
                error!("IP {} is invalid", ip);
                return Vec::new();
            }
        };

        let query = match addr {
            IpAddr::V4(v4) => format!("{}.origin.asn.cymru.com", dissect::reverse_ipv4(v4)),
            IpAddr::V6(v6) => format!("{}.origin6.asn.cymru.com", dissect::reverse_ipv6(v6)),
        };

        self.txt_fragments(&query, ip).await
    }

    async fn lookup_as_name(&self, asn: u32, ip: &str) -> Option<String> {
        let query = format!("AS{}.asn.cymru.com", asn);
        self.txt_fragments(&query, ip).await.into_iter().next()
    }

    async fn txt_fragments(&self, query: &str, ip: &str) -> Vec<String> {
        match self.exchange.query(query, RecordType::TXT, &QueryTarget::Local).await {
            Ok(records) => records
                .iter()
                .filter_map(|record| match record.rdata() {
                    RData::TXT(fragments) => Some(fragments.clone()),
                    _ => None,
                })
                .flatten()
                .collect(),
            Err(QueryError::NxDomain) => {
                debug!("No origin record for IP {} (query {})", ip, query);
                Vec::new()
            }
            Err(err) => {
                error!("Could not query BGP endpoint (TXT {}) -> {}", query, err);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl IpProber for BgpProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Bgp
    }

    async fn probe_ip(&self, ip: &str) -> Resolution {
        if let Some(records) = self.cache.lock().unwrap().get(ip) {
            return Resolution::Bgp(BgpResolution::new(ip, records.clone()));
        }

        let mut records: Vec<AsRecord> = Vec::new();
        for fragment in self.lookup_asn(ip).await {
            let mut record = match parse_asn_record(&fragment) {
                Some(record) => record,
                None => continue,
            };

            if let Some(as_fragment) = self.lookup_as_name(record.asn, ip).await {
                record.name = parse_as_name(&as_fragment).unwrap_or_default();
            }
            records.push(record);
        }

        // Negative results are cached as well.
        self.cache.lock().unwrap().insert(ip.to_string(), records.clone());

        Resolution::Bgp(BgpResolution::new(ip, records))
    }
}

/// Parses `"13335 | 104.28.16.0/20 | US | arin | 2014-03-28"`. The AS name is
/// filled in by the second lookup stage.
pub fn parse_asn_record(fragment: &str) -> Option<AsRecord> {
    let groups = match ASN_RECORD_PATTERN.captures(fragment) {
        Some(groups) => groups,
        None => {
            error!("Invalid ASN record '{}'", fragment);
            return None;
        }
    };

    let asn = match groups[1].parse::<u32>() {
        Ok(asn) => asn,
        Err(_) => {
            error!("Invalid ASN '{}'", &groups[1]);
            return None;
        }
    };

    Some(AsRecord {
        asn,
        name: String::new(),
        bgp_prefix: groups[2].to_string(),
        registry: groups[4].to_string(),
        allocated: groups[5].to_string(),
    })
}

/// Parses `"13335 | US | arin | 2010-07-14 | CLOUDFLARENET, US"` into the AS name.
pub fn parse_as_name(fragment: &str) -> Option<String> {
    match AS_RECORD_PATTERN.captures(fragment) {
        Some(groups) => Some(groups[5].to_string()),
        None => {
            error!("Invalid AS record '{}'", fragment);
            None
        }
    }
}
