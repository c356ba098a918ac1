// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reverse DNS lookups for discovered IPs.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use crate::dissect;
use crate::probe::dns::{DnsExchange, QueryError, QueryTarget, RData, RecordType};
use crate::probe::{IpProber, ProbeKind, Resolution};

#[derive(Debug, Clone, Serialize)]
pub struct PtrResolution {
    query: String,
    hostnames: Vec<String>,
}

impl PtrResolution {
    pub fn new<S: Into<String>>(query: S, hostnames: Vec<String>) -> PtrResolution {
        PtrResolution {
            query: query.into(),
            hostnames,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    /// Hostnames found via reverse DNS, already normalized.
    pub fn domains(&self) -> Vec<String> {
        self.hostnames.clone()
    }
}

pub struct PtrProber {
    exchange: Arc<dyn DnsExchange>,
}

impl PtrProber {
    pub fn new(exchange: Arc<dyn DnsExchange>) -> PtrProber {
        PtrProber { exchange }
    }
}

#[async_trait]
impl IpProber for PtrProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Ptr
    }

    async fn probe_ip(&self, ip: &str) -> Resolution {
        let mut resolution = PtrResolution::new(ip, Vec::new());

        let addr: IpAddr = match ip.parse() {
            Ok(addr) => addr,
            Err(_) => {
                error!("IP {} is invalid", ip);
                return Resolution::Ptr(resolution);
            }
        };

        let name = dissect::reverse_dns_name(&addr);
        match self.exchange.query(&name, RecordType::PTR, &QueryTarget::Local).await {
            Ok(records) => {
                for record in records {
                    if let RData::PTR(hostname) = record.rdata() {
                        let hostname = dissect::clean_domain(hostname);
                        if !hostname.is_empty() {
                            resolution.hostnames.push(hostname);
                        }
                    }
                }
            }
            Err(QueryError::NxDomain) => debug!("No PTR record for {}", ip),
            Err(err) => error!("PTR query {} failed: {}", name, err),
        }

        Resolution::Ptr(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::probe::dns::exchange::testing::ScriptedExchange;
    use crate::probe::dns::Record;

    use spectral::prelude::*;

    #[tokio::test]
    async fn reverse_lookups_synthesize_the_arpa_name() {
        let exchange = Arc::new(ScriptedExchange::new().answer(
            "34.216.184.93.in-addr.arpa",
            RecordType::PTR,
            QueryTarget::Local,
            vec![Record::new(
                "34.216.184.93.in-addr.arpa",
                RecordType::PTR,
                300,
                RData::PTR("Host-1.Example.COM".to_string()),
            )],
        ));
        let prober = PtrProber::new(exchange);

        let resolution = match prober.probe_ip("93.184.216.34").await {
            Resolution::Ptr(resolution) => resolution,
            _ => unreachable!(),
        };

        assert_that(&resolution.hostnames()).is_equal_to(&["host-1.example.com".to_string()][..]);
    }

    #[tokio::test]
    async fn malformed_ips_yield_an_empty_resolution() {
        let exchange = Arc::new(ScriptedExchange::new());
        let prober = PtrProber::new(exchange.clone());

        let resolution = match prober.probe_ip("not-an-ip").await {
            Resolution::Ptr(resolution) => resolution,
            _ => unreachable!(),
        };

        assert_that(&resolution.hostnames().is_empty()).is_true();
        assert_that(&exchange.calls().is_empty()).is_true();
    }

    #[tokio::test]
    async fn nxdomain_yields_an_empty_resolution() {
        let exchange = Arc::new(ScriptedExchange::new());
        let prober = PtrProber::new(exchange);

        let resolution = match prober.probe_ip("192.0.2.1").await {
            Resolution::Ptr(resolution) => resolution,
            _ => unreachable!(),
        };

        assert_that(&resolution.hostnames().is_empty()).is_true();
    }
}
