// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Probers and their resolutions.
//!
//! A prober takes one domain or one IP and returns one [`Resolution`]. Probers
//! are total: every failure is logged and turned into an empty resolution, so
//! the crawl engine never has to care about individual probe failures.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use bgp::{AsRecord, BgpProber, BgpResolution};
pub use ct::{AggregatedCtLog, CtLog, CtProber, CtResolution};
pub use dns::{Dmarc, DnsProber, DnsRecordPair, DnsResolution};
pub use geo::{GeoProber, GeoRecord, GeoResolution};
pub use http::{HttpHeader, HttpProber, HttpResolution};
pub use ptr::{PtrProber, PtrResolution};
pub use tls::{TlsCertificate, TlsProber, TlsResolution};
pub use whois::{WhoisContact, WhoisProber, WhoisResolution};

pub mod bgp;
pub mod ct;
pub mod dns;
pub mod geo;
pub mod http;
pub mod ptr;
pub mod tls;
pub mod whois;

/// Default timeout used by all network clients.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProbeKind {
    Dns,
    Ptr,
    Whois,
    Tls,
    Http,
    Ct,
    Bgp,
    Geo,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProbeKind::Dns => "DNS",
            ProbeKind::Ptr => "PTR",
            ProbeKind::Whois => "WHOIS",
            ProbeKind::Tls => "TLS",
            ProbeKind::Http => "HTTP",
            ProbeKind::Ct => "CT",
            ProbeKind::Bgp => "BGP",
            ProbeKind::Geo => "GEO",
        };
        f.write_str(name)
    }
}

/// A capability that resolves one domain into one [`Resolution`]. Must never
/// fail; network and parse errors are logged and yield empty resolutions.
#[async_trait]
pub trait DomainProber: Send + Sync {
    fn kind(&self) -> ProbeKind;
    async fn probe_domain(&self, domain: &str) -> Resolution;
}

/// A capability that resolves one IP address into one [`Resolution`].
#[async_trait]
pub trait IpProber: Send + Sync {
    fn kind(&self) -> ProbeKind;
    async fn probe_ip(&self, ip: &str) -> Resolution;
}

/// One probe result for one query, in all its shapes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "resolution")]
pub enum Resolution {
    Dns(DnsResolution),
    Ptr(PtrResolution),
    Whois(WhoisResolution),
    Tls(TlsResolution),
    Http(HttpResolution),
    Ct(CtResolution),
    Bgp(BgpResolution),
    Geo(GeoResolution),
}

impl Resolution {
    pub fn kind(&self) -> ProbeKind {
        match self {
            Resolution::Dns(_) => ProbeKind::Dns,
            Resolution::Ptr(_) => ProbeKind::Ptr,
            Resolution::Whois(_) => ProbeKind::Whois,
            Resolution::Tls(_) => ProbeKind::Tls,
            Resolution::Http(_) => ProbeKind::Http,
            Resolution::Ct(_) => ProbeKind::Ct,
            Resolution::Bgp(_) => ProbeKind::Bgp,
            Resolution::Geo(_) => ProbeKind::Geo,
        }
    }

    /// The exact query string this resolution answers.
    pub fn query(&self) -> &str {
        match self {
            Resolution::Dns(res) => res.query(),
            Resolution::Ptr(res) => res.query(),
            Resolution::Whois(res) => res.query(),
            Resolution::Tls(res) => res.query(),
            Resolution::Http(res) => res.query(),
            Resolution::Ct(res) => res.query(),
            Resolution::Bgp(res) => res.query(),
            Resolution::Geo(res) => res.query(),
        }
    }

    /// Domains discovered in this resolution, normalized.
    pub fn domains(&self) -> Vec<String> {
        match self {
            Resolution::Dns(res) => res.domains(),
            Resolution::Ptr(res) => res.domains(),
            Resolution::Whois(res) => res.domains(),
            Resolution::Tls(res) => res.domains(),
            Resolution::Http(res) => res.domains(),
            Resolution::Ct(res) => res.domains(),
            Resolution::Bgp(_) | Resolution::Geo(_) => Vec::new(),
        }
    }

    /// IP addresses discovered in this resolution. Only DNS answers carry
    /// addresses worth probing.
    pub fn ips(&self) -> Vec<String> {
        match self {
            Resolution::Dns(res) => res.ips(),
            _ => Vec::new(),
        }
    }
}
