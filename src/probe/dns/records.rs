// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Crate-owned resource record model.
//!
//! Answers coming back from trust-dns are converted into these types once and
//! never leave the crate as trust-dns values. The conversion also fixes the
//! name normalization: all names lose their trailing dot and are lower-cased.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::Serialize;
use trust_dns_resolver::proto::rr::dnssec::rdata::{DNSSECRData, DNSSECRecordType};
use trust_dns_resolver::proto::rr::rdata::caa;
use trust_dns_resolver::proto::rr::{RData as TrtRData, RecordType as TrtRecordType};
use trust_dns_resolver::Name;

use crate::dissect;

/// Record types this crate queries or understands in answers.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Serialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    A,
    AAAA,
    ANY,
    AXFR,
    CAA,
    CERT,
    CNAME,
    DNAME,
    DNSKEY,
    DS,
    IXFR,
    KEY,
    KX,
    MAILB,
    MX,
    NS,
    NSEC,
    NSEC3,
    NSEC3PARAM,
    OPT,
    PTR,
    RRSIG,
    SIG,
    SOA,
    SRV,
    TKEY,
    TSIG,
    TXT,
    Unknown(u16),
}

/// The fan-out issued for every popped domain, cf. `DnsProber`.
pub const DEFAULT_QUERY_TYPES: &[RecordType] = &[
    RecordType::A,
    RecordType::NS,
    RecordType::SOA,
    RecordType::MX,
    RecordType::TXT,
    RecordType::SIG,
    RecordType::KEY,
    RecordType::AAAA,
    RecordType::SRV,
    RecordType::CERT,
    RecordType::DNAME,
    RecordType::OPT,
    RecordType::KX,
    RecordType::DS,
    RecordType::RRSIG,
    RecordType::NSEC,
    RecordType::DNSKEY,
    RecordType::NSEC3,
    RecordType::NSEC3PARAM,
    RecordType::TKEY,
    RecordType::TSIG,
    RecordType::IXFR,
    RecordType::AXFR,
    RecordType::MAILB,
    RecordType::ANY,
    RecordType::CAA,
];

// Types trust-dns does not model on its own.
const TYPE_KX: u16 = 36;
const TYPE_CERT: u16 = 37;
const TYPE_DNAME: u16 = 39;
const TYPE_TKEY: u16 = 249;
const TYPE_TSIG: u16 = 250;
const TYPE_MAILB: u16 = 253;

impl From<RecordType> for TrtRecordType {
    fn from(rt: RecordType) -> Self {
        use TrtRecordType as Trt;

        match rt {
            RecordType::A => Trt::A,
            RecordType::AAAA => Trt::AAAA,
            RecordType::ANY => Trt::ANY,
            RecordType::AXFR => Trt::AXFR,
            RecordType::CAA => Trt::CAA,
            RecordType::CERT => Trt::Unknown(TYPE_CERT),
            RecordType::CNAME => Trt::CNAME,
            RecordType::DNAME => Trt::Unknown(TYPE_DNAME),
            RecordType::DNSKEY => Trt::DNSSEC(DNSSECRecordType::DNSKEY),
            RecordType::DS => Trt::DNSSEC(DNSSECRecordType::DS),
            RecordType::IXFR => Trt::IXFR,
            RecordType::KEY => Trt::DNSSEC(DNSSECRecordType::KEY),
            RecordType::KX => Trt::Unknown(TYPE_KX),
            RecordType::MAILB => Trt::Unknown(TYPE_MAILB),
            RecordType::MX => Trt::MX,
            RecordType::NS => Trt::NS,
            RecordType::NSEC => Trt::DNSSEC(DNSSECRecordType::NSEC),
            RecordType::NSEC3 => Trt::DNSSEC(DNSSECRecordType::NSEC3),
            RecordType::NSEC3PARAM => Trt::DNSSEC(DNSSECRecordType::NSEC3PARAM),
            RecordType::OPT => Trt::OPT,
            RecordType::PTR => Trt::PTR,
            RecordType::RRSIG => Trt::DNSSEC(DNSSECRecordType::RRSIG),
            RecordType::SIG => Trt::DNSSEC(DNSSECRecordType::SIG),
            RecordType::SOA => Trt::SOA,
            RecordType::SRV => Trt::SRV,
            RecordType::TKEY => Trt::Unknown(TYPE_TKEY),
            RecordType::TSIG => Trt::Unknown(TYPE_TSIG),
            RecordType::TXT => Trt::TXT,
            RecordType::Unknown(value) => Trt::Unknown(value),
        }
    }
}

impl From<TrtRecordType> for RecordType {
    fn from(rt: TrtRecordType) -> Self {
        use TrtRecordType as Trt;

        match rt {
            Trt::A => RecordType::A,
            Trt::AAAA => RecordType::AAAA,
            Trt::ANY => RecordType::ANY,
            Trt::AXFR => RecordType::AXFR,
            Trt::CAA => RecordType::CAA,
            Trt::CNAME => RecordType::CNAME,
            Trt::IXFR => RecordType::IXFR,
            Trt::MX => RecordType::MX,
            Trt::NS => RecordType::NS,
            Trt::OPT => RecordType::OPT,
            Trt::PTR => RecordType::PTR,
            Trt::SOA => RecordType::SOA,
            Trt::SRV => RecordType::SRV,
            Trt::TXT => RecordType::TXT,
            Trt::DNSSEC(DNSSECRecordType::DNSKEY) => RecordType::DNSKEY,
            Trt::DNSSEC(DNSSECRecordType::DS) => RecordType::DS,
            Trt::DNSSEC(DNSSECRecordType::KEY) => RecordType::KEY,
            Trt::DNSSEC(DNSSECRecordType::NSEC) => RecordType::NSEC,
            Trt::DNSSEC(DNSSECRecordType::NSEC3) => RecordType::NSEC3,
            Trt::DNSSEC(DNSSECRecordType::NSEC3PARAM) => RecordType::NSEC3PARAM,
            Trt::DNSSEC(DNSSECRecordType::RRSIG) => RecordType::RRSIG,
            Trt::DNSSEC(DNSSECRecordType::SIG) => RecordType::SIG,
            Trt::Unknown(TYPE_KX) => RecordType::KX,
            Trt::Unknown(TYPE_CERT) => RecordType::CERT,
            Trt::Unknown(TYPE_DNAME) => RecordType::DNAME,
            Trt::Unknown(TYPE_TKEY) => RecordType::TKEY,
            Trt::Unknown(TYPE_TSIG) => RecordType::TSIG,
            Trt::Unknown(TYPE_MAILB) => RecordType::MAILB,
            other => RecordType::Unknown(u16::from(other)),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::Unknown(code) => write!(f, "TYPE{}", code),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub struct MX {
    pub preference: u16,
    pub exchange: String,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub struct SOA {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: i32,
    pub retry: i32,
    pub expire: i32,
    pub minimum: u32,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub struct SRV {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub struct CAA {
    pub tag: String,
    pub value: String,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub struct NSEC {
    pub next_domain: String,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub struct RRSIG {
    pub signer_name: String,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    CAA(CAA),
    CNAME(String),
    DNSKEY,
    MX(MX),
    NS(String),
    NSEC(NSEC),
    PTR(String),
    RRSIG(RRSIG),
    SOA(SOA),
    SRV(SRV),
    TXT(Vec<String>),
    Unknown { code: u16, rdata: Vec<u8> },
}

impl RData {
    fn from_trust_dns(record_type: TrtRecordType, rdata: &TrtRData) -> RData {
        match rdata {
            TrtRData::A(ip) => RData::A(*ip),
            TrtRData::AAAA(ip) => RData::AAAA(*ip),
            TrtRData::CAA(value) => RData::CAA(CAA {
                tag: caa_tag(value.tag()),
                value: caa_value(value.value()),
            }),
            TrtRData::CNAME(name) => RData::CNAME(name_to_string(name)),
            TrtRData::MX(mx) => RData::MX(MX {
                preference: mx.preference(),
                exchange: name_to_string(mx.exchange()),
            }),
            TrtRData::NS(name) => RData::NS(name_to_string(name)),
            TrtRData::PTR(name) => RData::PTR(name_to_string(name)),
            TrtRData::SOA(soa) => RData::SOA(SOA {
                mname: name_to_string(soa.mname()),
                rname: name_to_string(soa.rname()),
                serial: soa.serial(),
                refresh: soa.refresh(),
                retry: soa.retry(),
                expire: soa.expire(),
                minimum: soa.minimum(),
            }),
            TrtRData::SRV(srv) => RData::SRV(SRV {
                priority: srv.priority(),
                weight: srv.weight(),
                port: srv.port(),
                target: name_to_string(srv.target()),
            }),
            TrtRData::TXT(txt) => RData::TXT(
                txt.txt_data()
                    .iter()
                    .map(|fragment| String::from_utf8_lossy(fragment).to_string())
                    .collect(),
            ),
            TrtRData::DNSSEC(DNSSECRData::DNSKEY(_)) => RData::DNSKEY,
            TrtRData::DNSSEC(DNSSECRData::SIG(sig)) => RData::RRSIG(RRSIG {
                signer_name: name_to_string(sig.signer_name()),
            }),
            TrtRData::DNSSEC(DNSSECRData::NSEC(nsec)) => RData::NSEC(NSEC {
                next_domain: name_to_string(nsec.next_domain_name()),
            }),
            TrtRData::NULL(null) => RData::Unknown {
                code: u16::from(record_type),
                rdata: null.anything().map(|b| b.to_vec()).unwrap_or_default(),
            },
            TrtRData::Unknown { code, rdata } => RData::Unknown {
                code: *code,
                rdata: rdata.anything().map(|b| b.to_vec()).unwrap_or_default(),
            },
            _ => RData::Unknown {
                code: u16::from(record_type),
                rdata: Vec::new(),
            },
        }
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RData::A(ip) => write!(f, "{}", ip),
            RData::AAAA(ip) => write!(f, "{}", ip),
            RData::CAA(caa) => write!(f, "{} \"{}\"", caa.tag, caa.value),
            RData::CNAME(name) => write!(f, "{}", name),
            RData::DNSKEY => write!(f, "DNSKEY"),
            RData::MX(mx) => write!(f, "{} {}", mx.preference, mx.exchange),
            RData::NS(name) => write!(f, "{}", name),
            RData::NSEC(nsec) => write!(f, "{}", nsec.next_domain),
            RData::PTR(name) => write!(f, "{}", name),
            RData::RRSIG(sig) => write!(f, "signed by {}", sig.signer_name),
            RData::SOA(soa) => write!(f, "{} {} {}", soa.mname, soa.rname, soa.serial),
            RData::SRV(srv) => write!(f, "{} {} {} {}", srv.priority, srv.weight, srv.port, srv.target),
            RData::TXT(fragments) => {
                let quoted: Vec<String> = fragments.iter().map(|t| format!("\"{}\"", t)).collect();
                write!(f, "{}", quoted.join(" "))
            }
            RData::Unknown { code, rdata } => write!(f, "TYPE{} ({} bytes)", code, rdata.len()),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub struct Record {
    name: String,
    rr_type: RecordType,
    ttl: u32,
    rdata: RData,
}

impl Record {
    pub fn new<S: Into<String>>(name: S, rr_type: RecordType, ttl: u32, rdata: RData) -> Record {
        Record {
            name: name.into(),
            rr_type,
            ttl,
            rdata,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rr_type(&self) -> RecordType {
        self.rr_type
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn rdata(&self) -> &RData {
        &self.rdata
    }

    /// Domains referenced by this record, by type-specific rule:
    /// name-typed fields are taken verbatim, free-text fields are run through
    /// the extractor. CAA `issue`/`issuewild` values name CAs, not crawl
    /// targets, and are ignored.
    pub fn referenced_domains(&self) -> Vec<String> {
        match &self.rdata {
            RData::NS(name) | RData::CNAME(name) | RData::PTR(name) => clean_non_empty(name),
            RData::MX(mx) => clean_non_empty(&mx.exchange),
            RData::SOA(soa) => clean_non_empty(&soa.rname),
            RData::RRSIG(sig) => clean_non_empty(&sig.signer_name),
            RData::NSEC(nsec) => clean_non_empty(&nsec.next_domain),
            RData::TXT(fragments) => dissect::domains_from_strs(fragments),
            RData::CAA(caa) if caa.tag == "iodef" => dissect::domains_from_str(&caa.value),
            RData::Unknown { code: TYPE_KX, rdata } => kx_exchanger(rdata)
                .map(|name| clean_non_empty(&name))
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// IP addresses referenced by this record. TXT fragments cover SPF
    /// `ip4:` / `ip6:` mechanisms.
    pub fn referenced_ips(&self) -> Vec<String> {
        match &self.rdata {
            RData::A(ip) => vec![ip.to_string()],
            RData::AAAA(ip) => vec![ip.to_string()],
            RData::TXT(fragments) => dissect::ips_from_strs(fragments),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} IN {} {}", self.name, self.ttl, self.rr_type, self.rdata)
    }
}

#[doc(hidden)]
impl From<&trust_dns_resolver::proto::rr::Record> for Record {
    fn from(record: &trust_dns_resolver::proto::rr::Record) -> Self {
        Record {
            name: name_to_string(record.name()),
            rr_type: record.rr_type().into(),
            ttl: record.ttl(),
            rdata: RData::from_trust_dns(record.rr_type(), record.rdata()),
        }
    }
}

fn name_to_string(name: &Name) -> String {
    name.to_string().trim_end_matches('.').to_lowercase()
}

fn clean_non_empty(name: &str) -> Vec<String> {
    let cleaned = dissect::clean_domain(name);
    if cleaned.is_empty() {
        Vec::new()
    } else {
        vec![cleaned]
    }
}

fn caa_tag(tag: &caa::Property) -> String {
    match tag {
        caa::Property::Issue => "issue".to_string(),
        caa::Property::IssueWild => "issuewild".to_string(),
        caa::Property::Iodef => "iodef".to_string(),
        caa::Property::Unknown(other) => other.clone(),
    }
}

fn caa_value(value: &caa::Value) -> String {
    match value {
        caa::Value::Issuer(Some(name), _) => name.to_string().trim_end_matches('.').to_string(),
        caa::Value::Issuer(None, _) => String::new(),
        caa::Value::Url(url) => url.to_string(),
        caa::Value::Unknown(bytes) => String::from_utf8_lossy(bytes).to_string(),
    }
}

/// A KX rdata is a 16 bit preference followed by an uncompressed exchanger
/// name. Compressed names cannot occur in rdata we did not decompress, so a
/// pointer byte aborts the parse.
fn kx_exchanger(rdata: &[u8]) -> Option<String> {
    parse_wire_name(rdata.get(2..)?)
}

fn parse_wire_name(buf: &[u8]) -> Option<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut i = 0usize;
    loop {
        let len = *buf.get(i)? as usize;
        if len == 0 {
            break;
        }
        if len & 0xC0 != 0 {
            return None;
        }
        let label = buf.get(i + 1..i + 1 + len)?;
        labels.push(String::from_utf8_lossy(label).to_string());
        i += 1 + len;
    }
    if labels.is_empty() {
        None
    } else {
        Some(labels.join("."))
    }
}
