// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Lifts domain names and IP addresses out of arbitrary text.
//!
//! Every prober funnels its payloads through this module, so normalization
//! rules live in exactly one place: domains are lower-cased, stripped of
//! trailing dots and of leading `*.` / `www.` labels, and must end in a known
//! IANA TLD. The relatedness predicate which decides whether a discovered
//! domain is crawled lives here as well.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

mod tlds;

const CHAR: &str = "[a-z0-9]";
const CHAR_OR_SYMBOL: &str = "[a-z0-9-_]";

// IPv4 with a per-octet range check, IPv6 in all standard forms including
// compressed and v4-mapped.
const OCTET: &str = "(25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9][0-9]|[0-9])";
const IPV6: &str = r"([0-9a-fA-F]{1,4}:([0-9a-fA-F]{1,4}:([0-9a-fA-F]{1,4}:([0-9a-fA-F]{1,4}:([0-9a-fA-F]{1,4}:[0-9a-fA-F]{0,4}|:[0-9a-fA-F]{1,4})?|(:[0-9a-fA-F]{1,4}){0,2})|(:[0-9a-fA-F]{1,4}){0,3})|(:[0-9a-fA-F]{1,4}){0,4})|:(:[0-9a-fA-F]{1,4}){0,5})((:[0-9a-fA-F]{1,4}){2}|:(25[0-5]|(2[0-4]|1[0-9]|[1-9])?[0-9])(\.(25[0-5]|(2[0-4]|1[0-9]|[1-9])?[0-9])){3})|(([0-9a-fA-F]{1,4}:){1,6}|:):[0-9a-fA-F]{1,4}|([0-9a-fA-F]{1,4}:){7}:";

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

lazy_static! {
    static ref DOMAIN_PATTERN: Regex = {
        let word = format!("{c}(?:{cs}*{c})?", c = CHAR, cs = CHAR_OR_SYMBOL);
        // The TLD alternation is sorted longest-first, so the leftmost-first
        // alternation semantics of the regex crate yield the longest TLD match.
        Regex::new(&format!(r"\b(?i)(?:{}\.)+(?:{})\b", word, tlds::TLD_ALTERNATION)).unwrap()
    };
    static ref IP_PATTERN: Regex = {
        let ipv4 = format!(r"\b{o}\.{o}\.{o}\.{o}\b", o = OCTET);
        Regex::new(&format!("({}|{})", ipv4, IPV6)).unwrap()
    };
}

/// A predicate deciding whether two domains belong to the same infrastructure.
pub type DomainRelation = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Relatedness on the second-to-last label only: `sub.example.com` relates to
/// `foo.example.net` and to `example.com`.
pub fn default_relation() -> DomainRelation {
    Arc::new(|a, b| is_domain_related(a, b, false))
}

/// Like [`default_relation`], but additionally requires the TLDs to match.
pub fn strict_relation() -> DomainRelation {
    Arc::new(|a, b| is_domain_related(a, b, true))
}

/// Returns every domain found in `haystack`, normalized via [`clean_domain`].
pub fn domains_from_str(haystack: &str) -> Vec<String> {
    DOMAIN_PATTERN
        .find_iter(haystack)
        .map(|m| clean_domain(m.as_str()))
        .collect()
}

pub fn domains_from_strs<I: IntoIterator<Item = T>, T: AsRef<str>>(haystacks: I) -> Vec<String> {
    haystacks
        .into_iter()
        .flat_map(|h| domains_from_str(h.as_ref()))
        .collect()
}

/// Returns every IPv4 and IPv6 address found in `haystack`. IPv6 forms are
/// kept as written.
pub fn ips_from_str(haystack: &str) -> Vec<String> {
    IP_PATTERN
        .find_iter(haystack)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn ips_from_strs<I: IntoIterator<Item = T>, T: AsRef<str>>(haystacks: I) -> Vec<String> {
    haystacks
        .into_iter()
        .flat_map(|h| ips_from_str(h.as_ref()))
        .collect()
}

/// Normalizes a domain: lower-case, no trailing dots, no leading `*.` or
/// `www.` labels. Idempotent: `clean_domain(clean_domain(x)) == clean_domain(x)`.
pub fn clean_domain(domain: &str) -> String {
    let lowered = domain.to_lowercase();
    let mut d = lowered.trim_end_matches('.');
    loop {
        if let Some(rest) = d.strip_prefix("*.") {
            d = rest;
        } else if let Some(rest) = d.strip_prefix("www.") {
            d = rest;
        } else {
            break;
        }
    }
    d.to_string()
}

/// True iff the whole input is one extractable domain.
pub fn is_valid_domain(domain: &str) -> bool {
    match DOMAIN_PATTERN.find(domain) {
        Some(m) => m.start() == 0 && m.end() == domain.len(),
        None => false,
    }
}

/// Relatedness heuristics:
///
/// 1) A subdomain and its parent are related:            sub.example.com <--> example.com
/// 2) Different subdomains are related:                  foo.example.com <--> bar.example.com
/// 3) Same 2nd order domains with different TLD relate:  sub.example.com <--> example.cz
///
/// Two domains are related iff their second-order labels are equal; in strict
/// mode the TLDs must be equal as well. Bare TLDs never relate.
pub fn is_domain_related(domain_a: &str, domain_b: &str, strict: bool) -> bool {
    let labels_a: Vec<&str> = domain_a.split('.').filter(|l| !l.is_empty()).collect();
    let labels_b: Vec<&str> = domain_b.split('.').filter(|l| !l.is_empty()).collect();

    if labels_a.len() < 2 || labels_b.len() < 2 {
        // Ignore TLDs and invalid domains.
        return false;
    }

    let related = labels_a[labels_a.len() - 2] == labels_b[labels_b.len() - 2];
    if related && strict {
        return labels_a[labels_a.len() - 1] == labels_b[labels_b.len() - 1];
    }
    related
}

/// Drops the first label; returns `None` when the result would be a TLD.
pub fn parent_domain_of(domain: &str) -> Option<String> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() <= 2 {
        // We don't want a TLD.
        return None;
    }
    Some(labels[1..].join("."))
}

pub fn is_subdomain(domain: &str) -> bool {
    domain.split('.').filter(|l| !l.is_empty()).count() >= 3
}

/// Returns a given IPv4 address in ARPA-like rDNS form, e.g. `4.3.2.1` for `1.2.3.4`.
pub fn reverse_ipv4(ip: Ipv4Addr) -> String {
    let o = ip.octets();
    format!("{}.{}.{}.{}", o[3], o[2], o[1], o[0])
}

/// Returns a given IPv6 address in ARPA-like rDNS form: 32 nibbles in reverse,
/// separated by dots.
pub fn reverse_ipv6(ip: Ipv6Addr) -> String {
    let octets = ip.octets();
    let mut buf = Vec::with_capacity(octets.len() * 4);
    for (i, byte) in octets.iter().enumerate().rev() {
        buf.push(HEX_DIGITS[(byte & 0xF) as usize]);
        buf.push(b'.');
        buf.push(HEX_DIGITS[(byte >> 4) as usize]);
        if i > 0 {
            buf.push(b'.');
        }
    }
    String::from_utf8(buf).unwrap()
}

/// Synthesizes the PTR query name for an IP address.
pub fn reverse_dns_name(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}.in-addr.arpa", reverse_ipv4(*v4)),
        IpAddr::V6(v6) => format!("{}.ip6.arpa", reverse_ipv6(*v6)),
    }
}
