// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Crawl engine behavior with scripted probers: no sockets involved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spectral::prelude::*;
use tokio_util::sync::CancellationToken;

use deepdig::engine::{Engine, EngineOpts};
use deepdig::probe::dns::{DnsResolution, RData, Record, RecordType};
use deepdig::probe::{DomainProber, IpProber, ProbeKind, PtrResolution, Resolution, WhoisResolution};

/// A domain prober that answers from a script and records its calls.
struct ScriptedDnsProber {
    answers: HashMap<String, Vec<Record>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDnsProber {
    fn new(answers: Vec<(&str, Record)>) -> (ScriptedDnsProber, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut map: HashMap<String, Vec<Record>> = HashMap::new();
        for (domain, record) in answers {
            map.entry(domain.to_string()).or_default().push(record);
        }
        (
            ScriptedDnsProber {
                answers: map,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl DomainProber for ScriptedDnsProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Dns
    }

    async fn probe_domain(&self, domain: &str) -> Resolution {
        self.calls.lock().unwrap().push(domain.to_string());
        let mut resolution = DnsResolution::new(domain, "scripted");
        for record in self.answers.get(domain).cloned().unwrap_or_default() {
            resolution.add_record(record.rr_type(), record);
        }
        Resolution::Dns(resolution)
    }
}

/// A domain prober with empty answers, optionally slow.
struct EmptyDomainProber {
    delay: Duration,
}

#[async_trait]
impl DomainProber for EmptyDomainProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Whois
    }

    async fn probe_domain(&self, domain: &str) -> Resolution {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Resolution::Whois(WhoisResolution::new(domain, Vec::new()))
    }
}

/// An IP prober that only records which IPs it was asked about.
struct RecordingIpProber {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingIpProber {
    fn new() -> (RecordingIpProber, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (RecordingIpProber { calls: calls.clone() }, calls)
    }
}

#[async_trait]
impl IpProber for RecordingIpProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Ptr
    }

    async fn probe_ip(&self, ip: &str) -> Resolution {
        self.calls.lock().unwrap().push(ip.to_string());
        Resolution::Ptr(PtrResolution::new(ip, Vec::new()))
    }
}

fn a_record(name: &str, ip: &str) -> Record {
    Record::new(name, RecordType::A, 300, RData::A(ip.parse().unwrap()))
}

fn cname_record(name: &str, target: &str) -> Record {
    Record::new(name, RecordType::CNAME, 300, RData::CNAME(target.to_string()))
}

fn ns_record(name: &str, ns: &str) -> Record {
    Record::new(name, RecordType::NS, 300, RData::NS(ns.to_string()))
}

async fn collect(mut rx: tokio::sync::mpsc::Receiver<Resolution>) -> Vec<Resolution> {
    let mut resolutions = Vec::new();
    while let Some(resolution) = rx.recv().await {
        resolutions.push(resolution);
    }
    resolutions
}

#[tokio::test]
async fn minimal_dns_round_trip() {
    let (dns, dns_calls) = ScriptedDnsProber::new(vec![("example.com", a_record("example.com", "93.184.216.34"))]);
    let (ptr, ip_calls) = RecordingIpProber::new();

    let mut engine = Engine::new(EngineOpts::default());
    engine.add_domain_prober(Arc::new(dns));
    engine.add_ip_prober(Arc::new(ptr));

    let resolutions = collect(engine.resolve("example.com", CancellationToken::new())).await;

    assert_that(&*dns_calls.lock().unwrap()).is_equal_to(&vec!["example.com".to_string()]);
    assert_that(&*ip_calls.lock().unwrap()).is_equal_to(&vec!["93.184.216.34".to_string()]);
    assert_that(&resolutions).has_length(2);
    for resolution in &resolutions {
        let query = resolution.query();
        assert_that(&(query == "example.com" || query == "93.184.216.34")).is_true();
    }
}

#[tokio::test]
async fn cname_targets_are_chased_even_across_unrelated_domains() {
    let (dns, dns_calls) = ScriptedDnsProber::new(vec![
        ("all.tens.ten", cname_record("all.tens.ten", "all.twenties.twenty")),
        ("all.twenties.twenty", a_record("all.twenties.twenty", "20.20.20.20")),
    ]);
    let (ptr, ip_calls) = RecordingIpProber::new();

    let mut engine = Engine::new(EngineOpts::default());
    engine.add_domain_prober(Arc::new(dns));
    engine.add_ip_prober(Arc::new(ptr));

    collect(engine.resolve("all.tens.ten", CancellationToken::new())).await;

    assert_that(&*dns_calls.lock().unwrap())
        .is_equal_to(&vec!["all.tens.ten".to_string(), "all.twenties.twenty".to_string()]);
    assert_that(&*ip_calls.lock().unwrap()).is_equal_to(&vec!["20.20.20.20".to_string()]);
}

#[tokio::test]
async fn unrelated_discoveries_are_not_crawled() {
    let (dns, dns_calls) = ScriptedDnsProber::new(vec![
        ("example.com", ns_record("example.com", "ns.unrelated.org")),
        ("example.com", cname_record("mail.example.com", "mail.example.net")),
        ("mail.example.net", a_record("mail.example.net", "192.0.2.7")),
    ]);

    let mut engine = Engine::new(EngineOpts::default());
    engine.add_domain_prober(Arc::new(dns));

    collect(engine.resolve("example.com", CancellationToken::new())).await;

    let calls = dns_calls.lock().unwrap();
    assert_that(&calls.contains(&"mail.example.net".to_string())).is_true();
    assert_that(&calls.contains(&"ns.unrelated.org".to_string())).is_false();
}

#[tokio::test]
async fn strict_relatedness_requires_matching_tlds() {
    let (dns, dns_calls) = ScriptedDnsProber::new(vec![
        ("example.com", ns_record("example.com", "ns.example.net")),
        ("example.com", ns_record("example.com", "ns2.example.com")),
    ]);

    let mut opts = EngineOpts::default();
    opts.relation = deepdig::dissect::strict_relation();
    let mut engine = Engine::new(opts);
    engine.add_domain_prober(Arc::new(dns));

    collect(engine.resolve("example.com", CancellationToken::new())).await;

    let calls = dns_calls.lock().unwrap();
    assert_that(&calls.contains(&"ns2.example.com".to_string())).is_true();
    assert_that(&calls.contains(&"ns.example.net".to_string())).is_false();
}

#[tokio::test]
async fn max_depth_zero_probes_the_seed_only() {
    let (dns, dns_calls) = ScriptedDnsProber::new(vec![
        ("example.com", a_record("example.com", "93.184.216.34")),
        ("example.com", ns_record("example.com", "ns.example.com")),
    ]);
    let (ptr, ip_calls) = RecordingIpProber::new();

    let mut opts = EngineOpts::default();
    opts.max_depth = 0;
    let mut engine = Engine::new(opts);
    engine.add_domain_prober(Arc::new(dns));
    engine.add_ip_prober(Arc::new(ptr));

    let resolutions = collect(engine.resolve("example.com", CancellationToken::new())).await;

    assert_that(&*dns_calls.lock().unwrap()).is_equal_to(&vec!["example.com".to_string()]);
    assert_that(&ip_calls.lock().unwrap().is_empty()).is_true();
    assert_that(&resolutions).has_length(1);
}

#[tokio::test]
async fn every_registered_prober_emits_exactly_once_per_pop() {
    let (dns, _) = ScriptedDnsProber::new(vec![]);

    let mut engine = Engine::new(EngineOpts::default());
    engine.add_domain_prober(Arc::new(dns));
    engine.add_domain_prober(Arc::new(EmptyDomainProber { delay: Duration::ZERO }));
    engine.add_domain_prober(Arc::new(EmptyDomainProber {
        delay: Duration::from_millis(20),
    }));

    let resolutions = collect(engine.resolve("example.com", CancellationToken::new())).await;

    assert_that(&resolutions).has_length(3);
    for resolution in &resolutions {
        assert_that(&resolution.query()).is_equal_to("example.com");
    }
}

#[tokio::test]
async fn cancellation_closes_the_stream_without_finishing_the_crawl() {
    // A long chain of related domains, each probe taking a while.
    let chain: Vec<(String, Record)> = (0..50)
        .map(|i| {
            (
                format!("host{}.example.com", i),
                ns_record(&format!("host{}.example.com", i), &format!("host{}.example.com", i + 1)),
            )
        })
        .collect();
    let answers: Vec<(&str, Record)> = chain.iter().map(|(d, r)| (d.as_str(), r.clone())).collect();
    let (dns, dns_calls) = ScriptedDnsProber::new(answers);

    let mut engine = Engine::new(EngineOpts::default());
    engine.add_domain_prober(Arc::new(dns));
    engine.add_domain_prober(Arc::new(EmptyDomainProber {
        delay: Duration::from_millis(20),
    }));

    let token = CancellationToken::new();
    let mut rx = engine.resolve("host0.example.com", token.clone());

    let first = rx.recv().await;
    assert_that(&first.is_some()).is_true();
    token.cancel();

    let drained = collect(rx).await;

    // The crawl stopped early; the closed channel bounds the emitted results.
    assert_that(&(drained.len() < 100)).is_true();
    assert_that(&(dns_calls.lock().unwrap().len() < 50)).is_true();
}

#[tokio::test]
async fn queries_are_processed_at_most_once() {
    // Two records both discover the same related domain.
    let (dns, dns_calls) = ScriptedDnsProber::new(vec![
        ("example.com", ns_record("example.com", "ns.example.com")),
        ("example.com", cname_record("x.example.com", "ns.example.com")),
        ("ns.example.com", ns_record("ns.example.com", "example.com")),
    ]);

    let mut engine = Engine::new(EngineOpts::default());
    engine.add_domain_prober(Arc::new(dns));

    collect(engine.resolve("example.com", CancellationToken::new())).await;

    let calls = dns_calls.lock().unwrap();
    assert_that(&*calls).is_equal_to(&vec!["example.com".to_string(), "ns.example.com".to_string()]);
}
