// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The recursive crawl engine.
//!
//! One [`Engine::resolve`] call owns one crawl session: a domain queue, an IP
//! queue, the `seen` and `processed` sets, and the outbound channel. The
//! driver pops one query at a time and runs every registered prober for it
//! concurrently; each probe task streams its resolution to the caller and
//! feeds discovered domains and IPs back into the session. A discovered
//! domain is only followed when it is new and either the target of a CNAME
//! record or related to the query that surfaced it.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dissect::{self, DomainRelation};
use crate::probe::dns::{RData, RecordType, TrustDnsExchange};
use crate::probe::{
    BgpProber, CtProber, DnsProber, DomainProber, GeoProber, HttpProber, IpProber, PtrProber, Resolution, TlsProber,
    WhoisProber, DEFAULT_TIMEOUT,
};
use crate::Result;

/// Queue entries carry the recursion depth of their discovery.
const SEED_DEPTH: i32 = 0;

/// Options for one engine. The relatedness mode is a predicate value, not a
/// flag: callers may inject their own notion of "related".
#[derive(Clone)]
pub struct EngineOpts {
    /// Per-operation network timeout.
    pub timeout: Duration,
    /// Crawl depth bound; `-1` is unlimited, `0` probes the seed only.
    pub max_depth: i32,
    pub relation: DomainRelation,
    /// User-supplied name server for DNS probes instead of NS discovery.
    pub name_server: Option<String>,
    /// CT window start, `YYYY-MM-DD`. Defaults to one year ago.
    pub ct_since: Option<String>,
    /// Include expired CT logs.
    pub ct_expired: bool,
    pub geo_db_path: PathBuf,
    /// Bound of the outbound channel; producers block when the consumer lags.
    pub channel_capacity: usize,
}

impl Default for EngineOpts {
    fn default() -> Self {
        EngineOpts {
            timeout: DEFAULT_TIMEOUT,
            max_depth: -1,
            relation: dissect::default_relation(),
            name_server: None,
            ct_since: None,
            ct_expired: false,
            geo_db_path: PathBuf::from(crate::probe::geo::DEFAULT_GEO_DB),
            channel_capacity: 256,
        }
    }
}

/// The crawl engine: an aggregator over two collections of probers.
pub struct Engine {
    domain_probers: Vec<Arc<dyn DomainProber>>,
    ip_probers: Vec<Arc<dyn IpProber>>,
    opts: EngineOpts,
}

impl Engine {
    /// Creates an engine without any probers. Register them with
    /// [`Engine::add_domain_prober`] and [`Engine::add_ip_prober`] before
    /// calling [`Engine::resolve`].
    pub fn new(opts: EngineOpts) -> Engine {
        Engine {
            domain_probers: Vec::new(),
            ip_probers: Vec::new(),
            opts,
        }
    }

    /// Creates an engine provisioned with all supported probers.
    ///
    /// Fails when no local name server can be discovered or an HTTP client
    /// cannot be built.
    pub async fn with_default_probers(opts: EngineOpts) -> Result<Engine> {
        let exchange = Arc::new(TrustDnsExchange::from_system_config(opts.timeout).await?);

        let mut engine = Engine::new(opts);
        let opts = &engine.opts;

        let dns = DnsProber::new(exchange.clone()).with_name_server(opts.name_server.clone());
        let whois = WhoisProber::new(opts.timeout);
        let tls = TlsProber::new(opts.timeout);
        let http = HttpProber::new(opts.timeout)?;
        let ct_exclude = if opts.ct_expired { Some(String::new()) } else { None };
        let ct = CtProber::new(opts.timeout, opts.ct_since.clone(), ct_exclude)?;

        let ptr = PtrProber::new(exchange.clone());
        let bgp = BgpProber::new(exchange);
        let geo = GeoProber::new(&opts.geo_db_path);

        engine.add_domain_prober(Arc::new(dns));
        engine.add_domain_prober(Arc::new(whois));
        engine.add_domain_prober(Arc::new(tls));
        engine.add_domain_prober(Arc::new(http));
        engine.add_domain_prober(Arc::new(ct));

        engine.add_ip_prober(Arc::new(ptr));
        engine.add_ip_prober(Arc::new(bgp));
        engine.add_ip_prober(Arc::new(geo));

        Ok(engine)
    }

    pub fn add_domain_prober(&mut self, prober: Arc<dyn DomainProber>) {
        self.domain_probers.push(prober);
    }

    pub fn add_ip_prober(&mut self, prober: Arc<dyn IpProber>) {
        self.ip_probers.push(prober);
    }

    pub fn opts(&self) -> &EngineOpts {
        &self.opts
    }

    /// Runs resolution and recursive discovery for the given seed.
    ///
    /// Returns the receiving end of the result stream. The channel is closed
    /// when both queues are drained and every probe task has finished, or
    /// after `token` is cancelled. The seed is expected to be normalized, cf.
    /// [`dissect::clean_domain`].
    pub fn resolve(&self, seed: &str, token: CancellationToken) -> mpsc::Receiver<Resolution> {
        let (tx, rx) = mpsc::channel(self.opts.channel_capacity);

        let session = Arc::new(Session::new(seed, self.opts.relation.clone(), self.opts.max_depth));
        let domain_probers = self.domain_probers.clone();
        let ip_probers = self.ip_probers.clone();

        tokio::spawn(drive(session, domain_probers, ip_probers, tx, token));

        rx
    }
}

enum QueueItem {
    Domain(String, i32),
    Ip(String, i32),
}

struct CrawlState {
    domain_queue: VecDeque<(String, i32)>,
    ip_queue: VecDeque<(String, i32)>,
    seen: HashSet<String>,
    processed: HashSet<String>,
}

/// Per-crawl shared state. The queues and both sets live under one lock;
/// probe tasks touch them only at enqueue time.
struct Session {
    state: Mutex<CrawlState>,
    relation: DomainRelation,
    max_depth: i32,
}

impl Session {
    fn new(seed: &str, relation: DomainRelation, max_depth: i32) -> Session {
        let mut state = CrawlState {
            domain_queue: VecDeque::new(),
            ip_queue: VecDeque::new(),
            seen: HashSet::new(),
            processed: HashSet::new(),
        };
        state.domain_queue.push_back((seed.to_string(), SEED_DEPTH));
        state.seen.insert(seed.to_string());

        Session {
            state: Mutex::new(state),
            relation,
            max_depth,
        }
    }

    fn pop(&self) -> Option<QueueItem> {
        let mut state = self.state.lock().unwrap();
        if let Some((domain, depth)) = state.domain_queue.pop_front() {
            return Some(QueueItem::Domain(domain, depth));
        }
        state
            .ip_queue
            .pop_front()
            .map(|(ip, depth)| QueueItem::Ip(ip, depth))
    }

    /// Marks a query as processed; returns false when it already was, which
    /// skips the pop entirely.
    fn mark_processed(&self, query: &str) -> bool {
        self.state.lock().unwrap().processed.insert(query.to_string())
    }

    fn within_depth(&self, depth: i32) -> bool {
        self.max_depth < 0 || depth <= self.max_depth
    }

    /// Feeds one resolution's discoveries back into the crawl.
    ///
    /// Every newly seen domain is remembered, but only enqueued when it is a
    /// CNAME target of a DNS resolution or passes the relatedness predicate.
    /// Discovered IPs are enqueued unconditionally unless already processed.
    fn feed_back(&self, resolution: &Resolution, parent_depth: i32) {
        let depth = parent_depth + 1;

        for domain in resolution.domains() {
            {
                let mut state = self.state.lock().unwrap();
                if state.processed.contains(&domain) || !state.seen.insert(domain.clone()) {
                    continue;
                }
            }

            if !is_cname_or_related(&domain, resolution, &self.relation) {
                debug!(
                    "{}: Domain {} is not related to {} -> skipping",
                    resolution.kind(),
                    domain,
                    resolution.query()
                );
                continue;
            }
            if !self.within_depth(depth) {
                debug!("{}: Domain {} exceeds the crawl depth -> skipping", resolution.kind(), domain);
                continue;
            }

            debug!(
                "{}: Discovered a related domain {} via {}",
                resolution.kind(),
                domain,
                resolution.query()
            );
            self.state.lock().unwrap().domain_queue.push_back((domain, depth));
        }

        if !self.within_depth(depth) {
            return;
        }
        for ip in resolution.ips() {
            let mut state = self.state.lock().unwrap();
            if state.processed.contains(&ip) {
                continue;
            }
            state.ip_queue.push_back((ip, depth));
        }
    }
}

/// CNAME pointers are followed even when the relatedness heuristics reject
/// the target.
fn is_cname_or_related(domain: &str, resolution: &Resolution, relation: &DomainRelation) -> bool {
    if let Resolution::Dns(dns) = resolution {
        for pair in dns.records() {
            if pair.record.rr_type() != RecordType::CNAME {
                continue;
            }
            if let RData::CNAME(target) = pair.record.rdata() {
                if dissect::clean_domain(target) == domain {
                    return true;
                }
            }
        }
    }

    (relation)(domain, resolution.query())
}

async fn drive(
    session: Arc<Session>,
    domain_probers: Vec<Arc<dyn DomainProber>>,
    ip_probers: Vec<Arc<dyn IpProber>>,
    tx: mpsc::Sender<Resolution>,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            info!("Crawl cancelled");
            break;
        }

        let item = match session.pop() {
            Some(item) => item,
            None => break,
        };

        match item {
            QueueItem::Domain(domain, depth) => {
                if !session.mark_processed(&domain) {
                    continue;
                }
                let tasks: Vec<_> = domain_probers
                    .iter()
                    .map(|prober| {
                        let prober = prober.clone();
                        let domain = domain.clone();
                        let session = session.clone();
                        let tx = tx.clone();
                        let token = token.clone();
                        tokio::spawn(async move {
                            let resolution = tokio::select! {
                                _ = token.cancelled() => return,
                                resolution = prober.probe_domain(&domain) => resolution,
                            };
                            session.feed_back(&resolution, depth);
                            // A closed channel means the consumer is gone;
                            // the driver stops on the cancelled token.
                            let _ = tx.send(resolution).await;
                        })
                    })
                    .collect();
                futures::future::join_all(tasks).await;
            }
            QueueItem::Ip(ip, depth) => {
                if !session.mark_processed(&ip) {
                    continue;
                }
                let tasks: Vec<_> = ip_probers
                    .iter()
                    .map(|prober| {
                        let prober = prober.clone();
                        let ip = ip.clone();
                        let session = session.clone();
                        let tx = tx.clone();
                        let token = token.clone();
                        tokio::spawn(async move {
                            let resolution = tokio::select! {
                                _ = token.cancelled() => return,
                                resolution = prober.probe_ip(&ip) => resolution,
                            };
                            session.feed_back(&resolution, depth);
                            let _ = tx.send(resolution).await;
                        })
                    })
                    .collect();
                futures::future::join_all(tasks).await;
            }
        }
    }
    // All probe tasks have joined; dropping the last sender closes the stream.
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::probe::dns::{DnsResolution, Record};
    use crate::probe::PtrResolution;

    use spectral::prelude::*;

    fn dns_resolution_with_cname(query: &str, target: &str) -> Resolution {
        let mut resolution = DnsResolution::new(query, "local resolver");
        resolution.add_record(
            RecordType::A,
            Record::new(query, RecordType::CNAME, 300, RData::CNAME(target.to_string())),
        );
        Resolution::Dns(resolution)
    }

    #[test]
    fn cname_targets_are_followed_even_when_unrelated() {
        let resolution = dns_resolution_with_cname("all.tens.ten", "all.twenties.twenty");

        let followed = is_cname_or_related("all.twenties.twenty", &resolution, &dissect::default_relation());

        assert_that(&followed).is_true();
    }

    #[test]
    fn unrelated_domains_without_cname_are_rejected() {
        let resolution = Resolution::Ptr(PtrResolution::new("192.0.2.1", vec!["host.example.com".to_string()]));

        let followed = is_cname_or_related("host.other.org", &resolution, &dissect::default_relation());

        assert_that(&followed).is_false();
    }

    #[test]
    fn ip_queries_never_relate_to_hostnames() {
        let resolution = Resolution::Ptr(PtrResolution::new("192.0.2.1", Vec::new()));

        // PTR queries are IPs; relatedness compares against the query string.
        let followed = is_cname_or_related("host.example.com", &resolution, &dissect::default_relation());

        assert_that(&followed).is_false();
    }

    #[test]
    fn seed_is_seen_and_queued() {
        let session = Session::new("example.com", dissect::default_relation(), -1);

        let popped = session.pop();

        assert_that(&matches!(popped, Some(QueueItem::Domain(ref d, 0)) if d == "example.com")).is_true();
        assert_that(&session.pop().is_none()).is_true();
    }

    #[test]
    fn processed_queries_are_popped_once() {
        let session = Session::new("example.com", dissect::default_relation(), -1);

        assert_that(&session.mark_processed("example.com")).is_true();
        assert_that(&session.mark_processed("example.com")).is_false();
    }

    #[test]
    fn depth_bound_rejects_discoveries_beyond_the_limit() {
        let session = Session::new("example.com", dissect::default_relation(), 0);
        session.mark_processed("example.com");

        let resolution = dns_resolution_with_cname("example.com", "next.example.com");
        session.feed_back(&resolution, 0);

        assert_that(&session.pop().is_none()).is_true();
    }
}
