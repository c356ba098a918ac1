// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The single seam between this crate and the wire: a query capability that
//! the DNS, PTR, and BGP probers share. Tests inject a stub implementation
//! instead of patching process-global state.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lru_time_cache::LruCache;
use thiserror::Error;
use tracing::{debug, trace};
use trust_dns_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::proto::xfer::DnsRequestOptions;
use trust_dns_resolver::TokioAsyncResolver;

use crate::probe::dns::records::{Record, RecordType};
use crate::system_config;
use crate::Result;

const SERVER_RESOLVER_CACHE_SIZE: usize = 256;

/// Where a query is sent: the local resolver from `/etc/resolv.conf`, or a
/// specific name server addressed by host name on port 53.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryTarget {
    Local,
    Server(String),
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryTarget::Local => f.write_str("local resolver"),
            QueryTarget::Server(name) => write!(f, "{}:53", name),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    /// NXDOMAIN or an answer without matching records. A protocol-level
    /// negative, not a failure.
    #[error("no records found")]
    NxDomain,
    #[error("timeout")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Protocol(String),
}

pub type QueryResult = std::result::Result<Vec<Record>, QueryError>;

#[async_trait]
pub trait DnsExchange: Send + Sync {
    async fn query(&self, name: &str, record_type: RecordType, target: &QueryTarget) -> QueryResult;
}

/// Production [`DnsExchange`] on top of trust-dns.
///
/// One resolver is bound to the local name server; every distinct
/// [`QueryTarget::Server`] gets its own resolver whose address is looked up
/// via the local one and then cached.
pub struct TrustDnsExchange {
    local: Arc<TokioAsyncResolver>,
    timeout: Duration,
    server_resolvers: Mutex<LruCache<String, Arc<TokioAsyncResolver>>>,
}

impl TrustDnsExchange {
    /// Creates an exchange whose local resolver comes from `/etc/resolv.conf`.
    ///
    /// Fails when no local name server can be discovered; this is the only
    /// fatal startup path of the crate.
    pub async fn from_system_config(timeout: Duration) -> Result<TrustDnsExchange> {
        let ip = system_config::local_name_server()?;
        Self::new(ip, timeout).await
    }

    pub async fn new(local_name_server: IpAddr, timeout: Duration) -> Result<TrustDnsExchange> {
        let local = build_resolver(SocketAddr::new(local_name_server, 53), timeout).await?;
        Ok(TrustDnsExchange {
            local: Arc::new(local),
            timeout,
            server_resolvers: Mutex::new(LruCache::with_capacity(SERVER_RESOLVER_CACHE_SIZE)),
        })
    }

    async fn resolver_for(&self, server: &str) -> std::result::Result<Arc<TokioAsyncResolver>, QueryError> {
        {
            let mut cache = self.server_resolvers.lock().unwrap();
            if let Some(resolver) = cache.get(server) {
                return Ok(resolver.clone());
            }
        }

        let ip = self
            .local
            .lookup_ip(server)
            .await
            .map_err(to_query_error)?
            .iter()
            .next()
            .ok_or(QueryError::NxDomain)?;
        trace!("Name server {} resolved to {}", server, ip);

        let resolver = Arc::new(
            build_resolver(SocketAddr::new(ip, 53), self.timeout)
                .await
                .map_err(|e| QueryError::Network(e.to_string()))?,
        );

        let mut cache = self.server_resolvers.lock().unwrap();
        cache.insert(server.to_string(), resolver.clone());
        Ok(resolver)
    }
}

#[async_trait]
impl DnsExchange for TrustDnsExchange {
    async fn query(&self, name: &str, record_type: RecordType, target: &QueryTarget) -> QueryResult {
        let resolver = match target {
            QueryTarget::Local => self.local.clone(),
            QueryTarget::Server(server) => self.resolver_for(server).await?,
        };

        let options = DnsRequestOptions {
            expects_multiple_responses: false,
            use_edns: false,
        };
        trace!("Sending query for '{}', record type {} to {}", name, record_type, target);
        let lookup = resolver
            .lookup(name, record_type.into(), options)
            .await
            .map_err(to_query_error)?;

        let records: Vec<Record> = lookup.record_iter().map(Record::from).collect();
        debug!(
            "Query for '{}', record type {} at {} returned {} records",
            name,
            record_type,
            target,
            records.len()
        );
        Ok(records)
    }
}

async fn build_resolver(socket_addr: SocketAddr, timeout: Duration) -> Result<TokioAsyncResolver> {
    let mut config = ResolverConfig::new();
    config.add_name_server(NameServerConfig {
        socket_addr,
        protocol: Protocol::Udp,
        trust_nx_responses: true,
        tls_dns_name: None,
    });
    let opts = ResolverOpts {
        timeout,
        attempts: 1,
        ndots: 1,
        preserve_intermediates: false,
        ..Default::default()
    };
    let resolver = TokioAsyncResolver::tokio(config, opts)?;
    Ok(resolver)
}

fn to_query_error(err: trust_dns_resolver::error::ResolveError) -> QueryError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => QueryError::NxDomain,
        ResolveErrorKind::Timeout => QueryError::Timeout,
        ResolveErrorKind::Io(e) => QueryError::Network(e.to_string()),
        ResolveErrorKind::Proto(e) => QueryError::Network(e.to_string()),
        _ => QueryError::Protocol(err.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted [`DnsExchange`] for prober tests: canned answers, recorded
    //! calls, NXDOMAIN for everything unscripted.

    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    pub(crate) struct ScriptedExchange {
        answers: HashMap<(String, RecordType, QueryTarget), Vec<Record>>,
        calls: Mutex<Vec<(String, RecordType, QueryTarget)>>,
    }

    impl ScriptedExchange {
        pub(crate) fn new() -> ScriptedExchange {
            ScriptedExchange::default()
        }

        pub(crate) fn answer(
            mut self,
            name: &str,
            record_type: RecordType,
            target: QueryTarget,
            records: Vec<Record>,
        ) -> ScriptedExchange {
            self.answers.insert((name.to_string(), record_type, target), records);
            self
        }

        pub(crate) fn calls(&self) -> Vec<(String, RecordType, QueryTarget)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DnsExchange for ScriptedExchange {
        async fn query(&self, name: &str, record_type: RecordType, target: &QueryTarget) -> QueryResult {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), record_type, target.clone()));
            match self.answers.get(&(name.to_string(), record_type, target.clone())) {
                Some(records) => Ok(records.clone()),
                None => Err(QueryError::NxDomain),
            }
        }
    }
}
