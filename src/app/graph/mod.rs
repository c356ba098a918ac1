//! Collects the resolution stream into a typed discovery graph.
//!
//! Nodes are domains, IPs, autonomous systems, countries, and WHOIS
//! contacts; edges carry the protocol that surfaced them. The collected
//! graph renders as Graphviz DOT, JSON, or a terminal tree.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::Serialize;

use crate::dissect;
use crate::probe::Resolution;

pub mod dot;
pub mod json;
pub mod term;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Dot,
    Json,
    Term,
}

impl FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dot" => Ok(GraphFormat::Dot),
            "json" => Ok(GraphFormat::Json),
            "term" => Ok(GraphFormat::Term),
            other => Err(format!("unknown graph format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Domain,
    Ip,
    Asn,
    Country,
    Whois,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub label: String,
}

#[derive(Debug)]
pub struct Graph {
    seed: String,
    nodes: BTreeMap<String, NodeKind>,
    edges: BTreeSet<Edge>,
}

impl Graph {
    pub fn new<S: Into<String>>(seed: S) -> Graph {
        let seed = seed.into();
        let mut nodes = BTreeMap::new();
        nodes.insert(seed.clone(), NodeKind::Domain);
        Graph {
            seed,
            nodes,
            edges: BTreeSet::new(),
        }
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn nodes(&self) -> &BTreeMap<String, NodeKind> {
        &self.nodes
    }

    pub fn edges(&self) -> &BTreeSet<Edge> {
        &self.edges
    }

    fn set_node(&mut self, id: &str, kind: NodeKind) {
        self.nodes.entry(id.to_string()).or_insert(kind);
    }

    fn add_edge(&mut self, from: &str, to: &str, label: &str, kind: NodeKind) {
        if to.is_empty() || to == from {
            return;
        }
        self.set_node(to, kind);
        self.edges.insert(Edge {
            from: from.to_string(),
            to: to.to_string(),
            label: label.to_string(),
        });
    }

    fn add_edges<I: IntoIterator<Item = String>>(&mut self, from: &str, targets: I, label: &str, kind: NodeKind) {
        for target in targets {
            self.add_edge(from, &target, label, kind);
        }
    }

    /// Folds one resolution into the graph.
    pub fn record(&mut self, resolution: &Resolution) {
        let query = resolution.query().to_string();

        match resolution {
            Resolution::Dns(dns) => {
                self.set_node(&query, NodeKind::Domain);
                for pair in dns.records() {
                    let label = format!("DNS/{}", pair.record.rr_type());
                    self.add_edges(&query, pair.record.referenced_domains(), &label, NodeKind::Domain);
                    self.add_edges(&query, pair.record.referenced_ips(), &label, NodeKind::Ip);
                }
            }
            Resolution::Ptr(ptr) => {
                self.set_node(&query, NodeKind::Ip);
                self.add_edges(&query, ptr.domains(), "PTR", NodeKind::Domain);
            }
            Resolution::Tls(tls) => {
                self.set_node(&query, NodeKind::Domain);
                for cert in tls.certificates() {
                    self.add_edges(&query, dissect::domains_from_strs(&cert.dns_names), "TLS/SAN", NodeKind::Domain);
                    self.add_edges(
                        &query,
                        dissect::domains_from_strs(&cert.crl_distribution_points),
                        "TLS/CRL",
                        NodeKind::Domain,
                    );
                    self.add_edges(&query, dissect::domains_from_str(&cert.issuer), "TLS/Issuer", NodeKind::Domain);
                    self.add_edges(&query, dissect::domains_from_str(&cert.subject), "TLS/CN", NodeKind::Domain);
                }
            }
            Resolution::Ct(ct) => {
                self.set_node(&query, NodeKind::Domain);
                for log in ct.logs() {
                    self.add_edges(&query, dissect::domains_from_str(&log.log.name_value), "CT", NodeKind::Domain);
                }
            }
            Resolution::Http(http) => {
                self.set_node(&query, NodeKind::Domain);
                for header in http.headers() {
                    let label = format!("HTTP/{}", header.name);
                    self.add_edges(&query, dissect::domains_from_strs(&header.values), &label, NodeKind::Domain);
                }
                self.add_edges(
                    &query,
                    http.security_txt_domains().to_vec(),
                    "HTTP/security.txt",
                    NodeKind::Domain,
                );
                self.add_edges(&query, http.robots_txt_domains().to_vec(), "HTTP/robots.txt", NodeKind::Domain);
            }
            Resolution::Whois(whois) => {
                self.set_node(&query, NodeKind::Domain);
                self.add_edges(&query, resolution.domains(), "WHOIS", NodeKind::Domain);
                for contact in whois.contacts() {
                    let summary = contact.to_string();
                    self.add_edges(&query, dissect::ips_from_str(&summary), "WHOIS", NodeKind::Ip);
                    self.add_edge(&query, &summary, "WHOIS/contact", NodeKind::Whois);
                }
            }
            Resolution::Bgp(bgp) => {
                self.set_node(&query, NodeKind::Ip);
                for record in bgp.records() {
                    let node = if record.name.is_empty() {
                        format!("AS{}", record.asn)
                    } else {
                        format!("AS{} ({})", record.asn, record.name)
                    };
                    let label = if record.bgp_prefix.is_empty() {
                        "BGP".to_string()
                    } else {
                        format!("BGP/{}", record.bgp_prefix)
                    };
                    self.add_edge(&query, &node, &label, NodeKind::Asn);
                }
            }
            Resolution::Geo(geo) => {
                self.set_node(&query, NodeKind::Ip);
                if let Some(record) = geo.record() {
                    self.add_edge(&query, &record.country_code, "GEO", NodeKind::Country);
                }
            }
        }
    }

    pub fn render(&self, format: GraphFormat) -> String {
        match format {
            GraphFormat::Dot => dot::render(self),
            GraphFormat::Json => json::render(self),
            GraphFormat::Term => term::render(self),
        }
    }
}
