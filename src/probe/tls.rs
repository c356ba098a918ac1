// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! TLS handshake probing.
//!
//! Connects to `<domain>:443` and captures the certificate chain exactly as
//! the peer presents it. Certificate verification is deliberately disabled:
//! an invalid or expired chain still names infrastructure worth crawling.

use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, error};
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::parse_x509_certificate;

use crate::dissect;
use crate::probe::{DomainProber, ProbeKind, Resolution};

const HTTPS_PORT: u16 = 443;

struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// The fields of interest of one presented certificate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TlsCertificate {
    pub subject: String,
    pub issuer: String,
    pub dns_names: Vec<String>,
    pub email_addresses: Vec<String>,
    pub uris: Vec<String>,
    pub crl_distribution_points: Vec<String>,
    pub permitted_names: Vec<String>,
    pub excluded_names: Vec<String>,
}

impl TlsCertificate {
    fn from_der(der: &[u8]) -> Option<TlsCertificate> {
        let (_, cert) = parse_x509_certificate(der).ok()?;

        let mut parsed = TlsCertificate {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            ..Default::default()
        };

        for extension in cert.extensions() {
            match extension.parsed_extension() {
                ParsedExtension::SubjectAlternativeName(san) => {
                    for name in &san.general_names {
                        match name {
                            GeneralName::DNSName(dns) => parsed.dns_names.push((*dns).to_string()),
                            GeneralName::RFC822Name(mail) => parsed.email_addresses.push((*mail).to_string()),
                            GeneralName::URI(uri) => parsed.uris.push((*uri).to_string()),
                            _ => {}
                        }
                    }
                }
                ParsedExtension::CRLDistributionPoints(points) => {
                    for point in points {
                        if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                            for name in names {
                                if let Some(value) = general_name_value(name) {
                                    parsed.crl_distribution_points.push(value);
                                }
                            }
                        }
                    }
                }
                ParsedExtension::NameConstraints(constraints) => {
                    if let Some(subtrees) = &constraints.permitted_subtrees {
                        for subtree in subtrees {
                            if let Some(value) = general_name_value(&subtree.base) {
                                parsed.permitted_names.push(value);
                            }
                        }
                    }
                    if let Some(subtrees) = &constraints.excluded_subtrees {
                        for subtree in subtrees {
                            if let Some(value) = general_name_value(&subtree.base) {
                                parsed.excluded_names.push(value);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Some(parsed)
    }

    /// Every certificate field that can name a domain, run through the
    /// extractor.
    pub fn referenced_domains(&self) -> Vec<String> {
        let mut haystack: Vec<&str> = Vec::new();
        haystack.extend(self.crl_distribution_points.iter().map(String::as_str));
        haystack.extend(self.dns_names.iter().map(String::as_str));
        haystack.extend(self.email_addresses.iter().map(String::as_str));
        haystack.extend(self.uris.iter().map(String::as_str));
        haystack.extend(self.permitted_names.iter().map(String::as_str));
        haystack.extend(self.excluded_names.iter().map(String::as_str));
        haystack.push(&self.subject);
        haystack.push(&self.issuer);
        dissect::domains_from_strs(haystack)
    }
}

impl fmt::Display for TlsCertificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "subject: {}, issuer: {}, domains: [{}]",
            self.subject,
            self.issuer,
            self.dns_names.join(", ")
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TlsResolution {
    query: String,
    certificates: Vec<TlsCertificate>,
}

impl TlsResolution {
    pub fn new<S: Into<String>>(query: S, certificates: Vec<TlsCertificate>) -> TlsResolution {
        TlsResolution {
            query: query.into(),
            certificates,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn certificates(&self) -> &[TlsCertificate] {
        &self.certificates
    }

    pub fn domains(&self) -> Vec<String> {
        self.certificates
            .iter()
            .flat_map(|cert| cert.referenced_domains())
            .collect()
    }
}

pub struct TlsProber {
    timeout: Duration,
    connector: TlsConnector,
}

impl TlsProber {
    pub fn new(timeout: Duration) -> TlsProber {
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();

        TlsProber {
            timeout,
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    async fn fetch_chain(&self, domain: &str) -> std::io::Result<Vec<TlsCertificate>> {
        let server_name = ServerName::try_from(domain)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

        let tcp = timeout(self.timeout, TcpStream::connect((domain, HTTPS_PORT))).await??;
        let tls = timeout(self.timeout, self.connector.connect(server_name, tcp)).await??;

        let (_, connection) = tls.get_ref();
        let chain = connection
            .peer_certificates()
            .unwrap_or_default()
            .iter()
            .filter_map(|cert| TlsCertificate::from_der(&cert.0))
            .collect();
        Ok(chain)
    }
}

#[async_trait]
impl DomainProber for TlsProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Tls
    }

    async fn probe_domain(&self, domain: &str) -> Resolution {
        let certificates = match self.fetch_chain(domain).await {
            Ok(chain) => {
                debug!("TLS {} presented {} certificates", domain, chain.len());
                chain
            }
            Err(err) => {
                error!("TLS {} -> {}", domain, err);
                Vec::new()
            }
        };

        Resolution::Tls(TlsResolution::new(domain, certificates))
    }
}

fn general_name_value(name: &GeneralName) -> Option<String> {
    match name {
        GeneralName::DNSName(dns) => Some((*dns).to_string()),
        GeneralName::RFC822Name(mail) => Some((*mail).to_string()),
        GeneralName::URI(uri) => Some((*uri).to_string()),
        GeneralName::DirectoryName(dir) => Some(dir.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use spectral::prelude::*;

    #[test]
    fn certificate_fields_are_run_through_the_extractor() {
        let cert = TlsCertificate {
            subject: "CN=www.example.com, O=Example Org".to_string(),
            issuer: "CN=ca.issuer.net".to_string(),
            dns_names: vec!["example.com".to_string(), "*.cdn.example.com".to_string()],
            email_addresses: vec!["hostmaster@mail.example.org".to_string()],
            uris: vec!["https://crl.example.io/revoked".to_string()],
            crl_distribution_points: vec!["http://crl.pki.example.net/root.crl".to_string()],
            permitted_names: Vec::new(),
            excluded_names: Vec::new(),
        };

        let domains = cert.referenced_domains();

        assert_that(&domains).contains("example.com".to_string());
        assert_that(&domains).contains("cdn.example.com".to_string());
        assert_that(&domains).contains("mail.example.org".to_string());
        assert_that(&domains).contains("crl.example.io".to_string());
        assert_that(&domains).contains("crl.pki.example.net".to_string());
        assert_that(&domains).contains("ca.issuer.net".to_string());
    }
}
