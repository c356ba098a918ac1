// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! WHOIS lookups over plain TCP port 43.
//!
//! The responsible server is addressed via the `{tld}.whois-servers.net`
//! convention. The free-text banner is parsed into contacts: key-value lines
//! separated by `:`, contacts separated by blank lines, terminated by the
//! `>>> last update of whois database` marker. Keys and values are
//! lower-cased, which also loses the casing of human-readable registrant
//! names; this matches the upstream WHOIS presentation of most registries.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::error;

use crate::dissect;
use crate::probe::{DomainProber, ProbeKind, Resolution};

const WHOIS_PORT: u16 = 43;
const TERMINATOR: &str = ">>> last update of whois database";

macro_rules! whois_fields {
    ($($key:expr => $field:ident),+ $(,)?) => {
        /// One contact block from a WHOIS banner. Only recognized keys are
        /// retained; repeated keys are joined with `, `.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
        pub struct WhoisContact {
            $(
                #[serde(skip_serializing_if = "String::is_empty")]
                pub $field: String,
            )+
        }

        impl WhoisContact {
            fn set(&mut self, key: &str, value: &str) {
                let field = match key {
                    $($key => &mut self.$field,)+
                    _ => return,
                };
                if field.is_empty() {
                    field.push_str(value);
                } else {
                    field.push_str(", ");
                    field.push_str(value);
                }
            }

            pub fn is_empty(&self) -> bool {
                $(self.$field.is_empty())&&+
            }

            pub fn values(&self) -> Vec<&str> {
                vec![$(self.$field.as_str()),+]
            }

            /// Every recognized key with its stored value, in declaration order.
            pub fn fields(&self) -> Vec<(&'static str, &str)> {
                vec![$(($key, self.$field.as_str())),+]
            }
        }
    };
}

whois_fields! {
    "registry domain id" => registry_domain_id,
    "registrant" => registrant,
    "registrant organization" => registrant_organization,
    "registrant state/province" => registrant_state_province,
    "registrant country" => registrant_country,
    "registrar" => registrar,
    "registrar iana id" => registrar_iana_id,
    "registrar whois server" => registrar_whois_server,
    "registrar url" => registrar_url,
    "creation date" => creation_date,
    "updated date" => updated_date,
    "registered" => registered,
    "changed" => changed,
    "expire" => expire,
    "nsset" => nsset,
    "contact" => contact,
    "name" => name,
    "address" => address,
}

impl fmt::Display for WhoisContact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut entries: Vec<String> = Vec::new();
        if !self.name.is_empty() {
            entries.push(format!("name: {}", self.name));
        }
        if !self.address.is_empty() {
            entries.push(format!("address: {}", self.address));
        }
        if !self.registrant.is_empty() {
            entries.push(format!("registrant: {}", self.registrant));
        }
        if !self.registrant_organization.is_empty() {
            entries.push(format!("registrant organization: {}", self.registrant_organization));
        }
        if !self.registrant_country.is_empty() {
            entries.push(format!("registrant country: {}", self.registrant_country));
        } else if !self.registrant_state_province.is_empty() {
            entries.push(format!("registrant state/province: {}", self.registrant_state_province));
        }
        if entries.is_empty() {
            // No primary field set -> fall back to every populated field.
            for (key, value) in self.fields() {
                if !value.is_empty() {
                    entries.push(format!("{}: {}", key, value));
                }
            }
        }
        f.write_str(&entries.join(", "))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WhoisResolution {
    query: String,
    contacts: Vec<WhoisContact>,
}

impl WhoisResolution {
    pub fn new<S: Into<String>>(query: S, contacts: Vec<WhoisContact>) -> WhoisResolution {
        WhoisResolution {
            query: query.into(),
            contacts,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn contacts(&self) -> &[WhoisContact] {
        &self.contacts
    }

    /// Domains found in any contact field value.
    pub fn domains(&self) -> Vec<String> {
        self.contacts
            .iter()
            .flat_map(|contact| dissect::domains_from_strs(contact.values()))
            .collect()
    }
}

pub struct WhoisProber {
    timeout: Duration,
}

impl WhoisProber {
    pub fn new(timeout: Duration) -> WhoisProber {
        WhoisProber { timeout }
    }

    async fn fetch(&self, domain: &str) -> std::io::Result<String> {
        let tld = domain.rsplit('.').next().unwrap_or(domain);
        let server = format!("{}.whois-servers.net", tld);

        let mut stream = timeout(self.timeout, TcpStream::connect((server.as_str(), WHOIS_PORT))).await??;
        timeout(self.timeout, stream.write_all(format!("{}\r\n", domain).as_bytes())).await??;

        let mut body = Vec::new();
        timeout(self.timeout, stream.read_to_end(&mut body)).await??;
        Ok(String::from_utf8_lossy(&body).to_string())
    }
}

#[async_trait]
impl DomainProber for WhoisProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Whois
    }

    async fn probe_domain(&self, domain: &str) -> Resolution {
        let contacts = match self.fetch(domain).await {
            Ok(body) => parse_response(&body),
            Err(err) => {
                error!("WHOIS {} -> {}", domain, err);
                Vec::new()
            }
        };

        Resolution::Whois(WhoisResolution::new(domain, contacts))
    }
}

/// Parses a WHOIS banner with three parts: key-value pairs separated by a
/// colon, a `>>> Last update of WHOIS database: [date] <<<` line, and free
/// text legal disclaimers which are never reached.
pub fn parse_response(body: &str) -> Vec<WhoisContact> {
    let mut contacts: Vec<WhoisContact> = Vec::new();
    let mut contact = WhoisContact::default();

    for raw_line in body.lines() {
        let line = raw_line.trim_matches(|c| c == ' ' || c == '\n' || c == '\r' || c == '\t').to_lowercase();

        if line.is_empty() {
            // An empty line usually separates contacts -> start a new one.
            if !contact.is_empty() {
                contacts.push(std::mem::take(&mut contact));
            }
            continue;
        } else if line.starts_with('%') {
            // Comment/disclaimer -> skip.
            continue;
        } else if line.starts_with(TERMINATOR) {
            if !contact.is_empty() {
                contacts.push(std::mem::take(&mut contact));
            }
            break;
        }

        let (key, value) = match line.split_once(':') {
            Some(parts) => parts,
            None => continue,
        };
        let key = key.trim_matches(|c| c == ' ' || c == '\t');
        let value = value.trim_matches(|c| c == ' ' || c == '\t');
        if key.is_empty() || value.is_empty() {
            continue;
        }

        contact.set(key, value);
    }

    contacts
}

#[cfg(test)]
mod tests {
    use super::*;

    use spectral::prelude::*;

    #[test]
    fn parses_a_minimal_banner() {
        let body = "registry domain id: RID-1\nregistrant: Acme Inc\nregistrant country: US\n>>> Last update of WHOIS database: 2020-01-01 <<<";

        let contacts = parse_response(body);

        assert_that(&contacts).has_length(1);
        let contact = &contacts[0];
        assert_that(&contact.registry_domain_id).is_equal_to("rid-1".to_string());
        assert_that(&contact.registrant).is_equal_to("acme inc".to_string());
        assert_that(&contact.registrant_country).is_equal_to("us".to_string());
        assert_that(&contact.registrar).is_equal_to(String::new());
        assert_that(&contact.name).is_equal_to(String::new());
    }

    #[test]
    fn blank_lines_separate_contacts() {
        let body = "registrant: First\n\nregistrant: Second\n\n>>> Last update of WHOIS database: 2020-01-01 <<<";

        let contacts = parse_response(body);

        assert_that(&contacts).has_length(2);
        assert_that(&contacts[0].registrant).is_equal_to("first".to_string());
        assert_that(&contacts[1].registrant).is_equal_to("second".to_string());
    }

    #[test]
    fn repeated_keys_are_joined() {
        let body = "nsset: ns1.example.com\nnsset: ns2.example.com\n\n";

        let contacts = parse_response(body);

        assert_that(&contacts).has_length(1);
        assert_that(&contacts[0].nsset).is_equal_to("ns1.example.com, ns2.example.com".to_string());
    }

    #[test]
    fn comments_unknown_keys_and_empty_values_are_skipped() {
        let body = "% disclaimer\nnothing here\nfoo: bar\nregistrant:\nregistrar: Example Registrar\n\n";

        let contacts = parse_response(body);

        assert_that(&contacts).has_length(1);
        let contact = &contacts[0];
        assert_that(&contact.registrar).is_equal_to("example registrar".to_string());
        assert_that(&contact.registrant).is_equal_to(String::new());
    }

    #[test]
    fn parsing_stops_at_the_update_marker() {
        let body = "registrar: One\n\n>>> Last update of WHOIS database: 2020-01-01 <<<\nregistrar: Two\n\n";

        let contacts = parse_response(body);

        assert_that(&contacts).has_length(1);
        assert_that(&contacts[0].registrar).is_equal_to("one".to_string());
    }

    #[test]
    fn parsing_a_contacts_dump_yields_an_equal_contact() {
        let mut contact = WhoisContact::default();
        contact.set("registrant", "acme inc");
        contact.set("registrant country", "us");

        let dump = "registrant: acme inc\nregistrant country: us\n\n";
        let reparsed = parse_response(dump);

        assert_that(&reparsed).has_length(1);
        assert_that(&reparsed[0]).is_equal_to(&contact);
    }

    #[test]
    fn display_falls_back_to_all_populated_fields() {
        let mut contact = WhoisContact::default();
        contact.set("creation date", "2001-02-03");
        contact.set("expire", "2031-02-03");

        assert_that(&contact.to_string()).is_equal_to("creation date: 2001-02-03, expire: 2031-02-03".to_string());
    }

    #[test]
    fn display_prefers_the_primary_fields() {
        let mut contact = WhoisContact::default();
        contact.set("registrant", "acme inc");
        contact.set("creation date", "2001-02-03");

        assert_that(&contact.to_string()).is_equal_to("registrant: acme inc".to_string());
    }

    #[test]
    fn urls_keep_their_colons() {
        let body = "registrar url: https://registrar.example.org\n\n";

        let contacts = parse_response(body);

        assert_that(&contacts[0].registrar_url).is_equal_to("https://registrar.example.org".to_string());
    }

    #[test]
    fn domains_are_lifted_from_contact_values() {
        let body = "nsset: ns1.example.com\nregistrar url: https://registrar.example.org\n\n";

        let resolution = WhoisResolution::new("example.com", parse_response(body));

        let domains = resolution.domains();
        assert_that(&domains).contains("ns1.example.com".to_string());
        assert_that(&domains).contains("registrar.example.org".to_string());
    }
}
