//! Per-line output of the resolution stream.
//!
//! Every payload item becomes one line prefixed by the probe kind and the
//! query, either human-readable via the payload's `Display` or as JSON.

use anyhow::Result;
use serde::Serialize;

use crate::probe::Resolution;

#[derive(Debug, Clone, Copy)]
pub struct OutputConfig {
    pub json: bool,
}

pub fn print(config: &OutputConfig, resolution: &Resolution) -> Result<()> {
    let kind = resolution.kind();
    let query = resolution.query();

    match resolution {
        Resolution::Dns(dns) => {
            for pair in dns.records() {
                let line = format_payload(config, &pair.record, &pair.record.to_string())?;
                println!("{}: {} {} -> {}", kind, pair.query_type, query, line);
            }
            if dns.dnssec_signed() {
                println!("{}: {} is DNSSEC signed", kind, query);
            }
            if let Some(dmarc) = dns.dmarc() {
                let line = format_payload(config, dmarc, &dmarc.to_string())?;
                println!("{}: DMARC {} -> {}", kind, query, line);
            }
        }
        Resolution::Ptr(ptr) => {
            for hostname in ptr.hostnames() {
                println!("{}: {} -> {}", kind, query, hostname);
            }
        }
        Resolution::Whois(whois) => {
            for contact in whois.contacts() {
                let line = format_payload(config, contact, &contact.to_string())?;
                println!("{}: {} -> {}", kind, query, line);
            }
        }
        Resolution::Tls(tls) => {
            for certificate in tls.certificates() {
                let line = format_payload(config, certificate, &certificate.to_string())?;
                println!("{}: {} -> {}", kind, query, line);
            }
        }
        Resolution::Http(http) => {
            for header in http.headers() {
                let line = format_payload(config, header, &header.to_string())?;
                println!("{}: {} -> {}", kind, query, line);
            }
            for domain in http.security_txt_domains() {
                println!("{}: {} security.txt -> {}", kind, query, domain);
            }
            for domain in http.robots_txt_domains() {
                println!("{}: {} robots.txt -> {}", kind, query, domain);
            }
        }
        Resolution::Ct(ct) => {
            for log in ct.logs() {
                let line = format_payload(config, log, &log.to_string())?;
                println!("{}: {} -> {}", kind, query, line);
            }
        }
        Resolution::Bgp(bgp) => {
            for record in bgp.records() {
                let line = format_payload(config, record, &record.to_string())?;
                println!("{}: {} -> {}", kind, query, line);
            }
        }
        Resolution::Geo(geo) => {
            if let Some(record) = geo.record() {
                let line = format_payload(config, record, &record.to_string())?;
                println!("{}: {} -> {}", kind, query, line);
            }
        }
    }

    Ok(())
}

fn format_payload<T: Serialize>(config: &OutputConfig, payload: &T, display: &str) -> Result<String> {
    if config.json {
        Ok(serde_json::to_string(payload)?)
    } else {
        Ok(display.to_string())
    }
}
