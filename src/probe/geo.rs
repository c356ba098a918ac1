// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! GeoIP lookups in a local IP2Location DB1 database.
//!
//! The database is opened once at construction. When it cannot be opened the
//! prober stays registered but permanently disabled, so a missing database
//! file degrades the crawl instead of failing it.

use std::env;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use ip2location::DB;
use lru_time_cache::LruCache;
use serde::Serialize;
use tracing::{debug, error};

use crate::probe::{IpProber, ProbeKind, Resolution};

/// Default database file name, looked up next to the working directory and
/// the executable.
pub const DEFAULT_GEO_DB: &str = "IP2LOCATION-LITE-DB1.IPV6.BIN";

const CACHE_SIZE: usize = 65536;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeoRecord {
    pub country_code: String,
}

impl fmt::Display for GeoRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "country code: {}", self.country_code)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeoResolution {
    query: String,
    record: Option<GeoRecord>,
}

impl GeoResolution {
    pub fn new<S: Into<String>>(query: S, record: Option<GeoRecord>) -> GeoResolution {
        GeoResolution {
            query: query.into(),
            record,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn record(&self) -> Option<&GeoRecord> {
        self.record.as_ref()
    }
}

pub struct GeoProber {
    db: Option<Mutex<DB>>,
    cache: Mutex<LruCache<String, Option<GeoRecord>>>,
}

impl GeoProber {
    pub fn new<P: AsRef<Path>>(db_path: P) -> GeoProber {
        let located = locate_database(db_path.as_ref());
        let db = match DB::from_file(&located) {
            Ok(db) => Some(Mutex::new(db)),
            Err(err) => {
                error!("Cannot use IP2Location DB at '{}' -> {:?}", located.display(), err);
                None
            }
        };

        GeoProber {
            db,
            cache: Mutex::new(LruCache::with_capacity(CACHE_SIZE)),
        }
    }

    fn lookup(&self, ip: &str) -> Option<GeoRecord> {
        let addr: IpAddr = match ip.parse() {
            Ok(addr) => addr,
            Err(_) => {
                error!("IP {} is invalid", ip);
                return None;
            }
        };

        let db = self.db.as_ref()?;
        let guard = db.lock().unwrap();
        let record = match guard.ip_lookup(addr) {
            Ok(record) => record,
            Err(err) => {
                debug!("Could not query DB for IP {} -> {:?}", ip, err);
                return None;
            }
        };

        match record {
            ip2location::Record::LocationDb(location) => location.country.map(|country| GeoRecord {
                country_code: country.short_name.to_string(),
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl IpProber for GeoProber {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Geo
    }

    async fn probe_ip(&self, ip: &str) -> Resolution {
        if let Some(record) = self.cache.lock().unwrap().get(ip) {
            return Resolution::Geo(GeoResolution::new(ip, record.clone()));
        }

        let record = self.lookup(ip);
        self.cache.lock().unwrap().insert(ip.to_string(), record.clone());

        Resolution::Geo(GeoResolution::new(ip, record))
    }
}

/// Absolute paths are used as given; relative paths are checked against the
/// working directory first and the directory of the executable second.
fn locate_database(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    if let Ok(cwd) = env::current_dir() {
        let candidate = cwd.join(path);
        if candidate.exists() {
            return candidate;
        }
    }

    if let Ok(executable) = env::current_exe() {
        if let Some(dir) = executable.parent() {
            return dir.join(path);
        }
    }

    path.to_path_buf()
}
