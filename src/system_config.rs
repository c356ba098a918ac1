// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;

use resolv_conf::{Config, ScopedIp};

use crate::{Error, Result};

/// Returns the first name server listed in `/etc/resolv.conf`.
///
/// This is the only fatal startup path: a host without a usable resolver
/// cannot run any probe.
pub fn local_name_server() -> Result<IpAddr> {
    local_name_server_from_path("/etc/resolv.conf")
}

pub fn local_name_server_from_path<P: AsRef<Path>>(path: P) -> Result<IpAddr> {
    let mut buf = Vec::with_capacity(4096);
    let mut f = File::open(path)?;
    f.read_to_end(&mut buf)?;
    let cfg = Config::parse(&buf).map_err(|e| Error::ParserError {
        what: "resolv.conf".to_string(),
        to: "Config",
        why: e.to_string(),
    })?;

    cfg.nameservers
        .into_iter()
        .next()
        .map(|scoped| match scoped {
            ScopedIp::V4(ip) => IpAddr::V4(ip),
            ScopedIp::V6(ip, _) => IpAddr::V6(ip),
        })
        .ok_or(Error::NoLocalNameServer)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn first_name_server_wins() {
        let mut file = tempfile();
        writeln!(file.1, "nameserver 192.0.2.53\nnameserver 192.0.2.54").unwrap();

        let ns = local_name_server_from_path(&file.0).unwrap();

        assert_eq!(ns, "192.0.2.53".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn no_name_server_is_an_error() {
        let mut file = tempfile();
        writeln!(file.1, "search example.com").unwrap();

        let res = local_name_server_from_path(&file.0);

        assert!(matches!(res, Err(Error::NoLocalNameServer)));
    }

    fn tempfile() -> (std::path::PathBuf, File) {
        let path = std::env::temp_dir().join(format!(
            "deepdig-resolv-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let file = File::create(&path).unwrap();
        (path, file)
    }
}
