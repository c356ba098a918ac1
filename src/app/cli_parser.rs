use std::str::FromStr;

use chrono::NaiveDate;
use clap::{crate_name, App, AppSettings, Arg};

pub static SUPPORTED_GRAPH_FORMATS: &[&str] = &["dot", "json", "term"];

pub fn create_parser() -> App<'static, 'static> {
    App::new(crate_name!())
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .global_setting(AppSettings::DeriveDisplayOrder)
        .global_setting(AppSettings::DisableVersion)
        .arg(
            Arg::with_name("domain")
                .short("d")
                .long("domain")
                .value_name("DOMAIN")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Domain to resolve"),
        )
        .arg(
            Arg::with_name("version")
                .short("v")
                .long("version")
                .help("Prints version and exits"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("V")
                .long("verbose")
                .help("Uses debug verbosity"),
        )
        .arg(
            Arg::with_name("strict")
                .short("s")
                .long("strict")
                .help("Only crawls related domains whose TLD matches as well"),
        )
        .arg(
            Arg::with_name("timeout")
                .short("t")
                .long("timeout")
                .value_name("SECONDS")
                .takes_value(true)
                .validator(|str| u64::from_str(&str).map(|_| ()).map_err(|_| "invalid number of seconds".to_string()))
                .help("Sets the timeout of every network operation"),
        )
        .arg(
            Arg::with_name("ct-expired")
                .long("ct:expired")
                .help("Includes expired Certificate Transparency logs"),
        )
        .arg(
            Arg::with_name("ct-from")
                .long("ct:from")
                .value_name("YYYY-MM-DD")
                .takes_value(true)
                .validator(|str| {
                    NaiveDate::parse_from_str(&str, "%Y-%m-%d")
                        .map(|_| ())
                        .map_err(|_| "invalid date, expected YYYY-MM-DD".to_string())
                })
                .help("Ignores Certificate Transparency logs older than the given date"),
        )
        .arg(Arg::with_name("json").long("json").help("Prints result payloads as JSON"))
        .arg(
            Arg::with_name("graph")
                .long("graph")
                .value_name("FORMAT")
                .takes_value(true)
                .possible_values(SUPPORTED_GRAPH_FORMATS)
                .help("Emits a discovery graph instead of per-line output"),
        )
        .arg(
            Arg::with_name("max-depth")
                .long("max-depth")
                .value_name("NUMBER")
                .takes_value(true)
                .allow_hyphen_values(true)
                .validator(|str| i32::from_str(&str).map(|_| ()).map_err(|_| "invalid number".to_string()))
                .help("Limits recursive discovery depth; -1 is unlimited, 0 probes the seed only"),
        )
        .arg(
            Arg::with_name("geo-db")
                .long("geo-db")
                .value_name("FILE")
                .takes_value(true)
                .help("Uses an alternative IP2Location DB1 database file"),
        )
}
