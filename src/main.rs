// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ArgMatches;
use tokio_util::sync::CancellationToken;
use tracing::error;

use deepdig::app::graph::{Graph, GraphFormat};
use deepdig::app::output::{self, OutputConfig};
use deepdig::app::{cli_parser, logging::Logging};
use deepdig::dissect;
use deepdig::engine::{Engine, EngineOpts};

#[tokio::main]
async fn main() {
    let args = cli_parser::create_parser().get_matches();

    if args.is_present("version") {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return;
    }

    let verbosity = if args.is_present("verbose") { 2 } else { 1 };
    if let Err(err) = Logging::new(verbosity, std::env::var_os("RUST_LOG")).start() {
        eprintln!("Failed to start logging: {:#}", err);
        std::process::exit(1);
    }

    match run(&args).await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    }
}

async fn run(args: &ArgMatches<'_>) -> Result<()> {
    let seeds: Vec<String> = match args.values_of("domain") {
        Some(domains) => domains.map(|d| d.to_string()).collect(),
        None => {
            cli_parser::create_parser().print_help().ok();
            println!();
            std::process::exit(1);
        }
    };

    let opts = engine_opts(args);
    let engine = Engine::with_default_probers(opts)
        .await
        .context("failed to set up probers")?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let graph_format: Option<GraphFormat> = args.value_of("graph").map(|f| f.parse().unwrap());
    let output_config = OutputConfig {
        json: args.is_present("json"),
    };

    for seed in seeds {
        let seed = dissect::clean_domain(&seed);
        if !dissect::is_valid_domain(&seed) {
            error!("'{}' does not look like a valid domain -> skipping", seed);
            continue;
        }

        let mut resolutions = engine.resolve(&seed, token.clone());

        match graph_format {
            Some(format) => {
                let mut graph = Graph::new(&seed);
                while let Some(resolution) = resolutions.recv().await {
                    graph.record(&resolution);
                }
                print!("{}", graph.render(format));
            }
            None => {
                while let Some(resolution) = resolutions.recv().await {
                    output::print(&output_config, &resolution)?;
                }
            }
        }

        if token.is_cancelled() {
            break;
        }
    }

    Ok(())
}

fn engine_opts(args: &ArgMatches<'_>) -> EngineOpts {
    let mut opts = EngineOpts::default();

    if let Some(timeout) = args.value_of("timeout") {
        // The parser validated the number already.
        opts.timeout = Duration::from_secs(timeout.parse().unwrap_or(10));
    }
    if args.is_present("strict") {
        opts.relation = dissect::strict_relation();
    }
    if let Some(max_depth) = args.value_of("max-depth") {
        opts.max_depth = max_depth.parse().unwrap_or(-1);
    }
    if let Some(since) = args.value_of("ct-from") {
        opts.ct_since = Some(since.to_string());
    }
    opts.ct_expired = args.is_present("ct-expired");
    if let Some(path) = args.value_of("geo-db") {
        opts.geo_db_path = PathBuf::from(path);
    }

    opts
}
