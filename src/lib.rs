// Copyright 2017-2021 Lukas Pustina <lukas@pustina.de>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! deepdig recursively maps the public infrastructure around a seed domain.
//!
//! Starting from a single domain, the [`Engine`](engine::Engine) fans out to a
//! set of probers -- authoritative DNS, reverse DNS, WHOIS, TLS handshake,
//! HTTP headers and well-known files, Certificate Transparency logs, BGP
//! origin data, and a local GeoIP database -- and feeds every related domain
//! and every discovered IP address back into the crawl. Results are streamed
//! to the caller as each probe completes.
//!
//! ```no_run
//! use deepdig::engine::{Engine, EngineOpts};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> deepdig::Result<()> {
//! let engine = Engine::with_default_probers(EngineOpts::default()).await?;
//! let mut resolutions = engine.resolve("example.com", CancellationToken::new());
//! while let Some(resolution) = resolutions.recv().await {
//!     println!("{}: {} domains", resolution.kind(), resolution.domains().len());
//! }
//! # Ok(())
//! # }
//! ```

pub use error::Error;

pub mod app;
pub mod dissect;
pub mod engine;
pub mod error;
pub mod probe;
pub mod system_config;

pub type Result<T> = std::result::Result<T, Error>;
