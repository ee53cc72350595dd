//! Forward HTTP caching proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                  FORWARD CACHE PROXY                  │
//!                     │                                                       │
//!   Client request    │  ┌─────────┐   ┌──────────┐   ┌────────────────┐     │
//!   ──────────────────┼─▶│   net   │──▶│ dispatch │──▶│ http processor │     │
//!                     │  │listener │   │  pool    │   │  parse/rewrite │     │
//!                     │  └─────────┘   └──────────┘   └───────┬────────┘     │
//!                     │                                       │              │
//!                     │                          hit ┌────────▼───────┐      │
//!   Client response   │  ◀───────────────────────────│  object cache  │      │
//!   ◀─────────────────┼                              └────────┬───────┘      │
//!                     │                                  miss │              │
//!                     │                              ┌────────▼───────┐      │
//!                     │  ◀───── store + relay ───────│ origin fetch   │◀─────┼──── Origin
//!                     │                              └────────────────┘      │
//!                     │                                                       │
//!                     │  config · lifecycle · observability                   │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use forward_cache_proxy::lifecycle::startup::{self, StartupOptions};

#[derive(Parser)]
#[command(name = "forward-cache-proxy")]
#[command(about = "Forward HTTP proxy with an in-memory response cache", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Port to listen on (1000 < PORT < 64000)
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    startup::run(StartupOptions {
        config_path: cli.config,
        port: Some(cli.port),
        log_level: cli.log_level,
    })
    .await?;

    Ok(())
}
