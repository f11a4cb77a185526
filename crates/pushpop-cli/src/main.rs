//! PushPop CLI - resumable, hash-verified file transfer on the local network
//!
//! One machine announces a file, another pulls it. Interrupted transfers
//! resume from the partial file and every download is verified against the
//! sender's BLAKE3 digest.
//!
//! ## Quick Start
//!
//! ```bash
//! # Offer a file
//! pushpop push ./report.pdf
//!
//! # Pull it on another machine
//! pushpop pop alice
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Command::Push(args) => commands::push::run(args).await,
        Command::Pop(args) => commands::pop::run(args).await,
        Command::Scan(args) => commands::scan::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "info,pushpop=debug,pushpop_core=debug"
    } else {
        "warn,pushpop=info,pushpop_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
