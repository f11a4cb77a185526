//! Push command implementation.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{bail, Context, Result};

use pushpop_core::cache::DigestCache;
use pushpop_core::discovery::Announcer;
use pushpop_core::server::ResumableServer;

use super::PushArgs;
use crate::ui::format_size;

/// Run the push command.
pub async fn run(args: PushArgs) -> Result<()> {
    let config = super::load_config();
    let user = args.user.unwrap_or(config.general.user);
    let port = args.port.unwrap_or(config.network.port);

    let metadata = tokio::fs::metadata(&args.file)
        .await
        .with_context(|| format!("Cannot access {}", args.file.display()))?;
    if !metadata.is_file() {
        bail!("{} is not a regular file", args.file.display());
    }
    let file_path = tokio::fs::canonicalize(&args.file)
        .await
        .with_context(|| format!("Cannot resolve {}", args.file.display()))?;
    // Opening proves the file is readable before anyone is told about it.
    tokio::fs::File::open(&file_path)
        .await
        .with_context(|| format!("Cannot read {}", file_path.display()))?;

    let Some(name) = file_path.file_name().and_then(|n| n.to_str()) else {
        bail!("{} has no usable file name", file_path.display());
    };
    let name = name.to_string();

    let cache = DigestCache::new();
    let server = ResumableServer::bind(
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        &file_path,
        cache.clone(),
    )
    .await
    .context("Failed to start the file server")?;
    let local_port = server.local_addr().port();

    let announcer = Announcer::new().context("Failed to start mDNS")?;
    announcer
        .register(&name, local_port, &user)
        .await
        .context("Failed to announce the file")?;

    let prewarm_path = file_path.clone();
    let prewarm = tokio::task::spawn_blocking(move || cache.blocking_get(&prewarm_path));

    println!();
    println!("PushPop v{}", pushpop_core::VERSION);
    println!("{}", "─".repeat(37));
    println!("  File:  {} ({})", name, format_size(metadata.len()));
    println!("  User:  {}", user);
    println!("  Port:  {}", local_port);
    println!();
    println!("  Run `pushpop pop {}` on the other machine.", user);
    println!("  Press Ctrl+C to stop sharing.");
    println!();

    tokio::spawn(async move {
        match prewarm.await {
            Ok(Ok(digest)) => tracing::info!(%digest, "Digest ready"),
            Ok(Err(e)) => tracing::warn!("Hashing failed: {}", e),
            Err(e) => tracing::warn!("Hashing task failed: {}", e),
        }
    });

    let served = server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    println!();
    println!("  Stopped sharing {}.", name);

    if let Err(e) = announcer.unregister().await {
        tracing::warn!("Failed to withdraw announcement: {}", e);
    }

    served.context("File server failed")
}
