//! Scan command implementation.

use anyhow::{Context, Result};

use pushpop_core::discovery::Browser;
use pushpop_core::identity::TransferOffer;

use super::ScanArgs;
use crate::ui::parse_duration;

/// Run the scan command.
pub async fn run(args: ScanArgs) -> Result<()> {
    let duration = parse_duration(&args.duration)
        .context("Invalid duration format. Use formats like '5s', '10s', '30s'")?;

    if !args.json {
        println!();
        println!("Scanning for offered files ({})...", args.duration);
        println!();
    }

    let browser = Browser::new().context("Failed to start mDNS")?;
    let offers = browser.scan(duration).await?;

    if args.json {
        output_json_offers(&offers)?;
    } else {
        display_offers(&offers);
    }

    Ok(())
}

/// Output offers as JSON.
fn output_json_offers(offers: &[TransferOffer]) -> Result<()> {
    let output = serde_json::json!({
        "offers": offers.iter().map(|o| serde_json::json!({
            "user": o.advertised_user,
            "file": o.display_name,
            "address": o.address.to_string(),
            "port": o.port,
            "url": o.base_url(),
        })).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Display offers as text table.
fn display_offers(offers: &[TransferOffer]) {
    println!("Offered Files on Network:");
    println!("{}", "─".repeat(60));
    println!("  {:16}  {:24}  {:14}", "User", "File", "Address");
    println!("{}", "─".repeat(60));

    if offers.is_empty() {
        println!("  (no offers found)");
        println!("{}", "─".repeat(60));
        return;
    }

    for offer in offers {
        println!(
            "  {:16}  {:24}  {}",
            truncate_string(&offer.advertised_user, 16),
            truncate_string(&offer.display_name, 24),
            std::net::SocketAddr::new(offer.address, offer.port)
        );
    }

    println!("{}", "─".repeat(60));
}

/// Truncate a string to the given width, marking the cut with "...".
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("a-very-long-file-name.bin", 10), "a-very-...");
    }
}
