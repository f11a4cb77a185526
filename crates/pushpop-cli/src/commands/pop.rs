//! Pop command implementation.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};

use pushpop_core::discovery::Browser;
use pushpop_core::download::{Download, DownloadOptions, DownloadRequest};
use pushpop_core::reconcile::{
    reconcile, ConflictChoice, NonInteractive, Prompter, Resolution, TransferPaths,
};
use pushpop_core::{Error, ErrorKind};

use super::PopArgs;
use crate::ui::{display_progress, format_remaining, format_size, parse_duration};

/// Run the pop command.
///
/// Transfer failures are explained on stdout and end the process with a
/// non-zero status; setup failures bubble up as errors.
pub async fn run(args: PopArgs) -> Result<()> {
    let target = args.user.clone();
    match pop(args).await {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast::<Error>() {
            Ok(err) => {
                report(&err, target.as_deref());
                std::process::exit(1);
            }
            Err(other) => Err(other),
        },
    }
}

async fn pop(args: PopArgs) -> Result<()> {
    let config = super::load_config();
    let local_user = config.general.user.clone();
    let target_user = args.user.unwrap_or_else(|| local_user.clone());

    let timeout = match args.timeout.as_deref() {
        Some(s) => parse_duration(s)
            .context("Invalid timeout format. Use formats like '5s', '30s', '1m'")?,
        None => config.network.discovery_timeout,
    };

    let output_dir = args
        .output
        .or_else(|| config.general.default_output.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Cannot create {}", output_dir.display()))?;

    println!();
    println!("PushPop v{}", pushpop_core::VERSION);
    println!("{}", "─".repeat(37));
    println!("  Looking for a file from {}...", target_user);

    let browser = Browser::new().context("Failed to start mDNS")?;
    let offer = browser.find(&target_user, timeout).await?;
    drop(browser);

    println!(
        "  Found {} at {}:{}",
        offer.display_name, offer.address, offer.port
    );

    let paths = TransferPaths::new(&output_dir, &offer.display_name)?;
    let state = paths.inspect().await?;

    let resolution = if args.batch {
        reconcile(state, args.force, &mut NonInteractive, &paths)
    } else {
        reconcile(state, args.force, &mut TerminalPrompt, &paths)
    };
    let Some(offset) = settle(resolution, &paths).await? else {
        println!();
        return Ok(());
    };

    if offset > 0 {
        println!("  Resuming after {}", format_size(offset));
    }
    println!();

    let request =
        DownloadRequest::new(offer.base_url(), paths.clone(), local_user).resume_from(offset);
    let download = Download::new(request, DownloadOptions::from(&config.transfer))?;

    let progress_task = tokio::spawn(display_progress(download.progress()));

    let canceller = download.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let result = download.run().await;
    interrupt.abort();
    let _ = progress_task.await;

    let outcome = result?;

    println!("  Saved {}", outcome.path.display());
    println!(
        "  {} in {} (resumed from {})",
        format_size(outcome.bytes),
        format_remaining(outcome.elapsed),
        format_size(outcome.resumed_from)
    );
    println!("  BLAKE3 {}", outcome.digest);
    println!();

    Ok(())
}

/// Carry out the reconciler's decision.
///
/// Returns the offset to download from, or `None` when there is nothing to
/// download. An abort touches nothing and is not a failure.
async fn settle(resolution: Resolution, paths: &TransferPaths) -> pushpop_core::Result<Option<u64>> {
    match resolution {
        Resolution::Abort => {
            println!("  Aborted by user; nothing was changed.");
            Ok(None)
        }
        Resolution::KeepFinal => {
            resolution.apply(paths).await?;
            println!("  Keeping {}; nothing to download.", paths.final_path.display());
            Ok(None)
        }
        Resolution::Download { offset, .. } => {
            resolution.apply(paths).await?;
            Ok(Some(offset))
        }
    }
}

/// Print a failure the way the user should read it.
fn report(err: &Error, user: Option<&str>) {
    println!();
    match err.kind() {
        ErrorKind::Aborted => println!("  Aborted by user; nothing was changed."),
        ErrorKind::Cancelled => println!("  Transfer cancelled."),
        ErrorKind::Integrity => {
            println!("  Verification failed: the downloaded file does not match.");
            if let Error::DigestMismatch { expected, computed } = err {
                println!("    expected: {}", expected);
                println!("    computed: {}", computed);
            }
        }
        ErrorKind::Transport => println!("  Connection problem: {}", err),
        ErrorKind::Protocol => println!("  The sender answered unexpectedly: {}", err),
        ErrorKind::Filesystem => println!("  Local file error: {}", err),
        ErrorKind::Discovery => println!("  Discovery failed: {}", err),
        ErrorKind::Config => println!("  Configuration error: {}", err),
        ErrorKind::Internal => println!("  Internal error: {}", err),
    }

    println!();
    if err.is_recoverable() {
        println!("  {}", resume_hint(user));
    } else if let Some(suggestion) = err.suggestion() {
        for line in suggestion.lines() {
            println!("  {}", line);
        }
    }
    println!();
}

fn resume_hint(user: Option<&str>) -> String {
    match user {
        Some(user) => format!("Run `pushpop pop {}` again to resume where it stopped.", user),
        None => "Run `pushpop pop` again to resume where it stopped.".to_string(),
    }
}

/// Asks on the terminal.
struct TerminalPrompt;

impl TerminalPrompt {
    fn ask(question: &str) -> String {
        print!("{}", question);
        let _ = io::stdout().flush();

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return String::new();
        }
        line.trim().to_lowercase()
    }
}

impl Prompter for TerminalPrompt {
    fn confirm_overwrite(&mut self, paths: &TransferPaths) -> bool {
        let answer = Self::ask(&format!(
            "  {} already exists. Overwrite? [y/N] ",
            paths.final_path.display()
        ));
        matches!(answer.as_str(), "y" | "yes")
    }

    fn resolve_conflict(&mut self, paths: &TransferPaths, partial_len: u64) -> ConflictChoice {
        println!(
            "  Both {} and a partial download ({}) exist.",
            paths.final_path.display(),
            format_size(partial_len)
        );
        loop {
            let answer =
                Self::ask("  [k]eep existing file, [r]esume partial, [s]tart over, [a]bort? ");
            if let Some(choice) = parse_conflict_choice(&answer) {
                return choice;
            }
        }
    }
}

fn parse_conflict_choice(answer: &str) -> Option<ConflictChoice> {
    match answer {
        "k" | "keep" => Some(ConflictChoice::KeepFinal),
        "r" | "resume" => Some(ConflictChoice::ResumePartial),
        "s" | "restart" | "start over" => Some(ConflictChoice::Restart),
        "a" | "abort" | "" => Some(ConflictChoice::Abort),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushpop_core::reconcile::LocalState;
    use tempfile::TempDir;

    #[test]
    fn test_parse_conflict_choice() {
        assert_eq!(parse_conflict_choice("k"), Some(ConflictChoice::KeepFinal));
        assert_eq!(parse_conflict_choice("resume"), Some(ConflictChoice::ResumePartial));
        assert_eq!(parse_conflict_choice("s"), Some(ConflictChoice::Restart));
        assert_eq!(parse_conflict_choice(""), Some(ConflictChoice::Abort));
        assert_eq!(parse_conflict_choice("maybe"), None);
    }

    #[tokio::test]
    async fn test_declined_overwrite_is_a_clean_stop() {
        let dir = TempDir::new().unwrap();
        let paths = TransferPaths::new(dir.path(), "report.pdf").unwrap();
        std::fs::write(&paths.final_path, b"keep me").unwrap();

        let state = paths.inspect().await.unwrap();
        let resolution = reconcile(state, false, &mut NonInteractive, &paths);
        assert_eq!(resolution, Resolution::Abort);

        assert_eq!(settle(resolution, &paths).await.unwrap(), None);
        assert_eq!(std::fs::read(&paths.final_path).unwrap(), b"keep me");
        assert!(!paths.part_path.exists());
    }

    #[tokio::test]
    async fn test_settle_resumes_from_partial_file() {
        let dir = TempDir::new().unwrap();
        let paths = TransferPaths::new(dir.path(), "report.pdf").unwrap();
        std::fs::write(&paths.part_path, vec![1u8; 300]).unwrap();

        let state = LocalState {
            final_exists: false,
            partial_len: Some(300),
        };
        let resolution = reconcile(state, false, &mut NonInteractive, &paths);

        assert_eq!(settle(resolution, &paths).await.unwrap(), Some(300));
        assert_eq!(std::fs::metadata(&paths.part_path).unwrap().len(), 300);
    }

    #[test]
    fn test_resume_hint_names_user() {
        assert!(resume_hint(Some("alice")).contains("pushpop pop alice"));
        assert!(resume_hint(None).contains("pushpop pop again"));
    }
}
