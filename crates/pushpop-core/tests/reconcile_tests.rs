//! Reconciling local files, then downloading from the resolved offset.

mod common;

use common::{create_temp_dir, create_test_file, fast_options, random_bytes, spawn_sender};
use pushpop_core::download::{Download, DownloadRequest};
use pushpop_core::reconcile::{
    reconcile, ConflictChoice, NonInteractive, Prompter, Resolution, TransferPaths,
};
use pushpop_core::Error;

const NAME: &str = "report.pdf";

struct Answer(ConflictChoice);

impl Prompter for Answer {
    fn confirm_overwrite(&mut self, _paths: &TransferPaths) -> bool {
        true
    }

    fn resolve_conflict(&mut self, _paths: &TransferPaths, _partial_len: u64) -> ConflictChoice {
        self.0
    }
}

/// Reconcile, apply, and download if the resolution asks for it.
async fn reconcile_and_fetch(
    base_url: &str,
    paths: &TransferPaths,
    force: bool,
    prompter: &mut dyn Prompter,
) -> pushpop_core::Result<Resolution> {
    let state = paths.inspect().await?;
    let resolution = reconcile(state, force, prompter, paths);
    resolution.apply(paths).await?;

    if let Some(offset) = resolution.offset() {
        let request = DownloadRequest::new(base_url, paths.clone(), "carol").resume_from(offset);
        Download::new(request, fast_options())?.run().await?;
    }
    Ok(resolution)
}

#[tokio::test]
async fn test_each_conflict_choice_on_disk() {
    let src_dir = create_temp_dir();
    let content = random_bytes(96 * 1024);
    let source = create_test_file(src_dir.path(), NAME, &content);
    let (base_url, _cache) = spawn_sender(&source).await;

    for choice in [
        ConflictChoice::KeepFinal,
        ConflictChoice::ResumePartial,
        ConflictChoice::Restart,
        ConflictChoice::Abort,
    ] {
        let dst_dir = create_temp_dir();
        let paths = TransferPaths::new(dst_dir.path(), NAME).unwrap();
        std::fs::write(&paths.final_path, b"old final").unwrap();
        std::fs::write(&paths.part_path, &content[..1000]).unwrap();

        let result = reconcile_and_fetch(&base_url, &paths, false, &mut Answer(choice)).await;

        match choice {
            ConflictChoice::KeepFinal => {
                assert_eq!(result.unwrap(), Resolution::KeepFinal);
                assert_eq!(std::fs::read(&paths.final_path).unwrap(), b"old final");
                assert!(!paths.part_path.exists());
            }
            ConflictChoice::ResumePartial | ConflictChoice::Restart => {
                result.unwrap();
                assert_eq!(std::fs::read(&paths.final_path).unwrap(), content);
                assert!(!paths.part_path.exists());
            }
            ConflictChoice::Abort => {
                assert!(matches!(result, Err(Error::Aborted)));
                assert_eq!(std::fs::read(&paths.final_path).unwrap(), b"old final");
                assert_eq!(std::fs::read(&paths.part_path).unwrap(), &content[..1000]);
            }
        }
    }
}

#[tokio::test]
async fn test_forced_overwrite_of_final_file() {
    let src_dir = create_temp_dir();
    let dst_dir = create_temp_dir();
    let content = random_bytes(32 * 1024);
    let source = create_test_file(src_dir.path(), NAME, &content);
    let (base_url, _cache) = spawn_sender(&source).await;

    let paths = TransferPaths::new(dst_dir.path(), NAME).unwrap();
    std::fs::write(&paths.final_path, b"outdated").unwrap();

    let resolution = reconcile_and_fetch(&base_url, &paths, true, &mut NonInteractive)
        .await
        .unwrap();

    assert_eq!(resolution.offset(), Some(0));
    assert_eq!(std::fs::read(&paths.final_path).unwrap(), content);
}

#[tokio::test]
async fn test_unattended_run_leaves_existing_file() {
    let src_dir = create_temp_dir();
    let dst_dir = create_temp_dir();
    let source = create_test_file(src_dir.path(), NAME, &random_bytes(1024));
    let (base_url, _cache) = spawn_sender(&source).await;

    let paths = TransferPaths::new(dst_dir.path(), NAME).unwrap();
    std::fs::write(&paths.final_path, b"keep me").unwrap();

    let result = reconcile_and_fetch(&base_url, &paths, false, &mut NonInteractive).await;

    assert!(matches!(result, Err(Error::Aborted)));
    assert_eq!(std::fs::read(&paths.final_path).unwrap(), b"keep me");
    assert!(!paths.part_path.exists());
}
