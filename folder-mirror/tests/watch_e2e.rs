//! End-to-end tests against the platform's native notification backend.
//!
//! These touch a real temporary directory tree and wait for notifications
//! with a bounded poll, so they exercise recursive watching, automatic
//! registration of new subdirectories, and the full dispatch path.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codex_folder_mirror::{
    FileLogger, FileTransformer, MemoryLogger, MirrorError, WatchHandle, WatchSession,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

type Calls = Arc<Mutex<Vec<(PathBuf, PathBuf)>>>;

/// Give the backend time to register watches before the tree changes.
const SETTLE: Duration = Duration::from_millis(300);

fn recording_transformer(calls: Calls) -> Arc<dyn FileTransformer> {
    Arc::new(move |source: &Path, dest: &Path| -> anyhow::Result<()> {
        calls
            .lock()
            .unwrap()
            .push((source.to_path_buf(), dest.to_path_buf()));
        std::fs::write(dest, b"mirrored")?;
        Ok(())
    })
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

struct Tree {
    temp_dir: TempDir,
    src: PathBuf,
    dst: PathBuf,
    calls: Calls,
    logger: Arc<MemoryLogger>,
}

impl Tree {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();
        Self {
            temp_dir,
            src,
            dst,
            calls: Arc::default(),
            logger: Arc::new(MemoryLogger::new()),
        }
    }

    async fn start(&self) -> WatchHandle {
        let handle = WatchSession::new(
            &self.src,
            &self.dst,
            recording_transformer(self.calls.clone()),
            self.logger.clone(),
        )
        .unwrap()
        .start()
        .await
        .unwrap();
        tokio::time::sleep(SETTLE).await;
        handle
    }

    fn action_lines(&self) -> Vec<String> {
        self.logger.messages().into_iter().skip(2).collect()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_created_file_is_mirrored() {
    let tree = Tree::new();
    std::fs::create_dir_all(tree.src.join("a")).unwrap();
    let handle = tree.start().await;

    let file = tree.src.join("a/b.txt");
    std::fs::write(&file, "raw").unwrap();

    assert!(wait_for(|| tree.action_lines().iter().any(|l| l == "is complete")).await);
    handle.stop().await.unwrap();

    let dest = tree.dst.join("a/b.txt");
    assert!(tree.dst.join("a").is_dir());
    assert_eq!(*tree.calls.lock().unwrap(), vec![(file.clone(), dest.clone())]);
    assert_eq!(
        tree.action_lines(),
        vec![
            format!("processing: from:{} to:{}", file.display(), dest.display()),
            "is complete".to_string(),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_moved_out_file_is_only_logged() {
    let tree = Tree::new();
    std::fs::create_dir_all(tree.src.join("a")).unwrap();
    std::fs::create_dir_all(tree.dst.join("a")).unwrap();
    let file = tree.src.join("a/b.txt");
    std::fs::write(&file, "raw").unwrap();
    std::fs::write(tree.dst.join("a/b.txt"), "processed earlier").unwrap();
    let handle = tree.start().await;

    std::fs::rename(&file, tree.temp_dir.path().join("b.txt")).unwrap();

    let expected = format!("file {} was deleted", file.display());
    assert!(wait_for(|| tree.action_lines().contains(&expected)).await);
    tokio::time::sleep(SETTLE).await;
    handle.stop().await.unwrap();

    assert_eq!(tree.action_lines(), vec![expected]);
    assert!(tree.calls.lock().unwrap().is_empty());
    assert_eq!(
        std::fs::read_to_string(tree.dst.join("a/b.txt")).unwrap(),
        "processed earlier"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_moved_in_file_is_mirrored() {
    let tree = Tree::new();
    let outside = tree.temp_dir.path().join("incoming.txt");
    std::fs::write(&outside, "raw").unwrap();
    let handle = tree.start().await;

    let file = tree.src.join("incoming.txt");
    std::fs::rename(&outside, &file).unwrap();

    assert!(wait_for(|| !tree.calls.lock().unwrap().is_empty()).await);
    handle.stop().await.unwrap();

    assert_eq!(
        *tree.calls.lock().unwrap(),
        vec![(file, tree.dst.join("incoming.txt"))]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_directory_is_silent_but_watched() {
    let tree = Tree::new();
    let handle = tree.start().await;

    std::fs::create_dir(tree.src.join("x")).unwrap();
    tokio::time::sleep(SETTLE).await;
    assert!(tree.action_lines().is_empty());
    assert!(tree.calls.lock().unwrap().is_empty());

    let file = tree.src.join("x/late.txt");
    std::fs::write(&file, "raw").unwrap();

    assert!(wait_for(|| !tree.calls.lock().unwrap().is_empty()).await);
    let summary = handle.stop().await.unwrap();

    assert_eq!(
        *tree.calls.lock().unwrap(),
        vec![(file, tree.dst.join("x/late.txt"))]
    );
    assert!(summary.directories_ignored >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removed_directory_produces_no_log_line() {
    let tree = Tree::new();
    std::fs::create_dir_all(tree.src.join("empty")).unwrap();
    let handle = tree.start().await;

    std::fs::remove_dir(tree.src.join("empty")).unwrap();
    tokio::time::sleep(SETTLE).await;
    handle.stop().await.unwrap();

    assert!(tree.action_lines().is_empty());
}

#[tokio::test]
async fn test_missing_root_fails_setup() {
    let tree = Tree::new();
    let result = WatchSession::new(
        tree.src.join("nope"),
        &tree.dst,
        recording_transformer(tree.calls.clone()),
        tree.logger.clone(),
    )
    .unwrap()
    .start()
    .await;

    assert!(matches!(result, Err(MirrorError::WatchSetup { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_audit_log_file_records_actions() {
    let tree = Tree::new();
    let log = Arc::new(FileLogger::open(tree.temp_dir.path().join("audit.log")).unwrap());
    let handle = WatchSession::new(
        &tree.src,
        &tree.dst,
        recording_transformer(tree.calls.clone()),
        log.clone(),
    )
    .unwrap()
    .start()
    .await
    .unwrap();
    tokio::time::sleep(SETTLE).await;

    std::fs::write(tree.src.join("c.txt"), "raw").unwrap();
    assert!(wait_for(|| !tree.calls.lock().unwrap().is_empty()).await);
    handle.stop().await.unwrap();

    let text = std::fs::read_to_string(log.path()).unwrap();
    let messages: Vec<&str> = text
        .lines()
        .map(|line| line.splitn(3, ' ').nth(2).unwrap_or_default())
        .collect();
    assert_eq!(messages[0], "Monitor drive started");
    assert!(messages[1].starts_with("Processing folders: from:"));
    assert!(messages.contains(&"is complete"));
}
