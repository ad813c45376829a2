//! Tests for diff planning against real directory trees

use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::manifest::RelativePath;
use crate::planner::{plan_blocking, DiffPlanner, DownloadTask};
use crate::test_support::{body_for, manifest_for, manifest_with_contents, materialize};

const TREE: &[&str] = &[
    "FreeRealms.exe",
    "Data/data.pack",
    "Data/Textures/stone.dds",
    "Data/Textures/grass.dds",
    "Sound/music.ogg",
];

fn planned_paths(tasks: &[DownloadTask]) -> Vec<String> {
    tasks.iter().map(DownloadTask::display_path).collect()
}

fn local(root: &Path, path: &str) -> std::path::PathBuf {
    RelativePath::parse(path).to_local(root)
}

#[test]
fn test_empty_root_plans_every_file() {
    let temp_dir = TempDir::new().unwrap();
    let manifest = manifest_for(TREE);

    let plan = DiffPlanner::new().plan(&manifest, temp_dir.path());

    assert_eq!(plan.len(), TREE.len());
    assert_eq!(plan.summary.files_checked, TREE.len());
    assert_eq!(plan.summary.files_to_download, TREE.len());
    assert_eq!(plan.summary.bytes_to_download, manifest.total_size());
    assert_eq!(
        planned_paths(&plan.tasks),
        manifest
            .files()
            .map(|(path, file)| path.join(file.name()).to_string())
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_matching_tree_plans_nothing() {
    let temp_dir = TempDir::new().unwrap();
    materialize(temp_dir.path(), TREE);

    let plan = DiffPlanner::new().plan(&manifest_for(TREE), temp_dir.path());

    assert!(plan.is_empty());
    assert_eq!(plan.summary.files_checked, TREE.len());
    assert_eq!(plan.summary.bytes_to_download, 0);
}

#[test]
fn test_only_damaged_files_are_planned() {
    let temp_dir = TempDir::new().unwrap();
    materialize(temp_dir.path(), TREE);

    // Same length, different content
    let stone = local(temp_dir.path(), "Data/Textures/stone.dds");
    let mut corrupted = body_for("Data/Textures/stone.dds");
    corrupted[0] ^= 0xFF;
    std::fs::write(&stone, corrupted).unwrap();

    // Truncated
    std::fs::write(local(temp_dir.path(), "Sound/music.ogg"), b"short").unwrap();

    // Missing
    std::fs::remove_file(local(temp_dir.path(), "FreeRealms.exe")).unwrap();

    let plan = DiffPlanner::new().plan(&manifest_for(TREE), temp_dir.path());

    assert_eq!(
        planned_paths(&plan.tasks),
        vec!["Data/Textures/stone.dds", "Sound/music.ogg", "FreeRealms.exe"]
    );
}

#[test]
fn test_planning_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    materialize(temp_dir.path(), &TREE[..2]);
    let manifest = manifest_for(TREE);
    let planner = DiffPlanner::new();

    let first = planner.plan(&manifest, temp_dir.path());
    let second = planner.plan(&manifest, temp_dir.path());

    assert_eq!(first.tasks, second.tasks);
    assert_eq!(first.summary, second.summary);
}

#[test]
fn test_lazy_tasks_match_full_plan() {
    let temp_dir = TempDir::new().unwrap();
    materialize(temp_dir.path(), &["Data/data.pack"]);
    let manifest = manifest_for(TREE);
    let planner = DiffPlanner::new();

    let lazy: Vec<DownloadTask> = planner.tasks(&manifest, temp_dir.path()).collect();

    assert_eq!(lazy, planner.plan(&manifest, temp_dir.path()).tasks);
}

#[test]
fn test_lazy_tasks_can_stop_early() {
    let temp_dir = TempDir::new().unwrap();
    let manifest = manifest_for(TREE);

    let first = DiffPlanner::new().tasks(&manifest, temp_dir.path()).next().unwrap();

    assert_eq!(first.display_path(), "Data/Textures/stone.dds");
}

#[test]
fn test_directory_in_place_of_file_is_planned() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(local(temp_dir.path(), "Data/data.pack")).unwrap();

    let plan = DiffPlanner::new().plan(&manifest_for(&["Data/data.pack"]), temp_dir.path());

    assert_eq!(planned_paths(&plan.tasks), vec!["Data/data.pack"]);
}

#[tokio::test]
async fn test_plan_blocking_matches_plan() {
    let temp_dir = TempDir::new().unwrap();
    materialize(temp_dir.path(), &["Sound/music.ogg"]);
    let manifest = manifest_for(TREE);

    let expected = DiffPlanner::new().plan(&manifest, temp_dir.path());
    let plan = plan_blocking(
        Arc::new(manifest),
        temp_dir.path().to_path_buf(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(plan.tasks, expected.tasks);
    assert_eq!(plan.summary, expected.summary);
}

#[tokio::test]
async fn test_plan_blocking_honours_cancellation() {
    let temp_dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = plan_blocking(Arc::new(manifest_for(TREE)), temp_dir.path().to_path_buf(), cancel).await;

    assert!(matches!(result, Err(SyncError::Cancelled)));
}

fn file_set() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(
        "[a-z]{1,3}(/[a-z]{1,3}){0,2}\\.[a-z]{1,3}",
        prop::collection::vec(any::<u8>(), 0..256),
        1..12,
    )
    .prop_map(|files| files.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_plan_then_repair_is_empty(files in file_set()) {
        let temp_dir = TempDir::new().unwrap();
        let manifest = manifest_with_contents(&files);
        prop_assume!(manifest.validate().is_ok());
        let planner = DiffPlanner::new();

        let plan = planner.plan(&manifest, temp_dir.path());
        prop_assert_eq!(plan.len(), files.len());

        for (path, content) in &files {
            let target = local(temp_dir.path(), path);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(&target, content).unwrap();
        }

        let repaired = planner.plan(&manifest, temp_dir.path());
        prop_assert!(repaired.is_empty());
        prop_assert_eq!(repaired.summary.files_checked, files.len());
    }
}
