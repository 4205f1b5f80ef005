//! Multi-source comparison tests: first-failure semantics of compare_all and
//! the pairwise grouping of compare_many.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use bytecmp::{CompareError, CompareOptions, compare_all, compare_many};

fn make_files(dir: &tempfile::TempDir, contents: &[&[u8]]) -> Vec<PathBuf> {
    contents
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let path = dir.path().join(format!("src{i}"));
            fs::write(&path, c).unwrap();
            path
        })
        .collect()
}

fn paths_as_strs(paths: &[PathBuf]) -> Vec<&str> {
    paths.iter().map(|p| p.to_str().unwrap()).collect()
}

fn opts() -> CompareOptions {
    CompareOptions::default()
}

#[test]
fn test_compare_all_identical() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(&dir, &[b"same", b"same", b"same", b"same"]);
    assert!(compare_all(paths_as_strs(&files), &opts()).unwrap());
}

#[test]
fn test_compare_all_one_differs() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(&dir, &[b"same", b"same", b"DIFF", b"same"]);
    assert!(!compare_all(paths_as_strs(&files), &opts()).unwrap());
}

#[test]
fn test_compare_all_trivial_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(&dir, &[b"alone"]);
    assert!(compare_all(paths_as_strs(&files), &opts()).unwrap());
    assert!(compare_all(Vec::<&str>::new(), &opts()).unwrap());
}

#[test]
fn test_compare_all_sequential_matches_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(&dir, &[b"x", b"x", b"y", b"x", b"x", b"x"]);
    for workers in [0, 1, 4] {
        let o = CompareOptions {
            max_workers: workers,
            ..Default::default()
        };
        assert!(!compare_all(paths_as_strs(&files), &o).unwrap());
    }
}

#[test]
fn test_compare_all_error_raises() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(&dir, &[b"same", b"same"]);
    let mut sources = paths_as_strs(&files);
    let missing = dir.path().join("missing");
    sources.push(missing.to_str().unwrap());
    let err = compare_all(sources, &opts()).unwrap_err();
    assert!(matches!(err, CompareError::SourceNotFound(_)));
}

#[test]
fn test_compare_many_groups_partition() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(&dir, &[b"alpha", b"beta", b"alpha", b"gamma", b"beta"]);
    let result = compare_many(paths_as_strs(&files), &opts()).unwrap();

    assert!(!result.all_equal);
    // Groups partition the sources.
    let mut seen = BTreeSet::new();
    let mut total = 0;
    for group in &result.groups {
        for name in group {
            assert!(seen.insert(name.clone()), "{name} appears in two groups");
            total += 1;
        }
    }
    assert_eq!(total, files.len());
    assert_eq!(result.groups.len(), 3);

    // Every unordered pair is present.
    assert_eq!(result.diff.len(), files.len() * (files.len() - 1) / 2);

    // src0 and src2 landed together.
    let names: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    let group_of_0 = result.groups.iter().find(|g| g.contains(&names[0])).unwrap();
    assert!(group_of_0.contains(&names[2]));
    assert!(!group_of_0.contains(&names[1]));
}

#[test]
fn test_compare_many_all_equal_single_group() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(&dir, &[b"same", b"same", b"same"]);
    let result = compare_many(paths_as_strs(&files), &opts()).unwrap();
    assert!(result.all_equal);
    assert_eq!(result.groups.len(), 1);
    assert_eq!(result.groups[0].len(), 3);
    assert!(result.diff.values().all(|&eq| eq));
}

#[test]
fn test_compare_many_single_source() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(&dir, &[b"alone"]);
    let result = compare_many(paths_as_strs(&files), &opts()).unwrap();
    assert!(result.all_equal);
    assert_eq!(result.groups.len(), 1);
    assert!(result.diff.is_empty());
}

#[test]
fn test_compare_many_worker_counts_agree() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(&dir, &[b"a", b"b", b"a", b"c"]);
    let sequential = compare_many(paths_as_strs(&files), &CompareOptions {
        max_workers: 1,
        ..Default::default()
    })
    .unwrap();
    let parallel = compare_many(paths_as_strs(&files), &CompareOptions {
        max_workers: 4,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(sequential.all_equal, parallel.all_equal);
    assert_eq!(sequential.diff, parallel.diff);
    let seq_groups: BTreeSet<_> = sequential.groups.into_iter().collect();
    let par_groups: BTreeSet<_> = parallel.groups.into_iter().collect();
    assert_eq!(seq_groups, par_groups);
}
