//! Argument validation tests: configuration errors must surface before any
//! I/O, for every entry point.

use std::time::Duration;

use bytecmp::{CompareError, CompareOptions, compare, compare_archive, compare_dir, compare_many};

fn assert_config_err<T: std::fmt::Debug>(result: bytecmp::Result<T>) {
    match result {
        Err(CompareError::Config(_)) => {}
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn test_empty_sources_rejected() {
    let opts = CompareOptions::default();
    assert_config_err(compare("", "/tmp/x", &opts));
    assert_config_err(compare("/tmp/x", "", &opts));
    assert_config_err(compare_dir("", "/tmp", &opts));
    assert_config_err(compare_archive("/tmp/a.tar", "", &opts));
}

#[test]
fn test_chunk_size_bounds() {
    let zero = CompareOptions {
        chunk_size: 0,
        ..Default::default()
    };
    assert_config_err(compare("/a", "/b", &zero));

    let huge = CompareOptions {
        chunk_size: 1024 * 1024 * 1024 + 1,
        ..Default::default()
    };
    assert_config_err(compare("/a", "/b", &huge));

    let max = CompareOptions {
        chunk_size: 1024 * 1024 * 1024,
        ..Default::default()
    };
    // At the limit the validation passes; the paths simply don't exist.
    assert!(matches!(
        compare("/definitely/not/here", "/also/not/here", &max),
        Err(CompareError::SourceNotFound(_))
    ));
}

#[test]
fn test_max_workers_bound() {
    let over = CompareOptions {
        max_workers: 257,
        ..Default::default()
    };
    assert_config_err(compare_many(["/a", "/b"], &over));

    let at_limit = CompareOptions {
        max_workers: 256,
        ..Default::default()
    };
    assert!(matches!(
        compare_many(["/definitely/not/here", "/nor/here"], &at_limit),
        Err(CompareError::SourceNotFound(_))
    ));
}

#[test]
fn test_non_positive_timeouts_rejected() {
    let zero_http = CompareOptions {
        timeout: Duration::ZERO,
        ..Default::default()
    };
    assert_config_err(compare("/a", "/b", &zero_http));

    let zero_wall = CompareOptions {
        comparison_timeout: Some(Duration::ZERO),
        ..Default::default()
    };
    assert_config_err(compare("/a", "/b", &zero_wall));

    // None disables the wall clock entirely; that is valid.
    let unlimited = CompareOptions {
        comparison_timeout: None,
        ..Default::default()
    };
    assert!(matches!(
        compare("/definitely/not/here", "/nope", &unlimited),
        Err(CompareError::SourceNotFound(_))
    ));
}

#[test]
fn test_validation_happens_before_io() {
    // Bad options plus a nonexistent path: the Config error must win,
    // proving validation precedes any open.
    let bad = CompareOptions {
        chunk_size: 0,
        ..Default::default()
    };
    assert_config_err(compare("/definitely/not/here", "/nope", &bad));
}
