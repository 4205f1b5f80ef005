//! Pre-I/O argument validation. Every violation is a `Config` error raised
//! before any descriptor is opened or request sent.

use std::time::Duration;

use crate::types::{CompareError, CompareOptions, Result, SourceSpec};

/// Sources must be non-empty strings/paths.
pub fn validate_source(spec: &SourceSpec, name: &str) -> Result<()> {
    let empty = match spec {
        SourceSpec::Local(p) => p.as_os_str().is_empty(),
        SourceSpec::Remote(r) => r.url.is_empty(),
        SourceSpec::Memory(_) => false,
    };
    if empty {
        return Err(CompareError::Config(format!("{name} cannot be empty")));
    }
    Ok(())
}

pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(CompareError::Config("chunk_size must be positive".into()));
    }
    if chunk_size > CompareOptions::MAX_CHUNK_SIZE {
        return Err(CompareError::Config("chunk_size must be <= 1 GiB".into()));
    }
    Ok(())
}

pub fn validate_max_workers(max_workers: usize) -> Result<()> {
    if max_workers > CompareOptions::MAX_WORKERS {
        return Err(CompareError::Config(format!(
            "max_workers must be <= {}",
            CompareOptions::MAX_WORKERS
        )));
    }
    Ok(())
}

pub fn validate_timeout(timeout: Duration, name: &str) -> Result<()> {
    if timeout.is_zero() {
        return Err(CompareError::Config(format!("{name} must be positive")));
    }
    Ok(())
}

/// Full option check shared by every entry point.
pub fn validate_options(opts: &CompareOptions) -> Result<()> {
    validate_chunk_size(opts.chunk_size)?;
    validate_max_workers(opts.max_workers)?;
    validate_timeout(opts.timeout, "timeout")?;
    if let Some(t) = opts.comparison_timeout {
        validate_timeout(t, "comparison_timeout")?;
    }
    Ok(())
}
