//! Load `.bytecmp.toml` from the working directory (CLI only). Library
//! callers build [`CompareOptions`](crate::CompareOptions) directly.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::types::CompareOptions;

#[derive(Debug, Deserialize)]
pub(crate) struct BytecmpToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsSection {
    chunk_size: Option<usize>,
    size_precheck: Option<bool>,
    quick_check: Option<bool>,
    follow_symlinks: Option<bool>,
    workers: Option<usize>,
    ignore: Option<Vec<String>>,
    timeout_secs: Option<u64>,
    follow_redirects: Option<bool>,
    verify_tls: Option<bool>,
    proxy: Option<String>,
    allow_private: Option<bool>,
    retries: Option<u32>,
    comparison_timeout_secs: Option<u64>,
}

/// Load `.bytecmp.toml` from `dir` if present. Returns None if the file is
/// missing or unreadable; parse errors are logged, not fatal (the CLI flags
/// still apply on top).
pub(crate) fn load_bytecmp_toml(dir: &Path) -> Option<BytecmpToml> {
    let path = dir.join(".bytecmp.toml");
    let s = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite an options field from the file when present.
macro_rules! apply_file_opt {
    ($section:expr, $opts:expr, $field:ident => $opts_field:ident) => {
        if let Some(v) = $section.$field {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file config to options (only fields present in the file). Call
/// before applying CLI flags so the command line wins.
pub(crate) fn apply_file_to_options(file: &BytecmpToml, opts: &mut CompareOptions) {
    let s = &file.settings;
    apply_file_opt!(s, opts, chunk_size => chunk_size);
    apply_file_opt!(s, opts, size_precheck => size_precheck);
    apply_file_opt!(s, opts, quick_check => quick_check);
    apply_file_opt!(s, opts, follow_symlinks => follow_symlinks);
    apply_file_opt!(s, opts, workers => max_workers);
    if let Some(ref v) = s.ignore {
        opts.ignore = v.clone();
    }
    if let Some(secs) = s.timeout_secs {
        opts.timeout = Duration::from_secs(secs);
    }
    apply_file_opt!(s, opts, follow_redirects => follow_redirects);
    apply_file_opt!(s, opts, verify_tls => verify_tls);
    if let Some(ref p) = s.proxy {
        opts.proxy = Some(p.clone());
    }
    apply_file_opt!(s, opts, allow_private => allow_private);
    apply_file_opt!(s, opts, retries => retries);
    if let Some(secs) = s.comparison_timeout_secs {
        opts.comparison_timeout = Some(Duration::from_secs(secs));
    }
}
