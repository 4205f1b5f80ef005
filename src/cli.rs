//! bytecmp CLI: argument parsing and subcommand handlers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use crate::types::{CompareOptions, CompareResult, DirResult};
use crate::utils::Colors;
use crate::utils::options_toml::{apply_file_to_options, load_bytecmp_toml};

/// Byte-equality checks for files, directories, archives, and URLs.
#[derive(Parser)]
#[command(name = "bytecmp")]
#[command(about = "Answer one question fast: are these two sources identical?")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand. Unset values fall back to
/// `.bytecmp.toml` (when present), then to the library defaults.
#[derive(Clone, Args)]
pub struct CommonArgs {
    /// Chunk size in bytes for the sequential scan.
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Disable the size precheck.
    #[arg(long)]
    pub no_size_precheck: bool,

    /// Disable the probe-offset quick check.
    #[arg(long)]
    pub no_quick_check: bool,

    /// Worker pool size (0 = auto, 1 = sequential).
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// HTTP timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Custom HTTP header as KEY:VALUE. Can be repeated.
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// Skip TLS certificate verification.
    #[arg(long)]
    pub insecure: bool,

    /// Proxy URL (http://, https://, or socks5://).
    #[arg(long)]
    pub proxy: Option<String>,

    /// Allow HTTP targets in private/loopback address space.
    #[arg(long)]
    pub allow_private: bool,

    /// HTTP retry count (exponential backoff).
    #[arg(long)]
    pub retries: Option<u32>,

    /// Wall-clock comparison timeout in seconds (0 = no limit).
    #[arg(long)]
    pub comparison_timeout: Option<u64>,

    /// Print results as JSON.
    #[arg(long)]
    pub json: bool,

    /// Verbose output. Default: false.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compare two files or URLs byte-by-byte.
    File {
        source_a: String,
        source_b: String,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Compare two directory trees.
    Dir {
        dir_a: PathBuf,
        dir_b: PathBuf,
        /// Ignore globs, matched against each path component. Can specify
        /// multiple: -i pattern1 pattern2
        #[arg(long, short = 'i', num_args = 1..)]
        ignore: Vec<String>,
        /// Do not follow symbolic links; compare them by target.
        #[arg(long)]
        no_follow_symlinks: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Compare two archives (tar, tar.gz, tar.bz2, tar.xz, zip) entry-by-entry.
    Archive {
        path_a: PathBuf,
        path_b: PathBuf,
        /// Compare streaming fingerprints instead of buffered bytes.
        #[arg(long)]
        hash: bool,
        /// Max archive entries before bailing out (0 = unlimited).
        #[arg(long)]
        max_entries: Option<u64>,
        /// Max cumulative decompressed bytes (0 = unlimited).
        #[arg(long)]
        max_decompressed_size: Option<u64>,
        /// Max decompressed/compressed ratio (0 = unlimited).
        #[arg(long)]
        max_compression_ratio: Option<u64>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Check that every source is identical to the first (first failure wins).
    All {
        #[arg(num_args = 2..)]
        sources: Vec<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Pairwise-compare every source and group the identical ones.
    Many {
        #[arg(num_args = 2..)]
        sources: Vec<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Compare files under a directory against a TOML map of `rel = "url"`.
    DirUrls {
        dir: PathBuf,
        map: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
}

impl Cli {
    pub fn common(&self) -> &CommonArgs {
        match &self.command {
            Commands::File { common, .. }
            | Commands::Dir { common, .. }
            | Commands::Archive { common, .. }
            | Commands::All { common, .. }
            | Commands::Many { common, .. }
            | Commands::DirUrls { common, .. } => common,
        }
    }
}

/// Build [`CompareOptions`] from file config plus CLI flags (flags win).
fn build_options(common: &CommonArgs, cancel_flag: Arc<AtomicBool>) -> Result<CompareOptions> {
    let mut opts = CompareOptions::default();
    if let Some(file) = load_bytecmp_toml(&std::env::current_dir().unwrap_or_else(|_| ".".into())) {
        apply_file_to_options(&file, &mut opts);
    }

    if let Some(n) = common.chunk_size {
        opts.chunk_size = n;
    }
    if common.no_size_precheck {
        opts.size_precheck = false;
    }
    if common.no_quick_check {
        opts.quick_check = false;
    }
    if let Some(n) = common.workers {
        opts.max_workers = n;
    }
    if let Some(secs) = common.timeout {
        opts.timeout = Duration::from_secs(secs);
    }
    for header in &common.headers {
        let (key, value) = header
            .split_once(':')
            .with_context(|| format!("header must be KEY:VALUE, got {header:?}"))?;
        opts.headers
            .push((key.trim().to_string(), value.trim().to_string()));
    }
    if common.insecure {
        opts.verify_tls = false;
    }
    if let Some(proxy) = &common.proxy {
        opts.proxy = Some(proxy.clone());
    }
    if common.allow_private {
        opts.allow_private = true;
    }
    if let Some(n) = common.retries {
        opts.retries = n;
    }
    if let Some(secs) = common.comparison_timeout {
        opts.comparison_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    opts.cancel_flag = Some(cancel_flag);
    Ok(opts)
}

/// Setup Ctrl+C handler and return the shared flag the comparison observes
/// at chunk boundaries.
fn setup_ctrlc_handler() -> Result<Arc<AtomicBool>> {
    let cancel_requested = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel_requested);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("set Ctrl+C handler")?;
    Ok(cancel_requested)
}

/// Run the parsed command. Returns the process exit code: 0 equal, 1 not
/// equal; errors bubble up to main (exit 2).
pub fn run(cli: Cli) -> Result<u8> {
    let cancel_flag = setup_ctrlc_handler()?;

    match cli.command {
        Commands::File {
            source_a,
            source_b,
            common,
        } => {
            let opts = build_options(&common, cancel_flag)?;
            let equal = crate::compare(source_a.as_str(), source_b.as_str(), &opts)?;
            print_bool(equal, common.json);
            Ok(exit_code(equal))
        }
        Commands::Dir {
            dir_a,
            dir_b,
            ignore,
            no_follow_symlinks,
            common,
        } => {
            let mut opts = build_options(&common, cancel_flag)?;
            if !ignore.is_empty() {
                opts.ignore = ignore;
            }
            if no_follow_symlinks {
                opts.follow_symlinks = false;
            }
            let result = crate::compare_dir(&dir_a, &dir_b, &opts)?;
            print_dir_result(&result, common.json)?;
            Ok(exit_code(result.equal))
        }
        Commands::Archive {
            path_a,
            path_b,
            hash,
            max_entries,
            max_decompressed_size,
            max_compression_ratio,
            common,
        } => {
            let mut opts = build_options(&common, cancel_flag)?;
            opts.hash_compare = hash;
            if let Some(n) = max_entries {
                opts.max_entries = (n > 0).then_some(n);
            }
            if let Some(n) = max_decompressed_size {
                opts.max_decompressed_size = (n > 0).then_some(n);
            }
            if let Some(n) = max_compression_ratio {
                opts.max_compression_ratio = (n > 0).then_some(n);
            }
            let result = crate::compare_archive(&path_a, &path_b, &opts)?;
            print_dir_result(&result, common.json)?;
            Ok(exit_code(result.equal))
        }
        Commands::All { sources, common } => {
            let opts = build_options(&common, cancel_flag)?;
            let equal = crate::compare_all(sources.iter().map(String::as_str), &opts)?;
            print_bool(equal, common.json);
            Ok(exit_code(equal))
        }
        Commands::Many { sources, common } => {
            let opts = build_options(&common, cancel_flag)?;
            let result = crate::compare_many(sources.iter().map(String::as_str), &opts)?;
            print_compare_result(&result, common.json)?;
            Ok(exit_code(result.all_equal))
        }
        Commands::DirUrls { dir, map, common } => {
            let opts = build_options(&common, cancel_flag)?;
            let url_map = load_url_map(&map)?;
            let result = crate::compare_dir_urls(&dir, &url_map, &opts)?;
            print_dir_result(&result, common.json)?;
            Ok(exit_code(result.equal))
        }
    }
}

fn exit_code(equal: bool) -> u8 {
    if equal { 0 } else { 1 }
}

/// Read a TOML file of `relative/path = "https://..."` pairs.
fn load_url_map(path: &std::path::Path) -> Result<BTreeMap<String, String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read URL map {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parse URL map {}", path.display()))
}

fn print_bool(equal: bool, json: bool) {
    if json {
        println!("{}", serde_json::json!({ "equal": equal }));
    } else if equal {
        info!("Sources are identical.");
    } else {
        info!("Sources differ.");
    }
}

fn print_dir_result(result: &DirResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    if result.equal {
        info!("No differences.");
        return Ok(());
    }
    info!(
        "{} | {} | {} | {}",
        Colors::colorize(Colors::DIFF, &format!("Differing: {}", result.diff.len())),
        Colors::colorize(Colors::ONLY_LEFT, &format!("Only left: {}", result.only_left.len())),
        Colors::colorize(Colors::ONLY_RIGHT, &format!("Only right: {}", result.only_right.len())),
        Colors::colorize(Colors::ERRORS, &format!("Errors: {}", result.errors.len())),
    );
    for (path, reason) in &result.diff {
        info!("{}", Colors::colorize(Colors::DIFF, &format!("M {path} ({reason})")));
    }
    for path in &result.only_left {
        info!("{}", Colors::colorize(Colors::ONLY_LEFT, &format!("L {path}")));
    }
    for path in &result.only_right {
        info!("{}", Colors::colorize(Colors::ONLY_RIGHT, &format!("R {path}")));
    }
    for path in &result.errors {
        warn!("{}", Colors::colorize(Colors::ERRORS, &format!("E {path}")));
    }
    Ok(())
}

fn print_compare_result(result: &CompareResult, json: bool) -> Result<()> {
    if json {
        let pairs: Vec<_> = result
            .diff
            .iter()
            .map(|((a, b), eq)| serde_json::json!({ "left": a, "right": b, "equal": eq }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "all_equal": result.all_equal,
                "groups": result.groups,
                "pairs": pairs,
            }))?
        );
        return Ok(());
    }
    if result.all_equal {
        info!("All {} sources are identical.", result.groups[0].len());
        return Ok(());
    }
    info!("{} groups:", result.groups.len());
    for (i, group) in result.groups.iter().enumerate() {
        let members: Vec<&str> = group.iter().map(String::as_str).collect();
        info!("  [{}] {}", i + 1, members.join(", "));
    }
    Ok(())
}
