//! # fim CLI - File integrity tracking
//!
//! Command-line interface for the fim library.
//!
//! ## Usage
//! ```bash
//! # Start tracking the current directory (records the first snapshot)
//! fim init
//!
//! # What changed since the last snapshot?
//! fim status
//!
//! # Record the current state
//! fim commit -m "Imported holiday photos"
//!
//! # Files whose content changed behind their metadata
//! fim dcor
//!
//! # Files with identical content, using the cheapest hash tier
//! fim --hash-mode small fdup
//!
//! # Delete redundant copies (see what would go first)
//! fim rdup --dry-run
//!
//! # Put recorded modification times back
//! fim rdates
//! ```

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use fim::{
    utils, CompareResult, Difference, Fim, FimBuilder, FimError, HashMode, Modification,
    ProgressInfo, ResetField, ResetResult, Result,
};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// fim CLI - Track the integrity of a directory tree
#[derive(Parser)]
#[command(name = "fim")]
#[command(version)]
#[command(about = "File integrity manager - detect changes, corruption and duplicates")]
#[command(long_about = None)]
struct Cli {
    /// Directory to work on (defaults to current)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Hash tiers to compute
    #[arg(long, global = true, value_enum)]
    hash_mode: Option<HashModeArg>,

    /// Hashing threads
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    /// Show a progress bar while scanning
    #[arg(long, global = true)]
    progress: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a directory and record its first snapshot
    Init {
        /// Comment of the first snapshot
        #[arg(short, long, default_value = "Initial state")]
        message: String,

        /// Glob patterns to ignore
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Store snapshots uncompressed
        #[arg(long)]
        no_compression: bool,
    },

    /// Record the current state as a new snapshot
    #[command(alias = "ci")]
    Commit {
        /// Snapshot comment
        #[arg(short, long)]
        message: String,
    },

    /// Compare the current state with the last snapshot
    #[command(alias = "diff", alias = "st")]
    Status,

    /// Find files whose content changed while length and date did not
    #[command(alias = "dcor")]
    DetectCorruption,

    /// Find files with identical content
    #[command(alias = "fdup")]
    FindDuplicates,

    /// Compare two recorded snapshots
    Compare {
        /// Older snapshot number
        from: u32,
        /// Newer snapshot number
        to: u32,
    },

    /// List recorded snapshots
    Log {
        /// Show at most this many snapshots, newest last
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Remove the last snapshot
    Rollback,

    /// Keep only the last snapshot, renumbered as #1
    #[command(alias = "pst", alias = "purge")]
    PurgeStates,

    /// Delete every copy of a duplicated file but one
    #[command(alias = "rdup")]
    RemoveDuplicates {
        /// Only report what would be removed
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Restore the modification dates recorded in the last snapshot
    #[command(alias = "rdates", alias = "rdate")]
    ResetDates,

    /// Restore the permissions and dates recorded in the last snapshot
    #[command(alias = "rfa")]
    ResetFileAttrs,
}

#[derive(Clone, Copy, ValueEnum)]
enum HashModeArg {
    /// Length and dates only
    DontHash,
    /// Sampled 4 KiB blocks
    Small,
    /// Sampled 4 KiB and 1 MiB blocks
    Medium,
    /// Every tier including the full content
    All,
}

impl From<HashModeArg> for HashMode {
    fn from(arg: HashModeArg) -> Self {
        match arg {
            HashModeArg::DontHash => HashMode::DontHash,
            HashModeArg::Small => HashMode::HashSmallBlock,
            HashModeArg::Medium => HashMode::HashMediumBlock,
            HashModeArg::All => HashMode::HashAll,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        let code = if e.is_usage_error() { 2 } else { 1 };
        std::process::exit(code);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let path = cli.path.clone().unwrap_or_else(|| PathBuf::from("."));
    let hash_mode = cli.hash_mode.map(HashMode::from);

    if let (Some(HashMode::DontHash), Some(threads)) = (hash_mode, cli.threads) {
        if threads > 1 {
            return Err(FimError::usage(
                "'do not hash' mode reads no content, use a single thread",
            ));
        }
    }

    let options = Options {
        hash_mode,
        threads: cli.threads,
        progress: cli.progress,
    };

    match cli.command {
        Commands::Init {
            message,
            ignore,
            no_compression,
        } => cmd_init(path, &options, message, ignore, no_compression),
        Commands::Commit { message } => cmd_commit(path, &options, message),
        Commands::Status => cmd_status(path, &options),
        Commands::DetectCorruption => cmd_detect_corruption(path, &options),
        Commands::FindDuplicates => cmd_find_duplicates(path, &options),
        Commands::Compare { from, to } => cmd_compare(path, &options, from, to),
        Commands::Log { limit } => cmd_log(path, &options, limit),
        Commands::Rollback => cmd_rollback(path, &options),
        Commands::PurgeStates => cmd_purge_states(path, &options),
        Commands::RemoveDuplicates { dry_run } => cmd_remove_duplicates(path, &options, dry_run),
        Commands::ResetDates => cmd_reset(path, &options, false),
        Commands::ResetFileAttrs => cmd_reset(path, &options, true),
    }
}

/// Settings shared by every command
struct Options {
    hash_mode: Option<HashMode>,
    threads: Option<usize>,
    progress: bool,
}

/// Create the repository and record the first snapshot
fn cmd_init(
    root_path: PathBuf,
    options: &Options,
    comment: String,
    ignore: Vec<String>,
    no_compression: bool,
) -> Result<()> {
    if root_path.join(fim::fim::REPOSITORY_DIR).exists() {
        return Err(FimError::RepositoryAlreadyExists(root_path));
    }

    let mut builder = FimBuilder::new()
        .ignore_patterns(ignore)
        .compress_snapshots(!no_compression);
    if let Some(mode) = options.hash_mode {
        builder = builder.hash_mode(mode);
    }
    if let Some(threads) = options.threads {
        builder = builder.parallel_workers(threads);
    }
    let mut fim = builder.build(root_path.clone())?;

    println!(
        "{} with hash mode '{}'",
        "Initializing fim".blue().bold(),
        fim.hash_mode()
    );

    let start = Instant::now();
    let progress = progress_bar(options.progress);
    let result = fim.commit(&comment, progress.callback())?;
    progress.finish();

    println!("{} Initialized fim repository", "✓".green().bold());
    println!("  Root: {}", root_path.display().to_string().cyan());
    println!(
        "  Files: {}",
        result.compare.modification_counts().added.to_string().cyan()
    );
    println!("  Time: {}", format_duration(start.elapsed()).to_string().cyan());
    Ok(())
}

/// Record a new snapshot
fn cmd_commit(path: PathBuf, options: &Options, comment: String) -> Result<()> {
    let mut fim = open_fim(path, options)?;

    let start = Instant::now();
    let progress = progress_bar(options.progress);
    let result = fim.commit(&comment, progress.callback())?;
    progress.finish();

    print_compare(&result.compare);
    match result.snapshot_number {
        Some(number) => {
            println!(
                "\n{} Created snapshot {}",
                "✓".green().bold(),
                format!("#{}", number).yellow().bold()
            );
            println!("  Comment: {}", comment.cyan());
            println!("  Time: {}", format_duration(start.elapsed()).to_string().cyan());
        }
        None => println!("\nNothing committed"),
    }
    Ok(())
}

/// Compare the working tree with the last snapshot
fn cmd_status(path: PathBuf, options: &Options) -> Result<()> {
    let fim = open_fim(path, options)?;
    print_header(&fim, "Comparing with the last snapshot");

    let progress = progress_bar(options.progress);
    let result = fim.status(progress.callback())?;
    progress.finish();

    print_compare(&result);
    Ok(())
}

/// Search for silent corruption
fn cmd_detect_corruption(path: PathBuf, options: &Options) -> Result<()> {
    let fim = open_fim(path, options)?;
    print_header(&fim, "Searching for corrupted files");

    let progress = progress_bar(options.progress);
    let result = fim.detect_corruption(progress.callback())?;
    progress.finish();

    print_compare(&result);
    Ok(())
}

/// Report groups of identical files
fn cmd_find_duplicates(path: PathBuf, options: &Options) -> Result<()> {
    let fim = open_fim(path, options)?;
    print_header(&fim, "Searching for duplicate files");

    let progress = progress_bar(options.progress);
    let result = fim.find_duplicates(progress.callback())?;
    progress.finish();

    for set in &result.sets {
        println!(
            "{} duplicated {} times, {} each",
            set.representative().file_name.yellow().bold(),
            set.duplicated_count(),
            utils::format_bytes(set.representative().file_length)
        );
        for member in &set.members[1..] {
            println!("  {}", member.file_name);
        }
    }
    if result.has_duplicates() {
        println!();
    }
    println!("{}", result.to_string().bold());
    Ok(())
}

/// Compare two recorded snapshots
fn cmd_compare(path: PathBuf, options: &Options, from: u32, to: u32) -> Result<()> {
    let fim = open_fim(path, options)?;
    println!(
        "{} #{} and #{}",
        "Comparing snapshots".blue().bold(),
        from,
        to
    );
    print_compare(&fim.compare_snapshots(from, to)?);
    Ok(())
}

/// List recorded snapshots
fn cmd_log(path: PathBuf, options: &Options, limit: Option<usize>) -> Result<()> {
    let fim = open_fim(path, options)?;
    let snapshots = fim.log()?;
    if snapshots.is_empty() {
        println!("No snapshot recorded");
        return Ok(());
    }

    let skip = limit.map_or(0, |limit| snapshots.len().saturating_sub(limit));
    for summary in snapshots.iter().skip(skip) {
        println!(
            "{} {}",
            format!("Snapshot #{}", summary.number).yellow().bold(),
            summary
                .timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed()
        );
        println!("  Comment: {}", summary.comment);
        println!("  Hash mode: {}", summary.hash_mode);
        println!("  Files: {}", summary.file_count);
        println!("  {}", summary.modification_counts);
    }
    Ok(())
}

/// Remove the last snapshot
fn cmd_rollback(path: PathBuf, options: &Options) -> Result<()> {
    let mut fim = open_fim(path, options)?;
    match fim.rollback()? {
        Some(number) => println!(
            "{} Removed snapshot {}",
            "✓".green().bold(),
            format!("#{}", number).yellow().bold()
        ),
        None => println!("No snapshot to remove"),
    }
    Ok(())
}

/// Drop the history before the last snapshot
fn cmd_purge_states(path: PathBuf, options: &Options) -> Result<()> {
    let mut fim = open_fim(path, options)?;
    match fim.purge_states()? {
        0 => println!("Nothing to purge"),
        removed => println!(
            "{} Purged {} snapshots, the last one is now {}",
            "✓".green().bold(),
            removed,
            "#1".yellow().bold()
        ),
    }
    Ok(())
}

/// Delete redundant copies of duplicated files
fn cmd_remove_duplicates(path: PathBuf, options: &Options, dry_run: bool) -> Result<()> {
    let fim = open_fim(path, options)?;
    print_header(&fim, "Removing duplicate files");

    let progress = progress_bar(options.progress);
    let removal = fim.remove_duplicates(dry_run, progress.callback())?;
    progress.finish();

    for copy in &removal.removed {
        println!(
            "{} is a duplicate of {}",
            copy.file_name.yellow(),
            copy.kept
        );
    }
    print_warnings(&removal.warnings);
    if !removal.removed.is_empty() {
        println!();
    }
    println!("{}", removal.to_string().bold());
    Ok(())
}

/// Write recorded metadata back onto the files
fn cmd_reset(path: PathBuf, options: &Options, attributes: bool) -> Result<()> {
    let fim = open_fim(path, options)?;
    let result = if attributes {
        fim.reset_file_attributes()?
    } else {
        fim.reset_dates()?
    };
    print_reset(&result);
    Ok(())
}

/// Open the repository containing `path` with the session options applied
fn open_fim(path: PathBuf, options: &Options) -> Result<Fim> {
    let mut fim = Fim::discover(&path)?;
    if let Some(mode) = options.hash_mode {
        fim = fim.with_hash_mode(mode)?;
    }
    if let Some(threads) = options.threads {
        fim = fim.with_parallel_workers(threads);
    }
    Ok(fim)
}

fn print_header(fim: &Fim, action: &str) {
    let scope = fim
        .sub_directory()
        .map(|dir| format!(" in {}", dir))
        .unwrap_or_default();
    println!(
        "{}{} (hash mode '{}')",
        action.blue().bold(),
        scope,
        fim.hash_mode()
    );
}

/// Print every difference followed by the summary line
fn print_compare(result: &CompareResult) {
    for (kind, difference) in result.entries() {
        let label = format!("{}:", capitalize(kind.label()));
        println!("{} {}", colorize(*kind, &format!("{:<18}", label)), describe(*kind, difference));
    }
    if result.something_modified() {
        println!();
    }
    println!("{}", result.to_string().bold());
}

fn print_reset(result: &ResetResult) {
    println!(
        "{} from snapshot {}",
        "Resetting".blue().bold(),
        format!("#{}", result.snapshot_number).yellow().bold()
    );
    for reset in &result.resets {
        match &reset.field {
            ResetField::LastModified { from, to } => println!(
                "Set last modified: {}\t{} -> {}",
                reset.file_name,
                format_millis(*from),
                format_millis(*to)
            ),
            ResetField::Permissions { from, to } => println!(
                "Set permissions: {}\t{} -> {}",
                reset.file_name, from, to
            ),
        }
    }
    print_warnings(&result.warnings);
    if !result.resets.is_empty() {
        println!();
    }
    println!("{}", result.to_string().bold());
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("{}: {}", "Warning".yellow().bold(), warning);
    }
}

fn describe(kind: Modification, difference: &Difference) -> String {
    match kind {
        Modification::Renamed | Modification::Copied | Modification::Duplicated => format!(
            "{} -> {}",
            difference.previous_file_name().unwrap_or_default(),
            difference.file_name()
        ),
        Modification::DateModified | Modification::ContentModified
            if difference.last_modified_changed() =>
        {
            match (&difference.previous, &difference.current) {
                (Some(previous), Some(current)) => format!(
                    "{}\tlast modified: {} -> {}",
                    difference.file_name(),
                    format_millis(previous.last_modified()),
                    format_millis(current.last_modified())
                ),
                _ => difference.file_name().to_string(),
            }
        }
        _ => difference.file_name().to_string(),
    }
}

fn colorize(kind: Modification, text: &str) -> ColoredString {
    match kind {
        Modification::Added | Modification::Copied | Modification::Duplicated => text.green(),
        Modification::Deleted => text.red(),
        Modification::Corrupted => text.red().bold(),
        Modification::Renamed => text.cyan(),
        _ => text.yellow(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn format_millis(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|time| time.format("%Y/%m/%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Optional scan progress bar
struct Progress(Option<ProgressBar>);

impl Progress {
    fn callback(&self) -> Option<impl Fn(ProgressInfo) + Send + Sync> {
        self.0.clone().map(|pb| {
            move |info: ProgressInfo| {
                if let Some(total) = info.total_bytes {
                    pb.set_length(total);
                }
                pb.set_position(info.bytes_processed);
                pb.set_message(format!(
                    "{} {}/{}",
                    info.operation,
                    info.processed,
                    info.total.unwrap_or_default()
                ));
            }
        })
    }

    fn finish(&self) {
        if let Some(pb) = &self.0 {
            pb.finish_and_clear();
        }
    }
}

fn progress_bar(enabled: bool) -> Progress {
    if !enabled {
        return Progress(None);
    }
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    Progress(Some(pb))
}
