use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use subpatch::compat::CompatMode;
use subpatch::config::{load_from_path, FeatureSet, Profile};
use subpatch::report;
use subpatch::session::{self, RunReport};

#[derive(Parser)]
#[command(name = "subpatch")]
#[command(about = "Idempotent structural patcher for proxy-subscription YAML", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunOpts {
    /// Path to the subscription YAML document
    file: PathBuf,

    /// Patch profile TOML (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated feature list: resi,bypass (default: both)
    #[arg(long)]
    features: Option<String>,

    /// Compatibility mode: auto | mihomo | classic
    #[arg(long)]
    compat: Option<CompatMode>,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch the document in place
    Apply {
        #[command(flatten)]
        opts: RunOpts,

        /// Compute and report changes without writing the file
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of the changes
        #[arg(short, long)]
        diff: bool,

        /// Do not write a .bak backup before overwriting
        #[arg(long)]
        no_backup: bool,
    },

    /// Print the unified diff the patch would produce
    Diff {
        #[command(flatten)]
        opts: RunOpts,
    },

    /// Print an itemized changelog of the pending changes
    Changelog {
        #[command(flatten)]
        opts: RunOpts,
    },

    /// Verify the document is already fully patched
    Check {
        #[command(flatten)]
        opts: RunOpts,
    },

    /// Explain what the enabled features would do
    Explain {
        /// Patch profile TOML (built-in defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Comma-separated feature list: resi,bypass (default: both)
        #[arg(long)]
        features: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            opts,
            dry_run,
            diff,
            no_backup,
        } => cmd_apply(opts, dry_run, diff, no_backup),
        Commands::Diff { opts } => cmd_diff(opts),
        Commands::Changelog { opts } => cmd_changelog(opts),
        Commands::Check { opts } => cmd_check(opts),
        Commands::Explain { config, features } => cmd_explain(config, features),
    }
}

/// Merge the profile file with CLI overrides into one run configuration.
fn resolve_profile(
    config: &Option<PathBuf>,
    features: &Option<String>,
    compat: &Option<CompatMode>,
) -> Result<Profile> {
    let mut profile = match config {
        Some(path) => load_from_path(path)?,
        None => Profile::default(),
    };
    if let Some(csv) = features {
        profile.features = FeatureSet::parse(csv)?;
    }
    if let Some(mode) = compat {
        profile.compat = *mode;
    }
    Ok(profile)
}

fn execute(opts: &RunOpts) -> Result<(String, RunReport)> {
    let profile = resolve_profile(&opts.config, &opts.features, &opts.compat)?;
    let original = fs::read_to_string(&opts.file)
        .with_context(|| format!("failed to read {}", opts.file.display()))?;
    let report = session::run(&profile, &original)?;
    Ok((original, report))
}

fn print_warnings(report: &RunReport) {
    for warning in &report.warnings {
        eprintln!("{}", format!("Warning: {warning}").yellow());
    }
}

fn print_status(report: &RunReport) {
    println!(
        "{}",
        format!("Compatibility: {}", report.compat.name()).dimmed()
    );
}

fn cmd_apply(opts: RunOpts, dry_run: bool, show_diff: bool, no_backup: bool) -> Result<()> {
    let (original, report) = execute(&opts)?;

    print_status(&report);
    print_warnings(&report);

    if !report.changed {
        println!(
            "{} No changes needed (already patched).",
            "⊙".yellow()
        );
        return Ok(());
    }

    for change in &report.changes {
        println!("{} {}", "✓".green(), change);
    }

    if show_diff {
        display_diff(&opts.file, &report.before, &report.patched);
    }

    if dry_run {
        println!("{}", "[DRY RUN - no files were written]".cyan());
        return Ok(());
    }

    if !no_backup {
        let backup = write_backup(&opts.file, &original)?;
        println!(
            "{}",
            format!("Backup written to {}", backup.display()).dimmed()
        );
    }
    atomic_write(&opts.file, report.patched.as_bytes())?;
    println!(
        "{} Patched {} ({} changes)",
        "✓".green(),
        opts.file.display(),
        report.changes.len()
    );
    Ok(())
}

fn cmd_diff(opts: RunOpts) -> Result<()> {
    let (_, report) = execute(&opts)?;
    print_warnings(&report);
    if !report.changed {
        println!("No diff (already patched).");
        return Ok(());
    }
    let from = format!("{} (original)", opts.file.display());
    let to = format!("{} (patched)", opts.file.display());
    print!(
        "{}",
        report::unified_diff(&report.before, &report.patched, &from, &to)
    );
    Ok(())
}

fn cmd_changelog(opts: RunOpts) -> Result<()> {
    let (_, report) = execute(&opts)?;
    print!(
        "{}",
        report::render_changelog(&report.changes, &report.warnings)
    );
    Ok(())
}

fn cmd_check(opts: RunOpts) -> Result<()> {
    let (_, report) = execute(&opts)?;
    print_status(&report);
    print_warnings(&report);

    if report.changed {
        eprintln!(
            "{} {} changes pending:",
            "✗".red(),
            report.changes.len()
        );
        for change in &report.changes {
            eprintln!("  - {change}");
        }
        std::process::exit(1);
    }

    println!("{} Document is fully patched.", "✓".green());
    Ok(())
}

fn cmd_explain(config: Option<PathBuf>, features: Option<String>) -> Result<()> {
    let profile = resolve_profile(&config, &features, &None)?;
    println!("{}", explain(&profile));
    Ok(())
}

fn explain(profile: &Profile) -> String {
    let mut lines = Vec::new();
    lines.push(
        "subpatch enforces an idempotent structural layout on a proxy-subscription YAML."
            .to_string(),
    );
    lines.push(String::new());
    lines.push(format!("Enabled features: {}", profile.features.names()));
    lines.push(format!("Compat mode: {}", profile.compat));
    lines.push(String::new());
    if profile.features.resi {
        let resi = &profile.resi;
        lines.push("- resi: inject/maintain the residential chain:".to_string());
        lines.push(format!(
            "  - node: {} (dialer-proxy -> {})",
            resi.proxy_name, resi.dialer_group
        ));
        lines.push(format!(
            "  - groups: {} (url-test) / {} (select)",
            resi.dialer_group, resi.entry_group
        ));
        lines.push(format!(
            "  - ensures top-level port: {}",
            resi.listen_port
        ));
        lines.push(String::new());
    }
    if profile.features.bypass {
        let bypass = &profile.bypass;
        lines.push("- bypass: keep private ranges and selected domains DIRECT:".to_string());
        lines.push(format!(
            "  - tun.route-exclude-address: {}",
            bypass.cidrs.join(", ")
        ));
        if !bypass.domains.is_empty() {
            lines.push(format!("  - bypass domains: {}", bypass.domains.join(", ")));
        }
        lines.push("  - DIRECT safety-net entries appended to rules:".to_string());
        lines.push(String::new());
    }
    lines.push(
        "Rollback: restore from the generated .bak.* file (unless --no-backup was used)."
            .to_string(),
    );
    lines.join("\n")
}

/// Show a colorized unified diff between original and patched content.
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

/// Write a timestamped sibling backup of the original content.
fn write_backup(path: &Path, content: &str) -> Result<PathBuf> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "subscription.yaml".to_string());
    let backup = path.with_file_name(format!("{file_name}.bak.{timestamp}"));
    fs::write(&backup, content)
        .with_context(|| format!("failed to write backup {}", backup.display()))?;
    Ok(backup)
}

/// Atomic file write: tempfile in the same directory + fsync + rename.
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create tempfile next to {}", path.display()))?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
