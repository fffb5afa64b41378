//! Command-line interface.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use semver::Version;

use crate::packaging::builder::ConfirmFn;
use crate::packaging::{bundle, DeltaMode, PackOptions, PackageBuilder, TargetOs};
use crate::Result;

/// Release packaging and delta updates for self-updating desktop apps.
#[derive(Debug, Parser)]
#[command(name = "relpack", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build and publish a release from a directory of application files
    Pack(PackArgs),
    /// Inspect a setup executable for an embedded release package
    CheckBundle {
        /// Path of the setup executable or bootstrapper template
        bundle: PathBuf,
    },
    /// Extract the release package embedded in a setup executable
    ExtractBundle {
        /// Path of the setup executable
        bundle: PathBuf,
        /// Where to write the extracted package
        output: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct PackArgs {
    /// Unique id of the package
    #[arg(long)]
    pub pack_id: String,

    /// Version of the release (semver)
    #[arg(long)]
    pub pack_version: Version,

    /// Directory containing the application files to release
    #[arg(long)]
    pub pack_dir: PathBuf,

    /// Output directory for release artifacts and index files
    #[arg(long, default_value = "Releases", env = "RELPACK_RELEASE_DIR")]
    pub release_dir: PathBuf,

    /// Release channel; defaults to the target OS channel (win/osx/linux)
    #[arg(long)]
    pub channel: Option<String>,

    /// Delta generation strategy
    #[arg(long, value_enum, default_value = "best-speed")]
    pub delta: DeltaMode,

    /// Keep only the newest N full releases; 0 keeps everything
    #[arg(long, default_value_t = 0)]
    pub keep_max_releases: usize,

    /// File name of the main executable inside the pack directory
    #[arg(long)]
    pub main_exe: Option<String>,

    /// Markdown file with release notes to embed in the package
    #[arg(long)]
    pub notes: Option<PathBuf>,

    /// Target operating system; defaults to the current OS
    #[arg(long, value_enum)]
    pub target_os: Option<TargetOs>,

    /// Skip building the portable archive
    #[arg(long)]
    pub no_portable: bool,

    /// Skip building the setup executable
    #[arg(long)]
    pub no_setup: bool,

    /// Extra directory searched for helper files (bootstrapper templates,
    /// zstd); repeatable
    #[arg(long = "search-path")]
    pub search_paths: Vec<PathBuf>,

    /// Answer yes to overwrite confirmations (non-interactive runs)
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl PackArgs {
    fn into_options(self) -> (PackOptions, bool) {
        let yes = self.yes;
        let options = PackOptions {
            pack_id: self.pack_id,
            pack_version: self.pack_version,
            pack_dir: self.pack_dir,
            release_dir: self.release_dir,
            channel: self.channel,
            target_os: self.target_os.unwrap_or_else(TargetOs::current),
            main_exe: self.main_exe,
            notes: self.notes,
            delta_mode: self.delta,
            keep_max_releases: self.keep_max_releases,
            no_portable: self.no_portable,
            no_setup: self.no_setup,
            search_paths: self.search_paths,
        };
        (options, yes)
    }
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Pack(args) => pack(args).await,
        Command::CheckBundle { bundle } => check_bundle(&bundle),
        Command::ExtractBundle { bundle, output } => {
            bundle::extract_bundle(&bundle, &output)?;
            println!("Extracted embedded package to {}", output.display());
            Ok(())
        }
    }
}

async fn pack(args: PackArgs) -> Result<()> {
    let (options, yes) = args.into_options();
    let confirm: ConfirmFn = if yes {
        Arc::new(|_: &str| true)
    } else {
        Arc::new(prompt_confirm)
    };
    let feed = PackageBuilder::new(options)
        .with_confirm(confirm)
        .run()
        .await?;
    println!("Channel feed now holds {} asset(s).", feed.assets.len());
    Ok(())
}

fn check_bundle(path: &Path) -> Result<()> {
    match bundle::is_bundle(path)? {
        Some((offset, length)) => {
            println!("Embedded package found: offset={offset} length={length}")
        }
        None => println!("Valid bootstrapper template, no package embedded yet."),
    }
    Ok(())
}

fn prompt_confirm(question: &str) -> bool {
    print!("{question} [y/N] ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y" | "yes" | "YES")
}
