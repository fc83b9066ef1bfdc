pub mod diff;
pub mod dump;
pub mod extract;
pub mod list;
pub mod rekey;

use std::path::{Path, PathBuf};

use clap::Args;
use miette::{Context, Result};
use wz_archive::{KeySelector, OpenOptions, WzArchive};

#[derive(clap::Subcommand)]
pub enum Commands {
    /// List the directories and images of a WZ file
    List(list::ListArgs),
    /// Print the properties below a path
    Dump(dump::DumpArgs),
    /// Write every image of a WZ file into a directory
    Extract(extract::ExtractArgs),
    /// Save WZ files with another key profile or patch version
    Rekey(rekey::RekeyArgs),
    /// Compare two WZ files
    Diff(diff::DiffArgs),
}

impl Commands {
    pub fn handle(&self) -> Result<()> {
        match self {
            Commands::List(list) => list.handle(),
            Commands::Dump(dump) => dump.handle(),
            Commands::Extract(extract) => extract.handle(),
            Commands::Rekey(rekey) => rekey.handle(),
            Commands::Diff(diff) => diff.handle(),
        }
    }
}

/// How to decrypt the input files
#[derive(Args, Clone)]
pub struct KeyArgs {
    /// Key profile: gms, ems, none, auto or brute
    #[arg(short, long, default_value = "auto")]
    key: String,

    /// Game patch version, probed when missing
    #[arg(long)]
    patch_version: Option<u16>,
}

impl KeyArgs {
    pub fn options(&self) -> OpenOptions {
        OpenOptions::builder()
            .key(KeySelector::from_name(&self.key))
            .maybe_patch_version(self.patch_version)
            .build()
    }

    pub fn open(&self, path: &Path) -> Result<WzArchive> {
        WzArchive::open(path, self.options()).with_context(|| format!("path: {}", path.display()))
    }
}

/// The input WZ file of a command
#[derive(Args)]
pub struct ArchiveArgs {
    /// An input WZ file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    #[command(flatten)]
    key: KeyArgs,
}

impl ArchiveArgs {
    pub fn open(&self) -> Result<WzArchive> {
        self.key.open(&self.file)
    }
}
