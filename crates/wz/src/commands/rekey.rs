use std::path::{Path, PathBuf};

use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::info;
use walkdir::WalkDir;
use wz_archive::listfile::{read_list_file, write_list_file};
use wz_archive::{KeyProfile, KeySelector, SaveOptions};

use super::KeyArgs;

#[derive(Args)]
pub struct RekeyArgs {
    /// An input WZ file, or a directory of them
    #[arg(short, long, value_name = "PATH")]
    input: PathBuf,

    /// The output file, or directory when the input is one
    #[arg(short, long, value_name = "PATH")]
    output: PathBuf,

    #[command(flatten)]
    key: KeyArgs,

    /// Key profile to write with
    #[arg(long, value_name = "PROFILE")]
    to: String,

    /// Patch version to write with, the input's when missing
    #[arg(long)]
    to_patch_version: Option<u16>,

    /// Write the layout of 64-bit clients
    #[arg(long)]
    as_64bit: Option<bool>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl RekeyArgs {
    fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        if output.exists() && !self.overwrite {
            return Err(miette!("{} already exists", output.display()));
        }

        if input
            .file_name()
            .is_some_and(|name| name.eq_ignore_ascii_case("List.wz"))
        {
            return self.convert_list(input, output);
        }

        let archive = self.key.open(input)?;
        info!(
            "converting {} from {} to {}",
            input.display(),
            archive.key_profile(),
            self.to
        );

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)
                .into_diagnostic()
                .context(format!("creating {}", parent.display()))?;
        }

        let options = SaveOptions::builder()
            .key(KeyProfile::from_name(&self.to))
            .maybe_patch_version(self.to_patch_version)
            .maybe_as_64bit(self.as_64bit)
            .build();
        archive
            .save_to_path(output, options)
            .with_context(|| format!("saving {}", output.display()))
    }

    /// List files carry no header to detect the key from
    fn convert_list(&self, input: &Path, output: &Path) -> Result<()> {
        let KeySelector::Profile(from) = self.key.options().key else {
            return Err(miette!("{} needs an explicit --key", input.display()));
        };
        info!("converting list {} from {from} to {}", input.display(), self.to);

        let entries = read_list_file(input, from)?;
        write_list_file(output, KeyProfile::from_name(&self.to), &entries)?;
        Ok(())
    }

    pub fn handle(&self) -> Result<()> {
        if !self.input.is_dir() {
            return self.convert(&self.input, &self.output);
        }

        let files = WalkDir::new(&self.input)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("wz"))
            })
            .collect::<Vec<_>>();

        if files.is_empty() {
            return Err(miette!("no wz files in {}", self.input.display()));
        }

        for file in files {
            let name = file.path().strip_prefix(&self.input).into_diagnostic()?;
            self.convert(file.path(), &self.output.join(name))?;
        }
        Ok(())
    }
}
