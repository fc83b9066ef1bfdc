use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::{info, warn};
use wz_archive::{ArchiveNode, Leaf, NodeId, WzArchive};

use super::ArchiveArgs;

#[derive(Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    archive: ArchiveArgs,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Also write the media of every sound property next to its image
    #[arg(long, default_value_t = false)]
    sounds: bool,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ExtractArgs {
    fn create(&self, path: &Path, data: &[u8]) -> Result<()> {
        info!("writing {}", path.display());
        let parent = path
            .parent()
            .ok_or_else(|| miette!("{} has no parent directory", path.display()))?;
        std::fs::create_dir_all(parent)
            .into_diagnostic()
            .context(format!("creating {}", parent.display()))?;

        let mut out = if !self.overwrite {
            File::create_new(path)
                .into_diagnostic()
                .context(format!("creating {}", path.display()))?
        } else {
            File::create(path)
                .into_diagnostic()
                .context(format!("creating {}", path.display()))?
        };
        out.write_all(data).into_diagnostic()
    }

    /// Write the media of the sounds below `id`, named after their property path
    fn sounds(&self, archive: &WzArchive, id: NodeId, target: &Path) -> Result<()> {
        for child in archive.children(id)? {
            let name = archive.name(child)?;
            match archive.leaf(child)? {
                Leaf::Audio(audio) => {
                    let extension = match audio.wave_format() {
                        Some(format) if format.format_tag == 1 => "pcm",
                        _ => "mp3",
                    };
                    self.create(&target.join(format!("{name}.{extension}")), &audio.data)?;
                }
                leaf if leaf.is_container() => self.sounds(archive, child, &target.join(&name))?,
                _ => {}
            }
        }
        Ok(())
    }

    fn walk(&self, archive: &WzArchive, id: NodeId, target: &Path) -> Result<()> {
        for child in archive.children(id)? {
            let name = archive.name(child)?;
            match archive.node(child)? {
                ArchiveNode::Directory => self.walk(archive, child, &target.join(&name))?,
                ArchiveNode::Image(_) => {
                    let bytes = archive
                        .image_bytes(child)
                        .context(format!("reading {}", archive.path(child)?))?;
                    self.create(&target.join(&name), &bytes)?;

                    if self.sounds {
                        let folder = target.join(name.trim_end_matches(".img"));
                        if let Err(e) = self.sounds(archive, child, &folder) {
                            warn!("skipping sounds of {}: {e}", archive.path(child)?);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn handle(&self) -> Result<()> {
        let archive = self.archive.open()?;
        self.walk(&archive, archive.root(), &self.directory)
    }
}
