use clap::Args;
use miette::Result;
use owo_colors::OwoColorize;
use tracing::info;
use wz_archive::{ArchiveNode, NodeId, WzArchive};

use super::ArchiveArgs;

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    archive: ArchiveArgs,

    /// Only list directories
    #[arg(long, default_value_t = false)]
    directories: bool,
}

impl ListArgs {
    fn walk(&self, archive: &WzArchive, id: NodeId, path: &str) -> Result<()> {
        for child in archive.children(id)? {
            let name = archive.name(child)?;
            let child_path = match path {
                "" => name,
                path => format!("{path}/{name}"),
            };

            match archive.node(child)? {
                ArchiveNode::Directory => {
                    println!("{}/", child_path.blue());
                    self.walk(archive, child, &child_path)?;
                }
                ArchiveNode::Image(image) if !self.directories => {
                    println!("{child_path} {}", format!("({} bytes)", image.size).dimmed());
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn handle(&self) -> Result<()> {
        let archive = self.archive.open()?;
        info!(
            "{} uses key {} and patch version {}",
            archive.archive_name(),
            archive.key_profile(),
            archive.version().patch_version
        );

        self.walk(&archive, archive.root(), "")
    }
}
