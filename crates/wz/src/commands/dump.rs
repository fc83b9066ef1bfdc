use clap::Args;
use miette::Result;
use owo_colors::OwoColorize;
use wz_archive::{ArchiveNode, NodeId, WzArchive};

use super::ArchiveArgs;

#[derive(Args)]
pub struct DumpArgs {
    #[command(flatten)]
    archive: ArchiveArgs,

    /// Path of the node to print, e.g. `0100100.img/info`
    #[arg(short, long, default_value = "")]
    path: String,

    /// How many levels below the path to print
    #[arg(short, long)]
    depth: Option<usize>,

    /// Print link targets next to links
    #[arg(long, default_value_t = false)]
    resolve: bool,
}

impl DumpArgs {
    fn describe(&self, archive: &WzArchive, id: NodeId) -> Result<String> {
        Ok(match archive.node(id)? {
            ArchiveNode::Root => archive.archive_name().to_string(),
            ArchiveNode::Directory => "directory".to_string(),
            ArchiveNode::Image(image) => format!("image, {} bytes", image.size),
            ArchiveNode::Leaf(leaf) if self.resolve && leaf.as_link().is_some() => {
                match archive.resolve_link(id) {
                    Ok(target) => format!("{leaf} ({})", archive.path(target)?),
                    Err(e) => format!("{leaf} ({})", e.red()),
                }
            }
            ArchiveNode::Leaf(leaf) => leaf.to_string(),
        })
    }

    fn print(&self, archive: &WzArchive, id: NodeId, level: usize) -> Result<()> {
        let name = archive.name(id)?;
        println!(
            "{}{}: {}",
            "  ".repeat(level),
            name.bold(),
            self.describe(archive, id)?
        );

        if self.depth.is_some_and(|depth| level >= depth) {
            return Ok(());
        }
        for child in archive.children(id)? {
            self.print(archive, child, level + 1)?;
        }
        Ok(())
    }

    pub fn handle(&self) -> Result<()> {
        let archive = self.archive.open()?;
        let id = archive.get(&self.path)?;
        self.print(&archive, id, 0)
    }
}
