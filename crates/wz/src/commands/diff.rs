use std::fmt::Display;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use itertools::{EitherOrBoth, Itertools};
use miette::Result;
use owo_colors::OwoColorize;
use similar::{ChangeTag, TextDiff};
use wz_archive::{ArchiveNode, Leaf, NodeId, WzArchive};

use super::KeyArgs;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Mode {
    /// Compare names and values, skipping images whose stored bytes match
    #[default]
    Semantic,
    /// Parse every image and show inline differences of strings
    Full,
}

#[derive(Debug, Eq, PartialEq)]
enum Change {
    Added(String),
    Removed(String),
    Modified {
        path: String,
        old: String,
        new: String,
        context: Vec<String>,
    },
}

impl Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::Added(path) => writeln!(f, "✅ {}", path.green()),
            Change::Removed(path) => writeln!(f, "❌ {}", path.red()),
            Change::Modified {
                path,
                old,
                new,
                context,
            } => {
                writeln!(f, "🔃 {}: {} vs {}", path.blue(), old.red(), new.green())?;
                for line in context {
                    writeln!(f, "   {line}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Args)]
pub struct DiffArgs {
    /// An input WZ file
    #[arg(short, long, value_name = "FILE")]
    left: PathBuf,

    /// An input WZ file
    #[arg(short, long, value_name = "FILE")]
    right: PathBuf,

    #[command(flatten)]
    key: KeyArgs,

    /// Comparison mode
    #[arg(short, long, value_enum, default_value_t = Mode::Semantic)]
    mode: Mode,
}

struct Side<'a> {
    archive: &'a WzArchive,
    id: NodeId,
}

impl DiffArgs {
    /// Inline differences between two strings, one entry per changed line
    fn inline(&self, old: &str, new: &str) -> Vec<String> {
        if self.mode != Mode::Full {
            return Vec::new();
        }

        let diff = TextDiff::from_chars(old, new);
        let mut context = Vec::new();
        for op in diff.ops() {
            for change in diff.iter_inline_changes(op) {
                let line = change
                    .iter_strings_lossy()
                    .map(|(emphasized, value)| match (emphasized, change.tag()) {
                        (true, ChangeTag::Insert) => value.green().underline().to_string(),
                        (true, _) => value.red().underline().to_string(),
                        (false, _) => value.dimmed().to_string(),
                    })
                    .join("");
                context.push(line);
            }
        }
        context
    }

    fn compare_leaves(&self, path: &str, left: &Leaf, right: &Leaf) -> Option<Change> {
        let same = match (left, right) {
            (Leaf::Canvas(l), Leaf::Canvas(r)) => {
                l.width() == r.width()
                    && l.height() == r.height()
                    && l.format() == r.format()
                    && l.compressed() == r.compressed()
            }
            (l, r) => l.to_string() == r.to_string(),
        };
        if same {
            return None;
        }

        let context = match (left.as_string(), right.as_string()) {
            (Some(l), Some(r)) => self.inline(l, r),
            _ => Vec::new(),
        };
        Some(Change::Modified {
            path: path.to_string(),
            old: left.to_string(),
            new: right.to_string(),
            context,
        })
    }

    fn compare(&self, path: &str, left: Side, right: Side, changes: &mut Vec<Change>) -> Result<()> {
        match (left.archive.node(left.id)?, right.archive.node(right.id)?) {
            (ArchiveNode::Leaf(l), ArchiveNode::Leaf(r)) => {
                changes.extend(self.compare_leaves(path, &l, &r));
            }
            (ArchiveNode::Image(l), ArchiveNode::Image(r)) => {
                let stored_equal = l.size == r.size
                    && l.checksum == r.checksum
                    && left.archive.key_profile() == right.archive.key_profile();
                if self.mode == Mode::Semantic && stored_equal && !l.dirty && !r.dirty {
                    return Ok(());
                }
            }
            (l, r) if std::mem::discriminant(&l) != std::mem::discriminant(&r) => {
                changes.push(Change::Modified {
                    path: path.to_string(),
                    old: kind(&l),
                    new: kind(&r),
                    context: Vec::new(),
                });
                return Ok(());
            }
            _ => {}
        }

        let named = |side: &Side| -> Result<Vec<(String, NodeId)>> {
            side.archive
                .children(side.id)?
                .into_iter()
                .map(|id| -> Result<(String, NodeId)> { Ok((side.archive.name(id)?, id)) })
                .collect()
        };
        let left_children = named(&left)?;
        let right_children = named(&right)?;

        let joined = left_children
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .merge_join_by(
                right_children.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)),
                |a, b| a.0.cmp(&b.0),
            );
        let child_path = |name: &str| match path {
            "" => name.to_string(),
            path => format!("{path}/{name}"),
        };
        for pair in joined {
            match pair {
                EitherOrBoth::Left((name, _)) => changes.push(Change::Removed(child_path(&name))),
                EitherOrBoth::Right((name, _)) => changes.push(Change::Added(child_path(&name))),
                EitherOrBoth::Both((name, l), (_, r)) => self.compare(
                    &child_path(&name),
                    Side {
                        archive: left.archive,
                        id: l,
                    },
                    Side {
                        archive: right.archive,
                        id: r,
                    },
                    changes,
                )?,
            }
        }
        Ok(())
    }

    pub fn handle(&self) -> Result<()> {
        let left = self.key.open(&self.left)?;
        let right = self.key.open(&self.right)?;

        let mut changes = Vec::new();
        self.compare(
            "",
            Side {
                archive: &left,
                id: left.root(),
            },
            Side {
                archive: &right,
                id: right.root(),
            },
            &mut changes,
        )?;

        for change in &changes {
            print!("{change}");
        }
        Ok(())
    }
}

fn kind(node: &ArchiveNode) -> String {
    match node {
        ArchiveNode::Root => "root".into(),
        ArchiveNode::Directory => "directory".into(),
        ArchiveNode::Image(_) => "image".into(),
        ArchiveNode::Leaf(leaf) => leaf.kind().into(),
    }
}
