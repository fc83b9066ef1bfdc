//! Relative links between nodes and canvas references, within one archive or across a set of them.
//!
//! Links are path strings resolved on demand. A `UOL` leaf is resolved from its parent, so the
//! path `../1` of `a/0/link` points to `a/1`. Canvases may carry a string child:
//!
//! | Child      | Path is resolved from                                                     |
//! |------------|---------------------------------------------------------------------------|
//! | `_inlink`  | the nearest image containing the canvas                                   |
//! | `_outlink` | the root of the archive family named by the first segment, e.g. `Mob/...` |

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{Error, NodeNotFoundError, Result};
use crate::property::Leaf;
use crate::read::WzArchive;
use crate::tree::{ArchiveNode, NodeId};

pub const INLINK: &str = "_inlink";
pub const OUTLINK: &str = "_outlink";

/// `Ok(None)` for a missing node, errors that are not about a missing node are returned
fn found(result: Result<NodeId>) -> Result<Option<NodeId>> {
    match result {
        Ok(id) => Ok(Some(id)),
        Err(Error::NodeNotFound(NodeNotFoundError::Path(_)) | Error::BrokenLink(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Archive name without extension and trailing digits: `Mob001.wz` becomes `Mob`
pub fn family(name: &str) -> &str {
    let stem = match name.get(name.len().saturating_sub(3)..) {
        Some(extension) if extension.eq_ignore_ascii_case(".wz") => &name[..name.len() - 3],
        _ => name,
    };
    stem.trim_end_matches(|c: char| c.is_ascii_digit())
}

impl WzArchive {
    /// Follow a `/` separated path from `start`, failing with [`Error::BrokenLink`] on a missing
    /// segment
    pub fn resolve_path(&self, start: NodeId, path: &str) -> Result<NodeId> {
        self.get_from(start, path).map_err(|e| match e {
            Error::NodeNotFound(NodeNotFoundError::Path(_)) => Error::BrokenLink(path.to_string()),
            e => e,
        })
    }

    /// The node a `UOL` leaf points to
    pub fn resolve_link(&self, link: NodeId) -> Result<NodeId> {
        let Leaf::Link(path) = self.leaf(link)? else {
            return Err(Error::InvalidOperation(format!(
                "{} is not a link",
                self.path(link)?
            )));
        };
        let parent = self
            .parent(link)?
            .ok_or_else(|| Error::BrokenLink(path.clone()))?;

        self.resolve_path(parent, &path)
    }

    /// Like [`WzArchive::resolve_link`], returning the link itself when its target is missing
    pub fn resolve_link_or_self(&self, link: NodeId) -> Result<NodeId> {
        match self.resolve_link(link) {
            Err(Error::BrokenLink(path)) => {
                warn!(link = %self.path(link)?, "broken link {path}");
                Ok(link)
            }
            other => other,
        }
    }

    /// The canvas whose pixels `canvas` shows, following `_inlink` or `_outlink` inside this
    /// archive. Falls back to `canvas` itself.
    pub fn resolve_canvas(&self, canvas: NodeId) -> Result<NodeId> {
        if let Some(path) = self.reference(canvas, INLINK)? {
            let mut current = self.parent(canvas)?;
            while let Some(id) = current {
                if matches!(self.node(id)?, ArchiveNode::Image(_)) {
                    if let Some(target) = found(self.get_from(id, &path))? {
                        return Ok(target);
                    }
                }
                current = self.parent(id)?;
            }
            warn!(canvas = %self.path(canvas)?, "unresolved {INLINK} {path}");
        } else if let Some(path) = self.reference(canvas, OUTLINK)? {
            let prefix = format!("{}/", family(&self.name));
            let local = path.strip_prefix(&prefix).unwrap_or(&path);
            if let Some(target) = found(self.get(local))? {
                return Ok(target);
            }
            debug!(canvas = %self.path(canvas)?, "{OUTLINK} {path} is not in {}", self.name);
        }

        Ok(canvas)
    }

    /// String value of a reference child of a canvas
    fn reference(&self, canvas: NodeId, name: &str) -> Result<Option<String>> {
        let Some(child) = self.child(canvas, name)? else {
            return Ok(None);
        };
        Ok(self.leaf(child)?.as_string().map(str::to_string))
    }
}

/// Opened archives by logical name (`Mob`, `Mob001`, `Map/Obj`), for references across archives
#[derive(Debug, Default)]
pub struct ArchiveSet {
    archives: IndexMap<String, Arc<WzArchive>>,
}

impl ArchiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an archive. A previous archive with the same name is returned.
    pub fn insert(&mut self, name: &str, archive: Arc<WzArchive>) -> Option<Arc<WzArchive>> {
        self.archives.insert(name.to_string(), archive)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<WzArchive>> {
        self.archives.get(name)
    }

    pub fn len(&self) -> usize {
        self.archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }

    /// Resolve a canvas reference, following `_outlink` into the other archives of the set.
    ///
    /// The first two path segments are tried as an archive family before the first one alone.
    /// Archives of a family are searched in insertion order. An unresolvable reference yields the
    /// canvas itself.
    pub fn resolve_canvas(
        &self,
        archive: &Arc<WzArchive>,
        canvas: NodeId,
    ) -> Result<(Arc<WzArchive>, NodeId)> {
        let local = archive.resolve_canvas(canvas)?;
        if local != canvas {
            return Ok((archive.clone(), local));
        }
        let Some(path) = archive.reference(canvas, OUTLINK)? else {
            return Ok((archive.clone(), canvas));
        };

        let segments = path.split('/').collect::<Vec<_>>();
        for depth in [2, 1] {
            if segments.len() <= depth {
                continue;
            }
            let prefix = segments[..depth].join("/");
            let rest = segments[depth..].join("/");

            for (name, candidate) in &self.archives {
                if family(name) != prefix {
                    continue;
                }
                if let Some(target) = found(candidate.get(&rest))? {
                    return Ok((candidate.clone(), target));
                }
            }
        }

        warn!(canvas = %archive.path(canvas)?, "unresolved {OUTLINK} {path}");
        Ok((archive.clone(), canvas))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::{family, ArchiveSet};
    use crate::error::{Error, Result};
    use crate::pixel::{Bitmap, PixelFormat};
    use crate::property::{Canvas, Leaf};
    use crate::read::WzArchive;
    use crate::tree::{NewNode, NodeId};

    fn canvas() -> NewNode {
        NewNode::Leaf(Leaf::Canvas(Canvas::from_bitmap(
            Bitmap::new(1, 1),
            PixelFormat::Bgra4444,
        )))
    }

    /// `Mob.wz/100.img/stand/0` with an `_outlink` or `_inlink` child holding `reference`
    fn linked(name: &str, kind: &str, reference: &str) -> Result<(WzArchive, NodeId)> {
        let archive = WzArchive::new(name);
        let image = archive.add_child(archive.root(), "100.img", NewNode::Image)?;
        let stand = archive.add_child(image, "stand", NewNode::Leaf(Leaf::Container))?;
        let frame = archive.add_child(stand, "0", canvas())?;
        archive.add_child(frame, kind, NewNode::Leaf(Leaf::String(reference.into())))?;
        Ok((archive, frame))
    }

    #[test]
    fn family_names() {
        assert_eq!(family("Mob001.wz"), "Mob");
        assert_eq!(family("Mob.WZ"), "Mob");
        assert_eq!(family("Map/Obj"), "Map/Obj");
        assert_eq!(family("Mob2"), "Mob");
    }

    #[test]
    fn links_across_three_levels() -> Result<()> {
        let archive = WzArchive::new("Skill.wz");
        let image = archive.add_child(archive.root(), "000.img", NewNode::Image)?;
        let skill = archive.add_child(image, "skill", NewNode::Leaf(Leaf::Container))?;
        let sibling = archive.add_child(skill, "sibling", NewNode::Leaf(Leaf::Container))?;
        let target = archive.add_child(sibling, "0", NewNode::Leaf(Leaf::Int(5)))?;
        let effect = archive.add_child(skill, "effect", NewNode::Leaf(Leaf::Container))?;
        let frames = archive.add_child(effect, "frames", NewNode::Leaf(Leaf::Container))?;
        let good = archive.add_child(
            frames,
            "good",
            NewNode::Leaf(Leaf::Link("../../sibling/0".into())),
        )?;
        let bad = archive.add_child(
            frames,
            "bad",
            NewNode::Leaf(Leaf::Link("../../sibling/9".into())),
        )?;

        assert_eq!(archive.resolve_link(good)?, target);
        assert!(matches!(archive.resolve_link(bad), Err(Error::BrokenLink(_))));
        assert_eq!(archive.resolve_link_or_self(bad)?, bad);
        assert_eq!(archive.resolve_path(image, "skill/sibling/0")?, target);
        Ok(())
    }

    #[test]
    fn inlink_resolves_inside_the_image() -> Result<()> {
        let (archive, frame) = linked("Mob.wz", "_inlink", "move/3")?;
        let image = archive.get("100.img")?;
        let moves = archive.add_child(image, "move", NewNode::Leaf(Leaf::Container))?;
        let target = archive.add_child(moves, "3", canvas())?;

        assert_eq!(archive.resolve_canvas(frame)?, target);
        Ok(())
    }

    #[traced_test]
    #[test]
    fn unresolved_inlink_is_the_canvas_itself() -> Result<()> {
        let (archive, frame) = linked("Mob.wz", "_inlink", "Move/3")?;
        assert_eq!(archive.resolve_canvas(frame)?, frame);
        assert!(logs_contain("unresolved _inlink"));
        Ok(())
    }

    #[test]
    fn outlink_across_archives() -> Result<()> {
        let (mob, frame) = linked("Mob001.wz", "_outlink", "Mob/200.img/die/1")?;
        let other = WzArchive::new("Mob.wz");
        let image = other.add_child(other.root(), "200.img", NewNode::Image)?;
        let die = other.add_child(image, "die", NewNode::Leaf(Leaf::Container))?;
        let target = other.add_child(die, "1", canvas())?;

        let mob = Arc::new(mob);
        let other = Arc::new(other);
        let mut set = ArchiveSet::new();
        set.insert("Mob001", mob.clone());
        set.insert("Mob", other.clone());

        assert_eq!(mob.resolve_canvas(frame)?, frame);
        let (archive, resolved) = set.resolve_canvas(&mob, frame)?;
        assert!(Arc::ptr_eq(&archive, &other));
        assert_eq!(resolved, target);
        Ok(())
    }

    #[test]
    fn outlink_to_missing_archive_is_the_canvas_itself() -> Result<()> {
        let (mob, frame) = linked("Mob.wz", "_outlink", "Npc/1.img/stand/0")?;
        let mob = Arc::new(mob);
        let mut set = ArchiveSet::new();
        set.insert("Mob", mob.clone());

        let (archive, resolved) = set.resolve_canvas(&mob, frame)?;
        assert!(Arc::ptr_eq(&archive, &mob));
        assert_eq!(resolved, frame);
        Ok(())
    }
}
