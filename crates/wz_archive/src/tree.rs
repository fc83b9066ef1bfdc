//! Node arena shared by every archive, and the navigation and editing API built on it.
//!
//! Nodes never move once created; a [`NodeId`] is an index into the arena. Removing a node clears
//! its slot, so a handle kept past removal reports [`NodeNotFoundError::Id`] instead of reaching an
//! unrelated node.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, instrument, trace};

use crate::compression;
use crate::cursor::check_storable;
use crate::error::{Error, NodeNotFoundError, Result};
use crate::image::{self, Draft};
use crate::pixel::{self, Bitmap};
use crate::property::Leaf;
use crate::read::WzArchive;

/// Handle to a node of a [`WzArchive`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of a node
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveNode {
    Root,
    Directory,
    Image(ImageInfo),
    Leaf(Leaf),
}

/// Where an image lives in the source archive and whether it was expanded
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub offset: u64,
    pub size: u32,
    pub checksum: i32,
    pub parsed: bool,
    pub dirty: bool,
}

/// A node to attach with [`WzArchive::add_child`]
#[derive(Debug, Clone, PartialEq)]
pub enum NewNode {
    Directory,

    /// An empty image
    Image,
    Leaf(Leaf),
}

#[derive(Debug, Default)]
pub(crate) struct ImageState {
    /// Held for the whole first parse of the image
    pub guard: Mutex<()>,
    pub parsed: AtomicBool,
    pub materialized: AtomicUsize,
    pub dirty: AtomicBool,
}

#[derive(Debug, Clone)]
pub(crate) struct ImageSlot {
    pub offset: u64,
    pub size: u32,
    pub checksum: i32,
    pub state: Arc<ImageState>,
}

impl ImageSlot {
    pub fn unparsed(offset: u64, size: u32, checksum: i32) -> Self {
        Self {
            offset,
            size,
            checksum,
            state: Arc::default(),
        }
    }

    /// An image that exists only in memory
    pub fn fresh() -> Self {
        let slot = Self::unparsed(0, 0, 0);
        slot.state.parsed.store(true, Ordering::SeqCst);
        slot.state.dirty.store(true, Ordering::SeqCst);
        slot
    }

    pub fn is_parsed(&self) -> bool {
        self.state.parsed.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.state.dirty.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Body {
    Root,
    Directory,
    Image(ImageSlot),
    Leaf(Leaf),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub body: Body,
}

#[derive(Debug)]
pub(crate) struct Arena {
    slots: Vec<Option<Node>>,
}

impl Arena {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new(name: &str) -> Self {
        Self {
            slots: vec![Some(Node {
                name: name.to_string(),
                parent: None,
                children: Vec::new(),
                body: Body::Root,
            })],
        }
    }

    pub fn get(&self, id: NodeId) -> Result<&Node> {
        self.slots
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::NodeNotFound(NodeNotFoundError::Id(id.0 as usize)))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::NodeNotFound(NodeNotFoundError::Id(id.0 as usize)))
    }

    /// Append a child without any checks
    pub fn push(&mut self, parent: NodeId, name: String, body: Body) -> Result<NodeId> {
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Some(Node {
            name,
            parent: Some(parent),
            children: Vec::new(),
            body,
        }));
        self.get_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Attach parsed drafts under `parent`
    pub fn graft(&mut self, parent: NodeId, drafts: Vec<Draft>) -> Result<()> {
        for draft in drafts {
            let id = self.push(parent, draft.name, Body::Leaf(draft.leaf))?;
            self.graft(id, draft.children)?;
        }
        Ok(())
    }

    /// Child of `parent` named `name`
    ///
    /// Children of directories, images and canvases match without regard to ASCII case. Container
    /// and convex children match exactly.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>> {
        let node = self.get(parent)?;
        let ignore_case = matches!(
            node.body,
            Body::Root | Body::Directory | Body::Image(_) | Body::Leaf(Leaf::Canvas(_))
        );

        for child in &node.children {
            let candidate = &self.get(*child)?.name;
            let matched = match ignore_case {
                true => candidate.eq_ignore_ascii_case(name),
                false => candidate == name,
            };
            if matched {
                return Ok(Some(*child));
            }
        }
        Ok(None)
    }

    pub fn remove_subtree(&mut self, id: NodeId) {
        let Some(node) = self.slots.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        for child in node.children {
            self.remove_subtree(child);
        }
    }

    /// The image `id` belongs to, or `id` itself when it is an image
    pub fn owning_image(&self, id: NodeId) -> Option<&ImageSlot> {
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.get(id).ok()?;
            if let Body::Image(slot) = &node.body {
                return Some(slot);
            }
            current = node.parent;
        }
        None
    }

    pub fn mark_dirty(&self, id: NodeId) {
        if let Some(slot) = self.owning_image(id) {
            slot.state.dirty.store(true, Ordering::SeqCst);
        }
    }

    pub fn path(&self, id: NodeId) -> Result<String> {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.get(id)?;
            segments.push(node.name.as_str());
            current = node.parent;
        }
        segments.reverse();
        Ok(segments.join("/"))
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidOperation(format!("invalid node name {name:?}")));
    }
    check_storable(name)
}

fn check_leaf(leaf: &Leaf) -> Result<()> {
    match leaf {
        Leaf::String(value) | Leaf::Link(value) => check_storable(value),
        _ => Ok(()),
    }
}

/// Navigation
impl WzArchive {
    /// The root node, named after the archive
    pub fn root(&self) -> NodeId {
        Arena::ROOT
    }

    /// Find a node by `/` separated path from the root
    ///
    /// Images on the way are parsed as needed.
    pub fn get(&self, path: &str) -> Result<NodeId> {
        self.get_from(self.root(), path)
    }

    /// Find a node by path relative to `start`. `..` steps to the parent.
    pub fn get_from(&self, start: NodeId, path: &str) -> Result<NodeId> {
        let mut current = start;
        for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            current = if segment == ".." {
                self.parent(current)?
                    .ok_or_else(|| NodeNotFoundError::Path(path.to_string()))?
            } else {
                self.child(current, segment)?
                    .ok_or_else(|| NodeNotFoundError::Path(path.to_string()))?
            };
        }
        Ok(current)
    }

    /// A snapshot of the node
    pub fn node(&self, id: NodeId) -> Result<ArchiveNode> {
        let nodes = self.nodes.read()?;
        Ok(match &nodes.get(id)?.body {
            Body::Root => ArchiveNode::Root,
            Body::Directory => ArchiveNode::Directory,
            Body::Image(slot) => ArchiveNode::Image(ImageInfo {
                offset: slot.offset,
                size: slot.size,
                checksum: slot.checksum,
                parsed: slot.is_parsed(),
                dirty: slot.is_dirty(),
            }),
            Body::Leaf(leaf) => ArchiveNode::Leaf(leaf.clone()),
        })
    }

    /// The value of a leaf node
    pub fn leaf(&self, id: NodeId) -> Result<Leaf> {
        match self.node(id)? {
            ArchiveNode::Leaf(leaf) => Ok(leaf),
            _ => Err(Error::InvalidOperation(format!("{} is not a leaf", self.path(id)?))),
        }
    }

    pub fn name(&self, id: NodeId) -> Result<String> {
        Ok(self.nodes.read()?.get(id)?.name.clone())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.nodes.read()?.get(id)?.parent)
    }

    /// Full path of the node, starting with the archive name
    pub fn path(&self, id: NodeId) -> Result<String> {
        self.nodes.read()?.path(id)
    }

    /// Children in stored order, parsing the node first when it is an unparsed image
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.ensure_parsed(id)?;
        Ok(self.nodes.read()?.get(id)?.children.clone())
    }

    /// Child by name, parsing the node first when it is an unparsed image
    pub fn child(&self, id: NodeId, name: &str) -> Result<Option<NodeId>> {
        self.ensure_parsed(id)?;
        self.nodes.read()?.find_child(id, name)
    }

    /// Whether the node is an image whose children were not read yet
    pub fn is_parsed(&self, id: NodeId) -> Result<bool> {
        Ok(match &self.nodes.read()?.get(id)?.body {
            Body::Image(slot) => slot.is_parsed(),
            _ => true,
        })
    }

    /// How many times the image's children were built; never more than one
    pub fn materialization_count(&self, id: NodeId) -> Result<usize> {
        match &self.nodes.read()?.get(id)?.body {
            Body::Image(slot) => Ok(slot.state.materialized.load(Ordering::SeqCst)),
            _ => Ok(0),
        }
    }

    /// Parse an image's children from the archive. Does nothing for any other node or an image that
    /// was parsed already.
    ///
    /// Concurrent callers on the same image wait for the first one; distinct images parse in
    /// parallel and only contend for the cursor while their bytes are copied out.
    #[instrument(skip(self), err)]
    pub fn ensure_parsed(&self, id: NodeId) -> Result<()> {
        let slot = match &self.nodes.read()?.get(id)?.body {
            Body::Image(slot) if !slot.is_parsed() => slot.clone(),
            _ => return Ok(()),
        };

        let _guard = slot.state.guard.lock()?;
        if slot.is_parsed() {
            return Ok(());
        }

        let bytes = match self.cursor.read_range(slot.offset, slot.size as u64) {
            Err(Error::LifetimeViolation(_)) => {
                return Err(Error::LifetimeViolation(self.path(id)?));
            }
            other => other?,
        };
        let drafts = image::parse_image(&bytes, &self.key)?;
        trace!(entries = drafts.len(), "image parsed");

        self.nodes.write()?.graft(id, drafts)?;
        slot.state.materialized.fetch_add(1, Ordering::SeqCst);
        slot.state.parsed.store(true, Ordering::SeqCst);
        debug!(offset = slot.offset, size = slot.size, "materialized image");
        Ok(())
    }
}

/// Editing
impl WzArchive {
    /// Attach a new node under `parent`
    ///
    /// Directories hold directories and images; images, containers, convex shapes and canvases hold
    /// leaves. Names must be unique among siblings.
    pub fn add_child(&self, parent: NodeId, name: &str, node: NewNode) -> Result<NodeId> {
        self.ensure_parsed(parent)?;
        let mut nodes = self.nodes.write()?;

        let accepted = match (&nodes.get(parent)?.body, &node) {
            (Body::Root | Body::Directory, NewNode::Directory | NewNode::Image) => true,
            (Body::Image(_), NewNode::Leaf(_)) => true,
            (Body::Leaf(leaf), NewNode::Leaf(_)) => leaf.is_container(),
            _ => false,
        };
        if !accepted {
            return Err(Error::InvalidOperation(format!(
                "cannot add {node:?} under {}",
                nodes.path(parent)?
            )));
        }
        check_name(name)?;
        if let NewNode::Leaf(leaf) = &node {
            check_leaf(leaf)?;
        }
        if nodes.find_child(parent, name)?.is_some() {
            return Err(Error::DuplicateName(name.to_string()));
        }

        let body = match node {
            NewNode::Directory => Body::Directory,
            NewNode::Image => Body::Image(ImageSlot::fresh()),
            NewNode::Leaf(leaf) => Body::Leaf(leaf),
        };
        let id = nodes.push(parent, name.to_string(), body)?;
        nodes.mark_dirty(parent);
        Ok(id)
    }

    /// Detach `child` from `parent` and drop its whole subtree
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let mut nodes = self.nodes.write()?;
        if nodes.get(child)?.parent != Some(parent) {
            return Err(Error::InvalidOperation(format!(
                "{} is not a child of {}",
                nodes.path(child)?,
                nodes.path(parent)?
            )));
        }

        nodes.get_mut(parent)?.children.retain(|c| *c != child);
        nodes.remove_subtree(child);
        nodes.mark_dirty(parent);
        Ok(())
    }

    /// Rename a node, keeping sibling names unique
    pub fn rename(&self, id: NodeId, name: &str) -> Result<()> {
        let mut nodes = self.nodes.write()?;
        let parent = nodes
            .get(id)?
            .parent
            .ok_or_else(|| Error::InvalidOperation("the root cannot be renamed".into()))?;
        check_name(name)?;
        if nodes.find_child(parent, name)?.is_some_and(|other| other != id) {
            return Err(Error::DuplicateName(name.to_string()));
        }

        nodes.get_mut(id)?.name = name.to_string();
        nodes.mark_dirty(parent);
        Ok(())
    }

    /// Replace the value of a leaf
    ///
    /// A leaf with children keeps them only if the new value can hold children too.
    pub fn set_leaf(&self, id: NodeId, value: Leaf) -> Result<()> {
        check_leaf(&value)?;
        let mut nodes = self.nodes.write()?;
        let node = nodes.get_mut(id)?;
        match &node.body {
            Body::Leaf(_) if node.children.is_empty() || value.is_container() => {}
            Body::Leaf(_) => {
                return Err(Error::InvalidOperation(format!(
                    "{} has children and {} cannot hold them",
                    node.name,
                    value.kind()
                )));
            }
            _ => return Err(Error::InvalidOperation(format!("{} is not a leaf", node.name))),
        }

        node.body = Body::Leaf(value);
        nodes.mark_dirty(id);
        Ok(())
    }
}

/// Canvas pixels
impl WzArchive {
    fn canvas(&self, id: NodeId) -> Result<crate::property::Canvas> {
        match self.leaf(id)? {
            Leaf::Canvas(canvas) => Ok(canvas),
            other => Err(Error::InvalidOperation(format!(
                "{} is a {}, not a canvas",
                self.path(id)?,
                other.kind()
            ))),
        }
    }

    /// Decoded pixels of a canvas, decoding and caching them on first use
    ///
    /// Decompression and decoding run without holding any archive lock. A canvas in a pixel format
    /// without a decoder fails with [`Error::UnsupportedPixelFormat`]; substitute
    /// [`Bitmap::placeholder`] in that case.
    #[instrument(skip(self), err)]
    pub fn bitmap(&self, id: NodeId) -> Result<Arc<Bitmap>> {
        let canvas = self.canvas(id)?;
        if let Some(decoded) = &canvas.payload.decoded {
            return Ok(decoded.clone());
        }

        let compressed = canvas
            .payload
            .compressed
            .clone()
            .ok_or_else(|| Error::InvalidOperation("canvas without pixels".into()))?;
        let raw_len = canvas.format().raw_len(canvas.width(), canvas.height())?;
        let raw = compression::decompress(&compressed, &self.key, raw_len)?;
        let bitmap = Arc::new(pixel::decode(
            canvas.format(),
            canvas.width(),
            canvas.height(),
            &raw,
        )?);

        let mut nodes = self.nodes.write()?;
        if let Body::Leaf(Leaf::Canvas(live)) = &mut nodes.get_mut(id)?.body {
            let unchanged = live
                .payload
                .compressed
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(c, &compressed));
            match (&live.payload.decoded, unchanged) {
                (Some(decoded), _) => return Ok(decoded.clone()),
                (None, true) => live.payload.decoded = Some(bitmap.clone()),
                (None, false) => {}
            }
        }
        Ok(bitmap)
    }

    /// Replace the pixels of a canvas. The canvas is recompressed on eviction or save.
    pub fn set_bitmap(&self, id: NodeId, bitmap: Bitmap) -> Result<()> {
        let mut nodes = self.nodes.write()?;
        match &mut nodes.get_mut(id)?.body {
            Body::Leaf(Leaf::Canvas(canvas)) => canvas.replace(bitmap),
            _ => return Err(Error::InvalidOperation("not a canvas".into())),
        }
        nodes.mark_dirty(id);
        Ok(())
    }

    /// Drop the decoded pixels of a canvas, recompressing them first if they were replaced
    pub fn evict(&self, id: NodeId) -> Result<()> {
        let canvas = self.canvas(id)?;
        let recompressed = match (&canvas.payload.decoded, canvas.is_dirty()) {
            (Some(decoded), true) => {
                let raw = pixel::encode(canvas.format(), decoded)?;
                let compressed = compression::compress(&raw, canvas.scheme(), &self.key)?;
                Some((decoded.clone(), Arc::<[u8]>::from(compressed)))
            }
            _ => None,
        };

        let mut nodes = self.nodes.write()?;
        if let Body::Leaf(Leaf::Canvas(live)) = &mut nodes.get_mut(id)?.body {
            match recompressed {
                Some((encoded, compressed)) => {
                    let same = live
                        .payload
                        .decoded
                        .as_ref()
                        .is_some_and(|d| Arc::ptr_eq(d, &encoded));
                    if same {
                        live.payload.compressed = Some(compressed);
                        live.payload.dirty = false;
                        live.payload.decoded = None;
                    }
                }
                None if !live.payload.dirty => live.payload.decoded = None,
                None => {}
            }
        }
        Ok(())
    }
}
