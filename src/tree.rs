//! Arena-based node storage.
//!
//! The Tree stores every node of one scene in a sparse-set arena with
//! generational indices, so a [`NodeId`] held by application code can be
//! checked for staleness after its node was removed.
//!
//! ## Key Features
//!
//! - **Generational Indices**: NodeId contains index + generation to prevent
//!   ABA problems (detecting stale references to reallocated slots).
//!
//! - **Dense Storage**: Nodes stored contiguously for cache-friendly iteration
//!   during layout and paint passes.
//!
//! - **Swap-Remove**: O(1) removal without creating holes in dense storage.
//!
//! - **Change Tracking**: Mutations mark nodes with [`ChangeFlags`] and queue
//!   them for the next layout pass, which turns them into dirty regions.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::geometry::Bounds;
use crate::image_manager::LeaferImage;
use crate::leafer::LeaferInner;
use crate::node::NodeData;
use crate::transform::Matrix;

pub type SharedTree = Rc<RefCell<Tree>>;

/// Unique identifier for a node in the tree.
///
/// Uses a generational index design:
/// - `index`: Position in the sparse array (reusable after removal)
/// - `generation`: Version counter that increments when a slot is reused
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Combines generation (high bits) with index (low bits).
    pub fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }
}

bitflags! {
    /// What changed on a node since the last layout pass.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ChangeFlags: u8 {
        const LAYOUT = 1 << 0;
        const PAINT = 1 << 1;
        const CHILDREN = 1 << 2;
    }
}

/// Geometry computed by the layout pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LayoutCache {
    /// Parent space ← node space.
    pub local: Matrix,
    /// World space ← node space.
    pub world: Matrix,
    /// Box bounds in node space.
    pub box_bounds: Bounds,
    /// Painted area in node space, including strokes and shadows.
    pub render_bounds: Bounds,
    pub world_box_bounds: Bounds,
    pub world_render_bounds: Bounds,
}

/// Entry in the sparse map, pointing to a dense array slot.
struct SparseEntry {
    dense_index: usize,
    generation: u32,
}

struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    flags: ChangeFlags,
    layout: Option<LayoutCache>,
    /// Back-pointer to sparse array index (for swap-remove fixup)
    sparse_index: u32,
}

/// One scene: a rooted node hierarchy plus pending change state.
pub struct Tree {
    dense: Vec<Node>,
    sparse: Vec<Option<SparseEntry>>,
    free_indices: Vec<u32>,
    root: Option<NodeId>,
    changed: Vec<NodeId>,
    /// World regions vacated by removed nodes.
    removed_blocks: Vec<Bounds>,
    needs_layout: bool,
    children_changed: bool,
    pub(crate) owner: Weak<LeaferInner>,
}

impl Tree {
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            sparse: Vec::new(),
            free_indices: Vec::new(),
            root: None,
            changed: Vec::new(),
            removed_blocks: Vec::new(),
            needs_layout: true,
            children_changed: false,
            owner: Weak::new(),
        }
    }

    /// A tree holding only `root`.
    pub fn with_root(root: NodeData) -> (Self, NodeId) {
        let mut tree = Self::new();
        let id = tree.register(root);
        tree.root = Some(id);
        tree.changed.push(id);
        (tree, id)
    }

    pub fn shared(self) -> SharedTree {
        Rc::new(RefCell::new(self))
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn register(&mut self, data: NodeData) -> NodeId {
        // Allocate a sparse index (reuse from free list or allocate new)
        let (sparse_index, generation) = if let Some(idx) = self.free_indices.pop() {
            let old_gen = self.sparse[idx as usize]
                .as_ref()
                .map(|e| e.generation)
                .unwrap_or(0);
            (idx, old_gen.wrapping_add(1))
        } else {
            let idx = self.sparse.len() as u32;
            self.sparse.push(None);
            (idx, 0)
        };

        let dense_index = self.dense.len();
        self.dense.push(Node {
            data,
            parent: None,
            children: Vec::new(),
            flags: ChangeFlags::all(),
            layout: None,
            sparse_index,
        });
        self.sparse[sparse_index as usize] = Some(SparseEntry {
            dense_index,
            generation,
        });

        NodeId::new(sparse_index, generation)
    }

    /// Append a node under `parent`. Returns `None` if `parent` is stale.
    pub fn insert(&mut self, data: NodeData, parent: NodeId) -> Option<NodeId> {
        let parent_dense = self.dense_index(parent)?;
        let id = self.register(data);
        // The parent's dense slot is unaffected by a push.
        self.dense[parent_dense].children.push(id);
        if let Some(dense) = self.dense_index(id) {
            self.dense[dense].parent = Some(parent);
        }
        self.changed.push(id);
        self.needs_layout = true;
        self.children_changed = true;
        Some(id)
    }

    /// Remove a node and its whole subtree. Removing twice is a no-op.
    pub fn remove(&mut self, id: NodeId) -> bool {
        let Some(dense) = self.dense_index(id) else {
            return false;
        };
        if let Some(parent_dense) = self.dense[dense].parent.and_then(|p| self.dense_index(p)) {
            self.dense[parent_dense].children.retain(|&c| c != id);
        }
        if let Some(layout) = self.dense[dense].layout {
            self.removed_blocks.push(layout.world_render_bounds);
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            stack.extend(self.children(current));
            self.unregister(current);
        }
        if self.root == Some(id) {
            self.root = None;
        }
        self.needs_layout = true;
        self.children_changed = true;
        true
    }

    /// Remove a single slot. Uses swap-remove to keep dense storage packed.
    fn unregister(&mut self, id: NodeId) {
        let Some(dense_index) = self.dense_index(id) else {
            return;
        };
        let last_dense_index = self.dense.len() - 1;
        self.dense.swap_remove(dense_index);

        // Fix up the moved node's sparse entry (if we didn't remove the last element)
        if dense_index != last_dense_index {
            let moved_sparse_idx = self.dense[dense_index].sparse_index;
            if let Some(entry) = &mut self.sparse[moved_sparse_idx as usize] {
                entry.dense_index = dense_index;
            }
        }

        // Keep the generation so the next allocation of this slot bumps it
        if let Some(entry) = &mut self.sparse[id.index as usize] {
            entry.dense_index = usize::MAX;
        }
        self.free_indices.push(id.index);
    }

    /// Get the dense array index for a NodeId, validating generation.
    fn dense_index(&self, id: NodeId) -> Option<usize> {
        self.sparse
            .get(id.index as usize)
            .and_then(|e| e.as_ref())
            .filter(|e| e.generation == id.generation && e.dense_index != usize::MAX)
            .map(|e| e.dense_index)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.dense_index(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.dense_index(id).map(|idx| &self.dense[idx].data)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.dense_index(id).and_then(|idx| self.dense[idx].parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.dense_index(id)
            .map(|idx| self.dense[idx].children.clone())
            .unwrap_or_default()
    }

    pub(crate) fn children_slice(&self, id: NodeId) -> &[NodeId] {
        self.dense_index(id)
            .map(|idx| self.dense[idx].children.as_slice())
            .unwrap_or(&[])
    }

    pub fn layout(&self, id: NodeId) -> Option<LayoutCache> {
        self.dense_index(id).and_then(|idx| self.dense[idx].layout)
    }

    pub(crate) fn set_layout(&mut self, id: NodeId, layout: LayoutCache) {
        if let Some(idx) = self.dense_index(id) {
            self.dense[idx].layout = Some(layout);
        }
    }

    /// Queue a node for the next layout pass.
    pub fn mark_changed(&mut self, id: NodeId, flags: ChangeFlags) {
        let Some(idx) = self.dense_index(id) else {
            return;
        };
        if self.dense[idx].flags.is_empty() {
            self.changed.push(id);
        }
        self.dense[idx].flags |= flags;
        self.needs_layout = true;
    }

    pub fn flags(&self, id: NodeId) -> ChangeFlags {
        self.dense_index(id)
            .map(|idx| self.dense[idx].flags)
            .unwrap_or_default()
    }

    /// Mutate a node's data and queue it for layout and paint.
    pub fn update<R>(&mut self, id: NodeId, f: impl FnOnce(&mut NodeData) -> R) -> Option<R> {
        let idx = self.dense_index(id)?;
        let result = f(&mut self.dense[idx].data);
        self.mark_changed(id, ChangeFlags::LAYOUT | ChangeFlags::PAINT);
        Some(result)
    }

    /// Mutate a node's data without recording a change.
    pub(crate) fn update_silent<R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut NodeData) -> R,
    ) -> Option<R> {
        let idx = self.dense_index(id)?;
        Some(f(&mut self.dense[idx].data))
    }

    pub fn needs_layout(&self) -> bool {
        self.needs_layout
    }

    /// Changed nodes plus vacated regions, clearing both.
    pub(crate) fn take_changes(&mut self) -> (Vec<NodeId>, Vec<Bounds>) {
        for id in &self.changed {
            if let Some(idx) = self.dense_index(*id) {
                self.dense[idx].flags = ChangeFlags::empty();
            }
        }
        self.needs_layout = false;
        (
            std::mem::take(&mut self.changed),
            std::mem::take(&mut self.removed_blocks),
        )
    }

    pub fn children_changed(&self) -> bool {
        self.children_changed
    }

    pub(crate) fn take_children_changed(&mut self) -> bool {
        std::mem::replace(&mut self.children_changed, false)
    }

    /// Images referenced by node paints that are still loading.
    pub fn pending_images(&self) -> Vec<LeaferImage> {
        let mut pending: Vec<LeaferImage> = Vec::new();
        for node in &self.dense {
            for paint in node.data.fills().iter().chain(node.data.strokes()) {
                match paint.pending_image() {
                    Some(image) if !pending.iter().any(|p| p.ptr_eq(image)) => {
                        pending.push(image.clone());
                    }
                    _ => {}
                }
            }
        }
        pending
    }

    pub fn images_resolved(&self) -> bool {
        self.pending_images().is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.dense.len()
    }

    /// Remove every node.
    pub fn clear(&mut self) {
        self.dense.clear();
        self.sparse.clear();
        self.free_indices.clear();
        self.changed.clear();
        self.removed_blocks.clear();
        self.root = None;
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
