//! Layout pass: local and world matrices plus bounds for every node.
//!
//! A pass runs from the root so that moving a container moves its whole
//! subtree. The regions a pass returns cover every changed node before and
//! after the change, plus anything vacated by removals; the renderer
//! repaints only those.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::control::Control;
use crate::error::Result;
use crate::events::{Emitter, EventType};
use crate::geometry::Bounds;
use crate::node::NodeKind;
use crate::transform::Matrix;
use crate::tree::{LayoutCache, NodeId, SharedTree, Tree};

/// Lay out the whole tree and return the world regions that need a repaint.
pub fn layout_tree(tree: &mut Tree) -> Vec<Bounds> {
    let (changed, mut blocks) = tree.take_changes();

    // Where changed nodes used to be
    for id in &changed {
        if let Some(layout) = tree.layout(*id) {
            blocks.push(layout.world_render_bounds);
        }
    }

    if let Some(root) = tree.root() {
        layout_node(tree, root, &Matrix::IDENTITY);
    }

    // Where they are now
    for id in &changed {
        if let Some(layout) = tree.layout(*id) {
            blocks.push(layout.world_render_bounds);
        }
    }

    blocks.retain(|b| !b.is_empty());
    blocks
}

/// Returns the node's box and render bounds in its parent's space, or
/// `None` when it is invisible.
fn layout_node(tree: &mut Tree, id: NodeId, parent_world: &Matrix) -> Option<(Bounds, Bounds)> {
    let (kind, local, visible, own_box, own_render) = {
        let data = tree.get(id)?;
        (
            data.kind(),
            data.local_matrix(),
            data.visible,
            data.box_bounds(),
            data.own_render_bounds(),
        )
    };
    let world = parent_world.then(&local);

    let mut content: Option<(Bounds, Bounds)> = None;
    for child in tree.children(id) {
        if let Some((child_box, child_render)) = layout_node(tree, child, &world) {
            content = Some(match content {
                Some((b, r)) => (b.union(&child_box), r.union(&child_render)),
                None => (child_box, child_render),
            });
        }
    }

    let (box_bounds, render_bounds) = match kind {
        NodeKind::Leafer | NodeKind::Group => content.unwrap_or((Bounds::ZERO, Bounds::ZERO)),
        // Frames clip their children, so only their own paint counts.
        NodeKind::Frame | NodeKind::Rect | NodeKind::Ellipse => (own_box, own_render),
    };

    tree.set_layout(
        id,
        LayoutCache {
            local,
            world,
            box_bounds,
            render_bounds,
            world_box_bounds: world.transform_bounds(&box_bounds),
            world_render_bounds: world.transform_bounds(&render_bounds),
        },
    );

    if !visible {
        return None;
    }
    Some((
        local.transform_bounds(&box_bounds),
        local.transform_bounds(&render_bounds),
    ))
}

/// Runs layout passes for one controller and collects the dirty regions
/// they produce for the renderer.
pub struct Layouter {
    tree: SharedTree,
    emitter: Rc<Emitter>,
    running: Cell<bool>,
    locked: Cell<bool>,
    destroyed: Cell<bool>,
    blocks: RefCell<Vec<Bounds>>,
    passes: Cell<u64>,
}

impl Layouter {
    pub fn new(tree: SharedTree, emitter: Rc<Emitter>) -> Self {
        Self {
            tree,
            emitter,
            running: Cell::new(false),
            locked: Cell::new(false),
            destroyed: Cell::new(false),
            blocks: RefCell::new(Vec::new()),
            passes: Cell::new(0),
        }
    }

    /// Lay out pending changes if the layouter is running.
    pub fn layout(&self) {
        if self.running.get() {
            self.layout_now();
        }
    }

    /// Lay out pending changes even while stopped. Skipped while locked.
    pub fn layout_now(&self) {
        if self.destroyed.get() || self.locked.get() {
            return;
        }
        let blocks = {
            let mut tree = self.tree.borrow_mut();
            if !tree.needs_layout() {
                return;
            }
            layout_tree(&mut tree)
        };

        let pass = self.passes.get() + 1;
        self.passes.set(pass);
        log::trace!(target: "leafer::layout", "Layout pass {} produced {} blocks", pass, blocks.len());

        self.blocks.borrow_mut().extend(blocks);
        self.emitter.emit_type(EventType::LayoutEnd);
    }

    /// Suspend layout passes until [`Layouter::unlock`].
    pub fn lock(&self) {
        self.locked.set(true);
    }

    pub fn unlock(&self) {
        self.locked.set(false);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    /// Dirty regions produced since the last call.
    pub fn take_blocks(&self) -> Vec<Bounds> {
        std::mem::take(&mut *self.blocks.borrow_mut())
    }

    /// Completed layout passes.
    pub fn passes(&self) -> u64 {
        self.passes.get()
    }
}

impl Control for Layouter {
    fn name(&self) -> &'static str {
        "layouter"
    }

    fn start(&self) -> Result<()> {
        if !self.destroyed.get() {
            self.running.set(true);
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.running.set(false);
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.running.set(false);
        self.destroyed.set(true);
        self.blocks.borrow_mut().clear();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeData;
    use crate::paint::Color;

    #[test]
    fn test_group_bounds_follow_children() {
        let (mut tree, root) = Tree::with_root(NodeData::group());
        let group = tree
            .insert(NodeData::group().at(10.0, 10.0), root)
            .unwrap();
        tree.insert(NodeData::rect().at(5.0, 5.0).size(10.0, 10.0), group);
        tree.insert(NodeData::rect().at(20.0, 0.0).size(10.0, 30.0), group);
        tree.insert(NodeData::rect().size(100.0, 100.0).hidden(), group);

        layout_tree(&mut tree);
        let layout = tree.layout(group).unwrap();
        assert_eq!(layout.box_bounds, Bounds::new(5.0, 0.0, 25.0, 30.0));
        assert_eq!(layout.world_box_bounds, Bounds::new(15.0, 10.0, 25.0, 30.0));
    }

    #[test]
    fn test_frame_clips_content_bounds() {
        let (mut tree, root) = Tree::with_root(NodeData::group());
        let frame = tree
            .insert(NodeData::frame().size(50.0, 50.0), root)
            .unwrap();
        tree.insert(NodeData::rect().size(200.0, 200.0), frame);

        layout_tree(&mut tree);
        assert_eq!(
            tree.layout(frame).unwrap().render_bounds,
            Bounds::new(0.0, 0.0, 50.0, 50.0)
        );
    }

    #[test]
    fn test_move_reports_old_and_new_regions() {
        let (mut tree, root) = Tree::with_root(NodeData::group());
        let rect = tree
            .insert(
                NodeData::rect().size(10.0, 10.0).with_fill(Color::BLACK),
                root,
            )
            .unwrap();
        layout_tree(&mut tree);
        assert!(!tree.needs_layout());

        tree.update(rect, |d| d.x = 50.0);
        let blocks = layout_tree(&mut tree);
        assert!(blocks.contains(&Bounds::new(0.0, 0.0, 10.0, 10.0)));
        assert!(blocks.contains(&Bounds::new(50.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn test_removal_reports_vacated_region() {
        let (mut tree, root) = Tree::with_root(NodeData::group());
        let rect = tree
            .insert(NodeData::rect().at(5.0, 5.0).size(10.0, 10.0), root)
            .unwrap();
        layout_tree(&mut tree);

        tree.remove(rect);
        let blocks = layout_tree(&mut tree);
        assert!(blocks.contains(&Bounds::new(5.0, 5.0, 10.0, 10.0)));
    }

    #[test]
    fn test_layouter_respects_lock_and_running() {
        let (tree, _) = Tree::with_root(NodeData::group());
        let tree = tree.shared();
        let emitter = Rc::new(Emitter::new());
        let ends = Rc::new(Cell::new(0));
        let counter = ends.clone();
        emitter.on(EventType::LayoutEnd, move |_| counter.set(counter.get() + 1));

        let layouter = Layouter::new(tree.clone(), emitter);
        layouter.layout();
        assert_eq!(ends.get(), 0);

        layouter.start().unwrap();
        layouter.lock();
        layouter.layout();
        assert_eq!(ends.get(), 0);

        layouter.unlock();
        layouter.layout();
        assert_eq!(ends.get(), 1);

        // Nothing changed since
        layouter.layout();
        assert_eq!(ends.get(), 1);
        assert_eq!(layouter.passes(), 1);
    }
}
