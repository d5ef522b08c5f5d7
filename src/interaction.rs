//! Pointer hit testing and hover tracking.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use resvg::tiny_skia;

use crate::canvas_manager::CanvasManager;
use crate::control::Control;
use crate::error::Result;
use crate::geometry::{Point, ScreenSize};
use crate::node::{NodeKind, NodeRef};
use crate::transform::Matrix;
use crate::tree::{NodeId, SharedTree, Tree};

/// Pointer shape requested by the hovered node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Cursor {
    #[default]
    Default,
    Pointer,
    Text,
    Crosshair,
    Move,
    Grab,
    Grabbing,
    NotAllowed,
}

/// Finds the topmost node under a world point.
///
/// Candidates are filtered by their world bounds, then confirmed against
/// the node's actual outline on a 1x1 scratch canvas.
pub struct Selector {
    hit_canvases: Rc<CanvasManager>,
    destroyed: Cell<bool>,
}

impl Selector {
    pub fn new(hit_canvases: Rc<CanvasManager>) -> Self {
        Self {
            hit_canvases,
            destroyed: Cell::new(false),
        }
    }

    pub fn get_by_point(&self, tree: &Tree, point: Point) -> Option<NodeId> {
        if self.destroyed.get() {
            return None;
        }
        let root = tree.root()?;
        self.hit(tree, root, point)
    }

    fn hit(&self, tree: &Tree, id: NodeId, point: Point) -> Option<NodeId> {
        let data = tree.get(id)?;
        let layout = tree.layout(id)?;
        if !data.visible || !data.hittable {
            return None;
        }

        match data.kind() {
            NodeKind::Leafer | NodeKind::Group => tree
                .children_slice(id)
                .iter()
                .rev()
                .find_map(|child| self.hit(tree, *child, point)),
            NodeKind::Frame => {
                if !self.hit_shape(tree, id, point) {
                    return None;
                }
                tree.children_slice(id)
                    .iter()
                    .rev()
                    .find_map(|child| self.hit(tree, *child, point))
                    .or(Some(id))
            }
            NodeKind::Rect | NodeKind::Ellipse => {
                if !layout.world_box_bounds.contains_point(point) {
                    return None;
                }
                self.hit_shape(tree, id, point).then_some(id)
            }
        }
    }

    fn hit_shape(&self, tree: &Tree, id: NodeId, point: Point) -> bool {
        let (Some(data), Some(layout)) = (tree.get(id), tree.layout(id)) else {
            return false;
        };
        let Some(path) = data.shape_path() else {
            return false;
        };
        let Ok(mut canvas) = self.hit_canvases.get(ScreenSize::new(1.0, 1.0, 1.0)) else {
            return false;
        };

        // Put the point at the center of the only pixel.
        let world = Matrix::translate(0.5 - point.x, 0.5 - point.y).then(&layout.world);
        canvas.set_world(world);
        canvas.set_path(Some(path));
        let mut paint = tiny_skia::Paint::default();
        paint.set_color(tiny_skia::Color::BLACK);
        paint.anti_alias = false;
        canvas.fill_current(&paint);

        let hit = canvas.pixel(0, 0).is_some_and(|c| c.a > 0.0);
        self.hit_canvases.recycle(canvas);
        hit
    }

    pub fn destroy(&self) {
        self.destroyed.set(true);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }
}

/// Hover state over one or more scenes.
///
/// An app shares a single interaction between all of its scenes; later
/// targets are treated as stacked above earlier ones.
pub struct Interaction {
    selector: Rc<Selector>,
    targets: RefCell<Vec<SharedTree>>,
    point: Cell<Option<Point>>,
    hover: RefCell<Option<NodeRef>>,
    cursor: Cell<Cursor>,
    running: Cell<bool>,
    destroyed: Cell<bool>,
}

impl Interaction {
    pub fn new(selector: Rc<Selector>) -> Self {
        Self {
            selector,
            targets: RefCell::new(Vec::new()),
            point: Cell::new(None),
            hover: RefCell::new(None),
            cursor: Cell::new(Cursor::Default),
            running: Cell::new(false),
            destroyed: Cell::new(false),
        }
    }

    pub fn add_target(&self, tree: SharedTree) {
        let mut targets = self.targets.borrow_mut();
        if !targets.iter().any(|t| Rc::ptr_eq(t, &tree)) {
            targets.push(tree);
        }
    }

    pub fn remove_target(&self, tree: &SharedTree) {
        self.targets.borrow_mut().retain(|t| !Rc::ptr_eq(t, tree));
        let stale = self
            .hover
            .borrow()
            .as_ref()
            .is_some_and(|node| Rc::ptr_eq(node.tree(), tree));
        if stale {
            self.set_hover(None);
        }
    }

    /// Pointer moved to `point` (world units). Returns the hovered node.
    pub fn pointer_move(&self, point: Point) -> Option<NodeRef> {
        if !self.running.get() {
            return None;
        }
        self.point.set(Some(point));
        self.update_cursor();
        self.hover()
    }

    pub fn pointer_leave(&self) {
        self.point.set(None);
        self.set_hover(None);
    }

    /// Re-run the hit test at the last pointer position.
    pub fn update_cursor(&self) {
        if !self.running.get() {
            return;
        }
        let hovered = self.point.get().and_then(|point| self.find(point));
        self.set_hover(hovered);
    }

    pub fn hover(&self) -> Option<NodeRef> {
        self.hover.borrow().clone()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor.get()
    }

    fn find(&self, point: Point) -> Option<NodeRef> {
        let targets = self.targets.borrow().clone();
        targets.iter().rev().find_map(|tree| {
            let id = {
                let tree = tree.try_borrow().ok()?;
                self.selector.get_by_point(&tree, point)?
            };
            Some(NodeRef::new(tree.clone(), id))
        })
    }

    fn set_hover(&self, node: Option<NodeRef>) {
        let cursor = node
            .as_ref()
            .and_then(|n| n.with(|d| d.cursor))
            .flatten()
            .unwrap_or_default();
        if cursor != self.cursor.get() {
            log::trace!(target: "leafer::interaction", "Cursor {:?}", cursor);
        }
        self.cursor.set(cursor);
        *self.hover.borrow_mut() = node;
    }
}

impl Control for Interaction {
    fn name(&self) -> &'static str {
        "interaction"
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
        if self.destroyed.replace(true) {
            return Ok(());
        }
        self.running.set(false);
        self.targets.borrow_mut().clear();
        *self.hover.borrow_mut() = None;
        self.point.set(None);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }
}
