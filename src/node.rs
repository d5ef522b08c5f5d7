//! Node attributes and shared node handles.

use std::fmt;
use std::str::FromStr;

use resvg::tiny_skia;

use crate::error::{Error, Result};
use crate::geometry::Bounds;
use crate::interaction::Cursor;
use crate::leafer::Leafer;
use crate::paint::{Color, Paint, Shadow};
use crate::renderer::dispatch::{self, Classification};
use crate::transform::Matrix;
use crate::tree::{ChangeFlags, LayoutCache, NodeId, SharedTree, Tree};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Root of a controller's scene.
    Leafer,
    Group,
    /// Container with its own box that clips its children.
    Frame,
    Rect,
    Ellipse,
}

impl NodeKind {
    pub fn is_container(self) -> bool {
        matches!(self, NodeKind::Leafer | NodeKind::Group | NodeKind::Frame)
    }

    /// Whether the node's bounds come from its children rather than its size.
    pub fn is_group_like(self) -> bool {
        matches!(self, NodeKind::Leafer | NodeKind::Group)
    }
}

/// Attributes of one node.
///
/// Paint-related attributes are only reachable through setters, which keep
/// the cached draw classification current.
#[derive(Debug, Clone)]
pub struct NodeData {
    kind: NodeKind,
    pub name: Option<String>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    /// Rotation in degrees around the node's origin.
    pub rotation: f32,
    pub visible: bool,
    pub hittable: bool,
    pub cursor: Option<Cursor>,
    fill: Vec<Paint>,
    stroke: Vec<Paint>,
    stroke_width: f32,
    corner_radius: f32,
    shadow: Option<Shadow>,
    classification: Classification,
}

impl NodeData {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            name: None,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            visible: true,
            hittable: true,
            cursor: None,
            fill: Vec::new(),
            stroke: Vec::new(),
            stroke_width: 1.0,
            corner_radius: 0.0,
            shadow: None,
            classification: Classification::Simple,
        }
    }

    pub(crate) fn leafer() -> Self {
        Self::new(NodeKind::Leafer)
    }

    pub fn group() -> Self {
        Self::new(NodeKind::Group)
    }

    pub fn frame() -> Self {
        Self::new(NodeKind::Frame)
    }

    pub fn rect() -> Self {
        Self::new(NodeKind::Rect)
    }

    pub fn ellipse() -> Self {
        Self::new(NodeKind::Ellipse)
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    // Builders

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn size(mut self, width: f32, height: f32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale_x = scale;
        self.scale_y = scale;
        self
    }

    pub fn rotate(mut self, degrees: f32) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_hittable(mut self, hittable: bool) -> Self {
        self.hittable = hittable;
        self
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_fill(mut self, paint: impl Into<Paint>) -> Self {
        self.set_fill(Some(paint.into()));
        self
    }

    pub fn with_fills(mut self, paints: Vec<Paint>) -> Self {
        self.set_fills(paints);
        self
    }

    pub fn with_stroke(mut self, paint: impl Into<Paint>, width: f32) -> Self {
        self.stroke_width = width;
        self.set_stroke(Some(paint.into()));
        self
    }

    pub fn with_strokes(mut self, paints: Vec<Paint>, width: f32) -> Self {
        self.stroke_width = width;
        self.set_strokes(paints);
        self
    }

    pub fn with_corner_radius(mut self, radius: f32) -> Self {
        self.set_corner_radius(radius);
        self
    }

    pub fn with_shadow(mut self, shadow: Shadow) -> Self {
        self.set_shadow(Some(shadow));
        self
    }

    // Paint attributes

    pub fn fills(&self) -> &[Paint] {
        &self.fill
    }

    pub fn strokes(&self) -> &[Paint] {
        &self.stroke
    }

    /// More than one fill paint.
    pub fn is_fills(&self) -> bool {
        self.fill.len() > 1
    }

    /// More than one stroke paint.
    pub fn is_strokes(&self) -> bool {
        self.stroke.len() > 1
    }

    pub fn stroke_width(&self) -> f32 {
        self.stroke_width
    }

    pub fn corner_radius(&self) -> f32 {
        self.corner_radius
    }

    pub fn shadow(&self) -> Option<&Shadow> {
        self.shadow.as_ref()
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn is_complex(&self) -> bool {
        self.classification == Classification::Complex
    }

    pub(crate) fn set_classification(&mut self, classification: Classification) {
        self.classification = classification;
    }

    pub fn set_fill(&mut self, paint: Option<Paint>) {
        self.fill = paint.into_iter().collect();
        dispatch::update_classification(self);
    }

    pub fn set_fills(&mut self, paints: Vec<Paint>) {
        self.fill = paints;
        dispatch::update_classification(self);
    }

    pub fn add_fill(&mut self, paint: impl Into<Paint>) {
        self.fill.push(paint.into());
        dispatch::update_classification(self);
    }

    pub fn set_stroke(&mut self, paint: Option<Paint>) {
        self.stroke = paint.into_iter().collect();
        dispatch::update_classification(self);
    }

    pub fn set_strokes(&mut self, paints: Vec<Paint>) {
        self.stroke = paints;
        dispatch::update_classification(self);
    }

    pub fn set_stroke_width(&mut self, width: f32) {
        self.stroke_width = width.max(0.0);
    }

    pub fn set_corner_radius(&mut self, radius: f32) {
        self.corner_radius = radius.max(0.0);
        dispatch::update_classification(self);
    }

    pub fn set_shadow(&mut self, shadow: Option<Shadow>) {
        self.shadow = shadow;
        dispatch::update_classification(self);
    }

    /// The first fill if it is a plain color.
    pub fn fill_color(&self) -> Option<Color> {
        match self.fill.first() {
            Some(Paint::Solid(color)) => Some(*color),
            _ => None,
        }
    }

    // Geometry

    /// Parent space ← node space.
    pub fn local_matrix(&self) -> Matrix {
        let mut m = Matrix::translate(self.x, self.y);
        if self.rotation != 0.0 {
            m = m.then(&Matrix::rotate_degrees(self.rotation));
        }
        if self.scale_x != 1.0 || self.scale_y != 1.0 {
            m = m.then(&Matrix::scale_xy(self.scale_x, self.scale_y));
        }
        m
    }

    /// The node's own box in node space.
    pub fn box_bounds(&self) -> Bounds {
        Bounds::new(0.0, 0.0, self.width, self.height)
    }

    /// Area the node's own paints can touch, in node space.
    pub fn own_render_bounds(&self) -> Bounds {
        let shape = self.box_bounds();
        let stroked = if self.stroke.is_empty() {
            shape
        } else {
            shape.spread(self.stroke_width / 2.0)
        };
        match self.shadow.filter(Shadow::is_active) {
            Some(shadow) => stroked.union(&shadow.bounds(&stroked)),
            None => stroked,
        }
    }

    /// Outline used for fills, strokes, clipping and hit tests.
    pub fn shape_path(&self) -> Option<tiny_skia::Path> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }
        let rect = tiny_skia::Rect::from_xywh(0.0, 0.0, self.width, self.height)?;
        match self.kind {
            NodeKind::Leafer | NodeKind::Group => None,
            NodeKind::Ellipse => tiny_skia::PathBuilder::from_oval(rect),
            NodeKind::Rect | NodeKind::Frame if self.corner_radius > 0.0 => {
                rounded_rect(self.width, self.height, self.corner_radius)
            }
            NodeKind::Rect | NodeKind::Frame => Some(tiny_skia::PathBuilder::from_rect(rect)),
        }
    }
}

fn rounded_rect(w: f32, h: f32, radius: f32) -> Option<tiny_skia::Path> {
    let r = radius.min(w / 2.0).min(h / 2.0);
    // Distance from the corner to each cubic control point.
    let k = r * 0.447_715;
    let mut pb = tiny_skia::PathBuilder::new();
    pb.move_to(r, 0.0);
    pb.line_to(w - r, 0.0);
    pb.cubic_to(w - k, 0.0, w, k, w, r);
    pb.line_to(w, h - r);
    pb.cubic_to(w, h - k, w - k, h, w - r, h);
    pb.line_to(r, h);
    pb.cubic_to(k, h, 0.0, h - k, 0.0, h - r);
    pb.line_to(0.0, r);
    pb.cubic_to(0.0, k, k, 0.0, r, 0.0);
    pb.close();
    pb.finish()
}

/// Which bounds of a node to query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundsKind {
    Box,
    Render,
}

/// Reference frame for bounds and transforms.
#[derive(Clone, PartialEq)]
pub enum Relative {
    /// The node's own space.
    Inner,
    /// The parent's space.
    Local,
    World,
    /// The space of the scene root.
    Page,
    /// The space of another node.
    Node(NodeRef),
}

impl fmt::Debug for Relative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relative::Inner => f.write_str("Inner"),
            Relative::Local => f.write_str("Local"),
            Relative::World => f.write_str("World"),
            Relative::Page => f.write_str("Page"),
            Relative::Node(node) => f.debug_tuple("Node").field(node).finish(),
        }
    }
}

impl FromStr for Relative {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inner" => Ok(Relative::Inner),
            "local" => Ok(Relative::Local),
            "world" => Ok(Relative::World),
            "page" => Ok(Relative::Page),
            other => Err(Error::UnknownRelative(other.to_string())),
        }
    }
}

impl From<NodeRef> for Relative {
    fn from(node: NodeRef) -> Self {
        Relative::Node(node)
    }
}

/// Handle to a node inside a shared tree.
///
/// Stays valid as a value after the node is removed; operations on a removed
/// node return `None` or [`Error::StaleNode`].
#[derive(Clone)]
pub struct NodeRef {
    tree: SharedTree,
    id: NodeId,
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef").field("id", &self.id).finish()
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && std::rc::Rc::ptr_eq(&self.tree, &other.tree)
    }
}

impl NodeRef {
    pub(crate) fn new(tree: SharedTree, id: NodeId) -> Self {
        Self { tree, id }
    }

    /// A node in a tree of its own, with no controller.
    pub fn detached(data: NodeData) -> Self {
        let (tree, id) = Tree::with_root(data);
        Self::new(tree.shared(), id)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn tree(&self) -> &SharedTree {
        &self.tree
    }

    pub fn is_alive(&self) -> bool {
        self.tree.borrow().contains(self.id)
    }

    pub fn kind(&self) -> Option<NodeKind> {
        self.with(NodeData::kind)
    }

    /// Whether this node is the root of its scene.
    pub fn is_root(&self) -> bool {
        self.tree.borrow().root() == Some(self.id)
    }

    /// Snapshot of the node's attributes.
    pub fn data(&self) -> Option<NodeData> {
        self.with(NodeData::clone)
    }

    pub fn with<R>(&self, f: impl FnOnce(&NodeData) -> R) -> Option<R> {
        self.tree.borrow().get(self.id).map(f)
    }

    /// Mutate the node and schedule a layout and repaint.
    pub fn update<R>(&self, f: impl FnOnce(&mut NodeData) -> R) -> Option<R> {
        let result = self.tree.borrow_mut().update(self.id, f)?;
        self.notify(false);
        Some(result)
    }

    /// Mutate the node without telling anyone. The caller restores state
    /// before the next layout pass observes it.
    pub(crate) fn update_silent<R>(&self, f: impl FnOnce(&mut NodeData) -> R) -> Option<R> {
        self.tree.borrow_mut().update_silent(self.id, f)
    }

    /// Append a child node.
    pub fn add(&self, data: NodeData) -> Result<NodeRef> {
        let id = self
            .tree
            .borrow_mut()
            .insert(data, self.id)
            .ok_or(Error::StaleNode)?;
        self.notify(true);
        Ok(NodeRef::new(self.tree.clone(), id))
    }

    /// Remove the node and its subtree. Calling it again is a no-op.
    pub fn remove(&self) {
        let removed = self.tree.borrow_mut().remove(self.id);
        if removed {
            self.notify(true);
        }
    }

    pub fn parent(&self) -> Option<NodeRef> {
        let parent = self.tree.borrow().parent(self.id)?;
        Some(NodeRef::new(self.tree.clone(), parent))
    }

    pub fn children(&self) -> Vec<NodeRef> {
        self.tree
            .borrow()
            .children(self.id)
            .into_iter()
            .map(|id| NodeRef::new(self.tree.clone(), id))
            .collect()
    }

    /// Root of this node's scene.
    pub fn root(&self) -> Option<NodeRef> {
        let root = self.tree.borrow().root()?;
        Some(NodeRef::new(self.tree.clone(), root))
    }

    /// The controller that owns this node's scene, while both are alive.
    pub fn leafer(&self) -> Option<Leafer> {
        let tree = self.tree.borrow();
        if !tree.contains(self.id) {
            return None;
        }
        tree.owner.upgrade().map(Leafer::from_inner)
    }

    /// Geometry from the last layout pass.
    pub fn layout(&self) -> Option<LayoutCache> {
        self.tree.borrow().layout(self.id)
    }

    pub fn world_transform(&self) -> Option<Matrix> {
        self.layout().map(|l| l.world)
    }

    pub fn local_transform(&self) -> Option<Matrix> {
        self.layout().map(|l| l.local)
    }

    /// Matrix mapping this node's space into `relative`'s space.
    pub fn transform_to(&self, relative: &Relative) -> Result<Matrix> {
        let layout = self.layout().ok_or(Error::StaleNode)?;
        match relative {
            Relative::Inner => Ok(Matrix::IDENTITY),
            Relative::Local => Ok(layout.local),
            Relative::World => Ok(layout.world),
            Relative::Page => {
                let root = self.root().and_then(|r| r.layout()).ok_or(Error::StaleNode)?;
                Ok(root.world.inverse().then(&layout.world))
            }
            Relative::Node(node) => {
                let frame = node.layout().ok_or(Error::InvalidRelative)?;
                Ok(frame.world.inverse().then(&layout.world))
            }
        }
    }

    /// Box or render bounds expressed in `relative`'s space.
    pub fn get_bounds(&self, kind: BoundsKind, relative: &Relative) -> Result<Bounds> {
        let layout = self.layout().ok_or(Error::StaleNode)?;
        let bounds = match kind {
            BoundsKind::Box => layout.box_bounds,
            BoundsKind::Render => layout.render_bounds,
        };
        Ok(self.transform_to(relative)?.transform_bounds(&bounds))
    }

    /// Replace the fills with a single paint, or none.
    pub fn set_fill(&self, paint: Option<Paint>) {
        self.update(|d| d.set_fill(paint));
    }

    pub fn change_flags(&self) -> ChangeFlags {
        self.tree.borrow().flags(self.id)
    }

    fn notify(&self, children: bool) {
        let owner = self.tree.borrow().owner.upgrade();
        if let Some(owner) = owner {
            owner.node_changed(children);
        }
    }
}
