//! Depth-first paint of a subtree onto a canvas.

use crate::canvas::Canvas;
use crate::geometry::Bounds;
use crate::node::NodeKind;
use crate::paint::PaintService;
use crate::renderer::dispatch;
use crate::transform::Matrix;
use crate::tree::{NodeId, Tree};

/// Placement of a traversal on its target canvas.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderOptions {
    /// Canvas space ← world space. Identity when unset.
    pub matrix: Option<Matrix>,
    /// Only nodes whose painted area touches these canvas-space bounds are
    /// drawn. Everything is drawn when unset.
    pub bounds: Option<Bounds>,
}

impl RenderOptions {
    pub fn with_matrix(matrix: Matrix) -> Self {
        Self {
            matrix: Some(matrix),
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

/// Paint `id` and its descendants. A root scene node paints only its
/// children; its own fill is the caller's business.
pub fn render_node(
    tree: &Tree,
    id: NodeId,
    canvas: &mut Canvas,
    options: &RenderOptions,
    paint: &dyn PaintService,
) {
    let base = options.matrix.unwrap_or(Matrix::IDENTITY);
    visit(tree, id, canvas, &base, options.bounds.as_ref(), paint);
}

fn visit(
    tree: &Tree,
    id: NodeId,
    canvas: &mut Canvas,
    base: &Matrix,
    cull: Option<&Bounds>,
    paint: &dyn PaintService,
) {
    let (Some(data), Some(layout)) = (tree.get(id), tree.layout(id)) else {
        return;
    };
    if !data.visible {
        return;
    }
    if let Some(cull) = cull {
        if !base.transform_bounds(&layout.world_render_bounds).hit(cull) {
            return;
        }
    }

    match data.kind() {
        NodeKind::Leafer | NodeKind::Group => {
            for child in tree.children_slice(id) {
                visit(tree, *child, canvas, base, cull, paint);
            }
        }
        NodeKind::Frame => {
            canvas.set_world(base.then(&layout.world));
            dispatch::draw(data, canvas, paint);

            canvas.save();
            canvas.set_path(data.shape_path());
            canvas.clip_current();
            canvas.set_path(None);
            for child in tree.children_slice(id) {
                visit(tree, *child, canvas, base, cull, paint);
            }
            canvas.restore();
        }
        NodeKind::Rect | NodeKind::Ellipse => {
            canvas.set_world(base.then(&layout.world));
            dispatch::draw(data, canvas, paint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ScreenSize;
    use crate::layout::layout_tree;
    use crate::node::NodeData;
    use crate::paint::{Color, SkiaPaint};

    fn scene() -> (Tree, NodeId) {
        let (mut tree, root) = Tree::with_root(NodeData::group());
        let frame = tree
            .insert(
                NodeData::frame().at(10.0, 10.0).size(20.0, 20.0).with_fill(Color::WHITE),
                root,
            )
            .unwrap();
        tree.insert(
            NodeData::rect().at(10.0, 10.0).size(30.0, 30.0).with_fill(Color::BLACK),
            frame,
        );
        tree.insert(
            NodeData::ellipse().at(0.0, 40.0).size(10.0, 10.0).with_fill(Color::BLACK).hidden(),
            root,
        );
        layout_tree(&mut tree);
        (tree, root)
    }

    #[test]
    fn test_frame_clips_children() {
        let (tree, root) = scene();
        let mut canvas = Canvas::new(ScreenSize::new(50.0, 50.0, 1.0)).unwrap();
        render_node(&tree, root, &mut canvas, &RenderOptions::default(), &SkiaPaint);

        assert_eq!(canvas.pixel(12, 12), Some(Color::WHITE));
        assert_eq!(canvas.pixel(25, 25), Some(Color::BLACK));
        // Child area outside the frame
        assert_eq!(canvas.pixel(35, 35), Some(Color::TRANSPARENT));
        // Hidden node
        assert_eq!(canvas.pixel(5, 45), Some(Color::TRANSPARENT));
    }

    #[test]
    fn test_matrix_places_subtree() {
        let (tree, root) = scene();
        let mut canvas = Canvas::new(ScreenSize::new(50.0, 50.0, 1.0)).unwrap();
        let options = RenderOptions::with_matrix(Matrix::translate(-10.0, -10.0));
        render_node(&tree, root, &mut canvas, &options, &SkiaPaint);

        assert_eq!(canvas.pixel(2, 2), Some(Color::WHITE));
        assert_eq!(canvas.pixel(15, 15), Some(Color::BLACK));
    }

    #[test]
    fn test_cull_bounds_skip_untouched_nodes() {
        let (tree, root) = scene();
        let mut canvas = Canvas::new(ScreenSize::new(50.0, 50.0, 1.0)).unwrap();
        let options = RenderOptions::default().with_bounds(Bounds::new(0.0, 0.0, 5.0, 5.0));
        render_node(&tree, root, &mut canvas, &options, &SkiaPaint);

        assert_eq!(canvas.pixel(12, 12), Some(Color::TRANSPARENT));
    }
}
