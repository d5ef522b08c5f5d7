//! Per-node paint path selection.
//!
//! Most nodes carry one fill and at most one stroke; they take the fast
//! path, which skips the shadow and multi-paint machinery. The choice is
//! cached on the node and refreshed by every paint-attribute setter, so the
//! render loop never re-inspects paint lists.

use crate::canvas::Canvas;
use crate::node::NodeData;
use crate::paint::{PaintService, Shadow};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Classification {
    #[default]
    Simple,
    Complex,
}

/// Recompute the cached classification from the node's paint attributes.
pub fn update_classification(node: &mut NodeData) {
    let complex = node.is_fills()
        || node.is_strokes()
        || node.corner_radius() > 0.0
        || node.shadow().is_some_and(Shadow::is_active);
    node.set_classification(if complex {
        Classification::Complex
    } else {
        Classification::Simple
    });
}

/// Paint `node` with the canvas's current world transform, taking the path
/// its classification selects.
pub fn draw(node: &NodeData, canvas: &mut Canvas, paint: &dyn PaintService) {
    draw_with(node, node.classification(), canvas, paint);
}

/// Paint `node` along an explicit path. Both paths produce the same pixels
/// for a simple node.
pub fn draw_with(
    node: &NodeData,
    classification: Classification,
    canvas: &mut Canvas,
    paint: &dyn PaintService,
) {
    let Some(path) = node.shape_path() else {
        return;
    };
    canvas.set_path(Some(path));
    match classification {
        Classification::Simple => draw_fast(node, canvas, paint),
        Classification::Complex => draw_complex(node, canvas, paint),
    }
    canvas.set_path(None);
}

fn draw_fast(node: &NodeData, canvas: &mut Canvas, paint: &dyn PaintService) {
    if let Some(fill) = node.fills().first() {
        paint.fill(node, canvas, fill);
    }
    if let Some(stroke) = node.strokes().first() {
        paint.stroke(node, canvas, stroke);
    }
}

fn draw_complex(node: &NodeData, canvas: &mut Canvas, paint: &dyn PaintService) {
    if node.shadow().is_some() {
        paint.shadow(node, canvas);
    }

    if node.is_fills() {
        paint.fills(node, canvas, node.fills());
    } else if let Some(fill) = node.fills().first() {
        paint.fill(node, canvas, fill);
    }

    if node.is_strokes() {
        paint.strokes(node, canvas, node.strokes());
    } else if let Some(stroke) = node.strokes().first() {
        paint.stroke(node, canvas, stroke);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ScreenSize;
    use crate::paint::{Color, SkiaPaint};
    use crate::transform::Matrix;

    fn square() -> NodeData {
        NodeData::rect()
            .size(12.0, 12.0)
            .with_fill(Color::rgb(0.9, 0.2, 0.1))
            .with_stroke(Color::BLACK, 2.0)
    }

    fn render(node: &NodeData, classification: Classification) -> Vec<u8> {
        let mut canvas = Canvas::new(ScreenSize::new(20.0, 20.0, 1.0)).unwrap();
        canvas.set_world(Matrix::translate(4.0, 4.0));
        draw_with(node, classification, &mut canvas, &SkiaPaint);
        canvas.pixmap().unwrap().data().to_vec()
    }

    #[test]
    fn test_classification_follows_setters() {
        let mut node = square();
        assert_eq!(node.classification(), Classification::Simple);

        node.set_corner_radius(3.0);
        assert!(node.is_complex());
        node.set_corner_radius(0.0);
        assert!(!node.is_complex());

        node.add_fill(Color::WHITE);
        assert!(node.is_complex());
        node.set_fill(Some(Color::WHITE.into()));
        assert!(!node.is_complex());

        let mut hidden = Shadow::new(2.0, 2.0, 4.0, Color::BLACK);
        hidden.visible = false;
        node.set_shadow(Some(hidden));
        assert!(!node.is_complex());
        node.set_shadow(Some(Shadow::new(2.0, 2.0, 4.0, Color::BLACK)));
        assert!(node.is_complex());
    }

    #[test]
    fn test_simple_node_paints_same_on_both_paths() {
        let node = square();
        let fast = render(&node, Classification::Simple);
        let full = render(&node, Classification::Complex);
        assert!(fast.iter().any(|&b| b != 0));
        assert_eq!(fast, full);
    }

    #[test]
    fn test_shadow_paints_outside_shape() {
        let node = NodeData::rect()
            .size(6.0, 6.0)
            .with_fill(Color::WHITE)
            .with_shadow(Shadow::new(6.0, 6.0, 0.0, Color::BLACK));
        let mut canvas = Canvas::new(ScreenSize::new(20.0, 20.0, 1.0)).unwrap();
        draw(&node, &mut canvas, &SkiaPaint);

        assert_eq!(canvas.pixel(2, 2), Some(Color::WHITE));
        assert_eq!(canvas.pixel(9, 9), Some(Color::BLACK));
    }

    #[test]
    fn test_group_draws_nothing() {
        let node = NodeData::group().size(10.0, 10.0).with_fill(Color::BLACK);
        let mut canvas = Canvas::new(ScreenSize::new(10.0, 10.0, 1.0)).unwrap();
        draw(&node, &mut canvas, &SkiaPaint);
        assert_eq!(canvas.pixel(5, 5), Some(Color::TRANSPARENT));
    }
}
