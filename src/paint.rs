//! Paint descriptors and the service that applies them to a canvas.

use resvg::tiny_skia;

use crate::canvas::Canvas;
use crate::geometry::{Bounds, Point};
use crate::image_manager::LeaferImage;
use crate::node::NodeData;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xFF) as f32 / 255.0,
            g: ((hex >> 8) & 0xFF) as f32 / 255.0,
            b: (hex & 0xFF) as f32 / 255.0,
            a: 1.0,
        }
    }

    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::rgba(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub fn is_opaque(&self) -> bool {
        self.a >= 1.0
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let c = self.to_skia().to_color_u8();
        [c.red(), c.green(), c.blue(), c.alpha()]
    }

    pub(crate) fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
            self.a.clamp(0.0, 1.0),
        )
        .unwrap_or(tiny_skia::Color::BLACK)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::TRANSPARENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    pub offset: f32,
    pub color: Color,
}

/// Linear gradient. `from` and `to` are fractions of the node's box.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearGradient {
    pub from: Point,
    pub to: Point,
    pub stops: Vec<GradientStop>,
}

impl LinearGradient {
    /// Top-to-bottom gradient between two colors.
    pub fn vertical(top: Color, bottom: Color) -> Self {
        Self {
            from: Point::new(0.5, 0.0),
            to: Point::new(0.5, 1.0),
            stops: vec![
                GradientStop {
                    offset: 0.0,
                    color: top,
                },
                GradientStop {
                    offset: 1.0,
                    color: bottom,
                },
            ],
        }
    }
}

/// Image stretched over the node's box.
#[derive(Debug, Clone)]
pub struct ImagePaint {
    pub image: LeaferImage,
    pub opacity: f32,
}

impl PartialEq for ImagePaint {
    fn eq(&self, other: &Self) -> bool {
        self.image.ptr_eq(&other.image) && self.opacity == other.opacity
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    Solid(Color),
    Linear(LinearGradient),
    Image(ImagePaint),
}

impl Paint {
    pub fn image(image: LeaferImage) -> Self {
        Paint::Image(ImagePaint {
            image,
            opacity: 1.0,
        })
    }

    /// The image this paint depends on, if any.
    pub fn pending_image(&self) -> Option<&LeaferImage> {
        match self {
            Paint::Image(paint) if !paint.image.is_complete() => Some(&paint.image),
            _ => None,
        }
    }
}

impl From<Color> for Paint {
    fn from(color: Color) -> Self {
        Paint::Solid(color)
    }
}

impl From<LinearGradient> for Paint {
    fn from(gradient: LinearGradient) -> Self {
        Paint::Linear(gradient)
    }
}

/// Drop shadow drawn beneath a node's fills.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shadow {
    pub x: f32,
    pub y: f32,
    pub blur: f32,
    pub color: Color,
    pub visible: bool,
}

impl Shadow {
    pub fn new(x: f32, y: f32, blur: f32, color: Color) -> Self {
        Self {
            x,
            y,
            blur,
            color,
            visible: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.visible && self.color.a > 0.0
    }

    /// Area covered by the shadow of `shape`.
    pub fn bounds(&self, shape: &Bounds) -> Bounds {
        shape.offset(self.x, self.y).spread(self.blur)
    }
}

/// Executes fill and stroke operations on the canvas's current path.
///
/// The caller sets the path and world transform first. The multi-paint
/// methods default to applying each paint in order.
pub trait PaintService {
    fn fill(&self, node: &NodeData, canvas: &mut Canvas, paint: &Paint);

    fn fills(&self, node: &NodeData, canvas: &mut Canvas, paints: &[Paint]) {
        for paint in paints {
            self.fill(node, canvas, paint);
        }
    }

    fn stroke(&self, node: &NodeData, canvas: &mut Canvas, paint: &Paint);

    fn strokes(&self, node: &NodeData, canvas: &mut Canvas, paints: &[Paint]) {
        for paint in paints {
            self.stroke(node, canvas, paint);
        }
    }

    fn shadow(&self, node: &NodeData, canvas: &mut Canvas);
}

/// CPU paint service backed by tiny-skia.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkiaPaint;

impl PaintService for SkiaPaint {
    fn fill(&self, node: &NodeData, canvas: &mut Canvas, paint: &Paint) {
        with_skia_paint(paint, &node.box_bounds(), |p| canvas.fill_current(p));
    }

    fn stroke(&self, node: &NodeData, canvas: &mut Canvas, paint: &Paint) {
        let stroke = tiny_skia::Stroke {
            width: node.stroke_width(),
            ..Default::default()
        };
        with_skia_paint(paint, &node.box_bounds(), |p| {
            canvas.stroke_current(p, &stroke)
        });
    }

    fn shadow(&self, node: &NodeData, canvas: &mut Canvas) {
        if let Some(shadow) = node.shadow().filter(|s| s.is_active()) {
            canvas.shadow_current(shadow.color, Point::new(shadow.x, shadow.y), shadow.blur);
        }
    }
}

/// Build a tiny-skia paint for `paint` over `bounds` and hand it to `draw`.
///
/// Images that have not finished loading draw nothing.
fn with_skia_paint(paint: &Paint, bounds: &Bounds, draw: impl FnOnce(&tiny_skia::Paint)) {
    match paint {
        Paint::Solid(color) => {
            let mut skia = base_paint();
            skia.set_color(color.to_skia());
            draw(&skia);
        }
        Paint::Linear(gradient) => {
            let at = |p: Point| {
                tiny_skia::Point::from_xy(
                    bounds.x + p.x * bounds.width,
                    bounds.y + p.y * bounds.height,
                )
            };
            let stops = gradient
                .stops
                .iter()
                .map(|s| tiny_skia::GradientStop::new(s.offset, s.color.to_skia()))
                .collect();
            let Some(shader) = tiny_skia::LinearGradient::new(
                at(gradient.from),
                at(gradient.to),
                stops,
                tiny_skia::SpreadMode::Pad,
                tiny_skia::Transform::identity(),
            ) else {
                return;
            };
            let mut skia = base_paint();
            skia.shader = shader;
            draw(&skia);
        }
        Paint::Image(image) => {
            let Some(pixmap) = image.image.pixmap() else {
                return;
            };
            let sx = bounds.width / pixmap.width() as f32;
            let sy = bounds.height / pixmap.height() as f32;
            let mut skia = base_paint();
            skia.shader = tiny_skia::Pattern::new(
                tiny_skia::Pixmap::as_ref(&pixmap),
                tiny_skia::SpreadMode::Pad,
                tiny_skia::FilterQuality::Bilinear,
                image.opacity,
                tiny_skia::Transform::from_row(sx, 0.0, 0.0, sy, bounds.x, bounds.y),
            );
            draw(&skia);
        }
    }
}

fn base_paint<'a>() -> tiny_skia::Paint<'a> {
    tiny_skia::Paint {
        anti_alias: true,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_from_hex() {
        let color = Color::from_hex(0xFF0000);
        assert_eq!(color, Color::rgb(1.0, 0.0, 0.0));
        assert_eq!(Color::from_hex(0x0000FF).to_rgba8(), [0, 0, 255, 255]);
    }

    #[test]
    fn test_color_default() {
        assert_eq!(Color::default(), Color::TRANSPARENT);
        assert!(!Color::TRANSPARENT.is_opaque());
        assert!(Color::WHITE.is_opaque());
    }

    #[test]
    fn test_image_fill_stretches_over_box() {
        use crate::geometry::ScreenSize;
        use crate::image_manager::{ImageManager, ImageSource};

        let svg: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg" width="8" height="8">
            <rect width="8" height="8" fill="blue"/></svg>"#;
        let image = ImageManager::get(ImageSource::SvgBytes(std::sync::Arc::from(svg)));
        crate::scheduler::run_until_idle();
        assert!(image.is_ready());

        let node = NodeData::rect().size(16.0, 16.0);
        let mut canvas = Canvas::new(ScreenSize::new(20.0, 20.0, 1.0)).unwrap();
        canvas.set_path(node.shape_path());
        SkiaPaint.fill(&node, &mut canvas, &Paint::image(image));

        assert_eq!(canvas.pixel(1, 1), Some(Color::from_hex(0x0000FF)));
        assert_eq!(canvas.pixel(14, 14), Some(Color::from_hex(0x0000FF)));
        assert_eq!(canvas.pixel(18, 18), Some(Color::TRANSPARENT));
    }

    #[test]
    fn test_shadow_activity_and_bounds() {
        let shadow = Shadow::new(4.0, 6.0, 2.0, Color::BLACK);
        assert!(shadow.is_active());
        assert!(!Shadow::new(0.0, 0.0, 0.0, Color::TRANSPARENT).is_active());
        assert_eq!(
            shadow.bounds(&Bounds::new(0.0, 0.0, 10.0, 10.0)),
            Bounds::new(2.0, 4.0, 14.0, 14.0)
        );
    }
}
