//! Drawing surface backed by a tiny-skia pixmap.
//!
//! Coordinates handed to a canvas are logical units; the pixel ratio is
//! applied when rasterizing. Draw calls use the current world transform and
//! the current path set by the caller.

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use image::codecs::jpeg::JpegEncoder;
use resvg::tiny_skia::{self, Mask, Pixmap, PixmapPaint, Transform};

use crate::error::{Error, Result};
use crate::export::ExportFormat;
use crate::geometry::{Bounds, Point, ScreenSize};
use crate::paint::Color;
use crate::transform::Matrix;

pub type SharedCanvas = Rc<RefCell<Canvas>>;

/// Default JPEG quality when none is requested.
const DEFAULT_JPEG_QUALITY: u8 = 92;

/// Number of box-blur passes used to approximate a gaussian shadow.
const BLUR_PASSES: usize = 3;

pub use tiny_skia::BlendMode;

pub struct Canvas {
    pixmap: Option<Pixmap>,
    size: ScreenSize,
    world: Matrix,
    path: Option<tiny_skia::Path>,
    clip: Option<Mask>,
    saved: Vec<(Matrix, Option<Mask>)>,
    background_color: Option<Color>,
    allow_background_color: bool,
    pub hittable: bool,
    auto_layout: bool,
}

fn pixel_dims(size: &ScreenSize) -> Result<(u32, u32)> {
    let valid = |v: f32| v.is_finite() && v >= 0.0;
    if !valid(size.width) || !valid(size.height) || !(size.pixel_ratio > 0.0) {
        return Err(Error::InvalidSize {
            width: size.width,
            height: size.height,
            pixel_ratio: size.pixel_ratio,
        });
    }
    let w = (size.width * size.pixel_ratio).round().max(1.0) as u32;
    let h = (size.height * size.pixel_ratio).round().max(1.0) as u32;
    Ok((w, h))
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("size", &self.size)
            .field("destroyed", &self.pixmap.is_none())
            .finish()
    }
}

impl Canvas {
    /// Create a transparent canvas. Pixel dimensions are rounded and never
    /// smaller than 1x1.
    pub fn new(size: ScreenSize) -> Result<Self> {
        let (w, h) = pixel_dims(&size)?;
        let pixmap = Pixmap::new(w, h).ok_or(Error::InvalidSize {
            width: size.width,
            height: size.height,
            pixel_ratio: size.pixel_ratio,
        })?;
        Ok(Self {
            pixmap: Some(pixmap),
            size,
            world: Matrix::IDENTITY,
            path: None,
            clip: None,
            saved: Vec::new(),
            background_color: None,
            allow_background_color: false,
            hittable: true,
            auto_layout: false,
        })
    }

    pub fn shared(self) -> SharedCanvas {
        Rc::new(RefCell::new(self))
    }

    pub fn size(&self) -> ScreenSize {
        self.size
    }

    pub fn width(&self) -> f32 {
        self.size.width
    }

    pub fn height(&self) -> f32 {
        self.size.height
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.size.pixel_ratio
    }

    pub fn pixel_width(&self) -> u32 {
        self.pixmap.as_ref().map_or(0, Pixmap::width)
    }

    pub fn pixel_height(&self) -> u32 {
        self.pixmap.as_ref().map_or(0, Pixmap::height)
    }

    /// Logical bounds, origin at zero.
    pub fn bounds(&self) -> Bounds {
        Bounds::new(0.0, 0.0, self.size.width, self.size.height)
    }

    pub fn is_same_size(&self, size: &ScreenSize) -> bool {
        self.size == *size
    }

    /// Reallocate the pixels. Content is cleared.
    pub fn resize(&mut self, size: ScreenSize) -> Result<()> {
        if self.pixmap.is_none() {
            return Err(Error::Destroyed);
        }
        let (w, h) = pixel_dims(&size)?;
        self.pixmap = Some(Pixmap::new(w, h).ok_or(Error::InvalidSize {
            width: size.width,
            height: size.height,
            pixel_ratio: size.pixel_ratio,
        })?);
        self.size = size;
        self.clip = None;
        self.saved.clear();
        Ok(())
    }

    pub fn start_auto_layout(&mut self) {
        self.auto_layout = true;
    }

    pub fn stop_auto_layout(&mut self) {
        self.auto_layout = false;
    }

    pub fn is_auto_layout(&self) -> bool {
        self.auto_layout
    }

    pub fn allow_background_color(&self) -> bool {
        self.allow_background_color
    }

    pub fn set_allow_background_color(&mut self, allow: bool) {
        self.allow_background_color = allow;
    }

    /// Native background passed through to the host view. Not part of the
    /// pixel data.
    pub fn background_color(&self) -> Option<Color> {
        self.background_color
    }

    pub fn set_background_color(&mut self, color: Option<Color>) {
        self.background_color = color;
    }

    pub fn world(&self) -> Matrix {
        self.world
    }

    pub fn set_world(&mut self, world: Matrix) {
        self.world = world;
    }

    pub fn set_path(&mut self, path: Option<tiny_skia::Path>) {
        self.path = path;
    }

    pub fn has_path(&self) -> bool {
        self.path.is_some()
    }

    pub fn save(&mut self) {
        self.saved.push((self.world, self.clip.clone()));
    }

    pub fn restore(&mut self) {
        if let Some((world, clip)) = self.saved.pop() {
            self.world = world;
            self.clip = clip;
        }
    }

    fn skia_transform(&self) -> Transform {
        Matrix::scale(self.size.pixel_ratio)
            .then(&self.world)
            .to_skia()
    }

    fn pixel_transform(&self) -> Transform {
        Transform::from_scale(self.size.pixel_ratio, self.size.pixel_ratio)
    }

    /// Intersect the clip with `bounds`, given in canvas (untransformed) units.
    pub fn clip_bounds(&mut self, bounds: &Bounds) {
        let Some(rect) = tiny_skia::Rect::from_xywh(bounds.x, bounds.y, bounds.width, bounds.height)
        else {
            self.clip_nothing();
            return;
        };
        let path = tiny_skia::PathBuilder::from_rect(rect);
        self.clip_path(&path, self.pixel_transform(), false);
    }

    /// Intersect the clip with the current path under the world transform.
    pub fn clip_current(&mut self) {
        if let Some(path) = self.path.take() {
            self.clip_path(&path, self.skia_transform(), true);
            self.path = Some(path);
        }
    }

    fn clip_nothing(&mut self) {
        if let Some(pixmap) = &self.pixmap {
            self.clip = Mask::new(pixmap.width(), pixmap.height());
        }
    }

    fn clip_path(&mut self, path: &tiny_skia::Path, transform: Transform, anti_alias: bool) {
        let Some(pixmap) = &self.pixmap else {
            return;
        };
        let Some(mut mask) = Mask::new(pixmap.width(), pixmap.height()) else {
            return;
        };
        mask.fill_path(path, tiny_skia::FillRule::Winding, anti_alias, transform);
        if let Some(current) = &self.clip {
            for (m, c) in mask.data_mut().iter_mut().zip(current.data()) {
                *m = ((*m as u16 * *c as u16 + 127) / 255) as u8;
            }
        }
        self.clip = Some(mask);
    }

    /// Make every pixel transparent.
    pub fn clear(&mut self) {
        if let Some(pixmap) = &mut self.pixmap {
            pixmap.fill(tiny_skia::Color::TRANSPARENT);
        }
    }

    /// Make `bounds` transparent, respecting the clip.
    pub fn clear_world(&mut self, bounds: &Bounds) {
        self.fill_world(bounds, Color::TRANSPARENT, BlendMode::Clear);
    }

    /// Fill `bounds` (canvas units, world transform ignored) with `color`.
    pub fn fill_world(&mut self, bounds: &Bounds, color: Color, blend_mode: BlendMode) {
        let transform = self.pixel_transform();
        let (Some(pixmap), Some(rect)) = (
            self.pixmap.as_mut(),
            tiny_skia::Rect::from_xywh(bounds.x, bounds.y, bounds.width, bounds.height),
        ) else {
            return;
        };
        let mut paint = tiny_skia::Paint::default();
        paint.set_color(color.to_skia());
        paint.blend_mode = blend_mode;
        pixmap.fill_rect(rect, &paint, transform, self.clip.as_ref());
    }

    /// Fill `bounds` under the world transform.
    pub fn fill_bounds(&mut self, bounds: &Bounds, color: Color) {
        let transform = self.skia_transform();
        let (Some(pixmap), Some(rect)) = (
            self.pixmap.as_mut(),
            tiny_skia::Rect::from_xywh(bounds.x, bounds.y, bounds.width, bounds.height),
        ) else {
            return;
        };
        let mut paint = tiny_skia::Paint::default();
        paint.set_color(color.to_skia());
        pixmap.fill_rect(rect, &paint, transform, self.clip.as_ref());
    }

    pub fn fill_current(&mut self, paint: &tiny_skia::Paint) {
        let transform = self.skia_transform();
        if let (Some(pixmap), Some(path)) = (self.pixmap.as_mut(), &self.path) {
            pixmap.fill_path(
                path,
                paint,
                tiny_skia::FillRule::Winding,
                transform,
                self.clip.as_ref(),
            );
        }
    }

    pub fn stroke_current(&mut self, paint: &tiny_skia::Paint, stroke: &tiny_skia::Stroke) {
        if stroke.width <= 0.0 {
            return;
        }
        let transform = self.skia_transform();
        if let (Some(pixmap), Some(path)) = (self.pixmap.as_mut(), &self.path) {
            pixmap.stroke_path(path, paint, stroke, transform, self.clip.as_ref());
        }
    }

    /// Draw a blurred, offset silhouette of the current path.
    ///
    /// `offset` is in world units; `blur` is scaled by the world transform.
    pub fn shadow_current(&mut self, color: Color, offset: Point, blur: f32) {
        let pr = self.size.pixel_ratio;
        let transform = self.skia_transform().post_translate(offset.x * pr, offset.y * pr);
        let radius = (blur * pr * self.world.scale_x() / 2.0).round() as usize;
        let (Some(pixmap), Some(path)) = (self.pixmap.as_mut(), &self.path) else {
            return;
        };
        let Some(mut layer) = Pixmap::new(pixmap.width(), pixmap.height()) else {
            return;
        };
        let mut paint = tiny_skia::Paint {
            anti_alias: true,
            ..Default::default()
        };
        paint.set_color(color.to_skia());
        layer.fill_path(path, &paint, tiny_skia::FillRule::Winding, transform, None);
        box_blur(&mut layer, radius);
        pixmap.draw_pixmap(
            0,
            0,
            layer.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            self.clip.as_ref(),
        );
    }

    /// Copy the `from` region of `source` into the `to` region of this canvas,
    /// scaling as needed. Both regions are in logical units of their canvas.
    pub fn copy_world(&mut self, source: &Canvas, from: &Bounds, to: Option<&Bounds>) {
        let to = to.copied().unwrap_or(*from);
        if from.is_empty() || to.is_empty() {
            return;
        }
        let transform = self.pixel_transform();
        let (Some(pixmap), Some(src), Some(rect)) = (
            self.pixmap.as_mut(),
            source.pixmap.as_ref(),
            tiny_skia::Rect::from_xywh(to.x, to.y, to.width, to.height),
        ) else {
            return;
        };

        let sx = to.width / from.width;
        let sy = to.height / from.height;
        let src_ratio = 1.0 / source.size.pixel_ratio;
        // Maps source pixels into this canvas's logical space.
        let pattern = Matrix::translate(to.x, to.y)
            .then(&Matrix::scale_xy(sx, sy))
            .then(&Matrix::translate(-from.x, -from.y))
            .then(&Matrix::scale(src_ratio));
        let exact = sx == 1.0 && sy == 1.0 && source.size.pixel_ratio == self.size.pixel_ratio;
        let quality = if exact {
            tiny_skia::FilterQuality::Nearest
        } else {
            tiny_skia::FilterQuality::Bilinear
        };

        let paint = tiny_skia::Paint {
            shader: tiny_skia::Pattern::new(
                src.as_ref(),
                tiny_skia::SpreadMode::Pad,
                quality,
                1.0,
                pattern.to_skia(),
            ),
            ..Default::default()
        };
        pixmap.fill_rect(rect, &paint, transform, self.clip.as_ref());
    }

    /// Smallest logical bounds containing every non-transparent pixel.
    pub fn trim_bounds(&self) -> Option<Bounds> {
        let pixmap = self.pixmap.as_ref()?;
        let width = pixmap.width() as usize;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (usize::MAX, usize::MAX, 0, 0);
        for (i, px) in pixmap.pixels().iter().enumerate() {
            if px.alpha() == 0 {
                continue;
            }
            let (x, y) = (i % width, i / width);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        if min_x == usize::MAX {
            return None;
        }
        let pixels = Bounds::new(
            min_x as f32,
            min_y as f32,
            (max_x - min_x + 1) as f32,
            (max_y - min_y + 1) as f32,
        );
        Some(pixels.scale(1.0 / self.size.pixel_ratio))
    }

    /// Color at a pixel, demultiplied.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        let pixmap = self.pixmap.as_ref()?;
        let c = pixmap.pixel(x, y)?.demultiply();
        Some(Color::from_rgba8(c.red(), c.green(), c.blue(), c.alpha()))
    }

    /// Straight-alpha copy of the pixels.
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        let pixmap = self.pixmap.as_ref()?;
        let data = pixmap
            .pixels()
            .iter()
            .flat_map(|px| {
                let c = px.demultiply();
                [c.red(), c.green(), c.blue(), c.alpha()]
            })
            .collect();
        image::RgbaImage::from_raw(pixmap.width(), pixmap.height(), data)
    }

    /// Encode the pixels. `quality` (0..1) only applies to JPEG.
    pub fn export(&self, format: ExportFormat, quality: Option<f32>) -> Result<Vec<u8>> {
        let rgba = self.to_rgba_image().ok_or(Error::Destroyed)?;
        let mut bytes = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);
        match format {
            ExportFormat::Png => rgba.write_to(&mut cursor, image::ImageFormat::Png)?,
            ExportFormat::Webp => rgba.write_to(&mut cursor, image::ImageFormat::WebP)?,
            ExportFormat::Gif => rgba.write_to(&mut cursor, image::ImageFormat::Gif)?,
            ExportFormat::Jpeg => {
                let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();
                let quality = quality
                    .map(|q| (q.clamp(0.0, 1.0) * 100.0).round() as u8)
                    .unwrap_or(DEFAULT_JPEG_QUALITY)
                    .max(1);
                JpegEncoder::new_with_quality(&mut cursor, quality).encode_image(&rgb)?;
            }
        }
        Ok(bytes)
    }

    pub fn pixmap(&self) -> Option<&Pixmap> {
        self.pixmap.as_ref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.pixmap.is_none()
    }

    /// Release the pixels. Calling it again is a no-op.
    pub fn destroy(&mut self) {
        if self.pixmap.take().is_some() {
            log::debug!(
                target: "leafer::render",
                "Canvas {}x{} destroyed",
                self.size.width,
                self.size.height
            );
        }
        self.path = None;
        self.clip = None;
        self.saved.clear();
    }
}

/// Separable box blur over premultiplied RGBA. Pixels outside count as
/// transparent.
fn box_blur(pixmap: &mut Pixmap, radius: usize) {
    if radius == 0 {
        return;
    }
    let (w, h) = (pixmap.width() as usize, pixmap.height() as usize);
    let data = pixmap.data_mut();
    let mut scratch = vec![0u8; data.len()];
    for _ in 0..BLUR_PASSES {
        blur_pass(data, &mut scratch, w, h, radius, true);
        blur_pass(&scratch, data, w, h, radius, false);
    }
}

fn blur_pass(src: &[u8], dst: &mut [u8], w: usize, h: usize, r: usize, horizontal: bool) {
    let (lines, len) = if horizontal { (h, w) } else { (w, h) };
    let index = |line: usize, i: usize| {
        if horizontal {
            (line * w + i) * 4
        } else {
            (i * w + line) * 4
        }
    };
    let window = (2 * r + 1) as u32;
    for line in 0..lines {
        for c in 0..4 {
            let mut sum: u32 = (0..=r.min(len - 1))
                .map(|i| src[index(line, i) + c] as u32)
                .sum();
            for i in 0..len {
                dst[index(line, i) + c] = (sum / window) as u8;
                if i + r + 1 < len {
                    sum += src[index(line, i + r + 1) + c] as u32;
                }
                if i >= r {
                    sum -= src[index(line, i - r) + c] as u32;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(w: f32, h: f32) -> Canvas {
        Canvas::new(ScreenSize::new(w, h, 1.0)).unwrap()
    }

    #[test]
    fn test_size_is_clamped_and_validated() {
        let c = Canvas::new(ScreenSize::new(0.2, 0.0, 1.0)).unwrap();
        assert_eq!((c.pixel_width(), c.pixel_height()), (1, 1));

        let c = Canvas::new(ScreenSize::new(10.0, 5.0, 2.0)).unwrap();
        assert_eq!((c.pixel_width(), c.pixel_height()), (20, 10));

        assert!(matches!(
            Canvas::new(ScreenSize::new(10.0, 10.0, 0.0)),
            Err(Error::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_trim_bounds() {
        let mut c = canvas(100.0, 100.0);
        assert_eq!(c.trim_bounds(), None);
        c.fill_world(&Bounds::new(30.0, 40.0, 10.0, 10.0), Color::BLACK, BlendMode::SourceOver);
        assert_eq!(c.trim_bounds(), Some(Bounds::new(30.0, 40.0, 10.0, 10.0)));
    }

    #[test]
    fn test_destination_over_keeps_content() {
        let mut c = canvas(2.0, 1.0);
        c.fill_world(&Bounds::new(0.0, 0.0, 1.0, 1.0), Color::BLACK, BlendMode::SourceOver);
        c.fill_world(&c.bounds(), Color::WHITE, BlendMode::DestinationOver);
        assert_eq!(c.pixel(0, 0), Some(Color::BLACK));
        assert_eq!(c.pixel(1, 0), Some(Color::WHITE));
    }

    #[test]
    fn test_copy_world_region() {
        let mut src = canvas(20.0, 20.0);
        src.fill_world(&Bounds::new(5.0, 5.0, 4.0, 4.0), Color::BLACK, BlendMode::SourceOver);

        let mut dst = canvas(4.0, 4.0);
        dst.copy_world(&src, &Bounds::new(5.0, 5.0, 4.0, 4.0), Some(&dst.bounds()));
        assert_eq!(dst.trim_bounds(), Some(dst.bounds()));
        assert_eq!(dst.pixel(3, 3), Some(Color::BLACK));
    }

    #[test]
    fn test_clip_limits_fill() {
        let mut c = canvas(10.0, 10.0);
        c.save();
        c.clip_bounds(&Bounds::new(0.0, 0.0, 5.0, 10.0));
        c.fill_world(&c.bounds(), Color::BLACK, BlendMode::SourceOver);
        c.restore();
        assert_eq!(c.trim_bounds(), Some(Bounds::new(0.0, 0.0, 5.0, 10.0)));
    }

    #[test]
    fn test_export_png_signature() {
        let c = canvas(3.0, 3.0);
        let bytes = c.export(ExportFormat::Png, None).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn test_destroyed_canvas_cannot_export() {
        let mut c = canvas(3.0, 3.0);
        c.destroy();
        c.destroy();
        assert!(c.is_destroyed());
        assert!(matches!(c.export(ExportFormat::Png, None), Err(Error::Destroyed)));
    }

    #[test]
    fn test_blur_spreads_alpha() {
        let mut c = canvas(20.0, 20.0);
        c.set_path(tiny_skia::PathBuilder::from_rect(
            tiny_skia::Rect::from_xywh(8.0, 8.0, 4.0, 4.0).unwrap(),
        )
        .into());
        c.shadow_current(Color::BLACK, Point::new(0.0, 0.0), 4.0);
        let trimmed = c.trim_bounds().unwrap();
        assert!(trimmed.width > 4.0);
    }
}
