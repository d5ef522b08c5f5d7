//! Offscreen export of a node.
//!
//! [`export`] renders a node onto a fresh surface in a chosen reference
//! frame, optionally trims and flattens it onto a background, and encodes
//! the pixels. Exports run one at a time through a thread-local
//! [`TaskProcessor`]: an export may temporarily change node attributes
//! while it renders, and a second export must never observe that.
//!
//! The returned future settles as the scheduler runs, so drive it with
//! [`scheduler::run_until_idle`] before awaiting it, or use
//! [`export_blocking`].
//!
//! ```ignore
//! let result = export_blocking(&rect, "rect.png".parse()?, ExportOptions::new().scale(2.0))?;
//! ```

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::canvas::{BlendMode, Canvas};
use crate::canvas_manager::CanvasManager;
use crate::error::{Error, Result};
use crate::geometry::{Bounds, ScreenSize};
use crate::leafer::Leafer;
use crate::node::{BoundsKind, NodeKind, NodeRef, Relative};
use crate::paint::Color;
use crate::renderer::RenderOptions;
use crate::scheduler;
use crate::task::{TaskDone, TaskProcessor};
use crate::transform::Matrix;

thread_local! {
    static EXPORTS: TaskProcessor = TaskProcessor::new();
}

/// Whether an export is in flight on this thread.
pub fn is_running() -> bool {
    EXPORTS.with(TaskProcessor::is_running)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl ExportFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    /// Formats without an alpha channel.
    pub fn is_opaque(self) -> bool {
        matches!(self, Self::Jpeg)
    }
}

/// What an export produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportTarget {
    /// The rendered surface itself.
    Canvas,
    /// Encoded bytes.
    Format(ExportFormat),
    /// Encoded bytes written to a file.
    File(PathBuf, ExportFormat),
}

impl ExportTarget {
    pub fn format(&self) -> Option<ExportFormat> {
        match self {
            Self::Canvas => None,
            Self::Format(format) | Self::File(_, format) => Some(*format),
        }
    }
}

impl FromStr for ExportTarget {
    type Err = Error;

    /// `"canvas"`, a bare format such as `"png"`, or a file name.
    fn from_str(s: &str) -> Result<Self> {
        if s == "canvas" {
            return Ok(Self::Canvas);
        }
        if let Some(format) = ExportFormat::from_extension(s) {
            return Ok(Self::Format(format));
        }
        let path = Path::new(s);
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(ExportFormat::from_extension)
            .map(|format| Self::File(path.to_path_buf(), format))
            .ok_or_else(|| Error::UnsupportedFormat(s.to_string()))
    }
}

/// Capture a region of world space instead of the node in its own frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Screenshot {
    #[default]
    Off,
    /// The whole surface for a scene root, the painted area otherwise.
    Full,
    Region(Bounds),
}

type CanvasHook = Box<dyn FnOnce(&mut Canvas)>;

pub struct ExportOptions {
    pub scale: f32,
    pub pixel_ratio: f32,
    /// Defaults to `Inner` for a scene root and `Local` otherwise.
    pub relative: Option<Relative>,
    /// Render the whole scene clipped to the node's area, so overlapping
    /// siblings are captured too.
    pub slice: bool,
    pub trim: bool,
    pub screenshot: Screenshot,
    /// Background flattened under the content.
    pub fill: Option<Color>,
    /// JPEG quality in 0..1.
    pub quality: Option<f32>,
    on_canvas: Option<CanvasHook>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            pixel_ratio: 1.0,
            relative: None,
            slice: false,
            trim: false,
            screenshot: Screenshot::Off,
            fill: None,
            quality: None,
            on_canvas: None,
        }
    }
}

impl fmt::Debug for ExportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportOptions")
            .field("scale", &self.scale)
            .field("pixel_ratio", &self.pixel_ratio)
            .field("relative", &self.relative)
            .field("slice", &self.slice)
            .field("trim", &self.trim)
            .field("screenshot", &self.screenshot)
            .field("fill", &self.fill)
            .field("quality", &self.quality)
            .field("on_canvas", &self.on_canvas.is_some())
            .finish()
    }
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn pixel_ratio(mut self, pixel_ratio: f32) -> Self {
        self.pixel_ratio = pixel_ratio;
        self
    }

    pub fn relative(mut self, relative: impl Into<Relative>) -> Self {
        self.relative = Some(relative.into());
        self
    }

    pub fn slice(mut self, slice: bool) -> Self {
        self.slice = slice;
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub fn screenshot(mut self, screenshot: Screenshot) -> Self {
        self.screenshot = screenshot;
        self
    }

    pub fn fill(mut self, fill: Color) -> Self {
        self.fill = Some(fill);
        self
    }

    pub fn quality(mut self, quality: f32) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Inspect or draw on the finished surface before it is encoded.
    pub fn on_canvas(mut self, f: impl FnOnce(&mut Canvas) + 'static) -> Self {
        self.on_canvas = Some(Box::new(f));
        self
    }
}

#[derive(Debug)]
pub enum ExportData {
    /// The node has no controller; nothing was rendered.
    None,
    Canvas(Canvas),
    Bytes(Vec<u8>),
    /// Path of the written file.
    File(PathBuf),
}

#[derive(Debug)]
pub struct ExportResult {
    pub data: ExportData,
    /// Output size in pixels.
    pub width: u32,
    pub height: u32,
    /// Area rendered, in the export's reference frame.
    pub render_bounds: Option<Bounds>,
    /// Content area kept by trimming, in output units.
    pub trim_bounds: Option<Bounds>,
}

impl ExportResult {
    fn none() -> Self {
        Self {
            data: ExportData::None,
            width: 0,
            height: 0,
            render_bounds: None,
            trim_bounds: None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self.data, ExportData::None)
    }
}

type Reply = flume::Sender<Result<ExportResult>>;

/// Export `node`. The future resolves once the owning controller's view is
/// complete and the output is encoded.
///
/// A node without a controller resolves right away to a result whose data
/// is [`ExportData::None`].
pub fn export(
    node: &NodeRef,
    target: ExportTarget,
    options: ExportOptions,
) -> impl Future<Output = Result<ExportResult>> + 'static {
    let (tx, rx) = flume::bounded(1);
    submit(node, target, options, tx);
    async move {
        rx.recv_async()
            .await
            .unwrap_or_else(|_| Err(Error::Destroyed))
    }
}

/// Export `node` and drive the scheduler until the result is available.
pub fn export_blocking(
    node: &NodeRef,
    target: ExportTarget,
    options: ExportOptions,
) -> Result<ExportResult> {
    let (tx, rx) = flume::bounded(1);
    submit(node, target, options, tx);
    scheduler::run_until_idle();
    match rx.try_recv() {
        Ok(result) => result,
        Err(flume::TryRecvError::Empty) => Err(Error::Stalled),
        Err(flume::TryRecvError::Disconnected) => Err(Error::Destroyed),
    }
}

fn submit(node: &NodeRef, target: ExportTarget, options: ExportOptions, reply: Reply) {
    let Some(leafer) = node.leafer() else {
        log::debug!(target: "leafer::export", "{:?} has no controller, nothing to export", node);
        let _ = reply.send(Ok(ExportResult::none()));
        return;
    };
    let node = node.clone();
    EXPORTS.with(|exports| {
        exports.add(move |done| {
            // The owner may have been torn down while this unit was queued.
            if leafer.is_destroyed() {
                log::debug!(target: "leafer::export", "{:?} lost its controller, nothing to export", node);
                let _ = reply.send(Ok(ExportResult::none()));
                return;
            }
            let owner = leafer.clone();
            leafer.wait_view_completed(move || run(owner, node, target, options, reply, done));
        });
    });
}

/// Surface rendered for one export, before encoding.
struct Rendered {
    canvas: Canvas,
    render_bounds: Bounds,
    trim_bounds: Option<Bounds>,
}

fn run(
    leafer: Leafer,
    node: NodeRef,
    target: ExportTarget,
    mut options: ExportOptions,
    reply: Reply,
    done: TaskDone,
) {
    let rendered = render(&leafer, &node, &target, &mut options);
    let (canvas, render_bounds, trim_bounds) = match rendered {
        Ok(r) => (r.canvas, r.render_bounds, r.trim_bounds),
        Err(e) => {
            log::warn!(target: "leafer::export", "Export of {:?} failed: {}", node, e);
            let _ = reply.send(Err(e));
            return;
        }
    };
    let width = canvas.pixel_width();
    let height = canvas.pixel_height();

    let format = match target {
        ExportTarget::Canvas => {
            let _ = reply.send(Ok(ExportResult {
                data: ExportData::Canvas(canvas),
                width,
                height,
                render_bounds: Some(render_bounds),
                trim_bounds,
            }));
            return;
        }
        ExportTarget::Format(format) | ExportTarget::File(_, format) => format,
    };

    let pool = leafer.canvas_manager();
    let quality = options.quality;
    // Encoding is the slow part; let other work in this round finish first.
    scheduler::defer(move || {
        let _done = done;
        let data = canvas.export(format, quality).and_then(|bytes| match target {
            ExportTarget::File(path, _) => {
                std::fs::write(&path, bytes)?;
                Ok(ExportData::File(path))
            }
            _ => Ok(ExportData::Bytes(bytes)),
        });
        if let Some(pool) = pool {
            pool.recycle(canvas);
        }
        let result = data.map(|data| ExportResult {
            data,
            width,
            height,
            render_bounds: Some(render_bounds),
            trim_bounds,
        });
        match &result {
            Ok(_) => log::debug!(target: "leafer::export", "Exported {}x{} {:?}", width, height, format),
            Err(e) => log::warn!(target: "leafer::export", "Encoding {:?} failed: {}", format, e),
        }
        let _ = reply.send(result);
    });
}

fn render(
    leafer: &Leafer,
    node: &NodeRef,
    target: &ExportTarget,
    options: &mut ExportOptions,
) -> Result<Rendered> {
    leafer.update_layout();
    let layout = node.layout().ok_or(Error::StaleNode)?;
    let pool = leafer.canvas_manager().ok_or(Error::Destroyed)?;
    let is_root = node.is_root();

    let screenshot = match options.screenshot {
        Screenshot::Off if leafer.is_app() && is_root => Screenshot::Full,
        other => other,
    };

    let (bounds, matrix, fill) = match screenshot {
        Screenshot::Off => {
            let relative = options.relative.clone().unwrap_or(if is_root {
                Relative::Inner
            } else {
                Relative::Local
            });
            let matrix = frame_matrix(node, &relative, &layout.world, &layout.local)?;
            let bounds = node.get_bounds(BoundsKind::Render, &relative)?;
            (bounds, matrix, options.fill)
        }
        Screenshot::Full | Screenshot::Region(_) => {
            let bounds = match screenshot {
                Screenshot::Region(region) => region,
                _ if is_root => leafer
                    .canvas()
                    .map(|c| c.borrow().bounds())
                    .ok_or(Error::Destroyed)?,
                _ => layout.world_render_bounds,
            };
            let fill = if is_root {
                options.fill.or_else(|| leafer.fill())
            } else {
                options.fill
            };
            (bounds, Matrix::IDENTITY, fill)
        }
    };

    let scale = options.scale;
    let scaled = bounds.scale(scale);
    let size = ScreenSize::new(
        scaled.width.round().max(1.0),
        scaled.height.round().max(1.0),
        options.pixel_ratio,
    );
    let mut canvas = pool.get(size)?;
    let draw = Matrix::translate(-scaled.x, -scaled.y)
        .then(&Matrix::scale(scale))
        .then(&matrix);

    if options.slice {
        let render_options = RenderOptions::with_matrix(draw).with_bounds(canvas.bounds());
        leafer.render_into(leafer.root().id(), &mut canvas, &render_options);
    } else {
        let render_options = RenderOptions::with_matrix(draw);
        // A frame's own background would end up under the requested fill twice.
        let override_fill = fill.is_some()
            && node.kind() == Some(NodeKind::Frame)
            && node.with(|d| !d.fills().is_empty()) == Some(true);
        if override_fill {
            let saved = node.update_silent(|d| {
                let saved = d.fills().to_vec();
                d.set_fills(Vec::new());
                saved
            });
            leafer.render_into(node.id(), &mut canvas, &render_options);
            if let Some(saved) = saved {
                node.update_silent(|d| d.set_fills(saved));
            }
        } else {
            leafer.render_into(node.id(), &mut canvas, &render_options);
        }
    }

    let mut trim_bounds = None;
    if options.trim {
        canvas = trim(canvas, &pool, &mut trim_bounds)?;
    }

    let opaque = target.format().is_some_and(ExportFormat::is_opaque);
    if opaque || fill.is_some() {
        let area = canvas.bounds();
        canvas.fill_world(&area, fill.unwrap_or(Color::WHITE), BlendMode::DestinationOver);
    }

    if let Some(hook) = options.on_canvas.take() {
        hook(&mut canvas);
    }

    log::debug!(
        target: "leafer::export",
        "Rendered {:?} at {:?} into {}x{}",
        node,
        bounds,
        canvas.pixel_width(),
        canvas.pixel_height()
    );
    Ok(Rendered {
        canvas,
        render_bounds: bounds,
        trim_bounds,
    })
}

/// Matrix taking world space into the export's reference frame.
fn frame_matrix(node: &NodeRef, relative: &Relative, world: &Matrix, local: &Matrix) -> Result<Matrix> {
    match relative {
        Relative::Inner => Ok(world.inverse()),
        Relative::Local => Ok(world.divide(local).inverse()),
        Relative::World => Ok(Matrix::IDENTITY),
        Relative::Page => {
            let root = node.root().and_then(|r| r.world_transform()).ok_or(Error::StaleNode)?;
            Ok(root.inverse())
        }
        Relative::Node(frame) => {
            let frame = frame.world_transform().ok_or(Error::InvalidRelative)?;
            Ok(frame.inverse())
        }
    }
}

/// Crop to the non-transparent content. An empty surface is kept as is.
fn trim(canvas: Canvas, pool: &CanvasManager, trim_bounds: &mut Option<Bounds>) -> Result<Canvas> {
    let Some(content) = canvas.trim_bounds() else {
        return Ok(canvas);
    };
    let size = ScreenSize::new(content.width, content.height, canvas.pixel_ratio());
    let mut trimmed = pool.get(size)?;
    let to = Bounds::new(0.0, 0.0, content.width, content.height);
    trimmed.copy_world(&canvas, &content, Some(&to));
    pool.recycle(canvas);
    *trim_bounds = Some(content);
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LeaferConfig;
    use crate::node::NodeData;

    #[test]
    fn test_target_parse() {
        assert_eq!("canvas".parse::<ExportTarget>().unwrap(), ExportTarget::Canvas);
        assert_eq!(
            "JPG".parse::<ExportTarget>().unwrap(),
            ExportTarget::Format(ExportFormat::Jpeg)
        );
        assert_eq!(
            "out/shot.webp".parse::<ExportTarget>().unwrap(),
            ExportTarget::File(PathBuf::from("out/shot.webp"), ExportFormat::Webp)
        );
        assert!(matches!(
            "notes.txt".parse::<ExportTarget>(),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_detached_node_exports_nothing() {
        let node = NodeRef::detached(NodeData::rect().size(10.0, 10.0));
        let result = export_blocking(&node, ExportTarget::Canvas, ExportOptions::new()).unwrap();
        assert!(result.is_none());
        assert!(!is_running());
    }

    #[test]
    fn test_inner_frame_ignores_position() {
        let leafer = Leafer::new(LeaferConfig::new().size(100.0, 100.0)).unwrap();
        let rect = leafer
            .add(NodeData::rect().at(30.0, 40.0).size(20.0, 10.0).with_fill(Color::BLACK))
            .unwrap();
        let result = export_blocking(
            &rect,
            ExportTarget::Canvas,
            ExportOptions::new().relative(Relative::Inner),
        )
        .unwrap();

        assert_eq!((result.width, result.height), (20, 10));
        assert_eq!(result.render_bounds, Some(Bounds::new(0.0, 0.0, 20.0, 10.0)));
        let ExportData::Canvas(canvas) = result.data else {
            panic!("expected a canvas");
        };
        assert_eq!(canvas.pixel(0, 0), Some(Color::BLACK));
        assert_eq!(canvas.pixel(19, 9), Some(Color::BLACK));
    }

    #[test]
    fn test_opaque_format_gets_white_background() {
        let leafer = Leafer::new(LeaferConfig::new().size(50.0, 50.0)).unwrap();
        let rect = leafer
            .add(NodeData::rect().size(10.0, 10.0).with_stroke(Color::BLACK, 4.0))
            .unwrap();
        let seen = std::rc::Rc::new(std::cell::Cell::new(None));
        let probe = seen.clone();
        let result = export_blocking(
            &rect,
            ExportTarget::Format(ExportFormat::Jpeg),
            ExportOptions::new().on_canvas(move |canvas| probe.set(canvas.pixel(7, 7))),
        )
        .unwrap();

        assert_eq!(seen.get(), Some(Color::WHITE));
        let ExportData::Bytes(bytes) = result.data else {
            panic!("expected bytes");
        };
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!((result.width, result.height), (14, 14));
    }
}
