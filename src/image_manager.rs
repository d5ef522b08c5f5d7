//! Process-wide image cache.
//!
//! Images are loaded once per source and shared by every paint that
//! references them. Decoding happens on a later scheduler round, so a freshly
//! requested image is pending until then. Entries nothing else references are
//! dropped by [`ImageManager::clear_recycled`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use resvg::tiny_skia;

use crate::error::{Error, Result};
use crate::scheduler;

/// Source of image data.
///
/// Supports both raster formats (PNG, JPEG, GIF, WebP) and SVG.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageSource {
    /// Raster image from a file path
    Path(PathBuf),
    /// Raster image from in-memory bytes
    Bytes(Arc<[u8]>),
    /// SVG from a file path
    SvgPath(PathBuf),
    /// SVG from in-memory bytes
    SvgBytes(Arc<[u8]>),
}

impl ImageSource {
    pub fn is_svg(&self) -> bool {
        matches!(self, ImageSource::SvgPath(_) | ImageSource::SvgBytes(_))
    }
}

impl From<&str> for ImageSource {
    fn from(path: &str) -> Self {
        ImageSource::from(PathBuf::from(path))
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("svg"))
        {
            ImageSource::SvgPath(path)
        } else {
            ImageSource::Path(path)
        }
    }
}

enum ImageState {
    Pending,
    Ready(Rc<tiny_skia::Pixmap>),
    Error(String),
}

struct ImageEntry {
    source: ImageSource,
    state: RefCell<ImageState>,
    waiters: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// Shared handle to a cached image.
#[derive(Clone)]
pub struct LeaferImage {
    entry: Rc<ImageEntry>,
}

impl fmt::Debug for LeaferImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.entry.state.borrow() {
            ImageState::Pending => "pending",
            ImageState::Ready(_) => "ready",
            ImageState::Error(_) => "error",
        };
        f.debug_struct("LeaferImage")
            .field("source", &self.entry.source)
            .field("state", &state)
            .finish()
    }
}

impl LeaferImage {
    pub fn source(&self) -> &ImageSource {
        &self.entry.source
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.entry.state.borrow(), ImageState::Ready(_))
    }

    /// Loading finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        !matches!(*self.entry.state.borrow(), ImageState::Pending)
    }

    pub fn error(&self) -> Option<String> {
        match &*self.entry.state.borrow() {
            ImageState::Error(message) => Some(message.clone()),
            _ => None,
        }
    }

    /// Decoded pixels, premultiplied.
    pub fn pixmap(&self) -> Option<Rc<tiny_skia::Pixmap>> {
        match &*self.entry.state.borrow() {
            ImageState::Ready(pixmap) => Some(pixmap.clone()),
            _ => None,
        }
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.pixmap().map(|p| (p.width(), p.height()))
    }

    /// Run `f` once loading completes, or right away if it already has.
    pub fn on_ready(&self, f: impl FnOnce() + 'static) {
        if self.is_complete() {
            f();
        } else {
            self.entry.waiters.borrow_mut().push(Box::new(f));
        }
    }

    pub fn ptr_eq(&self, other: &LeaferImage) -> bool {
        Rc::ptr_eq(&self.entry, &other.entry)
    }

    fn complete(&self, state: ImageState) {
        *self.entry.state.borrow_mut() = state;
        let waiters = std::mem::take(&mut *self.entry.waiters.borrow_mut());
        for waiter in waiters {
            waiter();
        }
    }
}

thread_local! {
    static IMAGES: RefCell<HashMap<ImageSource, LeaferImage>> = RefCell::new(HashMap::new());
}

/// Entry points of the thread-local image cache.
pub struct ImageManager;

impl ImageManager {
    /// Get the cached image for `source`, starting a load on first use.
    pub fn get(source: impl Into<ImageSource>) -> LeaferImage {
        let source = source.into();
        if let Some(image) = IMAGES.with(|images| images.borrow().get(&source).cloned()) {
            return image;
        }

        let image = LeaferImage {
            entry: Rc::new(ImageEntry {
                source: source.clone(),
                state: RefCell::new(ImageState::Pending),
                waiters: RefCell::new(Vec::new()),
            }),
        };
        IMAGES.with(|images| images.borrow_mut().insert(source, image.clone()));

        let weak: Weak<ImageEntry> = Rc::downgrade(&image.entry);
        scheduler::defer(move || {
            let Some(entry) = weak.upgrade() else {
                return;
            };
            let image = LeaferImage { entry };
            let state = match decode(image.source()) {
                Ok(pixmap) => {
                    log::debug!(
                        target: "leafer::image",
                        "Loaded {:?} ({}x{})",
                        image.source(),
                        pixmap.width(),
                        pixmap.height()
                    );
                    ImageState::Ready(Rc::new(pixmap))
                }
                Err(e) => {
                    log::warn!(target: "leafer::image", "Failed to load {:?}: {}", image.source(), e);
                    ImageState::Error(e.to_string())
                }
            };
            image.complete(state);
        });

        image
    }

    /// Whether every cached image has finished loading.
    pub fn is_complete() -> bool {
        IMAGES.with(|images| images.borrow().values().all(LeaferImage::is_complete))
    }

    /// Drop cache entries that nothing outside the cache references.
    /// Returns how many were dropped.
    pub fn clear_recycled() -> usize {
        IMAGES.with(|images| {
            let mut images = images.borrow_mut();
            let before = images.len();
            images.retain(|_, image| Rc::strong_count(&image.entry) > 1);
            let dropped = before - images.len();
            if dropped > 0 {
                log::debug!(target: "leafer::image", "Recycled {} images", dropped);
            }
            dropped
        })
    }

    pub fn len() -> usize {
        IMAGES.with(|images| images.borrow().len())
    }
}

fn decode(source: &ImageSource) -> Result<tiny_skia::Pixmap> {
    match source {
        ImageSource::Path(path) => raster(image::open(path)?),
        ImageSource::Bytes(bytes) => raster(image::load_from_memory(bytes)?),
        ImageSource::SvgPath(path) => svg(&std::fs::read(path)?),
        ImageSource::SvgBytes(bytes) => svg(bytes),
    }
}

fn raster(img: image::DynamicImage) -> Result<tiny_skia::Pixmap> {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut data = rgba.into_raw();

    // tiny-skia stores premultiplied alpha
    for px in data.chunks_exact_mut(4) {
        let alpha = px[3] as u16;
        for channel in &mut px[..3] {
            *channel = ((*channel as u16 * alpha + 127) / 255) as u8;
        }
    }

    let invalid = || Error::InvalidSize {
        width: width as f32,
        height: height as f32,
        pixel_ratio: 1.0,
    };
    let size = tiny_skia::IntSize::from_wh(width, height).ok_or_else(invalid)?;
    tiny_skia::Pixmap::from_vec(data, size).ok_or_else(invalid)
}

fn svg(bytes: &[u8]) -> Result<tiny_skia::Pixmap> {
    let tree = resvg::usvg::Tree::from_data(bytes, &resvg::usvg::Options::default())
        .map_err(|e| Error::Svg(e.to_string()))?;
    let size = tree.size();
    let width = size.width().ceil() as u32;
    let height = size.height().ceil() as u32;

    let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or(Error::InvalidSize {
        width: size.width(),
        height: size.height(),
        pixel_ratio: 1.0,
    })?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
    Ok(pixmap)
}
