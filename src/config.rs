//! Controller configuration.
//!
//! ```ignore
//! let leafer = Leafer::new(
//!     LeaferConfig::new()
//!         .width(800.0)
//!         .height(600.0)
//!         .pixel_ratio(2.0)
//!         .fill(Color::WHITE),
//! )?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::geometry::{ScreenSize, Size};
use crate::paint::Color;

/// Unique identifier for each controller, used in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaferId(u64);

impl LeaferId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        LeaferId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LeaferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Leafer-{}", self.0)
    }
}

/// Configuration for a [`Leafer`](crate::Leafer) controller.
///
/// Leaving `width` or `height` unset puts the surface in auto-layout mode:
/// it takes its size from the host view and follows
/// [`Leafer::view_resized`](crate::Leafer::view_resized) notifications.
#[derive(Clone, Debug)]
pub struct LeaferConfig {
    /// Logical width. `None` means auto-layout.
    pub width: Option<f32>,
    /// Logical height. `None` means auto-layout.
    pub height: Option<f32>,
    /// Pixel density of the surface.
    pub pixel_ratio: f32,
    /// Background fill.
    pub fill: Option<Color>,
    /// Start automatically on the next scheduler round after init.
    pub start: bool,
    pub hittable: bool,
    /// Whether the surface can carry a native background color instead of
    /// painting the fill into its pixels.
    pub allow_background_color: bool,
    /// Client size of the host view, used while in auto-layout mode.
    pub view_size: Size,
}

impl Default for LeaferConfig {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            pixel_ratio: 1.0,
            fill: None,
            start: true,
            hittable: true,
            allow_background_color: false,
            view_size: Size::new(800.0, 600.0),
        }
    }
}

impl LeaferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(mut self, width: f32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn height(mut self, height: f32) -> Self {
        self.height = Some(height);
        self
    }

    /// Set both dimensions.
    pub fn size(self, width: f32, height: f32) -> Self {
        self.width(width).height(height)
    }

    pub fn pixel_ratio(mut self, pixel_ratio: f32) -> Self {
        self.pixel_ratio = pixel_ratio;
        self
    }

    pub fn fill(mut self, fill: Color) -> Self {
        self.fill = Some(fill);
        self
    }

    pub fn start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    pub fn hittable(mut self, hittable: bool) -> Self {
        self.hittable = hittable;
        self
    }

    pub fn allow_background_color(mut self, allow: bool) -> Self {
        self.allow_background_color = allow;
        self
    }

    pub fn view_size(mut self, width: f32, height: f32) -> Self {
        self.view_size = Size::new(width, height);
        self
    }

    /// True unless both dimensions are explicitly set to a positive value.
    pub fn is_auto_layout(&self) -> bool {
        !(self.width.is_some_and(|w| w > 0.0) && self.height.is_some_and(|h| h > 0.0))
    }

    /// Surface size this configuration resolves to.
    pub fn screen_size(&self) -> ScreenSize {
        let width = self.width.filter(|w| *w > 0.0).unwrap_or(self.view_size.width);
        let height = self.height.filter(|h| *h > 0.0).unwrap_or(self.view_size.height);
        ScreenSize::new(width, height, self.pixel_ratio)
    }
}
