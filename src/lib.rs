pub mod app;
pub mod canvas;
pub mod canvas_manager;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod export;
pub mod geometry;
pub mod image_manager;
pub mod interaction;
pub mod layout;
pub mod leafer;
pub mod node;
pub mod paint;
pub mod renderer;
pub mod scheduler;
pub mod task;
pub mod transform;
pub mod tree;
pub mod watcher;

pub use app::App;
pub use config::LeaferConfig;
pub use error::{Error, Result};
pub use leafer::{Leafer, Milestones, WaitId};

pub mod prelude {
    pub use crate::canvas::Canvas;
    pub use crate::events::{Event, EventType};
    pub use crate::export::{
        export, export_blocking, ExportData, ExportFormat, ExportOptions, ExportResult,
        ExportTarget, Screenshot,
    };
    pub use crate::geometry::{Bounds, Point, ScreenSize, Size};
    pub use crate::image_manager::{ImageManager, ImageSource};
    pub use crate::interaction::Cursor;
    pub use crate::node::{BoundsKind, NodeData, NodeKind, NodeRef, Relative};
    pub use crate::paint::{Color, LinearGradient, Paint, Shadow};
    pub use crate::scheduler::{run_pending, run_until_idle};
    pub use crate::transform::Matrix;
    pub use crate::{App, Error, Leafer, LeaferConfig, Result};
}

/// Install `env_logger` as the `log` backend. Safe to call more than once.
///
/// Filtering follows `RUST_LOG`, e.g. `RUST_LOG=leafer=debug,leafer::render=trace`.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
