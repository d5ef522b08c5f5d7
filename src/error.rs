//! Error type shared by every subsystem.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid surface size: {width}x{height} at pixel ratio {pixel_ratio}")]
    InvalidSize {
        width: f32,
        height: f32,
        pixel_ratio: f32,
    },
    #[error("Controller has been destroyed")]
    Destroyed,
    #[error("Controller is not initialized")]
    Uninitialized,
    #[error("Reference frame node is not part of the tree")]
    InvalidRelative,
    #[error("Node is no longer part of its tree")]
    StaleNode,
    #[error("Unknown reference frame: {0}")]
    UnknownRelative(String),
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),
    #[error("Shared resource is busy: {0}")]
    Busy(&'static str),
    #[error("Export did not settle before the scheduler went idle")]
    Stalled,
    #[error("Failed to decode SVG: {0}")]
    Svg(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
