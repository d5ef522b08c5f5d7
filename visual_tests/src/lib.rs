mod capture;
mod compare;

pub use capture::{capture_scene, scene, CaptureConfig, PaintPath, SCENE_HEIGHT, SCENE_WIDTH};
pub use compare::{compare_images, generate_diff_image, CompareResult};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisualTestError {
    #[error("Failed to capture scene: {0}")]
    Capture(String),
    #[error("Unknown scene: {0}")]
    UnknownScene(String),
    #[error("Failed to compare images: {0}")]
    Compare(String),
    #[error("Reference image not found: {0}")]
    ReferenceNotFound(PathBuf),
    #[error("Render error: {0}")]
    Leafer(#[from] leafer::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, VisualTestError>;

/// Configuration for a visual test
#[derive(Clone)]
pub struct VisualTestConfig {
    /// Name of the scene to render
    pub scene_name: String,
    /// Similarity threshold (0.0 to 1.0, default 0.99)
    pub similarity_threshold: f64,
}

impl Default for VisualTestConfig {
    fn default() -> Self {
        Self {
            scene_name: String::new(),
            similarity_threshold: 0.99,
        }
    }
}

/// Result of a visual test
pub struct VisualTestResult {
    /// Whether every comparison passed (similarity >= threshold)
    pub passed: bool,
    /// Cached paint path against the forced multi-paint path
    pub similarity: f64,
    /// Cached paint path against the stored reference, if there is one
    pub reference_similarity: Option<f64>,
    /// Path to the scene rendered through the controller
    pub captured_path: PathBuf,
    /// Path to the scene rendered through the forced multi-paint path
    pub complex_path: PathBuf,
    /// Path to diff image (if generated on failure)
    pub diff_path: Option<PathBuf>,
}

/// Get the path to the references directory
pub fn references_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("references")
}

/// Get the path to a reference image for a scene
pub fn reference_path(scene_name: &str) -> PathBuf {
    references_dir().join(format!("{}.png", scene_name))
}

/// Get the path to the output directory for test artifacts
pub fn output_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("output")
}

/// Get the path to a scene rendered through the controller
pub fn captured_path(scene_name: &str) -> PathBuf {
    output_dir().join(format!("{}_captured.png", scene_name))
}

/// Get the path to a scene rendered through the forced multi-paint path
pub fn complex_path(scene_name: &str) -> PathBuf {
    output_dir().join(format!("{}_complex.png", scene_name))
}

/// Get the path to a diff image
pub fn diff_path(scene_name: &str) -> PathBuf {
    output_dir().join(format!("{}_diff.png", scene_name))
}

/// Render a scene along both paint paths and compare them, plus the stored
/// reference when one exists
pub fn run_visual_test(config: &VisualTestConfig) -> Result<VisualTestResult> {
    // Ensure output directory exists
    std::fs::create_dir_all(output_dir())?;

    let cap_path = captured_path(&config.scene_name);
    let cplx_path = complex_path(&config.scene_name);

    capture_scene(&CaptureConfig {
        scene_name: config.scene_name.clone(),
        output_path: cap_path.clone(),
        paint_path: PaintPath::Cached,
    })?;
    capture_scene(&CaptureConfig {
        scene_name: config.scene_name.clone(),
        output_path: cplx_path.clone(),
        paint_path: PaintPath::ForcedComplex,
    })?;

    let similarity = compare_images(&cplx_path, &cap_path)?.similarity;

    let ref_path = reference_path(&config.scene_name);
    let reference_similarity = if ref_path.exists() {
        Some(compare_images(&ref_path, &cap_path)?.similarity)
    } else {
        None
    };

    let passed = similarity >= config.similarity_threshold
        && reference_similarity.map_or(true, |s| s >= config.similarity_threshold);

    // Generate diff if failed
    let diff = if !passed {
        let diff_file = diff_path(&config.scene_name);
        let against = if similarity < config.similarity_threshold {
            &cplx_path
        } else {
            &ref_path
        };
        generate_diff_image(against, &cap_path, &diff_file)?;
        Some(diff_file)
    } else {
        None
    };

    Ok(VisualTestResult {
        passed,
        similarity,
        reference_similarity,
        captured_path: cap_path,
        complex_path: cplx_path,
        diff_path: diff,
    })
}

/// Update the reference image for a scene
pub fn update_reference(scene_name: &str) -> Result<PathBuf> {
    // Ensure references directory exists
    std::fs::create_dir_all(references_dir())?;

    let ref_path = reference_path(scene_name);

    capture_scene(&CaptureConfig {
        scene_name: scene_name.to_string(),
        output_path: ref_path.clone(),
        paint_path: PaintPath::Cached,
    })?;

    log::info!("Updated reference: {}", ref_path.display());
    Ok(ref_path)
}

/// Check if we're in update references mode
pub fn should_update_references() -> bool {
    std::env::var("UPDATE_REFERENCES").is_ok()
}
