use crate::{Result, VisualTestError};
use leafer::canvas::{BlendMode, Canvas};
use leafer::export::{export_blocking, ExportFormat, ExportOptions, ExportTarget, Screenshot};
use leafer::geometry::ScreenSize;
use leafer::node::NodeData;
use leafer::paint::{Color, LinearGradient, Shadow, SkiaPaint};
use leafer::renderer::dispatch;
use leafer::renderer::Classification;
use leafer::{Leafer, LeaferConfig};
use std::path::PathBuf;

/// Logical size of every scene.
pub const SCENE_WIDTH: f32 = 160.0;
pub const SCENE_HEIGHT: f32 = 120.0;

/// How the shapes of a scene are painted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaintPath {
    /// Through a running controller and the export pipeline, each node on
    /// its cached classification
    Cached,
    /// Directly through the multi-paint path, whatever the classification
    ForcedComplex,
}

/// Configuration for capturing a scene
pub struct CaptureConfig {
    /// Name of the scene to render
    pub scene_name: String,
    /// Path where the PNG will be saved
    pub output_path: PathBuf,
    pub paint_path: PaintPath,
}

/// Shapes of a named scene, top-level and in paint order
pub fn scene(name: &str) -> Option<Vec<NodeData>> {
    let shapes = match name {
        "single_fill" => vec![
            NodeData::rect().at(10.0, 10.0).size(60.0, 40.0).with_fill(Color::from_hex(0x3366CC)),
            NodeData::ellipse().at(80.0, 20.0).size(60.0, 80.0).with_fill(Color::from_hex(0xCC3333)),
        ],
        "single_stroke" => vec![
            NodeData::rect()
                .at(20.0, 20.0)
                .size(50.0, 50.0)
                .with_stroke(Color::BLACK, 3.0),
            NodeData::ellipse()
                .at(90.0, 30.0)
                .size(50.0, 50.0)
                .with_stroke(Color::from_hex(0x228833), 6.0),
        ],
        "fill_and_stroke" => vec![
            NodeData::rect()
                .at(15.0, 15.0)
                .size(80.0, 50.0)
                .rotate(10.0)
                .with_fill(LinearGradient::vertical(Color::WHITE, Color::from_hex(0x8844AA)))
                .with_stroke(Color::BLACK, 2.0),
            NodeData::ellipse()
                .at(100.0, 60.0)
                .size(40.0, 40.0)
                .scale(1.2)
                .with_fill(Color::rgba(1.0, 0.6, 0.0, 0.7))
                .with_stroke(Color::from_hex(0x333333), 4.0),
        ],
        "complex" => vec![NodeData::rect()
            .at(30.0, 20.0)
            .size(90.0, 70.0)
            .with_corner_radius(12.0)
            .with_shadow(Shadow::new(4.0, 4.0, 6.0, Color::rgba(0.0, 0.0, 0.0, 0.5)))
            .with_fill(Color::from_hex(0xEEEEEE))
            .with_stroke(Color::from_hex(0x555555), 2.0)],
        _ => return None,
    };
    Some(shapes)
}

/// Render a scene to a PNG file
pub fn capture_scene(config: &CaptureConfig) -> Result<()> {
    let shapes = scene(&config.scene_name)
        .ok_or_else(|| VisualTestError::UnknownScene(config.scene_name.clone()))?;

    match config.paint_path {
        PaintPath::Cached => capture_cached(shapes, config)?,
        PaintPath::ForcedComplex => capture_forced(shapes, config)?,
    }

    // Verify the image was created
    if !config.output_path.exists() {
        return Err(VisualTestError::Capture(format!(
            "Image was not created at {}",
            config.output_path.display()
        )));
    }
    Ok(())
}

fn capture_cached(shapes: Vec<NodeData>, config: &CaptureConfig) -> Result<()> {
    let leafer = Leafer::new(LeaferConfig::new().size(SCENE_WIDTH, SCENE_HEIGHT))?;
    for shape in shapes {
        leafer.add(shape)?;
    }
    let target = ExportTarget::File(config.output_path.clone(), ExportFormat::Png);
    let result = export_blocking(
        &leafer.root(),
        target,
        ExportOptions::new()
            .screenshot(Screenshot::Full)
            .fill(Color::WHITE),
    );
    leafer.destroy();
    leafer::scheduler::run_until_idle();
    result?;
    Ok(())
}

fn capture_forced(shapes: Vec<NodeData>, config: &CaptureConfig) -> Result<()> {
    let size = ScreenSize::new(SCENE_WIDTH, SCENE_HEIGHT, 1.0);
    let mut canvas = Canvas::new(size)?;
    for shape in &shapes {
        canvas.set_world(shape.local_matrix());
        dispatch::draw_with(shape, Classification::Complex, &mut canvas, &SkiaPaint);
    }
    let bounds = canvas.bounds();
    canvas.fill_world(&bounds, Color::WHITE, BlendMode::DestinationOver);
    let bytes = canvas.export(ExportFormat::Png, None)?;
    std::fs::write(&config.output_path, bytes)?;
    Ok(())
}
