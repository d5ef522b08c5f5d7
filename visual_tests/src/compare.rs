use crate::{Result, VisualTestError};
use image::{Rgba, RgbaImage};
use image_compare::Algorithm;
use std::path::Path;

/// Channel difference above which a pixel counts as changed
const PIXEL_TOLERANCE: u8 = 10;

/// Result of comparing two images
pub struct CompareResult {
    /// Similarity score from 0.0 to 1.0
    pub similarity: f64,
    /// Pixels whose largest channel difference exceeds the tolerance
    pub changed_pixels: u64,
}

fn load_pair(reference: &Path, captured: &Path) -> Result<(RgbaImage, RgbaImage)> {
    let ref_rgba = image::open(reference)?.to_rgba8();
    let cap_rgba = image::open(captured)?.to_rgba8();

    if ref_rgba.dimensions() != cap_rgba.dimensions() {
        return Err(VisualTestError::Compare(format!(
            "Image dimensions don't match: reference {:?} vs captured {:?}",
            ref_rgba.dimensions(),
            cap_rgba.dimensions()
        )));
    }
    Ok((ref_rgba, cap_rgba))
}

/// Compare two renders with SSIM, plus a count of visibly changed pixels
pub fn compare_images(reference: &Path, captured: &Path) -> Result<CompareResult> {
    let (ref_rgba, cap_rgba) = load_pair(reference, captured)?;

    let changed_pixels = ref_rgba
        .pixels()
        .zip(cap_rgba.pixels())
        .filter(|(a, b)| pixel_difference(a, b) > PIXEL_TOLERANCE)
        .count() as u64;

    // Scenes are flattened onto white, so RGB carries everything
    let ref_rgb = image::DynamicImage::ImageRgba8(ref_rgba).to_rgb8();
    let cap_rgb = image::DynamicImage::ImageRgba8(cap_rgba).to_rgb8();
    let result =
        image_compare::rgb_similarity_structure(&Algorithm::MSSIMSimple, &ref_rgb, &cap_rgb)
            .map_err(|e| VisualTestError::Compare(format!("SSIM comparison failed: {}", e)))?;

    Ok(CompareResult {
        similarity: result.score,
        changed_pixels,
    })
}

/// Write an image with changed pixels in red over a dimmed copy of `captured`
pub fn generate_diff_image(reference: &Path, captured: &Path, output: &Path) -> Result<()> {
    let (ref_rgba, cap_rgba) = load_pair(reference, captured)?;
    let (width, height) = ref_rgba.dimensions();

    let diff_img = RgbaImage::from_fn(width, height, |x, y| {
        let cap_pixel = cap_rgba.get_pixel(x, y);
        let diff = pixel_difference(ref_rgba.get_pixel(x, y), cap_pixel);
        if diff > PIXEL_TOLERANCE {
            let intensity = (diff as f32 / 255.0 * 200.0 + 55.0) as u8;
            Rgba([intensity, 0, 0, 255])
        } else {
            let [r, g, b, _] = cap_pixel.0;
            Rgba([r / 3, g / 3, b / 3, 255])
        }
    });

    diff_img.save(output)?;
    Ok(())
}

/// Largest channel difference between two pixels, alpha included
fn pixel_difference(a: &Rgba<u8>, b: &Rgba<u8>) -> u8 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(x, y)| x.abs_diff(*y))
        .max()
        .unwrap_or(0)
}
