//! Build a small scene, wait for it to finish rendering and write PNGs.
//!
//! ```sh
//! RUST_LOG=leafer=debug cargo run --example export_png -- out
//! ```

use std::path::PathBuf;

use leafer::prelude::*;

fn main() -> leafer::Result<()> {
    leafer::init_logger();
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&out_dir)?;

    let leafer = Leafer::new(
        LeaferConfig::new()
            .size(320.0, 200.0)
            .pixel_ratio(2.0)
            .fill(Color::from_hex(0xF4F1EA)),
    )?;

    let card = leafer.add(
        NodeData::frame()
            .named("card")
            .at(24.0, 24.0)
            .size(180.0, 120.0)
            .with_fill(Color::WHITE)
            .with_corner_radius(10.0)
            .with_shadow(Shadow::new(0.0, 4.0, 8.0, Color::rgba(0.0, 0.0, 0.0, 0.25))),
    )?;
    card.add(
        NodeData::rect()
            .at(16.0, 16.0)
            .size(148.0, 36.0)
            .with_fill(LinearGradient::vertical(
                Color::from_hex(0x4A90D9),
                Color::from_hex(0x1F5FA8),
            )),
    )?;
    card.add(
        NodeData::ellipse()
            .at(130.0, 70.0)
            .size(60.0, 60.0)
            .with_fill(Color::from_hex(0xE8A33D))
            .with_stroke(Color::from_hex(0x8A5A12), 3.0),
    )?;
    leafer.add(
        NodeData::rect()
            .at(230.0, 60.0)
            .size(60.0, 60.0)
            .rotate(20.0)
            .with_fill(Color::from_hex(0x6BBF59)),
    )?;

    leafer.wait_view_completed({
        let leafer = leafer.clone();
        move || log::info!("{} view completed", leafer.id())
    });

    let page = out_dir.join("page.png");
    let result = export_blocking(
        &leafer.root(),
        page.to_string_lossy().parse()?,
        ExportOptions::new().screenshot(Screenshot::Full).pixel_ratio(2.0),
    )?;
    println!("{} ({}x{})", page.display(), result.width, result.height);

    // The card alone, scaled up and cropped to what it paints.
    let card_file = out_dir.join("card.jpg");
    let result = export_blocking(
        &card,
        card_file.to_string_lossy().parse()?,
        ExportOptions::new().scale(2.0).trim(true).quality(0.9),
    )?;
    println!(
        "{} ({}x{}, trimmed to {:?})",
        card_file.display(),
        result.width,
        result.height,
        result.trim_bounds
    );

    leafer.destroy();
    run_until_idle();
    Ok(())
}
