//! Headless capture: PNG screenshots and frame recording.

use std::error::Error;
use std::fs;
use std::io::BufWriter;
use std::path::Path;

use crate::nes::Nes;
use crate::palette::PALETTE;

/// Save the current framebuffer as a PNG file.
///
/// The framebuffer holds palette indices; this resolves them through the
/// NTSC palette to RGBA bytes for the encoder.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn save_screenshot(nes: &Nes, path: &Path) -> Result<(), Box<dyn Error>> {
    let width = nes.framebuffer_width() as u32;
    let height = nes.framebuffer_height() as u32;

    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for &index in nes.framebuffer().iter() {
        let argb = PALETTE[usize::from(index & 0x3F)];
        rgba.push(((argb >> 16) & 0xFF) as u8);
        rgba.push(((argb >> 8) & 0xFF) as u8);
        rgba.push((argb & 0xFF) as u8);
        rgba.push(0xFF);
    }

    let file = fs::File::create(path)?;
    let w = BufWriter::new(file);
    let mut encoder = png::Encoder::new(w, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&rgba)?;
    Ok(())
}

/// Run and dump `num_frames` frames as PNGs under `dir/frames/`.
///
/// # Errors
///
/// Returns an error if emulation faults or frames cannot be saved.
pub fn record(nes: &mut Nes, dir: &Path, num_frames: u32) -> Result<(), Box<dyn Error>> {
    let frames_dir = dir.join("frames");
    fs::create_dir_all(&frames_dir)?;

    for i in 1..=num_frames {
        nes.run_frame()?;
        let filename = frames_dir.join(format!("{i:06}.png"));
        save_screenshot(nes, &filename)?;
    }

    eprintln!("Captured {num_frames} frames to {}", frames_dir.display());
    Ok(())
}
