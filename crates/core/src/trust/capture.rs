use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine as _;
use image::{Rgb, RgbImage};

use crate::protoblock::ProtoBlock;

const SEPARATOR_WIDTH: u32 = 4;
const FALLBACK_WIDTH: u32 = 800;
const FALLBACK_HEIGHT: u32 = 600;

/// Pick the file to launch for a visual check: a write file with `main`
/// in its stem, else one with an if-main guard, else an HTML page, else
/// any plausible script.
pub fn select_program_file(protoblock: &ProtoBlock, root: &Path) -> Option<PathBuf> {
    let candidates: Vec<&String> = protoblock
        .write_files
        .iter()
        .chain(protoblock.context_files.iter())
        .collect();

    for rel in &candidates {
        let path = Path::new(rel);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if stem.contains("main") && rel.ends_with(".py") {
            return Some(root.join(rel));
        }
    }

    for rel in &candidates {
        if rel.ends_with(".py") {
            let path = root.join(rel);
            if let Ok(content) = std::fs::read_to_string(&path) {
                if content.contains("__main__") {
                    return Some(path);
                }
            }
        }
    }

    for rel in &candidates {
        if rel.ends_with(".html") {
            return Some(root.join(rel));
        }
    }

    candidates
        .iter()
        .find(|rel| rel.ends_with(".py"))
        .map(|rel| root.join(rel))
}

/// Launch the program under review. HTML pages are not launched; the
/// screenshot fallback chain covers them.
pub fn launch_program(path: &Path) -> Option<tokio::process::Child> {
    if path.extension().and_then(|e| e.to_str()) != Some("py") {
        return None;
    }
    match tokio::process::Command::new("python")
        .arg(path)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        Ok(child) => Some(child),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to launch program for visual check");
            None
        }
    }
}

/// Best-effort screen capture: try the OS screenshot utilities in order,
/// fall back to a synthesized reference image so the vision pipeline
/// always has something to send.
pub async fn capture_screenshot(out_path: &Path) -> Result<PathBuf> {
    let commands: &[(&str, &[&str])] = if cfg!(target_os = "macos") {
        &[("screencapture", &["-x"])]
    } else {
        &[
            ("gnome-screenshot", &["-f"]),
            ("import", &["-window", "root"]),
        ]
    };

    for (program, args) in commands {
        let status = tokio::process::Command::new(program)
            .args(*args)
            .arg(out_path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
        if matches!(status, Ok(s) if s.success()) && out_path.exists() {
            return Ok(out_path.to_path_buf());
        }
    }

    tracing::warn!("Screen capture unavailable, synthesizing a reference image");
    synthesize_reference_image(out_path)?;
    Ok(out_path.to_path_buf())
}

/// Neutral gray placeholder used when no capture utility works. Keeps the
/// downstream pipeline uniform; the vision LLM is told what it sees.
pub fn synthesize_reference_image(out_path: &Path) -> Result<()> {
    let img = RgbImage::from_pixel(FALLBACK_WIDTH, FALLBACK_HEIGHT, Rgb([96u8, 96u8, 96u8]));
    img.save(out_path)
        .with_context(|| format!("Failed to write reference image {}", out_path.display()))?;
    Ok(())
}

/// Stitch two screenshots side by side with a thin black separator.
/// Returns the stitched dimensions.
pub fn stitch_side_by_side(before: &Path, after: &Path, out: &Path) -> Result<(u32, u32)> {
    let left = image::open(before)
        .with_context(|| format!("Failed to open {}", before.display()))?
        .to_rgb8();
    let right = image::open(after)
        .with_context(|| format!("Failed to open {}", after.display()))?
        .to_rgb8();

    let height = left.height().max(right.height());
    let width = left.width() + SEPARATOR_WIDTH + right.width();
    let mut stitched = RgbImage::from_pixel(width, height, Rgb([0u8, 0u8, 0u8]));

    image::imageops::overlay(&mut stitched, &left, 0, 0);
    image::imageops::overlay(
        &mut stitched,
        &right,
        (left.width() + SEPARATOR_WIDTH) as i64,
        0,
    );

    stitched
        .save(out)
        .with_context(|| format!("Failed to write stitched image {}", out.display()))?;
    Ok((width, height))
}

pub fn encode_png_base64(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

pub async fn wait_for_render(delay_secs: u64) {
    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
}

/// Parse "STAR RATING: 4.5" out of a vision verdict.
pub fn parse_star_rating(text: &str) -> Option<f64> {
    let idx = text.find("STAR RATING:")?;
    let rest = &text[idx + "STAR RATING:".len()..];
    let line = rest.lines().next()?.trim();
    let numeric: String = line
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    numeric.parse::<f64>().ok().filter(|r| (0.0..=5.0).contains(r))
}

/// Descriptive band for a star rating.
pub fn rating_band(stars: f64) -> &'static str {
    if stars >= 4.75 {
        "Excellent - Perfect match with requirements"
    } else if stars >= 4.0 {
        "Good - Minor visual discrepancies"
    } else if stars >= 3.0 {
        "Acceptable - Noticeable issues"
    } else if stars >= 2.0 {
        "Poor - Significant issues"
    } else {
        "Failed - Does not match requirements"
    }
}
