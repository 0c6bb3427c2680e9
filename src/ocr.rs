//! Batch OCR over folders of scraped images.
//!
//! Each immediate sub-directory of the root becomes one CSV row holding the
//! text of every image found beneath it.

use crate::walk::{find_files, has_extension};
use image::{GrayImage, ImageFormat, Luma};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp", "gif"];

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub lang: String,
    pub psm: u8,
    pub preprocess: bool,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            lang: "eng+chi_sim".to_string(),
            psm: 6,
            preprocess: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrRow {
    pub directory: String,
    pub text: String,
}

pub fn is_image_file(path: &Path) -> bool {
    has_extension(path, IMAGE_EXTENSIONS)
}

/// Image files under `dir`, recursively, in path order.
pub fn find_images(dir: &Path) -> Result<Vec<PathBuf>, OcrError> {
    Ok(find_files(dir, IMAGE_EXTENSIONS)?)
}

/// Stretch the darkest pixel to black and the brightest to white.
pub fn autocontrast(img: &mut GrayImage) {
    let (lo, hi) = img
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), Luma([v])| (lo.min(*v), hi.max(*v)));
    if hi <= lo {
        return;
    }
    let scale = 255.0 / f32::from(hi - lo);
    for Luma([v]) in img.pixels_mut() {
        *v = (f32::from(*v - lo) * scale).round().min(255.0) as u8;
    }
}

/// 3x3 median filter; edges reuse the nearest in-bounds pixels.
pub fn median3(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut out = GrayImage::new(width, height);
    let mut window = [0u8; 9];
    for y in 0..height {
        for x in 0..width {
            let mut n = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let sx = (i64::from(x) + dx).clamp(0, i64::from(width) - 1) as u32;
                    let sy = (i64::from(y) + dy).clamp(0, i64::from(height) - 1) as u32;
                    window[n] = img.get_pixel(sx, sy)[0];
                    n += 1;
                }
            }
            window.sort_unstable();
            out.put_pixel(x, y, Luma([window[4]]));
        }
    }
    out
}

/// Grayscale, autocontrast, then denoise.
pub fn preprocess(path: &Path) -> Result<GrayImage, OcrError> {
    let mut gray = image::open(path)?.to_luma8();
    autocontrast(&mut gray);
    Ok(median3(&gray))
}

fn run_tesseract(image_path: &Path, settings: &OcrSettings) -> Result<String, OcrError> {
    let output = Command::new("tesseract")
        .arg(image_path)
        .arg("stdout")
        .args(["-l", &settings.lang])
        .args(["--psm", &settings.psm.to_string()])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
        Ok(output) => Err(OcrError::Failed(format!(
            "tesseract failed on {}: {}",
            image_path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::ToolNotFound(
            "tesseract (install tesseract-ocr)".to_string(),
        )),
        Err(e) => Err(OcrError::Io(e)),
    }
}

/// OCR a single image.
pub fn ocr_image(path: &Path, settings: &OcrSettings) -> Result<String, OcrError> {
    if !settings.preprocess {
        return run_tesseract(path, settings);
    }
    let cleaned = preprocess(path)?;
    let temp = tempfile::Builder::new().suffix(".png").tempfile()?;
    cleaned.save_with_format(temp.path(), ImageFormat::Png)?;
    run_tesseract(temp.path(), settings)
}

/// One row per immediate sub-directory of `root`, in name order.
pub fn ocr_tree(root: &Path, settings: &OcrSettings) -> Result<Vec<OcrRow>, OcrError> {
    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();

    let mut rows = Vec::with_capacity(subdirs.len());
    for subdir in subdirs {
        let mut texts = Vec::new();
        for image_path in find_images(&subdir)? {
            match ocr_image(&image_path, settings) {
                Ok(text) if !text.is_empty() => texts.push(text),
                Ok(_) => debug!("No text in {}", image_path.display()),
                Err(e @ OcrError::ToolNotFound(_)) => return Err(e),
                Err(e) => warn!("{} failed: {}", image_path.display(), e),
            }
        }
        if texts.is_empty() {
            warn!("No text found in {}", subdir.display());
        }
        rows.push(OcrRow {
            directory: subdir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            text: texts.join("\n"),
        });
    }
    Ok(rows)
}

pub fn write_csv(path: &Path, rows: &[OcrRow]) -> Result<(), OcrError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["directory", "text"])?;
    for row in rows {
        writer.write_record([row.directory.as_str(), row.text.as_str()])?;
    }
    writer.flush()?;
    info!("Saved OCR for {} sub-directories to {}", rows.len(), path.display());
    Ok(())
}
