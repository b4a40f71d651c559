//! Screen capture providers
//!
//! The pre-lock image is taken before any lock window exists, either from an
//! image file (`--bg`) or from the X11 root window.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use log::{debug, info};
use std::path::PathBuf;

use crate::x11::Monitor;

/// Where a snapshot's pixels come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureScope {
    /// Pixel-exact copy of the root window; monitors map to sub-rectangles
    RootWindow,
    /// Unrelated image; scaled to whatever it is shown on
    File,
}

/// Captured pre-lock image
pub struct Snapshot {
    pub image: RgbaImage,
    pub scope: CaptureScope,
}

/// Source of the pre-lock image
pub trait ScreenCapture {
    fn capture(&self) -> Result<Snapshot>;
}

impl Snapshot {
    /// Exact region of the root window under `monitor`.
    ///
    /// Only root window captures have one; None when the monitor lies
    /// (partly) outside the captured area.
    pub fn region(&self, monitor: &Monitor) -> Option<RgbaImage> {
        if self.scope != CaptureScope::RootWindow || monitor.x < 0 || monitor.y < 0 {
            return None;
        }
        let (x, y) = (monitor.x as u32, monitor.y as u32);
        let (w, h) = (monitor.width as u32, monitor.height as u32);
        if w == 0 || h == 0 || x + w > self.image.width() || y + h > self.image.height() {
            return None;
        }
        Some(imageops::crop_imm(&self.image, x, y, w, h).to_image())
    }

    /// Image to show on `monitor`: its exact region when available,
    /// otherwise the whole snapshot scaled to fill the monitor.
    pub fn for_monitor(&self, monitor: &Monitor) -> RgbaImage {
        if let Some(region) = self.region(monitor) {
            return region;
        }
        let (w, h) = (monitor.width as u32, monitor.height as u32);
        if self.image.dimensions() == (w, h) {
            return self.image.clone();
        }
        debug!(
            "Scaling {}x{} snapshot to fill {}x{}",
            self.image.width(),
            self.image.height(),
            w,
            h
        );
        DynamicImage::ImageRgba8(self.image.clone())
            .resize_to_fill(w.max(1), h.max(1), FilterType::Triangle)
            .to_rgba8()
    }
}

/// Decode an image file
pub fn load_image(path: &std::path::Path) -> Result<RgbaImage> {
    let img = image::open(path)
        .with_context(|| format!("Failed to load image: {}", path.display()))?
        .to_rgba8();
    info!(
        "Loaded image {} ({}x{})",
        path.display(),
        img.width(),
        img.height()
    );
    Ok(img)
}

/// Background taken from an image file
pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScreenCapture for FileCapture {
    fn capture(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            image: load_image(&self.path)?,
            scope: CaptureScope::File,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn monitor(x: i16, y: i16, width: u16, height: u16) -> Monitor {
        Monitor {
            name: "test".to_string(),
            x,
            y,
            width,
            height,
            primary: false,
        }
    }

    /// 4x2 root image: left half red, right half blue
    fn root_snapshot() -> Snapshot {
        let image = RgbaImage::from_fn(4, 2, |x, _| {
            if x < 2 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        Snapshot {
            image,
            scope: CaptureScope::RootWindow,
        }
    }

    #[test]
    fn test_region_crops_monitor() {
        let snap = root_snapshot();
        let right = snap.region(&monitor(2, 0, 2, 2)).unwrap();
        assert_eq!(right.dimensions(), (2, 2));
        assert!(right.pixels().all(|p| p.0 == [0, 0, 255, 255]));
    }

    #[test]
    fn test_region_out_of_bounds() {
        let snap = root_snapshot();
        assert!(snap.region(&monitor(3, 0, 2, 2)).is_none());
        assert!(snap.region(&monitor(-1, 0, 2, 2)).is_none());
    }

    #[test]
    fn test_file_snapshot_has_no_region() {
        let mut snap = root_snapshot();
        snap.scope = CaptureScope::File;
        assert!(snap.region(&monitor(0, 0, 2, 2)).is_none());
    }

    #[test]
    fn test_for_monitor_scales_file_image() {
        let mut snap = root_snapshot();
        snap.scope = CaptureScope::File;
        let img = snap.for_monitor(&monitor(0, 0, 8, 4));
        assert_eq!(img.dimensions(), (8, 4));

        let same = snap.for_monitor(&monitor(0, 0, 4, 2));
        assert_eq!(same, snap.image);
    }

    #[test]
    fn test_file_capture_missing_file() {
        let capture = FileCapture::new("/nonexistent/gllock-bg.png");
        assert!(capture.capture().is_err());
    }
}
